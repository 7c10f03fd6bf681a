//! Inventory catalog core: a product table whose columns are defined at
//! runtime, with image attachments and an audit change log.

pub mod attachments;
pub mod change_log;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod export;
pub mod fields;
pub mod identifier;
pub mod logging;
pub mod records;
pub mod schema;
pub mod store;
pub mod values;

pub use error::{AppError, AppResult, ErrorClass};
pub use fields::FieldDefinition;
pub use logging::{flush_file_logs, init_file_logging, init_logging};
pub use records::{FieldValues, Record};
pub use store::{AddedItem, AssistantAnswer, InventoryStore};
pub use values::{FieldValue, InputClass, ValueType};
