#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use shelfkeep_lib::change_log::ChangeLogLines;
use shelfkeep_lib::config::StoreConfig;
use shelfkeep_lib::{FieldValue, FieldValues, InventoryStore};

pub fn memory_store() -> (InventoryStore, ChangeLogLines) {
    InventoryStore::open_in_memory().expect("open in-memory store")
}

pub fn disk_store(dir: &Path) -> InventoryStore {
    InventoryStore::open(&StoreConfig::in_dir(dir)).expect("open store")
}

/// An item with every required built-in field filled in.
pub fn item(id: &str, quantity: i64) -> FieldValues {
    let mut values = FieldValues::new();
    values.insert("id".into(), id.into());
    values.insert("name".into(), format!("Item {id}").into());
    values.insert("quantity".into(), quantity.into());
    values.insert("price".into(), FieldValue::Float(4.25));
    values.insert("category".into(), "Hardware".into());
    values.insert("brand".into(), "Acme".into());
    values
}

pub fn messages(lines: &ChangeLogLines) -> Vec<String> {
    lines
        .lock()
        .unwrap()
        .iter()
        .map(|line| line[22..].to_string())
        .collect()
}
