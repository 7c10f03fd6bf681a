//! The inventory store: one connection, one change log, and every public
//! operation wrapped in its own transaction.

use std::fs;
use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::change_log::{ChangeLog, ChangeLogLines};
use crate::config::StoreConfig;
use crate::db::health::{run_health_checks, HealthReport};
use crate::db::schema_rebuild::RecoveryAction;
use crate::db::{self, with_tx, ForeignKeysOff, StoreLock, RECORDS_TABLE};
use crate::error::{codes, ErrorClass};
use crate::export::{self, AssistantReply};
use crate::fields::{self, FieldDefinition};
use crate::records::{self, FieldValues, Record};
use crate::schema::{self, SchemaDrift};
use crate::{attachments, credentials, AppError, AppResult};

/// Result of [`InventoryStore::add_item`]. Images are attached after the
/// record commits; a failed image leaves the record in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddedItem {
    pub id: String,
    pub images_attached: usize,
    pub images_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AssistantAnswer {
    Text(String),
    Records(Vec<Record>),
}

pub struct InventoryStore {
    conn: Connection,
    change_log: ChangeLog,
    strict_insert: bool,
    on_disk: bool,
    // Released after the connection closes.
    _lock: Option<StoreLock>,
}

impl InventoryStore {
    /// Open the store described by `config`, creating it on first use.
    pub fn open(config: &StoreConfig) -> AppResult<Self> {
        if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "create_store_dir")
                    .with_context("path", parent.display().to_string())
            })?;
        }
        let lock = StoreLock::acquire(&config.db_path)?;
        let lock_path = lock.path().display().to_string();
        let conn = db::open_sqlite(&config.db_path)?;
        let change_log = ChangeLog::open(&config.change_log_path)?;
        let mut store = Self {
            conn,
            change_log,
            strict_insert: config.strict_insert,
            on_disk: true,
            _lock: Some(lock),
        };
        store.initialize()?;
        info!(
            target: "shelfkeep",
            event = "store_open",
            db = %config.db_path.display(),
            change_log = %config.change_log_path.display(),
            lock = %lock_path,
            strict_insert = config.strict_insert
        );
        Ok(store)
    }

    /// A throwaway store with an in-memory change log.
    pub fn open_in_memory() -> AppResult<(Self, ChangeLogLines)> {
        let conn = db::open_in_memory()?;
        let (change_log, lines) = ChangeLog::in_memory();
        let mut store = Self {
            conn,
            change_log,
            strict_insert: false,
            on_disk: false,
            _lock: None,
        };
        store.initialize()?;
        Ok((store, lines))
    }

    pub fn set_strict_insert(&mut self, strict: bool) {
        self.strict_insert = strict;
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn change_log_path(&self) -> Option<&Path> {
        self.change_log.path()
    }

    fn initialize(&mut self) -> AppResult<()> {
        let recovery = with_tx(&mut self.conn, |tx| {
            fields::ensure_fields_table(tx)?;
            let recovery = schema::recover_interrupted_rebuild(tx)?;
            schema::ensure_records_table(tx)?;
            attachments::ensure_images_table(tx)?;
            credentials::ensure_login_table(tx)?;
            Ok(recovery)
        })?;
        match recovery {
            RecoveryAction::Nothing => {}
            RecoveryAction::DroppedStaging => {
                self.note("Recovery: discarded an unfinished field removal")
            }
            RecoveryAction::PromotedStaging => {
                self.note("Recovery: completed an interrupted field removal")
            }
        }

        let drift = schema::verify(&self.conn)?;
        if !drift.is_congruent() {
            warn!(
                target: "shelfkeep",
                event = "schema_drift_at_open",
                missing_columns = ?drift.missing_columns,
                orphan_columns = ?drift.orphan_columns
            );
            self.note(&format!(
                "WARNING: field table and {RECORDS_TABLE} table disagree (missing columns: {:?}, orphan columns: {:?})",
                drift.missing_columns, drift.orphan_columns
            ));
        }
        Ok(())
    }

    /// Append a change log line. The mutation it describes has already
    /// committed, so a failing log is reported but not returned.
    fn note(&mut self, message: &str) {
        if let Err(err) = self.change_log.append(message) {
            error!(
                target: "shelfkeep",
                event = "change_log_append_failed",
                code = %err.code(),
                error = %err,
                entry = message
            );
        }
    }

    /// Log a failed operation to tracing and the change log, then hand the
    /// error back.
    fn logged<R>(&mut self, operation: &str, subject: &str, result: AppResult<R>) -> AppResult<R> {
        if let Err(err) = &result {
            match err.class() {
                ErrorClass::Validation | ErrorClass::NotFound | ErrorClass::Conflict => warn!(
                    target: "shelfkeep",
                    event = "operation_rejected",
                    operation = operation,
                    subject = subject,
                    code = %err.code(),
                    error = %err
                ),
                _ => error!(
                    target: "shelfkeep",
                    event = "operation_failed",
                    operation = operation,
                    subject = subject,
                    code = %err.code(),
                    error = %err
                ),
            }
            self.note(&format!("ERROR: {operation} failed for '{subject}': {err}"));
        }
        result
    }

    // Fields

    pub fn fields(&self) -> AppResult<Vec<FieldDefinition>> {
        fields::list_fields(&self.conn)
    }

    pub fn field(&self, name: &str) -> AppResult<Option<FieldDefinition>> {
        fields::get_field(&self.conn, name)
    }

    /// Define a field and give it a column, as one unit.
    pub fn add_field(&mut self, def: &FieldDefinition) -> AppResult<()> {
        let result = with_tx(&mut self.conn, |tx| {
            fields::define_field(tx, def)?;
            schema::add_column(tx, def)
        });
        self.logged("add_field", &def.name, result)?;
        self.note(&format!(
            "Field Added: {} ({}, {}, {})",
            def.name,
            def.input_class.as_str(),
            def.value_type.as_str(),
            if def.required { "required" } else { "optional" }
        ));
        Ok(())
    }

    /// Drop a custom field's column and then its definition, as one unit.
    pub fn remove_field(&mut self, name: &str) -> AppResult<()> {
        let result = self.remove_field_inner(name);
        let stats = self.logged("remove_field", name, result)?;
        match stats {
            Some(stats) => self.note(&format!(
                "Field Removed: {name} ({} rows rebuilt)",
                stats.rows_copied
            )),
            None => self.note(&format!("Field Removed: {name}")),
        }
        Ok(())
    }

    fn remove_field_inner(
        &mut self,
        name: &str,
    ) -> AppResult<Option<db::schema_rebuild::RebuildStats>> {
        if fields::is_built_in(name) {
            return Err(
                AppError::new(codes::FIELD_BUILT_IN, "Built-in fields cannot be removed")
                    .with_context("field", name.to_string()),
            );
        }
        if fields::get_field(&self.conn, name)?.is_none() {
            return Err(fields::field_not_found(name));
        }
        let mut guard = ForeignKeysOff::new(&mut self.conn)?;
        with_tx(guard.conn(), |tx| {
            let stats = schema::remove_column(tx, name)?;
            fields::undefine_field(tx, name)?;
            Ok(stats)
        })
    }

    /// Field table vs. records table, as they stand now.
    pub fn schema_drift(&self) -> AppResult<SchemaDrift> {
        schema::verify(&self.conn)
    }

    pub fn physical_columns(&self) -> AppResult<Vec<String>> {
        schema::physical_columns(&self.conn)
    }

    // Records

    /// Insert a record, then attach `images` one by one. Image failures are
    /// logged and counted, not returned.
    pub fn add_item(&mut self, values: &FieldValues, images: &[Vec<u8>]) -> AppResult<AddedItem> {
        let strict = self.strict_insert;
        let subject = values
            .get(fields::ID_FIELD)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let result = with_tx(&mut self.conn, |tx| records::insert(tx, values, strict));
        let id = self.logged("add_item", &subject, result)?;
        self.note(&format!("Item Added: {id}"));

        let mut added = AddedItem {
            id,
            images_attached: 0,
            images_failed: 0,
        };
        for blob in images {
            let result = with_tx(&mut self.conn, |tx| attachments::add(tx, &added.id, blob));
            let subject = added.id.clone();
            match self.logged("attach_image", &subject, result) {
                Ok(_) => {
                    added.images_attached += 1;
                    self.note(&format!("Image Added: {subject} ({} bytes)", blob.len()));
                }
                Err(_) => added.images_failed += 1,
            }
        }
        Ok(added)
    }

    /// Take `amount` units off the stock of `id`. Returns what is left.
    pub fn remove_stock(&mut self, id: &str, amount: i64) -> AppResult<i64> {
        let result = with_tx(&mut self.conn, |tx| {
            records::decrement_quantity(tx, id, amount)
        });
        let remaining = self.logged("remove_stock", id, result)?;
        self.note(&format!(
            "Item Removed: {amount} of {id} ({remaining} remaining)"
        ));
        Ok(remaining)
    }

    /// Update some fields of `id`, possibly `id` itself. Returns the id the
    /// record has afterwards.
    pub fn update_item(&mut self, id: &str, values: &FieldValues) -> AppResult<String> {
        let result = with_tx(&mut self.conn, |tx| records::update(tx, id, values));
        let new_id = self.logged("update_item", id, result)?;
        let changed: Vec<&str> = values.keys().map(String::as_str).collect();
        if changed.is_empty() {
            debug!(target: "shelfkeep", event = "update_no_changes", id = id);
        } else if new_id == id {
            self.note(&format!("Item Updated: {id} [{}]", changed.join(", ")));
        } else {
            self.note(&format!(
                "Item Updated: {id} -> {new_id} [{}]",
                changed.join(", ")
            ));
        }
        Ok(new_id)
    }

    pub fn find_items(&mut self, ids: &[String]) -> AppResult<Vec<Record>> {
        let result = records::find_by_ids(&self.conn, ids);
        self.logged("find_items", &ids.join(","), result)
    }

    pub fn search_items(&mut self, fields: &[String], query: &str) -> AppResult<Vec<Record>> {
        let result = records::search(&self.conn, fields, query);
        self.logged("search_items", query, result)
    }

    pub fn snapshot(&mut self) -> AppResult<Vec<Record>> {
        let result = records::snapshot(&self.conn);
        self.logged("snapshot", RECORDS_TABLE, result)
    }

    pub fn snapshot_json(&mut self) -> AppResult<String> {
        let records = self.snapshot()?;
        export::snapshot_json(&records)
    }

    /// Turn an assistant reply into text or the records it asks to show.
    pub fn resolve_reply(&mut self, reply: &str) -> AppResult<AssistantAnswer> {
        match export::parse_reply(reply) {
            AssistantReply::Text(text) => Ok(AssistantAnswer::Text(text)),
            AssistantReply::ShowIds(ids) => Ok(AssistantAnswer::Records(self.find_items(&ids)?)),
        }
    }

    /// Drop every record, attachment and custom field.
    pub fn clear_inventory(&mut self) -> AppResult<()> {
        let result = with_tx(&mut self.conn, |tx| {
            attachments::delete_all(tx)?;
            tx.execute_batch(&format!("DROP TABLE {RECORDS_TABLE}"))
                .map_err(|err| AppError::from(err).with_context("operation", "drop_records"))?;
            let removed = fields::delete_custom_fields(tx)?;
            schema::ensure_records_table(tx)?;
            Ok(removed)
        });
        let removed = self.logged("clear_inventory", RECORDS_TABLE, result)?;
        self.note(&format!(
            "Inventory Cleared: all items and images deleted, {removed} custom fields removed"
        ));
        Ok(())
    }

    // Attachments

    pub fn add_image(&mut self, id: &str, blob: &[u8]) -> AppResult<i64> {
        let result = with_tx(&mut self.conn, |tx| attachments::add(tx, id, blob));
        let image_id = self.logged("add_image", id, result)?;
        self.note(&format!("Image Added: {id} ({} bytes)", blob.len()));
        Ok(image_id)
    }

    pub fn images_for(&mut self, id: &str) -> AppResult<Vec<Vec<u8>>> {
        let result = attachments::list_for(&self.conn, id);
        self.logged("images_for", id, result)
    }

    /// Remove one image of `id` with exactly these bytes. Returns false,
    /// and logs it, when there was none.
    pub fn remove_image(&mut self, id: &str, blob: &[u8]) -> AppResult<bool> {
        let result = with_tx(&mut self.conn, |tx| attachments::remove(tx, id, blob));
        let removed = self.logged("remove_image", id, result)?;
        if removed {
            self.note(&format!("Image Removed: {id} ({} bytes)", blob.len()));
        } else {
            info!(target: "shelfkeep", event = "image_remove_no_match", id = id);
            self.note(&format!("Image Not Removed: no matching image on {id}"));
        }
        Ok(removed)
    }

    // Credentials

    pub fn login_status(&self) -> AppResult<credentials::LoginStatus> {
        credentials::status(&self.conn)
    }

    pub fn set_credentials(
        &mut self,
        username: &str,
        password: &str,
        requires_login: bool,
    ) -> AppResult<()> {
        let result = with_tx(&mut self.conn, |tx| {
            credentials::set_credentials(tx, username, password, requires_login)
        });
        self.logged("set_credentials", username, result)?;
        self.note(&format!(
            "Credentials Updated: user '{username}', login {}",
            if requires_login { "required" } else { "not required" }
        ));
        Ok(())
    }

    pub fn verify_login(&self, username: &str, password: &str) -> AppResult<bool> {
        credentials::verify(&self.conn, username, password)
    }

    // Health

    pub fn health(&self) -> HealthReport {
        run_health_checks(&self.conn, self.on_disk)
    }
}
