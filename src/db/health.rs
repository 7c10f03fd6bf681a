use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::schema;

const EXPECTED_JOURNAL_MODE: &str = "wal";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl HealthCheck {
    fn started(name: &str) -> (Self, Instant) {
        (
            Self {
                name: name.to_string(),
                passed: true,
                duration_ms: 0,
                details: None,
            },
            Instant::now(),
        )
    }

    fn fail(&mut self, details: impl Into<String>) {
        self.passed = false;
        self.details = Some(details.into());
    }

    fn finish(mut self, start: Instant) -> Self {
        self.duration_ms = start.elapsed().as_millis() as u64;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthOffender {
    pub table: String,
    pub rowid: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offenders: Vec<HealthOffender>,
    pub schema_hash: String,
    pub app_version: String,
    pub generated_at: String,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Engine integrity, referential integrity, and field/column congruence.
/// `expect_wal` is false for in-memory stores, which cannot use WAL.
pub fn run_health_checks(conn: &Connection, expect_wal: bool) -> HealthReport {
    let mut checks = Vec::new();

    checks.push(run_quick_check(conn));

    let (fk_check, offenders) = run_foreign_key_check(conn);
    checks.push(fk_check);

    checks.push(run_schema_congruence(conn));

    if expect_wal {
        checks.push(run_journal_mode(conn));
    }

    let status = if checks.iter().all(|c| c.passed) {
        HealthStatus::Ok
    } else {
        HealthStatus::Error
    };

    HealthReport {
        status,
        checks,
        offenders,
        schema_hash: compute_schema_hash(conn).unwrap_or_default(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

fn run_quick_check(conn: &Connection) -> HealthCheck {
    let (mut check, start) = HealthCheck::started("quick_check");
    match conn.query_row("PRAGMA quick_check;", [], |row| row.get::<_, String>(0)) {
        Ok(result) if result.eq_ignore_ascii_case("ok") => {}
        Ok(result) => check.fail(result),
        Err(err) => check.fail(format!("quick_check failed: {err}")),
    }
    check.finish(start)
}

fn run_foreign_key_check(conn: &Connection) -> (HealthCheck, Vec<HealthOffender>) {
    let (mut check, start) = HealthCheck::started("foreign_key_check");
    let rows = (|| -> rusqlite::Result<Vec<HealthOffender>> {
        let mut stmt = conn.prepare("PRAGMA foreign_key_check;")?;
        let offenders = stmt
            .query_map([], offender_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(offenders)
    })();

    let offenders = match rows {
        Ok(offenders) => {
            if !offenders.is_empty() {
                check.fail(format!("{} foreign key violation(s)", offenders.len()));
            }
            offenders
        }
        Err(err) => {
            check.fail(format!("foreign_key_check failed: {err}"));
            Vec::new()
        }
    };
    (check.finish(start), offenders)
}

fn offender_from_row(row: &Row<'_>) -> rusqlite::Result<HealthOffender> {
    let table: String = row.get(0)?;
    let rowid: Option<i64> = row.get(1)?;
    let parent: Option<String> = row.get(2)?;
    let fkid: Option<i64> = row.get(3)?;

    let mut message = String::new();
    if let Some(parent) = parent {
        message.push_str(&format!("missing parent '{parent}'"));
    }
    if let Some(fkid) = fkid {
        if !message.is_empty() {
            message.push_str(", ");
        }
        message.push_str(&format!("constraint #{fkid}"));
    }
    if message.is_empty() {
        message.push_str("foreign key violation");
    }

    Ok(HealthOffender {
        table,
        rowid: rowid.unwrap_or(-1),
        message,
    })
}

fn run_schema_congruence(conn: &Connection) -> HealthCheck {
    let (mut check, start) = HealthCheck::started("schema_congruence");
    match schema::verify(conn) {
        Ok(drift) if drift.is_congruent() => {}
        Ok(drift) => {
            let mut parts = Vec::new();
            if !drift.missing_columns.is_empty() {
                parts.push(format!(
                    "fields without a column: {}",
                    drift.missing_columns.join(", ")
                ));
            }
            if !drift.orphan_columns.is_empty() {
                parts.push(format!(
                    "columns without a field: {}",
                    drift.orphan_columns.join(", ")
                ));
            }
            check.fail(parts.join("; "));
        }
        Err(err) => check.fail(format!("schema verify failed: {err}")),
    }
    check.finish(start)
}

fn run_journal_mode(conn: &Connection) -> HealthCheck {
    let (mut check, start) = HealthCheck::started("journal_mode");
    match conn.query_row("PRAGMA journal_mode;", [], |row| row.get::<_, String>(0)) {
        Ok(mode) if mode.eq_ignore_ascii_case(EXPECTED_JOURNAL_MODE) => {
            check.details = Some(format!("journal_mode={mode}"));
        }
        Ok(mode) => check.fail(format!(
            "journal_mode mismatch: expected {EXPECTED_JOURNAL_MODE}, got {mode}"
        )),
        Err(err) => check.fail(format!("journal_mode query failed: {err}")),
    }
    check.finish(start)
}

fn compute_schema_hash(conn: &Connection) -> rusqlite::Result<String> {
    let mut stmt = conn.prepare(
        "SELECT type, name, tbl_name, sql FROM sqlite_master
         WHERE type IN ('table','index','trigger','view')
         ORDER BY type, name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut hasher = Sha256::new();
    for (ty, name, tbl, sql) in rows {
        hasher.update(ty.as_bytes());
        hasher.update(&[0]);
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(tbl.as_bytes());
        hasher.update(&[0]);
        if let Some(sql) = sql {
            hasher.update(sql.as_bytes());
        }
        hasher.update(&[0]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::{attachments, fields};

    fn conn() -> Connection {
        let conn = open_in_memory().unwrap();
        fields::ensure_fields_table(&conn).unwrap();
        schema::ensure_records_table(&conn).unwrap();
        attachments::ensure_images_table(&conn).unwrap();
        conn
    }

    #[test]
    fn fresh_store_is_healthy() {
        let report = run_health_checks(&conn(), false);
        assert!(report.is_ok(), "{report:?}");
        assert_eq!(report.checks.len(), 3);
        assert_eq!(report.schema_hash.len(), 64);
    }

    #[test]
    fn drift_and_dangling_attachments_are_reported() {
        let conn = conn();
        conn.execute_batch(
            "ALTER TABLE products ADD COLUMN stray TEXT;
             PRAGMA foreign_keys = OFF;
             INSERT INTO images (product_id, image_data) VALUES ('ghost', x'00');
             PRAGMA foreign_keys = ON;",
        )
        .unwrap();
        let report = run_health_checks(&conn, false);
        assert_eq!(report.status, HealthStatus::Error);
        let failed: Vec<_> = report
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(failed, vec!["foreign_key_check", "schema_congruence"]);
        assert_eq!(report.offenders.len(), 1);
        assert_eq!(report.offenders[0].table, "images");
    }
}
