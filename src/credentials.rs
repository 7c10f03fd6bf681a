//! Single-account login store. Independent of the field schema.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::db::LOGIN_TABLE;
use crate::error::codes;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginStatus {
    pub username: String,
    pub requires_login: bool,
    pub has_password: bool,
}

pub fn ensure_login_table(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {LOGIN_TABLE} (
            username TEXT PRIMARY KEY,
            password_hash TEXT NOT NULL,
            salt TEXT NOT NULL,
            requires_login INTEGER NOT NULL CHECK(requires_login IN (0, 1))
        );
        INSERT INTO {LOGIN_TABLE} (username, password_hash, salt, requires_login)
        SELECT '', '', '', 0 WHERE NOT EXISTS (SELECT 1 FROM {LOGIN_TABLE});"
    ))
    .map_err(|err| AppError::from(err).with_context("operation", "create_login_table"))
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(&[0]);
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

type LoginRow = (String, String, String, bool);

fn load(conn: &Connection) -> AppResult<Option<LoginRow>> {
    conn.query_row(
        &format!("SELECT username, password_hash, salt, requires_login FROM {LOGIN_TABLE} LIMIT 1"),
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )
    .optional()
    .map_err(|err| AppError::from(err).with_context("operation", "load_login"))
}

pub fn status(conn: &Connection) -> AppResult<LoginStatus> {
    let row = load(conn)?;
    Ok(match row {
        Some((username, hash, _, requires_login)) => LoginStatus {
            username,
            requires_login,
            has_password: !hash.is_empty(),
        },
        None => LoginStatus {
            username: String::new(),
            requires_login: false,
            has_password: false,
        },
    })
}

/// Replace the stored account. The password is kept only as a salted hash.
pub fn set_credentials(
    conn: &Connection,
    username: &str,
    password: &str,
    requires_login: bool,
) -> AppResult<()> {
    if requires_login && (username.trim().is_empty() || password.is_empty()) {
        return Err(AppError::new(
            codes::INVALID_CREDENTIALS,
            "A username and password are needed when login is required",
        ));
    }
    let salt = uuid::Uuid::new_v4().simple().to_string();
    let hash = if password.is_empty() {
        String::new()
    } else {
        hash_password(&salt, password)
    };
    let result = (|| -> rusqlite::Result<()> {
        conn.execute(&format!("DELETE FROM {LOGIN_TABLE}"), [])?;
        conn.execute(
            &format!(
                "INSERT INTO {LOGIN_TABLE} (username, password_hash, salt, requires_login)
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            params![username, hash, salt, requires_login],
        )?;
        Ok(())
    })();
    result.map_err(|err| AppError::from(err).with_context("operation", "set_credentials"))
}

/// True when login is not required, or when the pair matches the account.
pub fn verify(conn: &Connection, username: &str, password: &str) -> AppResult<bool> {
    let Some((stored_user, hash, salt, requires_login)) = load(conn)? else {
        return Ok(true);
    };
    if !requires_login {
        return Ok(true);
    }
    Ok(stored_user == username && !hash.is_empty() && hash_password(&salt, password) == hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn conn() -> Connection {
        let conn = open_in_memory().unwrap();
        ensure_login_table(&conn).unwrap();
        conn
    }

    #[test]
    fn default_account_does_not_require_login() {
        let conn = conn();
        ensure_login_table(&conn).unwrap();
        let status = status(&conn).unwrap();
        assert!(!status.requires_login);
        assert!(!status.has_password);
        assert!(verify(&conn, "", "").unwrap());
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM login", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn stored_password_is_salted_and_checked() {
        let conn = conn();
        set_credentials(&conn, "clerk", "hunter2", true).unwrap();
        assert!(verify(&conn, "clerk", "hunter2").unwrap());
        assert!(!verify(&conn, "clerk", "hunter3").unwrap());
        assert!(!verify(&conn, "boss", "hunter2").unwrap());
        let stored: String = conn
            .query_row("SELECT password_hash FROM login", [], |r| r.get(0))
            .unwrap();
        assert_ne!(stored, "hunter2");
        assert_eq!(stored.len(), 64);
    }

    #[test]
    fn requiring_login_needs_both_parts() {
        let conn = conn();
        let err = set_credentials(&conn, "clerk", "", true).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_CREDENTIALS);
        set_credentials(&conn, "clerk", "pw", false).unwrap();
        assert!(verify(&conn, "anyone", "anything").unwrap());
    }
}
