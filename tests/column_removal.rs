use shelfkeep_lib::db::open_sqlite;
use shelfkeep_lib::error::codes;
use shelfkeep_lib::{FieldDefinition, FieldValue, ValueType};

#[path = "util.rs"]
mod util;

#[test]
fn removal_preserves_surviving_columns() -> anyhow::Result<()> {
    let (mut store, _) = util::memory_store();
    store.add_field(&FieldDefinition::new("colour", ValueType::String))?;
    store.add_field(&FieldDefinition::new("weight_kg", ValueType::Float))?;
    for (i, colour) in ["red", "green", "blue"].iter().enumerate() {
        let mut values = util::item(&format!("P{i}"), i as i64);
        values.insert("colour".into(), (*colour).into());
        values.insert("weight_kg".into(), FieldValue::Float(i as f64 + 0.5));
        store.add_item(&values, &[format!("img{i}").into_bytes()])?;
    }

    let before = store.snapshot()?;
    store.remove_field("colour")?;
    let after = store.snapshot()?;

    let expected: Vec<_> = before.iter().map(|r| r.without("colour")).collect();
    assert_eq!(after, expected);
    // Attachments survive the table rebuild.
    assert_eq!(store.images_for("P1")?, vec![b"img1".to_vec()]);
    assert!(store.health().is_ok());
    Ok(())
}

#[test]
fn failed_removal_changes_nothing() -> anyhow::Result<()> {
    let (mut store, _) = util::memory_store();
    store.add_field(&FieldDefinition::new("colour", ValueType::String))?;
    store.add_item(&util::item("A", 1), &[b"img".to_vec()])?;
    // A column with no field definition blocks the rebuild.
    store
        .connection()
        .execute_batch("ALTER TABLE products ADD COLUMN stray TEXT")?;

    let err = store.remove_field("colour").unwrap_err();
    assert_eq!(err.code(), codes::SYNC_CONFLICT);
    assert!(store.field("colour")?.is_some());
    assert!(store.physical_columns()?.contains(&"colour".to_string()));
    assert_eq!(store.images_for("A")?.len(), 1);
    Ok(())
}

#[test]
fn built_in_and_unknown_fields_are_refused() {
    let (mut store, _) = util::memory_store();
    assert_eq!(
        store.remove_field("price").unwrap_err().code(),
        codes::FIELD_BUILT_IN
    );
    assert_eq!(
        store.remove_field("nope").unwrap_err().code(),
        codes::FIELD_NOT_FOUND
    );
}

#[test]
fn warranty_scenario() -> anyhow::Result<()> {
    let (mut store, _) = util::memory_store();
    store.add_field(&FieldDefinition::new("warranty_months", ValueType::Int))?;

    store.add_item(&util::item("W-1", 1), &[])?;
    let mut with_warranty = util::item("Q-5", 5);
    with_warranty.insert("warranty_months".into(), FieldValue::Int(24));
    store.add_item(&with_warranty, &[])?;

    assert_eq!(store.remove_stock("Q-5", 3)?, 2);
    let err = store.remove_stock("Q-5", 3).unwrap_err();
    assert_eq!(err.code(), codes::INSUFFICIENT_QUANTITY);
    assert_eq!(store.find_items(&["Q-5".into()])?[0].quantity(), Some(2));

    let before = store.snapshot()?;
    store.remove_field("warranty_months")?;
    let after = store.snapshot()?;
    assert!(after.iter().all(|r| r.get("warranty_months").is_none()));
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(&old.without("warranty_months"), new);
    }
    Ok(())
}

#[test]
fn leftover_staging_table_is_cleared_on_open() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut store = util::disk_store(dir.path());
        store.add_item(&util::item("A", 1), &[])?;
    }
    {
        let conn = open_sqlite(&dir.path().join("inventory.sqlite3"))?;
        conn.execute_batch("CREATE TABLE products__rebuild (id TEXT)")?;
    }
    let mut store = util::disk_store(dir.path());
    assert_eq!(store.snapshot()?.len(), 1);
    let staged: i64 = store.connection().query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE name = 'products__rebuild'",
        [],
        |r| r.get(0),
    )?;
    assert_eq!(staged, 0);
    let log = std::fs::read_to_string(dir.path().join("inventory.log.txt"))?;
    assert!(log.contains("Recovery: discarded an unfinished field removal"));
    Ok(())
}
