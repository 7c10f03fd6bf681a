use std::collections::BTreeSet;

use proptest::prelude::*;
use shelfkeep_lib::{FieldDefinition, InputClass, InventoryStore, ValueType};

#[path = "util.rs"]
mod util;

#[derive(Debug, Clone)]
enum Op {
    Add(usize, ValueType, InputClass, bool),
    Remove(usize),
    Insert(u8),
}

const NAMES: &[&str] = &["warranty_months", "colour", "weight_kg", "photos", "name", "sku"];

fn op() -> impl Strategy<Value = Op> {
    let value_type = prop_oneof![
        Just(ValueType::String),
        Just(ValueType::Int),
        Just(ValueType::Float)
    ];
    let input = prop_oneof![
        Just(InputClass::Small),
        Just(InputClass::Large),
        Just(InputClass::Image)
    ];
    prop_oneof![
        (0..NAMES.len(), value_type, input, any::<bool>())
            .prop_map(|(n, t, i, r)| Op::Add(n, t, i, r)),
        (0..NAMES.len()).prop_map(Op::Remove),
        any::<u8>().prop_map(Op::Insert),
    ]
}

fn column_fields(store: &InventoryStore) -> BTreeSet<String> {
    store
        .fields()
        .unwrap()
        .into_iter()
        .filter(|d| d.has_column())
        .map(|d| d.name)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn columns_always_match_fields(ops in proptest::collection::vec(op(), 1..24)) {
        let (mut store, _) = util::memory_store();
        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Add(n, t, i, r) => {
                    let def = FieldDefinition::new(NAMES[n], t).input(i).required(r);
                    let _ = store.add_field(&def);
                }
                Op::Remove(n) => {
                    let _ = store.remove_field(NAMES[n]);
                }
                Op::Insert(q) => {
                    // May fail on a required custom field; that is fine here.
                    let _ = store.add_item(&util::item(&format!("P-{step}"), q as i64), &[]);
                }
            }
            let physical: BTreeSet<String> = store.physical_columns().unwrap().into_iter().collect();
            prop_assert_eq!(&physical, &column_fields(&store));
            prop_assert!(store.schema_drift().unwrap().is_congruent());
        }
    }
}

#[test]
fn image_fields_never_get_a_column() -> anyhow::Result<()> {
    let (mut store, _) = util::memory_store();
    store.add_field(&FieldDefinition::new("photos", ValueType::String).input(InputClass::Image))?;
    assert!(!store.physical_columns()?.contains(&"photos".to_string()));
    store.remove_field("photos")?;
    assert!(store.field("photos")?.is_none());
    Ok(())
}
