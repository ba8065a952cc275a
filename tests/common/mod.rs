//! Common test helpers and utilities shared across test suite.

#![allow(dead_code)]

use naaccr::{Dictionary, FormatRegistry, ItemDefinition, ItemLevel, NaaccrData, Patient};
use std::fs::File;

/// Routes library logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// URI of the test base dictionary.
pub const BASE_URI: &str = "http://naaccr.org/naaccrxml/naaccr-dictionary-180.xml";

/// Line length of NAACCR 18 incidence records.
pub const INCIDENCE_LINE_LENGTH: usize = 4048;

/// Loads the reduced NAACCR 18 base dictionary from the test data directory.
pub fn base_dictionary() -> Dictionary {
    let file = File::open("tests/data/naaccr-dictionary-180.xml").expect("Could not open dictionary");
    Dictionary::from_reader(file).expect("Invalid test dictionary")
}

/// Creates a registry with the test base dictionary registered.
pub fn registry() -> FormatRegistry {
    FormatRegistry::standard()
        .with_base_dictionary(base_dictionary())
        .expect("Could not register base dictionary")
}

/// Creates a user dictionary with tumor-level items numbered from `first_number`.
pub fn user_dictionary(uri: &str, ids: &[&str], first_number: u32) -> Dictionary {
    let mut builder = Dictionary::builder(uri);
    for (offset, id) in (0u32..).zip(ids) {
        builder = builder.item(ItemDefinition::new(*id, first_number + offset, ItemLevel::Tumor, 10));
    }
    builder.build().expect("Invalid user dictionary")
}

/// Builds a NAACCR 18 incidence line with the given (1-based column, value) pairs.
pub fn flat_line(fields: &[(usize, &str)]) -> String {
    let mut chars = vec![' '; INCIDENCE_LINE_LENGTH];
    chars[0] = 'I';
    for (i, c) in "180".chars().enumerate() {
        chars[16 + i] = c;
    }
    for (start, value) in fields {
        for (i, c) in value.chars().enumerate() {
            chars[start - 1 + i] = c;
        }
    }
    chars.into_iter().collect()
}

/// Builds a line for one tumor of a patient, using the test dictionary columns.
pub fn tumor_line(patient_id: &str, sex: &str, site: &str, sequence: &str) -> String {
    flat_line(&[
        (20, "0000001234"),
        (42, patient_id),
        (50, sex),
        (52, site),
        (56, sequence),
    ])
}

/// Wraps patient elements in a `NaaccrData` root using the test base dictionary.
pub fn xml_document(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<NaaccrData baseDictionaryUri="{BASE_URI}" recordType="I" specificationVersion="1.3" xmlns="http://naaccr.org/naaccrxml">
{body}
</NaaccrData>
"#
    )
}

/// Returns the sorted (id, value) pairs of an entity's items.
pub fn item_pairs(items: &[naaccr::Item]) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = items
        .iter()
        .map(|item| (item.id.clone(), item.value.clone()))
        .collect();
    pairs.sort();
    pairs
}

/// Returns the item pairs of a patient and of each of its tumors.
pub fn patient_pairs(patient: &Patient) -> (Vec<(String, String)>, Vec<Vec<(String, String)>>) {
    (
        item_pairs(&patient.items),
        patient.tumors.iter().map(|t| item_pairs(&t.items)).collect(),
    )
}

/// Creates a root for writing with the test base dictionary.
pub fn root() -> NaaccrData {
    let mut root = NaaccrData::new(BASE_URI, "I");
    root.items.push(naaccr::Item::new("registryId", "0000001234"));
    root
}
