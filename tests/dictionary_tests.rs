//! Dictionary loading, merging and runtime dictionary resolution.

mod common;

use common::{base_dictionary, registry, user_dictionary, BASE_URI};
use naaccr::{ItemLevel, NaaccrData, NaaccrError, RecordType, RuntimeDictionary};
use std::sync::Arc;

#[test]
fn test_base_dictionary_loads_from_xml() {
    let dictionary = base_dictionary();
    assert_eq!(dictionary.uri(), BASE_URI);
    assert_eq!(dictionary.naaccr_version(), Some("180"));

    let sex = dictionary.item_by_id("sex").expect("sex is defined");
    assert_eq!(sex.number, 220);
    assert_eq!(sex.level, ItemLevel::Patient);
    assert_eq!(sex.start_column, Some(50));
    assert_eq!(dictionary.item_by_number(400).map(|i| i.id.as_str()), Some("primarySite"));
}

#[test]
fn test_merge_with_disjoint_user_dictionaries() {
    let base = base_dictionary();
    let first = user_dictionary("http://example.org/first.xml", &["firstVariable"], 10_000);
    let second = user_dictionary("http://example.org/second.xml", &["secondVariable"], 10_100);

    for record_type in RecordType::ALL {
        let runtime = RuntimeDictionary::build(record_type.code(), &base, &[&first, &second])
            .expect("disjoint dictionaries merge");
        assert!(runtime.item("firstVariable").is_some());
        assert!(runtime.item("secondVariable").is_some());
        assert_eq!(runtime.item_by_number(10_100).map(|i| i.id.as_str()), Some("secondVariable"));
        assert_eq!(runtime.record_type(), record_type);
    }
}

#[test]
fn test_merge_fails_on_shared_id() {
    let base = base_dictionary();
    let first = user_dictionary("http://example.org/first.xml", &["sharedVariable"], 10_000);
    let second = user_dictionary("http://example.org/second.xml", &["sharedVariable"], 10_100);

    for record_type in RecordType::ALL {
        let err = RuntimeDictionary::build(record_type.code(), &base, &[&first, &second]).unwrap_err();
        assert!(matches!(err, NaaccrError::MergeConflict(_)), "{err}");
    }
}

#[test]
fn test_merge_fails_on_shared_number() {
    let base = base_dictionary();
    let first = user_dictionary("http://example.org/first.xml", &["firstVariable"], 10_000);
    let second = user_dictionary("http://example.org/second.xml", &["secondVariable"], 10_000);

    for record_type in RecordType::ALL {
        let err = RuntimeDictionary::build(record_type.code(), &base, &[&first, &second]).unwrap_err();
        assert!(matches!(err, NaaccrError::MergeConflict(_)), "{err}");
    }
}

#[test]
fn test_merge_fails_when_user_reuses_base_item() {
    let base = base_dictionary();
    let user = user_dictionary("http://example.org/user.xml", &["primarySite"], 10_000);
    let err = RuntimeDictionary::build("I", &base, &[&user]).unwrap_err();
    assert!(matches!(err, NaaccrError::MergeConflict(_)));

    // 400 is primarySite's number in the base dictionary
    let user = user_dictionary("http://example.org/user.xml", &["myVariable"], 400);
    let err = RuntimeDictionary::build("I", &base, &[&user]).unwrap_err();
    assert!(matches!(err, NaaccrError::MergeConflict(_)));
}

#[test]
fn test_registry_caches_runtime_dictionaries() {
    let registry = registry();
    let base = base_dictionary();
    let user = user_dictionary("http://example.org/user.xml", &["myVariable"], 10_000);

    let first = registry.resolve("I", &base, std::slice::from_ref(&user)).unwrap();
    let second = registry.resolve("I", &base, std::slice::from_ref(&user)).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let other_type = registry.resolve("A", &base, std::slice::from_ref(&user)).unwrap();
    assert!(!Arc::ptr_eq(&first, &other_type));
}

#[test]
fn test_version_below_210_sorts_by_column() {
    let registry = registry();
    let runtime = registry.resolve_uri("I", BASE_URI, &[]).unwrap();
    let ids: Vec<&str> = runtime.items().map(|item| item.id.as_str()).collect();
    assert_eq!(ids.first(), Some(&"recordType"));
    assert_eq!(ids.last(), Some(&"textRemarks"));
}

#[test]
fn test_resolve_root_requires_listed_user_dictionaries() {
    let registry = registry();
    let mut root = NaaccrData::new(BASE_URI, "I");
    root.user_dictionary_uris = vec!["http://example.org/user.xml".to_string()];

    let err = registry.resolve_root(&root, &[]).unwrap_err();
    assert!(matches!(err, NaaccrError::Configuration(_)));

    let user = user_dictionary("http://example.org/user.xml", &["myVariable"], 10_000);
    let runtime = registry.resolve_root(&root, &[user]).unwrap();
    assert_eq!(runtime.user_dictionary_uris(), ["http://example.org/user.xml".to_string()]);
}

#[test]
fn test_unknown_base_dictionary_is_unsupported() {
    let registry = registry();
    let root = NaaccrData::new("http://example.org/unknown.xml", "I");
    let err = registry.resolve_root(&root, &[]).unwrap_err();
    assert!(matches!(err, NaaccrError::UnsupportedFormat(_)));
}
