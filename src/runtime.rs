//! Runtime dictionaries: the merged schema used by readers and writers.
//!
//! A [`RuntimeDictionary`] is the conflict-free merge of one base dictionary and
//! its user dictionaries, filtered to one record type, with every regex compiled
//! once. It is immutable and meant to be shared (it is `Send + Sync`).

use crate::dictionary::{DataType, Dictionary, ItemDefinition, ItemKind, ItemLevel, Padding, Trim};
use crate::error::{NaaccrError, Result};
use crate::format::RecordType;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// First NAACCR version whose runtime items are ordered by id instead of start column.
pub const SORT_BY_ID_FROM_VERSION: u32 = 210;

/// An item definition resolved for one record type.
#[derive(Debug, Clone)]
pub struct RuntimeItemDefinition {
    /// Item id.
    pub id: String,
    /// Item number.
    pub number: u32,
    /// Display name.
    pub name: Option<String>,
    /// Level the item belongs to.
    pub level: ItemLevel,
    /// 1-based start column in flat lines.
    pub start_column: Option<usize>,
    /// Length in characters.
    pub length: usize,
    /// Value data type.
    pub data_type: DataType,
    /// Compiled validation regex, anchored on the whole value.
    pub regex: Option<Regex>,
    /// Padding rule.
    pub padding: Option<Padding>,
    /// Trimming rule for flat values.
    pub trim: Trim,
    /// Whether values may exceed `length`.
    pub allow_unlimited_text: bool,
    /// Plain or grouped.
    pub kind: ItemKind,
    /// URI of the dictionary the item comes from.
    pub dictionary_uri: String,
}

impl RuntimeItemDefinition {
    fn compile(definition: &ItemDefinition, dictionary_uri: &str) -> Result<Self> {
        let regex = definition
            .regex
            .as_deref()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                    NaaccrError::InvalidDictionary(format!(
                        "invalid regex for item '{}' in '{dictionary_uri}': {e}",
                        definition.id
                    ))
                })
            })
            .transpose()?;

        Ok(RuntimeItemDefinition {
            id: definition.id.clone(),
            number: definition.number,
            name: definition.name.clone(),
            level: definition.level,
            start_column: definition.start_column,
            length: definition.length,
            data_type: definition.data_type,
            regex,
            padding: definition.padding,
            trim: definition.trim,
            allow_unlimited_text: definition.allow_unlimited_text,
            kind: definition.kind.clone(),
            dictionary_uri: dictionary_uri.to_string(),
        })
    }

    /// 0-based column range covered in a flat line, if the item has a start column.
    #[must_use]
    pub fn columns(&self) -> Option<std::ops::Range<usize>> {
        self.start_column
            .filter(|&start| start > 0)
            .map(|start| start - 1..start - 1 + self.length)
    }

    /// Whether this is a grouped item.
    #[must_use]
    pub fn is_grouped(&self) -> bool {
        matches!(self.kind, ItemKind::Grouped { .. })
    }
}

/// Identity of a runtime dictionary: record type and ordered dictionary URIs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeDictionaryId {
    /// Record type code.
    pub record_type: RecordType,
    /// Base dictionary URI.
    pub base_uri: String,
    /// User dictionary URIs, in merge order.
    pub user_uris: Vec<String>,
}

/// Merged, validated, per-record-type schema.
#[derive(Debug)]
pub struct RuntimeDictionary {
    id: RuntimeDictionaryId,
    naaccr_version: String,
    items: IndexMap<String, RuntimeItemDefinition>,
    by_number: HashMap<u32, String>,
}

impl RuntimeDictionary {
    /// Merge a base dictionary and user dictionaries for one record type.
    ///
    /// No default user dictionary is substituted here; see
    /// [`FormatRegistry::resolve`](crate::format::FormatRegistry::resolve).
    ///
    /// # Errors
    ///
    /// Returns an error if the record type is empty or unknown, the base
    /// dictionary has no version, any two dictionaries define the same item id or
    /// number, or a regex does not compile.
    pub fn build(record_type: &str, base: &Dictionary, users: &[&Dictionary]) -> Result<Self> {
        let record_type: RecordType = record_type.parse()?;
        base.validate_as_base()?;
        for user in users {
            user.validate_as_user()?;
        }
        validate_dictionaries(base, users)?;

        let naaccr_version = base.naaccr_version().unwrap_or_default().to_string();

        let mut merged: Vec<RuntimeItemDefinition> = Vec::new();
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for dictionary in std::iter::once(base).chain(users.iter().copied()) {
            for definition in dictionary.all_items() {
                if !definition.applies_to(record_type.code()) {
                    continue;
                }
                if seen.contains_key(definition.id.as_str()) {
                    continue;
                }
                seen.insert(definition.id.as_str(), dictionary.uri());
                merged.push(RuntimeItemDefinition::compile(definition, dictionary.uri())?);
            }
        }

        let sort_by_id = naaccr_version
            .parse::<u32>()
            .map_or(true, |version| version >= SORT_BY_ID_FROM_VERSION);
        if sort_by_id {
            merged.sort_by(|a, b| a.id.cmp(&b.id));
        } else {
            merged.sort_by_key(|item| (item.start_column.is_none(), item.start_column));
        }

        let mut items = IndexMap::with_capacity(merged.len());
        let mut by_number = HashMap::with_capacity(merged.len());
        for item in merged {
            by_number.insert(item.number, item.id.clone());
            items.insert(item.id.clone(), item);
        }

        Ok(RuntimeDictionary {
            id: RuntimeDictionaryId {
                record_type,
                base_uri: base.uri().to_string(),
                user_uris: users.iter().map(|u| u.uri().to_string()).collect(),
            },
            naaccr_version,
            items,
            by_number,
        })
    }

    /// Identity of the dictionary.
    #[must_use]
    pub fn id(&self) -> &RuntimeDictionaryId {
        &self.id
    }

    /// Record type the dictionary was resolved for.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        self.id.record_type
    }

    /// NAACCR version of the base dictionary.
    #[must_use]
    pub fn naaccr_version(&self) -> &str {
        &self.naaccr_version
    }

    /// Base dictionary URI.
    #[must_use]
    pub fn base_dictionary_uri(&self) -> &str {
        &self.id.base_uri
    }

    /// User dictionary URIs, in merge order.
    #[must_use]
    pub fn user_dictionary_uris(&self) -> &[String] {
        &self.id.user_uris
    }

    /// Items, in output order.
    pub fn items(&self) -> impl Iterator<Item = &RuntimeItemDefinition> {
        self.items.values()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the dictionary has no item.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up an item by id.
    #[must_use]
    pub fn item(&self, id: &str) -> Option<&RuntimeItemDefinition> {
        self.items.get(id)
    }

    /// Look up an item by number.
    #[must_use]
    pub fn item_by_number(&self, number: u32) -> Option<&RuntimeItemDefinition> {
        self.by_number.get(&number).and_then(|id| self.items.get(id))
    }

    /// Items of one level, in output order.
    pub fn items_for_level(&self, level: ItemLevel) -> impl Iterator<Item = &RuntimeItemDefinition> {
        self.items.values().filter(move |item| item.level == level)
    }
}

/// Check that no two dictionaries define the same item id or number.
///
/// # Errors
///
/// Returns [`NaaccrError::MergeConflict`] describing the first collision found.
pub fn validate_dictionaries(base: &Dictionary, users: &[&Dictionary]) -> Result<()> {
    let mut ids: HashMap<&str, &str> = HashMap::new();
    let mut numbers: HashMap<u32, (&str, &str)> = HashMap::new();

    for dictionary in std::iter::once(base).chain(users.iter().copied()) {
        for item in dictionary.all_items() {
            if let Some(owner) = ids.insert(item.id.as_str(), dictionary.uri()) {
                return Err(NaaccrError::MergeConflict(format!(
                    "item id '{}' is defined in both '{owner}' and '{}'",
                    item.id,
                    dictionary.uri()
                )));
            }
            if let Some((other_id, owner)) = numbers.insert(item.number, (item.id.as_str(), dictionary.uri())) {
                return Err(NaaccrError::MergeConflict(format!(
                    "item number {} is used by '{other_id}' in '{owner}' and by '{}' in '{}'",
                    item.number,
                    item.id,
                    dictionary.uri()
                )));
            }
        }
    }
    Ok(())
}

/// Cache of runtime dictionaries keyed by their identity.
#[derive(Debug, Default)]
pub struct RuntimeDictionaryCache {
    entries: Mutex<HashMap<RuntimeDictionaryId, Arc<RuntimeDictionary>>>,
}

impl RuntimeDictionaryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached dictionary for this identity, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if [`RuntimeDictionary::build`] fails.
    pub fn get_or_build(
        &self,
        record_type: &str,
        base: &Dictionary,
        users: &[&Dictionary],
    ) -> Result<Arc<RuntimeDictionary>> {
        let key = RuntimeDictionaryId {
            record_type: record_type.parse()?,
            base_uri: base.uri().to_string(),
            user_uris: users.iter().map(|u| u.uri().to_string()).collect(),
        };

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = entries.get(&key) {
            debug!(base = %key.base_uri, record_type = %key.record_type, "runtime dictionary cache hit");
            return Ok(Arc::clone(existing));
        }

        let dictionary = Arc::new(RuntimeDictionary::build(record_type, base, users)?);
        debug!(
            base = %key.base_uri,
            users = ?key.user_uris,
            record_type = %key.record_type,
            items = dictionary.len(),
            "resolved runtime dictionary"
        );
        entries.insert(key, Arc::clone(&dictionary));
        Ok(dictionary)
    }

    /// Number of cached dictionaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
