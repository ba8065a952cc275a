//! Streaming construction of entities from raw item values.
//!
//! Both codecs hand every raw item they read to an [`EntityBuilder`], which
//! resolves it against the runtime dictionary, applies the options and the read
//! rules, and appends the result to the entity being built. Ordering constraints
//! that depend on what was already read under one tag live in an [`ItemScope`]
//! owned by the element being read.

use crate::dictionary::ItemLevel;
use crate::entity::{Entity, Item, ValidationError, ValidationErrorCode};
use crate::error::{NaaccrError, Result};
use crate::options::NaaccrOptions;
use crate::rules::{self, UnknownItemOutcome};
use crate::runtime::{RuntimeDictionary, RuntimeItemDefinition};
use std::collections::HashSet;

/// Per-element scratch state used to enforce item ordering.
#[derive(Debug, Default)]
pub struct ItemScope {
    seen: HashSet<String>,
    extension_seen: bool,
    child_seen: bool,
}

impl ItemScope {
    /// Fresh scope for a new element.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an extension was read under this element.
    pub fn mark_extension(&mut self) {
        self.extension_seen = true;
    }

    /// Record that a child entity (patient or tumor) was read under this element.
    pub fn mark_child(&mut self) {
        self.child_seen = true;
    }
}

/// One item as found in the source, before dictionary resolution.
#[derive(Debug, Clone, Copy)]
pub struct RawItem<'v> {
    /// Id as written in the source.
    pub id: &'v str,
    /// Number as written in the source, if any.
    pub number: Option<u32>,
    /// Untrimmed value.
    pub value: &'v str,
    /// Line of the item.
    pub line: Option<usize>,
}

/// Resolves raw items and appends them to entities.
#[derive(Debug, Clone, Copy)]
pub struct EntityBuilder<'a> {
    dictionary: &'a RuntimeDictionary,
    options: &'a NaaccrOptions,
}

impl<'a> EntityBuilder<'a> {
    /// Builder over a runtime dictionary and options.
    #[must_use]
    pub fn new(dictionary: &'a RuntimeDictionary, options: &'a NaaccrOptions) -> Self {
        EntityBuilder {
            dictionary,
            options,
        }
    }

    /// Add an item read from a tagged source under an element of `level`.
    ///
    /// # Errors
    ///
    /// Returns a syntax error if the item id was already read under the same
    /// element, if the item follows an extension or a child entity, or if the
    /// dictionary defines the item for another level.
    pub fn add_item<E: Entity>(
        &self,
        entity: &mut E,
        level: ItemLevel,
        scope: &mut ItemScope,
        raw: RawItem<'_>,
    ) -> Result<()> {
        let id = self.options.translate_item_id(raw.id);
        if !scope.seen.insert(id.to_string()) {
            return Err(NaaccrError::syntax(
                format!("item '{id}' appears more than once under the same {level}"),
                raw.line,
            ));
        }
        if scope.extension_seen {
            return Err(NaaccrError::syntax(
                format!("item '{}' must appear before any extension", raw.id),
                raw.line,
            ));
        }
        if scope.child_seen {
            return Err(NaaccrError::syntax(
                format!(
                    "item '{}' must appear before the {} elements",
                    raw.id,
                    child_level(level)
                ),
                raw.line,
            ));
        }

        if !self.options.include_item(id) {
            return Ok(());
        }

        let Some(definition) = self.dictionary.item(id) else {
            match rules::handle_unknown_item(id, raw.value, raw.line, self.options) {
                UnknownItemOutcome::Skip => {},
                UnknownItemOutcome::Reject(error) => entity.add_validation_error(error),
                UnknownItemOutcome::Keep => {
                    if !raw.value.is_empty() {
                        entity.add_item(Item {
                            id: id.to_string(),
                            number: None,
                            value: raw.value.to_string(),
                            line_number: raw.line,
                        });
                    }
                },
            }
            return Ok(());
        };

        if definition.level != level {
            return Err(NaaccrError::syntax(
                format!(
                    "item '{id}' belongs to the {} level but was found under {level}",
                    definition.level
                ),
                raw.line,
            ));
        }

        if self.options.validate_read_values {
            if let Some(number) = raw.number.filter(|&n| n != definition.number) {
                entity.add_validation_error(
                    ValidationError::new(
                        ValidationErrorCode::IdNumberMismatch,
                        format!(
                            "item '{id}' has number {} but was written with number {number}",
                            definition.number
                        ),
                    )
                    .with_item(id, Some(number))
                    .with_line(raw.line),
                );
            }
        }

        self.bind_value(entity, definition, raw.value, raw.line);
        Ok(())
    }

    /// Validate a resolved value and append it as an item. Empty values are dropped.
    pub fn bind_value<E: Entity>(
        &self,
        entity: &mut E,
        definition: &RuntimeItemDefinition,
        value: &str,
        line: Option<usize>,
    ) {
        if value.is_empty() {
            return;
        }
        if self.options.validate_read_values {
            if let Some(error) = rules::validate_value(value, definition, line) {
                entity.add_validation_error(error);
            }
        }
        entity.add_item(Item {
            id: definition.id.clone(),
            number: Some(definition.number),
            value: value.to_string(),
            line_number: line,
        });
    }
}

fn child_level(level: ItemLevel) -> ItemLevel {
    match level {
        ItemLevel::Root => ItemLevel::Patient,
        ItemLevel::Patient | ItemLevel::Tumor => ItemLevel::Tumor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{DataType, Dictionary, ItemDefinition};
    use crate::entity::{Patient, Tumor};
    use crate::options::UnknownItemHandling;

    fn dictionary() -> RuntimeDictionary {
        let base = Dictionary::builder("base")
            .naaccr_version("180")
            .item(ItemDefinition::new("patientIdNumber", 20, ItemLevel::Patient, 8).with_start_column(42))
            .item(
                ItemDefinition::new("sex", 220, ItemLevel::Patient, 1)
                    .with_start_column(30)
                    .with_data_type(DataType::Digits),
            )
            .item(ItemDefinition::new("primarySite", 400, ItemLevel::Tumor, 4).with_start_column(50))
            .build()
            .unwrap();
        RuntimeDictionary::build("I", &base, &[]).unwrap()
    }

    fn raw<'v>(id: &'v str, value: &'v str) -> RawItem<'v> {
        RawItem {
            id,
            number: None,
            value,
            line: Some(1),
        }
    }

    #[test]
    fn test_binds_known_item() {
        let dictionary = dictionary();
        let options = NaaccrOptions::default();
        let builder = EntityBuilder::new(&dictionary, &options);
        let mut patient = Patient::new();
        let mut scope = ItemScope::new();
        builder
            .add_item(&mut patient, ItemLevel::Patient, &mut scope, raw("sex", "1"))
            .unwrap();
        let item = patient.item("sex").unwrap();
        assert_eq!(item.number, Some(220));
        assert!(patient.validation_errors.is_empty());
    }

    #[test]
    fn test_duplicate_item_is_fatal() {
        let dictionary = dictionary();
        let options = NaaccrOptions::default();
        let builder = EntityBuilder::new(&dictionary, &options);
        let mut patient = Patient::new();
        let mut scope = ItemScope::new();
        builder
            .add_item(&mut patient, ItemLevel::Patient, &mut scope, raw("sex", "1"))
            .unwrap();
        let err = builder
            .add_item(&mut patient, ItemLevel::Patient, &mut scope, raw("sex", "2"))
            .unwrap_err();
        assert!(matches!(err, NaaccrError::Syntax { .. }));
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn test_duplicate_detected_after_translation() {
        let dictionary = dictionary();
        let options = NaaccrOptions::default().with_item_id_translation("gender", "sex");
        let builder = EntityBuilder::new(&dictionary, &options);
        let mut patient = Patient::new();
        let mut scope = ItemScope::new();
        builder
            .add_item(&mut patient, ItemLevel::Patient, &mut scope, raw("gender", "2"))
            .unwrap();
        let err = builder
            .add_item(&mut patient, ItemLevel::Patient, &mut scope, raw("sex", "1"))
            .unwrap_err();
        assert!(matches!(err, NaaccrError::Syntax { .. }));
        assert_eq!(patient.items.len(), 1);
    }

    #[test]
    fn test_wrong_level_is_fatal() {
        let dictionary = dictionary();
        let options = NaaccrOptions::default();
        let builder = EntityBuilder::new(&dictionary, &options);
        let mut tumor = Tumor::new();
        let err = builder
            .add_item(&mut tumor, ItemLevel::Tumor, &mut ItemScope::new(), raw("sex", "1"))
            .unwrap_err();
        assert!(err.to_string().contains("Patient"));
    }

    #[test]
    fn test_item_after_child_is_fatal() {
        let dictionary = dictionary();
        let options = NaaccrOptions::default();
        let builder = EntityBuilder::new(&dictionary, &options);
        let mut patient = Patient::new();
        let mut scope = ItemScope::new();
        scope.mark_child();
        assert!(builder
            .add_item(&mut patient, ItemLevel::Patient, &mut scope, raw("sex", "1"))
            .is_err());
    }

    #[test]
    fn test_unknown_item_policies() {
        let dictionary = dictionary();

        let options = NaaccrOptions::default();
        let builder = EntityBuilder::new(&dictionary, &options);
        let mut tumor = Tumor::new();
        builder
            .add_item(&mut tumor, ItemLevel::Tumor, &mut ItemScope::new(), raw("mystery", "X"))
            .unwrap();
        assert!(tumor.items.is_empty());
        assert_eq!(tumor.validation_errors[0].code, ValidationErrorCode::UnknownItem);

        let options = NaaccrOptions::default().with_unknown_item_handling(UnknownItemHandling::Process);
        let builder = EntityBuilder::new(&dictionary, &options);
        let mut tumor = Tumor::new();
        builder
            .add_item(&mut tumor, ItemLevel::Tumor, &mut ItemScope::new(), raw("mystery", "X"))
            .unwrap();
        assert_eq!(tumor.item("mystery").unwrap().number, None);
        assert!(tumor.validation_errors.is_empty());
    }

    #[test]
    fn test_number_mismatch_and_bad_value() {
        let dictionary = dictionary();
        let options = NaaccrOptions::default();
        let builder = EntityBuilder::new(&dictionary, &options);
        let mut patient = Patient::new();
        let item = RawItem {
            id: "sex",
            number: Some(221),
            value: "X",
            line: None,
        };
        builder
            .add_item(&mut patient, ItemLevel::Patient, &mut ItemScope::new(), item)
            .unwrap();
        let codes: Vec<_> = patient.validation_errors.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![ValidationErrorCode::IdNumberMismatch, ValidationErrorCode::BadDataType]
        );
        assert_eq!(patient.item_value("sex"), Some("X"));
    }

    #[test]
    fn test_translation_and_exclusion() {
        let dictionary = dictionary();
        let options = NaaccrOptions::default()
            .with_item_id_translation("oldSex", "sex")
            .with_excluded_item("primarySite");
        let builder = EntityBuilder::new(&dictionary, &options);
        let mut patient = Patient::new();
        builder
            .add_item(&mut patient, ItemLevel::Patient, &mut ItemScope::new(), raw("oldSex", "2"))
            .unwrap();
        assert_eq!(patient.item_value("sex"), Some("2"));

        let mut tumor = Tumor::new();
        builder
            .add_item(&mut tumor, ItemLevel::Tumor, &mut ItemScope::new(), raw("primarySite", "C509"))
            .unwrap();
        assert!(tumor.items.is_empty());
    }
}
