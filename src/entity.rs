//! NAACCR entity tree: root data, patients, tumors and items.
//!
//! - [`NaaccrData`]: root of a document, with root-level items
//! - [`Patient`]: one patient, its items and its tumors
//! - [`Tumor`]: one tumor and its items
//! - [`Item`]: one field value
//!
//! Each level also collects the non-fatal [`ValidationError`]s found while it was
//! read. Readers hand out one fully-built [`Patient`] at a time.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One item value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Item id (`naaccrId`).
    pub id: String,
    /// Item number, when known from the dictionary.
    pub number: Option<u32>,
    /// Value.
    pub value: String,
    /// Line the item was read from.
    pub line_number: Option<usize>,
}

impl Item {
    /// Create an item with no number and no line.
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Item {
            id: id.into(),
            number: None,
            value: value.into(),
            line_number: None,
        }
    }

    /// Set the item number.
    #[must_use]
    pub fn with_number(mut self, number: u32) -> Self {
        self.number = Some(number);
        self
    }
}

/// Kind of non-fatal problem found in the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationErrorCode {
    /// Item id not defined in the runtime dictionary.
    UnknownItem,
    /// Value longer than the item length (write path).
    ValueTooLong,
    /// Value length differs from the required full length.
    BadLength,
    /// Value does not match the item's data type.
    BadDataType,
    /// Value does not match the item's regex.
    BadRegex,
    /// `naaccrNum` attribute disagrees with the dictionary.
    IdNumberMismatch,
    /// Value contains control characters that are not allowed.
    IllegalControlCharacters,
    /// Grouped flat lines disagree on a patient-level value.
    PatientValueMismatch,
    /// Grouped flat lines disagree on a root-level value.
    RootValueMismatch,
    /// Flat line does not have the expected length.
    BadLineLength,
}

impl ValidationErrorCode {
    /// Stable code string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationErrorCode::UnknownItem => "UNKNOWN_ITEM",
            ValidationErrorCode::ValueTooLong => "VAL_TOO_LONG",
            ValidationErrorCode::BadLength => "BAD_LENGTH",
            ValidationErrorCode::BadDataType => "BAD_DATA_TYPE",
            ValidationErrorCode::BadRegex => "BAD_REGEX",
            ValidationErrorCode::IdNumberMismatch => "ID_VS_NUM",
            ValidationErrorCode::IllegalControlCharacters => "BAD_CHARACTERS",
            ValidationErrorCode::PatientValueMismatch => "PAT_VALUE_MISMATCH",
            ValidationErrorCode::RootValueMismatch => "ROOT_VALUE_MISMATCH",
            ValidationErrorCode::BadLineLength => "BAD_LINE_LENGTH",
        }
    }
}

impl fmt::Display for ValidationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal problem attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Kind of problem.
    pub code: ValidationErrorCode,
    /// Human readable description.
    pub message: String,
    /// Item id concerned, if any.
    pub naaccr_id: Option<String>,
    /// Item number concerned, if any.
    pub naaccr_num: Option<u32>,
    /// Offending value, if any.
    pub value: Option<String>,
    /// Line of the problem, when the source tracks lines.
    pub line_number: Option<usize>,
}

impl ValidationError {
    /// Create an error with a code and a message.
    pub fn new(code: ValidationErrorCode, message: impl Into<String>) -> Self {
        ValidationError {
            code,
            message: message.into(),
            naaccr_id: None,
            naaccr_num: None,
            value: None,
            line_number: None,
        }
    }

    /// Attach the item id and number.
    #[must_use]
    pub fn with_item(mut self, id: impl Into<String>, number: Option<u32>) -> Self {
        self.naaccr_id = Some(id.into());
        self.naaccr_num = number;
        self
    }

    /// Attach the offending value.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Attach a line number.
    #[must_use]
    pub fn with_line(mut self, line: Option<usize>) -> Self {
        self.line_number = line;
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(line) = self.line_number {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

/// Common behavior of entities that own items and validation errors.
pub trait Entity {
    /// Items, in insertion order.
    fn items(&self) -> &[Item];

    /// Mutable access to the items.
    fn items_mut(&mut self) -> &mut Vec<Item>;

    /// Validation errors of this entity (not of its children).
    fn validation_errors(&self) -> &[ValidationError];

    /// Mutable access to the validation errors.
    fn validation_errors_mut(&mut self) -> &mut Vec<ValidationError>;

    /// Look up an item by id.
    fn item(&self, id: &str) -> Option<&Item> {
        self.items().iter().find(|item| item.id == id)
    }

    /// Value of an item, if present.
    fn item_value(&self, id: &str) -> Option<&str> {
        self.item(id).map(|item| item.value.as_str())
    }

    /// Append an item.
    fn add_item(&mut self, item: Item) {
        self.items_mut().push(item);
    }

    /// Replace the value of an item, appending it if absent.
    fn set_item_value(&mut self, id: &str, value: impl Into<String>) {
        let value = value.into();
        match self.items_mut().iter_mut().find(|item| item.id == id) {
            Some(item) => item.value = value,
            None => self.items_mut().push(Item::new(id, value)),
        }
    }

    /// Remove an item, returning it.
    fn remove_item(&mut self, id: &str) -> Option<Item> {
        let items = self.items_mut();
        let idx = items.iter().position(|item| item.id == id)?;
        Some(items.remove(idx))
    }

    /// Append a validation error.
    fn add_validation_error(&mut self, error: ValidationError) {
        self.validation_errors_mut().push(error);
    }
}

macro_rules! impl_entity {
    ($ty:ty) => {
        impl Entity for $ty {
            fn items(&self) -> &[Item] {
                &self.items
            }

            fn items_mut(&mut self) -> &mut Vec<Item> {
                &mut self.items
            }

            fn validation_errors(&self) -> &[ValidationError] {
                &self.validation_errors
            }

            fn validation_errors_mut(&mut self) -> &mut Vec<ValidationError> {
                &mut self.validation_errors
            }
        }
    };
}

/// One tumor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tumor {
    /// Tumor-level items.
    pub items: Vec<Item>,
    /// Validation errors found on this tumor.
    pub validation_errors: Vec<ValidationError>,
    /// Verbatim extension XML.
    pub extensions: Vec<String>,
    /// First line of the tumor.
    pub start_line_number: Option<usize>,
    /// Last line of the tumor.
    pub end_line_number: Option<usize>,
}

impl Tumor {
    /// Create an empty tumor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl_entity!(Tumor);

/// One patient and its tumors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    /// Patient-level items.
    pub items: Vec<Item>,
    /// Tumors, in file order.
    pub tumors: Vec<Tumor>,
    /// Validation errors found on the patient itself.
    pub validation_errors: Vec<ValidationError>,
    /// Verbatim extension XML.
    pub extensions: Vec<String>,
    /// First line of the patient.
    pub start_line_number: Option<usize>,
    /// Last line of the patient.
    pub end_line_number: Option<usize>,
}

impl Patient {
    /// Create an empty patient.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tumor.
    pub fn add_tumor(&mut self, tumor: Tumor) {
        self.tumors.push(tumor);
    }

    /// Validation errors of the patient followed by those of its tumors.
    pub fn all_validation_errors(&self) -> impl Iterator<Item = &ValidationError> {
        self.validation_errors
            .iter()
            .chain(self.tumors.iter().flat_map(|t| t.validation_errors.iter()))
    }
}

impl_entity!(Patient);

/// Root of a NAACCR document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaaccrData {
    /// URI of the base dictionary.
    pub base_dictionary_uri: String,
    /// URIs of the user dictionaries.
    pub user_dictionary_uris: Vec<String>,
    /// Record type code (`A`, `M`, `C`, `I`).
    pub record_type: String,
    /// Generation time of the document.
    pub time_generated: Option<DateTime<FixedOffset>>,
    /// NAACCR XML specification version.
    pub specification_version: Option<String>,
    /// Root-level items.
    pub items: Vec<Item>,
    /// Validation errors found on the root.
    pub validation_errors: Vec<ValidationError>,
    /// Verbatim extension XML.
    pub extensions: Vec<String>,
    /// Patients; only filled by whole-document helpers.
    pub patients: Vec<Patient>,
}

impl NaaccrData {
    /// Create root data for a base dictionary and record type.
    pub fn new(base_dictionary_uri: impl Into<String>, record_type: impl Into<String>) -> Self {
        NaaccrData {
            base_dictionary_uri: base_dictionary_uri.into(),
            record_type: record_type.into(),
            ..NaaccrData::default()
        }
    }

    /// Copy of the root without its patients.
    #[must_use]
    pub fn header(&self) -> NaaccrData {
        NaaccrData {
            patients: Vec::new(),
            ..self.clone()
        }
    }
}

impl_entity!(NaaccrData);
