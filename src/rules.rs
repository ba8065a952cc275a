//! Per-item value rules applied on read and write.
//!
//! Every function here is pure: it takes a value, the runtime definition of its
//! item and the options, and returns the transformed value together with the
//! validation error it produced, if any. Lengths are counted in characters.

use crate::dictionary::{Padding, Trim};
use crate::entity::{ValidationError, ValidationErrorCode};
use crate::options::{NaaccrOptions, UnknownItemHandling};
use crate::runtime::RuntimeItemDefinition;

/// Apply the item's zero padding rule.
///
/// Blank padding rules are never applied, and values already at or beyond the
/// item length are returned unchanged.
#[must_use]
pub fn apply_padding(value: &str, item: &RuntimeItemDefinition, options: &NaaccrOptions) -> String {
    if !options.apply_zero_padding_rules || value.is_empty() {
        return value.to_string();
    }
    let len = value.chars().count();
    if len >= item.length {
        return value.to_string();
    }
    let fill = "0".repeat(item.length - len);
    match item.padding {
        Some(Padding::LeftZero) => format!("{fill}{value}"),
        Some(Padding::RightZero) => format!("{value}{fill}"),
        Some(Padding::LeftBlank | Padding::RightBlank) | None => value.to_string(),
    }
}

/// Truncate a value to the item length unless the item allows unlimited text.
///
/// With `report_values_too_long`, a [`ValidationErrorCode::ValueTooLong`] error
/// describing the original length is returned along with the truncated value.
#[must_use]
pub fn truncate(
    value: &str,
    item: &RuntimeItemDefinition,
    options: &NaaccrOptions,
) -> (String, Option<ValidationError>) {
    let len = value.chars().count();
    if item.allow_unlimited_text || len <= item.length {
        return (value.to_string(), None);
    }
    let truncated: String = value.chars().take(item.length).collect();
    let error = options.report_values_too_long.then(|| {
        ValidationError::new(
            ValidationErrorCode::ValueTooLong,
            format!(
                "value of '{}' has {len} characters, only {} allowed; it was truncated",
                item.id, item.length
            ),
        )
        .with_item(item.id.as_str(), Some(item.number))
        .with_value(value)
    });
    (truncated, error)
}

/// Normalize line breaks and remove control characters.
///
/// CRLF and CR become LF. Other control characters, except LF and TAB, are
/// removed. Unless `ignore_control_characters` is set, their presence is also
/// reported.
#[must_use]
pub fn clean_control_characters(
    value: &str,
    item: &RuntimeItemDefinition,
    options: &NaaccrOptions,
) -> (String, Option<ValidationError>) {
    if !value.chars().any(char::is_control) {
        return (value.to_string(), None);
    }

    let normalized = value.replace("\r\n", "\n").replace('\r', "\n");
    let mut found_illegal = false;
    let cleaned: String = normalized
        .chars()
        .filter(|&c| {
            let illegal = c.is_control() && c != '\n' && c != '\t';
            found_illegal |= illegal;
            !illegal
        })
        .collect();

    let error = (found_illegal && !options.ignore_control_characters).then(|| {
        ValidationError::new(
            ValidationErrorCode::IllegalControlCharacters,
            format!("value of '{}' contains control characters", item.id),
        )
        .with_item(item.id.as_str(), Some(item.number))
        .with_value(value)
    });
    (cleaned, error)
}

/// Check a read value against the item's length, data type and regex.
///
/// At most one error is returned, checked in that order.
#[must_use]
pub fn validate_value(
    value: &str,
    item: &RuntimeItemDefinition,
    line: Option<usize>,
) -> Option<ValidationError> {
    let error = |code, message: String| {
        Some(
            ValidationError::new(code, message)
                .with_item(item.id.as_str(), Some(item.number))
                .with_value(value)
                .with_line(line),
        )
    };

    let len = value.chars().count();
    if item.data_type.requires_full_length() && len != item.length {
        return error(
            ValidationErrorCode::BadLength,
            format!(
                "value of '{}' must be exactly {} characters, got {len}",
                item.id, item.length
            ),
        );
    }
    if !item.data_type.matches(value) {
        return error(
            ValidationErrorCode::BadDataType,
            format!(
                "value of '{}' is not valid for data type '{}'",
                item.id,
                item.data_type.as_str()
            ),
        );
    }
    if let Some(regex) = &item.regex {
        if !regex.is_match(value) {
            return error(
                ValidationErrorCode::BadRegex,
                format!("value of '{}' does not match its format", item.id),
            );
        }
    }
    None
}

/// Trim a flat value according to the item's trim rule.
#[must_use]
pub fn apply_trim(value: &str, trim: Trim) -> &str {
    match trim {
        Trim::All => value.trim(),
        Trim::None => value,
    }
}

/// What to do with an item that is not in the runtime dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownItemOutcome {
    /// Drop the item.
    Skip,
    /// Drop the item and attach this error to its entity.
    Reject(ValidationError),
    /// Keep the item with its raw id and no number.
    Keep,
}

/// Apply the unknown item policy to an item read from a file.
#[must_use]
pub fn handle_unknown_item(
    raw_id: &str,
    value: &str,
    line: Option<usize>,
    options: &NaaccrOptions,
) -> UnknownItemOutcome {
    match options.unknown_item_handling {
        UnknownItemHandling::Ignore => UnknownItemOutcome::Skip,
        UnknownItemHandling::Process => UnknownItemOutcome::Keep,
        UnknownItemHandling::Error => UnknownItemOutcome::Reject(
            ValidationError::new(
                ValidationErrorCode::UnknownItem,
                format!("unknown item '{raw_id}'"),
            )
            .with_item(raw_id, None)
            .with_value(value)
            .with_line(line),
        ),
    }
}

/// Run the write-path rules on a value: control characters, truncation, padding.
#[must_use]
pub fn prepare_value_for_writing(
    value: &str,
    item: &RuntimeItemDefinition,
    options: &NaaccrOptions,
) -> (String, Vec<ValidationError>) {
    let mut errors = Vec::new();
    let (cleaned, error) = clean_control_characters(value, item, options);
    errors.extend(error);
    let (truncated, error) = truncate(&cleaned, item, options);
    errors.extend(error);
    (apply_padding(&truncated, item, options), errors)
}
