//! Error types for NAACCR operations.
//!
//! This module provides the [`NaaccrError`] type for every fatal failure of the
//! library and the [`Result`] convenience type. Non-fatal problems found in the
//! data itself are reported as [`ValidationError`](crate::entity::ValidationError)
//! values attached to the entities instead.

use thiserror::Error;

/// Error type for all fatal NAACCR library failures.
///
/// A fatal error aborts the current read or write operation. Anything that the
/// caller may want to tolerate (bad values, unknown items, mismatched values
/// between grouped lines) is reported as a validation error instead.
#[derive(Error, Debug)]
pub enum NaaccrError {
    /// Malformed structure: bad tag nesting, wrong or missing required attribute,
    /// duplicate item within one tag, item at the wrong level, inconsistent lines.
    #[error(
        "Syntax error{}: {message}",
        .line.map(|l| format!(" on line {l}")).unwrap_or_default()
    )]
    Syntax {
        /// Human readable description.
        message: String,
        /// Line where the problem was found, when the source tracks lines.
        line: Option<usize>,
    },

    /// A single dictionary is malformed.
    #[error("Invalid dictionary: {0}")]
    InvalidDictionary(String),

    /// Two dictionaries define the same item id or number.
    #[error("Dictionary merge conflict: {0}")]
    MergeConflict(String),

    /// The NAACCR version or record type is not supported.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The options are inconsistent or carry an unknown policy value.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Error reported by the XML parser or writer.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// IO error from the underlying source/destination.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl NaaccrError {
    /// Build a syntax error, optionally attached to a line number.
    pub fn syntax(message: impl Into<String>, line: Option<usize>) -> Self {
        NaaccrError::Syntax {
            message: message.into(),
            line,
        }
    }

    /// Line number carried by a syntax error, if any.
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            NaaccrError::Syntax { line, .. } => *line,
            _ => None,
        }
    }
}

/// Convenience type alias for [`std::result::Result`] with [`NaaccrError`].
pub type Result<T> = std::result::Result<T, NaaccrError>;
