//! Options controlling how records are read and written.
//!
//! [`NaaccrOptions`] is consumed by every reader and writer. All fields are
//! public and independent; the `with_*` methods are provided for chaining.
//!
//! ```
//! use naaccr::{NaaccrOptions, UnknownItemHandling};
//!
//! let options = NaaccrOptions::default()
//!     .with_unknown_item_handling(UnknownItemHandling::Ignore)
//!     .with_report_values_too_long(true);
//! assert!(options.include_item("patientIdNumber"));
//! ```

use crate::error::{NaaccrError, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Item used by default to group flat lines into patients.
pub const DEFAULT_GROUPING_ITEM: &str = "patientIdNumber";

/// Policy applied to items that are not in the runtime dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnknownItemHandling {
    /// Drop the item silently.
    Ignore,
    /// Report a validation error and drop the item (fatal on write).
    #[default]
    Error,
    /// Keep the item with its raw id and no number.
    Process,
}

impl FromStr for UnknownItemHandling {
    type Err = NaaccrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(UnknownItemHandling::Ignore),
            "error" => Ok(UnknownItemHandling::Error),
            "process" => Ok(UnknownItemHandling::Process),
            other => Err(NaaccrError::Configuration(format!(
                "invalid unknown item handling '{other}'"
            ))),
        }
    }
}

impl fmt::Display for UnknownItemHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnknownItemHandling::Ignore => "ignore",
            UnknownItemHandling::Error => "error",
            UnknownItemHandling::Process => "process",
        })
    }
}

/// Options shared by readers and writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaaccrOptions {
    /// Record type to write flat files with; flat readers check the file against it.
    pub record_type: Option<String>,
    /// Items whose equal values group consecutive flat lines into one patient.
    pub tumor_grouping_items: Vec<String>,
    /// Report root/patient values that differ between grouped flat lines.
    pub report_level_mismatch: bool,
    /// Validate values against their data type, length and regex when reading.
    pub validate_read_values: bool,
    /// Policy for items missing from the dictionary.
    pub unknown_item_handling: UnknownItemHandling,
    /// Write the `naaccrNum` attribute in XML.
    pub write_item_number: bool,
    /// Apply `leftZero`/`rightZero` padding when writing.
    pub apply_zero_padding_rules: bool,
    /// Report values truncated because they are too long.
    pub report_values_too_long: bool,
    /// Silently remove control characters instead of reporting them.
    pub ignore_control_characters: bool,
    /// Do not capture nor write XML extensions.
    pub ignore_extensions: bool,
    /// Deprecated item ids to rename when reading.
    pub item_ids_to_translate: HashMap<String, String>,
    /// Items never read nor written.
    pub items_to_exclude: HashSet<String>,
    /// When set, only these items are read and written.
    pub items_to_include: Option<HashSet<String>>,
}

impl Default for NaaccrOptions {
    fn default() -> Self {
        NaaccrOptions {
            record_type: None,
            tumor_grouping_items: vec![DEFAULT_GROUPING_ITEM.to_string()],
            report_level_mismatch: false,
            validate_read_values: true,
            unknown_item_handling: UnknownItemHandling::Error,
            write_item_number: false,
            apply_zero_padding_rules: true,
            report_values_too_long: false,
            ignore_control_characters: true,
            ignore_extensions: false,
            item_ids_to_translate: HashMap::new(),
            items_to_exclude: HashSet::new(),
            items_to_include: None,
        }
    }
}

impl NaaccrOptions {
    /// Set the record type.
    #[must_use]
    pub fn with_record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    /// Set the grouping items; an empty list disables grouping.
    #[must_use]
    pub fn with_tumor_grouping_items(mut self, items: &[&str]) -> Self {
        self.tumor_grouping_items = items.iter().map(|i| (*i).to_string()).collect();
        self
    }

    /// Report values that differ between grouped flat lines.
    #[must_use]
    pub fn with_report_level_mismatch(mut self, report: bool) -> Self {
        self.report_level_mismatch = report;
        self
    }

    /// Validate values when reading.
    #[must_use]
    pub fn with_validate_read_values(mut self, validate: bool) -> Self {
        self.validate_read_values = validate;
        self
    }

    /// Set the unknown item policy.
    #[must_use]
    pub fn with_unknown_item_handling(mut self, handling: UnknownItemHandling) -> Self {
        self.unknown_item_handling = handling;
        self
    }

    /// Write item numbers in XML.
    #[must_use]
    pub fn with_write_item_number(mut self, write: bool) -> Self {
        self.write_item_number = write;
        self
    }

    /// Apply zero padding rules when writing.
    #[must_use]
    pub fn with_apply_zero_padding_rules(mut self, apply: bool) -> Self {
        self.apply_zero_padding_rules = apply;
        self
    }

    /// Report values that are too long.
    #[must_use]
    pub fn with_report_values_too_long(mut self, report: bool) -> Self {
        self.report_values_too_long = report;
        self
    }

    /// Strip control characters silently.
    #[must_use]
    pub fn with_ignore_control_characters(mut self, ignore: bool) -> Self {
        self.ignore_control_characters = ignore;
        self
    }

    /// Skip XML extensions.
    #[must_use]
    pub fn with_ignore_extensions(mut self, ignore: bool) -> Self {
        self.ignore_extensions = ignore;
        self
    }

    /// Rename `from` to `to` when reading.
    #[must_use]
    pub fn with_item_id_translation(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.item_ids_to_translate.insert(from.into(), to.into());
        self
    }

    /// Exclude an item.
    #[must_use]
    pub fn with_excluded_item(mut self, id: impl Into<String>) -> Self {
        self.items_to_exclude.insert(id.into());
        self
    }

    /// Only read and write the given items.
    #[must_use]
    pub fn with_included_items(mut self, ids: &[&str]) -> Self {
        self.items_to_include = Some(ids.iter().map(|i| (*i).to_string()).collect());
        self
    }

    /// Whether an item passes the inclusion filter.
    #[must_use]
    pub fn include_item(&self, id: &str) -> bool {
        if self.items_to_exclude.contains(id) {
            return false;
        }
        self.items_to_include
            .as_ref()
            .map_or(true, |included| included.contains(id))
    }

    /// Id to use for a raw id read from a file.
    #[must_use]
    pub fn translate_item_id<'a>(&'a self, id: &'a str) -> &'a str {
        self.item_ids_to_translate
            .get(id)
            .map_or(id, String::as_str)
    }
}
