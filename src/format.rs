//! NAACCR formats and the format registry.
//!
//! A NAACCR format is a (NAACCR version, record type) pair. It fixes the length
//! of flat-file lines and names the base dictionary that describes the items.
//!
//! # Flat line layout
//!
//! - Column 1: record type (`A`, `M`, `C` or `I`)
//! - Columns 17-19: NAACCR version (`140`, `180`, `210`...)
//!
//! The [`FormatRegistry`] is a plain value: it is built by the caller, given the
//! dictionaries it should know about, and handed to readers and writers.

use crate::dictionary::Dictionary;
use crate::entity::NaaccrData;
use crate::error::{NaaccrError, Result};
use crate::runtime::{RuntimeDictionary, RuntimeDictionaryCache};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Namespace of NAACCR XML documents.
pub const NAACCR_XML_NAMESPACE: &str = "http://naaccr.org/naaccrxml";

/// Specification versions accepted in the `specificationVersion` root attribute.
pub const SUPPORTED_SPECIFICATION_VERSIONS: &[&str] =
    &["1.0", "1.1", "1.2", "1.3", "1.4", "1.5", "1.6", "1.7", "1.8"];

/// Specification version written when the data does not carry one.
pub const CURRENT_SPECIFICATION_VERSION: &str = "1.7";

/// NAACCR versions known to the standard registry.
pub const SUPPORTED_NAACCR_VERSIONS: &[&str] =
    &["140", "150", "160", "180", "210", "220", "230", "240", "250"];

/// 0-based column of the record type in a flat line.
pub const RECORD_TYPE_COLUMN: usize = 0;

/// 0-based column range of the NAACCR version in a flat line.
pub const NAACCR_VERSION_COLUMNS: std::ops::Range<usize> = 16..19;

/// NAACCR record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordType {
    /// `A` - full abstract.
    Abstract,
    /// `M` - modified abstract.
    Modified,
    /// `C` - confidential.
    Confidential,
    /// `I` - incidence.
    Incidence,
}

impl RecordType {
    /// All record types, in code order.
    pub const ALL: [RecordType; 4] = [
        RecordType::Abstract,
        RecordType::Modified,
        RecordType::Confidential,
        RecordType::Incidence,
    ];

    /// One-letter code (`A`, `M`, `C`, `I`).
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            RecordType::Abstract => "A",
            RecordType::Modified => "M",
            RecordType::Confidential => "C",
            RecordType::Incidence => "I",
        }
    }

    /// Lower-case name used in format names.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            RecordType::Abstract => "abstract",
            RecordType::Modified => "modified",
            RecordType::Confidential => "confidential",
            RecordType::Incidence => "incidence",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for RecordType {
    type Err = NaaccrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "A" => Ok(RecordType::Abstract),
            "M" => Ok(RecordType::Modified),
            "C" => Ok(RecordType::Confidential),
            "I" => Ok(RecordType::Incidence),
            "" => Err(NaaccrError::UnsupportedFormat(
                "record type is required".to_string(),
            )),
            other => Err(NaaccrError::UnsupportedFormat(format!(
                "invalid record type '{other}'"
            ))),
        }
    }
}

/// A supported (NAACCR version, record type) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaaccrFormat {
    version: String,
    record_type: RecordType,
    line_length: usize,
}

impl NaaccrFormat {
    /// Create a format with an explicit line length.
    pub fn new(version: impl Into<String>, record_type: RecordType, line_length: usize) -> Self {
        NaaccrFormat {
            version: version.into(),
            record_type,
            line_length,
        }
    }

    /// Create a format using the standard NAACCR line length for the version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version is not a known NAACCR version.
    pub fn standard(version: &str, record_type: RecordType) -> Result<Self> {
        if !SUPPORTED_NAACCR_VERSIONS.contains(&version) {
            return Err(NaaccrError::UnsupportedFormat(format!(
                "unsupported NAACCR version '{version}'"
            )));
        }
        let old_layout = matches!(version, "140" | "150" | "160");
        let line_length = match (record_type, old_layout) {
            (RecordType::Abstract | RecordType::Modified, true) => 22824,
            (RecordType::Confidential, true) => 5564,
            (RecordType::Incidence, true) => 3339,
            (RecordType::Abstract | RecordType::Modified, false) => 24194,
            (RecordType::Confidential, false) => 6154,
            (RecordType::Incidence, false) => 4048,
        };
        Ok(NaaccrFormat::new(version, record_type, line_length))
    }

    /// NAACCR version (`"180"`).
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Fixed length of a flat line in characters.
    #[must_use]
    pub fn line_length(&self) -> usize {
        self.line_length
    }

    /// Machine name, e.g. `naaccr-180-abstract`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("naaccr-{}-{}", self.version, self.record_type.name())
    }

    /// Display name, e.g. `NAACCR 18 Abstract`.
    #[must_use]
    pub fn display_name(&self) -> String {
        let major = self.version.strip_suffix('0').unwrap_or(&self.version);
        let kind = self.record_type.name();
        let mut chars = kind.chars();
        let kind = chars
            .next()
            .map(|first| first.to_uppercase().chain(chars).collect::<String>())
            .unwrap_or_default();
        format!("NAACCR {major} {kind}")
    }
}

impl fmt::Display for NaaccrFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Registry of supported formats and known dictionaries.
///
/// The registry also owns the cache of runtime dictionaries so that readers and
/// writers created from the same registry share one merged schema per
/// (record type, dictionary set).
#[derive(Debug, Default)]
pub struct FormatRegistry {
    formats: Vec<NaaccrFormat>,
    base_dictionaries: IndexMap<String, Dictionary>,
    default_user_dictionaries: IndexMap<String, Dictionary>,
    cache: RuntimeDictionaryCache,
}

impl FormatRegistry {
    /// Registry with every standard NAACCR format and no dictionaries.
    #[must_use]
    pub fn standard() -> Self {
        let mut formats = Vec::new();
        for version in SUPPORTED_NAACCR_VERSIONS {
            for record_type in RecordType::ALL {
                if let Ok(format) = NaaccrFormat::standard(version, record_type) {
                    formats.push(format);
                }
            }
        }
        FormatRegistry {
            formats,
            ..FormatRegistry::default()
        }
    }

    /// Register an additional format, replacing one with the same version and type.
    #[must_use]
    pub fn with_format(mut self, format: NaaccrFormat) -> Self {
        self.formats
            .retain(|f| !(f.version == format.version && f.record_type == format.record_type));
        self.formats.push(format);
        self
    }

    /// Register a base dictionary.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary has no NAACCR version or its version
    /// has no registered format.
    pub fn with_base_dictionary(mut self, dictionary: Dictionary) -> Result<Self> {
        dictionary.validate_as_base()?;
        let version = dictionary.naaccr_version().unwrap_or_default();
        if !self.is_version_supported(version) {
            return Err(NaaccrError::UnsupportedFormat(format!(
                "base dictionary '{}' uses unsupported NAACCR version '{version}'",
                dictionary.uri()
            )));
        }
        self.base_dictionaries
            .insert(dictionary.uri().to_string(), dictionary);
        Ok(self)
    }

    /// Register the default user dictionary of the dictionary's NAACCR version.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary has no NAACCR version or is not a valid
    /// user dictionary.
    pub fn with_default_user_dictionary(mut self, dictionary: Dictionary) -> Result<Self> {
        dictionary.validate_as_user()?;
        let version = dictionary.naaccr_version().ok_or_else(|| {
            NaaccrError::InvalidDictionary(format!(
                "default user dictionary '{}' must define a NAACCR version",
                dictionary.uri()
            ))
        })?;
        self.default_user_dictionaries
            .insert(version.to_string(), dictionary);
        Ok(self)
    }

    /// All registered formats.
    #[must_use]
    pub fn formats(&self) -> &[NaaccrFormat] {
        &self.formats
    }

    /// Whether at least one format uses this NAACCR version.
    #[must_use]
    pub fn is_version_supported(&self, version: &str) -> bool {
        self.formats.iter().any(|f| f.version == version)
    }

    /// Whether the (version, record type) combination is supported.
    #[must_use]
    pub fn is_supported(&self, version: &str, record_type: RecordType) -> bool {
        self.format(version, record_type).is_some()
    }

    /// Look up the format of a (version, record type) combination.
    #[must_use]
    pub fn format(&self, version: &str, record_type: RecordType) -> Option<&NaaccrFormat> {
        self.formats
            .iter()
            .find(|f| f.version == version && f.record_type == record_type)
    }

    /// Look up a format by its machine name (`naaccr-180-abstract`).
    #[must_use]
    pub fn format_by_name(&self, name: &str) -> Option<&NaaccrFormat> {
        self.formats.iter().find(|f| f.name() == name)
    }

    /// Base dictionary registered under this URI.
    #[must_use]
    pub fn base_dictionary(&self, uri: &str) -> Option<&Dictionary> {
        self.base_dictionaries.get(uri)
    }

    /// Base dictionary registered for this NAACCR version.
    #[must_use]
    pub fn base_dictionary_for_version(&self, version: &str) -> Option<&Dictionary> {
        self.base_dictionaries
            .values()
            .find(|d| d.naaccr_version() == Some(version))
    }

    /// Default user dictionary registered for this NAACCR version.
    #[must_use]
    pub fn default_user_dictionary(&self, version: &str) -> Option<&Dictionary> {
        self.default_user_dictionaries.get(version)
    }

    /// Detect the format of a flat line from its record type and version columns.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is too short or names an unsupported format.
    pub fn detect_flat_line(&self, line: &str) -> Result<&NaaccrFormat> {
        let chars: Vec<char> = line.chars().take(NAACCR_VERSION_COLUMNS.end).collect();
        if chars.len() < NAACCR_VERSION_COLUMNS.end {
            return Err(NaaccrError::UnsupportedFormat(
                "line is too short to contain a record type and a NAACCR version".to_string(),
            ));
        }
        let record_type: RecordType = chars[RECORD_TYPE_COLUMN].to_string().parse()?;
        let version: String = chars[NAACCR_VERSION_COLUMNS].iter().collect();
        self.format(&version, record_type).ok_or_else(|| {
            NaaccrError::UnsupportedFormat(format!(
                "unsupported NAACCR version '{version}' for record type '{record_type}'"
            ))
        })
    }

    /// Resolve the runtime dictionary of a record type and dictionary set.
    ///
    /// When no user dictionary is given, the default user dictionary of the base
    /// dictionary's version is used if one is registered. Results are cached: the
    /// same record type and dictionary set always yield the same instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the record type is invalid, the base dictionary is not
    /// a valid base dictionary, or two dictionaries define the same id or number.
    pub fn resolve(
        &self,
        record_type: &str,
        base: &Dictionary,
        users: &[Dictionary],
    ) -> Result<Arc<RuntimeDictionary>> {
        let mut effective: Vec<&Dictionary> = users.iter().collect();
        if effective.is_empty() {
            if let Some(default) = base
                .naaccr_version()
                .and_then(|version| self.default_user_dictionary(version))
            {
                effective.push(default);
            }
        }
        self.cache.get_or_build(record_type, base, &effective)
    }

    /// Resolve the runtime dictionary of a base dictionary registered under `base_uri`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base dictionary is registered under the URI, or if
    /// [`resolve`](Self::resolve) fails.
    pub fn resolve_uri(
        &self,
        record_type: &str,
        base_uri: &str,
        users: &[Dictionary],
    ) -> Result<Arc<RuntimeDictionary>> {
        let base = self.base_dictionary(base_uri).ok_or_else(|| {
            NaaccrError::UnsupportedFormat(format!("unknown base dictionary '{base_uri}'"))
        })?;
        self.resolve(record_type, base, users)
    }

    /// Resolve the runtime dictionary described by a document root.
    ///
    /// The base dictionary must be registered. Every user dictionary URI listed
    /// on the root must be among `users` or be the default user dictionary of
    /// the base version; a root listing none uses `users` as given.
    ///
    /// # Errors
    ///
    /// Returns an error if the base dictionary is unknown, the record type is
    /// invalid or unsupported by the base version, a listed user dictionary was
    /// not provided, or [`resolve`](Self::resolve) fails.
    pub fn resolve_root(&self, root: &NaaccrData, users: &[Dictionary]) -> Result<Arc<RuntimeDictionary>> {
        let base = self.base_dictionary(&root.base_dictionary_uri).ok_or_else(|| {
            NaaccrError::UnsupportedFormat(format!(
                "unknown base dictionary '{}'",
                root.base_dictionary_uri
            ))
        })?;
        let version = base.naaccr_version().unwrap_or_default();
        let record_type: RecordType = root.record_type.parse()?;
        if !self.is_supported(version, record_type) {
            return Err(NaaccrError::UnsupportedFormat(format!(
                "NAACCR version '{version}' does not support record type '{record_type}'"
            )));
        }

        if root.user_dictionary_uris.is_empty() {
            return self.resolve(record_type.code(), base, users);
        }
        let default = self.default_user_dictionary(version);
        let mut effective = Vec::with_capacity(root.user_dictionary_uris.len());
        for uri in &root.user_dictionary_uris {
            let dictionary = users
                .iter()
                .find(|d| d.uri() == uri)
                .or_else(|| default.filter(|d| d.uri() == uri))
                .ok_or_else(|| {
                    NaaccrError::Configuration(format!(
                        "user dictionary '{uri}' is referenced by the data but was not provided"
                    ))
                })?;
            effective.push(dictionary.clone());
        }
        self.resolve(record_type.code(), base, &effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{ItemDefinition, ItemLevel};

    fn base_180() -> Dictionary {
        Dictionary::builder("http://naaccr.org/naaccrxml/naaccr-dictionary-180.xml")
            .naaccr_version("180")
            .item(ItemDefinition::new("recordType", 10, ItemLevel::Root, 1).with_start_column(1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_standard_line_lengths() {
        let registry = FormatRegistry::standard();
        assert_eq!(
            registry.format("160", RecordType::Abstract).unwrap().line_length(),
            22824
        );
        assert_eq!(
            registry.format("180", RecordType::Incidence).unwrap().line_length(),
            4048
        );
        assert_eq!(
            registry.format("210", RecordType::Confidential).unwrap().line_length(),
            6154
        );
        assert!(!registry.is_supported("130", RecordType::Abstract));
    }

    #[test]
    fn test_format_names() {
        let format = NaaccrFormat::standard("180", RecordType::Abstract).unwrap();
        assert_eq!(format.name(), "naaccr-180-abstract");
        assert_eq!(format.display_name(), "NAACCR 18 Abstract");
        let registry = FormatRegistry::standard();
        assert_eq!(
            registry.format_by_name("naaccr-210-incidence").unwrap().version(),
            "210"
        );
    }

    #[test]
    fn test_record_type_parse() {
        assert_eq!("A".parse::<RecordType>().unwrap(), RecordType::Abstract);
        assert_eq!("I".parse::<RecordType>().unwrap(), RecordType::Incidence);
        assert!("".parse::<RecordType>().is_err());
        assert!("X".parse::<RecordType>().is_err());
    }

    #[test]
    fn test_detect_flat_line() {
        let registry = FormatRegistry::standard();
        let mut line = String::from("I");
        line.push_str(&" ".repeat(15));
        line.push_str("180");
        line.push_str(&" ".repeat(100));
        let format = registry.detect_flat_line(&line).unwrap();
        assert_eq!(format.name(), "naaccr-180-incidence");

        assert!(registry.detect_flat_line("I  ").is_err());
        let bad = line.replacen("180", "999", 1);
        assert!(registry.detect_flat_line(&bad).is_err());
    }

    #[test]
    fn test_registered_dictionaries() {
        let registry = FormatRegistry::standard()
            .with_base_dictionary(base_180())
            .unwrap();
        assert!(registry.base_dictionary_for_version("180").is_some());
        assert!(registry
            .base_dictionary("http://naaccr.org/naaccrxml/naaccr-dictionary-180.xml")
            .is_some());
        assert!(registry.base_dictionary_for_version("210").is_none());
    }

    #[test]
    fn test_base_dictionary_with_unsupported_version() {
        let dictionary = Dictionary::builder("uri")
            .naaccr_version("999")
            .build()
            .unwrap();
        assert!(FormatRegistry::standard()
            .with_base_dictionary(dictionary)
            .is_err());
    }

    #[test]
    fn test_resolve_root_uses_default_user_dictionary() {
        let default_user = Dictionary::builder("http://naaccr.org/naaccrxml/user-defined-naaccr-dictionary-180.xml")
            .naaccr_version("180")
            .item(ItemDefinition::new("reserved00", 9000, ItemLevel::Tumor, 10))
            .build()
            .unwrap();
        let registry = FormatRegistry::standard()
            .with_base_dictionary(base_180())
            .unwrap()
            .with_default_user_dictionary(default_user)
            .unwrap();

        let root = NaaccrData::new("http://naaccr.org/naaccrxml/naaccr-dictionary-180.xml", "A");
        let implicit = registry.resolve_root(&root, &[]).unwrap();
        assert!(implicit.item("reserved00").is_some());

        let mut listed = root.clone();
        listed.user_dictionary_uris =
            vec!["http://naaccr.org/naaccrxml/user-defined-naaccr-dictionary-180.xml".to_string()];
        let explicit = registry.resolve_root(&listed, &[]).unwrap();
        assert!(Arc::ptr_eq(&implicit, &explicit));

        listed.user_dictionary_uris = vec!["http://example.org/missing.xml".to_string()];
        assert!(matches!(
            registry.resolve_root(&listed, &[]).unwrap_err(),
            NaaccrError::Configuration(_)
        ));
    }
}
