//! NAACCR data dictionaries.
//!
//! A [`Dictionary`] describes the items of one NAACCR dictionary file: a base
//! dictionary published for a NAACCR version, or a user dictionary adding
//! registry specific items. Dictionaries are immutable once built and carry
//! eagerly built lookup indexes by item id and item number.
//!
//! Dictionaries are normally loaded from the NAACCR dictionary XML format:
//!
//! ```ignore
//! use naaccr::Dictionary;
//!
//! let xml = r#"<NaaccrDictionary dictionaryUri="http://example.org/my-dictionary.xml"
//!                  specificationVersion="1.3">
//!   <ItemDefs>
//!     <ItemDef naaccrId="myVariable" naaccrNum="10000" parentXmlElement="Tumor"
//!              length="2" dataType="digits"/>
//!   </ItemDefs>
//! </NaaccrDictionary>"#;
//! let dictionary = Dictionary::from_xml_str(xml)?;
//! assert!(dictionary.item_by_id("myVariable").is_some());
//! # Ok::<(), naaccr::NaaccrError>(())
//! ```

use crate::error::{NaaccrError, Result};
use lazy_static::lazy_static;
use quick_xml::de::from_str as xml_from_str;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

lazy_static! {
    static ref ITEM_ID_PATTERN: Regex = Regex::new(r"^[a-z][a-zA-Z0-9]+$").unwrap();
    static ref ALPHA_PATTERN: Regex = Regex::new(r"^[A-Z]+$").unwrap();
    static ref DIGITS_PATTERN: Regex = Regex::new(r"^[0-9]+$").unwrap();
    static ref MIXED_PATTERN: Regex = Regex::new(r"^[A-Z0-9]+$").unwrap();
    static ref NUMERIC_PATTERN: Regex = Regex::new(r"^-?\d+(\.\d+)?$").unwrap();
    static ref DATE_PATTERN: Regex =
        Regex::new(r"^(18|19|20)\d\d((0[1-9]|1[012])(0[1-9]|[12]\d|3[01])?)?$").unwrap();
}

/// Level of the entity tree an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemLevel {
    /// Items attached to the `NaaccrData` root element.
    Root,
    /// Items attached to a `Patient` element.
    Patient,
    /// Items attached to a `Tumor` element.
    Tumor,
}

impl ItemLevel {
    /// XML element name of the level (`NaaccrData`, `Patient` or `Tumor`).
    #[must_use]
    pub fn element_name(self) -> &'static str {
        match self {
            ItemLevel::Root => "NaaccrData",
            ItemLevel::Patient => "Patient",
            ItemLevel::Tumor => "Tumor",
        }
    }
}

impl fmt::Display for ItemLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

impl FromStr for ItemLevel {
    type Err = NaaccrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NaaccrData" => Ok(ItemLevel::Root),
            "Patient" => Ok(ItemLevel::Patient),
            "Tumor" => Ok(ItemLevel::Tumor),
            other => Err(NaaccrError::InvalidDictionary(format!(
                "invalid parent XML element '{other}'"
            ))),
        }
    }
}

/// Data type of an item value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataType {
    /// Upper-case letters only, full length required.
    Alpha,
    /// Digits only, full length required.
    Digits,
    /// Upper-case letters and digits, full length required.
    Mixed,
    /// Signed integer or decimal number.
    Numeric,
    /// Free text.
    #[default]
    Text,
    /// `YYYY`, `YYYYMM` or `YYYYMMDD`.
    Date,
}

impl DataType {
    /// Whether values of this type must always fill the item's full length.
    #[must_use]
    pub fn requires_full_length(self) -> bool {
        matches!(self, DataType::Alpha | DataType::Digits | DataType::Mixed)
    }

    /// Whether the value matches the pattern of this data type.
    #[must_use]
    pub fn matches(self, value: &str) -> bool {
        match self {
            DataType::Alpha => ALPHA_PATTERN.is_match(value),
            DataType::Digits => DIGITS_PATTERN.is_match(value),
            DataType::Mixed => MIXED_PATTERN.is_match(value),
            DataType::Numeric => NUMERIC_PATTERN.is_match(value),
            DataType::Text => true,
            DataType::Date => DATE_PATTERN.is_match(value),
        }
    }

    /// Name used in dictionary files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Alpha => "alpha",
            DataType::Digits => "digits",
            DataType::Mixed => "mixed",
            DataType::Numeric => "numeric",
            DataType::Text => "text",
            DataType::Date => "date",
        }
    }
}

impl FromStr for DataType {
    type Err = NaaccrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "alpha" => Ok(DataType::Alpha),
            "digits" => Ok(DataType::Digits),
            "mixed" => Ok(DataType::Mixed),
            "numeric" => Ok(DataType::Numeric),
            "text" => Ok(DataType::Text),
            "date" => Ok(DataType::Date),
            other => Err(NaaccrError::InvalidDictionary(format!(
                "invalid data type '{other}'"
            ))),
        }
    }
}

/// Padding rule declared for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Padding {
    /// Pad on the left with zeros.
    LeftZero,
    /// Pad on the right with zeros.
    RightZero,
    /// Pad on the left with blanks.
    LeftBlank,
    /// Pad on the right with blanks.
    RightBlank,
}

impl FromStr for Padding {
    type Err = NaaccrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "leftZero" => Ok(Padding::LeftZero),
            "rightZero" => Ok(Padding::RightZero),
            "leftBlank" => Ok(Padding::LeftBlank),
            "rightBlank" => Ok(Padding::RightBlank),
            other => Err(NaaccrError::InvalidDictionary(format!(
                "invalid padding rule '{other}'"
            ))),
        }
    }
}

/// Trimming rule applied to values read from flat lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Trim {
    /// Remove leading and trailing whitespace.
    #[default]
    All,
    /// Keep the value exactly as found.
    None,
}

impl FromStr for Trim {
    type Err = NaaccrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Trim::All),
            "none" => Ok(Trim::None),
            other => Err(NaaccrError::InvalidDictionary(format!(
                "invalid trim rule '{other}'"
            ))),
        }
    }
}

/// Plain item or grouped item bundling several sub-items under one id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    /// A regular item.
    Plain,
    /// An item whose columns are made of the listed items.
    Grouped {
        /// Ids of the bundled items, in column order.
        contains: Vec<String>,
    },
}

/// Definition of one item in a dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDefinition {
    /// Stable item identifier (`naaccrId`).
    pub id: String,
    /// Item number (`naaccrNum`).
    pub number: u32,
    /// Display name.
    pub name: Option<String>,
    /// Level the item belongs to.
    pub level: ItemLevel,
    /// 1-based start column in flat files.
    pub start_column: Option<usize>,
    /// Length of the value in characters.
    pub length: usize,
    /// Record types the item is defined for; `None` means all of them.
    pub record_types: Option<BTreeSet<String>>,
    /// Type of the value.
    pub data_type: DataType,
    /// Optional validation regex (matched against the whole value).
    pub regex: Option<String>,
    /// Optional padding rule.
    pub padding: Option<Padding>,
    /// Trimming rule for flat values.
    pub trim: Trim,
    /// Whether values may exceed `length` in XML.
    pub allow_unlimited_text: bool,
    /// Plain or grouped.
    pub kind: ItemKind,
}

impl ItemDefinition {
    /// Create a plain text item definition; use the `with_*` methods to refine it.
    pub fn new(
        id: impl Into<String>,
        number: u32,
        level: ItemLevel,
        length: usize,
    ) -> Self {
        ItemDefinition {
            id: id.into(),
            number,
            name: None,
            level,
            start_column: None,
            length,
            record_types: None,
            data_type: DataType::Text,
            regex: None,
            padding: None,
            trim: Trim::All,
            allow_unlimited_text: false,
            kind: ItemKind::Plain,
        }
    }

    /// Set the 1-based start column.
    #[must_use]
    pub fn with_start_column(mut self, column: usize) -> Self {
        self.start_column = Some(column);
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Restrict the item to the given record types.
    #[must_use]
    pub fn with_record_types(mut self, types: &[&str]) -> Self {
        self.record_types = Some(types.iter().map(|t| (*t).to_string()).collect());
        self
    }

    /// Set the data type.
    #[must_use]
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Set the validation regex.
    #[must_use]
    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }

    /// Set the padding rule.
    #[must_use]
    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Set the trimming rule.
    #[must_use]
    pub fn with_trim(mut self, trim: Trim) -> Self {
        self.trim = trim;
        self
    }

    /// Allow values longer than the declared length.
    #[must_use]
    pub fn with_unlimited_text(mut self, allow: bool) -> Self {
        self.allow_unlimited_text = allow;
        self
    }

    /// Turn the definition into a grouped item bundling `contains`.
    #[must_use]
    pub fn grouping(mut self, contains: &[&str]) -> Self {
        self.kind = ItemKind::Grouped {
            contains: contains.iter().map(|c| (*c).to_string()).collect(),
        };
        self
    }

    /// Whether the item applies to the given record type.
    #[must_use]
    pub fn applies_to(&self, record_type: &str) -> bool {
        self.record_types
            .as_ref()
            .map_or(true, |types| types.contains(record_type))
    }

    /// Whether this is a grouped item.
    #[must_use]
    pub fn is_grouped(&self) -> bool {
        matches!(self.kind, ItemKind::Grouped { .. })
    }
}

/// An immutable NAACCR dictionary.
///
/// Both the plain and the grouped items are indexed by id and by number when the
/// dictionary is built.
#[derive(Debug, Clone)]
pub struct Dictionary {
    uri: String,
    naaccr_version: Option<String>,
    specification_version: Option<String>,
    description: Option<String>,
    date_last_modified: Option<String>,
    items: Vec<ItemDefinition>,
    grouped_items: Vec<ItemDefinition>,
    by_id: HashMap<String, usize>,
    by_number: HashMap<u32, usize>,
}

impl Dictionary {
    /// Start building a dictionary with the given URI.
    pub fn builder(uri: impl Into<String>) -> DictionaryBuilder {
        DictionaryBuilder {
            uri: uri.into(),
            naaccr_version: None,
            specification_version: None,
            description: None,
            date_last_modified: None,
            items: Vec::new(),
            grouped_items: Vec::new(),
        }
    }

    /// Dictionary URI, the unique key of a dictionary.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// NAACCR version (`"180"`, `"210"`...), mandatory for base dictionaries.
    #[must_use]
    pub fn naaccr_version(&self) -> Option<&str> {
        self.naaccr_version.as_deref()
    }

    /// Version of the NAACCR XML specification the dictionary follows.
    #[must_use]
    pub fn specification_version(&self) -> Option<&str> {
        self.specification_version.as_deref()
    }

    /// Free text description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Last modification timestamp as written in the dictionary.
    #[must_use]
    pub fn date_last_modified(&self) -> Option<&str> {
        self.date_last_modified.as_deref()
    }

    /// Plain items, in dictionary order.
    #[must_use]
    pub fn items(&self) -> &[ItemDefinition] {
        &self.items
    }

    /// Grouped items, in dictionary order.
    #[must_use]
    pub fn grouped_items(&self) -> &[ItemDefinition] {
        &self.grouped_items
    }

    /// All items, plain ones first.
    pub fn all_items(&self) -> impl Iterator<Item = &ItemDefinition> {
        self.items.iter().chain(self.grouped_items.iter())
    }

    /// Look up a plain or grouped item by id.
    #[must_use]
    pub fn item_by_id(&self, id: &str) -> Option<&ItemDefinition> {
        self.by_id.get(id).map(|&idx| self.item_at(idx))
    }

    /// Look up a plain or grouped item by number.
    #[must_use]
    pub fn item_by_number(&self, number: u32) -> Option<&ItemDefinition> {
        self.by_number.get(&number).map(|&idx| self.item_at(idx))
    }

    fn item_at(&self, idx: usize) -> &ItemDefinition {
        if idx < self.items.len() {
            &self.items[idx]
        } else {
            &self.grouped_items[idx - self.items.len()]
        }
    }

    /// Parse a dictionary from NAACCR dictionary XML.
    ///
    /// # Errors
    ///
    /// Returns an error if the XML cannot be parsed, an attribute carries an
    /// invalid value, or the resulting dictionary fails validation.
    pub fn from_xml_str(xml: &str) -> Result<Self> {
        let raw: DictionaryXml = xml_from_str(xml)
            .map_err(|e| NaaccrError::InvalidDictionary(format!("failed to parse XML: {e}")))?;
        raw.into_dictionary()
    }

    /// Parse a dictionary from a reader producing NAACCR dictionary XML.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the content is not a valid dictionary.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut xml = String::new();
        reader.read_to_string(&mut xml)?;
        Self::from_xml_str(&xml)
    }

    /// Validate this dictionary as a base dictionary.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary has no NAACCR version.
    pub fn validate_as_base(&self) -> Result<()> {
        if self.naaccr_version.is_none() {
            return Err(NaaccrError::InvalidDictionary(format!(
                "base dictionary '{}' must define a NAACCR version",
                self.uri
            )));
        }
        Ok(())
    }

    /// Validate this dictionary as a user dictionary.
    ///
    /// # Errors
    ///
    /// Returns an error if the dictionary declares grouped items.
    pub fn validate_as_user(&self) -> Result<()> {
        if !self.grouped_items.is_empty() {
            return Err(NaaccrError::InvalidDictionary(format!(
                "user dictionary '{}' cannot define grouped items",
                self.uri
            )));
        }
        Ok(())
    }
}

/// Builder for [`Dictionary`]; `build` validates the content and creates the indexes.
#[derive(Debug, Clone)]
pub struct DictionaryBuilder {
    uri: String,
    naaccr_version: Option<String>,
    specification_version: Option<String>,
    description: Option<String>,
    date_last_modified: Option<String>,
    items: Vec<ItemDefinition>,
    grouped_items: Vec<ItemDefinition>,
}

impl DictionaryBuilder {
    /// Set the NAACCR version.
    #[must_use]
    pub fn naaccr_version(mut self, version: impl Into<String>) -> Self {
        self.naaccr_version = Some(version.into());
        self
    }

    /// Set the specification version.
    #[must_use]
    pub fn specification_version(mut self, version: impl Into<String>) -> Self {
        self.specification_version = Some(version.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the last modification timestamp.
    #[must_use]
    pub fn date_last_modified(mut self, date: impl Into<String>) -> Self {
        self.date_last_modified = Some(date.into());
        self
    }

    /// Add an item; grouped definitions go to the grouped item list.
    #[must_use]
    pub fn item(mut self, item: ItemDefinition) -> Self {
        if item.is_grouped() {
            self.grouped_items.push(item);
        } else {
            self.items.push(item);
        }
        self
    }

    /// Validate and build the dictionary.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is blank, an id is malformed, an id or a
    /// number is defined twice, a length is zero, or a grouped item references
    /// an item that is not in this dictionary.
    pub fn build(self) -> Result<Dictionary> {
        if self.uri.trim().is_empty() {
            return Err(NaaccrError::InvalidDictionary(
                "dictionary URI is required".to_string(),
            ));
        }

        let mut by_id = HashMap::new();
        let mut by_number = HashMap::new();
        for (idx, item) in self.items.iter().chain(self.grouped_items.iter()).enumerate() {
            if !ITEM_ID_PATTERN.is_match(&item.id) {
                return Err(NaaccrError::InvalidDictionary(format!(
                    "invalid item id '{}' in '{}'",
                    item.id, self.uri
                )));
            }
            if item.length == 0 {
                return Err(NaaccrError::InvalidDictionary(format!(
                    "item '{}' in '{}' must have a positive length",
                    item.id, self.uri
                )));
            }
            if let Some(start) = item.start_column {
                if start == 0 || start.checked_add(item.length).is_none() {
                    return Err(NaaccrError::InvalidDictionary(format!(
                        "item '{}' in '{}' has invalid start column {start}",
                        item.id, self.uri
                    )));
                }
            }
            if by_id.insert(item.id.clone(), idx).is_some() {
                return Err(NaaccrError::InvalidDictionary(format!(
                    "item id '{}' is defined twice in '{}'",
                    item.id, self.uri
                )));
            }
            if by_number.insert(item.number, idx).is_some() {
                return Err(NaaccrError::InvalidDictionary(format!(
                    "item number {} is defined twice in '{}'",
                    item.number, self.uri
                )));
            }
        }

        for grouped in &self.grouped_items {
            if let ItemKind::Grouped { contains } = &grouped.kind {
                for id in contains {
                    let known = self.items.iter().any(|item| &item.id == id);
                    if !known {
                        return Err(NaaccrError::InvalidDictionary(format!(
                            "grouped item '{}' references unknown item '{id}'",
                            grouped.id
                        )));
                    }
                }
            }
        }

        Ok(Dictionary {
            uri: self.uri,
            naaccr_version: self.naaccr_version,
            specification_version: self.specification_version,
            description: self.description,
            date_last_modified: self.date_last_modified,
            items: self.items,
            grouped_items: self.grouped_items,
            by_id,
            by_number,
        })
    }
}

// ---------------------------------------------------------------------------
// Dictionary XML representation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename = "NaaccrDictionary")]
struct DictionaryXml {
    #[serde(rename = "@dictionaryUri")]
    uri: String,
    #[serde(rename = "@naaccrVersion", default)]
    naaccr_version: Option<String>,
    #[serde(rename = "@specificationVersion", default)]
    specification_version: Option<String>,
    #[serde(rename = "@description", default)]
    description: Option<String>,
    #[serde(rename = "@dateLastModified", default)]
    date_last_modified: Option<String>,
    #[serde(rename = "ItemDefs", default)]
    item_defs: ItemDefsXml,
    #[serde(rename = "GroupedItemDefs", default)]
    grouped_item_defs: ItemDefsXml,
}

#[derive(Debug, Default, Deserialize)]
struct ItemDefsXml {
    #[serde(rename = "ItemDef", default)]
    items: Vec<ItemDefXml>,
}

#[derive(Debug, Deserialize)]
struct ItemDefXml {
    #[serde(rename = "@naaccrId")]
    id: String,
    #[serde(rename = "@naaccrNum")]
    number: u32,
    #[serde(rename = "@naaccrName", default)]
    name: Option<String>,
    #[serde(rename = "@parentXmlElement")]
    parent: String,
    #[serde(rename = "@startColumn", default)]
    start_column: Option<usize>,
    #[serde(rename = "@length")]
    length: usize,
    #[serde(rename = "@recordTypes", default)]
    record_types: Option<String>,
    #[serde(rename = "@dataType", default)]
    data_type: Option<String>,
    #[serde(rename = "@regexValidation", default)]
    regex: Option<String>,
    #[serde(rename = "@padding", default)]
    padding: Option<String>,
    #[serde(rename = "@trim", default)]
    trim: Option<String>,
    #[serde(rename = "@allowUnlimitedText", default)]
    allow_unlimited_text: Option<bool>,
    #[serde(rename = "@contains", default)]
    contains: Option<String>,
}

impl ItemDefXml {
    fn into_definition(self, grouped: bool) -> Result<ItemDefinition> {
        let kind = if grouped {
            let contains = self.contains.ok_or_else(|| {
                NaaccrError::InvalidDictionary(format!(
                    "grouped item '{}' must define 'contains'",
                    self.id
                ))
            })?;
            ItemKind::Grouped {
                contains: split_list(&contains),
            }
        } else {
            ItemKind::Plain
        };

        Ok(ItemDefinition {
            level: self.parent.parse()?,
            data_type: self.data_type.as_deref().map_or(Ok(DataType::Text), str::parse::<DataType>)?,
            padding: self.padding.as_deref().map(str::parse::<Padding>).transpose()?,
            trim: self.trim.as_deref().map_or(Ok(Trim::All), str::parse::<Trim>)?,
            record_types: self
                .record_types
                .as_deref()
                .map(|types| split_list(types).into_iter().collect()),
            id: self.id,
            number: self.number,
            name: self.name,
            start_column: self.start_column,
            length: self.length,
            regex: self.regex.filter(|r| !r.is_empty()),
            allow_unlimited_text: self.allow_unlimited_text.unwrap_or(false),
            kind,
        })
    }
}

impl DictionaryXml {
    fn into_dictionary(self) -> Result<Dictionary> {
        let mut builder = Dictionary::builder(self.uri);
        builder.naaccr_version = self.naaccr_version;
        builder.specification_version = self.specification_version;
        builder.description = self.description;
        builder.date_last_modified = self.date_last_modified;
        for item in self.item_defs.items {
            builder = builder.item(item.into_definition(false)?);
        }
        for item in self.grouped_item_defs.items {
            builder = builder.item(item.into_definition(true)?);
        }
        builder.build()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
