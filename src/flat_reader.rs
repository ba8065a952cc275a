//! Streaming reader for NAACCR flat (fixed-width) files.
//!
//! Each line holds one tumor together with the patient and root values. The
//! format is detected from the first line; consecutive lines sharing the same
//! grouping item values become tumors of one patient.

use crate::builder::EntityBuilder;
use crate::dictionary::{Dictionary, ItemLevel};
use crate::entity::{Entity, NaaccrData, Patient, Tumor, ValidationError, ValidationErrorCode};
use crate::error::{NaaccrError, Result};
use crate::format::{
    FormatRegistry, NaaccrFormat, CURRENT_SPECIFICATION_VERSION, NAACCR_VERSION_COLUMNS,
    RECORD_TYPE_COLUMN,
};
use crate::options::NaaccrOptions;
use crate::rules;
use crate::runtime::{RuntimeDictionary, RuntimeItemDefinition};
use crate::stream::PatientReader;
use std::fmt;
use std::io::BufRead;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// One flat line with character-based slicing.
#[derive(Debug)]
pub(crate) struct FlatLine {
    text: String,
    /// Byte offset of every character plus the end offset; `None` for ASCII lines.
    offsets: Option<Vec<usize>>,
}

impl FlatLine {
    pub(crate) fn new(text: String) -> Self {
        let offsets = (!text.is_ascii()).then(|| {
            text.char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(text.len()))
                .collect()
        });
        FlatLine { text, offsets }
    }

    /// Length in characters.
    pub(crate) fn len(&self) -> usize {
        self.offsets
            .as_ref()
            .map_or(self.text.len(), |offsets| offsets.len() - 1)
    }

    /// Characters in `range`, clipped to the line.
    pub(crate) fn slice(&self, range: Range<usize>) -> &str {
        let len = self.len();
        let start = range.start.min(len);
        let end = range.end.min(len);
        match &self.offsets {
            None => &self.text[start..end],
            Some(offsets) => &self.text[offsets[start]..offsets[end]],
        }
    }
}

/// Streaming flat file reader.
pub struct PatientFlatReader<R: BufRead> {
    reader: R,
    line_number: usize,
    format: NaaccrFormat,
    dictionary: Arc<RuntimeDictionary>,
    options: NaaccrOptions,
    root: NaaccrData,
    pending: Option<(FlatLine, usize)>,
    patients_read: usize,
}

impl<R: BufRead> PatientFlatReader<R> {
    /// Create a reader, detect the format from the first line and read the root items.
    ///
    /// The base dictionary of the detected version must be registered in
    /// `registry`. When `user_dictionaries` is empty, the registered default
    /// user dictionary of that version is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, the first line names an
    /// unsupported format, the record type differs from the one requested in
    /// the options, no base dictionary is registered for the version, or the
    /// runtime dictionary cannot be resolved.
    pub fn new(
        mut reader: R,
        registry: &FormatRegistry,
        user_dictionaries: &[Dictionary],
        options: NaaccrOptions,
    ) -> Result<Self> {
        let mut line_number = 0;
        let (first, first_number) = next_line(&mut reader, &mut line_number)?.ok_or_else(|| {
            NaaccrError::syntax("cannot detect the format of an empty flat file", None)
        })?;

        let format = registry
            .detect_flat_line(first.slice(0..NAACCR_VERSION_COLUMNS.end))
            .map_err(|e| NaaccrError::syntax(e.to_string(), Some(first_number)))?
            .clone();
        if let Some(expected) = options.record_type.as_deref() {
            if expected.trim() != format.record_type().code() {
                return Err(NaaccrError::syntax(
                    format!(
                        "expected record type '{expected}', file contains '{}'",
                        format.record_type()
                    ),
                    Some(first_number),
                ));
            }
        }

        let base = registry
            .base_dictionary_for_version(format.version())
            .ok_or_else(|| {
                NaaccrError::UnsupportedFormat(format!(
                    "no base dictionary registered for NAACCR version '{}'",
                    format.version()
                ))
            })?;
        let dictionary = registry.resolve(format.record_type().code(), base, user_dictionaries)?;
        debug!(
            format = %format.name(),
            items = dictionary.len(),
            "reading NAACCR flat file"
        );

        let mut root = NaaccrData::new(base.uri(), format.record_type().code());
        root.user_dictionary_uris = dictionary.user_dictionary_uris().to_vec();
        root.specification_version = Some(CURRENT_SPECIFICATION_VERSION.to_string());

        let mut this = PatientFlatReader {
            reader,
            line_number,
            format,
            dictionary,
            options,
            root: NaaccrData::default(),
            pending: None,
            patients_read: 0,
        };
        this.read_level(&mut root, ItemLevel::Root, &first, first_number);
        this.root = root;
        this.pending = Some((first, first_number));
        Ok(this)
    }

    /// Root data built from the first line.
    #[must_use]
    pub fn root_data(&self) -> &NaaccrData {
        &self.root
    }

    /// Format detected from the first line.
    #[must_use]
    pub fn format(&self) -> &NaaccrFormat {
        &self.format
    }

    /// Runtime dictionary the file is read with.
    #[must_use]
    pub fn dictionary(&self) -> &RuntimeDictionary {
        &self.dictionary
    }

    /// Number of the last line read.
    #[must_use]
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Read the next patient: the next line and every following line sharing its grouping values.
    ///
    /// # Errors
    ///
    /// Returns a syntax error if a line has a different record type or NAACCR
    /// version than the first line, and an IO error if reading fails.
    pub fn read_patient(&mut self) -> Result<Option<Patient>> {
        let (first, first_number) = match self.pending.take() {
            Some(pending) => pending,
            None => match next_line(&mut self.reader, &mut self.line_number)? {
                Some(line) => line,
                None => return Ok(None),
            },
        };
        self.check_line(&first, first_number)?;

        let mut patient = Patient::new();
        patient.start_line_number = Some(first_number);
        patient.end_line_number = Some(first_number);
        self.check_line_length(&mut patient, &first, first_number);
        self.read_level(&mut patient, ItemLevel::Patient, &first, first_number);
        patient.add_tumor(self.read_tumor(&first, first_number));

        let key = self.grouping_key(&first);
        if key.is_some() {
            while let Some((line, number)) = next_line(&mut self.reader, &mut self.line_number)? {
                if self.grouping_key(&line) != key {
                    self.pending = Some((line, number));
                    break;
                }
                self.check_line(&line, number)?;
                self.check_line_length(&mut patient, &line, number);
                if self.options.report_level_mismatch {
                    self.report_mismatches(&mut patient, &first, &line, number);
                }
                patient.add_tumor(self.read_tumor(&line, number));
                patient.end_line_number = Some(number);
            }
        }

        self.patients_read += 1;
        Ok(Some(patient))
    }

    fn read_tumor(&self, line: &FlatLine, number: usize) -> Tumor {
        let mut tumor = Tumor::new();
        tumor.start_line_number = Some(number);
        tumor.end_line_number = Some(number);
        self.read_level(&mut tumor, ItemLevel::Tumor, line, number);
        tumor
    }

    /// Bind the values of every item of `level` found in the line.
    fn read_level<E: Entity>(&self, entity: &mut E, level: ItemLevel, line: &FlatLine, number: usize) {
        let builder = EntityBuilder::new(&self.dictionary, &self.options);
        for definition in self.dictionary.items_for_level(level) {
            if let Some(value) = self.flat_value(definition, line) {
                builder.bind_value(entity, definition, value, Some(number));
            }
        }
    }

    /// Trimmed value of an item in the line; `None` when blank or not read from flat lines.
    fn flat_value<'l>(&self, definition: &RuntimeItemDefinition, line: &'l FlatLine) -> Option<&'l str> {
        if definition.is_grouped() || !self.options.include_item(&definition.id) {
            return None;
        }
        let value = rules::apply_trim(line.slice(definition.columns()?), definition.trim);
        (!value.trim().is_empty()).then_some(value)
    }

    /// Values of the grouping items, or `None` when grouping does not apply to this line.
    fn grouping_key(&self, line: &FlatLine) -> Option<Vec<String>> {
        if self.options.tumor_grouping_items.is_empty() {
            return None;
        }
        self.options
            .tumor_grouping_items
            .iter()
            .map(|id| {
                let columns = self.dictionary.item(id)?.columns()?;
                let value = line.slice(columns).trim();
                (!value.is_empty()).then(|| value.to_string())
            })
            .collect()
    }

    fn check_line(&self, line: &FlatLine, number: usize) -> Result<()> {
        let record_type = line.slice(RECORD_TYPE_COLUMN..RECORD_TYPE_COLUMN + 1);
        if record_type != self.format.record_type().code() {
            return Err(NaaccrError::syntax(
                format!(
                    "line has record type '{record_type}' but the file is '{}'",
                    self.format.record_type()
                ),
                Some(number),
            ));
        }
        let version = line.slice(NAACCR_VERSION_COLUMNS);
        if version != self.format.version() {
            return Err(NaaccrError::syntax(
                format!(
                    "line has NAACCR version '{version}' but the file is '{}'",
                    self.format.version()
                ),
                Some(number),
            ));
        }
        Ok(())
    }

    fn check_line_length(&self, patient: &mut Patient, line: &FlatLine, number: usize) {
        let expected = self.format.line_length();
        if line.len() != expected {
            patient.add_validation_error(
                ValidationError::new(
                    ValidationErrorCode::BadLineLength,
                    format!("invalid line length: expected {expected}, got {}", line.len()),
                )
                .with_line(Some(number)),
            );
        }
    }

    /// Report root and patient values of a grouped line that differ from the first line.
    fn report_mismatches(&self, patient: &mut Patient, first: &FlatLine, line: &FlatLine, number: usize) {
        for (level, code) in [
            (ItemLevel::Root, ValidationErrorCode::RootValueMismatch),
            (ItemLevel::Patient, ValidationErrorCode::PatientValueMismatch),
        ] {
            for definition in self.dictionary.items_for_level(level) {
                let expected = self.flat_value(definition, first).map(str::trim).unwrap_or_default();
                let actual = self.flat_value(definition, line).map(str::trim).unwrap_or_default();
                if expected != actual {
                    patient.add_validation_error(
                        ValidationError::new(
                            code,
                            format!(
                                "value of '{}' differs from the first line of the patient: '{expected}' vs '{actual}'",
                                definition.id
                            ),
                        )
                        .with_item(definition.id.as_str(), Some(definition.number))
                        .with_value(actual)
                        .with_line(Some(number)),
                    );
                }
            }
        }
    }
}

/// Read the next non-empty line, without its line terminator.
pub(crate) fn next_line<R: BufRead>(reader: &mut R, line_number: &mut usize) -> Result<Option<(FlatLine, usize)>> {
    loop {
        let mut text = String::new();
        if reader.read_line(&mut text)? == 0 {
            return Ok(None);
        }
        *line_number += 1;
        let trimmed_len = text.trim_end_matches(['\n', '\r']).len();
        text.truncate(trimmed_len);
        if !text.is_empty() {
            return Ok(Some((FlatLine::new(text), *line_number)));
        }
    }
}

impl<R: BufRead> fmt::Debug for PatientFlatReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatientFlatReader")
            .field("format", &self.format.name())
            .field("line_number", &self.line_number)
            .field("patients_read", &self.patients_read)
            .finish_non_exhaustive()
    }
}

impl<R: BufRead> PatientReader for PatientFlatReader<R> {
    fn read_patient(&mut self) -> Result<Option<Patient>> {
        PatientFlatReader::read_patient(self)
    }

    fn root_data(&self) -> &NaaccrData {
        &self.root
    }

    fn dictionary(&self) -> &RuntimeDictionary {
        &self.dictionary
    }

    fn patients_read(&self) -> usize {
        self.patients_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{DataType, ItemDefinition, Trim};

    const LINE_LENGTH: usize = 4048;

    fn registry() -> FormatRegistry {
        let base = Dictionary::builder("http://naaccr.org/naaccrxml/naaccr-dictionary-180.xml")
            .naaccr_version("180")
            .item(ItemDefinition::new("recordType", 10, ItemLevel::Root, 1).with_start_column(1))
            .item(ItemDefinition::new("naaccrRecordVersion", 50, ItemLevel::Root, 3).with_start_column(17))
            .item(ItemDefinition::new("registryId", 40, ItemLevel::Root, 10).with_start_column(20))
            .item(
                ItemDefinition::new("sex", 220, ItemLevel::Patient, 1)
                    .with_start_column(30)
                    .with_data_type(DataType::Digits),
            )
            .item(ItemDefinition::new("patientIdNumber", 20, ItemLevel::Patient, 8).with_start_column(42))
            .item(ItemDefinition::new("primarySite", 400, ItemLevel::Tumor, 4).with_start_column(50))
            .item(
                ItemDefinition::new("textRemarks", 2680, ItemLevel::Tumor, 6)
                    .with_start_column(60)
                    .with_trim(Trim::None),
            )
            .build()
            .unwrap();
        FormatRegistry::standard().with_base_dictionary(base).unwrap()
    }

    fn line(fields: &[(usize, &str)]) -> String {
        let mut chars = vec![' '; LINE_LENGTH];
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

    fn read_all(content: &str, options: NaaccrOptions) -> Result<(NaaccrData, Vec<Patient>)> {
        let registry = registry();
        let mut reader = PatientFlatReader::new(content.as_bytes(), &registry, &[], options)?;
        let patients = reader.read_all()?;
        Ok((reader.root_data().clone(), patients))
    }

    #[test]
    fn test_groups_consecutive_lines() {
        let content = [
            line(&[(20, "0000001234"), (30, "1"), (42, "00000001"), (50, "C509")]),
            line(&[(20, "0000001234"), (30, "1"), (42, "00000001"), (50, "C619")]),
            line(&[(20, "0000001234"), (30, "2"), (42, "00000002"), (50, "C180")]),
        ]
        .join("\n");
        let (root, patients) = read_all(&content, NaaccrOptions::default()).unwrap();
        assert_eq!(root.item_value("registryId"), Some("0000001234"));
        assert_eq!(root.record_type, "I");
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[0].tumors.len(), 2);
        assert_eq!(patients[0].start_line_number, Some(1));
        assert_eq!(patients[0].end_line_number, Some(2));
        assert_eq!(patients[0].tumors[1].item_value("primarySite"), Some("C619"));
        assert_eq!(patients[1].item_value("sex"), Some("2"));
        assert!(patients.iter().all(|p| p.validation_errors.is_empty()));
    }

    #[test]
    fn test_grouping_disabled_or_blank() {
        let content = [
            line(&[(30, "1"), (50, "C509")]),
            line(&[(30, "1"), (50, "C619")]),
        ]
        .join("\n");
        let (_, patients) = read_all(&content, NaaccrOptions::default()).unwrap();
        assert_eq!(patients.len(), 2);

        let content = [
            line(&[(42, "00000001"), (50, "C509")]),
            line(&[(42, "00000001"), (50, "C619")]),
        ]
        .join("\n");
        let options = NaaccrOptions::default().with_tumor_grouping_items(&[]);
        let (_, patients) = read_all(&content, options).unwrap();
        assert_eq!(patients.len(), 2);
    }

    #[test]
    fn test_level_mismatch_reported() {
        let content = [
            line(&[(30, "1"), (42, "00000001"), (50, "C509")]),
            line(&[(30, "2"), (42, "00000001"), (50, "C619")]),
            line(&[(30, "2"), (42, "00000001"), (50, "C619")]),
        ]
        .join("\n");
        let options = NaaccrOptions::default().with_report_level_mismatch(true);
        let (_, patients) = read_all(&content, options).unwrap();
        assert_eq!(patients.len(), 1);
        let mismatches: Vec<_> = patients[0]
            .validation_errors
            .iter()
            .filter(|e| e.code == ValidationErrorCode::PatientValueMismatch)
            .collect();
        assert_eq!(mismatches.len(), 2);
        assert_eq!(mismatches[0].naaccr_id.as_deref(), Some("sex"));
        assert_eq!(mismatches[0].line_number, Some(2));

        let (_, patients) = read_all(&content, NaaccrOptions::default()).unwrap();
        assert!(patients[0].validation_errors.is_empty());
    }

    #[test]
    fn test_root_mismatch_reported() {
        let content = [
            line(&[(20, "0000000001"), (42, "00000001")]),
            line(&[(20, "0000000002"), (42, "00000001")]),
        ]
        .join("\n");
        let options = NaaccrOptions::default().with_report_level_mismatch(true);
        let (_, patients) = read_all(&content, options).unwrap();
        assert_eq!(
            patients[0].validation_errors[0].code,
            ValidationErrorCode::RootValueMismatch
        );
    }

    #[test]
    fn test_bad_line_length() {
        let mut short = line(&[(42, "00000001")]);
        short.truncate(100);
        let (_, patients) = read_all(&short, NaaccrOptions::default()).unwrap();
        assert_eq!(
            patients[0].validation_errors[0].code,
            ValidationErrorCode::BadLineLength
        );
        assert_eq!(patients[0].item_value("patientIdNumber"), Some("00000001"));
    }

    #[test]
    fn test_inconsistent_record_type_is_fatal() {
        let second = line(&[(42, "00000002")]).replacen('I', "A", 1);
        let content = [line(&[(42, "00000001")]), second].join("\r\n");
        let err = read_all(&content, NaaccrOptions::default()).unwrap_err();
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_expected_record_type() {
        let content = line(&[(42, "00000001")]);
        let options = NaaccrOptions::default().with_record_type("A");
        assert!(read_all(&content, options).is_err());
    }

    #[test]
    fn test_empty_file() {
        let err = read_all("", NaaccrOptions::default()).unwrap_err();
        assert!(matches!(err, NaaccrError::Syntax { .. }));
    }

    #[test]
    fn test_trim_rules_and_validation() {
        let content = line(&[(30, "X"), (42, "00000001"), (60, "  ab")]);
        let (_, patients) = read_all(&content, NaaccrOptions::default()).unwrap();
        let tumor = &patients[0].tumors[0];
        assert_eq!(tumor.item_value("textRemarks"), Some("  ab  "));
        assert_eq!(
            patients[0].validation_errors[0].code,
            ValidationErrorCode::BadDataType
        );
    }

    #[test]
    fn test_non_ascii_slicing() {
        let line = FlatLine::new("aé€bc".to_string());
        assert_eq!(line.len(), 5);
        assert_eq!(line.slice(1..3), "é€");
        assert_eq!(line.slice(3..10), "bc");
        assert_eq!(line.slice(7..9), "");
    }
}
