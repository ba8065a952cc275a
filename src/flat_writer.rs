//! Streaming writer for NAACCR flat (fixed-width) files.
//!
//! One line is written per tumor, or a single line for a patient without
//! tumors. Every line carries the root and patient values; the record type and
//! NAACCR version columns always come from the format.

use crate::dictionary::{Dictionary, ItemLevel};
use crate::entity::{Item, NaaccrData, Patient, ValidationError};
use crate::error::{NaaccrError, Result};
use crate::format::{FormatRegistry, NaaccrFormat, NAACCR_VERSION_COLUMNS, RECORD_TYPE_COLUMN};
use crate::options::{NaaccrOptions, UnknownItemHandling};
use crate::rules;
use crate::runtime::RuntimeDictionary;
use crate::stream::PatientWriter;
use std::fmt;
use std::io::Write;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// A value ready to be placed at its columns.
#[derive(Debug, Clone)]
struct Placement {
    columns: Range<usize>,
    value: Vec<char>,
    grouped: bool,
}

/// Streaming flat file writer.
pub struct PatientFlatWriter<W: Write> {
    writer: W,
    format: NaaccrFormat,
    dictionary: Arc<RuntimeDictionary>,
    options: NaaccrOptions,
    root_placements: Vec<Placement>,
    header_errors: Vec<ValidationError>,
    patients_written: usize,
    finished: bool,
}

impl<W: Write> PatientFlatWriter<W> {
    /// Create a writer for the format of `root`.
    ///
    /// The NAACCR version comes from the base dictionary named by `root`; the
    /// record type from `root`, or from the options when the root has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the base dictionary is not registered, the format is
    /// not supported, the runtime dictionary cannot be resolved, or a root item
    /// cannot be written.
    pub fn new(
        writer: W,
        root: &NaaccrData,
        registry: &FormatRegistry,
        user_dictionaries: &[Dictionary],
        options: NaaccrOptions,
    ) -> Result<Self> {
        let mut header = root.header();
        if header.record_type.is_empty() {
            header.record_type = options.record_type.clone().unwrap_or_default();
        }
        let dictionary = registry.resolve_root(&header, user_dictionaries)?;
        let format = registry
            .format(dictionary.naaccr_version(), dictionary.record_type())
            .ok_or_else(|| {
                NaaccrError::UnsupportedFormat(format!(
                    "no flat format for NAACCR version '{}' and record type '{}'",
                    dictionary.naaccr_version(),
                    dictionary.record_type()
                ))
            })?
            .clone();
        debug!(format = %format.name(), "writing NAACCR flat file");

        let mut this = PatientFlatWriter {
            writer,
            format,
            dictionary,
            options,
            root_placements: Vec::new(),
            header_errors: Vec::new(),
            patients_written: 0,
            finished: false,
        };
        let mut errors = Vec::new();
        this.root_placements = this.place_items(&header.items, ItemLevel::Root, &mut errors)?;
        this.header_errors = errors;
        Ok(this)
    }

    /// Format the file is written in.
    #[must_use]
    pub fn format(&self) -> &NaaccrFormat {
        &self.format
    }

    /// Validation errors found while preparing the root items.
    #[must_use]
    pub fn header_validation_errors(&self) -> &[ValidationError] {
        &self.header_errors
    }

    /// Write the lines of one patient.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer is finished, an item is unknown while
    /// unknown items are an error, an item is attached to the wrong level, or
    /// writing fails.
    pub fn write_patient(&mut self, patient: &Patient) -> Result<Vec<ValidationError>> {
        if self.finished {
            return Err(NaaccrError::Configuration(
                "cannot write a patient after finish".to_string(),
            ));
        }
        let mut errors = Vec::new();
        let patient_placements = self.place_items(&patient.items, ItemLevel::Patient, &mut errors)?;

        if patient.tumors.is_empty() {
            let line = self.render_line(&[self.root_placements.as_slice(), patient_placements.as_slice()]);
            self.write_line(&line)?;
        }
        for tumor in &patient.tumors {
            let tumor_placements = self.place_items(&tumor.items, ItemLevel::Tumor, &mut errors)?;
            let line = self.render_line(&[
                self.root_placements.as_slice(),
                patient_placements.as_slice(),
                tumor_placements.as_slice(),
            ]);
            self.write_line(&line)?;
        }

        self.patients_written += 1;
        Ok(errors)
    }

    /// Flush the output. Calling `finish` more than once has no effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn finish(&mut self) -> Result<()> {
        if !self.finished {
            self.finished = true;
            self.writer.flush()?;
        }
        Ok(())
    }

    /// Finish and return the underlying output.
    ///
    /// # Errors
    ///
    /// Returns an error if [`finish`](Self::finish) fails.
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.writer)
    }

    /// Run the write rules on the items of one entity and compute their columns.
    fn place_items(
        &self,
        items: &[Item],
        level: ItemLevel,
        errors: &mut Vec<ValidationError>,
    ) -> Result<Vec<Placement>> {
        let mut placements = Vec::with_capacity(items.len());
        for item in items {
            if item.value.is_empty() || !self.options.include_item(&item.id) {
                continue;
            }
            let Some(definition) = self.dictionary.item(&item.id) else {
                if self.options.unknown_item_handling == UnknownItemHandling::Error {
                    return Err(NaaccrError::syntax(
                        format!("unknown item '{}' cannot be written", item.id),
                        item.line_number,
                    ));
                }
                continue;
            };
            if definition.level != level {
                return Err(NaaccrError::syntax(
                    format!(
                        "item '{}' belongs to the {} level but is attached to {level}",
                        item.id, definition.level
                    ),
                    item.line_number,
                ));
            }
            let Some(columns) = definition.columns() else {
                continue;
            };

            let (value, item_errors) =
                rules::prepare_value_for_writing(&item.value, definition, &self.options);
            errors.extend(item_errors.into_iter().map(|e| e.with_line(item.line_number)));
            placements.push(Placement {
                value: value
                    .chars()
                    .map(|c| if c == '\n' || c == '\t' { ' ' } else { c })
                    .take(columns.len())
                    .collect(),
                columns,
                grouped: definition.is_grouped(),
            });
        }
        // grouped values first so their sub-items overwrite them
        placements.sort_by_key(|p| !p.grouped);
        Ok(placements)
    }

    fn render_line(&self, levels: &[&[Placement]]) -> String {
        let mut line = vec![' '; self.format.line_length()];
        for placement in levels.iter().flat_map(|level| level.iter()) {
            for (offset, c) in placement.value.iter().enumerate() {
                if let Some(slot) = line.get_mut(placement.columns.start + offset) {
                    *slot = *c;
                }
            }
        }

        if let Some(slot) = line.get_mut(RECORD_TYPE_COLUMN) {
            if let Some(c) = self.format.record_type().code().chars().next() {
                *slot = c;
            }
        }
        // custom formats may be shorter than the version columns
        let version_end = NAACCR_VERSION_COLUMNS.end.min(line.len());
        let version_start = NAACCR_VERSION_COLUMNS.start.min(version_end);
        for (slot, c) in line[version_start..version_end]
            .iter_mut()
            .zip(self.format.version().chars())
        {
            *slot = c;
        }
        line.into_iter().collect()
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> fmt::Debug for PatientFlatWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatientFlatWriter")
            .field("format", &self.format.name())
            .field("patients_written", &self.patients_written)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<W: Write> PatientWriter for PatientFlatWriter<W> {
    fn write_patient(&mut self, patient: &Patient) -> Result<Vec<ValidationError>> {
        PatientFlatWriter::write_patient(self, patient)
    }

    fn finish(&mut self) -> Result<()> {
        PatientFlatWriter::finish(self)
    }

    fn patients_written(&self) -> usize {
        self.patients_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{ItemDefinition, Padding};
    use crate::entity::{Entity, Tumor, ValidationErrorCode};
    use crate::flat_reader::PatientFlatReader;
    use crate::stream::PatientReader;

    const BASE_URI: &str = "http://naaccr.org/naaccrxml/naaccr-dictionary-180.xml";

    fn registry() -> FormatRegistry {
        let base = Dictionary::builder(BASE_URI)
            .naaccr_version("180")
            .item(ItemDefinition::new("recordType", 10, ItemLevel::Root, 1).with_start_column(1))
            .item(ItemDefinition::new("naaccrRecordVersion", 50, ItemLevel::Root, 3).with_start_column(17))
            .item(ItemDefinition::new("registryId", 40, ItemLevel::Root, 10).with_start_column(20))
            .item(ItemDefinition::new("patientIdNumber", 20, ItemLevel::Patient, 8).with_start_column(42))
            .item(ItemDefinition::new("primarySite", 400, ItemLevel::Tumor, 4).with_start_column(50))
            .item(
                ItemDefinition::new("sequenceNumber", 380, ItemLevel::Tumor, 2)
                    .with_start_column(54)
                    .with_padding(Padding::LeftZero),
            )
            .item(ItemDefinition::new("dateOfDiagnosisYear", 391, ItemLevel::Tumor, 4).with_start_column(60))
            .item(ItemDefinition::new("dateOfDiagnosisMonth", 392, ItemLevel::Tumor, 2).with_start_column(64))
            .item(
                ItemDefinition::new("dateOfDiagnosis", 390, ItemLevel::Tumor, 6)
                    .with_start_column(60)
                    .grouping(&["dateOfDiagnosisYear", "dateOfDiagnosisMonth"]),
            )
            .item(ItemDefinition::new("textRemarks", 2680, ItemLevel::Tumor, 10).with_start_column(70))
            .build()
            .unwrap();
        FormatRegistry::standard().with_base_dictionary(base).unwrap()
    }

    fn root() -> NaaccrData {
        let mut root = NaaccrData::new(BASE_URI, "I");
        root.add_item(Item::new("registryId", "0000001234"));
        root.add_item(Item::new("recordType", "A"));
        root
    }

    fn write(patients: &[Patient], options: NaaccrOptions) -> Result<String> {
        let registry = registry();
        let mut writer = PatientFlatWriter::new(Vec::new(), &root(), &registry, &[], options)?;
        for patient in patients {
            writer.write_patient(patient)?;
        }
        Ok(String::from_utf8(writer.into_inner()?).unwrap())
    }

    fn patient(tumors: usize) -> Patient {
        let mut patient = Patient::new();
        patient.add_item(Item::new("patientIdNumber", "00000001"));
        for i in 0..tumors {
            let mut tumor = Tumor::new();
            tumor.add_item(Item::new("primarySite", format!("C{i}09")));
            tumor.add_item(Item::new("sequenceNumber", (i + 1).to_string()));
            patient.add_tumor(tumor);
        }
        patient
    }

    #[test]
    fn test_one_line_per_tumor() {
        let output = write(&[patient(2)], NaaccrOptions::default()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.chars().count() == 4048));
        assert_eq!(&lines[0][0..1], "I");
        assert_eq!(&lines[0][16..19], "180");
        assert_eq!(&lines[0][19..29], "0000001234");
        assert_eq!(&lines[0][41..49], "00000001");
        assert_eq!(&lines[0][49..53], "C009");
        assert_eq!(&lines[1][49..53], "C109");
        assert_eq!(&lines[1][53..55], "02");
    }

    #[test]
    fn test_short_custom_format_is_clipped() {
        let registry = registry().with_format(NaaccrFormat::new("180", crate::format::RecordType::Incidence, 10));
        let mut writer =
            PatientFlatWriter::new(Vec::new(), &root(), &registry, &[], NaaccrOptions::default()).unwrap();
        writer.write_patient(&patient(1)).unwrap();
        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(output, "I         \n");
    }

    #[test]
    fn test_patient_without_tumor_writes_one_line() {
        let output = write(&[patient(0)], NaaccrOptions::default()).unwrap();
        assert_eq!(output.lines().count(), 1);
    }

    #[test]
    fn test_grouped_item_overwritten_by_parts() {
        let mut patient = patient(0);
        let mut tumor = Tumor::new();
        tumor.add_item(Item::new("dateOfDiagnosisMonth", "07"));
        tumor.add_item(Item::new("dateOfDiagnosis", "202001"));
        patient.add_tumor(tumor);
        let output = write(&[patient], NaaccrOptions::default()).unwrap();
        assert_eq!(&output[59..65], "202007");
    }

    #[test]
    fn test_control_characters_become_spaces() {
        let mut patient = patient(0);
        let mut tumor = Tumor::new();
        tumor.add_item(Item::new("textRemarks", "a\r\nb\tc"));
        patient.add_tumor(tumor);
        let output = write(&[patient], NaaccrOptions::default()).unwrap();
        assert_eq!(&output[69..79], "a b c     ");
    }

    #[test]
    fn test_truncation_reported() {
        let registry = registry();
        let options = NaaccrOptions::default().with_report_values_too_long(true);
        let mut writer = PatientFlatWriter::new(Vec::new(), &root(), &registry, &[], options).unwrap();
        let mut patient = patient(0);
        patient.set_item_value("patientIdNumber", "123456789");
        let errors = writer.write_patient(&patient).unwrap();
        assert_eq!(errors[0].code, ValidationErrorCode::ValueTooLong);
        let output = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(&output[41..49], "12345678");
    }

    #[test]
    fn test_unknown_item_policies() {
        let mut patient = patient(1);
        patient.add_item(Item::new("mystery", "X"));
        assert!(write(&[patient.clone()], NaaccrOptions::default()).is_err());
        let options = NaaccrOptions::default().with_unknown_item_handling(UnknownItemHandling::Process);
        assert_eq!(write(&[patient], options).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_round_trip_through_reader() {
        let output = write(&[patient(2), patient(1)], NaaccrOptions::default()).unwrap();
        let registry = registry();
        let mut reader =
            PatientFlatReader::new(output.as_bytes(), &registry, &[], NaaccrOptions::default()).unwrap();
        let patients = reader.read_all().unwrap();
        // the two patients share their id, so all lines group together
        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].tumors.len(), 3);
        assert_eq!(patients[0].tumors[2].item_value("sequenceNumber"), Some("01"));
        assert_eq!(reader.root_data().item_value("registryId"), Some("0000001234"));
        assert_eq!(reader.root_data().item_value("recordType"), Some("I"));
    }
}
