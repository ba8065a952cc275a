//! Streaming writer for NAACCR XML.
//!
//! The root start tag, root items and root extensions are written when the
//! writer is created. Each [`write_patient`](PatientXmlWriter::write_patient)
//! call then writes one `Patient` element, and
//! [`finish`](PatientXmlWriter::finish) closes the root.

use crate::dictionary::{Dictionary, ItemLevel};
use crate::entity::{Item, NaaccrData, Patient, ValidationError};
use crate::error::{NaaccrError, Result};
use crate::format::{FormatRegistry, CURRENT_SPECIFICATION_VERSION, NAACCR_XML_NAMESPACE};
use crate::options::{NaaccrOptions, UnknownItemHandling};
use crate::rules;
use crate::runtime::RuntimeDictionary;
use crate::stream::PatientWriter;
use crate::xml_reader::{PATIENT_TAG, ROOT_TAG, TUMOR_TAG};
use chrono::{SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

const INDENT_SIZE: usize = 4;

/// Streaming NAACCR XML writer.
pub struct PatientXmlWriter<W: Write> {
    writer: Writer<W>,
    dictionary: Arc<RuntimeDictionary>,
    options: NaaccrOptions,
    header_errors: Vec<ValidationError>,
    patients_written: usize,
    finished: bool,
}

impl<W: Write> PatientXmlWriter<W> {
    /// Create a writer and write the document header from `root`.
    ///
    /// The record type is taken from `root`, or from the options when the root
    /// does not carry one. The patients of `root` are not written.
    ///
    /// # Errors
    ///
    /// Returns an error if the base dictionary is not registered, a referenced
    /// user dictionary is missing, the runtime dictionary cannot be resolved, or
    /// writing the header fails.
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
        debug!(
            base = %dictionary.base_dictionary_uri(),
            users = ?dictionary.user_dictionary_uris(),
            record_type = %dictionary.record_type(),
            "writing NAACCR XML"
        );

        let mut this = PatientXmlWriter {
            writer: Writer::new_with_indent(writer, b' ', INDENT_SIZE),
            dictionary,
            options,
            header_errors: Vec::new(),
            patients_written: 0,
            finished: false,
        };
        this.write_header(&header)?;
        Ok(this)
    }

    /// Validation errors found while writing the root items.
    #[must_use]
    pub fn header_validation_errors(&self) -> &[ValidationError] {
        &self.header_errors
    }

    /// Runtime dictionary the document is written with.
    #[must_use]
    pub fn dictionary(&self) -> &RuntimeDictionary {
        &self.dictionary
    }

    /// Write one patient with its tumors.
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

        self.writer
            .write_event(Event::Start(BytesStart::new(PATIENT_TAG)))?;
        self.write_items(&patient.items, ItemLevel::Patient, &mut errors)?;
        self.write_extensions(&patient.extensions)?;
        for tumor in &patient.tumors {
            self.writer
                .write_event(Event::Start(BytesStart::new(TUMOR_TAG)))?;
            self.write_items(&tumor.items, ItemLevel::Tumor, &mut errors)?;
            self.write_extensions(&tumor.extensions)?;
            self.writer.write_event(Event::End(BytesEnd::new(TUMOR_TAG)))?;
        }
        self.writer.write_event(Event::End(BytesEnd::new(PATIENT_TAG)))?;

        self.patients_written += 1;
        Ok(errors)
    }

    /// Close the root element and flush the output.
    ///
    /// Calling `finish` more than once has no effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the final write or the flush fails.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.writer.write_event(Event::End(BytesEnd::new(ROOT_TAG)))?;
        let out = self.writer.get_mut();
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }

    /// Finish the document and return the underlying output.
    ///
    /// # Errors
    ///
    /// Returns an error if [`finish`](Self::finish) fails.
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.writer.into_inner())
    }

    fn write_header(&mut self, root: &NaaccrData) -> Result<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let user_uris = self.dictionary.user_dictionary_uris().join(" ");
        let time_generated = root
            .time_generated
            .unwrap_or_else(|| Utc::now().fixed_offset())
            .to_rfc3339_opts(SecondsFormat::Secs, false);
        let specification_version = root
            .specification_version
            .as_deref()
            .unwrap_or(CURRENT_SPECIFICATION_VERSION);

        let mut start = BytesStart::new(ROOT_TAG);
        start.push_attribute(("baseDictionaryUri", self.dictionary.base_dictionary_uri()));
        if !user_uris.is_empty() {
            start.push_attribute(("userDictionaryUri", user_uris.as_str()));
        }
        start.push_attribute(("recordType", root.record_type.as_str()));
        start.push_attribute(("timeGenerated", time_generated.as_str()));
        start.push_attribute(("specificationVersion", specification_version));
        start.push_attribute(("xmlns", NAACCR_XML_NAMESPACE));
        self.writer.write_event(Event::Start(start))?;

        let mut errors = Vec::new();
        self.write_items(&root.items, ItemLevel::Root, &mut errors)?;
        self.header_errors = errors;
        self.write_extensions(&root.extensions)
    }

    fn write_items(
        &mut self,
        items: &[Item],
        level: ItemLevel,
        errors: &mut Vec<ValidationError>,
    ) -> Result<()> {
        let dictionary = Arc::clone(&self.dictionary);
        for item in items {
            if item.value.is_empty() || !self.options.include_item(&item.id) {
                continue;
            }

            let Some(definition) = dictionary.item(&item.id) else {
                match self.options.unknown_item_handling {
                    UnknownItemHandling::Ignore => {},
                    UnknownItemHandling::Error => {
                        return Err(NaaccrError::syntax(
                            format!("unknown item '{}' cannot be written", item.id),
                            item.line_number,
                        ));
                    },
                    UnknownItemHandling::Process => {
                        self.write_item(&item.id, None, &item.value)?;
                    },
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

            let (value, item_errors) =
                rules::prepare_value_for_writing(&item.value, definition, &self.options);
            errors.extend(item_errors.into_iter().map(|e| e.with_line(item.line_number)));
            let number = self.options.write_item_number.then_some(definition.number);
            self.write_item(&definition.id, number, &value)?;
        }
        Ok(())
    }

    fn write_item(&mut self, id: &str, number: Option<u32>, value: &str) -> Result<()> {
        let mut start = BytesStart::new("Item");
        start.push_attribute(("naaccrId", id));
        if let Some(number) = number {
            start.push_attribute(("naaccrNum", number.to_string().as_str()));
        }
        self.writer.write_event(Event::Start(start))?;
        self.writer.write_event(Event::Text(BytesText::new(value)))?;
        self.writer.write_event(Event::End(BytesEnd::new("Item")))?;
        Ok(())
    }

    /// Re-emit captured extension fragments through the writer, dropping
    /// whitespace-only text between their elements.
    fn write_extensions(&mut self, extensions: &[String]) -> Result<()> {
        if self.options.ignore_extensions {
            return Ok(());
        }
        for extension in extensions {
            let mut reader = Reader::from_str(extension);
            reader.trim_text(false);
            loop {
                match reader.read_event()? {
                    Event::Eof => break,
                    // the indenting writer lays the fragment out again
                    Event::Text(text) if text.iter().all(u8::is_ascii_whitespace) => {},
                    event => self.writer.write_event(event)?,
                }
            }
        }
        Ok(())
    }
}

impl<W: Write> fmt::Debug for PatientXmlWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatientXmlWriter")
            .field("base_dictionary_uri", &self.dictionary.base_dictionary_uri())
            .field("record_type", &self.dictionary.record_type())
            .field("patients_written", &self.patients_written)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<W: Write> PatientWriter for PatientXmlWriter<W> {
    fn write_patient(&mut self, patient: &Patient) -> Result<Vec<ValidationError>> {
        PatientXmlWriter::write_patient(self, patient)
    }

    fn finish(&mut self) -> Result<()> {
        PatientXmlWriter::finish(self)
    }

    fn patients_written(&self) -> usize {
        self.patients_written
    }
}
