//! Streaming reader for NAACCR XML.
//!
//! The root element is read when the reader is created; [`read_patient`]
//! then returns one fully built [`Patient`] per call. Element dispatch is done
//! on the tag name of every start event: `Item`, `Patient` and `Tumor` at the
//! places the format allows them, anything else is an extension.
//!
//! ```
//! use naaccr::{Dictionary, FormatRegistry, ItemDefinition, ItemLevel, NaaccrOptions, PatientXmlReader};
//!
//! # fn main() -> naaccr::Result<()> {
//! let base = Dictionary::builder("http://example.org/base-180.xml")
//!     .naaccr_version("180")
//!     .item(ItemDefinition::new("patientIdNumber", 20, ItemLevel::Patient, 8))
//!     .build()?;
//! let registry = FormatRegistry::standard().with_base_dictionary(base)?;
//!
//! let xml = r#"<NaaccrData baseDictionaryUri="http://example.org/base-180.xml" recordType="I">
//!   <Patient><Item naaccrId="patientIdNumber">00000001</Item></Patient>
//! </NaaccrData>"#;
//! let mut reader = PatientXmlReader::new(xml.as_bytes(), &registry, &[], NaaccrOptions::default())?;
//! let patient = reader.read_patient()?.expect("one patient");
//! assert_eq!(patient.items[0].value, "00000001");
//! assert!(reader.read_patient()?.is_none());
//! # Ok(())
//! # }
//! ```
//!
//! [`read_patient`]: PatientXmlReader::read_patient

use crate::builder::{EntityBuilder, ItemScope, RawItem};
use crate::dictionary::{Dictionary, ItemLevel};
use crate::entity::{NaaccrData, Patient, Tumor};
use crate::error::{NaaccrError, Result};
use crate::format::{FormatRegistry, SUPPORTED_SPECIFICATION_VERSIONS};
use crate::options::NaaccrOptions;
use crate::runtime::RuntimeDictionary;
use crate::stream::PatientReader;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::fmt;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) const ROOT_TAG: &str = "NaaccrData";
pub(crate) const PATIENT_TAG: &str = "Patient";
pub(crate) const TUMOR_TAG: &str = "Tumor";

/// Specification version assumed when the root does not declare one.
pub const DEFAULT_SPECIFICATION_VERSION: &str = "1.0";

/// Element kinds the reader dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Root,
    Patient,
    Tumor,
    Item,
    Extension,
}

impl Tag {
    fn of(start: &BytesStart<'_>) -> Self {
        match start.name().as_ref() {
            b"NaaccrData" => Tag::Root,
            b"Patient" => Tag::Patient,
            b"Tumor" => Tag::Tumor,
            b"Item" => Tag::Item,
            _ => Tag::Extension,
        }
    }
}

/// Streaming NAACCR XML reader.
pub struct PatientXmlReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    line: usize,
    dictionary: Arc<RuntimeDictionary>,
    options: NaaccrOptions,
    root: NaaccrData,
    root_scope: ItemScope,
    pending_patient: Option<usize>,
    finished: bool,
    patients_read: usize,
}

impl<R: BufRead> PatientXmlReader<R> {
    /// Create a reader and consume the root element, its items and extensions.
    ///
    /// `user_dictionaries` must contain every user dictionary the document
    /// references, except the default user dictionary of its version.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not start with a valid
    /// `NaaccrData` element, references an unknown dictionary, or if the runtime
    /// dictionary cannot be resolved.
    pub fn new(
        reader: R,
        registry: &FormatRegistry,
        user_dictionaries: &[Dictionary],
        options: NaaccrOptions,
    ) -> Result<Self> {
        let mut reader = Reader::from_reader(reader);
        reader.trim_text(false);
        reader.expand_empty_elements(true);

        let mut buf = Vec::new();
        let mut line = 1;
        let (start, root_line) = find_root(&mut reader, &mut buf, &mut line)?;
        let root = parse_root_attributes(&start, root_line)?;
        let dictionary = registry.resolve_root(&root, user_dictionaries)?;
        debug!(
            base = %root.base_dictionary_uri,
            record_type = %root.record_type,
            items = dictionary.len(),
            "reading NAACCR XML"
        );

        let mut this = PatientXmlReader {
            reader,
            buf,
            line,
            dictionary,
            options,
            root,
            root_scope: ItemScope::new(),
            pending_patient: None,
            finished: false,
            patients_read: 0,
        };
        this.read_root_content()?;
        Ok(this)
    }

    /// Root data read from the document header.
    #[must_use]
    pub fn root_data(&self) -> &NaaccrData {
        &self.root
    }

    /// Runtime dictionary the document is read with.
    #[must_use]
    pub fn dictionary(&self) -> &RuntimeDictionary {
        &self.dictionary
    }

    /// Current line in the source.
    #[must_use]
    pub fn line_number(&self) -> usize {
        self.line
    }

    /// Read the next patient, or `None` at the end of the document.
    ///
    /// # Errors
    ///
    /// Returns a syntax error if the document is not well-formed or the patient
    /// breaks the structure rules of the format.
    pub fn read_patient(&mut self) -> Result<Option<Patient>> {
        if self.finished {
            return Ok(None);
        }
        let start_line = match self.pending_patient.take() {
            Some(line) => line,
            None => match self.seek_patient()? {
                Some(line) => line,
                None => return Ok(None),
            },
        };

        let mut patient = Patient::new();
        patient.start_line_number = Some(start_line);
        let mut scope = ItemScope::new();

        loop {
            let (event, line) = self.next_event()?;
            match event {
                Event::Start(start) => match Tag::of(&start) {
                    Tag::Item => {
                        let (id, number) = parse_item_attributes(&start, line)?;
                        let value = self.read_item_value(line)?;
                        let builder = EntityBuilder::new(&self.dictionary, &self.options);
                        builder.add_item(
                            &mut patient,
                            ItemLevel::Patient,
                            &mut scope,
                            RawItem {
                                id: &id,
                                number,
                                value: &value,
                                line: Some(line),
                            },
                        )?;
                    },
                    Tag::Tumor => {
                        ensure_no_attributes(&start, TUMOR_TAG, line)?;
                        scope.mark_child();
                        let tumor = self.read_tumor(line)?;
                        patient.add_tumor(tumor);
                    },
                    Tag::Patient | Tag::Root => {
                        return Err(unexpected_element(&start, PATIENT_TAG, line));
                    },
                    Tag::Extension => {
                        scope.mark_extension();
                        if let Some(extension) = self.read_extension(start, line)? {
                            patient.extensions.push(extension);
                        }
                    },
                },
                Event::End(_) => {
                    patient.end_line_number = Some(line);
                    break;
                },
                Event::Text(text) if !is_blank(&text) => {
                    return Err(NaaccrError::syntax(
                        "unexpected text in Patient element",
                        Some(line),
                    ));
                },
                Event::Eof => {
                    return Err(NaaccrError::syntax(
                        "unexpected end of document inside a Patient element",
                        Some(line),
                    ));
                },
                _ => {},
            }
        }

        self.patients_read += 1;
        Ok(Some(patient))
    }

    fn next_event(&mut self) -> Result<(Event<'static>, usize)> {
        next_event(&mut self.reader, &mut self.buf, &mut self.line)
    }

    /// Read root items and extensions up to the first patient or the end of the root.
    fn read_root_content(&mut self) -> Result<()> {
        loop {
            let (event, line) = self.next_event()?;
            match event {
                Event::Start(start) => match Tag::of(&start) {
                    Tag::Item => {
                        let (id, number) = parse_item_attributes(&start, line)?;
                        let value = self.read_item_value(line)?;
                        let builder = EntityBuilder::new(&self.dictionary, &self.options);
                        builder.add_item(
                            &mut self.root,
                            ItemLevel::Root,
                            &mut self.root_scope,
                            RawItem {
                                id: &id,
                                number,
                                value: &value,
                                line: Some(line),
                            },
                        )?;
                    },
                    Tag::Patient => {
                        ensure_no_attributes(&start, PATIENT_TAG, line)?;
                        self.root_scope.mark_child();
                        self.pending_patient = Some(line);
                        return Ok(());
                    },
                    Tag::Tumor | Tag::Root => {
                        return Err(unexpected_element(&start, ROOT_TAG, line));
                    },
                    Tag::Extension => {
                        self.root_scope.mark_extension();
                        if let Some(extension) = self.read_extension(start, line)? {
                            self.root.extensions.push(extension);
                        }
                    },
                },
                Event::End(_) => return self.finish_document(),
                Event::Text(text) if !is_blank(&text) => {
                    return Err(NaaccrError::syntax(
                        "unexpected text in NaaccrData element",
                        Some(line),
                    ));
                },
                Event::Eof => {
                    return Err(NaaccrError::syntax(
                        "unexpected end of document inside the NaaccrData element",
                        Some(line),
                    ));
                },
                _ => {},
            }
        }
    }

    /// Find the next `Patient` start tag, or the end of the root.
    fn seek_patient(&mut self) -> Result<Option<usize>> {
        loop {
            let (event, line) = self.next_event()?;
            match event {
                Event::Start(start) => {
                    if Tag::of(&start) == Tag::Patient {
                        ensure_no_attributes(&start, PATIENT_TAG, line)?;
                        return Ok(Some(line));
                    }
                    return Err(NaaccrError::syntax(
                        format!(
                            "unexpected element '{}' after the first Patient",
                            String::from_utf8_lossy(start.name().as_ref())
                        ),
                        Some(line),
                    ));
                },
                Event::End(_) => {
                    self.finish_document()?;
                    return Ok(None);
                },
                Event::Text(text) if !is_blank(&text) => {
                    return Err(NaaccrError::syntax(
                        "unexpected text in NaaccrData element",
                        Some(line),
                    ));
                },
                Event::Eof => {
                    return Err(NaaccrError::syntax(
                        "unexpected end of document inside the NaaccrData element",
                        Some(line),
                    ));
                },
                _ => {},
            }
        }
    }

    /// Consume what follows the root end tag; only blanks and comments are allowed.
    fn finish_document(&mut self) -> Result<()> {
        self.finished = true;
        loop {
            let (event, line) = self.next_event()?;
            match event {
                Event::Eof => return Ok(()),
                Event::Start(_) => {
                    return Err(NaaccrError::syntax(
                        "unexpected element after the root element",
                        Some(line),
                    ));
                },
                Event::Text(text) if !is_blank(&text) => {
                    return Err(NaaccrError::syntax(
                        "unexpected text after the root element",
                        Some(line),
                    ));
                },
                _ => {},
            }
        }
    }

    fn read_tumor(&mut self, start_line: usize) -> Result<Tumor> {
        let mut tumor = Tumor::new();
        tumor.start_line_number = Some(start_line);
        let mut scope = ItemScope::new();

        loop {
            let (event, line) = self.next_event()?;
            match event {
                Event::Start(start) => match Tag::of(&start) {
                    Tag::Item => {
                        let (id, number) = parse_item_attributes(&start, line)?;
                        let value = self.read_item_value(line)?;
                        let builder = EntityBuilder::new(&self.dictionary, &self.options);
                        builder.add_item(
                            &mut tumor,
                            ItemLevel::Tumor,
                            &mut scope,
                            RawItem {
                                id: &id,
                                number,
                                value: &value,
                                line: Some(line),
                            },
                        )?;
                    },
                    Tag::Tumor | Tag::Patient | Tag::Root => {
                        return Err(unexpected_element(&start, TUMOR_TAG, line));
                    },
                    Tag::Extension => {
                        scope.mark_extension();
                        if let Some(extension) = self.read_extension(start, line)? {
                            tumor.extensions.push(extension);
                        }
                    },
                },
                Event::End(_) => {
                    tumor.end_line_number = Some(line);
                    return Ok(tumor);
                },
                Event::Text(text) if !is_blank(&text) => {
                    return Err(NaaccrError::syntax(
                        "unexpected text in Tumor element",
                        Some(line),
                    ));
                },
                Event::Eof => {
                    return Err(NaaccrError::syntax(
                        "unexpected end of document inside a Tumor element",
                        Some(line),
                    ));
                },
                _ => {},
            }
        }
    }

    /// Read the text content of an `Item` up to its end tag.
    fn read_item_value(&mut self, start_line: usize) -> Result<String> {
        let mut value = String::new();
        loop {
            let (event, line) = self.next_event()?;
            match event {
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| NaaccrError::syntax(format!("invalid item value: {e}"), Some(line)))?;
                    value.push_str(&text);
                },
                Event::CData(data) => {
                    let data = std::str::from_utf8(&data).map_err(|e| {
                        NaaccrError::syntax(format!("invalid item value: {e}"), Some(line))
                    })?;
                    value.push_str(data);
                },
                Event::End(_) => return Ok(value),
                Event::Start(_) => {
                    return Err(NaaccrError::syntax(
                        "Item elements cannot contain other elements",
                        Some(line),
                    ));
                },
                Event::Eof => {
                    return Err(NaaccrError::syntax(
                        "unexpected end of document inside an Item element",
                        Some(start_line),
                    ));
                },
                _ => {},
            }
        }
    }

    /// Capture an extension sub-tree verbatim, or skip it when extensions are ignored.
    fn read_extension(&mut self, start: BytesStart<'static>, start_line: usize) -> Result<Option<String>> {
        let mut capture = (!self.options.ignore_extensions).then(|| Writer::new(Vec::new()));
        if let Some(writer) = capture.as_mut() {
            writer.write_event(Event::Start(start))?;
        }

        let mut depth = 1usize;
        while depth > 0 {
            let (event, _) = self.next_event()?;
            match &event {
                Event::Start(_) => depth += 1,
                Event::End(_) => depth -= 1,
                Event::Eof => {
                    return Err(NaaccrError::syntax(
                        "unexpected end of document inside an extension",
                        Some(start_line),
                    ));
                },
                _ => {},
            }
            if let Some(writer) = capture.as_mut() {
                writer.write_event(event)?;
            }
        }

        capture
            .map(|writer| {
                String::from_utf8(writer.into_inner()).map_err(|e| {
                    NaaccrError::syntax(format!("extension is not valid UTF-8: {e}"), Some(start_line))
                })
            })
            .transpose()
    }
}

impl<R: BufRead> fmt::Debug for PatientXmlReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatientXmlReader")
            .field("base_dictionary_uri", &self.root.base_dictionary_uri)
            .field("record_type", &self.root.record_type)
            .field("line", &self.line)
            .field("patients_read", &self.patients_read)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<R: BufRead> PatientReader for PatientXmlReader<R> {
    fn read_patient(&mut self) -> Result<Option<Patient>> {
        PatientXmlReader::read_patient(self)
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

/// Skip the prolog and return the root start tag with its line.
fn find_root<R: BufRead>(
    reader: &mut Reader<R>,
    buf: &mut Vec<u8>,
    line: &mut usize,
) -> Result<(BytesStart<'static>, usize)> {
    loop {
        let (event, event_line) = next_event(reader, buf, line)?;
        match event {
            Event::Start(start) => {
                if Tag::of(&start) != Tag::Root {
                    return Err(NaaccrError::syntax(
                        format!(
                            "expected root element '{ROOT_TAG}', found '{}'",
                            String::from_utf8_lossy(start.name().as_ref())
                        ),
                        Some(event_line),
                    ));
                }
                return Ok((start, event_line));
            },
            Event::Text(text) if !is_blank(&text) => {
                return Err(NaaccrError::syntax(
                    "unexpected text before the root element",
                    Some(event_line),
                ));
            },
            Event::Eof => {
                return Err(NaaccrError::syntax(
                    "no NaaccrData root element found",
                    Some(event_line),
                ));
            },
            _ => {},
        }
    }
}

/// Read only the attributes of the root element of a document.
///
/// # Errors
///
/// Returns an error if the document has no valid `NaaccrData` root.
pub fn read_root_attributes<R: BufRead>(input: R) -> Result<NaaccrData> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(false);
    reader.expand_empty_elements(true);
    let mut buf = Vec::new();
    let mut line = 1;
    let (start, root_line) = find_root(&mut reader, &mut buf, &mut line)?;
    parse_root_attributes(&start, root_line)
}

/// Pull the next event, tracking the line it starts on.
fn next_event<R: BufRead>(
    reader: &mut Reader<R>,
    buf: &mut Vec<u8>,
    line: &mut usize,
) -> Result<(Event<'static>, usize)> {
    buf.clear();
    let event_line = *line;
    let event = reader
        .read_event_into(buf)
        .map_err(|e| NaaccrError::syntax(format!("malformed XML: {e}"), Some(event_line)))?
        .into_owned();
    *line += memchr::memchr_iter(b'\n', raw_bytes(&event)).count();
    Ok((event, event_line))
}

fn raw_bytes<'e>(event: &'e Event<'_>) -> &'e [u8] {
    match event {
        Event::Start(e) | Event::Empty(e) => &**e,
        Event::End(e) => &**e,
        Event::Text(e) | Event::Comment(e) | Event::PI(e) | Event::DocType(e) => &**e,
        Event::CData(e) => &**e,
        Event::Decl(e) => &**e,
        Event::Eof => &[],
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

fn attributes(start: &BytesStart<'_>, line: usize) -> Result<Vec<(String, String)>> {
    start
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| {
                NaaccrError::syntax(format!("malformed attribute: {e}"), Some(line))
            })?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| NaaccrError::syntax(format!("malformed attribute: {e}"), Some(line)))?
                .into_owned();
            Ok((key, value))
        })
        .collect()
}

fn ensure_no_attributes(start: &BytesStart<'_>, tag: &str, line: usize) -> Result<()> {
    if start.attributes().next().is_some() {
        return Err(NaaccrError::syntax(
            format!("{tag} elements cannot have attributes"),
            Some(line),
        ));
    }
    Ok(())
}

fn unexpected_element(start: &BytesStart<'_>, parent: &str, line: usize) -> NaaccrError {
    NaaccrError::syntax(
        format!(
            "unexpected element '{}' inside {parent}",
            String::from_utf8_lossy(start.name().as_ref())
        ),
        Some(line),
    )
}

fn parse_item_attributes(start: &BytesStart<'_>, line: usize) -> Result<(String, Option<u32>)> {
    let mut id = None;
    let mut number = None;
    for (key, value) in attributes(start, line)? {
        match key.as_str() {
            "naaccrId" => id = Some(value),
            "naaccrNum" => {
                let parsed = value.trim().parse::<u32>().map_err(|_| {
                    NaaccrError::syntax(format!("invalid naaccrNum '{value}'"), Some(line))
                })?;
                number = Some(parsed);
            },
            other => {
                return Err(NaaccrError::syntax(
                    format!("unexpected attribute '{other}' on Item"),
                    Some(line),
                ));
            },
        }
    }
    let id = id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| NaaccrError::syntax("Item element requires a naaccrId attribute", Some(line)))?;
    Ok((id, number))
}

fn parse_root_attributes(start: &BytesStart<'_>, line: usize) -> Result<NaaccrData> {
    let mut root = NaaccrData::default();
    let mut specification_version = None;
    for (key, value) in attributes(start, line)? {
        match key.as_str() {
            "baseDictionaryUri" => root.base_dictionary_uri = value,
            "userDictionaryUri" => {
                root.user_dictionary_uris = value.split_whitespace().map(str::to_string).collect();
            },
            "recordType" => root.record_type = value,
            "timeGenerated" => root.time_generated = Some(parse_time_generated(&value, line)?),
            "specificationVersion" => specification_version = Some(value),
            other if other == "xmlns" || other.starts_with("xmlns:") => {},
            other => warn!(attribute = other, line, "ignoring unknown NaaccrData attribute"),
        }
    }

    if root.base_dictionary_uri.is_empty() {
        return Err(NaaccrError::syntax(
            "NaaccrData requires a baseDictionaryUri attribute",
            Some(line),
        ));
    }
    if root.record_type.is_empty() {
        return Err(NaaccrError::syntax(
            "NaaccrData requires a recordType attribute",
            Some(line),
        ));
    }

    let specification_version =
        specification_version.unwrap_or_else(|| DEFAULT_SPECIFICATION_VERSION.to_string());
    if !SUPPORTED_SPECIFICATION_VERSIONS.contains(&specification_version.as_str()) {
        return Err(NaaccrError::UnsupportedFormat(format!(
            "unsupported specification version '{specification_version}'"
        )));
    }
    root.specification_version = Some(specification_version);
    Ok(root)
}

/// Parse an ISO-8601 timestamp; values without an offset are taken as UTC.
pub(crate) fn parse_time_generated(value: &str, line: usize) -> Result<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time);
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive).fixed_offset())
        .map_err(|_| NaaccrError::syntax(format!("invalid timeGenerated '{value}'"), Some(line)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{DataType, ItemDefinition};
    use crate::entity::{Entity, ValidationErrorCode};
    use crate::options::UnknownItemHandling;

    const BASE_URI: &str = "http://naaccr.org/naaccrxml/naaccr-dictionary-180.xml";

    fn registry() -> FormatRegistry {
        let base = Dictionary::builder(BASE_URI)
            .naaccr_version("180")
            .item(ItemDefinition::new("registryId", 40, ItemLevel::Root, 10).with_start_column(20))
            .item(ItemDefinition::new("patientIdNumber", 20, ItemLevel::Patient, 8).with_start_column(42))
            .item(
                ItemDefinition::new("sex", 220, ItemLevel::Patient, 1)
                    .with_start_column(30)
                    .with_data_type(DataType::Digits),
            )
            .item(ItemDefinition::new("primarySite", 400, ItemLevel::Tumor, 4).with_start_column(50))
            .build()
            .unwrap();
        FormatRegistry::standard().with_base_dictionary(base).unwrap()
    }

    fn read(xml: &str, options: NaaccrOptions) -> Result<(NaaccrData, Vec<Patient>)> {
        let registry = registry();
        let mut reader = PatientXmlReader::new(xml.as_bytes(), &registry, &[], options)?;
        let patients = reader.read_all()?;
        Ok((reader.root_data().clone(), patients))
    }

    fn document(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<NaaccrData baseDictionaryUri=\"{BASE_URI}\" recordType=\"I\" \
             specificationVersion=\"1.7\" xmlns=\"http://naaccr.org/naaccrxml\">\n{body}\n</NaaccrData>\n"
        )
    }

    #[test]
    fn test_reads_root_patients_and_tumors() {
        let xml = document(
            r#"<Item naaccrId="registryId">0000001234</Item>
<Patient>
    <Item naaccrId="patientIdNumber">00000001</Item>
    <Tumor>
        <Item naaccrId="primarySite">C509</Item>
    </Tumor>
    <Tumor>
        <Item naaccrId="primarySite">C619</Item>
    </Tumor>
</Patient>
<Patient>
    <Item naaccrId="patientIdNumber">00000002</Item>
</Patient>"#,
        );
        let (root, patients) = read(&xml, NaaccrOptions::default()).unwrap();
        assert_eq!(root.item_value("registryId"), Some("0000001234"));
        assert_eq!(root.specification_version.as_deref(), Some("1.7"));
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[0].tumors.len(), 2);
        assert_eq!(patients[0].tumors[1].item_value("primarySite"), Some("C619"));
        assert_eq!(patients[0].start_line_number, Some(4));
        assert_eq!(patients[0].end_line_number, Some(12));
        assert_eq!(patients[0].tumors[0].start_line_number, Some(6));
        assert_eq!(patients[1].item("patientIdNumber").unwrap().line_number, Some(14));
    }

    #[test]
    fn test_empty_document() {
        let (root, patients) = read(&document(""), NaaccrOptions::default()).unwrap();
        assert!(patients.is_empty());
        assert!(root.items.is_empty());
    }

    #[test]
    fn test_missing_base_dictionary_attribute() {
        let err = read("<NaaccrData recordType=\"I\"></NaaccrData>", NaaccrOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("baseDictionaryUri"));
    }

    #[test]
    fn test_unknown_base_dictionary() {
        let xml = "<NaaccrData baseDictionaryUri=\"http://unknown\" recordType=\"I\"></NaaccrData>";
        let err = read(xml, NaaccrOptions::default()).unwrap_err();
        assert!(matches!(err, NaaccrError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_missing_user_dictionary() {
        let xml = format!(
            "<NaaccrData baseDictionaryUri=\"{BASE_URI}\" userDictionaryUri=\"http://mine\" recordType=\"I\"></NaaccrData>"
        );
        let err = read(&xml, NaaccrOptions::default()).unwrap_err();
        assert!(matches!(err, NaaccrError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_item_is_fatal() {
        let xml = document(
            r#"<Patient>
    <Item naaccrId="sex">1</Item>
    <Item naaccrId="sex">2</Item>
</Patient>"#,
        );
        let err = read(&xml, NaaccrOptions::default()).unwrap_err();
        assert_eq!(err.line(), Some(5));
    }

    #[test]
    fn test_patient_attributes_are_fatal() {
        let xml = document("<Patient id=\"1\"></Patient>");
        assert!(read(&xml, NaaccrOptions::default()).is_err());
    }

    #[test]
    fn test_item_after_tumor_is_fatal() {
        let xml = document(
            r#"<Patient>
    <Tumor><Item naaccrId="primarySite">C509</Item></Tumor>
    <Item naaccrId="sex">1</Item>
</Patient>"#,
        );
        let err = read(&xml, NaaccrOptions::default()).unwrap_err();
        assert!(matches!(err, NaaccrError::Syntax { .. }));
    }

    #[test]
    fn test_item_at_wrong_level_is_fatal() {
        let xml = document("<Patient><Item naaccrId=\"primarySite\">C509</Item></Patient>");
        assert!(read(&xml, NaaccrOptions::default()).is_err());
    }

    #[test]
    fn test_validation_errors_are_attached() {
        let xml = document(
            r#"<Patient>
    <Item naaccrId="sex" naaccrNum="221">X</Item>
    <Item naaccrId="unknownThing">1</Item>
</Patient>"#,
        );
        let (_, patients) = read(&xml, NaaccrOptions::default()).unwrap();
        let codes: Vec<_> = patients[0].validation_errors.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                ValidationErrorCode::IdNumberMismatch,
                ValidationErrorCode::BadDataType,
                ValidationErrorCode::UnknownItem
            ]
        );

        let options = NaaccrOptions::default()
            .with_validate_read_values(false)
            .with_unknown_item_handling(UnknownItemHandling::Ignore);
        let (_, patients) = read(&xml, options).unwrap();
        assert!(patients[0].validation_errors.is_empty());
    }

    #[test]
    fn test_extensions_captured_and_ignored() {
        let xml = document(
            r#"<Patient>
    <Item naaccrId="sex">1</Item>
    <other:MyData xmlns:other="http://example.org/other"><other:Value>1 &amp; 2</other:Value></other:MyData>
</Patient>"#,
        );
        let (_, patients) = read(&xml, NaaccrOptions::default()).unwrap();
        assert_eq!(patients[0].extensions.len(), 1);
        assert!(patients[0].extensions[0].starts_with("<other:MyData"));
        assert!(patients[0].extensions[0].contains("1 &amp; 2"));

        let (_, patients) = read(&xml, NaaccrOptions::default().with_ignore_extensions(true)).unwrap();
        assert!(patients[0].extensions.is_empty());
    }

    #[test]
    fn test_item_after_extension_is_fatal() {
        let xml = document(
            r#"<Patient>
    <other:MyData xmlns:other="http://example.org/other"/>
    <Item naaccrId="sex">1</Item>
</Patient>"#,
        );
        assert!(read(&xml, NaaccrOptions::default()).is_err());
    }

    #[test]
    fn test_values_are_unescaped_and_untrimmed() {
        let xml = document("<Patient><Item naaccrId=\"patientIdNumber\"> A&lt;B </Item></Patient>");
        let (_, patients) = read(&xml, NaaccrOptions::default()).unwrap();
        assert_eq!(patients[0].item_value("patientIdNumber"), Some(" A<B "));
    }

    #[test]
    fn test_time_generated() {
        let time = parse_time_generated("2024-05-01T10:20:30-04:00", 1).unwrap();
        assert_eq!(time.offset().local_minus_utc(), -4 * 3600);
        let naive = parse_time_generated("2024-05-01T10:20:30", 1).unwrap();
        assert_eq!(naive.offset().local_minus_utc(), 0);
        assert!(parse_time_generated("yesterday", 1).is_err());
    }

    #[test]
    fn test_unsupported_specification_version() {
        let xml = format!(
            "<NaaccrData baseDictionaryUri=\"{BASE_URI}\" recordType=\"I\" specificationVersion=\"9.9\"></NaaccrData>"
        );
        assert!(matches!(
            read(&xml, NaaccrOptions::default()).unwrap_err(),
            NaaccrError::UnsupportedFormat(_)
        ));
    }
}
