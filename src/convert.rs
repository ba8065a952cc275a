//! Conversion helpers between the flat and XML representations.
//!
//! The stream functions work on any [`BufRead`]/[`Write`] pair; the file
//! functions open paths themselves and transparently compress or decompress
//! files whose name ends in `.gz`.
//!
//! ```ignore
//! use naaccr::{convert, FormatRegistry, NaaccrOptions};
//!
//! let registry = FormatRegistry::standard().with_base_dictionary(base)?;
//! let summary = convert::flat_file_to_xml_file(
//!     "incidence.txt.gz",
//!     "incidence.xml.gz",
//!     &registry,
//!     &[],
//!     NaaccrOptions::default(),
//!     &mut (),
//! )?;
//! println!("{} patients, {} tumors", summary.patients, summary.tumors);
//! ```

use crate::dictionary::Dictionary;
use crate::entity::NaaccrData;
use crate::error::{NaaccrError, Result};
use crate::flat_reader::{next_line, PatientFlatReader};
use crate::flat_writer::PatientFlatWriter;
use crate::format::{FormatRegistry, NaaccrFormat, RecordType, NAACCR_VERSION_COLUMNS};
use crate::options::NaaccrOptions;
use crate::stream::{NaaccrObserver, PatientReader, PatientWriter};
use crate::xml_reader::{read_root_attributes, PatientXmlReader};
use crate::xml_writer::PatientXmlWriter;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lazy_static::lazy_static;
use regex::Regex;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

lazy_static! {
    static ref BASE_DICTIONARY_VERSION: Regex =
        Regex::new(r"naaccr-dictionary-(\d{3})\.xml$").unwrap();
}

/// Outcome of a conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Patients written to the output.
    pub patients: usize,
    /// Tumors written to the output.
    pub tumors: usize,
    /// Validation errors reported while reading the input.
    pub read_errors: usize,
    /// Validation errors reported while writing the output.
    pub write_errors: usize,
    /// Whether the observer stopped the conversion early.
    pub interrupted: bool,
}

impl ConversionSummary {
    /// Total number of validation errors on both sides.
    #[must_use]
    pub fn validation_errors(&self) -> usize {
        self.read_errors + self.write_errors
    }
}

/// Copy every patient of `reader` into `writer`, then finish the writer.
///
/// The observer is notified after each patient is read and written, and is
/// asked between patients whether the conversion should stop. An interrupted
/// conversion still finishes the writer so the output stays well formed.
///
/// # Errors
///
/// Returns the first fatal error raised by the reader or the writer.
pub fn convert<R, W, O>(reader: &mut R, writer: &mut W, observer: &mut O) -> Result<ConversionSummary>
where
    R: PatientReader + ?Sized,
    W: PatientWriter + ?Sized,
    O: NaaccrObserver + ?Sized,
{
    let mut summary = ConversionSummary {
        read_errors: reader.root_data().validation_errors.len(),
        ..ConversionSummary::default()
    };

    loop {
        if observer.is_interrupted() {
            summary.interrupted = true;
            debug!(patients = summary.patients, "conversion interrupted");
            break;
        }
        let Some(patient) = reader.read_patient()? else {
            break;
        };
        summary.read_errors += patient.all_validation_errors().count();
        observer.patient_read(&patient);

        summary.write_errors += writer.write_patient(&patient)?.len();
        summary.patients += 1;
        summary.tumors += patient.tumors.len();
        observer.patient_written(&patient);
    }
    writer.finish()?;

    info!(
        patients = summary.patients,
        tumors = summary.tumors,
        read_errors = summary.read_errors,
        write_errors = summary.write_errors,
        interrupted = summary.interrupted,
        "conversion complete"
    );
    Ok(summary)
}

/// Convert a flat file stream into a NAACCR XML stream.
///
/// The same options drive both sides of the conversion.
///
/// # Errors
///
/// Returns an error if the input cannot be read, its format is unsupported,
/// or writing the output fails.
pub fn flat_to_xml<R: BufRead, W: Write>(
    input: R,
    output: W,
    registry: &FormatRegistry,
    user_dictionaries: &[Dictionary],
    options: NaaccrOptions,
    observer: &mut dyn NaaccrObserver,
) -> Result<ConversionSummary> {
    flat_to_xml_inner(input, output, registry, user_dictionaries, options, observer)
        .map(|(summary, _)| summary)
}

/// Convert a NAACCR XML stream into a flat file stream.
///
/// # Errors
///
/// Returns an error if the input is malformed, its dictionaries cannot be
/// resolved, or writing the output fails.
pub fn xml_to_flat<R: BufRead, W: Write>(
    input: R,
    output: W,
    registry: &FormatRegistry,
    user_dictionaries: &[Dictionary],
    options: NaaccrOptions,
    observer: &mut dyn NaaccrObserver,
) -> Result<ConversionSummary> {
    xml_to_flat_inner(input, output, registry, user_dictionaries, options, observer)
        .map(|(summary, _)| summary)
}

/// Convert a flat file into a NAACCR XML file.
///
/// Either path may end in `.gz`, in which case it is read or written compressed.
///
/// # Errors
///
/// Returns an error if a file cannot be opened or created, or if the
/// conversion itself fails. A partially written output file is removed.
pub fn flat_file_to_xml_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    registry: &FormatRegistry,
    user_dictionaries: &[Dictionary],
    options: NaaccrOptions,
    observer: &mut dyn NaaccrObserver,
) -> Result<ConversionSummary> {
    let source = open_input(input.as_ref())?;
    let target = OutputFile::create(output.as_ref())?;
    let result = flat_to_xml_inner(source, target, registry, user_dictionaries, options, observer)
        .and_then(|(summary, target)| target.close().map(|()| summary));
    discard_on_error(result, output.as_ref())
}

/// Convert a NAACCR XML file into a flat file.
///
/// Either path may end in `.gz`, in which case it is read or written compressed.
///
/// # Errors
///
/// Returns an error if a file cannot be opened or created, or if the
/// conversion itself fails. A partially written output file is removed.
pub fn xml_file_to_flat_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    registry: &FormatRegistry,
    user_dictionaries: &[Dictionary],
    options: NaaccrOptions,
    observer: &mut dyn NaaccrObserver,
) -> Result<ConversionSummary> {
    let source = open_input(input.as_ref())?;
    let target = OutputFile::create(output.as_ref())?;
    let result = xml_to_flat_inner(source, target, registry, user_dictionaries, options, observer)
        .and_then(|(summary, target)| target.close().map(|()| summary));
    discard_on_error(result, output.as_ref())
}

/// Read a whole XML document into memory.
///
/// Meant for small files; large files should be streamed with
/// [`PatientXmlReader`].
///
/// # Errors
///
/// Returns the first fatal error raised while reading.
pub fn read_xml<R: BufRead>(
    input: R,
    registry: &FormatRegistry,
    user_dictionaries: &[Dictionary],
    options: NaaccrOptions,
) -> Result<NaaccrData> {
    let mut reader = PatientXmlReader::new(input, registry, user_dictionaries, options)?;
    let mut data = reader.root_data().clone();
    data.patients = reader.read_all()?;
    Ok(data)
}

/// Read a whole XML file into memory, decompressing `.gz` files.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or [`read_xml`] fails.
pub fn read_xml_file(
    path: impl AsRef<Path>,
    registry: &FormatRegistry,
    user_dictionaries: &[Dictionary],
    options: NaaccrOptions,
) -> Result<NaaccrData> {
    read_xml(open_input(path.as_ref())?, registry, user_dictionaries, options)
}

/// Detect the format of a flat file from its first non-empty line.
///
/// # Errors
///
/// Returns an error if the input is empty or the line names an unsupported
/// version or record type.
pub fn detect_flat_format<R: BufRead>(mut input: R, registry: &FormatRegistry) -> Result<NaaccrFormat> {
    let mut line_number = 0;
    let (line, number) = next_line(&mut input, &mut line_number)?.ok_or_else(|| {
        NaaccrError::syntax("cannot detect the format of an empty flat file", None)
    })?;
    registry
        .detect_flat_line(line.slice(0..NAACCR_VERSION_COLUMNS.end))
        .map_err(|e| NaaccrError::syntax(e.to_string(), Some(number)))
        .cloned()
}

/// Detect the format of an XML document from the attributes of its root.
///
/// The version comes from the registered base dictionary when there is one,
/// otherwise from the standard dictionary URI pattern
/// (`.../naaccr-dictionary-180.xml`).
///
/// # Errors
///
/// Returns an error if the root is missing or malformed, or if the version or
/// record type it names is not supported.
pub fn detect_xml_format<R: BufRead>(input: R, registry: &FormatRegistry) -> Result<NaaccrFormat> {
    let root = read_root_attributes(input)?;
    let version = match registry.base_dictionary(&root.base_dictionary_uri) {
        Some(base) => base.naaccr_version().map(str::to_string),
        None => BASE_DICTIONARY_VERSION
            .captures(&root.base_dictionary_uri)
            .map(|caps| caps[1].to_string()),
    }
    .ok_or_else(|| {
        NaaccrError::UnsupportedFormat(format!(
            "cannot tell the NAACCR version of base dictionary '{}'",
            root.base_dictionary_uri
        ))
    })?;
    let record_type: RecordType = root.record_type.parse()?;
    registry.format(&version, record_type).cloned().ok_or_else(|| {
        NaaccrError::UnsupportedFormat(format!(
            "unsupported NAACCR version '{version}' for record type '{record_type}'"
        ))
    })
}

fn flat_to_xml_inner<R: BufRead, W: Write>(
    input: R,
    output: W,
    registry: &FormatRegistry,
    user_dictionaries: &[Dictionary],
    options: NaaccrOptions,
    observer: &mut dyn NaaccrObserver,
) -> Result<(ConversionSummary, W)> {
    let mut reader = PatientFlatReader::new(input, registry, user_dictionaries, options.clone())?;
    let root = reader.root_data().clone();
    let mut writer = PatientXmlWriter::new(output, &root, registry, user_dictionaries, options)?;
    let mut summary = convert(&mut reader, &mut writer, observer)?;
    summary.write_errors += writer.header_validation_errors().len();
    Ok((summary, writer.into_inner()?))
}

fn xml_to_flat_inner<R: BufRead, W: Write>(
    input: R,
    output: W,
    registry: &FormatRegistry,
    user_dictionaries: &[Dictionary],
    options: NaaccrOptions,
    observer: &mut dyn NaaccrObserver,
) -> Result<(ConversionSummary, W)> {
    let mut reader = PatientXmlReader::new(input, registry, user_dictionaries, options.clone())?;
    let root = reader.root_data().clone();
    let mut writer = PatientFlatWriter::new(output, &root, registry, user_dictionaries, options)?;
    let mut summary = convert(&mut reader, &mut writer, observer)?;
    summary.write_errors += writer.header_validation_errors().len();
    Ok((summary, writer.into_inner()?))
}

/// Remove the output of a failed conversion so no truncated file is left behind.
fn discard_on_error<T>(result: Result<T>, path: &Path) -> Result<T> {
    if result.is_err() {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed partial output"),
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove partial output"),
        }
    }
    result
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    debug!(path = %path.display(), gzip = is_gzip(path), "opening input");
    Ok(if is_gzip(path) {
        Box::new(BufReader::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Box::new(BufReader::new(file))
    })
}

/// Output file, compressed when its name ends in `.gz`.
enum OutputFile {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputFile {
    fn create(path: &Path) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        debug!(path = %path.display(), gzip = is_gzip(path), "creating output");
        Ok(if is_gzip(path) {
            OutputFile::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            OutputFile::Plain(file)
        })
    }

    /// Write the gzip trailer, if any, and flush the file.
    fn close(self) -> Result<()> {
        let mut file = match self {
            OutputFile::Plain(file) => file,
            OutputFile::Gzip(encoder) => encoder.finish()?,
        };
        file.flush()?;
        Ok(())
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputFile::Plain(file) => file.write(buf),
            OutputFile::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputFile::Plain(file) => file.flush(),
            OutputFile::Gzip(encoder) => encoder.flush(),
        }
    }
}
