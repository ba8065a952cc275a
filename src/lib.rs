#![warn(missing_docs)]

//! # naaccr: NAACCR cancer registry data in Rust
//!
//! A library for reading, writing, validating and converting cancer registry
//! data in the two NAACCR representations: fixed-width flat files and NAACCR
//! XML. Both are interpreted through data dictionaries that describe every
//! item (id, number, level, columns, data type, padding and trimming rules).
//!
//! ## Quick Start
//!
//! ### Reading NAACCR XML
//!
//! ```ignore
//! use naaccr::{Entity, FormatRegistry, NaaccrOptions, PatientXmlReader};
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let base = naaccr::Dictionary::from_reader(File::open("naaccr-dictionary-250.xml")?)?;
//! let registry = FormatRegistry::standard().with_base_dictionary(base)?;
//!
//! let file = BufReader::new(File::open("incidence.xml")?);
//! let mut reader = PatientXmlReader::new(file, &registry, &[], NaaccrOptions::default())?;
//! while let Some(patient) = reader.read_patient()? {
//!     for tumor in &patient.tumors {
//!         println!("{:?}", tumor.item_value("primarySite"));
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Converting a flat file
//!
//! ```ignore
//! use naaccr::{convert, FormatRegistry, NaaccrOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let registry = FormatRegistry::standard();
//! let summary = convert::flat_file_to_xml_file(
//!     "incidence.txt.gz",
//!     "incidence.xml.gz",
//!     &registry,
//!     &[],
//!     NaaccrOptions::default(),
//!     &mut (),
//! )?;
//! println!("{} patients converted", summary.patients);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`dictionary`]: Data dictionaries and item definitions
//! - [`runtime`]: Merged runtime dictionaries and their cache
//! - [`format`]: Supported versions, record types and the format registry
//! - [`entity`]: `NaaccrData`, `Patient`, `Tumor`, `Item` and validation errors
//! - [`options`]: Reading and writing options
//! - [`rules`]: Value padding, truncation and validation rules
//! - [`builder`]: Item binding shared by the readers
//! - [`stream`]: `PatientReader`/`PatientWriter` traits and observers
//! - [`xml_reader`], [`xml_writer`]: NAACCR XML codec
//! - [`flat_reader`], [`flat_writer`]: Fixed-width flat file codec
//! - [`convert`]: Flat/XML conversion helpers and format detection
//! - [`error`]: Error types and result type
//!
//! ## Errors
//!
//! Structural problems abort the current operation with a [`NaaccrError`].
//! Problems with individual values (too long, wrong data type, unknown item)
//! are collected as [`ValidationError`]s on the entity they belong to, or
//! returned by the writers, so a whole file can be processed in one pass.

pub mod builder;
pub mod convert;
pub mod dictionary;
pub mod entity;
pub mod error;
pub mod flat_reader;
pub mod flat_writer;
pub mod format;
pub mod options;
pub mod rules;
pub mod runtime;
pub mod stream;
pub mod xml_reader;
pub mod xml_writer;

pub use convert::{
    detect_flat_format, detect_xml_format, flat_file_to_xml_file, flat_to_xml, read_xml,
    read_xml_file, xml_file_to_flat_file, xml_to_flat, ConversionSummary,
};
pub use dictionary::{
    DataType, Dictionary, DictionaryBuilder, ItemDefinition, ItemKind, ItemLevel, Padding, Trim,
};
pub use entity::{
    Entity, Item, NaaccrData, Patient, Tumor, ValidationError, ValidationErrorCode,
};
pub use error::{NaaccrError, Result};
pub use flat_reader::PatientFlatReader;
pub use flat_writer::PatientFlatWriter;
pub use format::{FormatRegistry, NaaccrFormat, RecordType};
pub use options::{NaaccrOptions, UnknownItemHandling};
pub use runtime::{RuntimeDictionary, RuntimeItemDefinition};
pub use stream::{NaaccrObserver, PatientIter, PatientReader, PatientReaderExt, PatientWriter};
pub use xml_reader::PatientXmlReader;
pub use xml_writer::PatientXmlWriter;
