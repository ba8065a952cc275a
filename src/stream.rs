//! Reader and writer traits shared by the XML and flat codecs.
//!
//! Both codecs stream one [`Patient`] at a time. Code that converts or filters
//! records can be written once against these traits:
//!
//! ```ignore
//! use naaccr::{PatientReader, PatientWriter};
//!
//! fn copy<R: PatientReader, W: PatientWriter>(reader: &mut R, writer: &mut W) -> naaccr::Result<usize> {
//!     let mut count = 0;
//!     while let Some(patient) = reader.read_patient()? {
//!         writer.write_patient(&patient)?;
//!         count += 1;
//!     }
//!     writer.finish()?;
//!     Ok(count)
//! }
//! ```

use crate::entity::{NaaccrData, Patient, ValidationError};
use crate::error::Result;
use crate::runtime::RuntimeDictionary;

/// Source of patients.
///
/// `read_patient` returns `Ok(None)` once the source is exhausted.
pub trait PatientReader: std::fmt::Debug {
    /// Read the next patient.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is malformed or reading fails. Problems
    /// with individual values are attached to the patient instead.
    fn read_patient(&mut self) -> Result<Option<Patient>>;

    /// Root data of the source, without patients.
    fn root_data(&self) -> &NaaccrData;

    /// Runtime dictionary the source is interpreted with.
    fn dictionary(&self) -> &RuntimeDictionary;

    /// Read all remaining patients.
    ///
    /// # Errors
    ///
    /// Returns the first error met; patients read before it are discarded.
    fn read_all(&mut self) -> Result<Vec<Patient>> {
        let mut patients = Vec::new();
        while let Some(patient) = self.read_patient()? {
            patients.push(patient);
        }
        Ok(patients)
    }

    /// Number of patients read so far.
    fn patients_read(&self) -> usize;
}

/// Destination of patients.
///
/// [`finish`](Self::finish) must be called once all patients are written.
pub trait PatientWriter: std::fmt::Debug {
    /// Write one patient, returning the validation errors found while writing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the patient cannot be written, for instance because
    /// it carries an unknown item while unknown items are an error.
    fn write_patient(&mut self, patient: &Patient) -> Result<Vec<ValidationError>>;

    /// Flush and close the output.
    ///
    /// # Errors
    ///
    /// Returns an error if the final write or the flush fails.
    fn finish(&mut self) -> Result<()>;

    /// Number of patients written so far.
    fn patients_written(&self) -> usize;
}

/// Iterator-style access to a [`PatientReader`].
pub trait PatientReaderExt: PatientReader {
    /// Iterate over the remaining patients.
    fn patients(&mut self) -> PatientIter<'_, Self>
    where
        Self: Sized,
    {
        PatientIter { reader: self }
    }
}

impl<T: PatientReader> PatientReaderExt for T {}

/// Iterator created by [`PatientReaderExt::patients`].
#[derive(Debug)]
pub struct PatientIter<'a, R: PatientReader> {
    reader: &'a mut R,
}

impl<R: PatientReader> Iterator for PatientIter<'_, R> {
    type Item = Result<Patient>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_patient().transpose()
    }
}

/// Callbacks invoked by the conversion helpers.
pub trait NaaccrObserver {
    /// Called after a patient was read.
    fn patient_read(&mut self, _patient: &Patient) {}

    /// Called after a patient was written.
    fn patient_written(&mut self, _patient: &Patient) {}

    /// Checked between patients; returning `true` stops the conversion.
    fn is_interrupted(&self) -> bool {
        false
    }
}

impl NaaccrObserver for () {}
