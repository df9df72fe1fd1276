pub mod iso2709;
pub mod marcxml;
pub mod record;

use std::io::BufRead;
use std::path::Path;

use crate::error::CodecError;

pub use iso2709::{encode_record, MarcEncoding, MarcReader, ReaderOptions};
pub use marcxml::{to_marcxml, MarcXmlReader, MarcXmlWriter, XmlOptions};
pub use record::{ControlField, DataField, Record, Subfield};

/// A lazy sequence of records read from one file.
pub trait RecordStream: Iterator<Item = Result<Record, CodecError>> {
    /// Control number of the last record decoded without error.
    fn last_good_id(&self) -> Option<&str>;

    /// Bytes consumed so far, used for progress reporting.
    fn bytes_read(&self) -> u64;
}

impl<R: BufRead> RecordStream for MarcReader<R> {
    fn last_good_id(&self) -> Option<&str> {
        MarcReader::last_good_id(self)
    }

    fn bytes_read(&self) -> u64 {
        MarcReader::bytes_read(self)
    }
}

impl<R: BufRead> RecordStream for MarcXmlReader<R> {
    fn last_good_id(&self) -> Option<&str> {
        MarcXmlReader::last_good_id(self)
    }

    fn bytes_read(&self) -> u64 {
        MarcXmlReader::bytes_read(self)
    }
}

/// Opens a binary MARC file for record-by-record reading.
pub fn open_marc(path: &Path, options: ReaderOptions) -> Result<Box<dyn RecordStream>, CodecError> {
    Ok(Box::new(MarcReader::open(path, options)?))
}

/// Opens a MARCXML file for record-by-record reading.
pub fn open_marcxml(path: &Path) -> Result<Box<dyn RecordStream>, CodecError> {
    Ok(Box::new(MarcXmlReader::open(path)?))
}
