mod reader;
mod writer;
pub use self::reader::RecordReader;
pub use self::writer::RecordWriter;

use serde::Deserialize;

pub(crate) const DELIMITER: u8 = b'\n';

/// A record as stored in the log: the encoded JSON value, without
/// its delimiter, and the byte offset at which it starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    offset: u64,
    payload: Vec<u8>,
}

impl Record {
    pub(crate) fn new(offset: u64, payload: Vec<u8>) -> Record {
        Record { offset, payload }
    }

    /// Byte offset of the first byte of the record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Offset right after this record's delimiter, which is where
    /// the following record starts.
    pub fn next_offset(&self) -> u64 {
        self.offset + self.payload.len() as u64 + 1
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the record and returns its encoded payload,
    /// without the delimiter.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Decodes the payload into the caller's type.
    pub fn deserialize<'a, T: Deserialize<'a>>(&'a self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}
