use std::io::{self, SeekFrom};

use serde::de::IgnoredAny;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncSeek, AsyncSeekExt, BufReader};

use crate::error::ReadRecordError;
use crate::record::{Record, DELIMITER};

pub struct RecordReader<R> {
    reader: BufReader<R>,
    // Offset of the first byte of `line_buffer`.
    offset: u64,
    // Bytes of the record being read. When the data ends before
    // the delimiter, they are kept here so that the next call can
    // resume the record once the writer has completed it.
    line_buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    /// Creates a reader. `offset` is the position of `reader` within the log,
    /// and is only used to report record offsets.
    pub fn open(reader: R, offset: u64) -> Self {
        RecordReader {
            reader: BufReader::new(reader),
            offset,
            line_buffer: Vec::with_capacity(1_024),
        }
    }

    /// Offset of the first byte that has not been consumed as part of a record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` if no data is available. If the data stops in the
    /// middle of a record, `ReadRecordError::IncompleteRecord` is returned
    /// and the partial bytes are retained: calling `read_record` again
    /// after more data has been appended resumes that record.
    ///
    /// Lines containing only whitespace are skipped.
    pub async fn read_record(&mut self) -> Result<Option<Record>, ReadRecordError> {
        loop {
            self.reader
                .read_until(DELIMITER, &mut self.line_buffer)
                .await?;
            if self.line_buffer.last() != Some(&DELIMITER) {
                // We reached the end of the available data.
                if is_blank(&self.line_buffer) {
                    return Ok(None);
                }
                return Err(ReadRecordError::IncompleteRecord {
                    offset: self.offset,
                });
            }
            let record_offset = self.offset;
            self.offset += self.line_buffer.len() as u64;
            let mut payload = std::mem::take(&mut self.line_buffer);
            payload.pop();
            if is_blank(&payload) {
                continue;
            }
            // The offset was moved past the line, so a reader hitting
            // a corrupted record can resume at the next one.
            serde_json::from_slice::<IgnoredAny>(&payload).map_err(|source| {
                ReadRecordError::Corruption {
                    offset: record_offset,
                    source,
                }
            })?;
            return Ok(Some(Record::new(record_offset, payload)));
        }
    }
}

impl<R: AsyncRead + AsyncSeek + Unpin> RecordReader<R> {
    /// Moves the reader to `offset`, dropping any partially read record.
    ///
    /// This assumes the reader was opened with an offset equal to its
    /// position in the underlying stream.
    pub async fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(offset)).await?;
        self.offset = offset;
        self.line_buffer.clear();
        Ok(())
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}
