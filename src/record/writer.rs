use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::AppendError;
use crate::record::DELIMITER;

pub struct RecordWriter<W> {
    wrt: W,
    // Reused across records to avoid an allocation per append.
    buffer: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    pub fn open(wrt: W) -> Self {
        RecordWriter {
            wrt,
            buffer: Vec::with_capacity(1_024),
        }
    }

    /// Writes a record, and returns the number of bytes written,
    /// delimiter included.
    ///
    /// The value is entirely serialized before anything is written, so a
    /// value that cannot be serialized leaves the underlying writer untouched.
    ///
    /// Even if this call returns `Ok(..)`, the data has only been handed
    /// to the OS. It is not necessarily durably stored on disk.
    pub async fn write_record<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> Result<usize, AppendError> {
        self.buffer.clear();
        serde_json::to_writer(&mut self.buffer, value).map_err(AppendError::Serialization)?;
        // `serde_json` escapes newlines within strings, but a `RawValue`
        // is written verbatim.
        if self.buffer.contains(&DELIMITER) {
            return Err(AppendError::EmbeddedNewline);
        }
        self.buffer.push(DELIMITER);
        self.wrt.write_all(&self.buffer).await?;
        self.wrt.flush().await?;
        Ok(self.buffer.len())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.wrt
    }

    pub fn get_ref(&self) -> &W {
        &self.wrt
    }
}
