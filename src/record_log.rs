// Copyright (C) 2022 Quickwit, Inc.
//
// Quickwit is offered under the AGPL v3.0 and as commercial software.
// For commercial licensing, contact us at hello@quickwit.io.
//
// AGPL:
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncSeekExt;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{AppendError, ReadRecordError};
use crate::record::{Record, RecordReader, RecordWriter};
use crate::watcher::{self, Watcher};

/// Options for the record log.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Number of records a watcher can buffer before it waits for
    /// its consumer (default: 1).
    pub watch_channel_capacity: usize,
    /// Initial delay before a watcher looks for new data again,
    /// when no append was signaled (default: 1ms).
    pub watch_backoff_min: Duration,
    /// Upper bound of the exponential backoff of watchers (default: 100ms).
    pub watch_backoff_max: Duration,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            watch_channel_capacity: 1,
            watch_backoff_min: Duration::from_millis(1),
            watch_backoff_max: Duration::from_millis(100),
        }
    }
}

/// An append-only log of JSON records, stored in a single file.
///
/// Records are newline-delimited JSON values, identified by the byte
/// offset at which they start.
///
/// All operations except watching go through a single lock, and are
/// therefore totally ordered. The `RecordLog` can be shared between tasks
/// by wrapping it in an `Arc`.
pub struct RecordLog {
    path: PathBuf,
    options: LogOptions,
    record_writer: Mutex<RecordWriter<File>>,
    // Latest known end of data. Updated after each successful append,
    // so that watchers do not have to poll.
    end_offset_tx: watch::Sender<u64>,
}

impl RecordLog {
    /// Opens the record log at the given path, creating the file if it
    /// does not exist. Existing records are preserved and new records are
    /// appended after them.
    ///
    /// The content of the file is not validated.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open_with_options(path, LogOptions::default()).await
    }

    pub async fn open_with_options(
        path: impl AsRef<Path>,
        options: LogOptions,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;
        let len = file.metadata().await?.len();
        debug!(path=%path.display(), len, "opened record log");
        let (end_offset_tx, _) = watch::channel(len);
        Ok(RecordLog {
            path,
            options,
            record_writer: Mutex::new(RecordWriter::open(file)),
            end_offset_tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record to the log, and returns the offset at which it starts.
    ///
    /// If the value cannot be serialized, the log is left untouched.
    /// If an io error occurs, the log attempts to remove the bytes
    /// that were partially written.
    pub async fn append<T: Serialize + ?Sized>(&self, value: &T) -> Result<u64, AppendError> {
        let mut record_writer = self.record_writer.lock().await;
        // The end of data is read from the file rather than cached, so that
        // it cannot drift from what is actually on disk.
        let offset = record_writer.get_ref().metadata().await?.len();
        match record_writer.write_record(value).await {
            Ok(num_bytes) => {
                let end_offset = offset + num_bytes as u64;
                trace!(offset, num_bytes, "appended record");
                self.end_offset_tx.send_replace(end_offset);
                Ok(offset)
            }
            Err(AppendError::Io(io_error)) => {
                if let Err(rollback_error) =
                    remove_partial_record(record_writer.get_ref(), offset).await
                {
                    warn!(
                        offset,
                        error=%rollback_error,
                        "failed to remove partially written record"
                    );
                }
                // Watchers may have read some of the removed bytes.
                self.end_offset_tx.send_replace(offset);
                Err(AppendError::Io(io_error))
            }
            Err(other_error) => Err(other_error),
        }
    }

    /// Reads up to `count` records, starting at `offset`.
    ///
    /// `offset` is expected to be the start of a record, or the
    /// delimiter right before it. Fewer than `count` records are returned
    /// if the end of the log is reached.
    ///
    /// If any record is invalid, the call fails and no record is returned.
    pub async fn read(&self, offset: u64, count: usize) -> Result<Vec<Record>, ReadRecordError> {
        let mut record_writer = self.record_writer.lock().await;
        let file = record_writer.get_mut();
        file.seek(SeekFrom::Start(offset)).await?;
        let mut record_reader = RecordReader::open(file, offset);
        let mut records = Vec::new();
        while records.len() < count {
            if let Some(record) = record_reader.read_record().await? {
                records.push(record);
            } else {
                break;
            }
        }
        Ok(records)
    }

    /// Moves the read position of the log to `offset`.
    ///
    /// Seeking past the end of the log is allowed. Appends are not
    /// affected: they always land at the end of the log.
    pub async fn seek(&self, offset: u64) -> io::Result<()> {
        let mut record_writer = self.record_writer.lock().await;
        record_writer.get_mut().seek(SeekFrom::Start(offset)).await?;
        Ok(())
    }

    /// Returns the number of records in the log.
    ///
    /// This scans the entire log.
    pub async fn count(&self) -> Result<usize, ReadRecordError> {
        let mut record_writer = self.record_writer.lock().await;
        let file = record_writer.get_mut();
        file.seek(SeekFrom::Start(0)).await?;
        let mut record_reader = RecordReader::open(file, 0);
        let mut num_records = 0;
        while record_reader.read_record().await?.is_some() {
            num_records += 1;
        }
        Ok(num_records)
    }

    /// Returns the offset at which the next record will be appended.
    pub async fn next_offset(&self) -> io::Result<u64> {
        let record_writer = self.record_writer.lock().await;
        let len = record_writer.get_ref().metadata().await?.len();
        Ok(len)
    }

    /// Syncs the log to disk.
    ///
    /// Appends only hand their data to the OS. This method should be called
    /// when records are required to be durable.
    pub async fn sync(&self) -> io::Result<()> {
        let record_writer = self.record_writer.lock().await;
        record_writer.get_ref().sync_data().await
    }

    /// Follows the log, starting from its current end.
    ///
    /// See [`RecordLog::watch_from`].
    pub async fn watch(&self, cancel: oneshot::Receiver<()>) -> io::Result<Watcher> {
        let offset = self.next_offset().await?;
        self.watch_from(offset, cancel).await
    }

    /// Follows the log, starting from `offset`.
    ///
    /// Records are read by a background task, that emits all records
    /// present from `offset` on, and then each record as it gets appended.
    /// The task does not take the log's lock: it reads the file through
    /// its own handle, and treats a record that is not complete yet as the
    /// end of the available data.
    ///
    /// A watcher that reads the beginning of a record without its delimiter
    /// reads it again from its start later on. This also covers a failed
    /// append whose bytes were removed from the file, and replaced by the
    /// next record.
    ///
    /// The task stops when `cancel` receives a message or its sender is dropped,
    /// when the `Watcher` is dropped, or when an invalid record is encountered.
    /// In the latter case the error is returned by [`Watcher::join`].
    pub async fn watch_from(
        &self,
        offset: u64,
        cancel: oneshot::Receiver<()>,
    ) -> io::Result<Watcher> {
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let record_reader = RecordReader::open(file, offset);
        Ok(watcher::spawn(
            record_reader,
            self.end_offset_tx.subscribe(),
            cancel,
            &self.options,
        ))
    }
}

/// Truncates the file back to `offset`, the length it had before a failed append.
async fn remove_partial_record(file: &File, offset: u64) -> io::Result<()> {
    file.set_len(offset).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn test_open_directory_fails() {
        let tempdir = tempfile::tempdir().unwrap();
        assert!(RecordLog::open(tempdir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_open_creates_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("log.jsonl");
        let record_log = RecordLog::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(record_log.path(), path.as_path());
        assert_eq!(record_log.next_offset().await.unwrap(), 0);
        assert_eq!(record_log.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_returns_offsets() {
        let tempdir = tempfile::tempdir().unwrap();
        let record_log = RecordLog::open(tempdir.path().join("log.jsonl"))
            .await
            .unwrap();
        assert_eq!(record_log.append("hello").await.unwrap(), 0);
        assert_eq!(record_log.append("happy").await.unwrap(), 8);
        assert_eq!(record_log.next_offset().await.unwrap(), 16);
    }

    #[tokio::test]
    async fn test_seek_does_not_affect_append() {
        let tempdir = tempfile::tempdir().unwrap();
        let record_log = RecordLog::open(tempdir.path().join("log.jsonl"))
            .await
            .unwrap();
        record_log.append(&1).await.unwrap();
        record_log.seek(0).await.unwrap();
        assert_eq!(record_log.append(&2).await.unwrap(), 2);
        record_log.seek(1_000).await.unwrap();
        assert_eq!(record_log.append(&3).await.unwrap(), 4);
        let records = record_log.read(0, 10).await.unwrap();
        let values: Vec<u32> = records
            .iter()
            .map(|record| record.deserialize().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_read_past_end() {
        let tempdir = tempfile::tempdir().unwrap();
        let record_log = RecordLog::open(tempdir.path().join("log.jsonl"))
            .await
            .unwrap();
        record_log.append(&1).await.unwrap();
        record_log.seek(1_000).await.unwrap();
        assert!(record_log.read(1_000, 1).await.unwrap().is_empty());
        assert!(record_log.read(0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync() {
        let tempdir = tempfile::tempdir().unwrap();
        let record_log = RecordLog::open(tempdir.path().join("log.jsonl"))
            .await
            .unwrap();
        record_log.append(&[1, 2, 3]).await.unwrap();
        record_log.sync().await.unwrap();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_append_io_error() {
        let record_log = RecordLog::open("/dev/full").await.unwrap();
        assert!(matches!(
            record_log.append(&json!({"id": 1})).await,
            Err(AppendError::Io(_))
        ));
        assert_eq!(record_log.next_offset().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_partial_record() {
        let tempdir = tempfile::tempdir().unwrap();
        let record_log = RecordLog::open(tempdir.path().join("log.jsonl"))
            .await
            .unwrap();
        let offset = record_log.append(&json!({"id": 1})).await.unwrap();
        let next_offset = record_log.next_offset().await.unwrap();
        {
            let mut record_writer = record_log.record_writer.lock().await;
            let file = record_writer.get_mut();
            file.write_all(b"{\"id\":").await.unwrap();
            file.flush().await.unwrap();
        }
        assert!(matches!(
            record_log.count().await,
            Err(ReadRecordError::IncompleteRecord { .. })
        ));
        {
            let record_writer = record_log.record_writer.lock().await;
            remove_partial_record(record_writer.get_ref(), next_offset)
                .await
                .unwrap();
        }
        assert_eq!(record_log.next_offset().await.unwrap(), next_offset);
        assert_eq!(record_log.count().await.unwrap(), 1);
        assert_eq!(
            record_log.append(&json!({"id": 2})).await.unwrap(),
            next_offset
        );
        let records = record_log.read(offset, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1].deserialize::<serde_json::Value>().unwrap(),
            json!({"id": 2})
        );
    }

    #[tokio::test]
    async fn test_watch_without_backoff_limit() {
        let tempdir = tempfile::tempdir().unwrap();
        let options = LogOptions {
            watch_backoff_min: Duration::MAX,
            watch_backoff_max: Duration::MAX,
            ..Default::default()
        };
        let record_log = RecordLog::open_with_options(tempdir.path().join("log.jsonl"), options)
            .await
            .unwrap();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let mut watcher = record_log.watch(cancel_rx).await.unwrap();
        // Let the watcher go idle before appending.
        tokio::task::yield_now().await;
        record_log.append(&json!({"id": 1})).await.unwrap();
        let record = tokio::time::timeout(Duration::from_secs(5), watcher.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.offset(), 0);
        cancel_tx.send(()).unwrap();
        watcher.join().await.unwrap();
    }
}
