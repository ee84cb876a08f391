//! This library defines an append-only record `log` stored in a single file.
//!
//! Records are JSON values, written one per line, each followed by
//! a `\n` delimiter. There is no header, no checksum and no length prefix:
//! the file can be inspected with any tool working on JSON lines.
//!
//! A record is identified by the byte offset at which it starts.
//! The offset is returned when appending, and carried by every record read.
//!
//! The log supports concurrent appenders and readers. Bounded reads,
//! seeks and counts are serialized with appends. Watchers follow the
//! log as it grows, without blocking other operations.
//!
//! # Usage
//!
//! ```
//! use serde_json::json;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let tempdir = tempfile::tempdir()?;
//! let record_log = jsonlog::RecordLog::open(tempdir.path().join("log.jsonl")).await?;
//! record_log.append(&json!({"id": 1, "data": "a"})).await?;
//! let offset = record_log.append(&json!({"id": 2, "data": "b"})).await?;
//! assert_eq!(record_log.count().await?, 2);
//!
//! let records = record_log.read(offset, 1).await?;
//! let value: serde_json::Value = records[0].deserialize()?;
//! assert_eq!(value, json!({"id": 2, "data": "b"}));
//!
//! // Records can also be written to and read from any async writer/reader.
//! let mut buffer: Vec<u8> = Vec::new();
//! let mut record_writer = jsonlog::RecordWriter::open(&mut buffer);
//! record_writer.write_record("hello").await?;
//! let mut record_reader = jsonlog::RecordReader::open(&buffer[..], 0);
//! assert_eq!(record_reader.read_record().await?.unwrap().payload(), b"\"hello\"");
//! assert!(record_reader.read_record().await?.is_none());
//! # Ok(())
//! # }
//! ```

mod error;
mod record;
mod record_log;
mod watcher;

pub use error::{AppendError, ReadRecordError};
pub use record::{Record, RecordReader, RecordWriter};
pub use record_log::{LogOptions, RecordLog};
pub use watcher::Watcher;
