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

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::fs::File;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::ReadRecordError;
use crate::record::{Record, RecordReader};
use crate::LogOptions;

/// Stream of the records of a log, as they get appended.
///
/// Created by [`crate::RecordLog::watch`]. Records can be consumed with
/// [`Watcher::next`], or through the `Stream` implementation.
pub struct Watcher {
    records_rx: mpsc::Receiver<Record>,
    task: JoinHandle<Result<(), ReadRecordError>>,
}

impl Watcher {
    /// Returns the next record, waiting for it to be appended if necessary.
    ///
    /// Returns `None` once the watch has stopped.
    pub async fn next(&mut self) -> Option<Record> {
        self.records_rx.recv().await
    }

    /// Stops the watch, and returns the reason why it stopped.
    ///
    /// Records that were not consumed yet are dropped. An error is returned
    /// if the watch stopped on an invalid record.
    pub async fn join(self) -> Result<(), ReadRecordError> {
        let Watcher { records_rx, task } = self;
        drop(records_rx);
        match task.await {
            Ok(watch_res) => watch_res,
            Err(join_error) => Err(ReadRecordError::IoError(io::Error::new(
                io::ErrorKind::Other,
                join_error,
            ))),
        }
    }
}

impl Stream for Watcher {
    type Item = Record;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Record>> {
        self.get_mut().records_rx.poll_recv(cx)
    }
}

pub(crate) fn spawn(
    record_reader: RecordReader<File>,
    end_offset_rx: watch::Receiver<u64>,
    cancel: oneshot::Receiver<()>,
    options: &LogOptions,
) -> Watcher {
    let (records_tx, records_rx) = mpsc::channel(options.watch_channel_capacity.max(1));
    let backoff = Backoff::new(options.watch_backoff_min, options.watch_backoff_max);
    debug!(offset = record_reader.offset(), "starting watch");
    let task = tokio::spawn(watch_loop(
        record_reader,
        records_tx,
        end_offset_rx,
        cancel,
        backoff,
    ));
    Watcher { records_rx, task }
}

struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Backoff {
        Backoff {
            min,
            max: max.max(min),
            current: min,
        }
    }

    fn reset(&mut self) {
        self.current = self.min;
    }

    /// Returns the delay to wait, and doubles the next one.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

async fn watch_loop(
    mut record_reader: RecordReader<File>,
    records_tx: mpsc::Sender<Record>,
    mut end_offset_rx: watch::Receiver<u64>,
    mut cancel: oneshot::Receiver<()>,
    mut backoff: Backoff,
) -> Result<(), ReadRecordError> {
    // False once the log has been dropped. Appends by other processes
    // are still picked up by the backoff.
    let mut log_alive = true;
    loop {
        let record_opt = match record_reader.read_record().await {
            Ok(record_opt) => record_opt,
            // The record is still being written, or the append failed and
            // its bytes are being removed. The record is read again from
            // its start once more data is available.
            Err(ReadRecordError::IncompleteRecord { offset }) => {
                record_reader.seek(offset).await?;
                None
            }
            Err(read_error) => {
                error!(
                    offset = record_reader.offset(),
                    error = %read_error,
                    "stopping watch on invalid record"
                );
                return Err(read_error);
            }
        };
        // Cancellation is always polled first, so that no record is
        // emitted after it was requested.
        if let Some(record) = record_opt {
            backoff.reset();
            tokio::select! {
                biased;
                _ = &mut cancel => break,
                send_res = records_tx.send(record) => {
                    if send_res.is_err() {
                        break;
                    }
                }
            }
        } else {
            tokio::select! {
                biased;
                _ = &mut cancel => break,
                _ = records_tx.closed() => break,
                changed_res = end_offset_rx.changed(), if log_alive => {
                    if changed_res.is_err() {
                        log_alive = false;
                    }
                    backoff.reset();
                }
                _ = tokio::time::sleep(backoff.next_delay()) => {}
            }
        }
    }
    debug!(offset = record_reader.offset(), "watch stopped");
    Ok(())
}
