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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppendError {
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    /// The serialized value contains a raw newline and would break framing.
    #[error("Serialized record contains a newline")]
    EmbeddedNewline,
    #[error("Io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ReadRecordError {
    #[error("Io error: {0}")]
    IoError(#[from] io::Error),
    #[error("Corruption at offset {offset}: {source}")]
    Corruption {
        offset: u64,
        #[source]
        source: serde_json::Error,
    },
    /// The data ends in the middle of a record: its delimiter is missing.
    #[error("Incomplete record at offset {offset}")]
    IncompleteRecord { offset: u64 },
}

impl ReadRecordError {
    /// Returns true if the error is a decoding error, as opposed to an io error.
    pub fn is_decode_error(&self) -> bool {
        !matches!(self, ReadRecordError::IoError(_))
    }
}
