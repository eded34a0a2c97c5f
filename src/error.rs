// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for the chunk retrieval engine.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the chunk retrieval engine.
///
/// The enum is `Clone`: a chunk's terminal error is fanned out to every
/// waiter parked on its completion signal, and a failed link batch resolves
/// many pending link promises with the same error. Payloads are therefore
/// messages and small copyable fields rather than source errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Chunk bytes could not be decompressed or parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// HTTP or I/O failure while downloading chunk bytes. Retried by the
    /// download worker up to the configured cap.
    #[error("download error: {0}")]
    Download(String),

    /// No valid link can be produced for a chunk: the refresh service is
    /// shut down, the index is out of range, or the covering link batch
    /// failed.
    #[error("link unavailable: {0}")]
    LinkUnavailable(String),

    /// Consumer wait on a chunk exceeded the configured timeout.
    #[error("timed out after {timeout:?} waiting for chunk {chunk_index}")]
    Timeout {
        chunk_index: i64,
        timeout: Duration,
    },

    /// Cooperative cancellation observed while waiting or retrying.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// A chunk was asked to move along an edge the lifecycle table does not
    /// allow. Callers log this and leave the state unchanged; it never
    /// crosses the crate boundary.
    #[error("invalid state transition for chunk {chunk_index}: {from} -> {to}")]
    InvalidStateTransition {
        chunk_index: i64,
        from: &'static str,
        to: &'static str,
    },

    /// Invalid configuration or constructor input.
    #[error("configuration error: {0}")]
    Config(String),

    /// A caller broke an API contract, such as reading a chunk before the
    /// cursor was advanced onto it.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    pub fn download(msg: impl Into<String>) -> Self {
        Error::Download(msg.into())
    }

    pub fn link_unavailable(msg: impl Into<String>) -> Self {
        Error::LinkUnavailable(msg.into())
    }

    pub fn interrupted(msg: impl Into<String>) -> Self {
        Error::Interrupted(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether the download worker may retry after this error.
    ///
    /// Only download-level failures are retryable; link, parse, and
    /// cancellation errors are terminal for the chunk.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Download(_))
    }
}

impl From<arrow_schema::ArrowError> for Error {
    fn from(e: arrow_schema::ArrowError) -> Self {
        Error::Parse(format!("arrow error: {}", e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Parse(format!("io error: {}", e))
    }
}
