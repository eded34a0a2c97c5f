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

//! Pre-signed chunk links and their expiry rules.

use crate::error::{Error, Result};
use crate::types::manifest::LinkDescriptor;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Safety buffer (in seconds) before link expiration.
///
/// A link is treated as expired this many seconds before its actual
/// expiration so that a download started against it cannot outlive the
/// credential mid-transfer.
pub const LINK_EXPIRY_BUFFER_SECS: i64 = 60;

/// A time-bounded access credential for one chunk's bytes.
///
/// Links are replaced wholesale when refreshed, never mutated in place.
/// This is the internal representation, converted from the wire-shape
/// [`LinkDescriptor`] with the expiration parsed into a `DateTime<Utc>`.
#[derive(Debug, Clone)]
pub struct ChunkLink {
    /// Pre-signed URL for downloading the chunk.
    pub url: String,
    /// Index of the chunk this link covers.
    pub chunk_index: i64,
    /// Row offset of the chunk in the result set.
    pub row_offset: i64,
    /// Number of rows in the chunk.
    pub row_count: i64,
    /// Size of the chunk in bytes (compressed if applicable).
    pub byte_count: i64,
    /// When this link expires.
    pub expiration: DateTime<Utc>,
    /// HTTP headers to include in the download request (e.g., encryption
    /// key material).
    pub http_headers: HashMap<String, String>,
}

impl ChunkLink {
    /// Whether the link is expired, applying the safety buffer.
    pub fn is_expired(&self) -> bool {
        Utc::now() + chrono::Duration::seconds(LINK_EXPIRY_BUFFER_SECS) >= self.expiration
    }

    /// Convert from the wire-shape descriptor, parsing the RFC 3339
    /// expiration timestamp.
    pub fn from_descriptor(descriptor: &LinkDescriptor) -> Result<Self> {
        let expiration = DateTime::parse_from_rfc3339(&descriptor.expiration)
            .map_err(|e| {
                Error::link_unavailable(format!(
                    "invalid expiration timestamp for chunk {}: {}",
                    descriptor.chunk_index, e
                ))
            })?
            .with_timezone(&Utc);

        Ok(Self {
            url: descriptor.external_link.clone(),
            chunk_index: descriptor.chunk_index,
            row_offset: descriptor.row_offset,
            row_count: descriptor.row_count,
            byte_count: descriptor.byte_count,
            expiration,
            http_headers: descriptor.http_headers.clone().unwrap_or_default(),
        })
    }
}
