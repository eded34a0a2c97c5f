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

//! Result manifest and link wire types.
//!
//! These are the control-plane shapes the engine consumes. The control-plane
//! protocol itself (how a manifest is obtained) lives in the host client;
//! this module only defines the deserialized structures and the compression
//! tag mapping.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Describes one chunk of a query result.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkDescriptor {
    pub chunk_index: i64,
    #[serde(default)]
    pub row_offset: i64,
    #[serde(default)]
    pub row_count: i64,
    #[serde(default)]
    pub byte_count: i64,
}

/// Wire shape of a pre-signed chunk link.
///
/// The expiration is an RFC 3339 string here; [`crate::types::ChunkLink`]
/// is the parsed internal form.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkDescriptor {
    pub external_link: String,
    pub expiration: String,
    pub chunk_index: i64,
    #[serde(default)]
    pub row_offset: i64,
    #[serde(default)]
    pub row_count: i64,
    #[serde(default)]
    pub byte_count: i64,
    #[serde(default)]
    pub http_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub next_chunk_index: Option<i64>,
}

/// Manifest describing the full result: chunk layout, row totals, and the
/// compression applied to chunk payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultManifest {
    pub total_chunk_count: i64,
    pub total_row_count: i64,
    #[serde(default)]
    pub total_byte_count: Option<i64>,
    #[serde(default)]
    pub chunks: Option<Vec<ChunkDescriptor>>,
    #[serde(default)]
    pub result_compression: Option<String>,
}

impl ResultManifest {
    /// The chunk descriptors ordered by index, validated to form a dense
    /// `0..total_chunk_count` range.
    pub fn ordered_chunks(&self) -> Result<Vec<ChunkDescriptor>> {
        let mut chunks = self
            .chunks
            .clone()
            .ok_or_else(|| Error::config("manifest is missing chunk descriptors"))?;
        if chunks.len() as i64 != self.total_chunk_count {
            return Err(Error::config(format!(
                "manifest declares {} chunks but carries {} descriptors",
                self.total_chunk_count,
                chunks.len()
            )));
        }
        chunks.sort_by_key(|c| c.chunk_index);
        for (i, chunk) in chunks.iter().enumerate() {
            if chunk.chunk_index != i as i64 {
                return Err(Error::config(format!(
                    "chunk indexes are not dense: expected {} at position {}, found {}",
                    i, i, chunk.chunk_index
                )));
            }
        }
        Ok(chunks)
    }

    /// The compression codec declared for chunk payloads.
    pub fn compression(&self) -> Result<CompressionCodec> {
        CompressionCodec::from_tag(self.result_compression.as_deref())
    }
}

/// Compression applied to chunk payloads before the Arrow IPC stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionCodec {
    #[default]
    None,
    Lz4Frame,
}

impl CompressionCodec {
    /// Parse the manifest's compression tag. An absent tag means no
    /// compression; an unrecognized tag is a decode error.
    pub fn from_tag(tag: Option<&str>) -> Result<Self> {
        match tag {
            None | Some("") | Some("NONE") => Ok(Self::None),
            Some("LZ4_FRAME") => Ok(Self::Lz4Frame),
            Some(other) => Err(Error::parse(format!("unknown compression codec: {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Lz4Frame => "LZ4_FRAME",
        }
    }
}
