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

//! Chunk providers: scheduling, download, and link refresh.
//!
//! This module provides:
//! - `RemoteChunkProvider`: sliding-window scheduler for link-based results
//! - `InlineChunkProvider`: single-chunk provider for embedded payloads
//! - `LinkRefreshService`/`LinkSource`: pre-signed link prefetch and refresh
//! - `ChunkDownloader`: fetches one chunk's bytes over HTTP
//! - `ChunkStream`: one pull-cursor surface over either provider

use crate::chunk::Chunk;
use crate::error::Result;
use std::sync::Arc;

pub mod downloader;
pub mod inline;
pub mod links;
pub mod remote;
mod worker;

pub use downloader::ChunkDownloader;
pub use inline::InlineChunkProvider;
pub use links::{LinkRefreshService, LinkSource};
pub use remote::RemoteChunkProvider;

/// A result's chunk sequence, whichever way the bytes arrive.
///
/// Consumers drive it the same way in both cases: `next()` onto a chunk,
/// `get_chunk()` to block until it is ready, iterate its rows, `next()`
/// again to release it and move on.
#[derive(Debug)]
pub enum ChunkStream {
    Remote(RemoteChunkProvider),
    Inline(InlineChunkProvider),
}

impl ChunkStream {
    /// Release the current chunk and advance to the next one.
    pub fn next(&mut self) -> bool {
        match self {
            Self::Remote(provider) => provider.next(),
            Self::Inline(provider) => provider.next(),
        }
    }

    pub fn has_next(&self) -> bool {
        match self {
            Self::Remote(provider) => provider.has_next(),
            Self::Inline(provider) => provider.has_next(),
        }
    }

    /// Block until the current chunk is ready and return it.
    pub fn get_chunk(&self) -> Result<Arc<Chunk>> {
        match self {
            Self::Remote(provider) => provider.get_chunk(),
            Self::Inline(provider) => provider.get_chunk(),
        }
    }

    /// Stop background work and free all resident buffers. Idempotent.
    pub fn close(&mut self) {
        match self {
            Self::Remote(provider) => provider.close(),
            Self::Inline(provider) => provider.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Self::Remote(provider) => provider.is_closed(),
            Self::Inline(provider) => provider.is_closed(),
        }
    }

    /// Total rows declared for the result.
    pub fn row_count(&self) -> i64 {
        match self {
            Self::Remote(provider) => provider.row_count(),
            Self::Inline(provider) => provider.row_count(),
        }
    }

    pub fn chunk_count(&self) -> i64 {
        match self {
            Self::Remote(provider) => provider.chunk_count(),
            Self::Inline(provider) => provider.chunk_count(),
        }
    }

    pub fn current_chunk_index(&self) -> i64 {
        match self {
            Self::Remote(provider) => provider.current_chunk_index(),
            Self::Inline(provider) => provider.current_chunk_index(),
        }
    }
}
