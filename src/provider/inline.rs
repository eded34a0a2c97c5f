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

//! Single-chunk provider for results delivered inline.
//!
//! When the result payload arrives embedded in the control-plane response
//! there are no links to refresh and nothing to download: the whole result
//! is one chunk, decoded eagerly at construction. The payload may span
//! several response fragments; each fragment is a complete IPC stream and
//! they decode into one batch sequence.

use crate::chunk::{Chunk, ChunkStatus};
use crate::error::{Error, Result};
use crate::types::{CompressionCodec, StatementContext};
use std::sync::Arc;
use tracing::debug;

/// Pull cursor over a single inline chunk.
///
/// Mirrors the remote provider's contract with `chunk_count == 1`: the
/// cursor starts before the chunk, `next()` moves onto it exactly once, and
/// a second `next()` releases it and ends the stream.
pub struct InlineChunkProvider {
    chunk: Arc<Chunk>,
    total_row_count: i64,
    current_chunk_index: i64,
    closed: bool,
    ctx: StatementContext,
}

impl std::fmt::Debug for InlineChunkProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineChunkProvider")
            .field("statement_id", &self.ctx.statement_id())
            .field("total_row_count", &self.total_row_count)
            .field("current_chunk_index", &self.current_chunk_index)
            .field("closed", &self.closed)
            .finish()
    }
}

impl InlineChunkProvider {
    /// Decode the payload fragments into one ready chunk.
    ///
    /// A decode failure releases any partially decoded buffers and fails
    /// construction; there is no retry for inline data.
    pub fn new(
        payloads: &[Vec<u8>],
        total_row_count: i64,
        codec: CompressionCodec,
        ctx: StatementContext,
    ) -> Result<Self> {
        let chunk = Arc::new(Chunk::downloaded(0, 0, total_row_count, ctx.clone()));
        for payload in payloads {
            chunk.decode(payload, codec)?;
        }
        if payloads.is_empty() {
            // Zero-row result: no bytes to decode, but the chunk must still
            // present as processed so the row iterator sees an empty stream.
            chunk.set_status(ChunkStatus::ProcessingSucceeded);
        }
        chunk.signal_ready();
        debug!(
            "Inline result for statement {}: {} fragment(s), {} rows",
            ctx.statement_id(),
            payloads.len(),
            total_row_count
        );
        Ok(Self {
            chunk,
            total_row_count,
            current_chunk_index: -1,
            closed: false,
            ctx,
        })
    }

    /// Move the cursor onto the chunk, or past it.
    pub fn next(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if self.current_chunk_index >= 0 {
            self.chunk.release();
            return false;
        }
        self.current_chunk_index = 0;
        true
    }

    pub fn has_next(&self) -> bool {
        !self.closed && self.current_chunk_index < 0
    }

    /// The inline chunk; already decoded, so this never blocks.
    pub fn get_chunk(&self) -> Result<Arc<Chunk>> {
        if self.closed {
            return Err(Error::internal(format!(
                "chunk provider for statement {} is closed",
                self.ctx.statement_id()
            )));
        }
        if self.current_chunk_index < 0 {
            return Err(Error::internal(
                "get_chunk() called before next() advanced the cursor",
            ));
        }
        Ok(Arc::clone(&self.chunk))
    }

    /// Free the chunk's buffers. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.chunk.release();
        debug!(
            "Closed inline provider for statement {}",
            self.ctx.statement_id()
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn row_count(&self) -> i64 {
        self.total_row_count
    }

    pub fn chunk_count(&self) -> i64 {
        1
    }

    pub fn current_chunk_index(&self) -> i64 {
        self.current_chunk_index
    }
}

impl Drop for InlineChunkProvider {
    fn drop(&mut self) {
        self.close();
    }
}
