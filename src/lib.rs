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

//! Result-chunk retrieval engine for database clients
//!
//! A query result arrives as a sequence of indexed, row-bounded chunks,
//! reachable either inline or through expiring pre-signed URLs. This crate
//! fetches, decompresses, and parses those chunks into Arrow record batches
//! and presents them as an ordered row stream, keeping only a bounded number
//! of chunks in memory and recovering from transient download failures and
//! link expiry on its own.
//!
//! ## Overview
//!
//! The host client supplies the collaborators; the engine does the rest:
//! - [`LinkSource`] - fetches batches of pre-signed links from the backend
//! - [`HttpTransport`] - executes chunk GETs against cloud storage
//! - [`ResultManifest`] - describes chunk layout, row totals, compression
//!
//! From those it builds a [`ChunkStream`]: a pull cursor that hands out one
//! ready [`Chunk`] at a time while downloads for later chunks proceed in the
//! background.
//!
//! ## Example
//!
//! ```ignore
//! use chunkfetch::{ChunkStream, FetchConfig, HttpDownloadClient, RemoteChunkProvider, StatementContext};
//!
//! let provider = RemoteChunkProvider::new(
//!     &manifest,
//!     initial_links,
//!     link_source,
//!     std::sync::Arc::new(HttpDownloadClient::new(Default::default())?),
//!     FetchConfig::default(),
//!     StatementContext::new(statement_id),
//!     runtime.handle().clone(),
//! )?;
//! let mut stream = ChunkStream::Remote(provider);
//!
//! while stream.next() {
//!     let chunk = stream.get_chunk()?;
//!     let mut rows = chunk.rows()?;
//!     while rows.advance() {
//!         let cell = rows.cell(0)?;
//!         // ...
//!     }
//! }
//! stream.close();
//! ```
//!
//! ## Configuration
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `max_parallel_downloads` | 16 | Chunks downloading or resident at once |
//! | `max_retries` | 5 | Download attempts per chunk |
//! | `retry_delay` | 1500 ms | Delay between attempts |
//! | `chunk_ready_timeout` | none | Consumer wait bound in `get_chunk()` |
//! | `speed_threshold_mbps` | 0.1 | Slow download warning threshold |

pub mod chunk;
pub mod error;
pub mod http;
pub mod logging;
pub mod provider;
pub mod types;

// Re-export main types
pub use chunk::{CellValue, Chunk, ChunkRowIterator, ChunkStatus, ColumnMeta};
pub use error::{Error, Result};
pub use http::{HttpConfig, HttpDownloadClient, HttpTransport};
pub use provider::{ChunkStream, InlineChunkProvider, LinkSource, RemoteChunkProvider};

// Re-export configuration and wire types
pub use types::{ChunkLink, CompressionCodec, FetchConfig, ResultManifest, StatementContext};
