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

//! Sliding-window chunk provider for link-based results.
//!
//! The provider owns the chunk map and bounds the number of chunks that are
//! downloading or resident in memory at once. Downloads are submitted in
//! strictly increasing index order; they may complete out of order because
//! readiness is tracked per chunk. The consumer walks the chunks in order
//! with `next()`/`get_chunk()`, and each release frees a window slot, which
//! schedules the next download.

use crate::chunk::{Chunk, ChunkStatus};
use crate::error::{Error, Result};
use crate::http::HttpTransport;
use crate::provider::downloader::ChunkDownloader;
use crate::provider::links::{LinkRefreshService, LinkSource};
use crate::provider::worker::{spawn_download_worker, DownloadContext};
use crate::types::{ChunkLink, CompressionCodec, FetchConfig, ResultManifest, StatementContext};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Schedules chunk downloads against a memory window and exposes a pull
/// cursor over the result's chunks.
///
/// The provider lives on the consumer thread. The cursor fields are plain
/// values because only that thread touches them; the chunk map and the link
/// service are shared with the background download tasks.
pub struct RemoteChunkProvider {
    /// Chunk index to chunk entity, shared with download workers.
    chunks: Arc<DashMap<i64, Arc<Chunk>>>,
    /// Keeps pre-signed links valid ahead of the download window.
    link_service: Arc<LinkRefreshService>,
    chunk_downloader: Arc<ChunkDownloader>,
    config: FetchConfig,
    ctx: StatementContext,
    codec: CompressionCodec,
    chunk_count: i64,
    total_row_count: i64,
    /// Window size: `min(max_parallel_downloads, chunk_count)`.
    allowed_chunks_in_memory: usize,

    // Consumer-side cursor state. Background tasks never read these.
    current_chunk_index: i64,
    next_chunk_to_download: i64,
    chunks_in_memory: usize,
    closed: bool,

    /// Cancels outstanding download workers on close.
    cancel_token: CancellationToken,
    runtime_handle: Handle,
}

impl std::fmt::Debug for RemoteChunkProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteChunkProvider")
            .field("statement_id", &self.ctx.statement_id())
            .field("chunk_count", &self.chunk_count)
            .field("current_chunk_index", &self.current_chunk_index)
            .field("next_chunk_to_download", &self.next_chunk_to_download)
            .field("chunks_in_memory", &self.chunks_in_memory)
            .field("closed", &self.closed)
            .finish()
    }
}

impl RemoteChunkProvider {
    /// Build the chunk map from the manifest, seed the link service with the
    /// links already known, and fill the download window.
    ///
    /// Chunks start `Pending` even when their link is known: a link is
    /// installed on a chunk only when its download worker claims it, so the
    /// `UrlFetched` status marks membership in the download window.
    ///
    /// `runtime_handle` is where download workers and link fetches run; the
    /// provider itself stays on the calling thread.
    pub fn new(
        manifest: &ResultManifest,
        initial_links: Vec<ChunkLink>,
        link_source: Arc<dyn LinkSource>,
        transport: Arc<dyn HttpTransport>,
        config: FetchConfig,
        ctx: StatementContext,
        runtime_handle: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let codec = manifest.compression()?;
        let descriptors = manifest.ordered_chunks()?;
        let chunk_count = manifest.total_chunk_count;

        let chunks: Arc<DashMap<i64, Arc<Chunk>>> = Arc::new(DashMap::new());
        for descriptor in &descriptors {
            chunks.insert(
                descriptor.chunk_index,
                Arc::new(Chunk::pending(
                    descriptor.chunk_index,
                    descriptor.row_offset,
                    descriptor.row_count,
                    ctx.clone(),
                    config.skip_expiry_checks,
                )),
            );
        }
        let link_service = Arc::new(LinkRefreshService::new(
            link_source,
            ctx.clone(),
            chunk_count,
            Arc::clone(&chunks),
            &initial_links,
            config.skip_expiry_checks,
            runtime_handle.clone(),
        ));
        let chunk_downloader = Arc::new(ChunkDownloader::new(
            transport,
            config.speed_threshold_mbps,
        ));

        let allowed_chunks_in_memory = config.max_parallel_downloads.min(chunk_count.max(0) as usize);
        debug!(
            "Chunk provider for statement {}: {} chunks, {} rows, window {}",
            ctx.statement_id(),
            chunk_count,
            manifest.total_row_count,
            allowed_chunks_in_memory
        );

        let mut provider = Self {
            chunks,
            link_service,
            chunk_downloader,
            config,
            ctx,
            codec,
            chunk_count,
            total_row_count: manifest.total_row_count,
            allowed_chunks_in_memory,
            current_chunk_index: -1,
            next_chunk_to_download: 0,
            chunks_in_memory: 0,
            closed: false,
            cancel_token: CancellationToken::new(),
            runtime_handle,
        };
        provider.fill_download_window();
        Ok(provider)
    }

    /// The only place that starts new downloads. Invoked at construction and
    /// again every time a chunk is released.
    fn fill_download_window(&mut self) {
        while !self.closed
            && self.next_chunk_to_download < self.chunk_count
            && self.chunks_in_memory < self.allowed_chunks_in_memory
        {
            let chunk_index = self.next_chunk_to_download;
            let chunk = match self.chunks.get(&chunk_index) {
                Some(entry) => Arc::clone(entry.value()),
                None => {
                    // ordered_chunks() guarantees a dense range, so this is
                    // unreachable short of a bookkeeping bug.
                    error!(
                        "Chunk {} missing from chunk map for statement {}",
                        chunk_index,
                        self.ctx.statement_id()
                    );
                    return;
                }
            };
            spawn_download_worker(
                &self.runtime_handle,
                DownloadContext {
                    chunk,
                    links: Arc::clone(&self.link_service),
                    downloader: Arc::clone(&self.chunk_downloader),
                    codec: self.codec,
                    max_retries: self.config.max_retries,
                    retry_delay: self.config.retry_delay,
                    cancel: self.cancel_token.clone(),
                    ctx: self.ctx.clone(),
                },
            );
            self.chunks_in_memory += 1;
            self.next_chunk_to_download += 1;
            debug!(
                "Scheduled download of chunk {} for statement {} ({}/{} in memory)",
                chunk_index,
                self.ctx.statement_id(),
                self.chunks_in_memory,
                self.allowed_chunks_in_memory
            );
        }
    }

    /// Release the current chunk and advance the cursor.
    ///
    /// Returns false when no chunk remains. Releasing frees a window slot,
    /// which immediately schedules the next download.
    pub fn next(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if self.current_chunk_index >= 0 {
            if let Some(chunk) = self
                .chunks
                .get(&self.current_chunk_index)
                .map(|entry| Arc::clone(entry.value()))
            {
                if chunk.release() {
                    self.chunks_in_memory = self.chunks_in_memory.saturating_sub(1);
                    self.fill_download_window();
                }
            }
        }
        if self.current_chunk_index >= self.chunk_count - 1 {
            return false;
        }
        self.current_chunk_index += 1;
        true
    }

    /// Whether another chunk remains after the current one.
    pub fn has_next(&self) -> bool {
        !self.closed && self.current_chunk_index < self.chunk_count - 1
    }

    /// Block until the current chunk is downloaded and decoded, then return
    /// it.
    ///
    /// Requires `next()` to have advanced the cursor. Timeout, interruption,
    /// and download/decode failures surface as typed errors; a failure is
    /// reported for the chunk that failed, sibling chunks are unaffected.
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
        let chunk = self
            .chunks
            .get(&self.current_chunk_index)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                Error::internal(format!(
                    "chunk {} missing from chunk map",
                    self.current_chunk_index
                ))
            })?;
        self.runtime_handle.block_on(chunk.wait_ready(
            self.config.chunk_ready_timeout,
            &self.cancel_token,
        ))?;
        Ok(chunk)
    }

    /// Stop all background work and free every resident buffer. Idempotent.
    ///
    /// Outstanding downloads are interrupted, not awaited; their workers
    /// observe the cancelled token and finish on their own.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel_token.cancel();
        self.link_service.shutdown();
        for entry in self.chunks.iter() {
            entry.value().release();
        }
        self.chunks_in_memory = 0;
        debug!(
            "Closed chunk provider for statement {}",
            self.ctx.statement_id()
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Total rows declared by the manifest.
    pub fn row_count(&self) -> i64 {
        self.total_row_count
    }

    pub fn chunk_count(&self) -> i64 {
        self.chunk_count
    }

    pub fn current_chunk_index(&self) -> i64 {
        self.current_chunk_index
    }

    /// Number of chunks currently downloading or resident.
    pub fn resident_chunk_count(&self) -> usize {
        self.chunks_in_memory
    }

    /// Index the next scheduled download will cover.
    pub fn next_download_index(&self) -> i64 {
        self.next_chunk_to_download
    }

    /// Lifecycle status of one chunk, if the index is known.
    pub fn chunk_status(&self, chunk_index: i64) -> Option<ChunkStatus> {
        self.chunks.get(&chunk_index).map(|entry| entry.status())
    }
}

impl Drop for RemoteChunkProvider {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkDescriptor;
    use arrow_array::{Int32Array, RecordBatch, StringArray};
    use arrow_ipc::writer::StreamWriter;
    use arrow_schema::{DataType, Field, Schema};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::runtime::Runtime;

    fn make_link(chunk_index: i64, ttl_secs: i64) -> ChunkLink {
        ChunkLink {
            url: format!("https://storage.example.com/chunk{chunk_index}"),
            chunk_index,
            row_offset: chunk_index * 3,
            row_count: 3,
            byte_count: 512,
            expiration: Utc::now() + chrono::Duration::seconds(ttl_secs),
            http_headers: HashMap::new(),
        }
    }

    fn make_manifest(chunk_count: i64, rows_per_chunk: i64) -> ResultManifest {
        ResultManifest {
            total_chunk_count: chunk_count,
            total_row_count: chunk_count * rows_per_chunk,
            total_byte_count: None,
            chunks: Some(
                (0..chunk_count)
                    .map(|i| ChunkDescriptor {
                        chunk_index: i,
                        row_offset: i * rows_per_chunk,
                        row_count: rows_per_chunk,
                        byte_count: 512,
                    })
                    .collect(),
            ),
            result_compression: None,
        }
    }

    fn ipc_payload(rows: i64) -> Vec<u8> {
        let schema = std::sync::Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let ids: Vec<i32> = (0..rows as i32).collect();
        let names: Vec<Option<String>> = (0..rows).map(|i| Some(format!("row{i}"))).collect();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                std::sync::Arc::new(Int32Array::from(ids)),
                std::sync::Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap();
        let mut buffer = Vec::new();
        {
            let mut writer = StreamWriter::try_new(&mut buffer, &schema).unwrap();
            writer.write(&batch).unwrap();
            writer.finish().unwrap();
        }
        buffer
    }

    /// Serves every URL with the same payload.
    #[derive(Debug)]
    struct ServingTransport {
        payload: Vec<u8>,
    }

    #[async_trait]
    impl HttpTransport for ServingTransport {
        async fn get(&self, _url: &str, _headers: &HashMap<String, String>) -> Result<Bytes> {
            Ok(Bytes::from(self.payload.clone()))
        }
    }

    /// Parks every request forever; downloads never complete.
    #[derive(Debug)]
    struct BlockingTransport;

    #[async_trait]
    impl HttpTransport for BlockingTransport {
        async fn get(&self, _url: &str, _headers: &HashMap<String, String>) -> Result<Bytes> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    #[derive(Debug)]
    struct MockLinkSource {
        total_chunks: i64,
        calls: StdMutex<Vec<i64>>,
    }

    #[async_trait]
    impl LinkSource for MockLinkSource {
        async fn fetch_links(&self, start_chunk_index: i64) -> Result<Vec<ChunkLink>> {
            self.calls.lock().unwrap().push(start_chunk_index);
            Ok((start_chunk_index..self.total_chunks)
                .map(|i| make_link(i, 3600))
                .collect())
        }
    }

    fn make_provider(
        runtime: &Runtime,
        chunk_count: i64,
        window: usize,
        transport: Arc<dyn HttpTransport>,
    ) -> RemoteChunkProvider {
        let manifest = make_manifest(chunk_count, 3);
        let initial_links: Vec<ChunkLink> = (0..chunk_count).map(|i| make_link(i, 3600)).collect();
        let source = Arc::new(MockLinkSource {
            total_chunks: chunk_count,
            calls: StdMutex::new(Vec::new()),
        });
        let config = FetchConfig {
            max_parallel_downloads: window,
            retry_delay: Duration::from_millis(5),
            chunk_ready_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        RemoteChunkProvider::new(
            &manifest,
            initial_links,
            source,
            transport,
            config,
            StatementContext::new("test-statement"),
            runtime.handle().clone(),
        )
        .unwrap()
    }

    #[test]
    fn test_window_bounds_scheduled_downloads() {
        let runtime = Runtime::new().unwrap();
        let mut provider = make_provider(&runtime, 3, 2, Arc::new(BlockingTransport));

        // Only chunks 0 and 1 fit the window; 2 must wait for a release.
        assert_eq!(provider.next_download_index(), 2);
        assert_eq!(provider.resident_chunk_count(), 2);
        assert_eq!(
            provider.chunk_status(2),
            Some(ChunkStatus::Pending),
            "chunk outside the window must not be downloading"
        );

        provider.close();
    }

    #[test]
    fn test_consumes_all_chunks_in_order() {
        let runtime = Runtime::new().unwrap();
        let mut provider =
            make_provider(&runtime, 3, 1, Arc::new(ServingTransport { payload: ipc_payload(3) }));

        let mut consumed = 0;
        while provider.next() {
            let chunk = provider.get_chunk().unwrap();
            assert_eq!(chunk.chunk_index(), consumed);
            assert_eq!(chunk.status(), ChunkStatus::ProcessingSucceeded);
            assert_eq!(chunk.batches().len(), 1);
            consumed += 1;
        }

        assert_eq!(consumed, 3);
        assert!(!provider.has_next());
        // The final next() released the last chunk.
        assert_eq!(provider.chunk_status(2), Some(ChunkStatus::ChunkReleased));
    }

    #[test]
    fn test_release_frees_a_window_slot() {
        let runtime = Runtime::new().unwrap();
        let mut provider =
            make_provider(&runtime, 3, 1, Arc::new(ServingTransport { payload: ipc_payload(3) }));
        assert_eq!(provider.next_download_index(), 1);

        assert!(provider.next());
        provider.get_chunk().unwrap();
        assert!(provider.next());

        // Releasing chunk 0 scheduled chunk 1.
        assert_eq!(provider.chunk_status(0), Some(ChunkStatus::ChunkReleased));
        assert_eq!(provider.next_download_index(), 2);
    }

    #[test]
    fn test_get_chunk_before_next_is_an_error() {
        let runtime = Runtime::new().unwrap();
        let provider =
            make_provider(&runtime, 2, 2, Arc::new(ServingTransport { payload: ipc_payload(3) }));

        let err = provider.get_chunk().unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_close_interrupts_outstanding_downloads() {
        let runtime = Runtime::new().unwrap();
        let mut provider = make_provider(&runtime, 3, 2, Arc::new(BlockingTransport));

        // Two downloads are parked in the transport. Closing must not wait
        // for them.
        provider.close();
        provider.close();

        assert!(provider.is_closed());
        assert_eq!(provider.resident_chunk_count(), 0);
        for i in 0..3 {
            assert_eq!(provider.chunk_status(i), Some(ChunkStatus::ChunkReleased));
        }
        assert!(matches!(provider.get_chunk(), Err(Error::Internal(_))));
        assert!(!provider.next());
    }

    #[test]
    fn test_zero_chunk_result() {
        let runtime = Runtime::new().unwrap();
        let mut provider =
            make_provider(&runtime, 0, 4, Arc::new(ServingTransport { payload: ipc_payload(3) }));

        assert!(!provider.has_next());
        assert!(!provider.next());
        assert_eq!(provider.row_count(), 0);
    }
}
