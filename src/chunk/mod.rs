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

//! Chunk entity and its lifecycle.
//!
//! A [`Chunk`] is one indexed, row-bounded slice of a query result. It owns
//! its download link, its decoded batches, and a readiness signal that the
//! download worker completes exactly once. Status changes go through the
//! state machine in [`state`]; an illegal change is logged and discarded.

mod arena;
pub mod decode;
pub mod rows;
pub mod state;

pub use decode::{ColumnMeta, SQL_TYPE_TAG_KEY};
pub use rows::{CellValue, ChunkRowIterator};
pub use state::ChunkStatus;

use crate::error::{Error, Result};
use crate::types::{ChunkLink, CompressionCodec, StatementContext};
use arena::ChunkArena;
use arrow_array::RecordBatch;
use state::ChunkStateMachine;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One-shot completion signal with any number of waiters.
///
/// The first `complete` wins; later completions are ignored. Waiters that
/// subscribe after completion observe the stored result immediately.
#[derive(Debug)]
struct ReadySignal {
    tx: watch::Sender<Option<Result<()>>>,
}

impl ReadySignal {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    fn complete(&self, result: Result<()>) -> bool {
        let mut result = Some(result);
        self.tx.send_if_modified(|slot| match slot {
            None => {
                *slot = result.take();
                true
            }
            Some(_) => false,
        })
    }

    async fn wait(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        let guard = rx
            .wait_for(|v| v.is_some())
            .await
            .map_err(|_| Error::interrupted("chunk ready signal dropped"))?;
        let stored = guard.clone();
        drop(guard);
        stored.unwrap_or_else(|| Err(Error::interrupted("chunk ready signal empty")))
    }
}

/// An indexed, row-bounded slice of a query result.
#[derive(Debug)]
pub struct Chunk {
    chunk_index: i64,
    row_offset: i64,
    row_count: i64,
    ctx: StatementContext,
    state: Mutex<ChunkStateMachine>,
    link: Mutex<Option<ChunkLink>>,
    arena: Mutex<ChunkArena>,
    column_metas: Mutex<Vec<ColumnMeta>>,
    ready: ReadySignal,
    skip_expiry_check: bool,
}

impl Chunk {
    /// Chunk known only from the result manifest; no link yet.
    pub fn pending(
        chunk_index: i64,
        row_offset: i64,
        row_count: i64,
        ctx: StatementContext,
        skip_expiry_check: bool,
    ) -> Self {
        Self::with_status(
            chunk_index,
            row_offset,
            row_count,
            ctx,
            ChunkStatus::Pending,
            skip_expiry_check,
        )
    }

    /// Chunk whose bytes are already in hand (inline results); starts in
    /// `DownloadSucceeded`, awaiting decode.
    pub fn downloaded(
        chunk_index: i64,
        row_offset: i64,
        row_count: i64,
        ctx: StatementContext,
    ) -> Self {
        Self::with_status(
            chunk_index,
            row_offset,
            row_count,
            ctx,
            ChunkStatus::DownloadSucceeded,
            false,
        )
    }

    fn with_status(
        chunk_index: i64,
        row_offset: i64,
        row_count: i64,
        ctx: StatementContext,
        initial: ChunkStatus,
        skip_expiry_check: bool,
    ) -> Self {
        Self {
            chunk_index,
            row_offset,
            row_count,
            ctx,
            state: Mutex::new(ChunkStateMachine::new(chunk_index, initial)),
            link: Mutex::new(None),
            arena: Mutex::new(ChunkArena::new()),
            column_metas: Mutex::new(Vec::new()),
            ready: ReadySignal::new(),
            skip_expiry_check,
        }
    }

    pub fn chunk_index(&self) -> i64 {
        self.chunk_index
    }

    pub fn row_offset(&self) -> i64 {
        self.row_offset
    }

    pub fn row_count(&self) -> i64 {
        self.row_count
    }

    pub fn status(&self) -> ChunkStatus {
        self.state.lock().unwrap().current()
    }

    /// Attempt a status change. An illegal change is logged and discarded.
    pub fn set_status(&self, target: ChunkStatus) {
        if let Err(e) = self.state.lock().unwrap().transition(target) {
            warn!(
                "Discarding illegal status change for statement {}: {}",
                self.ctx.statement_id(),
                e
            );
        }
    }

    /// Install a download link and move to `UrlFetched`.
    ///
    /// The link is stored even if the status change is rejected, so a
    /// refreshed link can replace a stale one at any point.
    pub fn set_link(&self, link: ChunkLink) {
        *self.link.lock().unwrap() = Some(link);
        self.set_status(ChunkStatus::UrlFetched);
    }

    pub fn link(&self) -> Option<ChunkLink> {
        self.link.lock().unwrap().clone()
    }

    /// Whether the chunk needs a (new) link before it can download: no link
    /// has been installed, or the installed one is expired.
    pub fn is_link_invalid(&self) -> bool {
        if self.status() == ChunkStatus::Pending {
            return true;
        }
        match self.link.lock().unwrap().as_ref() {
            None => true,
            Some(link) => !self.skip_expiry_check && link.is_expired(),
        }
    }

    /// Decode downloaded bytes into record batches.
    ///
    /// On success the batches land in the chunk's arena and the status
    /// becomes `ProcessingSucceeded`. On failure any partial buffers are
    /// purged, the status becomes `ProcessingFailed`, and the error is
    /// returned for the caller to surface.
    pub fn decode(&self, data: &[u8], codec: CompressionCodec) -> Result<()> {
        match decode::decode_chunk_data(data, codec) {
            Ok(batches) => {
                let metas = batches
                    .first()
                    .map(|b| decode::column_metas(&b.schema()))
                    .unwrap_or_default();
                {
                    let mut arena = self.arena.lock().unwrap();
                    for batch in batches {
                        arena.push(batch);
                    }
                }
                *self.column_metas.lock().unwrap() = metas;
                self.set_status(ChunkStatus::ProcessingSucceeded);
                Ok(())
            }
            Err(e) => {
                self.arena.lock().unwrap().purge();
                self.set_status(ChunkStatus::ProcessingFailed);
                Err(e)
            }
        }
    }

    /// Decoded batches, shared with the arena's buffers.
    pub fn batches(&self) -> Vec<RecordBatch> {
        self.arena.lock().unwrap().snapshot()
    }

    pub fn column_metas(&self) -> Vec<ColumnMeta> {
        self.column_metas.lock().unwrap().clone()
    }

    pub fn resident_bytes(&self) -> usize {
        self.arena.lock().unwrap().resident_bytes()
    }

    /// Row cursor over the decoded batches. The chunk must be in
    /// `ProcessingSucceeded`.
    pub fn rows(&self) -> Result<ChunkRowIterator> {
        ChunkRowIterator::for_chunk(self)
    }

    /// Free the chunk's buffers. Returns `true` on the call that performed
    /// the release, `false` on every later call.
    pub fn release(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.current() == ChunkStatus::ChunkReleased {
                return false;
            }
            if let Err(e) = state.transition(ChunkStatus::ChunkReleased) {
                warn!(
                    "Discarding illegal release for statement {}: {}",
                    self.ctx.statement_id(),
                    e
                );
                return false;
            }
        }
        self.arena.lock().unwrap().purge();
        *self.link.lock().unwrap() = None;
        true
    }

    /// Mark the chunk ready for reading. First signal wins.
    pub fn signal_ready(&self) -> bool {
        self.ready.complete(Ok(()))
    }

    /// Mark the chunk permanently failed. First signal wins.
    pub fn signal_failed(&self, error: Error) -> bool {
        self.ready.complete(Err(error))
    }

    /// Wait until the download worker finishes this chunk, the timeout
    /// elapses, or the stream is cancelled.
    ///
    /// `None` waits without a deadline.
    pub async fn wait_ready(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ready = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, self.ready.wait()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        chunk_index: self.chunk_index,
                        timeout: limit,
                    }),
                },
                None => self.ready.wait().await,
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::interrupted(format!(
                "statement {} cancelled while waiting for chunk {}",
                self.ctx.statement_id(),
                self.chunk_index
            ))),
            result = ready => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Int32Array, StringArray};
    use arrow_ipc::writer::StreamWriter;
    use arrow_schema::{DataType, Field, Schema};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn create_test_context() -> StatementContext {
        StatementContext::new("01f0-test-statement")
    }

    fn create_test_link(chunk_index: i64, expires_in_secs: i64) -> ChunkLink {
        ChunkLink {
            url: format!("https://storage.example.com/chunk/{chunk_index}"),
            chunk_index,
            row_offset: chunk_index * 100,
            row_count: 100,
            byte_count: 4096,
            expiration: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            http_headers: HashMap::new(),
        }
    }

    fn create_test_ipc_payload() -> Vec<u8> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
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

    #[test]
    fn test_set_link_installs_and_advances() {
        let chunk = Chunk::pending(0, 0, 100, create_test_context(), false);
        assert_eq!(chunk.status(), ChunkStatus::Pending);
        assert!(chunk.is_link_invalid());

        chunk.set_link(create_test_link(0, 600));
        assert_eq!(chunk.status(), ChunkStatus::UrlFetched);
        assert!(!chunk.is_link_invalid());
        assert!(chunk.link().is_some());
    }

    #[test]
    fn test_illegal_status_change_is_discarded() {
        let chunk = Chunk::pending(3, 300, 100, create_test_context(), false);
        chunk.set_status(ChunkStatus::ProcessingSucceeded);
        assert_eq!(chunk.status(), ChunkStatus::Pending);
    }

    #[test]
    fn test_link_expiring_inside_buffer_is_invalid() {
        let chunk = Chunk::pending(0, 0, 100, create_test_context(), false);
        chunk.set_link(create_test_link(0, 30));
        assert!(chunk.is_link_invalid());
    }

    #[test]
    fn test_already_expired_link_is_invalid_without_download() {
        let chunk = Chunk::pending(0, 0, 100, create_test_context(), false);
        chunk.set_link(create_test_link(0, -61));
        assert_eq!(chunk.status(), ChunkStatus::UrlFetched);
        assert!(chunk.is_link_invalid());
    }

    #[test]
    fn test_skip_expiry_check_accepts_stale_link() {
        let chunk = Chunk::pending(0, 0, 100, create_test_context(), true);
        chunk.set_link(create_test_link(0, -600));
        assert!(!chunk.is_link_invalid());
    }

    #[test]
    fn test_decode_success() {
        let chunk = Chunk::downloaded(0, 0, 3, create_test_context());
        chunk
            .decode(&create_test_ipc_payload(), CompressionCodec::None)
            .unwrap();

        assert_eq!(chunk.status(), ChunkStatus::ProcessingSucceeded);
        assert_eq!(chunk.batches().len(), 1);
        assert!(chunk.resident_bytes() > 0);

        let metas = chunk.column_metas();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].name, "id");
        assert_eq!(metas[1].name, "name");
    }

    #[test]
    fn test_decode_failure_purges_and_marks_failed() {
        let chunk = Chunk::downloaded(0, 0, 3, create_test_context());
        let err = chunk
            .decode(b"not arrow data", CompressionCodec::None)
            .unwrap_err();

        assert!(matches!(err, Error::Parse(_)));
        assert_eq!(chunk.status(), ChunkStatus::ProcessingFailed);
        assert!(chunk.batches().is_empty());
        assert_eq!(chunk.resident_bytes(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let chunk = Chunk::downloaded(0, 0, 3, create_test_context());
        chunk
            .decode(&create_test_ipc_payload(), CompressionCodec::None)
            .unwrap();

        assert!(chunk.release());
        assert_eq!(chunk.status(), ChunkStatus::ChunkReleased);
        assert_eq!(chunk.resident_bytes(), 0);
        assert!(chunk.link().is_none());

        assert!(!chunk.release());
        assert_eq!(chunk.status(), ChunkStatus::ChunkReleased);
    }

    #[tokio::test]
    async fn test_wait_ready_observes_signal() {
        let chunk = Arc::new(Chunk::pending(0, 0, 100, create_test_context(), false));
        let cancel = CancellationToken::new();

        let waiter = {
            let chunk = chunk.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { chunk.wait_ready(None, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(chunk.signal_ready());
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_ready_after_signal_returns_immediately() {
        let chunk = Chunk::pending(0, 0, 100, create_test_context(), false);
        chunk.signal_ready();
        let cancel = CancellationToken::new();
        chunk
            .wait_ready(Some(Duration::from_millis(10)), &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let chunk = Chunk::pending(5, 500, 100, create_test_context(), false);
        let cancel = CancellationToken::new();

        let err = chunk
            .wait_ready(Some(Duration::from_millis(20)), &cancel)
            .await
            .unwrap_err();
        match err {
            Error::Timeout { chunk_index, .. } => assert_eq!(chunk_index, 5),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_ready_cancelled() {
        let chunk = Arc::new(Chunk::pending(0, 0, 100, create_test_context(), false));
        let cancel = CancellationToken::new();

        let waiter = {
            let chunk = chunk.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { chunk.wait_ready(None, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Interrupted(_)));
    }

    #[tokio::test]
    async fn test_first_signal_wins() {
        let chunk = Chunk::pending(0, 0, 100, create_test_context(), false);
        assert!(chunk.signal_failed(Error::download("connection reset")));
        assert!(!chunk.signal_ready());

        let cancel = CancellationToken::new();
        let err = chunk.wait_ready(None, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Download(_)));
    }
}
