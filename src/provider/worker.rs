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

//! Per-chunk download worker.
//!
//! One task per chunk: obtain a valid link (refreshing through the link
//! service when the installed one is missing or expired), download the
//! bytes, decode them, and complete the chunk's readiness signal exactly
//! once. Download failures retry with a fixed backoff up to the configured
//! cap; link and decode failures are terminal for the chunk.

use crate::chunk::{Chunk, ChunkStatus};
use crate::error::{Error, Result};
use crate::provider::downloader::ChunkDownloader;
use crate::provider::links::LinkRefreshService;
use crate::types::{CompressionCodec, StatementContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Everything one download task needs, captured at spawn time.
pub(crate) struct DownloadContext {
    pub chunk: Arc<Chunk>,
    pub links: Arc<LinkRefreshService>,
    pub downloader: Arc<ChunkDownloader>,
    pub codec: CompressionCodec,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub cancel: CancellationToken,
    pub ctx: StatementContext,
}

/// Spawn the download task for one chunk.
///
/// Cancellation preempts the task at any await point; the finalization step
/// still runs so the chunk's signal always resolves.
pub(crate) fn spawn_download_worker(runtime: &Handle, dl: DownloadContext) -> JoinHandle<()> {
    runtime.spawn(async move {
        let chunk = dl.chunk.clone();
        let outcome = tokio::select! {
            _ = dl.cancel.cancelled() => Err(Error::interrupted(format!(
                "statement {} cancelled while downloading chunk {}",
                dl.ctx.statement_id(),
                chunk.chunk_index()
            ))),
            result = run_attempts(&dl) => result,
        };
        finalize(&chunk, outcome);
    })
}

async fn run_attempts(dl: &DownloadContext) -> Result<()> {
    let chunk = &dl.chunk;
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        if chunk.is_link_invalid() {
            let link = dl.links.get_link(chunk.chunk_index()).await?;
            chunk.set_link(link);
        }
        let link = chunk.link().ok_or_else(|| {
            Error::link_unavailable(format!(
                "no link installed for chunk {}",
                chunk.chunk_index()
            ))
        })?;

        match dl.downloader.download(&link).await {
            Ok(bytes) => {
                chunk.set_status(ChunkStatus::DownloadSucceeded);
                // Decode failures are terminal: the chunk is already in
                // ProcessingFailed and a fresh download would not help.
                chunk.decode(&bytes, dl.codec)?;
                return Ok(());
            }
            Err(e) if e.is_retryable() && attempt < dl.max_retries => {
                warn!(
                    "Download attempt {}/{} for chunk {} of statement {} failed: {}",
                    attempt,
                    dl.max_retries,
                    chunk.chunk_index(),
                    dl.ctx.statement_id(),
                    e
                );
                chunk.set_status(ChunkStatus::DownloadFailed);
                chunk.set_status(ChunkStatus::DownloadRetry);
                tokio::time::sleep(dl.retry_delay).await;
            }
            Err(e) => {
                error!(
                    "Chunk {} of statement {} failed after {} attempt(s): {}",
                    chunk.chunk_index(),
                    dl.ctx.statement_id(),
                    attempt,
                    e
                );
                chunk.set_status(ChunkStatus::DownloadFailed);
                return Err(e);
            }
        }
    }
}

/// Resolve the chunk's readiness signal exactly once, whichever branch
/// produced the outcome.
fn finalize(chunk: &Chunk, outcome: Result<()>) {
    match outcome {
        Ok(()) => {
            chunk.signal_ready();
        }
        Err(e) => {
            if matches!(e, Error::Interrupted(_)) {
                chunk.set_status(ChunkStatus::Cancelled);
            } else {
                chunk.set_status(ChunkStatus::DownloadFailed);
            }
            chunk.signal_failed(e);
        }
    }
}
