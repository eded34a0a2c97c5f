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

//! Link prefetch and refresh.
//!
//! The `LinkSource` trait is the statement-scoped boundary to whatever
//! control-plane call produces pre-signed links. `LinkRefreshService` sits
//! on top of it and maintains one replaceable promise per chunk index,
//! filled by a chain of batch fetches:
//!
//! ```text
//!   slots:   [0][1][2][3][4][5][6][7]...
//!                     ^
//!                     next_batch_start
//!
//!   chain:   fetch(0) -> resolves 0..=3 -> fetch(4) -> resolves 4..=7 -> ...
//! ```
//!
//! Only one batch fetch runs at a time. When a resolved link turns out to
//! be expired before its chunk finished downloading, the service cancels
//! any in-flight batch, replaces every promise from the smallest such index
//! onward, and rewinds the chain to refetch from there. Each batch request
//! returns a contiguous run of links, so the rewind can never skip a chunk.

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::types::{ChunkLink, StatementContext};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Bounded wait for an aborted batch fetch to unwind during a reset.
const RESET_CANCEL_WAIT: Duration = Duration::from_millis(100);

/// Statement-scoped source of chunk links.
///
/// `fetch_links` returns a contiguous run of links starting at
/// `start_chunk_index`; it may be called repeatedly with increasing start
/// indices as chunks are consumed, and called again with an earlier index
/// after an expiry reset.
#[async_trait]
pub trait LinkSource: Send + Sync + std::fmt::Debug {
    async fn fetch_links(&self, start_chunk_index: i64) -> Result<Vec<ChunkLink>>;
}

/// One-shot, replaceable promise for a chunk's current link.
///
/// The first resolution wins. Replacing the slot drops its sender, which
/// wakes parked waiters; they re-subscribe to the replacement.
#[derive(Debug)]
struct LinkSlot {
    tx: watch::Sender<Option<Result<ChunkLink>>>,
}

impl LinkSlot {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    fn resolve(&self, result: Result<ChunkLink>) -> bool {
        let mut result = Some(result);
        self.tx.send_if_modified(|slot| match slot {
            None => {
                *slot = result.take();
                true
            }
            Some(_) => false,
        })
    }

    fn subscribe(&self) -> watch::Receiver<Option<Result<ChunkLink>>> {
        self.tx.subscribe()
    }

    fn peek(&self) -> Option<Result<ChunkLink>> {
        self.tx.borrow().clone()
    }
}

/// Keeps a valid-link promise per chunk index, prefetching in batches ahead
/// of consumption and re-synchronizing when expiry is detected.
pub struct LinkRefreshService {
    /// External source of link batches, bound to one statement.
    source: Arc<dyn LinkSource>,
    /// Statement this service serves; carried into log lines.
    ctx: StatementContext,
    /// Dense chunk count from the manifest.
    total_chunks: i64,
    /// Chunk entities, shared with the provider; consulted to decide
    /// whether an expired link still matters.
    chunks: Arc<DashMap<i64, Arc<Chunk>>>,
    /// Per-index link promise, replaced wholesale on reset.
    slots: DashMap<i64, LinkSlot>,
    /// Next index the batch chain will request from the source.
    next_batch_start: AtomicI64,
    /// Whether a batch fetch currently holds the chain.
    fetch_in_progress: AtomicBool,
    /// Whether the chain has been started since construction or the last
    /// reset.
    chain_started: AtomicBool,
    /// Bumped by every reset; a batch task applies its results only if the
    /// epoch has not moved underneath it.
    reset_epoch: AtomicU64,
    /// Set once by `shutdown`.
    shut_down: AtomicBool,
    /// Handle of the in-flight batch task, for cancellation during reset.
    current_fetch: Mutex<Option<JoinHandle<()>>>,
    /// Serializes detect-expiry / cancel / replace / rearm sequences, and
    /// batch-result bookkeeping, against each other.
    reset_lock: TokioMutex<()>,
    /// Disables expiry-driven resets (test mode).
    skip_expiry_checks: bool,
    /// Runtime the batch fetch tasks run on.
    runtime_handle: tokio::runtime::Handle,
}

impl std::fmt::Debug for LinkRefreshService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkRefreshService")
            .field("statement_id", &self.ctx.statement_id())
            .field("total_chunks", &self.total_chunks)
            .field(
                "next_batch_start",
                &self.next_batch_start.load(Ordering::Relaxed),
            )
            .field(
                "fetch_in_progress",
                &self.fetch_in_progress.load(Ordering::Relaxed),
            )
            .field("chain_started", &self.chain_started.load(Ordering::Relaxed))
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

impl LinkRefreshService {
    /// Create the service with one pending promise per chunk index,
    /// pre-resolving the promises covered by `initial_links`. The batch
    /// chain itself starts lazily on the first `get_link` call.
    pub fn new(
        source: Arc<dyn LinkSource>,
        ctx: StatementContext,
        total_chunks: i64,
        chunks: Arc<DashMap<i64, Arc<Chunk>>>,
        initial_links: &[ChunkLink],
        skip_expiry_checks: bool,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        let slots = DashMap::new();
        for index in 0..total_chunks {
            slots.insert(index, LinkSlot::new());
        }

        let mut max_known = -1i64;
        for link in initial_links {
            max_known = max_known.max(link.chunk_index);
            if let Some(slot) = slots.get(&link.chunk_index) {
                slot.resolve(Ok(link.clone()));
            }
        }

        debug!(
            "Link refresh service for statement {}: {} chunks, {} initial links, chain starts at {}",
            ctx.statement_id(),
            total_chunks,
            initial_links.len(),
            max_known + 1
        );

        Self {
            source,
            ctx,
            total_chunks,
            chunks,
            slots,
            next_batch_start: AtomicI64::new(max_known + 1),
            fetch_in_progress: AtomicBool::new(false),
            chain_started: AtomicBool::new(false),
            reset_epoch: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            current_fetch: Mutex::new(None),
            reset_lock: TokioMutex::new(()),
            skip_expiry_checks,
            runtime_handle,
        }
    }

    /// Current link for `chunk_index`, waiting for the prefetch chain if the
    /// promise is still pending.
    ///
    /// Fails fast after `shutdown` or for an out-of-range index. Otherwise
    /// runs the expiry-and-reset check first, so a stale resolved link for an
    /// undownloaded chunk is refetched rather than handed out.
    pub async fn get_link(self: &Arc<Self>, chunk_index: i64) -> Result<ChunkLink> {
        loop {
            if self.shut_down.load(Ordering::Acquire) {
                return Err(Error::link_unavailable(format!(
                    "link service for statement {} is shut down",
                    self.ctx.statement_id()
                )));
            }
            if chunk_index < 0 || chunk_index >= self.total_chunks {
                return Err(Error::link_unavailable(format!(
                    "chunk {} is out of range for statement {} ({} chunks)",
                    chunk_index,
                    self.ctx.statement_id(),
                    self.total_chunks
                )));
            }

            self.maybe_reset(chunk_index).await;
            self.ensure_chain_started().await;

            let mut rx = match self.slots.get(&chunk_index) {
                Some(slot) => slot.subscribe(),
                None => {
                    return Err(Error::link_unavailable(format!(
                        "no link promise for chunk {chunk_index}"
                    )))
                }
            };
            match rx.wait_for(|value| value.is_some()).await {
                Ok(resolved) => {
                    let value = resolved.clone();
                    drop(resolved);
                    if let Some(result) = value {
                        return result;
                    }
                }
                // The slot was replaced by a reset; subscribe to its
                // successor.
                Err(_) => continue,
            };
        }
    }

    /// Mark the service dead and resolve every still-pending promise with a
    /// shutdown error. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.current_fetch.lock().unwrap().take() {
            handle.abort();
        }
        self.fail_pending(&Error::link_unavailable(format!(
            "link service for statement {} is shut down",
            self.ctx.statement_id()
        )));
        debug!(
            "Link refresh service for statement {} shut down",
            self.ctx.statement_id()
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn next_batch_start_index(&self) -> i64 {
        self.next_batch_start.load(Ordering::Acquire)
    }

    /// Start the batch chain if no call has started it since the last reset.
    async fn ensure_chain_started(self: &Arc<Self>) {
        // compare_exchange returns Ok if this call claimed the start
        if self
            .chain_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.trigger_batch_fetch().await;
        }
    }

    async fn trigger_batch_fetch(self: &Arc<Self>) {
        let _guard = self.reset_lock.lock().await;
        self.trigger_batch_fetch_locked();
    }

    /// Claim the chain and spawn the next batch task. Caller holds
    /// `reset_lock`, so the claim and the handle store cannot interleave
    /// with a reset.
    fn trigger_batch_fetch_locked(self: &Arc<Self>) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        let start = self.next_batch_start.load(Ordering::Acquire);
        if start >= self.total_chunks {
            return;
        }
        if self
            .fetch_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let epoch = self.reset_epoch.load(Ordering::Acquire);
        let service = Arc::clone(self);
        let handle = self.runtime_handle.spawn(async move {
            service.run_batch_fetch(start, epoch).await;
        });
        *self.current_fetch.lock().unwrap() = Some(handle);
    }

    /// One batch of the prefetch chain: ask the source for links from
    /// `start_index`, resolve the returned promises, advance the chain, and
    /// schedule the next batch if chunks remain.
    ///
    /// Bookkeeping happens under `reset_lock` and only if no reset bumped
    /// the epoch while the fetch was in flight; a superseded batch leaves
    /// all chain state to the reset that replaced it.
    async fn run_batch_fetch(self: Arc<Self>, start_index: i64, epoch: u64) {
        debug!(
            "Fetching result links for statement {} from chunk {}",
            self.ctx.statement_id(),
            start_index
        );
        let fetched = self.source.fetch_links(start_index).await;

        let guard = self.reset_lock.lock().await;
        if self.shut_down.load(Ordering::Acquire)
            || self.reset_epoch.load(Ordering::Acquire) != epoch
        {
            return;
        }

        match fetched {
            Ok(links) if links.is_empty() => {
                let error = Error::link_unavailable(format!(
                    "link source returned no links for statement {} from chunk {}",
                    self.ctx.statement_id(),
                    start_index
                ));
                warn!("{error}");
                self.fail_pending(&error);
                self.fetch_in_progress.store(false, Ordering::Release);
            }
            Ok(links) => {
                let count = links.len();
                let mut max_index = start_index - 1;
                for link in links {
                    max_index = max_index.max(link.chunk_index);
                    if let Some(slot) = self.slots.get(&link.chunk_index) {
                        slot.resolve(Ok(link));
                    }
                }
                let next_start = max_index + 1;
                self.next_batch_start.store(next_start, Ordering::Release);
                self.fetch_in_progress.store(false, Ordering::Release);
                debug!(
                    "Resolved {} links for statement {} (chunks up to {})",
                    count,
                    self.ctx.statement_id(),
                    max_index
                );
                drop(guard);
                if next_start < self.total_chunks {
                    self.trigger_batch_fetch().await;
                }
            }
            Err(e) => {
                warn!(
                    "Link batch from chunk {} failed for statement {}: {}",
                    start_index,
                    self.ctx.statement_id(),
                    e
                );
                self.fail_pending(&e);
                self.fetch_in_progress.store(false, Ordering::Release);
            }
        }
    }

    /// Expiry-and-reset. If the requested chunk's resolved link expired
    /// before its chunk finished downloading, rewind the chain to the
    /// smallest index in that situation: cancel any in-flight batch, replace
    /// every promise from there onward, and rearm the chain start.
    ///
    /// The whole sequence holds `reset_lock` so the check and the reset are
    /// atomic with respect to concurrent callers and batch bookkeeping.
    async fn maybe_reset(&self, chunk_index: i64) {
        if self.skip_expiry_checks {
            return;
        }
        let _guard = self.reset_lock.lock().await;
        if !self.link_needs_refetch(chunk_index) {
            return;
        }

        // Batches are contiguous runs, so restarting at the smallest
        // affected index cannot skip a chunk.
        let mut restart_at = None;
        for index in 1..self.total_chunks {
            if self.link_needs_refetch(index) {
                restart_at = Some(index);
                break;
            }
        }
        let Some(restart_at) = restart_at else { return };

        warn!(
            "Expired link detected for statement {}; refetching links from chunk {}",
            self.ctx.statement_id(),
            restart_at
        );

        self.reset_epoch.fetch_add(1, Ordering::AcqRel);
        let in_flight = self.current_fetch.lock().unwrap().take();
        if let Some(handle) = in_flight {
            handle.abort();
            let _ = tokio::time::timeout(RESET_CANCEL_WAIT, handle).await;
        }
        self.fetch_in_progress.store(false, Ordering::Release);
        for index in restart_at..self.total_chunks {
            self.slots.insert(index, LinkSlot::new());
        }
        self.next_batch_start.store(restart_at, Ordering::Release);
        self.chain_started.store(false, Ordering::Release);
    }

    /// Whether the promise for `chunk_index` is resolved with a link that
    /// has expired while the chunk still needs its bytes.
    fn link_needs_refetch(&self, chunk_index: i64) -> bool {
        let link = match self.slots.get(&chunk_index).and_then(|slot| slot.peek()) {
            Some(Ok(link)) => link,
            _ => return false,
        };
        if !link.is_expired() {
            return false;
        }
        match self.chunks.get(&chunk_index) {
            Some(chunk) => !chunk.status().is_download_complete(),
            None => false,
        }
    }

    /// Resolve every still-pending promise with `error`. Already-resolved
    /// promises keep their value.
    fn fail_pending(&self, error: &Error) {
        for entry in self.slots.iter() {
            entry.value().resolve(Err(error.clone()));
        }
    }
}
