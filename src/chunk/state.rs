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

//! Chunk lifecycle state machine.
//!
//! Every chunk carries a [`ChunkStateMachine`] that only allows moves along
//! the edges below. A transition to the current state is a no-op; an illegal
//! transition returns an error that callers log and discard, leaving the
//! state unchanged. Nothing in the download pipeline aborts on an illegal
//! transition.
//!
//! ```text
//!   Pending ----------> UrlFetched, DownloadFailed, ChunkReleased
//!   UrlFetched -------> DownloadSucceeded, DownloadFailed, Cancelled, ChunkReleased
//!   DownloadSucceeded > ProcessingSucceeded, ProcessingFailed, ChunkReleased
//!   ProcessingSucceeded> ChunkReleased
//!   DownloadFailed ---> DownloadRetry, ChunkReleased
//!   DownloadRetry ----> UrlFetched, DownloadSucceeded, DownloadFailed, ChunkReleased
//!   ProcessingFailed -> ChunkReleased
//!   Cancelled --------> ChunkReleased
//!   ChunkReleased ----> (terminal)
//! ```

use crate::error::{Error, Result};
use std::fmt;
use tracing::trace;

/// Lifecycle status of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkStatus {
    /// No link known yet.
    Pending,
    /// A link is installed, download not finished.
    UrlFetched,
    /// Reserved; downloads currently move straight from `UrlFetched` /
    /// `DownloadRetry` to `DownloadSucceeded`.
    DownloadInProgress,
    /// Bytes fetched, not yet decoded.
    DownloadSucceeded,
    /// Decoded batches available for reading.
    ProcessingSucceeded,
    /// Download gave up (may still move to `DownloadRetry`).
    DownloadFailed,
    /// Decode failed (terminal apart from release).
    ProcessingFailed,
    /// Between failed attempts of the download worker.
    DownloadRetry,
    /// Cancelled before the download finished.
    Cancelled,
    /// Buffers freed; nothing further is valid.
    ChunkReleased,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::UrlFetched => "UrlFetched",
            Self::DownloadInProgress => "DownloadInProgress",
            Self::DownloadSucceeded => "DownloadSucceeded",
            Self::ProcessingSucceeded => "ProcessingSucceeded",
            Self::DownloadFailed => "DownloadFailed",
            Self::ProcessingFailed => "ProcessingFailed",
            Self::DownloadRetry => "DownloadRetry",
            Self::Cancelled => "Cancelled",
            Self::ChunkReleased => "ChunkReleased",
        }
    }

    /// Targets reachable from this status.
    fn allowed_targets(&self) -> &'static [ChunkStatus] {
        use ChunkStatus::*;
        match self {
            Pending => &[UrlFetched, DownloadFailed, ChunkReleased],
            UrlFetched => &[DownloadSucceeded, DownloadFailed, Cancelled, ChunkReleased],
            DownloadInProgress => &[],
            DownloadSucceeded => &[ProcessingSucceeded, ProcessingFailed, ChunkReleased],
            ProcessingSucceeded => &[ChunkReleased],
            DownloadFailed => &[DownloadRetry, ChunkReleased],
            DownloadRetry => &[UrlFetched, DownloadSucceeded, DownloadFailed, ChunkReleased],
            ProcessingFailed => &[ChunkReleased],
            Cancelled => &[ChunkReleased],
            ChunkReleased => &[],
        }
    }

    /// Whether `target` is a legal move from this status.
    pub fn can_transition_to(&self, target: ChunkStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Whether the chunk's bytes have been fully downloaded. Used by the
    /// link refresh service to decide if an expired link still matters.
    pub fn is_download_complete(&self) -> bool {
        matches!(
            self,
            Self::DownloadSucceeded | Self::ProcessingSucceeded | Self::ChunkReleased
        )
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guards one chunk's status against illegal lifecycle moves.
#[derive(Debug)]
pub struct ChunkStateMachine {
    chunk_index: i64,
    current: ChunkStatus,
}

impl ChunkStateMachine {
    pub fn new(chunk_index: i64, initial: ChunkStatus) -> Self {
        Self {
            chunk_index,
            current: initial,
        }
    }

    pub fn current(&self) -> ChunkStatus {
        self.current
    }

    /// Attempt to move to `target`.
    ///
    /// A move to the current status is an `Ok` no-op. An illegal move
    /// returns [`Error::InvalidStateTransition`] and leaves the status
    /// unchanged; callers log the error rather than propagate it.
    pub fn transition(&mut self, target: ChunkStatus) -> Result<()> {
        if self.current == target {
            return Ok(());
        }
        if !self.current.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                chunk_index: self.chunk_index,
                from: self.current.as_str(),
                to: target.as_str(),
            });
        }
        trace!(
            "Chunk {} status {} -> {}",
            self.chunk_index,
            self.current,
            target
        );
        self.current = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChunkStatus::*;

    const ALL: [ChunkStatus; 10] = [
        Pending,
        UrlFetched,
        DownloadInProgress,
        DownloadSucceeded,
        ProcessingSucceeded,
        DownloadFailed,
        ProcessingFailed,
        DownloadRetry,
        Cancelled,
        ChunkReleased,
    ];

    #[test]
    fn test_happy_path_transitions() {
        let mut sm = ChunkStateMachine::new(0, Pending);
        sm.transition(UrlFetched).unwrap();
        sm.transition(DownloadSucceeded).unwrap();
        sm.transition(ProcessingSucceeded).unwrap();
        sm.transition(ChunkReleased).unwrap();
        assert_eq!(sm.current(), ChunkReleased);
    }

    #[test]
    fn test_retry_path_transitions() {
        let mut sm = ChunkStateMachine::new(0, UrlFetched);
        sm.transition(DownloadFailed).unwrap();
        sm.transition(DownloadRetry).unwrap();
        sm.transition(UrlFetched).unwrap();
        sm.transition(DownloadSucceeded).unwrap();
        assert_eq!(sm.current(), DownloadSucceeded);
    }

    #[test]
    fn test_same_state_is_noop() {
        let mut sm = ChunkStateMachine::new(0, Pending);
        sm.transition(Pending).unwrap();
        assert_eq!(sm.current(), Pending);

        // Even for states with no outgoing edges
        let mut sm = ChunkStateMachine::new(0, ChunkReleased);
        sm.transition(ChunkReleased).unwrap();
        assert_eq!(sm.current(), ChunkReleased);
    }

    #[test]
    fn test_illegal_transition_leaves_state_unchanged() {
        let mut sm = ChunkStateMachine::new(7, Pending);
        let err = sm.transition(ProcessingSucceeded).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(sm.current(), Pending);
    }

    #[test]
    fn test_released_is_terminal() {
        for target in ALL {
            let mut sm = ChunkStateMachine::new(0, ChunkReleased);
            if target == ChunkReleased {
                sm.transition(target).unwrap();
            } else {
                sm.transition(target).unwrap_err();
            }
            assert_eq!(sm.current(), ChunkReleased);
        }
    }

    #[test]
    fn test_every_state_can_release_except_reserved() {
        for from in ALL {
            if matches!(from, DownloadInProgress | ChunkReleased) {
                continue;
            }
            let mut sm = ChunkStateMachine::new(0, from);
            sm.transition(ChunkReleased).unwrap();
        }
    }

    #[test]
    fn test_transition_table_is_exact() {
        // Exhaustively compare transition outcomes against the lifecycle table.
        let allowed: &[(ChunkStatus, &[ChunkStatus])] = &[
            (Pending, &[UrlFetched, DownloadFailed, ChunkReleased]),
            (
                UrlFetched,
                &[DownloadSucceeded, DownloadFailed, Cancelled, ChunkReleased],
            ),
            (DownloadInProgress, &[]),
            (
                DownloadSucceeded,
                &[ProcessingSucceeded, ProcessingFailed, ChunkReleased],
            ),
            (ProcessingSucceeded, &[ChunkReleased]),
            (DownloadFailed, &[DownloadRetry, ChunkReleased]),
            (ProcessingFailed, &[ChunkReleased]),
            (
                DownloadRetry,
                &[UrlFetched, DownloadSucceeded, DownloadFailed, ChunkReleased],
            ),
            (Cancelled, &[ChunkReleased]),
            (ChunkReleased, &[]),
        ];

        for &(from, targets) in allowed {
            for to in ALL {
                let mut sm = ChunkStateMachine::new(0, from);
                let result = sm.transition(to);
                let legal = from == to || targets.contains(&to);
                assert_eq!(
                    result.is_ok(),
                    legal,
                    "transition {} -> {} expected legal={}",
                    from,
                    to,
                    legal
                );
            }
        }
    }

    #[test]
    fn test_download_complete_classification() {
        assert!(DownloadSucceeded.is_download_complete());
        assert!(ProcessingSucceeded.is_download_complete());
        assert!(ChunkReleased.is_download_complete());
        assert!(!Pending.is_download_complete());
        assert!(!UrlFetched.is_download_complete());
        assert!(!DownloadRetry.is_download_complete());
        assert!(!DownloadFailed.is_download_complete());
    }
}
