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

//! Per-chunk store for decoded record batches.

use arrow_array::RecordBatch;

/// Owns the decoded batches of one chunk and tracks their memory footprint.
///
/// Purging is idempotent; it runs both on decode failure and on release, and
/// the released chunk may be purged again without effect.
#[derive(Debug, Default)]
pub struct ChunkArena {
    batches: Vec<RecordBatch>,
    resident_bytes: usize,
}

impl ChunkArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, batch: RecordBatch) {
        self.resident_bytes += batch.get_array_memory_size();
        self.batches.push(batch);
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Cheap copy of the stored batches. `RecordBatch` clones share the
    /// underlying column buffers, so readers can iterate without holding
    /// the chunk lock.
    pub fn snapshot(&self) -> Vec<RecordBatch> {
        self.batches.clone()
    }

    /// Drop all batches and reset the byte count.
    pub fn purge(&mut self) {
        self.batches.clear();
        self.resident_bytes = 0;
    }
}
