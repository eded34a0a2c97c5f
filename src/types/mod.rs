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

//! Type definitions for the chunk retrieval engine.
//!
//! Organized by domain:
//! - `config`: engine configuration
//! - `link`: pre-signed chunk links and expiry rules
//! - `manifest`: result manifest and link wire shapes

pub mod config;
pub mod link;
pub mod manifest;

pub use config::FetchConfig;
pub use link::{ChunkLink, LINK_EXPIRY_BUFFER_SECS};
pub use manifest::{ChunkDescriptor, CompressionCodec, LinkDescriptor, ResultManifest};

use std::fmt;
use std::sync::Arc;

/// Identifies the statement whose result is being fetched.
///
/// Passed explicitly into the provider and cloned into every spawned task,
/// where it appears in log lines. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatementContext {
    statement_id: Arc<str>,
}

impl StatementContext {
    pub fn new(statement_id: impl Into<String>) -> Self {
        Self {
            statement_id: statement_id.into().into(),
        }
    }

    pub fn statement_id(&self) -> &str {
        &self.statement_id
    }
}

impl fmt::Display for StatementContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.statement_id)
    }
}
