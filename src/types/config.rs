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

//! Configuration for the chunk retrieval engine.

use crate::error::{Error, Result};
use std::time::Duration;

/// Configuration for chunk fetching and decoding.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum number of chunks downloaded or resident in memory at once.
    /// The effective window is capped at the result's chunk count.
    pub max_parallel_downloads: usize,
    /// Maximum number of download attempts per chunk.
    pub max_retries: u32,
    /// Delay between chunk download attempts.
    pub retry_delay: Duration,
    /// Timeout for waiting for a chunk to be ready. `None` waits
    /// indefinitely.
    pub chunk_ready_timeout: Option<Duration>,
    /// Log a warning when download speed falls below this threshold (MB/s).
    pub speed_threshold_mbps: f64,
    /// Skip link expiry checks. Only for test runs against a stub service
    /// that hands out canned expiration timestamps.
    pub skip_expiry_checks: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_parallel_downloads: 16,
            max_retries: 5,
            retry_delay: Duration::from_millis(1500),
            chunk_ready_timeout: None,
            speed_threshold_mbps: 0.1,
            skip_expiry_checks: false,
        }
    }
}

impl FetchConfig {
    /// Map a host-supplied timeout in seconds to the internal representation.
    /// Values ≤ 0 mean "wait indefinitely".
    pub fn timeout_from_secs(secs: i64) -> Option<Duration> {
        if secs <= 0 {
            None
        } else {
            Some(Duration::from_secs(secs as u64))
        }
    }

    /// Validate configuration values before constructing a provider.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_downloads == 0 {
            return Err(Error::config("max_parallel_downloads must be at least 1"));
        }
        if self.max_retries == 0 {
            return Err(Error::config("max_retries must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.max_parallel_downloads, 16);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(1500));
        assert!(config.chunk_ready_timeout.is_none());
        assert!(!config.skip_expiry_checks);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeout_from_secs() {
        assert_eq!(FetchConfig::timeout_from_secs(-1), None);
        assert_eq!(FetchConfig::timeout_from_secs(0), None);
        assert_eq!(
            FetchConfig::timeout_from_secs(30),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let config = FetchConfig {
            max_parallel_downloads: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FetchConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
