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

//! Single-chunk byte download with transfer-speed accounting.

use crate::error::Result;
use crate::http::HttpTransport;
use crate::types::ChunkLink;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Fetches one chunk's bytes through the HTTP transport and logs the
/// observed transfer rate. Rates below the configured threshold are logged
/// as warnings so slow storage reads stand out.
#[derive(Debug)]
pub struct ChunkDownloader {
    transport: Arc<dyn HttpTransport>,
    speed_threshold_mbps: f64,
}

impl ChunkDownloader {
    pub fn new(transport: Arc<dyn HttpTransport>, speed_threshold_mbps: f64) -> Self {
        Self {
            transport,
            speed_threshold_mbps,
        }
    }

    pub async fn download(&self, link: &ChunkLink) -> Result<Bytes> {
        let started = Instant::now();
        let bytes = self.transport.get(&link.url, &link.http_headers).await?;
        let elapsed = started.elapsed().as_secs_f64();

        let megabytes = bytes.len() as f64 / (1024.0 * 1024.0);
        let rate = if elapsed > 0.0 {
            megabytes / elapsed
        } else {
            f64::INFINITY
        };
        if rate < self.speed_threshold_mbps {
            warn!(
                "Slow download for chunk {}: {:.2} MB in {:.2}s ({:.3} MB/s)",
                link.chunk_index, megabytes, elapsed, rate
            );
        } else {
            debug!(
                "Downloaded chunk {}: {:.2} MB in {:.2}s ({:.3} MB/s)",
                link.chunk_index, megabytes, elapsed, rate
            );
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;

    #[derive(Debug)]
    struct StaticTransport {
        payload: Option<Vec<u8>>,
    }

    #[async_trait]
    impl HttpTransport for StaticTransport {
        async fn get(&self, _url: &str, _headers: &HashMap<String, String>) -> Result<Bytes> {
            match &self.payload {
                Some(data) => Ok(Bytes::from(data.clone())),
                None => Err(Error::download("HTTP 503")),
            }
        }
    }

    fn make_link() -> ChunkLink {
        ChunkLink {
            url: "https://storage.example.com/chunk0".to_string(),
            chunk_index: 0,
            row_offset: 0,
            row_count: 100,
            byte_count: 5,
            expiration: Utc::now() + chrono::Duration::hours(1),
            http_headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_download_returns_bytes() {
        let downloader = ChunkDownloader::new(
            Arc::new(StaticTransport {
                payload: Some(b"hello".to_vec()),
            }),
            0.1,
        );
        let bytes = downloader.download(&make_link()).await.unwrap();
        assert_eq!(bytes.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_download_propagates_transport_error() {
        let downloader = ChunkDownloader::new(Arc::new(StaticTransport { payload: None }), 0.1);
        let err = downloader.download(&make_link()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
