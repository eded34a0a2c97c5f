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

//! HTTP transport for chunk downloads.
//!
//! Pre-signed chunk URLs carry their own credentials (in the URL or in
//! per-link headers), so the transport sends no authorization of its own.
//! Transient transport failures (connection errors, 429/502/503/504) are
//! retried here with exponential backoff; this is independent of the
//! chunk-level retry performed by the download worker.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for the download transport.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Connection timeout duration.
    pub connect_timeout: Duration,
    /// Read timeout duration.
    pub read_timeout: Duration,
    /// Maximum number of transport-level retry attempts.
    pub max_retries: u32,
    /// Base delay between retry attempts (doubles each retry).
    pub retry_delay: Duration,
    /// Maximum number of idle connections per host.
    pub max_connections_per_host: usize,
    /// User agent string.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            max_retries: 5,
            retry_delay: Duration::from_millis(1500),
            max_connections_per_host: 100,
            user_agent: format!("chunkfetch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Byte-fetching abstraction the download worker depends on.
///
/// The concrete implementation is [`HttpDownloadClient`]; tests substitute
/// scripted transports (canned payloads, injected failures, blocking
/// responses).
#[async_trait]
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    /// Fetch the body at `url` via GET, sending `headers` verbatim.
    ///
    /// A non-2xx status is an error; the implementation may retry
    /// transient failures internally before giving up.
    async fn get(&self, url: &str, headers: &HashMap<String, String>) -> Result<Bytes>;
}

/// reqwest-backed transport with connection pooling and retry.
#[derive(Debug)]
pub struct HttpDownloadClient {
    client: Client,
    config: HttpConfig,
}

impl HttpDownloadClient {
    /// Creates a new transport with the given configuration.
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .pool_max_idle_per_host(config.max_connections_per_host)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::download(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Returns the transport configuration.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Check if the HTTP status code indicates a retryable error.
    fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
                | StatusCode::BAD_GATEWAY
        )
    }

    /// Check if the request error is retryable.
    fn is_retryable_error(error: &reqwest::Error) -> bool {
        error.is_timeout() || error.is_connect() || error.is_request()
    }

    /// Wait with exponential backoff before retry.
    async fn wait_for_retry(&self, attempt: u32) {
        let delay = self.config.retry_delay * 2u32.saturating_pow(attempt.saturating_sub(1));
        debug!("Waiting {:?} before transport retry", delay);
        sleep(delay).await;
    }
}

#[async_trait]
impl HttpTransport for HttpDownloadClient {
    async fn get(&self, url: &str, headers: &HashMap<String, String>) -> Result<Bytes> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            // Build a fresh request for this attempt
            let mut req_builder = self.client.get(url);
            for (name, value) in headers.iter() {
                req_builder = req_builder.header(name.as_str(), value.as_str());
            }

            debug!(
                "GET {} (attempt {}/{})",
                url,
                attempts,
                self.config.max_retries + 1
            );

            match req_builder.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.bytes().await.map_err(|e| {
                            Error::download(format!("failed to read response body: {}", e))
                        });
                    }

                    if Self::is_retryable_status(status) && attempts <= self.config.max_retries {
                        warn!(
                            "GET failed with {} (attempt {}/{}), retrying...",
                            status,
                            attempts,
                            self.config.max_retries + 1
                        );
                        self.wait_for_retry(attempts).await;
                        continue;
                    }

                    // Non-retryable HTTP error or max retries exceeded
                    let error_body = response.text().await.unwrap_or_default();
                    return Err(Error::download(format!(
                        "HTTP {} - {}",
                        status.as_u16(),
                        error_body
                    )));
                }
                Err(e) => {
                    if Self::is_retryable_error(&e) && attempts <= self.config.max_retries {
                        warn!(
                            "GET failed (attempt {}/{}): {}, retrying...",
                            attempts,
                            self.config.max_retries + 1,
                            e
                        );
                        self.wait_for_retry(attempts).await;
                        continue;
                    }

                    return Err(Error::download(format!(
                        "HTTP request failed after {} attempts: {}",
                        attempts, e
                    )));
                }
            }
        }
    }
}
