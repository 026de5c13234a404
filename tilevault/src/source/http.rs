//! HTTP tile server adapter
//!
//! Fetches tiles from a remote XYZ server by substituting `{z}`, `{x}`,
//! `{y}` into a URL template. Each source owns one pooled reqwest
//! client sized to its worker count; response statuses are mapped onto
//! [`TileResult`] so the pipeline never sees transport-level errors.

use super::types::{SourceDescriptor, SourceError, TileFetcher, TileResult};
use crate::coord::TileCoord;
use crate::validate::{Validation, Validator};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default User-Agent, used when the config does not set one. Some tile
/// servers reject requests without a User-Agent header.
pub const DEFAULT_USER_AGENT: &str = concat!("tilevault/", env!("CARGO_PKG_VERSION"));

/// A remote XYZ tile server.
pub struct HttpSource {
    descriptor: SourceDescriptor,
    url_template: String,
    headers: HeaderMap,
    client: reqwest::Client,
    validator: Arc<Validator>,
}

impl HttpSource {
    /// Creates an HTTP source with its own pooled client.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - Declared name, kind, zoom range and bounds
    /// * `url_template` - URL containing `{z}`, `{x}` and `{y}` placeholders
    /// * `headers` - Extra request headers from configuration
    /// * `user_agent` - User-Agent for every request
    /// * `timeout` - Per-request timeout
    /// * `pool_size` - Connection pool cap, normally the worker count
    /// * `validator` - Shared payload classifier
    pub fn new(
        descriptor: SourceDescriptor,
        url_template: String,
        headers: &[(String, String)],
        user_agent: &str,
        timeout: Duration,
        pool_size: usize,
        validator: Arc<Validator>,
    ) -> Result<Self, SourceError> {
        if !url_template.contains("{z}") || !url_template.contains("{x}") || !url_template.contains("{y}")
        {
            return Err(SourceError::InvalidUrlTemplate {
                template: url_template,
                reason: "must contain {z}, {x} and {y} placeholders".to_string(),
            });
        }

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| SourceError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| SourceError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            header_map.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(Policy::limited(1))
            .pool_max_idle_per_host(pool_size.max(1))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| SourceError::ClientBuild(e.to_string()))?;

        Ok(Self {
            descriptor,
            url_template,
            headers: header_map,
            client,
            validator,
        })
    }

    /// Instantiates the URL template for the given tile.
    fn tile_url(&self, coord: &TileCoord) -> String {
        self.url_template
            .replace("{z}", &coord.zoom.to_string())
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string())
    }

    /// Maps an HTTP status that is not 2xx onto a fetch outcome.
    fn classify_status(status: StatusCode) -> TileResult {
        if status == StatusCode::NOT_FOUND {
            TileResult::NotFound
        } else if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            TileResult::Transient {
                reason: format!("HTTP {status}"),
            }
        } else {
            TileResult::Invalid {
                reason: format!("HTTP {status}"),
            }
        }
    }
}

impl TileFetcher for HttpSource {
    async fn fetch(&self, coord: TileCoord) -> TileResult {
        let url = self.tile_url(&coord);
        trace!(source = %self.descriptor.name, tile = %coord, url = %url, "HTTP GET");

        let response = match self
            .client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    source = %self.descriptor.name,
                    tile = %coord,
                    error = %e,
                    is_timeout = e.is_timeout(),
                    is_connect = e.is_connect(),
                    "HTTP request failed"
                );
                return TileResult::Transient {
                    reason: format!("request failed: {e}"),
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!(source = %self.descriptor.name, tile = %coord, status = status.as_u16(), "HTTP error status");
            return Self::classify_status(status);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let body = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                return TileResult::Transient {
                    reason: format!("failed to read response body: {e}"),
                }
            }
        };

        if body.is_empty() {
            return TileResult::Empty;
        }

        match self.validator.validate(self.descriptor.tile_kind, &body) {
            Validation::Valid(bytes) => TileResult::Got {
                bytes,
                content_type,
                source_name: self.descriptor.name.clone(),
            },
            Validation::Empty => TileResult::Empty,
            Validation::Invalid(reason) => TileResult::Invalid { reason },
        }
    }

    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }
}
