use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tilestitch_protocols::TileEndpoint;
use tracing::{debug, warn};
use url::Url;

use super::{FetchError, TileSource};
use crate::grid::TileCoord;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(8);
const MAX_JITTER_MS: u64 = 100;
/// Leading characters of an unexpected body kept in the error message.
const BODY_SNIPPET_LEN: usize = 200;

/// Pulls tiles of one tile matrix from a WMTS server.
pub struct HttpTileSource {
    client: Client,
    endpoint: TileEndpoint,
    tile_matrix: String,
    retries: u32,
}

impl HttpTileSource {
    pub fn new(client: Client, endpoint: TileEndpoint, tile_matrix: &str, retries: u32) -> Self {
        Self {
            client,
            endpoint,
            tile_matrix: tile_matrix.to_string(),
            retries,
        }
    }

    async fn request(&self, url: &Url) -> Result<Option<Vec<u8>>, FetchError> {
        let request_err = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(request_err)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        // Many servers answer with a 200 OWS ExceptionReport instead of an image.
        if content_type.contains("xml") || content_type.starts_with("text/") {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::NotAnImage {
                url: url.to_string(),
                content_type,
                body: body.trim().chars().take(BODY_SNIPPET_LEN).collect(),
            });
        }

        let bytes = response.bytes().await.map_err(request_err)?;
        if bytes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(bytes.to_vec()))
        }
    }
}

#[async_trait]
impl TileSource for HttpTileSource {
    async fn fetch(&self, coord: TileCoord) -> Result<Option<Vec<u8>>, FetchError> {
        let url = self.endpoint.tile_url(&self.tile_matrix, coord.row, coord.col)?;
        let mut attempt = 0;

        loop {
            match self.request(&url).await {
                Ok(tile) => {
                    debug!("Fetched tile {url}");
                    return Ok(tile);
                }
                Err(err) if err.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    let delay = backoff(attempt);
                    warn!(
                        "Retrying tile {}/{} in {} ms ({err})",
                        coord.row,
                        coord.col,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Exponential backoff with a little jitter so parallel retries spread out.
fn backoff(attempt: u32) -> Duration {
    let exponential = BACKOFF_BASE.saturating_mul(1 << attempt.saturating_sub(1).min(10));
    let jitter = Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MS));
    exponential.min(BACKOFF_MAX) + jitter
}
