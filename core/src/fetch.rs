//! The central **abstraction** for getting tile bytes.
//!
//! [`TileSource`] hides where tiles come from; [`fetch_tiles`] drives any
//! source with bounded parallelism and consults the [`TileCache`] first, so a
//! second export of the same area never touches the network.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::debug;

use crate::grid::TileCoord;

mod cache;
mod http;

pub use cache::TileCache;
pub use http::HttpTileSource;

/// Called with `(tiles_done, tiles_total)` after every tile.
pub type ProgressCallback<'a> = dyn Fn(usize, usize) + Send + Sync + 'a;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid tile URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned '{content_type}' instead of an image: {body}")]
    NotAnImage {
        url: String,
        content_type: String,
        body: String,
    },

    #[error("tile cache I/O failed for {}: {source}", path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Failures worth another attempt: overloaded or flaky servers and
    /// network hiccups.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Request { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_body()
            }
            _ => false,
        }
    }
}

/// Anything able to produce the encoded image of a tile.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Returns `Ok(None)` when the source has no tile at `coord`.
    async fn fetch(&self, coord: TileCoord) -> Result<Option<Vec<u8>>, FetchError>;
}

#[derive(Debug, Default)]
pub struct FetchReport {
    /// Encoded tiles, in completion order.
    pub tiles: Vec<(TileCoord, Vec<u8>)>,
    pub downloaded: usize,
    pub cached: usize,
    pub missing: usize,
}

enum Outcome {
    Cached(Vec<u8>),
    Downloaded(Vec<u8>),
    Missing,
}

/// Fetches every tile in `coords`, at most `concurrency` at a time.
///
/// The first hard failure aborts the whole run; tiles the source reports as
/// absent are only counted.
pub async fn fetch_tiles<S>(
    source: &S,
    cache: &TileCache,
    coords: Vec<TileCoord>,
    concurrency: usize,
    on_progress: Option<&ProgressCallback<'_>>,
) -> Result<FetchReport, FetchError>
where
    S: TileSource + ?Sized,
{
    let total = coords.len();
    let mut pending = stream::iter(coords)
        .map(|coord| async move { (coord, fetch_one(source, cache, coord).await) })
        .buffer_unordered(concurrency.max(1));

    let mut report = FetchReport::default();
    let mut done = 0;

    while let Some((coord, outcome)) = pending.next().await {
        match outcome? {
            Outcome::Cached(bytes) => {
                report.cached += 1;
                report.tiles.push((coord, bytes));
            }
            Outcome::Downloaded(bytes) => {
                report.downloaded += 1;
                report.tiles.push((coord, bytes));
            }
            Outcome::Missing => {
                debug!("No tile at row {} col {}", coord.row, coord.col);
                report.missing += 1;
            }
        }

        done += 1;
        if let Some(callback) = on_progress {
            callback(done, total);
        }
    }

    Ok(report)
}

async fn fetch_one<S>(source: &S, cache: &TileCache, coord: TileCoord) -> Result<Outcome, FetchError>
where
    S: TileSource + ?Sized,
{
    if let Some(bytes) = cache.load(coord).await? {
        return Ok(Outcome::Cached(bytes));
    }

    match source.fetch(coord).await? {
        Some(bytes) => {
            cache.store(coord, &bytes).await?;
            Ok(Outcome::Downloaded(bytes))
        }
        None => Ok(Outcome::Missing),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tilestitch_common::geo::Crs;

    use super::*;
    use crate::grid::TileRange;

    /// Serves a fixed payload for every tile except the listed holes.
    struct StaticSource {
        holes: HashSet<TileCoord>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl StaticSource {
        fn new(holes: &[TileCoord]) -> Self {
            Self {
                holes: holes.iter().copied().collect(),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TileSource for StaticSource {
        async fn fetch(&self, coord: TileCoord) -> Result<Option<Vec<u8>>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.holes.contains(&coord) {
                Ok(None)
            } else {
                Ok(Some(format!("{}/{}", coord.row, coord.col).into_bytes()))
            }
        }
    }

    struct FailingSource;

    #[async_trait]
    impl TileSource for FailingSource {
        async fn fetch(&self, _coord: TileCoord) -> Result<Option<Vec<u8>>, FetchError> {
            Err(FetchError::Status {
                url: "http://tiles.invalid/0/0/0.png".into(),
                status: 403,
            })
        }
    }

    fn coords() -> Vec<TileCoord> {
        TileRange {
            min_col: 0,
            min_row: 0,
            max_col: 2,
            max_row: 1,
        }
        .iter()
        .collect()
    }

    #[tokio::test]
    async fn downloads_then_serves_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::new(dir.path(), "layer", &Crs::WebMercator, 4, "png");
        let source = StaticSource::new(&[TileCoord { row: 1, col: 2 }]);

        let first = fetch_tiles(&source, &cache, coords(), 2, None).await.unwrap();
        assert_eq!(first.downloaded, 5);
        assert_eq!(first.missing, 1);
        assert_eq!(first.cached, 0);
        assert_eq!(first.tiles.len(), 5);

        let second = fetch_tiles(&source, &cache, coords(), 2, None).await.unwrap();
        assert_eq!(second.cached, 5);
        assert_eq!(second.downloaded, 0);
        // The hole is asked for again, cached tiles are not.
        assert_eq!(source.calls.load(Ordering::SeqCst), 7);

        let tile = second
            .tiles
            .iter()
            .find(|(coord, _)| *coord == TileCoord { row: 0, col: 1 })
            .map(|(_, bytes)| bytes.clone());
        assert_eq!(tile, Some(b"0/1".to_vec()));
    }

    #[tokio::test]
    async fn respects_concurrency_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::new(dir.path(), "layer", &Crs::WebMercator, 4, "png");
        let source = StaticSource::new(&[]);
        let seen: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());
        let callback: &ProgressCallback<'_> = &|done, total| seen.lock().unwrap().push((done, total));

        fetch_tiles(&source, &cache, coords(), 2, Some(callback)).await.unwrap();

        assert!(source.peak.load(Ordering::SeqCst) <= 2);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen.last(), Some(&(6, 6)));
    }

    #[tokio::test]
    async fn hard_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::new(dir.path(), "layer", &Crs::WebMercator, 4, "png");

        let err = fetch_tiles(&FailingSource, &cache, coords(), 4, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 403, .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_statuses() {
        let status = |status| FetchError::Status {
            url: String::new(),
            status,
        };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(400).is_transient());
    }
}
