use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CACHE_DIR: &str = "cache_data";
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct Config {
    /// Root of the on-disk tile cache.
    ///
    /// Tiles already present below it are reused instead of downloaded again.
    pub cache_dir: PathBuf,
    /// Upper bound of tile requests in flight.
    pub concurrency: usize,
    /// Retries per tile after a transient failure (5xx, 429, timeouts).
    pub retries: u32,
    /// Timeout applied to every HTTP request.
    pub timeout: Duration,
    /// 0 prints everything, 1 hides headers, 2 also hides progress.
    pub quiet: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            concurrency: DEFAULT_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            quiet: 0,
        }
    }
}
