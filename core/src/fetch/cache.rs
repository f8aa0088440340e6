//! On-disk tile cache.
//!
//! Layout: `<root>/<layer>_cache_<EPSGxxxx>/<zoom>/<row>/<col>.<ext>`, one
//! directory per layer, SRS and zoom level.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tilestitch_common::geo::Crs;
use tokio::fs;

use super::FetchError;
use crate::grid::TileCoord;

#[derive(Clone, Debug)]
pub struct TileCache {
    level_dir: PathBuf,
    extension: String,
}

impl TileCache {
    pub fn new(root: &Path, layer: &str, crs: &Crs, zoom: u32, extension: &str) -> Self {
        let layer_dir = format!("{}_cache_{}", sanitize(layer), crs.cache_suffix());
        Self {
            level_dir: root.join(layer_dir).join(zoom.to_string()),
            extension: extension.to_string(),
        }
    }

    pub fn path_for(&self, coord: TileCoord) -> PathBuf {
        self.level_dir
            .join(coord.row.to_string())
            .join(format!("{}.{}", coord.col, self.extension))
    }

    /// Cached bytes of a tile, `None` when it was never stored.
    pub async fn load(&self, coord: TileCoord) -> Result<Option<Vec<u8>>, FetchError> {
        let path = self.path_for(coord);
        match fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => Ok(Some(bytes)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(FetchError::Cache { path, source }),
        }
    }

    /// Stores a tile through a temporary file so readers never see a partial tile.
    pub async fn store(&self, coord: TileCoord, bytes: &[u8]) -> Result<(), FetchError> {
        let path = self.path_for(coord);
        let cache_err = |source| FetchError::Cache {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(cache_err)?;
        }
        let partial = path.with_extension(format!("{}.part", self.extension));
        fs::write(&partial, bytes).await.map_err(cache_err)?;
        fs::rename(&partial, &path).await.map_err(cache_err)?;
        Ok(())
    }
}

/// Keeps layer identifiers such as `ch.swisstopo:pixelkarte` usable as a
/// directory name.
fn sanitize(layer: &str) -> String {
    layer
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
