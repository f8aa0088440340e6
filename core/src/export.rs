//! # WMTS to GeoTIFF Export
//!
//! Implements the one use case of the tool.
//!
//! The pipeline:
//! 1. **Capabilities**: fetch and parse the service description.
//! 2. **Resolution**: pick the layer, its tile matrix set and the zoom level.
//! 3. **Seed configuration**: write the MapProxy YAML for the layer.
//! 4. **Tiles**: download the covering tiles through the on-disk cache.
//! 5. **Mosaic**: stitch and clip, then reproject to the output SRS.
//! 6. **Encoding**: write the GeoTIFF.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, anyhow, bail};
use reqwest::Client;
use tilestitch_common::config::Config;
use tilestitch_common::geo::{BoundingBox, Crs};
use tilestitch_common::success;
use tilestitch_protocols::{Capabilities, Layer, TileEndpoint, TileMatrixSet, capabilities_url};
use tracing::{debug, info, warn};
use url::Url;

use crate::fetch::{self, HttpTileSource, ProgressCallback, TileCache};
use crate::grid::{GridLevel, TileCoord};
use crate::seed::{MapProxyConfig, SeedInput};
use crate::{geotiff, mosaic, warp};

const USER_AGENT: &str = concat!("tilestitch/", env!("CARGO_PKG_VERSION"));

/// What to export and where to put it.
#[derive(Clone, Debug)]
pub struct ExportRequest {
    pub wmts_url: String,
    pub layer: String,
    pub zoom: u32,
    /// Area to export in WGS84 degrees.
    pub bbox: BoundingBox,
    pub output: PathBuf,
    pub mapproxy_config: PathBuf,
    /// SRS of the written GeoTIFF.
    pub srs: Crs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Capabilities,
    SeedConfig,
    Tiles { total: usize },
    Mosaic,
    Reproject,
    Encode,
}

/// Receives progress notifications while an export runs.
pub trait ExportProgress: Send + Sync {
    fn stage(&self, _stage: Stage) {}

    fn tile_done(&self, _done: usize, _total: usize) {}
}

/// Progress sink that ignores everything.
pub struct NoProgress;

impl ExportProgress for NoProgress {}

#[derive(Clone, Debug)]
pub struct ExportSummary {
    pub layer_title: String,
    pub tile_matrix_set: String,
    pub tile_matrix: String,
    pub tiles: usize,
    pub downloaded: usize,
    pub cached: usize,
    pub missing: usize,
    pub undecodable: usize,
    pub width: u32,
    pub height: u32,
    pub bounds: BoundingBox,
    pub crs: Crs,
    pub output: PathBuf,
    pub mapproxy_config: PathBuf,
    pub elapsed_secs: f64,
}

/// Runs the full export described by `request`.
pub async fn export(
    request: &ExportRequest,
    cfg: &Config,
    progress: &dyn ExportProgress,
) -> anyhow::Result<ExportSummary> {
    let started = Instant::now();
    request
        .bbox
        .validate_wgs84()
        .context("The bounding box must be given in WGS84 degrees")?;

    let client = Client::builder()
        .timeout(cfg.timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")?;

    progress.stage(Stage::Capabilities);
    let service_url = Url::parse(request.wmts_url.trim())
        .with_context(|| format!("Invalid WMTS URL '{}'", request.wmts_url))?;
    let capabilities = fetch_capabilities(&client, &request.wmts_url).await?;

    let layer = capabilities.layer(&request.layer).ok_or_else(|| {
        anyhow!(
            "Layer \"{}\" not found in provided WMTS service",
            request.layer
        )
    })?;
    let (tile_matrix_set, set_crs) = select_tile_matrix_set(&capabilities, layer)?;
    let level = GridLevel::new(tile_matrix_set, set_crs, request.zoom)
        .with_context(|| format!("Cannot export layer \"{}\"", layer.identifier))?;
    info!(
        "Layer \"{}\" uses tile matrix set '{}' ({}), tile matrix '{}' at {:.4} units/pixel",
        layer.title, tile_matrix_set.identifier, set_crs, level.matrix.identifier, level.resolution
    );

    progress.stage(Stage::SeedConfig);
    MapProxyConfig::build(&SeedInput {
        wmts_url: &request.wmts_url,
        layer,
        tile_matrix_set,
        crs: set_crs,
        zoom: request.zoom,
        bbox: request.bbox,
    })
    .write(&request.mapproxy_config)?;
    debug!(
        "MapProxy configuration written to {}",
        request.mapproxy_config.display()
    );

    let native_bbox = request.bbox.transform(&Crs::WGS84, &set_crs);
    let range = level
        .tile_range(&native_bbox)
        .with_context(|| no_data_message(layer, request.zoom))?;
    mosaic::check_canvas(&level, &range)?;
    info!(
        "Fetching {} tiles ({} columns x {} rows)",
        range.len(),
        range.columns(),
        range.rows()
    );

    progress.stage(Stage::Tiles { total: range.len() });
    let cache = TileCache::new(
        &cfg.cache_dir,
        &layer.identifier,
        &set_crs,
        request.zoom,
        &layer.format_extension(),
    );
    let endpoint = TileEndpoint::for_layer(&capabilities, &service_url, layer, &tile_matrix_set.identifier)
        .context("Failed to build the tile request URL")?;
    let source = HttpTileSource::new(client, endpoint, &level.matrix.identifier, cfg.retries);
    let on_tile: &ProgressCallback<'_> = &|done, total| progress.tile_done(done, total);
    let coords: Vec<TileCoord> = range.iter().collect();

    let report = fetch::fetch_tiles(&source, &cache, coords, cfg.concurrency, Some(on_tile))
        .await
        .context("Failed to fetch tiles")?;
    if report.tiles.is_empty() {
        bail!(no_data_message(layer, request.zoom));
    }
    if report.missing > 0 {
        warn!("{} tiles are not served and stay transparent", report.missing);
    }

    progress.stage(Stage::Mosaic);
    let tiles = report.tiles;
    let stitch_level = level.clone();
    let stitched = tokio::task::spawn_blocking(move || {
        mosaic::stitch(&stitch_level, &range, &tiles, &native_bbox)
    })
    .await
    .context("Mosaic task panicked")?
    .map_err(|err| match err {
        mosaic::MosaicError::Empty => anyhow!(no_data_message(layer, request.zoom)),
        other => anyhow!(other),
    })?;

    progress.stage(Stage::Reproject);
    let target = request.srs;
    let output_mosaic = tokio::task::spawn_blocking(move || warp::reproject(stitched.mosaic, target))
        .await
        .context("Reprojection task panicked")?;

    progress.stage(Stage::Encode);
    let summary = ExportSummary {
        layer_title: layer.title.clone(),
        tile_matrix_set: tile_matrix_set.identifier.clone(),
        tile_matrix: level.matrix.identifier.clone(),
        tiles: range.len(),
        downloaded: report.downloaded,
        cached: report.cached,
        missing: report.missing,
        undecodable: stitched.undecodable,
        width: output_mosaic.image.width(),
        height: output_mosaic.image.height(),
        bounds: output_mosaic.bounds,
        crs: output_mosaic.crs,
        output: request.output.clone(),
        mapproxy_config: request.mapproxy_config.clone(),
        elapsed_secs: 0.0,
    };

    let output = request.output.clone();
    tokio::task::spawn_blocking(move || geotiff::write_geotiff(&output, &output_mosaic))
        .await
        .context("GeoTIFF task panicked")?
        .with_context(|| format!("Failed to write {}", request.output.display()))?;

    success!("GeoTIFF generated successfully. Output: {}", request.output.display());
    Ok(ExportSummary {
        elapsed_secs: started.elapsed().as_secs_f64(),
        ..summary
    })
}

/// Downloads and parses the capabilities document of the service.
pub async fn fetch_capabilities(client: &Client, wmts_url: &str) -> anyhow::Result<Capabilities> {
    let url = capabilities_url(wmts_url).with_context(|| format!("Invalid WMTS URL '{wmts_url}'"))?;
    info!("Fetching capabilities from {url}");

    let response = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("Capabilities request to {url} answered with HTTP {status}");
    }
    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read the capabilities from {url}"))?;

    let capabilities = Capabilities::parse(&body).context("Failed to parse WMTS capabilities")?;
    debug!(
        "Service offers {} layers and {} tile matrix sets",
        capabilities.layers.len(),
        capabilities.tile_matrix_sets.len()
    );
    Ok(capabilities)
}

/// The first linked tile matrix set whose CRS is supported.
fn select_tile_matrix_set<'a>(
    capabilities: &'a Capabilities,
    layer: &Layer,
) -> anyhow::Result<(&'a TileMatrixSet, Crs)> {
    if layer.tile_matrix_set_links.is_empty() {
        bail!("Layer \"{}\" does not link any tile matrix set", layer.identifier);
    }

    let mut rejected = Vec::new();
    for link in &layer.tile_matrix_set_links {
        let Some(set) = capabilities.tile_matrix_set(link) else {
            rejected.push(format!("'{link}' is not defined by the service"));
            continue;
        };
        match set.crs() {
            Ok(crs) => return Ok((set, crs)),
            Err(err) => rejected.push(format!("'{link}': {err}")),
        }
    }

    bail!(
        "No usable tile matrix set for layer \"{}\": {}",
        layer.identifier,
        rejected.join("; ")
    )
}

fn no_data_message(layer: &Layer, zoom: u32) -> String {
    format!(
        "No data found for layer {} at zoom level {}",
        layer.identifier, zoom
    )
}
