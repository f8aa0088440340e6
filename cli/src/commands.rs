pub mod export;

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tilestitch_common::config::{
    Config, DEFAULT_CACHE_DIR, DEFAULT_CONCURRENCY, DEFAULT_RETRIES, DEFAULT_TIMEOUT,
};
use tilestitch_common::geo::{BoundingBox, Crs};
use tilestitch_core::ExportRequest;

#[derive(Parser, Debug)]
#[command(name = "wmts_to_geotiff", version)]
#[command(about = "Turn one zoom level of a WMTS layer into a single GeoTIFF.")]
pub struct CommandLine {
    /// The WMTS URL from which the layer definition will be fetched
    #[arg(short = 'u', long)]
    pub wmts_url: String,

    /// The layer name for which the configuration should be generated
    #[arg(short = 'l', long)]
    pub layer_name: String,

    /// The zoom level of the layer to be turned into a single GeoTIFF
    #[arg(short = 'z', long)]
    pub zoom_level: u32,

    /// The bounding box for the GeoTIFF in WGS84 coordinates
    #[arg(
        short = 'b',
        long,
        num_args = 4,
        required = true,
        allow_negative_numbers = true,
        value_names = ["MINLON", "MINLAT", "MAXLON", "MAXLAT"]
    )]
    pub bbox: Vec<f64>,

    /// Generated MapProxy configuration file name
    #[arg(short = 'c', long, default_value = "mapproxy_config.yaml")]
    pub mapproxy_config: PathBuf,

    /// The name of the resulting GeoTIFF file
    #[arg(short = 'o', long, default_value = "output.gtiff")]
    pub output: PathBuf,

    /// The SRS of the output GeoTIFF (EPSG:3857 or EPSG:4326)
    #[arg(short = 's', long, default_value = "EPSG:3857")]
    pub srs: Crs,

    /// Directory holding downloaded tiles between runs
    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    pub cache_dir: PathBuf,

    /// Number of tiles downloaded in parallel
    #[arg(short = 'j', long, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Retries per tile after a server or network error
    #[arg(long, default_value_t = DEFAULT_RETRIES)]
    pub retries: u32,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Print less: -q hides headers, -qq also hides the progress bar
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn to_config(&self) -> Config {
        Config {
            cache_dir: self.cache_dir.clone(),
            concurrency: self.concurrency,
            retries: self.retries,
            timeout: Duration::from_secs(self.timeout),
            quiet: self.quiet,
        }
    }

    /// Validates the bounding box and assembles the export request.
    pub fn to_request(&self) -> anyhow::Result<ExportRequest> {
        let bbox = BoundingBox::from_slice(&self.bbox)?;
        bbox.validate_wgs84()?;

        Ok(ExportRequest {
            wmts_url: self.wmts_url.clone(),
            layer: self.layer_name.clone(),
            zoom: self.zoom_level,
            bbox,
            output: self.output.clone(),
            mapproxy_config: self.mapproxy_config.clone(),
            srs: self.srs,
        })
    }
}

fn parse_concurrency(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("concurrency must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid concurrency '{s}': {e}")),
    }
}
