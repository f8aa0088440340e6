//! MapProxy configuration describing the exported layer.
//!
//! The generated file proxies the WMTS layer through a tile cache on the same
//! grid, with coverage restricted to the requested bounding box, so the export
//! can be reproduced or re-seeded with MapProxy itself.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tilestitch_common::geo::{BoundingBox, Crs};
use tilestitch_protocols::{Layer, TileMatrixSet};

use crate::grid;

const SERVICE_TITLE: &str = "WMTS Layer Proxy";
const RES_FACTOR: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapProxyConfig {
    pub services: Services,
    pub layers: Vec<LayerConfig>,
    pub caches: BTreeMap<String, CacheConfig>,
    pub sources: BTreeMap<String, SourceConfig>,
    pub grids: BTreeMap<String, GridConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Services {
    pub wmts: WmtsService,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WmtsService {
    pub md: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    pub title: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub grids: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub grid: String,
    pub url: String,
    pub extension: String,
    pub wmts_layer: String,
    pub wmts_tile_matrix_set: String,
    pub coverage: Coverage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub bbox: [f64; 4],
    pub srs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub srs: String,
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox_srs: Option<String>,
    pub tile_size: [u32; 2],
    pub res_factor: u32,
    pub resolutions: Vec<f64>,
}

/// Everything the configuration is derived from.
pub struct SeedInput<'a> {
    pub wmts_url: &'a str,
    pub layer: &'a Layer,
    pub tile_matrix_set: &'a TileMatrixSet,
    pub crs: Crs,
    pub zoom: u32,
    /// Requested area in WGS84.
    pub bbox: BoundingBox,
}

impl MapProxyConfig {
    pub fn build(input: &SeedInput) -> Self {
        let layer_name = input.layer.identifier.clone();
        let cache_name = format!("{layer_name}_cache");
        let source_name = format!("{layer_name}_source");
        let grid_name = input.tile_matrix_set.title.clone();

        let (tile_width, tile_height) = input
            .tile_matrix_set
            .matrices
            .first()
            .map(|m| (m.tile_width, m.tile_height))
            .unwrap_or((256, 256));

        let extent = grid::wgs84_extent(input.tile_matrix_set, &input.crs)
            .or(input.layer.wgs84_bbox)
            .map(corners);

        let layers = vec![LayerConfig {
            name: layer_name.clone(),
            title: input.layer.title.clone(),
            sources: vec![cache_name.clone()],
        }];

        let caches = BTreeMap::from([(
            cache_name,
            CacheConfig {
                grids: vec![grid_name.clone()],
                sources: vec![source_name.clone()],
            },
        )]);

        let sources = BTreeMap::from([(
            source_name,
            SourceConfig {
                kind: "tile".to_string(),
                grid: grid_name.clone(),
                url: input.wmts_url.to_string(),
                extension: input.layer.format_extension(),
                wmts_layer: layer_name,
                wmts_tile_matrix_set: input.tile_matrix_set.identifier.clone(),
                coverage: Coverage {
                    bbox: corners(input.bbox),
                    srs: Crs::WGS84.srs_code(),
                },
            },
        )]);

        let grids = BTreeMap::from([(
            grid_name,
            GridConfig {
                srs: input.crs.srs_code(),
                origin: "ul".to_string(),
                bbox_srs: extent.map(|_| Crs::WGS84.srs_code()),
                bbox: extent,
                tile_size: [tile_width, tile_height],
                res_factor: RES_FACTOR,
                resolutions: grid::resolutions(input.tile_matrix_set, &input.crs, input.zoom),
            },
        )]);

        Self {
            services: Services {
                wmts: WmtsService {
                    md: Metadata {
                        title: SERVICE_TITLE.to_string(),
                    },
                },
            },
            layers,
            caches,
            sources,
            grids,
        }
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize MapProxy configuration")
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let yaml = self.to_yaml()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write MapProxy configuration to {}", path.display()))
    }
}

fn corners(bbox: BoundingBox) -> [f64; 4] {
    [bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y]
}
