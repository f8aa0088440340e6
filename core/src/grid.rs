//! # Tile Grid Math
//!
//! Maps world coordinates onto one tile matrix of a WMTS tile matrix set:
//! which tiles cover a bounding box, where that box lands in the stitched
//! pixels, and which world extent a pixel window describes.

use thiserror::Error;
use tilestitch_common::geo::{BoundingBox, Crs};
use tilestitch_protocols::{TileMatrix, TileMatrixSet};

/// Standardized rendering pixel size (0.28 mm) WMTS scale denominators refer to.
pub const STANDARD_PIXEL_SIZE: f64 = 0.00028;

/// Tolerance, in tiles, that keeps a bbox ending on a tile edge from pulling
/// in the neighbouring tile.
const TILE_EPSILON: f64 = 1e-6;

/// Same idea in pixels, for the crop window.
const PIXEL_EPSILON: f64 = 1e-6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    #[error("tile matrix set '{0}' does not define any tile matrix")]
    EmptySet(String),

    #[error("zoom level {zoom} is out of range, tile matrix set '{set}' provides levels 0 to {max}")]
    ZoomOutOfRange { zoom: u32, max: usize, set: String },

    #[error("bounding box {bbox} does not intersect tile matrix '{matrix}'")]
    OutsideMatrix { bbox: String, matrix: String },
}

/// World units per pixel of a tile matrix.
pub fn resolution(matrix: &TileMatrix, crs: &Crs) -> f64 {
    matrix.scale_denominator * STANDARD_PIXEL_SIZE / crs.meters_per_unit()
}

/// Resolutions of levels `0..=zoom`, coarsest first.
pub fn resolutions(set: &TileMatrixSet, crs: &Crs, zoom: u32) -> Vec<f64> {
    set.matrices
        .iter()
        .take(zoom as usize + 1)
        .map(|matrix| resolution(matrix, crs))
        .collect()
}

/// Extent of a tile matrix set in WGS84, as advertised or derived from its
/// coarsest matrix.
pub fn wgs84_extent(set: &TileMatrixSet, crs: &Crs) -> Option<BoundingBox> {
    if let Some(bbox) = set.wgs84_bbox {
        return Some(bbox);
    }
    let matrix = set.matrices.first()?;
    let level = GridLevel::from_matrix(0, matrix.clone(), *crs);
    Some(level.extent().transform(crs, &Crs::WGS84))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub row: u32,
    pub col: u32,
}

/// Inclusive block of tiles inside one matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRange {
    pub min_col: u32,
    pub min_row: u32,
    pub max_col: u32,
    pub max_row: u32,
}

impl TileRange {
    pub fn columns(&self) -> u32 {
        self.max_col - self.min_col + 1
    }

    pub fn rows(&self) -> u32 {
        self.max_row - self.min_row + 1
    }

    pub fn len(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        (self.min_row..=self.max_row).contains(&coord.row)
            && (self.min_col..=self.max_col).contains(&coord.col)
    }

    /// Row-major iteration, top-left tile first.
    pub fn iter(&self) -> impl Iterator<Item = TileCoord> {
        let (min_col, max_col) = (self.min_col, self.max_col);
        (self.min_row..=self.max_row)
            .flat_map(move |row| (min_col..=max_col).map(move |col| TileCoord { row, col }))
    }
}

/// Pixel rectangle inside a stitched tile range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One tile matrix resolved against the CRS of its set.
#[derive(Clone, Debug, PartialEq)]
pub struct GridLevel {
    pub zoom: u32,
    pub matrix: TileMatrix,
    pub crs: Crs,
    pub resolution: f64,
}

impl GridLevel {
    /// Selects `zoom` as an index into the matrices of `set`.
    pub fn new(set: &TileMatrixSet, crs: Crs, zoom: u32) -> Result<Self, GridError> {
        if set.matrices.is_empty() {
            return Err(GridError::EmptySet(set.identifier.clone()));
        }
        let matrix = set
            .matrices
            .get(zoom as usize)
            .ok_or_else(|| GridError::ZoomOutOfRange {
                zoom,
                max: set.matrices.len() - 1,
                set: set.identifier.clone(),
            })?;
        Ok(Self::from_matrix(zoom, matrix.clone(), crs))
    }

    pub fn from_matrix(zoom: u32, matrix: TileMatrix, crs: Crs) -> Self {
        let resolution = resolution(&matrix, &crs);
        Self {
            zoom,
            matrix,
            crs,
            resolution,
        }
    }

    /// World width and height of a single tile.
    pub fn tile_span(&self) -> (f64, f64) {
        (
            self.matrix.tile_width as f64 * self.resolution,
            self.matrix.tile_height as f64 * self.resolution,
        )
    }

    /// World extent covered by the whole matrix.
    pub fn extent(&self) -> BoundingBox {
        self.range_bounds(&TileRange {
            min_col: 0,
            min_row: 0,
            max_col: self.matrix.matrix_width.saturating_sub(1),
            max_row: self.matrix.matrix_height.saturating_sub(1),
        })
    }

    /// Tiles covering `bbox`, which must be expressed in the level's CRS.
    pub fn tile_range(&self, bbox: &BoundingBox) -> Result<TileRange, GridError> {
        let outside = || GridError::OutsideMatrix {
            bbox: bbox.to_string(),
            matrix: self.matrix.identifier.clone(),
        };
        if self.matrix.matrix_width == 0 || self.matrix.matrix_height == 0 {
            return Err(outside());
        }
        let clipped = bbox.intersection(&self.extent()).ok_or_else(outside)?;

        let (span_x, span_y) = self.tile_span();
        let (left, top) = self.matrix.top_left;
        let last_col = (self.matrix.matrix_width - 1) as f64;
        let last_row = (self.matrix.matrix_height - 1) as f64;

        let min_col = ((clipped.min_x - left) / span_x + TILE_EPSILON).floor();
        let max_col = ((clipped.max_x - left) / span_x - TILE_EPSILON).floor();
        let min_row = ((top - clipped.max_y) / span_y + TILE_EPSILON).floor();
        let max_row = ((top - clipped.min_y) / span_y - TILE_EPSILON).floor();

        let range = TileRange {
            min_col: min_col.clamp(0.0, last_col) as u32,
            min_row: min_row.clamp(0.0, last_row) as u32,
            max_col: max_col.clamp(0.0, last_col) as u32,
            max_row: max_row.clamp(0.0, last_row) as u32,
        };
        if range.min_col > range.max_col || range.min_row > range.max_row {
            return Err(outside());
        }
        Ok(range)
    }

    /// World extent of a tile range.
    pub fn range_bounds(&self, range: &TileRange) -> BoundingBox {
        let (span_x, span_y) = self.tile_span();
        let (left, top) = self.matrix.top_left;
        BoundingBox {
            min_x: left + range.min_col as f64 * span_x,
            min_y: top - (range.max_row as f64 + 1.0) * span_y,
            max_x: left + (range.max_col as f64 + 1.0) * span_x,
            max_y: top - range.min_row as f64 * span_y,
        }
    }

    /// Pixels of the stitched `range` that cover `bbox`, at least one pixel.
    pub fn pixel_window(&self, range: &TileRange, bbox: &BoundingBox) -> PixelWindow {
        let bounds = self.range_bounds(range);
        let canvas_width = range.columns() * self.matrix.tile_width;
        let canvas_height = range.rows() * self.matrix.tile_height;
        let clipped = bbox.intersection(&bounds).unwrap_or(bounds);

        let to_pixels = |world: f64| world / self.resolution;
        let x0 = (to_pixels(clipped.min_x - bounds.min_x) + PIXEL_EPSILON).floor();
        let x1 = (to_pixels(clipped.max_x - bounds.min_x) - PIXEL_EPSILON).ceil();
        let y0 = (to_pixels(bounds.max_y - clipped.max_y) + PIXEL_EPSILON).floor();
        let y1 = (to_pixels(bounds.max_y - clipped.min_y) - PIXEL_EPSILON).ceil();

        let x = (x0.max(0.0) as u32).min(canvas_width.saturating_sub(1));
        let y = (y0.max(0.0) as u32).min(canvas_height.saturating_sub(1));
        let right = (x1.max(0.0) as u32).clamp(x + 1, canvas_width.max(x + 1));
        let bottom = (y1.max(0.0) as u32).clamp(y + 1, canvas_height.max(y + 1));

        PixelWindow {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }

    /// World extent of a pixel window of the stitched `range`.
    pub fn window_bounds(&self, range: &TileRange, window: &PixelWindow) -> BoundingBox {
        let bounds = self.range_bounds(range);
        BoundingBox {
            min_x: bounds.min_x + window.x as f64 * self.resolution,
            min_y: bounds.max_y - (window.y + window.height) as f64 * self.resolution,
            max_x: bounds.min_x + (window.x + window.width) as f64 * self.resolution,
            max_y: bounds.max_y - window.y as f64 * self.resolution,
        }
    }
}
