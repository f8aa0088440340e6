//! Decodes fetched tiles and stitches them into one image clipped to the
//! requested bounding box.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use rayon::prelude::*;
use thiserror::Error;
use tilestitch_common::geo::{BoundingBox, Crs};
use tracing::warn;

use crate::grid::{GridLevel, TileCoord, TileRange};

/// Largest canvas accepted, in pixels (1 GiB of RGBA).
pub const MAX_PIXELS: u64 = 1 << 28;

#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("none of the fetched tiles could be decoded")]
    Empty,

    #[error("mosaic of {width}x{height} pixels is too large, use a smaller bounding box or zoom level")]
    TooLarge { width: u64, height: u64 },
}

/// A georeferenced RGBA raster.
#[derive(Clone, Debug)]
pub struct Mosaic {
    pub image: RgbaImage,
    /// World extent of the outer pixel edges.
    pub bounds: BoundingBox,
    pub crs: Crs,
}

impl Mosaic {
    /// World size of one pixel along x and y.
    pub fn pixel_size(&self) -> (f64, f64) {
        (
            self.bounds.width() / self.image.width() as f64,
            self.bounds.height() / self.image.height() as f64,
        )
    }
}

/// Result of [`stitch`] with the number of tiles that could not be decoded.
#[derive(Debug)]
pub struct Stitched {
    pub mosaic: Mosaic,
    pub undecodable: usize,
}

/// Size of the canvas `range` needs, refused when above [`MAX_PIXELS`].
///
/// Cheap enough to run before any tile is requested.
pub fn check_canvas(level: &GridLevel, range: &TileRange) -> Result<(u64, u64), MosaicError> {
    let width = range.columns() as u64 * level.matrix.tile_width as u64;
    let height = range.rows() as u64 * level.matrix.tile_height as u64;
    if width * height > MAX_PIXELS {
        return Err(MosaicError::TooLarge { width, height });
    }
    Ok((width, height))
}

/// Places every tile of `range` on a canvas and crops it to `bbox`.
///
/// `bbox` is expressed in the level's CRS. Tiles that are missing or fail to
/// decode leave transparent pixels behind.
pub fn stitch(
    level: &GridLevel,
    range: &TileRange,
    tiles: &[(TileCoord, Vec<u8>)],
    bbox: &BoundingBox,
) -> Result<Stitched, MosaicError> {
    let tile_width = level.matrix.tile_width;
    let tile_height = level.matrix.tile_height;
    let (canvas_width, canvas_height) = check_canvas(level, range)?;

    let decoded: Vec<Option<(TileCoord, RgbaImage)>> = tiles
        .par_iter()
        .filter(|(coord, _)| range.contains(*coord))
        .map(|(coord, bytes)| match decode(bytes, tile_width, tile_height) {
            Ok(tile) => Some((*coord, tile)),
            Err(err) => {
                warn!("Skipping tile {}/{}: {err}", coord.row, coord.col);
                None
            }
        })
        .collect();

    let undecodable = decoded.iter().filter(|tile| tile.is_none()).count();
    let decoded: Vec<(TileCoord, RgbaImage)> = decoded.into_iter().flatten().collect();
    if decoded.is_empty() {
        return Err(MosaicError::Empty);
    }

    let mut canvas = RgbaImage::new(canvas_width as u32, canvas_height as u32);
    for (coord, tile) in &decoded {
        let x = (coord.col - range.min_col) as i64 * tile_width as i64;
        let y = (coord.row - range.min_row) as i64 * tile_height as i64;
        imageops::replace(&mut canvas, tile, x, y);
    }

    let window = level.pixel_window(range, bbox);
    let image = imageops::crop_imm(&canvas, window.x, window.y, window.width, window.height).to_image();

    Ok(Stitched {
        mosaic: Mosaic {
            image,
            bounds: level.window_bounds(range, &window),
            crs: level.crs,
        },
        undecodable,
    })
}

fn decode(bytes: &[u8], width: u32, height: u32) -> Result<RgbaImage, image::ImageError> {
    let tile = image::load_from_memory(bytes)?.to_rgba8();
    if tile.dimensions() == (width, height) {
        Ok(tile)
    } else {
        Ok(imageops::resize(&tile, width, height, FilterType::Nearest))
    }
}
