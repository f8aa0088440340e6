//! Nearest-neighbour reprojection between Web Mercator and WGS84.

use image::RgbaImage;
use rayon::prelude::*;
use tilestitch_common::geo::Crs;
use tracing::debug;

use crate::mosaic::Mosaic;

const CHANNELS: usize = 4;

/// Reprojects `mosaic` into `target`.
///
/// The output keeps roughly the pixel count of the input. Every output pixel
/// centre is mapped back into the source and sampled; pixels that fall
/// outside the source stay transparent.
pub fn reproject(mosaic: Mosaic, target: Crs) -> Mosaic {
    if mosaic.crs.same_space(&target) {
        return Mosaic {
            crs: target,
            ..mosaic
        };
    }

    let source = &mosaic.image;
    let src_bounds = mosaic.bounds;
    let (src_res_x, src_res_y) = mosaic.pixel_size();
    let (src_width, src_height) = source.dimensions();

    let bounds = src_bounds.transform(&mosaic.crs, &target);
    let pixel_count = src_width as f64 * src_height as f64;
    let side = (bounds.width() * bounds.height() / pixel_count).sqrt();
    let width = ((bounds.width() / side).round() as u32).max(1);
    let height = ((bounds.height() / side).round() as u32).max(1);
    let res_x = bounds.width() / width as f64;
    let res_y = bounds.height() / height as f64;

    debug!(
        "Reprojecting {}x{} {} pixels into {}x{} {} pixels",
        src_width, src_height, mosaic.crs, width, height, target
    );

    let mut image = RgbaImage::new(width, height);
    let row_len = width as usize * CHANNELS;
    image
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row, pixels)| {
            let y = bounds.max_y - (row as f64 + 0.5) * res_y;
            for col in 0..width as usize {
                let x = bounds.min_x + (col as f64 + 0.5) * res_x;
                let (sx, sy) = target.transform_point(&mosaic.crs, (x, y));
                let src_col = ((sx - src_bounds.min_x) / src_res_x).floor();
                let src_row = ((src_bounds.max_y - sy) / src_res_y).floor();
                if src_col < 0.0
                    || src_row < 0.0
                    || src_col >= src_width as f64
                    || src_row >= src_height as f64
                {
                    continue;
                }
                let sample = source.get_pixel(src_col as u32, src_row as u32);
                pixels[col * CHANNELS..(col + 1) * CHANNELS].copy_from_slice(&sample.0);
            }
        });

    Mosaic {
        image,
        bounds,
        crs: target,
    }
}
