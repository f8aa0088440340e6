//! # GeoTIFF Encoding
//!
//! Writes a [`Mosaic`] as an uncompressed RGBA TIFF carrying the GeoTIFF 1.0
//! georeferencing tags: model pixel scale, a single tiepoint at the upper
//! left corner and a GeoKey directory naming the EPSG code.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tilestitch_common::geo::Crs;

use crate::mosaic::Mosaic;

pub const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
pub const MODEL_TIEPOINT_TAG: u16 = 33922;
pub const GEO_KEY_DIRECTORY_TAG: u16 = 34735;

pub const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
pub const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
pub const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
pub const GEOG_ANGULAR_UNITS_GEO_KEY: u16 = 2054;
pub const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
pub const PROJ_LINEAR_UNITS_GEO_KEY: u16 = 3076;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const LINEAR_METER: u16 = 9001;
const ANGULAR_DEGREE: u16 = 9102;

#[derive(Debug, Error)]
pub enum GeoTiffError {
    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TIFF encoding failed: {0}")]
    Tiff(#[from] tiff::TiffError),
}

/// GeoKey directory for `crs`: header `[1, 1, 0, count]` followed by one
/// `[key, 0, 1, value]` entry per key, keys ascending.
pub fn geo_keys(crs: &Crs) -> Vec<u16> {
    let entries: Vec<(u16, u16)> = if crs.is_geographic() {
        vec![
            (GT_MODEL_TYPE_GEO_KEY, MODEL_TYPE_GEOGRAPHIC),
            (GT_RASTER_TYPE_GEO_KEY, RASTER_PIXEL_IS_AREA),
            (GEOGRAPHIC_TYPE_GEO_KEY, crs.epsg() as u16),
            (GEOG_ANGULAR_UNITS_GEO_KEY, ANGULAR_DEGREE),
        ]
    } else {
        vec![
            (GT_MODEL_TYPE_GEO_KEY, MODEL_TYPE_PROJECTED),
            (GT_RASTER_TYPE_GEO_KEY, RASTER_PIXEL_IS_AREA),
            (PROJECTED_CS_TYPE_GEO_KEY, crs.epsg() as u16),
            (PROJ_LINEAR_UNITS_GEO_KEY, LINEAR_METER),
        ]
    };

    let mut keys = vec![1, 1, 0, entries.len() as u16];
    for (key, value) in entries {
        keys.extend_from_slice(&[key, 0, 1, value]);
    }
    keys
}

/// Encodes `mosaic` to `path`, replacing any existing file only once the
/// new one is complete.
pub fn write_geotiff(path: &Path, mosaic: &Mosaic) -> Result<(), GeoTiffError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| GeoTiffError::Io { path, source }
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let partial = partial_path(path);
    let file = File::create(&partial).map_err(io_err(&partial))?;
    let mut writer = BufWriter::new(file);

    encode(&mut writer, mosaic)?;
    writer.flush().map_err(io_err(&partial))?;
    drop(writer);

    fs::rename(&partial, path).map_err(io_err(path))?;
    Ok(())
}

fn encode<W>(writer: &mut W, mosaic: &Mosaic) -> Result<(), GeoTiffError>
where
    W: Write + std::io::Seek,
{
    let (width, height) = mosaic.image.dimensions();
    let (scale_x, scale_y) = mosaic.pixel_size();
    let bounds = mosaic.bounds;

    let mut tiff = TiffEncoder::new(writer)?;
    let mut image = tiff.new_image::<colortype::RGBA8>(width, height)?;

    let directory = image.encoder();
    directory.write_tag(tag(MODEL_PIXEL_SCALE_TAG), &[scale_x, scale_y, 0.0][..])?;
    directory.write_tag(
        tag(MODEL_TIEPOINT_TAG),
        &[0.0, 0.0, 0.0, bounds.min_x, bounds.max_y, 0.0][..],
    )?;
    directory.write_tag(tag(GEO_KEY_DIRECTORY_TAG), &geo_keys(&mosaic.crs)[..])?;

    image.write_data(mosaic.image.as_raw())?;
    Ok(())
}

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.part"))
}
