//! # Geographic primitives
//!
//! The two coordinate reference systems understood by the exporter and the
//! axis-aligned bounding boxes moved between them. Points are always handled
//! as `(x, y)`, i.e. `(easting, northing)` or `(longitude, latitude)`; axis
//! order only matters when reading coordinates out of a capabilities document.

mod bbox;
mod crs;

pub use bbox::BoundingBox;
pub use crs::{Crs, EARTH_RADIUS, MAX_MERCATOR_LAT, METERS_PER_DEGREE};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeoError {
    #[error("invalid bounding box '{0}': minimum must be lower than maximum on both axes")]
    InvalidBounds(String),

    #[error("bounding box '{0}' is outside the WGS84 range (lon -180..180, lat -90..90)")]
    OutOfRange(String),

    #[error("unsupported SRS '{0}': only Web Mercator (EPSG:3857) and WGS84 (EPSG:4326) are supported")]
    UnsupportedCrs(String),
}
