use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use super::GeoError;

/// WGS84 semi-major axis used by spherical Web Mercator.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Length of one degree at the equator, the WMTS `metersPerUnit` for degrees.
pub const METERS_PER_DEGREE: f64 = 2.0 * PI * EARTH_RADIUS / 360.0;

/// Latitude at which Web Mercator becomes a square.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_6;

const WEB_MERCATOR_CODES: &[&str] = &["3857", "900913", "102100", "102113", "3785"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Crs {
    /// Spherical Mercator in meters.
    WebMercator,
    /// WGS84 longitude/latitude in degrees.
    ///
    /// `lat_first` is set for the EPSG-authoritative URN forms, which list
    /// latitude before longitude.
    Geographic { lat_first: bool },
}

impl Crs {
    pub const WGS84: Crs = Crs::Geographic { lat_first: false };

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::WebMercator => 3857,
            Crs::Geographic { .. } => 4326,
        }
    }

    /// `EPSG:3857` style code, as written into the MapProxy configuration.
    pub fn srs_code(&self) -> String {
        format!("EPSG:{}", self.epsg())
    }

    /// `EPSG3857` style code, used in cache directory names.
    pub fn cache_suffix(&self) -> String {
        format!("EPSG{}", self.epsg())
    }

    pub fn meters_per_unit(&self) -> f64 {
        match self {
            Crs::WebMercator => 1.0,
            Crs::Geographic { .. } => METERS_PER_DEGREE,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Geographic { .. })
    }

    pub fn lat_first(&self) -> bool {
        matches!(self, Crs::Geographic { lat_first: true })
    }

    /// Both systems describe the same coordinate space, ignoring axis order.
    pub fn same_space(&self, other: &Crs) -> bool {
        self.epsg() == other.epsg()
    }

    /// Reprojects an `(x, y)` point from `self` into `to`.
    pub fn transform_point(&self, to: &Crs, point: (f64, f64)) -> (f64, f64) {
        match (self.is_geographic(), to.is_geographic()) {
            (true, false) => lonlat_to_mercator(point),
            (false, true) => mercator_to_lonlat(point),
            _ => point,
        }
    }
}

fn lonlat_to_mercator((lon, lat): (f64, f64)) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

fn mercator_to_lonlat((x, y): (f64, f64)) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

impl FromStr for Crs {
    type Err = GeoError;

    /// Parses the SRS spellings found on the command line and in WMTS
    /// capabilities.
    ///
    /// * **Short codes**: `EPSG:3857`, `EPSG:4326`, `CRS:84`, `OGC:CRS84`.
    /// * **URNs**: `urn:ogc:def:crs:EPSG::3857`, `urn:ogc:def:crs:EPSG:6.18:3:3857`,
    ///   `urn:ogc:def:crs:OGC:1.3:CRS84`.
    /// * **URIs**: `http://www.opengis.net/def/crs/EPSG/0/4326`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let unsupported = || GeoError::UnsupportedCrs(s.trim().to_string());

        let (authority, code, authoritative_axes) =
            if let Some(rest) = upper.strip_prefix("URN:OGC:DEF:CRS:") {
                let parts: Vec<&str> = rest.split(':').collect();
                match (parts.first(), parts.last()) {
                    (Some(authority), Some(code)) if parts.len() >= 2 => {
                        (authority.to_string(), code.to_string(), true)
                    }
                    _ => return Err(unsupported()),
                }
            } else if upper.starts_with("HTTP://") || upper.starts_with("HTTPS://") {
                let parts: Vec<&str> = upper.trim_end_matches('/').split('/').collect();
                if parts.len() < 3 {
                    return Err(unsupported());
                }
                let authority = parts[parts.len() - 3];
                (authority.to_string(), parts[parts.len() - 1].to_string(), true)
            } else {
                let (authority, code) = upper.split_once(':').ok_or_else(unsupported)?;
                (authority.to_string(), code.to_string(), false)
            };

        match (authority.as_str(), code.as_str()) {
            ("EPSG", code) if WEB_MERCATOR_CODES.contains(&code) => Ok(Crs::WebMercator),
            ("EPSG", "4326") => Ok(Crs::Geographic {
                lat_first: authoritative_axes,
            }),
            ("OGC", "CRS84") | ("CRS", "84") => Ok(Crs::WGS84),
            _ => Err(unsupported()),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.srs_code())
    }
}
