use std::fmt;

use super::{Crs, GeoError};

/// Samples taken along each edge when reprojecting a box, so curved edges
/// still end up inside the resulting envelope.
const EDGE_SAMPLES: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self, GeoError> {
        let bbox = Self {
            min_x,
            min_y,
            max_x,
            max_y,
        };
        let finite = [min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite());
        if !finite || min_x >= max_x || min_y >= max_y {
            return Err(GeoError::InvalidBounds(bbox.to_string()));
        }
        Ok(bbox)
    }

    /// Builds a box from `[minx, miny, maxx, maxy]`.
    pub fn from_slice(values: &[f64]) -> Result<Self, GeoError> {
        match values {
            [min_x, min_y, max_x, max_y] => Self::new(*min_x, *min_y, *max_x, *max_y),
            _ => Err(GeoError::InvalidBounds(
                values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" "),
            )),
        }
    }

    /// Checks that the box is expressed in plausible WGS84 degrees.
    pub fn validate_wgs84(&self) -> Result<(), GeoError> {
        let lon_ok = self.min_x >= -180.0 && self.max_x <= 180.0;
        let lat_ok = self.min_y >= -90.0 && self.max_y <= 90.0;
        if lon_ok && lat_ok {
            Ok(())
        } else {
            Err(GeoError::OutOfRange(self.to_string()))
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Overlap of two boxes, `None` when they only touch or are disjoint.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let min_x = self.min_x.max(other.min_x);
        let min_y = self.min_y.max(other.min_y);
        let max_x = self.max_x.min(other.max_x);
        let max_y = self.max_y.min(other.max_y);
        BoundingBox::new(min_x, min_y, max_x, max_y).ok()
    }

    /// Envelope of this box reprojected from `from` into `to`.
    pub fn transform(&self, from: &Crs, to: &Crs) -> BoundingBox {
        if from.same_space(to) {
            return *self;
        }

        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for i in 0..=EDGE_SAMPLES {
            let t = i as f64 / EDGE_SAMPLES as f64;
            let x = self.min_x + t * self.width();
            let y = self.min_y + t * self.height();
            let samples = [
                (x, self.min_y),
                (x, self.max_y),
                (self.min_x, y),
                (self.max_x, y),
            ];
            for point in samples {
                let (px, py) = from.transform_point(to, point);
                min_x = min_x.min(px);
                min_y = min_y.min(py);
                max_x = max_x.max(px);
                max_y = max_y.max(py);
            }
        }

        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }
}

impl fmt::Display for BoundingBox {
    /// Space separated `minx miny maxx maxy`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}
