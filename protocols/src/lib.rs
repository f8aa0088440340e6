//! WMTS wire layer: capabilities documents and tile request URLs.

pub mod capabilities;
pub mod request;

pub use capabilities::{Capabilities, CapabilitiesError, Layer, ResourceUrl, TileMatrix, TileMatrixSet};
pub use request::{TileEndpoint, capabilities_url};
