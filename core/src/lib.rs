//! Export pipeline turning one zoom level of a WMTS layer into a GeoTIFF.
//!
//! [`export::export`] is the entry point; the other modules are its stages and
//! can be used on their own.

pub mod export;
pub mod fetch;
pub mod geotiff;
pub mod grid;
pub mod mosaic;
pub mod seed;
pub mod warp;

pub use export::{ExportProgress, ExportRequest, ExportSummary, NoProgress, Stage, export};
