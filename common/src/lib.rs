//! Types shared by every tilestitch crate: run configuration, coordinate
//! reference systems, bounding boxes and the status log macros.

pub mod config;
pub mod geo;
pub mod log;

#[doc(hidden)]
pub use tracing as __tracing;
