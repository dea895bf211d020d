// Library exports for the CLI, async callers and tests

pub mod cli;
pub mod convert;
pub mod crs;
pub mod error;
pub mod inspect;
pub mod io;
pub mod models;
pub mod profile;
pub mod reproject;
pub mod resample;
pub mod stats;
pub mod task;
pub mod transform;

// Re-export commonly used types
pub use convert::convert;
pub use error::{RasterError, Result};
pub use inspect::inspect;
pub use io::{resolve_uri, DatasetHandle};
pub use models::{
    BandStatistics, Bounds, Compression, ConversionOptions, ConversionResult, RasterInfo,
    ReprojectionParams, ReprojectionResult, ResamplingMethod, ResourceRef, StatsParams,
    StatsResult,
};
pub use reproject::reproject;
pub use stats::compute_statistics;
