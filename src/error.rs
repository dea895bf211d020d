use thiserror::Error;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("Cannot open raster at '{uri}': {reason}")]
    DatasetOpen { uri: String, reason: String },

    #[error("Band index {band} is out of range (valid: 1..{count})")]
    BandIndex { band: usize, count: usize },

    #[error("Source CRS not found in dataset and not provided in parameters")]
    MissingCrs,

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Out of memory while computing statistics for '{0}'; retry with sample_size set")]
    OutOfMemory(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Unsupported band data type: {0}")]
    UnsupportedDataType(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl RasterError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        RasterError::InvalidOptions(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RasterError>;
