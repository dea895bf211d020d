//! Typed parameters and results exchanged with callers.

use crate::error::{RasterError, Result};
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PERCENTILES: [f64; 7] = [10.0, 25.0, 50.0, 75.0, 90.0, 95.0, 99.0];
pub const DEFAULT_HISTOGRAM_BINS: usize = 256;
pub const DEFAULT_BLOCK_SIZE: usize = 256;
pub const MIN_BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn contains(&self, other: &Bounds, tolerance: f64) -> bool {
        self.left <= other.left + tolerance
            && self.bottom <= other.bottom + tolerance
            && self.right >= other.right - tolerance
            && self.top >= other.top - tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeographicBounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingMethod {
    Nearest,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
    Gauss,
}

impl ResamplingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResamplingMethod::Nearest => "nearest",
            ResamplingMethod::Bilinear => "bilinear",
            ResamplingMethod::Cubic => "cubic",
            ResamplingMethod::CubicSpline => "cubic_spline",
            ResamplingMethod::Lanczos => "lanczos",
            ResamplingMethod::Average => "average",
            ResamplingMethod::Mode => "mode",
            ResamplingMethod::Gauss => "gauss",
        }
    }

    /// Name GDAL's overview builder expects.
    pub fn gdal_overview_name(&self) -> &'static str {
        match self {
            ResamplingMethod::Nearest => "NEAREST",
            ResamplingMethod::Bilinear => "BILINEAR",
            ResamplingMethod::Cubic => "CUBIC",
            ResamplingMethod::CubicSpline => "CUBICSPLINE",
            ResamplingMethod::Lanczos => "LANCZOS",
            ResamplingMethod::Average => "AVERAGE",
            ResamplingMethod::Mode => "MODE",
            ResamplingMethod::Gauss => "GAUSS",
        }
    }

    /// Overview resampling is parsed leniently: unknown names become `Average`.
    pub fn parse_overview(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            warn!("Unknown overview resampling '{}', falling back to average", name);
            ResamplingMethod::Average
        })
    }
}

impl Default for ResamplingMethod {
    fn default() -> Self {
        ResamplingMethod::Nearest
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResamplingMethod {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(ResamplingMethod::Nearest),
            "bilinear" => Ok(ResamplingMethod::Bilinear),
            "cubic" => Ok(ResamplingMethod::Cubic),
            "cubic_spline" | "cubic-spline" | "cubicspline" => Ok(ResamplingMethod::CubicSpline),
            "lanczos" => Ok(ResamplingMethod::Lanczos),
            "average" => Ok(ResamplingMethod::Average),
            "mode" => Ok(ResamplingMethod::Mode),
            "gauss" => Ok(ResamplingMethod::Gauss),
            other => Err(RasterError::invalid(format!(
                "unknown resampling method '{}'",
                other
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for ResamplingMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Lzw,
    Deflate,
    Zstd,
    Jpeg,
    Packbits,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Lzw => "lzw",
            Compression::Deflate => "deflate",
            Compression::Zstd => "zstd",
            Compression::Jpeg => "jpeg",
            Compression::Packbits => "packbits",
        }
    }

    /// Value of the `COMPRESS` creation option.
    pub fn creation_value(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lzw" => Ok(Compression::Lzw),
            "deflate" => Ok(Compression::Deflate),
            "zstd" => Ok(Compression::Zstd),
            "jpeg" => Ok(Compression::Jpeg),
            "packbits" => Ok(Compression::Packbits),
            other => Err(RasterError::invalid(format!(
                "unknown compression '{}'",
                other
            ))),
        }
    }
}

// Case-insensitive on the wire, unlike the derived lowercase form.
impl<'de> Deserialize<'de> for Compression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn deserialize_overview_resampling<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<ResamplingMethod, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(ResamplingMethod::parse_overview(&raw))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterInfo {
    pub path: String,
    pub driver: String,
    pub crs: Option<String>,
    pub width: usize,
    pub height: usize,
    pub count: usize,
    pub dtype: Option<String>,
    pub transform: [f64; 6],
    pub bounds: Bounds,
    pub nodata: Option<f64>,
    pub overview_levels: Vec<usize>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub min_value: f64,
    pub max_value: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub band: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub median: Option<f64>,
    pub percentiles: Vec<PercentileValue>,
    pub valid_count: usize,
    pub nodata_count: usize,
    /// Set when the statistics were drawn from a sample of the valid pixels.
    pub sample_count: Option<usize>,
    pub histogram: Vec<HistogramBin>,
}

impl BandStatistics {
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|pv| pv.percentile == p)
            .map(|pv| pv.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsParams {
    pub bands: Option<Vec<usize>>,
    pub include_histogram: bool,
    pub histogram_bins: usize,
    pub percentiles: Vec<f64>,
    pub sample_size: Option<usize>,
    pub include_extent: bool,
}

impl Default for StatsParams {
    fn default() -> Self {
        Self {
            bands: None,
            include_histogram: false,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            sample_size: None,
            include_extent: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialExtent {
    pub bounds: Bounds,
    pub crs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds_wgs84: Option<GeographicBounds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResult {
    pub path: String,
    pub band_stats: Vec<BandStatistics>,
    pub total_pixels: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial_extent: Option<SpatialExtent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub uri: String,
    pub path: Option<String>,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub driver: Option<String>,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionParams {
    pub dst_crs: String,
    #[serde(default)]
    pub src_crs: Option<String>,
    #[serde(default)]
    pub resampling: ResamplingMethod,
    /// Output pixel size `(x, y)` in destination CRS units.
    #[serde(default)]
    pub resolution: Option<(f64, f64)>,
    #[serde(default)]
    pub width: Option<usize>,
    #[serde(default)]
    pub height: Option<usize>,
    #[serde(default)]
    pub nodata: Option<f64>,
}

impl ReprojectionParams {
    pub fn new(dst_crs: impl Into<String>) -> Self {
        Self {
            dst_crs: dst_crs.into(),
            src_crs: None,
            resampling: ResamplingMethod::default(),
            resolution: None,
            width: None,
            height: None,
            nodata: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionResult {
    pub output: ResourceRef,
    pub src_crs: String,
    pub dst_crs: String,
    pub resampling: ResamplingMethod,
    pub transform: [f64; 6],
    pub width: usize,
    pub height: usize,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    pub driver: String,
    pub compression: Option<Compression>,
    pub tiled: bool,
    pub blockxsize: usize,
    pub blockysize: usize,
    pub photometric: Option<String>,
    pub overviews: Vec<usize>,
    #[serde(deserialize_with = "deserialize_overview_resampling")]
    pub overview_resampling: ResamplingMethod,
    pub creation_options: BTreeMap<String, String>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            driver: "GTiff".to_string(),
            compression: None,
            tiled: true,
            blockxsize: DEFAULT_BLOCK_SIZE,
            blockysize: DEFAULT_BLOCK_SIZE,
            photometric: None,
            overviews: Vec::new(),
            overview_resampling: ResamplingMethod::Average,
            creation_options: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub output: ResourceRef,
    pub driver: String,
    pub compression: Option<String>,
    pub size_bytes: u64,
    pub overviews_built: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resampling_from_str() {
        assert_eq!("Bilinear".parse::<ResamplingMethod>().unwrap(), ResamplingMethod::Bilinear);
        assert_eq!(
            "cubic-spline".parse::<ResamplingMethod>().unwrap(),
            ResamplingMethod::CubicSpline
        );
        assert!(matches!(
            "sinc".parse::<ResamplingMethod>(),
            Err(RasterError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_resampling_deserializes_like_from_str() {
        let method: ResamplingMethod = serde_json::from_str("\"Bilinear\"").unwrap();
        assert_eq!(method, ResamplingMethod::Bilinear);
        let method: ResamplingMethod = serde_json::from_str("\"CUBIC-SPLINE\"").unwrap();
        assert_eq!(method, ResamplingMethod::CubicSpline);
        assert!(serde_json::from_str::<ResamplingMethod>("\"sinc\"").is_err());

        let params: ReprojectionParams =
            serde_json::from_str(r#"{"dst_crs": "EPSG:3857", "resampling": "Lanczos"}"#).unwrap();
        assert_eq!(params.resampling, ResamplingMethod::Lanczos);
        assert_eq!(serde_json::to_string(&ResamplingMethod::CubicSpline).unwrap(), "\"cubic_spline\"");
    }

    #[test]
    fn test_overview_resampling_falls_back_to_average() {
        assert_eq!(ResamplingMethod::parse_overview("bogus"), ResamplingMethod::Average);
        assert_eq!(ResamplingMethod::parse_overview("gauss"), ResamplingMethod::Gauss);
    }

    #[test]
    fn test_compression_is_case_insensitive() {
        assert_eq!("DEFLATE".parse::<Compression>().unwrap(), Compression::Deflate);
        assert_eq!(Compression::Zstd.creation_value(), "ZSTD");
        assert!("brotli".parse::<Compression>().is_err());
    }

    #[test]
    fn test_conversion_options_from_json() {
        let opts: ConversionOptions = serde_json::from_str(
            r#"{"compression": "LZW", "overviews": [2, 4], "overview_resampling": "unknown"}"#,
        )
        .unwrap();
        assert_eq!(opts.driver, "GTiff");
        assert_eq!(opts.compression, Some(Compression::Lzw));
        assert_eq!(opts.blockxsize, 256);
        assert_eq!(opts.overviews, vec![2, 4]);
        assert_eq!(opts.overview_resampling, ResamplingMethod::Average);
    }

    #[test]
    fn test_stats_params_defaults() {
        let params: StatsParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, StatsParams::default());
        assert_eq!(params.percentiles, DEFAULT_PERCENTILES.to_vec());
        assert!(params.include_extent);
    }

    #[test]
    fn test_bounds_contains_with_tolerance() {
        let outer = Bounds { left: 0.0, bottom: 0.0, right: 10.0, top: 10.0 };
        let inner = Bounds { left: 1e-9, bottom: 1.0, right: 10.0 + 1e-9, top: 9.0 };
        assert!(outer.contains(&inner, 1e-6));
        assert!(!inner.contains(&outer, 1e-6));
    }
}
