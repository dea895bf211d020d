use crate::error::{RasterError, Result};
use crate::models::{
    Compression, ConversionOptions, ReprojectionParams, ResamplingMethod, StatsParams,
    DEFAULT_BLOCK_SIZE, DEFAULT_HISTOGRAM_BINS,
};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "raster-pipeline")]
#[command(about = "Inspect, summarize, reproject and convert geospatial rasters")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N", global = true)]
    pub threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print raster metadata without reading pixels
    Info(InfoArgs),
    /// Compute per-band statistics
    Stats(StatsArgs),
    /// Reproject a raster to another CRS
    Reproject(ReprojectArgs),
    /// Convert a raster to another format or layout
    Convert(ConvertArgs),
}

#[derive(clap::Args, Debug)]
pub struct InfoArgs {
    /// Input raster path or URI
    #[arg(value_name = "URI")]
    pub input: String,

    /// Band whose overview levels are reported
    #[arg(short, long, value_name = "N")]
    pub band: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct StatsArgs {
    /// Input raster path or URI
    #[arg(value_name = "URI")]
    pub input: String,

    /// Bands to analyze, comma separated (default: all)
    #[arg(short, long, value_name = "N,...", value_delimiter = ',')]
    pub bands: Vec<usize>,

    /// Include a histogram per band
    #[arg(long)]
    pub histogram: bool,

    /// Number of histogram bins
    #[arg(long, value_name = "N", default_value_t = DEFAULT_HISTOGRAM_BINS)]
    pub bins: usize,

    /// Percentiles to compute, comma separated
    #[arg(short, long, value_name = "P,...", value_delimiter = ',')]
    pub percentiles: Vec<f64>,

    /// Randomly sample this many valid pixels per band
    #[arg(short, long, value_name = "N")]
    pub sample_size: Option<usize>,

    /// Skip the spatial extent
    #[arg(long)]
    pub no_extent: bool,
}

#[derive(clap::Args, Debug)]
pub struct ReprojectArgs {
    /// Input raster path or URI
    #[arg(value_name = "URI")]
    pub input: String,

    /// Output raster path
    #[arg(value_name = "FILE")]
    pub output: PathBuf,

    /// Target CRS (e.g. EPSG:3857, WKT or PROJ string)
    #[arg(short, long, value_name = "CRS")]
    pub dst_crs: String,

    /// Source CRS override (default: read from input)
    #[arg(long, value_name = "CRS")]
    pub src_crs: Option<String>,

    /// Resampling method
    #[arg(short, long, value_name = "METHOD", default_value = "nearest", value_parser = parse_resampling)]
    pub resampling: ResamplingMethod,

    /// Output pixel size as X or X,Y in target CRS units
    #[arg(long, value_name = "X[,Y]", value_delimiter = ',')]
    pub resolution: Vec<f64>,

    /// Output width in pixels (requires --height)
    #[arg(long, value_name = "PIXELS")]
    pub width: Option<usize>,

    /// Output height in pixels (requires --width)
    #[arg(long, value_name = "PIXELS")]
    pub height: Option<usize>,

    /// Output nodata value (default: read from input)
    #[arg(long, value_name = "VALUE", allow_hyphen_values = true)]
    pub nodata: Option<f64>,
}

#[derive(clap::Args, Debug)]
pub struct ConvertArgs {
    /// Input raster path or URI
    #[arg(value_name = "URI")]
    pub input: String,

    /// Output raster path
    #[arg(value_name = "FILE")]
    pub output: PathBuf,

    /// Output GDAL driver
    #[arg(long, value_name = "NAME", default_value = "GTiff")]
    pub driver: String,

    /// Compression (none, lzw, deflate, zstd, jpeg, packbits)
    #[arg(short, long, value_name = "TYPE", value_parser = parse_compression)]
    pub compression: Option<Compression>,

    /// Write strips instead of tiles
    #[arg(long)]
    pub no_tiled: bool,

    /// Tile width (multiple of 16)
    #[arg(long, value_name = "PIXELS", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub blockxsize: usize,

    /// Tile height (multiple of 16)
    #[arg(long, value_name = "PIXELS", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub blockysize: usize,

    /// Photometric interpretation (e.g. RGB, MINISBLACK)
    #[arg(long, value_name = "NAME")]
    pub photometric: Option<String>,

    /// Overview factors, comma separated (e.g. 2,4,8)
    #[arg(long, value_name = "N,...", value_delimiter = ',')]
    pub overviews: Vec<usize>,

    /// Overview resampling method
    #[arg(long, value_name = "METHOD", default_value = "average")]
    pub overview_resampling: String,

    /// Extra driver creation option, repeatable
    #[arg(long = "co", value_name = "KEY=VALUE")]
    pub creation_options: Vec<String>,
}

fn parse_resampling(value: &str) -> std::result::Result<ResamplingMethod, String> {
    value.parse().map_err(|e: RasterError| e.to_string())
}

fn parse_compression(value: &str) -> std::result::Result<Compression, String> {
    value.parse().map_err(|e: RasterError| e.to_string())
}

impl StatsArgs {
    pub fn to_params(&self) -> StatsParams {
        let defaults = StatsParams::default();
        StatsParams {
            bands: (!self.bands.is_empty()).then(|| self.bands.clone()),
            include_histogram: self.histogram,
            histogram_bins: self.bins,
            percentiles: if self.percentiles.is_empty() {
                defaults.percentiles
            } else {
                self.percentiles.clone()
            },
            sample_size: self.sample_size,
            include_extent: !self.no_extent,
        }
    }
}

impl ReprojectArgs {
    pub fn to_params(&self) -> Result<ReprojectionParams> {
        let resolution = match self.resolution.as_slice() {
            [] => None,
            [res] => Some((*res, *res)),
            [xres, yres] => Some((*xres, *yres)),
            other => {
                return Err(RasterError::invalid(format!(
                    "resolution takes one or two values, got {}",
                    other.len()
                )))
            }
        };
        Ok(ReprojectionParams {
            dst_crs: self.dst_crs.clone(),
            src_crs: self.src_crs.clone(),
            resampling: self.resampling,
            resolution,
            width: self.width,
            height: self.height,
            nodata: self.nodata,
        })
    }
}

impl ConvertArgs {
    pub fn to_options(&self) -> Result<ConversionOptions> {
        let mut creation_options = BTreeMap::new();
        for entry in &self.creation_options {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                RasterError::invalid(format!("creation option '{}' is not KEY=VALUE", entry))
            })?;
            creation_options.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(ConversionOptions {
            driver: self.driver.clone(),
            compression: self.compression,
            tiled: !self.no_tiled,
            blockxsize: self.blockxsize,
            blockysize: self.blockysize,
            photometric: self.photometric.clone(),
            overviews: self.overviews.clone(),
            overview_resampling: ResamplingMethod::parse_overview(&self.overview_resampling),
            creation_options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stats_args() {
        let args = Args::try_parse_from([
            "raster-pipeline",
            "stats",
            "dem.tif",
            "--bands",
            "1,3",
            "--percentiles",
            "5,95",
            "--histogram",
            "-v",
        ])
        .unwrap();
        assert!(args.verbose);
        let Command::Stats(stats) = args.command else {
            panic!("expected stats subcommand");
        };
        let params = stats.to_params();
        assert_eq!(params.bands, Some(vec![1, 3]));
        assert_eq!(params.percentiles, vec![5.0, 95.0]);
        assert!(params.include_histogram);
        assert!(params.include_extent);
        assert_eq!(params.histogram_bins, DEFAULT_HISTOGRAM_BINS);
    }

    #[test]
    fn test_parse_reproject_args() {
        let args = Args::try_parse_from([
            "raster-pipeline",
            "reproject",
            "in.tif",
            "out.tif",
            "--dst-crs",
            "EPSG:3857",
            "--resampling",
            "bilinear",
            "--resolution",
            "30",
            "--nodata",
            "-9999",
        ])
        .unwrap();
        let Command::Reproject(reproject) = args.command else {
            panic!("expected reproject subcommand");
        };
        let params = reproject.to_params().unwrap();
        assert_eq!(params.dst_crs, "EPSG:3857");
        assert_eq!(params.resampling, ResamplingMethod::Bilinear);
        assert_eq!(params.resolution, Some((30.0, 30.0)));
        assert_eq!(params.nodata, Some(-9999.0));

        assert!(Args::try_parse_from([
            "raster-pipeline",
            "reproject",
            "in.tif",
            "out.tif",
            "--dst-crs",
            "EPSG:3857",
            "--resampling",
            "sharpen",
        ])
        .is_err());
    }

    #[test]
    fn test_parse_convert_args() {
        let args = Args::try_parse_from([
            "raster-pipeline",
            "convert",
            "in.tif",
            "out.tif",
            "--compression",
            "DEFLATE",
            "--overviews",
            "2,4",
            "--overview-resampling",
            "bogus",
            "--co",
            "BIGTIFF=YES",
            "--no-tiled",
        ])
        .unwrap();
        let Command::Convert(convert) = args.command else {
            panic!("expected convert subcommand");
        };
        let options = convert.to_options().unwrap();
        assert_eq!(options.compression, Some(Compression::Deflate));
        assert_eq!(options.overviews, vec![2, 4]);
        assert_eq!(options.overview_resampling, ResamplingMethod::Average);
        assert!(!options.tiled);
        assert_eq!(options.creation_options.get("BIGTIFF").map(String::as_str), Some("YES"));
    }

    #[test]
    fn test_malformed_creation_option() {
        let args = Args::try_parse_from([
            "raster-pipeline",
            "convert",
            "in.tif",
            "out.tif",
            "--co",
            "BIGTIFF",
        ])
        .unwrap();
        let Command::Convert(convert) = args.command else {
            panic!("expected convert subcommand");
        };
        assert!(matches!(convert.to_options(), Err(RasterError::InvalidOptions(_))));
    }
}
