//! Async entry points. Each operation runs on tokio's blocking pool so an
//! async caller never stalls its executor on GDAL I/O.

use crate::convert::convert;
use crate::error::{RasterError, Result};
use crate::inspect::inspect;
use crate::models::{
    ConversionOptions, ConversionResult, RasterInfo, ReprojectionParams, ReprojectionResult,
    StatsParams, StatsResult,
};
use crate::reproject::reproject;
use crate::stats::compute_statistics;
use std::path::PathBuf;

async fn run_blocking<T, F>(name: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RasterError::Task(format!("{} task failed: {}", name, e)))?
}

pub async fn inspect_async(uri: String, band: Option<usize>) -> Result<RasterInfo> {
    run_blocking("inspect", move || inspect(&uri, band)).await
}

pub async fn compute_statistics_async(uri: String, params: StatsParams) -> Result<StatsResult> {
    run_blocking("stats", move || compute_statistics(&uri, &params)).await
}

pub async fn reproject_async(
    uri: String,
    output: PathBuf,
    params: ReprojectionParams,
) -> Result<ReprojectionResult> {
    run_blocking("reproject", move || reproject(&uri, &output, &params)).await
}

pub async fn convert_async(
    uri: String,
    output: PathBuf,
    options: ConversionOptions,
) -> Result<ConversionResult> {
    run_blocking("convert", move || convert(&uri, &output, &options)).await
}
