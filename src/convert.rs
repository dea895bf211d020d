use crate::error::{RasterError, Result};
use crate::io::{dispatch_band_type, resource_ref, DatasetHandle, RasterWriter};
use crate::models::{ConversionOptions, ConversionResult, MIN_BLOCK_SIZE};
use crate::profile::{merge_profile, ProfileOverrides};
use gdal::raster::GdalDataType;
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::Path;

/// Validate block size (at least 16 and a multiple of 16)
pub fn validate_block_size(name: &str, size: usize) -> Result<()> {
    if size < MIN_BLOCK_SIZE || size % 16 != 0 {
        return Err(RasterError::invalid(format!(
            "{} must be a multiple of 16 and at least {}, got {}",
            name, MIN_BLOCK_SIZE, size
        )));
    }
    Ok(())
}

/// Validate overview factors (each at least 2, strictly increasing)
pub fn validate_overviews(levels: &[usize]) -> Result<()> {
    if let Some(level) = levels.iter().find(|&&l| l < 2) {
        return Err(RasterError::invalid(format!(
            "overview factors must be at least 2, got {}",
            level
        )));
    }
    if levels.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(RasterError::invalid(format!(
            "overview factors must be strictly increasing, got {:?}",
            levels
        )));
    }
    Ok(())
}

pub fn validate_options(options: &ConversionOptions) -> Result<()> {
    if options.driver.trim().is_empty() {
        return Err(RasterError::invalid("driver must not be empty"));
    }
    validate_block_size("blockxsize", options.blockxsize)?;
    validate_block_size("blockysize", options.blockysize)?;
    validate_overviews(&options.overviews)
}

/// Structured overrides for a conversion, applied before free-form options
pub fn conversion_overrides(options: &ConversionOptions) -> ProfileOverrides {
    ProfileOverrides {
        driver: Some(options.driver.clone()),
        tiled: Some(options.tiled),
        block_size: Some((options.blockxsize, options.blockysize)),
        compression: options.compression,
        photometric: options.photometric.clone(),
        ..Default::default()
    }
}

/// Convert `uri` to a new file at `output`, copying pixels verbatim and
/// optionally building overviews.
pub fn convert(uri: &str, output: &Path, options: &ConversionOptions) -> Result<ConversionResult> {
    validate_options(options)?;

    let source = DatasetHandle::open(uri)?;
    let profile = merge_profile(
        &source.profile()?,
        &conversion_overrides(options),
        &options.creation_options,
    );
    info!(
        "Converting {} to {} ({}x{}, {} bands)",
        uri, profile.driver, profile.width, profile.height, profile.count
    );
    debug!("Creation options: {:?}", profile.creation_options);

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = RasterWriter::create(output, &profile)?;
    let size = (profile.width, profile.height);
    for band in 1..=source.count() {
        let data_type = source.band_data_type(band)?;
        debug!("Copying band {} ({:?})", band, data_type);
        copy_band(&source, &mut writer, band, data_type, size)?;
        writer.set_band_nodata(band, source.band_nodata(band))?;
    }
    writer.set_tags(&source.tags())?;
    for band in 1..=source.count() {
        writer.set_band_tags(band, &source.band_tags(band)?)?;
    }
    writer.finish()?;
    drop(source);

    let overviews_built = if options.overviews.is_empty() {
        Vec::new()
    } else {
        build_overviews(output, options)?
    };

    let compression = options.compression.map(|c| c.as_str().to_string());
    let mut meta = BTreeMap::new();
    meta.insert(
        "compression".to_string(),
        compression
            .clone()
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
    );
    meta.insert("tiled".to_string(), serde_json::Value::from(options.tiled));
    let output_ref = resource_ref(output, &options.driver, meta)?;
    let size_bytes = output_ref.size.unwrap_or(0);
    info!("Converted raster written to {} ({} bytes)", output.display(), size_bytes);

    Ok(ConversionResult {
        output: output_ref,
        driver: options.driver.clone(),
        compression,
        size_bytes,
        overviews_built,
    })
}

fn copy_band(
    source: &DatasetHandle,
    writer: &mut RasterWriter,
    band: usize,
    data_type: GdalDataType,
    size: (usize, usize),
) -> Result<()> {
    dispatch_band_type!(data_type, T => {
        let values = source.read_band_as::<T>(band)?;
        writer.write_band_as::<T>(band, size, values)
    })
}

/// Build overviews on a written file using GDAL's internal overview generation
fn build_overviews(output: &Path, options: &ConversionOptions) -> Result<Vec<usize>> {
    let method = options.overview_resampling.gdal_overview_name();
    info!("Building overviews {:?} ({})", options.overviews, method);

    let levels: Vec<i32> = options
        .overviews
        .iter()
        .map(|&l| i32::try_from(l))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| RasterError::invalid(format!("overview factors too large: {:?}", options.overviews)))?;

    let mut handle = DatasetHandle::open_update(output)?;
    // Empty bands list means build for all bands
    handle.dataset_mut().build_overviews(method, &levels, &[])?;
    debug!("Overviews created for {}", output.display());
    Ok(options.overviews.clone())
}
