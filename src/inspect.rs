use crate::error::Result;
use crate::io::{dtype_name, DatasetHandle};
use crate::models::RasterInfo;
use log::debug;

/// Describe a raster without reading pixel data.
///
/// `band` selects which band's overview levels are reported (band 1 when
/// omitted) and must lie in `1..=count`.
pub fn inspect(uri: &str, band: Option<usize>) -> Result<RasterInfo> {
    let handle = DatasetHandle::open(uri)?;

    let overview_levels = match band {
        Some(b) => {
            handle.check_band(b)?;
            handle.overview_levels(b)?
        }
        None if handle.count() >= 1 => handle.overview_levels(1)?,
        None => Vec::new(),
    };

    let (width, height) = handle.size();
    let transform = handle.transform();
    let dtype = handle
        .band_data_type(1)
        .ok()
        .map(dtype_name);

    debug!(
        "Inspected {}: {}x{}x{}, overviews {:?}",
        uri,
        width,
        height,
        handle.count(),
        overview_levels
    );

    Ok(RasterInfo {
        path: uri.to_string(),
        driver: handle.driver(),
        crs: handle.crs(),
        width,
        height,
        count: handle.count(),
        dtype,
        transform: transform.to_affine(),
        bounds: handle.bounds(),
        nodata: handle.nodata(),
        overview_levels,
        tags: handle.tags(),
    })
}
