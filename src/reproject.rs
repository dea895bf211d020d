use crate::crs::{coord_transform, normalize_crs, normalize_crs_input, parse_crs, transform_points};
use crate::error::{RasterError, Result};
use crate::io::{resource_ref, DatasetHandle, RasterWriter};
use crate::models::{Bounds, ReprojectionParams, ReprojectionResult};
use crate::profile::{merge_profile, ProfileOverrides};
use crate::resample::{resample_band, CoordinateMap};
use crate::transform::GeoTransform;
use gdal::spatial_ref::SpatialRef;
use log::{debug, info, warn};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::Path;

/// Samples per side of the source grid lattice used to estimate the
/// destination extent.
const GRID_SAMPLES: usize = 21;

/// Fraction of a pixel ignored when rounding an extent up to whole pixels.
const SNAP_TOLERANCE: f64 = 1e-9;

/// Bisection steps when pulling a failed extent sample towards a valid one.
const REFINE_STEPS: usize = 30;

/// Latitude at which Web Mercator's y equals its x range.
const MERCATOR_MAX_LATITUDE: f64 = 85.051_128_779_806_6;

/// How the destination grid is sized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GridSpec {
    /// Square pixels keeping roughly the source pixel count along the diagonal.
    Default,
    /// Fixed pixel size `(x, y)` in destination units.
    Resolution(f64, f64),
    /// Fixed `(width, height)` on the default grid's origin and pixel size.
    Size(usize, usize),
}

impl GridSpec {
    fn from_params(params: &ReprojectionParams) -> Self {
        match (params.resolution, params.width, params.height) {
            (Some((xres, yres)), w, h) => {
                if w.is_some() || h.is_some() {
                    warn!("Both resolution and width/height given; using resolution");
                }
                GridSpec::Resolution(xres, yres)
            }
            (None, Some(w), Some(h)) => GridSpec::Size(w, h),
            _ => GridSpec::Default,
        }
    }
}

pub fn validate_params(params: &ReprojectionParams) -> Result<()> {
    if params.dst_crs.trim().is_empty() {
        return Err(RasterError::invalid("dst_crs must not be empty"));
    }
    if let Some((xres, yres)) = params.resolution {
        if !(xres.is_finite() && yres.is_finite() && xres > 0.0 && yres > 0.0) {
            return Err(RasterError::invalid(format!(
                "resolution must be positive and finite, got ({}, {})",
                xres, yres
            )));
        }
    }
    match (params.width, params.height) {
        (Some(0), _) | (_, Some(0)) => {
            return Err(RasterError::invalid("width and height must be greater than 0"))
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(RasterError::invalid("width and height must be given together"))
        }
        _ => {}
    }
    if let Some(nodata) = params.nodata {
        if nodata.is_infinite() {
            return Err(RasterError::invalid("nodata must not be infinite"));
        }
    }
    Ok(())
}

/// Destination transform and size for reprojecting a `width` x `height`
/// grid from `src` to `dst`.
pub fn calculate_default_transform(
    src: &SpatialRef,
    dst: &SpatialRef,
    src_transform: &GeoTransform,
    width: usize,
    height: usize,
    grid: GridSpec,
) -> Result<(GeoTransform, usize, usize)> {
    let extent = transformed_extent(src, dst, src_transform, width, height)?;
    let (extent_w, extent_h) = (extent.width(), extent.height());
    if !(extent_w > 0.0 && extent_h > 0.0) {
        return Err(RasterError::invalid("reprojected extent is empty"));
    }

    // Square pixels keeping the source pixel count along the diagonal; the
    // grid grows to whole pixels so it still covers the extent.
    let diagonal = (extent_w.powi(2) + extent_h.powi(2)).sqrt();
    let pixels = ((width as f64).powi(2) + (height as f64).powi(2)).sqrt();
    let res = diagonal / pixels;

    let (xres, yres, out_w, out_h) = match grid {
        GridSpec::Default => (res, res, pixel_count(extent_w, res), pixel_count(extent_h, res)),
        GridSpec::Resolution(xres, yres) => {
            (xres, yres, pixel_count(extent_w, xres), pixel_count(extent_h, yres))
        }
        GridSpec::Size(out_w, out_h) => (res, res, out_w, out_h),
    };

    let transform = GeoTransform::north_up(extent.left, extent.top, xres, -yres);
    debug!(
        "Destination grid: {}x{}, pixel size ({}, {}), origin ({}, {})",
        out_w, out_h, xres, yres, extent.left, extent.top
    );
    Ok((transform, out_w, out_h))
}

fn pixel_count(length: f64, res: f64) -> usize {
    ((length / res - SNAP_TOLERANCE).ceil() as usize).max(1)
}

/// Mercator is undefined at the poles; geographic samples are clamped to the
/// latitude where Web Mercator's square world ends.
fn mercator_latitude_limit(src: &SpatialRef, dst: &SpatialRef) -> Option<f64> {
    let proj4 = dst.to_proj4().ok()?;
    (src.is_geographic() && proj4.contains("+proj=merc")).then_some(MERCATOR_MAX_LATITUDE)
}

/// Envelope of a lattice of source pixel positions (edges included) in the
/// destination CRS. Samples that fail to transform are replaced by the last
/// transformable point found by bisecting towards each valid neighbour.
fn transformed_extent(
    src: &SpatialRef,
    dst: &SpatialRef,
    src_transform: &GeoTransform,
    width: usize,
    height: usize,
) -> Result<Bounds> {
    let latitude_limit = mercator_latitude_limit(src, dst);
    let steps = (GRID_SAMPLES - 1) as f64;
    let mut lattice = Vec::with_capacity(GRID_SAMPLES * GRID_SAMPLES);
    for i in 0..GRID_SAMPLES {
        let row = height as f64 * i as f64 / steps;
        for j in 0..GRID_SAMPLES {
            let col = width as f64 * j as f64 / steps;
            let (x, mut y) = src_transform.apply(col, row);
            if let Some(limit) = latitude_limit {
                y = y.clamp(-limit, limit);
            }
            lattice.push((x, y));
        }
    }

    let transform = coord_transform(src, dst)?;
    let mut xs: Vec<f64> = lattice.iter().map(|p| p.0).collect();
    let mut ys: Vec<f64> = lattice.iter().map(|p| p.1).collect();
    transform_points(&transform, &mut xs, &mut ys);
    let projected: Vec<Option<(f64, f64)>> = xs
        .iter()
        .zip(ys.iter())
        .map(|(&x, &y)| (x.is_finite() && y.is_finite()).then_some((x, y)))
        .collect();

    let mut bounds = Bounds {
        left: f64::INFINITY,
        bottom: f64::INFINITY,
        right: f64::NEG_INFINITY,
        top: f64::NEG_INFINITY,
    };
    let mut extend = |(x, y): (f64, f64)| {
        bounds.left = bounds.left.min(x);
        bounds.right = bounds.right.max(x);
        bounds.bottom = bounds.bottom.min(y);
        bounds.top = bounds.top.max(y);
    };

    let mut project_one = |x: f64, y: f64| {
        let (mut px, mut py) = ([x], [y]);
        transform_points(&transform, &mut px, &mut py);
        (px[0].is_finite() && py[0].is_finite()).then_some((px[0], py[0]))
    };

    let mut mapped = 0usize;
    let mut refined = 0usize;
    for i in 0..GRID_SAMPLES {
        for j in 0..GRID_SAMPLES {
            let idx = i * GRID_SAMPLES + j;
            if let Some(point) = projected[idx] {
                extend(point);
                mapped += 1;
                continue;
            }
            let neighbours = [
                (i > 0).then(|| idx - GRID_SAMPLES),
                (i + 1 < GRID_SAMPLES).then(|| idx + GRID_SAMPLES),
                (j > 0).then(|| idx - 1),
                (j + 1 < GRID_SAMPLES).then(|| idx + 1),
            ];
            for n in neighbours.into_iter().flatten() {
                if projected[n].is_none() {
                    continue;
                }
                if let Some(point) = refine_towards_valid(lattice[n], lattice[idx], &mut project_one) {
                    extend(point);
                    refined += 1;
                }
            }
        }
    }
    if mapped == 0 {
        return Err(RasterError::invalid(
            "source extent cannot be transformed to the destination CRS",
        ));
    }
    debug!(
        "Transformed {} of {} extent samples, {} refined edge points",
        mapped,
        lattice.len(),
        refined
    );
    Ok(bounds)
}

/// Bisect between a source point that transforms and one that does not,
/// returning the transformed position of the last point that succeeded.
fn refine_towards_valid<F>(valid: (f64, f64), failed: (f64, f64), project: &mut F) -> Option<(f64, f64)>
where
    F: FnMut(f64, f64) -> Option<(f64, f64)>,
{
    let (mut good, mut bad) = (valid, failed);
    let mut best = project(good.0, good.1)?;
    for _ in 0..REFINE_STEPS {
        let mid = ((good.0 + bad.0) / 2.0, (good.1 + bad.1) / 2.0);
        match project(mid.0, mid.1) {
            Some(point) => {
                good = mid;
                best = point;
            }
            None => bad = mid,
        }
    }
    Some(best)
}

/// Source pixel position of every destination pixel centre.
///
/// Built sequentially: a GDAL coordinate transformation cannot be shared
/// between threads.
pub fn build_coordinate_map(
    src: &SpatialRef,
    dst: &SpatialRef,
    src_transform: &GeoTransform,
    dst_transform: &GeoTransform,
    width: usize,
    height: usize,
) -> Result<CoordinateMap> {
    let inverse = src_transform
        .invert()
        .ok_or_else(|| RasterError::invalid("source geotransform is not invertible"))?;
    if !dst_transform.is_finite() {
        return Err(RasterError::invalid("destination geotransform is not finite"));
    }
    let transform = coord_transform(dst, src)?;

    let mut map_x = Array2::<f64>::from_elem((height, width), f64::NAN);
    let mut map_y = Array2::<f64>::from_elem((height, width), f64::NAN);
    let mut xs = vec![0.0; width];
    let mut ys = vec![0.0; width];

    for row in 0..height {
        for col in 0..width {
            let (x, y) = dst_transform.apply(col as f64 + 0.5, row as f64 + 0.5);
            xs[col] = x;
            ys[col] = y;
        }
        transform_points(&transform, &mut xs, &mut ys);
        for col in 0..width {
            if xs[col].is_finite() && ys[col].is_finite() {
                let (px, py) = inverse.apply(xs[col], ys[col]);
                map_x[[row, col]] = px;
                map_y[[row, col]] = py;
            }
        }
    }

    Ok(CoordinateMap { xs: map_x, ys: map_y })
}

/// Reproject every band of `uri` into `dst_crs` and write the result to
/// `output`. The source is opened read-only and never modified.
pub fn reproject(uri: &str, output: &Path, params: &ReprojectionParams) -> Result<ReprojectionResult> {
    validate_params(params)?;
    let dst_srs = parse_crs(&params.dst_crs)?;
    let dst_crs = normalize_crs_input(&params.dst_crs)?;

    let source = DatasetHandle::open(uri)?;
    let (src_srs, src_crs) = match &params.src_crs {
        Some(crs) => (parse_crs(crs)?, normalize_crs_input(crs)?),
        None => {
            let srs = source.spatial_ref().ok_or(RasterError::MissingCrs)?;
            let name = normalize_crs(&srs).ok_or(RasterError::MissingCrs)?;
            (srs, name)
        }
    };

    info!(
        "Reprojecting {} from {} to {} ({})",
        uri, src_crs, dst_crs, params.resampling
    );

    let (src_width, src_height) = source.size();
    let src_transform = source.transform();
    let (dst_transform, width, height) = calculate_default_transform(
        &src_srs,
        &dst_srs,
        &src_transform,
        src_width,
        src_height,
        GridSpec::from_params(params),
    )?;

    let base = source.profile()?;
    let dst_nodata = params.nodata.or(base.nodata);
    let overrides = ProfileOverrides {
        crs: Some(dst_srs.to_wkt()?),
        transform: Some(dst_transform),
        width: Some(width),
        height: Some(height),
        nodata: params.nodata,
        ..Default::default()
    };
    let profile = merge_profile(&base, &overrides, &BTreeMap::new());

    let map = build_coordinate_map(&src_srs, &dst_srs, &src_transform, &dst_transform, width, height)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = RasterWriter::create(output, &profile)?;
    let fill = dst_nodata.unwrap_or(0.0);
    for band in 1..=source.count() {
        debug!("Resampling band {}/{}", band, source.count());
        let data = source.read_band(band)?;
        let resampled = resample_band(&data, source.band_nodata(band), &map, params.resampling, fill)?;
        drop(data);
        writer.write_band(band, &resampled)?;
    }
    writer.set_tags(&source.tags())?;
    writer.finish()?;
    drop(source);

    let mut meta = BTreeMap::new();
    meta.insert("src_crs".to_string(), serde_json::Value::from(src_crs.clone()));
    meta.insert("dst_crs".to_string(), serde_json::Value::from(dst_crs.clone()));
    meta.insert(
        "resampling".to_string(),
        serde_json::Value::from(params.resampling.as_str()),
    );
    let output_ref = resource_ref(output, &profile.driver, meta)?;
    info!("Reprojected raster written to {}", output.display());

    Ok(ReprojectionResult {
        output: output_ref,
        src_crs,
        dst_crs,
        resampling: params.resampling,
        transform: dst_transform.to_affine(),
        width,
        height,
        bounds: dst_transform.bounds(width, height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn srs(code: u32) -> SpatialRef {
        parse_crs(&format!("EPSG:{}", code)).unwrap()
    }

    #[test]
    fn test_validate_params() {
        let mut params = ReprojectionParams::new("EPSG:3857");
        assert!(validate_params(&params).is_ok());

        params.resolution = Some((0.0, 10.0));
        assert!(matches!(validate_params(&params), Err(RasterError::InvalidOptions(_))));
        params.resolution = Some((f64::NAN, 10.0));
        assert!(validate_params(&params).is_err());
        params.resolution = None;

        params.width = Some(10);
        assert!(validate_params(&params).is_err());
        params.height = Some(0);
        assert!(validate_params(&params).is_err());
        params.height = Some(10);
        assert!(validate_params(&params).is_ok());

        assert!(validate_params(&ReprojectionParams::new(" ")).is_err());
    }

    #[test]
    fn test_grid_spec_prefers_resolution() {
        let mut params = ReprojectionParams::new("EPSG:3857");
        assert_eq!(GridSpec::from_params(&params), GridSpec::Default);
        params.width = Some(5);
        params.height = Some(6);
        assert_eq!(GridSpec::from_params(&params), GridSpec::Size(5, 6));
        params.resolution = Some((2.0, 3.0));
        assert_eq!(GridSpec::from_params(&params), GridSpec::Resolution(2.0, 3.0));
    }

    #[test]
    fn test_same_crs_default_transform_is_identity() {
        let wgs84 = srs(4326);
        let gt = GeoTransform::north_up(-10.0, 10.0, 1.0, -1.0);
        let (out, w, h) =
            calculate_default_transform(&wgs84, &wgs84, &gt, 20, 20, GridSpec::Default).unwrap();
        assert_eq!((w, h), (20, 20));
        assert_relative_eq!(out.origin_x, -10.0, epsilon = 1e-9);
        assert_relative_eq!(out.origin_y, 10.0, epsilon = 1e-9);
        assert_relative_eq!(out.pixel_width, 1.0, epsilon = 1e-9);
        assert_relative_eq!(out.pixel_height, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_resolution_and_size_modes() {
        let wgs84 = srs(4326);
        let gt = GeoTransform::north_up(0.0, 10.0, 1.0, -1.0);

        let (out, w, h) = calculate_default_transform(
            &wgs84,
            &wgs84,
            &gt,
            10,
            10,
            GridSpec::Resolution(3.0, 4.0),
        )
        .unwrap();
        assert_eq!((w, h), (4, 3));
        assert_relative_eq!(out.pixel_width, 3.0);
        assert_relative_eq!(out.pixel_height, -4.0);

        let (out, w, h) =
            calculate_default_transform(&wgs84, &wgs84, &gt, 10, 10, GridSpec::Size(5, 20)).unwrap();
        assert_eq!((w, h), (5, 20));
        assert_relative_eq!(out.origin_x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(out.origin_y, 10.0, epsilon = 1e-9);
        assert_relative_eq!(out.pixel_width, 1.0, epsilon = 1e-9);
        assert_relative_eq!(out.pixel_height, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_default_grid_keeps_square_pixels() {
        let wgs84 = srs(4326);
        let gt = GeoTransform::north_up(0.0, 10.0, 1.0, -1.0);
        let (out, w, h) =
            calculate_default_transform(&wgs84, &wgs84, &gt, 20, 10, GridSpec::Default).unwrap();
        assert_relative_eq!(out.pixel_width, -out.pixel_height, epsilon = 1e-12);
        let bounds = out.bounds(w, h);
        assert!(bounds.contains(&Bounds { left: 0.0, bottom: 0.0, right: 20.0, top: 10.0 }, 1e-9));
        assert_eq!((w, h), (20, 10));
    }

    #[test]
    fn test_global_grid_reaches_mercator_limit() {
        let gt = GeoTransform::north_up(-180.0, 90.0, 1.0, -1.0);
        let (out, w, h) =
            calculate_default_transform(&srs(4326), &srs(3857), &gt, 360, 180, GridSpec::Default)
                .unwrap();
        let bounds = out.bounds(w, h);
        assert!(bounds.top > 19.9e6, "top {}", bounds.top);
        assert!(bounds.bottom < -19.9e6, "bottom {}", bounds.bottom);
        assert_relative_eq!(out.origin_x, -20_037_508.34, max_relative = 1e-6);
    }

    #[test]
    fn test_refine_stops_at_last_valid_point() {
        let mut project = |x: f64, y: f64| (y <= 10.0).then_some((x * 2.0, y * 2.0));
        let (x, y) = refine_towards_valid((1.0, 0.0), (1.0, 16.0), &mut project).unwrap();
        assert_relative_eq!(x, 2.0);
        assert!(y <= 20.0 && y > 20.0 - 1e-6, "y {}", y);

        let mut never = |_: f64, _: f64| -> Option<(f64, f64)> { None };
        assert!(refine_towards_valid((0.0, 0.0), (1.0, 1.0), &mut never).is_none());
    }

    #[test]
    fn test_web_mercator_extent() {
        let gt = GeoTransform::north_up(-10.0, 10.0, 1.0, -1.0);
        let (out, w, h) =
            calculate_default_transform(&srs(4326), &srs(3857), &gt, 20, 20, GridSpec::Default)
                .unwrap();
        let bounds = out.bounds(w, h);
        let edge = 1_113_194.9;
        assert_relative_eq!(bounds.left, -edge, max_relative = 1e-3);
        assert_relative_eq!(bounds.top, 1_118_889.97, max_relative = 1e-2);
        assert!(bounds.right >= edge * 0.99);
    }

    #[test]
    fn test_coordinate_map_identity() {
        let wgs84 = srs(4326);
        let gt = GeoTransform::north_up(0.0, 4.0, 1.0, -1.0);
        let map = build_coordinate_map(&wgs84, &wgs84, &gt, &gt, 4, 4).unwrap();
        assert_relative_eq!(map.xs[[0, 0]], 0.5, epsilon = 1e-9);
        assert_relative_eq!(map.ys[[3, 2]], 3.5, epsilon = 1e-9);
        assert_relative_eq!(map.xs[[3, 2]], 2.5, epsilon = 1e-9);
    }
}
