use crate::error::{RasterError, Result};
use crate::models::{Bounds, GeographicBounds};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use log::{debug, warn};

/// Points sampled along each bounds edge when transforming extents.
pub const DENSIFY_POINTS: i32 = 21;

/// Parse user CRS input (`EPSG:3857`, WKT, PROJ string) into a SpatialRef
/// using x=easting/longitude, y=northing/latitude axis order.
pub fn parse_crs(input: &str) -> Result<SpatialRef> {
    let mut srs = SpatialRef::from_definition(input.trim())
        .map_err(|e| RasterError::invalid(format!("unrecognized CRS '{}': {}", input, e)))?;
    srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(srs)
}

/// Canonical string for a CRS: `AUTHORITY:CODE` when one can be identified,
/// otherwise the WKT.
pub fn normalize_crs(srs: &SpatialRef) -> Option<String> {
    if let Some(id) = authority_id(srs) {
        return Some(id);
    }

    let mut identified = srs.clone();
    if identified.auto_identify_epsg().is_ok() {
        if let Some(id) = authority_id(&identified) {
            debug!("Identified CRS as {}", id);
            return Some(id);
        }
    }

    match srs.to_wkt() {
        Ok(wkt) if !wkt.is_empty() => Some(wkt),
        Ok(_) => None,
        Err(e) => {
            warn!("Failed to export CRS as WKT: {}", e);
            None
        }
    }
}

fn authority_id(srs: &SpatialRef) -> Option<String> {
    let name = srs.auth_name().ok()?;
    let code = srs.auth_code().ok()?;
    if name.is_empty() {
        return None;
    }
    Some(format!("{}:{}", name.to_ascii_uppercase(), code))
}

/// Normalize a caller-supplied CRS string, keeping it verbatim when GDAL
/// cannot identify an authority code.
pub fn normalize_crs_input(input: &str) -> Result<String> {
    let srs = parse_crs(input)?;
    Ok(normalize_crs(&srs).unwrap_or_else(|| input.to_string()))
}

pub fn coord_transform(src: &SpatialRef, dst: &SpatialRef) -> Result<CoordTransform> {
    let mut src = src.clone();
    let mut dst = dst.clone();
    src.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    dst.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
    Ok(CoordTransform::new(&src, &dst)?)
}

/// Transform a bounding box between CRSs, densifying each edge.
pub fn transform_bounds(src: &SpatialRef, dst: &SpatialRef, bounds: &Bounds) -> Result<Bounds> {
    let transform = coord_transform(src, dst)?;
    let out = transform.transform_bounds(
        &[bounds.left, bounds.bottom, bounds.right, bounds.top],
        DENSIFY_POINTS,
    )?;
    let result = Bounds {
        left: out[0],
        bottom: out[1],
        right: out[2],
        top: out[3],
    };
    if ![result.left, result.bottom, result.right, result.top]
        .iter()
        .all(|v| v.is_finite())
    {
        return Err(RasterError::invalid("transformed bounds are not finite"));
    }
    Ok(result)
}

/// Best-effort WGS84 bounds; `None` when the transform is not possible.
pub fn wgs84_bounds(srs: &SpatialRef, bounds: &Bounds) -> Option<GeographicBounds> {
    let wgs84 = match SpatialRef::from_epsg(4326) {
        Ok(sr) => sr,
        Err(e) => {
            warn!("Failed to create EPSG:4326 SRS: {}", e);
            return None;
        }
    };

    match transform_bounds(srs, &wgs84, bounds) {
        Ok(b) => Some(GeographicBounds {
            west: b.left,
            south: b.bottom,
            east: b.right,
            north: b.top,
        }),
        Err(e) => {
            debug!("Skipping WGS84 bounds: {}", e);
            None
        }
    }
}

/// Transform points in place. A failed batch is retried point by point and
/// points that still fail are set to NaN.
pub fn transform_points(transform: &CoordTransform, xs: &mut [f64], ys: &mut [f64]) {
    let (orig_x, orig_y) = (xs.to_vec(), ys.to_vec());
    if transform.transform_coords(xs, ys, &mut []).is_ok() {
        return;
    }

    for i in 0..xs.len() {
        let mut x = [orig_x[i]];
        let mut y = [orig_y[i]];
        if transform.transform_coords(&mut x, &mut y, &mut []).is_ok()
            && x[0].is_finite()
            && y[0].is_finite()
        {
            xs[i] = x[0];
            ys[i] = y[0];
        } else {
            xs[i] = f64::NAN;
            ys[i] = f64::NAN;
        }
    }
}
