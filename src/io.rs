use crate::crs::normalize_crs;
use crate::error::{RasterError, Result};
use crate::models::{Bounds, ResourceRef};
use crate::profile::RasterProfile;
use crate::transform::GeoTransform;
use gdal::raster::{Buffer, GdalDataType, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags, Metadata};
use log::{debug, info};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Run `$body` with `$t` bound to the Rust type of a GDAL band data type.
macro_rules! dispatch_band_type {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            GdalDataType::UInt8 => {
                type $t = u8;
                $body
            }
            GdalDataType::UInt16 => {
                type $t = u16;
                $body
            }
            GdalDataType::Int16 => {
                type $t = i16;
                $body
            }
            GdalDataType::UInt32 => {
                type $t = u32;
                $body
            }
            GdalDataType::Int32 => {
                type $t = i32;
                $body
            }
            GdalDataType::Float32 => {
                type $t = f32;
                $body
            }
            GdalDataType::Float64 => {
                type $t = f64;
                $body
            }
            other => Err(RasterError::UnsupportedDataType(other.name())),
        }
    };
}
pub(crate) use dispatch_band_type;

/// Numpy-style name of a band data type (`uint8`, `float32`, ...).
pub fn dtype_name(data_type: GdalDataType) -> String {
    match data_type {
        GdalDataType::UInt8 => "uint8".to_string(),
        GdalDataType::UInt16 => "uint16".to_string(),
        GdalDataType::Int16 => "int16".to_string(),
        GdalDataType::UInt32 => "uint32".to_string(),
        GdalDataType::Int32 => "int32".to_string(),
        GdalDataType::Float32 => "float32".to_string(),
        GdalDataType::Float64 => "float64".to_string(),
        other => other.name().to_ascii_lowercase(),
    }
}

/// Map a URI onto something GDAL can open: `file://` URIs become local
/// paths, cloud and HTTP schemes become `/vsi*` virtual paths.
pub fn resolve_uri(uri: &str) -> Result<String> {
    if uri.starts_with("file://") {
        let url = url::Url::parse(uri)
            .map_err(|e| RasterError::invalid(format!("malformed file URI '{}': {}", uri, e)))?;
        let path = url
            .to_file_path()
            .map_err(|_| RasterError::invalid(format!("file URI '{}' has no local path", uri)))?;
        return Ok(path.to_string_lossy().into_owned());
    }

    let prefixes = [
        ("s3://", "/vsis3/"),
        ("gs://", "/vsigs/"),
        ("az://", "/vsiaz/"),
        ("zip://", "/vsizip/"),
    ];
    for (scheme, vsi) in prefixes {
        if let Some(rest) = uri.strip_prefix(scheme) {
            return Ok(format!("{}{}", vsi, rest));
        }
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(format!("/vsicurl/{}", uri));
    }

    Ok(uri.to_string())
}

/// An open GDAL dataset. The underlying handle is closed when this value is
/// dropped, so every exit path of an operation releases it.
pub struct DatasetHandle {
    uri: String,
    dataset: Dataset,
}

impl DatasetHandle {
    pub fn open(uri: &str) -> Result<Self> {
        let path = resolve_uri(uri)?;
        Self::open_with_flags(uri, &path, GdalOpenFlags::GDAL_OF_RASTER)
    }

    /// Open an existing local raster for in-place updates.
    pub fn open_update(path: &Path) -> Result<Self> {
        let uri = path.to_string_lossy().into_owned();
        Self::open_with_flags(
            &uri,
            &uri,
            GdalOpenFlags::GDAL_OF_RASTER | GdalOpenFlags::GDAL_OF_UPDATE,
        )
    }

    fn open_with_flags(uri: &str, path: &str, flags: GdalOpenFlags) -> Result<Self> {
        info!("Opening raster: {}", uri);
        let options = DatasetOptions {
            open_flags: flags,
            ..Default::default()
        };
        let dataset = Dataset::open_ex(path, options).map_err(|e| RasterError::DatasetOpen {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        let handle = Self {
            uri: uri.to_string(),
            dataset,
        };
        let (width, height) = handle.size();
        if width == 0 || height == 0 || handle.count() == 0 {
            return Err(RasterError::DatasetOpen {
                uri: uri.to_string(),
                reason: format!(
                    "raster has invalid shape {}x{} with {} bands",
                    width,
                    height,
                    handle.count()
                ),
            });
        }
        debug!(
            "Opened {} ({}): {}x{}, {} bands",
            uri,
            handle.driver(),
            width,
            height,
            handle.count()
        );
        Ok(handle)
    }

    pub fn dataset_mut(&mut self) -> &mut Dataset {
        &mut self.dataset
    }

    pub fn driver(&self) -> String {
        self.dataset.driver().short_name()
    }

    /// `(width, height)` in pixels.
    pub fn size(&self) -> (usize, usize) {
        self.dataset.raster_size()
    }

    pub fn count(&self) -> usize {
        self.dataset.raster_count()
    }

    pub fn total_pixels(&self) -> usize {
        let (width, height) = self.size();
        width * height
    }

    pub fn check_band(&self, band: usize) -> Result<()> {
        let count = self.count();
        if band < 1 || band > count {
            return Err(RasterError::BandIndex { band, count });
        }
        Ok(())
    }

    pub fn band_data_type(&self, band: usize) -> Result<GdalDataType> {
        self.check_band(band)?;
        Ok(self.dataset.rasterband(band)?.band_type())
    }

    pub fn spatial_ref(&self) -> Option<SpatialRef> {
        if self.dataset.projection().is_empty() {
            return None;
        }
        self.dataset.spatial_ref().ok()
    }

    pub fn crs(&self) -> Option<String> {
        self.spatial_ref().as_ref().and_then(normalize_crs)
    }

    /// Geotransform, or the identity pixel grid when none is set.
    pub fn transform(&self) -> GeoTransform {
        self.dataset
            .geo_transform()
            .map(GeoTransform::from_gdal)
            .unwrap_or_default()
    }

    pub fn bounds(&self) -> Bounds {
        let (width, height) = self.size();
        self.transform().bounds(width, height)
    }

    /// Dataset nodata, taken from the first band.
    pub fn nodata(&self) -> Option<f64> {
        self.band_nodata(1)
    }

    pub fn band_nodata(&self, band: usize) -> Option<f64> {
        self.dataset
            .rasterband(band)
            .ok()
            .and_then(|b| b.no_data_value())
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        parse_metadata(self.dataset.metadata_domain(""))
    }

    pub fn band_tags(&self, band: usize) -> Result<BTreeMap<String, String>> {
        self.check_band(band)?;
        let rasterband = self.dataset.rasterband(band)?;
        Ok(parse_metadata(rasterband.metadata_domain("")))
    }

    /// Overview reduction factors of a band, e.g. `[2, 4, 8]`.
    pub fn overview_levels(&self, band: usize) -> Result<Vec<usize>> {
        self.check_band(band)?;
        let rasterband = self.dataset.rasterband(band)?;
        let width = rasterband.x_size() as f64;
        let count = rasterband.overview_count()?.max(0) as usize;

        let mut levels = Vec::with_capacity(count);
        for i in 0..count {
            let overview = rasterband.overview(i)?;
            let ov_width = overview.x_size();
            if ov_width > 0 {
                levels.push((width / ov_width as f64).round() as usize);
            }
        }
        Ok(levels)
    }

    /// Read a whole band as `f64`. Allocation failure is reported as
    /// `OutOfMemory` instead of aborting.
    pub fn read_band(&self, band: usize) -> Result<Array2<f64>> {
        self.check_band(band)?;
        let (width, height) = self.size();
        let mut buffer = try_alloc::<f64>(width * height, &self.uri)?;

        let rasterband = self.dataset.rasterband(band)?;
        rasterband.read_into_slice::<f64>(
            (0, 0),
            (width, height),
            (width, height),
            &mut buffer,
            None,
        )?;

        Ok(Array2::from_shape_vec((height, width), buffer)?)
    }

    /// Read a whole band in its native type.
    pub fn read_band_as<T: GdalType + Copy + Default>(&self, band: usize) -> Result<Vec<T>> {
        self.check_band(band)?;
        let (width, height) = self.size();
        let mut buffer = try_alloc::<T>(width * height, &self.uri)?;
        let rasterband = self.dataset.rasterband(band)?;
        rasterband.read_into_slice::<T>((0, 0), (width, height), (width, height), &mut buffer, None)?;
        Ok(buffer)
    }

    /// Creation profile describing this dataset.
    pub fn profile(&self) -> Result<RasterProfile> {
        let (width, height) = self.size();
        let rasterband = self.dataset.rasterband(1)?;

        let mut creation_options = BTreeMap::new();
        if let Some(compression) = self.dataset.metadata_item("COMPRESSION", "IMAGE_STRUCTURE") {
            creation_options.insert("COMPRESS".to_string(), compression);
        }
        if let Some(interleave) = self.dataset.metadata_item("INTERLEAVE", "IMAGE_STRUCTURE") {
            creation_options.insert("INTERLEAVE".to_string(), interleave);
        }
        let (block_x, block_y) = rasterband.block_size();
        if block_x < width && block_y > 1 && block_x % 16 == 0 && block_y % 16 == 0 {
            creation_options.insert("TILED".to_string(), "YES".to_string());
            creation_options.insert("BLOCKXSIZE".to_string(), block_x.to_string());
            creation_options.insert("BLOCKYSIZE".to_string(), block_y.to_string());
        }

        let crs = match self.spatial_ref() {
            Some(srs) => Some(srs.to_wkt()?),
            None => None,
        };

        Ok(RasterProfile {
            driver: self.driver(),
            width,
            height,
            count: self.count(),
            data_type: rasterband.band_type(),
            crs,
            transform: self.transform(),
            nodata: rasterband.no_data_value(),
            creation_options,
        })
    }
}

impl Drop for DatasetHandle {
    fn drop(&mut self) {
        debug!("Closing raster: {}", self.uri);
    }
}

fn try_alloc<T: Copy + Default>(len: usize, uri: &str) -> Result<Vec<T>> {
    let mut buffer: Vec<T> = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| RasterError::OutOfMemory(uri.to_string()))?;
    buffer.resize(len, T::default());
    Ok(buffer)
}

fn parse_metadata(entries: Option<Vec<String>>) -> BTreeMap<String, String> {
    entries
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn driver_supports_create(driver: &gdal::Driver) -> bool {
    driver
        .metadata_item("DCAP_CREATE", "")
        .map(|v| v.eq_ignore_ascii_case("YES"))
        .unwrap_or(false)
}

/// Writer for a new raster described by a [`RasterProfile`].
///
/// Drivers that only implement `CreateCopy` (PNG, JPEG, COG, ...) are staged
/// in an in-memory dataset and copied to the target path by [`finish`].
///
/// [`finish`]: RasterWriter::finish
pub struct RasterWriter {
    path: PathBuf,
    profile: RasterProfile,
    dataset: Dataset,
    staged: bool,
}

impl RasterWriter {
    pub fn create(path: &Path, profile: &RasterProfile) -> Result<Self> {
        info!("Creating output raster: {} ({})", path.display(), profile.driver);
        let driver = DriverManager::get_driver_by_name(&profile.driver)?;
        let staged = !driver_supports_create(&driver);

        let mut dataset = if staged {
            debug!("Driver {} has no Create support, staging in memory", profile.driver);
            let mem = DriverManager::get_driver_by_name("MEM")?;
            dispatch_band_type!(profile.data_type, T => Ok(mem.create_with_band_type::<T, _>(
                "",
                profile.width,
                profile.height,
                profile.count,
            )?))?
        } else {
            let options = profile.creation_option_list()?;
            dispatch_band_type!(profile.data_type, T => Ok(driver
                .create_with_band_type_with_options::<T, _>(
                    path,
                    profile.width,
                    profile.height,
                    profile.count,
                    &options,
                )?))?
        };

        dataset.set_geo_transform(&profile.transform.to_gdal())?;
        if let Some(wkt) = &profile.crs {
            dataset.set_projection(wkt)?;
        }
        if let Some(nodata) = profile.nodata {
            for band in 1..=profile.count {
                dataset.rasterband(band)?.set_no_data_value(Some(nodata))?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            profile: profile.clone(),
            dataset,
            staged,
        })
    }

    /// Write a full band; GDAL converts `f64` to the band's data type.
    pub fn write_band(&mut self, band: usize, data: &Array2<f64>) -> Result<()> {
        let (rows, cols) = data.dim();
        let values: Vec<f64> = data.iter().copied().collect();
        self.write_band_as(band, (cols, rows), values)
    }

    pub fn write_band_as<T: GdalType + Copy>(
        &mut self,
        band: usize,
        size: (usize, usize),
        values: Vec<T>,
    ) -> Result<()> {
        let mut raster_band = self.dataset.rasterband(band)?;
        let mut buffer = Buffer::new(size, values);
        raster_band.write((0, 0), size, &mut buffer)?;
        debug!("Wrote band {} ({}x{})", band, size.0, size.1);
        Ok(())
    }

    pub fn set_band_nodata(&mut self, band: usize, nodata: Option<f64>) -> Result<()> {
        let mut raster_band = self.dataset.rasterband(band)?;
        raster_band.set_no_data_value(nodata)?;
        Ok(())
    }

    pub fn set_tags(&mut self, tags: &BTreeMap<String, String>) -> Result<()> {
        for (key, value) in tags {
            self.dataset.set_metadata_item(key, value, "")?;
        }
        Ok(())
    }

    pub fn set_band_tags(&mut self, band: usize, tags: &BTreeMap<String, String>) -> Result<()> {
        let mut raster_band = self.dataset.rasterband(band)?;
        for (key, value) in tags {
            raster_band.set_metadata_item(key, value, "")?;
        }
        Ok(())
    }

    /// Flush and close the output; staged datasets are copied to disk here.
    pub fn finish(self) -> Result<()> {
        if self.staged {
            let driver = DriverManager::get_driver_by_name(&self.profile.driver)?;
            let options = self.profile.creation_option_list()?;
            let copy = self.dataset.create_copy(&driver, &self.path, &options)?;
            drop(copy);
        }
        drop(self.dataset);
        info!("Finished writing {}", self.path.display());
        Ok(())
    }
}

/// Reference to a file written by an operation.
pub fn resource_ref(
    path: &Path,
    driver: &str,
    meta: BTreeMap<String, serde_json::Value>,
) -> Result<ResourceRef> {
    let absolute = std::fs::canonicalize(path)?;
    let size = std::fs::metadata(&absolute)?.len();
    let uri = url::Url::from_file_path(&absolute)
        .map_err(|_| RasterError::invalid(format!("cannot build URI for {}", absolute.display())))?;

    Ok(ResourceRef {
        uri: uri.to_string(),
        path: Some(absolute.to_string_lossy().into_owned()),
        size: Some(size),
        checksum: None,
        driver: Some(driver.to_string()),
        meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_uri_schemes() {
        assert_eq!(resolve_uri("/data/dem.tif").unwrap(), "/data/dem.tif");
        assert_eq!(resolve_uri("file:///data/dem.tif").unwrap(), "/data/dem.tif");
        assert_eq!(resolve_uri("s3://bucket/a/b.tif").unwrap(), "/vsis3/bucket/a/b.tif");
        assert_eq!(resolve_uri("gs://bucket/b.tif").unwrap(), "/vsigs/bucket/b.tif");
        assert_eq!(
            resolve_uri("https://example.com/b.tif").unwrap(),
            "/vsicurl/https://example.com/b.tif"
        );
        assert_eq!(
            resolve_uri("/vsizip/archive.zip/b.tif").unwrap(),
            "/vsizip/archive.zip/b.tif"
        );
    }

    #[test]
    fn test_parse_metadata() {
        let tags = parse_metadata(Some(vec![
            "AREA_OR_POINT=Area".to_string(),
            "EQ=a=b".to_string(),
            "malformed".to_string(),
        ]));
        assert_eq!(tags.get("AREA_OR_POINT").map(String::as_str), Some("Area"));
        assert_eq!(tags.get("EQ").map(String::as_str), Some("a=b"));
        assert_eq!(tags.len(), 2);
        assert!(parse_metadata(None).is_empty());
    }

    #[test]
    fn test_open_missing_file() {
        let err = DatasetHandle::open("/nonexistent/raster.tif").err().unwrap();
        assert!(matches!(err, RasterError::DatasetOpen { .. }));
    }
}
