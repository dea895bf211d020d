#![allow(dead_code)]

use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{DriverManager, Metadata};
use std::path::{Path, PathBuf};

pub struct Fixture<T> {
    pub width: usize,
    pub height: usize,
    pub bands: Vec<Vec<T>>,
    pub epsg: Option<u32>,
    pub transform: [f64; 6],
    pub nodata: Option<f64>,
    pub tags: Vec<(String, String)>,
}

impl<T: GdalType + Copy> Fixture<T> {
    pub fn new(width: usize, height: usize, bands: Vec<Vec<T>>) -> Self {
        Self {
            width,
            height,
            bands,
            epsg: Some(4326),
            transform: [0.0, 1.0, 0.0, height as f64, 0.0, -1.0],
            nodata: None,
            tags: Vec::new(),
        }
    }

    pub fn write(&self, path: &Path) -> PathBuf {
        let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
        let mut dataset = driver
            .create_with_band_type::<T, _>(path, self.width, self.height, self.bands.len())
            .unwrap();
        dataset.set_geo_transform(&self.transform).unwrap();
        if let Some(code) = self.epsg {
            let srs = SpatialRef::from_epsg(code).unwrap();
            dataset.set_projection(&srs.to_wkt().unwrap()).unwrap();
        }
        for (key, value) in &self.tags {
            dataset.set_metadata_item(key, value, "").unwrap();
        }
        for (i, values) in self.bands.iter().enumerate() {
            let mut band = dataset.rasterband(i + 1).unwrap();
            if self.nodata.is_some() {
                band.set_no_data_value(self.nodata).unwrap();
            }
            let mut buffer = Buffer::new((self.width, self.height), values.clone());
            band.write((0, 0), (self.width, self.height), &mut buffer).unwrap();
        }
        path.to_path_buf()
    }
}

/// 10x10 float32 raster holding 0..99 in row-major order.
pub fn ramp_raster(dir: &Path) -> PathBuf {
    let values: Vec<f32> = (0..100).map(|v| v as f32).collect();
    Fixture::new(10, 10, vec![values]).write(&dir.join("ramp.tif"))
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
