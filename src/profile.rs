//! Raster creation profiles and their ordered merge.
//!
//! Precedence, lowest to highest:
//! 1. the base profile (usually read from the source dataset),
//! 2. structured overrides ([`ProfileOverrides`]),
//! 3. free-form driver creation options, merged last so a caller can always
//!    override an engine default.

use crate::error::Result;
use crate::models::Compression;
use crate::transform::GeoTransform;
use gdal::cpl::CslStringList;
use gdal::raster::GdalDataType;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct RasterProfile {
    pub driver: String,
    pub width: usize,
    pub height: usize,
    pub count: usize,
    pub data_type: GdalDataType,
    /// CRS as WKT.
    pub crs: Option<String>,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    /// Driver creation options, keys upper-cased.
    pub creation_options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileOverrides {
    pub driver: Option<String>,
    pub crs: Option<String>,
    pub transform: Option<GeoTransform>,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub nodata: Option<f64>,
    pub tiled: Option<bool>,
    pub block_size: Option<(usize, usize)>,
    pub compression: Option<Compression>,
    pub photometric: Option<String>,
}

pub fn merge_profile(
    base: &RasterProfile,
    overrides: &ProfileOverrides,
    creation_options: &BTreeMap<String, String>,
) -> RasterProfile {
    let mut profile = base.clone();

    if let Some(driver) = &overrides.driver {
        profile.driver = driver.clone();
    }
    if let Some(crs) = &overrides.crs {
        profile.crs = Some(crs.clone());
    }
    if let Some(transform) = overrides.transform {
        profile.transform = transform;
    }
    if let Some(width) = overrides.width {
        profile.width = width;
    }
    if let Some(height) = overrides.height {
        profile.height = height;
    }
    if overrides.nodata.is_some() {
        profile.nodata = overrides.nodata;
    }

    let opts = &mut profile.creation_options;
    match overrides.tiled {
        Some(true) => {
            opts.insert("TILED".to_string(), "YES".to_string());
        }
        Some(false) => {
            opts.insert("TILED".to_string(), "NO".to_string());
            opts.remove("BLOCKXSIZE");
            opts.remove("BLOCKYSIZE");
        }
        None => {}
    }
    // Block dimensions only describe tiles; strips keep the driver default.
    if let Some((bx, by)) = overrides.block_size {
        if overrides.tiled != Some(false) {
            opts.insert("BLOCKXSIZE".to_string(), bx.to_string());
            opts.insert("BLOCKYSIZE".to_string(), by.to_string());
        }
    }
    if let Some(compression) = overrides.compression {
        opts.insert("COMPRESS".to_string(), compression.creation_value());
    }
    if let Some(photometric) = &overrides.photometric {
        opts.insert("PHOTOMETRIC".to_string(), photometric.to_ascii_uppercase());
    }

    for (key, value) in creation_options {
        opts.insert(key.to_ascii_uppercase(), value.clone());
    }

    profile
}

impl RasterProfile {
    pub fn creation_option_list(&self) -> Result<CslStringList> {
        let mut list = CslStringList::new();
        for (key, value) in &self.creation_options {
            list.add_string(&format!("{}={}", key, value))?;
        }
        Ok(list)
    }

    pub fn creation_option(&self, key: &str) -> Option<&str> {
        self.creation_options.get(key).map(|s| s.as_str())
    }
}
