use crate::crs::wgs84_bounds;
use crate::error::{RasterError, Result};
use crate::io::DatasetHandle;
use crate::models::{
    BandStatistics, HistogramBin, PercentileValue, SpatialExtent, StatsParams, StatsResult,
};
use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::BTreeSet;

/// Seed for pixel sampling; fixed so repeated calls give identical results.
pub const SAMPLE_SEED: u64 = 42;

/// Per-band summary statistics over valid (non-nodata) pixels.
pub fn compute_statistics(uri: &str, params: &StatsParams) -> Result<StatsResult> {
    validate_params(params)?;

    let handle = DatasetHandle::open(uri)?;
    let bands: Vec<usize> = match &params.bands {
        Some(requested) => {
            for &band in requested {
                handle.check_band(band)?;
            }
            requested.clone()
        }
        None => (1..=handle.count()).collect(),
    };

    let total_pixels = handle.total_pixels();
    info!(
        "Computing statistics for {} band(s) of {} ({} pixels each)",
        bands.len(),
        uri,
        total_pixels
    );

    let mut band_stats = Vec::with_capacity(bands.len());
    for band in bands {
        let data = handle.read_band(band)?;
        let values = valid_values(&data, handle.band_nodata(band), uri)?;
        let valid_count = values.len();
        debug!("Band {}: {} valid of {} pixels", band, valid_count, total_pixels);

        let stats = summarize_band(band, values, total_pixels, params, uri)?;
        band_stats.push(stats);
    }

    let spatial_extent = if params.include_extent {
        let bounds = handle.bounds();
        let bounds_wgs84 = handle
            .spatial_ref()
            .and_then(|srs| wgs84_bounds(&srs, &bounds));
        Some(SpatialExtent {
            bounds,
            crs: handle.crs(),
            bounds_wgs84,
        })
    } else {
        None
    };

    Ok(StatsResult {
        path: uri.to_string(),
        band_stats,
        total_pixels,
        spatial_extent,
    })
}

fn validate_params(params: &StatsParams) -> Result<()> {
    if params.histogram_bins == 0 {
        return Err(RasterError::invalid("histogram_bins must be at least 1"));
    }
    if let Some(p) = params
        .percentiles
        .iter()
        .find(|p| !p.is_finite() || **p < 0.0 || **p > 100.0)
    {
        return Err(RasterError::invalid(format!(
            "percentile {} is outside [0, 100]",
            p
        )));
    }
    Ok(())
}

/// Values that are not masked by `nodata`. A NaN nodata masks NaN pixels.
fn valid_values(data: &Array2<f64>, nodata: Option<f64>, uri: &str) -> Result<Vec<f64>> {
    let mut values: Vec<f64> = Vec::new();
    values
        .try_reserve_exact(data.len())
        .map_err(|_| RasterError::OutOfMemory(uri.to_string()))?;

    match nodata {
        Some(nd) if nd.is_nan() => values.extend(data.iter().copied().filter(|v| !v.is_nan())),
        Some(nd) => values.extend(data.iter().copied().filter(|v| *v != nd)),
        None => values.extend(data.iter().copied()),
    }
    Ok(values)
}

/// Uniform sample of `sample_size` values without replacement, in source
/// order. Indices are drawn with Floyd's algorithm so memory stays
/// proportional to the sample.
pub fn sample_values(values: &[f64], sample_size: usize) -> Vec<f64> {
    let n = values.len();
    if n <= sample_size {
        return values.to_vec();
    }
    let mut rng = fastrand::Rng::with_seed(SAMPLE_SEED);
    let mut picked = BTreeSet::new();
    for j in (n - sample_size)..n {
        let t = rng.usize(..=j);
        if !picked.insert(t) {
            picked.insert(j);
        }
    }
    picked.into_iter().map(|i| values[i]).collect()
}

fn summarize_band(
    band: usize,
    values: Vec<f64>,
    total_pixels: usize,
    params: &StatsParams,
    uri: &str,
) -> Result<BandStatistics> {
    let valid_count = values.len();
    let nodata_count = total_pixels - valid_count;

    // A sample size of 0 disables sampling.
    let (mut values, sample_count) = match params.sample_size {
        Some(size) if size > 0 && valid_count > size => {
            debug!("Band {}: sampling {} of {} valid pixels", band, size, valid_count);
            (sample_values(&values, size), Some(size))
        }
        _ => (values, None),
    };

    if values.is_empty() {
        return Ok(BandStatistics {
            band,
            min: None,
            max: None,
            mean: None,
            std: None,
            median: None,
            percentiles: Vec::new(),
            valid_count,
            nodata_count,
            sample_count,
            histogram: Vec::new(),
        });
    }

    let (mean, std) = mean_and_std(&values);

    let mut sorted: Vec<f64> = Vec::new();
    sorted
        .try_reserve_exact(values.len())
        .map_err(|_| RasterError::OutOfMemory(uri.to_string()))?;
    sorted.append(&mut values);
    sorted.par_sort_unstable_by(f64::total_cmp);

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let percentiles: Vec<PercentileValue> = params
        .percentiles
        .iter()
        .map(|&p| PercentileValue {
            percentile: p,
            value: percentile_sorted(&sorted, p),
        })
        .collect();
    let median = percentiles
        .iter()
        .find(|pv| pv.percentile == 50.0)
        .map(|pv| pv.value)
        .unwrap_or_else(|| percentile_sorted(&sorted, 50.0));

    let histogram = if params.include_histogram {
        histogram(&sorted, min, max, params.histogram_bins)
    } else {
        Vec::new()
    };

    Ok(BandStatistics {
        band,
        min: Some(min),
        max: Some(max),
        mean: Some(mean),
        std: Some(std),
        median: Some(median),
        percentiles,
        valid_count,
        nodata_count,
        sample_count,
        histogram,
    })
}

/// Mean and population standard deviation.
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Percentile of sorted data, linearly interpolating between the two
/// nearest order statistics at rank `p / 100 * (n - 1)`.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let last = sorted.len() - 1;
    let rank = (p / 100.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil().min(last as f64) as usize;
    let frac = rank - lo as f64;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// Equal-width histogram over `[min, max]`; every bin is `[min_value,
/// max_value)` except the last, which is closed on the right. A constant
/// range is widened to `[min - 0.5, max + 0.5]`.
pub fn histogram(values: &[f64], min: f64, max: f64, bins: usize) -> Vec<HistogramBin> {
    let (first, last) = if min == max {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    };
    let edges = bin_edges(first, last, bins);

    let mut counts = vec![0usize; bins];
    for &v in values {
        if !(first..=last).contains(&v) {
            continue;
        }
        counts[bin_index(v, &edges)] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            min_value: edges[i],
            max_value: edges[i + 1],
            count,
        })
        .collect()
}

fn bin_edges(first: f64, last: f64, bins: usize) -> Vec<f64> {
    let span = last - first;
    (0..=bins)
        .map(|i| {
            if i == bins {
                last
            } else {
                first + span * i as f64 / bins as f64
            }
        })
        .collect()
}

/// Bin holding `v`, checked against the reported edges so rounding in the
/// scaled index never puts a value outside its bin.
fn bin_index(v: f64, edges: &[f64]) -> usize {
    let bins = edges.len() - 1;
    let span = edges[bins] - edges[0];
    let mut idx = (((v - edges[0]) / span) * bins as f64) as usize;
    idx = idx.min(bins - 1);
    while idx > 0 && v < edges[idx] {
        idx -= 1;
    }
    while idx + 1 < bins && v >= edges[idx + 1] {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    fn params_with(percentiles: &[f64]) -> StatsParams {
        StatsParams {
            percentiles: percentiles.to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let sorted: Vec<f64> = (0..100).map(|v| v as f64).collect();
        assert_relative_eq!(percentile_sorted(&sorted, 50.0), 49.5);
        assert_relative_eq!(percentile_sorted(&sorted, 0.0), 0.0);
        assert_relative_eq!(percentile_sorted(&sorted, 100.0), 99.0);
        assert_relative_eq!(percentile_sorted(&sorted, 25.0), 24.75);
        assert_relative_eq!(percentile_sorted(&[7.0], 90.0), 7.0);
    }

    #[test]
    fn test_summary_of_0_to_99() {
        let values: Vec<f64> = (0..100).map(|v| v as f64).collect();
        let stats = summarize_band(1, values, 100, &StatsParams::default(), "mem").unwrap();
        assert_eq!(stats.min, Some(0.0));
        assert_eq!(stats.max, Some(99.0));
        assert_relative_eq!(stats.mean.unwrap(), 49.5);
        assert_relative_eq!(stats.std.unwrap(), 28.866_070_047_722_118, epsilon = 1e-9);
        assert_relative_eq!(stats.median.unwrap(), 49.5);
        assert_eq!(stats.valid_count, 100);
        assert_eq!(stats.nodata_count, 0);
        assert!(stats.sample_count.is_none());
    }

    #[test]
    fn test_percentiles_non_decreasing() {
        let values = vec![5.0, -2.0, 9.5, 3.0, 3.0, 100.0, 0.25, 42.0];
        let params = params_with(&[0.0, 10.0, 33.0, 50.0, 66.0, 90.0, 99.0, 100.0]);
        let stats = summarize_band(1, values, 8, &params, "mem").unwrap();
        for pair in stats.percentiles.windows(2) {
            assert!(pair[0].value <= pair[1].value);
        }
        assert!(stats.min.unwrap() <= stats.median.unwrap());
        assert!(stats.median.unwrap() <= stats.max.unwrap());
    }

    #[test]
    fn test_median_without_50th_percentile() {
        let params = params_with(&[10.0]);
        let stats = summarize_band(1, vec![1.0, 2.0, 3.0, 4.0], 4, &params, "mem").unwrap();
        assert_relative_eq!(stats.median.unwrap(), 2.5);
        assert_eq!(stats.percentiles.len(), 1);
    }

    #[test]
    fn test_histogram_counts_sum_to_values() {
        let values: Vec<f64> = (0..1000).map(|v| (v % 37) as f64 * 1.5).collect();
        let bins = histogram(&values, 0.0, 54.0, 10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), values.len());
        assert_relative_eq!(bins[0].min_value, 0.0);
        assert_relative_eq!(bins[9].max_value, 54.0);
        for pair in bins.windows(2) {
            assert_relative_eq!(pair[0].max_value, pair[1].min_value);
        }
    }

    #[test]
    fn test_histogram_constant_values() {
        let bins = histogram(&[3.0, 3.0, 3.0], 3.0, 3.0, 4);
        assert_relative_eq!(bins[0].min_value, 2.5);
        assert_relative_eq!(bins[3].max_value, 3.5);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 3);
    }

    #[test]
    fn test_sampling_is_reproducible() {
        let values: Vec<f64> = (0..10_000).map(|v| (v * 7 % 1013) as f64).collect();
        let a = sample_values(&values, 500);
        let b = sample_values(&values, 500);
        assert_eq!(a.len(), 500);
        assert_eq!(a, b);

        let mut params = StatsParams::default();
        params.sample_size = Some(500);
        params.include_histogram = true;
        params.histogram_bins = 16;
        let s1 = summarize_band(1, values.clone(), 10_000, &params, "mem").unwrap();
        let s2 = summarize_band(1, values, 10_000, &params, "mem").unwrap();
        assert_eq!(s1, s2);
        assert_eq!(s1.sample_count, Some(500));
        assert_eq!(s1.valid_count, 10_000);
        assert_eq!(s1.histogram.iter().map(|b| b.count).sum::<usize>(), 500);
    }

    #[test]
    fn test_sample_larger_than_population_keeps_everything() {
        let values = vec![1.0, 2.0, 3.0];
        assert_eq!(sample_values(&values, 10), values);
    }

    #[test]
    fn test_valid_values_masks_nodata() {
        let data = arr2(&[[1.0, -9999.0], [3.0, -9999.0]]);
        assert_eq!(valid_values(&data, Some(-9999.0), "mem").unwrap(), vec![1.0, 3.0]);
        assert_eq!(valid_values(&data, None, "mem").unwrap().len(), 4);

        let with_nan = arr2(&[[f64::NAN, 2.0]]);
        assert_eq!(valid_values(&with_nan, Some(f64::NAN), "mem").unwrap(), vec![2.0]);
    }

    #[test]
    fn test_all_nodata_band() {
        let stats = summarize_band(2, Vec::new(), 25, &StatsParams::default(), "mem").unwrap();
        assert_eq!(stats.band, 2);
        assert!(stats.min.is_none() && stats.mean.is_none() && stats.median.is_none());
        assert_eq!(stats.nodata_count, 25);
        assert!(stats.histogram.is_empty());
    }

    #[test]
    fn test_invalid_params() {
        let mut params = StatsParams::default();
        params.histogram_bins = 0;
        assert!(matches!(validate_params(&params), Err(RasterError::InvalidOptions(_))));

        let params = params_with(&[50.0, 101.0]);
        assert!(validate_params(&params).is_err());

    }

    #[test]
    fn test_zero_sample_size_disables_sampling() {
        let mut params = StatsParams::default();
        params.sample_size = Some(0);
        assert!(validate_params(&params).is_ok());

        let values: Vec<f64> = (0..50).map(|v| v as f64).collect();
        let stats = summarize_band(1, values, 50, &params, "mem").unwrap();
        assert_eq!(stats.sample_count, None);
        assert_eq!(stats.valid_count, 50);
        assert_relative_eq!(stats.mean.unwrap(), 24.5);
    }

    #[test]
    fn test_histogram_bins_are_half_open() {
        for n in 2..60 {
            let values: Vec<f64> = (0..n).map(|i| i as f64 * 0.1).collect();
            let max = values[n - 1];
            for bins in [3, 7, 10, 13, 256] {
                let hist = histogram(&values, 0.0, max, bins);
                for (i, bin) in hist.iter().enumerate() {
                    let last = i == bins - 1;
                    let expected = values
                        .iter()
                        .filter(|&&v| bin.min_value <= v && (v < bin.max_value || (last && v <= bin.max_value)))
                        .count();
                    assert_eq!(bin.count, expected, "n={} bins={} bin={}", n, bins, i);
                }
                assert_eq!(hist.iter().map(|b| b.count).sum::<usize>(), n);
            }
        }

        let edges = bin_edges(0.0, 0.30000000000000004, 3);
        let idx = bin_index(0.1, &edges);
        assert!(edges[idx] <= 0.1 && 0.1 < edges[idx + 1]);
    }
}
