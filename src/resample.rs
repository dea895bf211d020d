//! Sampling a source grid at fractional pixel positions.
//!
//! Positions are in source pixel space: the centre of pixel `(row, col)` is
//! at `(col + 0.5, row + 0.5)`. Source pixels equal to nodata (or NaN) never
//! contribute, and kernel weights are renormalized over the taps that do.

use crate::error::Result;
use crate::models::ResamplingMethod;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use std::collections::HashMap;
use std::f64::consts::PI;

/// Source pixel position of every destination pixel centre. NaN marks a
/// destination pixel with no source location.
#[derive(Debug, Clone)]
pub struct CoordinateMap {
    pub xs: Array2<f64>,
    pub ys: Array2<f64>,
}

impl CoordinateMap {
    pub fn dim(&self) -> (usize, usize) {
        self.xs.dim()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<(f64, f64)> {
        let (x, y) = (self.xs[[row, col]], self.ys[[row, col]]);
        if x.is_finite() && y.is_finite() {
            Some((x, y))
        } else {
            None
        }
    }

    /// Source pixels spanned by one destination pixel along x and y,
    /// estimated from the neighbouring destination pixels.
    pub fn footprint(&self, row: usize, col: usize) -> (f64, f64) {
        let (rows, cols) = self.dim();
        let here = match self.get(row, col) {
            Some(p) => p,
            None => return (1.0, 1.0),
        };
        let neighbour = |r: usize, c: usize| self.get(r, c);
        let step_x = if col + 1 < cols {
            neighbour(row, col + 1)
        } else if col > 0 {
            neighbour(row, col - 1)
        } else {
            None
        };
        let step_y = if row + 1 < rows {
            neighbour(row + 1, col)
        } else if row > 0 {
            neighbour(row - 1, col)
        } else {
            None
        };
        let dist = |p: Option<(f64, f64)>| {
            p.map(|(x, y)| ((x - here.0).powi(2) + (y - here.1).powi(2)).sqrt())
                .filter(|d| d.is_finite() && *d > 0.0)
                .unwrap_or(1.0)
        };
        (dist(step_x), dist(step_y))
    }
}

struct SourceGrid<'a> {
    data: ArrayView2<'a, f64>,
    nodata: Option<f64>,
}

impl<'a> SourceGrid<'a> {
    fn value(&self, row: isize, col: isize) -> Option<f64> {
        let (rows, cols) = self.data.dim();
        if row < 0 || col < 0 || row as usize >= rows || col as usize >= cols {
            return None;
        }
        let v = self.data[[row as usize, col as usize]];
        if v.is_nan() {
            return None;
        }
        match self.nodata {
            Some(nd) if v == nd => None,
            _ => Some(v),
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        let (rows, cols) = self.data.dim();
        x >= 0.0 && y >= 0.0 && x <= cols as f64 && y <= rows as f64
    }
}

/// Resample a whole band onto the destination grid described by `map`.
/// Rows are processed in parallel.
pub fn resample_band(
    src: &Array2<f64>,
    src_nodata: Option<f64>,
    map: &CoordinateMap,
    method: ResamplingMethod,
    fill: f64,
) -> Result<Array2<f64>> {
    let grid = SourceGrid {
        data: src.view(),
        nodata: src_nodata,
    };
    let (rows, cols) = map.dim();

    let out_rows: Vec<Vec<f64>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            (0..cols)
                .map(|col| {
                    map.get(row, col)
                        .and_then(|(x, y)| {
                            let footprint = map.footprint(row, col);
                            sample(&grid, method, x, y, footprint)
                        })
                        .unwrap_or(fill)
                })
                .collect()
        })
        .collect();

    let flat: Vec<f64> = out_rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((rows, cols), flat)?)
}

fn sample(
    grid: &SourceGrid,
    method: ResamplingMethod,
    x: f64,
    y: f64,
    footprint: (f64, f64),
) -> Option<f64> {
    if !grid.contains(x, y) {
        return None;
    }
    match method {
        ResamplingMethod::Nearest => grid.value(y.floor() as isize, x.floor() as isize),
        ResamplingMethod::Bilinear => convolve(grid, x, y, 1.0, &bilinear_weight),
        ResamplingMethod::Cubic => convolve(grid, x, y, 2.0, &cubic_weight),
        ResamplingMethod::CubicSpline => convolve(grid, x, y, 2.0, &cubic_spline_weight),
        ResamplingMethod::Lanczos => convolve(grid, x, y, LANCZOS_A, &lanczos_weight),
        ResamplingMethod::Gauss => {
            let sigma = 0.5 * footprint.0.max(footprint.1).max(1.0);
            let weight = move |t: f64| (-(t * t) / (2.0 * sigma * sigma)).exp();
            convolve(grid, x, y, (3.0 * sigma).max(1.5), &weight)
        }
        ResamplingMethod::Average => average(grid, x, y, footprint),
        ResamplingMethod::Mode => mode(grid, x, y, footprint),
    }
}

const LANCZOS_A: f64 = 3.0;

fn bilinear_weight(t: f64) -> f64 {
    (1.0 - t.abs()).max(0.0)
}

/// Keys cubic convolution, a = -0.5.
fn cubic_weight(t: f64) -> f64 {
    let a = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        (a + 2.0) * t.powi(3) - (a + 3.0) * t.powi(2) + 1.0
    } else if t < 2.0 {
        a * t.powi(3) - 5.0 * a * t.powi(2) + 8.0 * a * t - 4.0 * a
    } else {
        0.0
    }
}

/// Cubic B-spline.
fn cubic_spline_weight(t: f64) -> f64 {
    let t = t.abs();
    if t < 1.0 {
        (4.0 - 6.0 * t * t + 3.0 * t.powi(3)) / 6.0
    } else if t < 2.0 {
        (2.0 - t).powi(3) / 6.0
    } else {
        0.0
    }
}

fn sinc(t: f64) -> f64 {
    if t == 0.0 {
        1.0
    } else {
        (PI * t).sin() / (PI * t)
    }
}

fn lanczos_weight(t: f64) -> f64 {
    if t.abs() >= LANCZOS_A {
        0.0
    } else {
        sinc(t) * sinc(t / LANCZOS_A)
    }
}

/// Separable kernel interpolation around pixel-space position `(x, y)`.
fn convolve(grid: &SourceGrid, x: f64, y: f64, radius: f64, weight: &dyn Fn(f64) -> f64) -> Option<f64> {
    // Kernel coordinates are relative to pixel centres.
    let cx = x - 0.5;
    let cy = y - 0.5;
    let col_min = (cx - radius).floor() as isize + 1;
    let col_max = (cx + radius).ceil() as isize - 1;
    let row_min = (cy - radius).floor() as isize + 1;
    let row_max = (cy + radius).ceil() as isize - 1;

    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    for row in row_min..=row_max {
        let wy = weight(cy - row as f64);
        if wy == 0.0 {
            continue;
        }
        for col in col_min..=col_max {
            let wx = weight(cx - col as f64);
            if wx == 0.0 {
                continue;
            }
            if let Some(v) = grid.value(row, col) {
                let w = wx * wy;
                sum += w * v;
                weight_sum += w;
            }
        }
    }

    if weight_sum.abs() < 1e-12 {
        // Position falls exactly on pixel centres whose neighbours are all
        // missing; use the containing pixel.
        return grid.value(y.floor() as isize, x.floor() as isize);
    }
    Some(sum / weight_sum)
}

/// Source pixels overlapping the footprint window, with their overlap area.
fn window_cells(grid: &SourceGrid, x: f64, y: f64, footprint: (f64, f64)) -> Vec<(f64, f64)> {
    let half_x = footprint.0.max(1.0) / 2.0;
    let half_y = footprint.1.max(1.0) / 2.0;
    let (x0, x1) = (x - half_x, x + half_x);
    let (y0, y1) = (y - half_y, y + half_y);

    let mut cells = Vec::new();
    for row in y0.floor() as isize..y1.ceil() as isize {
        let overlap_y = (y1.min(row as f64 + 1.0) - y0.max(row as f64)).max(0.0);
        if overlap_y == 0.0 {
            continue;
        }
        for col in x0.floor() as isize..x1.ceil() as isize {
            let overlap_x = (x1.min(col as f64 + 1.0) - x0.max(col as f64)).max(0.0);
            if overlap_x == 0.0 {
                continue;
            }
            if let Some(v) = grid.value(row, col) {
                cells.push((v, overlap_x * overlap_y));
            }
        }
    }
    cells
}

/// Area-weighted mean of the valid source pixels under the footprint.
fn average(grid: &SourceGrid, x: f64, y: f64, footprint: (f64, f64)) -> Option<f64> {
    let cells = window_cells(grid, x, y, footprint);
    let area: f64 = cells.iter().map(|(_, a)| a).sum();
    if area <= 0.0 {
        return None;
    }
    Some(cells.iter().map(|(v, a)| v * a).sum::<f64>() / area)
}

/// Most frequent valid value under the footprint; ties go to the smaller value.
fn mode(grid: &SourceGrid, x: f64, y: f64, footprint: (f64, f64)) -> Option<f64> {
    let cells = window_cells(grid, x, y, footprint);
    let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
    for (v, _) in cells {
        counts.entry(v.to_bits()).or_insert((v, 0)).1 += 1;
    }
    counts
        .into_values()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.total_cmp(&a.0)))
        .map(|(v, _)| v)
}
