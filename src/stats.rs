//! Column statistics. Every function skips NaN and infinite values.

use serde::Serialize;

fn finite(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    values.into_iter().filter(|v| v.is_finite()).collect()
}

/// Median with the midpoint of the two central values for even counts.
pub fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut sorted = finite(values);
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let values = finite(values);
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn min(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    finite(values).into_iter().reduce(f64::min)
}

pub fn max(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    finite(values).into_iter().reduce(f64::max)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

/// Equal-width, left-closed bins over the finite range of `values`.
///
/// The last edge is pushed out by 0.1% of the range so the maximum lands in
/// the final bin. A constant column gets a small symmetric range around it.
pub fn equal_width_bins(values: impl IntoIterator<Item = f64>, bins: usize) -> Vec<Bin> {
    let values = finite(values);
    let (Some(lo), Some(hi)) = (min(values.iter().copied()), max(values.iter().copied())) else {
        return Vec::new();
    };
    if bins == 0 {
        return Vec::new();
    }

    let edges: Vec<f64> = if lo == hi {
        let adj = if lo == 0.0 { 0.001 } else { 0.001 * lo.abs() };
        linspace(lo - adj, hi + adj, bins + 1)
    } else {
        let mut edges = linspace(lo, hi, bins + 1);
        edges[bins] += (hi - lo) * 0.001;
        edges
    };

    let mut counts = vec![0usize; bins];
    for v in &values {
        // values past the last edge only happen through rounding; they belong to the last bin
        let idx = edges[1..].iter().position(|edge| v < edge).unwrap_or(bins - 1);
        counts[idx] += 1;
    }

    edges
        .windows(2)
        .zip(counts)
        .map(|(pair, count)| Bin { start: pair[0], end: pair[1], count })
        .collect()
}

fn linspace(start: f64, end: f64, points: usize) -> Vec<f64> {
    let step = (end - start) / (points - 1) as f64;
    (0..points)
        .map(|i| if i == points - 1 { end } else { start + step * i as f64 })
        .collect()
}
