use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, ForecastResult};

/// Added to the norm product in [`cosine_similarity`] so zero vectors score 0.
pub const SIMILARITY_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormalizationMode {
    #[serde(rename = "raw_returns")]
    RawReturns,
    #[serde(rename = "zscore")]
    ZScore,
}

impl NormalizationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RawReturns => "raw_returns",
            Self::ZScore => "zscore",
        }
    }
}

impl fmt::Display for NormalizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the comparison vector for a run of closing prices.
///
/// Returns `prices.len() - 1` components (empty for fewer than two prices).
/// Steps with a non-positive or non-finite price contribute a `0` return.
/// A zero vector is returned unchanged; any other vector has unit length.
pub fn build_vector(prices: &[f64], mode: NormalizationMode) -> Vec<f64> {
    let mut out = Vec::with_capacity(prices.len().saturating_sub(1));
    build_vector_into(prices, mode, &mut out);
    out
}

/// Same as [`build_vector`], writing into a caller-owned buffer.
pub fn build_vector_into(prices: &[f64], mode: NormalizationMode, out: &mut Vec<f64>) {
    log_returns_into(prices, out);
    if mode == NormalizationMode::ZScore {
        standardize(out);
    }
    unit_scale(out);
}

/// Log-returns summed over consecutive `stride`-day blocks, then normalized
/// with `mode`. Used as the cheap stage-1 representation in two-stage retrieval.
pub fn build_coarse_vector_into(
    prices: &[f64],
    mode: NormalizationMode,
    stride: usize,
    out: &mut Vec<f64>,
) {
    let stride = stride.max(1);
    log_returns_into(prices, out);
    if stride > 1 {
        let blocks = out.len().div_ceil(stride);
        for b in 0..blocks {
            let from = b * stride;
            let to = (from + stride).min(out.len());
            let sum: f64 = out[from..to].iter().sum();
            out[b] = sum;
        }
        out.truncate(blocks);
    }
    if mode == NormalizationMode::ZScore {
        standardize(out);
    }
    unit_scale(out);
}

fn log_returns_into(prices: &[f64], out: &mut Vec<f64>) {
    out.clear();
    for pair in prices.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        let r = if prev.is_finite() && cur.is_finite() && prev > 0.0 && cur > 0.0 {
            (cur / prev).ln()
        } else {
            0.0
        };
        out.push(r);
    }
}

fn standardize(values: &mut [f64]) {
    let n = values.len();
    if n == 0 {
        return;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let std = if n > 1 {
        let ss = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>();
        (ss / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    let std = if std.is_finite() && std > 0.0 { std } else { 1.0 };
    for v in values.iter_mut() {
        *v = (*v - mean) / std;
    }
}

fn unit_scale(values: &mut [f64]) {
    let norm = l2_norm(values);
    if norm == 0.0 || !norm.is_finite() {
        if !values.is_empty() {
            tracing::trace!(len = values.len(), "zero-norm window vector left unscaled");
        }
        return;
    }
    for v in values.iter_mut() {
        *v /= norm;
    }
}

pub fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// `dot(a, b) / (|a| * |b| + eps)` over the common prefix of `a` and `b`.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let sim = dot / (l2_norm(a) * l2_norm(b) + SIMILARITY_EPSILON);
    sim.clamp(-1.0, 1.0)
}

/// A window's comparison vector tagged with the mode it was built in.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowVector {
    mode: NormalizationMode,
    values: Vec<f64>,
}

impl WindowVector {
    pub fn build(prices: &[f64], mode: NormalizationMode) -> Self {
        Self {
            mode,
            values: build_vector(prices, mode),
        }
    }

    pub fn mode(&self) -> NormalizationMode {
        self.mode
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    /// Cosine similarity; fails when the two vectors use different modes.
    pub fn similarity(&self, other: &WindowVector) -> ForecastResult<f64> {
        if self.mode != other.mode {
            return Err(ForecastError::InvalidNormalizationMixing {
                left: self.mode,
                right: other.mode,
            });
        }
        Ok(cosine_similarity(&self.values, &other.values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardize_floors_zero_std_to_one() {
        let mut v = vec![0.5, 0.5, 0.5];
        standardize(&mut v);
        assert!(v.iter().all(|x| x.abs() < 1e-15));
    }

    #[test]
    fn coarse_vector_sums_blocks() {
        let prices = [100.0, 110.0, 121.0, 133.1, 146.41];
        let mut out = Vec::new();
        log_returns_into(&prices, &mut out);
        let expected_first = out[0] + out[1];
        let expected_second = out[2] + out[3];
        build_coarse_vector_into(&prices, NormalizationMode::RawReturns, 2, &mut out);
        assert_eq!(out.len(), 2);
        let norm = (expected_first.powi(2) + expected_second.powi(2)).sqrt();
        assert!((out[0] - expected_first / norm).abs() < 1e-12);
        assert!((out[1] - expected_second / norm).abs() < 1e-12);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
