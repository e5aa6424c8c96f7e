//! Descriptive statistics shared by the scorers

use crate::structs::{OutlierError, Result};

/// Arithmetic mean and population standard deviation (ddof = 0)
///
/// A column of identical values has standard deviation exactly 0, as does
/// one whose variance overflows.
///
/// # Errors
/// Returns error if values is empty
#[allow(clippy::cast_precision_loss)]
pub fn mean_std(values: &[f64]) -> Result<(f64, f64)> {
    let Some(&first) = values.first() else {
        return Err(OutlierError::Table(
            "Cannot calculate statistics for empty data".into(),
        ));
    };
    // the summed mean of a repeated 0.1 is not exactly 0.1
    if values.iter().all(|&v| v == first) {
        return Ok((first, 0.0));
    }

    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count;
    if !variance.is_finite() || variance <= 0.0 {
        return Ok((mean, 0.0));
    }

    Ok((mean, variance.sqrt()))
}

/// Round to a fixed number of decimal places
#[must_use]
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Score at percentile `p` (0-100) with linear interpolation between
/// closest ranks
///
/// # Errors
/// Returns error if values is empty or `p` is outside [0, 100]
pub fn score_at_percentile(values: &[f64], p: f64) -> Result<f64> {
    if values.is_empty() {
        return Err(OutlierError::Table(
            "Cannot take a percentile of empty data".into(),
        ));
    }
    if !(0.0..=100.0).contains(&p) {
        return Err(OutlierError::Config(format!(
            "Percentile {p} is outside [0, 100]"
        )));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Ok(percentile(&sorted, p))
}

/// Calculate percentile of already sorted data using linear interpolation
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let k = (p / 100.0) * (sorted.len() - 1) as f64;
    let f = k.floor() as usize;
    let c = k.ceil() as usize;

    if f == c {
        sorted[f]
    } else {
        let d0 = sorted[f] * (c as f64 - k);
        let d1 = sorted[c] * (k - f as f64);
        d0 + d1
    }
}
