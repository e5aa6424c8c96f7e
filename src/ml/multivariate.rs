//! Composite per-subject anomaly scores across all regions
//!
//! Two measures are available: the Mahalanobis distance of each subject's
//! max-normalized region vector from the cohort mean, and the decision score
//! of an isolation forest fit on the raw region values. Either measure is
//! turned into an outlier flag by percentile bounds; Mahalanobis can instead
//! use chi-squared quantiles of the squared distance.

use crate::ml::isolation_forest::{IsolationForest, IsolationForestParams};
use crate::ml::linalg::{column_means, covariance, quadratic_form, spd_inverse};
use crate::ml::stats::score_at_percentile;
use crate::structs::{DecisionRule, Method, MultivariateResult, OutlierError, Result, Table};
use ndarray::{Array1, Array2, Axis};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Options for one multivariate analysis
#[derive(Debug, Clone)]
pub struct MultivariateOptions {
    pub method: Method,
    /// Lower percentile bound; the method default when `None`
    pub low_pct: Option<f64>,
    /// Upper percentile bound; the method default when `None`
    pub high_pct: Option<f64>,
    pub rule: DecisionRule,
    pub forest: IsolationForestParams,
}

impl MultivariateOptions {
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            method,
            low_pct: None,
            high_pct: None,
            rule: DecisionRule::Percentile,
            forest: IsolationForestParams::default(),
        }
    }

    /// Effective bounds after applying method defaults
    ///
    /// # Errors
    /// Returns `Config` if a bound is outside [0, 100] or low exceeds high
    pub fn bounds(&self) -> Result<(f64, f64)> {
        let (default_low, default_high) = self.method.default_bounds();
        let low = self.low_pct.unwrap_or(default_low);
        let high = self.high_pct.unwrap_or(default_high);

        for p in [low, high] {
            if !(0.0..=100.0).contains(&p) {
                return Err(OutlierError::Config(format!(
                    "Percentile bound {p} is outside [0, 100]"
                )));
            }
        }
        if low > high {
            return Err(OutlierError::Config(format!(
                "Lower bound {low} exceeds upper bound {high}"
            )));
        }
        Ok((low, high))
    }
}

/// Score every subject with default isolation forest parameters
///
/// # Errors
/// See [`score_with`]
pub fn score_multivariate(
    table: &Table,
    method: Method,
    low_pct: Option<f64>,
    high_pct: Option<f64>,
) -> Result<MultivariateResult> {
    let options = MultivariateOptions {
        low_pct,
        high_pct,
        ..MultivariateOptions::new(method)
    };
    score_with(table, &options)
}

/// Score every subject and classify by the configured decision rule
///
/// # Errors
/// Returns `Config` for invalid bounds, an unusable rule, or no usable
/// features; `SingularMatrix` when the Mahalanobis covariance cannot be
/// inverted
pub fn score_with(table: &Table, options: &MultivariateOptions) -> Result<MultivariateResult> {
    let (low, high) = options.bounds()?;
    let (features, x) = feature_matrix(table)?;

    let scores = match options.method {
        Method::Mahalanobis => mahalanobis_distances(&x)?,
        Method::IsolationForest => {
            let forest = IsolationForest::fit(x.view(), &options.forest)?;
            forest.decision_function(x.view())?
        }
    }
    .to_vec();

    let (low_threshold, high_threshold) = match (options.rule, options.method) {
        (DecisionRule::Percentile, _) => (
            score_at_percentile(&scores, low)?,
            score_at_percentile(&scores, high)?,
        ),
        (DecisionRule::ChiSquared, Method::Mahalanobis) => {
            chi_squared_bounds(features.len(), low, high)?
        }
        (DecisionRule::ChiSquared, Method::IsolationForest) => {
            return Err(OutlierError::Config(
                "The chi-squared rule applies to Mahalanobis distances only".into(),
            ))
        }
    };

    let outliers = classify(&scores, low_threshold, high_threshold);
    tracing::info!(
        "{}: {} of {} subjects outside [{low_threshold:.3}, {high_threshold:.3}]",
        options.method.display_name(),
        outliers.iter().filter(|&&o| o).count(),
        scores.len()
    );

    Ok(MultivariateResult {
        method: options.method,
        rule: options.rule,
        features,
        ids: table.ids.clone(),
        scores,
        low_threshold,
        high_threshold,
        outliers,
    })
}

/// Region columns with a nonzero mean, and their values
///
/// # Errors
/// Returns `Config` if the table has no subjects or every column is dropped
pub fn feature_matrix(table: &Table) -> Result<(Vec<String>, Array2<f64>)> {
    if table.n_rows() == 0 {
        return Err(OutlierError::Config(
            "Multivariate scoring needs at least one subject".into(),
        ));
    }

    let mut keep = Vec::new();
    for (j, (name, column)) in table.columns.iter().zip(table.values.columns()).enumerate() {
        if column.mean() == Some(0.0) {
            tracing::debug!("Dropping zero-mean region '{name}' from the feature matrix");
        } else {
            keep.push(j);
        }
    }
    if keep.is_empty() {
        return Err(OutlierError::Config("No region with a nonzero mean to score".into()));
    }

    let names = keep.iter().map(|&j| table.columns[j].clone()).collect();
    Ok((names, table.values.select(Axis(1), &keep)))
}

/// Mahalanobis distance of each row from the column means, after dividing
/// each column by its maximum
///
/// # Errors
/// Returns `SingularMatrix` if the covariance cannot be estimated or inverted
pub fn mahalanobis_distances(x: &Array2<f64>) -> Result<Array1<f64>> {
    let mut normalized = x.clone();
    for mut column in normalized.columns_mut() {
        let max = column.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        if max != 0.0 && max.is_finite() {
            column.mapv_inplace(|v| v / max);
        }
    }

    let cov = covariance(normalized.view()).ok_or_else(|| {
        OutlierError::SingularMatrix("covariance needs at least two subjects".into())
    })?;
    let inv = spd_inverse(cov.view()).ok_or_else(|| {
        OutlierError::SingularMatrix(format!(
            "{0}x{0} feature covariance is not invertible",
            cov.nrows()
        ))
    })?;

    let means = column_means(normalized.view());
    Ok(normalized
        .rows()
        .into_iter()
        .map(|row| {
            let delta = &row - &means;
            quadratic_form(inv.view(), delta.view()).max(0.0).sqrt()
        })
        .collect())
}

/// Distance thresholds from chi-squared(k) quantiles of the squared distance
#[allow(clippy::cast_precision_loss)]
fn chi_squared_bounds(k: usize, low_pct: f64, high_pct: f64) -> Result<(f64, f64)> {
    let chi2 = ChiSquared::new(k as f64)
        .map_err(|e| OutlierError::Config(format!("chi-squared with {k} degrees: {e}")))?;
    Ok((
        chi2.inverse_cdf(low_pct / 100.0).sqrt(),
        chi2.inverse_cdf(high_pct / 100.0).sqrt(),
    ))
}

/// Outlier flags: a subject is an inlier iff `low <= measure <= high`
#[must_use]
pub fn classify(measures: &[f64], low: f64, high: f64) -> Vec<bool> {
    measures.iter().map(|m| !(low..=high).contains(m)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, s};

    fn cohort() -> Table {
        let n = 12;
        let mut values = Array2::zeros((n, 3));
        for i in 0..n {
            let t = i as f64;
            values[[i, 0]] = 100.0 + 5.0 * (t * 0.9).sin();
            values[[i, 1]] = 50.0 + 3.0 * (t * 1.7).cos() + 0.1 * t;
            values[[i, 2]] = 0.0;
        }
        values[[11, 0]] = 160.0;
        values[[11, 1]] = 20.0;

        Table::new(
            "subject",
            (1..=n).map(|i| format!("s{i}")).collect(),
            vec!["thalamus".into(), "caudate".into(), "lesion".into()],
            values,
        )
        .expect("table")
    }

    #[test]
    fn test_zero_mean_column_dropped() {
        let table = cohort();
        let (features, x) = feature_matrix(&table).expect("features");
        assert_eq!(features, vec!["thalamus", "caudate"]);

        let manual = table.values.slice(s![.., 0..2]).to_owned();
        let with_drop = mahalanobis_distances(&x).expect("distances");
        let without = mahalanobis_distances(&manual).expect("distances");
        assert_eq!(with_drop, without);

        let result = score_multivariate(&table, Method::Mahalanobis, None, None).expect("score");
        assert_eq!(result.scores, with_drop.to_vec());
    }

    #[test]
    fn test_mahalanobis_flags_extreme_subject() {
        let result = score_multivariate(&cohort(), Method::Mahalanobis, None, None).expect("score");

        let max = result
            .scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(max, Some(11));
        assert!(result.outliers[11]);
        // the lowest bound is the minimum, so nobody falls below it
        let min = result.scores.iter().copied().fold(f64::INFINITY, f64::min);
        assert!((result.low_threshold - min).abs() < 1e-12);
        // 80th percentile of 12 values leaves the top 3 outside
        assert_eq!(result.outliers.iter().filter(|&&o| o).count(), 3);
    }

    #[test]
    fn test_boundary_is_inlier() {
        let flags = classify(&[1.0, 2.0, 3.0, 3.0001], 1.0, 3.0);
        assert_eq!(flags, vec![false, false, false, true]);
    }

    #[test]
    fn test_singular_covariance() {
        let table = Table::new(
            "subject",
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            vec!["left".into(), "double".into()],
            array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [5.0, 10.0]],
        )
        .expect("table");

        assert!(matches!(
            score_multivariate(&table, Method::Mahalanobis, None, None),
            Err(OutlierError::SingularMatrix(_))
        ));
    }

    #[test]
    fn test_isolation_forest_is_reproducible() {
        let table = cohort();
        let first = score_multivariate(&table, Method::IsolationForest, None, None).expect("first");
        let second = score_multivariate(&table, Method::IsolationForest, None, None).expect("second");

        assert_eq!(first.scores, second.scores);
        assert_eq!(first.outliers, second.outliers);
        assert_eq!(first.features, vec!["thalamus", "caudate"]);
        assert!(first.outliers[11]);
    }

    #[test]
    fn test_chi_squared_rule() {
        let options = MultivariateOptions {
            low_pct: Some(0.0),
            high_pct: Some(97.5),
            rule: DecisionRule::ChiSquared,
            ..MultivariateOptions::new(Method::Mahalanobis)
        };
        let result = score_with(&cohort(), &options).expect("score");

        // chi2.ppf(0.975, 2) = 7.3778
        assert!((result.high_threshold.powi(2) - 7.3778).abs() < 1e-3);
        assert_eq!(result.low_threshold, 0.0);

        let forest = MultivariateOptions {
            rule: DecisionRule::ChiSquared,
            ..MultivariateOptions::new(Method::IsolationForest)
        };
        assert!(matches!(score_with(&cohort(), &forest), Err(OutlierError::Config(_))));
    }

    #[test]
    fn test_invalid_bounds() {
        let table = cohort();
        assert!(score_multivariate(&table, Method::Mahalanobis, Some(90.0), Some(10.0)).is_err());
        assert!(score_multivariate(&table, Method::Mahalanobis, None, Some(101.0)).is_err());
    }

    #[test]
    fn test_all_zero_table_rejected() {
        let table = Table::new(
            "subject",
            vec!["a".into(), "b".into()],
            vec!["x".into()],
            Array2::zeros((2, 1)),
        )
        .expect("table");
        assert!(matches!(
            score_multivariate(&table, Method::Mahalanobis, None, None),
            Err(OutlierError::Config(_))
        ));
    }
}
