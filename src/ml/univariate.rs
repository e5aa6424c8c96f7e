//! Per-region z-scores and inlier classification

use crate::ml::stats::{mean_std, round_to};
use crate::structs::{OutlierError, Result, Table, ZScoreResult};
use ndarray::Array2;

/// Default acceptable deviation, in standard deviations
pub const DEFAULT_NUM_STD: f64 = 2.0;

/// Standardize one region and classify each subject
///
/// `zscore = round((y - mean) / std, 4)`, or 0 for a constant column.
/// A subject is an inlier iff `|zscore| <= num_std`.
///
/// # Errors
/// Returns `NotFound` for an unknown region, `Config` for a negative or
/// non-finite `num_std`
pub fn score(table: &Table, region: &str, num_std: f64) -> Result<ZScoreResult> {
    check_num_std(num_std)?;
    let values: Vec<f64> = table.column(region)?.to_vec();
    let (mean, std) = mean_std(&values)?;

    let zscores: Vec<f64> = values
        .iter()
        .map(|&y| {
            if std == 0.0 {
                0.0
            } else {
                round_to((y - mean) / std, 4)
            }
        })
        .collect();
    let inliers = zscores.iter().map(|z| z.abs() <= num_std).collect();

    Ok(ZScoreResult {
        region: region.to_string(),
        mean,
        std,
        num_std,
        values,
        zscores,
        inliers,
    })
}

/// Score every region of the table, in column order
///
/// # Errors
/// Returns error if the table is empty or `num_std` is invalid
pub fn score_all(table: &Table, num_std: f64) -> Result<Vec<ZScoreResult>> {
    table
        .columns
        .iter()
        .map(|region| score(table, region, num_std))
        .collect()
}

/// Z-score table: same ids and columns as the input, z-scores as values
///
/// # Errors
/// Returns error if the table is empty or `num_std` is invalid
pub fn zscore_table(table: &Table, num_std: f64) -> Result<Table> {
    let results = score_all(table, num_std)?;
    let mut values = Array2::zeros((table.n_rows(), table.n_cols()));
    for (j, result) in results.iter().enumerate() {
        for (i, &z) in result.zscores.iter().enumerate() {
            values[[i, j]] = z;
        }
    }

    Table::new(
        table.id_column.clone(),
        table.ids.clone(),
        table.columns.clone(),
        values,
    )
}

fn check_num_std(num_std: f64) -> Result<()> {
    if num_std.is_finite() && num_std >= 0.0 {
        Ok(())
    } else {
        Err(OutlierError::Config(format!(
            "Acceptable deviation must be a non-negative number, got {num_std}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn single_region(values: &[f64]) -> Table {
        let ids = (1..=values.len()).map(|i| format!("sub{i:02}")).collect();
        let data = Array2::from_shape_vec((values.len(), 1), values.to_vec()).expect("shape");
        Table::new("subject", ids, vec!["volume".into()], data).expect("table")
    }

    #[test]
    fn test_single_extreme_value_is_sole_outlier() {
        let table = single_region(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 100.0]);
        let result = score(&table, "volume", 2.0).expect("score");

        assert!((result.mean - 14.5).abs() < 1e-12);
        assert!((result.std - 818.25f64.sqrt()).abs() < 1e-9);
        assert!((result.zscores[9] - 2.989).abs() < 1e-3);
        assert_eq!(result.outlier_indices(), vec![9]);
    }

    #[test]
    fn test_constant_region_never_flagged() {
        let table = single_region(&[3.0, 3.0, 3.0, 3.0]);
        for num_std in [0.0, 0.5, 2.0] {
            let result = score(&table, "volume", num_std).expect("score");
            assert!(result.zscores.iter().all(|&z| z == 0.0));
            assert_eq!(result.outlier_count(), 0);
        }
    }

    #[test]
    fn test_constant_inexact_region_never_flagged() {
        let table = single_region(&[0.1, 0.1, 0.1]);
        let result = score(&table, "volume", 0.5).expect("score");

        assert_eq!(result.std, 0.0);
        assert!(result.zscores.iter().all(|&z| z == 0.0));
        assert_eq!(result.outlier_count(), 0);
    }

    #[test]
    fn test_all_zero_region_has_zero_scores() {
        let table = single_region(&[0.0, 0.0, 0.0]);
        let result = score(&table, "volume", 2.0).expect("score");
        assert!(result.zscores.iter().all(|&z| z == 0.0));
        assert!(result.inliers.iter().all(|&i| i));
    }

    #[test]
    fn test_smaller_threshold_never_reduces_outliers() {
        let table = single_region(&[1.0, 5.0, 2.0, 9.0, 3.0, 4.0, 12.0, 0.5, 7.0, 30.0]);
        let mut previous = 0;
        for num_std in [4.0, 3.0, 2.0, 1.5, 1.0, 0.5, 0.0] {
            let count = score(&table, "volume", num_std)
                .expect("score")
                .outlier_count();
            assert!(count >= previous);
            previous = count;
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // mean 0, std 1: zscores are exactly -1 and 1
        let table = single_region(&[-1.0, 1.0]);
        let result = score(&table, "volume", 1.0).expect("score");
        assert_eq!(result.outlier_count(), 0);
    }

    #[test]
    fn test_unknown_region() {
        let table = single_region(&[1.0, 2.0]);
        assert!(matches!(
            score(&table, "thalamus", 2.0),
            Err(OutlierError::NotFound(_))
        ));
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let table = single_region(&[1.0, 2.0]);
        assert!(matches!(
            score(&table, "volume", -1.0),
            Err(OutlierError::Config(_))
        ));
    }

    #[test]
    fn test_zscore_table_keeps_layout() {
        let table = Table::new(
            "subject",
            vec!["a".into(), "b".into()],
            vec!["x".into(), "y".into()],
            ndarray::array![[1.0, 5.0], [3.0, 5.0]],
        )
        .expect("table");

        let z = zscore_table(&table, 2.0).expect("zscores");
        assert_eq!(z.ids, table.ids);
        assert_eq!(z.columns, table.columns);
        assert!((z.values[[0, 0]] + 1.0).abs() < 1e-12);
        assert!((z.values[[1, 0]] - 1.0).abs() < 1e-12);
        assert!(z.values[[0, 1]].abs() < 1e-12);
    }
}
