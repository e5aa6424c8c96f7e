use ndarray::Array2;
use proptest::prelude::*;
use regional_outliers::ml::demographics::{combine, filter_controls};
use regional_outliers::ml::regression::fit_and_correct;
use regional_outliers::ml::summary::group_by_region;
use regional_outliers::ml::univariate::{score, zscore_table};
use regional_outliers::structs::{Cell, DemographicTable, Table};

fn ids(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("sub-{i:03}")).collect()
}

fn single_region(values: &[f64]) -> Table {
    let data = Array2::from_shape_vec((values.len(), 1), values.to_vec()).expect("shape");
    Table::new("subject", ids(values.len()), vec!["volume".into()], data).expect("table")
}

/// Two regions per subject plus age and group demographics
fn cohort(ages: &[f64], volumes: &[f64], noise: &[f64]) -> (Table, DemographicTable) {
    let n = ages.len();
    let mut values = Array2::zeros((n, 2));
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        values[[i, 0]] = volumes[i];
        values[[i, 1]] = 4000.0 - 10.0 * ages[i] + noise[i];
        let group = if i % 3 == 0 { "patient" } else { "control" };
        rows.push(vec![Cell::Number(ages[i]), Cell::Text(group.into())]);
    }

    let table = Table::new(
        "subject",
        ids(n),
        vec!["hippocampus".into(), "thalamus".into()],
        values,
    )
    .expect("table");
    let demographics = DemographicTable::new(
        "subject",
        ids(n),
        vec!["age".into(), "group".into()],
        rows,
    )
    .expect("demographics");
    (table, demographics)
}

fn cohort_inputs() -> impl Strategy<Value = (Vec<f64>, Vec<f64>, Vec<f64>)> {
    (6usize..30).prop_flat_map(|n| {
        (
            prop::collection::vec(18.0f64..90.0, n),
            prop::collection::vec(500.0f64..5000.0, n),
            prop::collection::vec(-50.0f64..50.0, n),
        )
    })
}

proptest! {
    #[test]
    fn constant_region_scores_zero(
        value in -1.0e9f64..1.0e9,
        n in 1usize..40,
        num_std in 0.0f64..10.0,
    ) {
        let result = score(&single_region(&vec![value; n]), "volume", num_std).expect("score");

        prop_assert_eq!(result.std, 0.0);
        prop_assert!(result.zscores.iter().all(|&z| z == 0.0));
        prop_assert!(result.inliers.iter().all(|&inlier| inlier));
    }

    #[test]
    fn constant_region_never_summarized(value in -1.0e3f64..1.0e3, n in 1usize..40) {
        let zscores = zscore_table(&single_region(&vec![value; n]), 2.0).expect("zscores");
        let by_region = group_by_region(&zscores, 0.0);
        prop_assert_eq!(by_region[0].outlier_count, 0);
    }

    #[test]
    fn lower_threshold_flags_a_superset(
        values in prop::collection::vec(-1.0e4f64..1.0e4, 2..60),
        a in 0.0f64..5.0,
        b in 0.0f64..5.0,
    ) {
        let table = single_region(&values);
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let strict = score(&table, "volume", low).expect("score");
        let loose = score(&table, "volume", high).expect("score");

        prop_assert!(strict.outlier_count() >= loose.outlier_count());
        for (s, l) in strict.inliers.iter().zip(&loose.inliers) {
            prop_assert!(!s || *l);
        }
    }

    #[test]
    fn residual_is_squared_prediction_error((ages, volumes, noise) in cohort_inputs()) {
        let (table, demographics) = cohort(&ages, &volumes, &noise);
        let combined = combine(&table, &demographics).expect("combine");
        let controls = filter_controls(&combined, "group == 'control'").expect("filter");
        let outcome = fit_and_correct(&combined, &controls, &["age".to_string()], None)
            .expect("correct");

        prop_assert_eq!(&outcome.corrected.columns, &outcome.residuals.columns);
        for region in &outcome.corrected.columns {
            let corrected = outcome.corrected.column(region).expect("corrected");
            let original = combined.measures.column(region).expect("original");
            let residual = outcome.residuals.column(region).expect("residual");
            for i in 0..combined.n_rows() {
                prop_assert_eq!(residual[i], (corrected[i] - original[i]).powi(2));
            }
        }
    }

    #[test]
    fn matching_every_subject_keeps_the_table(
        (ages, volumes, noise) in cohort_inputs(),
        cut in 0.0f64..100.0,
    ) {
        let (table, demographics) = cohort(&ages, &volumes, &noise);
        let combined = combine(&table, &demographics).expect("combine");

        let everyone = format!("age < {cut} or age >= {cut}");
        let controls = filter_controls(&combined, &everyone).expect("filter");
        prop_assert_eq!(controls, combined);
    }
}
