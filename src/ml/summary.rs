//! Group z-score outliers by subject or by region

use crate::structs::{RegionSummary, SubjectSummary, Table};

/// For each subject, the regions whose `|zscore| > extent`
#[must_use]
pub fn group_by_subject(zscores: &Table, extent: f64) -> Vec<SubjectSummary> {
    zscores
        .ids
        .iter()
        .zip(zscores.values.rows())
        .map(|(id, row)| {
            let outlier_regions: Vec<String> = zscores
                .columns
                .iter()
                .zip(row.iter())
                .filter(|(_, z)| z.abs() > extent)
                .map(|(region, _)| region.clone())
                .collect();
            SubjectSummary {
                subject_id: id.clone(),
                outlier_count: outlier_regions.len(),
                outlier_regions,
            }
        })
        .collect()
}

/// For each region, the subjects whose `|zscore| > extent`
#[must_use]
pub fn group_by_region(zscores: &Table, extent: f64) -> Vec<RegionSummary> {
    zscores
        .columns
        .iter()
        .zip(zscores.values.columns())
        .map(|(region, column)| {
            let outlier_subjects: Vec<String> = zscores
                .ids
                .iter()
                .zip(column.iter())
                .filter(|(_, z)| z.abs() > extent)
                .map(|(id, _)| id.clone())
                .collect();
            RegionSummary {
                region: region.clone(),
                outlier_count: outlier_subjects.len(),
                outlier_subjects,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::univariate::zscore_table;
    use ndarray::array;

    fn zscores() -> Table {
        Table::new(
            "subject",
            vec!["s1".into(), "s2".into(), "s3".into()],
            vec!["amygdala".into(), "putamen".into(), "empty".into()],
            array![[2.5, -3.1, 0.0], [0.4, 2.0, 0.0], [-2.01, 0.3, 0.0]],
        )
        .expect("table")
    }

    #[test]
    fn test_group_by_subject() {
        let summary = group_by_subject(&zscores(), 2.0);

        assert_eq!(summary.len(), 3);
        assert_eq!(summary[0].outlier_count, 2);
        assert_eq!(summary[0].outlier_regions, vec!["amygdala", "putamen"]);
        // exactly at the extent is not an outlier
        assert_eq!(summary[1].outlier_count, 0);
        assert_eq!(summary[2].outlier_regions, vec!["amygdala"]);
    }

    #[test]
    fn test_group_by_region() {
        let summary = group_by_region(&zscores(), 2.0);

        assert_eq!(summary[0].region, "amygdala");
        assert_eq!(summary[0].outlier_subjects, vec!["s1", "s3"]);
        assert_eq!(summary[1].outlier_subjects, vec!["s1"]);
        assert_eq!(summary[2].outlier_count, 0);
    }

    #[test]
    fn test_all_zero_region_has_no_outliers() {
        let raw = Table::new(
            "subject",
            vec!["a".into(), "b".into(), "c".into()],
            vec!["zero".into()],
            array![[0.0], [0.0], [0.0]],
        )
        .expect("table");

        let z = zscore_table(&raw, 0.0).expect("zscores");
        for extent in [0.0, 1.0, 2.0] {
            assert_eq!(group_by_region(&z, extent)[0].outlier_count, 0);
        }
    }
}
