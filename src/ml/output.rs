//! Writers for result tables and reports
//!
//! Everything goes to a caller-supplied `io::Write`; the CLI hands in stdout.

use crate::ml::pipeline::CorrectionReport;
use crate::ml::regression::FittedModel;
use crate::structs::{
    CombinedTable, MultivariateResult, RegionSummary, Result, SubjectSummary, Table,
};
use std::fmt::Write as _;
use std::io::Write;

/// Write a measurement, corrected, residual or z-score table as CSV
///
/// # Errors
/// Returns error if the writer fails
pub fn write_table<W: Write>(writer: W, table: &Table) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(std::iter::once(&table.id_column).chain(&table.columns))?;
    for (id, row) in table.ids.iter().zip(table.values.rows()) {
        let mut record = vec![id.clone()];
        record.extend(row.iter().map(ToString::to_string));
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write measurements followed by their demographic columns
///
/// # Errors
/// Returns error if the writer fails
pub fn write_combined<W: Write>(writer: W, combined: &CombinedTable) -> Result<()> {
    let measures = &combined.measures;
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(
        std::iter::once(&measures.id_column)
            .chain(&measures.columns)
            .chain(&combined.demographics.columns),
    )?;
    for ((id, row), cells) in measures
        .ids
        .iter()
        .zip(measures.values.rows())
        .zip(&combined.demographics.rows)
    {
        let mut record = vec![id.clone()];
        record.extend(row.iter().map(ToString::to_string));
        record.extend(cells.iter().map(ToString::to_string));
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write per-subject outlier counts, regions joined with `;`
///
/// # Errors
/// Returns error if the writer fails
pub fn write_subject_summary<W: Write>(writer: W, summary: &[SubjectSummary]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["subject_id", "outlier_count", "outlier_regions"])?;
    for row in summary {
        csv.write_record([
            row.subject_id.clone(),
            row.outlier_count.to_string(),
            row.outlier_regions.join(";"),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Write per-region outlier counts, subjects joined with `;`
///
/// # Errors
/// Returns error if the writer fails
pub fn write_region_summary<W: Write>(writer: W, summary: &[RegionSummary]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["region", "outlier_count", "outlier_subjects"])?;
    for row in summary {
        csv.write_record([
            row.region.clone(),
            row.outlier_count.to_string(),
            row.outlier_subjects.join(";"),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Write one row per subject: score to 3 decimals and `X` for outliers
///
/// # Errors
/// Returns error if the writer fails
pub fn write_multivariate<W: Write>(
    writer: W,
    id_column: &str,
    result: &MultivariateResult,
) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record([id_column, result.method.display_name(), "outlier"])?;
    for ((id, score), &outlier) in result
        .ids
        .iter()
        .zip(result.display_scores())
        .zip(&result.outliers)
    {
        csv.write_record([
            id.clone(),
            format!("{score:.3}"),
            if outlier { "X".to_string() } else { String::new() },
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Write fitted models as a pretty JSON array
///
/// # Errors
/// Returns error if serialization or the writer fails
pub fn write_models_json<W: Write>(mut writer: W, models: &[FittedModel]) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, models)?;
    writeln!(writer)?;
    Ok(())
}

/// Build a human readable overview of a corrected run
#[must_use]
pub fn build_summary(report: &CorrectionReport) -> String {
    let outcome = &report.outcome;
    let mut s = String::new();

    let _ = writeln!(s, "=== Covariate Correction ===");
    let _ = writeln!(
        s,
        "Subjects: {} ({} controls)",
        report.combined.n_rows(),
        report.controls.n_rows()
    );
    let _ = writeln!(s, "Corrected regions: {}", outcome.models.len());
    if !outcome.skipped.is_empty() {
        let _ = writeln!(
            s,
            "Skipped (all-zero controls): {}",
            outcome.skipped.join(", ")
        );
    }
    if !outcome.failures.is_empty() {
        let _ = writeln!(s, "Failed fits:");
        for failure in &outcome.failures {
            let _ = writeln!(s, "  {failure}");
        }
    }

    let _ = writeln!(s);
    let _ = writeln!(s, "=== Outliers by Region ===");
    let mut flagged: Vec<_> = report
        .by_region
        .iter()
        .filter(|r| r.outlier_count > 0)
        .collect();
    flagged.sort_by(|a, b| b.outlier_count.cmp(&a.outlier_count));
    if flagged.is_empty() {
        let _ = writeln!(s, "None");
    }
    for region in flagged {
        let _ = writeln!(
            s,
            "{}: {} ({})",
            region.region,
            region.outlier_count,
            region.outlier_subjects.join(", ")
        );
    }

    for model in &outcome.models {
        let _ = writeln!(s);
        s.push_str(&model.summary());
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{Cell, DecisionRule, DemographicTable, Method};
    use ndarray::array;

    fn table() -> Table {
        Table::new(
            "subject",
            vec!["s1".into(), "s2".into()],
            vec!["amygdala".into(), "insula".into()],
            array![[1.5, -0.25], [0.0, 3.0]],
        )
        .expect("table")
    }

    fn as_string(buf: Vec<u8>) -> String {
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn test_write_table() {
        let mut buf = Vec::new();
        write_table(&mut buf, &table()).expect("write");
        assert_eq!(
            as_string(buf),
            "subject,amygdala,insula\ns1,1.5,-0.25\ns2,0,3\n"
        );
    }

    #[test]
    fn test_write_combined() {
        let combined = CombinedTable {
            measures: table(),
            demographics: DemographicTable::new(
                "subject",
                vec!["s1".into(), "s2".into()],
                vec!["age".into(), "sex".into()],
                vec![
                    vec![Cell::Number(41.0), Cell::Text("F".into())],
                    vec![Cell::Number(37.5), Cell::Missing],
                ],
            )
            .expect("demographics"),
        };

        let mut buf = Vec::new();
        write_combined(&mut buf, &combined).expect("write");
        let content = as_string(buf);
        assert!(content.starts_with("subject,amygdala,insula,age,sex\n"));
        assert!(content.contains("s1,1.5,-0.25,41,F\n"));
        assert!(content.contains("s2,0,3,37.5,\n"));
    }

    #[test]
    fn test_write_summaries() {
        let subjects = vec![SubjectSummary {
            subject_id: "s1".into(),
            outlier_count: 2,
            outlier_regions: vec!["amygdala".into(), "insula".into()],
        }];
        let mut buf = Vec::new();
        write_subject_summary(&mut buf, &subjects).expect("write");
        assert_eq!(
            as_string(buf),
            "subject_id,outlier_count,outlier_regions\ns1,2,amygdala;insula\n"
        );

        let regions = vec![RegionSummary {
            region: "insula".into(),
            outlier_count: 0,
            outlier_subjects: Vec::new(),
        }];
        let mut buf = Vec::new();
        write_region_summary(&mut buf, &regions).expect("write");
        assert_eq!(
            as_string(buf),
            "region,outlier_count,outlier_subjects\ninsula,0,\n"
        );
    }

    #[test]
    fn test_write_multivariate() {
        let result = MultivariateResult {
            method: Method::Mahalanobis,
            rule: DecisionRule::Percentile,
            features: vec!["amygdala".into()],
            ids: vec!["s1".into(), "s2".into()],
            scores: vec![0.123_456, 2.0],
            low_threshold: 0.0,
            high_threshold: 1.0,
            outliers: vec![false, true],
        };

        let mut buf = Vec::new();
        write_multivariate(&mut buf, "subject", &result).expect("write");
        assert_eq!(
            as_string(buf),
            "subject,mahalanobis,outlier\ns1,0.123,\ns2,2.000,X\n"
        );
    }
}
