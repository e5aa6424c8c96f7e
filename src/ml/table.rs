use crate::csv_reader::CsvData;
use crate::structs::{Cell, DemographicTable, OutlierError, Result, Table};
use ndarray::Array2;

impl Table {
    /// Build a measurement table from parsed CSV data
    ///
    /// The first column holds subject ids, every other column must be numeric.
    ///
    /// # Errors
    /// Returns error on missing, non-numeric or non-finite measurements, or
    /// duplicate ids
    pub fn from_csv(csv: &CsvData) -> Result<Self> {
        let (id_column, columns) = split_headers(csv)?;
        let n_cols = columns.len();

        let mut ids = Vec::with_capacity(csv.row_count());
        let mut flat = Vec::with_capacity(csv.row_count() * n_cols);

        for (row_idx, row) in csv.rows.iter().enumerate() {
            let id = row.first().cloned().unwrap_or_default();
            if id.is_empty() {
                return Err(OutlierError::Table(format!(
                    "Row {} has an empty subject id",
                    row_idx + 1
                )));
            }

            for (col_idx, name) in columns.iter().enumerate() {
                let raw = row.get(col_idx + 1).map_or("", String::as_str);
                let value = raw.parse::<f64>().map_err(|_| {
                    OutlierError::Table(format!(
                        "Non-numeric value '{raw}' for subject '{id}' in column '{name}'"
                    ))
                })?;
                if !value.is_finite() {
                    return Err(OutlierError::Table(format!(
                        "Non-finite value '{raw}' for subject '{id}' in column '{name}'"
                    )));
                }
                flat.push(value);
            }
            ids.push(id);
        }

        let values = Array2::from_shape_vec((ids.len(), n_cols), flat)
            .map_err(|e| OutlierError::Table(format!("Failed to create array: {e}")))?;

        Self::new(id_column, ids, columns, values)
    }
}

impl DemographicTable {
    /// Build a demographic table from parsed CSV data
    ///
    /// The first column holds subject ids; header names must not contain
    /// spaces or dashes so that control predicates can reference them.
    ///
    /// # Errors
    /// Returns error on invalid header names or duplicate ids
    pub fn from_csv(csv: &CsvData) -> Result<Self> {
        let (id_column, columns) = split_headers(csv)?;

        if let Some(bad) = columns
            .iter()
            .find(|c| c.is_empty() || c.contains(' ') || c.contains('-'))
        {
            return Err(OutlierError::Config(format!(
                "Demographic header '{bad}' must be non-empty and contain no spaces or dashes"
            )));
        }

        let mut ids = Vec::with_capacity(csv.row_count());
        let mut rows = Vec::with_capacity(csv.row_count());

        for row in &csv.rows {
            ids.push(row.first().cloned().unwrap_or_default());
            rows.push(
                (1..=columns.len())
                    .map(|j| row.get(j).map_or(Cell::Missing, |raw| Cell::parse(raw)))
                    .collect(),
            );
        }

        Self::new(id_column, ids, columns, rows)
    }
}

fn split_headers(csv: &CsvData) -> Result<(String, Vec<String>)> {
    let (id_column, rest) = csv
        .headers
        .split_first()
        .ok_or_else(|| OutlierError::Table("Input has no columns".into()))?;
    Ok((id_column.clone(), rest.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_reader::Delimiter;

    fn parse(content: &str) -> CsvData {
        CsvData::from_reader(content.as_bytes(), Delimiter::Comma).expect("parse csv")
    }

    #[test]
    fn test_table_from_csv() {
        let csv = parse("subject,lh_thickness,rh_thickness\ns1,2.5,2.6\ns2,2.4,2.7");
        let table = Table::from_csv(&csv).expect("table");

        assert_eq!(table.id_column, "subject");
        assert_eq!(table.ids, vec!["s1", "s2"]);
        assert_eq!(table.columns, vec!["lh_thickness", "rh_thickness"]);
        assert!((table.values[[1, 1]] - 2.7).abs() < 1e-12);
    }

    #[test]
    fn test_table_rejects_text_measurement() {
        let csv = parse("subject,x\ns1,abc");
        assert!(matches!(Table::from_csv(&csv), Err(OutlierError::Table(_))));
    }

    #[test]
    fn test_table_rejects_non_finite_measurement() {
        for value in ["nan", "NaN", "inf", "-inf", "infinity"] {
            let csv = parse(&format!("subject,x\ns1,1.5\ns2,{value}"));
            assert!(matches!(Table::from_csv(&csv), Err(OutlierError::Table(_))));
        }
    }

    #[test]
    fn test_table_rejects_duplicate_subject() {
        let csv = parse("subject,x\ns1,1\ns1,2");
        assert!(Table::from_csv(&csv).is_err());
    }

    #[test]
    fn test_demographics_from_csv() {
        let csv = parse("subject,age,race\ns1,44,hispanic\ns2,,white");
        let demo = DemographicTable::from_csv(&csv).expect("demographics");

        assert_eq!(demo.columns, vec!["age", "race"]);
        assert_eq!(demo.rows[0][0], Cell::Number(44.0));
        assert_eq!(demo.rows[1][0], Cell::Missing);
        assert_eq!(demo.rows[1][1], Cell::Text("white".into()));
    }

    #[test]
    fn test_demographics_reject_dashed_header() {
        let csv = parse("subject,check-in\ns1,3");
        assert!(matches!(
            DemographicTable::from_csv(&csv),
            Err(OutlierError::Config(_))
        ));
    }
}
