//! Join measurements with demographics and select the control group

use crate::ml::predicate::Predicate;
use crate::structs::{CombinedTable, DemographicTable, OutlierError, Result, Table};
use std::collections::HashMap;

/// Join `table` with `demographics` on subject identifier
///
/// Rows follow the demographic table's order. Measurement columns that share
/// a name with a demographic column are dropped; the demographic value wins.
///
/// # Errors
/// Returns `NotFound` if a demographic subject has no measurement row
pub fn combine(table: &Table, demographics: &DemographicTable) -> Result<CombinedTable> {
    let positions: HashMap<&str, usize> = table
        .ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let rows = demographics
        .ids
        .iter()
        .map(|id| {
            positions.get(id.as_str()).copied().ok_or_else(|| {
                OutlierError::NotFound(format!("subject '{id}' has no row in the measurement table"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let (shadowed, kept): (Vec<String>, Vec<String>) = table
        .columns
        .iter()
        .cloned()
        .partition(|c| demographics.column_index(c).is_some());
    for column in &shadowed {
        tracing::debug!("Measurement column '{column}' replaced by demographic column");
    }

    let measures = table.select_columns(&kept)?.select_rows(&rows);
    tracing::info!(
        "Combined {} subjects with {} regions and {} demographic columns",
        measures.n_rows(),
        measures.n_cols(),
        demographics.columns.len()
    );

    Ok(CombinedTable {
        measures,
        demographics: demographics.clone(),
    })
}

/// Keep the rows whose demographics satisfy `predicate`
///
/// # Errors
/// Returns `Config` if the predicate does not parse, names an unknown column,
/// or compares incompatible values
pub fn filter_controls(combined: &CombinedTable, predicate: &str) -> Result<CombinedTable> {
    let predicate = Predicate::parse(predicate, &combined.demographics.columns)?;

    let mut rows = Vec::new();
    for (i, row) in combined.demographics.rows.iter().enumerate() {
        if predicate.matches(row)? {
            rows.push(i);
        }
    }

    tracing::info!(
        "Control filter '{}' kept {} of {} subjects",
        predicate.source(),
        rows.len(),
        combined.n_rows()
    );
    Ok(combined.select_rows(&rows))
}
