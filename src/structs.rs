//! Consolidated public types for the regional outlier crate
//!
//! Tables, demographic cells, and the result records produced by the
//! scoring, correction and aggregation stages.

use ndarray::{Array2, ArrayView1, Axis};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

pub use crate::error::{OutlierError, Result};

fn ensure_unique<'a>(kind: &str, names: impl IntoIterator<Item = &'a String>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(OutlierError::Table(format!("Duplicate {kind} '{name}'")));
        }
    }
    Ok(())
}

// ============================================================================
// Measurement Tables
// ============================================================================

/// Subjects x regions measurement table
///
/// Row `i` of `values` belongs to `ids[i]`, column `j` to `columns[j]`.
/// The identifier column is kept apart and never treated as a measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub id_column: String,
    pub ids: Vec<String>,
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

impl Table {
    /// Build a table, checking shape and identifier uniqueness
    ///
    /// # Errors
    /// Returns `Table` error on shape mismatch or duplicate ids/columns
    pub fn new(
        id_column: impl Into<String>,
        ids: Vec<String>,
        columns: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self> {
        let id_column = id_column.into();
        if values.nrows() != ids.len() || values.ncols() != columns.len() {
            return Err(OutlierError::Table(format!(
                "Shape {}x{} does not match {} ids and {} columns",
                values.nrows(),
                values.ncols(),
                ids.len(),
                columns.len()
            )));
        }
        if columns.contains(&id_column) {
            return Err(OutlierError::Table(format!(
                "Identifier column '{id_column}' also appears as a measurement"
            )));
        }
        ensure_unique("subject id", &ids)?;
        ensure_unique("column", &columns)?;

        Ok(Self {
            id_column,
            ids,
            columns,
            values,
        })
    }

    /// Get number of subjects
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    /// Get number of measurement columns
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Get a measurement column by name
    ///
    /// # Errors
    /// Returns `NotFound` if the column does not exist
    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        self.column_index(name)
            .map(|j| self.values.column(j))
            .ok_or_else(|| OutlierError::NotFound(format!("region '{name}'")))
    }

    /// Copy of the table restricted to the given row positions, in that order
    #[must_use]
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            id_column: self.id_column.clone(),
            ids: rows.iter().map(|&i| self.ids[i].clone()).collect(),
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), rows),
        }
    }

    /// Copy of the table keeping only the named columns, in the given order
    ///
    /// # Errors
    /// Returns `NotFound` if a name is not a column
    pub fn select_columns(&self, names: &[String]) -> Result<Self> {
        let indices = names
            .iter()
            .map(|n| {
                self.column_index(n)
                    .ok_or_else(|| OutlierError::NotFound(format!("region '{n}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id_column: self.id_column.clone(),
            ids: self.ids.clone(),
            columns: names.to_vec(),
            values: self.values.select(Axis(1), &indices),
        })
    }
}

// ============================================================================
// Demographic Types
// ============================================================================

/// A single demographic value
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl Cell {
    /// Parse a raw field: empty, `NA` and `nan` are missing
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.eq_ignore_ascii_case("na")
            || trimmed.eq_ignore_ascii_case("nan")
        {
            return Self::Missing;
        }
        trimmed
            .parse::<f64>()
            .map_or_else(|_| Self::Text(trimmed.to_string()), Self::Number)
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Missing => Ok(()),
        }
    }
}

/// Per-subject covariates keyed by subject identifier
#[derive(Debug, Clone, PartialEq)]
pub struct DemographicTable {
    pub id_column: String,
    pub ids: Vec<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl DemographicTable {
    /// Build a demographic table
    ///
    /// # Errors
    /// Returns `Table` error on ragged rows or duplicate ids/columns
    pub fn new(
        id_column: impl Into<String>,
        ids: Vec<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Cell>>,
    ) -> Result<Self> {
        if rows.len() != ids.len() {
            return Err(OutlierError::Table(format!(
                "{} demographic rows for {} ids",
                rows.len(),
                ids.len()
            )));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(OutlierError::Table(format!(
                "Demographic row for '{}' has {} fields, expected {}",
                ids[i],
                row.len(),
                columns.len()
            )));
        }
        ensure_unique("subject id", &ids)?;
        ensure_unique("demographic column", &columns)?;

        Ok(Self {
            id_column: id_column.into(),
            ids,
            columns,
            rows,
        })
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    #[must_use]
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            id_column: self.id_column.clone(),
            ids: rows.iter().map(|&i| self.ids[i].clone()).collect(),
            columns: self.columns.clone(),
            rows: rows.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}

/// Measurements joined row-for-row with demographics
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedTable {
    pub measures: Table,
    pub demographics: DemographicTable,
}

impl CombinedTable {
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.measures.n_rows()
    }

    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.measures.ids
    }

    #[must_use]
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            measures: self.measures.select_rows(rows),
            demographics: self.demographics.select_rows(rows),
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Per-region standardization and inlier classification
#[derive(Debug, Clone, PartialEq)]
pub struct ZScoreResult {
    pub region: String,
    pub mean: f64,
    /// Population standard deviation (ddof = 0)
    pub std: f64,
    pub num_std: f64,
    pub values: Vec<f64>,
    pub zscores: Vec<f64>,
    pub inliers: Vec<bool>,
}

impl ZScoreResult {
    #[must_use]
    pub fn outlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&inlier| !inlier).count()
    }

    #[must_use]
    pub fn outlier_indices(&self) -> Vec<usize> {
        self.inliers
            .iter()
            .enumerate()
            .filter(|(_, &inlier)| !inlier)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Multivariate scoring method
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Method {
    Mahalanobis,
    IsolationForest,
}

impl Method {
    /// Percentile bounds used when the caller leaves them unset
    #[must_use]
    pub fn default_bounds(self) -> (f64, f64) {
        match self {
            Self::Mahalanobis => (0.0, 80.0),
            Self::IsolationForest => (3.0, 97.0),
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Mahalanobis => "mahalanobis",
            Self::IsolationForest => "isolation_forest",
        }
    }
}

/// How a multivariate measure is turned into an outlier flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DecisionRule {
    /// Outside the [low, high] percentiles of the observed measure
    #[default]
    Percentile,
    /// Squared distance outside the chi-squared(k) quantiles (Mahalanobis only)
    ChiSquared,
}

/// Per-subject composite anomaly scores
#[derive(Debug, Clone, PartialEq)]
pub struct MultivariateResult {
    pub method: Method,
    pub rule: DecisionRule,
    /// Regions that entered the feature matrix
    pub features: Vec<String>,
    pub ids: Vec<String>,
    pub scores: Vec<f64>,
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub outliers: Vec<bool>,
}

impl MultivariateResult {
    /// Scores rounded to 3 decimals for display
    #[must_use]
    pub fn display_scores(&self) -> Vec<f64> {
        self.scores
            .iter()
            .map(|&s| crate::ml::stats::round_to(s, 3))
            .collect()
    }

    #[must_use]
    pub fn outlier_ids(&self) -> Vec<&str> {
        self.ids
            .iter()
            .zip(&self.outliers)
            .filter(|(_, &out)| out)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Outliers of one subject across regions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectSummary {
    pub subject_id: String,
    pub outlier_count: usize,
    pub outlier_regions: Vec<String>,
}

/// Outliers of one region across subjects
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSummary {
    pub region: String,
    pub outlier_count: usize,
    pub outlier_subjects: Vec<String>,
}
