//! Analysis runs that chain the scorers, the corrector and the aggregator

use crate::ml::demographics::{combine, filter_controls};
use crate::ml::isolation_forest::IsolationForestParams;
use crate::ml::multivariate::{score_with, MultivariateOptions};
use crate::ml::regression::{fit_and_correct, CorrectionOutcome};
use crate::ml::summary::{group_by_region, group_by_subject};
use crate::ml::univariate::{score_all, zscore_table, DEFAULT_NUM_STD};
use crate::structs::{
    CombinedTable, DecisionRule, DemographicTable, Method, MultivariateResult, OutlierError,
    RegionSummary, Result, SubjectSummary, Table, ZScoreResult,
};

/// Configuration for plain per-region scoring
#[derive(Debug, Clone)]
pub struct UnivariateConfig {
    pub num_std: f64,
    /// Summary threshold on `|zscore|`
    pub extent: f64,
}

impl Default for UnivariateConfig {
    fn default() -> Self {
        Self {
            num_std: DEFAULT_NUM_STD,
            extent: DEFAULT_NUM_STD,
        }
    }
}

/// Configuration for a covariate-corrected run
#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    /// Boolean expression over demographic columns selecting the controls
    pub control: String,
    pub covariates: Vec<String>,
    /// Regions to correct; every non-covariate region when `None`
    pub regions: Option<Vec<String>>,
    pub num_std: f64,
    pub extent: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            control: String::new(),
            covariates: Vec::new(),
            regions: None,
            num_std: DEFAULT_NUM_STD,
            extent: DEFAULT_NUM_STD,
        }
    }
}

/// Configuration for a multivariate run
#[derive(Debug, Clone)]
pub struct MultivariateConfig {
    pub method: Method,
    pub low_pct: Option<f64>,
    pub high_pct: Option<f64>,
    pub rule: DecisionRule,
    pub n_estimators: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for MultivariateConfig {
    fn default() -> Self {
        let forest = IsolationForestParams::default();
        Self {
            method: Method::Mahalanobis,
            low_pct: None,
            high_pct: None,
            rule: DecisionRule::Percentile,
            n_estimators: forest.n_estimators,
            contamination: forest.contamination,
            seed: forest.seed,
        }
    }
}

impl MultivariateConfig {
    fn options(&self) -> MultivariateOptions {
        MultivariateOptions {
            method: self.method,
            low_pct: self.low_pct,
            high_pct: self.high_pct,
            rule: self.rule,
            forest: IsolationForestParams {
                n_estimators: self.n_estimators,
                contamination: self.contamination,
                seed: self.seed,
                ..IsolationForestParams::default()
            },
        }
    }
}

/// Results of a plain per-region run
#[derive(Debug)]
pub struct UnivariateReport {
    pub results: Vec<ZScoreResult>,
    pub zscores: Table,
    pub by_subject: Vec<SubjectSummary>,
    pub by_region: Vec<RegionSummary>,
}

/// Results of a corrected run
#[derive(Debug)]
pub struct CorrectionReport {
    pub combined: CombinedTable,
    pub controls: CombinedTable,
    pub outcome: CorrectionOutcome,
    /// Z-scores of the squared residuals
    pub zscores: Table,
    pub by_subject: Vec<SubjectSummary>,
    pub by_region: Vec<RegionSummary>,
}

fn check_extent(extent: f64) -> Result<()> {
    if extent.is_finite() && extent >= 0.0 {
        Ok(())
    } else {
        Err(OutlierError::Config(format!(
            "Extent must be a non-negative number, got {extent}"
        )))
    }
}

/// Score every region and summarize deviations beyond `extent`
///
/// # Errors
/// Returns `Config` for invalid thresholds or error if the table is empty
pub fn run_univariate(table: &Table, config: &UnivariateConfig) -> Result<UnivariateReport> {
    check_extent(config.extent)?;
    let results = score_all(table, config.num_std)?;
    let zscores = zscore_table(table, config.num_std)?;

    let by_subject = group_by_subject(&zscores, config.extent);
    let by_region = group_by_region(&zscores, config.extent);
    tracing::info!(
        "Scored {} regions for {} subjects, {} subjects beyond |z| > {}",
        table.n_cols(),
        table.n_rows(),
        by_subject.iter().filter(|s| s.outlier_count > 0).count(),
        config.extent
    );

    Ok(UnivariateReport {
        results,
        zscores,
        by_subject,
        by_region,
    })
}

/// Combine, select controls, correct for covariates, then score the residuals
///
/// # Errors
/// Returns `NotFound` for subjects or regions missing from the table,
/// `Config` for an invalid predicate, covariates or thresholds, and
/// `Table` if no region could be corrected
pub fn run_correction(
    table: &Table,
    demographics: &DemographicTable,
    config: &CorrectionConfig,
) -> Result<CorrectionReport> {
    check_extent(config.extent)?;
    if config.control.trim().is_empty() {
        return Err(OutlierError::Config("A control predicate is required".into()));
    }

    let combined = combine(table, demographics)?;
    let controls = filter_controls(&combined, &config.control)?;
    if controls.n_rows() == 0 {
        return Err(OutlierError::Config(format!(
            "Control predicate '{}' matches no subject",
            config.control
        )));
    }

    let outcome = fit_and_correct(
        &combined,
        &controls,
        &config.covariates,
        config.regions.as_deref(),
    )?;
    if outcome.models.is_empty() {
        return Err(OutlierError::Table(format!(
            "No region could be corrected ({} skipped, {} failed)",
            outcome.skipped.len(),
            outcome.failures.len()
        )));
    }

    let zscores = zscore_table(&outcome.residuals, config.num_std)?;
    let by_subject = group_by_subject(&zscores, config.extent);
    let by_region = group_by_region(&zscores, config.extent);

    Ok(CorrectionReport {
        combined,
        controls,
        outcome,
        zscores,
        by_subject,
        by_region,
    })
}

/// Composite anomaly scores for every subject
///
/// # Errors
/// See [`score_with`]
pub fn run_multivariate(table: &Table, config: &MultivariateConfig) -> Result<MultivariateResult> {
    score_with(table, &config.options())
}
