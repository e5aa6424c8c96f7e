//! Demographic correction: one Gaussian GLM per region, fitted on controls
//!
//! Each region is modelled as `region ~ covariate_1 + covariate_2 + ...` on
//! the control subset, predicted for every subject, and turned into a
//! residual severity score `(predicted - observed)^2`.

use crate::ml::linalg::least_squares;
use crate::structs::{Cell, CombinedTable, DemographicTable, OutlierError, Result, Table};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;
use std::fmt::Write as _;

// ============================================================================
// Design Matrix Encoding
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum CovariateTerm {
    Numeric { name: String },
    /// Treatment coded against `levels[0]`
    Categorical { name: String, levels: Vec<String> },
}

impl CovariateTerm {
    fn name(&self) -> &str {
        match self {
            Self::Numeric { name } | Self::Categorical { name, .. } => name,
        }
    }
}

/// Maps demographic cells to design-matrix rows (intercept first)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateEncoding {
    terms: Vec<CovariateTerm>,
}

impl CovariateEncoding {
    /// Learn numeric/categorical encodings from the control demographics
    ///
    /// # Errors
    /// Returns `Config` if a covariate is not a demographic column
    pub fn learn(controls: &DemographicTable, covariates: &[String]) -> Result<Self> {
        let terms = covariates
            .iter()
            .map(|name| {
                let j = controls.column_index(name).ok_or_else(|| {
                    OutlierError::Config(format!("Missing required covariate column '{name}'"))
                })?;
                let present: Vec<&Cell> = controls
                    .rows
                    .iter()
                    .map(|row| &row[j])
                    .filter(|cell| !cell.is_missing())
                    .collect();

                if present.iter().all(|cell| matches!(cell, Cell::Number(_))) {
                    Ok(CovariateTerm::Numeric { name: name.clone() })
                } else {
                    let levels: BTreeSet<String> =
                        present.iter().map(ToString::to_string).collect();
                    Ok(CovariateTerm::Categorical {
                        name: name.clone(),
                        levels: levels.into_iter().collect(),
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { terms })
    }

    /// Design column names: `Intercept`, numeric names, `name[T.level]`
    #[must_use]
    pub fn term_names(&self) -> Vec<String> {
        let mut names = vec!["Intercept".to_string()];
        for term in &self.terms {
            match term {
                CovariateTerm::Numeric { name } => names.push(name.clone()),
                CovariateTerm::Categorical { name, levels } => {
                    names.extend(levels.iter().skip(1).map(|l| format!("{name}[T.{l}]")));
                }
            }
        }
        names
    }

    #[must_use]
    pub fn n_params(&self) -> usize {
        1 + self
            .terms
            .iter()
            .map(|t| match t {
                CovariateTerm::Numeric { .. } => 1,
                CovariateTerm::Categorical { levels, .. } => levels.len().saturating_sub(1),
            })
            .sum::<usize>()
    }

    /// Encode every subject of `demographics` into a design matrix
    ///
    /// # Errors
    /// Returns `Config` for a missing covariate value, a non-numeric value in
    /// a numeric covariate, or a category level never seen among controls
    pub fn encode(&self, demographics: &DemographicTable) -> Result<Array2<f64>> {
        let positions = self
            .terms
            .iter()
            .map(|t| {
                demographics.column_index(t.name()).ok_or_else(|| {
                    OutlierError::Config(format!("Missing required covariate column '{}'", t.name()))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let p = self.n_params();
        let mut design = Array2::zeros((demographics.n_rows(), p));
        for (i, (id, row)) in demographics.ids.iter().zip(&demographics.rows).enumerate() {
            design[[i, 0]] = 1.0;
            let mut k = 1;
            for (term, &j) in self.terms.iter().zip(&positions) {
                let cell = &row[j];
                if cell.is_missing() {
                    return Err(OutlierError::Config(format!(
                        "Subject '{id}' has no value for covariate '{}'",
                        term.name()
                    )));
                }
                match term {
                    CovariateTerm::Numeric { name } => {
                        design[[i, k]] = cell.as_f64().ok_or_else(|| {
                            OutlierError::Config(format!(
                                "Subject '{id}' has non-numeric value '{cell}' for covariate '{name}'"
                            ))
                        })?;
                        k += 1;
                    }
                    CovariateTerm::Categorical { name, levels } => {
                        let label = cell.to_string();
                        let level = levels.iter().position(|l| *l == label).ok_or_else(|| {
                            OutlierError::Config(format!(
                                "Subject '{id}' has level '{label}' of covariate '{name}' not present in the control group"
                            ))
                        })?;
                        if level > 0 {
                            design[[i, k + level - 1]] = 1.0;
                        }
                        k += levels.len().saturating_sub(1);
                    }
                }
            }
        }

        Ok(design)
    }
}

// ============================================================================
// Fitted Model
// ============================================================================

/// A Gaussian-family, identity-link GLM fitted for one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub region: String,
    pub formula: String,
    pub encoding: CovariateEncoding,
    pub terms: Vec<String>,
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub n_obs: usize,
    pub df_model: usize,
    pub df_resid: usize,
    /// Pearson chi-squared over residual degrees of freedom
    pub scale: f64,
    pub deviance: f64,
    pub null_deviance: f64,
    /// Observed control values the model was fitted on
    pub endog: Vec<f64>,
    /// Fitted means for the control rows
    pub fitted: Vec<f64>,
}

/// Gaussian log-likelihood at the maximum-likelihood scale `ssr / n`
#[allow(clippy::cast_precision_loss)]
fn gaussian_llf(ssr: f64, n: usize) -> f64 {
    let n = n as f64;
    -n / 2.0 * ((2.0 * PI * ssr / n).ln() + 1.0)
}

impl FittedModel {
    /// Fit by column-pivoted QR least squares, which is the exact IRLS
    /// solution for the Gaussian family with identity link
    ///
    /// # Errors
    /// Returns `Fit` when there are too few observations, the design is rank
    /// deficient, or the response is constant
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(
        region: &str,
        formula: String,
        encoding: CovariateEncoding,
        design: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<Self> {
        let n = y.len();
        let p = design.ncols();

        if design.nrows() != n {
            return Err(OutlierError::fit(region, "design and response lengths differ"));
        }
        if n <= p {
            return Err(OutlierError::fit(
                region,
                format!("{n} control observations cannot identify {p} parameters"),
            ));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(OutlierError::fit(region, "non-finite control values"));
        }

        let solution = least_squares(design, y).ok_or_else(|| {
            OutlierError::fit(region, "design matrix is rank deficient (collinear covariates?)")
        })?;
        let beta = solution.coefficients;

        let fitted = design.dot(&beta);
        let deviance: f64 = y.iter().zip(&fitted).map(|(o, f)| (o - f).powi(2)).sum();

        let mean = y.sum() / n as f64;
        let null_deviance: f64 = y.iter().map(|o| (o - mean).powi(2)).sum();
        if null_deviance == 0.0 || y.iter().all(|&o| o == y[0]) {
            return Err(OutlierError::fit(
                region,
                "control values are constant, nothing to model",
            ));
        }

        let df_resid = n - p;
        let scale = deviance / df_resid as f64;
        let std_errors = solution.unscaled_cov.diag().iter().map(|v| (scale * v).sqrt()).collect();

        Ok(Self {
            region: region.to_string(),
            formula,
            terms: encoding.term_names(),
            encoding,
            coefficients: beta.to_vec(),
            std_errors,
            n_obs: n,
            df_model: p - 1,
            df_resid,
            scale,
            deviance,
            null_deviance,
            endog: y.to_vec(),
            fitted: fitted.to_vec(),
        })
    }

    /// Predicted means for rows of an already encoded design matrix
    #[must_use]
    pub fn predict_design(&self, design: ArrayView2<'_, f64>) -> Array1<f64> {
        design.dot(&Array1::from_vec(self.coefficients.clone()))
    }

    /// Predicted region values for every subject of `demographics`
    ///
    /// # Errors
    /// Returns `Config` if a subject's covariates cannot be encoded
    pub fn predict(&self, demographics: &DemographicTable) -> Result<Vec<f64>> {
        let design = self.encoding.encode(demographics)?;
        Ok(self.predict_design(design.view()).to_vec())
    }

    /// Deviance residuals; for the Gaussian family `y - mu`
    #[must_use]
    pub fn resid_deviance(&self) -> Vec<f64> {
        self.endog.iter().zip(&self.fitted).map(|(y, mu)| y - mu).collect()
    }

    /// Pearson residuals; the Gaussian variance function is constant
    #[must_use]
    pub fn resid_pearson(&self) -> Vec<f64> {
        self.resid_deviance()
    }

    /// Log-likelihood of the fitted model; infinite for a perfect fit
    #[must_use]
    pub fn llf(&self) -> f64 {
        gaussian_llf(self.deviance, self.n_obs)
    }

    /// Log-likelihood of the intercept-only model
    #[must_use]
    pub fn llnull(&self) -> f64 {
        gaussian_llf(self.null_deviance, self.n_obs)
    }

    /// Likelihood-ratio statistic against the intercept-only model
    #[must_use]
    pub fn llr(&self) -> f64 {
        -2.0 * (self.llnull() - self.llf())
    }

    /// Upper-tail chi-squared probability of `llr` with `df_model` degrees
    ///
    /// # Errors
    /// Returns `Fit` if the model has no covariate degrees of freedom
    #[allow(clippy::cast_precision_loss)]
    pub fn llr_pvalue(&self) -> Result<f64> {
        let chi2 = ChiSquared::new(self.df_model as f64)
            .map_err(|e| OutlierError::fit(&self.region, format!("chi-squared: {e}")))?;
        Ok(chi2.sf(self.llr()))
    }

    /// McFadden pseudo R-squared `1 - llf / llnull`
    #[must_use]
    pub fn pseudo_rsquared(&self) -> f64 {
        let llf = self.llf();
        if llf.is_infinite() {
            1.0
        } else {
            1.0 - llf / self.llnull()
        }
    }

    /// Two-sided normal p-values of the coefficients
    #[must_use]
    pub fn pvalues(&self) -> Vec<f64> {
        let Ok(normal) = Normal::new(0.0, 1.0) else {
            return vec![f64::NAN; self.coefficients.len()];
        };
        self.coefficients
            .iter()
            .zip(&self.std_errors)
            .map(|(b, se)| 2.0 * normal.sf((b / se).abs()))
            .collect()
    }

    /// Text summary of the fit for diagnostic display
    #[must_use]
    pub fn summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "Generalized Linear Model Regression Results");
        let _ = writeln!(s, "Dep. Variable: {}", self.region);
        let _ = writeln!(s, "Formula: {}", self.formula);
        let _ = writeln!(s, "Model Family: Gaussian, Link Function: identity");
        let _ = writeln!(
            s,
            "No. Observations: {}, Df Residuals: {}, Df Model: {}",
            self.n_obs, self.df_resid, self.df_model
        );
        let _ = writeln!(
            s,
            "Scale: {:.4}, Log-Likelihood: {:.4}, Deviance: {:.4}",
            self.scale,
            self.llf(),
            self.deviance
        );
        let _ = writeln!(
            s,
            "{:<24} {:>12} {:>12} {:>8} {:>8}",
            "", "coef", "std err", "z", "P>|z|"
        );
        for (((term, coef), se), p) in self
            .terms
            .iter()
            .zip(&self.coefficients)
            .zip(&self.std_errors)
            .zip(self.pvalues())
        {
            let _ = writeln!(
                s,
                "{term:<24} {coef:>12.4} {se:>12.4} {:>8.3} {p:>8.4}",
                coef / se
            );
        }
        match self.llr_pvalue() {
            Ok(p) => {
                let _ = writeln!(s, "llr_pvalue: {p:.4}");
            }
            Err(e) => {
                let _ = writeln!(s, "llr_pvalue: unavailable ({e})");
            }
        }
        let _ = writeln!(s, "Pseudo R^2: {:.4}", self.pseudo_rsquared());
        s
    }
}

// ============================================================================
// Model Persistence Hooks
// ============================================================================

/// Save/load hooks for fitted models, keyed by region name
pub trait ModelStore {
    /// # Errors
    /// Returns error if the model cannot be serialized or stored
    fn save(&mut self, region: &str, model: &FittedModel) -> Result<()>;

    /// # Errors
    /// Returns `NotFound` if no model was saved for `region`
    fn load(&self, region: &str) -> Result<FittedModel>;
}

/// Keeps serialized models in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryModelStore {
    models: BTreeMap<String, String>,
}

impl MemoryModelStore {
    #[must_use]
    pub fn regions(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }
}

impl ModelStore for MemoryModelStore {
    fn save(&mut self, region: &str, model: &FittedModel) -> Result<()> {
        self.models
            .insert(region.to_string(), serde_json::to_string(model)?);
        Ok(())
    }

    fn load(&self, region: &str) -> Result<FittedModel> {
        let json = self
            .models
            .get(region)
            .ok_or_else(|| OutlierError::NotFound(format!("fitted model for region '{region}'")))?;
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Correction
// ============================================================================

/// Corrected values, residual severities and models of a correction run
#[derive(Debug)]
pub struct CorrectionOutcome {
    /// Predicted region values for every subject
    pub corrected: Table,
    /// `(corrected - original)^2` for every subject
    pub residuals: Table,
    /// One model per region present in `corrected`, same order
    pub models: Vec<FittedModel>,
    /// Regions not fitted because their control values are all zero
    pub skipped: Vec<String>,
    /// Regions whose fit failed; absent from the tables
    pub failures: Vec<OutlierError>,
}

impl CorrectionOutcome {
    #[must_use]
    pub fn model(&self, region: &str) -> Option<&FittedModel> {
        self.models.iter().find(|m| m.region == region)
    }

    /// Hand every fitted model to a store
    ///
    /// # Errors
    /// Returns the first store error
    pub fn save_models(&self, store: &mut dyn ModelStore) -> Result<()> {
        for model in &self.models {
            store.save(&model.region, model)?;
        }
        Ok(())
    }
}

/// Fit one model per region on `controls`, predict for every subject of
/// `combined`, and compute squared-difference residuals
///
/// `regions = None` selects every measurement column. Per-region fit
/// failures are logged and collected in the outcome; they do not abort the
/// run.
///
/// # Errors
/// Returns `Config` for empty, unknown or colliding covariates and for
/// covariate values that cannot be encoded, `NotFound` for unknown regions
pub fn fit_and_correct(
    combined: &CombinedTable,
    controls: &CombinedTable,
    covariates: &[String],
    regions: Option<&[String]>,
) -> Result<CorrectionOutcome> {
    if covariates.is_empty() {
        return Err(OutlierError::Config(
            "At least one covariate is required for correction".into(),
        ));
    }
    if let Some(dup) = covariates
        .iter()
        .enumerate()
        .find(|&(i, c)| covariates[..i].contains(c))
        .map(|(_, c)| c)
    {
        return Err(OutlierError::Config(format!("Covariate '{dup}' listed twice")));
    }

    let regions: Vec<String> = match regions {
        Some(requested) => {
            for region in requested {
                if covariates.contains(region) {
                    return Err(OutlierError::Config(format!(
                        "Region '{region}' is also a covariate"
                    )));
                }
                combined.measures.column(region)?;
                controls.measures.column(region)?;
            }
            requested.to_vec()
        }
        None => combined
            .measures
            .columns
            .iter()
            .filter(|&c| !covariates.contains(c))
            .cloned()
            .collect(),
    };

    let encoding = CovariateEncoding::learn(&controls.demographics, covariates)?;
    let control_design = encoding.encode(&controls.demographics)?;
    let full_design = encoding.encode(&combined.demographics)?;
    let rhs = covariates.join(" + ");

    tracing::info!(
        "Fitting {} regions on {} control subjects with covariates {rhs}",
        regions.len(),
        controls.n_rows()
    );

    let fits: Vec<Result<Option<FittedModel>>> = regions
        .par_iter()
        .map(|region| {
            let y = controls.measures.column(region)?;
            if y.iter().all(|&v| v == 0.0) {
                return Ok(None);
            }
            FittedModel::fit(
                region,
                format!("{region} ~ {rhs}"),
                encoding.clone(),
                control_design.view(),
                y,
            )
            .map(Some)
        })
        .collect();

    let mut models = Vec::new();
    let mut skipped = Vec::new();
    let mut failures = Vec::new();
    for (region, fit) in regions.iter().zip(fits) {
        match fit {
            Ok(Some(model)) => {
                tracing::debug!("{region}: pseudo R^2 {:.4}", model.pseudo_rsquared());
                models.push(model);
            }
            Ok(None) => {
                tracing::info!("Skipping region {region}: all control values are zero");
                skipped.push(region.clone());
            }
            Err(e) => {
                tracing::warn!("{e}");
                failures.push(e);
            }
        }
    }

    let n = combined.n_rows();
    let mut corrected = Array2::zeros((n, models.len()));
    let mut residuals = Array2::zeros((n, models.len()));
    for (j, model) in models.iter().enumerate() {
        let original = combined.measures.column(&model.region)?;
        let predicted = model.predict_design(full_design.view());
        let squared = (&predicted - &original).mapv(|d| d.powi(2));
        corrected.column_mut(j).assign(&predicted);
        residuals.column_mut(j).assign(&squared);
    }

    let names: Vec<String> = models.iter().map(|m| m.region.clone()).collect();
    let id_column = combined.measures.id_column.clone();
    let ids = combined.ids().to_vec();

    Ok(CorrectionOutcome {
        corrected: Table::new(id_column.clone(), ids.clone(), names.clone(), corrected)?,
        residuals: Table::new(id_column, ids, names, residuals)?,
        models,
        skipped,
        failures,
    })
}
