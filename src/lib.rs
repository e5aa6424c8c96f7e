#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::uninlined_format_args, clippy::module_name_repetitions)]

//! Outlier detection and demographic correction for regional neuroimaging
//! statistics: per-region z-scores, covariate-corrected residuals fitted on a
//! control group, and composite multivariate anomaly scores.

pub mod csv_reader;
pub mod error;
pub mod ml;
pub mod structs;
