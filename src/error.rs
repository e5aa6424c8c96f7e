use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutlierError {
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fit failed for region '{region}': {reason}")]
    Fit { region: String, reason: String },

    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    #[error("Table error: {0}")]
    Table(String),
}

impl OutlierError {
    pub fn fit(region: &str, reason: impl Into<String>) -> Self {
        Self::Fit {
            region: region.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OutlierError>;
