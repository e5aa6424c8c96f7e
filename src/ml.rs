pub mod demographics;
pub mod isolation_forest;
pub mod linalg;
pub mod multivariate;
pub mod output;
pub mod pipeline;
pub mod predicate;
pub mod regression;
pub mod stats;
pub mod summary;
pub mod table;
pub mod univariate;
