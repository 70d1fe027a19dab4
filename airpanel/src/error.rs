//! Error types.

#[derive(thiserror::Error, Debug)]
pub enum AirpanelError {
    #[error("Wrapped anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
    #[error("Required column `{0}` missing from {1}")]
    MissingColumn(String, String),
    #[error("Malformed input schema: {0}")]
    MalformedSchema(String),
    #[error("Degenerate design matrix: {0}")]
    DegenerateDesign(String),
    #[error("Wrapped polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
}
