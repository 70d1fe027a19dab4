//! Error types.

pub type AirpanelCliResult<T> = Result<T, AirpanelCliError>;

#[derive(thiserror::Error, Debug)]
pub enum AirpanelCliError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Wrapped anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
}
