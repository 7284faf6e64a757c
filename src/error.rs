//! Error taxonomy for the crate
//!
//! Fatal configuration, data and consistency failures abort a run before any
//! optimizer step; numerical failures (NaN/Inf losses) halt training instead
//! of being masked.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes of training and inference.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing run configuration (CLI arguments, config file values).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Empty or mismatched dataset listings.
    #[error("data error: {0}")]
    Data(String),

    /// Generator/critic checkpoint state disagrees on resume.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// A required file or directory does not exist.
    #[error("not found: {0}")]
    NotFound(PathBuf),

    /// A loss became NaN or infinite. Training halts rather than continuing
    /// on a diverged model.
    #[error("non-finite {metric} ({value}) at epoch {epoch}, step {step}")]
    Numerical {
        metric: String,
        value: f64,
        epoch: usize,
        step: usize,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("torch error: {0}")]
    Tch(#[from] tch::TchError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metrics csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Whether the error is fatal before the first training step.
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::Data(_) | Error::Consistency(_) | Error::NotFound(_)
        )
    }
}
