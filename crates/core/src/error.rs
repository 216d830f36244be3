use thiserror::Error;

pub type RcaResult<T> = Result<T, RcaError>;

#[derive(Error, Debug)]
pub enum RcaError {
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Insufficient features: {found} usable, at least {required} required")]
    InsufficientFeatures { found: usize, required: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for RcaError {
    fn from(err: config::ConfigError) -> Self {
        RcaError::Config(err.to_string())
    }
}
