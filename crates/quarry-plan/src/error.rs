use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("compile error: {0}")]
    Compile(String),

    #[error("pipeline document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("expression error: {0}")]
    Expr(String),

    #[error("need {needed} executors, {available} available")]
    Capacity { needed: usize, available: usize },

    #[error("invalid plan: {0}")]
    Invalid(String),

    #[error("instruction encoding: {0}")]
    Encoding(String),

    #[error(transparent)]
    Core(#[from] quarry_core::Error),
}

impl From<bincode::Error> for PlanError {
    fn from(e: bincode::Error) -> Self {
        PlanError::Encoding(e.to_string())
    }
}

impl From<base64::DecodeError> for PlanError {
    fn from(e: base64::DecodeError) -> Self {
        PlanError::Encoding(e.to_string())
    }
}
