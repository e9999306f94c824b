use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shape mismatch in {context}: expected {expected}, found {found}")]
    Shape {
        context: &'static str,
        expected: String,
        found: String,
    },

    #[error("Model does not expose {0}, required by the enabled loss terms")]
    MissingCapability(&'static str),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl HarnessError {
    pub(crate) fn shape(context: &'static str, expected: impl ToString, found: impl ToString) -> Self {
        HarnessError::Shape {
            context,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
