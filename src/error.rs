use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdsError {
    /// Malformed training file. `line` is 1-based and counts the header.
    #[error("Format error at line {line}: {message}")]
    Format { line: u64, message: String },

    #[error("Record has {found} values but schema has {expected} attributes")]
    Arity { expected: usize, found: usize },

    #[error("Training data contains no records")]
    EmptyDataset,

    #[error("Empty input: {0} needs at least one record")]
    EmptyInput(&'static str),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IdsError {
    pub fn format(line: u64, message: impl Into<String>) -> Self {
        IdsError::Format {
            line,
            message: message.into(),
        }
    }
}

impl From<ctrlc::Error> for IdsError {
    fn from(err: ctrlc::Error) -> Self {
        IdsError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IdsError>;
