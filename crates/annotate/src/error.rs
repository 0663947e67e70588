use thiserror::Error;

/// Why a single result line did not produce an annotation.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed result envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("Result line carries no model output{}", .0.as_deref().map(|e| format!(": {}", e)).unwrap_or_default())]
    MissingContent(Option<String>),

    #[error("Model output is not valid JSON: {0}")]
    Payload(String),

    #[error("Model output lacks field '{0}'")]
    MissingField(&'static str),

    #[error("Field '{field}' has unexpected value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("Expected {expected} fields separated by '{separator}', found {found}")]
    FieldCount {
        expected: usize,
        found: usize,
        separator: char,
    },

    #[error("Model output id '{found}' does not match request id '{expected}'")]
    IdMismatch { expected: String, found: String },

    #[error("Inconsistent fields: {0}")]
    Inconsistent(String),

    #[error("Model gave no answer")]
    NoAnswer,
}

impl ParseError {
    /// `NoAnswer` is a legitimate response, every other variant is malformed output.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ParseError::NoAnswer)
    }
}
