//! Error types for the PDF engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the PDF engine
///
/// The variants follow the engine's failure taxonomy: invalid caller input,
/// a resource that could not be located, an operation the input does not
/// support, a scan that could not make sense of an existing PDF, a
/// consistency requirement the operation could not meet, and internal
/// writer failures that indicate a bug.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed caller input (bad base64, unsupported image format, ...)
    ///
    /// Most invalid input is recovered locally with a fallback and never
    /// surfaces; this variant is for input the engine cannot degrade around.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A required resource could not be located
    #[error("missing resource: {0}")]
    MissingResource(String),

    /// The operation cannot be applied to this input
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The tolerant scanner could not recover a usable object map
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// The operation's consistency requirement could not be met
    /// (e.g. secure redaction with no rewritable stream)
    #[error("consistency failure: {0}")]
    ConsistencyFailure(String),

    /// Writer-internal invariant violation; indicates a bug
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable kind code for structured reporting
    pub fn kind_code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::MissingResource(_) => "missing_resource",
            Error::UnsupportedOperation(_) => "unsupported_operation",
            Error::ParseFailure(_) => "parse_failure",
            Error::ConsistencyFailure(_) => "consistency_failure",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_are_stable() {
        assert_eq!(Error::InvalidInput("x".into()).kind_code(), "invalid_input");
        assert_eq!(
            Error::ConsistencyFailure("x".into()).kind_code(),
            "consistency_failure"
        );
    }
}
