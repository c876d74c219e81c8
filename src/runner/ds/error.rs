use thiserror::Error;

use crate::runner::ds::value::JsValue;

/// Errors raised while running script code. The built-in kinds become `Error`
/// objects when thrown; `Exception` carries a value thrown by script as is.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JErrorType {
    #[error("Uncaught reference error: {0}.")]
    ReferenceError(String),
    #[error("Uncaught type error: {0}.")]
    TypeError(String),
    #[error("Uncaught range error: {0}.")]
    RangeError(String),
    #[error("Uncaught syntax error: {0}.")]
    SyntaxError(String),
    #[error("Uncaught {0}")]
    Exception(JsValue),
}

impl JErrorType {
    /// Name of the constructor an error object of this kind reports.
    pub fn name(&self) -> &'static str {
        match self {
            JErrorType::ReferenceError(_) => "ReferenceError",
            JErrorType::TypeError(_) => "TypeError",
            JErrorType::RangeError(_) => "RangeError",
            JErrorType::SyntaxError(_) => "SyntaxError",
            JErrorType::Exception(_) => "Error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            JErrorType::ReferenceError(m)
            | JErrorType::TypeError(m)
            | JErrorType::RangeError(m)
            | JErrorType::SyntaxError(m) => m.to_string(),
            JErrorType::Exception(v) => v.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rendering() {
        let e = JErrorType::TypeError("x is not a function".to_string());
        assert_eq!(e.to_string(), "Uncaught type error: x is not a function.");
        assert_eq!(e.name(), "TypeError");
        assert_eq!(e.message(), "x is not a function");
    }
}
