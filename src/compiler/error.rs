use thiserror::Error;

use crate::parser::ast::Meta;

/// Static errors raised while parsing or resolving scopes. Either one aborts
/// the whole compilation unit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("{line}:{column}: {message}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },
    #[error("{line}:{column}: {message}")]
    Syntax {
        message: String,
        name: String,
        line: usize,
        column: usize,
    },
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, name: &str, meta: &Meta) -> Self {
        CompileError::Syntax {
            message: message.into(),
            name: name.to_string(),
            line: meta.line,
            column: meta.column,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CompileError::Parse { message, .. } => message,
            CompileError::Syntax { message, .. } => message,
        }
    }

    pub fn line_col(&self) -> (usize, usize) {
        match self {
            CompileError::Parse { line, column, .. } => (*line, *column),
            CompileError::Syntax { line, column, .. } => (*line, *column),
        }
    }
}
