use thiserror::Error;

/// Outcome of running bytecode that did not produce a value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// An exception left the activation without meeting a handler. The
    /// exception stays pending on the engine.
    #[error("unhandled exception")]
    Unhandled,
    /// The bytecode and the interpreter disagree, e.g. an unknown opcode or
    /// an operand outside its scope.
    #[error("internal error: {0}")]
    Internal(String),
}
