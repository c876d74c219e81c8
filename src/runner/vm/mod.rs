//! Register bytecode, the interpreter that runs it and the runtime it calls
//! into.

pub mod bytecode;
pub mod call_data;
pub mod config;
pub mod debugger;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod lookup;
pub mod runtime;

pub use engine::ExecutionEngine;
pub use error::VmError;
