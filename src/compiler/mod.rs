//! Compile-time passes that run between parsing and code generation.

pub mod context;
pub mod error;
pub mod scope_resolver;

pub use context::{Context, ContextGraph, ContextId, ContextType, Member, MemberType, UsesArgumentsObject, VariableScope};
pub use error::CompileError;
pub use scope_resolver::{calc_escaping_variables, resolve, ResolverOptions};
