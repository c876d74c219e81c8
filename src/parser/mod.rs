//! PEG parser producing the syntax tree consumed by the scope resolver.

mod api;
pub mod ast;

pub use api::JsParser;
