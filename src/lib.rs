//! # justvm - register bytecode VM and scope resolver
//!
//! The core of a JavaScript engine split into three pieces:
//! - a scope resolver that builds one context per lexical scope and decides
//!   which variables escape into heap-backed activations
//! - a call-frame builder laying out call records on the engine's value
//!   stack and keeping a walkable list of native frames
//! - a register interpreter with inline caches, structured exception
//!   handling and a debugger command channel
//!
//! ## Resolving scopes
//!
//! ```
//! use justvm::compiler::{self, ContextType, ResolverOptions};
//! use justvm::parser::JsParser;
//!
//! let program = JsParser::parse_to_ast_from_str(
//!     "function outer() { var hidden = 1; return function () { return hidden; }; }",
//! )
//! .unwrap();
//! let graph = compiler::resolve(&program, ContextType::Global, &ResolverOptions::default()).unwrap();
//! let outer = graph.iter().find(|c| c.name.as_deref() == Some("outer")).unwrap();
//! assert!(outer.requires_execution_context);
//! assert!(outer.find_member("hidden").unwrap().can_escape);
//! ```
//!
//! ## Running bytecode
//!
//! Code generation is not part of this crate; functions are assembled with
//! [`runner::vm::bytecode::FunctionBuilder`].
//!
//! ```
//! use justvm::runner::ds::value::JsValue;
//! use justvm::runner::vm::bytecode::{FunctionBuilder, OpCode, Operand};
//! use justvm::runner::vm::config::EngineConfig;
//! use justvm::runner::vm::ExecutionEngine;
//!
//! let mut b = FunctionBuilder::new("main");
//! b.init_stack_frame(1);
//! let two = b.add_constant(JsValue::integer(2));
//! b.binary(OpCode::Mul, Operand::temp(0), two, two);
//! b.ret(Operand::temp(0));
//! let main = b.build().unwrap();
//!
//! let mut engine = ExecutionEngine::new(EngineConfig::default());
//! assert_eq!(engine.run(main), Ok(JsValue::integer(4)));
//! ```
//!
//! ## Architecture
//!
//! - **[`parser`]** - PEG parser and syntax tree
//! - **[`compiler`]** - context graph and escape analysis
//! - **[`runner`]** - object model and the VM
//!   - **[`runner::ds`]** - values, objects, heap contexts
//!   - **[`runner::vm`]** - bytecode, interpreter, runtime, lookups, debugger

#[macro_use]
extern crate lazy_static;

pub mod compiler;
pub mod parser;
pub mod runner;
