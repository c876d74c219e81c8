extern crate justvm;

use std::cell::RefCell;
use std::rc::Rc;

use justvm::runner::ds::value::JsValue;
use justvm::runner::vm::bytecode::{CallTarget, CompiledFunction, FunctionBuilder, OpCode, Operand};
use justvm::runner::vm::config::EngineConfig;
use justvm::runner::vm::debugger::{
    BreakpointHit, DebugSession, ERR_NO_SUCH_BREAKPOINT, ERR_UNKNOWN_COMMAND, ERR_VERSION_MISMATCH, PROTOCOL_VERSION,
};
use justvm::runner::vm::ExecutionEngine;

fn insert(file: &str, line: usize) -> String {
    format!(
        r#"{{"command":"insertBreakpoint","version":1,"fullName":"{}","lineNumber":{}}}"#,
        file, line
    )
}

fn remove(file: &str, line: usize) -> String {
    format!(
        r#"{{"command":"removeBreakpoint","version":1,"fullName":"{}","lineNumber":{}}}"#,
        file, line
    )
}

const PREPARE_STEP: &str = r#"{"command":"prepareStep","version":1}"#;

fn recorder(session: &mut DebugSession) -> Rc<RefCell<Vec<BreakpointHit>>> {
    let hits = Rc::new(RefCell::new(vec![]));
    let sink = hits.clone();
    session.on_breakpoint(move |h| sink.borrow_mut().push(h.clone()));
    hits
}

/// Three `Line` instructions for lines 1..=3 of `file`, then returns 3.
fn three_lines(file: &str) -> Rc<CompiledFunction> {
    let mut b = FunctionBuilder::new("main").file(file);
    b.init_stack_frame(0);
    for line in 1..=3 {
        b.line(line);
    }
    let v = b.add_constant(JsValue::integer(3));
    b.ret(v);
    b.build().unwrap()
}

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(EngineConfig::default())
}

// ── Command channel ───────────────────────────────────────────────────

#[test]
fn test_breakpoint_handles() {
    let mut s = DebugSession::new();
    assert_eq!(s.handle_command(&insert("a.js", 3)), 1);
    assert_eq!(s.handle_command(&insert("a.js", 5)), 2);
    assert_eq!(s.breakpoints().len(), 2);
    assert_eq!(s.handle_command(&remove("a.js", 3)), 0);
    assert_eq!(s.handle_command(&remove("a.js", 3)), ERR_NO_SUCH_BREAKPOINT);
    assert_eq!(s.breakpoints().len(), 1);
    assert_eq!(s.breakpoints()[0].line, 5);

    // Handles keep counting after removals.
    assert_eq!(s.handle_command(&insert("a.js", 3)), 3);
}

#[test]
fn test_protocol_version_needs_no_version_field() {
    let mut s = DebugSession::new();
    assert_eq!(s.handle_command(r#"{"command":"protocolVersion"}"#), PROTOCOL_VERSION);
}

#[test]
fn test_version_and_command_errors() {
    let mut s = DebugSession::new();
    assert_eq!(
        s.handle_command(r#"{"command":"insertBreakpoint","version":2,"fullName":"a.js","lineNumber":1}"#),
        ERR_VERSION_MISMATCH
    );
    assert!(s.breakpoints().is_empty());
    assert_eq!(s.handle_command(r#"{"command":"evaluate","version":1}"#), ERR_UNKNOWN_COMMAND);
    assert_eq!(s.handle_command(PREPARE_STEP), 0);
    assert!(s.is_stepping());
}

#[test]
fn test_detach_cancels_stepping() {
    let mut s = DebugSession::new();
    s.attach();
    s.handle_command(PREPARE_STEP);
    s.detach();
    assert!(!s.attached);
    assert!(!s.is_stepping());
}

// ── Engine hooks ──────────────────────────────────────────────────────

#[test]
fn test_breakpoint_fires_on_its_line() {
    let mut engine = engine();
    engine.debug.attach();
    let hits = recorder(&mut engine.debug);
    engine.debug.handle_command(
        r#"{"command":"insertBreakpoint","version":1,"fullName":"a.js","lineNumber":2,"condition":"x > 1"}"#,
    );
    assert_eq!(engine.run(three_lines("a.js")), Ok(JsValue::integer(3)));

    let hits = hits.borrow();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].handle, 1);
    assert_eq!(hits[0].line, 2);
    assert_eq!(hits[0].file, "a.js");
    assert_eq!(hits[0].function, "main");
    assert_eq!(hits[0].condition, "x > 1");
    assert!(!hits[0].step);
}

#[test]
fn test_no_breaks_while_detached() {
    let mut engine = engine();
    let hits = recorder(&mut engine.debug);
    engine.debug.handle_command(&insert("a.js", 2));
    engine.run(three_lines("a.js")).unwrap();
    assert!(hits.borrow().is_empty());
}

#[test]
fn test_code_without_a_file_never_breaks() {
    let mut engine = engine();
    engine.debug.attach();
    let hits = recorder(&mut engine.debug);
    engine.debug.handle_command(&insert("", 2));
    engine.debug.handle_command(PREPARE_STEP);
    engine.run(three_lines("")).unwrap();
    assert!(hits.borrow().is_empty());
    assert!(engine.debug.is_stepping());
}

#[test]
fn test_step_stops_at_the_next_line() {
    let mut engine = engine();
    engine.debug.attach();
    let hits = recorder(&mut engine.debug);
    engine.debug.handle_command(PREPARE_STEP);
    engine.run(three_lines("a.js")).unwrap();

    let hits = hits.borrow();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].step);
    assert_eq!(hits[0].handle, 0);
    assert_eq!(hits[0].line, 1);
    assert!(!engine.debug.is_stepping());
}

#[test]
fn test_pause_at_next_debugger_statement() {
    let mut b = FunctionBuilder::new("paused").file("p.js");
    b.init_stack_frame(0);
    b.line(1);
    b.debug(2);
    b.debug(3);
    let v = b.add_constant(JsValue::Null);
    b.ret(v);
    let f = b.build().unwrap();

    let mut engine = engine();
    engine.debug.attach();
    let hits = recorder(&mut engine.debug);
    engine.debug.pause_at_next_opportunity = true;
    engine.run(f).unwrap();

    let hits = hits.borrow();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].line, 2);
    assert_eq!(hits[0].function, "paused");
    assert!(!engine.debug.pause_at_next_opportunity);
}

#[test]
fn test_function_entry_and_exit_are_reported() {
    let inner = {
        let mut b = FunctionBuilder::new("inner");
        b.init_stack_frame(0);
        let v = b.add_constant(JsValue::integer(5));
        b.ret(v);
        b.build().unwrap()
    };
    let mut b = FunctionBuilder::new("outer");
    b.init_stack_frame(1 + 3);
    let f = b.add_nested(inner);
    b.load_closure(Operand::temp(0), f);
    b.call(OpCode::CallValue, Operand::temp(0), CallTarget::Value(Operand::temp(0)), 1, 0);
    b.ret(Operand::temp(0));
    let outer = b.build().unwrap();

    let events = Rc::new(RefCell::new(Vec::<String>::new()));
    let resolved = Rc::new(RefCell::new(0));
    let mut engine = engine();
    {
        let sink = events.clone();
        engine.debug.on_entering_function(move |name| sink.borrow_mut().push(format!("enter {}", name)));
        let sink = events.clone();
        engine
            .debug
            .on_leaving_function(move |name, v| sink.borrow_mut().push(format!("leave {} {}", name, v)));
        let count = resolved.clone();
        engine.debug.on_resolve_pending(move || *count.borrow_mut() += 1);
    }

    // Detached: only pending breakpoints are resolved.
    engine.run(outer.clone()).unwrap();
    assert!(events.borrow().is_empty());
    assert_eq!(*resolved.borrow(), 2);

    engine.debug.attach();
    assert_eq!(engine.run(outer), Ok(JsValue::integer(5)));
    assert_eq!(
        *events.borrow(),
        vec!["enter outer", "enter inner", "leave inner 5", "leave outer 5"]
    );
    assert_eq!(*resolved.borrow(), 4);
}
