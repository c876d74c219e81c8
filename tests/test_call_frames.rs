extern crate justvm;

use std::rc::Rc;

use justvm::runner::ds::error::JErrorType;
use justvm::runner::ds::object::ObjectKind;
use justvm::runner::ds::object_property::PropertyKey;
use justvm::runner::ds::value::JsValue;
use justvm::runner::vm::bytecode::{CallTarget, CompiledFunction, FunctionBuilder, FunctionMetadata, OpCode, Operand};
use justvm::runner::vm::call_data::{CallDataRef, JsCall, StackScope, CALL_DATA_HEADER, RESERVED_ARGUMENT_COUNT};
use justvm::runner::vm::config::EngineConfig;
use justvm::runner::vm::runtime;
use justvm::runner::vm::{ExecutionEngine, VmError};

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(EngineConfig::default())
}

fn closure_of(engine: &mut ExecutionEngine, nested: Rc<CompiledFunction>) -> JsValue {
    let mut b = FunctionBuilder::new("load");
    b.init_stack_frame(1);
    let f = b.add_nested(nested);
    b.load_closure(Operand::temp(0), f);
    b.ret(Operand::temp(0));
    engine.run(b.build().unwrap()).unwrap()
}

fn with_formals(formals: &[&str]) -> FunctionMetadata {
    FunctionMetadata {
        formal_names: formals.iter().map(|s| s.to_string()).collect(),
        has_simple_parameters: true,
        ..FunctionMetadata::default()
    }
}

fn argc_native(_engine: &mut ExecutionEngine, call_data: &CallDataRef) -> Result<JsValue, JErrorType> {
    Ok(JsValue::integer(call_data.argc as i64))
}

fn this_native(engine: &mut ExecutionEngine, call_data: &CallDataRef) -> Result<JsValue, JErrorType> {
    Ok(call_data.this_value(&engine.stack))
}

/// Appends its first argument to the global `log` array.
fn record_native(engine: &mut ExecutionEngine, call_data: &CallDataRef) -> Result<JsValue, JErrorType> {
    let entry = call_data.argument(&engine.stack, 0);
    match engine.global_get("log") {
        Some(JsValue::Object(log)) => {
            if let ObjectKind::Array(items) = &mut log.borrow_mut().kind {
                items.push(entry);
            }
            Ok(JsValue::Undefined)
        }
        _ => Err(JErrorType::TypeError("log is not an array".to_string())),
    }
}

/// Renders the native frame list as `name@file:line` entries, innermost
/// first.
fn where_native(engine: &mut ExecutionEngine, _call_data: &CallDataRef) -> Result<JsValue, JErrorType> {
    let trace = engine
        .stack_trace()
        .iter()
        .map(|e| format!("{}@{}:{}", e.function, e.file, e.line.unwrap_or(0)))
        .collect::<Vec<_>>()
        .join(" <- ");
    Ok(JsValue::from(trace))
}

// ── Records ───────────────────────────────────────────────────────────

#[test]
fn test_allocated_record_layout() {
    let mut engine = engine();
    let f = JsValue::Object(engine.install_native("argc", argc_native));
    {
        let mut scope = StackScope::new(&mut engine);
        let mut call = JsCall::new(&mut scope, Some(f.clone()), 2);
        call.set_this(JsValue::Null);
        call.set_arg(0, JsValue::integer(10));
        call.set_arg(1, JsValue::integer(20));
        // Past the reserved capacity: dropped.
        call.set_arg(RESERVED_ARGUMENT_COUNT, JsValue::integer(30));
        let cd = call.call_data();
        assert_eq!(cd.capacity, RESERVED_ARGUMENT_COUNT);
        assert_eq!(call.call(), Ok(JsValue::integer(2)));

        assert_eq!(scope.stack.len(), CALL_DATA_HEADER + RESERVED_ARGUMENT_COUNT);
        assert_eq!(cd.tag(&scope.stack), JsValue::integer(2));
        assert_eq!(cd.function(&scope.stack), f);
        assert_eq!(cd.this_value(&scope.stack), JsValue::Null);
        assert_eq!(cd.arguments(&scope.stack), vec![JsValue::integer(10), JsValue::integer(20)]);
    }
    assert!(engine.stack.is_empty());
}

#[test]
fn test_nested_scopes_release_in_order() {
    let mut engine = engine();
    let mut outer = StackScope::new(&mut engine);
    CallDataRef::alloc(&mut outer.stack, 1);
    let after_outer = outer.stack.len();
    {
        let mut inner = StackScope::new(&mut outer);
        CallDataRef::alloc(&mut inner.stack, 10);
        assert_eq!(inner.stack.len(), after_outer + CALL_DATA_HEADER + 10);
    }
    assert_eq!(outer.stack.len(), after_outer);
    drop(outer);
    assert!(engine.stack.is_empty());
}

#[test]
fn test_host_call_passes_this() {
    let mut engine = engine();
    let f = JsValue::Object(engine.install_native("self", this_native));
    let receiver = JsValue::Object(engine.new_object());
    assert_eq!(engine.call_function(&f, receiver.clone(), &[]), Ok(receiver));
    assert!(engine.stack.is_empty());
}

#[test]
fn test_short_record_is_widened_for_formals() {
    // function (a, b, c) { return typeof c; } called with one argument.
    let callee = {
        let mut b = FunctionBuilder::new("three").metadata(with_formals(&["a", "b", "c"]));
        b.init_stack_frame(1);
        b.builtin(OpCode::CallBuiltinTypeofValue, Operand::temp(0), Operand::argument(0, 2), None);
        b.ret(Operand::temp(0));
        b.build().unwrap()
    };
    let mut b = FunctionBuilder::new("main");
    b.init_stack_frame(1 + CALL_DATA_HEADER as u32 + 1);
    let f = b.add_nested(callee);
    b.load_closure(Operand::temp(0), f);
    let one = b.add_constant(JsValue::integer(1));
    b.mov(FunctionBuilder::call_arg(1, 0), one);
    b.call(OpCode::CallValue, Operand::temp(0), CallTarget::Value(Operand::temp(0)), 1, 1);
    b.ret(Operand::temp(0));
    let mut engine = engine();
    assert_eq!(engine.run(b.build().unwrap()), Ok(JsValue::from("undefined")));
    assert!(engine.stack.is_empty());
}

#[test]
fn test_construct_allocates_this_from_prototype() {
    // function Point(x) { this.x = x; }
    let point = {
        let mut b = FunctionBuilder::new("Point").metadata(with_formals(&["x"]));
        b.init_stack_frame(1);
        b.load_this(Operand::temp(0));
        b.store_property(Operand::temp(0), "x", Operand::argument(0, 0));
        let undefined = b.add_constant(JsValue::Undefined);
        b.ret(undefined);
        b.build().unwrap()
    };
    let mut engine = engine();
    let point = closure_of(&mut engine, point);
    let proto = runtime::get_property(&mut engine, &point, &PropertyKey::from("prototype")).unwrap();

    let made = {
        let mut scope = StackScope::new(&mut engine);
        let mut call = JsCall::new(&mut scope, Some(point.clone()), 1);
        call.set_arg(0, JsValue::integer(4));
        call.call_as_constructor().unwrap()
    };
    let object = made.as_object().unwrap().clone();
    let own_proto = object.borrow().prototype().map(JsValue::Object);
    assert_eq!(own_proto, Some(proto));
    assert_eq!(runtime::get_property(&mut engine, &made, &PropertyKey::from("x")), Ok(JsValue::integer(4)));
}

// ── Ordering ──────────────────────────────────────────────────────────

/// Emits `record(entry)` with its record at temp 1.
fn emit_record(b: &mut FunctionBuilder, entry: &str) {
    let v = b.add_constant(JsValue::from(entry));
    b.mov(FunctionBuilder::call_arg(1, 0), v);
    b.call(OpCode::CallGlobalLookup, Operand::temp(0), CallTarget::Name("record"), 1, 1);
}

#[test]
fn test_callee_completes_before_caller_continues() {
    let middle = {
        let mut b = FunctionBuilder::new("middle");
        b.init_stack_frame(1 + CALL_DATA_HEADER as u32 + 1);
        emit_record(&mut b, "b");
        emit_record(&mut b, "c");
        b.ret(Operand::temp(0));
        b.build().unwrap()
    };
    let mut b = FunctionBuilder::new("main");
    b.init_stack_frame(1 + CALL_DATA_HEADER as u32 + 1);
    emit_record(&mut b, "a");
    let f = b.add_nested(middle);
    b.load_closure(Operand::temp(0), f);
    b.call(OpCode::CallValue, Operand::temp(0), CallTarget::Value(Operand::temp(0)), 1, 0);
    emit_record(&mut b, "d");
    b.ret(Operand::temp(0));

    let mut engine = engine();
    engine.install_native("record", record_native);
    let log = engine.new_array(vec![]);
    engine.global_set("log", JsValue::Object(log.clone()));
    assert_eq!(engine.run(b.build().unwrap()), Ok(JsValue::Undefined));

    let entries = match &log.borrow().kind {
        ObjectKind::Array(items) => items.clone(),
        _ => vec![],
    };
    let expected: Vec<JsValue> = ["a", "b", "c", "d"].iter().map(|s| JsValue::from(*s)).collect();
    assert_eq!(entries, expected);
}

// ── Frames ────────────────────────────────────────────────────────────

#[test]
fn test_stack_trace_walks_active_frames() {
    let inner = {
        let mut b = FunctionBuilder::new("inner").file("a.js");
        b.init_stack_frame(1 + CALL_DATA_HEADER as u32);
        b.line(7);
        b.call(OpCode::CallGlobalLookup, Operand::temp(0), CallTarget::Name("where"), 1, 0);
        b.ret(Operand::temp(0));
        b.build().unwrap()
    };
    let mut b = FunctionBuilder::new("main").file("a.js");
    b.init_stack_frame(1 + CALL_DATA_HEADER as u32);
    b.line(2);
    let f = b.add_nested(inner);
    b.load_closure(Operand::temp(0), f);
    b.call(OpCode::CallValue, Operand::temp(0), CallTarget::Value(Operand::temp(0)), 1, 0);
    b.ret(Operand::temp(0));

    let mut engine = engine();
    engine.install_native("where", where_native);
    assert_eq!(
        engine.run(b.build().unwrap()),
        Ok(JsValue::from("inner@a.js:7 <- main@a.js:2"))
    );
    assert_eq!(engine.frames.depth(), 0);
    assert!(engine.stack_trace().is_empty());
}

#[test]
fn test_frames_are_popped_after_an_exception() {
    let thrower = {
        let mut b = FunctionBuilder::new("thrower");
        b.init_stack_frame(0);
        let v = b.add_constant(JsValue::from("out"));
        b.throw(v);
        b.build().unwrap()
    };
    let mut engine = engine();
    let f = closure_of(&mut engine, thrower);
    assert_eq!(engine.call_function(&f, JsValue::Undefined, &[]), Err(VmError::Unhandled));
    assert_eq!(engine.frames.depth(), 0);
    assert!(engine.stack.is_empty());
}

#[test]
fn test_runaway_recursion_is_a_range_error() {
    // function r() { return r(); }
    let r = {
        let mut b = FunctionBuilder::new("r");
        b.init_stack_frame(1 + CALL_DATA_HEADER as u32);
        b.call(OpCode::CallGlobalLookup, Operand::temp(0), CallTarget::Name("r"), 1, 0);
        b.ret(Operand::temp(0));
        b.build().unwrap()
    };
    let mut engine = ExecutionEngine::new(EngineConfig {
        max_call_depth: 10,
        ..EngineConfig::default()
    });
    let r = closure_of(&mut engine, r);
    engine.global_set("r", r.clone());

    assert_eq!(engine.call_function(&r, JsValue::Undefined, &[]), Err(VmError::Unhandled));
    let e = engine.take_exception().unwrap();
    assert_eq!(
        runtime::get_property(&mut engine, &e, &PropertyKey::from("name")),
        Ok(JsValue::from("RangeError"))
    );
    assert_eq!(
        runtime::get_property(&mut engine, &e, &PropertyKey::from("message")),
        Ok(JsValue::from("Maximum call stack size exceeded"))
    );
    assert!(engine.stack.is_empty());
    assert_eq!(engine.frames.depth(), 0);

    // The engine stays usable once the exception is consumed.
    let one = {
        let mut b = FunctionBuilder::new("one");
        b.init_stack_frame(0);
        let v = b.add_constant(JsValue::integer(1));
        b.ret(v);
        b.build().unwrap()
    };
    assert_eq!(engine.run(one), Ok(JsValue::integer(1)));
}
