//! The register interpreter.
//!
//! [`execute`] runs one activation to completion. Each operand names a
//! (scope, slot) pair resolved through a small scope table built on entry:
//! constants, temporaries, then an (arguments, locals) pair per activation
//! level, innermost first.
//!
//! Every opcode has one handler function. The `Switch` strategy selects it
//! with a `match`, the `JumpTable` strategy indexes a table built once from
//! [`OpCode::ALL`]; both run the same handlers.

use std::rc::Rc;

use crate::runner::ds::heap::{ContextHandle, ContextKind, SlotArea};
use crate::runner::ds::object_property::PropertyKey;
use crate::runner::ds::operations::test_and_comparison::strict_equality_comparison;
use crate::runner::ds::operations::type_conversion::to_boolean;
use crate::runner::ds::value::JsValue;
use crate::runner::vm::bytecode::{AluOp, CompiledFunction, Instruction, OpCode, Operand, NO_TARGET};
use crate::runner::vm::call_data::{CallDataRef, ScopedStackFrame, CALL_DATA_HEADER};
use crate::runner::vm::config::DispatchStrategy;
use crate::runner::vm::engine::ExecutionEngine;
use crate::runner::vm::error::VmError;
use crate::runner::vm::lookup;
use crate::runner::vm::runtime;

/// What to run: a function, the scope it closes over, its call record (none
/// for top-level code) and `this`.
pub struct Activation {
    pub function: Rc<CompiledFunction>,
    pub scope: ContextHandle,
    pub call_data: Option<CallDataRef>,
    pub this: JsValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SlotBase {
    Constants,
    Temps,
    /// Arguments of a call record on the value stack.
    Stack { base: usize, len: usize },
    /// Slots of a heap context; stores go through the write barrier.
    Heap(ContextHandle, SlotArea),
    Empty,
}

struct Frame {
    function: Rc<CompiledFunction>,
    ip: usize,
    scopes: Vec<SlotBase>,
    stack_base: usize,
    stack_size: Option<usize>,
    handler: Option<usize>,
    this: JsValue,
    call_data: Option<CallDataRef>,
    /// Head of the scope chain; moves with catch and `with` scopes.
    context: ContextHandle,
    own_context: Option<ContextHandle>,
    closure_scope: ContextHandle,
}

impl Frame {
    fn new(activation: Activation) -> Self {
        Frame {
            function: activation.function,
            ip: 0,
            scopes: vec![],
            stack_base: 0,
            stack_size: None,
            handler: None,
            this: activation.this,
            call_data: activation.call_data,
            context: activation.scope,
            own_context: None,
            closure_scope: activation.scope,
        }
    }

    fn build_scopes(&mut self, engine: &ExecutionEngine) {
        let mut scopes = vec![SlotBase::Constants, SlotBase::Temps];
        match (self.own_context, self.call_data) {
            (Some(h), _) => {
                scopes.push(SlotBase::Heap(h, SlotArea::Arguments));
                scopes.push(SlotBase::Heap(h, SlotArea::Locals));
            }
            (None, Some(cd)) => {
                let formals = self.function.metadata.formal_names.len();
                scopes.push(SlotBase::Stack {
                    base: cd.arg_slot(0),
                    len: cd.argc.max(formals),
                });
                scopes.push(SlotBase::Empty);
            }
            (None, None) => {
                scopes.push(SlotBase::Empty);
                scopes.push(SlotBase::Empty);
            }
        }
        let mut at = Some(self.closure_scope);
        while let Some(h) = at {
            let ctx = match engine.heap.context(h) {
                Some(ctx) => ctx,
                None => break,
            };
            match ctx.kind {
                ContextKind::Call => {
                    scopes.push(SlotBase::Heap(h, SlotArea::Arguments));
                    scopes.push(SlotBase::Heap(h, SlotArea::Locals));
                }
                _ => {
                    scopes.push(SlotBase::Empty);
                    scopes.push(SlotBase::Empty);
                }
            }
            at = ctx.outer;
        }
        self.scopes = scopes;
    }

    /// Frees the contexts this activation pushed, from the innermost out to
    /// the scope it closes over. Captured ones stay.
    fn release_contexts(&self, engine: &mut ExecutionEngine) {
        let mut at = Some(self.context);
        while let Some(h) = at {
            if h == self.closure_scope {
                break;
            }
            at = engine.heap.context(h).and_then(|c| c.outer);
            engine.heap.release(h);
        }
    }

    fn is_strict(&self) -> bool {
        self.function.metadata.is_strict
    }

    fn name(&self, index: u32) -> Result<String, VmError> {
        self.function
            .runtime_string(index)
            .map(|s| s.to_string())
            .ok_or_else(|| VmError::Internal(format!("runtime string {} out of range", index)))
    }

    fn key(&self, index: u32) -> Result<PropertyKey, VmError> {
        Ok(PropertyKey::from_name(&self.name(index)?))
    }

    fn scope(&self, op: Operand) -> Result<SlotBase, VmError> {
        self.scopes
            .get(op.scope as usize)
            .copied()
            .ok_or_else(|| VmError::Internal(format!("operand {} names a missing scope", op)))
    }
}

enum Step {
    Next,
    Exception,
    Return(JsValue),
}

type Handler = fn(&mut ExecutionEngine, &mut Frame, &Instruction) -> Result<Step, VmError>;

lazy_static! {
    static ref JUMP_TABLE: Vec<Handler> = OpCode::ALL.iter().map(|op| handler_for(*op)).collect();
}

/// Throws a runtime error into the current activation.
macro_rules! js_try {
    ($engine:expr, $e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => {
                $engine.throw_error(e);
                return Ok(Step::Exception);
            }
        }
    };
}

fn read(engine: &ExecutionEngine, frame: &Frame, op: Operand) -> Result<JsValue, VmError> {
    let i = op.index as usize;
    let value = match frame.scope(op)? {
        SlotBase::Constants => frame.function.constants.get(i).cloned(),
        SlotBase::Temps => match frame.stack_size {
            Some(n) if i < n => engine.stack.get(frame.stack_base + i).cloned(),
            Some(_) => None,
            None => return Err(VmError::Internal("stack frame not initialised".to_string())),
        },
        SlotBase::Stack { base, len } if i < len => engine.stack.get(base + i).cloned(),
        SlotBase::Heap(h, area) => engine.heap.load(h, area, i).cloned(),
        _ => None,
    };
    value.ok_or_else(|| VmError::Internal(format!("operand {} out of range", op)))
}

/// Plain store. Heap slots get the barrier when it is active.
fn write(engine: &mut ExecutionEngine, frame: &Frame, op: Operand, value: JsValue) -> Result<(), VmError> {
    let i = op.index as usize;
    let stored = match frame.scope(op)? {
        SlotBase::Temps => match frame.stack_size {
            Some(n) => i < n && engine.stack.set(frame.stack_base + i, value),
            None => return Err(VmError::Internal("stack frame not initialised".to_string())),
        },
        SlotBase::Stack { base, len } => i < len && engine.stack.set(base + i, value),
        SlotBase::Heap(h, area) => engine.store_context_slot(h, area, i, value),
        SlotBase::Constants | SlotBase::Empty => false,
    };
    if stored {
        Ok(())
    } else {
        Err(VmError::Internal(format!("cannot store to operand {}", op)))
    }
}

/// Store of a computed value: a pending exception wins over the store.
fn store(engine: &mut ExecutionEngine, frame: &Frame, op: Operand, value: JsValue) -> Result<Step, VmError> {
    if engine.has_exception {
        return Ok(Step::Exception);
    }
    write(engine, frame, op, value)?;
    Ok(Step::Next)
}

fn checked(engine: &ExecutionEngine) -> Step {
    if engine.has_exception {
        Step::Exception
    } else {
        Step::Next
    }
}

/// The call record a call instruction laid out in its temporaries.
fn call_data(frame: &Frame, instr: &Instruction) -> Result<CallDataRef, VmError> {
    let argc = instr.argc as usize;
    let start = instr.c.index as usize;
    match frame.stack_size {
        Some(n) if instr.c.scope == Operand::TEMPS && start + CALL_DATA_HEADER + argc <= n => {
            Ok(CallDataRef::at(frame.stack_base + start, argc))
        }
        _ => Err(VmError::Internal(format!(
            "call record at {} with {} arguments is outside the stack frame",
            instr.c, argc
        ))),
    }
}

fn jump_target(frame: &Frame, index: u32) -> Result<usize, VmError> {
    let target = index as usize;
    if target > frame.function.code.len() {
        return Err(VmError::Internal(format!("jump target {} out of range", target)));
    }
    Ok(target)
}

// ── Moves & names ──

fn op_move(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let v = read(engine, frame, instr.a)?;
    write(engine, frame, instr.result, v)?;
    Ok(Step::Next)
}

fn op_load_runtime_string(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let s = frame.name(instr.index)?;
    write(engine, frame, instr.result, JsValue::String(s))?;
    Ok(Step::Next)
}

fn op_load_closure(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let nested = frame
        .function
        .nested
        .get(instr.index as usize)
        .cloned()
        .ok_or_else(|| VmError::Internal(format!("nested function {} out of range", instr.index)))?;
    let f = js_try!(engine, runtime::closure(engine, nested, frame.context));
    store(engine, frame, instr.result, f)
}

fn op_load_this(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let this = frame.this.clone();
    write(engine, frame, instr.result, this)?;
    Ok(Step::Next)
}

fn op_load_name(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let name = frame.name(instr.index)?;
    let v = runtime::get_activation_property(engine, frame.context, &name)?;
    store(engine, frame, instr.result, v)
}

fn op_store_name(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let name = frame.name(instr.index)?;
    let v = read(engine, frame, instr.c)?;
    runtime::set_activation_property(engine, frame.context, &name, v, frame.is_strict())?;
    Ok(checked(engine))
}

fn op_get_global_lookup(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let function = frame.function.clone();
    let v = lookup::get_global(engine, &function, instr.index)?;
    store(engine, frame, instr.result, v)
}

// ── Elements & properties ──

fn op_load_element(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let base = read(engine, frame, instr.a)?;
    let index = read(engine, frame, instr.b)?;
    let v = runtime::get_element(engine, &base, &index)?;
    store(engine, frame, instr.result, v)
}

fn op_load_element_lookup(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let base = read(engine, frame, instr.a)?;
    let index = read(engine, frame, instr.b)?;
    let function = frame.function.clone();
    let v = lookup::get_indexed(engine, &function, instr.index, &base, &index)?;
    store(engine, frame, instr.result, v)
}

fn op_store_element(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let base = read(engine, frame, instr.a)?;
    let index = read(engine, frame, instr.b)?;
    let v = read(engine, frame, instr.c)?;
    runtime::set_element(engine, &base, &index, v, frame.is_strict())?;
    Ok(checked(engine))
}

fn op_store_element_lookup(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let base = read(engine, frame, instr.a)?;
    let index = read(engine, frame, instr.b)?;
    let v = read(engine, frame, instr.c)?;
    let function = frame.function.clone();
    lookup::set_indexed(engine, &function, instr.index, &base, &index, v)?;
    Ok(checked(engine))
}

fn op_load_property(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let base = read(engine, frame, instr.a)?;
    let key = frame.key(instr.index)?;
    let v = runtime::get_property(engine, &base, &key)?;
    store(engine, frame, instr.result, v)
}

fn op_get_lookup(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let base = read(engine, frame, instr.a)?;
    let function = frame.function.clone();
    let v = lookup::get(engine, &function, instr.index, &base)?;
    store(engine, frame, instr.result, v)
}

fn op_store_property(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let base = read(engine, frame, instr.a)?;
    let key = frame.key(instr.index)?;
    let v = read(engine, frame, instr.c)?;
    runtime::set_property(engine, &base, &key, v, frame.is_strict())?;
    Ok(checked(engine))
}

fn op_set_lookup(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let base = read(engine, frame, instr.a)?;
    let v = read(engine, frame, instr.c)?;
    let function = frame.function.clone();
    lookup::set(engine, &function, instr.index, &base, v)?;
    Ok(checked(engine))
}

fn op_init_stack_frame(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let size = instr.index as usize;
    frame.stack_base = engine.stack.alloc(size);
    frame.stack_size = Some(size);
    Ok(Step::Next)
}

// ── Calls ──
//
// Every call shape leaves its result through `store`, which diverts to the
// handler when the callee threw.

fn op_call_value(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let cd = call_data(frame, instr)?;
    let f = read(engine, frame, instr.a)?;
    let v = runtime::call_record(engine, cd, f, JsValue::Undefined)?;
    store(engine, frame, instr.result, v)
}

fn op_call_property(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let cd = call_data(frame, instr)?;
    let base = read(engine, frame, instr.a)?;
    let key = frame.key(instr.index)?;
    let v = runtime::call_property(engine, &base, &key, cd)?;
    store(engine, frame, instr.result, v)
}

fn op_call_property_lookup(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let cd = call_data(frame, instr)?;
    let base = read(engine, frame, instr.a)?;
    let function = frame.function.clone();
    let f = lookup::get(engine, &function, instr.index, &base)?;
    if engine.has_exception {
        return Ok(Step::Exception);
    }
    let v = runtime::call_record(engine, cd, f, base)?;
    store(engine, frame, instr.result, v)
}

fn op_call_element(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let cd = call_data(frame, instr)?;
    let base = read(engine, frame, instr.a)?;
    let index = read(engine, frame, instr.b)?;
    let v = runtime::call_element(engine, &base, &index, cd)?;
    store(engine, frame, instr.result, v)
}

fn op_call_activation_property(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let cd = call_data(frame, instr)?;
    let name = frame.name(instr.index)?;
    let v = runtime::call_activation_property(engine, frame.context, &name, cd)?;
    store(engine, frame, instr.result, v)
}

fn op_call_global_lookup(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let cd = call_data(frame, instr)?;
    let function = frame.function.clone();
    let f = lookup::get_global(engine, &function, instr.index)?;
    if engine.has_exception {
        return Ok(Step::Exception);
    }
    let v = runtime::call_record(engine, cd, f, JsValue::Undefined)?;
    store(engine, frame, instr.result, v)
}

// ── Construct ──

fn op_create_value(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let cd = call_data(frame, instr)?;
    let f = read(engine, frame, instr.a)?;
    let v = runtime::construct_record(engine, cd, f)?;
    store(engine, frame, instr.result, v)
}

fn op_create_property(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let cd = call_data(frame, instr)?;
    let base = read(engine, frame, instr.a)?;
    let key = frame.key(instr.index)?;
    let f = runtime::get_property(engine, &base, &key)?;
    if engine.has_exception {
        return Ok(Step::Exception);
    }
    let v = runtime::construct_record(engine, cd, f)?;
    store(engine, frame, instr.result, v)
}

fn op_construct_property_lookup(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let cd = call_data(frame, instr)?;
    let base = read(engine, frame, instr.a)?;
    let function = frame.function.clone();
    let f = lookup::get(engine, &function, instr.index, &base)?;
    if engine.has_exception {
        return Ok(Step::Exception);
    }
    let v = runtime::construct_record(engine, cd, f)?;
    store(engine, frame, instr.result, v)
}

fn op_create_activation_property(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let cd = call_data(frame, instr)?;
    let name = frame.name(instr.index)?;
    let f = runtime::get_activation_property(engine, frame.context, &name)?;
    if engine.has_exception {
        return Ok(Step::Exception);
    }
    let v = runtime::construct_record(engine, cd, f)?;
    store(engine, frame, instr.result, v)
}

fn op_construct_global_lookup(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let cd = call_data(frame, instr)?;
    let function = frame.function.clone();
    let f = lookup::get_global(engine, &function, instr.index)?;
    if engine.has_exception {
        return Ok(Step::Exception);
    }
    let v = runtime::construct_record(engine, cd, f)?;
    store(engine, frame, instr.result, v)
}

// ── Exceptions ──

fn op_set_exception_handler(_engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    frame.handler = if instr.index == NO_TARGET {
        None
    } else {
        Some(jump_target(frame, instr.index)?)
    };
    Ok(Step::Next)
}

fn op_throw(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let v = read(engine, frame, instr.a)?;
    engine.throw(v);
    Ok(Step::Exception)
}

fn op_get_exception(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let v = engine.take_exception().unwrap_or(JsValue::Undefined);
    write(engine, frame, instr.result, v)?;
    Ok(Step::Next)
}

fn op_set_exception(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let v = read(engine, frame, instr.a)?;
    engine.exception_value = v;
    engine.has_exception = true;
    Ok(Step::Next)
}

fn op_unwind_exception(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    store(engine, frame, instr.result, JsValue::Undefined)
}

// ── Scopes ──

fn op_push_catch_scope(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let name = frame.name(instr.index)?;
    frame.context = js_try!(engine, runtime::push_catch_scope(engine, frame.context, &name));
    Ok(Step::Next)
}

fn op_push_scope(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let v = read(engine, frame, instr.a)?;
    frame.context = js_try!(engine, runtime::push_with_scope(engine, frame.context, &v));
    Ok(Step::Next)
}

fn op_pop_scope(engine: &mut ExecutionEngine, frame: &mut Frame, _instr: &Instruction) -> Result<Step, VmError> {
    let inner = frame.context;
    frame.context = runtime::pop_scope(engine, inner);
    if frame.context != inner && Some(inner) != frame.own_context {
        engine.heap.release(inner);
    }
    Ok(Step::Next)
}

fn op_create_call_context(engine: &mut ExecutionEngine, frame: &mut Frame, _instr: &Instruction) -> Result<Step, VmError> {
    if frame.own_context.is_none() {
        let h = js_try!(
            engine,
            runtime::create_call_context(engine, &frame.function, frame.context, frame.call_data)
        );
        frame.own_context = Some(h);
        frame.context = h;
        frame.build_scopes(engine);
    }
    Ok(Step::Next)
}

// ── Builtins ──

fn op_foreach_iterator_object(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let v = read(engine, frame, instr.a)?;
    let it = runtime::foreach_iterator_object(engine, &v)?;
    store(engine, frame, instr.result, it)
}

fn op_foreach_next_property_name(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let it = read(engine, frame, instr.a)?;
    let name = runtime::foreach_next_property_name(&it);
    store(engine, frame, instr.result, name)
}

fn op_delete_member(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let base = read(engine, frame, instr.a)?;
    let key = frame.key(instr.index)?;
    let v = runtime::delete_member(engine, &base, &key, frame.is_strict())?;
    store(engine, frame, instr.result, v)
}

fn op_delete_subscript(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let base = read(engine, frame, instr.a)?;
    let index = read(engine, frame, instr.b)?;
    let v = runtime::delete_subscript(engine, &base, &index, frame.is_strict())?;
    store(engine, frame, instr.result, v)
}

fn op_delete_name(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let name = frame.name(instr.index)?;
    let v = runtime::delete_name(engine, frame.context, &name)?;
    store(engine, frame, instr.result, v)
}

fn op_typeof_name(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let name = frame.name(instr.index)?;
    let v = runtime::typeof_name(engine, frame.context, &name)?;
    store(engine, frame, instr.result, v)
}

fn op_typeof_value(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let v = read(engine, frame, instr.a)?;
    store(engine, frame, instr.result, runtime::typeof_value(&v))
}

fn op_declare_var(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let name = frame.name(instr.index)?;
    runtime::declare_var(engine, frame.context, &name, instr.argc == 1);
    Ok(Step::Next)
}

fn read_temps(engine: &ExecutionEngine, frame: &Frame, first: Operand, count: u32) -> Result<Vec<JsValue>, VmError> {
    (0..count)
        .map(|i| read(engine, frame, Operand::temp(first.index + i)))
        .collect()
}

fn op_define_array(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let values = read_temps(engine, frame, instr.c, instr.argc)?;
    let array = runtime::define_array(engine, values)?;
    store(engine, frame, instr.result, array)
}

fn op_define_object_literal(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let values = read_temps(engine, frame, instr.c, instr.argc)?;
    let pairs = values
        .chunks(2)
        .map(|kv| {
            (
                kv[0].clone(),
                kv.get(1).cloned().unwrap_or(JsValue::Undefined),
            )
        })
        .collect();
    let o = runtime::define_object_literal(engine, pairs)?;
    store(engine, frame, instr.result, o)
}

fn op_setup_arguments_object(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let function = frame.function.clone();
    let args = runtime::setup_arguments_object(engine, &function, frame.call_data, frame.own_context)?;
    store(engine, frame, instr.result, args)
}

fn op_convert_this_to_object(engine: &mut ExecutionEngine, frame: &mut Frame, _instr: &Instruction) -> Result<Step, VmError> {
    let this = js_try!(
        engine,
        runtime::convert_this_to_object(engine, &frame.this, frame.is_strict())
    );
    if let Some(cd) = frame.call_data {
        engine.stack.set(cd.this_slot(), this.clone());
    }
    frame.this = this;
    Ok(Step::Next)
}

// ── Jumps ──

fn op_jump(_engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    frame.ip = jump_target(frame, instr.index)?;
    Ok(Step::Next)
}

fn op_jump_eq(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    if to_boolean(&read(engine, frame, instr.a)?) {
        frame.ip = jump_target(frame, instr.index)?;
    }
    Ok(Step::Next)
}

fn op_jump_ne(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    if !to_boolean(&read(engine, frame, instr.a)?) {
        frame.ip = jump_target(frame, instr.index)?;
    }
    Ok(Step::Next)
}

fn op_jump_strict_equal(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let a = read(engine, frame, instr.a)?;
    let b = read(engine, frame, instr.b)?;
    if strict_equality_comparison(&a, &b) {
        frame.ip = jump_target(frame, instr.index)?;
    }
    Ok(Step::Next)
}

fn op_jump_strict_not_equal(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let a = read(engine, frame, instr.a)?;
    let b = read(engine, frame, instr.b)?;
    if !strict_equality_comparison(&a, &b) {
        frame.ip = jump_target(frame, instr.index)?;
    }
    Ok(Step::Next)
}

// ── Unary ──

fn op_not(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let a = read(engine, frame, instr.a)?;
    store(engine, frame, instr.result, runtime::not(&a))
}

fn op_plus(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let a = read(engine, frame, instr.a)?;
    let v = js_try!(engine, runtime::plus(&a));
    store(engine, frame, instr.result, v)
}

fn op_minus(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let a = read(engine, frame, instr.a)?;
    let v = js_try!(engine, runtime::minus(&a));
    store(engine, frame, instr.result, v)
}

fn op_complement(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let a = read(engine, frame, instr.a)?;
    let v = js_try!(engine, runtime::complement(&a));
    store(engine, frame, instr.result, v)
}

fn update(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction, delta: f64, prefix: bool) -> Result<Step, VmError> {
    let a = read(engine, frame, instr.a)?;
    let (old, new) = js_try!(engine, runtime::increment(&a, delta));
    if let Step::Exception = store(engine, frame, instr.a, new.clone())? {
        return Ok(Step::Exception);
    }
    store(engine, frame, instr.result, if prefix { new } else { old })
}

fn op_pre_increment(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    update(engine, frame, instr, 1.0, true)
}

fn op_pre_decrement(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    update(engine, frame, instr, -1.0, true)
}

fn op_post_increment(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    update(engine, frame, instr, 1.0, false)
}

fn op_post_decrement(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    update(engine, frame, instr, -1.0, false)
}

// ── Binary ──

fn op_binop(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let op = AluOp::from_u32(instr.index)
        .ok_or_else(|| VmError::Internal(format!("unknown ALU operation {}", instr.index)))?;
    let a = read(engine, frame, instr.a)?;
    let b = read(engine, frame, instr.b)?;
    let v = runtime::binop(engine, op, &a, &b)?;
    store(engine, frame, instr.result, v)
}

fn alu(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction, op: AluOp, b: JsValue) -> Result<Step, VmError> {
    let a = read(engine, frame, instr.a)?;
    let v = js_try!(engine, runtime::alu(op, &a, &b));
    store(engine, frame, instr.result, v)
}

macro_rules! alu_handlers {
    (@operand $engine:ident, $frame:ident, $instr:ident, reg) => {
        read($engine, $frame, $instr.b)?
    };
    (@operand $engine:ident, $frame:ident, $instr:ident, imm) => {
        JsValue::integer($instr.imm() as i64)
    };
    ($($name:ident => $op:expr, $operand:ident;)*) => {
        $(
            fn $name(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
                let b = alu_handlers!(@operand engine, frame, instr, $operand);
                alu(engine, frame, instr, $op, b)
            }
        )*
    };
}

alu_handlers! {
    op_add => AluOp::Add, reg;
    op_sub => AluOp::Sub, reg;
    op_mul => AluOp::Mul, reg;
    op_bit_and => AluOp::BitAnd, reg;
    op_bit_or => AluOp::BitOr, reg;
    op_bit_xor => AluOp::BitXor, reg;
    op_shr => AluOp::Shr, reg;
    op_shl => AluOp::Shl, reg;
    op_bit_and_const => AluOp::BitAnd, imm;
    op_bit_or_const => AluOp::BitOr, imm;
    op_bit_xor_const => AluOp::BitXor, imm;
    op_shr_const => AluOp::Shr, imm;
    op_shl_const => AluOp::Shl, imm;
}

// ── Exit & debugging ──

fn op_ret(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    Ok(Step::Return(read(engine, frame, instr.a)?))
}

fn op_debug(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let line = instr.index as usize;
    engine.frames.set_line(line);
    let function = &frame.function;
    if engine.debug.pause_at_next_opportunity {
        engine.debug.pause_at_next_opportunity = false;
        engine.debug.pause(&function.file, line, &function.name);
    }
    if engine.debug.attached {
        engine.debug.check_for_break(&function.file, line, &function.name);
    }
    Ok(Step::Next)
}

fn op_line(engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    let line = instr.index as usize;
    engine.frames.set_line(line);
    if engine.debug.attached {
        engine
            .debug
            .check_for_break(&frame.function.file, line, &frame.function.name);
    }
    Ok(Step::Next)
}

fn handler_for(op: OpCode) -> Handler {
    match op {
        OpCode::Move => op_move,
        OpCode::LoadRuntimeString => op_load_runtime_string,
        OpCode::LoadClosure => op_load_closure,
        OpCode::LoadThis => op_load_this,
        OpCode::LoadName => op_load_name,
        OpCode::StoreName => op_store_name,
        OpCode::GetGlobalLookup => op_get_global_lookup,
        OpCode::LoadElement => op_load_element,
        OpCode::LoadElementLookup => op_load_element_lookup,
        OpCode::StoreElement => op_store_element,
        OpCode::StoreElementLookup => op_store_element_lookup,
        OpCode::LoadProperty => op_load_property,
        OpCode::GetLookup => op_get_lookup,
        OpCode::StoreProperty => op_store_property,
        OpCode::SetLookup => op_set_lookup,
        OpCode::InitStackFrame => op_init_stack_frame,
        OpCode::CallValue => op_call_value,
        OpCode::CallProperty => op_call_property,
        OpCode::CallPropertyLookup => op_call_property_lookup,
        OpCode::CallElement => op_call_element,
        OpCode::CallActivationProperty => op_call_activation_property,
        OpCode::CallGlobalLookup => op_call_global_lookup,
        OpCode::CreateValue => op_create_value,
        OpCode::CreateProperty => op_create_property,
        OpCode::ConstructPropertyLookup => op_construct_property_lookup,
        OpCode::CreateActivationProperty => op_create_activation_property,
        OpCode::ConstructGlobalLookup => op_construct_global_lookup,
        OpCode::SetExceptionHandler => op_set_exception_handler,
        OpCode::CallBuiltinThrow => op_throw,
        OpCode::GetException => op_get_exception,
        OpCode::SetException => op_set_exception,
        OpCode::CallBuiltinUnwindException => op_unwind_exception,
        OpCode::CallBuiltinPushCatchScope => op_push_catch_scope,
        OpCode::CallBuiltinPushScope => op_push_scope,
        OpCode::CallBuiltinPopScope => op_pop_scope,
        OpCode::CreateCallContext => op_create_call_context,
        OpCode::CallBuiltinForeachIteratorObject => op_foreach_iterator_object,
        OpCode::CallBuiltinForeachNextPropertyName => op_foreach_next_property_name,
        OpCode::CallBuiltinDeleteMember => op_delete_member,
        OpCode::CallBuiltinDeleteSubscript => op_delete_subscript,
        OpCode::CallBuiltinDeleteName => op_delete_name,
        OpCode::CallBuiltinTypeofName => op_typeof_name,
        OpCode::CallBuiltinTypeofValue => op_typeof_value,
        OpCode::CallBuiltinDeclareVar => op_declare_var,
        OpCode::CallBuiltinDefineArray => op_define_array,
        OpCode::CallBuiltinDefineObjectLiteral => op_define_object_literal,
        OpCode::CallBuiltinSetupArgumentsObject => op_setup_arguments_object,
        OpCode::CallBuiltinConvertThisToObject => op_convert_this_to_object,
        OpCode::Jump => op_jump,
        OpCode::JumpEq => op_jump_eq,
        OpCode::JumpNe => op_jump_ne,
        OpCode::JumpStrictEqual => op_jump_strict_equal,
        OpCode::JumpStrictNotEqual => op_jump_strict_not_equal,
        OpCode::UNot | OpCode::UNotBool => op_not,
        OpCode::UPlus => op_plus,
        OpCode::UMinus => op_minus,
        OpCode::UCompl | OpCode::UComplInt => op_complement,
        OpCode::PreIncrement => op_pre_increment,
        OpCode::PreDecrement => op_pre_decrement,
        OpCode::PostIncrement => op_post_increment,
        OpCode::PostDecrement => op_post_decrement,
        OpCode::Binop => op_binop,
        OpCode::Add => op_add,
        OpCode::BitAnd => op_bit_and,
        OpCode::BitOr => op_bit_or,
        OpCode::BitXor => op_bit_xor,
        OpCode::Shr => op_shr,
        OpCode::Shl => op_shl,
        OpCode::BitAndConst => op_bit_and_const,
        OpCode::BitOrConst => op_bit_or_const,
        OpCode::BitXorConst => op_bit_xor_const,
        OpCode::ShrConst => op_shr_const,
        OpCode::ShlConst => op_shl_const,
        OpCode::Mul => op_mul,
        OpCode::Sub => op_sub,
        OpCode::Ret => op_ret,
        OpCode::Debug => op_debug,
        OpCode::Line => op_line,
    }
}

/// Decodes a raw opcode byte.
pub fn decode(byte: u8) -> Result<OpCode, VmError> {
    OpCode::from_u8(byte).ok_or_else(|| VmError::Internal(format!("unknown opcode {}", byte)))
}

fn dispatch(strategy: DispatchStrategy, engine: &mut ExecutionEngine, frame: &mut Frame, instr: &Instruction) -> Result<Step, VmError> {
    match strategy {
        DispatchStrategy::Switch => handler_for(instr.op)(engine, frame, instr),
        DispatchStrategy::JumpTable => {
            let handler = JUMP_TABLE
                .get(instr.op as usize)
                .ok_or_else(|| VmError::Internal(format!("unknown opcode {}", instr.op as u8)))?;
            handler(engine, frame, instr)
        }
    }
}

fn run(engine: &mut ExecutionEngine, frame: &mut Frame) -> Result<JsValue, VmError> {
    let strategy = engine.config.dispatch;
    let trace = engine.config.trace_instructions;
    loop {
        let instr = match frame.function.code.get(frame.ip) {
            Some(instr) => *instr,
            None => return Ok(JsValue::Undefined),
        };
        if trace {
            tracing::trace!(
                "{}:{:04} {:?} result={} a={} b={} c={} index={}",
                frame.function.name,
                frame.ip,
                instr.op,
                instr.result,
                instr.a,
                instr.b,
                instr.c,
                instr.index
            );
        }
        frame.ip += 1;
        match dispatch(strategy, engine, frame, &instr)? {
            Step::Next => {}
            Step::Return(v) => return Ok(v),
            Step::Exception => match frame.handler {
                Some(handler) => frame.ip = handler,
                None => return Err(VmError::Unhandled),
            },
        }
    }
}

/// Runs an activation until it returns or throws past its last handler.
///
/// An exception nobody handled yields `Err(VmError::Unhandled)` with the
/// exception still pending on the engine.
pub fn execute(engine: &mut ExecutionEngine, activation: Activation) -> Result<JsValue, VmError> {
    engine.debug.resolve_pending();

    let frames = engine.frames.clone();
    let _record = ScopedStackFrame::new(&frames, Some(activation.scope));
    frames.set_function(activation.function.clone());
    frames.set_call_data(activation.call_data);

    let mark = engine.stack.mark();
    let mut frame = Frame::new(activation);
    if frame.function.metadata.requires_execution_context && frame.call_data.is_some() {
        match runtime::create_call_context(engine, &frame.function, frame.closure_scope, frame.call_data) {
            Ok(h) => {
                frame.own_context = Some(h);
                frame.context = h;
            }
            Err(e) => {
                engine.throw_error(e);
                return Err(VmError::Unhandled);
            }
        }
    }
    frame.build_scopes(engine);

    let attached = engine.debug.attached;
    if attached {
        engine.debug.entering_function(&frame.function.name);
    }
    let result = run(engine, &mut frame);
    if attached {
        let returned = match &result {
            Ok(v) => v.clone(),
            Err(_) => JsValue::Undefined,
        };
        engine.debug.leaving_function(&frame.function.name, &returned);
    }
    frame.release_contexts(engine);
    engine.stack.truncate(mark);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::vm::bytecode::FunctionBuilder;
    use crate::runner::vm::config::EngineConfig;

    #[test]
    fn test_jump_table_covers_every_opcode() {
        assert_eq!(JUMP_TABLE.len(), OpCode::ALL.len());
    }

    #[test]
    fn test_unknown_opcode_byte() {
        assert!(matches!(decode(250), Err(VmError::Internal(_))));
        assert_eq!(decode(0), Ok(OpCode::Move));
    }

    #[test]
    fn test_temps_before_init_is_internal_error() {
        let mut b = FunctionBuilder::new("f");
        b.ret(Operand::temp(0));
        let f = b.build().unwrap();
        let mut engine = ExecutionEngine::new(EngineConfig::default());
        assert!(matches!(engine.run(f), Err(VmError::Internal(_))));
    }

    #[test]
    fn test_falling_off_the_end_returns_undefined() {
        let mut b = FunctionBuilder::new("f");
        b.init_stack_frame(1);
        let f = b.build().unwrap();
        let mut engine = ExecutionEngine::new(EngineConfig::default());
        assert_eq!(engine.run(f), Ok(JsValue::Undefined));
        assert!(engine.stack.is_empty());
    }

    #[test]
    fn test_store_to_constant_is_internal_error() {
        let mut b = FunctionBuilder::new("f");
        let one = b.add_constant(JsValue::integer(1));
        b.mov(one, one);
        let f = b.build().unwrap();
        let mut engine = ExecutionEngine::new(EngineConfig::default());
        assert!(matches!(engine.run(f), Err(VmError::Internal(_))));
    }
}
