//! Runtime entry points the interpreter calls into.
//!
//! Entry points that can throw report the exception through the engine's
//! pending-exception flag and return `Ok(JsValue::Undefined)`, so callers
//! check `engine.has_exception` after every call. `Err` is reserved for
//! internal errors.

use std::collections::HashSet;
use std::rc::Rc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::heap::{ContextHandle, ContextKind, Heap, HeapContext, SlotArea, VALUE_BYTES};
use crate::runner::ds::object::{FunctionObject, JsObject, JsObjectType, ObjectKind};
use crate::runner::ds::object_property::{PropertyDescriptor, PropertyKey};
use crate::runner::ds::operations::test_and_comparison::{
    abstract_equality_comparison, abstract_relational_comparison, strict_equality_comparison,
};
use crate::runner::ds::operations::type_conversion::{
    get_type, to_boolean, to_int32, to_number, to_primitive, to_property_key, to_string, to_uint32,
    PreferredType, TYPE_STR_UNDEFINED,
};
use crate::runner::ds::value::JsValue;
use crate::runner::vm::bytecode::{AluOp, CompiledFunction};
use crate::runner::vm::call_data::{CallDataRef, JsCall, StackScope};
use crate::runner::vm::engine::ExecutionEngine;
use crate::runner::vm::error::VmError;
use crate::runner::vm::interpreter::{self, Activation};

/// Largest gap an array store may open past the current length before the
/// index is stored as an ordinary property instead.
const MAX_ARRAY_GAP: usize = 1 << 16;

fn raise(engine: &mut ExecutionEngine, e: JErrorType) -> Result<JsValue, VmError> {
    engine.throw_error(e);
    Ok(JsValue::Undefined)
}

fn raise_unit(engine: &mut ExecutionEngine, e: JErrorType) -> Result<(), VmError> {
    engine.throw_error(e);
    Ok(())
}

// ── Property protocol ───────────────────────────────────────

/// Properties that are not stored in the property table: array elements and
/// length, string characters and length, mapped arguments.
fn exotic_get(heap: &Heap, o: &JsObject, key: &PropertyKey) -> Option<JsValue> {
    match (&o.kind, key) {
        (ObjectKind::Array(elements), PropertyKey::Int(i)) => elements.get(*i as usize).cloned(),
        (ObjectKind::Array(elements), PropertyKey::Str(s)) if s == "length" => {
            Some(JsValue::integer(elements.len() as i64))
        }
        (ObjectKind::String(s), PropertyKey::Int(i)) => {
            s.chars().nth(*i as usize).map(|c| JsValue::String(c.to_string()))
        }
        (ObjectKind::String(s), PropertyKey::Str(k)) if k == "length" => {
            Some(JsValue::integer(s.chars().count() as i64))
        }
        (
            ObjectKind::Arguments {
                mapped: Some(h),
                mapped_count,
            },
            PropertyKey::Int(i),
        ) if (*i as usize) < *mapped_count => heap.load(*h, SlotArea::Arguments, *i as usize).cloned(),
        _ => None,
    }
}

fn has_own(heap: &Heap, o: &JsObject, key: &PropertyKey) -> bool {
    exotic_get(heap, o, key).is_some() || o.has_own_property(key)
}

pub fn has_property(engine: &ExecutionEngine, o: &JsObjectType, key: &PropertyKey) -> bool {
    let mut current = Some(o.clone());
    while let Some(obj) = current {
        let b = obj.borrow();
        if has_own(&engine.heap, &b, key) {
            return true;
        }
        current = b.prototype();
    }
    false
}

/// Reads `key` from `o` or its prototypes. Accessors run with `receiver`
/// as `this`.
pub fn get_from_object(
    engine: &mut ExecutionEngine,
    o: &JsObjectType,
    key: &PropertyKey,
    receiver: &JsValue,
) -> Result<JsValue, VmError> {
    let mut current = Some(o.clone());
    while let Some(obj) = current {
        let (getter, next) = {
            let b = obj.borrow();
            if let Some(v) = exotic_get(&engine.heap, &b, key) {
                return Ok(v);
            }
            match b.get_own_property(key) {
                Some(PropertyDescriptor::Data { value, .. }) => return Ok(value.clone()),
                Some(PropertyDescriptor::Accessor { get, .. }) => (Some(get.clone()), None),
                None => (None, b.prototype()),
            }
        };
        if let Some(getter) = getter {
            return match getter {
                Some(g) => call_with_this(engine, &JsValue::Object(g), receiver.clone(), &[]),
                None => Ok(JsValue::Undefined),
            };
        }
        current = next;
    }
    Ok(JsValue::Undefined)
}

pub fn get_property(engine: &mut ExecutionEngine, base: &JsValue, key: &PropertyKey) -> Result<JsValue, VmError> {
    match base {
        JsValue::Undefined | JsValue::Null => raise(
            engine,
            JErrorType::TypeError(format!("Cannot read property '{}' of {}", key, base)),
        ),
        JsValue::Object(o) => get_from_object(engine, o, key, base),
        JsValue::String(s) => match key {
            PropertyKey::Int(i) => Ok(s
                .chars()
                .nth(*i as usize)
                .map(|c| JsValue::String(c.to_string()))
                .unwrap_or(JsValue::Undefined)),
            PropertyKey::Str(k) if k == "length" => Ok(JsValue::integer(s.chars().count() as i64)),
            _ => {
                let proto = engine.intrinsics.object_prototype.clone();
                get_from_object(engine, &proto, key, base)
            }
        },
        _ => {
            let proto = engine.intrinsics.object_prototype.clone();
            get_from_object(engine, &proto, key, base)
        }
    }
}

enum Exotic {
    Handled,
    ReadOnly,
    Mapped(ContextHandle, usize, JsValue),
    Ordinary(JsValue),
}

fn put_exotic(engine: &mut ExecutionEngine, o: &JsObjectType, key: &PropertyKey, value: JsValue) -> Result<Exotic, JErrorType> {
    let mut b = o.borrow_mut();
    match (&mut b.kind, key) {
        (ObjectKind::Array(elements), PropertyKey::Int(i)) => {
            let i = *i as usize;
            if i < elements.len() {
                elements[i] = value;
                return Ok(Exotic::Handled);
            }
            if i - elements.len() <= MAX_ARRAY_GAP {
                engine.heap.allocate((i + 1 - elements.len()) * VALUE_BYTES)?;
                elements.resize(i + 1, JsValue::Undefined);
                elements[i] = value;
                return Ok(Exotic::Handled);
            }
            Ok(Exotic::Ordinary(value))
        }
        (ObjectKind::Array(elements), PropertyKey::Str(s)) if s == "length" => {
            let n = to_uint32(&value)? as usize;
            if n > elements.len() {
                if n - elements.len() > MAX_ARRAY_GAP {
                    return Err(JErrorType::RangeError("Invalid array length".to_string()));
                }
                engine.heap.allocate((n - elements.len()) * VALUE_BYTES)?;
            } else {
                engine.heap.deallocate((elements.len() - n) * VALUE_BYTES);
            }
            elements.resize(n, JsValue::Undefined);
            Ok(Exotic::Handled)
        }
        (ObjectKind::String(s), PropertyKey::Int(i)) if (*i as usize) < s.chars().count() => Ok(Exotic::ReadOnly),
        (ObjectKind::String(_), PropertyKey::Str(k)) if k == "length" => Ok(Exotic::ReadOnly),
        (
            ObjectKind::Arguments {
                mapped: Some(h),
                mapped_count,
            },
            PropertyKey::Int(i),
        ) if (*i as usize) < *mapped_count => Ok(Exotic::Mapped(*h, *i as usize, value)),
        _ => Ok(Exotic::Ordinary(value)),
    }
}

fn reject(engine: &mut ExecutionEngine, key: &PropertyKey, strict: bool) -> Result<(), VmError> {
    if strict {
        raise_unit(
            engine,
            JErrorType::TypeError(format!("Cannot assign to read only property '{}' of object", key)),
        )
    } else {
        Ok(())
    }
}

fn call_setter(engine: &mut ExecutionEngine, setter: JsObjectType, receiver: &JsValue, value: JsValue) -> Result<(), VmError> {
    call_with_this(engine, &JsValue::Object(setter), receiver.clone(), &[value])?;
    Ok(())
}

/// Writes `key` on `o`, honouring read-only properties and setters found on
/// the prototype chain.
pub fn put(
    engine: &mut ExecutionEngine,
    o: &JsObjectType,
    key: &PropertyKey,
    value: JsValue,
    strict: bool,
) -> Result<(), VmError> {
    let value = match put_exotic(engine, o, key, value) {
        Ok(Exotic::Handled) => return Ok(()),
        Ok(Exotic::ReadOnly) => return reject(engine, key, strict),
        Ok(Exotic::Mapped(h, i, value)) => {
            engine.store_context_slot(h, SlotArea::Arguments, i, value);
            return Ok(());
        }
        Ok(Exotic::Ordinary(value)) => value,
        Err(e) => return raise_unit(engine, e),
    };
    let receiver = JsValue::Object(o.clone());
    let own = o.borrow().get_own_property(key).cloned();
    match own {
        Some(PropertyDescriptor::Data {
            writable: true,
            enumerable,
            configurable,
            ..
        }) => {
            o.borrow_mut().define_own_property(
                key.clone(),
                PropertyDescriptor::Data {
                    value,
                    writable: true,
                    enumerable,
                    configurable,
                },
            );
            Ok(())
        }
        Some(PropertyDescriptor::Accessor { set: Some(f), .. }) => call_setter(engine, f, &receiver, value),
        Some(_) => reject(engine, key, strict),
        None => {
            let mut current = o.borrow().prototype();
            while let Some(p) = current {
                let inherited = p.borrow().get_own_property(key).cloned();
                match inherited {
                    Some(PropertyDescriptor::Data { writable: false, .. }) => return reject(engine, key, strict),
                    Some(PropertyDescriptor::Accessor { set: Some(f), .. }) => {
                        return call_setter(engine, f, &receiver, value)
                    }
                    Some(PropertyDescriptor::Accessor { set: None, .. }) => return reject(engine, key, strict),
                    Some(PropertyDescriptor::Data { .. }) => break,
                    None => current = p.borrow().prototype(),
                }
            }
            if !o.borrow().is_extensible() {
                return reject(engine, key, strict);
            }
            if let Err(e) = engine.heap.allocate(VALUE_BYTES) {
                return raise_unit(engine, e);
            }
            o.borrow_mut().define_own_property(key.clone(), PropertyDescriptor::data(value));
            Ok(())
        }
    }
}

pub fn set_property(
    engine: &mut ExecutionEngine,
    base: &JsValue,
    key: &PropertyKey,
    value: JsValue,
    strict: bool,
) -> Result<(), VmError> {
    match base {
        JsValue::Undefined | JsValue::Null => raise_unit(
            engine,
            JErrorType::TypeError(format!("Cannot set property '{}' of {}", key, base)),
        ),
        JsValue::Object(o) => put(engine, o, key, value, strict),
        _ => Ok(()),
    }
}

pub fn get_element(engine: &mut ExecutionEngine, base: &JsValue, index: &JsValue) -> Result<JsValue, VmError> {
    if base.is_nullish() {
        return raise(
            engine,
            JErrorType::TypeError(format!("Cannot read property '{}' of {}", index, base)),
        );
    }
    match to_property_key(index) {
        Ok(key) => get_property(engine, base, &key),
        Err(e) => raise(engine, e),
    }
}

pub fn set_element(
    engine: &mut ExecutionEngine,
    base: &JsValue,
    index: &JsValue,
    value: JsValue,
    strict: bool,
) -> Result<(), VmError> {
    if base.is_nullish() {
        return raise_unit(
            engine,
            JErrorType::TypeError(format!("Cannot set property '{}' of {}", index, base)),
        );
    }
    match to_property_key(index) {
        Ok(key) => set_property(engine, base, &key, value, strict),
        Err(e) => raise_unit(engine, e),
    }
}

pub fn get_global(engine: &mut ExecutionEngine, key: &PropertyKey) -> Result<JsValue, VmError> {
    let global = engine.global_object();
    if !has_property(engine, &global, key) {
        return raise(engine, JErrorType::ReferenceError(format!("{} is not defined", key)));
    }
    get_from_object(engine, &global, key, &JsValue::Object(global.clone()))
}

// ── Scope chain ─────────────────────────────────────────────

enum Binding {
    Slot(ContextHandle, SlotArea, usize),
    CatchParameter(ContextHandle),
    Object(JsObjectType),
    Unresolved,
}

fn resolve_binding(engine: &ExecutionEngine, context: ContextHandle, name: &str) -> Binding {
    let key = PropertyKey::from_name(name);
    let mut at = Some(context);
    while let Some(handle) = at {
        let ctx = match engine.heap.context(handle) {
            Some(c) => c,
            None => break,
        };
        match &ctx.kind {
            ContextKind::With { object } => {
                if has_property(engine, object, &key) {
                    return Binding::Object(object.clone());
                }
            }
            ContextKind::Catch { name: n, .. } => {
                if n == name {
                    return Binding::CatchParameter(handle);
                }
            }
            ContextKind::Call => {
                if let Some(f) = &ctx.function {
                    if let Some(i) = f.metadata.local_names.iter().position(|n| n == name) {
                        return Binding::Slot(handle, SlotArea::Locals, i);
                    }
                    if let Some(i) = f.metadata.formal_names.iter().rposition(|n| n == name) {
                        return Binding::Slot(handle, SlotArea::Arguments, i);
                    }
                }
            }
            ContextKind::Global => {
                let global = engine.global_object();
                if has_property(engine, &global, &key) {
                    return Binding::Object(global);
                }
            }
        }
        at = ctx.outer;
    }
    Binding::Unresolved
}

pub fn get_activation_property(engine: &mut ExecutionEngine, context: ContextHandle, name: &str) -> Result<JsValue, VmError> {
    match resolve_binding(engine, context, name) {
        Binding::Slot(h, area, i) => Ok(engine.heap.load(h, area, i).cloned().unwrap_or(JsValue::Undefined)),
        Binding::CatchParameter(h) => Ok(match engine.heap.context(h).map(|c| &c.kind) {
            Some(ContextKind::Catch { value, .. }) => value.clone(),
            _ => JsValue::Undefined,
        }),
        Binding::Object(o) => {
            let receiver = JsValue::Object(o.clone());
            get_from_object(engine, &o, &PropertyKey::from_name(name), &receiver)
        }
        Binding::Unresolved => raise(engine, JErrorType::ReferenceError(format!("{} is not defined", name))),
    }
}

pub fn set_activation_property(
    engine: &mut ExecutionEngine,
    context: ContextHandle,
    name: &str,
    value: JsValue,
    strict: bool,
) -> Result<(), VmError> {
    match resolve_binding(engine, context, name) {
        Binding::Slot(h, area, i) => {
            engine.store_context_slot(h, area, i, value);
            Ok(())
        }
        Binding::CatchParameter(h) => {
            if let Some(ContextKind::Catch { value: slot, .. }) = engine.heap.context_mut(h).map(|c| &mut c.kind) {
                *slot = value;
            }
            Ok(())
        }
        Binding::Object(o) => put(engine, &o, &PropertyKey::from_name(name), value, strict),
        Binding::Unresolved => {
            if strict {
                return raise_unit(engine, JErrorType::ReferenceError(format!("{} is not defined", name)));
            }
            let global = engine.global_object();
            put(engine, &global, &PropertyKey::from_name(name), value, false)
        }
    }
}

pub fn typeof_name(engine: &mut ExecutionEngine, context: ContextHandle, name: &str) -> Result<JsValue, VmError> {
    if let Binding::Unresolved = resolve_binding(engine, context, name) {
        return Ok(JsValue::from(TYPE_STR_UNDEFINED));
    }
    let v = get_activation_property(engine, context, name)?;
    Ok(JsValue::from(get_type(&v)))
}

pub fn typeof_value(value: &JsValue) -> JsValue {
    JsValue::from(get_type(value))
}

pub fn delete_name(engine: &mut ExecutionEngine, context: ContextHandle, name: &str) -> Result<JsValue, VmError> {
    Ok(JsValue::Boolean(match resolve_binding(engine, context, name) {
        Binding::Slot(..) | Binding::CatchParameter(_) => false,
        Binding::Object(o) => delete_own(engine, &o, &PropertyKey::from_name(name)),
        Binding::Unresolved => true,
    }))
}

/// Creates a `var` binding in the nearest function or global scope. Function
/// contexts already hold a slot for each of their variables.
pub fn declare_var(engine: &mut ExecutionEngine, context: ContextHandle, name: &str, deletable: bool) {
    let mut at = Some(context);
    while let Some(handle) = at {
        let (kind_is_global, kind_is_call, outer) = match engine.heap.context(handle) {
            Some(c) => (
                matches!(c.kind, ContextKind::Global),
                matches!(c.kind, ContextKind::Call),
                c.outer,
            ),
            None => return,
        };
        if kind_is_call {
            return;
        }
        if kind_is_global {
            let global = engine.global_object();
            let key = PropertyKey::from_name(name);
            if !global.borrow().has_own_property(&key) {
                global.borrow_mut().define_own_property(
                    key,
                    PropertyDescriptor::Data {
                        value: JsValue::Undefined,
                        writable: true,
                        enumerable: true,
                        configurable: deletable,
                    },
                );
            }
            return;
        }
        at = outer;
    }
}

pub fn push_catch_scope(engine: &mut ExecutionEngine, context: ContextHandle, name: &str) -> Result<ContextHandle, JErrorType> {
    let value = engine.take_exception().unwrap_or(JsValue::Undefined);
    engine.heap.new_context(HeapContext::new(
        ContextKind::Catch {
            name: name.to_string(),
            value,
        },
        Some(context),
    ))
}

pub fn push_with_scope(engine: &mut ExecutionEngine, context: ContextHandle, value: &JsValue) -> Result<ContextHandle, JErrorType> {
    let object = to_object(engine, value)?;
    engine
        .heap
        .new_context(HeapContext::new(ContextKind::With { object }, Some(context)))
}

/// The context enclosing `context`. The outermost context stays put.
pub fn pop_scope(engine: &ExecutionEngine, context: ContextHandle) -> ContextHandle {
    engine
        .heap
        .context(context)
        .and_then(|c| c.outer)
        .unwrap_or(context)
}

/// Moves an activation into a heap call context: arguments are copied out of
/// the call record, locals start undefined.
pub fn create_call_context(
    engine: &mut ExecutionEngine,
    function: &Rc<CompiledFunction>,
    scope: ContextHandle,
    call_data: Option<CallDataRef>,
) -> Result<ContextHandle, JErrorType> {
    let mut ctx = HeapContext::new(ContextKind::Call, Some(scope));
    let formals = function.metadata.formal_names.len();
    if let Some(cd) = call_data {
        ctx.args = (0..cd.argc.max(formals))
            .map(|i| cd.argument(&engine.stack, i))
            .collect();
    } else {
        ctx.args = vec![JsValue::Undefined; formals];
    }
    ctx.locals = vec![JsValue::Undefined; function.metadata.local_names.len()];
    ctx.function = Some(function.clone());
    engine.heap.new_context(ctx)
}

// ── Calls ───────────────────────────────────────────────────

fn function_of(value: &JsValue) -> Option<FunctionObject> {
    match value {
        JsValue::Object(o) => match &o.borrow().kind {
            ObjectKind::Function(f) => Some(f.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Calls the callee of `call_data` with its `this` and arguments.
pub fn call_function(engine: &mut ExecutionEngine, call_data: CallDataRef) -> Result<JsValue, VmError> {
    let callee = call_data.function(&engine.stack);
    match function_of(&callee) {
        Some(FunctionObject::Script { function, scope }) => call_script(engine, function, scope, call_data),
        Some(FunctionObject::Native { function, .. }) => match function(engine, &call_data) {
            Ok(v) => Ok(v),
            Err(e) => raise(engine, e),
        },
        None => raise(engine, JErrorType::TypeError(format!("{} is not a function", callee))),
    }
}

fn call_script(
    engine: &mut ExecutionEngine,
    function: Rc<CompiledFunction>,
    scope: ContextHandle,
    call_data: CallDataRef,
) -> Result<JsValue, VmError> {
    if engine.call_depth >= engine.config.max_call_depth {
        return raise(
            engine,
            JErrorType::RangeError("Maximum call stack size exceeded".to_string()),
        );
    }
    let mark = engine.stack.mark();
    let formals = function.metadata.formal_names.len();
    let call_data = if call_data.capacity < formals {
        // Too small for the formals: copy into a fresh record.
        let mut fresh = CallDataRef::alloc(&mut engine.stack, formals);
        fresh.argc = call_data.argc;
        engine.stack.set(fresh.base, JsValue::integer(call_data.argc as i64));
        engine.stack.set(fresh.function_slot(), call_data.function(&engine.stack));
        engine.stack.set(fresh.this_slot(), call_data.this_value(&engine.stack));
        for i in 0..call_data.argc {
            let v = call_data.argument(&engine.stack, i);
            engine.stack.set(fresh.arg_slot(i), v);
        }
        fresh
    } else {
        for i in call_data.argc..formals {
            engine.stack.set(call_data.arg_slot(i), JsValue::Undefined);
        }
        call_data
    };

    engine.call_depth += 1;
    let this = call_data.this_value(&engine.stack);
    let result = interpreter::execute(
        engine,
        Activation {
            function,
            scope,
            call_data: Some(call_data),
            this,
        },
    );
    engine.call_depth -= 1;
    engine.stack.truncate(mark);
    match result {
        Err(VmError::Unhandled) => Ok(JsValue::Undefined),
        other => other,
    }
}

/// `new callee(...)` for the call record: a fresh object inheriting from the
/// callee's `prototype` becomes `this`; an object result replaces it.
pub fn construct(engine: &mut ExecutionEngine, call_data: CallDataRef) -> Result<JsValue, VmError> {
    let callee = call_data.function(&engine.stack);
    if function_of(&callee).is_none() {
        return raise(engine, JErrorType::TypeError(format!("{} is not a constructor", callee)));
    }
    let proto = get_property(engine, &callee, &PropertyKey::from("prototype"))?;
    if engine.has_exception {
        return Ok(JsValue::Undefined);
    }
    let proto = match proto {
        JsValue::Object(p) => p,
        _ => engine.intrinsics.object_prototype.clone(),
    };
    let object = match engine.allocate_object(ObjectKind::Ordinary, Some(proto)) {
        Ok(o) => o,
        Err(e) => return raise(engine, e),
    };
    engine.stack.set(call_data.this_slot(), JsValue::Object(object.clone()));
    let result = call_function(engine, call_data)?;
    if engine.has_exception {
        return Ok(JsValue::Undefined);
    }
    Ok(match result {
        JsValue::Object(_) => result,
        _ => JsValue::Object(object),
    })
}

/// Calls `function` from native code with an explicit `this`.
pub fn call_with_this(
    engine: &mut ExecutionEngine,
    function: &JsValue,
    this: JsValue,
    args: &[JsValue],
) -> Result<JsValue, VmError> {
    let mut scope = StackScope::new(engine);
    let mut call = JsCall::new(&mut scope, Some(function.clone()), args.len());
    call.set_this(this);
    for (i, a) in args.iter().enumerate() {
        call.set_arg(i, a.clone());
    }
    call.call()
}

fn prepare_call(engine: &mut ExecutionEngine, call_data: CallDataRef, function: JsValue, this: JsValue) {
    engine.stack.set(call_data.base, JsValue::integer(call_data.argc as i64));
    engine.stack.set(call_data.function_slot(), function);
    engine.stack.set(call_data.this_slot(), this);
}

/// Fills the header of a record laid out by bytecode and calls it.
pub fn call_record(
    engine: &mut ExecutionEngine,
    call_data: CallDataRef,
    function: JsValue,
    this: JsValue,
) -> Result<JsValue, VmError> {
    prepare_call(engine, call_data, function, this);
    call_function(engine, call_data)
}

pub fn construct_record(engine: &mut ExecutionEngine, call_data: CallDataRef, function: JsValue) -> Result<JsValue, VmError> {
    prepare_call(engine, call_data, function, JsValue::Undefined);
    construct(engine, call_data)
}

/// `base.key(...)`.
pub fn call_property(
    engine: &mut ExecutionEngine,
    base: &JsValue,
    key: &PropertyKey,
    call_data: CallDataRef,
) -> Result<JsValue, VmError> {
    let f = get_property(engine, base, key)?;
    if engine.has_exception {
        return Ok(JsValue::Undefined);
    }
    if function_of(&f).is_none() {
        return raise(
            engine,
            JErrorType::TypeError(format!("Property '{}' of object {} is not a function", key, base)),
        );
    }
    call_record(engine, call_data, f, base.clone())
}

pub fn call_element(
    engine: &mut ExecutionEngine,
    base: &JsValue,
    index: &JsValue,
    call_data: CallDataRef,
) -> Result<JsValue, VmError> {
    match to_property_key(index) {
        Ok(key) => call_property(engine, base, &key, call_data),
        Err(e) => raise(engine, e),
    }
}

/// `name(...)` resolved on the scope chain. A name found on a `with` object
/// is called with that object as `this`.
pub fn call_activation_property(
    engine: &mut ExecutionEngine,
    context: ContextHandle,
    name: &str,
    call_data: CallDataRef,
) -> Result<JsValue, VmError> {
    let this = match resolve_binding(engine, context, name) {
        Binding::Object(o) if !Rc::ptr_eq(&o, &engine.global_object()) => JsValue::Object(o),
        _ => JsValue::Undefined,
    };
    let f = get_activation_property(engine, context, name)?;
    if engine.has_exception {
        return Ok(JsValue::Undefined);
    }
    call_record(engine, call_data, f, this)
}

// ── Objects ─────────────────────────────────────────────────

pub fn to_object(engine: &mut ExecutionEngine, value: &JsValue) -> Result<JsObjectType, JErrorType> {
    let kind = match value {
        JsValue::Object(o) => return Ok(o.clone()),
        JsValue::Undefined | JsValue::Null => {
            return Err(JErrorType::TypeError(
                "Cannot convert undefined or null to object".to_string(),
            ))
        }
        JsValue::Boolean(b) => ObjectKind::Boolean(*b),
        JsValue::Number(n) => ObjectKind::Number(n.to_f64()),
        JsValue::String(s) => ObjectKind::String(s.to_string()),
        JsValue::Symbol(s) => ObjectKind::Symbol(s.clone()),
    };
    let proto = engine.intrinsics.object_prototype.clone();
    engine.allocate_object(kind, Some(proto))
}

/// Collects the enumerable string keys of `value` and its prototypes.
/// Keys shadowed by a nearer property are reported once.
pub fn foreach_iterator_object(engine: &mut ExecutionEngine, value: &JsValue) -> Result<JsValue, VmError> {
    let mut keys = vec![];
    let start = match value {
        JsValue::Undefined | JsValue::Null => None,
        JsValue::String(s) => {
            keys.extend((0..s.chars().count()).map(|i| i.to_string()));
            None
        }
        JsValue::Object(o) => Some(o.clone()),
        _ => None,
    };
    let mut seen = HashSet::new();
    let mut current = start;
    while let Some(o) = current {
        let b = o.borrow();
        for key in b.own_property_keys() {
            if let PropertyKey::Sym(_) = key {
                continue;
            }
            let enumerable = b.get_own_property(&key).map(|d| d.is_enumerable()).unwrap_or(true);
            let name = key.to_string();
            if seen.insert(name.clone()) && enumerable {
                keys.push(name);
            }
        }
        current = b.prototype();
    }
    match engine.allocate_object(ObjectKind::ForInIterator { keys, position: 0 }, None) {
        Ok(it) => Ok(JsValue::Object(it)),
        Err(e) => raise(engine, e),
    }
}

/// Next key of a for-in iterator, or null when exhausted.
pub fn foreach_next_property_name(iterator: &JsValue) -> JsValue {
    if let JsValue::Object(o) = iterator {
        if let ObjectKind::ForInIterator { keys, position } = &mut o.borrow_mut().kind {
            if let Some(k) = keys.get(*position) {
                *position += 1;
                return JsValue::String(k.to_string());
            }
        }
    }
    JsValue::Null
}

fn delete_own(engine: &mut ExecutionEngine, o: &JsObjectType, key: &PropertyKey) -> bool {
    let mut b = o.borrow_mut();
    match (&mut b.kind, key) {
        (ObjectKind::Array(elements), PropertyKey::Int(i)) if (*i as usize) < elements.len() => {
            elements[*i as usize] = JsValue::Undefined;
            return true;
        }
        (ObjectKind::Array(_), PropertyKey::Str(s)) if s == "length" => return false,
        (ObjectKind::String(s), PropertyKey::Int(i)) if (*i as usize) < s.chars().count() => return false,
        (ObjectKind::String(_), PropertyKey::Str(s)) if s == "length" => return false,
        _ => {}
    }
    let deleted = b.delete(key);
    if deleted {
        engine.heap.deallocate(VALUE_BYTES);
    }
    deleted
}

pub fn delete_member(
    engine: &mut ExecutionEngine,
    base: &JsValue,
    key: &PropertyKey,
    strict: bool,
) -> Result<JsValue, VmError> {
    let o = match base {
        JsValue::Undefined | JsValue::Null => {
            return raise(
                engine,
                JErrorType::TypeError("Cannot convert undefined or null to object".to_string()),
            )
        }
        JsValue::Object(o) => o.clone(),
        _ => return Ok(JsValue::Boolean(true)),
    };
    let deleted = delete_own(engine, &o, key);
    if !deleted && strict {
        return raise(
            engine,
            JErrorType::TypeError(format!("Cannot delete property '{}' of {}", key, base)),
        );
    }
    Ok(JsValue::Boolean(deleted))
}

pub fn delete_subscript(
    engine: &mut ExecutionEngine,
    base: &JsValue,
    index: &JsValue,
    strict: bool,
) -> Result<JsValue, VmError> {
    match to_property_key(index) {
        Ok(key) => delete_member(engine, base, &key, strict),
        Err(e) => raise(engine, e),
    }
}

pub fn define_array(engine: &mut ExecutionEngine, values: Vec<JsValue>) -> Result<JsValue, VmError> {
    let proto = engine.intrinsics.array_prototype.clone();
    if let Err(e) = engine.heap.allocate(values.len() * VALUE_BYTES) {
        return raise(engine, e);
    }
    match engine.allocate_object(ObjectKind::Array(values), Some(proto)) {
        Ok(a) => Ok(JsValue::Object(a)),
        Err(e) => raise(engine, e),
    }
}

pub fn define_object_literal(engine: &mut ExecutionEngine, pairs: Vec<(JsValue, JsValue)>) -> Result<JsValue, VmError> {
    let proto = engine.intrinsics.object_prototype.clone();
    let o = match engine.allocate_object(ObjectKind::Ordinary, Some(proto)) {
        Ok(o) => o,
        Err(e) => return raise(engine, e),
    };
    for (k, v) in pairs {
        let key = match to_property_key(&k) {
            Ok(key) => key,
            Err(e) => return raise(engine, e),
        };
        if let Err(e) = engine.heap.allocate(VALUE_BYTES) {
            return raise(engine, e);
        }
        o.borrow_mut().define_own_property(key, PropertyDescriptor::data(v));
    }
    Ok(JsValue::Object(o))
}

/// The `arguments` object of an activation. Sloppy functions with simple
/// formals and a heap context get a mapped object whose first indexes alias
/// the formals.
pub fn setup_arguments_object(
    engine: &mut ExecutionEngine,
    function: &CompiledFunction,
    call_data: Option<CallDataRef>,
    own_context: Option<ContextHandle>,
) -> Result<JsValue, VmError> {
    let (args, callee) = match call_data {
        Some(cd) => (cd.arguments(&engine.stack), cd.function(&engine.stack)),
        None => (vec![], JsValue::Undefined),
    };
    let meta = &function.metadata;
    let mapped = if !meta.is_strict && meta.has_simple_parameters {
        own_context
    } else {
        None
    };
    if let Some(h) = mapped {
        engine.heap.capture(h);
    }
    let mapped_count = if mapped.is_some() {
        args.len().min(meta.formal_names.len())
    } else {
        0
    };
    let proto = engine.intrinsics.object_prototype.clone();
    let o = match engine.allocate_object(ObjectKind::Arguments { mapped, mapped_count }, Some(proto)) {
        Ok(o) => o,
        Err(e) => return raise(engine, e),
    };
    if let Err(e) = engine.heap.allocate(args.len() * VALUE_BYTES) {
        return raise(engine, e);
    }
    {
        let mut b = o.borrow_mut();
        let argc = args.len();
        for (i, a) in args.into_iter().enumerate() {
            b.define_own_property(PropertyKey::Int(i as u32), PropertyDescriptor::data(a));
        }
        b.define_own_property("length".into(), PropertyDescriptor::hidden(JsValue::integer(argc as i64)));
        if !meta.is_strict {
            b.define_own_property("callee".into(), PropertyDescriptor::hidden(callee));
        }
    }
    Ok(JsValue::Object(o))
}

/// `this` as seen by a sloppy function: nullish becomes the global object,
/// primitives are wrapped. Strict functions see `this` unchanged.
pub fn convert_this_to_object(engine: &mut ExecutionEngine, this: &JsValue, strict: bool) -> Result<JsValue, JErrorType> {
    if strict {
        return Ok(this.clone());
    }
    match this {
        JsValue::Undefined | JsValue::Null => Ok(JsValue::Object(engine.global_object())),
        JsValue::Object(_) => Ok(this.clone()),
        _ => Ok(JsValue::Object(to_object(engine, this)?)),
    }
}

pub fn closure(engine: &mut ExecutionEngine, function: Rc<CompiledFunction>, scope: ContextHandle) -> Result<JsValue, JErrorType> {
    let name = function.name.to_string();
    let length = function.metadata.formal_names.len();
    let function_proto = engine.intrinsics.function_prototype.clone();
    let object_proto = engine.intrinsics.object_prototype.clone();
    let f = engine.allocate_object(
        ObjectKind::Function(FunctionObject::Script { function, scope }),
        Some(function_proto),
    )?;
    engine.heap.capture(scope);
    let prototype = engine.allocate_object(ObjectKind::Ordinary, Some(object_proto))?;
    prototype
        .borrow_mut()
        .define_own_property("constructor".into(), PropertyDescriptor::hidden(JsValue::Object(f.clone())));
    {
        let mut b = f.borrow_mut();
        b.define_own_property("prototype".into(), PropertyDescriptor::hidden(JsValue::Object(prototype)));
        b.define_own_property("length".into(), PropertyDescriptor::hidden(JsValue::integer(length as i64)));
        b.define_own_property("name".into(), PropertyDescriptor::hidden(JsValue::String(name)));
    }
    Ok(JsValue::Object(f))
}

// ── Operators ───────────────────────────────────────────────

pub fn add(a: &JsValue, b: &JsValue) -> Result<JsValue, JErrorType> {
    if let (JsValue::Number(x), JsValue::Number(y)) = (a, b) {
        return Ok(JsValue::from_f64(x.to_f64() + y.to_f64()));
    }
    let pa = to_primitive(a, PreferredType::Default)?;
    let pb = to_primitive(b, PreferredType::Default)?;
    if matches!(pa, JsValue::String(_)) || matches!(pb, JsValue::String(_)) {
        return Ok(JsValue::String(to_string(&pa)? + &to_string(&pb)?));
    }
    Ok(JsValue::from_f64(to_number(&pa)? + to_number(&pb)?))
}

fn numeric(a: &JsValue, b: &JsValue, f: impl Fn(f64, f64) -> f64) -> Result<JsValue, JErrorType> {
    Ok(JsValue::from_f64(f(to_number(a)?, to_number(b)?)))
}

fn int32(a: &JsValue, b: &JsValue, f: impl Fn(i32, u32) -> i32) -> Result<JsValue, JErrorType> {
    Ok(JsValue::integer(f(to_int32(a)?, to_uint32(b)?) as i64))
}

/// Operators that never call back into script.
pub fn alu(op: AluOp, a: &JsValue, b: &JsValue) -> Result<JsValue, JErrorType> {
    match op {
        AluOp::Add => add(a, b),
        AluOp::Sub => numeric(a, b, |x, y| x - y),
        AluOp::Mul => numeric(a, b, |x, y| x * y),
        AluOp::Div => numeric(a, b, |x, y| x / y),
        AluOp::Mod => numeric(a, b, |x, y| x % y),
        AluOp::Exp => numeric(a, b, |x, y| if y.is_nan() { f64::NAN } else { x.powf(y) }),
        AluOp::Shl => int32(a, b, |x, y| x.wrapping_shl(y & 31)),
        AluOp::Shr => int32(a, b, |x, y| x >> (y & 31)),
        AluOp::UShr => Ok(JsValue::integer((to_uint32(a)? >> (to_uint32(b)? & 31)) as i64)),
        AluOp::BitAnd => int32(a, b, |x, y| x & y as i32),
        AluOp::BitOr => int32(a, b, |x, y| x | y as i32),
        AluOp::BitXor => int32(a, b, |x, y| x ^ y as i32),
        AluOp::Eq => Ok(JsValue::Boolean(abstract_equality_comparison(a, b)?)),
        AluOp::NotEq => Ok(JsValue::Boolean(!abstract_equality_comparison(a, b)?)),
        AluOp::StrictEq => Ok(JsValue::Boolean(strict_equality_comparison(a, b))),
        AluOp::StrictNotEq => Ok(JsValue::Boolean(!strict_equality_comparison(a, b))),
        AluOp::Lt => Ok(JsValue::Boolean(abstract_relational_comparison(a, b)? == Some(true))),
        AluOp::Gt => Ok(JsValue::Boolean(abstract_relational_comparison(b, a)? == Some(true))),
        AluOp::Le => Ok(JsValue::Boolean(abstract_relational_comparison(b, a)? == Some(false))),
        AluOp::Ge => Ok(JsValue::Boolean(abstract_relational_comparison(a, b)? == Some(false))),
        AluOp::In | AluOp::InstanceOf => Err(JErrorType::TypeError(format!(
            "operator {:?} needs the engine",
            op
        ))),
    }
}

pub fn binop(engine: &mut ExecutionEngine, op: AluOp, a: &JsValue, b: &JsValue) -> Result<JsValue, VmError> {
    match op {
        AluOp::In => in_operator(engine, a, b),
        AluOp::InstanceOf => instance_of(engine, a, b),
        _ => match alu(op, a, b) {
            Ok(v) => Ok(v),
            Err(e) => raise(engine, e),
        },
    }
}

fn in_operator(engine: &mut ExecutionEngine, a: &JsValue, b: &JsValue) -> Result<JsValue, VmError> {
    let o = match b {
        JsValue::Object(o) => o.clone(),
        _ => {
            return raise(
                engine,
                JErrorType::TypeError(format!("Cannot use 'in' operator to search for '{}' in {}", a, b)),
            )
        }
    };
    match to_property_key(a) {
        Ok(key) => Ok(JsValue::Boolean(has_property(engine, &o, &key))),
        Err(e) => raise(engine, e),
    }
}

fn instance_of(engine: &mut ExecutionEngine, a: &JsValue, b: &JsValue) -> Result<JsValue, VmError> {
    if function_of(b).is_none() {
        return raise(
            engine,
            JErrorType::TypeError("Right-hand side of 'instanceof' is not callable".to_string()),
        );
    }
    let object = match a {
        JsValue::Object(o) => o.clone(),
        _ => return Ok(JsValue::Boolean(false)),
    };
    let proto = get_property(engine, b, &PropertyKey::from("prototype"))?;
    if engine.has_exception {
        return Ok(JsValue::Undefined);
    }
    let proto = match proto {
        JsValue::Object(p) => p,
        _ => {
            return raise(
                engine,
                JErrorType::TypeError("Function has non-object prototype in instanceof check".to_string()),
            )
        }
    };
    let mut current = object.borrow().prototype();
    while let Some(p) = current {
        if Rc::ptr_eq(&p, &proto) {
            return Ok(JsValue::Boolean(true));
        }
        current = p.borrow().prototype();
    }
    Ok(JsValue::Boolean(false))
}

pub fn not(a: &JsValue) -> JsValue {
    JsValue::Boolean(!to_boolean(a))
}

pub fn plus(a: &JsValue) -> Result<JsValue, JErrorType> {
    Ok(JsValue::from_f64(to_number(a)?))
}

pub fn minus(a: &JsValue) -> Result<JsValue, JErrorType> {
    Ok(JsValue::from_f64(-to_number(a)?))
}

pub fn complement(a: &JsValue) -> Result<JsValue, JErrorType> {
    Ok(JsValue::integer(!to_int32(a)? as i64))
}

/// Old numeric value and the value after adding `delta`.
pub fn increment(a: &JsValue, delta: f64) -> Result<(JsValue, JsValue), JErrorType> {
    let n = to_number(a)?;
    Ok((JsValue::from_f64(n), JsValue::from_f64(n + delta)))
}
