//! Inline caches for property, element and global access.
//!
//! Every cache starts out on its generic entry point. A generic access runs
//! the full property protocol and then swaps in a specialised entry point
//! for the receiver it saw, keyed by the receiver's shape. A specialised
//! entry point that no longer matches falls back to the generic one, so a
//! cached access always behaves like an uncached one.

use std::rc::Rc;

use crate::runner::ds::object::{JsObjectType, ObjectKind};
use crate::runner::ds::object_property::{PropertyDescriptor, PropertyKey};
use crate::runner::ds::value::JsValue;
use crate::runner::vm::bytecode::CompiledFunction;
use crate::runner::vm::engine::ExecutionEngine;
use crate::runner::vm::error::VmError;
use crate::runner::vm::runtime;

pub type Getter = fn(&mut Lookup, &mut ExecutionEngine, &JsValue) -> Result<JsValue, VmError>;
/// The last argument is the strict-mode flag of the storing function.
pub type Setter = fn(&mut Lookup, &mut ExecutionEngine, &JsValue, JsValue, bool) -> Result<(), VmError>;
pub type IndexedGetter =
    fn(&mut Lookup, &mut ExecutionEngine, &JsValue, &JsValue) -> Result<JsValue, VmError>;
pub type IndexedSetter =
    fn(&mut Lookup, &mut ExecutionEngine, &JsValue, &JsValue, JsValue, bool) -> Result<(), VmError>;
pub type GlobalGetter = fn(&mut Lookup, &mut ExecutionEngine) -> Result<JsValue, VmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Getter,
    Setter,
    IndexedGetter,
    IndexedSetter,
    GlobalGetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    Generic,
    OwnData,
    ProtoData,
    Accessor,
    ArrayLength,
    ArrayElement,
    GlobalData,
}

#[derive(Debug, Clone)]
pub struct Lookup {
    pub kind: LookupKind,
    pub key: PropertyKey,
    pub getter: Getter,
    pub setter: Setter,
    pub indexed_getter: IndexedGetter,
    pub indexed_setter: IndexedSetter,
    pub global_getter: GlobalGetter,
    pub state: LookupState,
    shape: u64,
    proto_shape: u64,
    slot: usize,
    holder: Option<JsObjectType>,
    pub hits: u64,
    pub misses: u64,
}

impl Lookup {
    pub fn new(kind: LookupKind, name: &str) -> Self {
        Lookup {
            kind,
            key: PropertyKey::from_name(name),
            getter: getter_generic,
            setter: setter_generic,
            indexed_getter: indexed_getter_generic,
            indexed_setter: indexed_setter_generic,
            global_getter: global_getter_generic,
            state: LookupState::Generic,
            shape: 0,
            proto_shape: 0,
            slot: 0,
            holder: None,
            hits: 0,
            misses: 0,
        }
    }

    fn reset(&mut self) {
        self.getter = getter_generic;
        self.setter = setter_generic;
        self.indexed_getter = indexed_getter_generic;
        self.indexed_setter = indexed_setter_generic;
        self.global_getter = global_getter_generic;
        self.state = LookupState::Generic;
        self.holder = None;
    }

    fn specialise(&mut self, state: LookupState) {
        tracing::debug!("lookup {} specialised to {:?}", self.key, state);
        self.state = state;
    }
}

// ── Entry points used by the interpreter ──
//
// The cache entry is copied out of the function's table for the duration of
// the access, since the access may re-enter the same function.

fn with_lookup<T>(
    function: &Rc<CompiledFunction>,
    index: u32,
    run: impl FnOnce(&mut Lookup) -> Result<T, VmError>,
) -> Result<T, VmError> {
    let mut lookup = function
        .lookups
        .borrow()
        .get(index as usize)
        .cloned()
        .ok_or_else(|| VmError::Internal(format!("lookup {} out of range", index)))?;
    let result = run(&mut lookup);
    if let Some(slot) = function.lookups.borrow_mut().get_mut(index as usize) {
        *slot = lookup;
    }
    result
}

pub fn get(
    engine: &mut ExecutionEngine,
    function: &Rc<CompiledFunction>,
    index: u32,
    base: &JsValue,
) -> Result<JsValue, VmError> {
    with_lookup(function, index, |l| (l.getter)(l, engine, base))
}

pub fn set(
    engine: &mut ExecutionEngine,
    function: &Rc<CompiledFunction>,
    index: u32,
    base: &JsValue,
    value: JsValue,
) -> Result<(), VmError> {
    let strict = function.metadata.is_strict;
    with_lookup(function, index, |l| (l.setter)(l, engine, base, value, strict))
}

pub fn get_indexed(
    engine: &mut ExecutionEngine,
    function: &Rc<CompiledFunction>,
    index: u32,
    base: &JsValue,
    element: &JsValue,
) -> Result<JsValue, VmError> {
    with_lookup(function, index, |l| (l.indexed_getter)(l, engine, base, element))
}

pub fn set_indexed(
    engine: &mut ExecutionEngine,
    function: &Rc<CompiledFunction>,
    index: u32,
    base: &JsValue,
    element: &JsValue,
    value: JsValue,
) -> Result<(), VmError> {
    let strict = function.metadata.is_strict;
    with_lookup(function, index, |l| {
        (l.indexed_setter)(l, engine, base, element, value, strict)
    })
}

pub fn get_global(
    engine: &mut ExecutionEngine,
    function: &Rc<CompiledFunction>,
    index: u32,
) -> Result<JsValue, VmError> {
    with_lookup(function, index, |l| (l.global_getter)(l, engine))
}

// ── Getters ──

pub fn getter_generic(l: &mut Lookup, engine: &mut ExecutionEngine, base: &JsValue) -> Result<JsValue, VmError> {
    l.misses += 1;
    let value = runtime::get_property(engine, base, &l.key)?;
    if engine.has_exception {
        return Ok(value);
    }
    let o = match base {
        JsValue::Object(o) => o,
        _ => return Ok(value),
    };
    if matches!(l.key, PropertyKey::Int(_)) {
        return Ok(value);
    }
    let obj = o.borrow();
    if obj.is_array() && l.key == PropertyKey::from("length") {
        l.getter = getter_array_length;
        l.specialise(LookupState::ArrayLength);
        return Ok(value);
    }
    match obj.get_own_property_slot(&l.key) {
        Some((slot, PropertyDescriptor::Data { .. })) => {
            l.shape = obj.shape();
            l.slot = slot;
            l.getter = getter_own_data;
            l.specialise(LookupState::OwnData);
        }
        Some((slot, PropertyDescriptor::Accessor { .. })) => {
            l.shape = obj.shape();
            l.slot = slot;
            l.getter = getter_accessor;
            l.specialise(LookupState::Accessor);
        }
        None => {
            if let Some(proto) = obj.prototype() {
                let p = proto.borrow();
                if let Some((slot, PropertyDescriptor::Data { .. })) = p.get_own_property_slot(&l.key) {
                    l.shape = obj.shape();
                    l.proto_shape = p.shape();
                    l.slot = slot;
                    l.holder = Some(proto.clone());
                    l.getter = getter_proto_data;
                    l.specialise(LookupState::ProtoData);
                }
            }
        }
    }
    Ok(value)
}

fn fall_back(l: &mut Lookup, engine: &mut ExecutionEngine, base: &JsValue) -> Result<JsValue, VmError> {
    l.reset();
    getter_generic(l, engine, base)
}

pub fn getter_own_data(l: &mut Lookup, engine: &mut ExecutionEngine, base: &JsValue) -> Result<JsValue, VmError> {
    if let JsValue::Object(o) = base {
        let obj = o.borrow();
        if obj.shape() == l.shape {
            if let Some(PropertyDescriptor::Data { value, .. }) = obj.property_at(l.slot) {
                l.hits += 1;
                return Ok(value.clone());
            }
        }
        drop(obj);
    }
    fall_back(l, engine, base)
}

pub fn getter_proto_data(l: &mut Lookup, engine: &mut ExecutionEngine, base: &JsValue) -> Result<JsValue, VmError> {
    let cached = match (base, &l.holder) {
        (JsValue::Object(o), Some(holder)) => {
            let obj = o.borrow();
            let same_proto = obj.prototype().map(|p| Rc::ptr_eq(&p, holder)).unwrap_or(false);
            let h = holder.borrow();
            if obj.shape() == l.shape && same_proto && h.shape() == l.proto_shape {
                match h.property_at(l.slot) {
                    Some(PropertyDescriptor::Data { value, .. }) => Some(value.clone()),
                    _ => None,
                }
            } else {
                None
            }
        }
        _ => None,
    };
    match cached {
        Some(value) => {
            l.hits += 1;
            Ok(value)
        }
        None => fall_back(l, engine, base),
    }
}

pub fn getter_accessor(l: &mut Lookup, engine: &mut ExecutionEngine, base: &JsValue) -> Result<JsValue, VmError> {
    let mut getter = None;
    let mut hit = false;
    if let JsValue::Object(o) = base {
        let obj = o.borrow();
        if obj.shape() == l.shape {
            if let Some(PropertyDescriptor::Accessor { get, .. }) = obj.property_at(l.slot) {
                hit = true;
                getter = get.clone();
            }
        }
    }
    if !hit {
        return fall_back(l, engine, base);
    }
    l.hits += 1;
    match getter {
        Some(f) => runtime::call_with_this(engine, &JsValue::Object(f), base.clone(), &[]),
        None => Ok(JsValue::Undefined),
    }
}

pub fn getter_array_length(l: &mut Lookup, engine: &mut ExecutionEngine, base: &JsValue) -> Result<JsValue, VmError> {
    if let JsValue::Object(o) = base {
        if let ObjectKind::Array(elements) = &o.borrow().kind {
            l.hits += 1;
            return Ok(JsValue::integer(elements.len() as i64));
        }
    }
    fall_back(l, engine, base)
}

// ── Indexed ──

fn array_index(base: &JsValue, element: &JsValue) -> Option<(JsObjectType, usize)> {
    let o = base.as_object()?;
    let i = element.as_index()? as usize;
    let in_bounds = matches!(&o.borrow().kind, ObjectKind::Array(elements) if i < elements.len());
    if in_bounds {
        Some((o.clone(), i))
    } else {
        None
    }
}

pub fn indexed_getter_generic(
    l: &mut Lookup,
    engine: &mut ExecutionEngine,
    base: &JsValue,
    element: &JsValue,
) -> Result<JsValue, VmError> {
    l.misses += 1;
    let value = runtime::get_element(engine, base, element)?;
    if !engine.has_exception && array_index(base, element).is_some() {
        l.indexed_getter = indexed_getter_array;
        l.specialise(LookupState::ArrayElement);
    }
    Ok(value)
}

pub fn indexed_getter_array(
    l: &mut Lookup,
    engine: &mut ExecutionEngine,
    base: &JsValue,
    element: &JsValue,
) -> Result<JsValue, VmError> {
    if let Some((o, i)) = array_index(base, element) {
        if let ObjectKind::Array(elements) = &o.borrow().kind {
            l.hits += 1;
            return Ok(elements[i].clone());
        }
    }
    l.reset();
    indexed_getter_generic(l, engine, base, element)
}

pub fn indexed_setter_generic(
    l: &mut Lookup,
    engine: &mut ExecutionEngine,
    base: &JsValue,
    element: &JsValue,
    value: JsValue,
    strict: bool,
) -> Result<(), VmError> {
    l.misses += 1;
    runtime::set_element(engine, base, element, value, strict)?;
    if !engine.has_exception && array_index(base, element).is_some() {
        l.indexed_setter = indexed_setter_array;
        l.specialise(LookupState::ArrayElement);
    }
    Ok(())
}

pub fn indexed_setter_array(
    l: &mut Lookup,
    engine: &mut ExecutionEngine,
    base: &JsValue,
    element: &JsValue,
    value: JsValue,
    strict: bool,
) -> Result<(), VmError> {
    if let Some((o, i)) = array_index(base, element) {
        if let ObjectKind::Array(elements) = &mut o.borrow_mut().kind {
            l.hits += 1;
            elements[i] = value;
            return Ok(());
        }
    }
    l.reset();
    indexed_setter_generic(l, engine, base, element, value, strict)
}

// ── Setters ──

pub fn setter_generic(
    l: &mut Lookup,
    engine: &mut ExecutionEngine,
    base: &JsValue,
    value: JsValue,
    strict: bool,
) -> Result<(), VmError> {
    l.misses += 1;
    runtime::set_property(engine, base, &l.key, value, strict)?;
    if engine.has_exception || matches!(l.key, PropertyKey::Int(_)) {
        return Ok(());
    }
    if let JsValue::Object(o) = base {
        let obj = o.borrow();
        if matches!(obj.kind, ObjectKind::Array(_) | ObjectKind::Arguments { .. }) {
            return Ok(());
        }
        if let Some((slot, PropertyDescriptor::Data { writable: true, .. })) = obj.get_own_property_slot(&l.key) {
            l.shape = obj.shape();
            l.slot = slot;
            l.setter = setter_own_data;
            l.specialise(LookupState::OwnData);
        }
    }
    Ok(())
}

pub fn setter_own_data(
    l: &mut Lookup,
    engine: &mut ExecutionEngine,
    base: &JsValue,
    value: JsValue,
    strict: bool,
) -> Result<(), VmError> {
    if let JsValue::Object(o) = base {
        let mut obj = o.borrow_mut();
        if obj.shape() == l.shape {
            if let Some(PropertyDescriptor::Data {
                value: slot,
                writable: true,
                ..
            }) = obj.property_at_mut(l.slot)
            {
                l.hits += 1;
                *slot = value;
                return Ok(());
            }
        }
        drop(obj);
    }
    l.reset();
    setter_generic(l, engine, base, value, strict)
}

// ── Globals ──

pub fn global_getter_generic(l: &mut Lookup, engine: &mut ExecutionEngine) -> Result<JsValue, VmError> {
    l.misses += 1;
    let value = runtime::get_global(engine, &l.key)?;
    if engine.has_exception {
        return Ok(value);
    }
    let global = engine.global_object();
    let g = global.borrow();
    if let Some((slot, PropertyDescriptor::Data { .. })) = g.get_own_property_slot(&l.key) {
        l.shape = g.shape();
        l.slot = slot;
        l.global_getter = global_getter_cached;
        l.specialise(LookupState::GlobalData);
    }
    Ok(value)
}

pub fn global_getter_cached(l: &mut Lookup, engine: &mut ExecutionEngine) -> Result<JsValue, VmError> {
    let global = engine.global_object();
    {
        let g = global.borrow();
        if g.shape() == l.shape {
            if let Some(PropertyDescriptor::Data { value, .. }) = g.property_at(l.slot) {
                l.hits += 1;
                return Ok(value.clone());
            }
        }
    }
    l.reset();
    global_getter_generic(l, engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::vm::config::EngineConfig;

    fn object_with(engine: &mut ExecutionEngine, props: &[(&str, i64)]) -> JsValue {
        let o = engine.new_object();
        for (k, v) in props {
            o.borrow_mut()
                .define_own_property(PropertyKey::from(*k), PropertyDescriptor::data(JsValue::integer(*v)));
        }
        JsValue::Object(o)
    }

    #[test]
    fn test_own_data_hit_and_invalidation() {
        let mut engine = ExecutionEngine::new(EngineConfig::default());
        let o = object_with(&mut engine, &[("x", 1)]);
        let mut l = Lookup::new(LookupKind::Getter, "x");

        assert_eq!((l.getter)(&mut l, &mut engine, &o).unwrap(), JsValue::integer(1));
        assert_eq!(l.state, LookupState::OwnData);
        assert_eq!((l.getter)(&mut l, &mut engine, &o).unwrap(), JsValue::integer(1));
        assert_eq!(l.hits, 1);

        // A structural change moves the property to another slot.
        if let JsValue::Object(obj) = &o {
            obj.borrow_mut().delete(&PropertyKey::from("x"));
            obj.borrow_mut().define_own_property("y".into(), PropertyDescriptor::data(JsValue::integer(9)));
            obj.borrow_mut().define_own_property("x".into(), PropertyDescriptor::data(JsValue::integer(2)));
        }
        assert_eq!((l.getter)(&mut l, &mut engine, &o).unwrap(), JsValue::integer(2));
        assert_eq!(l.misses, 2);
    }

    #[test]
    fn test_proto_data_sees_shadowing() {
        let mut engine = ExecutionEngine::new(EngineConfig::default());
        let proto = engine.new_object();
        proto
            .borrow_mut()
            .define_own_property("k".into(), PropertyDescriptor::data(JsValue::from("proto")));
        let child = engine.new_object();
        child.borrow_mut().set_prototype(Some(proto));
        let base = JsValue::Object(child.clone());

        let mut l = Lookup::new(LookupKind::Getter, "k");
        assert_eq!((l.getter)(&mut l, &mut engine, &base).unwrap(), JsValue::from("proto"));
        assert_eq!(l.state, LookupState::ProtoData);

        child
            .borrow_mut()
            .define_own_property("k".into(), PropertyDescriptor::data(JsValue::from("own")));
        assert_eq!((l.getter)(&mut l, &mut engine, &base).unwrap(), JsValue::from("own"));
        assert_eq!(l.state, LookupState::OwnData);
    }

    #[test]
    fn test_int_keys_never_specialise() {
        let mut engine = ExecutionEngine::new(EngineConfig::default());
        let o = object_with(&mut engine, &[("0", 5)]);
        let mut l = Lookup::new(LookupKind::Getter, "0");
        assert_eq!((l.getter)(&mut l, &mut engine, &o).unwrap(), JsValue::integer(5));
        assert_eq!(l.state, LookupState::Generic);
    }

    #[test]
    fn test_array_element_cache_falls_back_out_of_bounds() {
        let mut engine = ExecutionEngine::new(EngineConfig::default());
        let a = JsValue::Object(engine.new_array(vec![JsValue::integer(1), JsValue::integer(2)]));
        let mut l = Lookup::new(LookupKind::IndexedGetter, "");
        let get = |l: &mut Lookup, engine: &mut ExecutionEngine, i: i64| {
            (l.indexed_getter)(l, engine, &a, &JsValue::integer(i)).unwrap()
        };
        assert_eq!(get(&mut l, &mut engine, 1), JsValue::integer(2));
        assert_eq!(l.state, LookupState::ArrayElement);
        assert_eq!(get(&mut l, &mut engine, 0), JsValue::integer(1));
        assert_eq!(get(&mut l, &mut engine, 7), JsValue::Undefined);
        assert_eq!(l.state, LookupState::Generic);
    }

    #[test]
    fn test_setter_respects_read_only_change() {
        let mut engine = ExecutionEngine::new(EngineConfig::default());
        let o = object_with(&mut engine, &[("x", 1)]);
        let mut l = Lookup::new(LookupKind::Setter, "x");
        (l.setter)(&mut l, &mut engine, &o, JsValue::integer(2), false).unwrap();
        assert_eq!(l.state, LookupState::OwnData);

        if let JsValue::Object(obj) = &o {
            obj.borrow_mut().define_own_property(
                "x".into(),
                PropertyDescriptor::Data {
                    value: JsValue::integer(2),
                    writable: false,
                    enumerable: true,
                    configurable: true,
                },
            );
        }
        (l.setter)(&mut l, &mut engine, &o, JsValue::integer(3), false).unwrap();
        let mut g = Lookup::new(LookupKind::Getter, "x");
        assert_eq!((g.getter)(&mut g, &mut engine, &o).unwrap(), JsValue::integer(2));
    }

    #[test]
    fn test_global_cache() {
        let mut engine = ExecutionEngine::new(EngineConfig::default());
        engine.global_set("answer", JsValue::integer(42));
        let mut l = Lookup::new(LookupKind::GlobalGetter, "answer");
        assert_eq!((l.global_getter)(&mut l, &mut engine).unwrap(), JsValue::integer(42));
        assert_eq!(l.state, LookupState::GlobalData);
        engine.global_set("answer", JsValue::integer(43));
        assert_eq!((l.global_getter)(&mut l, &mut engine).unwrap(), JsValue::integer(43));
        assert_eq!(l.hits, 1);
    }
}
