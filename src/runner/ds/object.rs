use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use indexmap::IndexMap;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::heap::ContextHandle;
use crate::runner::ds::object_property::{PropertyDescriptor, PropertyKey};
use crate::runner::ds::symbol::SymbolData;
use crate::runner::ds::value::JsValue;
use crate::runner::vm::bytecode::CompiledFunction;
use crate::runner::vm::call_data::CallDataRef;
use crate::runner::vm::engine::ExecutionEngine;

pub type JsObjectType = Rc<RefCell<JsObject>>;

/// Host function callable from script. A returned error is thrown into the
/// calling script.
pub type NativeFunction = fn(&mut ExecutionEngine, &CallDataRef) -> Result<JsValue, JErrorType>;

/// Shape of an object with no own properties.
pub const ROOT_SHAPE: u64 = 1;

static NEXT_SHAPE: AtomicU64 = AtomicU64::new(ROOT_SHAPE + 1);

lazy_static! {
    /// (from shape, added key, is data) -> resulting shape. Objects that gain
    /// the same keys in the same order end up with the same shape.
    static ref SHAPE_TRANSITIONS: Mutex<HashMap<(u64, PropertyKey, bool), u64>> = Mutex::new(HashMap::new());
}

fn next_shape() -> u64 {
    NEXT_SHAPE.fetch_add(1, Ordering::Relaxed)
}

fn transition(from: u64, key: &PropertyKey, is_data: bool) -> u64 {
    let mut table = match SHAPE_TRANSITIONS.lock() {
        Ok(table) => table,
        Err(poisoned) => poisoned.into_inner(),
    };
    *table.entry((from, key.clone(), is_data)).or_insert_with(next_shape)
}

#[derive(Clone)]
pub enum FunctionObject {
    Script {
        function: Rc<CompiledFunction>,
        scope: ContextHandle,
    },
    Native {
        name: String,
        function: NativeFunction,
    },
}

impl FunctionObject {
    pub fn name(&self) -> &str {
        match self {
            FunctionObject::Script { function, .. } => &function.name,
            FunctionObject::Native { name, .. } => name,
        }
    }
}

pub enum ObjectKind {
    Ordinary,
    Array(Vec<JsValue>),
    Function(FunctionObject),
    /// `mapped` aliases the first `mapped_count` indexes to the argument
    /// slots of a heap call context.
    Arguments {
        mapped: Option<ContextHandle>,
        mapped_count: usize,
    },
    Error,
    Boolean(bool),
    Number(f64),
    String(String),
    Symbol(SymbolData),
    ForInIterator {
        keys: Vec<String>,
        position: usize,
    },
}

pub struct JsObject {
    pub kind: ObjectKind,
    properties: IndexMap<PropertyKey, PropertyDescriptor>,
    prototype: Option<JsObjectType>,
    extensible: bool,
    /// Where the transition chain starts; a fresh one after a prototype change.
    base_shape: u64,
    shape: u64,
}

impl JsObject {
    pub fn new(kind: ObjectKind, prototype: Option<JsObjectType>) -> Self {
        JsObject {
            kind,
            properties: IndexMap::new(),
            prototype,
            extensible: true,
            base_shape: ROOT_SHAPE,
            shape: ROOT_SHAPE,
        }
    }

    pub fn into_ref(self) -> JsObjectType {
        Rc::new(RefCell::new(self))
    }

    /// Identifies the layout of the property table: its keys in order and
    /// whether each is a data or accessor property. Objects with the same
    /// layout share a shape. Changes whenever a property is added or removed,
    /// a property switches between data and accessor, or the prototype
    /// changes.
    pub fn shape(&self) -> u64 {
        self.shape
    }

    fn replay_shape(&mut self) {
        self.shape = self
            .properties
            .iter()
            .fold(self.base_shape, |shape, (k, d)| transition(shape, k, d.is_data_descriptor()));
    }

    pub fn prototype(&self) -> Option<JsObjectType> {
        self.prototype.clone()
    }

    pub fn set_prototype(&mut self, prototype: Option<JsObjectType>) {
        self.prototype = prototype;
        self.base_shape = next_shape();
        self.replay_shape();
    }

    pub fn is_extensible(&self) -> bool {
        self.extensible
    }

    pub fn prevent_extensions(&mut self) {
        self.extensible = false;
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, ObjectKind::Array(_))
    }

    pub fn get_own_property(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.properties.get(key)
    }

    /// The property together with its slot in the property table.
    pub fn get_own_property_slot(&self, key: &PropertyKey) -> Option<(usize, &PropertyDescriptor)> {
        self.properties.get_full(key).map(|(slot, _, d)| (slot, d))
    }

    pub fn property_at(&self, slot: usize) -> Option<&PropertyDescriptor> {
        self.properties.get_index(slot).map(|(_, d)| d)
    }

    pub fn property_at_mut(&mut self, slot: usize) -> Option<&mut PropertyDescriptor> {
        self.properties.get_index_mut(slot).map(|(_, d)| d)
    }

    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    /// Adds or replaces a property. Returns false when a new property is
    /// refused because the object is not extensible.
    pub fn define_own_property(&mut self, key: PropertyKey, desc: PropertyDescriptor) -> bool {
        match self.properties.get_mut(&key) {
            Some(existing) => {
                let kind_changed = existing.is_data_descriptor() != desc.is_data_descriptor();
                *existing = desc;
                if kind_changed {
                    self.replay_shape();
                }
                true
            }
            None => {
                if !self.extensible {
                    return false;
                }
                self.shape = transition(self.shape, &key, desc.is_data_descriptor());
                self.properties.insert(key, desc);
                true
            }
        }
    }

    /// Removes a property. Non-configurable properties stay and report false.
    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        match self.properties.get(key) {
            None => true,
            Some(d) if !d.is_configurable() => false,
            Some(_) => {
                self.properties.shift_remove(key);
                self.replay_shape();
                true
            }
        }
    }

    /// Own keys in insertion order, preceded by the element indexes of an
    /// array or string wrapper.
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let mut keys = vec![];
        match &self.kind {
            ObjectKind::Array(elements) => {
                keys.extend((0..elements.len() as u32).map(PropertyKey::Int));
            }
            ObjectKind::String(s) => {
                keys.extend((0..s.chars().count() as u32).map(PropertyKey::Int));
            }
            _ => {}
        }
        keys.extend(self.properties.keys().cloned());
        keys
    }

    pub fn enumerable_own_keys(&self) -> Vec<PropertyKey> {
        self.own_property_keys()
            .into_iter()
            .filter(|k| match self.properties.get(k) {
                Some(d) => d.is_enumerable(),
                None => true,
            })
            .collect()
    }

    pub fn class_name(&self) -> &'static str {
        match self.kind {
            ObjectKind::Ordinary | ObjectKind::ForInIterator { .. } => "Object",
            ObjectKind::Array(_) => "Array",
            ObjectKind::Function(_) => "Function",
            ObjectKind::Arguments { .. } => "Arguments",
            ObjectKind::Error => "Error",
            ObjectKind::Boolean(_) => "Boolean",
            ObjectKind::Number(_) => "Number",
            ObjectKind::String(_) => "String",
            ObjectKind::Symbol(_) => "Symbol",
        }
    }
}

impl Display for JsObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ObjectKind::Function(func) => write!(f, "function {}()", func.name()),
            _ => write!(f, "[object {}]", self.class_name()),
        }
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "JsObject({}, shape={})", self, self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_changes_on_structure_only() {
        let mut o = JsObject::new(ObjectKind::Ordinary, None);
        let s0 = o.shape();
        o.define_own_property("x".into(), PropertyDescriptor::data(JsValue::integer(1)));
        let s1 = o.shape();
        assert_ne!(s0, s1);
        o.define_own_property("x".into(), PropertyDescriptor::data(JsValue::integer(2)));
        assert_eq!(o.shape(), s1);
        o.set_prototype(None);
        assert_ne!(o.shape(), s1);
    }

    #[test]
    fn test_same_layout_shares_a_shape() {
        let build = |keys: &[&str]| {
            let mut o = JsObject::new(ObjectKind::Ordinary, None);
            for k in keys {
                o.define_own_property((*k).into(), PropertyDescriptor::data(JsValue::Null));
            }
            o
        };
        let a = build(&["x", "y"]);
        let b = build(&["x", "y"]);
        assert_eq!(a.shape(), b.shape());
        assert_ne!(a.shape(), build(&["y", "x"]).shape());
        assert_eq!(JsObject::new(ObjectKind::Ordinary, None).shape(), ROOT_SHAPE);

        // Deleting a key gives the shape of the layout that is left.
        let mut c = build(&["x", "q", "y"]);
        assert!(c.delete(&"q".into()));
        assert_eq!(c.shape(), a.shape());
    }

    #[test]
    fn test_delete_keeps_order_of_remaining_keys() {
        let mut o = JsObject::new(ObjectKind::Ordinary, None);
        for k in ["a", "b", "c"] {
            o.define_own_property(k.into(), PropertyDescriptor::data(JsValue::Null));
        }
        assert!(o.delete(&"b".into()));
        assert_eq!(o.own_property_keys(), vec![PropertyKey::from("a"), PropertyKey::from("c")]);
        assert_eq!(o.get_own_property_slot(&"c".into()).map(|(s, _)| s), Some(1));
    }

    #[test]
    fn test_non_configurable_property_survives_delete() {
        let mut o = JsObject::new(ObjectKind::Ordinary, None);
        o.define_own_property(
            "k".into(),
            PropertyDescriptor::Data {
                value: JsValue::Null,
                writable: false,
                enumerable: true,
                configurable: false,
            },
        );
        assert!(!o.delete(&"k".into()));
        assert!(o.has_own_property(&"k".into()));
    }

    #[test]
    fn test_array_keys_come_first() {
        let mut o = JsObject::new(ObjectKind::Array(vec![JsValue::Null, JsValue::Null]), None);
        o.define_own_property("x".into(), PropertyDescriptor::data(JsValue::Null));
        assert_eq!(
            o.own_property_keys(),
            vec![PropertyKey::Int(0), PropertyKey::Int(1), PropertyKey::from("x")]
        );
    }
}
