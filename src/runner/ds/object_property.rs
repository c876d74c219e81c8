use std::fmt;
use std::fmt::{Display, Formatter};

use crate::runner::ds::object::JsObjectType;
use crate::runner::ds::symbol::SymbolData;
use crate::runner::ds::value::JsValue;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Str(String),
    Int(u32),
    Sym(SymbolData),
}

impl PropertyKey {
    /// Canonical key for a string: array-index strings become `Int` so that
    /// `o["1"]` and `o[1]` name the same property.
    pub fn from_name(s: &str) -> Self {
        match s.parse::<u32>() {
            Ok(i) if i.to_string() == s => PropertyKey::Int(i),
            _ => PropertyKey::Str(s.to_string()),
        }
    }

    pub fn to_value(&self) -> JsValue {
        match self {
            PropertyKey::Str(s) => JsValue::String(s.to_string()),
            PropertyKey::Int(i) => JsValue::String(i.to_string()),
            PropertyKey::Sym(s) => JsValue::Symbol(s.clone()),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        PropertyKey::from_name(s)
    }
}

impl Display for PropertyKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Str(s) => write!(f, "{}", s),
            PropertyKey::Int(i) => write!(f, "{}", i),
            PropertyKey::Sym(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PropertyDescriptor {
    Data {
        value: JsValue,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        get: Option<JsObjectType>,
        set: Option<JsObjectType>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// A writable, enumerable, configurable data property, as created by
    /// plain assignment.
    pub fn data(value: JsValue) -> Self {
        PropertyDescriptor::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// A non-enumerable data property, as used for built-in members.
    pub fn hidden(value: JsValue) -> Self {
        PropertyDescriptor::Data {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            PropertyDescriptor::Data { enumerable, .. } => *enumerable,
            PropertyDescriptor::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            PropertyDescriptor::Data { configurable, .. } => *configurable,
            PropertyDescriptor::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_data_descriptor(&self) -> bool {
        matches!(self, PropertyDescriptor::Data { .. })
    }

    pub fn is_accessor_descriptor(&self) -> bool {
        matches!(self, PropertyDescriptor::Accessor { .. })
    }
}

impl PartialEq for PropertyDescriptor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                PropertyDescriptor::Data {
                    value: v1,
                    writable: w1,
                    enumerable: e1,
                    configurable: c1,
                },
                PropertyDescriptor::Data {
                    value: v2,
                    writable: w2,
                    enumerable: e2,
                    configurable: c2,
                },
            ) => v1 == v2 && w1 == w2 && e1 == e2 && c1 == c2,
            (
                PropertyDescriptor::Accessor {
                    get: g1,
                    set: s1,
                    enumerable: e1,
                    configurable: c1,
                },
                PropertyDescriptor::Accessor {
                    get: g2,
                    set: s2,
                    enumerable: e2,
                    configurable: c2,
                },
            ) => {
                same_function(g1, g2) && same_function(s1, s2) && e1 == e2 && c1 == c2
            }
            _ => false,
        }
    }
}

fn same_function(a: &Option<JsObjectType>, b: &Option<JsObjectType>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => std::rc::Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
