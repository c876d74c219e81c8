use std::fmt;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use crate::runner::ds::object::JsObjectType;
use crate::runner::ds::operations::type_conversion::{TYPE_STR_NULL, TYPE_STR_UNDEFINED};
use crate::runner::ds::symbol::SymbolData;

pub enum JsValue {
    Undefined,
    Null,
    Boolean(bool),
    String(String),
    Symbol(SymbolData),
    Number(JsNumberType),
    Object(JsObjectType),
}

impl JsValue {
    /// Wraps a double, keeping integral values in the integer representation
    /// so that equality between computed and literal numbers holds.
    pub fn from_f64(n: f64) -> Self {
        JsValue::Number(JsNumberType::from_f64(n))
    }

    pub fn integer(n: i64) -> Self {
        JsValue::Number(JsNumberType::Integer(n))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, JsValue::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, JsValue::Undefined | JsValue::Null)
    }

    pub fn as_object(&self) -> Option<&JsObjectType> {
        match self {
            JsValue::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The value as an array index, when it is a non-negative integer.
    pub fn as_index(&self) -> Option<u32> {
        match self {
            JsValue::Number(JsNumberType::Integer(i)) if *i >= 0 && *i <= u32::MAX as i64 => {
                Some(*i as u32)
            }
            _ => None,
        }
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        JsValue::Boolean(b)
    }
}
impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        JsValue::String(s.to_string())
    }
}
impl From<String> for JsValue {
    fn from(s: String) -> Self {
        JsValue::String(s)
    }
}
impl From<i64> for JsValue {
    fn from(n: i64) -> Self {
        JsValue::integer(n)
    }
}
impl From<f64> for JsValue {
    fn from(n: f64) -> Self {
        JsValue::from_f64(n)
    }
}
impl From<JsObjectType> for JsValue {
    fn from(o: JsObjectType) -> Self {
        JsValue::Object(o)
    }
}

impl Clone for JsValue {
    fn clone(&self) -> Self {
        match self {
            JsValue::Undefined => JsValue::Undefined,
            JsValue::String(d) => JsValue::String(d.to_string()),
            JsValue::Boolean(d) => JsValue::Boolean(*d),
            JsValue::Null => JsValue::Null,
            JsValue::Number(d) => JsValue::Number(d.clone()),
            JsValue::Object(o) => JsValue::Object(o.clone()),
            JsValue::Symbol(d) => JsValue::Symbol(d.clone()),
        }
    }
}

impl Display for JsValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::Undefined => write!(f, "{}", TYPE_STR_UNDEFINED),
            JsValue::Null => write!(f, "{}", TYPE_STR_NULL),
            JsValue::Boolean(b) => write!(f, "bool({})", b),
            JsValue::String(s) => write!(f, "\"{}\"", s),
            JsValue::Symbol(s) => write!(f, "{}", s),
            JsValue::Number(n) => write!(f, "{}", n),
            JsValue::Object(o) => match o.try_borrow() {
                Ok(o) => write!(f, "{}", o),
                Err(_) => write!(f, "[object]"),
            },
        }
    }
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::Undefined => write!(f, "JsValue::Undefined"),
            JsValue::Null => write!(f, "JsValue::Null"),
            JsValue::Boolean(b) => write!(f, "JsValue::Boolean({})", b),
            JsValue::String(s) => write!(f, "JsValue::String({:?})", s),
            JsValue::Symbol(s) => write!(f, "JsValue::Symbol({})", s),
            JsValue::Number(n) => write!(f, "JsValue::Number({:?})", n),
            JsValue::Object(_) => write!(f, "JsValue::Object(...)"),
        }
    }
}

impl PartialEq for JsValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JsValue::Undefined, JsValue::Undefined) => true,
            (JsValue::Null, JsValue::Null) => true,
            (JsValue::Boolean(a), JsValue::Boolean(b)) => a == b,
            (JsValue::String(a), JsValue::String(b)) => a == b,
            (JsValue::Number(a), JsValue::Number(b)) => a == b,
            (JsValue::Object(a), JsValue::Object(b)) => Rc::ptr_eq(a, b),
            (JsValue::Symbol(a), JsValue::Symbol(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum JsNumberType {
    Integer(i64),
    Float(f64),
    NaN,
    PositiveInfinity,
    NegativeInfinity,
}

impl JsNumberType {
    pub fn from_f64(n: f64) -> Self {
        if n.is_nan() {
            JsNumberType::NaN
        } else if n == f64::INFINITY {
            JsNumberType::PositiveInfinity
        } else if n == f64::NEG_INFINITY {
            JsNumberType::NegativeInfinity
        } else if n.fract() == 0.0
            && n.abs() < 9_007_199_254_740_992.0
            && !(n == 0.0 && n.is_sign_negative())
        {
            JsNumberType::Integer(n as i64)
        } else {
            JsNumberType::Float(n)
        }
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            JsNumberType::Integer(i) => *i as f64,
            JsNumberType::Float(f) => *f,
            JsNumberType::NaN => f64::NAN,
            JsNumberType::PositiveInfinity => f64::INFINITY,
            JsNumberType::NegativeInfinity => f64::NEG_INFINITY,
        }
    }
}

impl Display for JsNumberType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JsNumberType::Integer(i) => write!(f, "{}", i),
            JsNumberType::Float(nf) => write!(f, "{}", nf),
            JsNumberType::NaN => write!(f, "NaN"),
            JsNumberType::PositiveInfinity => write!(f, "Infinity"),
            JsNumberType::NegativeInfinity => write!(f, "-Infinity"),
        }
    }
}

impl Clone for JsNumberType {
    fn clone(&self) -> Self {
        match self {
            JsNumberType::Integer(i) => JsNumberType::Integer(*i),
            JsNumberType::Float(nf) => JsNumberType::Float(*nf),
            JsNumberType::NaN => JsNumberType::NaN,
            JsNumberType::PositiveInfinity => JsNumberType::PositiveInfinity,
            JsNumberType::NegativeInfinity => JsNumberType::NegativeInfinity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f64_normalises_integers() {
        assert_eq!(JsValue::from_f64(3.0), JsValue::integer(3));
        assert_eq!(JsValue::from_f64(0.5), JsValue::Number(JsNumberType::Float(0.5)));
        assert_eq!(JsValue::from_f64(f64::NAN), JsValue::Number(JsNumberType::NaN));
        assert!(matches!(
            JsValue::from_f64(-0.0),
            JsValue::Number(JsNumberType::Float(_))
        ));
    }

    #[test]
    fn test_as_index() {
        assert_eq!(JsValue::integer(4).as_index(), Some(4));
        assert_eq!(JsValue::integer(-1).as_index(), None);
        assert_eq!(JsValue::from("4").as_index(), None);
    }
}
