use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::ObjectKind;
use crate::runner::ds::object_property::PropertyKey;
use crate::runner::ds::value::{JsNumberType, JsValue};

pub const TYPE_STR_UNDEFINED: &str = "undefined";
pub const TYPE_STR_NULL: &str = "null";
pub const TYPE_STR_BOOLEAN: &str = "boolean";
pub const TYPE_STR_STRING: &str = "string";
pub const TYPE_STR_SYMBOL: &str = "symbol";
pub const TYPE_STR_NUMBER: &str = "number";
pub const TYPE_STR_OBJECT: &str = "object";
pub const TYPE_STR_FUNCTION: &str = "function";

/// Result of the `typeof` operator.
pub fn get_type(a: &JsValue) -> &'static str {
    match a {
        JsValue::Undefined => TYPE_STR_UNDEFINED,
        JsValue::Null => TYPE_STR_OBJECT,
        JsValue::Boolean(_) => TYPE_STR_BOOLEAN,
        JsValue::String(_) => TYPE_STR_STRING,
        JsValue::Symbol(_) => TYPE_STR_SYMBOL,
        JsValue::Number(_) => TYPE_STR_NUMBER,
        JsValue::Object(o) => {
            if o.borrow().is_callable() {
                TYPE_STR_FUNCTION
            } else {
                TYPE_STR_OBJECT
            }
        }
    }
}

pub enum PreferredType {
    Default,
    String,
    Number,
}

/// Converts objects to a primitive without calling back into script:
/// wrappers unwrap, arrays join their elements, everything else renders as
/// `[object Class]`.
pub fn to_primitive(v: &JsValue, preferred_type: PreferredType) -> Result<JsValue, JErrorType> {
    let o = match v {
        JsValue::Object(o) => o,
        _ => return Ok(v.clone()),
    };
    let o = o.borrow();
    Ok(match &o.kind {
        ObjectKind::Boolean(b) => JsValue::Boolean(*b),
        ObjectKind::Number(n) => JsValue::from_f64(*n),
        ObjectKind::String(s) => JsValue::String(s.to_string()),
        ObjectKind::Symbol(s) => JsValue::Symbol(s.clone()),
        ObjectKind::Array(elements) => {
            let mut parts = Vec::with_capacity(elements.len());
            for e in elements {
                parts.push(if e.is_nullish() {
                    String::new()
                } else {
                    to_string(&to_primitive(e, PreferredType::String)?)?
                });
            }
            JsValue::String(parts.join(","))
        }
        ObjectKind::Function(f) => JsValue::String(format!("function {}() {{ [code] }}", f.name())),
        _ => match preferred_type {
            PreferredType::Number => JsValue::Number(JsNumberType::NaN),
            PreferredType::Default | PreferredType::String => {
                JsValue::String(format!("[object {}]", o.class_name()))
            }
        },
    })
}

pub fn to_boolean(v: &JsValue) -> bool {
    match v {
        JsValue::Undefined | JsValue::Null => false,
        JsValue::Boolean(b) => *b,
        JsValue::String(s) => !s.is_empty(),
        JsValue::Symbol(_) => true,
        JsValue::Number(n) => match n {
            JsNumberType::Integer(i) => *i != 0,
            JsNumberType::Float(f) => *f != 0.0,
            JsNumberType::NaN => false,
            JsNumberType::PositiveInfinity | JsNumberType::NegativeInfinity => true,
        },
        JsValue::Object(_) => true,
    }
}

pub fn to_number(v: &JsValue) -> Result<f64, JErrorType> {
    match v {
        JsValue::Undefined => Ok(f64::NAN),
        JsValue::Null => Ok(0.0),
        JsValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        JsValue::String(s) => Ok(string_to_number(s)),
        JsValue::Symbol(s) => Err(JErrorType::TypeError(format!(
            "'{}' symbol cannot be converted to number",
            s
        ))),
        JsValue::Number(n) => Ok(n.to_f64()),
        JsValue::Object(_) => to_number(&to_primitive(v, PreferredType::Number)?),
    }
}

pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, s.strip_prefix('+').unwrap_or(s)),
    };
    if digits == "Infinity" {
        return sign * f64::INFINITY;
    }
    let radix = |prefix_lower: &str, prefix_upper: &str, radix: u32| {
        digits
            .strip_prefix(prefix_lower)
            .or_else(|| digits.strip_prefix(prefix_upper))
            .map(|d| u64::from_str_radix(d, radix).map(|n| n as f64).unwrap_or(f64::NAN))
    };
    if sign > 0.0 {
        if let Some(n) = radix("0x", "0X", 16)
            .or_else(|| radix("0o", "0O", 8))
            .or_else(|| radix("0b", "0B", 2))
        {
            return n;
        }
    }
    if digits.chars().any(|c| c.is_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

pub fn number_to_string(n: f64) -> String {
    JsNumberType::from_f64(n).to_string()
}

pub fn to_string(v: &JsValue) -> Result<String, JErrorType> {
    match v {
        JsValue::Undefined => Ok(TYPE_STR_UNDEFINED.to_string()),
        JsValue::Null => Ok(TYPE_STR_NULL.to_string()),
        JsValue::Boolean(b) => Ok(b.to_string()),
        JsValue::String(s) => Ok(s.to_string()),
        JsValue::Symbol(s) => Err(JErrorType::TypeError(format!(
            "'{}' symbol cannot be converted to string",
            s
        ))),
        JsValue::Number(n) => Ok(n.to_string()),
        JsValue::Object(_) => to_string(&to_primitive(v, PreferredType::String)?),
    }
}

pub fn to_property_key(v: &JsValue) -> Result<PropertyKey, JErrorType> {
    match v {
        JsValue::Symbol(s) => Ok(PropertyKey::Sym(s.clone())),
        _ => {
            if let Some(i) = v.as_index() {
                return Ok(PropertyKey::Int(i));
            }
            Ok(PropertyKey::from_name(&to_string(v)?))
        }
    }
}

pub fn to_uint32(v: &JsValue) -> Result<u32, JErrorType> {
    let n = to_number(v)?;
    if !n.is_finite() {
        return Ok(0);
    }
    Ok(n.trunc().rem_euclid(4_294_967_296.0) as u32)
}

pub fn to_int32(v: &JsValue) -> Result<i32, JErrorType> {
    Ok(to_uint32(v)? as i32)
}
