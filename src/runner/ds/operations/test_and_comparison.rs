use std::rc::Rc;

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::operations::type_conversion::{
    string_to_number, to_number, to_primitive, PreferredType,
};
use crate::runner::ds::value::JsValue;

fn is_same_value(a: &JsValue, b: &JsValue, strict_mode: bool) -> bool {
    match (a, b) {
        (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
        (JsValue::Number(na), JsValue::Number(nb)) => {
            let (x, y) = (na.to_f64(), nb.to_f64());
            if x.is_nan() || y.is_nan() {
                !strict_mode && x.is_nan() && y.is_nan()
            } else if !strict_mode && x == 0.0 && y == 0.0 {
                x.is_sign_negative() == y.is_sign_negative()
            } else {
                x == y
            }
        }
        (JsValue::String(x), JsValue::String(y)) => x == y,
        (JsValue::Boolean(x), JsValue::Boolean(y)) => x == y,
        (JsValue::Symbol(x), JsValue::Symbol(y)) => x == y,
        (JsValue::Object(x), JsValue::Object(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// SameValue: like `===` except that NaN equals NaN and +0 differs from -0.
pub fn same_value(a: &JsValue, b: &JsValue) -> bool {
    is_same_value(a, b, false)
}

pub fn strict_equality_comparison(a: &JsValue, b: &JsValue) -> bool {
    is_same_value(a, b, true)
}

/// The `==` operator.
pub fn abstract_equality_comparison(a: &JsValue, b: &JsValue) -> Result<bool, JErrorType> {
    Ok(match (a, b) {
        (JsValue::Undefined | JsValue::Null, JsValue::Undefined | JsValue::Null) => true,
        (JsValue::Undefined | JsValue::Null, _) | (_, JsValue::Undefined | JsValue::Null) => false,
        (JsValue::Number(_), JsValue::String(s)) => to_number(a)? == string_to_number(s),
        (JsValue::String(s), JsValue::Number(_)) => string_to_number(s) == to_number(b)?,
        (JsValue::Boolean(_), _) => {
            abstract_equality_comparison(&JsValue::from_f64(to_number(a)?), b)?
        }
        (_, JsValue::Boolean(_)) => {
            abstract_equality_comparison(a, &JsValue::from_f64(to_number(b)?))?
        }
        (JsValue::Object(_), JsValue::Object(_)) => strict_equality_comparison(a, b),
        (JsValue::Object(_), _) => {
            abstract_equality_comparison(&to_primitive(a, PreferredType::Default)?, b)?
        }
        (_, JsValue::Object(_)) => {
            abstract_equality_comparison(a, &to_primitive(b, PreferredType::Default)?)?
        }
        _ => strict_equality_comparison(a, b),
    })
}

/// `a < b`. Returns `None` when either side is NaN, which every relational
/// operator treats as false.
pub fn abstract_relational_comparison(a: &JsValue, b: &JsValue) -> Result<Option<bool>, JErrorType> {
    let pa = to_primitive(a, PreferredType::Number)?;
    let pb = to_primitive(b, PreferredType::Number)?;
    if let (JsValue::String(x), JsValue::String(y)) = (&pa, &pb) {
        return Ok(Some(x < y));
    }
    let (x, y) = (to_number(&pa)?, to_number(&pb)?);
    if x.is_nan() || y.is_nan() {
        Ok(None)
    } else {
        Ok(Some(x < y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_equality() {
        let nan = JsValue::from_f64(f64::NAN);
        assert!(!strict_equality_comparison(&nan, &nan));
        assert!(same_value(&nan, &nan));
        assert!(strict_equality_comparison(&JsValue::integer(1), &JsValue::from_f64(1.0)));
        assert!(!strict_equality_comparison(&JsValue::integer(1), &JsValue::from("1")));
    }

    #[test]
    fn test_abstract_equality() {
        assert!(abstract_equality_comparison(&JsValue::Null, &JsValue::Undefined).unwrap());
        assert!(abstract_equality_comparison(&JsValue::integer(1), &JsValue::from("1")).unwrap());
        assert!(abstract_equality_comparison(&JsValue::Boolean(true), &JsValue::integer(1)).unwrap());
        assert!(!abstract_equality_comparison(&JsValue::Null, &JsValue::integer(0)).unwrap());
    }

    #[test]
    fn test_relational_comparison() {
        assert_eq!(
            abstract_relational_comparison(&JsValue::integer(1), &JsValue::integer(2)).unwrap(),
            Some(true)
        );
        assert_eq!(
            abstract_relational_comparison(&JsValue::from("b"), &JsValue::from("a")).unwrap(),
            Some(false)
        );
        assert_eq!(
            abstract_relational_comparison(&JsValue::Undefined, &JsValue::integer(2)).unwrap(),
            None
        );
    }
}
