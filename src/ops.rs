use crate::Result;
use crate::ast::{Op, Position};
use crate::error::Error;
use crate::value::{Kind, Value};

/// Converts `v` to the kind `to`, returning `None` when the conversion
/// would lose information. Signed, unsigned and float families convert
/// among themselves; cross-family conversion is allowed only when the
/// target kind can represent the source value exactly. Strings convert
/// only to strings (and to/from bytes).
pub(crate) fn coerce(v: &Value, to: Kind, nil_to_zero: bool) -> Option<Value> {
    if to == Kind::Any || v.kind() == to {
        return Some(v.clone());
    }
    match (v, to) {
        (Value::Nil, _) if nil_to_zero => Value::zero(to),
        (Value::Uint(u), Kind::Int) => i64::try_from(*u).ok().map(Value::Int),
        (Value::Int(i), Kind::Uint) => u64::try_from(*i).ok().map(Value::Uint),
        (Value::Float(f), Kind::Int) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Some(Value::Int(*f as i64))
            } else {
                None
            }
        }
        (Value::Float(f), Kind::Uint) => {
            if f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64 {
                Some(Value::Uint(*f as u64))
            } else {
                None
            }
        }
        (Value::Int(i), Kind::Float) => Some(Value::Float(*i as f64)),
        (Value::Uint(u), Kind::Float) => Some(Value::Float(*u as f64)),
        (Value::Raw(s), Kind::Str) => Some(Value::Str(s.clone())),
        (Value::Str(s), Kind::Bytes) => Some(Value::Bytes(s.clone().into_bytes())),
        (Value::Bytes(b), Kind::Str) => String::from_utf8(b.clone()).ok().map(Value::Str),
        _ => None,
    }
}

/// Kind-coerced deep equality, the notion of equality used by `==`, `in`,
/// and map key lookup. Numeric kinds compare by value across families.
pub(crate) fn coerced_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Uint(a), Value::Uint(b)) => a == b,
        (Value::Int(a), Value::Uint(b)) | (Value::Uint(b), Value::Int(a)) => {
            u64::try_from(*a).is_ok_and(|a| a == *b)
        }
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (Value::Uint(a), Value::Float(b)) | (Value::Float(b), Value::Uint(a)) => *a as f64 == *b,
        (Value::Str(a), Value::Str(b)) | (Value::Raw(a), Value::Raw(b)) => a == b,
        (Value::Str(a), Value::Raw(b)) | (Value::Raw(b), Value::Str(a)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::Str(a), Value::Bytes(b)) | (Value::Bytes(b), Value::Str(a)) => {
            a.as_bytes() == b.as_slice()
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| coerced_eq(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter().all(|(k, v)| {
                    b.iter()
                        .any(|(bk, bv)| coerced_eq(k, bk) && coerced_eq(v, bv))
                })
        }
        (Value::Struct(a), Value::Struct(b)) => {
            a.name() == b.name()
                && a.fields().len() == b.fields().len()
                && a.fields()
                    .iter()
                    .all(|(name, v)| b.field(name).is_some_and(|bv| coerced_eq(v, bv)))
        }
        (Value::Func(a), Value::Func(b)) => a.ptr_eq(b),
        (Value::Foreign(a), Value::Foreign(b)) => std::sync::Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Evaluates `a op b`. The right operand is coerced to the left operand's
/// kind; both operands have already been evaluated (short-circuiting of
/// `&&`/`||` happens in the caller).
pub(crate) fn binary(
    op: Op,
    pos: &Position,
    a: Value,
    b: Value,
    nil_to_zero: bool,
) -> Result<Value> {
    if op == Op::In {
        return in_op(pos, &a, &b);
    }

    // Nil only supports equality. A nil right operand may instead be
    // substituted with the left kind's zero when nil-to-zero is on.
    if a.is_nil() || b.is_nil() {
        match op {
            Op::Eq => return Ok(Value::Bool(a.is_nil() && b.is_nil())),
            Op::Ne => return Ok(Value::Bool(!(a.is_nil() && b.is_nil()))),
            _ if a.is_nil() => return Err(Error::NilOperand { pos: pos.clone(), op }),
            _ => {
                if !nil_to_zero {
                    return Err(Error::NilOperand { pos: pos.clone(), op });
                }
            }
        }
    }

    // The right operand converts to the left operand's kind. When that
    // would lose information (an integer left of a fractional float), fall
    // back to the wider destination and do the arithmetic in float space.
    let (a, b) = match coerce(&b, a.kind(), nil_to_zero) {
        Some(b) => (a, b),
        None => {
            if matches!(a, Value::Int(_) | Value::Uint(_)) && matches!(b, Value::Float(_)) {
                (coerce(&a, Kind::Float, false).unwrap_or(a), b)
            } else {
                return Err(Error::TypeMismatch {
                    pos: pos.clone(),
                    left: a.kind(),
                    right: b.kind(),
                });
            }
        }
    };

    if matches!(op, Op::Eq | Op::Ne) {
        let eq = coerced_eq(&a, &b);
        return Ok(Value::Bool(if op == Op::Eq { eq } else { !eq }));
    }

    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => int_op(op, pos, *x, *y),
        (Value::Uint(x), Value::Uint(y)) => uint_op(op, pos, *x, *y),
        (Value::Float(x), Value::Float(y)) => float_op(op, pos, *x, *y),
        (Value::Str(x), Value::Str(y)) => match op {
            Op::Add => Ok(Value::Str(format!("{x}{y}"))),
            Op::And | Op::Or => Err(Error::LogicalNonBool { pos: pos.clone() }),
            _ => Err(Error::UnsupportedOp {
                pos: pos.clone(),
                op,
                kind: Kind::Str,
            }),
        },
        (Value::Bool(x), Value::Bool(y)) => match op {
            Op::And => Ok(Value::Bool(*x && *y)),
            Op::Or => Ok(Value::Bool(*x || *y)),
            _ => Err(Error::UnsupportedOp {
                pos: pos.clone(),
                op,
                kind: Kind::Bool,
            }),
        },
        _ => match op {
            Op::And | Op::Or => Err(Error::LogicalNonBool { pos: pos.clone() }),
            _ => Err(Error::UnsupportedOp {
                pos: pos.clone(),
                op,
                kind: a.kind(),
            }),
        },
    }
}

fn int_op(op: Op, pos: &Position, x: i64, y: i64) -> Result<Value> {
    Ok(match op {
        Op::Add => Value::Int(x.wrapping_add(y)),
        Op::Sub => Value::Int(x.wrapping_sub(y)),
        Op::Mul => Value::Int(x.wrapping_mul(y)),
        Op::Div => {
            if y == 0 {
                return Err(Error::DivisionByZero { pos: pos.clone() });
            }
            Value::Int(x.wrapping_div(y))
        }
        Op::Mod => {
            if y == 0 {
                return Err(Error::DivisionByZero { pos: pos.clone() });
            }
            Value::Int(x.wrapping_rem(y))
        }
        Op::Lt => Value::Bool(x < y),
        Op::Le => Value::Bool(x <= y),
        Op::Gt => Value::Bool(x > y),
        Op::Ge => Value::Bool(x >= y),
        Op::And | Op::Or => return Err(Error::LogicalNonBool { pos: pos.clone() }),
        Op::Eq | Op::Ne | Op::In => unreachable!("handled by binary"),
    })
}

fn uint_op(op: Op, pos: &Position, x: u64, y: u64) -> Result<Value> {
    Ok(match op {
        Op::Add => Value::Uint(x.wrapping_add(y)),
        Op::Sub => Value::Uint(x.wrapping_sub(y)),
        Op::Mul => Value::Uint(x.wrapping_mul(y)),
        Op::Div => {
            if y == 0 {
                return Err(Error::DivisionByZero { pos: pos.clone() });
            }
            Value::Uint(x / y)
        }
        Op::Mod => {
            if y == 0 {
                return Err(Error::DivisionByZero { pos: pos.clone() });
            }
            Value::Uint(x % y)
        }
        Op::Lt => Value::Bool(x < y),
        Op::Le => Value::Bool(x <= y),
        Op::Gt => Value::Bool(x > y),
        Op::Ge => Value::Bool(x >= y),
        Op::And | Op::Or => return Err(Error::LogicalNonBool { pos: pos.clone() }),
        Op::Eq | Op::Ne | Op::In => unreachable!("handled by binary"),
    })
}

fn float_op(op: Op, pos: &Position, x: f64, y: f64) -> Result<Value> {
    Ok(match op {
        Op::Add => Value::Float(x + y),
        Op::Sub => Value::Float(x - y),
        Op::Mul => Value::Float(x * y),
        Op::Div => {
            if y == 0.0 {
                return Err(Error::DivisionByZero { pos: pos.clone() });
            }
            Value::Float(x / y)
        }
        Op::Mod => return Err(Error::ModulusFloat { pos: pos.clone() }),
        Op::Lt => Value::Bool(x < y),
        Op::Le => Value::Bool(x <= y),
        Op::Gt => Value::Bool(x > y),
        Op::Ge => Value::Bool(x >= y),
        Op::And | Op::Or => return Err(Error::LogicalNonBool { pos: pos.clone() }),
        Op::Eq | Op::Ne | Op::In => unreachable!("handled by binary"),
    })
}

/// `a in b`: substring test for strings, membership by coerced equality
/// for arrays, key membership for maps.
fn in_op(pos: &Position, a: &Value, b: &Value) -> Result<Value> {
    match b {
        Value::Str(s) => match a {
            Value::Str(needle) | Value::Raw(needle) => Ok(Value::Bool(s.contains(needle))),
            _ => Err(Error::TypeMismatch {
                pos: pos.clone(),
                left: a.kind(),
                right: b.kind(),
            }),
        },
        Value::Array(items) => Ok(Value::Bool(items.iter().any(|item| coerced_eq(a, item)))),
        Value::Map(pairs) => Ok(Value::Bool(pairs.iter().any(|(k, _)| coerced_eq(a, k)))),
        _ => Err(Error::InOpInvalidTypes {
            pos: pos.clone(),
            left: a.kind(),
            right: b.kind(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pos() -> Position {
        Position::new(Arc::from("test"), 1, 1)
    }

    #[test]
    fn test_coerce_numeric_families() {
        assert_eq!(
            coerce(&Value::Float(1.0), Kind::Int, false),
            Some(Value::Int(1))
        );
        assert_eq!(coerce(&Value::Float(1.5), Kind::Int, false), None);
        assert_eq!(coerce(&Value::Int(-1), Kind::Uint, false), None);
        assert_eq!(
            coerce(&Value::Int(3), Kind::Float, false),
            Some(Value::Float(3.0))
        );
    }

    #[test]
    fn test_coerce_nil_to_zero() {
        assert_eq!(coerce(&Value::Nil, Kind::Int, false), None);
        assert_eq!(coerce(&Value::Nil, Kind::Int, true), Some(Value::Int(0)));
        assert_eq!(
            coerce(&Value::Nil, Kind::Str, true),
            Some(Value::Str(String::new()))
        );
    }

    #[test]
    fn test_mixed_arithmetic_uses_left_kind() {
        // 5 - 4.0 folds into int space because the left operand is int.
        let v = binary(Op::Sub, &pos(), Value::Int(5), Value::Float(4.0), false).unwrap();
        assert_eq!(v, Value::Int(1));

        let v = binary(Op::Sub, &pos(), Value::Float(4.0), Value::Int(3), false).unwrap();
        assert_eq!(v, Value::Float(1.0));
    }

    #[test]
    fn test_division_by_zero_fails() {
        assert!(matches!(
            binary(Op::Div, &pos(), Value::Int(1), Value::Int(0), false),
            Err(Error::DivisionByZero { .. })
        ));
        assert!(matches!(
            binary(Op::Div, &pos(), Value::Float(1.0), Value::Float(0.0), false),
            Err(Error::DivisionByZero { .. })
        ));
    }

    #[test]
    fn test_modulus_on_float_fails() {
        assert!(matches!(
            binary(Op::Mod, &pos(), Value::Float(4.0), Value::Int(2), false),
            Err(Error::ModulusFloat { .. })
        ));
    }

    #[test]
    fn test_nil_equality_only() {
        let v = binary(Op::Eq, &pos(), Value::Nil, Value::Nil, false).unwrap();
        assert_eq!(v, Value::Bool(true));
        let v = binary(Op::Ne, &pos(), Value::Int(1), Value::Nil, false).unwrap();
        assert_eq!(v, Value::Bool(true));
        assert!(matches!(
            binary(Op::Add, &pos(), Value::Nil, Value::Int(1), false),
            Err(Error::NilOperand { .. })
        ));
    }

    #[test]
    fn test_nil_to_zero_right_operand() {
        let v = binary(Op::Add, &pos(), Value::Int(5), Value::Nil, true).unwrap();
        assert_eq!(v, Value::Int(5));
    }

    #[test]
    fn test_in_membership() {
        let arr: Value = vec![1i64, 2, 3].into();
        assert_eq!(
            in_op(&pos(), &Value::Uint(2), &arr).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            in_op(&pos(), &Value::Int(9), &arr).unwrap(),
            Value::Bool(false)
        );

        let map = Value::Map(vec![(Value::Float(3.5), Value::Int(0))]);
        assert_eq!(
            in_op(&pos(), &Value::Float(3.5), &map).unwrap(),
            Value::Bool(true)
        );

        assert!(matches!(
            in_op(&pos(), &Value::Int(1), &Value::Int(2)),
            Err(Error::InOpInvalidTypes { .. })
        ));
    }

    #[test]
    fn test_string_concat_and_compare() {
        let v = binary(
            Op::Add,
            &pos(),
            Value::Str("ab".into()),
            Value::Str("cd".into()),
            false,
        )
        .unwrap();
        assert_eq!(v, Value::Str("abcd".into()));

        assert!(matches!(
            binary(
                Op::Lt,
                &pos(),
                Value::Str("a".into()),
                Value::Str("b".into()),
                false
            ),
            Err(Error::UnsupportedOp { .. })
        ));
    }
}
