//! Arithmetic and bitwise operators.
//!
//! Integer arithmetic is checked: overflow fails with `Overflow` (results
//! leaving the small-integer range promote to boxed integers first), and
//! division or remainder by zero fails with `DivisionByZero`. Mixed
//! integer/float operands promote to float. Bitwise operators require
//! integers; shift amounts wrap modulo 64 and right shift is arithmetic.

use crate::bytecode::Opcode;
use crate::error::{VmError, VmResult};
use crate::heap::{Heap, HeapData};
use crate::value::{make_integer, type_of, Value};

enum Num {
    Int(i64),
    Float(f64),
}

fn num(heap: &Heap, value: Value, op: Opcode) -> VmResult<Num> {
    match value {
        Value::Int(v) => Ok(Num::Int(v.get())),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Int(v) => Ok(Num::Int(*v)),
            HeapData::Float(f) => Ok(Num::Float(*f)),
            _ => Err(not_numeric(heap, value, op)),
        },
        _ => Err(not_numeric(heap, value, op)),
    }
}

fn not_numeric(heap: &Heap, value: Value, op: Opcode) -> VmError {
    VmError::type_error(format!(
        "operand of {op} must be a number, not {}",
        type_of(heap, value)
    ))
}

fn int_operand(heap: &Heap, value: Value, op: Opcode) -> VmResult<i64> {
    match num(heap, value, op)? {
        Num::Int(v) => Ok(v),
        Num::Float(_) => Err(VmError::type_error(format!("operand of {op} must be an integer"))),
    }
}

fn float(heap: &mut Heap, value: f64) -> VmResult<Value> {
    Ok(Value::Ref(heap.allocate(HeapData::Float(value))?))
}

fn checked(heap: &mut Heap, result: Option<i64>, op: Opcode) -> VmResult<Value> {
    match result {
        Some(value) => make_integer(heap, value),
        None => Err(VmError::overflow(format!("integer overflow in {op}"))),
    }
}

/// Executes a two-operand arithmetic or bitwise opcode.
pub(crate) fn binary_op(heap: &mut Heap, op: Opcode, a: Value, b: Value) -> VmResult<Value> {
    match op {
        Opcode::BAnd | Opcode::BOr | Opcode::BXor | Opcode::Shl | Opcode::Shr => {
            let x = int_operand(heap, a, op)?;
            let y = int_operand(heap, b, op)?;
            let result = match op {
                Opcode::BAnd => x & y,
                Opcode::BOr => x | y,
                Opcode::BXor => x ^ y,
                // Shift amounts wrap modulo the word width.
                Opcode::Shl => x.wrapping_shl(y as u32),
                Opcode::Shr => x.wrapping_shr(y as u32),
                _ => unreachable!(),
            };
            make_integer(heap, result)
        }
        _ => {
            let x = num(heap, a, op)?;
            let y = num(heap, b, op)?;
            match (x, y) {
                (Num::Int(x), Num::Int(y)) => int_binary(heap, op, x, y),
                (Num::Int(x), Num::Float(y)) => float_binary(heap, op, x as f64, y),
                (Num::Float(x), Num::Int(y)) => float_binary(heap, op, x, y as f64),
                (Num::Float(x), Num::Float(y)) => float_binary(heap, op, x, y),
            }
        }
    }
}

fn int_binary(heap: &mut Heap, op: Opcode, x: i64, y: i64) -> VmResult<Value> {
    match op {
        Opcode::Add => checked(heap, x.checked_add(y), op),
        Opcode::Sub => checked(heap, x.checked_sub(y), op),
        Opcode::Mul => checked(heap, x.checked_mul(y), op),
        Opcode::Div => {
            if y == 0 {
                return Err(VmError::division_by_zero());
            }
            checked(heap, x.checked_div(y), op)
        }
        Opcode::Mod => {
            if y == 0 {
                return Err(VmError::division_by_zero());
            }
            checked(heap, x.checked_rem(y), op)
        }
        Opcode::Pow => {
            if y < 0 {
                return float(heap, (x as f64).powf(y as f64));
            }
            let exp = u32::try_from(y).map_err(|_| VmError::overflow("integer overflow in Pow"))?;
            checked(heap, x.checked_pow(exp), op)
        }
        _ => unreachable!("not an arithmetic opcode: {op}"),
    }
}

fn float_binary(heap: &mut Heap, op: Opcode, x: f64, y: f64) -> VmResult<Value> {
    let result = match op {
        Opcode::Add => x + y,
        Opcode::Sub => x - y,
        Opcode::Mul => x * y,
        Opcode::Div => x / y,
        Opcode::Mod => x % y,
        Opcode::Pow => x.powf(y),
        _ => unreachable!("not an arithmetic opcode: {op}"),
    };
    float(heap, result)
}

pub(crate) fn unary_plus(heap: &mut Heap, value: Value) -> VmResult<Value> {
    // Verifies the operand is numeric; the value itself is unchanged.
    num(heap, value, Opcode::UPlus)?;
    Ok(value)
}

pub(crate) fn unary_minus(heap: &mut Heap, value: Value) -> VmResult<Value> {
    match num(heap, value, Opcode::UMinus)? {
        Num::Int(v) => checked(heap, v.checked_neg(), Opcode::UMinus),
        Num::Float(f) => float(heap, -f),
    }
}

pub(crate) fn bitwise_not(heap: &mut Heap, value: Value) -> VmResult<Value> {
    let v = int_operand(heap, value, Opcode::BNot)?;
    make_integer(heap, !v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::heap::HeapLimits;
    use crate::value::{extract_integer, SmallInt};

    fn int(n: i64) -> Value {
        Value::Int(SmallInt::new(n).unwrap())
    }

    #[test]
    fn small_int_overflow_promotes_to_boxed() {
        let mut heap = Heap::new(HeapLimits::default());
        let result = binary_op(&mut heap, Opcode::Add, int(SmallInt::MAX), int(1)).unwrap();
        assert!(matches!(result, Value::Ref(_)));
        assert_eq!(extract_integer(&heap, result), Some(SmallInt::MAX + 1));
    }

    #[test]
    fn i64_overflow_fails() {
        let mut heap = Heap::new(HeapLimits::default());
        let big = make_integer(&mut heap, i64::MAX).unwrap();
        let err = binary_op(&mut heap, Opcode::Add, big, int(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
    }

    #[test]
    fn division_by_zero_fails() {
        let mut heap = Heap::new(HeapLimits::default());
        let err = binary_op(&mut heap, Opcode::Div, int(1), int(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DivisionByZero);
        let err = binary_op(&mut heap, Opcode::Mod, int(1), int(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DivisionByZero);
    }

    #[test]
    fn min_div_minus_one_overflows() {
        let mut heap = Heap::new(HeapLimits::default());
        let min = make_integer(&mut heap, i64::MIN).unwrap();
        let err = binary_op(&mut heap, Opcode::Div, min, int(-1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        let mut heap = Heap::new(HeapLimits::default());
        let f = heap.allocate(HeapData::Float(0.5)).unwrap();
        let result = binary_op(&mut heap, Opcode::Add, int(1), Value::Ref(f)).unwrap();
        match result {
            Value::Ref(id) => match heap.get(id) {
                HeapData::Float(v) => assert!((v - 1.5).abs() < f64::EPSILON),
                other => panic!("expected float, got {other:?}"),
            },
            other => panic!("expected heap value, got {other:?}"),
        }
    }

    #[test]
    fn shifts_wrap_modulo_64() {
        let mut heap = Heap::new(HeapLimits::default());
        let result = binary_op(&mut heap, Opcode::Shl, int(1), int(65)).unwrap();
        assert_eq!(result.small_int(), Some(2));
        // Right shift is arithmetic.
        let result = binary_op(&mut heap, Opcode::Shr, int(-8), int(1)).unwrap();
        assert_eq!(result.small_int(), Some(-4));
    }

    #[test]
    fn negating_min_fails() {
        let mut heap = Heap::new(HeapLimits::default());
        let min = make_integer(&mut heap, i64::MIN).unwrap();
        let err = unary_minus(&mut heap, min).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overflow);
    }
}
