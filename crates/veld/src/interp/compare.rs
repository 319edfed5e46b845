//! Ordered comparison opcodes.

use std::cmp::Ordering;

use crate::bytecode::Opcode;
use crate::error::VmResult;
use crate::heap::Heap;
use crate::value::{value_compare, Value};

/// Executes `Lt`/`Lte`/`Gt`/`Gte`. Equality opcodes use structural equality
/// directly and never fail.
pub(crate) fn compare_op(heap: &Heap, op: Opcode, a: Value, b: Value) -> VmResult<Value> {
    let ordering = value_compare(heap, a, b)?;
    let result = match op {
        Opcode::Lt => ordering == Ordering::Less,
        Opcode::Lte => ordering != Ordering::Greater,
        Opcode::Gt => ordering == Ordering::Greater,
        Opcode::Gte => ordering != Ordering::Less,
        _ => unreachable!("not a comparison opcode: {op}"),
    };
    Ok(Value::Bool(result))
}
