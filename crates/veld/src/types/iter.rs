//! Internal iterator objects backing the iteration opcodes.

use crate::error::{VmError, VmResult};
use crate::heap::{Heap, HeapData, HeapId};
use crate::value::Value;

/// A cursor over an array, tuple, table, or set.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Iter {
    target: HeapId,
    pos: usize,
}

/// One step of iteration. Tables yield key/value pairs; the interpreter
/// materializes the tuple.
pub(crate) enum IterItem {
    Single(Value),
    Pair(Value, Value),
    Done,
}

impl Iter {
    /// Fails with `TypeError` when the target kind is not iterable.
    pub fn new(heap: &Heap, target: HeapId) -> VmResult<Self> {
        match heap.get(target) {
            HeapData::Array(_) | HeapData::Tuple(_) | HeapData::Table(_) | HeapData::Set(_) => {
                Ok(Self { target, pos: 0 })
            }
            other => Err(VmError::type_error(format!(
                "values of type {} are not iterable",
                other.type_of()
            ))),
        }
    }

    pub fn target(&self) -> HeapId {
        self.target
    }
}

/// Advances the iterator object at `iter` by one step.
pub(crate) fn iter_advance(heap: &mut Heap, iter: HeapId) -> VmResult<IterItem> {
    let Iter { target, mut pos } = match heap.get(iter) {
        HeapData::Iter(i) => *i,
        _ => return Err(VmError::type_error("value is not an iterator")),
    };

    let item = match heap.get(target) {
        HeapData::Array(a) => match a.get(pos) {
            Some(value) => {
                pos += 1;
                IterItem::Single(value)
            }
            None => IterItem::Done,
        },
        HeapData::Tuple(t) => match t.get(pos) {
            Some(value) => {
                pos += 1;
                IterItem::Single(value)
            }
            None => IterItem::Done,
        },
        HeapData::Table(t) => match t.next_from(&mut pos) {
            Some((key, value)) => IterItem::Pair(key, value),
            None => IterItem::Done,
        },
        HeapData::Set(s) => match s.next_from(&mut pos) {
            Some(value) => IterItem::Single(value),
            None => IterItem::Done,
        },
        _ => return Err(VmError::type_error("iterator target is not iterable")),
    };

    match heap.get_mut(iter) {
        HeapData::Iter(i) => i.pos = pos,
        _ => unreachable!("iterator vanished mid-step"),
    }
    Ok(item)
}
