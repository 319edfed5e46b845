//! Sets, a thin wrapper over the ordered hash table.

use crate::heap::{Heap, HeapData, HeapId};
use crate::types::table::Table;
use crate::value::Value;

/// An insertion-ordered set of values.
#[derive(Debug, Default)]
pub(crate) struct Set {
    table: Table,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn contains(&self, heap: &Heap, value: Value) -> bool {
        self.table.contains(heap, value)
    }

    /// Inserts `value`; false if an equal value is already present.
    pub fn insert(&mut self, heap: &Heap, value: Value) -> bool {
        self.table.set(heap, value, Value::Null)
    }

    pub fn remove(&mut self, heap: &Heap, value: Value) {
        self.table.remove(heap, value);
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.table.iter().map(|(key, _)| key)
    }

    pub fn next_from(&self, pos: &mut usize) -> Option<Value> {
        self.table.next_from(pos).map(|(key, _)| key)
    }

    pub(crate) fn trace(&self, work: &mut Vec<HeapId>) {
        self.table.trace(work);
    }

    pub(crate) fn estimate_size(&self) -> usize {
        self.table.estimate_size()
    }
}

pub(crate) fn set_insert(heap: &mut Heap, set: HeapId, value: Value) -> bool {
    let mut data = heap.take_data(set);
    let inserted = match &mut data {
        HeapData::Set(s) => s.insert(heap, value),
        _ => unreachable!("set_insert on a non-set object"),
    };
    heap.restore_data(set, data);
    inserted
}

pub(crate) fn set_remove(heap: &mut Heap, set: HeapId, value: Value) {
    let mut data = heap.take_data(set);
    match &mut data {
        HeapData::Set(s) => s.remove(heap, value),
        _ => unreachable!("set_remove on a non-set object"),
    }
    heap.restore_data(set, data);
}

pub(crate) fn set_contains(heap: &Heap, set: HeapId, value: Value) -> bool {
    match heap.get(set) {
        HeapData::Set(s) => s.contains(heap, value),
        _ => unreachable!("set_contains on a non-set object"),
    }
}
