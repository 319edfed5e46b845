//! Records and their shared key templates.

use crate::heap::{Heap, HeapData, HeapId};
use crate::value::Value;

/// An ordered set of symbol keys shared by every record instantiated from
/// it.
#[derive(Debug)]
pub(crate) struct RecordTemplate {
    keys: Vec<HeapId>,
}

impl RecordTemplate {
    /// The caller (the module loader) has verified that every key is a
    /// symbol.
    pub fn new(keys: Vec<HeapId>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[HeapId] {
        &self.keys
    }

    pub fn position(&self, key: HeapId) -> Option<usize> {
        self.keys.iter().position(|&k| k == key)
    }
}

/// A key→value mapping whose key set is fixed at creation.
///
/// Values are stored positionally, parallel to the template's key array.
/// Fields start out as `Null`.
#[derive(Debug)]
pub(crate) struct Record {
    template: HeapId,
    values: Vec<Value>,
}

impl Record {
    pub fn new(template: HeapId, key_count: usize) -> Self {
        Self {
            template,
            values: vec![Value::Null; key_count],
        }
    }

    pub fn template(&self) -> HeapId {
        self.template
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn template_keys<'h>(&self, heap: &'h Heap) -> &'h [HeapId] {
        match heap.get(self.template) {
            HeapData::RecordTemplate(t) => t.keys(),
            _ => unreachable!("record template slot holds a non-template"),
        }
    }

    /// Looks up a field by symbol. `None` when the symbol is not one of the
    /// record's keys.
    pub fn get(&self, heap: &Heap, key: HeapId) -> Option<Value> {
        let position = self.template_keys(heap).iter().position(|&k| k == key)?;
        Some(self.values[position])
    }

    /// Iterates `(symbol, value)` pairs in template order.
    pub fn fields<'h>(&'h self, heap: &'h Heap) -> impl Iterator<Item = (Value, Value)> + 'h {
        self.template_keys(heap)
            .iter()
            .zip(&self.values)
            .map(|(&key, &value)| (Value::Ref(key), value))
    }
}

/// Stores a field. Succeeds (returns true) iff `key` is one of the keys
/// fixed at record creation; otherwise a no-op returning false.
pub(crate) fn record_set(heap: &mut Heap, record: HeapId, key: HeapId, value: Value) -> bool {
    let mut data = heap.take_data(record);
    let stored = match &mut data {
        HeapData::Record(r) => {
            let position = match heap.get(r.template) {
                HeapData::RecordTemplate(t) => t.position(key),
                _ => unreachable!("record template slot holds a non-template"),
            };
            match position {
                Some(position) => {
                    r.values[position] = value;
                    true
                }
                None => false,
            }
        }
        _ => unreachable!("record_set on a non-record object"),
    };
    heap.restore_data(record, data);
    stored
}
