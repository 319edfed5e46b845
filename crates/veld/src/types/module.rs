//! Live modules and import placeholders.

use crate::heap::{Heap, HeapData, HeapId};
use crate::value::{extract_integer, Value};

/// A loaded module: an interned name, the members tuple in topological
/// order, the exports table, and the one-shot initializer.
#[derive(Debug)]
pub(crate) struct Module {
    name: HeapId,
    members: HeapId,
    exports: HeapId,
    init: Option<Value>,
    initialized: bool,
}

impl Module {
    pub fn new(name: HeapId, members: HeapId, exports: HeapId) -> Self {
        Self {
            name,
            members,
            exports,
            init: None,
            initialized: false,
        }
    }

    /// The interned name string.
    pub fn name(&self) -> HeapId {
        self.name
    }

    pub fn name_text<'h>(&self, heap: &'h Heap) -> &'h str {
        match heap.get(self.name) {
            HeapData::Str(s) => s.text(),
            _ => "<corrupt module>",
        }
    }

    /// The members tuple.
    pub fn members(&self) -> HeapId {
        self.members
    }

    /// The exports table, mapping symbols to member indices.
    pub fn exports(&self) -> HeapId {
        self.exports
    }

    pub fn init(&self) -> Option<Value> {
        self.init
    }

    pub fn set_init(&mut self, init: Value) {
        self.init = Some(init);
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_initialized(&mut self) {
        self.initialized = true;
    }

    /// Resolves an exported symbol to the current member value.
    pub fn find_exported(&self, heap: &Heap, symbol: HeapId) -> Option<Value> {
        let exports = match heap.get(self.exports) {
            HeapData::Table(t) => t,
            _ => unreachable!("module exports slot holds a non-table"),
        };
        let index = exports.get(heap, Value::Ref(symbol))?;
        let index = extract_integer(heap, index).expect("export table values are member indices");
        let members = match heap.get(self.members) {
            HeapData::Tuple(t) => t,
            _ => unreachable!("module members slot holds a non-tuple"),
        };
        members.get(index as usize)
    }
}

/// Placeholder stored in a members tuple while the import is pending. The
/// registry replaces it with the imported module during resolution.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UnresolvedImport {
    /// Interned name of the module to import.
    name: HeapId,
}

impl UnresolvedImport {
    pub fn new(name: HeapId) -> Self {
        Self { name }
    }

    pub fn name(&self) -> HeapId {
        self.name
    }

    pub fn name_text<'h>(&self, heap: &'h Heap) -> &'h str {
        match heap.get(self.name) {
            HeapData::Str(s) => s.text(),
            _ => "<corrupt import>",
        }
    }
}
