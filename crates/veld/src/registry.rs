//! The module registry: interned name -> loaded module.
//!
//! Lookup and registration live here; the iterative import-resolution
//! algorithm operates on the whole context and lives in `context.rs`.

use indexmap::IndexMap;

use crate::heap::HeapId;

type Map = IndexMap<HeapId, HeapId, ahash::RandomState>;

#[derive(Debug, Default)]
pub(crate) struct ModuleRegistry {
    /// Interned module-name string -> module object. Insertion order keeps
    /// root gathering and diagnostics deterministic.
    modules: Map,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module. Returns false when the name is already taken.
    pub fn add(&mut self, name: HeapId, module: HeapId) -> bool {
        if self.modules.contains_key(&name) {
            return false;
        }
        self.modules.insert(name, module);
        true
    }

    pub fn find(&self, name: HeapId) -> Option<HeapId> {
        self.modules.get(&name).copied()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Modules persist until context teardown; both keys and values are
    /// roots.
    pub fn collect_roots(&self, work: &mut Vec<HeapId>) {
        for (&name, &module) in &self.modules {
            work.push(name);
            work.push(module);
        }
    }
}
