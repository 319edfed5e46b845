//! Strings and symbols.

use std::cell::Cell;

use crate::heap::{Heap, HeapData, HeapId};

/// An immutable UTF-8 string with a lazily computed hash and an interned
/// flag. Two interned strings are identity-equal iff character-equal.
#[derive(Debug)]
pub(crate) struct Str {
    text: Box<str>,
    hash: Cell<Option<u64>>,
    interned: bool,
}

impl Str {
    pub fn new(text: impl Into<Box<str>>) -> Self {
        Self {
            text: text.into(),
            hash: Cell::new(None),
            interned: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_interned(&self) -> bool {
        self.interned
    }

    pub fn mark_interned(&mut self) {
        self.interned = true;
    }

    /// Returns the cached content hash, computing it with `hasher` on first
    /// use.
    pub fn hash_value(&self, hasher: impl Fn(&[u8]) -> u64) -> u64 {
        if let Some(hash) = self.hash.get() {
            return hash;
        }
        let hash = hasher(self.text.as_bytes());
        self.hash.set(Some(hash));
        hash
    }
}

/// A reference-equality identifier backed by an interned string.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Symbol {
    name: HeapId,
}

impl Symbol {
    pub fn new(name: HeapId) -> Self {
        Self { name }
    }

    /// The interned name string.
    pub fn name(&self) -> HeapId {
        self.name
    }

    pub fn name_text<'h>(&self, heap: &'h Heap) -> &'h str {
        match heap.get(self.name) {
            HeapData::Str(s) => s.text(),
            _ => "<corrupt symbol>",
        }
    }
}
