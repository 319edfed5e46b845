//! String and symbol interning.
//!
//! Both tables are private to the context and act as GC roots: an interned
//! string stays alive for the context's lifetime, which keeps symbol
//! identity stable. Two interned strings are identity-equal iff they are
//! character-equal, and every symbol is backed by an interned string.

use ahash::AHashMap;

use crate::error::VmResult;
use crate::heap::{Heap, HeapData, HeapId};
use crate::types::string::{Str, Symbol};

#[derive(Debug, Default)]
pub(crate) struct Interner {
    /// Content -> interned string object.
    strings: AHashMap<Box<str>, HeapId>,
    /// Interned string object -> symbol object.
    symbols: AHashMap<HeapId, HeapId>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the interned string for `text`, creating it on first use.
    pub fn intern(&mut self, heap: &mut Heap, text: &str) -> VmResult<HeapId> {
        if let Some(&id) = self.strings.get(text) {
            return Ok(id);
        }
        let mut string = Str::new(text);
        string.mark_interned();
        let id = heap.allocate(HeapData::Str(string))?;
        self.strings.insert(text.into(), id);
        Ok(id)
    }

    /// Interns an existing heap string: returns the previously interned
    /// object when a character-equal one exists, otherwise marks this one
    /// interned and stores it.
    pub fn intern_existing(&mut self, heap: &mut Heap, string: HeapId) -> VmResult<HeapId> {
        let text = match heap.get(string) {
            HeapData::Str(s) => {
                if s.is_interned() {
                    return Ok(string);
                }
                s.text().to_string()
            }
            _ => unreachable!("intern_existing on a non-string object"),
        };
        if let Some(&existing) = self.strings.get(text.as_str()) {
            return Ok(existing);
        }
        match heap.get_mut(string) {
            HeapData::Str(s) => s.mark_interned(),
            _ => unreachable!("checked above"),
        }
        self.strings.insert(text.into_boxed_str(), string);
        Ok(string)
    }

    /// Returns the context-wide symbol named `text`.
    pub fn symbol(&mut self, heap: &mut Heap, text: &str) -> VmResult<HeapId> {
        let name = self.intern(heap, text)?;
        self.symbol_for_string(heap, name)
    }

    /// Returns the symbol backed by the given string, interning the string
    /// first if needed.
    pub fn symbol_for_string(&mut self, heap: &mut Heap, string: HeapId) -> VmResult<HeapId> {
        let name = self.intern_existing(heap, string)?;
        if let Some(&symbol) = self.symbols.get(&name) {
            return Ok(symbol);
        }
        let symbol = heap.allocate(HeapData::Symbol(Symbol::new(name)))?;
        self.symbols.insert(name, symbol);
        Ok(symbol)
    }

    /// Number of interned strings, exposed through heap statistics.
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    pub fn collect_roots(&self, work: &mut Vec<HeapId>) {
        work.extend(self.strings.values().copied());
        work.extend(self.symbols.values().copied());
    }
}
