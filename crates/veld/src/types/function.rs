//! Callable object kinds: code blobs, function templates, closures, bound
//! methods.

use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::heap::{Heap, HeapData, HeapId};
use crate::value::Value;

/// An immutable bytecode blob. The bytes are shared so the interpreter can
/// hold the code of the active frame while mutating the heap.
#[derive(Debug, Clone)]
pub(crate) struct Code {
    bytes: Rc<[u8]>,
}

impl Code {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn share(&self) -> Rc<[u8]> {
        Rc::clone(&self.bytes)
    }
}

/// Immutable description of a callable: name, home module, arity, local
/// slot count, and code.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FunctionTemplate {
    /// Interned name string.
    pub name: HeapId,
    /// The module whose members tuple the function's bytecode indexes into.
    pub module: HeapId,
    pub params: u32,
    pub locals: u32,
    /// A `Code` object.
    pub code: HeapId,
}

impl FunctionTemplate {
    pub fn name_text<'h>(&self, heap: &'h Heap) -> &'h str {
        match heap.get(self.name) {
            HeapData::Str(s) => s.text(),
            _ => "<corrupt template>",
        }
    }
}

/// A template paired with an optional captured environment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Function {
    pub template: HeapId,
    pub closure: Option<HeapId>,
}

impl Function {
    pub fn name_text<'h>(&self, heap: &'h Heap) -> &'h str {
        match heap.get(self.template) {
            HeapData::FunctionTemplate(t) => t.name_text(heap),
            _ => "<corrupt function>",
        }
    }
}

/// A chain of captured variable slots. Each context points at its parent,
/// forming a tree per top-level function.
#[derive(Debug)]
pub(crate) struct ClosureContext {
    parent: Option<HeapId>,
    slots: Vec<Value>,
}

impl ClosureContext {
    pub fn new(size: usize, parent: Option<HeapId>) -> Self {
        Self {
            parent,
            slots: vec![Value::Undefined; size],
        }
    }

    pub fn parent(&self) -> Option<HeapId> {
        self.parent
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.slots.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// Walks `level` parent links up from `context`.
pub(crate) fn closure_ancestor(heap: &Heap, context: HeapId, level: u32) -> VmResult<HeapId> {
    let mut current = context;
    for _ in 0..level {
        let parent = match heap.get(current) {
            HeapData::ClosureContext(c) => c.parent(),
            _ => return Err(VmError::type_error("value is not a closure context")),
        };
        current = parent.ok_or_else(|| VmError::type_error("closure context chain is too short"))?;
    }
    match heap.get(current) {
        HeapData::ClosureContext(_) => Ok(current),
        _ => Err(VmError::type_error("value is not a closure context")),
    }
}

/// A callable bundled with its receiver, produced by method dispatch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoundMethod {
    pub function: Value,
    pub receiver: Value,
}
