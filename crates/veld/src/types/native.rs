//! Native function and native object integration.

use std::any::Any;
use std::fmt;

use crate::error::{VmError, VmResult};
use crate::heap::{Heap, HeapData, HeapId};
use crate::intern::Interner;
use crate::schedule::ResumeToken;
use crate::types::string::Str;
use crate::value::{extract_integer, make_integer, value_to_string, Value};

/// The slice of context a native callback may touch: the heap and the
/// intern tables. Natives allocate through this instead of raw heap access
/// so the conversion helpers stay in one place.
pub struct NativeCtx<'a> {
    pub(crate) heap: &'a mut Heap,
    pub(crate) interner: &'a mut Interner,
}

impl NativeCtx<'_> {
    /// An integer value, embedded or boxed as needed.
    pub fn integer(&mut self, value: i64) -> VmResult<Value> {
        make_integer(self.heap, value)
    }

    pub fn float(&mut self, value: f64) -> VmResult<Value> {
        Ok(Value::Ref(self.heap.allocate(HeapData::Float(value))?))
    }

    /// A fresh (non-interned) string.
    pub fn string(&mut self, text: &str) -> VmResult<Value> {
        Ok(Value::Ref(self.heap.allocate(HeapData::Str(Str::new(text)))?))
    }

    /// The context-wide symbol for `name`.
    pub fn symbol(&mut self, name: &str) -> VmResult<Value> {
        Ok(Value::Ref(self.interner.symbol(self.heap, name)?))
    }

    /// Reads an embedded or boxed integer.
    #[must_use]
    pub fn as_int(&self, value: Value) -> Option<i64> {
        extract_integer(self.heap, value)
    }

    /// Renders a value for diagnostics.
    #[must_use]
    pub fn display(&self, value: Value) -> String {
        value_to_string(self.heap, value)
    }

    /// The `index`-th argument, or a `TypeError` naming the arity problem.
    pub fn arg(&self, args: &[Value], index: usize) -> VmResult<Value> {
        args.get(index)
            .copied()
            .ok_or_else(|| VmError::type_error(format!("missing argument {index}")))
    }

    pub fn int_arg(&self, args: &[Value], index: usize) -> VmResult<i64> {
        let value = self.arg(args, index)?;
        self.as_int(value)
            .ok_or_else(|| VmError::type_error(format!("argument {index} must be an integer")))
    }

    /// Opaque host data with an optional sweep-time finalizer. The
    /// finalizer must not allocate.
    pub fn native_object(
        &mut self,
        data: Box<dyn Any>,
        finalizer: Option<Finalizer>,
    ) -> VmResult<Value> {
        let has_finalizer = finalizer.is_some();
        let id = self.heap.allocate(HeapData::NativeObject(NativeObject::new(data, finalizer)))?;
        if has_finalizer {
            self.heap.register_finalizer(id);
        }
        Ok(Value::Ref(id))
    }

    /// Borrows the host data of a native object.
    #[must_use]
    pub fn native_data<T: 'static>(&self, value: Value) -> Option<&T> {
        let id = value.heap_id()?;
        match self.heap.get(id) {
            HeapData::NativeObject(native) => native.data().downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// Synchronous host callback: receives the argument view and produces the
/// call result in place.
pub type NativeSyncFn = fn(&mut NativeCtx<'_>, &[Value]) -> VmResult<Value>;

/// Asynchronous host callback: receives a resume token instead of producing
/// a result. The calling coroutine parks until the host fulfills the token
/// through `Context::resume`.
pub type NativeAsyncFn = fn(&mut NativeCtx<'_>, &[Value], ResumeToken) -> VmResult<()>;

#[derive(Clone, Copy)]
pub(crate) enum NativeKind {
    Sync(NativeSyncFn),
    Async(NativeAsyncFn),
}

impl fmt::Debug for NativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Sync"),
            Self::Async(_) => f.write_str("Async"),
        }
    }
}

/// A host callback with arity metadata.
#[derive(Debug)]
pub(crate) struct NativeFunction {
    name: HeapId,
    min_params: u32,
    kind: NativeKind,
}

impl NativeFunction {
    pub fn new(name: HeapId, min_params: u32, kind: NativeKind) -> Self {
        Self {
            name,
            min_params,
            kind,
        }
    }

    pub fn name(&self) -> HeapId {
        self.name
    }

    pub fn name_text<'h>(&self, heap: &'h Heap) -> &'h str {
        match heap.get(self.name) {
            HeapData::Str(s) => s.text(),
            _ => "<corrupt native>",
        }
    }

    pub fn min_params(&self) -> u32 {
        self.min_params
    }

    pub fn kind(&self) -> NativeKind {
        self.kind
    }
}

/// Cleanup callback for native objects; runs during sweep, must not
/// allocate.
pub type Finalizer = fn(&mut dyn Any);

/// Opaque host data carried on the heap.
pub(crate) struct NativeObject {
    data: Box<dyn Any>,
    finalizer: Option<Finalizer>,
}

impl NativeObject {
    pub fn new(data: Box<dyn Any>, finalizer: Option<Finalizer>) -> Self {
        Self { data, finalizer }
    }

    pub fn data(&self) -> &dyn Any {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut dyn Any {
        &mut *self.data
    }

    /// Runs the cleanup callback once; subsequent calls are no-ops.
    pub fn run_finalizer(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            finalizer(&mut *self.data);
        }
    }
}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObject")
            .field("has_finalizer", &self.finalizer.is_some())
            .finish_non_exhaustive()
    }
}
