//! Coroutines and their growable value/frame stacks.

use strum::Display;

use crate::error::{VmError, VmResult};
use crate::heap::{trace_value, trace_values, Heap, HeapData, HeapId};
use crate::value::Value;

/// Scheduling state of a coroutine.
///
/// `Ready` coroutines sit in exactly one ready queue; `Waiting` coroutines
/// hold an unfulfilled resume token; `Done` coroutines carry a result and
/// have released their stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CoroutineState {
    Ready,
    Running,
    Waiting,
    Done,
}

/// An independent unit of execution, scheduled cooperatively.
#[derive(Debug)]
pub(crate) struct Coroutine {
    name: HeapId,
    function: Value,
    /// Call arguments, consumed when the first slice starts.
    args: Vec<Value>,
    started: bool,
    state: CoroutineState,
    /// Present while the coroutine is live; dropped on completion. Taken out
    /// by the interpreter for the duration of a slice.
    stack: Option<Box<CoroutineStack>>,
    /// Serial of the resume token this coroutine waits on, if any.
    pending_token: Option<u64>,
    result: Option<Result<Value, VmError>>,
}

impl Coroutine {
    pub fn new(name: HeapId, function: Value, args: Vec<Value>) -> Self {
        Self {
            name,
            function,
            args,
            started: false,
            state: CoroutineState::Ready,
            stack: None,
            pending_token: None,
            result: None,
        }
    }

    pub fn name_text<'h>(&self, heap: &'h Heap) -> &'h str {
        match heap.get(self.name) {
            HeapData::Str(s) => s.text(),
            _ => "<corrupt coroutine>",
        }
    }

    pub fn state(&self) -> CoroutineState {
        self.state
    }

    pub fn set_state(&mut self, state: CoroutineState) {
        self.state = state;
    }

    pub fn function(&self) -> Value {
        self.function
    }

    /// Takes the pending call arguments; only meaningful on the first
    /// slice.
    pub fn take_start(&mut self) -> Option<(Value, Vec<Value>)> {
        if self.started {
            return None;
        }
        self.started = true;
        Some((self.function, std::mem::take(&mut self.args)))
    }

    pub fn take_stack(&mut self) -> Option<Box<CoroutineStack>> {
        self.stack.take()
    }

    pub fn restore_stack(&mut self, stack: Box<CoroutineStack>) {
        self.stack = Some(stack);
    }

    pub fn stack_mut(&mut self) -> Option<&mut CoroutineStack> {
        self.stack.as_deref_mut()
    }

    pub fn pending_token(&self) -> Option<u64> {
        self.pending_token
    }

    pub fn set_pending_token(&mut self, serial: Option<u64>) {
        self.pending_token = serial;
    }

    /// Completes the coroutine: stores the result and releases the stack.
    pub fn finish(&mut self, result: Result<Value, VmError>) {
        self.result = Some(result);
        self.state = CoroutineState::Done;
        self.stack = None;
        self.pending_token = None;
    }

    pub fn result(&self) -> Option<&Result<Value, VmError>> {
        self.result.as_ref()
    }

    pub(crate) fn trace(&self, work: &mut Vec<HeapId>) {
        work.push(self.name);
        trace_value(self.function, work);
        trace_values(&self.args, work);
        if let Some(stack) = &self.stack {
            stack.trace(work);
        }
        if let Some(Ok(value)) = &self.result {
            trace_value(*value, work);
        }
    }

    pub(crate) fn estimate_size(&self) -> usize {
        let stack = self
            .stack
            .as_ref()
            .map_or(0, |stack| stack.capacity * size_of::<Value>() + stack.frames.len() * size_of::<Frame>());
        stack + self.args.len() * size_of::<Value>()
    }
}

/// Set on a frame when a plain attribute was invoked through the method
/// calling convention; `ret` pops the unused receiver slot.
pub(crate) const FRAME_POP_RECEIVER: u8 = 1;

/// A call frame. Its arguments and locals live on the value stack starting
/// at `base`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    /// The `FunctionTemplate` being executed.
    pub template: HeapId,
    /// The captured environment, if the callee is a closure.
    pub closure: Option<HeapId>,
    /// Byte offset of the next instruction.
    pub pc: usize,
    pub args: u32,
    pub locals: u32,
    /// Value-stack index of the first argument.
    pub base: usize,
    pub flags: u8,
}

const INITIAL_STACK_CAPACITY: usize = 2 * 1024;

/// Upper bound on the value stack; exceeding it fails with
/// `StackOverflow`.
pub(crate) const MAX_STACK_CAPACITY: usize = 64 * 1024;

/// A coroutine's growable value and frame storage.
///
/// The capacity is logical: pushes beyond it double the budget up to
/// [`MAX_STACK_CAPACITY`] rather than failing, so deep recursion surfaces as
/// `StackOverflow` instead of unbounded growth.
#[derive(Debug)]
pub(crate) struct CoroutineStack {
    values: Vec<Value>,
    frames: Vec<Frame>,
    capacity: usize,
}

impl CoroutineStack {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            frames: Vec::new(),
            capacity: INITIAL_STACK_CAPACITY,
        }
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn push_value(&mut self, value: Value) -> VmResult<()> {
        if self.values.len() == self.capacity {
            self.grow()?;
        }
        self.values.push(value);
        Ok(())
    }

    /// Inserts `value` `depth` slots below the top.
    pub fn insert_value(&mut self, depth: usize, value: Value) -> VmResult<()> {
        if self.values.len() == self.capacity {
            self.grow()?;
        }
        let at = self.values.len() - depth;
        self.values.insert(at, value);
        Ok(())
    }

    pub fn pop_value(&mut self) -> Value {
        self.values.pop().expect("value stack underflow")
    }

    pub fn pop_values(&mut self, count: usize) {
        let len = self.values.len();
        assert!(count <= len, "value stack underflow");
        self.values.truncate(len - count);
    }

    /// Reads `depth` slots below the top (0 = top).
    pub fn top_value(&self, depth: usize) -> Value {
        self.values[self.values.len() - 1 - depth]
    }

    pub fn set_top(&mut self, depth: usize, value: Value) {
        let len = self.values.len();
        self.values[len - 1 - depth] = value;
    }

    pub fn top_values(&self, count: usize) -> &[Value] {
        &self.values[self.values.len() - count..]
    }

    /// Pushes a frame whose `args` topmost values become the arguments, and
    /// reserves the callee's local slots.
    pub fn push_frame(
        &mut self,
        template: HeapId,
        closure: Option<HeapId>,
        args: u32,
        locals: u32,
        flags: u8,
    ) -> VmResult<()> {
        let base = self.values.len() - args as usize;
        self.frames.push(Frame {
            template,
            closure,
            pc: 0,
            args,
            locals,
            base,
            flags,
        });
        for _ in 0..locals {
            self.push_value(Value::Undefined)?;
        }
        Ok(())
    }

    /// Drops the top frame's locals and temporaries, leaving its arguments
    /// on the stack.
    pub fn pop_frame(&mut self) {
        let frame = self.frames.pop().expect("frame stack underflow");
        self.values.truncate(frame.base + frame.args as usize);
    }

    pub fn top_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn top_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Argument slot `index` of the top frame.
    pub fn arg(&self, index: usize) -> Value {
        let frame = self.frames.last().expect("no active frame");
        self.values[frame.base + index]
    }

    pub fn set_arg(&mut self, index: usize, value: Value) {
        let frame = *self.frames.last().expect("no active frame");
        self.values[frame.base + index] = value;
    }

    /// Local slot `index` of the top frame.
    pub fn local(&self, index: usize) -> Value {
        let frame = self.frames.last().expect("no active frame");
        self.values[frame.base + frame.args as usize + index]
    }

    pub fn set_local(&mut self, index: usize, value: Value) {
        let frame = *self.frames.last().expect("no active frame");
        self.values[frame.base + frame.args as usize + index] = value;
    }

    fn grow(&mut self) -> VmResult<()> {
        let next = self.capacity * 2;
        if next > MAX_STACK_CAPACITY {
            return Err(VmError::stack_overflow());
        }
        self.capacity = next;
        Ok(())
    }

    pub(crate) fn trace(&self, work: &mut Vec<HeapId>) {
        trace_values(&self.values, work);
        for frame in &self.frames {
            work.push(frame.template);
            if let Some(closure) = frame.closure {
                work.push(closure);
            }
        }
    }
}
