//! The bytecode interpreter.
//!
//! Execution is sliced per coroutine: [`Vm::run_slice`] takes the
//! coroutine's stack out of its heap object, runs frames until the coroutine
//! completes, suspends on an async native, or a GC trigger becomes due, and
//! then restores the stack. Collections only happen between slices, where
//! every live value is reachable from the roots.

pub(crate) mod binary;
pub(crate) mod call;
pub(crate) mod compare;

use std::rc::Rc;

use crate::bytecode::Opcode;
use crate::error::{ErrorKind, VmError, VmResult};
use crate::heap::{Heap, HeapData, HeapId};
use crate::intern::Interner;
use crate::schedule::Scheduler;
use crate::tracer::VmTracer;
use crate::types::coroutine::{Coroutine, CoroutineStack};
use crate::types::function::{closure_ancestor, ClosureContext, Function};
use crate::types::iter::{iter_advance, Iter, IterItem};
use crate::types::methods::TypeSystem;
use crate::types::record::{record_set, Record};
use crate::types::set::set_insert;
use crate::types::string::Str;
use crate::types::table::{table_get, table_set, Table};
use crate::types::tuple::{Array, Tuple};
use crate::value::{extract_integer, truthy, type_of, value_equal, value_to_string, Value};

pub(crate) use call::CallOutcome;

/// How a coroutine slice ended.
pub(crate) enum SliceOutcome {
    /// The coroutine completed (result or error stored on it).
    Done,
    /// Parked on an unfulfilled resume token.
    Waiting,
    /// A collection trigger is due; the stack is restored and the coroutine
    /// stays `Running`.
    GcPause,
}

enum Control {
    Done(Value),
    Waiting,
    GcPause,
}

/// What a frame-level dispatch loop returned for.
enum StepEvent {
    /// A call or return changed the frame stack; re-cache and continue.
    FrameChange,
    /// The outermost frame returned.
    Done(Value),
    /// An async native parked the coroutine.
    Suspended,
}

/// Cached code of the active frame. The byte blob is shared from the `Code`
/// object so the heap stays mutable while instructions decode.
struct ActiveCode {
    code: Rc<[u8]>,
    pc: usize,
}

impl ActiveCode {
    fn fetch_op(&mut self) -> VmResult<Opcode> {
        let Some(&byte) = self.code.get(self.pc) else {
            return Err(VmError::new(
                ErrorKind::ModuleFormat,
                "end of code reached without return from function",
            ));
        };
        self.pc += 1;
        Opcode::decode(byte)
            .ok_or_else(|| VmError::new(ErrorKind::ModuleFormat, format!("invalid opcode byte {byte:#04x}")))
    }

    fn fetch_bytes<const N: usize>(&mut self) -> VmResult<[u8; N]> {
        let end = self.pc + N;
        let slice = self
            .code
            .get(self.pc..end)
            .ok_or_else(|| VmError::new(ErrorKind::ModuleFormat, "truncated instruction operand"))?;
        self.pc = end;
        Ok(slice.try_into().expect("length checked"))
    }

    fn fetch_u32(&mut self) -> VmResult<u32> {
        Ok(u32::from_be_bytes(self.fetch_bytes()?))
    }

    fn fetch_i64(&mut self) -> VmResult<i64> {
        Ok(i64::from_be_bytes(self.fetch_bytes()?))
    }

    fn fetch_f64(&mut self) -> VmResult<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(self.fetch_bytes()?)))
    }

    fn jump_to(&mut self, target: u32) -> VmResult<()> {
        let target = target as usize;
        if target >= self.code.len() {
            return Err(VmError::new(ErrorKind::ModuleFormat, "jump target is out of bounds"));
        }
        self.pc = target;
        Ok(())
    }
}

/// Writes the decoded position back into the active frame before a call or
/// suspension so execution resumes after the instruction.
fn sync_pc(stack: &mut CoroutineStack, pc: usize) {
    stack.top_frame_mut().expect("no active frame").pc = pc;
}

pub(crate) struct Vm<'a> {
    pub heap: &'a mut Heap,
    pub interner: &'a mut Interner,
    pub types: &'a TypeSystem,
    pub scheduler: &'a mut Scheduler,
    pub tracer: &'a mut dyn VmTracer,
}

impl Vm<'_> {
    /// Runs one slice of the given coroutine. The coroutine must be in the
    /// `Running` state; its stack is taken for the duration.
    pub fn run_slice(&mut self, coro: HeapId) -> SliceOutcome {
        let (stack, start) = {
            let c = self.coroutine_mut(coro);
            (c.take_stack(), c.take_start())
        };
        let mut stack = stack.unwrap_or_else(|| Box::new(CoroutineStack::new()));

        match self.run_until_block(coro, &mut stack, start) {
            Ok(Control::Done(value)) => {
                self.coroutine_mut(coro).finish(Ok(value));
                SliceOutcome::Done
            }
            Ok(Control::Waiting) => {
                let c = self.coroutine_mut(coro);
                c.restore_stack(stack);
                c.set_state(crate::types::coroutine::CoroutineState::Waiting);
                SliceOutcome::Waiting
            }
            Ok(Control::GcPause) => {
                self.coroutine_mut(coro).restore_stack(stack);
                SliceOutcome::GcPause
            }
            Err(error) => {
                self.coroutine_mut(coro).finish(Err(error));
                SliceOutcome::Done
            }
        }
    }

    pub(crate) fn coroutine_mut(&mut self, id: HeapId) -> &mut Coroutine {
        match self.heap.get_mut(id) {
            HeapData::Coroutine(c) => c,
            _ => unreachable!("scheduled object is not a coroutine"),
        }
    }

    fn run_until_block(
        &mut self,
        coro: HeapId,
        stack: &mut CoroutineStack,
        start: Option<(Value, Vec<Value>)>,
    ) -> VmResult<Control> {
        if let Some((function, args)) = start {
            stack.push_value(function)?;
            let argc = args.len() as u32;
            for arg in args {
                stack.push_value(arg)?;
            }
            match self.do_call(stack, coro, argc, 0)? {
                CallOutcome::PushedFrame | CallOutcome::Returned => {}
                CallOutcome::Suspended => return Ok(Control::Waiting),
            }
        }

        loop {
            if stack.frame_count() == 0 {
                debug_assert_eq!(stack.value_count(), 1, "exactly the result must remain");
                return Ok(Control::Done(stack.top_value(0)));
            }
            match self.run_frame(stack, coro)? {
                StepEvent::FrameChange => {
                    if self.heap.gc_due() {
                        return Ok(Control::GcPause);
                    }
                }
                StepEvent::Done(value) => return Ok(Control::Done(value)),
                StepEvent::Suspended => return Ok(Control::Waiting),
            }
        }
    }

    /// Decodes and executes instructions of the top frame until the frame
    /// stack changes or the coroutine blocks.
    #[expect(clippy::too_many_lines, reason = "the dispatch loop is one dense match by design")]
    fn run_frame(&mut self, stack: &mut CoroutineStack, coro: HeapId) -> VmResult<StepEvent> {
        let frame = *stack.top_frame().expect("no active frame");
        let mut active = ActiveCode {
            code: self.template_code(frame.template)?,
            pc: frame.pc,
        };

        loop {
            let op_pc = active.pc;
            let op = active.fetch_op()?;
            self.tracer.instruction(op, op_pc);

            match op {
                Opcode::LoadNull => stack.push_value(Value::Null)?,
                Opcode::LoadTrue => stack.push_value(Value::Bool(true))?,
                Opcode::LoadFalse => stack.push_value(Value::Bool(false))?,
                Opcode::LoadInt => {
                    let value = active.fetch_i64()?;
                    let value = crate::value::make_integer(self.heap, value)?;
                    stack.push_value(value)?;
                }
                Opcode::LoadFloat => {
                    let value = active.fetch_f64()?;
                    let id = self.heap.allocate(HeapData::Float(value))?;
                    stack.push_value(Value::Ref(id))?;
                }

                Opcode::LoadModule => {
                    let index = active.fetch_u32()?;
                    let value = self.module_member(frame.template, index)?;
                    stack.push_value(value)?;
                }
                Opcode::StoreModule => {
                    let index = active.fetch_u32()?;
                    let value = stack.pop_value();
                    self.set_module_member(frame.template, index, value)?;
                }

                Opcode::LoadParam => {
                    let index = active.fetch_u32()?;
                    if index >= frame.args {
                        return Err(VmError::new(ErrorKind::ModuleFormat, "parameter index out of bounds"));
                    }
                    let value = stack.arg(index as usize);
                    stack.push_value(value)?;
                }
                Opcode::StoreParam => {
                    let index = active.fetch_u32()?;
                    if index >= frame.args {
                        return Err(VmError::new(ErrorKind::ModuleFormat, "parameter index out of bounds"));
                    }
                    let value = stack.pop_value();
                    stack.set_arg(index as usize, value);
                }
                Opcode::LoadLocal => {
                    let index = active.fetch_u32()?;
                    if index >= frame.locals {
                        return Err(VmError::new(ErrorKind::ModuleFormat, "local index out of bounds"));
                    }
                    let value = stack.local(index as usize);
                    if value.is_undefined() {
                        return Err(VmError::name_error("local variable is undefined"));
                    }
                    stack.push_value(value)?;
                }
                Opcode::StoreLocal => {
                    let index = active.fetch_u32()?;
                    if index >= frame.locals {
                        return Err(VmError::new(ErrorKind::ModuleFormat, "local index out of bounds"));
                    }
                    let value = stack.pop_value();
                    stack.set_local(index as usize, value);
                }
                Opcode::LoadClosure => match frame.closure {
                    Some(closure) => stack.push_value(Value::Ref(closure))?,
                    None => return Err(VmError::type_error("function does not have a closure")),
                },
                Opcode::LoadContext => {
                    let level = active.fetch_u32()?;
                    let index = active.fetch_u32()?;
                    let context = stack
                        .top_value(0)
                        .heap_id()
                        .ok_or_else(|| VmError::type_error("value is not a closure context"))?;
                    let context = closure_ancestor(self.heap, context, level)?;
                    let value = match self.heap.get(context) {
                        HeapData::ClosureContext(c) => c
                            .get(index as usize)
                            .ok_or_else(|| VmError::index_out_of_bounds(i64::from(index), c.len()))?,
                        _ => unreachable!("closure_ancestor returns contexts"),
                    };
                    if value.is_undefined() {
                        return Err(VmError::name_error("closure variable is undefined"));
                    }
                    stack.set_top(0, value);
                }
                Opcode::StoreContext => {
                    let level = active.fetch_u32()?;
                    let index = active.fetch_u32()?;
                    let value = stack.top_value(0);
                    let context = stack
                        .top_value(1)
                        .heap_id()
                        .ok_or_else(|| VmError::type_error("value is not a closure context"))?;
                    let context = closure_ancestor(self.heap, context, level)?;
                    let stored = match self.heap.get_mut(context) {
                        HeapData::ClosureContext(c) => c.set(index as usize, value),
                        _ => unreachable!("closure_ancestor returns contexts"),
                    };
                    if !stored {
                        return Err(VmError::index_out_of_bounds(i64::from(index), 0));
                    }
                    stack.pop_values(2);
                }

                Opcode::LoadMember => {
                    let symbol_index = active.fetch_u32()?;
                    let symbol = self.symbol_member(frame.template, symbol_index)?;
                    let object = stack.top_value(0);
                    let value = self.load_named_member(object, symbol)?;
                    stack.set_top(0, value);
                }
                Opcode::StoreMember => {
                    let symbol_index = active.fetch_u32()?;
                    let symbol = self.symbol_member(frame.template, symbol_index)?;
                    let value = stack.top_value(0);
                    let object = stack.top_value(1);
                    self.store_named_member(object, symbol, value)?;
                    stack.pop_values(2);
                }
                Opcode::LoadTupleMember => {
                    let index = active.fetch_u32()?;
                    let object = stack.top_value(0);
                    let value = match object.heap_id().map(|id| self.heap.get(id)) {
                        Some(HeapData::Tuple(t)) => t
                            .get(index as usize)
                            .ok_or_else(|| VmError::index_out_of_bounds(i64::from(index), t.len()))?,
                        _ => return Err(VmError::type_error("value is not a tuple")),
                    };
                    stack.set_top(0, value);
                }
                Opcode::StoreTupleMember => {
                    let index = active.fetch_u32()?;
                    let value = stack.top_value(0);
                    let object = stack.top_value(1);
                    match object.heap_id() {
                        Some(id) => match self.heap.get_mut(id) {
                            HeapData::Tuple(t) => {
                                let len = t.len();
                                if !t.set(index as usize, value) {
                                    return Err(VmError::index_out_of_bounds(i64::from(index), len));
                                }
                            }
                            _ => return Err(VmError::type_error("value is not a tuple")),
                        },
                        None => return Err(VmError::type_error("value is not a tuple")),
                    }
                    stack.pop_values(2);
                }
                Opcode::LoadIndex => {
                    let index = stack.top_value(0);
                    let object = stack.top_value(1);
                    let value = self.load_index(object, index)?;
                    stack.set_top(1, value);
                    stack.pop_values(1);
                }
                Opcode::StoreIndex => {
                    let value = stack.top_value(0);
                    let index = stack.top_value(1);
                    let object = stack.top_value(2);
                    self.store_index(object, index, value)?;
                    stack.pop_values(3);
                }

                Opcode::Dup => {
                    let top = stack.top_value(0);
                    stack.push_value(top)?;
                }
                Opcode::Pop => {
                    stack.pop_value();
                }
                Opcode::Rot2 => {
                    let a = stack.top_value(0);
                    let b = stack.top_value(1);
                    stack.set_top(0, b);
                    stack.set_top(1, a);
                }
                Opcode::Rot3 => {
                    let a = stack.top_value(0);
                    let b = stack.top_value(1);
                    let c = stack.top_value(2);
                    stack.set_top(0, b);
                    stack.set_top(1, c);
                    stack.set_top(2, a);
                }
                Opcode::Rot4 => {
                    let a = stack.top_value(0);
                    let b = stack.top_value(1);
                    let c = stack.top_value(2);
                    let d = stack.top_value(3);
                    stack.set_top(0, b);
                    stack.set_top(1, c);
                    stack.set_top(2, d);
                    stack.set_top(3, a);
                }

                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::Pow
                | Opcode::BAnd
                | Opcode::BOr
                | Opcode::BXor
                | Opcode::Shl
                | Opcode::Shr => {
                    let b = stack.top_value(0);
                    let a = stack.top_value(1);
                    let result = binary::binary_op(self.heap, op, a, b)?;
                    stack.set_top(1, result);
                    stack.pop_values(1);
                }
                Opcode::UPlus => {
                    let a = stack.top_value(0);
                    let result = binary::unary_plus(self.heap, a)?;
                    stack.set_top(0, result);
                }
                Opcode::UMinus => {
                    let a = stack.top_value(0);
                    let result = binary::unary_minus(self.heap, a)?;
                    stack.set_top(0, result);
                }
                Opcode::BNot => {
                    let a = stack.top_value(0);
                    let result = binary::bitwise_not(self.heap, a)?;
                    stack.set_top(0, result);
                }
                Opcode::LNot => {
                    let a = stack.top_value(0);
                    stack.set_top(0, Value::Bool(!truthy(a)));
                }

                Opcode::Lt | Opcode::Lte | Opcode::Gt | Opcode::Gte => {
                    let b = stack.top_value(0);
                    let a = stack.top_value(1);
                    let result = compare::compare_op(self.heap, op, a, b)?;
                    stack.set_top(1, result);
                    stack.pop_values(1);
                }
                Opcode::Eq => {
                    let b = stack.top_value(0);
                    let a = stack.top_value(1);
                    let result = Value::Bool(value_equal(self.heap, a, b));
                    stack.set_top(1, result);
                    stack.pop_values(1);
                }
                Opcode::NEq => {
                    let b = stack.top_value(0);
                    let a = stack.top_value(1);
                    let result = Value::Bool(!value_equal(self.heap, a, b));
                    stack.set_top(1, result);
                    stack.pop_values(1);
                }

                Opcode::MkArray => {
                    let count = active.fetch_u32()? as usize;
                    let values = stack.top_values(count).to_vec();
                    let id = self.heap.allocate(HeapData::Array(Array::from_values(values)))?;
                    stack.pop_values(count);
                    stack.push_value(Value::Ref(id))?;
                }
                Opcode::MkTuple => {
                    let count = active.fetch_u32()? as usize;
                    let values = stack.top_values(count).to_vec();
                    let id = self.heap.allocate(HeapData::Tuple(Tuple::from_values(values)))?;
                    stack.pop_values(count);
                    stack.push_value(Value::Ref(id))?;
                }
                Opcode::MkMap => {
                    let pairs = active.fetch_u32()? as usize;
                    let id = self.heap.allocate(HeapData::Table(Table::with_capacity(pairs)))?;
                    for i in 0..pairs {
                        let key = stack.top_value((pairs - i) * 2 - 1);
                        let value = stack.top_value((pairs - i) * 2 - 2);
                        table_set(self.heap, id, key, value);
                    }
                    stack.pop_values(pairs * 2);
                    stack.push_value(Value::Ref(id))?;
                }
                Opcode::MkSet => {
                    let count = active.fetch_u32()? as usize;
                    let id = self.heap.allocate(HeapData::Set(crate::types::set::Set::new()))?;
                    for i in 0..count {
                        let value = stack.top_value(count - 1 - i);
                        set_insert(self.heap, id, value);
                    }
                    stack.pop_values(count);
                    stack.push_value(Value::Ref(id))?;
                }
                Opcode::MkRecord => {
                    let index = active.fetch_u32()?;
                    let template = self.module_member(frame.template, index)?;
                    let template_id = template
                        .heap_id()
                        .filter(|&id| matches!(self.heap.get(id), HeapData::RecordTemplate(_)))
                        .ok_or_else(|| VmError::type_error("module member is not a record template"))?;
                    let key_count = match self.heap.get(template_id) {
                        HeapData::RecordTemplate(t) => t.keys().len(),
                        _ => unreachable!("checked above"),
                    };
                    let id = self
                        .heap
                        .allocate(HeapData::Record(Record::new(template_id, key_count)))?;
                    stack.push_value(Value::Ref(id))?;
                }
                Opcode::MkContext => {
                    let size = active.fetch_u32()? as usize;
                    let parent = stack.top_value(0);
                    let parent = match parent {
                        Value::Null => None,
                        Value::Ref(id) if matches!(self.heap.get(id), HeapData::ClosureContext(_)) => Some(id),
                        _ => {
                            return Err(VmError::type_error(
                                "parent of a closure context must be null or a closure context",
                            ));
                        }
                    };
                    let id = self
                        .heap
                        .allocate(HeapData::ClosureContext(ClosureContext::new(size, parent)))?;
                    stack.set_top(0, Value::Ref(id));
                }
                Opcode::MkClosure => {
                    let context = stack.top_value(0);
                    let template = stack.top_value(1);
                    let template_id = template
                        .heap_id()
                        .filter(|&id| matches!(self.heap.get(id), HeapData::FunctionTemplate(_)))
                        .ok_or_else(|| VmError::type_error("first operand of MkClosure must be a function template"))?;
                    let closure = match context {
                        Value::Null => None,
                        Value::Ref(id) if matches!(self.heap.get(id), HeapData::ClosureContext(_)) => Some(id),
                        _ => {
                            return Err(VmError::type_error(
                                "second operand of MkClosure must be null or a closure context",
                            ));
                        }
                    };
                    let id = self.heap.allocate(HeapData::Function(Function {
                        template: template_id,
                        closure,
                    }))?;
                    stack.set_top(1, Value::Ref(id));
                    stack.pop_values(1);
                }
                Opcode::MkIterator => {
                    let target = stack
                        .top_value(0)
                        .heap_id()
                        .ok_or_else(|| VmError::type_error("value is not iterable"))?;
                    let iter = Iter::new(self.heap, target)?;
                    let id = self.heap.allocate(HeapData::Iter(iter))?;
                    stack.set_top(0, Value::Ref(id));
                }
                Opcode::IteratorNext => {
                    let iter = stack
                        .top_value(0)
                        .heap_id()
                        .ok_or_else(|| VmError::type_error("value is not an iterator"))?;
                    match iter_advance(self.heap, iter)? {
                        IterItem::Single(value) => {
                            stack.push_value(value)?;
                            stack.push_value(Value::Bool(true))?;
                        }
                        IterItem::Pair(key, value) => {
                            let id = self
                                .heap
                                .allocate(HeapData::Tuple(Tuple::from_values(vec![key, value])))?;
                            stack.push_value(Value::Ref(id))?;
                            stack.push_value(Value::Bool(true))?;
                        }
                        IterItem::Done => {
                            stack.push_value(Value::Null)?;
                            stack.push_value(Value::Bool(false))?;
                        }
                    }
                }

                Opcode::Jmp => {
                    let target = active.fetch_u32()?;
                    active.jump_to(target)?;
                }
                Opcode::JmpTrue => {
                    let target = active.fetch_u32()?;
                    if truthy(stack.top_value(0)) {
                        active.jump_to(target)?;
                    }
                }
                Opcode::JmpTruePop => {
                    let target = active.fetch_u32()?;
                    if truthy(stack.top_value(0)) {
                        active.jump_to(target)?;
                    }
                    stack.pop_values(1);
                }
                Opcode::JmpFalse => {
                    let target = active.fetch_u32()?;
                    if !truthy(stack.top_value(0)) {
                        active.jump_to(target)?;
                    }
                }
                Opcode::JmpFalsePop => {
                    let target = active.fetch_u32()?;
                    if !truthy(stack.top_value(0)) {
                        active.jump_to(target)?;
                    }
                    stack.pop_values(1);
                }
                Opcode::JmpNull => {
                    let target = active.fetch_u32()?;
                    if stack.top_value(0).is_null() {
                        active.jump_to(target)?;
                    }
                }
                Opcode::JmpNotNull => {
                    let target = active.fetch_u32()?;
                    if !stack.top_value(0).is_null() {
                        active.jump_to(target)?;
                    }
                }

                Opcode::Call => {
                    let argc = active.fetch_u32()?;
                    sync_pc(stack, active.pc);
                    return match self.do_call(stack, coro, argc, 0)? {
                        CallOutcome::PushedFrame | CallOutcome::Returned => Ok(StepEvent::FrameChange),
                        CallOutcome::Suspended => Ok(StepEvent::Suspended),
                    };
                }
                Opcode::LoadMethod => {
                    let symbol_index = active.fetch_u32()?;
                    let symbol = self.symbol_member(frame.template, symbol_index)?;
                    self.load_method(stack, symbol)?;
                }
                Opcode::CallMethod => {
                    let argc = active.fetch_u32()?;
                    sync_pc(stack, active.pc);
                    let receiver = stack.top_value(argc as usize);
                    let outcome = if receiver.is_null() {
                        self.do_call(stack, coro, argc, 1)?
                    } else {
                        self.do_call(stack, coro, argc + 1, 0)?
                    };
                    return match outcome {
                        CallOutcome::PushedFrame | CallOutcome::Returned => Ok(StepEvent::FrameChange),
                        CallOutcome::Suspended => Ok(StepEvent::Suspended),
                    };
                }
                Opcode::Ret => {
                    let frame = *stack.top_frame().expect("no active frame");
                    let result = stack.top_value(0);
                    stack.pop_frame();
                    let mut pop = frame.args as usize;
                    if frame.flags & crate::types::coroutine::FRAME_POP_RECEIVER != 0 {
                        pop += 1;
                    }
                    stack.pop_values(pop);
                    stack.set_top(0, result);
                    return if stack.frame_count() == 0 {
                        Ok(StepEvent::Done(result))
                    } else {
                        Ok(StepEvent::FrameChange)
                    };
                }
                Opcode::Rethrow => {
                    let value = stack.pop_value();
                    return Err(VmError::new(
                        ErrorKind::Rethrown,
                        value_to_string(self.heap, value),
                    ));
                }
                Opcode::AssertFail => {
                    let message = stack.top_value(0);
                    let expression = stack.top_value(1);
                    let expression = match expression.heap_id().map(|id| self.heap.get(id)) {
                        Some(HeapData::Str(s)) => s.text().to_string(),
                        _ => return Err(VmError::type_error("assertion expression must be a string")),
                    };
                    let rendered = match message {
                        Value::Null => format!("assertion `{expression}` failed"),
                        Value::Ref(id) => match self.heap.get(id) {
                            HeapData::Str(s) => format!("assertion `{expression}` failed: {}", s.text()),
                            _ => return Err(VmError::type_error("assertion message must be a string or null")),
                        },
                        _ => return Err(VmError::type_error("assertion message must be a string or null")),
                    };
                    return Err(VmError::new(ErrorKind::Assertion, rendered));
                }

                Opcode::Formatter => {
                    let id = self.heap.allocate(HeapData::Array(Array::new()))?;
                    stack.push_value(Value::Ref(id))?;
                }
                Opcode::AppendFormat => {
                    let value = stack.top_value(0);
                    let pieces = stack
                        .top_value(1)
                        .heap_id()
                        .filter(|&id| matches!(self.heap.get(id), HeapData::Array(_)))
                        .ok_or_else(|| VmError::type_error("formatter state must be an array"))?;
                    let text = value_to_string(self.heap, value);
                    let piece = self.heap.allocate(HeapData::Str(Str::new(text)))?;
                    match self.heap.get_mut(pieces) {
                        HeapData::Array(a) => a.append(Value::Ref(piece)),
                        _ => unreachable!("checked above"),
                    }
                    stack.pop_values(1);
                }
                Opcode::FormatResult => {
                    let pieces = stack
                        .top_value(0)
                        .heap_id()
                        .filter(|&id| matches!(self.heap.get(id), HeapData::Array(_)))
                        .ok_or_else(|| VmError::type_error("formatter state must be an array"))?;
                    let mut text = String::new();
                    match self.heap.get(pieces) {
                        HeapData::Array(a) => {
                            for value in a.values() {
                                match value.heap_id().map(|id| self.heap.get(id)) {
                                    Some(HeapData::Str(s)) => text.push_str(s.text()),
                                    _ => return Err(VmError::type_error("formatter pieces must be strings")),
                                }
                            }
                        }
                        _ => unreachable!("checked above"),
                    }
                    let id = self.heap.allocate(HeapData::Str(Str::new(text)))?;
                    stack.set_top(0, Value::Ref(id));
                }
            }
        }
    }

    fn template_code(&self, template: HeapId) -> VmResult<Rc<[u8]>> {
        let code_id = match self.heap.get(template) {
            HeapData::FunctionTemplate(t) => t.code,
            _ => return Err(VmError::type_error("frame template is not a function template")),
        };
        match self.heap.get(code_id) {
            HeapData::Code(code) => Ok(code.share()),
            _ => Err(VmError::type_error("function template code slot is not code")),
        }
    }

    /// Reads member `index` of the active frame's home module.
    pub(crate) fn module_member(&self, template: HeapId, index: u32) -> VmResult<Value> {
        let members = self.module_members(template)?;
        match self.heap.get(members) {
            HeapData::Tuple(t) => t
                .get(index as usize)
                .ok_or_else(|| VmError::new(ErrorKind::ModuleFormat, "module member index out of bounds")),
            _ => unreachable!("module members slot holds a non-tuple"),
        }
    }

    fn set_module_member(&mut self, template: HeapId, index: u32, value: Value) -> VmResult<()> {
        let members = self.module_members(template)?;
        match self.heap.get_mut(members) {
            HeapData::Tuple(t) => {
                if t.set(index as usize, value) {
                    Ok(())
                } else {
                    Err(VmError::new(ErrorKind::ModuleFormat, "module member index out of bounds"))
                }
            }
            _ => unreachable!("module members slot holds a non-tuple"),
        }
    }

    fn module_members(&self, template: HeapId) -> VmResult<HeapId> {
        let module = match self.heap.get(template) {
            HeapData::FunctionTemplate(t) => t.module,
            _ => return Err(VmError::type_error("frame template is not a function template")),
        };
        match self.heap.get(module) {
            HeapData::Module(m) => Ok(m.members()),
            _ => Err(VmError::type_error("function home is not a module")),
        }
    }

    /// Reads a member that must be a symbol (method and member names).
    fn symbol_member(&self, template: HeapId, index: u32) -> VmResult<HeapId> {
        let value = self.module_member(template, index)?;
        value
            .heap_id()
            .filter(|&id| matches!(self.heap.get(id), HeapData::Symbol(_)))
            .ok_or_else(|| VmError::new(ErrorKind::ModuleFormat, "module member is not a symbol"))
    }

    fn load_named_member(&self, object: Value, symbol: HeapId) -> VmResult<Value> {
        match object.heap_id().map(|id| self.heap.get(id)) {
            Some(HeapData::Module(m)) => m.find_exported(self.heap, symbol).ok_or_else(|| {
                VmError::name_error(format!(
                    "module {} has no export #{}",
                    m.name_text(self.heap),
                    self.symbol_text(symbol)
                ))
            }),
            Some(HeapData::Record(r)) => r.get(self.heap, symbol).ok_or_else(|| {
                VmError::key_error(format!("record has no key #{}", self.symbol_text(symbol)))
            }),
            _ => Err(VmError::type_error(format!(
                "values of type {} have no named members",
                type_of(self.heap, object)
            ))),
        }
    }

    fn store_named_member(&mut self, object: Value, symbol: HeapId, value: Value) -> VmResult<()> {
        match object.heap_id() {
            Some(id) if matches!(self.heap.get(id), HeapData::Record(_)) => {
                if record_set(self.heap, id, symbol, value) {
                    Ok(())
                } else {
                    Err(VmError::key_error(format!(
                        "record has no key #{}",
                        self.symbol_text(symbol)
                    )))
                }
            }
            _ => Err(VmError::type_error(format!(
                "cannot store named members on values of type {}",
                type_of(self.heap, object)
            ))),
        }
    }

    fn load_index(&self, object: Value, index: Value) -> VmResult<Value> {
        match object.heap_id().map(|id| (id, self.heap.get(id))) {
            Some((_, HeapData::Array(a))) => {
                let raw = self.sequence_index(index, a.len())?;
                Ok(a.get(raw).expect("bounds checked"))
            }
            Some((_, HeapData::Tuple(t))) => {
                let raw = self.sequence_index(index, t.len())?;
                Ok(t.get(raw).expect("bounds checked"))
            }
            Some((id, HeapData::Table(_))) => Ok(table_get(self.heap, id, index).unwrap_or(Value::Null)),
            Some((_, HeapData::Record(r))) => {
                let symbol = index
                    .heap_id()
                    .filter(|&sid| matches!(self.heap.get(sid), HeapData::Symbol(_)))
                    .ok_or_else(|| VmError::type_error("record index must be a symbol"))?;
                r.get(self.heap, symbol).ok_or_else(|| {
                    VmError::key_error(format!("record has no key #{}", self.symbol_text(symbol)))
                })
            }
            _ => Err(VmError::type_error(format!(
                "values of type {} are not indexable",
                type_of(self.heap, object)
            ))),
        }
    }

    fn store_index(&mut self, object: Value, index: Value, value: Value) -> VmResult<()> {
        let Some(id) = object.heap_id() else {
            return Err(VmError::type_error(format!(
                "values of type {} are not indexable",
                type_of(self.heap, object)
            )));
        };
        match self.heap.get(id) {
            HeapData::Array(a) => {
                let raw = self.sequence_index(index, a.len())?;
                match self.heap.get_mut(id) {
                    HeapData::Array(a) => {
                        a.set(raw, value);
                    }
                    _ => unreachable!("object changed kind mid-instruction"),
                }
                Ok(())
            }
            HeapData::Tuple(t) => {
                let raw = self.sequence_index(index, t.len())?;
                match self.heap.get_mut(id) {
                    HeapData::Tuple(t) => {
                        t.set(raw, value);
                    }
                    _ => unreachable!("object changed kind mid-instruction"),
                }
                Ok(())
            }
            HeapData::Table(_) => {
                table_set(self.heap, id, index, value);
                Ok(())
            }
            HeapData::Record(_) => {
                let symbol = index
                    .heap_id()
                    .filter(|&sid| matches!(self.heap.get(sid), HeapData::Symbol(_)))
                    .ok_or_else(|| VmError::type_error("record index must be a symbol"))?;
                if record_set(self.heap, id, symbol, value) {
                    Ok(())
                } else {
                    Err(VmError::key_error(format!(
                        "record has no key #{}",
                        self.symbol_text(symbol)
                    )))
                }
            }
            other => Err(VmError::type_error(format!(
                "values of type {} are not indexable",
                other.type_of()
            ))),
        }
    }

    fn sequence_index(&self, index: Value, len: usize) -> VmResult<usize> {
        let raw = extract_integer(self.heap, index)
            .ok_or_else(|| VmError::type_error("sequence index must be an integer"))?;
        if raw < 0 || raw as usize >= len {
            return Err(VmError::index_out_of_bounds(raw, len));
        }
        Ok(raw as usize)
    }

    fn symbol_text(&self, symbol: HeapId) -> String {
        match self.heap.get(symbol) {
            HeapData::Symbol(s) => s.name_text(self.heap).to_string(),
            _ => "<corrupt symbol>".to_string(),
        }
    }
}
