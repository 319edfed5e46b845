//! The function call protocol and method dispatch.

use smallvec::SmallVec;

use super::Vm;
use crate::error::{VmError, VmResult};
use crate::heap::{HeapData, HeapId};
use crate::types::coroutine::{CoroutineStack, FRAME_POP_RECEIVER};
use crate::types::methods::MethodLookup;
use crate::types::native::{NativeCtx, NativeKind};
use crate::value::{type_of, Value};

/// What a call attempt did to the execution state.
pub(crate) enum CallOutcome {
    /// A bytecode frame was pushed; the interpreter continues in the
    /// callee.
    PushedFrame,
    /// A sync native evaluated in place; the result replaced the callable
    /// and its arguments.
    Returned,
    /// An async native parked the coroutine on a resume token.
    Suspended,
}

impl Vm<'_> {
    /// Calls the value sitting `argc + extra` slots below the top, with the
    /// topmost `argc` values as arguments. `extra` counts the unused
    /// receiver slot of the method calling convention (popped on return).
    pub(crate) fn do_call(
        &mut self,
        stack: &mut CoroutineStack,
        coro: HeapId,
        argc: u32,
        extra: u32,
    ) -> VmResult<CallOutcome> {
        let callable_depth = (argc + extra) as usize;
        let callable = stack.top_value(callable_depth);
        let Some(id) = callable.heap_id() else {
            return Err(self.not_callable(callable));
        };

        match self.heap.get(id) {
            HeapData::Function(function) => {
                let function = *function;
                let template = match self.heap.get(function.template) {
                    HeapData::FunctionTemplate(t) => *t,
                    _ => return Err(VmError::type_error("function template slot is corrupt")),
                };
                if template.params != argc {
                    return Err(VmError::type_error(format!(
                        "invalid number of arguments for {} (need {}, have {argc})",
                        template.name_text(self.heap),
                        template.params,
                    )));
                }
                self.tracer.call(template.name_text(self.heap), argc);
                let flags = if extra > 0 { FRAME_POP_RECEIVER } else { 0 };
                stack.push_frame(function.template, function.closure, argc, template.locals, flags)?;
                Ok(CallOutcome::PushedFrame)
            }

            HeapData::BoundMethod(method) => {
                let method = *method;
                // Splice the receiver in front of the arguments and retry
                // with the underlying callable.
                stack.set_top(callable_depth, method.function);
                stack.insert_value(argc as usize, method.receiver)?;
                self.do_call(stack, coro, argc + 1, extra)
            }

            HeapData::NativeFunction(native) => {
                let min_params = native.min_params();
                let kind = native.kind();
                if argc < min_params {
                    return Err(VmError::type_error(format!(
                        "invalid number of arguments for {} (need at least {min_params}, have {argc})",
                        native.name_text(self.heap),
                    )));
                }
                let args: SmallVec<[Value; 8]> = SmallVec::from_slice(stack.top_values(argc as usize));

                match kind {
                    NativeKind::Sync(callback) => {
                        let mut ctx = NativeCtx {
                            heap: &mut *self.heap,
                            interner: &mut *self.interner,
                        };
                        let result = callback(&mut ctx, &args)?;
                        stack.pop_values((argc + extra) as usize);
                        stack.set_top(0, result);
                        Ok(CallOutcome::Returned)
                    }
                    NativeKind::Async(callback) => {
                        let token = self.scheduler.mint_token(coro);
                        let mut ctx = NativeCtx {
                            heap: &mut *self.heap,
                            interner: &mut *self.interner,
                        };
                        callback(&mut ctx, &args, token)?;
                        // Leave the callable slot in place; the resume value
                        // overwrites it when the coroutine is re-scheduled.
                        stack.pop_values((argc + extra) as usize);
                        self.coroutine_mut(coro).set_pending_token(Some(token.serial));
                        Ok(CallOutcome::Suspended)
                    }
                }
            }

            _ => Err(self.not_callable(callable)),
        }
    }

    fn not_callable(&self, callable: Value) -> VmError {
        VmError::type_error(format!(
            "cannot call value of type {}",
            type_of(self.heap, callable)
        ))
    }

    /// Resolves method dispatch for the object on top of the stack, leaving
    /// `(callable, receiver-or-null)` behind.
    pub(crate) fn load_method(&mut self, stack: &mut CoroutineStack, symbol: HeapId) -> VmResult<()> {
        let object = stack.top_value(0);
        match self.types.load_method(self.heap, object, symbol)? {
            MethodLookup::Method(function) => {
                stack.set_top(0, function);
                stack.push_value(object)?;
            }
            MethodLookup::Attribute(value) => {
                stack.set_top(0, value);
                stack.push_value(Value::Null)?;
            }
        }
        Ok(())
    }
}
