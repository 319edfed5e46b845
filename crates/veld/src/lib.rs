#![doc = include_str!("../../../README.md")]

mod bytecode;
mod context;
mod error;
mod heap;
mod intern;
mod interp;
mod loader;
mod registry;
mod roots;
mod schedule;
mod tracer;
mod types;
mod value;

pub use crate::{
    bytecode::{
        disassemble, BytecodeFunction, BytecodeMember, BytecodeModule, BytecodeRecordTemplate,
        FunctionBuilder, FunctionId, FunctionKind, JumpLabel, MemberId, ModuleBuilder, Opcode,
        RecordTemplateId, StringId,
    },
    context::{Context, ContextConfig},
    error::{ErrorKind, VmError, VmResult},
    heap::{GcStats, GcTrigger, HeapDiff, HeapId, HeapStats},
    roots::{Global, Local, Scope},
    schedule::ResumeToken,
    tracer::{NoopTracer, StderrTracer, VmTracer},
    types::{coroutine::CoroutineState, Type},
    types::native::{Finalizer, NativeAsyncFn, NativeCtx, NativeSyncFn},
    value::{SmallInt, Value},
};
