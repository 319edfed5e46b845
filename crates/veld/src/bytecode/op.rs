//! The instruction set.
//!
//! An instruction is one opcode byte followed by its immediates, all
//! big-endian: `u32` for member/local/param/closure indices, argument
//! counts, and jump targets (absolute byte offsets); `i64`/`f64` for the
//! literal loads. Every opcode encodes a fixed number of immediates; a byte
//! outside the enum is a fatal decoding error.

use strum::{Display, FromRepr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum Opcode {
    // Constants.
    LoadNull,
    LoadTrue,
    LoadFalse,
    /// `i64` immediate.
    LoadInt,
    /// `f64` immediate.
    LoadFloat,

    // Module members.
    /// `u32` member index; pushes the member value.
    LoadModule,
    /// `u32` member index; pops the new member value.
    StoreModule,

    // Params, locals, closure variables.
    LoadParam,
    StoreParam,
    LoadLocal,
    StoreLocal,
    /// Pushes the current function's closure context.
    LoadClosure,
    /// `u32` level, `u32` index; reads through the context on top of the
    /// stack.
    LoadContext,
    /// `u32` level, `u32` index; stack: `[context, value]`.
    StoreContext,

    // Member and index access.
    /// `u32` member index of a symbol; reads a named member of the object
    /// on top of the stack.
    LoadMember,
    /// `u32` member index of a symbol; stack: `[object, value]`.
    StoreMember,
    /// `u32` tuple slot.
    LoadTupleMember,
    StoreTupleMember,
    /// Stack: `[object, index]`.
    LoadIndex,
    /// Stack: `[object, index, value]`.
    StoreIndex,

    // Stack shuffling.
    Dup,
    Pop,
    Rot2,
    Rot3,
    Rot4,

    // Arithmetic and logic.
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    UPlus,
    UMinus,
    LNot,
    BAnd,
    BOr,
    BXor,
    BNot,
    Shl,
    Shr,

    // Comparisons.
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    NEq,

    // Aggregates.
    /// `u32` element count.
    MkArray,
    MkTuple,
    /// `u32` pair count.
    MkMap,
    MkSet,
    /// `u32` member index of a record template.
    MkRecord,
    /// `u32` slot count; parent context (or null) on top of the stack.
    MkContext,
    /// Stack: `[template, context-or-null]`.
    MkClosure,
    MkIterator,
    /// Pushes `(value, more)`; `value` is null once exhausted.
    IteratorNext,

    // Control flow; `u32` absolute target offsets.
    Jmp,
    JmpTrue,
    JmpTruePop,
    JmpFalse,
    JmpFalsePop,
    JmpNull,
    JmpNotNull,

    // Calls.
    /// `u32` argument count; callable below the arguments.
    Call,
    /// `u32` member index of a symbol; resolves method dispatch on the
    /// object on top of the stack, pushing `(callable, receiver-or-null)`.
    LoadMethod,
    /// `u32` argument count; pairs with `LoadMethod`.
    CallMethod,
    Ret,
    /// Terminates the coroutine with the popped error value.
    Rethrow,
    /// Stack: `[expression-string, message-or-null]`.
    AssertFail,

    // String formatting.
    Formatter,
    AppendFormat,
    FormatResult,
}

impl Opcode {
    /// Decodes an opcode byte.
    #[must_use]
    pub fn decode(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }
}
