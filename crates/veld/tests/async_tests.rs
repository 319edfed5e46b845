//! Async native functions, resume tokens, and scheduling order.

mod common;

use std::cell::Cell;

use pretty_assertions::assert_eq;
use veld::{
    Context, CoroutineState, ErrorKind, FunctionBuilder, FunctionKind, ModuleBuilder, NativeCtx,
    Opcode, ResumeToken, Value, VmResult,
};

use common::{int, load_export};

thread_local! {
    static TOKEN: Cell<Option<ResumeToken>> = const { Cell::new(None) };
}

/// An async native that parks the calling coroutine and hands its resume
/// token to the host.
fn park(_ctx: &mut NativeCtx<'_>, _args: &[Value], token: ResumeToken) -> VmResult<()> {
    TOKEN.with(|slot| slot.set(Some(token)));
    Ok(())
}

#[test]
fn resume_tokens_wake_waiting_coroutines() {
    let mut ctx = Context::new();
    TOKEN.with(Cell::take);

    let park = ctx.native_async_function("park", 0, park).unwrap();
    let coro = ctx.spawn(park, &[]).unwrap();
    let pinned = ctx.global(coro);

    ctx.run_until_idle().unwrap();
    assert_eq!(ctx.coroutine_state(pinned.get()), Some(CoroutineState::Waiting));
    assert!(ctx.coroutine_result(pinned.get()).is_none());

    let token = TOKEN.with(Cell::take).expect("native captured the token");
    let value = int(&mut ctx, 42);
    ctx.resume(token, value).unwrap();
    assert_eq!(ctx.coroutine_state(pinned.get()), Some(CoroutineState::Ready));

    ctx.run_until_idle().unwrap();
    assert_eq!(ctx.coroutine_state(pinned.get()), Some(CoroutineState::Done));
    let result = ctx.coroutine_result(pinned.get()).unwrap().unwrap();
    assert_eq!(ctx.as_int(result), Some(42));
}

#[test]
fn suspension_resumes_inside_a_bytecode_frame() {
    // func wait_then_add(waiter) { return waiter() + 1; }
    let mut b = ModuleBuilder::new("awaiting");
    let name = b.add_string("wait_then_add");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::Call, 0);
    f.emit_i64(Opcode::LoadInt, 1);
    f.emit(Opcode::Add);
    f.emit(Opcode::Ret);
    let func = b.add_function(Some(name), 1, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(func);
    let sym = b.add_named_symbol("wait_then_add");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    TOKEN.with(Cell::take);
    let func = load_export(&mut ctx, &compiled, "wait_then_add");
    let park = ctx.native_async_function("park", 0, park).unwrap();
    let coro = ctx.spawn(func, &[park]).unwrap();
    let pinned = ctx.global(coro);

    ctx.run_until_idle().unwrap();
    assert_eq!(ctx.coroutine_state(pinned.get()), Some(CoroutineState::Waiting));

    let token = TOKEN.with(Cell::take).expect("native captured the token");
    let value = int(&mut ctx, 41);
    ctx.resume(token, value).unwrap();
    ctx.run_until_idle().unwrap();

    let result = ctx.coroutine_result(pinned.get()).unwrap().unwrap();
    assert_eq!(ctx.as_int(result), Some(42));
}

#[test]
fn run_fails_with_pending_when_blocked() {
    let mut ctx = Context::new();
    TOKEN.with(Cell::take);
    let park = ctx.native_async_function("park", 0, park).unwrap();
    let err = ctx.run(park, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Pending);
    TOKEN.with(Cell::take);
}

#[test]
fn stale_resume_tokens_are_rejected() {
    let mut ctx = Context::new();
    TOKEN.with(Cell::take);

    let park = ctx.native_async_function("park", 0, park).unwrap();
    let coro = ctx.spawn(park, &[]).unwrap();
    let pinned = ctx.global(coro);
    ctx.run_until_idle().unwrap();

    let token = TOKEN.with(Cell::take).expect("native captured the token");
    let value = int(&mut ctx, 1);
    ctx.resume(token, value).unwrap();
    ctx.run_until_idle().unwrap();
    assert_eq!(ctx.coroutine_state(pinned.get()), Some(CoroutineState::Done));

    // The coroutine completed; the token no longer names a waiting call.
    let err = ctx.resume(token, value).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeError);
}

#[test]
fn ready_coroutines_run_in_fifo_order() {
    // func record(arr, v) { arr.append(v); }
    let mut b = ModuleBuilder::new("fifo");
    let append_sym = b.add_named_symbol("append");
    let name = b.add_string("record");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::LoadMethod, append_sym.value());
    f.emit_u32(Opcode::LoadParam, 1);
    f.emit_u32(Opcode::CallMethod, 1);
    f.emit(Opcode::Ret);
    let record = b.add_function(Some(name), 2, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(record);
    let sym = b.add_named_symbol("record");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let record = load_export(&mut ctx, &compiled, "record");
    let array = ctx.array(4).unwrap();
    let pinned = ctx.global(array);

    for n in [1, 2, 3] {
        let value = int(&mut ctx, n);
        ctx.spawn(record, &[pinned.get(), value]).unwrap();
    }
    ctx.run_until_idle().unwrap();

    let recorded: Vec<i64> = (0..3)
        .map(|i| {
            let value = ctx.array_get(pinned.get(), i).unwrap();
            ctx.as_int(value).unwrap()
        })
        .collect();
    assert_eq!(recorded, vec![1, 2, 3]);
}
