//! Shared helpers for the integration tests.
#![allow(dead_code)]

use veld::{BytecodeModule, Context, Value};

/// Loads and registers a module, then resolves it and returns the named
/// export.
pub fn load_export(ctx: &mut Context, compiled: &BytecodeModule, name: &str) -> Value {
    let module = ctx.load_module(compiled).expect("module loads");
    assert!(ctx.add_module(module).expect("module registers"));
    let module = ctx
        .get_module(compiled.name().expect("module has a name"))
        .expect("module resolves")
        .expect("module is registered");
    ctx.get_export(module, name)
        .expect("export lookup succeeds")
        .unwrap_or_else(|| panic!("module exports {name}"))
}

pub fn int(ctx: &mut Context, value: i64) -> Value {
    ctx.integer(value).expect("integer allocates")
}

pub fn run_int(ctx: &mut Context, callable: Value, args: &[Value]) -> i64 {
    let result = ctx.run(callable, args).expect("run succeeds");
    ctx.as_int(result).expect("result is an integer")
}
