//! End-to-end interpreter tests over builder-assembled bytecode.

mod common;

use pretty_assertions::assert_eq;
use veld::{
    Context, ErrorKind, FunctionBuilder, FunctionKind, ModuleBuilder, Opcode, Type, Value,
};

use common::{int, load_export, run_int};

#[test]
fn arithmetic_and_return() {
    // export func foo(x) { return x; }
    // export func four() {
    //     const a = foo(3);
    //     const b = (func() { return 1 ** 3; })();
    //     return a + b;
    // }
    let mut b = ModuleBuilder::new("scenario1");

    let foo_name = b.add_string("foo");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit(Opcode::Ret);
    let foo = b.add_function(Some(foo_name), 1, 0, FunctionKind::Normal, f.finish());
    let foo_member = b.add_function_member(foo);

    let mut anon = FunctionBuilder::new();
    anon.emit_i64(Opcode::LoadInt, 1);
    anon.emit_i64(Opcode::LoadInt, 3);
    anon.emit(Opcode::Pow);
    anon.emit(Opcode::Ret);
    let anon = b.add_function(None, 0, 0, FunctionKind::Closure, anon.finish());
    let anon_member = b.add_function_member(anon);

    let four_name = b.add_string("four");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadModule, foo_member.value());
    f.emit_i64(Opcode::LoadInt, 3);
    f.emit_u32(Opcode::Call, 1);
    f.emit_u32(Opcode::StoreLocal, 0);
    f.emit_u32(Opcode::LoadModule, anon_member.value());
    f.emit(Opcode::LoadNull);
    f.emit(Opcode::MkClosure);
    f.emit_u32(Opcode::Call, 0);
    f.emit_u32(Opcode::StoreLocal, 1);
    f.emit_u32(Opcode::LoadLocal, 0);
    f.emit_u32(Opcode::LoadLocal, 1);
    f.emit(Opcode::Add);
    f.emit(Opcode::Ret);
    let four = b.add_function(Some(four_name), 0, 2, FunctionKind::Normal, f.finish());
    let four_member = b.add_function_member(four);

    let sym = b.add_named_symbol("four");
    b.add_export(sym, four_member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let four = load_export(&mut ctx, &compiled, "four");
    assert_eq!(run_int(&mut ctx, four, &[]), 4);
}

#[test]
fn branches_pick_the_larger_operand() {
    let mut b = ModuleBuilder::new("max");
    let name = b.add_string("max");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::LoadParam, 1);
    f.emit(Opcode::Gt);
    let first_wins = f.emit_jump(Opcode::JmpTruePop);
    f.emit_u32(Opcode::LoadParam, 1);
    f.emit(Opcode::Ret);
    f.patch_jump(first_wins);
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit(Opcode::Ret);
    let max = b.add_function(Some(name), 2, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(max);
    let sym = b.add_named_symbol("max");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let max = load_export(&mut ctx, &compiled, "max");
    let three = int(&mut ctx, 3);
    let nine = int(&mut ctx, 9);
    assert_eq!(run_int(&mut ctx, max, &[three, nine]), 9);
    assert_eq!(run_int(&mut ctx, max, &[nine, three]), 9);
}

#[test]
fn closures_capture_their_environment() {
    let mut b = ModuleBuilder::new("closures");

    let mut adder = FunctionBuilder::new();
    adder.emit(Opcode::LoadClosure);
    adder.emit_u32x2(Opcode::LoadContext, 0, 0);
    adder.emit_u32(Opcode::LoadParam, 0);
    adder.emit(Opcode::Add);
    adder.emit(Opcode::Ret);
    let adder = b.add_function(None, 1, 0, FunctionKind::Closure, adder.finish());
    let adder_member = b.add_function_member(adder);

    let name = b.add_string("make_adder");
    let mut f = FunctionBuilder::new();
    f.emit(Opcode::LoadNull);
    f.emit_u32(Opcode::MkContext, 1);
    f.emit(Opcode::Dup);
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32x2(Opcode::StoreContext, 0, 0);
    f.emit_u32(Opcode::LoadModule, adder_member.value());
    f.emit(Opcode::Rot2);
    f.emit(Opcode::MkClosure);
    f.emit(Opcode::Ret);
    let make_adder = b.add_function(Some(name), 1, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(make_adder);
    let sym = b.add_named_symbol("make_adder");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let make_adder = load_export(&mut ctx, &compiled, "make_adder");
    let five = int(&mut ctx, 5);
    let add_five = ctx.run(make_adder, &[five]).unwrap();
    assert_eq!(ctx.type_of(add_five), Type::Function);

    let pinned = ctx.global(add_five);
    let three = int(&mut ctx, 3);
    assert_eq!(run_int(&mut ctx, pinned.get(), &[three]), 8);
}

#[test]
fn records_fix_their_key_set() {
    let mut b = ModuleBuilder::new("records");
    let x_name = b.add_string("x");
    let x_sym = b.add_symbol(x_name);
    let y_name = b.add_string("y");
    let y_sym = b.add_symbol(y_name);
    let template = b.add_record_template(vec![x_sym, y_sym]);
    let template_member = b.add_record_template_member(template);
    let z_sym = b.add_named_symbol("z");

    let make_name = b.add_string("make_point");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::MkRecord, template_member.value());
    f.emit(Opcode::Dup);
    f.emit_i64(Opcode::LoadInt, 1);
    f.emit_u32(Opcode::StoreMember, x_sym.value());
    f.emit(Opcode::Dup);
    f.emit_i64(Opcode::LoadInt, 2);
    f.emit_u32(Opcode::StoreMember, y_sym.value());
    f.emit(Opcode::Ret);
    let make_point = b.add_function(Some(make_name), 0, 0, FunctionKind::Normal, f.finish());
    let make_member = b.add_function_member(make_point);

    let get_name = b.add_string("get_x");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::LoadMember, x_sym.value());
    f.emit(Opcode::Ret);
    let get_x = b.add_function(Some(get_name), 1, 0, FunctionKind::Normal, f.finish());
    let get_member = b.add_function_member(get_x);

    let bad_name = b.add_string("set_bad");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_i64(Opcode::LoadInt, 9);
    f.emit_u32(Opcode::StoreMember, z_sym.value());
    f.emit(Opcode::LoadNull);
    f.emit(Opcode::Ret);
    let set_bad = b.add_function(Some(bad_name), 1, 0, FunctionKind::Normal, f.finish());
    let bad_member = b.add_function_member(set_bad);

    let make_sym = b.add_named_symbol("make_point");
    b.add_export(make_sym, make_member);
    let get_sym = b.add_named_symbol("get_x");
    b.add_export(get_sym, get_member);
    let bad_sym = b.add_named_symbol("set_bad");
    b.add_export(bad_sym, bad_member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let module = ctx.load_module(&compiled).unwrap();
    ctx.add_module(module).unwrap();
    let module = ctx.get_module("records").unwrap().unwrap();

    let make_point = ctx.get_export(module, "make_point").unwrap().unwrap();
    let point = ctx.run(make_point, &[]).unwrap();
    assert_eq!(ctx.type_of(point), Type::Record);
    let pinned = ctx.global(point);

    let get_x = ctx.get_export(module, "get_x").unwrap().unwrap();
    assert_eq!(run_int(&mut ctx, get_x, &[pinned.get()]), 1);

    let set_bad = ctx.get_export(module, "set_bad").unwrap().unwrap();
    let err = ctx.run(set_bad, &[pinned.get()]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeyError);
    assert!(err.message().contains("#z"));
}

#[test]
fn method_dispatch_binds_the_receiver() {
    let mut b = ModuleBuilder::new("methods");
    let append_sym = b.add_named_symbol("append");
    let size_sym = b.add_named_symbol("size");

    let name = b.add_string("append_and_size");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::LoadMethod, append_sym.value());
    f.emit_i64(Opcode::LoadInt, 7);
    f.emit_u32(Opcode::CallMethod, 1);
    f.emit(Opcode::Pop);
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::LoadMethod, size_sym.value());
    f.emit_u32(Opcode::CallMethod, 0);
    f.emit(Opcode::Ret);
    let func = b.add_function(Some(name), 1, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(func);
    let sym = b.add_named_symbol("append_and_size");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let func = load_export(&mut ctx, &compiled, "append_and_size");
    let array = ctx.array(0).unwrap();
    let pinned = ctx.global(array);
    assert_eq!(run_int(&mut ctx, func, &[pinned.get()]), 1);
    assert_eq!(ctx.array_len(pinned.get()), Some(1));
    let appended = ctx.array_get(pinned.get(), 0).unwrap();
    assert_eq!(ctx.as_int(appended), Some(7));
}

#[test]
fn tables_and_sets_work_through_opcodes_and_methods() {
    let mut b = ModuleBuilder::new("containers");
    let set_sym = b.add_named_symbol("set");
    let size_sym = b.add_named_symbol("size");

    let map_name = b.add_string("map_round_trip");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::MkMap, 0);
    f.emit_u32(Opcode::StoreLocal, 0);
    f.emit_u32(Opcode::LoadLocal, 0);
    f.emit_u32(Opcode::LoadMethod, set_sym.value());
    f.emit_i64(Opcode::LoadInt, 1);
    f.emit_i64(Opcode::LoadInt, 2);
    f.emit_u32(Opcode::CallMethod, 2);
    f.emit(Opcode::Pop);
    f.emit_u32(Opcode::LoadLocal, 0);
    f.emit_i64(Opcode::LoadInt, 1);
    f.emit(Opcode::LoadIndex);
    f.emit(Opcode::Ret);
    let map_fn = b.add_function(Some(map_name), 0, 1, FunctionKind::Normal, f.finish());
    let map_member = b.add_function_member(map_fn);

    let set_name = b.add_string("set_dedupes");
    let mut f = FunctionBuilder::new();
    f.emit_i64(Opcode::LoadInt, 3);
    f.emit_i64(Opcode::LoadInt, 3);
    f.emit_u32(Opcode::MkSet, 2);
    f.emit_u32(Opcode::LoadMethod, size_sym.value());
    f.emit_u32(Opcode::CallMethod, 0);
    f.emit(Opcode::Ret);
    let set_fn = b.add_function(Some(set_name), 0, 0, FunctionKind::Normal, f.finish());
    let set_member = b.add_function_member(set_fn);

    let missing_name = b.add_string("missing_key");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::MkMap, 0);
    f.emit_i64(Opcode::LoadInt, 1);
    f.emit(Opcode::LoadIndex);
    f.emit(Opcode::Ret);
    let missing_fn = b.add_function(Some(missing_name), 0, 0, FunctionKind::Normal, f.finish());
    let missing_member = b.add_function_member(missing_fn);

    let map_sym = b.add_named_symbol("map_round_trip");
    b.add_export(map_sym, map_member);
    let set_export_sym = b.add_named_symbol("set_dedupes");
    b.add_export(set_export_sym, set_member);
    let missing_sym = b.add_named_symbol("missing_key");
    b.add_export(missing_sym, missing_member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let module = ctx.load_module(&compiled).unwrap();
    ctx.add_module(module).unwrap();
    let module = ctx.get_module("containers").unwrap().unwrap();

    let map_fn = ctx.get_export(module, "map_round_trip").unwrap().unwrap();
    assert_eq!(run_int(&mut ctx, map_fn, &[]), 2);

    let set_fn = ctx.get_export(module, "set_dedupes").unwrap().unwrap();
    assert_eq!(run_int(&mut ctx, set_fn, &[]), 1);

    let missing_fn = ctx.get_export(module, "missing_key").unwrap().unwrap();
    let result = ctx.run(missing_fn, &[]).unwrap();
    assert!(result.is_null());
}

#[test]
fn tuples_support_member_slots() {
    let mut b = ModuleBuilder::new("tuples");
    let name = b.add_string("tuple_member");
    let mut f = FunctionBuilder::new();
    f.emit_i64(Opcode::LoadInt, 5);
    f.emit_i64(Opcode::LoadInt, 6);
    f.emit_u32(Opcode::MkTuple, 2);
    f.emit_u32(Opcode::StoreLocal, 0);
    f.emit_u32(Opcode::LoadLocal, 0);
    f.emit_i64(Opcode::LoadInt, 9);
    f.emit_u32(Opcode::StoreTupleMember, 0);
    f.emit_u32(Opcode::LoadLocal, 0);
    f.emit_u32(Opcode::LoadTupleMember, 0);
    f.emit(Opcode::Ret);
    let func = b.add_function(Some(name), 0, 1, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(func);
    let sym = b.add_named_symbol("tuple_member");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let func = load_export(&mut ctx, &compiled, "tuple_member");
    assert_eq!(run_int(&mut ctx, func, &[]), 9);
}

#[test]
fn iterators_walk_arrays_in_order() {
    let mut b = ModuleBuilder::new("iterators");
    let name = b.add_string("sum");
    let mut f = FunctionBuilder::new();
    f.emit_i64(Opcode::LoadInt, 0);
    f.emit_u32(Opcode::StoreLocal, 0);
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit(Opcode::MkIterator);
    let loop_start = f.here();
    f.emit(Opcode::IteratorNext);
    let exit = f.emit_jump(Opcode::JmpFalsePop);
    f.emit_u32(Opcode::LoadLocal, 0);
    f.emit(Opcode::Add);
    f.emit_u32(Opcode::StoreLocal, 0);
    f.emit_jump_to(Opcode::Jmp, loop_start);
    f.patch_jump(exit);
    f.emit(Opcode::Pop);
    f.emit(Opcode::Pop);
    f.emit_u32(Opcode::LoadLocal, 0);
    f.emit(Opcode::Ret);
    let sum = b.add_function(Some(name), 1, 1, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(sum);
    let sym = b.add_named_symbol("sum");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let sum = load_export(&mut ctx, &compiled, "sum");
    let array = ctx.array(4).unwrap();
    let pinned = ctx.global(array);
    for n in [1, 2, 3] {
        let value = int(&mut ctx, n);
        ctx.array_append(pinned.get(), value).unwrap();
    }
    assert_eq!(run_int(&mut ctx, sum, &[pinned.get()]), 6);
}

#[test]
fn string_formatting_concatenates_pieces() {
    let mut b = ModuleBuilder::new("formatting");
    let prefix = b.add_string("x = ");
    let name = b.add_string("fmt");
    let mut f = FunctionBuilder::new();
    f.emit(Opcode::Formatter);
    f.emit_u32(Opcode::LoadModule, prefix.value());
    f.emit(Opcode::AppendFormat);
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit(Opcode::AppendFormat);
    f.emit(Opcode::FormatResult);
    f.emit(Opcode::Ret);
    let fmt = b.add_function(Some(name), 1, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(fmt);
    let sym = b.add_named_symbol("fmt");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let fmt = load_export(&mut ctx, &compiled, "fmt");
    let seven = int(&mut ctx, 7);
    let result = ctx.run(fmt, &[seven]).unwrap();
    assert_eq!(ctx.as_str(result), Some("x = 7"));
}

#[test]
fn bound_methods_insert_their_receiver() {
    let mut b = ModuleBuilder::new("bound");
    let name = b.add_string("add");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::LoadParam, 1);
    f.emit(Opcode::Add);
    f.emit(Opcode::Ret);
    let add = b.add_function(Some(name), 2, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(add);
    let sym = b.add_named_symbol("add");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let add = load_export(&mut ctx, &compiled, "add");
    let ten = int(&mut ctx, 10);
    let bound = ctx.bound_method(add, ten).unwrap();
    let pinned = ctx.global(bound);
    let five = int(&mut ctx, 5);
    assert_eq!(run_int(&mut ctx, pinned.get(), &[five]), 15);
}

#[test]
fn division_by_zero_surfaces_as_an_error() {
    let mut b = ModuleBuilder::new("div");
    let name = b.add_string("div");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::LoadParam, 1);
    f.emit(Opcode::Div);
    f.emit(Opcode::Ret);
    let div = b.add_function(Some(name), 2, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(div);
    let sym = b.add_named_symbol("div");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let div = load_export(&mut ctx, &compiled, "div");
    let one = int(&mut ctx, 1);
    let zero = int(&mut ctx, 0);
    let err = ctx.run(div, &[one, zero]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DivisionByZero);

    let six = int(&mut ctx, 6);
    let two = int(&mut ctx, 2);
    assert_eq!(run_int(&mut ctx, div, &[six, two]), 3);
}

#[test]
fn out_of_range_indices_fail() {
    let mut b = ModuleBuilder::new("indexing");
    let name = b.add_string("get");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::LoadParam, 1);
    f.emit(Opcode::LoadIndex);
    f.emit(Opcode::Ret);
    let get = b.add_function(Some(name), 2, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(get);
    let sym = b.add_named_symbol("get");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let get = load_export(&mut ctx, &compiled, "get");
    let array = ctx.array(1).unwrap();
    let pinned = ctx.global(array);
    let value = int(&mut ctx, 11);
    ctx.array_append(pinned.get(), value).unwrap();

    let zero = int(&mut ctx, 0);
    assert_eq!(run_int(&mut ctx, get, &[pinned.get(), zero]), 11);

    let five = int(&mut ctx, 5);
    let err = ctx.run(get, &[pinned.get(), five]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexOutOfBounds);
    assert!(err.message().contains('5'));
}

#[test]
fn assertions_terminate_the_coroutine() {
    let mut b = ModuleBuilder::new("asserts");
    let expr = b.add_string("1 == 2");
    let name = b.add_string("check");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadModule, expr.value());
    f.emit(Opcode::LoadNull);
    f.emit(Opcode::AssertFail);
    let check = b.add_function(Some(name), 0, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(check);
    let sym = b.add_named_symbol("check");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let check = load_export(&mut ctx, &compiled, "check");
    let err = ctx.run(check, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Assertion);
    assert!(err.message().contains("1 == 2"));
}

#[test]
fn rethrow_carries_the_error_value() {
    let mut b = ModuleBuilder::new("rethrow");
    let boom = b.add_string("boom");
    let name = b.add_string("explode");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadModule, boom.value());
    f.emit(Opcode::Rethrow);
    let explode = b.add_function(Some(name), 0, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(explode);
    let sym = b.add_named_symbol("explode");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let explode = load_export(&mut ctx, &compiled, "explode");
    let err = ctx.run(explode, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rethrown);
    assert!(err.message().contains("boom"));
}

#[test]
fn unbounded_recursion_overflows_the_stack() {
    let mut b = ModuleBuilder::new("recursion");
    b.add_string("spin");
    // The function member gets id 1; function bodies may reference any
    // member, including their own.
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadModule, 1);
    f.emit_u32(Opcode::Call, 0);
    f.emit(Opcode::Ret);
    let spin = b.add_function(None, 0, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(spin);
    let sym = b.add_named_symbol("spin");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let spin = load_export(&mut ctx, &compiled, "spin");
    let err = ctx.run(spin, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StackOverflow);
}

#[test]
fn calling_a_non_callable_fails() {
    let mut ctx = Context::new();
    let not_callable = int(&mut ctx, 3);
    let err = ctx.run(not_callable, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeError);
    assert!(err.message().contains("cannot call"));
}

#[test]
fn arity_mismatches_fail() {
    let mut b = ModuleBuilder::new("arity");
    let name = b.add_string("one");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit(Opcode::Ret);
    let one = b.add_function(Some(name), 1, 0, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(one);
    let sym = b.add_named_symbol("one");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let one = load_export(&mut ctx, &compiled, "one");
    let err = ctx.run(one, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeError);
    assert!(err.message().contains("need 1, have 0"));
}

#[test]
fn undefined_locals_raise_name_errors() {
    let mut b = ModuleBuilder::new("locals");
    let name = b.add_string("oops");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadLocal, 0);
    f.emit(Opcode::Ret);
    let oops = b.add_function(Some(name), 0, 1, FunctionKind::Normal, f.finish());
    let member = b.add_function_member(oops);
    let sym = b.add_named_symbol("oops");
    b.add_export(sym, member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let oops = load_export(&mut ctx, &compiled, "oops");
    let err = ctx.run(oops, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NameError);
}

#[test]
fn container_methods_cover_pop_and_key_views() {
    let mut b = ModuleBuilder::new("extended");
    let append_sym = b.add_named_symbol("append");
    let pop_sym = b.add_named_symbol("pop");
    let set_sym = b.add_named_symbol("set");
    let keys_sym = b.add_named_symbol("keys");
    let size_sym = b.add_named_symbol("size");

    let pop_name = b.add_string("pop_last");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::LoadMethod, append_sym.value());
    f.emit_i64(Opcode::LoadInt, 1);
    f.emit_u32(Opcode::CallMethod, 1);
    f.emit(Opcode::Pop);
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::LoadMethod, append_sym.value());
    f.emit_i64(Opcode::LoadInt, 2);
    f.emit_u32(Opcode::CallMethod, 1);
    f.emit(Opcode::Pop);
    f.emit_u32(Opcode::LoadParam, 0);
    f.emit_u32(Opcode::LoadMethod, pop_sym.value());
    f.emit_u32(Opcode::CallMethod, 0);
    f.emit(Opcode::Ret);
    let pop_last = b.add_function(Some(pop_name), 1, 0, FunctionKind::Normal, f.finish());
    let pop_member = b.add_function_member(pop_last);

    let keys_name = b.add_string("key_count");
    let mut f = FunctionBuilder::new();
    f.emit_u32(Opcode::MkMap, 0);
    f.emit_u32(Opcode::StoreLocal, 0);
    f.emit_u32(Opcode::LoadLocal, 0);
    f.emit_u32(Opcode::LoadMethod, set_sym.value());
    f.emit_i64(Opcode::LoadInt, 1);
    f.emit_i64(Opcode::LoadInt, 2);
    f.emit_u32(Opcode::CallMethod, 2);
    f.emit(Opcode::Pop);
    f.emit_u32(Opcode::LoadLocal, 0);
    f.emit_u32(Opcode::LoadMethod, keys_sym.value());
    f.emit_u32(Opcode::CallMethod, 0);
    f.emit_u32(Opcode::LoadMethod, size_sym.value());
    f.emit_u32(Opcode::CallMethod, 0);
    f.emit(Opcode::Ret);
    let key_count = b.add_function(Some(keys_name), 0, 1, FunctionKind::Normal, f.finish());
    let keys_member = b.add_function_member(key_count);

    let pop_export = b.add_named_symbol("pop_last");
    b.add_export(pop_export, pop_member);
    let keys_export = b.add_named_symbol("key_count");
    b.add_export(keys_export, keys_member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let module = ctx.load_module(&compiled).unwrap();
    ctx.add_module(module).unwrap();
    let module = ctx.get_module("extended").unwrap().unwrap();

    let pop_last = ctx.get_export(module, "pop_last").unwrap().unwrap();
    let array = ctx.array(0).unwrap();
    let pinned = ctx.global(array);
    assert_eq!(run_int(&mut ctx, pop_last, &[pinned.get()]), 2);
    assert_eq!(ctx.array_len(pinned.get()), Some(1));

    let key_count = ctx.get_export(module, "key_count").unwrap().unwrap();
    assert_eq!(run_int(&mut ctx, key_count, &[]), 1);
}

#[test]
fn values_returned_by_value_compare_structurally() {
    let mut ctx = Context::new();
    let boxed = ctx.integer(i64::MAX).unwrap();
    assert_eq!(ctx.as_int(boxed), Some(i64::MAX));
    assert_eq!(ctx.type_of(boxed), Type::Integer);
    assert_eq!(ctx.type_of(Value::Null), Type::Null);
}
