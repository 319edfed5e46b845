//! Module loading: member materialization and format verification.

mod common;

use pretty_assertions::assert_eq;
use veld::{
    BytecodeMember, Context, ErrorKind, FunctionBuilder, FunctionKind, MemberId, ModuleBuilder,
    Opcode, StringId, Type,
};

use common::load_export;

#[test]
fn members_materialize_in_topological_order() {
    let mut b = ModuleBuilder::new("materialize");
    let answer = b.add_integer(42);
    b.add_float(2.5);
    b.add_string("hello");
    let sym = b.add_named_symbol("answer");
    let var_name = b.add_string("state");
    b.add_variable(var_name);
    b.add_export(sym, answer);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let value = load_export(&mut ctx, &compiled, "answer");
    assert_eq!(ctx.as_int(value), Some(42));
}

#[test]
fn variables_load_as_undefined() {
    let mut b = ModuleBuilder::new("vars");
    let name = b.add_string("state");
    let var = b.add_variable(name);
    let sym = b.add_named_symbol("state");
    b.add_export(sym, var);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let value = load_export(&mut ctx, &compiled, "state");
    assert!(value.is_undefined());
}

#[test]
fn loading_twice_produces_identical_exports() {
    let mut b = ModuleBuilder::new("twice");
    let sym = b.add_named_symbol("n");
    let n = b.add_integer(7);
    b.add_export(sym, n);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let first = ctx.load_module(&compiled).unwrap();
    let second = ctx.load_module(&compiled).unwrap();
    let a = ctx.get_export(first, "n").unwrap().unwrap();
    let b = ctx.get_export(second, "n").unwrap().unwrap();
    assert_eq!(ctx.as_int(a), Some(7));
    assert_eq!(ctx.as_int(b), Some(7));
}

#[test]
fn functions_load_as_callables_and_closures_as_templates() {
    let mut b = ModuleBuilder::new("functions");
    let name = b.add_string("f");
    let mut f = FunctionBuilder::new();
    f.emit(Opcode::LoadNull);
    f.emit(Opcode::Ret);
    let normal = b.add_function(Some(name), 0, 0, FunctionKind::Normal, f.finish());
    let normal_member = b.add_function_member(normal);

    let mut g = FunctionBuilder::new();
    g.emit(Opcode::LoadNull);
    g.emit(Opcode::Ret);
    let closure = b.add_function(None, 0, 0, FunctionKind::Closure, g.finish());
    let closure_member = b.add_function_member(closure);

    let f_sym = b.add_named_symbol("f");
    b.add_export(f_sym, normal_member);
    let g_sym = b.add_named_symbol("g");
    b.add_export(g_sym, closure_member);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let module = ctx.load_module(&compiled).unwrap();
    let f = ctx.get_export(module, "f").unwrap().unwrap();
    assert_eq!(ctx.type_of(f), Type::Function);
    let g = ctx.get_export(module, "g").unwrap().unwrap();
    assert_eq!(ctx.type_of(g), Type::FunctionTemplate);
}

#[test]
fn forward_member_references_are_rejected() {
    let mut b = ModuleBuilder::new("forward");
    // Symbol referencing a member that comes after it.
    b.add_symbol(MemberId::new(1));
    b.add_string("late");
    let compiled = b.finish();

    let mut ctx = Context::new();
    let err = ctx.load_module(&compiled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleFormat);
    assert!(err.message().contains("not been visited yet"));
}

#[test]
fn symbol_name_must_be_a_string_member() {
    let mut b = ModuleBuilder::new("badsym");
    let number = b.add_integer(1);
    b.add_symbol(number);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let err = ctx.load_module(&compiled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleFormat);
    assert!(err.message().contains("is not a string"));
}

#[test]
fn invalid_string_ids_are_rejected() {
    let mut b = ModuleBuilder::new("badstring");
    b.add_string("placeholder");
    let mut compiled = b.finish();
    compiled.members[0] = BytecodeMember::String(StringId::new(99));

    let mut ctx = Context::new();
    let err = ctx.load_module(&compiled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleFormat);
    assert!(err.message().contains("invalid string id"));
}

#[test]
fn variable_initial_values_are_rejected() {
    let mut b = ModuleBuilder::new("varinit");
    let zero = b.add_integer(0);
    let name = b.add_string("state");
    b.add_variable(name);
    let mut compiled = b.finish();
    compiled.members[2] = BytecodeMember::Variable {
        name,
        initial_value: Some(zero),
    };

    let mut ctx = Context::new();
    let err = ctx.load_module(&compiled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleFormat);
    assert!(err.message().contains("initial value"));
}

#[test]
fn duplicate_exports_are_rejected() {
    let mut b = ModuleBuilder::new("dupes");
    let sym = b.add_named_symbol("value");
    let first = b.add_integer(1);
    let second = b.add_integer(2);
    b.add_export(sym, first);
    b.add_export(sym, second);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let err = ctx.load_module(&compiled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateExport);
    assert!(err.message().contains("value"));
}

#[test]
fn exports_must_not_be_imports_or_record_templates() {
    let mut b = ModuleBuilder::new("badexport");
    let import = b.add_named_import("other");
    let sym = b.add_named_symbol("leak");
    b.add_export(sym, import);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let err = ctx.load_module(&compiled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleFormat);
}

#[test]
fn init_must_reference_a_normal_function() {
    let mut b = ModuleBuilder::new("badinit");
    let number = b.add_integer(3);
    b.set_init(number);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let err = ctx.load_module(&compiled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleFormat);
    assert!(err.message().contains("init member"));
}

#[test]
fn record_template_keys_must_be_symbols() {
    let mut b = ModuleBuilder::new("badrecord");
    let not_a_symbol = b.add_integer(0);
    let template = b.add_record_template(vec![not_a_symbol]);
    b.add_record_template_member(template);
    let compiled = b.finish();

    let mut ctx = Context::new();
    let err = ctx.load_module(&compiled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleFormat);
    assert!(err.message().contains("is not a symbol"));
}

#[test]
fn module_without_name_is_rejected() {
    let b = ModuleBuilder::new("name");
    let mut compiled = b.finish();
    compiled.name = StringId::INVALID;

    let mut ctx = Context::new();
    let err = ctx.load_module(&compiled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleFormat);
}
