//! Internal type descriptors and the method dispatch tables.
//!
//! Each object kind maps to a table of native methods keyed by symbol.
//! `load_method` distinguishes true methods (which bind the receiver) from
//! plain attributes (module exports), mirroring the two-slot result of the
//! `LoadMethod` opcode.

use ahash::AHashMap;

use crate::error::{VmError, VmResult};
use crate::heap::{Heap, HeapData, HeapId};
use crate::intern::Interner;
use crate::types::native::{NativeCtx, NativeFunction, NativeKind};
use crate::types::set::{set_contains, set_insert, set_remove};
use crate::types::table::{table_contains, table_get, table_remove, table_set};
use crate::types::tuple::Array;
use crate::types::Type;
use crate::value::{type_of, Value};

/// Result of name resolution on a receiver.
pub(crate) enum MethodLookup {
    /// A method from the receiver's type table; the caller pushes the
    /// receiver as the implicit first argument.
    Method(Value),
    /// A plain attribute (a module export); no receiver is bound.
    Attribute(Value),
}

pub(crate) struct TypeSystem {
    tables: AHashMap<Type, AHashMap<HeapId, Value>>,
}

impl TypeSystem {
    pub fn new(heap: &mut Heap, interner: &mut Interner) -> VmResult<Self> {
        use NativeKind::Sync;

        let mut types = Self {
            tables: AHashMap::new(),
        };

        types.register(heap, interner, Type::Array, "append", 2, Sync(array_append))?;
        types.register(heap, interner, Type::Array, "pop", 1, Sync(array_pop))?;
        types.register(heap, interner, Type::Array, "size", 1, Sync(array_size))?;
        types.register(heap, interner, Type::Array, "clear", 1, Sync(array_clear))?;

        types.register(heap, interner, Type::Tuple, "size", 1, Sync(tuple_size))?;
        types.register(heap, interner, Type::String, "size", 1, Sync(string_size))?;
        types.register(heap, interner, Type::String, "contains", 2, Sync(string_contains))?;

        types.register(heap, interner, Type::Table, "get", 2, Sync(table_method_get))?;
        types.register(heap, interner, Type::Table, "set", 3, Sync(table_method_set))?;
        types.register(heap, interner, Type::Table, "remove", 2, Sync(table_method_remove))?;
        types.register(heap, interner, Type::Table, "contains", 2, Sync(table_method_contains))?;
        types.register(heap, interner, Type::Table, "size", 1, Sync(table_method_size))?;
        types.register(heap, interner, Type::Table, "clear", 1, Sync(table_method_clear))?;
        types.register(heap, interner, Type::Table, "keys", 1, Sync(table_method_keys))?;
        types.register(heap, interner, Type::Table, "values", 1, Sync(table_method_values))?;

        types.register(heap, interner, Type::Set, "insert", 2, Sync(set_method_insert))?;
        types.register(heap, interner, Type::Set, "remove", 2, Sync(set_method_remove))?;
        types.register(heap, interner, Type::Set, "contains", 2, Sync(set_method_contains))?;
        types.register(heap, interner, Type::Set, "size", 1, Sync(set_method_size))?;
        types.register(heap, interner, Type::Set, "clear", 1, Sync(set_method_clear))?;

        types.register(heap, interner, Type::Record, "keys", 1, Sync(record_keys))?;

        Ok(types)
    }

    fn register(
        &mut self,
        heap: &mut Heap,
        interner: &mut Interner,
        ty: Type,
        name: &str,
        min_params: u32,
        kind: NativeKind,
    ) -> VmResult<()> {
        let name_id = interner.intern(heap, name)?;
        let symbol = interner.symbol_for_string(heap, name_id)?;
        let function = heap.allocate(HeapData::NativeFunction(NativeFunction::new(
            name_id, min_params, kind,
        )))?;
        self.tables
            .entry(ty)
            .or_default()
            .insert(symbol, Value::Ref(function));
        Ok(())
    }

    /// Resolves `symbol` on `receiver`. Module receivers resolve through
    /// their exports as attributes; everything else goes through the type's
    /// method table.
    pub fn load_method(&self, heap: &Heap, receiver: Value, symbol: HeapId) -> VmResult<MethodLookup> {
        if let Some(id) = receiver.heap_id()
            && let HeapData::Module(module) = heap.get(id)
        {
            return match module.find_exported(heap, symbol) {
                Some(value) => Ok(MethodLookup::Attribute(value)),
                None => Err(VmError::name_error(format!(
                    "module {} has no export #{}",
                    module.name_text(heap),
                    symbol_text(heap, symbol)
                ))),
            };
        }

        let ty = type_of(heap, receiver);
        self.tables
            .get(&ty)
            .and_then(|table| table.get(&symbol))
            .copied()
            .map(MethodLookup::Method)
            .ok_or_else(|| {
                VmError::type_error(format!(
                    "values of type {ty} have no method #{}",
                    symbol_text(heap, symbol)
                ))
            })
    }

    pub fn collect_roots(&self, work: &mut Vec<HeapId>) {
        for table in self.tables.values() {
            for (&symbol, value) in table {
                work.push(symbol);
                if let Value::Ref(id) = value {
                    work.push(*id);
                }
            }
        }
    }
}

fn symbol_text(heap: &Heap, symbol: HeapId) -> String {
    match heap.get(symbol) {
        HeapData::Symbol(s) => s.name_text(heap).to_string(),
        _ => "<corrupt symbol>".to_string(),
    }
}

fn receiver_id(ctx: &NativeCtx<'_>, args: &[Value], expected: Type) -> VmResult<HeapId> {
    args[0]
        .heap_id()
        .filter(|&id| ctx.heap.get(id).type_of() == expected)
        .ok_or_else(|| VmError::type_error(format!("receiver must be a {expected}")))
}

fn array_append(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Array)?;
    match ctx.heap.get_mut(id) {
        HeapData::Array(a) => a.append(args[1]),
        _ => unreachable!("receiver checked"),
    }
    Ok(Value::Null)
}

fn array_pop(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Array)?;
    let popped = match ctx.heap.get_mut(id) {
        HeapData::Array(a) => a.pop(),
        _ => unreachable!("receiver checked"),
    };
    Ok(popped.unwrap_or(Value::Null))
}

fn array_size(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Array)?;
    let len = match ctx.heap.get(id) {
        HeapData::Array(a) => a.len(),
        _ => unreachable!("receiver checked"),
    };
    ctx.integer(len as i64)
}

fn array_clear(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Array)?;
    match ctx.heap.get_mut(id) {
        HeapData::Array(a) => a.clear(),
        _ => unreachable!("receiver checked"),
    }
    Ok(Value::Null)
}

fn tuple_size(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Tuple)?;
    let len = match ctx.heap.get(id) {
        HeapData::Tuple(t) => t.len(),
        _ => unreachable!("receiver checked"),
    };
    ctx.integer(len as i64)
}

fn string_size(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::String)?;
    let len = match ctx.heap.get(id) {
        HeapData::Str(s) => s.text().len(),
        _ => unreachable!("receiver checked"),
    };
    ctx.integer(len as i64)
}

fn string_contains(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::String)?;
    let needle = args[1]
        .heap_id()
        .and_then(|nid| match ctx.heap.get(nid) {
            HeapData::Str(s) => Some(s.text()),
            _ => None,
        })
        .ok_or_else(|| VmError::type_error("contains expects a string argument"))?;
    let found = match ctx.heap.get(id) {
        HeapData::Str(s) => s.text().contains(needle),
        _ => unreachable!("receiver checked"),
    };
    Ok(Value::Bool(found))
}

fn table_method_get(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Table)?;
    Ok(table_get(ctx.heap, id, args[1]).unwrap_or(Value::Null))
}

fn table_method_set(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Table)?;
    Ok(Value::Bool(table_set(ctx.heap, id, args[1], args[2])))
}

fn table_method_remove(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Table)?;
    table_remove(ctx.heap, id, args[1]);
    Ok(Value::Null)
}

fn table_method_contains(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Table)?;
    Ok(Value::Bool(table_contains(ctx.heap, id, args[1])))
}

fn table_method_size(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Table)?;
    let len = match ctx.heap.get(id) {
        HeapData::Table(t) => t.len(),
        _ => unreachable!("receiver checked"),
    };
    ctx.integer(len as i64)
}

fn table_method_clear(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Table)?;
    match ctx.heap.get_mut(id) {
        HeapData::Table(t) => t.clear(),
        _ => unreachable!("receiver checked"),
    }
    Ok(Value::Null)
}

fn table_method_keys(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Table)?;
    let keys: Vec<Value> = match ctx.heap.get(id) {
        HeapData::Table(t) => t.iter().map(|(key, _)| key).collect(),
        _ => unreachable!("receiver checked"),
    };
    let array = ctx.heap.allocate(HeapData::Array(Array::from_values(keys)))?;
    Ok(Value::Ref(array))
}

fn table_method_values(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Table)?;
    let values: Vec<Value> = match ctx.heap.get(id) {
        HeapData::Table(t) => t.iter().map(|(_, value)| value).collect(),
        _ => unreachable!("receiver checked"),
    };
    let array = ctx.heap.allocate(HeapData::Array(Array::from_values(values)))?;
    Ok(Value::Ref(array))
}

fn set_method_insert(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Set)?;
    Ok(Value::Bool(set_insert(ctx.heap, id, args[1])))
}

fn set_method_remove(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Set)?;
    set_remove(ctx.heap, id, args[1]);
    Ok(Value::Null)
}

fn set_method_contains(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Set)?;
    Ok(Value::Bool(set_contains(ctx.heap, id, args[1])))
}

fn set_method_size(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Set)?;
    let len = match ctx.heap.get(id) {
        HeapData::Set(s) => s.len(),
        _ => unreachable!("receiver checked"),
    };
    ctx.integer(len as i64)
}

fn set_method_clear(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Set)?;
    match ctx.heap.get_mut(id) {
        HeapData::Set(s) => s.clear(),
        _ => unreachable!("receiver checked"),
    }
    Ok(Value::Null)
}

fn record_keys(ctx: &mut NativeCtx<'_>, args: &[Value]) -> VmResult<Value> {
    let id = receiver_id(ctx, args, Type::Record)?;
    let template = match ctx.heap.get(id) {
        HeapData::Record(r) => r.template(),
        _ => unreachable!("receiver checked"),
    };
    let keys: Vec<Value> = match ctx.heap.get(template) {
        HeapData::RecordTemplate(t) => t.keys().iter().map(|&key| Value::Ref(key)).collect(),
        _ => unreachable!("record template slot holds a non-template"),
    };
    let array = ctx.heap.allocate(HeapData::Array(Array::from_values(keys)))?;
    Ok(Value::Ref(array))
}
