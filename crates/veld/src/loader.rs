//! The module loader: turns a serialized [`BytecodeModule`] into a live
//! [`Module`](crate::types::module::Module) object.
//!
//! Members are materialized in id order, so the topological rule (members
//! reference only smaller ids) guarantees every referenced value already
//! exists. The loaded module is not yet initialized; the registry runs its
//! initializer during resolution. Every verification failure is a
//! `ModuleFormat` error naming the offending member index.

use std::fmt::Display;
use std::rc::Rc;

use crate::bytecode::{BytecodeMember, BytecodeModule, FunctionKind, MemberId};
use crate::error::{VmError, VmResult};
use crate::heap::{Heap, HeapData, HeapId};
use crate::intern::Interner;
use crate::roots::{RootSet, Scope};
use crate::types::function::{Code, Function, FunctionTemplate};
use crate::types::module::{Module, UnresolvedImport};
use crate::types::record::RecordTemplate;
use crate::types::table::{table_contains, table_set, Table};
use crate::types::tuple::Tuple;
use crate::value::{make_integer, Value};

/// Upper bound on the member count of a single module.
const MAX_MODULE_MEMBERS: usize = 1 << 20;

/// Loads a compiled module. The result is registered and resolved
/// separately.
pub(crate) fn load_module(
    heap: &mut Heap,
    interner: &mut Interner,
    roots: Rc<RootSet>,
    compiled: &BytecodeModule,
) -> VmResult<Value> {
    let Some(name) = compiled.name() else {
        return Err(VmError::module_format(
            "<unnamed>",
            "module definition without a valid name",
        ));
    };
    if compiled.member_count() > MAX_MODULE_MEMBERS {
        return Err(VmError::module_format(name, "module definition is too large"));
    }

    let loader = Loader {
        heap,
        interner,
        compiled,
        module_name: name.to_string(),
    };
    loader.run(roots)
}

struct Loader<'a> {
    heap: &'a mut Heap,
    interner: &'a mut Interner,
    compiled: &'a BytecodeModule,
    module_name: String,
}

impl Loader<'_> {
    fn run(mut self, roots: Rc<RootSet>) -> VmResult<Value> {
        let name = self.interner.intern(self.heap, &self.module_name)?;
        let members = self
            .heap
            .allocate(HeapData::Tuple(Tuple::with_len(self.compiled.member_count())))?;
        let exports = self.heap.allocate(HeapData::Table(Table::new()))?;
        let module = self
            .heap
            .allocate(HeapData::Module(Module::new(name, members, exports)))?;

        // The module roots its members and exports transitively while the
        // remaining pieces are built.
        let scope = Scope::new(roots);
        scope.local(Value::Ref(module));

        for index in 0..self.compiled.member_count() {
            let value = self.materialize_member(module, members, index)?;
            match self.heap.get_mut(members) {
                HeapData::Tuple(t) => {
                    t.set(index, value);
                }
                _ => unreachable!("members slot holds a non-tuple"),
            }
        }

        for &(symbol_id, value_id) in &self.compiled.exports {
            self.create_export(members, exports, symbol_id, value_id)?;
        }

        if let Some(init_id) = self.compiled.init {
            let init_index = self.valid(init_id)?;
            let init = self.member_value(members, init_index);
            let is_function = init
                .heap_id()
                .is_some_and(|id| matches!(self.heap.get(id), HeapData::Function(_)));
            if !is_function {
                return Err(self.err(format_args!(
                    "init member {init_index} is not a normal function"
                )));
            }
            match self.heap.get_mut(module) {
                HeapData::Module(m) => m.set_init(init),
                _ => unreachable!("module slot holds a non-module"),
            }
        }

        Ok(Value::Ref(module))
    }

    fn materialize_member(&mut self, module: HeapId, members: HeapId, index: usize) -> VmResult<Value> {
        match &self.compiled.members[index] {
            BytecodeMember::Integer(value) => make_integer(self.heap, *value),
            BytecodeMember::Float(value) => Ok(Value::Ref(self.heap.allocate(HeapData::Float(*value))?)),
            BytecodeMember::String(id) => {
                let Some(text) = self.compiled.string(*id) else {
                    return Err(self.err(format_args!("invalid string id in member {index}")));
                };
                let text = text.to_string();
                Ok(Value::Ref(self.interner.intern(self.heap, &text)?))
            }
            BytecodeMember::Symbol { name } => {
                let name_index = self.seen(index, *name)?;
                let string = self.member_string(members, name_index)?;
                Ok(Value::Ref(self.interner.symbol_for_string(self.heap, string)?))
            }
            BytecodeMember::Import { module_name } => {
                let name_index = self.seen(index, *module_name)?;
                let string = self.member_string(members, name_index)?;
                Ok(Value::Ref(
                    self.heap
                        .allocate(HeapData::UnresolvedImport(UnresolvedImport::new(string)))?,
                ))
            }
            BytecodeMember::Variable { name, initial_value } => {
                let name_index = self.seen(index, *name)?;
                self.member_string(members, name_index)?;
                if initial_value.is_some() {
                    // The format reserves the slot; the loader does not
                    // support initial values yet.
                    return Err(self.err(format_args!(
                        "variable member {index} carries an unsupported initial value"
                    )));
                }
                Ok(Value::Undefined)
            }
            BytecodeMember::Function(id) => {
                if !id.is_valid() || id.index() >= self.compiled.functions.len() {
                    return Err(self.err(format_args!("member {index} refers to an invalid function")));
                }
                let function = &self.compiled.functions[id.index()];
                let name = match function.name {
                    Some(name_id) => {
                        let name_index = self.seen(index, name_id)?;
                        self.member_string(members, name_index)?
                    }
                    None => self.interner.intern(self.heap, "<anonymous>")?,
                };
                let code = self.heap.allocate(HeapData::Code(Code::new(function.code.clone())))?;
                let template = self.heap.allocate(HeapData::FunctionTemplate(FunctionTemplate {
                    name,
                    module,
                    params: function.params,
                    locals: function.locals,
                    code,
                }))?;
                match function.kind {
                    FunctionKind::Normal => Ok(Value::Ref(self.heap.allocate(HeapData::Function(Function {
                        template,
                        closure: None,
                    }))?)),
                    FunctionKind::Closure => Ok(Value::Ref(template)),
                }
            }
            BytecodeMember::RecordTemplate(id) => {
                if !id.is_valid() || id.index() >= self.compiled.record_templates.len() {
                    return Err(self.err(format_args!(
                        "member {index} refers to an invalid record template"
                    )));
                }
                let template = &self.compiled.record_templates[id.index()];
                let mut keys = Vec::with_capacity(template.keys.len());
                for &key_id in &template.keys {
                    let key_index = self.seen(index, key_id)?;
                    keys.push(self.member_symbol(members, key_index)?);
                }
                Ok(Value::Ref(
                    self.heap.allocate(HeapData::RecordTemplate(RecordTemplate::new(keys)))?,
                ))
            }
        }
    }

    fn create_export(
        &mut self,
        members: HeapId,
        exports: HeapId,
        symbol_id: MemberId,
        value_id: MemberId,
    ) -> VmResult<()> {
        let symbol_index = self.valid(symbol_id)?;
        let value_index = self.valid(value_id)?;

        match &self.compiled.members[value_index] {
            BytecodeMember::Import { .. } | BytecodeMember::RecordTemplate(_) => {
                return Err(self.err(format_args!(
                    "member {value_index} has kind {}, which cannot be exported",
                    self.compiled.members[value_index].kind_name()
                )));
            }
            _ => {}
        }

        let symbol = self.member_symbol(members, symbol_index)?;
        if table_contains(self.heap, exports, Value::Ref(symbol)) {
            let name = match self.heap.get(symbol) {
                HeapData::Symbol(s) => s.name_text(self.heap).to_string(),
                _ => unreachable!("member_symbol returns symbols"),
            };
            return Err(VmError::duplicate_export(&self.module_name, &name));
        }

        let index_value = make_integer(self.heap, value_index as i64)?;
        table_set(self.heap, exports, Value::Ref(symbol), index_value);
        Ok(())
    }

    fn member_value(&self, members: HeapId, index: usize) -> Value {
        match self.heap.get(members) {
            HeapData::Tuple(t) => t.get(index).expect("index validated"),
            _ => unreachable!("members slot holds a non-tuple"),
        }
    }

    /// The already-materialized member at `index`, which must be a string.
    fn member_string(&self, members: HeapId, index: usize) -> VmResult<HeapId> {
        self.member_value(members, index)
            .heap_id()
            .filter(|&id| matches!(self.heap.get(id), HeapData::Str(_)))
            .ok_or_else(|| self.err(format_args!("module member {index} is not a string")))
    }

    /// The already-materialized member at `index`, which must be a symbol.
    fn member_symbol(&self, members: HeapId, index: usize) -> VmResult<HeapId> {
        self.member_value(members, index)
            .heap_id()
            .filter(|&id| matches!(self.heap.get(id), HeapData::Symbol(_)))
            .ok_or_else(|| self.err(format_args!("module member {index} is not a symbol")))
    }

    /// The id must be valid and in range.
    fn valid(&self, id: MemberId) -> VmResult<usize> {
        if !id.is_valid() {
            return Err(self.err("references an invalid member id"));
        }
        let index = id.index();
        if index >= self.compiled.member_count() {
            return Err(self.err(format_args!("module member {index} is out of bounds")));
        }
        Ok(index)
    }

    /// Module-level references must point at already-visited members.
    fn seen(&self, current: usize, id: MemberId) -> VmResult<usize> {
        let index = self.valid(id)?;
        if index >= current {
            return Err(self.err(format_args!(
                "module member {index} has not been visited yet (at member {current})"
            )));
        }
        Ok(index)
    }

    fn err(&self, message: impl Display) -> VmError {
        VmError::module_format(&self.module_name, message)
    }
}
