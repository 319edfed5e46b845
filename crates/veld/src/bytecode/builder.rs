//! Programmatic construction of bytecode modules.
//!
//! `ModuleBuilder` assembles the member/function/template lists in
//! topological order (members can only reference already-added members, so
//! a correctly used builder produces loadable modules by construction).
//! `FunctionBuilder` emits instruction bytes with big-endian immediates and
//! handles forward jumps through patching.

use ahash::AHashMap;

use super::module::{
    BytecodeFunction, BytecodeMember, BytecodeModule, BytecodeRecordTemplate, FunctionId,
    FunctionKind, MemberId, RecordTemplateId, StringId,
};
use super::op::Opcode;

/// Builder for a module's instruction stream.
///
/// ```ignore
/// let mut f = FunctionBuilder::new();
/// f.emit_u32(Opcode::LoadParam, 0);
/// let jump = f.emit_jump(Opcode::JmpFalsePop);
/// f.emit(Opcode::LoadTrue);
/// f.patch_jump(jump);
/// f.emit(Opcode::Ret);
/// let code = f.finish();
/// ```
#[derive(Debug, Default)]
pub struct FunctionBuilder {
    code: Vec<u8>,
}

/// A forward jump whose target has not been emitted yet.
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel {
    operand_offset: usize,
}

impl FunctionBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The byte offset the next instruction will be emitted at.
    #[must_use]
    pub fn here(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn emit(&mut self, op: Opcode) {
        self.code.push(op as u8);
    }

    pub fn emit_u32(&mut self, op: Opcode, operand: u32) {
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_be_bytes());
    }

    pub fn emit_u32x2(&mut self, op: Opcode, first: u32, second: u32) {
        self.code.push(op as u8);
        self.code.extend_from_slice(&first.to_be_bytes());
        self.code.extend_from_slice(&second.to_be_bytes());
    }

    pub fn emit_i64(&mut self, op: Opcode, operand: i64) {
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_be_bytes());
    }

    pub fn emit_f64(&mut self, op: Opcode, operand: f64) {
        self.code.push(op as u8);
        self.code.extend_from_slice(&operand.to_bits().to_be_bytes());
    }

    /// Emits a jump with a placeholder target, to be fixed up by
    /// [`FunctionBuilder::patch_jump`].
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        self.code.push(op as u8);
        let operand_offset = self.code.len();
        self.code.extend_from_slice(&u32::MAX.to_be_bytes());
        JumpLabel { operand_offset }
    }

    /// Points a pending jump at the current position.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.here();
        self.code[label.operand_offset..label.operand_offset + 4].copy_from_slice(&target.to_be_bytes());
    }

    /// Emits a jump to an already known target.
    pub fn emit_jump_to(&mut self, op: Opcode, target: u32) {
        self.emit_u32(op, target);
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.code
    }
}

/// Builder for a whole module.
#[derive(Debug)]
pub struct ModuleBuilder {
    strings: Vec<String>,
    string_ids: AHashMap<String, StringId>,
    name: StringId,
    members: Vec<BytecodeMember>,
    functions: Vec<BytecodeFunction>,
    record_templates: Vec<BytecodeRecordTemplate>,
    exports: Vec<(MemberId, MemberId)>,
    init: Option<MemberId>,
}

impl ModuleBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut builder = Self {
            strings: Vec::new(),
            string_ids: AHashMap::new(),
            name: StringId::INVALID,
            members: Vec::new(),
            functions: Vec::new(),
            record_templates: Vec::new(),
            exports: Vec::new(),
            init: None,
        };
        builder.name = builder.intern_string(name);
        builder
    }

    /// Deduplicating insert into the module-local string table.
    pub fn intern_string(&mut self, text: &str) -> StringId {
        if let Some(&id) = self.string_ids.get(text) {
            return id;
        }
        let id = StringId::new(self.strings.len() as u32);
        self.strings.push(text.to_string());
        self.string_ids.insert(text.to_string(), id);
        id
    }

    fn push_member(&mut self, member: BytecodeMember) -> MemberId {
        let id = MemberId::new(self.members.len() as u32);
        self.members.push(member);
        id
    }

    pub fn add_integer(&mut self, value: i64) -> MemberId {
        self.push_member(BytecodeMember::Integer(value))
    }

    pub fn add_float(&mut self, value: f64) -> MemberId {
        self.push_member(BytecodeMember::Float(value))
    }

    pub fn add_string(&mut self, text: &str) -> MemberId {
        let id = self.intern_string(text);
        self.push_member(BytecodeMember::String(id))
    }

    /// A symbol whose name is the string member `name`.
    pub fn add_symbol(&mut self, name: MemberId) -> MemberId {
        self.push_member(BytecodeMember::Symbol { name })
    }

    /// Adds a string member and a symbol member referencing it.
    pub fn add_named_symbol(&mut self, name: &str) -> MemberId {
        let name = self.add_string(name);
        self.add_symbol(name)
    }

    pub fn add_import(&mut self, module_name: MemberId) -> MemberId {
        self.push_member(BytecodeMember::Import { module_name })
    }

    /// Adds a string member and an import referencing it.
    pub fn add_named_import(&mut self, module_name: &str) -> MemberId {
        let name = self.add_string(module_name);
        self.add_import(name)
    }

    /// A module variable, initialized to undefined at load time.
    pub fn add_variable(&mut self, name: MemberId) -> MemberId {
        self.push_member(BytecodeMember::Variable {
            name,
            initial_value: None,
        })
    }

    /// Registers a compiled function body.
    pub fn add_function(
        &mut self,
        name: Option<MemberId>,
        params: u32,
        locals: u32,
        kind: FunctionKind,
        code: Vec<u8>,
    ) -> FunctionId {
        let id = FunctionId::new(self.functions.len() as u32);
        self.functions.push(BytecodeFunction {
            name,
            params,
            locals,
            kind,
            code,
        });
        id
    }

    /// A member referencing a compiled function.
    pub fn add_function_member(&mut self, function: FunctionId) -> MemberId {
        self.push_member(BytecodeMember::Function(function))
    }

    pub fn add_record_template(&mut self, keys: Vec<MemberId>) -> RecordTemplateId {
        let id = RecordTemplateId::new(self.record_templates.len() as u32);
        self.record_templates.push(BytecodeRecordTemplate { keys });
        id
    }

    pub fn add_record_template_member(&mut self, template: RecordTemplateId) -> MemberId {
        self.push_member(BytecodeMember::RecordTemplate(template))
    }

    /// Exports the member `value` under the symbol member `symbol`.
    pub fn add_export(&mut self, symbol: MemberId, value: MemberId) {
        self.exports.push((symbol, value));
    }

    /// Declares the module initializer; the member must be a normal
    /// function.
    pub fn set_init(&mut self, member: MemberId) {
        self.init = Some(member);
    }

    #[must_use]
    pub fn finish(self) -> BytecodeModule {
        BytecodeModule {
            strings: self.strings,
            name: self.name,
            members: self.members,
            functions: self.functions,
            record_templates: self.record_templates,
            exports: self.exports,
            init: self.init,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn jump_patching_writes_big_endian_targets() {
        let mut f = FunctionBuilder::new();
        let jump = f.emit_jump(Opcode::Jmp);
        f.emit(Opcode::LoadNull);
        f.patch_jump(jump);
        let code = f.finish();
        // Opcode byte, then a 4-byte target pointing past the LoadNull.
        assert_eq!(code[0], Opcode::Jmp as u8);
        assert_eq!(u32::from_be_bytes([code[1], code[2], code[3], code[4]]), 6);
    }

    #[test]
    fn module_round_trips_through_bytes() {
        let mut builder = ModuleBuilder::new("demo");
        let sym = builder.add_named_symbol("answer");
        let value = builder.add_integer(42);
        builder.add_export(sym, value);
        let module = builder.finish();

        let bytes = module.to_bytes().unwrap();
        let decoded = BytecodeModule::from_bytes(&bytes).unwrap();
        assert_eq!(module, decoded);
        assert_eq!(decoded.name(), Some("demo"));
    }

    #[test]
    fn string_table_deduplicates() {
        let mut builder = ModuleBuilder::new("demo");
        let a = builder.intern_string("x");
        let b = builder.intern_string("x");
        assert_eq!(a, b);
    }
}
