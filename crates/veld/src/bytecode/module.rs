//! Serialized module definitions.
//!
//! Layout rules, enforced by the loader:
//! - the module name must be a valid string id;
//! - members may only reference members with a *strictly smaller* id
//!   (topological order); bytecode inside a function body is the one
//!   exception and may reference any member;
//! - the member referenced by `init` (if present) must be a normal
//!   function;
//! - export keys must be symbols, export values must not be imports or
//!   record templates, and export names must be unique.
//!
//! All ids are 32-bit; `u32::MAX` is the invalid sentinel and never denotes
//! an entity. Modules serialize to a compact binary form via postcard.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, VmError, VmResult};

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(u32);

        impl $name {
            /// The invalid sentinel; never denotes an entity.
            pub const INVALID: Self = Self(u32::MAX);

            #[must_use]
            pub fn new(value: u32) -> Self {
                debug_assert!(value != u32::MAX, "id overflow");
                Self(value)
            }

            #[must_use]
            pub fn value(self) -> u32 {
                self.0
            }

            #[must_use]
            pub fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }

            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Index into a module's string table.
    StringId
);
entity_id!(
    /// Index into a module's member list.
    MemberId
);
entity_id!(
    /// Index into a module's function list.
    FunctionId
);
entity_id!(
    /// Index into a module's record template list.
    RecordTemplateId
);

/// One member of a serialized module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BytecodeMember {
    /// An integer constant.
    Integer(i64),
    /// A floating point constant.
    Float(f64),
    /// A string constant.
    String(StringId),
    /// A symbol constant; `name` references an earlier string member.
    Symbol { name: MemberId },
    /// An import; `module_name` references an earlier string member.
    Import { module_name: MemberId },
    /// A mutable module variable. `initial_value` is reserved by the format
    /// and must currently be `None`; variables load as undefined.
    Variable {
        name: MemberId,
        initial_value: Option<MemberId>,
    },
    /// A function; references the compiled function list.
    Function(FunctionId),
    /// A record template; references the template list.
    RecordTemplate(RecordTemplateId),
}

impl BytecodeMember {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Symbol { .. } => "symbol",
            Self::Import { .. } => "import",
            Self::Variable { .. } => "variable",
            Self::Function(_) => "function",
            Self::RecordTemplate(_) => "record template",
        }
    }
}

/// Whether a compiled function is complete by itself or must be
/// instantiated with a closure context via `MkClosure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    Normal,
    Closure,
}

/// A compiled function body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BytecodeFunction {
    /// References an earlier string member, if the function is named.
    pub name: Option<MemberId>,
    pub params: u32,
    pub locals: u32,
    pub kind: FunctionKind,
    pub code: Vec<u8>,
}

/// A compiled record template: member ids of the symbol keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytecodeRecordTemplate {
    pub keys: Vec<MemberId>,
}

/// A compiled module, ready to be loaded into a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BytecodeModule {
    /// The module-local string table.
    pub strings: Vec<String>,
    /// Name of the module; indexes the string table.
    pub name: StringId,
    /// Member definitions in id order.
    pub members: Vec<BytecodeMember>,
    /// Compiled function bodies.
    pub functions: Vec<BytecodeFunction>,
    /// Compiled record templates.
    pub record_templates: Vec<BytecodeRecordTemplate>,
    /// `(symbol member, value member)` pairs.
    pub exports: Vec<(MemberId, MemberId)>,
    /// Member id of the module initializer, if any.
    pub init: Option<MemberId>,
}

impl BytecodeModule {
    /// The module name, when the name id is valid.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.string(self.name)
    }

    pub(crate) fn string(&self, id: StringId) -> Option<&str> {
        if !id.is_valid() {
            return None;
        }
        self.strings.get(id.index()).map(String::as_str)
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Serializes to the compact binary form.
    pub fn to_bytes(&self) -> VmResult<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|err| VmError::new(ErrorKind::ModuleFormat, format!("serialization failed: {err}")))
    }

    /// Decodes the compact binary form.
    pub fn from_bytes(bytes: &[u8]) -> VmResult<Self> {
        postcard::from_bytes(bytes)
            .map_err(|err| VmError::new(ErrorKind::ModuleFormat, format!("deserialization failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_ids_are_invalid() {
        assert!(!MemberId::INVALID.is_valid());
        assert!(MemberId::new(0).is_valid());
        assert_eq!(MemberId::new(7).value(), 7);
    }
}
