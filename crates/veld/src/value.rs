//! The uniform value representation.
//!
//! A [`Value`] is one machine word: small immediate values (null, undefined,
//! booleans, small integers) are stored inline, everything else is a
//! reference into the heap arena. Structural operations (equality, hashing,
//! ordering, rendering) live here as free functions because most of them
//! need to follow heap references.

use std::cmp::Ordering;
use std::hash::BuildHasher;

use crate::error::{ErrorKind, VmError, VmResult};
use crate::heap::{Heap, HeapData, HeapId};
use crate::types::Type;

/// An integer small enough to be embedded in a [`Value`] without heap
/// allocation.
///
/// The representable range is `[-2^62, 2^62 - 1]`, mirroring a tagged
/// one-word encoding with two tag bits on 64-bit platforms. Larger integers
/// are boxed on the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SmallInt(i64);

impl SmallInt {
    pub const MIN: i64 = -(1 << 62);
    pub const MAX: i64 = (1 << 62) - 1;

    /// Creates a small integer, failing with `Overflow` when `value` is
    /// outside the embeddable range. Callers fall back to a boxed integer.
    pub fn new(value: i64) -> VmResult<Self> {
        if Self::fits(value) {
            Ok(Self(value))
        } else {
            Err(VmError::overflow(format!(
                "{value} does not fit into the small integer range"
            )))
        }
    }

    #[must_use]
    pub fn fits(value: i64) -> bool {
        (Self::MIN..=Self::MAX).contains(&value)
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

/// A runtime value.
///
/// `Copy` is deliberate: values are plain words. A `Ref` is only meaningful
/// together with the owning context's heap, and raw values held in host
/// variables are invisible to the collector — pin them in a [`crate::Scope`]
/// or [`crate::Global`] across any operation that may collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Null,
    /// The "not yet assigned" marker used for variables and locals. Reading
    /// it through an access opcode raises `NameError`.
    Undefined,
    Bool(bool),
    Int(SmallInt),
    Ref(HeapId),
}

impl Value {
    #[must_use]
    pub fn is_null(self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn is_undefined(self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Bit-identity comparison (the `same` predicate). Structural equality is
    /// [`value_equal`].
    #[must_use]
    pub(crate) fn same(self, other: Self) -> bool {
        self == other
    }

    #[must_use]
    pub(crate) fn heap_id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// The embedded small integer, if this value carries one.
    #[must_use]
    pub fn small_int(self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(v.get()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Returns the type descriptor for a value.
pub(crate) fn type_of(heap: &Heap, value: Value) -> Type {
    match value {
        Value::Null => Type::Null,
        Value::Undefined => Type::Undefined,
        Value::Bool(_) => Type::Boolean,
        Value::Int(_) => Type::Integer,
        Value::Ref(id) => heap.get(id).type_of(),
    }
}

/// Truthiness: only `null` and `false` are falsy.
pub(crate) fn truthy(value: Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Materializes an integer: embedded when it fits the small range, boxed
/// otherwise.
pub(crate) fn make_integer(heap: &mut Heap, value: i64) -> VmResult<Value> {
    if SmallInt::fits(value) {
        Ok(Value::Int(SmallInt(value)))
    } else {
        Ok(Value::Ref(heap.allocate(HeapData::Int(value))?))
    }
}

/// Extracts an integer from an embedded or boxed representation.
pub(crate) fn extract_integer(heap: &Heap, value: Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(v.get()),
        Value::Ref(id) => match heap.try_get(id)? {
            HeapData::Int(v) => Some(*v),
            _ => None,
        },
        _ => None,
    }
}

// Fixed seeds keep hashes stable for the lifetime of the process, which the
// hash table's cached entry hashes require.
fn build_hasher() -> ahash::RandomState {
    ahash::RandomState::with_seeds(
        0x563d_1fd1_79a2_4f8b,
        0x9e37_79b9_7f4a_7c15,
        0x2545_f491_4f6c_dd1d,
        0x27d4_eb2f_1656_67c5,
    )
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    build_hasher().hash_one(bytes)
}

fn hash_i64(value: i64) -> u64 {
    build_hasher().hash_one(value)
}

/// Hashes a value such that `value_equal(a, b)` implies equal hashes.
///
/// Numbers hash through their integer value when they have one (so `3`,
/// a boxed `3` and `3.0` agree); strings hash their bytes and cache the
/// result; reference types hash their heap slot index, which is stable
/// because the collector never moves objects.
pub(crate) fn value_hash(heap: &Heap, value: Value) -> u64 {
    match value {
        Value::Null => 0x6e75_6c6c,
        Value::Undefined => 0x756e_6465,
        Value::Bool(b) => hash_i64(i64::from(b)) ^ 0x0b00,
        Value::Int(v) => hash_i64(v.get()),
        // A taken slot (container being mutated) falls through to the
        // identity hash, which is what containers hash as anyway.
        Value::Ref(id) => match heap.try_get(id) {
            Some(HeapData::Int(v)) => hash_i64(*v),
            Some(HeapData::Float(f)) => hash_float(*f),
            Some(HeapData::Str(s)) => s.hash_value(hash_bytes),
            _ => hash_i64(id.index() as i64) ^ 0x5265_6600,
        },
    }
}

fn hash_float(f: f64) -> u64 {
    // Floats with an exact integer value must agree with that integer's hash.
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        hash_i64(f as i64)
    } else {
        build_hasher().hash_one(f.to_bits())
    }
}

fn numeric(heap: &Heap, value: Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(v.get() as f64),
        Value::Ref(id) => match heap.try_get(id)? {
            HeapData::Int(v) => Some(*v as f64),
            HeapData::Float(f) => Some(*f),
            _ => None,
        },
        _ => None,
    }
}

/// Structural equality.
///
/// Integers and floats compare across kinds when numerically equal; strings
/// compare character-wise; everything else compares by identity.
pub(crate) fn value_equal(heap: &Heap, a: Value, b: Value) -> bool {
    if a.same(b) {
        return true;
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => {
            // Exact integer comparison first to avoid rounding through f64.
            if let (Some(x), Some(y)) = (extract_integer(heap, a), extract_integer(heap, b)) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (numeric(heap, a), numeric(heap, b)) {
                return x == y;
            }
            if let (Value::Ref(x), Value::Ref(y)) = (a, b)
                && let (Some(HeapData::Str(sx)), Some(HeapData::Str(sy))) = (heap.try_get(x), heap.try_get(y))
            {
                return sx.text() == sy.text();
            }
            false
        }
    }
}

/// Ordering for the comparison opcodes.
///
/// `null` sorts before every non-null value; numbers compare numerically;
/// strings byte-wise; booleans with `false < true`. Other kind combinations
/// are not ordered and fail with `TypeError`.
pub(crate) fn value_compare(heap: &Heap, a: Value, b: Value) -> VmResult<Ordering> {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ok(Ordering::Equal),
        (true, false) => return Ok(Ordering::Less),
        (false, true) => return Ok(Ordering::Greater),
        (false, false) => {}
    }
    if let (Some(x), Some(y)) = (extract_integer(heap, a), extract_integer(heap, b)) {
        return Ok(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (numeric(heap, a), numeric(heap, b)) {
        return x
            .partial_cmp(&y)
            .ok_or_else(|| VmError::type_error("cannot order nan values"));
    }
    if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
        return Ok(x.cmp(&y));
    }
    if let (Value::Ref(x), Value::Ref(y)) = (a, b)
        && let (HeapData::Str(sx), HeapData::Str(sy)) = (heap.get(x), heap.get(y))
    {
        return Ok(sx.text().cmp(sy.text()));
    }
    Err(VmError::new(
        ErrorKind::TypeError,
        format!(
            "cannot order values of type {} and {}",
            type_of(heap, a),
            type_of(heap, b)
        ),
    ))
}

const RENDER_DEPTH: usize = 4;

/// Renders a value for diagnostics. Not an observable language operation.
pub(crate) fn value_to_string(heap: &Heap, value: Value) -> String {
    render(heap, value, RENDER_DEPTH)
}

fn render(heap: &Heap, value: Value, depth: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Undefined => "undefined".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(v) => v.get().to_string(),
        Value::Ref(id) => render_heap(heap, id, depth),
    }
}

fn render_heap(heap: &Heap, id: HeapId, depth: usize) -> String {
    if depth == 0 {
        return "...".to_string();
    }
    match heap.get(id) {
        HeapData::Int(v) => v.to_string(),
        HeapData::Float(f) => {
            let mut buffer = ryu::Buffer::new();
            buffer.format(*f).to_string()
        }
        HeapData::Str(s) => s.text().to_string(),
        HeapData::Symbol(sym) => format!("#{}", sym.name_text(heap)),
        HeapData::Tuple(t) => {
            let items: Vec<_> = t.values().iter().map(|v| render(heap, *v, depth - 1)).collect();
            format!("({})", items.join(", "))
        }
        HeapData::Array(a) => {
            let items: Vec<_> = a.values().iter().map(|v| render(heap, *v, depth - 1)).collect();
            format!("[{}]", items.join(", "))
        }
        HeapData::Table(t) => {
            let items: Vec<_> = t
                .iter()
                .map(|(k, v)| format!("{}: {}", render(heap, k, depth - 1), render(heap, v, depth - 1)))
                .collect();
            format!("map{{{}}}", items.join(", "))
        }
        HeapData::Set(s) => {
            let items: Vec<_> = s.iter().map(|v| render(heap, v, depth - 1)).collect();
            format!("set{{{}}}", items.join(", "))
        }
        HeapData::Record(r) => {
            let mut parts = Vec::new();
            for (key, value) in r.fields(heap) {
                parts.push(format!("{}: {}", render(heap, key, depth - 1), render(heap, value, depth - 1)));
            }
            format!("record({})", parts.join(", "))
        }
        HeapData::RecordTemplate(_) => "<record template>".to_string(),
        HeapData::Code(_) => "<code>".to_string(),
        HeapData::FunctionTemplate(t) => format!("<function template {}>", t.name_text(heap)),
        HeapData::ClosureContext(_) => "<closure context>".to_string(),
        HeapData::Function(f) => format!("<function {}>", f.name_text(heap)),
        HeapData::BoundMethod(_) => "<bound method>".to_string(),
        HeapData::NativeFunction(f) => format!("<native function {}>", f.name_text(heap)),
        HeapData::NativeObject(_) => "<native object>".to_string(),
        HeapData::Module(m) => format!("<module {}>", m.name_text(heap)),
        HeapData::UnresolvedImport(u) => format!("<unresolved import {}>", u.name_text(heap)),
        HeapData::Coroutine(c) => format!("<coroutine {}>", c.name_text(heap)),
        HeapData::Iter(_) => "<iterator>".to_string(),
    }
}
