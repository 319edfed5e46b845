//! The managed heap: slot arena, object kinds, and the tracing collector.
//!
//! Objects live in a slot arena indexed by [`HeapId`]. Slots are stable for
//! an object's lifetime (the collector never moves objects), freed slots are
//! recycled through a free list. Collection is precise mark-and-sweep: the
//! context gathers roots (handles, intern tables, registry, scheduler) and
//! hands them to [`Heap::collect`], which walks every outgoing reference per
//! kind and reclaims whatever stayed unmarked, running native finalizers
//! first.
//!
//! Allocation never collects. Crossing the soft limit records a pending
//! `AllocFailure` trigger that the scheduler honors at the next safe point;
//! crossing the hard limit fails the allocation with `OutOfMemory`.

use std::collections::BTreeMap;

use strum::Display;

use crate::error::{VmError, VmResult};
use crate::types::coroutine::Coroutine;
use crate::types::function::{BoundMethod, ClosureContext, Code, Function, FunctionTemplate};
use crate::types::iter::Iter;
use crate::types::module::{Module, UnresolvedImport};
use crate::types::native::{NativeFunction, NativeObject};
use crate::types::record::{Record, RecordTemplate};
use crate::types::set::Set;
use crate::types::string::{Str, Symbol};
use crate::types::table::Table;
use crate::types::tuple::{Array, Tuple};
use crate::types::Type;
use crate::value::Value;

/// Index of an object slot in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw slot index. Stable for the object's lifetime.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Why a collection ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum GcTrigger {
    /// The heap grew past the automatic threshold.
    Automatic,
    /// An allocation observed the soft limit being crossed.
    AllocFailure,
    /// Explicitly requested (tests, host API).
    Forced,
}

/// Every value kind that lives in the arena.
#[derive(Debug)]
pub(crate) enum HeapData {
    /// A boxed 64-bit integer, used when the value does not fit the
    /// small-integer range.
    Int(i64),
    Float(f64),
    Str(Str),
    Symbol(Symbol),
    Tuple(Tuple),
    Array(Array),
    Table(Table),
    Set(Set),
    Record(Record),
    RecordTemplate(RecordTemplate),
    Code(Code),
    FunctionTemplate(FunctionTemplate),
    ClosureContext(ClosureContext),
    Function(Function),
    BoundMethod(BoundMethod),
    NativeFunction(NativeFunction),
    NativeObject(NativeObject),
    Module(Module),
    UnresolvedImport(UnresolvedImport),
    Coroutine(Coroutine),
    Iter(Iter),
}

impl HeapData {
    pub(crate) fn type_of(&self) -> Type {
        match self {
            Self::Int(_) => Type::Integer,
            Self::Float(_) => Type::Float,
            Self::Str(_) => Type::String,
            Self::Symbol(_) => Type::Symbol,
            Self::Tuple(_) => Type::Tuple,
            Self::Array(_) => Type::Array,
            Self::Table(_) => Type::Table,
            Self::Set(_) => Type::Set,
            Self::Record(_) => Type::Record,
            Self::RecordTemplate(_) => Type::RecordTemplate,
            Self::Code(_) => Type::Code,
            Self::FunctionTemplate(_) => Type::FunctionTemplate,
            Self::ClosureContext(_) => Type::ClosureContext,
            Self::Function(_) => Type::Function,
            Self::BoundMethod(_) => Type::BoundMethod,
            Self::NativeFunction(_) => Type::NativeFunction,
            Self::NativeObject(_) => Type::NativeObject,
            Self::Module(_) => Type::Module,
            Self::UnresolvedImport(_) => Type::UnresolvedImport,
            Self::Coroutine(_) => Type::Coroutine,
            Self::Iter(_) => Type::Iterator,
        }
    }

    fn kind_name(&self) -> &'static str {
        self.type_of().into()
    }

    /// Rough payload size in bytes, used for limits and GC thresholds.
    fn estimate_size(&self) -> usize {
        let base = size_of::<Self>();
        let extra = match self {
            Self::Str(s) => s.text().len(),
            Self::Tuple(t) => t.values().len() * size_of::<Value>(),
            Self::Array(a) => a.capacity() * size_of::<Value>(),
            Self::Table(t) => t.estimate_size(),
            Self::Set(s) => s.estimate_size(),
            Self::Record(r) => r.len() * size_of::<Value>(),
            Self::RecordTemplate(t) => t.keys().len() * size_of::<HeapId>(),
            Self::Code(c) => c.bytes().len(),
            Self::ClosureContext(c) => c.len() * size_of::<Value>(),
            Self::Coroutine(c) => c.estimate_size(),
            _ => 0,
        };
        base + extra
    }

    /// Pushes every outgoing heap reference onto the mark worklist.
    fn trace(&self, work: &mut Vec<HeapId>) {
        match self {
            Self::Int(_) | Self::Float(_) | Self::Str(_) | Self::Code(_) | Self::NativeObject(_) => {}
            Self::Symbol(sym) => work.push(sym.name()),
            Self::Tuple(t) => trace_values(t.values(), work),
            Self::Array(a) => trace_values(a.values(), work),
            Self::Table(t) => t.trace(work),
            Self::Set(s) => s.trace(work),
            Self::Record(r) => {
                work.push(r.template());
                trace_values(r.values(), work);
            }
            Self::RecordTemplate(t) => work.extend_from_slice(t.keys()),
            Self::FunctionTemplate(t) => {
                work.push(t.name);
                work.push(t.module);
                work.push(t.code);
            }
            Self::ClosureContext(c) => {
                if let Some(parent) = c.parent() {
                    work.push(parent);
                }
                trace_values(c.slots(), work);
            }
            Self::Function(f) => {
                work.push(f.template);
                if let Some(closure) = f.closure {
                    work.push(closure);
                }
            }
            Self::BoundMethod(m) => {
                trace_value(m.function, work);
                trace_value(m.receiver, work);
            }
            Self::NativeFunction(f) => work.push(f.name()),
            Self::Module(m) => {
                work.push(m.name());
                work.push(m.members());
                work.push(m.exports());
                if let Some(init) = m.init() {
                    trace_value(init, work);
                }
            }
            Self::UnresolvedImport(u) => work.push(u.name()),
            Self::Coroutine(c) => c.trace(work),
            Self::Iter(i) => work.push(i.target()),
        }
    }
}

pub(crate) fn trace_value(value: Value, work: &mut Vec<HeapId>) {
    if let Value::Ref(id) = value {
        work.push(id);
    }
}

pub(crate) fn trace_values(values: &[Value], work: &mut Vec<HeapId>) {
    for value in values {
        trace_value(*value, work);
    }
}

/// Object header: payload plus collector flags. The payload is an `Option`
/// so callers can temporarily move data out of a slot while they operate on
/// it with further heap access (the take/restore pattern).
#[derive(Debug)]
struct Slot {
    data: Option<HeapData>,
    marked: bool,
    finalize: bool,
}

/// Allocation limits, configured through `ContextConfig`.
#[derive(Debug, Clone, Default)]
pub(crate) struct HeapLimits {
    /// Crossing this records a pending `AllocFailure` collection trigger.
    pub soft_limit: Option<usize>,
    /// Crossing this fails the allocation with `OutOfMemory`.
    pub hard_limit: Option<usize>,
}

const INITIAL_THRESHOLD: usize = 1 << 20;

/// Snapshot of heap state at a point in time, for monitoring and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live objects on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total arena capacity (live + free).
    pub total_slots: usize,
    /// Estimated live bytes.
    pub live_bytes: usize,
    /// Breakdown of live objects by kind name.
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Number of collections performed so far.
    pub collections: u64,
}

impl HeapStats {
    /// Computes `other - self` per-field deltas.
    #[must_use]
    pub fn diff(&self, other: &Self) -> HeapDiff {
        let mut objects_by_type_delta = BTreeMap::new();
        for (&name, &count) in &self.objects_by_type {
            let after = other.objects_by_type.get(name).copied().unwrap_or(0);
            objects_by_type_delta.insert(name, after as isize - count as isize);
        }
        for (&name, &count) in &other.objects_by_type {
            objects_by_type_delta.entry(name).or_insert(count as isize);
        }
        HeapDiff {
            live_objects_delta: other.live_objects as isize - self.live_objects as isize,
            live_bytes_delta: other.live_bytes as isize - self.live_bytes as isize,
            objects_by_type_delta,
        }
    }
}

/// Difference between two heap snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapDiff {
    pub live_objects_delta: isize,
    pub live_bytes_delta: isize,
    pub objects_by_type_delta: BTreeMap<&'static str, isize>,
}

impl HeapDiff {
    /// True when nothing changed between the two snapshots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_objects_delta == 0
            && self.live_bytes_delta == 0
            && self.objects_by_type_delta.values().all(|&delta| delta == 0)
    }
}

impl std::fmt::Display for HeapDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "heap diff: no changes");
        }
        write!(
            f,
            "heap diff: {:+} objects, {:+} bytes",
            self.live_objects_delta, self.live_bytes_delta
        )?;
        for (&name, &delta) in &self.objects_by_type_delta {
            if delta != 0 {
                write!(f, "\n  {name}: {delta:+}")?;
            }
        }
        Ok(())
    }
}

/// Result of one collection, reported to tracers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub roots: usize,
    pub collected_objects: usize,
    pub surviving_objects: usize,
    pub surviving_bytes: usize,
}

pub(crate) struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<HeapId>,
    live_count: usize,
    live_bytes: usize,
    threshold: usize,
    limits: HeapLimits,
    pending_trigger: Option<GcTrigger>,
    collections: u64,
}

impl Heap {
    pub fn new(limits: HeapLimits) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live_count: 0,
            live_bytes: 0,
            threshold: INITIAL_THRESHOLD,
            limits,
            pending_trigger: None,
            collections: 0,
        }
    }

    /// Allocates a new object. Never collects; see the module docs for the
    /// limit behavior.
    pub fn allocate(&mut self, data: HeapData) -> VmResult<HeapId> {
        let bytes = data.estimate_size();
        if let Some(hard) = self.limits.hard_limit
            && self.live_bytes.saturating_add(bytes) > hard
        {
            return Err(VmError::out_of_memory());
        }
        if let Some(soft) = self.limits.soft_limit
            && self.live_bytes.saturating_add(bytes) > soft
            && self.pending_trigger.is_none()
        {
            self.pending_trigger = Some(GcTrigger::AllocFailure);
        }

        let slot = Slot {
            data: Some(data),
            marked: false,
            finalize: false,
        };
        let id = if let Some(id) = self.free_list.pop() {
            self.slots[id.index()] = slot;
            id
        } else {
            self.slots.push(slot);
            HeapId(self.slots.len() - 1)
        };
        self.live_count += 1;
        self.live_bytes += bytes;
        Ok(id)
    }

    /// Marks an object for sweep-time finalization. Only meaningful for
    /// native objects carrying a cleanup callback.
    pub fn register_finalizer(&mut self, id: HeapId) {
        self.slots[id.index()].finalize = true;
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        self.slots[id.index()]
            .data
            .as_ref()
            .expect("heap slot is free or its data is taken")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.slots[id.index()]
            .data
            .as_mut()
            .expect("heap slot is free or its data is taken")
    }

    /// Like [`Heap::get`], but returns `None` for slots whose data is
    /// currently taken. Value hashing and equality go through this so a
    /// container can appear as its own key while its payload is moved out.
    pub fn try_get(&self, id: HeapId) -> Option<&HeapData> {
        self.slots.get(id.index()).and_then(|slot| slot.data.as_ref())
    }

    /// Temporarily moves an object's payload out of its slot so the caller
    /// can mutate it while still reading other heap objects. Must be paired
    /// with [`Heap::restore_data`] before any collection can run.
    pub fn take_data(&mut self, id: HeapId) -> HeapData {
        self.slots[id.index()]
            .data
            .take()
            .expect("heap slot is free or its data is already taken")
    }

    pub fn restore_data(&mut self, id: HeapId, data: HeapData) {
        let slot = &mut self.slots[id.index()];
        debug_assert!(slot.data.is_none(), "restoring into an occupied slot");
        slot.data = Some(data);
    }

    pub fn live_objects(&self) -> usize {
        self.live_count
    }

    /// True when a scheduler-driven trigger is due. Checked at safe points;
    /// the actual trigger is taken with [`Heap::due_trigger`].
    pub fn gc_due(&self) -> bool {
        self.live_bytes >= self.threshold || self.pending_trigger.is_some()
    }

    /// Takes the pending scheduler-driven trigger, if any. `Automatic` wins
    /// over a pending `AllocFailure` only through the threshold check.
    pub fn due_trigger(&mut self) -> Option<GcTrigger> {
        if self.live_bytes >= self.threshold {
            self.pending_trigger = None;
            return Some(GcTrigger::Automatic);
        }
        self.pending_trigger.take()
    }

    /// Iterates every live object.
    pub fn for_each_object(&self, mut f: impl FnMut(HeapId, &HeapData)) {
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(data) = &slot.data {
                f(HeapId(index), data);
            }
        }
    }

    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        self.for_each_object(|_, data| {
            *objects_by_type.entry(data.kind_name()).or_insert(0) += 1;
        });
        HeapStats {
            live_objects: self.live_count,
            free_slots: self.free_list.len(),
            total_slots: self.slots.len(),
            live_bytes: self.live_bytes,
            objects_by_type,
            collections: self.collections,
        }
    }

    /// Runs a full mark-and-sweep collection over the given roots.
    ///
    /// Every mutator value must be reachable from `roots` when this is
    /// called; the context guarantees that by only collecting at safe
    /// points.
    pub fn collect(&mut self, _trigger: GcTrigger, roots: &[HeapId]) -> GcStats {
        // Mark phase: worklist over slot indices.
        let mut work: Vec<HeapId> = roots.to_vec();
        while let Some(id) = work.pop() {
            let slot = &mut self.slots[id.index()];
            if slot.marked {
                continue;
            }
            slot.marked = true;
            slot.data
                .as_ref()
                .expect("collection started while object data is taken")
                .trace(&mut work);
        }

        // Sweep phase: finalize and free unmarked slots, clear marks on
        // survivors, and re-measure surviving bytes (mutations since the
        // last collection may have resized payloads).
        let mut collected = 0usize;
        let mut surviving = 0usize;
        let mut surviving_bytes = 0usize;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.data.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
                surviving += 1;
                surviving_bytes += slot.data.as_ref().map_or(0, HeapData::estimate_size);
                continue;
            }
            let data = slot.data.take().expect("checked above");
            if slot.finalize
                && let HeapData::NativeObject(mut native) = data
            {
                native.run_finalizer();
            }
            slot.finalize = false;
            self.free_list.push(HeapId(index));
            collected += 1;
        }

        self.live_count = surviving;
        self.live_bytes = surviving_bytes;
        self.pending_trigger = None;
        self.collections += 1;

        // Threshold schedule: grow to the next power of two of the surviving
        // size, reset when survivors drop below 2/3 of the old threshold.
        let next = surviving_bytes.next_power_of_two().max(INITIAL_THRESHOLD);
        if surviving_bytes * 3 < self.threshold * 2 {
            self.threshold = next;
        } else {
            self.threshold = self.threshold.max(next);
        }

        GcStats {
            roots: roots.len(),
            collected_objects: collected,
            surviving_objects: surviving,
            surviving_bytes,
        }
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("live_objects", &self.live_count)
            .field("live_bytes", &self.live_bytes)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
