//! The insertion-ordered hash table.
//!
//! Storage is two-level: a dense entries array kept in insertion order
//! (deletions leave tombstones that are eventually compacted away) and an
//! index array of buckets probed with robin-hood hashing. The index element
//! width (u8/u16/u32/u64) is chosen from the entry capacity; the all-ones
//! value of each width marks an empty bucket, and the all-ones hash value
//! marks a tombstoned entry, so raw hashes are reduced into the sentinel-free
//! range before use.

use crate::heap::{trace_value, Heap, HeapData, HeapId};
use crate::value::{value_equal, value_hash, Value};

const INITIAL_ENTRY_CAPACITY: usize = 6;
const INITIAL_INDEX_CAPACITY: usize = 8;

/// Hash value reserved for tombstoned entries.
const DELETED_HASH: u64 = u64::MAX;

#[derive(Debug, Clone, Copy)]
struct Entry {
    hash: u64,
    key: Value,
    value: Value,
}

impl Entry {
    fn deleted() -> Self {
        Self {
            hash: DELETED_HASH,
            key: Value::Null,
            value: Value::Null,
        }
    }

    fn is_deleted(&self) -> bool {
        self.hash == DELETED_HASH
    }
}

/// Reduces an arbitrary hash into the range that excludes the tombstone
/// sentinel.
fn reduce_hash(raw: u64) -> u64 {
    if raw == DELETED_HASH { 0 } else { raw }
}

trait IndexSlot: Copy + Eq {
    const EMPTY: Self;
    fn from_usize(value: usize) -> Self;
    fn to_usize(self) -> usize;
}

macro_rules! impl_index_slot {
    ($($ty:ty),*) => {
        $(impl IndexSlot for $ty {
            const EMPTY: Self = <$ty>::MAX;
            #[inline]
            fn from_usize(value: usize) -> Self {
                debug_assert!(value < Self::EMPTY as usize);
                value as $ty
            }
            #[inline]
            fn to_usize(self) -> usize {
                self as usize
            }
        })*
    };
}

impl_index_slot!(u8, u16, u32, u64);

/// Bucket array with a width picked from the entry capacity.
#[derive(Debug)]
enum IndexArray {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

impl IndexArray {
    fn for_capacity(entry_capacity: usize, index_capacity: usize) -> Self {
        if entry_capacity <= u8::MAX as usize {
            Self::U8(vec![u8::EMPTY; index_capacity])
        } else if entry_capacity <= u16::MAX as usize {
            Self::U16(vec![u16::EMPTY; index_capacity])
        } else if entry_capacity <= u32::MAX as usize {
            Self::U32(vec![u32::EMPTY; index_capacity])
        } else {
            Self::U64(vec![u64::EMPTY; index_capacity])
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::U64(v) => v.len(),
        }
    }

    fn byte_len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len() * 2,
            Self::U32(v) => v.len() * 4,
            Self::U64(v) => v.len() * 8,
        }
    }

    fn fill_empty(&mut self) {
        match self {
            Self::U8(v) => v.fill(u8::EMPTY),
            Self::U16(v) => v.fill(u16::EMPTY),
            Self::U32(v) => v.fill(u32::EMPTY),
            Self::U64(v) => v.fill(u64::EMPTY),
        }
    }
}

macro_rules! with_index {
    ($index:expr, $name:ident, $body:expr) => {
        match $index {
            IndexArray::U8($name) => $body,
            IndexArray::U16($name) => $body,
            IndexArray::U32($name) => $body,
            IndexArray::U64($name) => $body,
        }
    };
}

#[inline]
fn distance_from_ideal(hash: u64, bucket: usize, mask: usize) -> usize {
    bucket.wrapping_sub(hash as usize) & mask
}

fn key_equal(heap: &Heap, a: Value, b: Value) -> bool {
    a.same(b) || value_equal(heap, a, b)
}

/// Probes for `key`. Returns `(bucket, entry_index)` on success. The robin
/// hood invariant allows an early exit once the probe distance exceeds the
/// resident entry's distance.
fn find_impl<T: IndexSlot>(
    indices: &[T],
    entries: &[Entry],
    mask: usize,
    heap: &Heap,
    key: Value,
    key_hash: u64,
) -> Option<(usize, usize)> {
    let mut bucket = key_hash as usize & mask;
    let mut distance = 0;
    loop {
        let slot = indices[bucket];
        if slot == T::EMPTY {
            return None;
        }
        let entry = &entries[slot.to_usize()];
        if distance > distance_from_ideal(entry.hash, bucket, mask) {
            return None;
        }
        if entry.hash == key_hash && key_equal(heap, entry.key, key) {
            return Some((bucket, slot.to_usize()));
        }
        bucket = (bucket + 1) & mask;
        distance += 1;
    }
}

/// Inserts `key -> value`. Returns `true` when a new entry was appended,
/// `false` when an existing key's value was overwritten.
#[expect(clippy::too_many_arguments, reason = "split borrows of the table's fields")]
fn set_impl<T: IndexSlot>(
    indices: &mut [T],
    entries: &mut Vec<Entry>,
    size: &mut usize,
    mask: usize,
    heap: &Heap,
    key: Value,
    value: Value,
    key_hash: u64,
) -> bool {
    // One of three things happens below: the key is found and overwritten,
    // an empty bucket takes the new index, or an existing bucket is stolen
    // (robin hood) and its previous content is re-registered further on.
    let mut index_to_insert = T::from_usize(entries.len());
    let mut bucket = key_hash as usize & mask;
    let mut distance = 0;
    let mut stolen = false;

    loop {
        let slot = indices[bucket];
        if slot == T::EMPTY {
            indices[bucket] = index_to_insert;
            break;
        }
        let entry = &entries[slot.to_usize()];
        let entry_distance = distance_from_ideal(entry.hash, bucket, mask);
        if entry_distance < distance {
            stolen = true;
            indices[bucket] = index_to_insert;
            index_to_insert = slot;
            distance = entry_distance;
            break;
        }
        if entry.hash == key_hash && key_equal(heap, entry.key, key) {
            let stored_key = entry.key;
            entries[slot.to_usize()] = Entry {
                hash: key_hash,
                key: stored_key,
                value,
            };
            return false;
        }
        bucket = (bucket + 1) & mask;
        distance += 1;
    }

    entries.push(Entry {
        hash: key_hash,
        key,
        value,
    });
    *size += 1;

    if stolen {
        // Continue re-registering the displaced bucket contents.
        loop {
            bucket = (bucket + 1) & mask;
            distance += 1;

            let slot = indices[bucket];
            if slot == T::EMPTY {
                indices[bucket] = index_to_insert;
                break;
            }
            let entry = &entries[slot.to_usize()];
            let entry_distance = distance_from_ideal(entry.hash, bucket, mask);
            if entry_distance < distance {
                indices[bucket] = index_to_insert;
                index_to_insert = slot;
                distance = entry_distance;
            }
            // Equal keys are impossible here: only entries already resident
            // in the table are being moved.
        }
    }
    true
}

/// Backshift deletion: close the hole at `erased_bucket` by moving
/// displaced successors one bucket back until an empty bucket or an entry
/// at its ideal position stops the walk.
fn remove_from_index_impl<T: IndexSlot>(
    indices: &mut [T],
    entries: &[Entry],
    mask: usize,
    erased_bucket: usize,
) {
    let mut hole = erased_bucket;
    indices[hole] = T::EMPTY;
    let mut current = (hole + 1) & mask;
    loop {
        let slot = indices[current];
        if slot == T::EMPTY {
            break;
        }
        let entry = &entries[slot.to_usize()];
        if distance_from_ideal(entry.hash, current, mask) == 0 {
            break;
        }
        indices[hole] = slot;
        indices[current] = T::EMPTY;
        hole = current;
        current = (current + 1) & mask;
    }
}

/// Rebuilds the index from a packed entries array.
fn rehash_impl<T: IndexSlot>(indices: &mut [T], entries: &[Entry], mask: usize) {
    for (entry_index, entry) in entries.iter().enumerate() {
        debug_assert!(!entry.is_deleted(), "rehash requires packed entries");
        let mut index_to_insert = T::from_usize(entry_index);
        let mut bucket = entry.hash as usize & mask;
        let mut distance = 0;
        loop {
            let slot = indices[bucket];
            if slot == T::EMPTY {
                indices[bucket] = index_to_insert;
                break;
            }
            let other = &entries[slot.to_usize()];
            let other_distance = distance_from_ideal(other.hash, bucket, mask);
            if other_distance < distance {
                indices[bucket] = index_to_insert;
                index_to_insert = slot;
                distance = other_distance;
            }
            bucket = (bucket + 1) & mask;
            distance += 1;
        }
    }
}

/// An ordered map from values to values.
#[derive(Debug)]
pub(crate) struct Table {
    /// Entries in insertion order. Deleted entries leave tombstones.
    entries: Vec<Entry>,
    /// Occupied-entry budget before the table grows or compacts.
    entry_capacity: usize,
    /// Bucket array mapping hash positions to entry indices.
    index: IndexArray,
    /// `index.len() - 1`; the index capacity is always a power of two.
    mask: usize,
    /// Number of live (non-tombstoned) entries.
    size: usize,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            entry_capacity: 0,
            index: IndexArray::U8(Vec::new()),
            mask: 0,
            size: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut table = Self::new();
        if capacity > 0 {
            table.grow_to(capacity.max(INITIAL_ENTRY_CAPACITY));
        }
        table
    }

    /// Index capacity for a given entry capacity: a power of two, at least 8
    /// and at least `ceil(entry_capacity * 4 / 3)`.
    pub fn index_size_for(entry_capacity: usize) -> usize {
        if entry_capacity <= INITIAL_ENTRY_CAPACITY {
            INITIAL_INDEX_CAPACITY
        } else {
            (entry_capacity + (entry_capacity + 2) / 3).next_power_of_two()
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Entry slots occupied by live or tombstoned entries.
    pub fn occupied_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn entry_capacity(&self) -> usize {
        self.entry_capacity
    }

    pub fn index_capacity(&self) -> usize {
        self.index.len()
    }

    /// True when there are no tombstones.
    pub fn is_packed(&self) -> bool {
        self.size == self.entries.len()
    }

    pub fn contains(&self, heap: &Heap, key: Value) -> bool {
        self.find_bucket(heap, key).is_some()
    }

    pub fn get(&self, heap: &Heap, key: Value) -> Option<Value> {
        let (_, entry_index) = self.find_bucket(heap, key)?;
        Some(self.entries[entry_index].value)
    }

    /// Returns the stored `(key, value)` pair. The stored key identity
    /// matters to the interners.
    pub fn find(&self, heap: &Heap, key: Value) -> Option<(Value, Value)> {
        let (_, entry_index) = self.find_bucket(heap, key)?;
        let entry = &self.entries[entry_index];
        Some((entry.key, entry.value))
    }

    /// Inserts or overwrites. Returns `true` when the key was newly
    /// inserted.
    pub fn set(&mut self, heap: &Heap, key: Value, value: Value) -> bool {
        self.ensure_free_capacity();
        let key_hash = reduce_hash(value_hash(heap, key));
        match &mut self.index {
            IndexArray::U8(indices) => set_impl(
                indices,
                &mut self.entries,
                &mut self.size,
                self.mask,
                heap,
                key,
                value,
                key_hash,
            ),
            IndexArray::U16(indices) => set_impl(
                indices,
                &mut self.entries,
                &mut self.size,
                self.mask,
                heap,
                key,
                value,
                key_hash,
            ),
            IndexArray::U32(indices) => set_impl(
                indices,
                &mut self.entries,
                &mut self.size,
                self.mask,
                heap,
                key,
                value,
                key_hash,
            ),
            IndexArray::U64(indices) => set_impl(
                indices,
                &mut self.entries,
                &mut self.size,
                self.mask,
                heap,
                key,
                value,
                key_hash,
            ),
        }
    }

    /// Removes `key` if present. Compacts the entries once live entries drop
    /// to a quarter of the occupied slots.
    pub fn remove(&mut self, heap: &Heap, key: Value) {
        let Some((bucket, entry_index)) = self.find_bucket(heap, key) else {
            return;
        };

        if entry_index == self.entries.len() - 1 {
            self.entries.pop();
        } else {
            self.entries[entry_index] = Entry::deleted();
        }
        self.size -= 1;
        if self.size == 0 {
            self.entries.clear();
        }

        match &mut self.index {
            IndexArray::U8(indices) => remove_from_index_impl(indices, &self.entries, self.mask, bucket),
            IndexArray::U16(indices) => remove_from_index_impl(indices, &self.entries, self.mask, bucket),
            IndexArray::U32(indices) => remove_from_index_impl(indices, &self.entries, self.mask, bucket),
            IndexArray::U64(indices) => remove_from_index_impl(indices, &self.entries, self.mask, bucket),
        }

        if self.size <= self.entries.len() / 4 {
            self.pack();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.size = 0;
        self.index.fill_empty();
    }

    /// Closes tombstone holes in place and rebuilds the index. Packing
    /// happens automatically; this is exposed for tests.
    pub fn pack(&mut self) {
        if self.is_packed() {
            return;
        }
        self.entries.retain(|entry| !entry.is_deleted());
        self.index.fill_empty();
        self.rehash();
    }

    /// Iterates live entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries
            .iter()
            .filter(|entry| !entry.is_deleted())
            .map(|entry| (entry.key, entry.value))
    }

    /// Cursor-style iteration used by iterator objects: advances `pos` over
    /// the entry storage, skipping tombstones.
    pub fn next_from(&self, pos: &mut usize) -> Option<(Value, Value)> {
        while *pos < self.entries.len() {
            let entry = &self.entries[*pos];
            *pos += 1;
            if !entry.is_deleted() {
                return Some((entry.key, entry.value));
            }
        }
        None
    }

    pub(crate) fn trace(&self, work: &mut Vec<HeapId>) {
        for entry in &self.entries {
            trace_value(entry.key, work);
            trace_value(entry.value, work);
        }
    }

    pub(crate) fn estimate_size(&self) -> usize {
        self.entries.capacity() * size_of::<Entry>() + self.index.byte_len()
    }

    fn find_bucket(&self, heap: &Heap, key: Value) -> Option<(usize, usize)> {
        if self.size == 0 {
            return None;
        }
        let key_hash = reduce_hash(value_hash(heap, key));
        with_index!(&self.index, indices, {
            find_impl(indices, &self.entries, self.mask, heap, key, key_hash)
        })
    }

    /// Makes room for one more occupied entry: grow when more than 2/3 of
    /// the entry capacity is live, otherwise compact tombstones away.
    fn ensure_free_capacity(&mut self) {
        if self.entry_capacity == 0 {
            self.entries = Vec::with_capacity(INITIAL_ENTRY_CAPACITY);
            self.entry_capacity = INITIAL_ENTRY_CAPACITY;
            self.index = IndexArray::U8(vec![u8::EMPTY; INITIAL_INDEX_CAPACITY]);
            self.mask = INITIAL_INDEX_CAPACITY - 1;
            return;
        }
        if self.entries.len() == self.entry_capacity {
            if self.size * 3 > self.entry_capacity * 2 {
                self.grow_to(self.entry_capacity + self.entry_capacity / 2);
            } else {
                self.pack();
            }
        }
        debug_assert!(self.entries.len() < self.entry_capacity);
    }

    fn grow_to(&mut self, new_entry_capacity: usize) {
        debug_assert!(new_entry_capacity > self.entry_capacity);

        let mut packed = Vec::with_capacity(new_entry_capacity);
        packed.extend(self.entries.iter().copied().filter(|entry| !entry.is_deleted()));
        self.entries = packed;
        self.entry_capacity = new_entry_capacity;

        let index_capacity = Self::index_size_for(new_entry_capacity);
        self.index = IndexArray::for_capacity(new_entry_capacity, index_capacity);
        self.mask = index_capacity - 1;
        self.rehash();
    }

    fn rehash(&mut self) {
        match &mut self.index {
            IndexArray::U8(indices) => rehash_impl(indices, &self.entries, self.mask),
            IndexArray::U16(indices) => rehash_impl(indices, &self.entries, self.mask),
            IndexArray::U32(indices) => rehash_impl(indices, &self.entries, self.mask),
            IndexArray::U64(indices) => rehash_impl(indices, &self.entries, self.mask),
        }
    }
}

/// Mutating table operations on a heap-resident table.
///
/// The payload is moved out of its slot for the duration so the table can
/// hash and compare other heap values while being mutated.
pub(crate) fn table_set(heap: &mut Heap, table: HeapId, key: Value, value: Value) -> bool {
    let mut data = heap.take_data(table);
    let inserted = match &mut data {
        HeapData::Table(t) => t.set(heap, key, value),
        _ => unreachable!("table_set on a non-table object"),
    };
    heap.restore_data(table, data);
    inserted
}

pub(crate) fn table_remove(heap: &mut Heap, table: HeapId, key: Value) {
    let mut data = heap.take_data(table);
    match &mut data {
        HeapData::Table(t) => t.remove(heap, key),
        _ => unreachable!("table_remove on a non-table object"),
    }
    heap.restore_data(table, data);
}

pub(crate) fn table_get(heap: &Heap, table: HeapId, key: Value) -> Option<Value> {
    match heap.get(table) {
        HeapData::Table(t) => t.get(heap, key),
        _ => unreachable!("table_get on a non-table object"),
    }
}

pub(crate) fn table_contains(heap: &Heap, table: HeapId, key: Value) -> bool {
    match heap.get(table) {
        HeapData::Table(t) => t.contains(heap, key),
        _ => unreachable!("table_contains on a non-table object"),
    }
}

pub(crate) fn table_find(heap: &Heap, table: HeapId, key: Value) -> Option<(Value, Value)> {
    match heap.get(table) {
        HeapData::Table(t) => t.find(heap, key),
        _ => unreachable!("table_find on a non-table object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapLimits;
    use crate::value::{make_integer, SmallInt};

    fn int(n: i64) -> Value {
        Value::Int(SmallInt::new(n).unwrap())
    }

    fn keys_of(table: &Table) -> Vec<i64> {
        table.iter().map(|(k, _)| k.small_int().unwrap()).collect()
    }

    #[test]
    fn index_sizes() {
        assert_eq!(Table::index_size_for(0), 8);
        assert_eq!(Table::index_size_for(6), 8);
        assert_eq!(Table::index_size_for(7), 16);
        assert_eq!(Table::index_size_for(15), 32);
        assert_eq!(Table::index_size_for(16), 32);
        assert_eq!(Table::index_size_for(24), 32);
        assert_eq!(Table::index_size_for(32), 64);
        assert_eq!(Table::index_size_for(767), 1024);
        assert_eq!(Table::index_size_for(1 << 24), 1 << 25);
    }

    #[test]
    fn with_capacity_sizes_the_index() {
        let heap = Heap::new(HeapLimits::default());
        let table = Table::with_capacity(33);
        assert!(table.entry_capacity() >= 33);
        assert_eq!(table.index_capacity(), 64);
        assert!(!table.contains(&heap, int(1)));
    }

    #[test]
    fn insert_get_overwrite() {
        let heap = Heap::new(HeapLimits::default());
        let mut table = Table::new();
        assert!(table.set(&heap, int(1), int(10)));
        assert!(table.set(&heap, int(2), int(20)));
        assert!(!table.set(&heap, int(1), int(11)));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&heap, int(1)), Some(int(11)));
        assert_eq!(table.get(&heap, int(2)), Some(int(20)));
        assert_eq!(table.get(&heap, int(3)), None);
    }

    #[test]
    fn iteration_order_survives_removal_and_reinsertion() {
        let heap = Heap::new(HeapLimits::default());
        let mut table = Table::new();
        for (k, v) in [(3, 1), (5, 2), (8, 3), (13, 4), (21, 5), (34, 6), (55, 6)] {
            table.set(&heap, int(k), int(v));
        }
        table.remove(&heap, int(8));
        table.set(&heap, int(8), int(99));

        let pairs: Vec<(i64, i64)> = table
            .iter()
            .map(|(k, v)| (k.small_int().unwrap(), v.small_int().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![(3, 1), (5, 2), (13, 4), (21, 5), (34, 6), (55, 6), (8, 99)]
        );
    }

    #[test]
    fn growth_preserves_membership_and_order() {
        let heap = Heap::new(HeapLimits::default());
        let mut table = Table::new();
        for k in 0..500 {
            table.set(&heap, int(k), int(k * 2));
        }
        assert_eq!(table.len(), 500);
        assert_eq!(keys_of(&table), (0..500).collect::<Vec<_>>());
        for k in 0..500 {
            assert_eq!(table.get(&heap, int(k)), Some(int(k * 2)));
        }
        // 500 entries force the index out of the u8 width class.
        assert!(table.entry_capacity() > u8::MAX as usize);
    }

    #[test]
    fn removal_compacts_below_a_quarter() {
        let heap = Heap::new(HeapLimits::default());
        let mut table = Table::new();
        for k in 0..40 {
            table.set(&heap, int(k), int(k));
        }
        for k in 0..35 {
            table.remove(&heap, int(k));
        }
        assert_eq!(table.len(), 5);
        assert!(table.is_packed());
        assert_eq!(keys_of(&table), vec![35, 36, 37, 38, 39]);
    }

    #[test]
    fn clear_resets_size_but_not_membership_errors() {
        let heap = Heap::new(HeapLimits::default());
        let mut table = Table::new();
        table.set(&heap, int(1), int(1));
        table.clear();
        assert_eq!(table.len(), 0);
        assert!(!table.contains(&heap, int(1)));
        assert!(table.set(&heap, int(1), int(2)));
        assert_eq!(table.get(&heap, int(1)), Some(int(2)));
    }

    #[test]
    fn boxed_and_small_integers_collide() {
        let mut heap = Heap::new(HeapLimits::default());
        let boxed = make_integer(&mut heap, i64::MAX).unwrap();
        let mut table = Table::new();
        table.set(&heap, boxed, int(1));
        let boxed_again = make_integer(&mut heap, i64::MAX).unwrap();
        assert_eq!(table.get(&heap, boxed_again), Some(int(1)));
    }
}
