//! Hash-indexed composite-key store with main/delta partitioning
//!
//! ## Partitions
//!
//! ```text
//! insert ──► key in main? ──yes──► delta_known_keys   (KnownKeysNewFacts)
//!                    └──────no───► delta_new_keys     (NewKeysNewFacts)
//! delete ──► detach from main row ──row empty──► deletion marker
//! commit ──► main ∪= deltas, deltas cleared, empty marked rows dropped
//! ```
//!
//! The three partitions are disjoint. A row whose last fact was removed
//! stays in main (empty, flagged) until the next commit so the evaluator can
//! still observe the key for the rest of the cycle.
//!
//! ## Table layout
//!
//! Each partition is a [`FieldsFactMap`]: a dense row vector in insertion
//! order plus a power-of-two slot array addressed by linear probing. Slots
//! store row indices. Removal uses backward-shift deletion so probe chains
//! never need tombstones, then swap-removes the row.
//!
//! Composite hashes XOR the per-field hashes of the key values. Equality is
//! field-wise on the values, never on fact identity.

use crate::error::{DauberError, DauberResult};
use crate::fact::RuntimeFact;
use crate::types::{ActiveField, FactHandleVersioned, FieldsKey, KeyMode};
use ahash::{AHashSet, RandomState};
use dauber_types::FactValue;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

const EMPTY_SLOT: u32 = u32::MAX;

// Fixed seeds keep hashes, and therefore probe order, reproducible across runs.
const HASH_SEEDS: [u64; 4] =
    [0x243f_6a88_85a3_08d3, 0x1319_8a2e_0370_7344, 0xa409_3822_299f_31d0, 0x082e_fa98_ec4e_6c89];

// Rows holding more facts than this index their handles instead of scanning.
const ROW_INDEX_THRESHOLD: usize = 16;

/// One distinct key tuple with the handles of every fact sharing it
///
/// Handles keep insertion order until one is removed; removal swaps the last
/// handle into the freed position.
#[derive(Debug, Clone)]
pub struct ValueRow {
    key: Box<[FactValue]>,
    hash: u64,
    facts: Vec<FactHandleVersioned>,
    positions: HashMap<FactHandleVersioned, u32, RandomState>,
}

impl PartialEq for ValueRow {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.key == other.key && self.facts == other.facts
    }
}

impl ValueRow {
    fn new(key: Box<[FactValue]>, hash: u64, fact: FactHandleVersioned) -> Self {
        Self { key, hash, facts: vec![fact], positions: HashMap::default() }
    }

    pub fn key(&self) -> &[FactValue] {
        &self.key
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn facts(&self) -> &[FactHandleVersioned] {
        &self.facts
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    fn position(&self, fact: &FactHandleVersioned) -> Option<usize> {
        if self.positions.is_empty() {
            self.facts.iter().position(|h| h == fact)
        } else {
            self.positions.get(fact).map(|&pos| pos as usize)
        }
    }

    fn add_fact(&mut self, fact: FactHandleVersioned) {
        debug_assert!(self.position(&fact).is_none(), "fact {fact} already keyed in row");
        self.facts.push(fact);
        if !self.positions.is_empty() {
            self.positions.insert(fact, (self.facts.len() - 1) as u32);
        } else if self.facts.len() > ROW_INDEX_THRESHOLD {
            self.positions =
                self.facts.iter().enumerate().map(|(pos, handle)| (*handle, pos as u32)).collect();
        }
    }

    fn remove_fact(&mut self, fact: &FactHandleVersioned) -> bool {
        let Some(pos) = self.position(fact) else {
            return false;
        };
        self.facts.swap_remove(pos);
        if !self.positions.is_empty() {
            self.positions.remove(fact);
            if let Some(moved) = self.facts.get(pos) {
                self.positions.insert(*moved, pos as u32);
            }
        }
        true
    }

    fn absorb(&mut self, other: ValueRow) {
        for fact in other.facts {
            self.add_fact(fact);
        }
    }
}

/// Open-addressed map from key tuple to [`ValueRow`]
#[derive(Debug, Clone)]
pub struct FieldsFactMap {
    slots: Vec<u32>,
    rows: Vec<ValueRow>,
    max_load_factor: f64,
}

impl FieldsFactMap {
    pub fn with_capacity(min_capacity: usize, max_load_factor: f64) -> Self {
        let slots = min_capacity.max(4).next_power_of_two();
        Self { slots: vec![EMPTY_SLOT; slots], rows: Vec::new(), max_load_factor }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValueRow> {
        self.rows.iter()
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn home(&self, hash: u64) -> usize {
        (hash as usize) & self.mask()
    }

    /// Probe for `key`: `Ok(slot)` when found, `Err(slot)` with the first empty slot otherwise
    fn find_bin_index(&self, hash: u64, key: &[FactValue]) -> Result<usize, usize> {
        let mask = self.mask();
        let mut slot = self.home(hash);
        // Terminates: the load factor is kept below 1, so an empty slot exists.
        loop {
            let entry = self.slots[slot];
            if entry == EMPTY_SLOT {
                return Err(slot);
            }
            let row = &self.rows[entry as usize];
            if row.hash == hash && *row.key == *key {
                return Ok(slot);
            }
            slot = (slot + 1) & mask;
        }
    }

    pub fn get(&self, hash: u64, key: &[FactValue]) -> Option<&ValueRow> {
        self.find_bin_index(hash, key).ok().map(|slot| &self.rows[self.slots[slot] as usize])
    }

    fn get_mut(&mut self, hash: u64, key: &[FactValue]) -> Option<&mut ValueRow> {
        match self.find_bin_index(hash, key) {
            Ok(slot) => {
                let index = self.slots[slot] as usize;
                Some(&mut self.rows[index])
            }
            Err(_) => None,
        }
    }

    pub fn contains(&self, hash: u64, key: &[FactValue]) -> bool {
        self.find_bin_index(hash, key).is_ok()
    }

    /// Grow so that `additional` more rows fit under the load factor
    pub fn resize(&mut self, additional: usize) {
        let needed = self.rows.len() + additional;
        let mut capacity = self.slots.len();
        while (needed as f64) > (capacity as f64) * self.max_load_factor {
            capacity *= 2;
        }
        if capacity != self.slots.len() {
            self.rehash(capacity);
        }
    }

    fn rehash(&mut self, capacity: usize) {
        self.slots = vec![EMPTY_SLOT; capacity];
        let mask = capacity - 1;
        for (index, row) in self.rows.iter().enumerate() {
            let mut slot = (row.hash as usize) & mask;
            while self.slots[slot] != EMPTY_SLOT {
                slot = (slot + 1) & mask;
            }
            self.slots[slot] = index as u32;
        }
    }

    /// Add a fact to the row for `key`, creating the row if needed
    fn add(&mut self, hash: u64, key: &[FactValue], fact: FactHandleVersioned) {
        if let Some(row) = self.get_mut(hash, key) {
            row.add_fact(fact);
            return;
        }
        self.push_row(ValueRow::new(key.into(), hash, fact));
    }

    /// Insert a row whose key is absent, or merge its facts into the existing row
    fn merge_row(&mut self, row: ValueRow) {
        if let Some(existing) = self.get_mut(row.hash, &row.key) {
            existing.absorb(row);
            return;
        }
        self.push_row(row);
    }

    fn push_row(&mut self, row: ValueRow) {
        self.resize(1);
        match self.find_bin_index(row.hash, &row.key) {
            Err(slot) => {
                self.slots[slot] = self.rows.len() as u32;
                self.rows.push(row);
            }
            Ok(_) => unreachable!("push_row called for a present key"),
        }
    }

    /// Physically remove the row for `key`
    pub fn remove(&mut self, hash: u64, key: &[FactValue]) -> Option<ValueRow> {
        let slot = self.find_bin_index(hash, key).ok()?;
        let index = self.slots[slot] as usize;
        self.backward_shift(slot);

        let last = self.rows.len() - 1;
        if index != last {
            // The last row moves into `index`; repoint its slot.
            let moved_hash = self.rows[last].hash;
            let mask = self.mask();
            let mut probe = self.home(moved_hash);
            while self.slots[probe] != last as u32 {
                probe = (probe + 1) & mask;
            }
            self.slots[probe] = index as u32;
        }
        Some(self.rows.swap_remove(index))
    }

    fn backward_shift(&mut self, mut hole: usize) {
        let mask = self.mask();
        let mut next = (hole + 1) & mask;
        loop {
            let entry = self.slots[next];
            if entry == EMPTY_SLOT {
                break;
            }
            let home = self.home(self.rows[entry as usize].hash);
            // Move the entry back unless its home lies cyclically within (hole, next].
            let stays = if hole <= next {
                hole < home && home <= next
            } else {
                hole < home || home <= next
            };
            if !stays {
                self.slots[hole] = entry;
                hole = next;
            }
            next = (next + 1) & mask;
        }
        self.slots[hole] = EMPTY_SLOT;
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.slots.fill(EMPTY_SLOT);
    }

    fn drain(&mut self) -> Vec<ValueRow> {
        self.slots.fill(EMPTY_SLOT);
        std::mem::take(&mut self.rows)
    }
}

/// Arity-specialised key extraction, fixed at construction
#[derive(Debug, Clone)]
enum KeyShape {
    Single(ActiveField),
    Multi(Box<[ActiveField]>),
}

/// Row counts per partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyStoreStats {
    pub main_rows: usize,
    pub known_key_rows: usize,
    pub new_key_rows: usize,
    pub deleted_keys: usize,
    pub capacity: usize,
    pub fact_refs: usize,
}

impl KeyStoreStats {
    pub fn accumulate(&mut self, other: &KeyStoreStats) {
        self.main_rows += other.main_rows;
        self.known_key_rows += other.known_key_rows;
        self.new_key_rows += other.new_key_rows;
        self.deleted_keys += other.deleted_keys;
        self.capacity += other.capacity;
        self.fact_refs += other.fact_refs;
    }
}

impl fmt::Display for KeyStoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "main={} known+={} new={} deleted={} facts={} slots={}",
            self.main_rows,
            self.known_key_rows,
            self.new_key_rows,
            self.deleted_keys,
            self.fact_refs,
            self.capacity
        )
    }
}

/// Composite-key index over the facts of one (type, field set, alpha bucket)
///
/// Not safe for concurrent mutation: the key scratch buffer is reused by
/// every hashing call, which `&mut self` enforces.
#[derive(Debug, Clone)]
pub struct HashIndexedKeyStore {
    fields: FieldsKey,
    shape: KeyShape,
    hasher: RandomState,
    reusable_values: Vec<FactValue>,
    main: FieldsFactMap,
    delta_known_keys: FieldsFactMap,
    delta_new_keys: FieldsFactMap,
    delete_tasks: AHashSet<Box<[FactValue]>>,
}

impl HashIndexedKeyStore {
    pub fn new(fields: FieldsKey, initial_capacity: usize, max_load_factor: f64) -> DauberResult<Self> {
        let shape = match fields.fields() {
            [] => {
                return Err(DauberError::internal(
                    "key_store",
                    format!("cannot key facts by an empty field set ({fields})"),
                ));
            }
            [single] => KeyShape::Single(single.clone()),
            many => KeyShape::Multi(many.into()),
        };
        let map = FieldsFactMap::with_capacity(initial_capacity, max_load_factor);
        Ok(Self {
            reusable_values: vec![FactValue::Null; fields.size()],
            fields,
            shape,
            hasher: RandomState::with_seeds(HASH_SEEDS[0], HASH_SEEDS[1], HASH_SEEDS[2], HASH_SEEDS[3]),
            main: map.clone(),
            delta_known_keys: map.clone(),
            delta_new_keys: map,
            delete_tasks: AHashSet::new(),
        })
    }

    pub fn fields(&self) -> &FieldsKey {
        &self.fields
    }

    /// Read the fact's key values into the scratch buffer and return their combined hash
    fn hash_fact(&mut self, fact: &RuntimeFact) -> u64 {
        match &self.shape {
            KeyShape::Single(field) => {
                let value = fact.value(field.value_index());
                self.reusable_values[0] = value.clone();
                self.hasher.hash_one(value)
            }
            KeyShape::Multi(fields) => {
                let mut hash = 0u64;
                for (i, field) in fields.iter().enumerate() {
                    let value = fact.value(field.value_index());
                    hash ^= self.hasher.hash_one(value);
                    self.reusable_values[i] = value.clone();
                }
                hash
            }
        }
    }

    /// Combined hash of an explicit key tuple, consistent with `hash_fact`
    pub fn hash_values(&self, key: &[FactValue]) -> u64 {
        key.iter().fold(0u64, |hash, value| hash ^ self.hasher.hash_one(value))
    }

    /// Grow both delta partitions ahead of a batch so no rehash happens mid-batch
    pub fn ensure_delta_capacity(&mut self, insert_count: usize) {
        self.delta_new_keys.resize(insert_count);
        self.delta_known_keys.resize(insert_count);
    }

    /// Key every fact passing `predicate` into the matching delta partition
    pub fn insert<'a, I, P>(&mut self, facts: I, predicate: P)
    where
        I: IntoIterator<Item = &'a RuntimeFact>,
        I::IntoIter: ExactSizeIterator,
        P: Fn(&RuntimeFact) -> bool,
    {
        let facts = facts.into_iter();
        self.ensure_delta_capacity(facts.len());
        for fact in facts {
            if !fact.is_deleted() && predicate(fact) {
                self.insert_fact(fact);
            }
        }
    }

    fn insert_fact(&mut self, fact: &RuntimeFact) {
        let hash = self.hash_fact(fact);
        let destination = if self.main.contains(hash, &self.reusable_values) {
            // Known key, but the new fact must still be reported for this cycle
            &mut self.delta_known_keys
        } else {
            &mut self.delta_new_keys
        };
        destination.add(hash, &self.reusable_values, fact.handle());
    }

    /// Key a fact straight into main, bypassing the deltas
    pub fn insert_direct(&mut self, fact: &RuntimeFact) {
        let hash = self.hash_fact(fact);
        self.main.resize(1);
        self.main.add(hash, &self.reusable_values, fact.handle());
    }

    /// Detach every fact passing `predicate` from its row
    pub fn delete<'a, I, P>(&mut self, facts: I, predicate: P)
    where
        I: IntoIterator<Item = &'a RuntimeFact>,
        P: Fn(&RuntimeFact) -> bool,
    {
        for fact in facts {
            if predicate(fact) {
                self.delete_fact(fact);
            }
        }
    }

    fn delete_fact(&mut self, fact: &RuntimeFact) {
        let hash = self.hash_fact(fact);
        let handle = fact.handle();
        let key = &self.reusable_values;

        if let Some(row) = self.main.get_mut(hash, key) {
            if row.remove_fact(&handle) {
                if row.is_empty() {
                    self.delete_tasks.insert(key.as_slice().into());
                }
                return;
            }
        }

        // Inserted and retracted within the same cycle
        for delta in [&mut self.delta_known_keys, &mut self.delta_new_keys] {
            let emptied = match delta.get_mut(hash, key) {
                Some(row) => row.remove_fact(&handle) && row.is_empty(),
                None => continue,
            };
            if emptied {
                delta.remove(hash, key);
            }
        }
    }

    /// Merge both deltas into main, clear them and drop rows emptied this cycle
    pub fn commit_changes(&mut self) {
        self.main.resize(self.delta_new_keys.len());
        for row in self.delta_new_keys.drain() {
            self.main.merge_row(row);
        }
        for row in self.delta_known_keys.drain() {
            self.main.merge_row(row);
        }

        for key in self.delete_tasks.drain() {
            let hash = key.iter().fold(0u64, |hash, value| hash ^ self.hasher.hash_one(value));
            if self.main.get(hash, &key).is_some_and(ValueRow::is_empty) {
                self.main.remove(hash, &key);
            }
        }
    }

    /// Read-only view over one partition
    pub fn key_iter(&self, mode: KeyMode) -> std::slice::Iter<'_, ValueRow> {
        self.partition(mode).iter()
    }

    /// All three views at once
    pub fn key_iterables(&self) -> [(KeyMode, std::slice::Iter<'_, ValueRow>); 3] {
        KeyMode::ALL.map(|mode| (mode, self.key_iter(mode)))
    }

    /// Look up the row for an explicit key tuple in one partition
    pub fn row(&self, mode: KeyMode, key: &[FactValue]) -> Option<&ValueRow> {
        self.partition(mode).get(self.hash_values(key), key)
    }

    fn partition(&self, mode: KeyMode) -> &FieldsFactMap {
        match mode {
            KeyMode::KnownKeysKnownFacts => &self.main,
            KeyMode::KnownKeysNewFacts => &self.delta_known_keys,
            KeyMode::NewKeysNewFacts => &self.delta_new_keys,
        }
    }

    pub fn has_deleted_keys(&self) -> bool {
        !self.delete_tasks.is_empty()
    }

    /// Whether `row` is the main row of a key whose last fact was deleted this cycle
    ///
    /// Delta rows sharing that key hold new facts and are never reported.
    pub fn is_key_deleted(&self, row: &ValueRow) -> bool {
        self.delete_tasks.contains(row.key())
            && self.main.get(row.hash, row.key()).is_some_and(|main_row| std::ptr::eq(main_row, row))
    }

    pub fn deleted_keys(&self) -> impl Iterator<Item = &[FactValue]> + '_ {
        self.delete_tasks.iter().map(|key| &**key)
    }

    pub fn clear_deleted_keys(&mut self) {
        self.delete_tasks.clear();
    }

    pub fn clear(&mut self) {
        self.main.clear();
        self.delta_known_keys.clear();
        self.delta_new_keys.clear();
        self.delete_tasks.clear();
    }

    pub fn stats(&self) -> KeyStoreStats {
        let fact_refs = KeyMode::ALL
            .iter()
            .flat_map(|mode| self.key_iter(*mode))
            .map(ValueRow::len)
            .sum();
        KeyStoreStats {
            main_rows: self.main.len(),
            known_key_rows: self.delta_known_keys.len(),
            new_key_rows: self.delta_new_keys.len(),
            deleted_keys: self.delete_tasks.len(),
            capacity: self.main.capacity()
                + self.delta_known_keys.capacity()
                + self.delta_new_keys.capacity(),
            fact_refs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FactHandle, FactObject, NamedField};
    use dauber_types::FactData;
    use std::sync::Arc;

    fn key_of(names: &[&str]) -> FieldsKey {
        let fields = names
            .iter()
            .enumerate()
            .map(|(i, name)| ActiveField::new(0, i, name, Arc::new(NamedField::new(name))))
            .collect();
        FieldsKey::new(0, fields)
    }

    fn fact(id: u64, values: Vec<FactValue>) -> RuntimeFact {
        let object = FactObject::new("T", id.to_string(), FactData::new());
        RuntimeFact::new(FactHandleVersioned::new(FactHandle(id)), object, values, Vec::new())
    }

    fn pair(id: u64, n: i64, s: &str) -> RuntimeFact {
        fact(id, vec![FactValue::Integer(n), FactValue::String(s.into())])
    }

    fn store(names: &[&str]) -> HashIndexedKeyStore {
        HashIndexedKeyStore::new(key_of(names), 4, 0.75).unwrap()
    }

    #[test]
    fn test_duplicate_tuples_share_one_new_key_row() {
        let mut store = store(&["n", "s"]);
        let facts = vec![pair(1, 1, "a"), pair(2, 1, "a"), pair(3, 2, "b")];
        store.insert(&facts, |_| true);

        let rows: Vec<&ValueRow> = store.key_iter(KeyMode::NewKeysNewFacts).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[1].len(), 1);
        assert_eq!(store.key_iter(KeyMode::KnownKeysNewFacts).count(), 0);
        assert_eq!(store.key_iter(KeyMode::KnownKeysKnownFacts).count(), 0);
    }

    #[test]
    fn test_known_key_goes_to_known_delta() {
        let mut store = store(&["n", "s"]);
        store.insert(&vec![pair(1, 1, "a")], |_| true);
        store.commit_changes();

        store.insert(&vec![pair(2, 1, "a"), pair(3, 9, "z")], |_| true);
        let known: Vec<&ValueRow> = store.key_iter(KeyMode::KnownKeysNewFacts).collect();
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].facts(), &[FactHandleVersioned::new(FactHandle(2))]);
        assert_eq!(store.key_iter(KeyMode::NewKeysNewFacts).count(), 1);

        store.commit_changes();
        let main = store.row(KeyMode::KnownKeysKnownFacts, &[1.into(), "a".into()]).unwrap();
        assert_eq!(main.len(), 2);
        assert_eq!(store.stats().main_rows, 2);
    }

    #[test]
    fn test_tuples_differing_in_one_field_are_distinct() {
        let mut store = store(&["n", "s"]);
        store.insert(&vec![pair(1, 1, "a"), pair(2, 1, "b"), pair(3, 2, "a")], |_| true);
        assert_eq!(store.key_iter(KeyMode::NewKeysNewFacts).count(), 3);
    }

    #[test]
    fn test_symmetric_tuples_collide_but_stay_distinct() {
        // XOR-combined hashes of (x, y) and (y, x) are equal
        let mut store = store(&["a", "b"]);
        let f1 = fact(1, vec![1.into(), 2.into()]);
        let f2 = fact(2, vec![2.into(), 1.into()]);
        store.insert(&vec![f1, f2], |_| true);
        let rows: Vec<&ValueRow> = store.key_iter(KeyMode::NewKeysNewFacts).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].hash(), rows[1].hash());
    }

    #[test]
    fn test_delete_marks_row_until_commit() {
        let mut store = store(&["n"]);
        let f = fact(1, vec![7.into()]);
        store.insert(std::slice::from_ref(&f), |_| true);
        store.commit_changes();

        store.delete(std::slice::from_ref(&f), |_| true);
        assert!(store.has_deleted_keys());
        let row = store.row(KeyMode::KnownKeysKnownFacts, &[7.into()]).unwrap();
        assert!(row.is_empty());
        assert!(store.is_key_deleted(row));

        store.commit_changes();
        assert!(!store.has_deleted_keys());
        assert!(store.row(KeyMode::KnownKeysKnownFacts, &[7.into()]).is_none());
        assert_eq!(store.key_iter(KeyMode::KnownKeysKnownFacts).count(), 0);
    }

    #[test]
    fn test_emptied_row_regaining_fact_survives_commit() {
        let mut store = store(&["n"]);
        let old = fact(1, vec![7.into()]);
        store.insert(std::slice::from_ref(&old), |_| true);
        store.commit_changes();

        let new = fact(2, vec![7.into()]);
        store.insert(std::slice::from_ref(&new), |_| true);
        store.delete(std::slice::from_ref(&old), |_| true);
        store.commit_changes();

        let row = store.row(KeyMode::KnownKeysKnownFacts, &[7.into()]).unwrap();
        assert_eq!(row.facts(), &[new.handle()]);
    }

    #[test]
    fn test_deletion_marker_only_flags_the_main_row() {
        let mut store = store(&["n"]);
        let old = fact(1, vec![7.into()]);
        store.insert(std::slice::from_ref(&old), |_| true);
        store.commit_changes();

        let new = fact(2, vec![7.into()]);
        store.insert(std::slice::from_ref(&new), |_| true);
        store.delete(std::slice::from_ref(&old), |_| true);

        let main = store.row(KeyMode::KnownKeysKnownFacts, &[7.into()]).unwrap();
        let known = store.row(KeyMode::KnownKeysNewFacts, &[7.into()]).unwrap();
        assert!(store.is_key_deleted(main));
        assert!(!store.is_key_deleted(known));
        assert_eq!(known.facts(), &[new.handle()]);
    }

    #[test]
    fn test_large_row_removal_keeps_remaining_handles() {
        let mut store = store(&["region"]);
        let facts: Vec<RuntimeFact> = (0..200).map(|i| fact(i, vec!["eu".into()])).collect();
        store.insert(&facts, |_| true);
        store.commit_changes();

        store.delete(&facts, |f| f.handle().handle.0 % 3 != 0);
        let row = store.row(KeyMode::KnownKeysKnownFacts, &["eu".into()]).unwrap();
        let mut remaining: Vec<u64> = row.facts().iter().map(|h| h.handle.0).collect();
        remaining.sort_unstable();
        assert_eq!(remaining, (0..200).filter(|i| i % 3 == 0).collect::<Vec<u64>>());

        store.delete(&facts, |f| f.handle().handle.0 % 3 == 0);
        assert!(store.row(KeyMode::KnownKeysKnownFacts, &["eu".into()]).unwrap().is_empty());
        store.commit_changes();
        assert_eq!(store.stats().main_rows, 0);
    }

    #[test]
    fn test_same_cycle_insert_and_delete_leaves_nothing() {
        let mut store = store(&["n"]);
        let f = fact(1, vec![3.into()]);
        store.insert(std::slice::from_ref(&f), |_| true);
        store.delete(std::slice::from_ref(&f), |_| true);
        assert_eq!(store.key_iter(KeyMode::NewKeysNewFacts).count(), 0);
        assert!(!store.has_deleted_keys());
        store.commit_changes();
        assert_eq!(store.stats().main_rows, 0);
    }

    #[test]
    fn test_second_commit_is_idempotent() {
        let mut store = store(&["n"]);
        store.insert(&vec![fact(1, vec![1.into()]), fact(2, vec![2.into()])], |_| true);
        store.commit_changes();
        let before: Vec<ValueRow> = store.key_iter(KeyMode::KnownKeysKnownFacts).cloned().collect();
        store.commit_changes();
        let after: Vec<ValueRow> = store.key_iter(KeyMode::KnownKeysKnownFacts).cloned().collect();
        assert_eq!(before, after);
        assert_eq!(store.stats().known_key_rows + store.stats().new_key_rows, 0);
    }

    #[test]
    fn test_predicate_filters_and_deleted_facts_are_skipped() {
        let mut store = store(&["n"]);
        let mut gone = fact(3, vec![3.into()]);
        gone.set_deleted(true);
        let facts = vec![fact(1, vec![1.into()]), fact(2, vec![2.into()]), gone];
        store.insert(&facts, |f| f.handle().handle.0 != 2);
        assert_eq!(store.key_iter(KeyMode::NewKeysNewFacts).count(), 1);
    }

    #[test]
    fn test_growth_and_backward_shift_removal() {
        let mut store = store(&["n"]);
        let facts: Vec<RuntimeFact> = (0..500).map(|i| fact(i, vec![(i as i64).into()])).collect();
        store.insert(&facts, |_| true);
        store.commit_changes();
        assert_eq!(store.stats().main_rows, 500);

        store.delete(&facts, |f| f.handle().handle.0 % 2 == 0);
        store.commit_changes();

        for i in 0..500i64 {
            let found = store.row(KeyMode::KnownKeysKnownFacts, &[i.into()]).is_some();
            assert_eq!(found, i % 2 == 1, "key {i}");
        }
        assert_eq!(store.stats().main_rows, 250);
    }

    #[test]
    fn test_empty_field_set_is_rejected() {
        let err = HashIndexedKeyStore::new(FieldsKey::empty(0), 4, 0.75).unwrap_err();
        assert_eq!(err.category(), "internal");
    }

    #[test]
    fn test_fields_fact_map_remove_keeps_other_rows_reachable() {
        let mut map = FieldsFactMap::with_capacity(8, 0.75);
        // Force a shared home slot
        for i in 0..5u64 {
            let key = vec![FactValue::Integer(i as i64)];
            map.add(16 * i, &key, FactHandleVersioned::new(FactHandle(i)));
        }
        let removed = map.remove(16, &[FactValue::Integer(1)]).unwrap();
        assert_eq!(removed.facts()[0].handle.0, 1);
        for i in [0u64, 2, 3, 4] {
            assert!(map.contains(16 * i, &[FactValue::Integer(i as i64)]), "row {i}");
        }
        assert_eq!(map.len(), 4);
    }
}
