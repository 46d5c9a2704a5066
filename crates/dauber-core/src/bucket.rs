//! Fact buckets scoped to one alpha predicate combination
//!
//! A keyed bucket wraps a [`HashIndexedKeyStore`] for one
//! `(type, FieldsKey, alpha bucket)` triple. A plain bucket serves types
//! with no join key and simply lists the admitted handles.

use crate::alpha::AlphaBucketMeta;
use crate::error::DauberResult;
use crate::fact::RuntimeFact;
use crate::key_store::{HashIndexedKeyStore, KeyStoreStats};
use crate::types::{FactHandleVersioned, FieldsKey};
use ahash::{AHashMap, AHashSet};

/// Admission test selected once per bucket
#[derive(Debug, Clone)]
pub enum AlphaFilter {
    /// No alpha conditions: every fact is admitted
    Pass,
    Mask(AlphaBucketMeta),
}

impl AlphaFilter {
    pub fn for_meta(meta: &AlphaBucketMeta) -> Self {
        if meta.is_empty() { AlphaFilter::Pass } else { AlphaFilter::Mask(meta.clone()) }
    }

    #[inline]
    pub fn admits(&self, fact: &RuntimeFact) -> bool {
        match self {
            AlphaFilter::Pass => true,
            AlphaFilter::Mask(meta) => meta.test(fact),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyedFactBucket {
    meta: AlphaBucketMeta,
    filter: AlphaFilter,
    store: HashIndexedKeyStore,
}

impl KeyedFactBucket {
    pub fn new(
        fields: FieldsKey,
        meta: AlphaBucketMeta,
        initial_capacity: usize,
        max_load_factor: f64,
    ) -> DauberResult<Self> {
        Ok(Self {
            filter: AlphaFilter::for_meta(&meta),
            meta,
            store: HashIndexedKeyStore::new(fields, initial_capacity, max_load_factor)?,
        })
    }

    pub fn meta(&self) -> &AlphaBucketMeta {
        &self.meta
    }

    pub fn store(&self) -> &HashIndexedKeyStore {
        &self.store
    }

    pub fn insert<'a, I>(&mut self, facts: I)
    where
        I: IntoIterator<Item = &'a RuntimeFact>,
        I::IntoIter: ExactSizeIterator,
    {
        let filter = &self.filter;
        self.store.insert(facts, |fact| filter.admits(fact));
    }

    pub fn delete<'a, I>(&mut self, facts: I)
    where
        I: IntoIterator<Item = &'a RuntimeFact>,
    {
        let filter = &self.filter;
        self.store.delete(facts, |fact| filter.admits(fact));
    }

    /// Key committed facts straight into main
    pub fn fill_main<'a, I>(&mut self, facts: I) -> usize
    where
        I: IntoIterator<Item = &'a RuntimeFact>,
    {
        let mut filled = 0;
        for fact in facts {
            if !fact.is_deleted() && self.filter.admits(fact) {
                self.store.insert_direct(fact);
                filled += 1;
            }
        }
        filled
    }

    pub fn commit_changes(&mut self) {
        self.store.commit_changes();
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }

    pub fn stats(&self) -> KeyStoreStats {
        self.store.stats()
    }
}

/// Alpha-only bucket of a type without join fields
#[derive(Debug, Clone)]
pub struct PlainFactBucket {
    meta: AlphaBucketMeta,
    filter: AlphaFilter,
    main: Vec<FactHandleVersioned>,
    delta: Vec<FactHandleVersioned>,
    delta_positions: AHashMap<FactHandleVersioned, usize>,
    delete_tasks: AHashSet<FactHandleVersioned>,
}

impl PlainFactBucket {
    pub fn new(meta: AlphaBucketMeta) -> Self {
        Self {
            filter: AlphaFilter::for_meta(&meta),
            meta,
            main: Vec::new(),
            delta: Vec::new(),
            delta_positions: AHashMap::new(),
            delete_tasks: AHashSet::new(),
        }
    }

    pub fn meta(&self) -> &AlphaBucketMeta {
        &self.meta
    }

    /// Committed handles, including ones deleted this cycle
    pub fn main(&self) -> &[FactHandleVersioned] {
        &self.main
    }

    /// Handles admitted since the last commit
    pub fn delta(&self) -> &[FactHandleVersioned] {
        &self.delta
    }

    pub fn is_deleted(&self, handle: &FactHandleVersioned) -> bool {
        self.delete_tasks.contains(handle)
    }

    pub fn insert<'a, I>(&mut self, facts: I)
    where
        I: IntoIterator<Item = &'a RuntimeFact>,
    {
        for fact in facts {
            if !fact.is_deleted() && self.filter.admits(fact) {
                self.delta_positions.insert(fact.handle(), self.delta.len());
                self.delta.push(fact.handle());
            }
        }
    }

    pub fn delete<'a, I>(&mut self, facts: I)
    where
        I: IntoIterator<Item = &'a RuntimeFact>,
    {
        for fact in facts {
            if !self.filter.admits(fact) {
                continue;
            }
            let handle = fact.handle();
            if let Some(pos) = self.delta_positions.remove(&handle) {
                self.delta.swap_remove(pos);
                if let Some(moved) = self.delta.get(pos) {
                    self.delta_positions.insert(*moved, pos);
                }
            } else {
                self.delete_tasks.insert(handle);
            }
        }
    }

    pub fn fill_main<'a, I>(&mut self, facts: I) -> usize
    where
        I: IntoIterator<Item = &'a RuntimeFact>,
    {
        let before = self.main.len();
        self.main.extend(
            facts
                .into_iter()
                .filter(|fact| !fact.is_deleted() && self.filter.admits(fact))
                .map(RuntimeFact::handle),
        );
        self.main.len() - before
    }

    pub fn commit_changes(&mut self) {
        self.main.append(&mut self.delta);
        self.delta_positions.clear();
        if !self.delete_tasks.is_empty() {
            let deleted = &self.delete_tasks;
            self.main.retain(|handle| !deleted.contains(handle));
            self.delete_tasks.clear();
        }
    }

    pub fn clear(&mut self) {
        self.main.clear();
        self.delta.clear();
        self.delta_positions.clear();
        self.delete_tasks.clear();
    }

    pub fn len(&self) -> usize {
        self.main.len() + self.delta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
