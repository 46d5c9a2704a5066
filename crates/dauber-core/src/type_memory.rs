//! Per-type fact memory
//!
//! ## Cycle
//!
//! ```text
//! insert/retract/update ──► action buffers
//! propagate_beta_deltas  ──► INSERT buffer → delta storage + every bucket delta
//! perform_delete         ──► RETRACT buffer → deletion flags + bucket deletes
//! commit_changes         ──► delta → main, deleted facts purged, buckets committed
//! ```
//!
//! Facts live in exactly one of the insert buffer, the delta storage or the
//! main storage. Buckets only hold their handles.

use crate::alpha::{AlphaBucketMeta, AlphaDelta, AlphaEvaluator};
use crate::bucket::PlainFactBucket;
use crate::config::MemoryConfig;
use crate::error::{DauberError, DauberResult};
use crate::fact::{FactStorage, RuntimeFact};
use crate::fields_memory::FieldsMemory;
use crate::key_store::KeyStoreStats;
use crate::stats::TypeMemoryStats;
use crate::types::{Action, ActiveField, FactHandleVersioned, FactObject, FactTypeId, FieldsKey};
use ahash::AHashSet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct TypeMemory {
    type_id: FactTypeId,
    name: String,
    initial_key_capacity: usize,
    max_load_factor: f64,
    warn_on_unknown_object: bool,

    main: FactStorage,
    delta: FactStorage,
    insert_buffer: FactStorage,
    retract_buffer: Vec<FactHandleVersioned>,
    update_buffer: Vec<(FactHandleVersioned, FactHandleVersioned)>,
    pending_retracts: AHashSet<FactHandleVersioned>,

    beta_memories: Vec<FieldsMemory>,
    beta_index: HashMap<FieldsKey, usize>,
    alpha_buckets: Vec<PlainFactBucket>,

    cached_active_fields: Vec<ActiveField>,
    cached_alpha_evaluators: Vec<AlphaEvaluator>,
}

impl TypeMemory {
    pub fn new(type_id: FactTypeId, name: &str, config: &MemoryConfig) -> Self {
        Self {
            type_id,
            name: name.to_string(),
            initial_key_capacity: config.initial_key_capacity,
            max_load_factor: config.max_load_factor,
            warn_on_unknown_object: config.warn_on_unknown_object,
            main: FactStorage::new(),
            delta: FactStorage::new(),
            insert_buffer: FactStorage::new(),
            retract_buffer: Vec::new(),
            update_buffer: Vec::new(),
            pending_retracts: AHashSet::new(),
            beta_memories: Vec::new(),
            beta_index: HashMap::new(),
            alpha_buckets: vec![PlainFactBucket::new(AlphaBucketMeta::no_conditions())],
            cached_active_fields: Vec::new(),
            cached_alpha_evaluators: Vec::new(),
        }
    }

    pub fn type_id(&self) -> FactTypeId {
        self.type_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn active_fields(&self) -> &[ActiveField] {
        &self.cached_active_fields
    }

    pub fn alpha_evaluators(&self) -> &[AlphaEvaluator] {
        &self.cached_alpha_evaluators
    }

    /// Field sets with a keyed memory, in creation order
    pub fn known_field_sets(&self) -> impl Iterator<Item = &FieldsKey> + '_ {
        self.beta_memories.iter().map(FieldsMemory::fields)
    }

    /// Fails when facts are buffered or propagated but not yet committed
    pub fn ensure_committed(&self) -> DauberResult<()> {
        let pending = self.insert_buffer.len() + self.delta.len();
        if pending > 0 {
            return Err(DauberError::SchemaChangeMidCycle { fact_type: self.name.clone(), pending });
        }
        Ok(())
    }

    /// Retrofit a newly activated field into every committed fact
    pub fn on_new_active_field(&mut self, field: &ActiveField) -> DauberResult<()> {
        self.ensure_committed()?;
        for fact in self.main.iter_mut() {
            fact.append_value(field);
        }
        self.cached_active_fields.push(field.clone());
        debug!(
            fact_type = %self.name,
            field = field.name(),
            value_index = field.value_index(),
            retrofitted = self.main.len(),
            "Activated field"
        );
        Ok(())
    }

    /// Apply a registration delta: evaluate new predicates, then create and back-fill the bucket
    pub fn on_new_alpha_bucket(&mut self, delta: &AlphaDelta) -> DauberResult<()> {
        self.ensure_committed()?;

        if !delta.new_evaluators.is_empty() {
            for fact in self.main.iter_mut() {
                fact.append_alpha_tests(&delta.new_evaluators);
            }
            self.cached_alpha_evaluators.extend(delta.new_evaluators.iter().cloned());
        }

        let meta = &delta.new_alpha_meta;
        if delta.key.is_empty() {
            let index = meta.bucket_index();
            if index < self.alpha_buckets.len() {
                return Ok(());
            }
            if index != self.alpha_buckets.len() {
                return Err(DauberError::UnknownAlphaBucket {
                    scope: format!("plain buckets of '{}'", self.name),
                    bucket_index: index,
                });
            }
            let mut bucket = PlainFactBucket::new(meta.clone());
            let filled = bucket.fill_main(self.main.iter());
            debug!(fact_type = %self.name, bucket_index = index, filled, "Created plain alpha bucket");
            self.alpha_buckets.push(bucket);
            return Ok(());
        }

        let index = self.beta_position(&delta.key)?;
        self.beta_memories[index].on_new_alpha_bucket(meta, self.main.iter())
    }

    /// Make sure a keyed memory exists for `key`
    pub fn touch_memory(&mut self, key: &FieldsKey) -> DauberResult<&FieldsMemory> {
        if key.is_empty() || key.type_id() != self.type_id {
            return Err(DauberError::internal(
                "type_memory",
                format!("field set {key} cannot key facts of '{}'", self.name),
            ));
        }
        let index = match self.beta_index.get(key) {
            Some(&index) => index,
            None => {
                let memory =
                    FieldsMemory::new(key.clone(), self.initial_key_capacity, self.max_load_factor);
                self.beta_memories.push(memory);
                self.beta_index.insert(key.clone(), self.beta_memories.len() - 1);
                debug!(fact_type = %self.name, fields = %key, "Created fields memory");
                self.beta_memories.len() - 1
            }
        };
        Ok(&self.beta_memories[index])
    }

    fn beta_position(&self, key: &FieldsKey) -> DauberResult<usize> {
        self.beta_index.get(key).copied().ok_or_else(|| DauberError::MissingFieldsMemory {
            fact_type: self.name.clone(),
            fields: key.to_string(),
        })
    }

    pub fn fields_memory(&self, key: &FieldsKey) -> DauberResult<&FieldsMemory> {
        Ok(&self.beta_memories[self.beta_position(key)?])
    }

    pub fn alpha_bucket(&self, meta: &AlphaBucketMeta) -> DauberResult<&PlainFactBucket> {
        self.alpha_buckets.get(meta.bucket_index()).ok_or_else(|| DauberError::UnknownAlphaBucket {
            scope: format!("plain buckets of '{}'", self.name),
            bucket_index: meta.bucket_index(),
        })
    }

    /// Latest version of an object that is neither deleted nor awaiting retraction
    pub fn find_live(&self, external_id: &str) -> Option<&RuntimeFact> {
        let latest = self
            .insert_buffer
            .find(external_id)
            .or_else(|| self.delta.find(external_id))
            .or_else(|| self.main.find(external_id))?;
        (!latest.is_deleted() && !self.pending_retracts.contains(&latest.handle())).then_some(latest)
    }

    /// Resolve a handle wherever the fact currently lives
    pub fn fact(&self, handle: &FactHandleVersioned) -> Option<&RuntimeFact> {
        self.main
            .get(handle)
            .or_else(|| self.delta.get(handle))
            .or_else(|| self.insert_buffer.get(handle))
    }

    pub fn insert(
        &mut self,
        handle: FactHandleVersioned,
        object: Arc<FactObject>,
    ) -> Option<FactHandleVersioned> {
        if let Some(existing) = self.find_live(&object.external_id) {
            warn!(
                fact_type = %self.name,
                external_id = %object.external_id,
                existing = %existing.handle(),
                "Ignoring insert of an object that is already in memory"
            );
            return None;
        }
        self.buffer_insert(handle, object);
        Some(handle)
    }

    fn buffer_insert(&mut self, handle: FactHandleVersioned, object: Arc<FactObject>) {
        let fact = RuntimeFact::create(
            handle,
            object,
            &self.cached_active_fields,
            &self.cached_alpha_evaluators,
        );
        self.insert_buffer.insert(fact);
    }

    pub fn retract(&mut self, object: &FactObject) -> Option<FactHandleVersioned> {
        let Some(handle) = self.find_live(&object.external_id).map(RuntimeFact::handle) else {
            self.report_unknown_object(Action::Retract, object);
            return None;
        };
        self.buffer_retract(handle);
        Some(handle)
    }

    fn buffer_retract(&mut self, handle: FactHandleVersioned) {
        if self.pending_retracts.insert(handle) {
            self.retract_buffer.push(handle);
        }
    }

    /// Retract the live version and insert the object as the next version
    pub fn update(&mut self, object: Arc<FactObject>) -> Option<FactHandleVersioned> {
        let Some(previous) = self.find_live(&object.external_id).map(RuntimeFact::handle) else {
            self.report_unknown_object(Action::Update, &object);
            return None;
        };
        let next = previous.next_version();
        self.buffer_retract(previous);
        self.buffer_insert(next, object);
        self.update_buffer.push((previous, next));
        Some(next)
    }

    fn report_unknown_object(&self, action: Action, object: &FactObject) {
        if self.warn_on_unknown_object {
            warn!(
                fact_type = %self.name,
                external_id = %object.external_id,
                action = ?action,
                "Object not found in memory"
            );
        } else {
            debug!(
                fact_type = %self.name,
                external_id = %object.external_id,
                action = ?action,
                "Object not found in memory"
            );
        }
    }

    pub fn has_memory_changes(&self, action: Action) -> bool {
        match action {
            Action::Insert => !self.insert_buffer.is_empty(),
            Action::Retract => !self.retract_buffer.is_empty(),
            Action::Update => !self.update_buffer.is_empty(),
        }
    }

    /// Any buffered action or uncommitted delta
    pub fn has_pending_changes(&self) -> bool {
        Action::ALL.iter().any(|action| self.has_memory_changes(*action)) || !self.delta.is_empty()
    }

    pub fn buffer_len(&self, action: Action) -> usize {
        match action {
            Action::Insert => self.insert_buffer.len(),
            Action::Retract => self.retract_buffer.len(),
            Action::Update => self.update_buffer.len(),
        }
    }

    /// Push buffered inserts into every bucket; returns how many facts moved
    pub fn propagate_beta_deltas(&mut self) -> usize {
        if self.insert_buffer.is_empty() {
            return 0;
        }
        let handles = self.insert_buffer.handles().to_vec();
        self.insert_buffer.drain_into(&mut self.delta);

        let facts: Vec<&RuntimeFact> = handles.iter().filter_map(|h| self.delta.get(h)).collect();
        for memory in &mut self.beta_memories {
            memory.insert(&facts);
        }
        for bucket in &mut self.alpha_buckets {
            bucket.insert(facts.iter().copied());
        }
        debug!(fact_type = %self.name, propagated = facts.len(), "Propagated inserts");
        facts.len()
    }

    /// Flag buffered retracts deleted and detach them from every bucket
    pub fn perform_delete(&mut self) -> usize {
        if self.retract_buffer.is_empty() {
            return 0;
        }
        for handle in &self.retract_buffer {
            let fact = match self.insert_buffer.get_mut(handle) {
                Some(fact) => Some(fact),
                None => match self.delta.get_mut(handle) {
                    Some(fact) => Some(fact),
                    None => self.main.get_mut(handle),
                },
            };
            if let Some(fact) = fact {
                fact.set_deleted(true);
            }
        }

        // Unpropagated facts were never keyed
        let facts: Vec<&RuntimeFact> = self
            .retract_buffer
            .iter()
            .filter_map(|h| self.delta.get(h).or_else(|| self.main.get(h)))
            .collect();
        for memory in &mut self.beta_memories {
            memory.delete(&facts);
        }
        for bucket in &mut self.alpha_buckets {
            bucket.delete(facts.iter().copied());
        }

        let deleted = self.retract_buffer.len();
        debug!(fact_type = %self.name, deleted, "Applied deletes");
        self.retract_buffer.clear();
        self.update_buffer.clear();
        self.pending_retracts.clear();
        deleted
    }

    /// Move the cycle's facts into main and commit every bucket
    pub fn commit_changes(&mut self) {
        if !self.insert_buffer.is_empty() {
            self.propagate_beta_deltas();
        }
        if !self.retract_buffer.is_empty() {
            self.perform_delete();
        }

        let added = self.delta.len();
        self.delta.drain_into(&mut self.main);
        let purged = self.main.purge_deleted();
        for memory in &mut self.beta_memories {
            memory.commit_changes();
        }
        for bucket in &mut self.alpha_buckets {
            bucket.commit_changes();
        }
        if added > 0 || purged > 0 {
            debug!(
                fact_type = %self.name,
                added,
                purged,
                committed = self.main.len(),
                "Committed type memory"
            );
        }
    }

    /// Committed facts that are not flagged deleted
    pub fn committed_facts(&self) -> impl Iterator<Item = &RuntimeFact> + '_ {
        self.main.iter().filter(|fact| !fact.is_deleted())
    }

    pub fn for_each_memory_object<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<FactObject>),
    {
        for fact in self.committed_facts() {
            f(fact.object());
        }
    }

    /// Drop every fact and buffered action, keeping fields and buckets
    pub fn clear(&mut self) {
        self.main.clear();
        self.delta.clear();
        self.insert_buffer.clear();
        self.retract_buffer.clear();
        self.update_buffer.clear();
        self.pending_retracts.clear();
        for memory in &mut self.beta_memories {
            memory.clear();
        }
        for bucket in &mut self.alpha_buckets {
            bucket.clear();
        }
    }

    pub fn stats(&self) -> TypeMemoryStats {
        let mut keys = KeyStoreStats::default();
        for memory in &self.beta_memories {
            keys.accumulate(&memory.stats());
        }
        TypeMemoryStats {
            type_name: self.name.clone(),
            committed_facts: self.main.len(),
            delta_facts: self.delta.len(),
            pending_inserts: self.insert_buffer.len(),
            pending_retracts: self.retract_buffer.len(),
            pending_updates: self.update_buffer.len(),
            field_sets: self.beta_memories.len(),
            keyed_buckets: self.beta_memories.iter().map(|m| m.buckets().len()).sum(),
            plain_buckets: self.alpha_buckets.len(),
            keys,
        }
    }

    /// Log the current stats at debug level
    pub fn report_status(&self) -> TypeMemoryStats {
        let stats = self.stats();
        debug!(status = %stats, "Type memory status");
        stats
    }
}
