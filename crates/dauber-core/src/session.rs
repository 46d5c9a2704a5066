//! Session-scoped fact memory
//!
//! A [`SessionMemory`] owns every type memory, the field and alpha
//! registries, and the fact-id generator of one rule session. Nothing is
//! shared between sessions, so independent sessions can run on different
//! threads without coordination.
//!
//! ```text
//! SessionMemory
//!   ├── ActiveFields / AlphaConditions   (schema registries)
//!   └── TypeMemory per declared type
//!         ├── FieldsMemory per FieldsKey → KeyedFactBucket per alpha bucket
//!         └── PlainFactBucket per alpha bucket of the empty key
//! ```

use crate::active_fields::ActiveFields;
use crate::alpha::{AlphaBucketMeta, AlphaCondition, AlphaConditions, AlphaPredicate};
use crate::config::MemoryConfig;
use crate::descriptor::{FactTypeDescriptor, LhsBuilder, LhsDescriptor};
use crate::error::{DauberError, DauberResult};
use crate::stats::SessionStats;
use crate::type_memory::TypeMemory;
use crate::types::{
    Action, ActiveField, FactHandle, FactHandleVersioned, FactObject, FactTypeId, FieldAccessor,
    FieldsKey, NamedField,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Position of a session inside its firing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    /// Everything committed
    #[default]
    Idle,
    /// Actions buffered since the last commit
    Buffering,
    /// Buffered inserts visible to join evaluation
    Propagated,
    /// Deletes applied, awaiting commit
    Deleted,
}

#[derive(Debug)]
pub struct SessionMemory {
    id: Uuid,
    config: MemoryConfig,
    types: Vec<TypeMemory>,
    type_ids: HashMap<String, FactTypeId>,
    active_fields: ActiveFields,
    alpha_conditions: AlphaConditions,
    next_fact_id: u64,
    phase: CyclePhase,
}

impl SessionMemory {
    pub fn new(config: MemoryConfig) -> DauberResult<Self> {
        config.validate()?;
        let id = Uuid::new_v4();
        info!(session_id = %id, "Created session memory");
        Ok(Self {
            id,
            config,
            types: Vec::new(),
            type_ids: HashMap::new(),
            active_fields: ActiveFields::new(),
            alpha_conditions: AlphaConditions::new(),
            next_fact_id: 0,
            phase: CyclePhase::Idle,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Id of a type, declaring it on first use
    pub fn declare_type(&mut self, name: &str) -> FactTypeId {
        if let Some(&type_id) = self.type_ids.get(name) {
            return type_id;
        }
        let type_id = self.types.len();
        self.types.push(TypeMemory::new(type_id, name, &self.config));
        self.type_ids.insert(name.to_string(), type_id);
        debug!(session_id = %self.id, fact_type = name, type_id, "Declared fact type");
        type_id
    }

    pub fn type_id(&self, name: &str) -> Option<FactTypeId> {
        self.type_ids.get(name).copied()
    }

    pub fn type_memory(&self, type_id: FactTypeId) -> DauberResult<&TypeMemory> {
        self.types
            .get(type_id)
            .ok_or_else(|| DauberError::UnknownFactType { fact_type: format!("#{type_id}") })
    }

    fn type_memory_mut(&mut self, type_id: FactTypeId) -> DauberResult<&mut TypeMemory> {
        self.types
            .get_mut(type_id)
            .ok_or_else(|| DauberError::UnknownFactType { fact_type: format!("#{type_id}") })
    }

    pub fn type_memory_by_name(&self, name: &str) -> DauberResult<&TypeMemory> {
        let type_id = self
            .type_id(name)
            .ok_or_else(|| DauberError::UnknownFactType { fact_type: name.to_string() })?;
        self.type_memory(type_id)
    }

    pub fn type_memories(&self) -> &[TypeMemory] {
        &self.types
    }

    /// Activate a field, retrofitting committed facts when it is new
    pub fn register_field(
        &mut self,
        type_id: FactTypeId,
        name: &str,
        accessor: Arc<dyn FieldAccessor>,
    ) -> DauberResult<ActiveField> {
        if let Some(existing) = self.active_fields.get(type_id, name) {
            return Ok(existing.clone());
        }
        self.type_memory(type_id)?.ensure_committed()?;
        let (field, _) = self.active_fields.register(type_id, name, accessor);
        self.type_memory_mut(type_id)?.on_new_active_field(&field)?;
        Ok(field)
    }

    /// Register an alpha predicate combination for `key`, creating and back-filling its bucket
    pub fn register_alpha_bucket(
        &mut self,
        key: &FieldsKey,
        conditions: &[AlphaCondition],
    ) -> DauberResult<AlphaBucketMeta> {
        let type_id = key.type_id();
        let mut resolved: Vec<(ActiveField, Arc<dyn AlphaPredicate>, bool)> =
            Vec::with_capacity(conditions.len());
        for condition in conditions {
            let field = self.register_field(
                type_id,
                &condition.field,
                Arc::new(NamedField::new(&condition.field)),
            )?;
            resolved.push((field, Arc::clone(&condition.predicate), condition.expected));
        }

        if !key.is_empty() {
            self.type_memory(type_id)?.fields_memory(key)?;
        }
        if !self.alpha_conditions.is_registered(key, &resolved) {
            self.type_memory(type_id)?.ensure_committed()?;
        }

        let (meta, delta) = self.alpha_conditions.register(key, &resolved);
        if let Some(delta) = delta {
            self.type_memory_mut(type_id)?.on_new_alpha_bucket(&delta)?;
        }
        Ok(meta)
    }

    /// Create the keyed memory for `key` if it does not exist yet
    pub fn touch_memory(&mut self, key: &FieldsKey) -> DauberResult<()> {
        self.type_memory_mut(key.type_id())?.touch_memory(key)?;
        Ok(())
    }

    fn next_handle(&mut self) -> FactHandleVersioned {
        self.next_fact_id += 1;
        FactHandleVersioned::new(FactHandle(self.next_fact_id))
    }

    fn mark_buffering(&mut self) {
        if self.phase == CyclePhase::Idle {
            self.phase = CyclePhase::Buffering;
        }
    }

    pub fn insert(&mut self, object: Arc<FactObject>) -> Option<FactHandleVersioned> {
        let type_id = self.declare_type(&object.fact_type);
        let handle = self.next_handle();
        let inserted = self.types[type_id].insert(handle, object);
        if inserted.is_some() {
            self.mark_buffering();
        }
        inserted
    }

    pub fn retract(&mut self, object: &FactObject) -> Option<FactHandleVersioned> {
        let Some(type_id) = self.type_id(&object.fact_type) else {
            self.warn_unknown_type(Action::Retract, object);
            return None;
        };
        let retracted = self.types[type_id].retract(object);
        if retracted.is_some() {
            self.mark_buffering();
        }
        retracted
    }

    pub fn update(&mut self, object: Arc<FactObject>) -> Option<FactHandleVersioned> {
        let Some(type_id) = self.type_id(&object.fact_type) else {
            self.warn_unknown_type(Action::Update, &object);
            return None;
        };
        let updated = self.types[type_id].update(object);
        if updated.is_some() {
            self.mark_buffering();
        }
        updated
    }

    fn warn_unknown_type(&self, action: Action, object: &FactObject) {
        if self.config.warn_on_unknown_object {
            warn!(
                fact_type = %object.fact_type,
                external_id = %object.external_id,
                action = ?action,
                "Object of an undeclared type not found in memory"
            );
        } else {
            debug!(
                fact_type = %object.fact_type,
                external_id = %object.external_id,
                action = ?action,
                "Object of an undeclared type not found in memory"
            );
        }
    }

    pub fn has_memory_changes(&self, action: Action) -> bool {
        self.types.iter().any(|memory| memory.has_memory_changes(action))
    }

    /// Make buffered inserts visible to join evaluation
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn propagate_deltas(&mut self) -> usize {
        let propagated = self.types.iter_mut().map(TypeMemory::propagate_beta_deltas).sum();
        if self.phase != CyclePhase::Idle || propagated > 0 {
            self.phase = CyclePhase::Propagated;
        }
        propagated
    }

    /// Apply buffered retracts
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn perform_deletes(&mut self) -> usize {
        let deleted = self.types.iter_mut().map(TypeMemory::perform_delete).sum();
        if self.phase != CyclePhase::Idle || deleted > 0 {
            self.phase = CyclePhase::Deleted;
        }
        deleted
    }

    /// End the firing cycle
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn commit_changes(&mut self) {
        for memory in &mut self.types {
            memory.commit_changes();
        }
        self.phase = CyclePhase::Idle;
        debug!(facts_created = self.next_fact_id, "Committed session memory");
    }

    /// Drop every fact; declared types, fields and buckets remain
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn clear(&mut self) {
        for memory in &mut self.types {
            memory.clear();
        }
        self.phase = CyclePhase::Idle;
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.to_string(),
            facts_created: self.next_fact_id,
            types: self.types.iter().map(TypeMemory::stats).collect(),
        }
    }

    /// Register the schema a rule branch needs and plan its joins
    #[instrument(skip(self, builder), fields(session_id = %self.id, level = builder.level()))]
    pub fn compile_lhs(&mut self, builder: LhsBuilder) -> DauberResult<LhsDescriptor> {
        let resolved = builder.resolve()?;

        let mut fact_types = Vec::with_capacity(builder.fact_types().len());
        for (var, declaration) in builder.fact_types().iter().enumerate() {
            let type_id = self.declare_type(&declaration.type_name);
            let mut fields = Vec::with_capacity(resolved.key_fields[var].len());
            for name in &resolved.key_fields[var] {
                fields.push(self.register_field(type_id, name, Arc::new(NamedField::new(name)))?);
            }
            let key = FieldsKey::new(type_id, fields);
            if !key.is_empty() {
                self.touch_memory(&key)?;
            }
            let alpha = self.register_alpha_bucket(&key, &declaration.alpha)?;
            fact_types.push(FactTypeDescriptor {
                var: declaration.var.clone(),
                type_id,
                type_name: declaration.type_name.clone(),
                key,
                alpha,
            });
        }

        let descriptor = LhsDescriptor::assemble(
            builder.level(),
            fact_types,
            builder.conditions().to_vec(),
            resolved.condition_vars,
        )?;
        info!(
            vars = descriptor.fact_types.len(),
            units = descriptor.units.len(),
            groups = descriptor.groups.len(),
            "Compiled rule LHS"
        );
        Ok(descriptor)
    }
}
