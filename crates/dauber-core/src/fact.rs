//! Runtime facts and the per-type fact arena
//!
//! A `RuntimeFact` wraps one inserted object together with the values of every
//! active field and the results of every alpha test registered for its type.
//! Both arrays are extended in place when rules declare new fields or
//! predicates after the fact was created. Buckets never hold facts, only
//! their versioned handles; the owning `TypeMemory` resolves handles through
//! a `FactStorage`.

use crate::alpha::AlphaEvaluator;
use crate::types::{ActiveField, FactHandleVersioned, FactObject};
use dauber_types::FactValue;
use std::collections::HashMap;
use std::sync::Arc;

static NULL_VALUE: FactValue = FactValue::Null;

/// One inserted object with its extracted field values and alpha test results
#[derive(Debug, Clone)]
pub struct RuntimeFact {
    handle: FactHandleVersioned,
    object: Arc<FactObject>,
    values: Vec<FactValue>,
    alpha_tests: Vec<bool>,
    deleted: bool,
}

impl RuntimeFact {
    pub(crate) fn new(
        handle: FactHandleVersioned,
        object: Arc<FactObject>,
        values: Vec<FactValue>,
        alpha_tests: Vec<bool>,
    ) -> Self {
        Self { handle, object, values, alpha_tests, deleted: false }
    }

    /// Read active fields and evaluate alpha predicates against a fresh object
    pub(crate) fn create(
        handle: FactHandleVersioned,
        object: Arc<FactObject>,
        active_fields: &[ActiveField],
        alpha_evaluators: &[AlphaEvaluator],
    ) -> Self {
        let values: Vec<FactValue> =
            active_fields.iter().map(|field| field.read_value(&object)).collect();

        let mut alpha_tests = vec![false; alpha_evaluators.len()];
        for alpha in alpha_evaluators {
            if alpha.unique_id() >= alpha_tests.len() {
                alpha_tests.resize(alpha.unique_id() + 1, false);
            }
            alpha_tests[alpha.unique_id()] = alpha.test(&values);
        }

        Self::new(handle, object, values, alpha_tests)
    }

    pub fn handle(&self) -> FactHandleVersioned {
        self.handle
    }

    pub fn object(&self) -> &Arc<FactObject> {
        &self.object
    }

    pub fn values(&self) -> &[FactValue] {
        &self.values
    }

    /// Value at an active field slot; slots not yet extracted read as `Null`
    pub fn value(&self, value_index: usize) -> &FactValue {
        self.values.get(value_index).unwrap_or(&NULL_VALUE)
    }

    pub fn alpha_test(&self, alpha_id: usize) -> bool {
        self.alpha_tests.get(alpha_id).copied().unwrap_or(false)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub(crate) fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }

    /// Extract the value of a newly activated field
    pub(crate) fn append_value(&mut self, field: &ActiveField) {
        let value = field.read_value(&self.object);
        let index = field.value_index();
        if index >= self.values.len() {
            self.values.resize(index + 1, FactValue::Null);
        }
        self.values[index] = value;
    }

    /// Evaluate newly registered alpha predicates
    pub(crate) fn append_alpha_tests(&mut self, evaluators: &[AlphaEvaluator]) {
        for alpha in evaluators {
            let id = alpha.unique_id();
            if id >= self.alpha_tests.len() {
                self.alpha_tests.resize(id + 1, false);
            }
            self.alpha_tests[id] = alpha.test(&self.values);
        }
    }
}

/// Arena of facts keyed by versioned handle, with an external-id index
///
/// Iteration follows insertion order.
#[derive(Debug, Default)]
pub struct FactStorage {
    facts: HashMap<FactHandleVersioned, RuntimeFact>,
    order: Vec<FactHandleVersioned>,
    external_id_map: HashMap<String, FactHandleVersioned>,
}

impl FactStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn insert(&mut self, fact: RuntimeFact) {
        let handle = fact.handle();
        self.external_id_map.insert(fact.object().external_id.clone(), handle);
        if self.facts.insert(handle, fact).is_none() {
            self.order.push(handle);
        }
    }

    pub fn get(&self, handle: &FactHandleVersioned) -> Option<&RuntimeFact> {
        self.facts.get(handle)
    }

    pub fn get_mut(&mut self, handle: &FactHandleVersioned) -> Option<&mut RuntimeFact> {
        self.facts.get_mut(handle)
    }

    /// Latest fact stored for an external id, deleted or not
    pub fn find(&self, external_id: &str) -> Option<&RuntimeFact> {
        self.external_id_map.get(external_id).and_then(|handle| self.facts.get(handle))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuntimeFact> + '_ {
        self.order.iter().filter_map(|handle| self.facts.get(handle))
    }

    pub fn handles(&self) -> &[FactHandleVersioned] {
        &self.order
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut RuntimeFact> + '_ {
        self.facts.values_mut()
    }

    /// Move every fact into `target`, leaving this storage empty
    pub(crate) fn drain_into(&mut self, target: &mut FactStorage) {
        for handle in self.order.drain(..) {
            if let Some(fact) = self.facts.remove(&handle) {
                target.insert(fact);
            }
        }
        self.facts.clear();
        self.external_id_map.clear();
    }

    /// Drop every fact flagged deleted; returns how many were removed
    pub(crate) fn purge_deleted(&mut self) -> usize {
        let before = self.facts.len();
        self.facts.retain(|_, fact| !fact.is_deleted());
        let facts = &self.facts;
        self.order.retain(|handle| facts.contains_key(handle));
        self.external_id_map.retain(|_, handle| facts.contains_key(handle));
        before - self.facts.len()
    }

    pub fn clear(&mut self) {
        self.facts.clear();
        self.order.clear();
        self.external_id_map.clear();
    }
}
