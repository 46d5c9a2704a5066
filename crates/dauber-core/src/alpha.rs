//! Alpha (single-fact) predicates, evaluators and bucket metadata
//!
//! ## Registration model
//!
//! ```text
//! rule declares (field, predicate)  →  AlphaEvaluator (dense id per type)
//! rule declares a predicate set     →  AlphaBucketMeta (dense index per FieldsKey)
//! ```
//!
//! Every fact carries one boolean per evaluator of its type, indexed by the
//! evaluator's unique id. A bucket admits a fact when every `(id, expected)`
//! pair of its mask matches. Bucket index 0 of the empty `FieldsKey` is the
//! "no conditions" bucket holding every fact of the type.

use crate::fact::RuntimeFact;
use crate::types::{ActiveField, FactTypeId, FieldsKey};
use dauber_types::FactValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Comparison operators for value tests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    StartsWith,
    EndsWith,
}

impl Operator {
    /// Apply the operator with `left` as the fact value and `right` as the operand
    pub fn matches(self, left: &FactValue, right: &FactValue) -> bool {
        match self {
            Operator::Equal => left == right,
            Operator::NotEqual => left != right,
            Operator::GreaterThan => compare_numeric(left, right, |a, b| a > b),
            Operator::LessThan => compare_numeric(left, right, |a, b| a < b),
            Operator::GreaterThanOrEqual => compare_numeric(left, right, |a, b| a >= b),
            Operator::LessThanOrEqual => compare_numeric(left, right, |a, b| a <= b),
            Operator::Contains => match (left, right) {
                (FactValue::String(fact_str), FactValue::String(pattern_str)) => {
                    fact_str.contains(pattern_str.as_str())
                }
                (FactValue::Array(fact_arr), search_value) => {
                    fact_arr.iter().any(|item| item == search_value)
                }
                _ => false,
            },
            Operator::StartsWith => match (left, right) {
                (FactValue::String(fact_str), FactValue::String(pattern_str)) => {
                    fact_str.starts_with(pattern_str.as_str())
                }
                _ => false,
            },
            Operator::EndsWith => match (left, right) {
                (FactValue::String(fact_str), FactValue::String(pattern_str)) => {
                    fact_str.ends_with(pattern_str.as_str())
                }
                _ => false,
            },
        }
    }
}

fn compare_numeric(left: &FactValue, right: &FactValue, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (left.to_comparable(), right.to_comparable()) {
        (Some(fact_num), Some(pattern_num)) => cmp(fact_num, pattern_num),
        _ => false,
    }
}

/// A boolean test over one field value
pub trait AlphaPredicate: fmt::Debug + Send + Sync {
    fn test(&self, value: &FactValue) -> bool;

    /// Canonical text used to deduplicate identical predicates on the same field
    fn describe(&self) -> String;
}

/// Built-in predicate comparing a field value against a constant
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTest {
    pub operator: Operator,
    pub value: FactValue,
}

impl ValueTest {
    pub fn new(operator: Operator, value: impl Into<FactValue>) -> Self {
        Self { operator, value: value.into() }
    }
}

impl AlphaPredicate for ValueTest {
    fn test(&self, fact_value: &FactValue) -> bool {
        self.operator.matches(fact_value, &self.value)
    }

    fn describe(&self) -> String {
        format!("{:?} {:?}", self.operator, self.value)
    }
}

/// A single-fact condition as declared by a rule, before registration
#[derive(Debug, Clone)]
pub struct AlphaCondition {
    pub field: String,
    pub predicate: Arc<dyn AlphaPredicate>,
    /// `false` admits facts for which the predicate fails
    pub expected: bool,
}

impl AlphaCondition {
    pub fn new(field: &str, predicate: Arc<dyn AlphaPredicate>) -> Self {
        Self { field: field.to_string(), predicate, expected: true }
    }

    /// Shorthand for a [`ValueTest`] condition
    pub fn value(field: &str, operator: Operator, value: impl Into<FactValue>) -> Self {
        Self::new(field, Arc::new(ValueTest::new(operator, value)))
    }

    pub fn negated(mut self) -> Self {
        self.expected = !self.expected;
        self
    }
}

/// A registered predicate bound to an active field, with a dense id
#[derive(Debug, Clone)]
pub struct AlphaEvaluator {
    unique_id: usize,
    field: ActiveField,
    predicate: Arc<dyn AlphaPredicate>,
}

impl AlphaEvaluator {
    pub fn unique_id(&self) -> usize {
        self.unique_id
    }

    pub fn field(&self) -> &ActiveField {
        &self.field
    }

    /// Test against a fact's extracted value array
    pub fn test(&self, values: &[FactValue]) -> bool {
        match values.get(self.field.value_index()) {
            Some(value) => self.predicate.test(value),
            None => self.predicate.test(&FactValue::Null),
        }
    }
}

/// A unique combination of alpha tests for one `FieldsKey`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlphaBucketMeta {
    bucket_index: usize,
    mask: Arc<[(usize, bool)]>,
}

impl AlphaBucketMeta {
    /// The always-present bucket of a type's empty key
    pub fn no_conditions() -> Self {
        Self { bucket_index: 0, mask: Arc::from(Vec::new()) }
    }

    pub fn bucket_index(&self) -> usize {
        self.bucket_index
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    pub fn mask(&self) -> &[(usize, bool)] {
        &self.mask
    }

    pub fn test(&self, fact: &RuntimeFact) -> bool {
        self.mask.iter().all(|&(alpha_id, expected)| fact.alpha_test(alpha_id) == expected)
    }
}

/// Result of a registration that changed the schema of a type
#[derive(Debug, Clone)]
pub struct AlphaDelta {
    pub key: FieldsKey,
    pub new_alpha_meta: AlphaBucketMeta,
    pub new_evaluators: Vec<AlphaEvaluator>,
}

/// Session-wide registry of alpha evaluators and bucket metadata
#[derive(Debug, Default)]
pub struct AlphaConditions {
    evaluators: HashMap<FactTypeId, Vec<AlphaEvaluator>>,
    evaluator_ids: HashMap<(FactTypeId, usize, String), usize>,
    buckets: HashMap<FieldsKey, Vec<AlphaBucketMeta>>,
}

impl AlphaConditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// All evaluators registered for a type, ordered by unique id
    pub fn predicates(&self, type_id: FactTypeId) -> &[AlphaEvaluator] {
        self.evaluators.get(&type_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Buckets registered for a key, ordered by bucket index
    pub fn buckets(&self, key: &FieldsKey) -> &[AlphaBucketMeta] {
        self.buckets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether registering `conditions` for `key` would leave the schema unchanged
    pub fn is_registered(
        &self,
        key: &FieldsKey,
        conditions: &[(ActiveField, Arc<dyn AlphaPredicate>, bool)],
    ) -> bool {
        let mut mask = Vec::with_capacity(conditions.len());
        for (field, predicate, expected) in conditions {
            let signature = (key.type_id(), field.value_index(), predicate.describe());
            match self.evaluator_ids.get(&signature) {
                Some(&id) => mask.push((id, *expected)),
                None => return false,
            }
        }
        if key.is_empty() && mask.is_empty() {
            return true;
        }
        mask.sort_unstable();
        mask.dedup();
        self.buckets(key).iter().any(|meta| *meta.mask == *mask)
    }

    /// Register a predicate combination for `key`.
    ///
    /// Returns the bucket meta and, when the bucket did not exist before, the
    /// delta the type memory must apply.
    pub fn register(
        &mut self,
        key: &FieldsKey,
        conditions: &[(ActiveField, Arc<dyn AlphaPredicate>, bool)],
    ) -> (AlphaBucketMeta, Option<AlphaDelta>) {
        let type_id = key.type_id();
        let mut new_evaluators = Vec::new();
        let mut mask = Vec::with_capacity(conditions.len());

        for (field, predicate, expected) in conditions {
            let signature = (type_id, field.value_index(), predicate.describe());
            let unique_id = match self.evaluator_ids.get(&signature) {
                Some(&id) => id,
                None => {
                    let list = self.evaluators.entry(type_id).or_default();
                    let evaluator = AlphaEvaluator {
                        unique_id: list.len(),
                        field: field.clone(),
                        predicate: Arc::clone(predicate),
                    };
                    debug!(
                        type_id,
                        alpha_id = evaluator.unique_id,
                        field = field.name(),
                        predicate = %signature.2,
                        "Registered alpha evaluator"
                    );
                    list.push(evaluator.clone());
                    new_evaluators.push(evaluator);
                    self.evaluator_ids.insert(signature, list.len() - 1);
                    list.len() - 1
                }
            };
            mask.push((unique_id, *expected));
        }
        mask.sort_unstable();
        mask.dedup();

        let metas = self.buckets.entry(key.clone()).or_insert_with(|| {
            if key.is_empty() { vec![AlphaBucketMeta::no_conditions()] } else { Vec::new() }
        });

        if let Some(existing) = metas.iter().find(|meta| *meta.mask == *mask) {
            let existing = existing.clone();
            let delta = (!new_evaluators.is_empty()).then(|| AlphaDelta {
                key: key.clone(),
                new_alpha_meta: existing.clone(),
                new_evaluators,
            });
            return (existing, delta);
        }

        let meta = AlphaBucketMeta { bucket_index: metas.len(), mask: mask.into() };
        metas.push(meta.clone());
        debug!(key = %key, bucket_index = meta.bucket_index, "Registered alpha bucket");

        (meta.clone(), Some(AlphaDelta { key: key.clone(), new_alpha_meta: meta, new_evaluators }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NamedField;

    fn field(type_id: FactTypeId, index: usize, name: &str) -> ActiveField {
        ActiveField::new(type_id, index, name, Arc::new(NamedField::new(name)))
    }

    fn gt(v: i64) -> Arc<dyn AlphaPredicate> {
        Arc::new(ValueTest::new(Operator::GreaterThan, v))
    }

    #[test]
    fn test_is_registered() {
        let mut alphas = AlphaConditions::new();
        let key = FieldsKey::new(0, vec![field(0, 0, "age")]);
        let conditions = [(field(0, 0, "age"), gt(21), true)];
        assert!(!alphas.is_registered(&key, &conditions));
        assert!(alphas.is_registered(&FieldsKey::empty(0), &[]));

        alphas.register(&key, &conditions);
        assert!(alphas.is_registered(&key, &conditions));
        assert!(!alphas.is_registered(&key, &[(field(0, 0, "age"), gt(21), false)]));
        assert!(!alphas.is_registered(&key, &[]));
    }

    #[test]
    fn test_value_test_operators() {
        let age = FactValue::Integer(25);
        assert!(ValueTest::new(Operator::GreaterThan, 21).test(&age));
        assert!(!ValueTest::new(Operator::LessThan, 21).test(&age));
        assert!(ValueTest::new(Operator::GreaterThanOrEqual, 25).test(&age));
        assert!(ValueTest::new(Operator::Equal, 25).test(&age));
        assert!(ValueTest::new(Operator::NotEqual, "x").test(&age));

        let name = FactValue::String("alpha-beta".into());
        assert!(ValueTest::new(Operator::StartsWith, "alpha").test(&name));
        assert!(ValueTest::new(Operator::EndsWith, "beta").test(&name));
        assert!(ValueTest::new(Operator::Contains, "a-b").test(&name));
        assert!(!ValueTest::new(Operator::GreaterThan, 1).test(&name));

        let tags = FactValue::Array(vec!["x".into(), "y".into()]);
        assert!(ValueTest::new(Operator::Contains, "y").test(&tags));
    }

    #[test]
    fn test_register_deduplicates_evaluators() {
        let mut registry = AlphaConditions::new();
        let key = FieldsKey::empty(0);
        let age = field(0, 0, "age");

        let (first, delta) = registry.register(&key, &[(age.clone(), gt(21), true)]);
        assert_eq!(first.bucket_index(), 1);
        assert_eq!(delta.unwrap().new_evaluators.len(), 1);

        let (second, delta) = registry.register(&key, &[(age.clone(), gt(21), true)]);
        assert_eq!(second, first);
        assert!(delta.is_none());
        assert_eq!(registry.predicates(0).len(), 1);
        assert_eq!(registry.buckets(&key).len(), 2);
    }

    #[test]
    fn test_empty_key_starts_with_no_conditions_bucket() {
        let mut registry = AlphaConditions::new();
        let key = FieldsKey::empty(3);
        let (meta, delta) = registry.register(&key, &[]);
        assert_eq!(meta, AlphaBucketMeta::no_conditions());
        assert!(delta.is_none());
    }

    #[test]
    fn test_keyed_buckets_are_dense_per_key() {
        let mut registry = AlphaConditions::new();
        let id = field(0, 0, "id");
        let age = field(0, 1, "age");
        let key = FieldsKey::new(0, vec![id]);

        let (plain, delta) = registry.register(&key, &[]);
        assert_eq!(plain.bucket_index(), 0);
        assert!(delta.unwrap().new_evaluators.is_empty());

        let (filtered, _) = registry.register(&key, &[(age.clone(), gt(30), false)]);
        assert_eq!(filtered.bucket_index(), 1);
        assert_eq!(filtered.mask(), &[(0, false)]);
    }

    #[test]
    fn test_delta_carries_new_evaluators() {
        let mut registry = AlphaConditions::new();
        let age = field(0, 0, "age");
        let key_a = FieldsKey::new(0, vec![field(0, 1, "id")]);
        let key_b = FieldsKey::empty(0);

        registry.register(&key_a, &[]);
        let (_, delta) = registry.register(&key_b, &[(age, gt(1), true)]);
        let delta = delta.unwrap();
        assert_eq!(delta.key, key_b);
        assert_eq!(delta.new_evaluators[0].unique_id(), 0);
    }
}
