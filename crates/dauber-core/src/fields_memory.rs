//! Keyed buckets of one fact type for one join field set

use crate::alpha::AlphaBucketMeta;
use crate::bucket::KeyedFactBucket;
use crate::error::{DauberError, DauberResult};
use crate::fact::RuntimeFact;
use crate::key_store::KeyStoreStats;
use crate::types::FieldsKey;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FieldsMemory {
    fields: FieldsKey,
    buckets: Vec<KeyedFactBucket>,
    initial_capacity: usize,
    max_load_factor: f64,
}

impl FieldsMemory {
    pub fn new(fields: FieldsKey, initial_capacity: usize, max_load_factor: f64) -> Self {
        Self { fields, buckets: Vec::new(), initial_capacity, max_load_factor }
    }

    pub fn fields(&self) -> &FieldsKey {
        &self.fields
    }

    pub fn buckets(&self) -> &[KeyedFactBucket] {
        &self.buckets
    }

    pub fn get(&self, meta: &AlphaBucketMeta) -> DauberResult<&KeyedFactBucket> {
        self.buckets.get(meta.bucket_index()).ok_or_else(|| self.unknown_bucket(meta))
    }

    fn unknown_bucket(&self, meta: &AlphaBucketMeta) -> DauberError {
        DauberError::UnknownAlphaBucket {
            scope: self.fields.to_string(),
            bucket_index: meta.bucket_index(),
        }
    }

    /// Create the bucket for `meta` and back-fill it from committed facts
    ///
    /// Bucket indices are dense, so `meta` must either exist already or be
    /// the next index.
    pub fn on_new_alpha_bucket<'a, I>(&mut self, meta: &AlphaBucketMeta, committed: I) -> DauberResult<()>
    where
        I: IntoIterator<Item = &'a RuntimeFact>,
    {
        let index = meta.bucket_index();
        if index < self.buckets.len() {
            return Ok(());
        }
        if index != self.buckets.len() {
            return Err(self.unknown_bucket(meta));
        }

        let mut bucket = KeyedFactBucket::new(
            self.fields.clone(),
            meta.clone(),
            self.initial_capacity,
            self.max_load_factor,
        )?;
        let filled = bucket.fill_main(committed);
        debug!(fields = %self.fields, bucket_index = index, filled, "Created keyed alpha bucket");
        self.buckets.push(bucket);
        Ok(())
    }

    pub fn insert(&mut self, facts: &[&RuntimeFact]) {
        for bucket in &mut self.buckets {
            bucket.insert(facts.iter().copied());
        }
    }

    pub fn delete(&mut self, facts: &[&RuntimeFact]) {
        for bucket in &mut self.buckets {
            bucket.delete(facts.iter().copied());
        }
    }

    pub fn commit_changes(&mut self) {
        for bucket in &mut self.buckets {
            bucket.commit_changes();
        }
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    pub fn stats(&self) -> KeyStoreStats {
        let mut stats = KeyStoreStats::default();
        for bucket in &self.buckets {
            stats.accumulate(&bucket.stats());
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpha::{AlphaConditions, AlphaPredicate, Operator, ValueTest};
    use crate::types::{ActiveField, FactHandle, FactHandleVersioned, FactObject, KeyMode, NamedField};
    use dauber_types::{FactData, FactValue};
    use std::sync::Arc;

    fn customer() -> ActiveField {
        ActiveField::new(0, 0, "customer", Arc::new(NamedField::new("customer")))
    }

    fn fact(id: u64, customer: &str, vip: bool) -> RuntimeFact {
        let object = FactObject::new("Order", id.to_string(), FactData::new());
        RuntimeFact::new(
            FactHandleVersioned::new(FactHandle(id)),
            object,
            vec![FactValue::String(customer.into())],
            vec![vip],
        )
    }

    #[test]
    fn test_buckets_partition_by_alpha_combination() {
        let key = FieldsKey::new(0, vec![customer()]);
        let mut alphas = AlphaConditions::new();
        let (all, _) = alphas.register(&key, &[]);
        let vip: Arc<dyn AlphaPredicate> = Arc::new(ValueTest::new(Operator::StartsWith, "vip"));
        let (vip_only, _) = alphas.register(&key, &[(customer(), vip, true)]);

        let mut memory = FieldsMemory::new(key, 4, 0.75);
        memory.on_new_alpha_bucket(&all, std::iter::empty()).unwrap();
        memory.on_new_alpha_bucket(&vip_only, std::iter::empty()).unwrap();

        let a = fact(1, "vip-1", true);
        let b = fact(2, "c-2", false);
        memory.insert(&[&a, &b]);

        assert_eq!(memory.get(&all).unwrap().stats().new_key_rows, 2);
        assert_eq!(memory.get(&vip_only).unwrap().stats().new_key_rows, 1);
    }

    #[test]
    fn test_new_bucket_back_fills_from_committed() {
        let key = FieldsKey::new(0, vec![customer()]);
        let mut alphas = AlphaConditions::new();
        let (all, _) = alphas.register(&key, &[]);
        let mut memory = FieldsMemory::new(key.clone(), 4, 0.75);
        memory.on_new_alpha_bucket(&all, std::iter::empty()).unwrap();

        let committed = vec![fact(1, "vip-1", true), fact(2, "c-2", false), fact(3, "vip-3", true)];
        let vip: Arc<dyn AlphaPredicate> = Arc::new(ValueTest::new(Operator::StartsWith, "vip"));
        let (vip_only, _) = alphas.register(&key, &[(customer(), vip, true)]);
        memory.on_new_alpha_bucket(&vip_only, &committed).unwrap();

        let bucket = memory.get(&vip_only).unwrap();
        let keys: Vec<&[FactValue]> =
            bucket.store().key_iter(KeyMode::KnownKeysKnownFacts).map(|row| row.key()).collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(bucket.stats().new_key_rows, 0);
        // Existing bucket untouched
        assert_eq!(memory.get(&all).unwrap().stats().main_rows, 0);
    }

    #[test]
    fn test_unknown_bucket_is_an_error() {
        let key = FieldsKey::new(0, vec![customer()]);
        let memory = FieldsMemory::new(key, 4, 0.75);
        let err = memory.get(&AlphaBucketMeta::no_conditions()).unwrap_err();
        assert!(matches!(err, DauberError::UnknownAlphaBucket { bucket_index: 0, .. }));
    }
}
