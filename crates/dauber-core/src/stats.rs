//! Memory statistics for sessions and fact types

use crate::key_store::KeyStoreStats;
use serde::Serialize;
use std::fmt;

/// Snapshot of one type memory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeMemoryStats {
    pub type_name: String,
    pub committed_facts: usize,
    pub delta_facts: usize,
    pub pending_inserts: usize,
    pub pending_retracts: usize,
    pub pending_updates: usize,
    pub field_sets: usize,
    pub keyed_buckets: usize,
    pub plain_buckets: usize,
    pub keys: KeyStoreStats,
}

impl TypeMemoryStats {
    pub fn pending_total(&self) -> usize {
        self.pending_inserts + self.pending_retracts + self.delta_facts
    }
}

impl fmt::Display for TypeMemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} committed, {} delta, buffers [+{} -{} ~{}], {} field sets / {} keyed / {} plain buckets, keys: {}",
            self.type_name,
            self.committed_facts,
            self.delta_facts,
            self.pending_inserts,
            self.pending_retracts,
            self.pending_updates,
            self.field_sets,
            self.keyed_buckets,
            self.plain_buckets,
            self.keys
        )
    }
}

/// Snapshot of a whole session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub facts_created: u64,
    pub types: Vec<TypeMemoryStats>,
}

impl SessionStats {
    pub fn committed_facts(&self) -> usize {
        self.types.iter().map(|t| t.committed_facts).sum()
    }

    pub fn keys(&self) -> KeyStoreStats {
        let mut total = KeyStoreStats::default();
        for t in &self.types {
            total.accumulate(&t.keys);
        }
        total
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Session {} ({} facts created, {} committed)",
            self.session_id,
            self.facts_created,
            self.committed_facts()
        )?;
        for t in &self.types {
            writeln!(f, "  {t}")?;
        }
        Ok(())
    }
}
