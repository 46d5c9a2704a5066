#![deny(clippy::all)]
#![allow(missing_docs)]
//! Incremental fact memory for the Dauber pattern-matching engine.
//!
//! This crate provides the indexing and incremental-maintenance core of a
//! rule engine: hash-indexed composite-key stores with main/delta
//! partitioning, a per-type fact memory hierarchy with schema evolution, and
//! a cost-based planner that groups join conditions into evaluation units.

use tracing::{debug, instrument};

/// Single-fact predicates, evaluators and bucket metadata
pub mod alpha;
/// Compile-time grouping of join conditions into evaluation units
pub mod allocator;
/// Reference evaluation of compiled rule LHS descriptors
pub mod activation;
/// Registry of fields read by conditions
pub mod active_fields;
/// Keyed and plain fact buckets
pub mod bucket;
/// Session memory configuration
pub mod config;
/// Rule LHS builder and compiled descriptor
pub mod descriptor;
/// Error types
pub mod error;
/// Runtime facts and fact storage
pub mod fact;
/// Keyed buckets of one join field set
pub mod fields_memory;
/// Join conditions
pub mod join;
/// Hash-indexed composite-key store
pub mod key_store;
/// Per-session fact memory and lifecycle
pub mod session;
/// Memory statistics
pub mod stats;
/// Tracing subscriber setup
pub mod telemetry;
/// Per-type fact memory
pub mod type_memory;
/// Core identifiers and capabilities
pub mod types;

pub use activation::{Activation, RhsAction, RuleActivation};
pub use alpha::{AlphaBucketMeta, AlphaCondition, AlphaConditions, AlphaPredicate, Operator, ValueTest};
pub use allocator::{ConditionAllocator, ConditionCost, EvaluationUnit};
pub use config::{LogFormat, LoggingConfig, MemoryConfig};
pub use descriptor::{FactGroup, FactGroupKind, LhsBuilder, LhsDescriptor};
pub use error::{DauberError, DauberResult};
pub use join::{FieldRef, JoinCondition, JoinPredicate};
pub use key_store::{HashIndexedKeyStore, KeyStoreStats, ValueRow};
pub use session::{CyclePhase, SessionMemory};
pub use stats::{SessionStats, TypeMemoryStats};
pub use types::{Action, FactHandle, FactHandleVersioned, FactObject, KeyMode, NamedField};

pub use dauber_types::{FactData, FactValue};

/// Initialize logging from the environment and return the memory configuration
#[instrument]
pub fn init() -> anyhow::Result<MemoryConfig> {
    let config = MemoryConfig::from_environment();
    config.validate()?;
    telemetry::init_tracing(&config.logging)?;
    debug!(?config, "Initialized Dauber core");
    Ok(config)
}
