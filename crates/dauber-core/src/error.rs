//! Error types for the Dauber core engine
//!
//! Every variant except `Configuration` is a broken compile-time or
//! phase-ordering invariant and is not recoverable: the caller's session
//! layer is expected to abort the session. Data problems such as retracting
//! an object that was never inserted are not errors; those calls log a
//! warning and return `None`.

use thiserror::Error;

/// Error type for fact-memory, allocation and session operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DauberError {
    /// A field-set memory was requested that no rule ever declared
    #[error("No key memory exists for {fields} on type '{fact_type}'")]
    MissingFieldsMemory { fact_type: String, fields: String },

    /// An alpha bucket index was requested that was never created
    #[error("No alpha bucket created for index {bucket_index} in {scope}")]
    UnknownAlphaBucket { scope: String, bucket_index: usize },

    /// New fields or alpha conditions were declared while facts are still uncommitted
    #[error("A new condition was created in an uncommitted memory of type '{fact_type}' ({pending} pending facts)")]
    SchemaChangeMidCycle { fact_type: String, pending: usize },

    /// A join condition reported a non-positive or non-finite cost estimate
    #[error("Complexity must be a positive value, got {cost} for condition '{condition}'")]
    InvalidCost { condition: String, cost: f64 },

    /// A fact type was referenced before it was declared
    #[error("Unknown fact type: {fact_type}")]
    UnknownFactType { fact_type: String },

    /// A join condition references a variable not declared in the LHS
    #[error("Unknown fact variable '{var}' referenced by condition '{condition}'")]
    UnknownVariable { var: String, condition: String },

    /// A field was referenced that is not registered for the type
    #[error("Field '{field}' is not active on type '{fact_type}'")]
    UnknownField { fact_type: String, field: String },

    /// Invalid configuration values
    #[error("Configuration error: {message}")]
    Configuration { message: String, setting: Option<String> },

    /// Broken internal invariant
    #[error("Internal error: {message}")]
    Internal { message: String, component: Option<String> },
}

impl DauberError {
    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            DauberError::MissingFieldsMemory { .. } => "fields_memory",
            DauberError::UnknownAlphaBucket { .. } => "alpha_bucket",
            DauberError::SchemaChangeMidCycle { .. } => "phase_order",
            DauberError::InvalidCost { .. } => "allocation",
            DauberError::UnknownFactType { .. } => "fact_type",
            DauberError::UnknownVariable { .. } => "lhs",
            DauberError::UnknownField { .. } => "field",
            DauberError::Configuration { .. } => "configuration",
            DauberError::Internal { .. } => "internal",
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DauberError::Configuration { .. })
    }

    /// Create a configuration error for a named setting
    pub fn configuration(setting: &str, message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into(), setting: Some(setting.to_string()) }
    }

    /// Create an internal error for a named component
    pub fn internal(component: &str, message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), component: Some(component.to_string()) }
    }
}

/// Result type alias for core engine operations
pub type DauberResult<T> = Result<T, DauberError>;
