//! Dauber Types
//!
//! Value types shared by the Dauber crates. `FactValue` is the hashable value
//! handle produced by field accessors and compared field-wise by the key
//! stores; `FactData` is the named-field record carried by inserted objects.

#![warn(missing_docs)]
#![deny(clippy::all)]

mod types;
pub use types::{FactData, FactValue};
