//! Core identifiers, objects and field capabilities

use dauber_types::{FactData, FactValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Dense per-session identifier of a declared fact type
pub type FactTypeId = usize;

/// Stable identifier of one inserted object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactHandle(pub u64);

/// A fact handle plus the version bumped by every update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactHandleVersioned {
    pub handle: FactHandle,
    pub version: u32,
}

impl FactHandleVersioned {
    pub fn new(handle: FactHandle) -> Self {
        Self { handle, version: 0 }
    }

    /// Same handle, next version
    pub fn next_version(self) -> Self {
        Self { handle: self.handle, version: self.version + 1 }
    }
}

impl fmt::Display for FactHandleVersioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.handle.0, self.version)
    }
}

/// External memory actions, each with its own buffer in a type memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Insert,
    Retract,
    Update,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Insert, Action::Retract, Action::Update];
}

/// The three key-visibility views of a keyed store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyMode {
    /// Committed keys with committed facts (main partition)
    KnownKeysKnownFacts,
    /// Committed keys that gained facts this cycle
    KnownKeysNewFacts,
    /// Keys first seen this cycle
    NewKeysNewFacts,
}

impl KeyMode {
    pub const ALL: [KeyMode; 3] =
        [KeyMode::KnownKeysKnownFacts, KeyMode::KnownKeysNewFacts, KeyMode::NewKeysNewFacts];

    /// Whether rows in this view carry facts added since the last commit
    pub fn is_delta(self) -> bool {
        !matches!(self, KeyMode::KnownKeysKnownFacts)
    }
}

/// An externally inserted object
///
/// Identity for retract and update is the `(fact_type, external_id)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct FactObject {
    pub fact_type: String,
    pub external_id: String,
    pub data: FactData,
}

impl FactObject {
    pub fn new(fact_type: &str, external_id: impl Into<String>, data: FactData) -> Arc<Self> {
        Arc::new(Self { fact_type: fact_type.to_string(), external_id: external_id.into(), data })
    }
}

/// Reads one field value out of an object
pub trait FieldAccessor: fmt::Debug + Send + Sync {
    fn read(&self, object: &FactObject) -> FactValue;
}

/// Reads a named field from the object's data; absent fields read as `Null`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedField {
    name: String,
}

impl NamedField {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

impl FieldAccessor for NamedField {
    fn read(&self, object: &FactObject) -> FactValue {
        object.data.get(&self.name).cloned().unwrap_or(FactValue::Null)
    }
}

/// A field in use by at least one condition, with its slot in every fact's value array
#[derive(Clone)]
pub struct ActiveField {
    type_id: FactTypeId,
    value_index: usize,
    name: Arc<str>,
    accessor: Arc<dyn FieldAccessor>,
}

impl ActiveField {
    pub fn new(
        type_id: FactTypeId,
        value_index: usize,
        name: &str,
        accessor: Arc<dyn FieldAccessor>,
    ) -> Self {
        Self { type_id, value_index, name: Arc::from(name), accessor }
    }

    pub fn type_id(&self) -> FactTypeId {
        self.type_id
    }

    pub fn value_index(&self) -> usize {
        self.value_index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read_value(&self, object: &FactObject) -> FactValue {
        self.accessor.read(object)
    }
}

impl PartialEq for ActiveField {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.value_index == other.value_index
    }
}

impl Eq for ActiveField {}

impl Hash for ActiveField {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.value_index.hash(state);
    }
}

impl fmt::Debug for ActiveField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.value_index)
    }
}

/// Ordered list of fields forming one fact type's composite join key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldsKey {
    type_id: FactTypeId,
    fields: Arc<[ActiveField]>,
}

impl FieldsKey {
    pub fn new(type_id: FactTypeId, fields: Vec<ActiveField>) -> Self {
        debug_assert!(fields.iter().all(|f| f.type_id() == type_id));
        Self { type_id, fields: fields.into() }
    }

    /// The key of a type with no join fields
    pub fn empty(type_id: FactTypeId) -> Self {
        Self::new(type_id, Vec::new())
    }

    pub fn type_id(&self) -> FactTypeId {
        self.type_id
    }

    pub fn fields(&self) -> &[ActiveField] {
        &self.fields
    }

    pub fn size(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a named field inside the key tuple
    pub fn position_of(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == field)
    }
}

impl fmt::Debug for FieldsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for FieldsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields.iter().map(|field| field.name()).collect();
        write!(f, "type{}[{}]", self.type_id, names.join(", "))
    }
}
