//! Session registry of active fields
//!
//! A field becomes active the first time any condition reads it. Its value
//! index is dense per type and fixes the slot in every fact's value array.

use crate::types::{ActiveField, FactTypeId, FieldAccessor};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ActiveFields {
    by_type: HashMap<FactTypeId, Vec<ActiveField>>,
}

impl ActiveFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_id: FactTypeId, name: &str) -> Option<&ActiveField> {
        self.by_type.get(&type_id)?.iter().find(|field| field.name() == name)
    }

    /// Fields of a type ordered by value index
    pub fn fields(&self, type_id: FactTypeId) -> &[ActiveField] {
        self.by_type.get(&type_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the field and whether it was created by this call
    pub fn register(
        &mut self,
        type_id: FactTypeId,
        name: &str,
        accessor: Arc<dyn FieldAccessor>,
    ) -> (ActiveField, bool) {
        if let Some(existing) = self.get(type_id, name) {
            return (existing.clone(), false);
        }
        let fields = self.by_type.entry(type_id).or_default();
        let field = ActiveField::new(type_id, fields.len(), name, accessor);
        fields.push(field.clone());
        (field, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NamedField;

    #[test]
    fn test_value_indices_are_dense_per_type() {
        let mut registry = ActiveFields::new();
        let (a, created) = registry.register(0, "a", Arc::new(NamedField::new("a")));
        assert!(created);
        let (b, _) = registry.register(0, "b", Arc::new(NamedField::new("b")));
        let (other, _) = registry.register(1, "a", Arc::new(NamedField::new("a")));
        let (again, created) = registry.register(0, "a", Arc::new(NamedField::new("a")));

        assert_eq!((a.value_index(), b.value_index(), other.value_index()), (0, 1, 0));
        assert!(!created);
        assert_eq!(again, a);
        assert_eq!(registry.fields(0).len(), 2);
        assert!(registry.fields(7).is_empty());
    }
}
