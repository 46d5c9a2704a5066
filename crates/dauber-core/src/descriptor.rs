//! Rule left-hand sides: declaration builder and compiled descriptor
//!
//! An [`LhsBuilder`] declares fact variables with their alpha filters, extra
//! key fields and the join conditions between them. Compiling it through
//! [`crate::session::SessionMemory::compile_lhs`] registers the memory
//! schema and yields an immutable [`LhsDescriptor`] whose fact groups are
//! ordered: evaluation units, then keyed types without joins, then one pooled
//! plain group.

use crate::alpha::{AlphaBucketMeta, AlphaCondition};
use crate::allocator::{ConditionAllocator, ConditionCost, EvaluationUnit};
use crate::error::{DauberError, DauberResult};
use crate::join::JoinCondition;
use crate::types::{FactTypeId, FieldsKey};
use std::collections::HashMap;

/// Declaration of one fact variable
#[derive(Debug, Clone)]
pub struct FactTypeBuilder {
    pub var: String,
    pub type_name: String,
    pub alpha: Vec<AlphaCondition>,
    /// Key fields requested in addition to the ones implied by joins
    pub key_fields: Vec<String>,
}

impl FactTypeBuilder {
    pub fn new(var: &str, type_name: &str) -> Self {
        Self {
            var: var.to_string(),
            type_name: type_name.to_string(),
            alpha: Vec::new(),
            key_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LhsBuilder {
    level: usize,
    fact_types: Vec<FactTypeBuilder>,
    conditions: Vec<JoinCondition>,
    pending_error: Option<DauberError>,
}

impl LhsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder for a branch nested under `parent`
    pub fn nested(parent: &LhsDescriptor) -> Self {
        Self { level: parent.level + 1, ..Self::default() }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn fact(mut self, var: &str, type_name: &str) -> Self {
        self.fact_types.push(FactTypeBuilder::new(var, type_name));
        self
    }

    pub fn filter(mut self, var: &str, condition: AlphaCondition) -> Self {
        let label = format!("{} {}", condition.field, condition.predicate.describe());
        if let Some(fact) = self.var_mut(var, &label) {
            fact.alpha.push(condition);
        }
        self
    }

    pub fn key(mut self, var: &str, field: &str) -> Self {
        if let Some(fact) = self.var_mut(var, &format!("key {field}")) {
            if !fact.key_fields.iter().any(|f| f == field) {
                fact.key_fields.push(field.to_string());
            }
        }
        self
    }

    pub fn join(mut self, condition: JoinCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    fn var_mut(&mut self, var: &str, condition: &str) -> Option<&mut FactTypeBuilder> {
        match self.var_index(var) {
            Some(index) => Some(&mut self.fact_types[index]),
            None => {
                self.pending_error.get_or_insert_with(|| DauberError::UnknownVariable {
                    var: var.to_string(),
                    condition: condition.to_string(),
                });
                None
            }
        }
    }

    pub fn fact_types(&self) -> &[FactTypeBuilder] {
        &self.fact_types
    }

    pub fn conditions(&self) -> &[JoinCondition] {
        &self.conditions
    }

    /// Validate var references and derive every var's key field names
    ///
    /// Join fields come first, in order of first appearance across the
    /// conditions, followed by explicitly requested key fields.
    pub fn resolve(&self) -> DauberResult<ResolvedLhs> {
        if let Some(err) = &self.pending_error {
            return Err(err.clone());
        }

        let mut key_fields: Vec<Vec<String>> = vec![Vec::new(); self.fact_types.len()];
        let mut condition_vars = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            if condition.refs.is_empty() {
                return Err(DauberError::internal(
                    "lhs",
                    format!("join condition '{}' reads no fields", condition.label),
                ));
            }
            let mut vars = Vec::with_capacity(condition.refs.len());
            for field_ref in &condition.refs {
                let var = self.var_index(&field_ref.var).ok_or_else(|| {
                    DauberError::UnknownVariable {
                        var: field_ref.var.clone(),
                        condition: condition.label.clone(),
                    }
                })?;
                if !key_fields[var].contains(&field_ref.field) {
                    key_fields[var].push(field_ref.field.clone());
                }
                vars.push(var);
            }
            condition_vars.push(vars);
        }

        for (var, fact) in self.fact_types.iter().enumerate() {
            for field in &fact.key_fields {
                if !key_fields[var].contains(field) {
                    key_fields[var].push(field.clone());
                }
            }
        }

        Ok(ResolvedLhs { key_fields, condition_vars })
    }

    fn var_index(&self, var: &str) -> Option<usize> {
        self.fact_types.iter().position(|fact| fact.var == var)
    }
}

/// Var-level facts derived from a builder before any registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLhs {
    /// Key field names per var
    pub key_fields: Vec<Vec<String>>,
    /// Var index of every field ref, per condition
    pub condition_vars: Vec<Vec<usize>>,
}

/// One registered fact variable
#[derive(Debug, Clone)]
pub struct FactTypeDescriptor {
    pub var: String,
    pub type_id: FactTypeId,
    pub type_name: String,
    pub key: FieldsKey,
    pub alpha: AlphaBucketMeta,
}

impl FactTypeDescriptor {
    pub fn is_keyed(&self) -> bool {
        !self.key.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactGroupKind {
    /// Joined vars of one evaluation unit
    Unit(usize),
    /// A keyed var without join conditions
    Keyed,
    /// Unkeyed vars evaluated by plain iteration
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactGroup {
    pub kind: FactGroupKind,
    pub vars: Vec<usize>,
}

/// Location of a join condition operand inside a var's key tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySlot {
    pub var: usize,
    pub position: usize,
}

#[derive(Debug, Clone)]
pub struct LhsDescriptor {
    pub level: usize,
    pub fact_types: Vec<FactTypeDescriptor>,
    pub conditions: Vec<JoinCondition>,
    /// Key slots of every condition's operands, in operand order
    pub condition_slots: Vec<Vec<KeySlot>>,
    pub units: Vec<EvaluationUnit>,
    pub groups: Vec<FactGroup>,
    /// Var name to (fact group index, position within group)
    pub name_indices: HashMap<String, (usize, usize)>,
}

impl LhsDescriptor {
    /// Run the allocator over the registered vars and lay out the fact groups
    pub fn assemble(
        level: usize,
        fact_types: Vec<FactTypeDescriptor>,
        conditions: Vec<JoinCondition>,
        condition_vars: Vec<Vec<usize>>,
    ) -> DauberResult<Self> {
        let mut condition_slots = Vec::with_capacity(conditions.len());
        for (condition, vars) in conditions.iter().zip(&condition_vars) {
            let mut slots = Vec::with_capacity(vars.len());
            for (field_ref, &var) in condition.refs.iter().zip(vars) {
                let fact = &fact_types[var];
                let position = fact.key.position_of(&field_ref.field).ok_or_else(|| {
                    DauberError::UnknownField {
                        fact_type: fact.type_name.clone(),
                        field: field_ref.field.clone(),
                    }
                })?;
                slots.push(KeySlot { var, position });
            }
            condition_slots.push(slots);
        }

        let costs: Vec<ConditionCost> = conditions
            .iter()
            .zip(&condition_vars)
            .map(|(condition, vars)| ConditionCost {
                vars: vars.clone(),
                cost: condition.cost,
                label: condition.label.clone(),
            })
            .collect();
        let units = ConditionAllocator::new().allocate(&costs)?;

        let mut groups: Vec<FactGroup> = units
            .iter()
            .map(|unit| FactGroup { kind: FactGroupKind::Unit(unit.index), vars: unit.vars().collect() })
            .collect();
        let unjoined = (0..fact_types.len()).filter(|&var| !units.iter().any(|u| u.contains(var)));
        let (keyed, plain): (Vec<usize>, Vec<usize>) =
            unjoined.partition(|&var| fact_types[var].is_keyed());
        groups.extend(keyed.into_iter().map(|var| FactGroup { kind: FactGroupKind::Keyed, vars: vec![var] }));
        if !plain.is_empty() {
            groups.push(FactGroup { kind: FactGroupKind::Plain, vars: plain });
        }

        let mut name_indices = HashMap::new();
        for (group_index, group) in groups.iter().enumerate() {
            for (position, &var) in group.vars.iter().enumerate() {
                name_indices.insert(fact_types[var].var.clone(), (group_index, position));
            }
        }

        Ok(Self { level, fact_types, conditions, condition_slots, units, groups, name_indices })
    }

    pub fn var_index(&self, var: &str) -> Option<usize> {
        self.fact_types.iter().position(|fact| fact.var == var)
    }

    pub fn name_index(&self, var: &str) -> Option<(usize, usize)> {
        self.name_indices.get(var).copied()
    }
}
