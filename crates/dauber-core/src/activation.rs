//! Reference evaluation of a compiled LHS over the session's key views
//!
//! Every fact group yields candidate tuples tagged old or new. Keyed groups
//! read the three key views of their bucket; evaluation units join rows in
//! the unit's join order, testing each condition at the step where its last
//! var becomes bound; the plain group iterates the main and delta handles of
//! its alpha buckets. The action fires once per cross-group combination that
//! contains at least one new fact.

use crate::descriptor::{FactGroup, FactGroupKind, KeySlot, LhsDescriptor};
use crate::error::{DauberError, DauberResult};
use crate::fact::RuntimeFact;
use crate::key_store::{HashIndexedKeyStore, ValueRow};
use crate::session::SessionMemory;
use crate::type_memory::TypeMemory;
use crate::types::{FactHandleVersioned, FactObject, KeyMode};
use dauber_types::FactValue;
use std::sync::Arc;
use tracing::debug;

/// One satisfying combination, grouped like the descriptor's fact groups
#[derive(Debug)]
pub struct Activation<'a> {
    descriptor: &'a LhsDescriptor,
    groups: Vec<Vec<&'a RuntimeFact>>,
}

impl<'a> Activation<'a> {
    pub fn groups(&self) -> &[Vec<&'a RuntimeFact>] {
        &self.groups
    }

    /// Fact bound to a declared variable
    pub fn fact(&self, var: &str) -> Option<&'a RuntimeFact> {
        let (group, position) = self.descriptor.name_index(var)?;
        self.groups.get(group)?.get(position).copied()
    }

    pub fn object(&self, var: &str) -> Option<&'a Arc<FactObject>> {
        self.fact(var).map(RuntimeFact::object)
    }

    pub fn handles(&self) -> Vec<FactHandleVersioned> {
        self.groups.iter().flatten().map(|fact| fact.handle()).collect()
    }
}

/// Right-hand side of a rule
pub trait RhsAction {
    fn fire(&mut self, activation: &Activation<'_>);
}

impl<F> RhsAction for F
where
    F: FnMut(&Activation<'_>),
{
    fn fire(&mut self, activation: &Activation<'_>) {
        self(activation)
    }
}

/// Facts of one group forming one candidate, with its novelty
struct Candidate<'a> {
    facts: Vec<&'a RuntimeFact>,
    is_new: bool,
}

/// A key row bound during a unit join
#[derive(Clone, Copy)]
struct BoundRow<'a> {
    row: &'a ValueRow,
    is_new: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RuleActivation;

impl RuleActivation {
    /// Fire `action` once per combination new in this cycle; returns the fire count
    pub fn evaluate<A>(memory: &SessionMemory, lhs: &LhsDescriptor, action: &mut A) -> DauberResult<usize>
    where
        A: RhsAction + ?Sized,
    {
        let mut per_group = Vec::with_capacity(lhs.groups.len());
        for group in &lhs.groups {
            per_group.push(Self::group_candidates(memory, lhs, group)?);
        }

        let mut fired = 0;
        let mut chosen: Vec<&Candidate<'_>> = Vec::with_capacity(per_group.len());
        Self::fire_combinations(lhs, &per_group, &mut chosen, action, &mut fired);
        debug!(level = lhs.level, groups = lhs.groups.len(), fired, "Evaluated rule LHS");
        Ok(fired)
    }

    fn fire_combinations<'a, A>(
        lhs: &'a LhsDescriptor,
        per_group: &'a [Vec<Candidate<'a>>],
        chosen: &mut Vec<&'a Candidate<'a>>,
        action: &mut A,
        fired: &mut usize,
    ) where
        A: RhsAction + ?Sized,
    {
        let depth = chosen.len();
        if depth == per_group.len() {
            if chosen.iter().any(|candidate| candidate.is_new) {
                let activation = Activation {
                    descriptor: lhs,
                    groups: chosen.iter().map(|candidate| candidate.facts.clone()).collect(),
                };
                action.fire(&activation);
                *fired += 1;
            }
            return;
        }
        for candidate in &per_group[depth] {
            chosen.push(candidate);
            Self::fire_combinations(lhs, per_group, chosen, action, fired);
            chosen.pop();
        }
    }

    fn group_candidates<'a>(
        memory: &'a SessionMemory,
        lhs: &'a LhsDescriptor,
        group: &FactGroup,
    ) -> DauberResult<Vec<Candidate<'a>>> {
        match group.kind {
            FactGroupKind::Unit(unit) => Self::unit_candidates(memory, lhs, unit),
            FactGroupKind::Keyed => {
                let rows = Self::bound_rows(memory, lhs, group.vars[0])?;
                let type_memory = memory.type_memory(lhs.fact_types[group.vars[0]].type_id)?;
                let mut candidates = Vec::new();
                for bound in rows {
                    for fact in live_facts(type_memory, bound.row.facts()) {
                        candidates.push(Candidate { facts: vec![fact], is_new: bound.is_new });
                    }
                }
                Ok(candidates)
            }
            FactGroupKind::Plain => {
                let mut per_var: Vec<Vec<(&'a RuntimeFact, bool)>> = Vec::with_capacity(group.vars.len());
                for &var in &group.vars {
                    let fact_type = &lhs.fact_types[var];
                    let type_memory = memory.type_memory(fact_type.type_id)?;
                    let bucket = type_memory.alpha_bucket(&fact_type.alpha)?;
                    let old = bucket
                        .main()
                        .iter()
                        .filter(|handle| !bucket.is_deleted(handle))
                        .filter_map(|handle| live_fact(type_memory, handle))
                        .map(|fact| (fact, false));
                    let new = live_facts(type_memory, bucket.delta()).map(|fact| (fact, true));
                    per_var.push(old.chain(new).collect());
                }
                let mut candidates = Vec::new();
                product(&per_var, &mut Vec::new(), false, &mut |facts, is_new| {
                    candidates.push(Candidate { facts: facts.to_vec(), is_new });
                });
                Ok(candidates)
            }
        }
    }

    /// Rows of every key view of a var's bucket, skipping rows emptied this cycle
    fn bound_rows<'a>(
        memory: &'a SessionMemory,
        lhs: &'a LhsDescriptor,
        var: usize,
    ) -> DauberResult<Vec<BoundRow<'a>>> {
        let store = Self::store(memory, lhs, var)?;
        Ok(KeyMode::ALL
            .into_iter()
            .flat_map(move |mode| {
                store.key_iter(mode).map(move |row| BoundRow { row, is_new: mode.is_delta() })
            })
            .filter(move |bound| !bound.row.is_empty() && !store.is_key_deleted(bound.row))
            .collect())
    }

    fn store<'a>(
        memory: &'a SessionMemory,
        lhs: &'a LhsDescriptor,
        var: usize,
    ) -> DauberResult<&'a HashIndexedKeyStore> {
        let fact_type = &lhs.fact_types[var];
        let bucket = memory
            .type_memory(fact_type.type_id)?
            .fields_memory(&fact_type.key)?
            .get(&fact_type.alpha)?;
        Ok(bucket.store())
    }

    fn unit_candidates<'a>(
        memory: &'a SessionMemory,
        lhs: &'a LhsDescriptor,
        unit_index: usize,
    ) -> DauberResult<Vec<Candidate<'a>>> {
        let unit = lhs.units.get(unit_index).ok_or_else(|| {
            DauberError::internal("activation", format!("descriptor has no unit {unit_index}"))
        })?;

        let mut rows_per_step = Vec::with_capacity(unit.steps.len());
        let mut type_memories = Vec::with_capacity(unit.steps.len());
        for step in &unit.steps {
            rows_per_step.push(Self::bound_rows(memory, lhs, step.var)?);
            type_memories.push(memory.type_memory(lhs.fact_types[step.var].type_id)?);
        }

        let mut joined: Vec<Vec<BoundRow<'a>>> = Vec::new();
        let mut bound: Vec<Option<&'a ValueRow>> = vec![None; lhs.fact_types.len()];
        let mut path = Vec::with_capacity(unit.steps.len());
        join_rows(lhs, unit_index, &rows_per_step, &mut bound, &mut path, &mut joined);

        let mut candidates = Vec::new();
        for rows in joined {
            let is_new = rows.iter().any(|bound| bound.is_new);
            let per_var: Vec<Vec<(&'a RuntimeFact, bool)>> = rows
                .iter()
                .zip(&type_memories)
                .map(|(bound, type_memory)| {
                    live_facts(*type_memory, bound.row.facts()).map(|fact| (fact, bound.is_new)).collect()
                })
                .collect();
            product(&per_var, &mut Vec::new(), false, &mut |facts, _| {
                candidates.push(Candidate { facts: facts.to_vec(), is_new });
            });
        }
        Ok(candidates)
    }
}

fn live_fact<'a>(type_memory: &'a TypeMemory, handle: &FactHandleVersioned) -> Option<&'a RuntimeFact> {
    type_memory.fact(handle).filter(|fact| !fact.is_deleted())
}

fn live_facts<'a, 'h>(
    type_memory: &'a TypeMemory,
    handles: &'h [FactHandleVersioned],
) -> impl Iterator<Item = &'a RuntimeFact> {
    handles.iter().filter_map(move |handle| live_fact(type_memory, handle))
}

fn join_rows<'a>(
    lhs: &LhsDescriptor,
    unit_index: usize,
    rows_per_step: &[Vec<BoundRow<'a>>],
    bound: &mut [Option<&'a ValueRow>],
    path: &mut Vec<BoundRow<'a>>,
    joined: &mut Vec<Vec<BoundRow<'a>>>,
) {
    let unit = &lhs.units[unit_index];
    let depth = path.len();
    if depth == unit.steps.len() {
        joined.push(path.clone());
        return;
    }
    let step = &unit.steps[depth];
    for candidate in &rows_per_step[depth] {
        bound[step.var] = Some(candidate.row);
        if step.conditions.iter().all(|&condition| condition_holds(lhs, condition, bound)) {
            path.push(*candidate);
            join_rows(lhs, unit_index, rows_per_step, bound, path, joined);
            path.pop();
        }
    }
    bound[step.var] = None;
}

// Operands are read in place from the bound key rows.
fn condition_holds(lhs: &LhsDescriptor, condition: usize, bound: &[Option<&ValueRow>]) -> bool {
    static UNBOUND: FactValue = FactValue::Null;
    let slots = &lhs.condition_slots[condition];
    let value = |slot: &KeySlot| bound[slot.var].map_or(&UNBOUND, |row| &row.key()[slot.position]);
    match slots.as_slice() {
        [left, right] => lhs.conditions[condition].test(&[value(left), value(right)]),
        [single] => lhs.conditions[condition].test(&[value(single)]),
        many => {
            let values: Vec<&FactValue> = many.iter().map(value).collect();
            lhs.conditions[condition].test(&values)
        }
    }
}

/// Cartesian product over per-var fact lists
fn product<'a>(
    per_var: &[Vec<(&'a RuntimeFact, bool)>],
    current: &mut Vec<&'a RuntimeFact>,
    any_new: bool,
    emit: &mut dyn FnMut(&[&'a RuntimeFact], bool),
) {
    let depth = current.len();
    if depth == per_var.len() {
        emit(current.as_slice(), any_new);
        return;
    }
    for &(fact, is_new) in &per_var[depth] {
        current.push(fact);
        product(per_var, current, any_new || is_new, emit);
        current.pop();
    }
}
