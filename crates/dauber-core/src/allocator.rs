//! Cost-based grouping of join conditions into evaluation units
//!
//! ## Planning
//!
//! ```text
//! conditions ──flatten by var set──► BetaEvaluatorGroup (cost = Σ condition costs)
//!            ──min-max to [1, 2] × var count──► weight
//!            ──sort (weight, canonical label)──► merge groups sharing vars
//!            ──► EvaluationUnit { join order, steps, weight }
//! ```
//!
//! Vars are LHS fact-declaration indices, so a self-join over one fact type
//! still yields two distinct vars. The plan is computed once per LHS and
//! never changes afterwards.

use crate::error::{DauberError, DauberResult};
use std::collections::BTreeMap;
use tracing::debug;

/// Allocator view of one join condition
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionCost {
    /// Vars read by the condition, in any order
    pub vars: Vec<usize>,
    pub cost: f64,
    pub label: String,
}

/// Join conditions over the same set of vars, evaluated together
#[derive(Debug, Clone, PartialEq)]
pub struct BetaEvaluatorGroup {
    /// Sorted, deduplicated var set
    pub vars: Vec<usize>,
    /// Indices into the allocator input, ascending
    pub conditions: Vec<usize>,
    pub cost: f64,
    pub weight: f64,
    pub canonical: String,
}

/// One var bound at a join step together with the conditions that become testable there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStep {
    pub var: usize,
    pub conditions: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationUnit {
    pub index: usize,
    pub steps: Vec<JoinStep>,
    pub groups: Vec<BetaEvaluatorGroup>,
    pub weight: f64,
}

impl EvaluationUnit {
    /// Vars in join order
    pub fn vars(&self) -> impl Iterator<Item = usize> + '_ {
        self.steps.iter().map(|step| step.var)
    }

    pub fn contains(&self, var: usize) -> bool {
        self.steps.iter().any(|step| step.var == var)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionAllocator;

impl ConditionAllocator {
    pub fn new() -> Self {
        Self
    }

    pub fn allocate(&self, conditions: &[ConditionCost]) -> DauberResult<Vec<EvaluationUnit>> {
        for condition in conditions {
            if !(condition.cost.is_finite() && condition.cost > 0.0) {
                return Err(DauberError::InvalidCost {
                    condition: condition.label.clone(),
                    cost: condition.cost,
                });
            }
        }
        if conditions.is_empty() {
            return Ok(Vec::new());
        }

        let mut groups = flatten(conditions);
        assign_weights(&mut groups);
        groups.sort_by(|a, b| {
            a.weight.total_cmp(&b.weight).then_with(|| a.canonical.cmp(&b.canonical))
        });

        let units = merge_units(groups, conditions);
        debug!(
            conditions = conditions.len(),
            units = units.len(),
            "Allocated join conditions"
        );
        Ok(units)
    }
}

fn flatten(conditions: &[ConditionCost]) -> Vec<BetaEvaluatorGroup> {
    let mut by_vars: BTreeMap<Vec<usize>, BetaEvaluatorGroup> = BTreeMap::new();
    for (index, condition) in conditions.iter().enumerate() {
        let mut vars = condition.vars.clone();
        vars.sort_unstable();
        vars.dedup();
        let group = by_vars.entry(vars.clone()).or_insert_with(|| BetaEvaluatorGroup {
            vars,
            conditions: Vec::new(),
            cost: 0.0,
            weight: 0.0,
            canonical: String::new(),
        });
        group.conditions.push(index);
        group.cost += condition.cost;
    }

    by_vars
        .into_values()
        .map(|mut group| {
            let labels: Vec<&str> =
                group.conditions.iter().map(|&i| conditions[i].label.as_str()).collect();
            group.canonical = format!("{:?}:{}", group.vars, labels.join(";"));
            group
        })
        .collect()
}

fn assign_weights(groups: &mut [BetaEvaluatorGroup]) {
    let min = groups.iter().map(|g| g.cost).fold(f64::INFINITY, f64::min);
    let max = groups.iter().map(|g| g.cost).fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    for group in groups {
        let normalized = if range > 0.0 { 1.0 + (group.cost - min) / range } else { 1.0 };
        group.weight = normalized * group.vars.len() as f64;
    }
}

/// Greedy connected-component merge over the sorted groups
fn merge_units(groups: Vec<BetaEvaluatorGroup>, conditions: &[ConditionCost]) -> Vec<EvaluationUnit> {
    // Each pending unit holds positions into the sorted group list
    let mut pending: Vec<Vec<usize>> = Vec::new();

    for (rank, group) in groups.iter().enumerate() {
        let overlapping: Vec<usize> = pending
            .iter()
            .enumerate()
            .filter(|(_, members)| {
                members.iter().any(|&m| groups[m].vars.iter().any(|v| group.vars.contains(v)))
            })
            .map(|(i, _)| i)
            .collect();

        match overlapping.split_first() {
            None => pending.push(vec![rank]),
            Some((&first, rest)) => {
                // Later units fold into the earliest one, highest index first
                for &other in rest.iter().rev() {
                    let members = pending.remove(other);
                    pending[first].extend(members);
                }
                pending[first].push(rank);
                pending[first].sort_unstable();
            }
        }
    }

    pending
        .into_iter()
        .enumerate()
        .map(|(index, members)| build_unit(index, members.iter().map(|&m| &groups[m]), conditions))
        .collect()
}

fn build_unit<'a>(
    index: usize,
    members: impl Iterator<Item = &'a BetaEvaluatorGroup>,
    conditions: &[ConditionCost],
) -> EvaluationUnit {
    let members: Vec<BetaEvaluatorGroup> = members.cloned().collect();

    let mut order: Vec<usize> = Vec::new();
    for group in &members {
        for &var in &group.vars {
            if !order.contains(&var) {
                order.push(var);
            }
        }
    }

    let mut steps: Vec<JoinStep> =
        order.iter().map(|&var| JoinStep { var, conditions: Vec::new() }).collect();
    let mut attached: Vec<usize> = members.iter().flat_map(|g| g.conditions.iter().copied()).collect();
    attached.sort_unstable();
    for condition in attached {
        let last_bound = conditions[condition]
            .vars
            .iter()
            .filter_map(|var| order.iter().position(|v| v == var))
            .max()
            .unwrap_or(0);
        steps[last_bound].conditions.push(condition);
    }

    let weight = members.iter().map(|g| g.weight).sum();
    EvaluationUnit { index, steps, groups: members, weight }
}
