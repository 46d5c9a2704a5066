//! Join (beta) conditions over field values of several fact variables

use crate::alpha::Operator;
use dauber_types::FactValue;
use std::fmt;
use std::sync::Arc;

/// A boolean test over a tuple of field values, ordered like the condition's field refs
pub trait JoinPredicate: Send + Sync {
    fn test(&self, values: &[&FactValue]) -> bool;
}

impl<F> JoinPredicate for F
where
    F: Fn(&[&FactValue]) -> bool + Send + Sync,
{
    fn test(&self, values: &[&FactValue]) -> bool {
        self(values)
    }
}

/// Compares the first value against the second with an [`Operator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldComparison {
    pub operator: Operator,
}

impl JoinPredicate for FieldComparison {
    fn test(&self, values: &[&FactValue]) -> bool {
        match values {
            [left, right] => self.operator.matches(left, right),
            _ => false,
        }
    }
}

/// A field of one LHS variable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub var: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(var: &str, field: &str) -> Self {
        Self { var: var.to_string(), field: field.to_string() }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.var, self.field)
    }
}

#[derive(Clone)]
pub struct JoinCondition {
    pub refs: Vec<FieldRef>,
    pub predicate: Arc<dyn JoinPredicate>,
    /// Positive estimate of evaluation cost
    pub cost: f64,
    pub label: String,
}

impl JoinCondition {
    pub fn new(label: &str, refs: Vec<FieldRef>, predicate: Arc<dyn JoinPredicate>) -> Self {
        Self { refs, predicate, cost: 1.0, label: label.to_string() }
    }

    /// `left <operator> right`, labelled from its operands
    pub fn compare(left: FieldRef, operator: Operator, right: FieldRef) -> Self {
        let label = format!("{left} {operator:?} {right}");
        Self::new(&label, vec![left, right], Arc::new(FieldComparison { operator }))
    }

    pub fn equal(left: FieldRef, right: FieldRef) -> Self {
        Self::compare(left, Operator::Equal, right)
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn test(&self, values: &[&FactValue]) -> bool {
        self.predicate.test(values)
    }
}

impl fmt::Debug for JoinCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinCondition")
            .field("label", &self.label)
            .field("refs", &self.refs)
            .field("cost", &self.cost)
            .finish()
    }
}
