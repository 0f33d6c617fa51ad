//! Predicate types and evaluation logic for compiled segment rules.
//!
//! Evaluation follows document-store semantics: ordered comparisons and
//! equality only match when both sides are present and of the same kind,
//! while `!=` also matches customers that lack the field entirely.

use campaign_core::types::Customer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::fields::{CustomerField, FieldPath};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = "==")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
}

impl ComparisonOperator {
    /// The operator with its operands swapped: `a > b` iff `b < a`.
    pub fn mirrored(self) -> Self {
        match self {
            ComparisonOperator::GreaterThan => ComparisonOperator::LessThan,
            ComparisonOperator::LessThan => ComparisonOperator::GreaterThan,
            ComparisonOperator::GreaterThanOrEqual => ComparisonOperator::LessThanOrEqual,
            ComparisonOperator::LessThanOrEqual => ComparisonOperator::GreaterThanOrEqual,
            ComparisonOperator::Equals | ComparisonOperator::NotEquals => self,
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            ComparisonOperator::GreaterThan => ordering == Ordering::Greater,
            ComparisonOperator::LessThan => ordering == Ordering::Less,
            ComparisonOperator::GreaterThanOrEqual => ordering != Ordering::Less,
            ComparisonOperator::LessThanOrEqual => ordering != Ordering::Greater,
            ComparisonOperator::Equals => ordering == Ordering::Equal,
            ComparisonOperator::NotEquals => ordering != Ordering::Equal,
        }
    }
}

/// A typed value on either side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Operand {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Operand {
    /// Primitive JSON values only; arrays and objects have no operand form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Operand::Null),
            serde_json::Value::Bool(b) => Some(Operand::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Operand::Number),
            serde_json::Value::String(s) => Some(Operand::Text(s.clone())),
            _ => None,
        }
    }

    /// Ordering between operands of the same kind; `None` across kinds.
    fn compare(&self, other: &Operand) -> Option<Ordering> {
        match (self, other) {
            (Operand::Null, Operand::Null) => Some(Ordering::Equal),
            (Operand::Bool(a), Operand::Bool(b)) => Some(a.cmp(b)),
            (Operand::Number(a), Operand::Number(b)) => a.partial_cmp(b),
            (Operand::Text(a), Operand::Text(b)) => Some(a.cmp(b)),
            (Operand::Timestamp(a), Operand::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Compiled, composable boolean match expression over customers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Conjunction. Empty matches everything.
    All(Vec<Predicate>),
    /// Disjunction. Empty matches nothing.
    Any(Vec<Predicate>),
    Compare {
        path: FieldPathRepr,
        op: ComparisonOperator,
        operand: Operand,
    },
    /// Case-insensitive substring match on a text field.
    Contains { path: FieldPathRepr, needle: String },
    /// Empty constraint; matches every customer.
    Unconstrained,
}

/// Serializable form of [`FieldPath`], carried as its storage path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct FieldPathRepr(pub FieldPath);

impl From<FieldPathRepr> for String {
    fn from(value: FieldPathRepr) -> Self {
        value.0.storage_path().to_string()
    }
}

impl From<String> for FieldPathRepr {
    fn from(path: String) -> Self {
        let resolved = CustomerField::ALL
            .into_iter()
            .find(|f| f.storage_path() == path)
            .map(FieldPath::Mapped)
            .unwrap_or(FieldPath::Passthrough(path));
        FieldPathRepr(resolved)
    }
}

impl Predicate {
    pub fn matches(&self, customer: &Customer) -> bool {
        match self {
            Predicate::All(parts) => parts.iter().all(|p| p.matches(customer)),
            Predicate::Any(parts) => parts.iter().any(|p| p.matches(customer)),
            Predicate::Compare { path, op, operand } => {
                match field_value(customer, &path.0) {
                    Some(actual) => actual
                        .compare(operand)
                        .map_or(*op == ComparisonOperator::NotEquals, |o| op.accepts(o)),
                    None => *op == ComparisonOperator::NotEquals,
                }
            }
            Predicate::Contains { path, needle } => match field_value(customer, &path.0) {
                Some(Operand::Text(text)) => text.to_lowercase().contains(&needle.to_lowercase()),
                _ => false,
            },
            Predicate::Unconstrained => true,
        }
    }
}

/// Read the value at `path` from a customer. Absent optionals yield `None`.
pub fn field_value(customer: &Customer, path: &FieldPath) -> Option<Operand> {
    match path {
        FieldPath::Mapped(field) => match field {
            CustomerField::TotalSpent => Some(Operand::Number(customer.stats.total_spent)),
            CustomerField::OrderCount => Some(Operand::Number(f64::from(customer.stats.order_count))),
            CustomerField::LastPurchase => customer.stats.last_purchase.map(Operand::Timestamp),
            CustomerField::City => customer.address.city.clone().map(Operand::Text),
            CustomerField::IsActive => Some(Operand::Bool(customer.is_active)),
            CustomerField::Age => customer.demographics.age.map(|a| Operand::Number(f64::from(a))),
            CustomerField::Gender => customer.demographics.gender.clone().map(Operand::Text),
            CustomerField::Occupation => customer.demographics.occupation.clone().map(Operand::Text),
        },
        FieldPath::Passthrough(name) => customer.attributes.get(name).and_then(Operand::from_json),
    }
}
