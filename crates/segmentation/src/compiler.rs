//! Rule compiler — turns a declarative rule set into a [`Predicate`].
//!
//! Compilation is pure: the only outside input is `now`, which anchors
//! day-count rules such as `last_purchase > 30`.
//!
//! Day-count rules read as "days since last purchase", so `> 30` means the
//! purchase happened more than 30 days ago. On the stored timestamp that is
//! `last_purchase < now - 30d`; the operator is mirrored accordingly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use campaign_core::{CampaignError, CampaignResult};

use crate::fields::{coerce_bool, days_ago_cutoff, CustomerField, FieldPath};
use crate::predicates::{ComparisonOperator, FieldPathRepr, Operand, Predicate};

/// An operator outside the supported set compiles to an empty constraint
/// that matches every customer. Stored segments depend on this; flip it to
/// make such rules match nothing instead.
pub const UNKNOWN_OPERATOR_MATCHES_ALL: bool = true;

pub const CONTAINS_OPERATOR: &str = "contains";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Combinator {
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub field: String,
    pub operator: String,
    pub value: Value,
    /// Display hint only; never consulted by the compiler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
}

impl Rule {
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value,
            value_type: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSet {
    #[serde(alias = "condition")]
    pub combinator: Combinator,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(combinator: Combinator, rules: Vec<Rule>) -> Self {
        Self { combinator, rules }
    }

    pub fn and(rules: Vec<Rule>) -> Self {
        Self::new(Combinator::And, rules)
    }

    pub fn or(rules: Vec<Rule>) -> Self {
        Self::new(Combinator::Or, rules)
    }

    /// Caller-side checks that [`compile`] deliberately does not perform.
    pub fn validate(&self) -> CampaignResult<()> {
        if self.rules.is_empty() {
            return Err(CampaignError::Validation(
                "at least one rule is required".into(),
            ));
        }
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.field.trim().is_empty() {
                return Err(CampaignError::Validation(format!(
                    "rule {idx}: field is required"
                )));
            }
            if Operand::from_json(&rule.value).is_none() {
                return Err(CampaignError::Validation(format!(
                    "rule {idx}: value for '{}' must be a primitive",
                    rule.field
                )));
            }
        }
        Ok(())
    }
}

/// Compile a rule set against `now`. An empty rule list is not rejected:
/// it compiles to `All([])` (everything) or `Any([])` (nothing).
pub fn compile(rule_set: &RuleSet, now: DateTime<Utc>) -> Predicate {
    let parts: Vec<Predicate> = rule_set
        .rules
        .iter()
        .map(|rule| compile_rule(rule, now))
        .collect();

    match rule_set.combinator {
        Combinator::And => Predicate::All(parts),
        Combinator::Or => Predicate::Any(parts),
    }
}

fn compile_rule(rule: &Rule, now: DateTime<Utc>) -> Predicate {
    let path = FieldPath::resolve(&rule.field);

    if rule.operator == CONTAINS_OPERATOR {
        let needle = match &rule.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Predicate::Contains {
            path: FieldPathRepr(path),
            needle,
        };
    }

    let Some(op) = parse_operator(&rule.operator) else {
        warn!(
            field = %rule.field,
            operator = %rule.operator,
            "unknown rule operator, rule imposes no constraint"
        );
        metrics::counter!("segmentation.unknown_operator").increment(1);
        return if UNKNOWN_OPERATOR_MATCHES_ALL {
            Predicate::Unconstrained
        } else {
            Predicate::Any(Vec::new())
        };
    };

    if path == FieldPath::Mapped(CustomerField::LastPurchase) {
        if let Some(cutoff) = days_ago_cutoff(&rule.value, now) {
            return Predicate::Compare {
                path: FieldPathRepr(path),
                op: op.mirrored(),
                operand: Operand::Timestamp(cutoff),
            };
        }
    }

    let operand = coerce_operand(&path, &rule.value);
    Predicate::Compare {
        path: FieldPathRepr(path),
        op,
        operand,
    }
}

fn parse_operator(raw: &str) -> Option<ComparisonOperator> {
    match raw {
        ">" => Some(ComparisonOperator::GreaterThan),
        "<" => Some(ComparisonOperator::LessThan),
        ">=" => Some(ComparisonOperator::GreaterThanOrEqual),
        "<=" => Some(ComparisonOperator::LessThanOrEqual),
        "==" => Some(ComparisonOperator::Equals),
        "!=" => Some(ComparisonOperator::NotEquals),
        _ => None,
    }
}

fn coerce_operand(path: &FieldPath, value: &Value) -> Operand {
    match path {
        FieldPath::Mapped(CustomerField::IsActive) => Operand::Bool(coerce_bool(value)),
        _ => plain_operand(value),
    }
}

// Composite values compare as their JSON text.
fn plain_operand(value: &Value) -> Operand {
    Operand::from_json(value).unwrap_or_else(|| Operand::Text(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::Customer;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn customer(id: &str, spent: f64, active: bool, last_purchase_days: Option<i64>) -> Customer {
        let mut c = Customer::new(id, id);
        c.stats.total_spent = spent;
        c.is_active = active;
        c.stats.last_purchase = last_purchase_days.map(|d| now() - Duration::days(d));
        c
    }

    fn count(rule_set: &RuleSet, customers: &[Customer]) -> usize {
        let predicate = compile(rule_set, now());
        customers.iter().filter(|c| predicate.matches(c)).count()
    }

    fn sample() -> Vec<Customer> {
        vec![
            customer("a", 500.0, true, Some(2)),
            customer("b", 1500.0, true, Some(45)),
            customer("c", 2500.0, false, Some(90)),
            customer("d", 1200.0, true, None),
            customer("e", 50.0, false, Some(10)),
        ]
    }

    #[test]
    fn test_and_combinator_builds_conjunction() {
        let rs = RuleSet::and(vec![
            Rule::new("total_spent", ">", json!(1000)),
            Rule::new("is_active", "==", json!("true")),
        ]);
        match compile(&rs, now()) {
            Predicate::All(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected conjunction, got {other:?}"),
        }
        assert_eq!(count(&rs, &sample()), 2);
    }

    #[test]
    fn test_or_combinator_builds_disjunction() {
        let rs = RuleSet::or(vec![
            Rule::new("total_spent", ">", json!(2000)),
            Rule::new("total_spent", "<", json!(100)),
        ]);
        assert!(matches!(compile(&rs, now()), Predicate::Any(_)));
        assert_eq!(count(&rs, &sample()), 2);
    }

    #[test]
    fn test_last_purchase_days_become_cutoff() {
        let rs = RuleSet::and(vec![Rule::new("last_purchase", ">", json!(30))]);
        let cutoff = now() - Duration::days(30);
        match compile(&rs, now()) {
            Predicate::All(parts) => assert_eq!(
                parts[0],
                Predicate::Compare {
                    path: FieldPathRepr(FieldPath::Mapped(CustomerField::LastPurchase)),
                    op: ComparisonOperator::LessThan,
                    operand: Operand::Timestamp(cutoff),
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_more_than_n_days_ago_matches_earlier_purchases() {
        let rs = RuleSet::and(vec![Rule::new("last_purchase", ">", json!(30))]);
        let cutoff = now() - Duration::days(30);
        let predicate = compile(&rs, now());
        for c in sample() {
            let expected = c.stats.last_purchase.map_or(false, |t| t < cutoff);
            assert_eq!(predicate.matches(&c), expected, "customer {}", c.id);
        }
        let matched: Vec<String> = sample()
            .into_iter()
            .filter(|c| predicate.matches(c))
            .map(|c| c.id)
            .collect();
        assert_eq!(matched, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_within_n_days() {
        let rs = RuleSet::and(vec![Rule::new("last_purchase", "<=", json!("30"))]);
        let predicate = compile(&rs, now());
        let matched: Vec<String> = sample()
            .into_iter()
            .filter(|c| predicate.matches(c))
            .map(|c| c.id)
            .collect();
        assert_eq!(matched, vec!["a".to_string(), "e".to_string()]);
    }

    #[test]
    fn test_unparseable_day_count_is_not_coerced() {
        let rs = RuleSet::and(vec![Rule::new("last_purchase", ">", json!("lately"))]);
        assert_eq!(count(&rs, &sample()), 0);
    }

    #[test]
    fn test_is_active_accepts_native_and_string() {
        let native = RuleSet::and(vec![Rule::new("is_active", "==", json!(true))]);
        let text = RuleSet::and(vec![Rule::new("is_active", "==", json!("true"))]);
        let falsy = RuleSet::and(vec![Rule::new("is_active", "==", json!("yes"))]);
        assert_eq!(count(&native, &sample()), 3);
        assert_eq!(count(&text, &sample()), 3);
        assert_eq!(count(&falsy, &sample()), 2);
    }

    #[test]
    fn test_unknown_operator_matches_everyone() {
        let rs = RuleSet::and(vec![Rule::new("total_spent", "~=", json!(1))]);
        assert_eq!(compile(&rs, now()), Predicate::All(vec![Predicate::Unconstrained]));
        assert_eq!(count(&rs, &sample()), sample().len());

        // Inside a disjunction it swallows every other rule.
        let rs = RuleSet::or(vec![
            Rule::new("total_spent", ">", json!(1_000_000)),
            Rule::new("city", "starts_with", json!("X")),
        ]);
        assert_eq!(count(&rs, &sample()), sample().len());
    }

    #[test]
    fn test_compile_is_deterministic_for_fixed_now() {
        let rs = RuleSet::or(vec![
            Rule::new("last_purchase", ">=", json!(7)),
            Rule::new("city", "contains", json!("pur")),
        ]);
        assert_eq!(compile(&rs, now()), compile(&rs, now()));
    }

    #[test]
    fn test_empty_rule_list_is_not_rejected_by_compile() {
        assert_eq!(count(&RuleSet::and(vec![]), &sample()), sample().len());
        assert_eq!(count(&RuleSet::or(vec![]), &sample()), 0);
        assert!(RuleSet::and(vec![]).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_composite_values() {
        let rs = RuleSet::and(vec![Rule::new("city", "==", json!(["Pune"]))]);
        assert!(rs.validate().is_err());
        let rs = RuleSet::and(vec![Rule::new(" ", "==", json!("Pune"))]);
        assert!(rs.validate().is_err());
        let rs = RuleSet::and(vec![Rule::new("city", "==", json!("Pune"))]);
        assert!(rs.validate().is_ok());
    }

    #[test]
    fn test_rule_set_wire_format() {
        let rs: RuleSet = serde_json::from_value(json!({
            "condition": "and",
            "rules": [
                {"field": "total_spent", "operator": ">", "value": 1000, "value_type": "number"},
                {"field": "is_active", "operator": "==", "value": "true"}
            ]
        }))
        .unwrap();
        assert_eq!(rs.combinator, Combinator::And);
        assert_eq!(rs.rules[0].value_type.as_deref(), Some("number"));

        let rs: RuleSet = serde_json::from_value(json!({
            "combinator": "OR",
            "rules": [{"field": "city", "operator": "contains", "value": "a"}]
        }))
        .unwrap();
        assert_eq!(rs.combinator, Combinator::Or);
    }
}
