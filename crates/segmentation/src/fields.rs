//! Field mapper — logical rule field names to customer storage paths, plus
//! the two value coercions rules rely on.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Customer attributes with a fixed storage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomerField {
    TotalSpent,
    OrderCount,
    LastPurchase,
    City,
    IsActive,
    Age,
    Gender,
    Occupation,
}

impl CustomerField {
    pub const ALL: [CustomerField; 8] = [
        CustomerField::TotalSpent,
        CustomerField::OrderCount,
        CustomerField::LastPurchase,
        CustomerField::City,
        CustomerField::IsActive,
        CustomerField::Age,
        CustomerField::Gender,
        CustomerField::Occupation,
    ];

    pub fn from_rule_field(name: &str) -> Option<Self> {
        match name {
            "total_spent" => Some(CustomerField::TotalSpent),
            "order_count" => Some(CustomerField::OrderCount),
            "last_purchase" => Some(CustomerField::LastPurchase),
            "city" => Some(CustomerField::City),
            "is_active" => Some(CustomerField::IsActive),
            "age" => Some(CustomerField::Age),
            "gender" => Some(CustomerField::Gender),
            "occupation" => Some(CustomerField::Occupation),
            _ => None,
        }
    }

    pub fn storage_path(self) -> &'static str {
        match self {
            CustomerField::TotalSpent => "stats.total_spent",
            CustomerField::OrderCount => "stats.order_count",
            CustomerField::LastPurchase => "stats.last_purchase",
            CustomerField::City => "address.city",
            CustomerField::IsActive => "is_active",
            CustomerField::Age => "demographics.age",
            CustomerField::Gender => "demographics.gender",
            CustomerField::Occupation => "demographics.occupation",
        }
    }
}

/// Where a rule's field lives on the customer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPath {
    Mapped(CustomerField),
    /// Unmapped field, looked up verbatim in the customer's attributes.
    Passthrough(String),
}

impl FieldPath {
    pub fn resolve(field: &str) -> Self {
        match CustomerField::from_rule_field(field) {
            Some(known) => FieldPath::Mapped(known),
            None => FieldPath::Passthrough(field.to_string()),
        }
    }

    pub fn storage_path(&self) -> &str {
        match self {
            FieldPath::Mapped(field) => field.storage_path(),
            FieldPath::Passthrough(name) => name,
        }
    }
}

/// Rewrite a day count into the instant `now - days`. Accepts integers and
/// strings with a leading integer; anything else yields `None`.
pub fn days_ago_cutoff(value: &Value, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let days = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?,
        Value::String(s) => leading_integer(s)?,
        _ => return None,
    };
    now.checked_sub_signed(Duration::try_days(days)?)
}

/// `true` and `"true"` are truthy; everything else is false.
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

fn leading_integer(s: &str) -> Option<i64> {
    let trimmed = s.trim_start();
    let sign_len = usize::from(trimmed.starts_with(['-', '+']));
    let digits = trimmed[sign_len..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    trimmed[..sign_len + digits].parse().ok()
}
