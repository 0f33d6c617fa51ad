//! Customer directory — the external store compiled predicates run against.
//!
//! Production deployments back this with the customer document store; the
//! in-memory directory provides the same API surface for development and
//! testing.

use async_trait::async_trait;
use campaign_core::types::Customer;
use campaign_core::CampaignResult;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::predicates::Predicate;

#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

/// Grouping key for [`CustomerDirectory::aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    /// A single group holding every matched customer.
    All,
    Gender,
    City,
    Occupation,
    AgeBand,
    PurchaseFrequency,
}

/// One aggregated group. Missing keys are reported as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRow {
    pub key: Option<String>,
    pub count: u64,
    pub total_spent: f64,
    pub min_spent: f64,
    pub max_spent: f64,
    pub total_orders: u64,
    pub active: u64,
}

impl GroupRow {
    fn empty(key: Option<String>) -> Self {
        Self {
            key,
            count: 0,
            total_spent: 0.0,
            min_spent: f64::INFINITY,
            max_spent: f64::NEG_INFINITY,
            total_orders: 0,
            active: 0,
        }
    }

    fn fold(&mut self, customer: &Customer) {
        let spent = customer.stats.total_spent;
        self.count += 1;
        self.total_spent += spent;
        self.min_spent = self.min_spent.min(spent);
        self.max_spent = self.max_spent.max(spent);
        self.total_orders += u64::from(customer.stats.order_count);
        if customer.is_active {
            self.active += 1;
        }
    }
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn count(&self, predicate: &Predicate) -> CampaignResult<u64>;

    async fn find(&self, predicate: &Predicate, options: FindOptions) -> CampaignResult<Vec<Customer>>;

    /// Group matched customers by `key`. Rows come back ordered by key.
    async fn aggregate(&self, predicate: &Predicate, key: GroupKey) -> CampaignResult<Vec<GroupRow>>;

    /// Look up a single customer by id.
    async fn get(&self, id: &str) -> CampaignResult<Option<Customer>>;
}

pub fn age_band(age: u32) -> &'static str {
    match age {
        0..=17 => "Under 18",
        18..=24 => "18-24",
        25..=34 => "25-34",
        35..=44 => "35-44",
        45..=54 => "45-54",
        55..=64 => "55-64",
        _ => "65+",
    }
}

pub fn purchase_frequency_band(order_count: u32) -> &'static str {
    match order_count {
        0 => "No Orders",
        1 => "1 Order",
        2..=3 => "2-3 Orders",
        4..=5 => "4-5 Orders",
        _ => "5+ Orders",
    }
}

fn group_key(customer: &Customer, key: GroupKey) -> Option<String> {
    match key {
        GroupKey::All => None,
        GroupKey::Gender => customer.demographics.gender.clone(),
        GroupKey::City => customer.address.city.clone(),
        GroupKey::Occupation => customer.demographics.occupation.clone(),
        GroupKey::AgeBand => Some(age_band(customer.demographics.age.unwrap_or(0)).to_string()),
        GroupKey::PurchaseFrequency => {
            Some(purchase_frequency_band(customer.stats.order_count).to_string())
        }
    }
}

/// Thread-safe in-memory customer directory backed by DashMap.
pub struct InMemoryDirectory {
    customers: DashMap<String, Customer>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            customers: DashMap::new(),
        }
    }

    pub fn with_customers(customers: impl IntoIterator<Item = Customer>) -> Self {
        let directory = Self::new();
        for customer in customers {
            directory.upsert(customer);
        }
        info!(customers = directory.len(), "In-memory customer directory loaded");
        directory
    }

    pub fn upsert(&self, customer: Customer) {
        self.customers.insert(customer.id.clone(), customer);
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    /// Matching customers ordered by id.
    fn matching(&self, predicate: &Predicate) -> Vec<Customer> {
        let mut matched: Vec<Customer> = self
            .customers
            .iter()
            .filter(|entry| predicate.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryDirectory {
    async fn count(&self, predicate: &Predicate) -> CampaignResult<u64> {
        Ok(self
            .customers
            .iter()
            .filter(|entry| predicate.matches(entry.value()))
            .count() as u64)
    }

    async fn find(&self, predicate: &Predicate, options: FindOptions) -> CampaignResult<Vec<Customer>> {
        let mut matched = self.matching(predicate);
        if let Some(limit) = options.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn aggregate(&self, predicate: &Predicate, key: GroupKey) -> CampaignResult<Vec<GroupRow>> {
        let mut groups: BTreeMap<Option<String>, GroupRow> = BTreeMap::new();
        for customer in self.matching(predicate) {
            let k = group_key(&customer, key);
            groups
                .entry(k.clone())
                .or_insert_with(|| GroupRow::empty(k))
                .fold(&customer);
        }
        Ok(groups.into_values().collect())
    }

    async fn get(&self, id: &str) -> CampaignResult<Option<Customer>> {
        Ok(self.customers.get(id).map(|c| c.value().clone()))
    }
}
