//! Shared domain types, configuration, errors, persistence contracts and
//! the delivery event bus.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::{CampaignError, CampaignResult};
