//! Campaign management backend — owner-scoped segments and campaigns,
//! campaign dispatch, communication logs and delivery receipts.
//!
//! Data stored in DashMap (development); swap the stores for the document
//! store in production.

pub mod models;
pub mod service;
pub mod store;

pub use models::{CampaignSummary, CommunicationLogEntry, CreateCampaignRequest, DeliveryReceipt};
pub use service::CampaignService;
pub use store::ManagementStore;
