//! Campaign delivery simulator — batched record creation, the probabilistic
//! delivery funnel, receipt handling and stats aggregation.

pub mod funnel;
pub mod log_store;
pub mod scheduler;
pub mod simulator;
pub mod stats;

pub use funnel::{FunnelDriver, FunnelRng, FunnelStage};
pub use log_store::InMemoryLogStore;
pub use scheduler::FunnelScheduler;
pub use simulator::{DeliverySimulator, SIMULATED_FAILURE_REASON};
pub use stats::{campaign_stats, refresh_funnel, DispatchTally, FunnelCounts};
