use serde::Deserialize;
use std::time::Duration;

use crate::error::{CampaignError, CampaignResult};

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPAIGN_EXPRESS__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    /// Sample customers returned by a segment preview.
    #[serde(default = "default_preview_sample_size")]
    pub preview_sample_size: usize,
    /// Rows kept in the occupation and city distributions.
    #[serde(default = "default_preview_top_n")]
    pub preview_top_n: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Probability that a record is created `queued` rather than `failed`.
    #[serde(default = "default_send_success_rate")]
    pub send_success_rate: f64,
    #[serde(default = "default_delivery_rate")]
    pub delivery_rate: f64,
    #[serde(default = "default_open_rate")]
    pub open_rate: f64,
    #[serde(default = "default_click_rate")]
    pub click_rate: f64,
    #[serde(default = "default_delivery_delay")]
    pub delivery_delay: DelayWindow,
    #[serde(default = "default_open_delay")]
    pub open_delay: DelayWindow,
    #[serde(default = "default_click_delay")]
    pub click_delay: DelayWindow,
    /// Fixed seed for the funnel RNG. `None` seeds from entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

/// Half-open delay range `[min_ms, max_ms)` for one funnel stage.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct DelayWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayWindow {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

// Default functions
fn default_node_id() -> String {
    crate::event_bus::DEFAULT_NODE_ID.to_string()
}
fn default_preview_sample_size() -> usize {
    5
}
fn default_preview_top_n() -> usize {
    5
}
fn default_batch_size() -> usize {
    100
}
fn default_send_success_rate() -> f64 {
    0.9
}
fn default_delivery_rate() -> f64 {
    0.95
}
fn default_open_rate() -> f64 {
    0.7
}
fn default_click_rate() -> f64 {
    0.3
}
fn default_delivery_delay() -> DelayWindow {
    DelayWindow::new(0, 5_000)
}
fn default_open_delay() -> DelayWindow {
    DelayWindow::new(0, 10_000)
}
fn default_click_delay() -> DelayWindow {
    DelayWindow::new(0, 15_000)
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            preview_sample_size: default_preview_sample_size(),
            preview_top_n: default_preview_top_n(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            send_success_rate: default_send_success_rate(),
            delivery_rate: default_delivery_rate(),
            open_rate: default_open_rate(),
            click_rate: default_click_rate(),
            delivery_delay: default_delivery_delay(),
            open_delay: default_open_delay(),
            click_delay: default_click_delay(),
            rng_seed: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            segmentation: SegmentationConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> CampaignResult<()> {
        if self.batch_size == 0 {
            return Err(CampaignError::Validation(
                "delivery.batch_size must be at least 1".into(),
            ));
        }
        for (name, p) in [
            ("send_success_rate", self.send_success_rate),
            ("delivery_rate", self.delivery_rate),
            ("open_rate", self.open_rate),
            ("click_rate", self.click_rate),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(CampaignError::Validation(format!(
                    "delivery.{name} must be within [0, 1], got {p}"
                )));
            }
        }
        for (name, window) in [
            ("delivery_delay", self.delivery_delay),
            ("open_delay", self.open_delay),
            ("click_delay", self.click_delay),
        ] {
            if window.min_ms > window.max_ms {
                return Err(CampaignError::Validation(format!(
                    "delivery.{name}: min_ms {} exceeds max_ms {}",
                    window.min_ms, window.max_ms
                )));
            }
        }
        Ok(())
    }

    /// Upper bound on how long a record can spend in the funnel.
    pub fn max_funnel_duration(&self) -> Duration {
        self.delivery_delay.max() + self.open_delay.max() + self.click_delay.max()
    }
}

impl AppConfig {
    /// Load configuration from environment variables, layered over an
    /// optional TOML file.
    pub fn load(file: Option<&str>) -> CampaignResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CAMPAIGN_EXPRESS")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.delivery.validate()?;
        Ok(config)
    }
}
