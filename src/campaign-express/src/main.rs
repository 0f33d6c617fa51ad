//! Campaign Express — customer segmentation and campaign delivery simulation.
//!
//! Seeds a synthetic customer directory, builds a segment from a rule set,
//! launches a campaign against it and prints the resulting campaign.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::{info, warn};

use campaign_core::config::AppConfig;
use campaign_core::types::Customer;
use campaign_management::{CampaignService, CreateCampaignRequest};
use campaign_segmentation::{InMemoryDirectory, NewSegment, Rule, RuleSet};

const OPERATOR: &str = "cli";
const CITIES: &[&str] = &["Lyon", "Porto", "Leeds", "Utrecht", "Graz"];
const OCCUPATIONS: &[&str] = &["Engineer", "Teacher", "Nurse", "Designer", "Accountant"];
const GENDERS: &[&str] = &["female", "male", "non-binary"];

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Parser, Debug)]
#[command(name = "campaign-express")]
#[command(about = "Customer segmentation and campaign delivery simulation")]
#[command(version)]
struct Cli {
    /// Optional TOML config file, layered under CAMPAIGN_EXPRESS__* variables
    #[arg(long, env = "CAMPAIGN_EXPRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// Number of synthetic customers to seed the directory with
    #[arg(long, default_value_t = 1000)]
    customers: usize,

    /// JSON rule set file; defaults to active customers who spent over 1000
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Seed for the synthetic directory and the delivery funnel
    #[arg(long)]
    seed: Option<u64>,

    /// Wait for the delivery funnel to settle and report refreshed stats
    #[arg(long, default_value_t = false)]
    wait: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "campaign_express=info,campaign_delivery=info".into());
    match cli.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).pretty().init(),
    }

    info!("Campaign Express starting up");

    // Load configuration
    let config_path = cli.config.as_deref().and_then(|p| p.to_str());
    let mut config = AppConfig::load(config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(seed) = cli.seed {
        config.delivery.rng_seed = Some(seed);
    }

    info!(
        node_id = %config.node_id,
        batch_size = config.delivery.batch_size,
        customers = cli.customers,
        "Configuration loaded"
    );

    let rules = match &cli.rules {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading rule set {}", path.display()))?;
            serde_json::from_str::<RuleSet>(&raw)
                .with_context(|| format!("parsing rule set {}", path.display()))?
        }
        None => RuleSet::and(vec![
            Rule::new("total_spent", ">", json!(1000)),
            Rule::new("is_active", "==", json!("true")),
        ]),
    };

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let directory = Arc::new(InMemoryDirectory::with_customers(synthetic_customers(
        cli.customers,
        &mut rng,
    )));
    let service = CampaignService::new(&config, directory)?;

    let segment = service
        .create_segment(
            NewSegment {
                name: "CLI segment".into(),
                description: Some("Built from the command line".into()),
                rules,
            },
            OPERATOR,
        )
        .await?;
    info!(segment_id = %segment.id, estimated = segment.estimated_count, "Segment ready");

    let campaign = service
        .create_campaign(
            CreateCampaignRequest::new(
                "CLI campaign",
                segment.id,
                "A little something for you",
                "Hi {{name}}, here is an offer picked for you.",
            ),
            OPERATOR,
        )
        .await?;
    service.wait_for_dispatch(campaign.id).await?;

    if cli.wait {
        let settle = config.delivery.max_funnel_duration();
        info!(seconds = settle.as_secs(), "Waiting for the delivery funnel to settle");
        tokio::time::sleep(settle).await;
        service.recompute_stats(campaign.id, OPERATOR).await?;
    }

    let campaign = service.get_campaign(campaign.id, OPERATOR)?;
    println!("{}", serde_json::to_string_pretty(&campaign)?);
    Ok(())
}

fn synthetic_customers(count: usize, rng: &mut StdRng) -> Vec<Customer> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let mut customer = Customer::new(format!("cust-{i:06}"), format!("Customer {i}"));
            customer.email = Some(format!("customer{i}@example.com"));
            customer.is_active = rng.gen_bool(0.8);
            customer.stats.total_spent = (rng.gen_range(0.0..3000.0_f64) * 100.0).round() / 100.0;
            customer.stats.order_count = rng.gen_range(0..12);
            if customer.stats.order_count > 0 {
                customer.stats.last_purchase =
                    Some(now - Duration::days(rng.gen_range(0..365)));
            }
            customer.demographics.age = Some(rng.gen_range(16..80));
            customer.demographics.gender = GENDERS.choose(rng).map(|g| g.to_string());
            customer.demographics.occupation = OCCUPATIONS.choose(rng).map(|o| o.to_string());
            customer.address.city = CITIES.choose(rng).map(|c| c.to_string());
            customer
        })
        .collect()
}
