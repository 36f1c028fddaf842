//! Example x402 client.
//!
//! Fetches one paid resource through the retry envelope, printing the
//! response and any settlement the server reported.
//!
//! Run with:
//! ```bash
//! cargo run --example client
//! ```
//!
//! Environment variables (a `.env` file is honored):
//! - PRIVATE_KEY: key used to sign payments
//! - API_URL: the protected API endpoint to access
//! - X402_MAX_RETRIES, X402_BASE_DELAY_MS, X402_MAX_DELAY_MS,
//!   X402_NONCE_CONFLICT_DELAY_MS: retry tuning
//! - X402_VERBOSE: log every state transition at info level

use anyhow::Context;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use x402_envelope::config::RetryConfig;
use x402_envelope::executor::{OutgoingRequest, ReqwestExecutor};
use x402_envelope::retry::{FlowOutcome, RetryCoordinator};
use x402_envelope::signers::local_key::LocalKeySigner;
use x402_envelope::signers::StructuredDataSigner;

fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .with_context(|| format!("{name} has an invalid value: {value}")),
        Err(_) => Ok(None),
    }
}

fn config_from_env() -> anyhow::Result<RetryConfig> {
    let mut config = RetryConfig::new();
    if let Some(max_retries) = env_parse::<u32>("X402_MAX_RETRIES")? {
        config = config.with_max_retries(max_retries);
    }
    if let Some(ms) = env_parse::<u64>("X402_BASE_DELAY_MS")? {
        config = config.with_base_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = env_parse::<u64>("X402_MAX_DELAY_MS")? {
        config = config.with_max_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = env_parse::<u64>("X402_NONCE_CONFLICT_DELAY_MS")? {
        config = config.with_nonce_conflict_delay(Duration::from_millis(ms));
    }
    if let Some(verbose) = env_parse::<bool>("X402_VERBOSE")? {
        config = config.with_verbose(verbose);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let private_key = std::env::var("PRIVATE_KEY").unwrap_or_else(|_| {
        println!("⚠️  No PRIVATE_KEY set, using example key (DO NOT USE IN PRODUCTION)");
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string()
    });
    let api_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000/weather".to_string());

    let config = config_from_env()?;
    let signer = Arc::new(LocalKeySigner::new(&private_key)?);

    println!("🔐 x402 Example Client");
    println!("   Payer: {}", signer.address());
    println!("   API: {}", api_url);
    println!(
        "   Retries: {} (base {:?}, max {:?}, nonce conflict {:?})",
        config.max_retries, config.base_delay, config.max_delay, config.nonce_conflict_delay
    );
    println!();

    let coordinator = RetryCoordinator::new(config, Arc::new(ReqwestExecutor::new()), signer);
    let request = OutgoingRequest::get(&api_url)?;

    println!("📡 Making request to protected endpoint...");
    match coordinator.run(&request).await {
        FlowOutcome::Done(success) => {
            println!("✅ Response status: {}", success.response.status);
            println!(
                "   Attempts: {} ({} retries)",
                success.state.attempt, success.state.retry_count
            );
            if let Some(settlement) = &success.settlement {
                println!("💰 Payment settled:");
                println!("{}", serde_json::to_string_pretty(settlement)?);
            } else if !success.paid {
                println!("   No payment was required");
            }
            match success.response.json() {
                Some(body) => println!("📦 Response body:\n{}", serde_json::to_string_pretty(body)?),
                None => println!("📦 Response body: {:?}", success.response.body),
            }
        }
        FlowOutcome::Failed(failure) => {
            println!("❌ Request failed ({}): {}", failure.classification, failure.error);
        }
        FlowOutcome::Exhausted(failure) => {
            println!(
                "⏳ Gave up after {} retries ({}): {}",
                failure.state.retry_count, failure.classification, failure.error
            );
        }
    }

    Ok(())
}
