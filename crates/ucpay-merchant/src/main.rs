//! ucpay-merchant - UCP merchant service daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use ucpay_merchant::agent::{AgentConfig, MerchantAgent};
use ucpay_merchant::catalog::Catalog;
use ucpay_merchant::challenge::ChallengeStore;
use ucpay_merchant::credentials::CredentialRegistry;
use ucpay_merchant::http::{router, MerchantState};
use ucpay_merchant::manager::CheckoutManager;
use ucpay_merchant::recorder::RequestLogStore;
use ucpay_merchant::signer::ReceiptSigner;
use ucpay_merchant::store::InMemorySessionStore;
use ucpay_merchant::MerchantConfig;

/// How often the expiry sweeper runs.
const SWEEP_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    let config = MerchantConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let catalog = Arc::new(Catalog::seeded());
    let credentials = Arc::new(CredentialRegistry::new());
    let agent = MerchantAgent::new(
        AgentConfig {
            merchant_id: config.merchant_id.clone(),
            step_up_enabled: config.step_up_enabled,
            amount_threshold: config.otp_amount_threshold,
            threshold_small: config.threshold_small,
            threshold_large: config.threshold_large,
        },
        Arc::clone(&credentials),
        ReceiptSigner::new(config.signer_url.clone()),
    );
    let manager = CheckoutManager::new(
        Arc::new(InMemorySessionStore::new()),
        agent,
        ChallengeStore::new(config.demo_mode()),
        Some(Arc::clone(&catalog)),
    );

    let state = Arc::new(MerchantState {
        config: config.clone(),
        catalog,
        manager,
        credentials,
        logs: Arc::new(RequestLogStore::default()),
    });

    // Background sweep for sessions that sat too long awaiting completion.
    let sweeper_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let swept = sweeper_state.manager.sweep_expired().await;
            if swept > 0 {
                tracing::info!(swept, "expired checkout sessions failed");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(
        listen = %config.listen,
        merchant_id = %config.merchant_id,
        step_up_enabled = config.step_up_enabled,
        "ucpay merchant service started"
    );

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
