//! ucpay-shopper - UCP shopper service daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use ucpay_shopper::client::MerchantClient;
use ucpay_shopper::credentials::CredentialsProvider;
use ucpay_shopper::device::SoftwareAuthenticator;
use ucpay_shopper::http::{router, ShopperState};
use ucpay_shopper::oauth1::OAuth1Signer;
use ucpay_shopper::orchestrator::CheckoutOrchestrator;
use ucpay_shopper::tokenization::{NetworkTokenization, NoopTokenization, TokenizationAdapter};
use ucpay_shopper::vault::PanVault;
use ucpay_shopper::ShopperConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ShopperConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let vault = match &config.pan_key {
        Some(key) => PanVault::from_encoded_key(key).context("invalid --pan-key")?,
        None => {
            let key = PanVault::generate_key();
            tracing::warn!(
                "no PAN encryption key configured; generated an ephemeral one. \
                 Set UCPAY_PAN_KEY={key} to persist cards across restarts"
            );
            PanVault::from_encoded_key(&key).expect("freshly generated key")
        }
    };

    let tokenization: Arc<dyn TokenizationAdapter> = build_tokenization(&config)?;

    let credentials = Arc::new(CredentialsProvider::new(vault, config.origin.clone()));
    let device = Arc::new(SoftwareAuthenticator::new());
    let client = Arc::new(MerchantClient::new(config.merchant_url.clone()));
    let orchestrator = CheckoutOrchestrator::new(
        Arc::clone(&client),
        Arc::clone(&credentials),
        Arc::clone(&tokenization),
    );

    // Discover the merchant up front so misconfiguration shows at start.
    match client.discover().await {
        Ok(document) => {
            tracing::info!(merchant = %document.merchant.name, "merchant reachable");
        }
        Err(error) => {
            tracing::warn!(%error, "merchant discovery failed; will retry on first checkout");
        }
    }

    let state = Arc::new(ShopperState {
        credentials,
        device,
        client,
        orchestrator,
        tokenization,
    });

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(
        listen = %config.listen,
        merchant_url = %config.merchant_url,
        "ucpay shopper service started"
    );

    axum::serve(listener, router(state))
        .await
        .context("server error")?;

    Ok(())
}

fn build_tokenization(config: &ShopperConfig) -> Result<Arc<dyn TokenizationAdapter>> {
    if !config.tokenization_enabled {
        return Ok(Arc::new(NoopTokenization));
    }

    let (Some(consumer_key), Some(key_path)) =
        (&config.oauth_consumer_key, &config.oauth_signing_key)
    else {
        tracing::warn!(
            "tokenization enabled but OAuth1 credentials incomplete; running without it"
        );
        return Ok(Arc::new(NoopTokenization));
    };

    match OAuth1Signer::from_pem_file(consumer_key.clone(), key_path) {
        Ok(signer) => {
            tracing::info!(sandbox = config.sandbox(), "network tokenization enabled");
            Ok(Arc::new(NetworkTokenization::new(signer, config.sandbox())))
        }
        Err(error) => {
            tracing::warn!(%error, "cannot load OAuth1 signing key; running without tokenization");
            Ok(Arc::new(NoopTokenization))
        }
    }
}
