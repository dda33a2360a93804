//! Shopper service configuration.

use std::path::PathBuf;

use clap::Parser;

/// ucpay shopper service - UCP client with AP2 consumer agent
#[derive(Parser, Debug, Clone)]
#[command(name = "ucpay-shopper")]
#[command(version, about, long_about = None)]
pub struct ShopperConfig {
    /// Listen address
    #[arg(long, env = "UCPAY_SHOPPER_LISTEN", default_value = "127.0.0.1:8454")]
    pub listen: String,

    /// Merchant service base URL
    #[arg(
        long,
        env = "UCPAY_MERCHANT_URL",
        default_value = "http://localhost:8453"
    )]
    pub merchant_url: String,

    /// PAN encryption key, URL-safe base64 of 32 bytes. A fresh key is
    /// generated (and logged as a warning) when absent; cards encrypted
    /// under it do not survive a restart.
    #[arg(long, env = "UCPAY_PAN_KEY")]
    pub pan_key: Option<String>,

    /// Origin string bound into device assertions
    #[arg(long, env = "UCPAY_ORIGIN", default_value = "http://localhost:8454")]
    pub origin: String,

    /// Enable the network tokenization adapter
    #[arg(long, env = "UCPAY_TOKENIZATION_ENABLED")]
    pub tokenization_enabled: bool,

    /// OAuth1 consumer key for the card network
    #[arg(long, env = "UCPAY_OAUTH_CONSUMER_KEY")]
    pub oauth_consumer_key: Option<String>,

    /// Path to the OAuth1 RSA private key (PEM)
    #[arg(long, env = "UCPAY_OAUTH_SIGNING_KEY")]
    pub oauth_signing_key: Option<PathBuf>,

    /// Use the card network's production environment instead of the
    /// sandbox
    #[arg(long, env = "UCPAY_PRODUCTION_NETWORK")]
    pub production_network: bool,
}

impl ShopperConfig {
    /// Whether network calls target the sandbox environment.
    #[must_use]
    pub const fn sandbox(&self) -> bool {
        !self.production_network
    }
}

impl Default for ShopperConfig {
    fn default() -> Self {
        Self::parse_from::<_, &str>([])
    }
}
