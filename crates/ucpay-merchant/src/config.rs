//! Merchant service configuration.

use clap::Parser;
use ucpay_core::risk::{DEFAULT_THRESHOLD_LARGE, DEFAULT_THRESHOLD_SMALL};

/// ucpay merchant service - UCP server with AP2 payment mandates
#[derive(Parser, Debug, Clone)]
#[command(name = "ucpay-merchant")]
#[command(version, about, long_about = None)]
pub struct MerchantConfig {
    /// Listen address
    #[arg(long, env = "UCPAY_LISTEN", default_value = "127.0.0.1:8453")]
    pub listen: String,

    /// Stable merchant id, advertised in discovery and bound into risk
    /// decisions
    #[arg(long, env = "UCPAY_MERCHANT_ID", default_value = "merchant-001")]
    pub merchant_id: String,

    /// Merchant display name
    #[arg(
        long,
        env = "UCPAY_MERCHANT_NAME",
        default_value = "Enhanced Business Store"
    )]
    pub merchant_name: String,

    /// Public base URL, advertised in discovery
    #[arg(
        long,
        env = "UCPAY_MERCHANT_URL",
        default_value = "http://localhost:8453"
    )]
    pub merchant_url: String,

    /// Enable step-up (OTP) challenges
    #[arg(long, env = "UCPAY_STEP_UP_ENABLED")]
    pub step_up_enabled: bool,

    /// Totals at or above this amount use the larger step-up probability
    /// band
    #[arg(long, env = "UCPAY_OTP_AMOUNT_THRESHOLD", default_value_t = 100.0)]
    pub otp_amount_threshold: f64,

    /// Step-up probability for totals below the amount threshold
    #[arg(long, default_value_t = DEFAULT_THRESHOLD_SMALL)]
    pub threshold_small: f64,

    /// Step-up probability for totals at or above the amount threshold
    #[arg(long, default_value_t = DEFAULT_THRESHOLD_LARGE)]
    pub threshold_large: f64,

    /// Optional DID signing service endpoint for receipt signatures;
    /// receipts go unsigned when absent or unreachable
    #[arg(long, env = "UCPAY_SIGNER_URL")]
    pub signer_url: Option<String>,

    /// Issue random step-up codes stored as salted hashes. Without this
    /// flag the service runs in demo mode with the well-known code
    /// 123456.
    #[arg(long, env = "UCPAY_PRODUCTION_OTP")]
    pub production_otp: bool,
}

impl MerchantConfig {
    /// Whether step-up challenges use the fixed demo code.
    #[must_use]
    pub const fn demo_mode(&self) -> bool {
        !self.production_otp
    }
}

impl Default for MerchantConfig {
    fn default() -> Self {
        Self::parse_from::<_, &str>([])
    }
}
