//! UCP discovery document served at `/.well-known/ucp`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Protocol version date string advertised by this implementation.
pub const UCP_VERSION: &str = "2026-01-11";

/// Name of the shopping service entry.
pub const SHOPPING_SERVICE: &str = "dev.ucp.shopping";

/// Capability name for product search.
pub const CAP_PRODUCT_SEARCH: &str = "dev.ucp.shopping.product_search";

/// Capability name for checkout.
pub const CAP_CHECKOUT: &str = "dev.ucp.shopping.checkout";

/// REST binding of a UCP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestBinding {
    /// Absolute base URL of the service, e.g. `http://host/ucp/v1`.
    pub endpoint: String,
}

/// A UCP service entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Service version date.
    pub version: String,
    /// REST transport binding.
    pub rest: RestBinding,
}

/// A capability advertisement, optionally with extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Capability name, e.g. `dev.ucp.shopping.checkout`.
    pub name: String,
    /// Capability version date.
    pub version: String,
    /// Extension name to version map; checkout declares `ap2_mandate`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, String>,
}

/// The `ucp` block of the discovery document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UcpBlock {
    /// Protocol version date.
    pub version: String,
    /// Service name to entry map.
    pub services: BTreeMap<String, ServiceEntry>,
    /// Advertised capabilities.
    pub capabilities: Vec<Capability>,
}

/// AP2 payment capability advertisement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ap2PaymentBlock {
    /// Whether payment mandates are accepted.
    pub mandates_supported: bool,
    /// Whether OTP step-up verification is supported.
    pub otp_verification_supported: bool,
}

/// The `payment` block of the discovery document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentBlock {
    /// AP2 extension advertisement.
    pub ap2_payment: Ap2PaymentBlock,
}

/// The `merchant` identity block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantBlock {
    /// Stable merchant id; also the AP2 `merchant_agent` value.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Public base URL.
    pub url: String,
}

/// The full discovery document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// Protocol block.
    pub ucp: UcpBlock,
    /// Payment capabilities.
    pub payment: PaymentBlock,
    /// Merchant identity.
    pub merchant: MerchantBlock,
}

impl DiscoveryDocument {
    /// Builds the document a merchant with the given identity publishes.
    #[must_use]
    pub fn for_merchant(id: &str, name: &str, url: &str) -> Self {
        let mut services = BTreeMap::new();
        services.insert(
            SHOPPING_SERVICE.to_string(),
            ServiceEntry {
                version: UCP_VERSION.to_string(),
                rest: RestBinding {
                    endpoint: format!("{}/ucp/v1", url.trim_end_matches('/')),
                },
            },
        );

        let mut checkout_extensions = BTreeMap::new();
        checkout_extensions.insert("ap2_mandate".to_string(), UCP_VERSION.to_string());

        Self {
            ucp: UcpBlock {
                version: UCP_VERSION.to_string(),
                services,
                capabilities: vec![
                    Capability {
                        name: CAP_PRODUCT_SEARCH.to_string(),
                        version: UCP_VERSION.to_string(),
                        extensions: BTreeMap::new(),
                    },
                    Capability {
                        name: CAP_CHECKOUT.to_string(),
                        version: UCP_VERSION.to_string(),
                        extensions: checkout_extensions,
                    },
                ],
            },
            payment: PaymentBlock {
                ap2_payment: Ap2PaymentBlock {
                    mandates_supported: true,
                    otp_verification_supported: true,
                },
            },
            merchant: MerchantBlock {
                id: id.to_string(),
                name: name.to_string(),
                url: url.to_string(),
            },
        }
    }

    /// The shopping REST endpoint, if advertised.
    #[must_use]
    pub fn shopping_endpoint(&self) -> Option<&str> {
        self.ucp
            .services
            .get(SHOPPING_SERVICE)
            .map(|s| s.rest.endpoint.as_str())
    }

    /// Whether the checkout capability with the `ap2_mandate` extension is
    /// advertised.
    #[must_use]
    pub fn supports_ap2_checkout(&self) -> bool {
        self.ucp
            .capabilities
            .iter()
            .any(|c| c.name == CAP_CHECKOUT && c.extensions.contains_key("ap2_mandate"))
            && self.payment.ap2_payment.mandates_supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merchant_document() {
        let doc = DiscoveryDocument::for_merchant("merchant-001", "Store", "http://localhost:8453");
        assert_eq!(doc.ucp.version, UCP_VERSION);
        assert_eq!(
            doc.shopping_endpoint(),
            Some("http://localhost:8453/ucp/v1")
        );
        assert!(doc.supports_ap2_checkout());
        assert!(doc.payment.ap2_payment.otp_verification_supported);
        assert_eq!(doc.merchant.id, "merchant-001");
    }

    #[test]
    fn test_roundtrip() {
        let doc = DiscoveryDocument::for_merchant("m", "n", "http://u");
        let json = serde_json::to_string(&doc).unwrap();
        let back: DiscoveryDocument = serde_json::from_str(&json).unwrap();
        assert!(back.supports_ap2_checkout());
        assert_eq!(back.merchant.id, "m");
    }
}
