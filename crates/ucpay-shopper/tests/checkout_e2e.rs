//! End-to-end purchase flows: a real merchant service on a loopback
//! listener, driven by the real shopper components over HTTP.

use std::sync::Arc;

use ucpay_core::checkout::{LineItem, SessionStatus};
use ucpay_core::encoding;
use ucpay_core::error::ErrorKind;
use ucpay_core::mandate::PaymentMandate;
use ucpay_core::receipt::ReceiptCode;
use ucpay_merchant::agent::{AgentConfig, MerchantAgent};
use ucpay_merchant::catalog::Catalog;
use ucpay_merchant::challenge::{ChallengeStore, DEMO_OTP_CODE};
use ucpay_merchant::credentials::CredentialRegistry;
use ucpay_merchant::http::{router, MerchantState};
use ucpay_merchant::manager::CheckoutManager;
use ucpay_merchant::recorder::{LogKind, RequestLogStore};
use ucpay_merchant::signer::ReceiptSigner;
use ucpay_merchant::store::InMemorySessionStore;
use ucpay_merchant::MerchantConfig;
use ucpay_shopper::client::MerchantClient;
use ucpay_shopper::credentials::{CredentialsProvider, DEMO_PAN};
use ucpay_shopper::device::SoftwareAuthenticator;
use ucpay_shopper::oauth1::OAuth1Signer;
use ucpay_shopper::orchestrator::{ChallengeSource, CheckoutOrchestrator, ConfirmOutcome};
use ucpay_shopper::tokenization::{NetworkTokenization, NoopTokenization, TokenizationAdapter};
use ucpay_shopper::vault::PanVault;

const BUYER: &str = "a@example.com";

struct Merchant {
    base_url: String,
    state: Arc<MerchantState>,
}

/// Starts a merchant on a random loopback port. `force_step_up` widens
/// the low probability band to 1.0 so every draw demands a challenge.
async fn spawn_merchant(step_up_enabled: bool, force_step_up: bool) -> Merchant {
    let mut config = MerchantConfig::default();
    config.step_up_enabled = step_up_enabled;
    if force_step_up {
        config.threshold_small = 1.0;
        config.threshold_large = 1.0;
    }

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
        ReceiptSigner::disabled(),
    );
    let manager = CheckoutManager::new(
        Arc::new(InMemorySessionStore::new()),
        agent,
        ChallengeStore::new(true),
        Some(Arc::clone(&catalog)),
    );
    let state = Arc::new(MerchantState {
        config,
        catalog,
        manager,
        credentials,
        logs: Arc::new(RequestLogStore::default()),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let app = router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Merchant { base_url, state }
}

struct Shopper {
    credentials: Arc<CredentialsProvider>,
    device: Arc<SoftwareAuthenticator>,
    client: Arc<MerchantClient>,
    orchestrator: CheckoutOrchestrator,
}

fn shopper_for(merchant: &Merchant, tokenization: Arc<dyn TokenizationAdapter>) -> Shopper {
    let vault = PanVault::from_encoded_key(&PanVault::generate_key()).unwrap();
    let credentials = Arc::new(CredentialsProvider::new(vault, "http://localhost:8454"));
    let device = Arc::new(SoftwareAuthenticator::new());
    let client = Arc::new(MerchantClient::new(merchant.base_url.clone()));
    let orchestrator = CheckoutOrchestrator::new(
        Arc::clone(&client),
        Arc::clone(&credentials),
        tokenization,
    );
    Shopper {
        credentials,
        device,
        client,
        orchestrator,
    }
}

/// Enrolls the buyer and registers the device credential with the
/// merchant.
async fn enroll(shopper: &Shopper) {
    let enrollment = shopper
        .credentials
        .register(BUYER, "Alice Example", &shopper.device)
        .unwrap();
    shopper
        .client
        .register_credential(&ucpay_core::enrollment::RegisterCredentialRequest {
            payer_email: BUYER.into(),
            credential_id: enrollment.credential_id,
            public_key: enrollment.public_key,
        })
        .await
        .unwrap();
}

fn cookie_cart() -> Vec<LineItem> {
    vec![LineItem {
        sku: "PROD-001".into(),
        name: "Chocochip Cookies".into(),
        quantity: 2,
        unit_price: 4.99,
    }]
}

/// prepare + sign + confirm in one step.
async fn purchase(shopper: &Shopper) -> (String, ConfirmOutcome) {
    let prepared = shopper
        .orchestrator
        .prepare(cookie_cart(), BUYER, "SGD")
        .await
        .unwrap();
    let authorization = shopper
        .credentials
        .authorize_mandate(BUYER, &prepared.contents, &shopper.device)
        .unwrap();
    let outcome = shopper
        .orchestrator
        .confirm(&prepared.session_id, authorization)
        .await
        .unwrap();
    (prepared.session_id, outcome)
}

#[tokio::test]
async fn happy_path_without_step_up() {
    let merchant = spawn_merchant(false, false).await;
    let shopper = shopper_for(&merchant, Arc::new(NoopTokenization));
    enroll(&shopper).await;

    let (session_id, outcome) = purchase(&shopper).await;
    let ConfirmOutcome::Success(receipt) = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(receipt.payment_status.code, ReceiptCode::Success);
    assert_eq!(receipt.amount.currency, "SGD");
    assert!((receipt.amount.value - 9.98).abs() < 1e-9);
    assert_eq!(receipt.payment_method_details, None);

    let session = shopper.client.get_session(&session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Complete);
    assert_eq!(session.receipt.unwrap().payment_id, receipt.payment_id);
}

#[tokio::test]
async fn repeated_confirm_returns_cached_receipt() {
    let merchant = spawn_merchant(false, false).await;
    let shopper = shopper_for(&merchant, Arc::new(NoopTokenization));
    enroll(&shopper).await;

    let prepared = shopper
        .orchestrator
        .prepare(cookie_cart(), BUYER, "SGD")
        .await
        .unwrap();
    let authorization = shopper
        .credentials
        .authorize_mandate(BUYER, &prepared.contents, &shopper.device)
        .unwrap();

    let first = shopper
        .orchestrator
        .confirm(&prepared.session_id, authorization.clone())
        .await
        .unwrap();
    let second = shopper
        .orchestrator
        .confirm(&prepared.session_id, authorization)
        .await
        .unwrap();

    let (ConfirmOutcome::Success(a), ConfirmOutcome::Success(b)) = (first, second) else {
        panic!("expected two successes");
    };
    assert_eq!(
        serde_json::to_vec(&a).unwrap(),
        serde_json::to_vec(&b).unwrap()
    );
}

#[tokio::test]
async fn step_up_with_valid_code() {
    let merchant = spawn_merchant(true, true).await;
    let shopper = shopper_for(&merchant, Arc::new(NoopTokenization));
    enroll(&shopper).await;

    let (session_id, outcome) = purchase(&shopper).await;
    let ConfirmOutcome::OtpRequired { challenge, source } = outcome else {
        panic!("expected otp_required, got {outcome:?}");
    };
    assert_eq!(source, ChallengeSource::Merchant);
    assert!(!challenge.payment_mandate_id.is_empty());

    let outcome = shopper
        .orchestrator
        .submit_otp(&session_id, DEMO_OTP_CODE)
        .await
        .unwrap();
    let ConfirmOutcome::Success(receipt) = outcome else {
        panic!("expected success after otp, got {outcome:?}");
    };
    assert_eq!(receipt.payment_status.code, ReceiptCode::Success);
}

#[tokio::test]
async fn step_up_exhausts_after_three_wrong_codes() {
    let merchant = spawn_merchant(true, true).await;
    let shopper = shopper_for(&merchant, Arc::new(NoopTokenization));
    enroll(&shopper).await;

    let (session_id, outcome) = purchase(&shopper).await;
    assert!(matches!(outcome, ConfirmOutcome::OtpRequired { .. }));

    for _ in 0..2 {
        let outcome = shopper
            .orchestrator
            .submit_otp(&session_id, "000000")
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmOutcome::OtpRequired { .. }));
    }

    let outcome = shopper
        .orchestrator
        .submit_otp(&session_id, "000000")
        .await
        .unwrap();
    let ConfirmOutcome::Failed { receipt, .. } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(
        receipt.unwrap().payment_status.code,
        ReceiptCode::ChallengeExhausted
    );

    let session = shopper.client.get_session(&session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
}

#[tokio::test]
async fn zeroed_signature_is_rejected() {
    let merchant = spawn_merchant(false, false).await;
    let shopper = shopper_for(&merchant, Arc::new(NoopTokenization));
    enroll(&shopper).await;

    let prepared = shopper
        .orchestrator
        .prepare(cookie_cart(), BUYER, "SGD")
        .await
        .unwrap();

    let mandate = PaymentMandate {
        payment_mandate_contents: prepared.contents.clone(),
        user_authorization: Some(encoding::encode([0u8; 64])),
    };
    shopper
        .client
        .update_session(&prepared.session_id, mandate)
        .await
        .unwrap();

    let response = shopper
        .client
        .complete_session(&prepared.session_id, None)
        .await
        .unwrap();
    assert_eq!(
        response.receipt.payment_status.code,
        ReceiptCode::InvalidAuthorization
    );
    assert_eq!(response.session.status, SessionStatus::Failed);
}

#[tokio::test]
async fn mismatched_mandate_total_is_rejected_at_update() {
    let merchant = spawn_merchant(false, false).await;
    let shopper = shopper_for(&merchant, Arc::new(NoopTokenization));
    enroll(&shopper).await;

    let prepared = shopper
        .orchestrator
        .prepare(cookie_cart(), BUYER, "SGD")
        .await
        .unwrap();

    let mut contents = prepared.contents.clone();
    contents.payment_details_total.amount.value = 19.98;
    let authorization = shopper
        .credentials
        .authorize_mandate(BUYER, &contents, &shopper.device)
        .unwrap();
    let mandate = PaymentMandate {
        payment_mandate_contents: contents,
        user_authorization: Some(authorization),
    };

    let error = shopper
        .client
        .update_session(&prepared.session_id, mandate)
        .await
        .unwrap_err();
    assert_eq!(
        error.api_error().unwrap().error_kind,
        ErrorKind::MandateSessionMismatch
    );

    // The session is untouched and still usable.
    let session = shopper
        .client
        .get_session(&prepared.session_id)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Incomplete);
}

#[tokio::test]
async fn tokenization_outage_degrades_to_local_tokens() {
    let merchant = spawn_merchant(false, false).await;

    // Adapter pointed at a dead port: enrollment-time tokenization and
    // the pre-payment authentication both fail and must be swallowed.
    let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let adapter: Arc<dyn TokenizationAdapter> = Arc::new(NetworkTokenization::with_base_url(
        OAuth1Signer::new("ck", key),
        "http://127.0.0.1:1",
    ));
    let shopper = shopper_for(&merchant, adapter);
    enroll(&shopper).await;

    // Tokenization never succeeded, so the instrument stays local.
    let instrument = shopper.credentials.default_instrument(BUYER).unwrap();
    assert!(!instrument.is_tokenized);

    let (_, outcome) = purchase(&shopper).await;
    let ConfirmOutcome::Success(receipt) = outcome else {
        panic!("expected success despite tokenization outage, got {outcome:?}");
    };

    // The mandate used a locally generated 16-digit token.
    assert_eq!(receipt.payment_status.code, ReceiptCode::Success);
}

#[tokio::test]
async fn pan_never_crosses_the_wire() {
    let merchant = spawn_merchant(false, false).await;
    let shopper = shopper_for(&merchant, Arc::new(NoopTokenization));
    enroll(&shopper).await;

    let (_, outcome) = purchase(&shopper).await;
    assert!(matches!(outcome, ConfirmOutcome::Success(_)));

    // Every recorded request and response body on the merchant must be
    // free of the PAN; only last-four/token/cryptogram may appear.
    for entry in merchant.state.logs.entries() {
        let request = serde_json::to_string(&entry.request_body).unwrap();
        let response = serde_json::to_string(&entry.response_body).unwrap();
        assert!(!request.contains(DEMO_PAN), "PAN leaked in {}", entry.endpoint);
        assert!(!response.contains(DEMO_PAN), "PAN leaked in {}", entry.endpoint);
    }
}

#[tokio::test]
async fn recorder_captures_both_surfaces() {
    let merchant = spawn_merchant(false, false).await;
    let shopper = shopper_for(&merchant, Arc::new(NoopTokenization));
    enroll(&shopper).await;
    let (_, outcome) = purchase(&shopper).await;
    assert!(matches!(outcome, ConfirmOutcome::Success(_)));

    // Recording happens off the request path; give the spawned tasks a
    // beat to drain.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let ucp = merchant.state.logs.entries_of(LogKind::Ucp);
    let ap2 = merchant.state.logs.entries_of(LogKind::Ap2);
    assert!(!ucp.is_empty());
    assert!(!ap2.is_empty());

    // The update entry carries the mandate id and the user signature.
    let update = ucp
        .iter()
        .find(|e| e.method == "PUT")
        .expect("update entry recorded");
    assert!(update.mandate_id.as_deref().unwrap().starts_with("PM-"));
    assert!(update.request_signature.is_some());
}

#[tokio::test]
async fn discovery_and_search_over_http() {
    let merchant = spawn_merchant(false, false).await;
    let shopper = shopper_for(&merchant, Arc::new(NoopTokenization));

    let document = shopper.client.discover().await.unwrap();
    assert!(document.supports_ap2_checkout());
    assert_eq!(document.merchant.id, "merchant-001");

    let results = shopper.client.search_products("cookies", 10).await.unwrap();
    assert_eq!(results["total"], 2);
    assert_eq!(results["items"][0]["price"], 499);
}
