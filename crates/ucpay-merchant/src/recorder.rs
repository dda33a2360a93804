//! Request-log recorder.
//!
//! Wraps every inbound UCP and AP2 request. The middleware captures the
//! before-call metadata and buffers the request body; handlers write their
//! serialized response into the per-request [`ResponseCapture`] slot so
//! the recorder can persist both sides. Entries are persisted on a
//! spawned task and recording failures never fail the request.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Upper bound on buffered request bodies.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Default number of entries the in-memory store retains.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Which protocol surface a request hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Discovery, search, and checkout endpoints.
    Ucp,
    /// AP2 credential and payment endpoints.
    Ap2,
}

/// One recorded request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    /// Entry id.
    pub id: String,
    /// Protocol surface.
    pub kind: LogKind,
    /// Request path.
    pub endpoint: String,
    /// HTTP method.
    pub method: String,
    /// Response status code.
    pub response_status: u16,
    /// Parsed request body, when it was JSON.
    pub request_body: Option<Value>,
    /// Response body as recorded by the handler.
    pub response_body: Option<Value>,
    /// Mandate id, when one appears in either body.
    pub mandate_id: Option<String>,
    /// User authorization from the request, when present.
    pub request_signature: Option<String>,
    /// Merchant signature from the response, when present.
    pub response_signature: Option<String>,
    /// Client address.
    pub client_ip: Option<String>,
    /// Wall time spent in the handler.
    pub duration_ms: f64,
    /// Recording time.
    pub created_at: DateTime<Utc>,
}

/// Per-request slot a handler writes its serialized response into.
#[derive(Debug, Clone, Default)]
pub struct ResponseCapture(Arc<Mutex<Option<Value>>>);

impl ResponseCapture {
    /// Records the response the handler is about to return. Serialization
    /// failures are ignored; the entry just lacks a response body.
    pub fn record<T: Serialize>(&self, response: &T) {
        if let Ok(value) = serde_json::to_value(response) {
            *self.0.lock().unwrap() = Some(value);
        }
    }

    fn take(&self) -> Option<Value> {
        self.0.lock().unwrap().take()
    }
}

/// Bounded append-only in-memory log store.
pub struct RequestLogStore {
    entries: RwLock<VecDeque<RequestLogEntry>>,
    capacity: usize,
}

impl Default for RequestLogStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl RequestLogStore {
    /// Creates a store retaining at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    /// Appends an entry, evicting the oldest past capacity.
    pub fn record(&self, entry: RequestLogEntry) {
        let mut entries = self.entries.write().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of all retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<RequestLogEntry> {
        self.entries.read().unwrap().iter().cloned().collect()
    }

    /// Snapshot filtered to one surface.
    #[must_use]
    pub fn entries_of(&self, kind: LogKind) -> Vec<RequestLogEntry> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

/// Axum middleware recording UCP and AP2 traffic.
pub async fn record_requests(
    State(store): State<Arc<RequestLogStore>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let Some(kind) = classify(&path) else {
        return next.run(request).await;
    };

    let method = request.method().to_string();
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let (mut parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_CAPTURE_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };
    let request_body: Option<Value> = if bytes.is_empty() {
        None
    } else {
        serde_json::from_slice(&bytes).ok()
    };

    let capture = ResponseCapture::default();
    parts.extensions.insert(capture.clone());
    let request = Request::from_parts(parts, Body::from(bytes));

    let started = Instant::now();
    let response = next.run(request).await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    let response_body = capture.take();
    let mandate_id = extract_mandate_id(request_body.as_ref())
        .or_else(|| extract_mandate_id(response_body.as_ref()));
    let request_signature = extract_user_authorization(request_body.as_ref());
    let response_signature = extract_merchant_signature(response_body.as_ref());

    let entry = RequestLogEntry {
        id: Uuid::new_v4().to_string(),
        kind,
        endpoint: path,
        method,
        response_status: response.status().as_u16(),
        request_body,
        response_body,
        mandate_id,
        request_signature,
        response_signature,
        client_ip,
        duration_ms,
        created_at: Utc::now(),
    };

    // Persist off the request path.
    tokio::spawn(async move {
        store.record(entry);
    });

    response
}

fn classify(path: &str) -> Option<LogKind> {
    if path.starts_with("/ap2/") {
        Some(LogKind::Ap2)
    } else if path.starts_with("/.well-known/ucp") || path.starts_with("/ucp/") {
        Some(LogKind::Ucp)
    } else {
        None
    }
}

fn extract_mandate_id(body: Option<&Value>) -> Option<String> {
    let body = body?;
    for root in [body, body.get("payment_mandate").unwrap_or(body)] {
        if let Some(id) = root
            .get("payment_mandate_contents")
            .and_then(|c| c.get("payment_mandate_id"))
            .and_then(Value::as_str)
        {
            return Some(id.to_string());
        }
        if let Some(id) = root
            .get("receipt")
            .and_then(|r| r.get("payment_mandate_id"))
            .and_then(Value::as_str)
        {
            return Some(id.to_string());
        }
    }
    None
}

fn extract_user_authorization(body: Option<&Value>) -> Option<String> {
    let body = body?;
    body.get("user_authorization")
        .or_else(|| {
            body.get("payment_mandate")
                .and_then(|m| m.get("user_authorization"))
        })
        .and_then(Value::as_str)
        .map(String::from)
}

fn extract_merchant_signature(body: Option<&Value>) -> Option<String> {
    let body = body?;
    body.get("merchant_signature")
        .or_else(|| {
            body.get("receipt")
                .and_then(|r| r.get("merchant_signature"))
        })
        .and_then(Value::as_str)
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(kind: LogKind, endpoint: &str) -> RequestLogEntry {
        RequestLogEntry {
            id: Uuid::new_v4().to_string(),
            kind,
            endpoint: endpoint.to_string(),
            method: "POST".to_string(),
            response_status: 200,
            request_body: None,
            response_body: None,
            mandate_id: None,
            request_signature: None,
            response_signature: None,
            client_ip: None,
            duration_ms: 1.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("/.well-known/ucp"), Some(LogKind::Ucp));
        assert_eq!(classify("/ucp/products/search"), Some(LogKind::Ucp));
        assert_eq!(classify("/ucp/v1/checkout-sessions"), Some(LogKind::Ucp));
        assert_eq!(classify("/ap2/credentials/register"), Some(LogKind::Ap2));
        assert_eq!(classify("/health"), None);
    }

    #[test]
    fn test_store_is_bounded() {
        let store = RequestLogStore::new(3);
        for i in 0..5 {
            store.record(entry(LogKind::Ucp, &format!("/ucp/{i}")));
        }
        let entries = store.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].endpoint, "/ucp/2");
        assert_eq!(entries[2].endpoint, "/ucp/4");
    }

    #[test]
    fn test_entries_of_kind() {
        let store = RequestLogStore::new(10);
        store.record(entry(LogKind::Ucp, "/ucp/a"));
        store.record(entry(LogKind::Ap2, "/ap2/b"));
        store.record(entry(LogKind::Ucp, "/ucp/c"));
        assert_eq!(store.entries_of(LogKind::Ucp).len(), 2);
        assert_eq!(store.entries_of(LogKind::Ap2).len(), 1);
    }

    #[test]
    fn test_extract_mandate_fields() {
        let update_body = json!({
            "payment_mandate": {
                "payment_mandate_contents": {"payment_mandate_id": "PM-XYZ"},
                "user_authorization": "c2ln"
            },
            "user_authorization": "c2ln"
        });
        assert_eq!(
            extract_mandate_id(Some(&update_body)).as_deref(),
            Some("PM-XYZ")
        );
        assert_eq!(
            extract_user_authorization(Some(&update_body)).as_deref(),
            Some("c2ln")
        );

        let complete_body = json!({
            "receipt": {"payment_mandate_id": "PM-XYZ", "merchant_signature": "bXNpZw"}
        });
        assert_eq!(
            extract_mandate_id(Some(&complete_body)).as_deref(),
            Some("PM-XYZ")
        );
        assert_eq!(
            extract_merchant_signature(Some(&complete_body)).as_deref(),
            Some("bXNpZw")
        );
    }

    #[test]
    fn test_capture_slot() {
        let capture = ResponseCapture::default();
        assert!(capture.take().is_none());
        capture.record(&json!({"ok": true}));
        assert_eq!(capture.take(), Some(json!({"ok": true})));
        assert!(capture.take().is_none());
    }
}
