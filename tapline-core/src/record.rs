//! Audit log record — one captured HTTP transaction.
//!
//! A [`LogRecord`] is built once per request by the capture stage, after the
//! response has been fully written, and handed to a transport. From that
//! point it is treated as immutable: every transport and receiver only ever
//! reads it, so it can cross thread boundaries without synchronization.
//!
//! Every field is serialisable to JSON so records can be shipped to any
//! log backend as one compact object per line.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Captured request-side data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Request headers, lowercased names.
    pub headers: BTreeMap<String, String>,
    /// Decoded query string parameters.
    pub query: BTreeMap<String, String>,
    /// `Content-Type` of the request, if any.
    pub content_type: Option<String>,
    /// Character encoding declared by the client.
    pub encoding: Option<String>,
    /// Declared content length; `-1` when unknown.
    pub content_length: i64,
    /// Raw body, or the urlencoded form data when the request carried a form.
    pub body: Option<String>,
}

/// Captured response-side data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseInfo {
    /// HTTP status code returned to the client.
    pub status: u16,
    /// Response headers, lowercased names.
    pub headers: BTreeMap<String, String>,
    /// `Content-Type` of the response, if any.
    pub content_type: Option<String>,
    /// Character encoding of the response body.
    pub encoding: Option<String>,
    /// Response body, when capture is enabled for the route.
    pub body: Option<String>,
}

/// A single audit record, written once per HTTP transaction.
///
/// Consumed exactly once by exactly one [`crate::Receiver`]; fanning a record
/// out to several receivers is the caller's responsibility, not the
/// transport's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Unique record identifier.
    pub id: String,
    /// ISO-8601 UTC timestamp (RFC 3339) of the request.
    pub timestamp: String,
    /// Client IP address as observed by the server.
    pub client_ip: String,
    /// Request URL (path + query string).
    pub url: String,
    /// HTTP method (uppercase: `GET`, `POST`, …).
    pub method: String,
    /// End-to-end latency in milliseconds.
    pub elapsed_ms: u64,
    /// Human-readable operation label, e.g. the handler name.
    pub operation: Option<String>,
    /// Request-side capture.
    pub request: RequestInfo,
    /// Response-side capture.
    pub response: ResponseInfo,
    /// Open extension map for caller-defined fields.
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl LogRecord {
    /// Create a minimal record with identity fields seeded; fill the
    /// remaining fields before handing it to a transport.
    pub fn new(
        client_ip: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            client_ip: client_ip.into(),
            url: url.into(),
            method: method.into(),
            elapsed_ms: 0,
            operation: None,
            request: RequestInfo {
                content_length: -1,
                ..RequestInfo::default()
            },
            response: ResponseInfo::default(),
            extensions: BTreeMap::new(),
        }
    }

    /// Serialise to a compact JSON line suitable for log shipping.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
