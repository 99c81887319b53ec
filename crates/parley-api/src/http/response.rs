//! Envelope response format for all API responses.
//!
//! Every JSON response is wrapped in a consistent envelope:
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "errors": [],
//!   "_links": { "self": "..." }
//! }
//! ```
//!
//! Error envelopes are produced by [`AppError`](super::error::AppError).

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

/// Envelope response wrapping all API data.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,

    pub meta: ApiMeta,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiErrorDetail>,

    /// HATEOAS-style links for discoverability.
    #[serde(rename = "_links", skip_serializing_if = "HashMap::is_empty")]
    pub links: HashMap<String, String>,
}

/// Metadata included in every response.
#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: String,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
    pub response_time_ms: u64,
}

/// Individual error detail.
#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a success response with data, timed from `start`.
    pub fn success(data: T, start: Instant) -> Self {
        Self {
            data: Some(data),
            meta: ApiMeta {
                request_id: Uuid::now_v7().to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                response_time_ms: start.elapsed().as_millis() as u64,
            },
            errors: Vec::new(),
            links: HashMap::new(),
        }
    }

    /// Add a HATEOAS link.
    pub fn with_link(mut self, rel: &str, href: &str) -> Self {
        self.links.insert(rel.to_string(), href.to_string());
        self
    }
}
