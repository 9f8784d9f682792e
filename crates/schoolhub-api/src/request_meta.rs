use std::net::IpAddr;

use axum::http::HeaderMap;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request metadata inserted by [`crate::security::request_id`].
#[derive(Clone, Debug)]
pub struct RequestMeta {
    pub request_id: String,
    pub client_ip: Option<String>,
}

impl RequestMeta {
    /// Reuse a caller-supplied request id if it looks sane, otherwise mint one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let incoming = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .filter(|v| v.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')));

        Self {
            request_id: incoming
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            client_ip: None,
        }
    }

    pub fn with_client_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.client_ip = ip.map(|ip| ip.to_string());
        self
    }
}
