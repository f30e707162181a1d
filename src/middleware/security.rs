use http::header::{self, HeaderName, HeaderValue};

use super::{Flow, Stage};
use crate::request::{Request, RequestHead};
use crate::response::Response;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self';base-uri 'self';font-src 'self' https: data:;\
form-action 'self';frame-ancestors 'self';img-src 'self' data:;object-src 'none';script-src 'self';\
script-src-attr 'none';style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests";

/// Sets a fixed list of security headers on every response. Never short-circuits.
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    /// A custom header list instead of the defaults.
    pub fn new(headers: Vec<(HeaderName, HeaderValue)>) -> Self {
        Self { headers }
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        let fixed = |name: &'static str, value: &'static str| {
            (HeaderName::from_static(name), HeaderValue::from_static(value))
        };
        Self::new(vec![
            (header::CONTENT_SECURITY_POLICY, HeaderValue::from_static(CONTENT_SECURITY_POLICY)),
            fixed("cross-origin-opener-policy", "same-origin"),
            fixed("cross-origin-resource-policy", "same-origin"),
            fixed("origin-agent-cluster", "?1"),
            (header::REFERRER_POLICY, HeaderValue::from_static("no-referrer")),
            (
                header::STRICT_TRANSPORT_SECURITY,
                HeaderValue::from_static("max-age=31536000; includeSubDomains"),
            ),
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (header::X_DNS_PREFETCH_CONTROL, HeaderValue::from_static("off")),
            fixed("x-download-options", "noopen"),
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN")),
            fixed("x-permitted-cross-domain-policies", "none"),
            (header::X_XSS_PROTECTION, HeaderValue::from_static("0")),
        ])
    }
}

impl Stage for SecurityHeaders {
    fn name(&self) -> &'static str { "security_headers" }

    fn on_request(&self, _req: &mut Request) -> Flow {
        Flow::Continue
    }

    fn on_response(&self, _head: &RequestHead, res: &mut Response) {
        let headers = res.headers_mut();
        headers.remove("x-powered-by");
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }
}
