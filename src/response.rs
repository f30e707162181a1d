//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Handlers build a [`Response`] and return it. Middleware stages append
//! headers to it on the way out. The server turns it into a hyper response
//! exactly once.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::HeaderMap;
use http_body_util::Full;
use serde::Serialize;

use crate::error::Failure;
use crate::fallback;
use crate::status::Status;

const APPLICATION_JSON: HeaderValue = HeaderValue::from_static("application/json");

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use caregate::{Response, Status};
/// use serde_json::json;
///
/// Response::json(&json!({ "id": 1 }));
/// Response::error(Status::NotFound, "Route not found");
/// Response::status(Status::NoContent);
///
/// Response::builder()
///     .status(Status::Ok)
///     .header(http::header::CACHE_CONTROL, http::HeaderValue::from_static("no-store"))
///     .json(&json!({ "ok": true }));
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) body: Bytes,
    pub(crate) headers: HeaderMap,
    pub(crate) status: Status,
}

impl Response {
    /// `200 OK` with `value` serialised as JSON.
    ///
    /// A value that cannot be serialised becomes the unhandled-error response.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::builder().json(value)
    }

    /// `{"error": message}` with the given status.
    pub fn error(code: Status, message: &str) -> Self {
        Self::builder()
            .status(code)
            .json(&serde_json::json!({ "error": message }))
    }

    /// Response with no body.
    pub fn status(code: Status) -> Self {
        Self { body: Bytes::new(), headers: HeaderMap::new(), status: code }
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: Status::Ok }
    }

    pub fn status_code(&self) -> Status { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Mutable access for middleware annotating the response.
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status.into();
        *res.headers_mut() = self.headers;
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `Status::Ok` (200).
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: Status,
}

impl ResponseBuilder {
    pub fn status(mut self, code: Status) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Response {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.finish(APPLICATION_JSON, bytes.into()),
            Err(e) => fallback::unhandled(Failure::from(e)),
        }
    }

    /// Terminate with no body (e.g. `Status::NoContent`).
    pub fn no_body(self) -> Response {
        Response { body: Bytes::new(), headers: self.headers, status: self.status }
    }

    fn finish(mut self, content_type: HeaderValue, body: Bytes) -> Response {
        self.headers.insert(CONTENT_TYPE, content_type);
        Response { body, headers: self.headers, status: self.status }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Handlers may return anything implementing it. `Result<T, Failure>` is
/// covered, so `?` inside a handler routes errors to the unhandled fallback.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

/// Return a [`Status`] directly from a handler: `return Status::NoContent`
impl IntoResponse for Status {
    fn into_response(self) -> Response { Response::status(self) }
}

impl<T: IntoResponse> IntoResponse for Result<T, Failure> {
    fn into_response(self) -> Response {
        match self {
            Ok(r) => r.into_response(),
            Err(failure) => fallback::unhandled(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_sets_content_type() {
        let res = Response::json(&serde_json::json!({ "message": "hi" }));
        assert_eq!(res.status_code(), Status::Ok);
        assert_eq!(res.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(res.body(), br#"{"message":"hi"}"#);
    }

    #[test]
    fn error_body_shape() {
        let res = Response::error(Status::NotFound, "Route not found");
        assert_eq!(u16::from(res.status_code()), 404);
        assert_eq!(res.body(), br#"{"error":"Route not found"}"#);
    }

    #[test]
    fn failure_result_becomes_generic_500() {
        let result: Result<Response, Failure> = Err(Failure::new("secret table users_v2 missing"));
        let res = result.into_response();
        assert_eq!(res.status_code(), Status::InternalServerError);
        assert_eq!(res.body(), br#"{"error":"Internal Server Error"}"#);
    }

    #[test]
    fn into_inner_preserves_parts() {
        let res = Response::builder()
            .status(Status::TooManyRequests)
            .header(http::header::RETRY_AFTER, HeaderValue::from_static("10"))
            .no_body()
            .into_inner();
        assert_eq!(res.status(), http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[http::header::RETRY_AFTER], "10");
    }
}
