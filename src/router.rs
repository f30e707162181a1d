//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. The router is the last
//! step of the [`Pipeline`](crate::middleware::Pipeline): a request that
//! matches nothing ends at [`fallback::not_found`].

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::fallback;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// Build it once at startup and hand it to the pipeline. Each
/// [`Router::on`] call returns `self` so registrations chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics on an invalid or conflicting path. Routes are fixed at start-up,
    /// so this is a programming error.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Shorthand for `on(Method::Get, …)`. `HEAD` requests are served by it too.
    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Get, path, handler)
    }

    fn lookup(&self, method: Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    /// Runs the matching handler, or the not-found fallback.
    pub(crate) async fn dispatch(&self, mut req: Request) -> Response {
        let Ok(method) = Method::try_from(req.method()) else {
            return fallback::not_found(req.head());
        };

        let found = self.lookup(method, req.path()).or_else(|| match method {
            Method::Head => self.lookup(Method::Get, req.path()),
            _ => None,
        });

        match found {
            Some((handler, params)) => {
                req.params = params;
                handler.call(req).await
            }
            None => fallback::not_found(req.head()),
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    async fn echo_id(req: Request) -> Response {
        Response::json(&serde_json::json!({ "id": req.param("id") }))
    }

    fn router() -> Router {
        Router::new()
            .get("/patients/{id}", echo_id)
            .on(Method::Delete, "/patients/{id}", |_req: Request| async { Status::NoContent })
    }

    #[tokio::test]
    async fn matches_method_and_path() {
        let res = router().dispatch(Request::fake(http::Method::GET, "/patients/42")).await;
        assert_eq!(res.body(), br#"{"id":"42"}"#);

        let res = router().dispatch(Request::fake(http::Method::DELETE, "/patients/42")).await;
        assert_eq!(res.status_code(), Status::NoContent);
    }

    #[tokio::test]
    async fn head_falls_back_to_get() {
        let res = router().dispatch(Request::fake(http::Method::HEAD, "/patients/7")).await;
        assert_eq!(res.status_code(), Status::Ok);
    }

    #[tokio::test]
    async fn wrong_method_or_path_is_not_found() {
        let res = router().dispatch(Request::fake(http::Method::PUT, "/patients/42")).await;
        assert_eq!(res.status_code(), Status::NotFound);

        let res = router().dispatch(Request::fake(http::Method::GET, "/doctors")).await;
        assert_eq!(res.body(), br#"{"error":"Route not found"}"#);
    }

    #[tokio::test]
    async fn extension_methods_are_not_found() {
        let method = http::Method::from_bytes(b"PURGE").unwrap();
        let res = router().dispatch(Request::fake(method, "/patients/42")).await;
        assert_eq!(res.status_code(), Status::NotFound);
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_routes_panic() {
        let _ = Router::new().get("/a", echo_id).get("/a", echo_id);
    }
}
