use tracing::info;

use super::{Flow, Stage};
use crate::request::{Request, RequestHead};
use crate::response::Response;

/// One `info` line per response: method, path, status, latency, size.
///
/// Only installed outside production. Never short-circuits.
pub struct RequestLogger;

impl Stage for RequestLogger {
    fn name(&self) -> &'static str { "logger" }

    fn on_request(&self, _req: &mut Request) -> Flow {
        Flow::Continue
    }

    fn on_response(&self, head: &RequestHead, res: &mut Response) {
        let latency = head.received_at().elapsed();
        info!(
            method = %head.method(),
            path = head.path(),
            status = u16::from(res.status_code()),
            latency_ms = latency.as_secs_f64() * 1000.0,
            bytes = res.body().len(),
            "request"
        );
    }
}
