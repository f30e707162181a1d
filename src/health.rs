//! The gateway's two endpoints.
//!
//! | Route | Handler | Touches the database |
//! |---|---|---|
//! | `GET /` | [`liveness`] | no |
//! | `GET /test-db` | [`db_time`] | one `SELECT NOW()` through the pool |

use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::pool::{Connect, Pool};
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

pub const LIVENESS_MESSAGE: &str = "Clinical Care API Running";

#[derive(Serialize)]
struct Liveness {
    message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DbTime {
    db_time: Value,
}

/// Always `200 {"message": "Clinical Care API Running"}`. No dependencies, so
/// it answers even when the database is down.
pub async fn liveness(_req: Request) -> Response {
    Response::json(&Liveness { message: LIVENESS_MESSAGE })
}

/// Asks the database for its clock.
///
/// `200 {"dbTime": "<timestamp>"}` on success. Any pool or query failure, or
/// a result without a `now` value, is logged and answered with
/// `500 {"error": "Database error"}`.
/// The connection is back in the pool (or closed) before this returns.
pub async fn db_time<C: Connect>(pool: &Pool<C>) -> Response {
    match pool.query("SELECT NOW()", &[]).await {
        Ok(rows) => match rows.into_iter().next().and_then(|mut row| row.remove("now")) {
            Some(now) if !now.is_null() => Response::json(&DbTime { db_time: now }),
            _ => {
                error!("database returned no clock value");
                Response::error(Status::InternalServerError, "Database error")
            }
        },
        Err(e) => {
            error!(error = %e, source = ?std::error::Error::source(&e), "database error");
            Response::error(Status::InternalServerError, "Database error")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::pool::PoolConfig;
    use crate::pool::mock::MockConnector;

    #[tokio::test]
    async fn liveness_is_static() {
        let res = liveness(Request::fake(http::Method::GET, "/")).await;
        assert_eq!(res.status_code(), Status::Ok);
        assert_eq!(res.body(), br#"{"message":"Clinical Care API Running"}"#);
    }

    #[tokio::test]
    async fn db_time_reports_the_clock() {
        let pool = Pool::new(MockConnector::new(), PoolConfig::default());
        let res = db_time(&pool).await;
        assert_eq!(res.status_code(), Status::Ok);
        assert_eq!(res.body(), br#"{"dbTime":"2024-05-01T12:00:00.000Z"}"#);
        assert_eq!(pool.status().checked_out, 0);
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn db_time_hides_database_failures() {
        let connector = MockConnector::new();
        connector.set_refuse(true);
        let counters = Arc::clone(&connector.counters);
        let pool = Pool::new(connector, PoolConfig::default());

        let res = db_time(&pool).await;

        assert_eq!(res.status_code(), Status::InternalServerError);
        assert_eq!(res.body(), br#"{"error":"Database error"}"#);
        assert_eq!(pool.status().checked_out, 0);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn db_time_without_a_clock_value_is_a_database_error() {
        let pool = Pool::new(MockConnector::empty(), PoolConfig::default());

        let res = db_time(&pool).await;

        assert_eq!(res.status_code(), Status::InternalServerError);
        assert_eq!(res.body(), br#"{"error":"Database error"}"#);
        assert_eq!(pool.status().checked_out, 0);
    }
}
