//! PostgreSQL connector backed by `sqlx`.
//!
//! Each pool slot is one [`PgConnection`]. `sqlx`'s own pool is not used:
//! capacity, idle reaping and acquire timeouts belong to [`Pool`](super::Pool).

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Postgres, Row as _, TypeInfo, ValueRef};
use tracing::debug;

use super::{Connect, Connection, Row};
use crate::config::DbConfig;

/// Opens one `PgConnection` per call.
#[derive(Clone, Debug)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn new(db: &DbConfig) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&db.host)
            .port(db.port)
            .username(&db.user)
            .password(&db.password)
            // `DB_SSL=true` encrypts the link but does not verify the server certificate.
            .ssl_mode(if db.ssl { PgSslMode::Require } else { PgSslMode::Disable });
        if let Some(name) = &db.name {
            options = options.database(name);
        }
        Self { options }
    }

    pub fn options(&self) -> &PgConnectOptions {
        &self.options
    }
}

impl Connect for PgConnector {
    type Connection = PgConnection;
    type Error = sqlx::Error;

    async fn connect(&self) -> Result<PgConnection, sqlx::Error> {
        ConnectOptions::connect(&self.options).await
    }
}

impl Connection for PgConnection {
    type Error = sqlx::Error;

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, sqlx::Error> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        let rows = query.fetch_all(&mut *self).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn close(self) {
        if let Err(e) = sqlx::Connection::close(self).await {
            debug!(error = %e, "closing database connection failed");
        }
    }
}

fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(sqlx::types::Json(other)),
    }
}

// ── Row decoding ──────────────────────────────────────────────────────────────

fn row_to_json(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .map(|col| {
            let value = decode_column(row, col.ordinal(), col.type_info().name());
            (col.name().to_owned(), value)
        })
        .collect()
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(_) => return Value::Null,
    }

    let decoded = match type_name {
        "INT2" => row.try_get::<i16, _>(idx).map(Value::from),
        "INT4" => row.try_get::<i32, _>(idx).map(Value::from),
        "INT8" => row.try_get::<i64, _>(idx).map(Value::from),
        "FLOAT4" => row.try_get::<f32, _>(idx).map(|v| Value::from(f64::from(v))),
        "FLOAT8" => row.try_get::<f64, _>(idx).map(Value::from),
        "BOOL" => row.try_get::<bool, _>(idx).map(Value::from),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx),
        "UUID" => row.try_get::<uuid::Uuid, _>(idx).map(|v| Value::String(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(idx)
            .map(|v| Value::String(format_timestamptz(v))),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(idx)
            .map(|v| Value::String(format_timestamp(v))),
        "DATE" => row.try_get::<NaiveDate, _>(idx).map(|v| Value::String(v.to_string())),
        _ => row.try_get::<String, _>(idx).map(Value::String),
    };

    decoded.unwrap_or_else(|e| {
        debug!(column = idx, type_name, error = %e, "undecodable column, returning null");
        Value::Null
    })
}

/// `2024-05-01T12:00:00.000Z`
fn format_timestamptz(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `2024-05-01T12:00:00.000`
fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}
