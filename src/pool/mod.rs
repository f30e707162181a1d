//! Bounded database connection pool.
//!
//! # Accounting
//!
//! A [`Semaphore`] with `max_connections` permits is the single source of
//! truth for capacity. A permit is held by every checked-out
//! [`PooledConnection`] and by nothing else, so:
//!
//! - checked-out connections ≤ `max_connections`, always;
//! - a new connection is only opened when a permit is held and the idle set is
//!   empty, so open connections ≤ `max_connections` as well;
//! - reaping idle connections never touches a permit.
//!
//! A connection goes back to the idle set *before* its permit is released,
//! which is what lets the next waiter reuse it instead of opening another.
//!
//! # Lifecycle
//!
//! ```text
//! Pool::connect ── startup probe (acquire + release) ── fails → Error::Startup
//!      │
//!      ├── acquire ─┬─ idle connection (most recent first)
//!      │            ├─ new connection     ── refused → PoolError::ConnectionRefused
//!      │            └─ wait for a permit  ── timeout → PoolError::ConnectionTimeout
//!      │
//!      ├── release / drop ── back to idle   (discarded instead if dropped mid-query)
//!      ├── reaper ────────── closes connections idle past `idle_timeout`
//!      └── close ─────────── no more acquires, idle connections closed
//! ```

pub mod postgres;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, PoolError};

/// One result row: column name → JSON value.
pub type Row = serde_json::Map<String, Value>;

pub const DEFAULT_MAX_CONNECTIONS: usize = 20;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(2_000);

// ── Seams ─────────────────────────────────────────────────────────────────────

/// Opens connections to the database.
pub trait Connect: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// A live database connection.
pub trait Connection: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs `sql` with positional `params` and returns every row.
    fn query(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<Vec<Row>, Self::Error>> + Send;

    /// Closes the connection gracefully.
    fn close(self) -> impl Future<Output = ()> + Send;
}

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum connections checked out (and open) at once.
    pub max_connections: usize,
    /// A connection idle longer than this is closed.
    pub idle_timeout: Duration,
    /// Longest `acquire()` waits, including the time to open a connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// Point-in-time counters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolStatus {
    pub capacity: usize,
    pub open: usize,
    pub idle: usize,
    pub checked_out: usize,
}

// ── Pool ──────────────────────────────────────────────────────────────────────

struct Idle<T> {
    conn: T,
    since: Instant,
}

struct Shared<C: Connect> {
    connector: C,
    config: PoolConfig,
    idle: Mutex<VecDeque<Idle<C::Connection>>>,
    permits: Arc<Semaphore>,
    open: AtomicUsize,
    closed: AtomicBool,
}

impl<C: Connect> Shared<C> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Idle<C::Connection>>> {
        // A panic while holding this lock cannot leave the deque half-updated.
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Takes the most recently returned connection that is still fresh. Stale
    /// ones met on the way are removed from the books and handed back for closing.
    fn take_idle(&self, now: Instant) -> (Option<C::Connection>, Vec<C::Connection>) {
        let mut idle = self.idle();
        let mut stale = Vec::new();
        while let Some(entry) = idle.pop_back() {
            if now.duration_since(entry.since) < self.config.idle_timeout {
                return (Some(entry.conn), stale);
            }
            stale.push(entry.conn);
        }
        (None, stale)
    }

    /// Removes connections idle past the timeout. Returns them with the
    /// instant the next one expires.
    fn reap(&self, now: Instant) -> (Vec<C::Connection>, Instant) {
        let timeout = self.config.idle_timeout;
        let mut idle = self.idle();
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(idle.len());
        while let Some(entry) = idle.pop_front() {
            if now.duration_since(entry.since) >= timeout {
                expired.push(entry.conn);
            } else {
                kept.push_back(entry);
            }
        }
        let next = kept.iter().map(|e| e.since + timeout).min().unwrap_or(now + timeout);
        *idle = kept;
        (expired, next)
    }

    fn give_back(&self, conn: C::Connection) -> Option<C::Connection> {
        if self.is_closed() {
            return Some(conn);
        }
        self.idle().push_back(Idle { conn, since: Instant::now() });
        None
    }

    async fn retire(&self, conns: Vec<C::Connection>) {
        for conn in conns {
            self.open.fetch_sub(1, Ordering::AcqRel);
            conn.close().await;
        }
    }
}

/// Shared handle to the pool. Clones are cheap and refer to the same pool.
pub struct Pool<C: Connect> {
    shared: Arc<Shared<C>>,
}

impl<C: Connect> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: Connect> Pool<C> {
    /// Creates an empty pool and starts its idle reaper. No connection is
    /// opened until the first [`acquire`](Pool::acquire).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let shared = Arc::new(Shared {
            permits: Arc::new(Semaphore::new(config.max_connections)),
            connector,
            config,
            idle: Mutex::new(VecDeque::new()),
            open: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(reap_idle(Arc::downgrade(&shared)));
        Self { shared }
    }

    /// Creates the pool and runs the startup probe: one acquire + release.
    ///
    /// A failed probe closes the pool and returns [`Error::Startup`].
    pub async fn connect(connector: C, config: PoolConfig) -> Result<Self, Error> {
        let pool = Self::new(connector, config);
        match pool.acquire().await {
            Ok(conn) => {
                conn.release();
                info!(
                    max_connections = pool.shared.config.max_connections,
                    "database connected successfully"
                );
                Ok(pool)
            }
            Err(e) => {
                pool.close().await;
                Err(Error::Startup(e))
            }
        }
    }

    /// Checks out a connection.
    ///
    /// Waits for capacity when every connection is checked out. Gives up with
    /// [`PoolError::ConnectionTimeout`] once `acquire_timeout` has elapsed,
    /// whether it was waiting for a permit or for the database to answer.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, PoolError> {
        if self.shared.is_closed() {
            return Err(PoolError::Closed);
        }
        let timeout = self.shared.config.acquire_timeout;
        match tokio::time::timeout(timeout, self.checkout()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?timeout, status = ?self.status(), "timed out acquiring a connection");
                Err(PoolError::ConnectionTimeout(timeout))
            }
        }
    }

    async fn checkout(&self) -> Result<PooledConnection<C>, PoolError> {
        let permit = Arc::clone(&self.shared.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let (reused, stale) = self.shared.take_idle(Instant::now());
        if !stale.is_empty() {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { shared.retire(stale).await });
        }

        let conn = match reused {
            Some(conn) => conn,
            None => {
                let conn = self
                    .shared
                    .connector
                    .connect()
                    .await
                    .map_err(|e| PoolError::ConnectionRefused(Box::new(e)))?;
                let open = self.shared.open.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(open, "opened database connection");
                conn
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            busy: false,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Returns `conn` to the idle set. Same as dropping it.
    pub fn release(&self, conn: PooledConnection<C>) {
        conn.release();
    }

    /// Acquire, run one statement, release on success or discard on error.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, PoolError> {
        let mut conn = self.acquire().await?;
        match conn.query(sql, params).await {
            Ok(rows) => {
                conn.release();
                Ok(rows)
            }
            Err(e) => {
                conn.discard().await;
                Err(e)
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        let capacity = self.shared.config.max_connections;
        PoolStatus {
            capacity,
            open: self.shared.open.load(Ordering::Acquire),
            idle: self.shared.idle().len(),
            checked_out: capacity.saturating_sub(self.shared.permits.available_permits()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Stops handing out connections and closes the idle ones. Connections
    /// still checked out are closed as they come back.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.permits.close();
        let idle: Vec<_> = self.shared.idle().drain(..).map(|e| e.conn).collect();
        let count = idle.len();
        self.shared.retire(idle).await;
        info!(closed = count, "connection pool closed");
    }
}

/// Background task: sleeps until the oldest idle connection expires, closes
/// everything past the timeout, repeats. Ends once the pool is closed or gone.
async fn reap_idle<C: Connect>(shared: Weak<Shared<C>>) {
    loop {
        let Some(pool) = shared.upgrade() else { return };
        if pool.is_closed() {
            return;
        }
        let (expired, next) = pool.reap(Instant::now());
        if !expired.is_empty() {
            let count = expired.len();
            pool.retire(expired).await;
            debug!(closed = count, "closed idle connections");
        }
        drop(pool);
        tokio::time::sleep_until(next).await;
    }
}

// ── PooledConnection ──────────────────────────────────────────────────────────

/// A checked-out connection. Owned by exactly one request.
///
/// Dropping it returns the connection to the pool, except when it is dropped
/// while a query is in flight: its state is unknown then, so it is closed.
pub struct PooledConnection<C: Connect> {
    conn: Option<C::Connection>,
    busy: bool,
    shared: Arc<Shared<C>>,
    // Dropped after `Drop::drop` has put the connection back.
    _permit: OwnedSemaphorePermit,
}

impl<C: Connect> PooledConnection<C> {
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, PoolError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(PoolError::Closed);
        };
        // Left set on error, so a failed connection is closed rather than reused.
        self.busy = true;
        let rows = conn
            .query(sql, params)
            .await
            .map_err(|e| PoolError::Query(Box::new(e)))?;
        self.busy = false;
        Ok(rows)
    }

    /// Returns the connection to the idle set.
    pub fn release(self) {
        drop(self);
    }

    /// Closes the connection instead of returning it and frees its slot.
    pub async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.retire(vec![conn]).await;
        }
    }
}

impl<C: Connect> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        let leftover = if self.busy { Some(conn) } else { self.shared.give_back(conn) };
        if let Some(conn) = leftover {
            let shared = Arc::clone(&self.shared);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { shared.retire(vec![conn]).await });
                }
                Err(_) => {
                    shared.open.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory connector with knobs for failure and latency.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::Value;

    use super::{Connect, Connection, Row};

    #[derive(Default)]
    pub(crate) struct Counters {
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub active: AtomicUsize,
        pub peak: AtomicUsize,
    }

    #[derive(Clone, Default)]
    pub(crate) struct MockConnector {
        pub counters: Arc<Counters>,
        pub refuse: Arc<AtomicBool>,
        pub query_delay: Duration,
        /// Queries succeed with no rows.
        pub empty: bool,
    }

    impl MockConnector {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn slow(query_delay: Duration) -> Self {
            Self { query_delay, ..Self::default() }
        }

        pub(crate) fn empty() -> Self {
            Self { empty: true, ..Self::default() }
        }

        pub(crate) fn set_refuse(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }
    }

    pub(crate) struct MockConnection {
        counters: Arc<Counters>,
        delay: Duration,
        empty: bool,
    }

    impl Connect for MockConnector {
        type Connection = MockConnection;
        type Error = std::io::Error;

        async fn connect(&self) -> Result<MockConnection, std::io::Error> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused (os error 111)",
                ));
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(MockConnection {
                counters: Arc::clone(&self.counters),
                delay: self.query_delay,
                empty: self.empty,
            })
        }
    }

    impl Connection for MockConnection {
        type Error = std::io::Error;

        async fn query(&mut self, sql: &str, _params: &[Value]) -> Result<Vec<Row>, std::io::Error> {
            let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.peak.fetch_max(active, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.counters.active.fetch_sub(1, Ordering::SeqCst);

            if sql.starts_with("FAIL") {
                return Err(std::io::Error::other("syntax error at or near \"FAIL\""));
            }
            if self.empty {
                return Ok(Vec::new());
            }
            let mut row = Row::new();
            row.insert("now".into(), Value::String("2024-05-01T12:00:00.000Z".into()));
            Ok(vec![row])
        }

        async fn close(self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockConnector;
    use super::*;

    fn config(max: usize) -> PoolConfig {
        PoolConfig { max_connections: max, ..PoolConfig::default() }
    }

    #[tokio::test]
    async fn startup_probe_leaves_one_idle_connection() {
        let pool = Pool::connect(MockConnector::new(), config(4)).await.unwrap();
        assert_eq!(
            pool.status(),
            PoolStatus { capacity: 4, open: 1, idle: 1, checked_out: 0 }
        );
    }

    #[tokio::test]
    async fn refused_startup_probe_is_fatal() {
        let connector = MockConnector::new();
        connector.set_refuse(true);

        let err = Pool::connect(connector, config(4)).await.err().unwrap();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::Startup(PoolError::ConnectionRefused(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out_when_exhausted() {
        let pool = Pool::new(MockConnector::new(), config(1));
        let held = pool.acquire().await.unwrap();

        let started = Instant::now();
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, PoolError::ConnectionTimeout(t) if t == DEFAULT_ACQUIRE_TIMEOUT));
        assert!(started.elapsed() >= DEFAULT_ACQUIRE_TIMEOUT);

        drop(held);
        assert_eq!(pool.status().checked_out, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_reuses_released_connection() {
        let connector = MockConnector::new();
        let counters = Arc::clone(&connector.counters);
        let pool = Pool::new(connector, config(1));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|c| c.release()) })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        pool.release(held);

        waiter.await.unwrap().unwrap();
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status().open, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn checked_out_never_exceeds_capacity() {
        let connector = MockConnector::slow(Duration::from_millis(20));
        let counters = Arc::clone(&connector.counters);
        let pool = Pool::new(
            connector,
            PoolConfig { acquire_timeout: Duration::from_secs(60), ..config(5) },
        );

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.query("SELECT NOW()", &[]).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(counters.peak.load(Ordering::SeqCst) <= 5);
        assert!(counters.opened.load(Ordering::SeqCst) <= 5);
        let status = pool.status();
        assert_eq!(status.checked_out, 0);
        assert!(status.open <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connections_are_reaped() {
        let connector = MockConnector::new();
        let counters = Arc::clone(&connector.counters);
        let pool = Pool::new(connector, config(2));

        pool.query("SELECT 1", &[]).await.unwrap();
        assert_eq!(pool.status().idle, 1);

        tokio::time::sleep(DEFAULT_IDLE_TIMEOUT / 2).await;
        assert_eq!(pool.status().idle, 1, "not yet expired");

        tokio::time::sleep(DEFAULT_IDLE_TIMEOUT).await;
        assert_eq!(pool.status().idle, 0);
        assert_eq!(pool.status().open, 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reaping_leaves_checked_out_connections_alone() {
        let pool = Pool::new(MockConnector::new(), config(2));
        let held = pool.acquire().await.unwrap();

        tokio::time::sleep(DEFAULT_IDLE_TIMEOUT * 3).await;
        assert_eq!(pool.status().checked_out, 1);
        assert_eq!(pool.status().open, 1);

        held.release();
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn failed_query_discards_connection() {
        let connector = MockConnector::new();
        let counters = Arc::clone(&connector.counters);
        let pool = Pool::new(connector, config(2));

        let err = pool.query("FAIL", &[]).await.err().unwrap();
        assert!(matches!(err, PoolError::Query(_)));
        assert_eq!(pool.status(), PoolStatus { capacity: 2, open: 0, idle: 0, checked_out: 0 });
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_dropped_mid_query_is_closed() {
        let connector = MockConnector::slow(Duration::from_secs(10));
        let counters = Arc::clone(&connector.counters);
        let pool = Pool::new(connector, config(1));

        let task = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.query("SELECT pg_sleep(10)", &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.abort();
        let _ = task.await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(pool.status().checked_out, 0);
        assert_eq!(pool.status().idle, 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_pool_rejects_acquire() {
        let connector = MockConnector::new();
        let counters = Arc::clone(&connector.counters);
        let pool = Pool::connect(connector, config(2)).await.unwrap();

        pool.close().await;
        assert!(matches!(pool.acquire().await.err().unwrap(), PoolError::Closed));
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refused_connection_frees_its_slot() {
        let connector = MockConnector::new();
        connector.set_refuse(true);
        let pool = Pool::new(connector.clone(), config(1));

        assert!(matches!(pool.acquire().await.err().unwrap(), PoolError::ConnectionRefused(_)));
        assert_eq!(pool.status().checked_out, 0);

        connector.set_refuse(false);
        assert!(pool.acquire().await.is_ok());
    }
}
