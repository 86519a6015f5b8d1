//! Directory connection pool
//!
//! Lifecycle of the pool:
//! 1. A seed connection is opened and bound before the pool is handed out
//! 2. The pool is optionally filled up to capacity
//! 3. Callers borrow connections through an RAII guard
//! 4. Broken connections are discarded on return and replaced on demand
//! 5. `shutdown` unbinds every idle connection exactly once

use crate::ldap::LdapConnector;
use crate::manager::{ConnectionState, Lifecycle, PooledSession, SessionManager};
use crate::session::Connector;
use deadpool::managed::{Object, Pool, PoolError, Timeouts};
use deadpool::Runtime;
use dirpool_core::config::{DirectoryConfig, PoolConfig, TrustConfig};
use dirpool_core::{DirpoolConfig, Error, Result, DEFAULT_LOOKUP_ATTRIBUTE};
use dirpool_tls::TrustPolicy;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub target: String,
    pub capacity: usize,
    /// Connections currently held by the pool, idle or borrowed
    pub size: usize,
    pub outstanding: usize,
    /// Open sessions, including ones detached for discard
    pub live: usize,
    pub closed: bool,
}

/// Fixed-capacity pool of authenticated, TLS-validated directory connections.
pub struct DirectoryPool<C: Connector = LdapConnector> {
    pool: Pool<SessionManager<C>>,
    lifecycle: Arc<Lifecycle>,
    capacity: usize,
    target: String,
    pub(crate) lookup_attribute: String,
}

impl DirectoryPool<LdapConnector> {
    /// Build the trust policy, open the seed connection and fill the pool.
    pub async fn open(config: &DirpoolConfig) -> Result<Self> {
        config.validate()?;

        let tls = TrustPolicy::from_config(&config.trust)?.into_socket_factory()?;
        let connector = LdapConnector::new(&config.directory, tls);

        Ok(Self::with_connector(connector, &config.pool)
            .await?
            .with_lookup_attribute(config.directory.lookup_attribute.clone()))
    }

    /// Open a pool from individual settings, using defaults for everything else.
    pub async fn open_with(
        host: impl Into<String>,
        port: u16,
        bind_dn: impl Into<String>,
        bind_secret: impl Into<String>,
        trust: TrustConfig,
        capacity: usize,
    ) -> Result<Self> {
        let config = DirpoolConfig {
            directory: DirectoryConfig {
                host: host.into(),
                port,
                bind_dn: bind_dn.into(),
                bind_secret: bind_secret.into(),
                ..Default::default()
            },
            trust,
            pool: PoolConfig {
                capacity,
                ..Default::default()
            },
            ..Default::default()
        };

        Self::open(&config).await
    }
}

impl<C: Connector> DirectoryPool<C> {
    /// Build a pool over any connector. Fails if the seed connection cannot be opened.
    pub async fn with_connector(connector: C, config: &PoolConfig) -> Result<Self> {
        config.validate()?;

        let target = connector.target();
        let lifecycle = Arc::new(Lifecycle::default());
        let manager = SessionManager::new(connector, lifecycle.clone());
        let timeout = config.borrow_timeout();

        let pool: Pool<SessionManager<C>> = Pool::builder(manager)
            .max_size(config.capacity)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .recycle_timeout(Some(timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build connection pool: {}", e)))?;

        let seed = pool.get().await.map_err(|e: PoolError<Error>| {
            let e = map_pool_error("open seed connection", e);
            error!("Failed to open seed connection to {}: {}", target, e);
            e
        })?;

        let mut warm = vec![seed];
        if config.prefill {
            while warm.len() < config.capacity {
                let object = pool
                    .get()
                    .await
                    .map_err(|e| map_pool_error("prefill", e))?;
                warm.push(object);
            }
        }

        for object in warm.iter_mut() {
            object.set_state(ConnectionState::Available);
        }
        let opened = warm.len();
        drop(warm);

        info!(
            "Directory pool ready: {} ({} of {} connection(s) open)",
            target, opened, config.capacity
        );

        Ok(Self {
            pool,
            lifecycle,
            capacity: config.capacity,
            target,
            lookup_attribute: DEFAULT_LOOKUP_ATTRIBUTE.to_string(),
        })
    }

    /// Attribute matched against usernames in `lookup_user_dn`
    pub fn with_lookup_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.lookup_attribute = attribute.into();
        self
    }

    pub fn lookup_attribute(&self) -> &str {
        &self.lookup_attribute
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Wait for a free connection, bounded by the borrow timeout.
    pub async fn borrow(&self) -> Result<DirectoryConnection<C>> {
        if self.lifecycle.is_closed() {
            return Err(Error::PoolClosed);
        }

        // Counted before waiting so shutdown sees borrows still in flight
        self.lifecycle.borrow_started();

        let mut object = match self.pool.get().await {
            Ok(object) => object,
            Err(e) => {
                self.lifecycle.borrow_finished();
                return Err(map_pool_error("borrow", e));
            }
        };

        if self.lifecycle.is_closed() {
            self.lifecycle.borrow_finished();
            return Err(Error::PoolClosed);
        }

        object.set_state(ConnectionState::Borrowed);
        debug!("Borrowed connection {}", object.id());

        Ok(DirectoryConnection {
            object: Some(object),
            lifecycle: self.lifecycle.clone(),
        })
    }

    /// Return a connection. Broken connections are closed instead of pooled.
    pub async fn release(&self, mut conn: DirectoryConnection<C>) {
        conn.finish().await;
    }

    /// Remove a connection from the pool and close it.
    pub async fn discard(&self, mut conn: DirectoryConnection<C>) {
        conn.mark_broken();
        conn.finish().await;
    }

    /// Close every pooled connection. Refuses while connections are borrowed.
    ///
    /// Calling it again after a successful shutdown is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let outstanding = self.lifecycle.outstanding();
        if outstanding > 0 {
            warn!(
                "Refusing to shut down {}: {} connection(s) still borrowed",
                self.target, outstanding
            );
            return Err(Error::OutstandingBorrows(outstanding));
        }

        if !self.lifecycle.close() {
            debug!("Directory pool {} already shut down", self.target);
            return Ok(());
        }

        // Idle connections are taken out one at a time and unbound. The manager
        // refuses to create new ones, so the loop ends once the pool is empty.
        let mut drain = Timeouts::default();
        drain.wait = Some(Duration::ZERO);

        let mut closed = 0;
        for _ in 0..self.pool.status().size {
            match self.pool.timeout_get(&drain).await {
                Ok(object) => {
                    let mut session = Object::take(object);
                    session.close(ConnectionState::Closed).await;
                    closed += 1;
                }
                Err(_) => break,
            }
        }

        self.pool.close();

        info!(
            "Directory pool {} shut down, closed {} connection(s)",
            self.target, closed
        );
        Ok(())
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            target: self.target.clone(),
            capacity: self.capacity,
            size: status.size,
            outstanding: self.lifecycle.outstanding(),
            live: self.lifecycle.live(),
            closed: self.lifecycle.is_closed(),
        }
    }
}

/// Exclusive borrow of one pooled connection. Dropping it returns the connection.
pub struct DirectoryConnection<C: Connector> {
    object: Option<Object<SessionManager<C>>>,
    lifecycle: Arc<Lifecycle>,
}

impl<C: Connector> DirectoryConnection<C> {
    fn pooled(&mut self) -> Result<&mut PooledSession<C::Session>> {
        match self.object.as_mut() {
            Some(object) => Ok(&mut **object),
            None => Err(Error::connection("use connection", "connection already released")),
        }
    }

    pub(crate) fn session(&mut self) -> Result<&mut C::Session> {
        Ok(self.pooled()?.session_mut())
    }

    /// Mark the guard broken when an operation failed at the transport level.
    pub(crate) fn observe<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.breaks_connection() {
                self.mark_broken();
            }
        }
        result
    }

    pub fn id(&self) -> Option<u64> {
        self.object.as_ref().map(|object| object.id())
    }

    pub fn state(&self) -> Option<ConnectionState> {
        self.object.as_ref().map(|object| object.state())
    }

    pub fn is_broken(&self) -> bool {
        self.object.as_ref().map_or(false, |object| object.is_broken())
    }

    pub fn mark_broken(&mut self) {
        if let Some(object) = self.object.as_mut() {
            if !object.is_broken() {
                warn!("Connection {} failed and will be discarded", object.id());
            }
            object.mark_broken();
        }
    }

    async fn finish(&mut self) {
        let Some(mut object) = self.object.take() else {
            return;
        };
        self.lifecycle.borrow_finished();

        if object.is_broken() {
            let mut session = Object::take(object);
            debug!("Discarding connection {}", session.id());
            session.close(ConnectionState::Discarded).await;
        } else {
            object.set_state(ConnectionState::Available);
            debug!("Released connection {}", object.id());
        }
    }
}

impl<C: Connector> Drop for DirectoryConnection<C> {
    fn drop(&mut self) {
        let Some(mut object) = self.object.take() else {
            return;
        };
        self.lifecycle.borrow_finished();

        if !object.is_broken() {
            object.set_state(ConnectionState::Available);
            return;
        }

        let mut session = Object::take(object);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    session.close(ConnectionState::Discarded).await;
                });
            }
            // Outside a runtime the socket is dropped without an unbind
            Err(_) => drop(session),
        }
    }
}

fn map_pool_error(operation: &str, err: PoolError<Error>) -> Error {
    match err {
        PoolError::Backend(e) => e,
        PoolError::Timeout(_) => Error::Timeout {
            operation: operation.to_string(),
        },
        PoolError::Closed => Error::PoolClosed,
        other => Error::connection(operation, other.to_string()),
    }
}
