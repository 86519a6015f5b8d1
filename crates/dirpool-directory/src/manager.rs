//! deadpool manager for directory sessions

use crate::session::{Connector, DirectorySession};
use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};
use dirpool_core::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Provisioned,
    Available,
    Borrowed,
    Discarded,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Discarded | ConnectionState::Closed)
    }
}

/// Counters and flags shared by the pool, its manager, sessions and borrow guards
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    live: AtomicUsize,
    outstanding: AtomicUsize,
    closed: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn borrow_started(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn borrow_finished(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns true only for the call that actually closed it
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}

/// A session owned by the pool, tagged with an id and lifecycle state.
pub struct PooledSession<S: DirectorySession> {
    id: u64,
    session: S,
    state: ConnectionState,
    broken: bool,
    lifecycle: Arc<Lifecycle>,
}

impl<S: DirectorySession> PooledSession<S> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub(crate) fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Close the session and move it to `terminal`. Runs the unbind at most once.
    pub(crate) async fn close(&mut self, terminal: ConnectionState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = terminal;

        if let Err(e) = self.session.close().await {
            debug!("Connection {} did not unbind cleanly: {}", self.id, e);
        }
    }
}

impl<S: DirectorySession> Drop for PooledSession<S> {
    fn drop(&mut self) {
        self.lifecycle.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Creates sessions through the shared connector and vets them on return.
pub struct SessionManager<C: Connector> {
    connector: C,
    next_id: AtomicU64,
    lifecycle: Arc<Lifecycle>,
}

impl<C: Connector> SessionManager<C> {
    pub(crate) fn new(connector: C, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            connector,
            next_id: AtomicU64::new(1),
            lifecycle,
        }
    }
}

#[async_trait]
impl<C: Connector> Manager for SessionManager<C> {
    type Type = PooledSession<C::Session>;
    type Error = Error;

    async fn create(&self) -> Result<Self::Type> {
        // No new sessions once shutdown has begun
        if self.lifecycle.is_closed() {
            return Err(Error::PoolClosed);
        }

        let session = self.connector.connect().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lifecycle.live.fetch_add(1, Ordering::SeqCst);

        debug!("Provisioned connection {} to {}", id, self.connector.target());

        Ok(PooledSession {
            id,
            session,
            state: ConnectionState::Provisioned,
            broken: false,
            lifecycle: self.lifecycle.clone(),
        })
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _metrics: &Metrics,
    ) -> RecycleResult<Self::Error> {
        if conn.broken || conn.session.is_closed() {
            warn!("Dropping closed connection {} from the pool", conn.id);
            conn.set_state(ConnectionState::Discarded);
            return Err(RecycleError::StaticMessage("connection is closed"));
        }

        Ok(())
    }
}
