// src/pool/lease.rs

//! RAII handles for pool slots.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::errors::{CancelReason, QueryError};
use crate::exec::EngineConnection;
use crate::pool::slot::InstancePool;
use crate::registry::EngineInstance;

/// Exclusive use of one connection slot of an instance.
///
/// A slot is a reserved port. It may already carry an open connection (reused
/// from the idle list) or be empty, in which case the holder opens one and
/// [`install`](Lease::install)s it.
///
/// Dropping a lease releases the slot: the connection goes straight to the
/// next waiter of the same instance, or back to the idle list. A lease that
/// outlives a `close_all` is discarded on release and its connection closed.
pub struct Lease {
    pool: Arc<InstancePool>,
    generation: u64,
    port: u16,
    conn: Option<Box<dyn EngineConnection>>,
    broken: bool,
    closed: CancellationToken,
    armed: bool,
}

impl Lease {
    pub(crate) fn new(
        pool: Arc<InstancePool>,
        generation: u64,
        port: u16,
        conn: Option<Box<dyn EngineConnection>>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            pool,
            generation,
            port,
            conn,
            broken: false,
            closed,
            armed: true,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn instance(&self) -> &Arc<EngineInstance> {
        self.pool.instance()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a connection is already open on this slot.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn install(&mut self, conn: Box<dyn EngineConnection>) {
        self.conn = Some(conn);
    }

    pub fn connection(&mut self) -> Option<&mut Box<dyn EngineConnection>> {
        self.conn.as_mut()
    }

    /// Tear the connection down on release instead of reusing it.
    ///
    /// Also drops the instance's idle connections, which are likely as dead
    /// as this one.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Close this lease's connection now without touching the instance's
    /// other connections. The slot stays reserved; the next holder reopens.
    pub fn discard_connection(&mut self) {
        self.conn = None;
    }

    /// Resolves once the pool generation this lease belongs to is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Owned form of [`closed`](Lease::closed), usable while the connection
    /// is borrowed mutably.
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Take the connection out and make drop a no-op. Used by the pool when a
    /// hand-off to a waiter fails, to avoid re-entering the pool lock.
    pub(crate) fn disarm(&mut self) -> Option<Box<dyn EngineConnection>> {
        self.armed = false;
        self.conn.take()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.pool
            .release(self.generation, self.port, self.conn.take(), self.broken);
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("instance", &self.pool.instance().name)
            .field("generation", &self.generation)
            .field("port", &self.port)
            .field("connected", &self.conn.is_some())
            .field("broken", &self.broken)
            .finish()
    }
}

/// Place in an instance's FIFO wait queue.
///
/// Dropping the ticket before it is served removes it from the queue.
#[derive(Debug)]
pub struct WaitTicket {
    pool: Arc<InstancePool>,
    id: u64,
    rx: oneshot::Receiver<Lease>,
}

impl WaitTicket {
    pub(crate) fn new(pool: Arc<InstancePool>, id: u64, rx: oneshot::Receiver<Lease>) -> Self {
        Self { pool, id, rx }
    }

    /// Wait until a slot is handed over. Fails if the pool is closed first.
    pub async fn wait(mut self) -> Result<Lease, QueryError> {
        (&mut self.rx)
            .await
            .map_err(|_| QueryError::Cancelled(CancelReason::PoolClosed))
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        self.pool.forget_waiter(self.id);
    }
}

/// Result of a synchronous acquire attempt.
#[derive(Debug)]
pub enum Acquire {
    /// A slot was available right away.
    Ready(Lease),
    /// The instance's budget is exhausted; wait for a release.
    Waiting(WaitTicket),
}

impl Acquire {
    pub async fn into_lease(self) -> Result<Lease, QueryError> {
        match self {
            Acquire::Ready(lease) => Ok(lease),
            Acquire::Waiting(ticket) => ticket.wait().await,
        }
    }
}
