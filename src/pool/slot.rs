// src/pool/slot.rs

//! Per-instance connection state.
//!
//! Every instance gets its own [`InstancePool`] with its own lock, so a busy
//! or slow engine never serializes requests for unrelated instances.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::errors::QueryError;
use crate::exec::EngineConnection;
use crate::pool::lease::{Acquire, Lease, WaitTicket};
use crate::registry::EngineInstance;

struct IdleConnection {
    port: u16,
    conn: Box<dyn EngineConnection>,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Lease>,
}

struct PoolState {
    /// Bumped by `close`; leases of older generations are discarded on release.
    generation: u64,
    /// Cancelled when the current generation is closed.
    closed: CancellationToken,
    idle: VecDeque<IdleConnection>,
    /// Ports held by a slot, whether idle or leased.
    ports_in_use: BTreeSet<u16>,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

/// Snapshot of an instance pool for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub generation: u64,
    /// Slots reserved (idle + leased).
    pub slots: usize,
    pub idle: usize,
    pub waiting: usize,
}

pub struct InstancePool {
    instance: Arc<EngineInstance>,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for InstancePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstancePool")
            .field("instance", &self.instance.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl InstancePool {
    pub fn new(instance: Arc<EngineInstance>) -> Self {
        Self {
            instance,
            state: Mutex::new(PoolState {
                generation: 0,
                closed: CancellationToken::new(),
                idle: VecDeque::new(),
                ports_in_use: BTreeSet::new(),
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            }),
        }
    }

    pub fn instance(&self) -> &Arc<EngineInstance> {
        &self.instance
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // State stays consistent across a panic in a caller; keep serving.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.lock();
        PoolStats {
            generation: st.generation,
            slots: st.ports_in_use.len(),
            idle: st.idle.len(),
            waiting: st.waiters.len(),
        }
    }

    /// Claim a slot without blocking.
    ///
    /// Order of preference: an idle connection, a fresh slot on the lowest
    /// free port while the budget allows, else a place at the back of the
    /// FIFO wait queue. Queue position is fixed here, synchronously, so
    /// requests are served in the order they called `acquire`.
    pub fn acquire(self: &Arc<Self>) -> Result<Acquire, QueryError> {
        let mut st = self.lock();

        if let Some(idle) = st.idle.pop_front() {
            trace!(instance = %self.instance.name, port = idle.port, "reusing idle connection");
            let lease = Lease::new(
                Arc::clone(self),
                st.generation,
                idle.port,
                Some(idle.conn),
                st.closed.clone(),
            );
            return Ok(Acquire::Ready(lease));
        }

        let Some((start, end)) = self.instance.port_range() else {
            return Err(QueryError::ResourceExhausted(format!(
                "engine '{}' has an empty or invalid port range",
                self.instance.name
            )));
        };

        let budget = self.instance.concurrency_budget();
        if st.ports_in_use.len() < budget {
            let port = (start..=end)
                .find(|p| !st.ports_in_use.contains(p))
                .ok_or_else(|| {
                    QueryError::ResourceExhausted(format!(
                        "no free port for engine '{}' in {start}..={end}",
                        self.instance.name
                    ))
                })?;
            st.ports_in_use.insert(port);
            debug!(instance = %self.instance.name, port, "reserved new connection slot");
            let lease = Lease::new(Arc::clone(self), st.generation, port, None, st.closed.clone());
            return Ok(Acquire::Ready(lease));
        }

        let id = st.next_waiter_id;
        st.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        st.waiters.push_back(Waiter { id, tx });
        debug!(
            instance = %self.instance.name,
            waiting = st.waiters.len(),
            budget,
            "concurrency budget exhausted; request queued"
        );
        Ok(Acquire::Waiting(WaitTicket::new(Arc::clone(self), id, rx)))
    }

    /// Return a slot. Called from `Lease::drop`.
    pub(crate) fn release(
        self: &Arc<Self>,
        generation: u64,
        port: u16,
        conn: Option<Box<dyn EngineConnection>>,
        broken: bool,
    ) {
        // Connections are closed after the lock is released.
        let mut retired: Vec<Box<dyn EngineConnection>> = Vec::new();
        let mut conn = conn;

        {
            let mut st = self.lock();

            if generation != st.generation {
                trace!(instance = %self.instance.name, port, "discarding lease from closed generation");
                retired.extend(conn.take());
            } else {
                if broken {
                    retired.extend(conn.take());
                    for idle in st.idle.drain(..).collect::<Vec<_>>() {
                        st.ports_in_use.remove(&idle.port);
                        retired.push(idle.conn);
                    }
                    debug!(
                        instance = %self.instance.name,
                        port,
                        "connection broken; tearing down instance connections"
                    );
                }

                // Hand over directly so no other caller can grab the slot in
                // between.
                let mut handed_off = false;
                while let Some(waiter) = st.waiters.pop_front() {
                    let lease = Lease::new(
                        Arc::clone(self),
                        st.generation,
                        port,
                        conn.take(),
                        st.closed.clone(),
                    );
                    match waiter.tx.send(lease) {
                        Ok(()) => {
                            trace!(instance = %self.instance.name, port, "slot handed to waiter");
                            handed_off = true;
                            break;
                        }
                        Err(mut unclaimed) => conn = unclaimed.disarm(),
                    }
                }

                if !handed_off {
                    match conn.take() {
                        Some(c) => st.idle.push_back(IdleConnection { port, conn: c }),
                        None => {
                            st.ports_in_use.remove(&port);
                        }
                    }
                }
            }
        }

        self.finish_release(retired);
    }

    fn finish_release(&self, retired: Vec<Box<dyn EngineConnection>>) {
        for conn in retired {
            debug!(instance = %self.instance.name, conn = %conn.describe(), "closing connection");
            drop(conn);
        }
    }

    /// Remove a waiter that gave up before being served.
    pub(crate) fn forget_waiter(&self, id: u64) {
        let mut st = self.lock();
        st.waiters.retain(|w| w.id != id);
    }

    /// Close every connection of this instance and fail everyone waiting.
    ///
    /// Leased connections are cancelled through the generation token and
    /// closed when their lease is dropped.
    pub fn close(&self) {
        let (retired, waiters) = {
            let mut st = self.lock();
            st.generation += 1;
            st.closed.cancel();
            st.closed = CancellationToken::new();
            st.ports_in_use.clear();
            let retired: Vec<_> = st.idle.drain(..).map(|i| i.conn).collect();
            let waiters: Vec<_> = st.waiters.drain(..).collect();
            (retired, waiters)
        };

        info!(
            instance = %self.instance.name,
            closed = retired.len(),
            cancelled_waiters = waiters.len(),
            "closing engine connections"
        );

        // Dropping the senders fails each waiter with `PoolClosed`.
        drop(waiters);
        self.finish_release(retired);
    }
}
