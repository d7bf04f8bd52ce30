// src/pool/mod.rs

//! Connection Pool.
//!
//! - [`slot`] holds the per-instance state: reserved ports, idle connections
//!   and the FIFO wait queue, each behind its own lock.
//! - [`lease`] provides the RAII handles (`Lease`, `WaitTicket`) through which
//!   slots are claimed and returned.
//!
//! The pool never opens connections itself; the dispatcher does that on an
//! empty lease through an [`EngineConnector`](crate::exec::EngineConnector).

pub mod lease;
pub mod slot;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::errors::{CancelReason, QueryError};
use crate::registry::EngineInstance;

pub use lease::{Acquire, Lease, WaitTicket};
pub use slot::{InstancePool, PoolStats};

/// All instance pools, keyed by instance name.
///
/// The map itself is read-mostly; contention happens only on the
/// per-instance locks.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    pools: RwLock<HashMap<String, Arc<InstancePool>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a slot for `instance`. See [`InstancePool::acquire`].
    ///
    /// An `instance` resolved before a reconfiguration that changed its
    /// definition is refused with `Cancelled(PoolClosed)`; the current pool
    /// under that name is left untouched.
    pub fn acquire(&self, instance: &Arc<EngineInstance>) -> Result<Acquire, QueryError> {
        self.pool_for(instance)?.acquire()
    }

    fn pool_for(&self, instance: &Arc<EngineInstance>) -> Result<Arc<InstancePool>, QueryError> {
        {
            let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
            if let Some(pool) = pools.get(&instance.name) {
                return Self::matching(pool, instance);
            }
        }

        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        if let Some(pool) = pools.get(&instance.name) {
            return Self::matching(pool, instance);
        }

        debug!(instance = %instance.name, "creating instance pool");
        let pool = Arc::new(InstancePool::new(Arc::clone(instance)));
        pools.insert(instance.name.clone(), Arc::clone(&pool));
        Ok(pool)
    }

    fn matching(
        pool: &Arc<InstancePool>,
        instance: &Arc<EngineInstance>,
    ) -> Result<Arc<InstancePool>, QueryError> {
        if pool.instance().as_ref() == instance.as_ref() {
            return Ok(Arc::clone(pool));
        }
        debug!(instance = %instance.name, "refusing acquire for a replaced definition");
        Err(QueryError::Cancelled(CancelReason::PoolClosed))
    }

    /// Close every connection of every instance and fail all queued requests.
    ///
    /// Pools stay usable: the next acquire opens fresh connections.
    pub fn close_all(&self) {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        info!(instances = pools.len(), "closing all engine connections");
        for pool in pools.values() {
            pool.close();
        }
    }

    /// Close everything and start over with pools for `instances` only.
    pub fn reconfigure(&self, instances: &[Arc<EngineInstance>]) {
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        for pool in pools.values() {
            pool.close();
        }
        pools.clear();
        for inst in instances {
            pools.insert(
                inst.name.clone(),
                Arc::new(InstancePool::new(Arc::clone(inst))),
            );
        }
        info!(instances = instances.len(), "connection pool reconfigured");
    }

    pub fn stats(&self, instance: &str) -> Option<PoolStats> {
        let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
        pools.get(instance).map(|p| p.stats())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::exec::{BoxFuture, EngineConnection, QueryResponse};

    #[derive(Debug)]
    struct NullConnection;

    impl EngineConnection for NullConnection {
        fn execute<'a>(&'a mut self, _q: &'a str) -> BoxFuture<'a, Result<QueryResponse, QueryError>> {
            Box::pin(async { Ok(QueryResponse::new(true, "")) })
        }

        fn describe(&self) -> String {
            "null".into()
        }
    }

    fn ready(acq: Acquire) -> Lease {
        match acq {
            Acquire::Ready(l) => l,
            Acquire::Waiting(_) => panic!("expected a ready lease"),
        }
    }

    fn waiting(acq: Acquire) -> WaitTicket {
        match acq {
            Acquire::Waiting(t) => t,
            Acquire::Ready(l) => panic!("expected to wait, got {l:?}"),
        }
    }

    #[tokio::test]
    async fn thread_safe_instance_uses_lowest_free_ports() {
        let mut inst = EngineInstance::local("e", "/bin/e", (5040, 5042));
        inst.is_thread_safe = true;
        let inst = Arc::new(inst);
        let pool = ConnectionPool::new();

        let a = ready(pool.acquire(&inst).unwrap());
        let b = ready(pool.acquire(&inst).unwrap());
        let c = ready(pool.acquire(&inst).unwrap());
        assert_eq!((a.port(), b.port(), c.port()), (5040, 5041, 5042));
        let _d = waiting(pool.acquire(&inst).unwrap());

        drop(b);
        // b had no connection, so its slot went to the waiter, not back to the free set.
        assert_eq!(pool.stats("e").unwrap().waiting, 0);
        assert_eq!(pool.stats("e").unwrap().slots, 3);
    }

    #[tokio::test]
    async fn release_hands_connection_to_next_waiter_in_order() {
        let inst = Arc::new(EngineInstance::local("e", "/bin/e", (5040, 5042)));
        let pool = ConnectionPool::new();

        let mut first = ready(pool.acquire(&inst).unwrap());
        first.install(Box::new(NullConnection));
        let second = waiting(pool.acquire(&inst).unwrap());
        let third = waiting(pool.acquire(&inst).unwrap());

        drop(first);
        let lease = second.wait().await.unwrap();
        assert!(lease.is_connected());
        assert_eq!(lease.port(), 5040);
        assert_eq!(pool.stats("e").unwrap().waiting, 1);

        drop(lease);
        let lease = third.wait().await.unwrap();
        assert!(lease.is_connected());
        drop(lease);

        let stats = pool.stats("e").unwrap();
        assert_eq!((stats.slots, stats.idle, stats.waiting), (1, 1, 0));
    }

    #[tokio::test]
    async fn dropped_ticket_leaves_the_queue() {
        let inst = Arc::new(EngineInstance::local("e", "/bin/e", (5040, 5040)));
        let pool = ConnectionPool::new();

        let held = ready(pool.acquire(&inst).unwrap());
        let ticket = waiting(pool.acquire(&inst).unwrap());
        assert_eq!(pool.stats("e").unwrap().waiting, 1);
        drop(ticket);
        assert_eq!(pool.stats("e").unwrap().waiting, 0);

        drop(held);
        assert_eq!(pool.stats("e").unwrap().slots, 0);
    }

    #[tokio::test]
    async fn close_all_cancels_waiters_and_in_flight_leases() {
        let inst = Arc::new(EngineInstance::local("e", "/bin/e", (5040, 5040)));
        let pool = ConnectionPool::new();

        let mut held = ready(pool.acquire(&inst).unwrap());
        held.install(Box::new(NullConnection));
        let ticket = waiting(pool.acquire(&inst).unwrap());

        pool.close_all();

        assert_eq!(
            ticket.wait().await.unwrap_err(),
            QueryError::Cancelled(CancelReason::PoolClosed)
        );
        tokio::time::timeout(Duration::from_secs(1), held.closed())
            .await
            .expect("lease should observe the close");

        // A fresh acquire after close works against the new generation.
        let fresh = ready(pool.acquire(&inst).unwrap());
        assert_eq!(fresh.generation(), 1);
        assert!(!fresh.is_connected());

        // The stale lease is discarded without touching the new generation.
        drop(held);
        assert_eq!(pool.stats("e").unwrap().slots, 1);
        assert_eq!(pool.stats("e").unwrap().idle, 0);
    }

    #[tokio::test]
    async fn broken_connection_slot_is_reopened_by_next_user() {
        let inst = Arc::new(EngineInstance::local("e", "/bin/e", (5040, 5040)));
        let pool = ConnectionPool::new();

        let mut lease = ready(pool.acquire(&inst).unwrap());
        lease.install(Box::new(NullConnection));
        let ticket = waiting(pool.acquire(&inst).unwrap());
        lease.mark_broken();
        drop(lease);

        let next = ticket.wait().await.unwrap();
        assert!(!next.is_connected());
        assert_eq!(next.port(), 5040);
    }

    #[tokio::test]
    async fn stale_definition_cannot_displace_the_current_pool() {
        let old = Arc::new(EngineInstance::local("e", "/bin/e", (5040, 5040)));
        let new = Arc::new(EngineInstance::local("e", "/bin/e", (6000, 6000)));
        let pool = ConnectionPool::new();
        pool.reconfigure(&[Arc::clone(&new)]);

        let current = ready(pool.acquire(&new).unwrap());
        assert_eq!(current.port(), 6000);

        assert_eq!(
            pool.acquire(&old).err(),
            Some(QueryError::Cancelled(CancelReason::PoolClosed))
        );
        assert!(!current.close_signal().is_cancelled());
        assert_eq!(pool.stats("e").unwrap().generation, 0);
        assert_eq!(pool.stats("e").unwrap().slots, 1);
    }

    #[test]
    fn inverted_port_range_fails_immediately() {
        let inst = Arc::new(EngineInstance::remote("far", "10.0.0.1", (10, 5)));
        let pool = Arc::new(InstancePool::new(inst));

        match pool.acquire() {
            Err(QueryError::ResourceExhausted(msg)) => assert!(msg.contains("far")),
            Err(e) => panic!("expected ResourceExhausted, got {e:?}"),
            Ok(_) => panic!("expected ResourceExhausted, got a slot"),
        }
        assert_eq!(pool.stats().waiting, 0);
    }
}
