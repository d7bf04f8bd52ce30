// src/dispatch/dispatcher.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatch::completion::Completion;
use crate::dispatch::request::{EpochTag, ProgressListener, QueryProgress, QueryRequest, QueryResult};
use crate::errors::{CancelReason, QueryError};
use crate::exec::EngineConnector;
use crate::pool::{Acquire, ConnectionPool, Lease};
use crate::registry::{EngineInstance, EngineRegistry};

/// Handle to a submitted request, used to cancel it or check whether it has
/// finished.
#[derive(Clone)]
pub struct QueryHandle {
    id: u64,
    token: CancellationToken,
    completion: Arc<Completion>,
}

impl QueryHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether a terminal outcome has been delivered.
    pub fn is_finished(&self) -> bool {
        self.completion.is_done()
    }
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Routes requests to engine instances through the connection pool.
pub struct QueryDispatcher {
    registry: Arc<EngineRegistry>,
    pool: Arc<ConnectionPool>,
    connector: Arc<dyn EngineConnector>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for QueryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryDispatcher")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Everything the request's task needs once it has been queued.
struct InFlight {
    id: u64,
    query: String,
    token: CancellationToken,
    progress: Option<ProgressListener>,
    epoch: Option<EpochTag>,
    connector: Arc<dyn EngineConnector>,
}

impl QueryDispatcher {
    pub fn new(
        registry: Arc<EngineRegistry>,
        pool: Arc<ConnectionPool>,
        connector: Arc<dyn EngineConnector>,
    ) -> Self {
        Self {
            registry,
            pool,
            connector,
            next_id: AtomicU64::new(1),
        }
    }

    /// Submit a request. Must be called from within a Tokio runtime.
    ///
    /// Resolution and the pool acquire happen before this returns, so two
    /// requests submitted one after the other for the same instance are
    /// served in that order. If the target cannot be resolved, or the
    /// instance is unusable, the handler runs before `submit` returns.
    pub fn submit(&self, request: QueryRequest) -> QueryHandle {
        let QueryRequest {
            query,
            target,
            handler,
            progress,
            epoch,
        } = request;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let completion = Arc::new(Completion::new(id, handler));
        let token = CancellationToken::new();
        let handle = QueryHandle {
            id,
            token: token.clone(),
            completion: Arc::clone(&completion),
        };

        let acquired = self
            .registry
            .resolve(&target)
            .and_then(|instance| self.pool.acquire(&instance).map(|acq| (instance, acq)));

        let (instance, acquire) = match acquired {
            Ok(v) => v,
            Err(err) => {
                debug!(query_id = id, ?target, error = %err, "query failed before dispatch");
                completion.deliver(Err(err));
                return handle;
            }
        };

        debug!(
            query_id = id,
            instance = %instance.name,
            epoch = epoch.as_ref().map(EpochTag::epoch),
            "query submitted"
        );

        if matches!(acquire, Acquire::Waiting(_)) {
            report(&progress, QueryProgress::Queued);
        }

        let job = InFlight {
            id,
            query,
            token,
            progress,
            epoch,
            connector: Arc::clone(&self.connector),
        };

        tokio::spawn(async move {
            let result = job.run(&instance, acquire).await;
            let result = match &job.epoch {
                Some(tag) if tag.is_stale() => Err(QueryError::Cancelled(CancelReason::Superseded)),
                _ => result,
            };
            if let Err(err) = &result {
                if !err.is_cancelled() {
                    warn!(query_id = job.id, instance = %instance.name, error = %err, "query failed");
                }
            }
            completion.deliver(result);
        });

        handle
    }

    /// Cancel a request. Returns `true` if the cancellation was the outcome
    /// delivered, `false` if the request had already finished.
    pub fn cancel(&self, handle: &QueryHandle) -> bool {
        self.cancel_with(handle, CancelReason::Explicit)
    }

    pub(crate) fn cancel_with(&self, handle: &QueryHandle, reason: CancelReason) -> bool {
        let delivered = handle.completion.deliver(Err(QueryError::Cancelled(reason)));
        handle.token.cancel();
        if delivered {
            debug!(query_id = handle.id, %reason, "query cancelled");
        }
        delivered
    }
}

impl InFlight {
    async fn run(&self, instance: &Arc<EngineInstance>, acquire: Acquire) -> QueryResult {
        let mut lease = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(QueryError::Cancelled(CancelReason::Explicit)),
            lease = acquire.into_lease() => lease?,
        };

        if !lease.is_connected() {
            self.connect(instance, &mut lease).await?;
        }

        if self.epoch.as_ref().is_some_and(EpochTag::is_stale) {
            return Err(QueryError::Cancelled(CancelReason::Superseded));
        }

        report(&self.progress, QueryProgress::Running { port: lease.port() });

        let closed = lease.close_signal();
        let Some(conn) = lease.connection() else {
            return Err(QueryError::ConnectionUnavailable(format!(
                "no connection to '{}'",
                instance.name
            )));
        };

        let outcome = tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(QueryError::Cancelled(CancelReason::Explicit)),
            _ = closed.cancelled() => Err(QueryError::Cancelled(CancelReason::PoolClosed)),
            res = conn.execute(&self.query) => res,
        };

        match &outcome {
            Err(QueryError::TransportFailure(reason)) => {
                warn!(
                    query_id = self.id,
                    instance = %instance.name,
                    port = lease.port(),
                    %reason,
                    "transport failure; tearing down instance connections"
                );
                lease.mark_broken();
            }
            // The reply may still arrive; never hand this connection on.
            Err(QueryError::Cancelled(_)) => lease.discard_connection(),
            _ => {}
        }

        outcome
    }

    async fn connect(&self, instance: &Arc<EngineInstance>, lease: &mut Lease) -> Result<(), QueryError> {
        let port = lease.port();
        report(&self.progress, QueryProgress::Connecting { port });
        debug!(query_id = self.id, instance = %instance.name, port, "opening connection");

        let closed = lease.close_signal();
        let conn = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(QueryError::Cancelled(CancelReason::Explicit)),
            _ = closed.cancelled() => return Err(QueryError::Cancelled(CancelReason::PoolClosed)),
            conn = self.connector.open(Arc::clone(instance), port) => conn?,
        };

        lease.install(conn);
        Ok(())
    }
}

fn report(progress: &Option<ProgressListener>, update: QueryProgress) {
    if let Some(listener) = progress {
        listener(update);
    }
}
