// src/service.rs

//! The surface exposed to the editor layer.
//!
//! [`QueryService`] wires the registry, the connection pool and the
//! dispatcher together and adds the operations that span several of them,
//! such as replacing the instance set (validate, swap, close every old
//! connection).

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::info;

use crate::analysis::{AnalysisHandle, AnalysisSettings, LocationStateSink, ModelSource};
use crate::config::SchedulerSection;
use crate::dispatch::{QueryDispatcher, QueryHandle, QueryRequest, QueryResult};
use crate::errors::{CancelReason, QueryError, ValidationReport};
use crate::exec::EngineConnector;
use crate::fs::FileSystem;
use crate::pool::{ConnectionPool, PoolStats};
use crate::registry::{EngineInstance, EngineRegistry, InstanceSet};
use crate::types::EngineTarget;

#[derive(Debug, Clone)]
pub struct QueryService {
    registry: Arc<EngineRegistry>,
    pool: Arc<ConnectionPool>,
    dispatcher: Arc<QueryDispatcher>,
}

impl QueryService {
    /// A service with an empty (degraded) registry.
    pub fn new(
        scheduler: &SchedulerSection,
        fs: Arc<dyn FileSystem>,
        connector: Arc<dyn EngineConnector>,
    ) -> Self {
        let registry = Arc::new(EngineRegistry::new(fs, scheduler.reachability_timeout()));
        let pool = Arc::new(ConnectionPool::new());
        let dispatcher = Arc::new(QueryDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            connector,
        ));
        Self {
            registry,
            pool,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<QueryDispatcher> {
        &self.dispatcher
    }

    pub fn submit(&self, request: QueryRequest) -> QueryHandle {
        self.dispatcher.submit(request)
    }

    pub fn cancel(&self, handle: &QueryHandle) -> bool {
        self.dispatcher.cancel(handle)
    }

    /// Run one query and wait for its tagged result.
    pub async fn execute(&self, query: impl Into<String>, target: EngineTarget) -> QueryResult {
        let (tx, rx) = oneshot::channel();
        let request = QueryRequest::new(query, move |res| {
            let _ = tx.send(res);
        })
        .target(target);
        self.dispatcher.submit(request);
        rx.await
            .unwrap_or(Err(QueryError::Cancelled(CancelReason::Shutdown)))
    }

    /// Validate and install a new instance set.
    ///
    /// On success every connection of the previous set is closed and queued
    /// requests fail as cancelled, so no process outlives its definition. On
    /// failure nothing changes.
    pub async fn replace_instances(
        &self,
        instances: Vec<EngineInstance>,
    ) -> Result<InstanceSet, ValidationReport> {
        let installed = self.registry.replace_instances(instances).await?;
        self.pool.reconfigure(&installed);
        Ok(installed)
    }

    pub fn default_instance(&self) -> Option<Arc<EngineInstance>> {
        self.registry.default_instance()
    }

    pub fn close_all(&self) {
        self.pool.close_all();
    }

    pub fn pool_stats(&self, instance: &str) -> Option<PoolStats> {
        self.pool.stats(instance)
    }

    /// Start the periodic analysis loop on the current runtime.
    pub fn spawn_analysis(
        &self,
        settings: AnalysisSettings,
        source: Arc<dyn ModelSource>,
        sink: Arc<dyn LocationStateSink>,
    ) -> AnalysisHandle {
        info!(target_engine = ?settings.target, "starting periodic analysis");
        AnalysisHandle::spawn(settings, Arc::clone(&self.dispatcher), source, sink)
    }
}

impl AnalysisSettings {
    /// Analysis tunables from the `[scheduler]` section.
    pub fn from_scheduler(scheduler: &SchedulerSection, target: EngineTarget) -> Self {
        Self {
            debounce: scheduler.debounce(),
            idle_tick: scheduler.idle_tick(),
            worker_pool_size: scheduler.worker_pool_size,
            target,
            exit_when_idle: false,
        }
    }
}
