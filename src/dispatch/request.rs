// src/dispatch/request.rs

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::errors::QueryError;
use crate::exec::QueryResponse;
use crate::types::EngineTarget;

/// Tagged outcome delivered to a request's handler.
pub type QueryResult = Result<QueryResponse, QueryError>;

pub type ResultHandler = Box<dyn FnOnce(QueryResult) + Send + 'static>;
pub type ProgressListener = Arc<dyn Fn(QueryProgress) + Send + Sync + 'static>;

/// Lifecycle updates for UI progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryProgress {
    /// The instance's budget is exhausted; waiting in its FIFO queue.
    Queued,
    /// Opening a new connection on `port`.
    Connecting { port: u16 },
    /// Query sent; waiting for the engine's answer.
    Running { port: u16 },
}

/// Binds a request to one analysis epoch.
///
/// Once the shared counter moves past `epoch` the request is stale and its
/// outcome is reported as `Cancelled(Superseded)`, whatever the engine said.
#[derive(Debug, Clone)]
pub struct EpochTag {
    epoch: u64,
    current: Arc<AtomicU64>,
}

impl EpochTag {
    pub fn new(epoch: u64, current: Arc<AtomicU64>) -> Self {
        Self { epoch, current }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_stale(&self) -> bool {
        self.current.load(Ordering::Acquire) != self.epoch
    }
}

/// One query to run on an engine instance.
pub struct QueryRequest {
    pub(crate) query: String,
    pub(crate) target: EngineTarget,
    pub(crate) handler: ResultHandler,
    pub(crate) progress: Option<ProgressListener>,
    pub(crate) epoch: Option<EpochTag>,
}

impl QueryRequest {
    /// A request for the default instance whose outcome goes to `handler`.
    pub fn new(query: impl Into<String>, handler: impl FnOnce(QueryResult) + Send + 'static) -> Self {
        Self {
            query: query.into(),
            target: EngineTarget::Default,
            handler: Box::new(handler),
            progress: None,
            epoch: None,
        }
    }

    /// Separate success and failure callbacks; exactly one of them runs.
    pub fn with_callbacks(
        query: impl Into<String>,
        on_success: impl FnOnce(QueryResponse) + Send + 'static,
        on_failure: impl FnOnce(QueryError) + Send + 'static,
    ) -> Self {
        Self::new(query, move |res| match res {
            Ok(resp) => on_success(resp),
            Err(err) => on_failure(err),
        })
    }

    pub fn target(mut self, target: EngineTarget) -> Self {
        self.target = target;
        self
    }

    pub fn on_engine(self, name: impl Into<String>) -> Self {
        self.target(EngineTarget::Named(name.into()))
    }

    pub fn with_progress(mut self, listener: impl Fn(QueryProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(listener));
        self
    }

    pub fn with_epoch(mut self, tag: EpochTag) -> Self {
        self.epoch = Some(tag);
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

impl fmt::Debug for QueryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRequest")
            .field("query", &self.query)
            .field("target", &self.target)
            .field("epoch", &self.epoch.as_ref().map(EpochTag::epoch))
            .finish_non_exhaustive()
    }
}
