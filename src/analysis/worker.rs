// src/analysis/worker.rs

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::analysis::model::{reachability_query, LocationStateSink};
use crate::dispatch::{EpochTag, QueryDispatcher, QueryRequest};
use crate::errors::{CancelReason, QueryError};
use crate::types::{EngineTarget, LocationKey, LocationState};

/// One location's reachability check within a run.
pub(crate) struct LocationCheck {
    pub key: LocationKey,
    pub target: EngineTarget,
    pub tag: EpochTag,
    pub token: CancellationToken,
    pub dispatcher: Arc<QueryDispatcher>,
    pub sink: Arc<dyn LocationStateSink>,
}

impl LocationCheck {
    /// Submit the query, wait for its verdict and publish it.
    ///
    /// If the run is cancelled first, the request is cancelled as superseded
    /// and the location is marked `Unknown`.
    pub(crate) async fn run(self) {
        let (tx, rx) = oneshot::channel();
        let request = QueryRequest::new(reachability_query(&self.key), move |res| {
            let _ = tx.send(res);
        })
        .target(self.target.clone())
        .with_epoch(self.tag.clone());

        let handle = self.dispatcher.submit(request);

        let result = tokio::select! {
            res = rx => res.unwrap_or(Err(QueryError::Cancelled(CancelReason::Shutdown))),
            _ = self.token.cancelled() => {
                self.dispatcher.cancel_with(&handle, CancelReason::Superseded);
                Err(QueryError::Cancelled(CancelReason::Superseded))
            }
        };

        let state = match &result {
            Ok(resp) if resp.satisfied => LocationState::Reachable,
            Ok(_) => LocationState::Unreachable,
            Err(err) if err.is_cancelled() => {
                trace!(location = %self.key, epoch = self.tag.epoch(), "check cancelled");
                LocationState::Unknown
            }
            Err(err) => {
                debug!(location = %self.key, epoch = self.tag.epoch(), error = %err, "check failed");
                LocationState::Unknown
            }
        };

        self.sink.update(&self.key, state);
    }
}
