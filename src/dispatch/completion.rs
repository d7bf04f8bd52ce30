// src/dispatch/completion.rs

use std::sync::Mutex;

use tracing::trace;

use crate::dispatch::request::{QueryResult, ResultHandler};
use crate::errors::{CancelReason, QueryError};

/// Holds a request's handler until the first outcome claims it.
///
/// Every path that can finish a request (the request's task, `cancel`, pool
/// close, runtime shutdown) goes through [`deliver`](Completion::deliver);
/// only the first call runs the handler.
pub(crate) struct Completion {
    id: u64,
    handler: Mutex<Option<ResultHandler>>,
}

impl Completion {
    pub(crate) fn new(id: u64, handler: ResultHandler) -> Self {
        Self {
            id,
            handler: Mutex::new(Some(handler)),
        }
    }

    /// Run the handler with `result` if nobody has yet. Returns whether this
    /// call was the one that delivered.
    pub(crate) fn deliver(&self, result: QueryResult) -> bool {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        match handler {
            Some(h) => {
                trace!(query_id = self.id, ok = result.is_ok(), "delivering result");
                h(result);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        // The task was torn down without finishing (runtime shutting down).
        if let Some(h) = self.handler.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            h(Err(QueryError::Cancelled(CancelReason::Shutdown)));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::exec::QueryResponse;

    #[test]
    fn only_first_delivery_runs_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let completion = Completion::new(1, Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(completion.deliver(Ok(QueryResponse::new(true, ""))));
        assert!(!completion.deliver(Err(QueryError::Cancelled(CancelReason::Explicit))));
        assert!(completion.is_done());
        drop(completion);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_undelivered_completion_reports_shutdown() {
        let got = Arc::new(Mutex::new(None));
        let g = Arc::clone(&got);
        let completion = Completion::new(2, Box::new(move |r| {
            *g.lock().unwrap() = Some(r);
        }));
        drop(completion);
        assert_eq!(
            got.lock().unwrap().take(),
            Some(Err(QueryError::Cancelled(CancelReason::Shutdown)))
        );
    }
}
