// src/dispatch/mod.rs

//! Query Dispatcher.
//!
//! Accepts [`QueryRequest`]s, resolves their target instance, claims a pool
//! slot and runs the query on its own task. Each request's handler runs
//! exactly once with a tagged result: success, a failure, or a cancellation
//! with its [`CancelReason`](crate::errors::CancelReason).

mod completion;
pub mod dispatcher;
pub mod request;

pub use dispatcher::{QueryDispatcher, QueryHandle};
pub use request::{EpochTag, ProgressListener, QueryProgress, QueryRequest, QueryResult};

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::{oneshot, Notify};

    use super::*;
    use crate::errors::{CancelReason, QueryError};
    use crate::exec::{BoxFuture, EngineConnection, EngineConnector, QueryResponse};
    use crate::fs::mock::MockFileSystem;
    use crate::pool::ConnectionPool;
    use crate::registry::{EngineInstance, EngineRegistry};

    /// Answers `true` once `gate` is notified, one query at a time.
    #[derive(Debug)]
    struct GatedConnection {
        gate: Arc<Notify>,
    }

    impl EngineConnection for GatedConnection {
        fn execute<'a>(&'a mut self, _q: &'a str) -> BoxFuture<'a, Result<QueryResponse, QueryError>> {
            Box::pin(async move {
                self.gate.notified().await;
                Ok(QueryResponse::new(true, "done"))
            })
        }

        fn describe(&self) -> String {
            "gated".into()
        }
    }

    struct GatedConnector {
        gate: Arc<Notify>,
    }

    impl EngineConnector for GatedConnector {
        fn open(
            &self,
            _instance: Arc<EngineInstance>,
            _port: u16,
        ) -> BoxFuture<'static, Result<Box<dyn EngineConnection>, QueryError>> {
            let gate = Arc::clone(&self.gate);
            Box::pin(async move { Ok(Box::new(GatedConnection { gate }) as Box<dyn EngineConnection>) })
        }
    }

    async fn dispatcher(gate: Arc<Notify>) -> QueryDispatcher {
        let fs = MockFileSystem::new();
        fs.add_executable("/e/reveaal");
        let registry = Arc::new(EngineRegistry::new(Arc::new(fs), Duration::from_millis(50)));
        registry
            .replace_instances(vec![EngineInstance::local("Reveaal", "/e/reveaal", (5040, 5042))])
            .await
            .unwrap();
        QueryDispatcher::new(registry, Arc::new(ConnectionPool::new()), Arc::new(GatedConnector { gate }))
    }

    fn capture() -> (impl FnOnce(QueryResult) + Send + 'static, oneshot::Receiver<QueryResult>) {
        let (tx, rx) = oneshot::channel();
        (move |r| { let _ = tx.send(r); }, rx)
    }

    #[tokio::test]
    async fn empty_registry_fails_synchronously() {
        let registry = Arc::new(EngineRegistry::new(
            Arc::new(MockFileSystem::new()),
            Duration::from_millis(50),
        ));
        let gate = Arc::new(Notify::new());
        let d = QueryDispatcher::new(registry, Arc::new(ConnectionPool::new()), Arc::new(GatedConnector { gate }));

        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let handle = d.submit(QueryRequest::new("q", move |r| *s.lock().unwrap() = Some(r)));

        assert!(handle.is_finished());
        assert_eq!(seen.lock().unwrap().take(), Some(Err(QueryError::NoEngineConfigured)));
    }

    #[tokio::test]
    async fn cancelling_a_queued_request_frees_its_place() {
        let gate = Arc::new(Notify::new());
        let d = dispatcher(Arc::clone(&gate)).await;

        let (h1, rx1) = capture();
        let (h2, rx2) = capture();
        let (h3, rx3) = capture();
        let _first = d.submit(QueryRequest::new("a", h1));
        let second = d.submit(QueryRequest::new("b", h2));
        let _third = d.submit(QueryRequest::new("c", h3));

        assert!(d.cancel(&second));
        assert!(!d.cancel(&second));
        assert_eq!(
            rx2.await.unwrap(),
            Err(QueryError::Cancelled(CancelReason::Explicit))
        );

        gate.notify_one();
        assert!(rx1.await.unwrap().is_ok());
        gate.notify_one();
        assert!(rx3.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn progress_reports_connect_then_run() {
        let gate = Arc::new(Notify::new());
        let d = dispatcher(Arc::clone(&gate)).await;

        let updates = Arc::new(Mutex::new(Vec::new()));
        let u = Arc::clone(&updates);
        let (h, rx) = capture();
        d.submit(QueryRequest::new("a", h).with_progress(move |p| u.lock().unwrap().push(p)));
        gate.notify_one();
        rx.await.unwrap().unwrap();

        assert_eq!(
            *updates.lock().unwrap(),
            vec![
                QueryProgress::Connecting { port: 5040 },
                QueryProgress::Running { port: 5040 }
            ]
        );
    }
}
