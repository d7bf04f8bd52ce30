use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use enginesched::errors::QueryError;
use enginesched::exec::{BoxFuture, EngineConnection, EngineConnector, QueryResponse};
use enginesched::registry::EngineInstance;
use tokio::sync::Semaphore;

/// A fake connector that:
/// - answers queries from a script (default: satisfied),
/// - records opens, executed queries and per-instance concurrency,
/// - can hold every query at a gate until the test releases it.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    replies: Mutex<HashMap<String, Result<QueryResponse, QueryError>>>,
    open_failures: Mutex<HashMap<String, QueryError>>,
    delay: Mutex<Duration>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    counters: Mutex<Counters>,
}

#[derive(Default)]
struct Counters {
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    opens: HashMap<String, usize>,
    executed: Vec<(String, String)>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `query` with `result` instead of the default.
    pub fn reply(&self, query: &str, result: Result<QueryResponse, QueryError>) -> &Self {
        lock(&self.state.replies).insert(query.to_string(), result);
        self
    }

    /// Fail every connection attempt to `instance`.
    pub fn fail_opens(&self, instance: &str, err: QueryError) -> &Self {
        lock(&self.state.open_failures).insert(instance.to_string(), err);
        self
    }

    /// Every query takes `delay` (tokio time, so it works with paused clocks).
    pub fn with_delay(&self, delay: Duration) -> &Self {
        *lock(&self.state.delay) = delay;
        self
    }

    /// Hold every query until [`release`](Self::release) lets it through.
    pub fn hold(&self) -> &Self {
        *lock(&self.state.gate) = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let `n` held queries proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = lock(&self.state.gate).as_ref() {
            gate.add_permits(n);
        }
    }

    /// Stop holding queries, including those already waiting.
    pub fn release_all(&self) {
        if let Some(gate) = lock(&self.state.gate).take() {
            gate.close();
        }
    }

    pub fn max_in_flight(&self, instance: &str) -> usize {
        lock(&self.state.counters)
            .max_in_flight
            .get(instance)
            .copied()
            .unwrap_or(0)
    }

    pub fn in_flight(&self, instance: &str) -> usize {
        lock(&self.state.counters)
            .in_flight
            .get(instance)
            .copied()
            .unwrap_or(0)
    }

    pub fn opens(&self, instance: &str) -> usize {
        lock(&self.state.counters)
            .opens
            .get(instance)
            .copied()
            .unwrap_or(0)
    }

    /// `(instance, query)` pairs in the order queries reached an engine.
    pub fn executed(&self) -> Vec<(String, String)> {
        lock(&self.state.counters).executed.clone()
    }
}

impl std::fmt::Debug for FakeConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeConnector").finish_non_exhaustive()
    }
}

impl EngineConnector for FakeConnector {
    fn open(
        &self,
        instance: Arc<EngineInstance>,
        port: u16,
    ) -> BoxFuture<'static, Result<Box<dyn EngineConnection>, QueryError>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            *lock(&state.counters).opens.entry(instance.name.clone()).or_default() += 1;
            if let Some(err) = lock(&state.open_failures).get(&instance.name) {
                return Err(err.clone());
            }
            Ok(Box::new(FakeConnection {
                instance: instance.name.clone(),
                port,
                state,
            }) as Box<dyn EngineConnection>)
        })
    }
}

struct FakeConnection {
    instance: String,
    port: u16,
    state: Arc<FakeState>,
}

impl std::fmt::Debug for FakeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeConnection")
            .field("instance", &self.instance)
            .field("port", &self.port)
            .finish()
    }
}

/// Decrements the in-flight counter even when the query future is dropped.
struct InFlightGuard {
    instance: String,
    state: Arc<FakeState>,
}

impl InFlightGuard {
    fn enter(instance: &str, query: &str, state: &Arc<FakeState>) -> Self {
        let mut c = lock(&state.counters);
        let now = {
            let n = c.in_flight.entry(instance.to_string()).or_default();
            *n += 1;
            *n
        };
        let max = c.max_in_flight.entry(instance.to_string()).or_default();
        *max = (*max).max(now);
        c.executed.push((instance.to_string(), query.to_string()));
        Self {
            instance: instance.to_string(),
            state: Arc::clone(state),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(n) = lock(&self.state.counters).in_flight.get_mut(&self.instance) {
            *n = n.saturating_sub(1);
        }
    }
}

impl EngineConnection for FakeConnection {
    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, Result<QueryResponse, QueryError>> {
        Box::pin(async move {
            let _guard = InFlightGuard::enter(&self.instance, query, &self.state);

            let gate = lock(&self.state.gate).clone();
            if let Some(gate) = gate {
                // A closed gate means "release everything".
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }

            let delay = *lock(&self.state.delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            lock(&self.state.replies)
                .get(query)
                .cloned()
                .unwrap_or_else(|| Ok(QueryResponse::new(true, "")))
        })
    }

    fn describe(&self) -> String {
        format!("fake '{}' on port {}", self.instance, self.port)
    }
}
