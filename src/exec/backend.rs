// src/exec/backend.rs

//! Pluggable engine connection backend.
//!
//! The connection pool talks to an `EngineConnector` instead of spawning
//! processes or opening sockets itself. This makes it easy to swap in a fake
//! connector in tests while keeping the production implementation in
//! [`RealConnector`].
//!
//! - `RealConnector` spawns local engine processes ([`super::process`]) or
//!   opens TCP sessions to remote hosts ([`super::session`]).
//! - Tests can provide their own `EngineConnector` that, for example, records
//!   concurrency and answers queries from a script.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::errors::QueryError;
use crate::exec::process::LocalEngine;
use crate::exec::response::QueryResponse;
use crate::exec::session::LineSession;
use crate::registry::EngineInstance;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A live channel to one running engine.
///
/// Implementations serve one query at a time; the pool never shares a
/// connection between concurrent requests. Dropping a connection must release
/// its resources (kill the process, close the socket).
pub trait EngineConnection: Send + Debug {
    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, Result<QueryResponse, QueryError>>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Opens new connections for the pool.
pub trait EngineConnector: Send + Sync {
    /// Open a connection to `instance` on `port`.
    ///
    /// For local instances this spawns a process bound to `port`; for remote
    /// ones it connects to `address:port`.
    fn open(
        &self,
        instance: Arc<EngineInstance>,
        port: u16,
    ) -> BoxFuture<'static, Result<Box<dyn EngineConnection>, QueryError>>;
}

/// Connector used in production.
#[derive(Debug, Clone)]
pub struct RealConnector {
    connect_timeout: Duration,
}

impl RealConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl EngineConnector for RealConnector {
    fn open(
        &self,
        instance: Arc<EngineInstance>,
        port: u16,
    ) -> BoxFuture<'static, Result<Box<dyn EngineConnection>, QueryError>> {
        let limit = self.connect_timeout;

        Box::pin(async move {
            if instance.is_local {
                let deadline = Instant::now() + limit;
                let engine = LocalEngine::spawn(&instance, port, deadline).await?;
                Ok(Box::new(engine) as Box<dyn EngineConnection>)
            } else {
                let host = instance.address.as_deref().ok_or_else(|| {
                    QueryError::ConnectionUnavailable(format!(
                        "remote engine '{}' has no address",
                        instance.name
                    ))
                })?;
                let session = LineSession::connect(host, port, limit).await?;
                Ok(Box::new(session) as Box<dyn EngineConnection>)
            }
        })
    }
}
