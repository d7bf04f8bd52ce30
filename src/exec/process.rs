// src/exec/process.rs

//! Local engine processes.
//!
//! Each connection to a local instance owns one spawned engine bound to one
//! port from the instance's range. The child is started with
//! `kill_on_drop(true)`, so dropping the connection (pool close, transport
//! failure, shutdown) never leaves a dangling process behind.

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::errors::QueryError;
use crate::exec::backend::{BoxFuture, EngineConnection};
use crate::exec::response::QueryResponse;
use crate::exec::session::LineSession;
use crate::registry::EngineInstance;

const LOCALHOST: &str = "127.0.0.1";

/// A spawned engine plus the session talking to it.
#[derive(Debug)]
pub struct LocalEngine {
    instance: String,
    port: u16,
    child: Child,
    session: LineSession,
}

impl LocalEngine {
    /// Spawn the instance's executable on `port` and connect to it.
    ///
    /// If the instance has a `ready_pattern`, stdout is watched for a matching
    /// line before connecting. Either way the connect is retried until
    /// `deadline`.
    pub async fn spawn(
        instance: &EngineInstance,
        port: u16,
        deadline: Instant,
    ) -> Result<Self, QueryError> {
        let mut child = spawn_child(instance, port)
            .map_err(|e| QueryError::ConnectionUnavailable(format!("{e:#}")))?;

        let ready_rx = attach_output_drains(instance, port, &mut child);

        if let Some(ready_rx) = ready_rx {
            tokio::select! {
                ready = timeout_at(deadline, ready_rx) => match ready {
                    Ok(Ok(())) => debug!(instance = %instance.name, port, "engine reported ready"),
                    Ok(Err(_)) => {
                        return Err(QueryError::TransportFailure(format!(
                            "engine '{}' closed stdout before becoming ready",
                            instance.name
                        )));
                    }
                    Err(_) => {
                        return Err(QueryError::ConnectionUnavailable(format!(
                            "engine '{}' did not report ready on port {port} in time",
                            instance.name
                        )));
                    }
                },
                status = child.wait() => return Err(exited_early(&instance.name, status)),
            }
        }

        let session = tokio::select! {
            session = LineSession::connect_with_retry(LOCALHOST, port, deadline) => session?,
            status = child.wait() => return Err(exited_early(&instance.name, status)),
        };

        info!(
            instance = %instance.name,
            port,
            pid = child.id(),
            "local engine started"
        );

        Ok(Self {
            instance: instance.name.clone(),
            port,
            child,
            session,
        })
    }
}

impl EngineConnection for LocalEngine {
    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, Result<QueryResponse, QueryError>> {
        Box::pin(async move {
            // A crashed engine would otherwise leave the read hanging until
            // the socket notices.
            tokio::select! {
                res = self.session.execute(query) => res,
                status = self.child.wait() => Err(exited_early(&self.instance, status)),
            }
        })
    }

    fn describe(&self) -> String {
        format!("local '{}' on port {}", self.instance, self.port)
    }
}

impl Drop for LocalEngine {
    fn drop(&mut self) {
        debug!(instance = %self.instance, port = self.port, "stopping local engine");
        if let Err(e) = self.child.start_kill() {
            // Already exited.
            debug!(instance = %self.instance, error = %e, "engine kill skipped");
        }
    }
}

fn spawn_child(instance: &EngineInstance, port: u16) -> Result<Child> {
    let path = instance
        .executable_path
        .as_ref()
        .ok_or_else(|| anyhow!("local engine '{}' has no executable path", instance.name))?;
    let args = instance.args_for_port(port);

    info!(
        instance = %instance.name,
        path = ?path,
        ?args,
        "spawning local engine"
    );

    let mut cmd = Command::new(path);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.spawn()
        .with_context(|| format!("spawning engine '{}' ({:?}) on port {port}", instance.name, path))
}

/// Drain stdout/stderr into debug logs so pipe buffers never fill.
///
/// Returns a receiver that fires once stdout matches the instance's
/// `ready_pattern`, when one is configured.
fn attach_output_drains(
    instance: &EngineInstance,
    port: u16,
    child: &mut Child,
) -> Option<oneshot::Receiver<()>> {
    if let Some(stderr) = child.stderr.take() {
        let name = instance.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(instance = %name, port, "stderr: {}", line);
            }
        });
    }

    let stdout = child.stdout.take()?;
    let ready_regex = instance
        .ready_pattern
        .as_ref()
        .and_then(|p| match Regex::new(p) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(
                    instance = %instance.name,
                    pattern = %p,
                    error = %e,
                    "invalid ready_pattern; ignoring"
                );
                None
            }
        });

    let (ready_tx, ready_rx) = match ready_regex {
        Some(_) => {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        }
        None => (None, None),
    };
    spawn_stdout_monitor(instance.name.clone(), port, stdout, ready_regex, ready_tx);

    ready_rx
}

fn spawn_stdout_monitor(
    name: String,
    port: u16,
    stdout: ChildStdout,
    ready_regex: Option<Regex>,
    mut ready_tx: Option<oneshot::Sender<()>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(instance = %name, port, "stdout: {}", line);

            let matched = ready_regex.as_ref().is_some_and(|re| re.is_match(&line));
            if matched {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
        debug!(instance = %name, port, "stdout monitor ended");
    });
}

fn exited_early(name: &str, status: std::io::Result<std::process::ExitStatus>) -> QueryError {
    match status {
        Ok(s) => QueryError::TransportFailure(format!("engine '{name}' exited ({s})")),
        Err(e) => QueryError::TransportFailure(format!("waiting for engine '{name}': {e}")),
    }
}
