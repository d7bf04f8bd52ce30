// src/exec/session.rs

//! Line-oriented TCP session to an engine (local or remote).

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

use crate::errors::QueryError;
use crate::exec::backend::{BoxFuture, EngineConnection};
use crate::exec::response::{encode_query, parse_response_line, QueryResponse};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// One open engine session. Serves one query at a time.
#[derive(Debug)]
pub struct LineSession {
    peer: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineSession {
    pub fn new(stream: TcpStream, peer: String) -> Self {
        let (read, write) = stream.into_split();
        Self {
            peer,
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Connect once, failing after `limit`.
    pub async fn connect(host: &str, port: u16, limit: Duration) -> Result<Self, QueryError> {
        let peer = format!("{host}:{port}");
        match timeout(limit, TcpStream::connect(peer.as_str())).await {
            Ok(Ok(stream)) => {
                debug!(%peer, "engine session established");
                Ok(Self::new(stream, peer))
            }
            Ok(Err(e)) => Err(QueryError::TransportFailure(format!(
                "connecting to {peer}: {e}"
            ))),
            Err(_) => Err(QueryError::ConnectionUnavailable(format!(
                "connecting to {peer} timed out after {limit:?}"
            ))),
        }
    }

    /// Keep retrying until the engine accepts or `deadline` passes.
    ///
    /// Used right after spawning a local engine, which needs a moment before
    /// it listens.
    pub async fn connect_with_retry(
        host: &str,
        port: u16,
        deadline: Instant,
    ) -> Result<Self, QueryError> {
        let peer = format!("{host}:{port}");
        loop {
            match TcpStream::connect(peer.as_str()).await {
                Ok(stream) => {
                    debug!(%peer, "engine session established");
                    return Ok(Self::new(stream, peer));
                }
                Err(e) if Instant::now() >= deadline => {
                    return Err(QueryError::ConnectionUnavailable(format!(
                        "engine at {peer} did not accept connections: {e}"
                    )));
                }
                Err(e) => {
                    trace!(%peer, error = %e, "engine not listening yet; retrying");
                    sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn round_trip(&mut self, query: &str) -> Result<QueryResponse, QueryError> {
        let peer = self.peer.clone();
        let io_err = |what: &str, e: std::io::Error| {
            QueryError::TransportFailure(format!("{what} {peer}: {e}"))
        };

        self.writer
            .write_all(encode_query(query).as_bytes())
            .await
            .map_err(|e| io_err("writing to", e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| io_err("flushing", e))?;

        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| io_err("reading from", e))?;
        if n == 0 {
            return Err(QueryError::TransportFailure(format!(
                "engine at {peer} closed the connection"
            )));
        }

        trace!(peer = %self.peer, reply = %line.trim_end(), "engine replied");
        parse_response_line(&line)
    }
}

impl EngineConnection for LineSession {
    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, Result<QueryResponse, QueryError>> {
        Box::pin(self.round_trip(query))
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.peer)
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn round_trip_against_line_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(q)) = lines.next_line().await {
                let reply = if q.contains("bad") { "ERR parse\n" } else { "OK true fine\n" };
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        let mut session = LineSession::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        let ok = session.execute("reachability: A -> [L1]").await.unwrap();
        assert!(ok.satisfied);
        let err = session.execute("bad query").await.unwrap_err();
        assert_eq!(err, QueryError::EngineRejected("parse".into()));
    }

    #[tokio::test]
    async fn closed_peer_is_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut session = LineSession::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        let err = session.execute("q").await.unwrap_err();
        assert!(matches!(err, QueryError::TransportFailure(_)));
    }
}
