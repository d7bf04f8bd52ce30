// src/exec/response.rs

//! Engine reply parsing.
//!
//! Engines answer every query with exactly one line:
//!
//! ```text
//! OK true  [message]
//! OK false [message]
//! ERR <message>
//! ```

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::QueryError;

static RESPONSE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<status>OK|ERR)(?:\s+(?P<rest>.*))?$").expect("response pattern is valid")
});

/// Successful engine answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    /// Whether the queried property holds (e.g. the location is reachable).
    pub satisfied: bool,
    /// Free-form text the engine attached to the answer.
    pub message: String,
}

impl QueryResponse {
    pub fn new(satisfied: bool, message: impl Into<String>) -> Self {
        Self {
            satisfied,
            message: message.into(),
        }
    }
}

/// Parse a single reply line.
pub fn parse_response_line(line: &str) -> Result<QueryResponse, QueryError> {
    let line = line.trim();
    let caps = RESPONSE_LINE.captures(line).ok_or_else(|| {
        QueryError::TransportFailure(format!("unexpected engine reply: {line:?}"))
    })?;

    let rest = caps.name("rest").map_or("", |m| m.as_str()).trim();

    if &caps["status"] == "ERR" {
        let msg = if rest.is_empty() { "no reason given" } else { rest };
        return Err(QueryError::EngineRejected(msg.to_string()));
    }

    let (verdict, message) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let satisfied = match verdict {
        "true" => true,
        "false" => false,
        other => {
            return Err(QueryError::TransportFailure(format!(
                "engine reply has no verdict (got {other:?})"
            )));
        }
    };

    Ok(QueryResponse::new(satisfied, message.trim()))
}

/// Queries travel as one line; embedded newlines are flattened.
pub fn encode_query(query: &str) -> String {
    let mut line: String = query
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    line.push('\n');
    line
}
