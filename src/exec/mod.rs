// src/exec/mod.rs

//! Engine connection layer.
//!
//! This module is responsible for actually talking to verification engines:
//! spawning local engine processes, opening TCP sessions to remote ones, and
//! turning their one-line replies into results.
//!
//! - [`backend`] provides the `EngineConnector` / `EngineConnection` traits
//!   and the production `RealConnector`; tests replace it with a fake.
//! - [`process`] spawns and supervises local engine processes.
//! - [`session`] is the line-oriented TCP session used for both localities.
//! - [`response`] parses engine replies.

pub mod backend;
pub mod process;
pub mod response;
pub mod session;

pub use backend::{BoxFuture, EngineConnection, EngineConnector, RealConnector};
pub use response::QueryResponse;
