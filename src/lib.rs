//! # Multi-Session Inference Server
//!
//! A multi-session front-end for a single-session inference engine: one
//! parent process owns the HTTP API and a registry of live sessions, and
//! one OS process per session runs that session's engine, reachable only
//! through named-channel IPC. New sessions are branched off an existing,
//! idle one via `fork(2)`, inheriting its evaluated state through
//! copy-on-write rather than re-running it from scratch.

pub mod channel;
pub mod cli;
pub mod engine;
pub mod framing;
pub mod http;
pub mod logging;
pub mod process_loop;
pub mod registry;
pub mod worker;

pub use cli::{Args, EngineConfig};
pub use framing::{Frame, MessageKind, Payload};
pub use worker::{SessionWorker, WorkerSettings};

/// The current version of the session server.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
