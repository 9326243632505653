//! # Session Server — Main Entry Point
//!
//! Startup sequence:
//! 1. Parse CLI args and configure logging (verbosity-driven).
//! 2. Ignore `SIGCHLD` so exited worker children never accumulate as
//!    zombies (SPEC_FULL.md §4.7).
//! 3. Fork once to create the root session worker (session id 0, seeded
//!    into the registry from start per spec.md I5) *before* any async
//!    runtime exists — forking after a multi-threaded Tokio runtime is
//!    already running is exactly the hazard this split avoids.
//! 4. The child becomes the root worker's synchronous process loop and
//!    never returns. The parent builds its own Tokio runtime and serves
//!    the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::{fork, ForkResult};
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

use session_server::cli::Args;
use session_server::http::{self, AppState};
use session_server::logging::ColorizedFormatter;
use session_server::process_loop;
use session_server::worker::{SessionWorker, WorkerSettings};

/// Reply channels never need more than a few seconds to find their
/// receiver — every worker is either already running or fails to start.
const IPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let layer = fmt::layer().with_writer(std::io::stderr).event_format(ColorizedFormatter).with_filter(level);

    tracing_subscriber::registry().with(layer).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    // SAFETY: installed once, at startup, before any other thread exists.
    unsafe {
        signal::signal(Signal::SIGCHLD, SigHandler::SigIgn)?;
    }

    let settings = WorkerSettings {
        runtime_dir: args.runtime_dir.clone(),
        poll_timeout: args.poll_timeout(),
        stop_poll_interval: args.stop_poll_interval(),
        connect_timeout: IPC_CONNECT_TIMEOUT,
        engine_config: args.engine_config(),
    };

    // SAFETY: the process is still single-threaded at this point, so
    // duplicating it is well-defined regardless of what the child does
    // with the copy (spec.md §4.7).
    match unsafe { fork()? } {
        ForkResult::Child => {
            let poll_timeout = settings.poll_timeout;
            let worker = SessionWorker::bind(0, settings)?;
            process_loop::run(Box::new(worker), poll_timeout)?;
            return Ok(());
        }
        ForkResult::Parent { child } => {
            info!(pid = child.as_raw(), "spawned root session worker");
        }
    }

    let state = Arc::new(AppState::new(args.runtime_dir.clone(), IPC_CONNECT_TIMEOUT));
    let app = http::router(state);
    let bind_addr = args.bind.clone();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        info!(addr = %bind_addr, "session server listening");
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "HTTP server exited with an error");
            return Err(anyhow::anyhow!(e));
        }
        Ok(())
    })
}
