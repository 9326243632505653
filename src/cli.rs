//! # Command-Line Interface Module
//!
//! Argument parsing and configuration for the session server, in the style
//! of the teacher's own `cli.rs`: a `clap`-derived `Args` struct with a
//! colorized `--help`, transformed into the typed configuration the rest of
//! the crate consumes.

use std::path::PathBuf;
use std::time::Duration;

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser,
};

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Multi-session inference server — fronts a single-session engine with an
/// HTTP API backed by per-session worker processes.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// HTTP bind address
    #[arg(long, default_value = "0.0.0.0:8880")]
    pub bind: String,

    /// Directory holding channel sockets; created if missing
    #[arg(long, default_value = "/tmp/llm-session-server")]
    pub runtime_dir: PathBuf,

    /// Worker IPC recv timeout, in milliseconds
    ///
    /// Short enough that a quiescent worker still drains engine events
    /// promptly (spec.md §4.5); long enough not to burn CPU busy-polling.
    #[arg(long, default_value_t = 10)]
    pub poll_timeout_ms: u64,

    /// Poll interval while waiting for a Stop request's busy flag to clear
    #[arg(long, default_value_t = 100)]
    pub stop_poll_ms: u64,

    /// Opaque model path handed to the engine (the stub engine ignores it)
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Engine thread-count hint
    #[arg(long, default_value_t = num_cpus::get())]
    pub threads: usize,

    /// Engine context-size hint
    #[arg(long, default_value_t = 2048)]
    pub context_size: usize,

    /// Sampler seed (0 = time-based)
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Sampler temperature hint
    #[arg(long, default_value_t = 0.8)]
    pub temperature: f32,

    /// Sampler top-k hint
    #[arg(long, default_value_t = 40)]
    pub top_k: u32,

    /// Sampler top-p hint
    #[arg(long, default_value_t = 0.95)]
    pub top_p: f32,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            model: self.model.clone(),
            threads: self.threads,
            context_size: self.context_size,
            seed: self.seed,
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
        }
    }
}

/// Engine-facing configuration, forwarded verbatim to every worker's engine
/// instance so a real backend only has to consume one struct.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub model: Option<PathBuf>,
    pub threads: usize,
    pub context_size: usize,
    pub seed: u64,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
}
