//! # Process Loop
//!
//! The abstract shape every worker process runs: receive with a bounded
//! timeout, dispatch, and either loop again or hand off to a successor.
//! The successor hook is what makes `fork()` work without re-entering the
//! parent's receive loop in the child — see `worker/mod.rs`'s `Fork`
//! handler, which returns a new [`ProcessLoop`] bound to the child's pid
//! instead of looping on the parent's channel.

use std::time::Duration;

use anyhow::Result;

/// A process that owns one inbound channel and runs until it hands off to
/// a successor or is told to stop.
pub trait ProcessLoop {
    /// Blocks for up to `timeout` waiting for one frame, dispatches it, and
    /// returns:
    /// - `Ok(None)` to keep running this same loop
    /// - `Ok(Some(successor))` to replace this loop with `successor`
    ///   (the fork case)
    /// - `Err(_)` to propagate a fatal error out of `run`
    ///
    /// Implementations must still perform their bounded engine-event drain
    /// even when no frame arrived within `timeout` (spec.md §4.5): a quiet
    /// channel must not starve the engine's push events.
    fn tick(&mut self, timeout: Duration) -> Result<Option<Box<dyn ProcessLoop>>>;

    /// `true` once this loop has processed a `Kill` and should exit instead
    /// of ticking again.
    fn should_stop(&self) -> bool;
}

/// Runs `loop_impl` until it reports it should stop, following successor
/// hand-offs along the way.
pub fn run(mut loop_impl: Box<dyn ProcessLoop>, timeout: Duration) -> Result<()> {
    loop {
        if loop_impl.should_stop() {
            return Ok(());
        }

        match loop_impl.tick(timeout)? {
            Some(successor) => loop_impl = successor,
            None => continue,
        }
    }
}
