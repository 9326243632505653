//! # Engine — the opaque inference runtime
//!
//! spec.md treats the language-model engine as an external collaborator: an
//! opaque object offering `init`, `submitInput`, `stop`, `isBusy`,
//! `isInitialized`, and a push-based `update`/`done` event stream. This
//! module defines the seam that contract lives at, [`Engine`], plus the one
//! concrete implementation this crate ships: [`stub::StubEngine`].
//!
//! A real model backend is explicitly out of scope (spec.md §1
//! "Out of scope"); `StubEngine` exists so the crate builds, runs, and its
//! tests pass end-to-end without one, the same role the teacher's
//! benchmark harness plays in exercising IPC transports without a
//! production workload.

pub mod stub;

use std::sync::atomic::AtomicBool;

/// One generation step's event sink and cooperative-cancellation flag.
///
/// `Engine::generate` runs on a dedicated background thread (see
/// `worker/engine.rs`); it must check `interrupt` between incremental steps
/// and push every output chunk through `sink` before returning, finishing
/// with `sink.done()` exactly once.
pub struct EventSink {
    pub(crate) tx: crossbeam::channel::Sender<EngineEvent>,
}

impl EventSink {
    pub fn update(&self, chunk: String) {
        let _ = self.tx.send(EngineEvent::Update(chunk));
    }

    pub fn done(&self) {
        let _ = self.tx.send(EngineEvent::Done);
    }
}

/// Push events the engine emits on its own background thread, serialized
/// through the worker's internal queue (spec.md I4).
pub enum EngineEvent {
    Update(String),
    Done,
}

/// The opaque external-collaborator seam. One round of work — either the
/// initial `init(prompt)` or a subsequent `submitInput(text)` — is a single
/// call to `generate`.
///
/// `prompt_or_input` carries either the initialization prompt or the user's
/// turn; the engine alone knows how to fold that into its running state,
/// which is exactly why spec.md keeps the engine itself out of scope.
pub trait Engine: Send + 'static {
    fn generate(&mut self, prompt_or_input: &str, sink: &EventSink, interrupt: &AtomicBool);
}
