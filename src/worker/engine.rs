//! # Engine Adapter
//!
//! Wraps a `Box<dyn Engine>` with the asynchronous submit/poll contract
//! spec.md §4.5 describes: `init`/`submit_input` schedule one round of
//! generation on a background thread and return immediately; the engine's
//! own `update`/`done` events arrive later on a thread-safe FIFO the
//! worker's main loop drains on every IPC dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use crate::engine::{Engine, EngineEvent, EventSink};

pub struct EngineAdapter {
    engine: Option<Box<dyn Engine>>,
    busy: Arc<AtomicBool>,
    initialized: Arc<AtomicBool>,
    interrupt: Arc<AtomicBool>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    worker_thread: Option<std::thread::JoinHandle<Box<dyn Engine>>>,
}

impl EngineAdapter {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        let (events_tx, events_rx) = crossbeam::channel::unbounded();
        Self {
            engine: Some(engine),
            busy: Arc::new(AtomicBool::new(false)),
            initialized: Arc::new(AtomicBool::new(false)),
            interrupt: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx,
            worker_thread: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Schedules `init(prompt)` on the background thread. Returns `true` if
    /// scheduling succeeded (the engine was idle and uninitialized).
    pub fn init(&mut self, prompt: String) -> bool {
        if self.is_busy() || self.is_initialized() {
            return false;
        }
        self.initialized.store(true, Ordering::SeqCst);
        self.schedule(prompt);
        true
    }

    /// Schedules one round of `submitInput(text)`. Returns `true` if
    /// scheduling succeeded (the engine was idle).
    pub fn submit_input(&mut self, text: String) -> bool {
        if self.is_busy() {
            return false;
        }
        self.schedule(text);
        true
    }

    fn schedule(&mut self, input: String) {
        // Join the previous round's thread before starting a new one —
        // one background worker thread is enough (spec.md §9).
        if let Some(handle) = self.worker_thread.take() {
            if let Ok(engine) = handle.join() {
                self.engine = Some(engine);
            }
        }

        let mut engine = self.engine.take().expect("engine not already running");
        let busy = Arc::clone(&self.busy);
        let interrupt = Arc::clone(&self.interrupt);
        let tx = self.events_tx.clone();

        busy.store(true, Ordering::SeqCst);
        interrupt.store(false, Ordering::SeqCst);

        self.worker_thread = Some(std::thread::spawn(move || {
            let sink = EventSink { tx };
            engine.generate(&input, &sink, &interrupt);
            busy.store(false, Ordering::SeqCst);
            engine
        }));
    }

    /// Cooperative stop: toggles the interrupt flag and polls `is_busy`
    /// until it clears. Idempotent and safe to call when not busy.
    pub fn stop(&mut self, poll_interval: Duration) {
        if !self.is_busy() {
            return;
        }
        self.interrupt.store(true, Ordering::SeqCst);
        while self.is_busy() {
            std::thread::sleep(poll_interval);
        }
        if let Some(handle) = self.worker_thread.take() {
            if let Ok(engine) = handle.join() {
                self.engine = Some(engine);
            }
        }
    }

    /// One bounded wait on the internal event queue, per spec.md §4.5's
    /// drain policy: called exactly once after every IPC dispatch.
    pub fn poll_event(&self, timeout: Duration) -> Option<EngineEvent> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::EngineConfig;
    use crate::engine::stub::StubEngine;

    fn adapter() -> EngineAdapter {
        EngineAdapter::new(Box::new(StubEngine::new(EngineConfig::default())))
    }

    #[test]
    fn init_marks_busy_and_initialized_immediately() {
        let mut adapter = adapter();
        assert!(adapter.init("hello world".to_string()));
        assert!(adapter.is_initialized());
        assert!(adapter.is_busy());

        // A second init while busy (or once initialized) must be rejected.
        assert!(!adapter.init("again".to_string()));
    }

    #[test]
    fn events_drain_in_order_and_busy_clears_on_done() {
        let mut adapter = adapter();
        adapter.submit_input("one two".to_string());

        let mut chunks = Vec::new();
        loop {
            match adapter.poll_event(Duration::from_millis(500)) {
                Some(EngineEvent::Update(chunk)) => chunks.push(chunk),
                Some(EngineEvent::Done) => break,
                None => panic!("engine never finished"),
            }
        }

        assert_eq!(chunks, vec!["one ".to_string(), "two ".to_string()]);
        assert!(!adapter.is_busy());
    }

    #[test]
    fn stop_is_idempotent_when_not_busy() {
        let mut adapter = adapter();
        adapter.stop(Duration::from_millis(5));
        adapter.stop(Duration::from_millis(5));
        assert!(!adapter.is_busy());
    }
}
