//! A reference [`Engine`] that tokenizes its input on whitespace and echoes
//! it back one word at a time, pausing briefly between words so a client
//! can observe streaming `update` chunks and exercise `Stop` mid-generation.
//!
//! This is not a language model. It is the seam's existence proof: anything
//! that implements [`Engine`] — a real local inference backend included —
//! slots in without touching the worker, channel, or HTTP layers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{Engine, EventSink};
use crate::cli::EngineConfig;

pub struct StubEngine {
    #[allow(dead_code)]
    config: EngineConfig,
}

impl StubEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl Engine for StubEngine {
    fn generate(&mut self, prompt_or_input: &str, sink: &EventSink, interrupt: &AtomicBool) {
        for word in prompt_or_input.split_whitespace() {
            if interrupt.load(Ordering::SeqCst) {
                break;
            }
            sink.update(format!("{word} "));
            std::thread::sleep(Duration::from_millis(40));
        }
        sink.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn echoes_each_word_and_signals_done() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let sink = EventSink { tx };
        let interrupt = AtomicBool::new(false);

        let mut engine = StubEngine::new(EngineConfig::default());
        engine.generate("one two three", &sink, &interrupt);

        let mut chunks = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_millis(500)) {
                Ok(super::super::EngineEvent::Update(chunk)) => chunks.push(chunk),
                Ok(super::super::EngineEvent::Done) => break,
                Err(_) => panic!("engine never signalled done"),
            }
        }

        assert_eq!(chunks.join(""), "one two three ");
    }

    #[test]
    fn stops_early_when_interrupted() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let sink = EventSink { tx };
        let interrupt = AtomicBool::new(true);

        let mut engine = StubEngine::new(EngineConfig::default());
        engine.generate("one two three", &sink, &interrupt);

        let event = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert!(matches!(event, super::super::EngineEvent::Done));
    }
}
