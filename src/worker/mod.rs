//! # Session Worker
//!
//! One OS process, one engine, one inbound channel. `SessionWorker`
//! implements [`ProcessLoop`] and the request protocol from spec.md §4.4:
//! Fork, Kill, Init, SubmitInput, Stop, ReleaseOutput, NotifyWhenReady.
//!
//! Exactly two threads ever touch a worker's state: this loop's own thread
//! (IPC recv, dispatch, queue drain — all of `output_buffer`, `waiting`,
//! and the engine's busy/initialized flags) and the engine's background
//! generation thread, which only ever talks back through the event queue
//! (spec.md §5).

pub mod engine;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use nix::unistd::{fork, getpid, ForkResult};
use tracing::{debug, info, warn};

use crate::channel::{send_frame, ChannelReceiver};
use crate::cli::EngineConfig;
use crate::engine::stub::StubEngine;
use crate::engine::{Engine, EngineEvent};
use crate::framing::{encode_release_output, Frame, MessageKind, Payload, FORK_BUSY_SENTINEL};
use crate::process_loop::ProcessLoop;

use self::engine::EngineAdapter;

/// Shared, read-only settings every worker in the process tree needs.
#[derive(Clone)]
pub struct WorkerSettings {
    pub runtime_dir: PathBuf,
    pub poll_timeout: Duration,
    pub stop_poll_interval: Duration,
    pub connect_timeout: Duration,
    pub engine_config: EngineConfig,
}

pub struct SessionWorker {
    session_id: i32,
    receiver: ChannelReceiver,
    settings: WorkerSettings,
    engine: EngineAdapter,
    output_buffer: String,
    waiting_for_ready: Vec<i32>,
    stopped: bool,
}

impl SessionWorker {
    /// Binds the channel for `session_id` and constructs the worker. Used
    /// both for the initial root worker (session id 0) and for a freshly
    /// forked child (session id = the child's own pid).
    pub fn bind(session_id: i32, settings: WorkerSettings) -> Result<Self> {
        let receiver = ChannelReceiver::bind(&settings.runtime_dir, session_id)?;
        let engine: Box<dyn Engine> = Box::new(StubEngine::new(settings.engine_config.clone()));
        Ok(Self {
            session_id,
            receiver,
            settings,
            engine: EngineAdapter::new(engine),
            output_buffer: String::new(),
            waiting_for_ready: Vec::new(),
            stopped: false,
        })
    }

    fn reply(&self, to: i32, frame: Frame) {
        if let Err(e) = send_frame(&self.settings.runtime_dir, to, &frame, self.settings.connect_timeout) {
            warn!(session = self.session_id, handler = to, error = %e, "failed to deliver reply");
        }
    }

    /// Handles a single decoded frame, per spec.md §4.4. Returns a
    /// successor worker when a fork spawns a child that must take over
    /// servicing its own channel instead of looping here.
    fn dispatch(&mut self, frame: Frame) -> Option<SessionWorker> {
        match frame.kind {
            MessageKind::ForkRequest => self.handle_fork(frame.sender_id),
            MessageKind::KillRequest => {
                self.engine.stop(self.settings.stop_poll_interval);
                // `stop` only returns once the generation thread has been
                // joined, so every event it ever pushed (including a
                // trailing `Done`) is already queued. This loop is about to
                // exit for good, so flush all of it now — otherwise any
                // handler parked in `waiting_for_ready` never gets its
                // `Ready` reply and blocks forever in `recv_blocking`.
                self.drain_all_pending_events();
                self.reply(frame.sender_id, Frame::empty(self.session_id, MessageKind::KillResponse));
                self.stopped = true;
                None
            }
            MessageKind::InitRequest => {
                self.handle_init(frame.sender_id, frame.blob_bytes());
                None
            }
            MessageKind::SubmitInputRequest => {
                self.handle_submit_input(frame.sender_id, frame.blob_bytes());
                None
            }
            MessageKind::StopRequest => {
                self.engine.stop(self.settings.stop_poll_interval);
                self.reply(frame.sender_id, Frame::empty(self.session_id, MessageKind::StopResponse));
                None
            }
            MessageKind::ReleaseOutputRequest => {
                self.handle_release_output(frame.sender_id);
                None
            }
            MessageKind::NotifyWhenReadyRequest => {
                self.handle_notify_when_ready(frame.sender_id);
                None
            }
            other => {
                warn!(session = self.session_id, kind = ?other, "unexpected request kind for a worker");
                None
            }
        }
    }

    fn handle_fork(&mut self, sender_id: i32) -> Option<SessionWorker> {
        if self.engine.is_busy() {
            self.reply(
                sender_id,
                Frame::value(self.session_id, MessageKind::ForkResponse, FORK_BUSY_SENTINEL),
            );
            return None;
        }

        // SAFETY: forking is only performed while the engine is idle, so
        // there is no in-flight background generation thread whose state
        // could be left inconsistent by the duplication (spec.md §4.7).
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child, .. }) => {
                self.reply(
                    sender_id,
                    Frame::value(self.session_id, MessageKind::ForkResponse, child.as_raw()),
                );
                None
            }
            Ok(ForkResult::Child) => {
                let child_id = getpid().as_raw();
                info!(parent = self.session_id, child = child_id, "forked new session");

                // `self` is the child process's copy-on-write duplicate of
                // the parent's own `SessionWorker` — its `receiver` is still
                // bound to the *parent's* channel path, which the parent
                // process keeps using after this call returns. Disarm it
                // before `self` is dropped (back in `process_loop::run`,
                // once this function returns a successor), or its `Drop`
                // would unlink the parent's still-live socket file.
                self.receiver.disarm();

                match ChannelReceiver::bind(&self.settings.runtime_dir, child_id) {
                    Ok(receiver) => {
                        let placeholder_engine: Box<dyn Engine> =
                            Box::new(StubEngine::new(self.settings.engine_config.clone()));
                        Some(SessionWorker {
                            session_id: child_id,
                            receiver,
                            settings: self.settings.clone(),
                            engine: std::mem::replace(&mut self.engine, EngineAdapter::new(placeholder_engine)),
                            output_buffer: std::mem::take(&mut self.output_buffer),
                            waiting_for_ready: std::mem::take(&mut self.waiting_for_ready),
                            stopped: false,
                        })
                    }
                    Err(e) => {
                        warn!(child = child_id, error = %e, "child failed to bind its channel");
                        std::process::exit(1);
                    }
                }
            }
            Err(e) => {
                warn!(session = self.session_id, error = %e, "fork(2) failed");
                self.reply(
                    sender_id,
                    Frame::value(self.session_id, MessageKind::ForkResponse, FORK_BUSY_SENTINEL),
                );
                None
            }
        }
    }

    fn handle_init(&mut self, sender_id: i32, prompt: &[u8]) {
        let prompt = String::from_utf8_lossy(prompt).into_owned();
        let result: &str = if self.engine.is_busy() {
            "Error: Model is busy"
        } else if self.engine.is_initialized() {
            "Error: Already initialized"
        } else if !self.engine.init(prompt) {
            "Error: Unknown error"
        } else {
            "Success"
        };
        self.reply(sender_id, Frame::blob(self.session_id, MessageKind::InitResponse, result.as_bytes().to_vec()));
    }

    fn handle_submit_input(&mut self, sender_id: i32, input: &[u8]) {
        let input = String::from_utf8_lossy(input).into_owned();
        let result: &str = if !self.output_buffer.is_empty() {
            "Error: Read pending output first"
        } else if self.engine.is_busy() {
            "Error: Model is busy"
        } else if !self.engine.submit_input(input) {
            "Error: Unknown error"
        } else {
            "Success"
        };
        self.reply(
            sender_id,
            Frame::blob(self.session_id, MessageKind::SubmitInputResponse, result.as_bytes().to_vec()),
        );
    }

    fn handle_release_output(&mut self, sender_id: i32) {
        let taken = std::mem::take(&mut self.output_buffer);
        let has_more = self.engine.is_busy();
        self.reply(sender_id, encode_release_output(self.session_id, taken.as_bytes(), has_more));
    }

    fn handle_notify_when_ready(&mut self, sender_id: i32) {
        if self.engine.is_busy() {
            self.waiting_for_ready.push(sender_id);
        } else {
            self.reply(sender_id, Frame::empty(self.session_id, MessageKind::Ready));
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Update(chunk) => self.output_buffer.push_str(&chunk),
            EngineEvent::Done => {
                debug_assert!(!self.engine.is_busy());
                for handler_id in self.waiting_for_ready.drain(..) {
                    self.reply(handler_id, Frame::empty(self.session_id, MessageKind::Ready));
                }
            }
        }
    }

    /// One bounded drain of the engine's internal event queue, performed
    /// after every dispatch (spec.md §4.5).
    fn drain_engine_events(&mut self) {
        if let Some(event) = self.engine.poll_event(self.settings.poll_timeout) {
            self.handle_engine_event(event);
        }
    }

    /// Drains every event sitting in the queue right now, with no waiting.
    /// Used only when this worker is about to stop for good (see the Kill
    /// handler above) and must not leave any already-queued event — and the
    /// `waiting_for_ready` replies a `Done` among them would trigger —
    /// unflushed.
    fn drain_all_pending_events(&mut self) {
        while let Some(event) = self.engine.poll_event(Duration::from_millis(0)) {
            self.handle_engine_event(event);
        }
    }
}

impl ProcessLoop for SessionWorker {
    fn tick(&mut self, timeout: Duration) -> Result<Option<Box<dyn ProcessLoop>>> {
        match self.receiver.recv_timeout(timeout)? {
            Some(bytes) => {
                let frame = match frame_from_bytes(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(session = self.session_id, error = %e, "dropping malformed frame");
                        self.drain_engine_events();
                        return Ok(None);
                    }
                };
                debug!(session = self.session_id, kind = ?frame.kind, "dispatching request");
                let successor = self.dispatch(frame);
                self.drain_engine_events();
                Ok(successor.map(|worker| Box::new(worker) as Box<dyn ProcessLoop>))
            }
            None => {
                self.drain_engine_events();
                Ok(None)
            }
        }
    }

    fn should_stop(&self) -> bool {
        self.stopped
    }
}

/// The fork response is the only request payload shaped as a fixed value;
/// everything else is empty or blob, so only `ForkRequest` (empty) needs
/// special handling here — fork *responses* are never received by a
/// worker, only sent.
fn frame_from_bytes(bytes: &[u8]) -> Result<Frame> {
    let frame = Frame::decode(bytes)?;
    debug_assert!(!matches!(frame.payload, Payload::Value(_)));
    Ok(frame)
}
