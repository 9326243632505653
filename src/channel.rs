//! # Named Channel Registry
//!
//! A channel is a named, byte-message transport with one receiver and
//! potentially many senders: exactly the "ipc<id>" abstraction spec.md
//! assumes as an external collaborator. This module provides the concrete
//! realization used by the rest of the crate, built on Unix domain sockets.
//!
//! Each integer id (a session id or a negative handler id) resolves
//! deterministically to `<runtime_dir>/ipc<id>.sock`. The owning process
//! binds that socket once, at construction, as a [`ChannelReceiver`].
//! Senders are transient: [`send_frame`] connects, writes one frame, shuts
//! down the write half, and drops the connection — one connection carries
//! exactly one frame, so the receiver recovers frame boundaries simply by
//! reading a connection to EOF, with no length prefix needed.
//!
//! "Senders block until a receiver is attached" is realized as a bounded
//! connect-retry loop rather than a kernel-level block, since `connect()`
//! against a socket path with no listener fails immediately instead of
//! waiting.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::framing::Frame;

/// Resolves an integer id (session id or negative handler id) to its
/// channel name, matching spec.md §4.1's `"ipc" + <id>` naming.
pub fn channel_name(id: i32) -> String {
    format!("ipc{id}")
}

fn socket_path(runtime_dir: &Path, id: i32) -> PathBuf {
    runtime_dir.join(format!("{}.sock", channel_name(id)))
}

/// The inbound channel owned by one process, bound once at construction.
pub struct ChannelReceiver {
    listener: UnixListener,
    path: PathBuf,
    unlink_on_drop: bool,
}

impl ChannelReceiver {
    /// Binds the channel named after `id` under `runtime_dir`, creating the
    /// directory if needed. Fails if a stale socket file is left over from
    /// a previous run under the same id (ids are OS pids, so within one run
    /// this should never collide per invariant I1/I5).
    pub fn bind(runtime_dir: &Path, id: i32) -> Result<Self> {
        std::fs::create_dir_all(runtime_dir)
            .with_context(|| format!("creating runtime dir {}", runtime_dir.display()))?;

        let path = socket_path(runtime_dir, id);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("removing stale socket {}", path.display()))?;
        }

        let listener = UnixListener::bind(&path)
            .with_context(|| format!("binding channel socket {}", path.display()))?;
        listener.set_nonblocking(true)?;

        Ok(Self { listener, path, unlink_on_drop: true })
    }

    /// Prevents this value's `Drop` from unlinking its socket path.
    ///
    /// `fork(2)` duplicates a `SessionWorker` (and its `ChannelReceiver`)
    /// into the child process; the child immediately builds its own fresh
    /// receiver bound to its own pid and discards the inherited copy. That
    /// inherited copy's path is still the *parent's* live channel, owned by
    /// the still-running parent process — dropping it must not unlink the
    /// socket out from under that process. Callers disarm the inherited
    /// copy before letting it drop.
    pub fn disarm(&mut self) {
        self.unlink_on_drop = false;
    }

    /// Waits up to `timeout` for one frame to arrive, returning `None` on
    /// timeout. This is the bounded wait referenced throughout spec.md §4.4
    /// and §4.5: short enough that a quiescent worker still drains engine
    /// events promptly (the worker's poll loop calls this once per dispatch
    /// cycle with a ~10ms timeout).
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((mut stream, _addr)) => {
                    let mut buf = Vec::new();
                    stream.read_to_end(&mut buf)?;
                    return Ok(Some(buf));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Blocks indefinitely for one frame. Used by HTTP handlers waiting on
    /// their own reply channel — spec.md's "block on handler's reply
    /// channel" step has no natural timeout, since the worker will always
    /// eventually answer every request it dispatches.
    pub fn recv_blocking(&self) -> Result<Vec<u8>> {
        loop {
            if let Some(bytes) = self.recv_timeout(Duration::from_millis(50))? {
                return Ok(bytes);
            }
        }
    }
}

impl Drop for ChannelReceiver {
    fn drop(&mut self) {
        if self.unlink_on_drop {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Opens a transient sender to the channel named after `id` and writes one
/// frame. Retries the connect for up to `connect_timeout` if no receiver is
/// bound yet, matching spec.md's "senders block waiting for a receiver."
pub fn send_frame(runtime_dir: &Path, id: i32, frame: &Frame, connect_timeout: Duration) -> Result<()> {
    let path = socket_path(runtime_dir, id);
    let deadline = Instant::now() + connect_timeout;

    let mut stream = loop {
        match UnixStream::connect(&path) {
            Ok(stream) => break stream,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                if Instant::now() >= deadline {
                    return Err(e).with_context(|| {
                        format!("no receiver attached to {} within {:?}", channel_name(id), connect_timeout)
                    });
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e).with_context(|| format!("connecting to {}", path.display())),
        }
    };

    stream.write_all(&frame.encode())?;
    stream.shutdown(std::net::Shutdown::Write)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::MessageKind;

    #[test]
    fn frame_survives_a_round_trip_over_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = ChannelReceiver::bind(dir.path(), 101).unwrap();

        let sent = Frame::blob(-1, MessageKind::InitRequest, b"hello".to_vec());
        send_frame(dir.path(), 101, &sent, Duration::from_secs(1)).unwrap();

        let bytes = receiver.recv_timeout(Duration::from_secs(1)).unwrap().expect("frame arrived");
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(sent, decoded);
    }

    #[test]
    fn recv_timeout_returns_none_when_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = ChannelReceiver::bind(dir.path(), 202).unwrap();
        let result = receiver.recv_timeout(Duration::from_millis(20)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn send_times_out_without_a_receiver() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::empty(-1, MessageKind::StopRequest);
        let result = send_frame(dir.path(), 303, &frame, Duration::from_millis(20));
        assert!(result.is_err());
    }

    #[test]
    fn disarmed_receiver_leaves_its_socket_path_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut receiver = ChannelReceiver::bind(dir.path(), 404).unwrap();
        let path = dir.path().join("ipc404.sock");
        assert!(path.exists());

        receiver.disarm();
        drop(receiver);
        assert!(path.exists(), "disarmed receiver must not unlink its path");
    }

    #[test]
    fn armed_receiver_unlinks_its_socket_path_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let receiver = ChannelReceiver::bind(dir.path(), 505).unwrap();
        let path = dir.path().join("ipc505.sock");
        assert!(path.exists());

        drop(receiver);
        assert!(!path.exists());
    }
}
