//! One direction of an in-memory stream

use std::cmp;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use wtmux_core::TransportError;

#[derive(Debug, Default)]
struct PipeState {
    data: BytesMut,
    finished: bool,
    /// Set by the writer's cancel_write
    reset: Option<u64>,
    /// Set by the reader's cancel_read
    stop_sending: Option<u64>,
    reset_calls: usize,
    stop_sending_calls: usize,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

/// Byte pipe shared by a sending half and the peer's receiving half
#[derive(Debug)]
pub(crate) struct Pipe {
    state: Mutex<PipeState>,
    changed: Notify,
    /// Most bytes buffered before writes block
    window: usize,
    /// Connection-wide close signal
    closed: CancellationToken,
}

impl Pipe {
    pub(crate) fn new(window: usize, closed: CancellationToken) -> Self {
        Self {
            state: Mutex::new(PipeState::default()),
            changed: Notify::new(),
            window,
            closed,
        }
    }

    pub(crate) async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state.lock();
                if let Some(code) = state.reset {
                    return Err(TransportError::StreamReset { code, remote: false });
                }
                if let Some(code) = state.stop_sending {
                    return Err(TransportError::StreamReset { code, remote: true });
                }
                if state.finished {
                    return Err(TransportError::StreamClosed);
                }
                if self.closed.is_cancelled() {
                    return Err(connection_closed());
                }
                if expired(state.write_deadline) {
                    return Err(TransportError::Timeout);
                }

                let room = self.window.saturating_sub(state.data.len());
                if buf.is_empty() {
                    return Ok(0);
                }
                if room > 0 {
                    let n = cmp::min(room, buf.len());
                    state.data.extend_from_slice(&buf[..n]);
                    drop(state);
                    self.changed.notify_waiters();
                    return Ok(n);
                }
                state.write_deadline
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = self.closed.cancelled() => {}
                _ = sleep_until(deadline) => {}
            }
        }
    }

    pub(crate) async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state.lock();
                if let Some(code) = state.stop_sending {
                    return Err(TransportError::StreamReset { code, remote: false });
                }
                if let Some(code) = state.reset {
                    return Err(TransportError::StreamReset { code, remote: true });
                }
                if !state.data.is_empty() {
                    let n = cmp::min(buf.len(), state.data.len());
                    buf[..n].copy_from_slice(&state.data[..n]);
                    state.data.advance(n);
                    drop(state);
                    self.changed.notify_waiters();
                    return Ok(n);
                }
                if state.finished {
                    return Ok(0);
                }
                if self.closed.is_cancelled() {
                    return Err(connection_closed());
                }
                if expired(state.read_deadline) {
                    return Err(TransportError::Timeout);
                }
                state.read_deadline
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = self.closed.cancelled() => {}
                _ = sleep_until(deadline) => {}
            }
        }
    }

    pub(crate) fn finish(&self) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            if let Some(code) = state.reset {
                return Err(TransportError::StreamReset { code, remote: false });
            }
            state.finished = true;
        }
        self.changed.notify_waiters();
        Ok(())
    }

    pub(crate) fn reset(&self, code: u64) {
        {
            let mut state = self.state.lock();
            state.reset_calls += 1;
            if state.reset.is_none() {
                state.reset = Some(code);
            }
        }
        self.changed.notify_waiters();
    }

    pub(crate) fn stop_sending(&self, code: u64) {
        {
            let mut state = self.state.lock();
            state.stop_sending_calls += 1;
            if state.stop_sending.is_none() {
                state.stop_sending = Some(code);
                state.data.clear();
            }
        }
        self.changed.notify_waiters();
    }

    pub(crate) fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.state.lock().read_deadline = deadline;
        self.changed.notify_waiters();
    }

    pub(crate) fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.state.lock().write_deadline = deadline;
        self.changed.notify_waiters();
    }

    pub(crate) fn reset_code(&self) -> Option<u64> {
        self.state.lock().reset
    }

    pub(crate) fn reset_calls(&self) -> usize {
        self.state.lock().reset_calls
    }

    pub(crate) fn stop_sending_code(&self) -> Option<u64> {
        self.state.lock().stop_sending
    }

    pub(crate) fn stop_sending_calls(&self) -> usize {
        self.state.lock().stop_sending_calls
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.lock().finished
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| d <= Instant::now())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn connection_closed() -> TransportError {
    TransportError::ConnectionClosed("connection closed".to_string())
}
