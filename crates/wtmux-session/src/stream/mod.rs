//! Stream wrappers handed to applications
//!
//! Wrappers add three things on top of a raw transport stream: the
//! WebTransport header on locally opened streams, translation of transport
//! errors into WebTransport errors, and a teardown callback that removes the
//! stream from its session once it is finished.

mod bidi;
mod receive;
mod send;

use std::sync::{Arc, OnceLock};

use wtmux_core::{ConnectionError, MuxError, StreamError, TransportError};
use wtmux_proto::error_code;

pub use bidi::Stream;
pub use receive::ReceiveStream;
pub use send::SendStream;

/// Teardown callback; may run more than once, callers make it idempotent
pub(crate) type OnClose = Arc<dyn Fn() + Send + Sync>;

/// Close reason of the owning session, set when the session tears the stream down
pub(crate) type SessionSlot = Arc<OnceLock<ConnectionError>>;

/// Map a transport error into what the application sees
///
/// A stream torn down by its session reports the session's close reason.
/// Resets carrying a WebTransport application code become [`StreamError`];
/// resets outside that range are reported as unmappable. Anything else is
/// passed through.
pub(crate) fn translate_error(
    err: TransportError,
    session: &OnceLock<ConnectionError>,
) -> MuxError {
    if err != TransportError::Timeout {
        if let Some(closed) = session.get() {
            return MuxError::Session(closed.clone());
        }
    }

    match err {
        TransportError::StreamReset { code, remote } => match error_code::from_http_code(code) {
            Ok(app_code) => MuxError::Stream(StreamError::new(app_code, remote)),
            Err(source) => MuxError::UnmappedStreamReset { code, source },
        },
        other => MuxError::Transport(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wtmux_proto::error_code::{to_http_code, SESSION_GONE_ERROR_CODE};

    #[test]
    fn test_translate_app_reset() {
        let slot = OnceLock::new();
        let err = translate_error(
            TransportError::StreamReset {
                code: to_http_code(7),
                remote: true,
            },
            &slot,
        );
        assert_eq!(err.as_stream_error(), Some(&StreamError::new(7, true)));
    }

    #[test]
    fn test_translate_unmappable_reset() {
        let slot = OnceLock::new();
        let err = translate_error(
            TransportError::StreamReset {
                code: SESSION_GONE_ERROR_CODE,
                remote: true,
            },
            &slot,
        );
        assert!(matches!(
            err,
            MuxError::UnmappedStreamReset {
                code: SESSION_GONE_ERROR_CODE,
                ..
            }
        ));
    }

    #[test]
    fn test_session_close_wins_over_reset() {
        let slot = OnceLock::new();
        slot.set(ConnectionError::local(42, "bye")).unwrap();
        let err = translate_error(
            TransportError::StreamReset {
                code: SESSION_GONE_ERROR_CODE,
                remote: false,
            },
            &slot,
        );
        assert_eq!(err.as_session_close(), Some(&ConnectionError::local(42, "bye")));
    }

    #[test]
    fn test_timeout_passes_through() {
        let slot = OnceLock::new();
        slot.set(ConnectionError::default()).unwrap();
        assert!(translate_error(TransportError::Timeout, &slot).is_timeout());
    }
}
