//! Transport-level error types covering link and session failures.

use core::fmt;
use std::io;
use std::time::Duration;

use crate::protocol;

/// Unified error type for link operations.
#[derive(Debug)]
pub enum TransportError {
    /// Underlying I/O failure.
    Io(io::Error),
    /// A write did not drain before its deadline.
    WriteTimeout {
        /// Bytes accepted by the link before the deadline.
        written: usize,
        /// Bytes the caller asked to write.
        len: usize,
        /// Deadline that expired.
        timeout: Duration,
    },
    /// The peer closed the link.
    Closed,
    /// Wire format or packaging failure.
    Protocol(protocol::Error),
}

impl TransportError {
    /// True when the link can no longer carry bytes.
    #[must_use]
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::WriteTimeout { .. } | Self::Closed)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "link i/o error: {err}"),
            Self::WriteTimeout {
                written,
                len,
                timeout,
            } => write!(
                f,
                "write timed out after {timeout:?}: {written} of {len} bytes written"
            ),
            Self::Closed => f.write_str("link closed by peer"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<protocol::Error> for TransportError {
    fn from(err: protocol::Error) -> Self {
        Self::Protocol(err)
    }
}
