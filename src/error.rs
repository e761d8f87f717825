//! Error types for the relay
//!
//! Defines application-level errors and protocol (framing) errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Application-level errors
///
/// Transport errors end the current session only; the worker goes back
/// to the pool. Protocol errors are reported to the client and the
/// session carries on.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (ends the session)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Line codec error (ends the session)
    #[error("Codec error: {0}")]
    Codec(#[from] LinesCodecError),

    /// Malformed frame from the client
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The chat state actor has stopped
    #[error("Chat state unavailable")]
    StateUnavailable,

    /// Port argument is not a valid port number
    #[error("Invalid port: {0}")]
    InvalidPort(String),
}

impl AppError {
    /// Whether this error is a peer reset rather than a genuine failure
    pub fn is_connection_reset(&self) -> bool {
        let io = match self {
            AppError::Io(e) => e,
            AppError::Codec(LinesCodecError::Io(e)) => e,
            _ => return false,
        };
        matches!(
            io.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
        )
    }
}

/// Frame parsing errors
///
/// Produced by the frame parser for input that does not match any known
/// frame layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// First line of a frame is not a known header
    #[error("Unknown frame: {0}")]
    UnknownFrame(String),

    /// A field line is missing or out of order
    #[error("{frame} frame expected {field} but got '{line}'")]
    MissingField {
        frame: &'static str,
        field: &'static str,
        line: String,
    },

    /// A line was longer than the accepted maximum
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// A line was not valid UTF-8
    #[error("Line is not valid UTF-8")]
    InvalidUtf8,

    /// A numeric field did not parse
    #[error("Invalid number for {field}: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
}
