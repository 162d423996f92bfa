// MIT License - Copyright (c) 2026 Peter Wright
// Error taxonomy

use crate::protocol::Command;

/// Reasons a received frame was rejected by the frame codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame length {length} outside 16..=4096")]
    InvalidLength { length: usize },

    #[error("Checksum mismatch (expected {expected:#06x}, received {received:#06x})")]
    ChecksumMismatch { expected: u16, received: u16 },

    #[error("Unknown protocol id {0:#04x}")]
    UnknownProtocol(u8),

    #[error("Encrypted frame received but no shared key is configured")]
    MissingKey,

    #[error("Payload truncated: declared {declared} data bytes, {available} available")]
    Truncated { declared: usize, available: usize },

    #[error("Malformed {what}: {details}")]
    Malformed { what: &'static str, details: String },
}

/// All errors that can occur in the unii-lan-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum UniiError {
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Connection refused by panel: {reason}")]
    ConnectionDenied { reason: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Command timeout: {command:?}")]
    CommandTimeout { command: Command },

    #[error("Invalid request: {reason}")]
    Validation { reason: String },

    #[error("Command {command:?} rejected by panel (result code {code:#04x})")]
    CommandRejected { command: Command, code: u8 },

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Not connected")]
    Disconnected,

    #[error("Session faulted after {attempts} failed reconnect attempts")]
    Faulted { attempts: u32 },
}

impl UniiError {
    /// Whether this error is transient and the connection should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UniiError::Io(_)
                | UniiError::ConnectionTimeout
                | UniiError::ConnectionDenied { .. }
                | UniiError::Protocol(_)
                | UniiError::CommandTimeout { .. }
                | UniiError::ConnectionLost
                | UniiError::Disconnected
        )
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        UniiError::Configuration { reason: reason.into() }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        UniiError::Validation { reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, UniiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(UniiError::ConnectionLost.is_retryable());
        assert!(UniiError::ConnectionTimeout.is_retryable());
        assert!(
            UniiError::CommandTimeout { command: Command::RequestSectionStatus }.is_retryable()
        );
        assert!(UniiError::Protocol(ProtocolError::MissingKey).is_retryable());

        assert!(!UniiError::configuration("bad key").is_retryable());
        assert!(!UniiError::validation("bad code").is_retryable());
        assert!(
            !UniiError::CommandRejected { command: Command::ArmSection, code: 0 }.is_retryable()
        );
        assert!(!UniiError::Faulted { attempts: 3 }.is_retryable());
    }

    #[test]
    fn test_display_checksum_mismatch() {
        let err = ProtocolError::ChecksumMismatch { expected: 0x31c3, received: 0x0000 };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch (expected 0x31c3, received 0x0000)"
        );
    }
}
