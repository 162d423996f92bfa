// MIT License - Copyright (c) 2026 Peter Wright
// Panel transport

pub mod command;
pub mod direct;

/// Lifecycle of the panel session as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// Reconnect attempts exhausted
    Faulted,
}
