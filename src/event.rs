// MIT License - Copyright (c) 2026 Peter Wright
// Panel events

use std::sync::Arc;

use crate::devices::section::SectionArmedState;
use crate::snapshot::Snapshot;

/// All events that can be emitted by the panel.
///
/// Users subscribe via `panel.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<PanelEvent>`.
#[derive(Debug, Clone)]
pub enum PanelEvent {
    /// TCP connection to panel established and handshake accepted
    Connected,
    /// TCP connection closed or lost
    Disconnected,
    /// Catalog (re)discovered after connecting
    CatalogDiscovered { sections: usize, inputs: usize },
    /// A poll completed and a new snapshot was published
    SnapshotPublished(Arc<Snapshot>),
    /// A section's armed state differs from the previous snapshot
    SectionStateChanged {
        section_id: u16,
        old_state: Option<SectionArmedState>,
        new_state: SectionArmedState,
    },
    /// Unsolicited armed-state notification pushed by the panel
    SectionStateReported {
        section_id: u16,
        state: SectionArmedState,
    },
    /// Reconnect attempts exhausted; the session will not retry
    Faulted,
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<PanelEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<PanelEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
