// MIT License - Copyright (c) 2026 Peter Wright
// Periodic status polling and snapshot publication

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::comm::PanelSession;
use crate::error::Result;
use crate::event::{EventSender, PanelEvent};
use crate::snapshot::{Catalog, Snapshot};

/// Receiver side of the published snapshot.
pub type SnapshotReceiver = watch::Receiver<Option<Arc<Snapshot>>>;

/// Why a polling loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// Shutdown was requested
    Shutdown,
    /// The connection went away
    ConnectionLost,
}

/// Builds snapshots from status requests and publishes them.
///
/// The last good snapshot stays published when a cycle fails.
pub struct PollScheduler {
    snapshot_tx: watch::Sender<Option<Arc<Snapshot>>>,
    event_tx: EventSender,
}

impl PollScheduler {
    pub fn new(event_tx: EventSender) -> Self {
        Self {
            snapshot_tx: watch::Sender::new(None),
            event_tx,
        }
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.snapshot_tx.subscribe()
    }

    /// Run one poll cycle: section and input status, then publish.
    ///
    /// Both requests are queued at once when the dialect allows pipelining;
    /// the correlator still keeps them one-at-a-time on the wire.
    pub async fn poll_once(&self, session: &PanelSession, catalog: &Catalog) -> Result<Arc<Snapshot>> {
        let (sections, inputs) = if session.dialect().pipelined_polls {
            let (sections, inputs) = tokio::join!(
                session.request_section_status(),
                session.request_input_status()
            );
            (sections?, inputs?)
        } else {
            let sections = session.request_section_status().await?;
            let inputs = session.request_input_status().await?;
            (sections, inputs)
        };

        let snapshot = Arc::new(Snapshot::assemble(catalog, &sections, &inputs, Utc::now()));
        debug!(
            "Poll complete: {} sections, {} inputs",
            snapshot.sections.len(),
            snapshot.inputs.len()
        );
        self.publish(snapshot.clone());
        Ok(snapshot)
    }

    fn publish(&self, snapshot: Arc<Snapshot>) {
        let previous = self.latest();
        for change in snapshot.section_changes(previous.as_deref()) {
            if change.old_state.is_some() {
                info!(
                    "Section {} changed: {:?} -> {:?}",
                    change.section_id, change.old_state, change.new_state
                );
            }
            let _ = self.event_tx.send(PanelEvent::SectionStateChanged {
                section_id: change.section_id,
                old_state: change.old_state,
                new_state: change.new_state,
            });
        }
        self.snapshot_tx.send_replace(Some(snapshot.clone()));
        let _ = self.event_tx.send(PanelEvent::SnapshotPublished(snapshot));
    }

    /// Poll on a fixed interval until shutdown or the connection drops.
    ///
    /// The first cycle runs immediately.
    pub async fn run(
        &self,
        session: &PanelSession,
        catalog: &Catalog,
        period: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PollExit {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Poll loop shutting down");
                    return PollExit::Shutdown;
                }
                _ = session.closed() => {
                    return PollExit::ConnectionLost;
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.poll_once(session, catalog).await {
                warn!("Poll failed, keeping last snapshot: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::section::{Section, SectionArmedState};
    use crate::event::event_channel;

    fn snapshot(state: SectionArmedState) -> Arc<Snapshot> {
        Arc::new(Snapshot {
            taken_at: Utc::now(),
            sections: vec![Section::new(1, "Section 1".to_string(), state)],
            inputs: Vec::new(),
        })
    }

    #[test]
    fn test_publish_emits_changes_once() {
        let (event_tx, mut events) = event_channel(16);
        let poller = PollScheduler::new(event_tx);
        let mut watcher = poller.subscribe();
        assert!(poller.latest().is_none());

        poller.publish(snapshot(SectionArmedState::Disarmed));
        assert!(watcher.has_changed().unwrap());
        assert!(matches!(
            events.try_recv().unwrap(),
            PanelEvent::SectionStateChanged { section_id: 1, old_state: None, .. }
        ));
        assert!(matches!(events.try_recv().unwrap(), PanelEvent::SnapshotPublished(_)));

        poller.publish(snapshot(SectionArmedState::Disarmed));
        assert!(matches!(events.try_recv().unwrap(), PanelEvent::SnapshotPublished(_)));

        poller.publish(snapshot(SectionArmedState::ArmedAway));
        match events.try_recv().unwrap() {
            PanelEvent::SectionStateChanged { old_state, new_state, .. } => {
                assert_eq!(old_state, Some(SectionArmedState::Disarmed));
                assert_eq!(new_state, SectionArmedState::ArmedAway);
            }
            other => panic!("unexpected event {:?}", other),
        }
        let latest = poller.latest().unwrap();
        assert_eq!(latest.sections[0].armed_state, SectionArmedState::ArmedAway);
    }
}
