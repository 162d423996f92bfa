// MIT License - Copyright (c) 2026 Peter Wright
// UNii LAN protocol client
//
//! # unii-lan-bridge
//!
//! Direct TCP/IP communication with UNii alarm panels over the panel's LAN
//! port (6502), with optional AES-128-CTR "basic encryption".
//!
//! The library keeps one session to the panel, polls section and input
//! status on an interval, publishes immutable snapshots, and exposes
//! arm/disarm/bypass commands. All requests share one connection and are
//! serialised on the wire.
//!
//! ## Quick Start
//!
//! ```no_run
//! use unii_lan_bridge::{PanelConfig, ProtocolGeneration, UniiPanel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PanelConfig::builder()
//!         .panel_ip("192.168.1.100")
//!         .shared_key("secret12")
//!         .generation(ProtocolGeneration::Standard)
//!         .build();
//!
//!     let mut panel = UniiPanel::connect(config).await?;
//!
//!     let mut events = panel.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     panel.disarm_section(1, "1234").await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     panel.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod comm;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod devices;
pub mod error;
pub mod event;
pub mod frame;
pub mod panel;
pub mod poll;
pub mod protocol;
pub mod snapshot;
pub mod transport;

// Re-exports for convenience
pub use config::{PanelConfig, PanelConfigBuilder, ProtocolGeneration, ReconnectPolicy};
pub use devices::input::{Input, InputCategory, InputInfo, InputState, InputStatusFlags};
pub use devices::section::{Section, SectionArmedState};
pub use error::{ProtocolError, Result, UniiError};
pub use event::{EventReceiver, PanelEvent};
pub use panel::UniiPanel;
pub use snapshot::{Catalog, Snapshot};
pub use transport::SessionState;
