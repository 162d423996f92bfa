// MIT License - Copyright (c) 2026 Peter Wright
// Session lifecycle, catalog discovery and typed panel operations

use std::sync::Arc;

use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Dialect, PanelConfig};
use crate::constants::ARRANGEMENT_HEADER_LEN;
use crate::devices::input::{decode_input_arrangement, decode_input_status, InputStatusRecord};
use crate::devices::section::{decode_section_status, Section, SectionStatus};
use crate::error::{Result, UniiError};
use crate::event::{EventSender, PanelEvent};
use crate::protocol::{
    arm_section_request, bypass_input_request, check_command_result, disarm_section_request,
    input_arrangement_request, input_status_request, section_status_request,
    unbypass_input_request, Message,
};
use crate::snapshot::Catalog;
use crate::transport::command::CommandEngine;
use crate::transport::direct::DirectTcpTransport;

/// High-level communication handler.
///
/// Owns the transport for one connection and hands out [`PanelSession`]
/// handles for typed requests.
pub struct UniiComm {
    config: PanelConfig,
    transport: Option<DirectTcpTransport>,
    event_tx: EventSender,
}

impl UniiComm {
    pub fn new(config: PanelConfig, event_tx: EventSender) -> Self {
        Self {
            config,
            transport: None,
            event_tx,
        }
    }

    /// Open the TCP session and complete the handshake.
    pub async fn connect(&mut self) -> Result<()> {
        info!("Starting connection to panel");
        let transport = DirectTcpTransport::connect(&self.config, self.event_tx.clone()).await?;
        self.transport = Some(transport);
        Ok(())
    }

    /// Typed request handle bound to the current connection.
    pub fn session(&self) -> Result<PanelSession> {
        let engine = self.engine()?.clone();
        Ok(PanelSession::new(engine, &self.config))
    }

    pub(crate) fn engine(&self) -> Result<&Arc<CommandEngine>> {
        match self.transport {
            Some(ref t) => Ok(t.engine()),
            None => Err(UniiError::Disconnected),
        }
    }

    /// Fail pending requests, send NORMAL_DISCONNECT and drop the transport.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(transport) = self.transport.take() {
            transport.disconnect().await?;
        }
        Ok(())
    }
}

/// Cheap, cloneable handle for typed requests over one connection.
///
/// All requests funnel through the same [`CommandEngine`], so concurrent
/// callers are serialised on the wire.
#[derive(Clone)]
pub struct PanelSession {
    engine: Arc<CommandEngine>,
    dialect: Dialect,
    request_timeout: Duration,
    discovery_timeout: Duration,
    max_input_blocks: u16,
}

impl PanelSession {
    pub fn new(engine: Arc<CommandEngine>, config: &PanelConfig) -> Self {
        Self {
            engine,
            dialect: config.dialect(),
            request_timeout: config.request_timeout(),
            discovery_timeout: config.discovery_timeout(),
            max_input_blocks: config.max_input_blocks,
        }
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Resolves when the underlying connection is gone.
    pub async fn closed(&self) {
        self.engine.closed().await
    }

    async fn request(&self, message: Message) -> Result<Message> {
        self.engine.request(message, self.request_timeout).await
    }

    /// Current armed state of every section.
    pub async fn request_section_status(&self) -> Result<Vec<SectionStatus>> {
        let response = self.request(section_status_request()).await?;
        Ok(decode_section_status(&self.dialect, &response.data)?)
    }

    /// Current status byte(s) of every input.
    pub async fn request_input_status(&self) -> Result<Vec<InputStatusRecord>> {
        let response = self.request(input_status_request()).await?;
        Ok(decode_input_status(&self.dialect, &response.data)?)
    }

    /// Build the catalog: section ids from a status query, input names and
    /// types from the arrangement blocks.
    pub async fn discover_catalog(&self) -> Result<Catalog> {
        let mut catalog = Catalog::default();

        for status in self.request_section_status().await? {
            catalog
                .sections
                .insert(status.id, Section::default_name(status.id));
        }
        debug!("Section discovery complete: {} sections", catalog.sections.len());

        for block in 1..=self.max_input_blocks {
            let message = input_arrangement_request(block);
            let response = match self.engine.request(message, self.discovery_timeout).await {
                Ok(response) => response,
                Err(UniiError::CommandTimeout { .. }) => {
                    debug!("Arrangement block {} timed out, ending discovery", block);
                    break;
                }
                Err(e) => return Err(e),
            };
            if response.data.len() < ARRANGEMENT_HEADER_LEN {
                debug!("Arrangement block {} empty, ending discovery", block);
                break;
            }
            for info in decode_input_arrangement(&self.dialect, block, &response.data) {
                catalog.inputs.insert(info.id, info);
            }
        }

        let published = catalog.published_inputs().count();
        info!(
            "Discovered {} sections and {} inputs ({} published)",
            catalog.sections.len(),
            catalog.inputs.len(),
            published
        );
        Ok(catalog)
    }

    pub async fn arm_section(&self, section: u16, code: &str) -> Result<()> {
        let message = arm_section_request(&self.dialect, section, code)?;
        self.run_command(message, format!("arm section {}", section))
            .await
    }

    pub async fn disarm_section(&self, section: u16, code: &str) -> Result<()> {
        let message = disarm_section_request(&self.dialect, section, code)?;
        self.run_command(message, format!("disarm section {}", section))
            .await
    }

    pub async fn bypass_input(&self, input: u16, code: &str) -> Result<()> {
        let message = bypass_input_request(input, code)?;
        self.run_command(message, format!("bypass input {}", input))
            .await
    }

    pub async fn unbypass_input(&self, input: u16, code: &str) -> Result<()> {
        let message = unbypass_input_request(input, code)?;
        self.run_command(message, format!("unbypass input {}", input))
            .await
    }

    async fn run_command(&self, message: Message, what: String) -> Result<()> {
        let command = message.command;
        let response = self.request(message).await?;
        match check_command_result(command, &response) {
            Ok(()) => {
                info!("Panel accepted {}", what);
                Ok(())
            }
            Err(e) => {
                warn!("Panel rejected {}: {}", what, e);
                Err(e)
            }
        }
    }
}

/// Emit the catalog summary event.
pub(crate) fn announce_catalog(event_tx: &EventSender, catalog: &Catalog) {
    let _ = event_tx.send(PanelEvent::CatalogDiscovered {
        sections: catalog.sections.len(),
        inputs: catalog.published_inputs().count(),
    });
}
