// MIT License - Copyright (c) 2026 Peter Wright
// Direct TCP transport to the panel

use std::sync::Arc;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::config::PanelConfig;
use crate::crypto::UniiCrypt;
use crate::error::{Result, UniiError};
use crate::event::EventSender;
use crate::frame::FrameCodec;
use crate::protocol::{Command, Message};
use crate::transport::command::{CommandEngine, EngineSettings};

/// Pause after NORMAL_DISCONNECT so the panel can release the slot.
const DISCONNECT_GRACE: Duration = Duration::from_millis(200);

/// Upper bound on failing the queue and writing NORMAL_DISCONNECT.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Handshake attempts: the first try plus one retry after a denial.
const HANDSHAKE_ATTEMPTS: u32 = 2;

/// TCP keepalive: idle time before the first probe, probe interval, probe count.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
#[cfg(not(windows))]
const KEEPALIVE_RETRIES: u32 = 3;

/// Direct TCP transport: one session on the panel's LAN port.
pub struct DirectTcpTransport {
    engine: Arc<CommandEngine>,
}

impl DirectTcpTransport {
    /// Connect to the panel and complete the session handshake.
    ///
    /// Sequence: TCP connect → 0x0001 → 0x0002 accepted. A 0x0003 denial
    /// means the panel's connection slot is still held; the socket is closed
    /// and the handshake is retried once after `denied_retry_delay_ms`.
    pub async fn connect(config: &PanelConfig, event_tx: EventSender) -> Result<Self> {
        let crypt = UniiCrypt::new(config.shared_key.as_deref())?;
        let codec = FrameCodec::new(crypt);
        let settings = EngineSettings::from_config(config);

        for attempt in 1..=HANDSHAKE_ATTEMPTS {
            info!(
                "Connecting to panel at {}:{} (attempt {})",
                config.panel_ip, config.panel_port, attempt
            );
            let stream = open_stream(config).await?;
            let (reader, writer) = stream.into_split();
            let engine = CommandEngine::spawn(
                reader,
                writer,
                codec.clone(),
                settings,
                event_tx.clone(),
            );

            let handshake = engine
                .request_any(
                    Message::empty(Command::ConnectionRequest),
                    &[Command::ConnectionAccepted, Command::ConnectionDenied],
                    config.request_timeout(),
                )
                .await;
            let response = match handshake {
                Ok(response) => response,
                Err(UniiError::CommandTimeout { .. }) => {
                    error!("Panel did not answer the connection request");
                    return Err(UniiError::ConnectionTimeout);
                }
                Err(e) => return Err(e),
            };

            match response.command {
                Command::ConnectionAccepted => {
                    info!(
                        "Connection to panel established ({})",
                        if codec.is_encrypted() { "encrypted" } else { "cleartext" }
                    );
                    return Ok(Self {
                        engine: Arc::new(engine),
                    });
                }
                _ => {
                    engine.shutdown();
                    if attempt < HANDSHAKE_ATTEMPTS {
                        warn!(
                            "Connection denied by panel (slot busy), retrying in {:.1}s...",
                            config.denied_retry_delay_ms as f64 / 1000.0
                        );
                        sleep(Duration::from_millis(config.denied_retry_delay_ms)).await;
                    }
                }
            }
        }

        error!("Panel denied the connection");
        Err(UniiError::ConnectionDenied {
            reason: "connection slot busy".to_string(),
        })
    }

    /// Fail pending requests, send NORMAL_DISCONNECT and close the socket.
    pub async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from panel");
        let farewell = Some(Message::empty(Command::NormalDisconnect));
        match timeout(CLOSE_TIMEOUT, self.engine.close(farewell)).await {
            Ok(true) => sleep(DISCONNECT_GRACE).await,
            Ok(false) => debug!("Disconnect notice not sent"),
            Err(_) => warn!("Timed out closing the panel session"),
        }
        self.engine.shutdown();
        Ok(())
    }

    /// Shared handle to the request correlator.
    pub fn engine(&self) -> &Arc<CommandEngine> {
        &self.engine
    }
}

impl Drop for DirectTcpTransport {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

async fn open_stream(config: &PanelConfig) -> Result<TcpStream> {
    let address = format!("{}:{}", config.panel_ip, config.panel_port);
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

    let stream = match timeout(connect_timeout, TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            error!("TCP connect failed: {}", e);
            return Err(UniiError::Io(e));
        }
        Err(_) => {
            error!("TCP connect to {} timed out", address);
            return Err(UniiError::ConnectionTimeout);
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY: {}", e);
    }
    match enable_keepalive(&stream) {
        Ok(()) => debug!(
            "TCP keepalive enabled ({}s idle, {}s interval)",
            KEEPALIVE_IDLE.as_secs(),
            KEEPALIVE_INTERVAL.as_secs()
        ),
        Err(e) => warn!("Could not enable TCP keepalive: {}", e),
    }
    debug!("TCP socket connected");
    Ok(stream)
}

/// Keep an idle connection checked so a dead panel is noticed between polls.
fn enable_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);
    #[cfg(not(windows))]
    let keepalive = keepalive.with_retries(KEEPALIVE_RETRIES);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_keepalive_enabled_on_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();

        enable_keepalive(&stream).unwrap();

        let socket = SockRef::from(&stream);
        assert!(socket.keepalive().unwrap());
        #[cfg(target_os = "linux")]
        {
            assert_eq!(socket.keepalive_time().unwrap(), KEEPALIVE_IDLE);
            assert_eq!(socket.keepalive_interval().unwrap(), KEEPALIVE_INTERVAL);
            assert_eq!(socket.keepalive_retries().unwrap(), KEEPALIVE_RETRIES);
        }
    }
}
