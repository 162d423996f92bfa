// Scripted mock panel for integration tests
//
// Listens on a loopback port, speaks the framed protocol through the crate's
// own codec, and records every request it receives.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use unii_lan_bridge::crypto::UniiCrypt;
use unii_lan_bridge::frame::{FrameBuffer, FrameCodec, SessionCounters};
use unii_lan_bridge::protocol::{Command, Message};
use unii_lan_bridge::{PanelConfig, ReconnectPolicy};

pub const SHARED_KEY: &str = "secret12";

/// What the mock panel answers with.
#[derive(Clone)]
pub struct PanelScript {
    pub key: Option<&'static str>,
    /// Section-status response data
    pub sections: Vec<u8>,
    /// Input-status response data
    pub inputs: Vec<u8>,
    /// Arrangement response data per block (block 1 first)
    pub arrangement: Vec<Vec<u8>>,
    /// Result byte for arm/disarm/bypass/unbypass
    pub command_result: u8,
    /// Deny the handshake on the first connection
    pub deny_first: bool,
    /// Close the first connection after this many status polls
    pub drop_first_after_polls: Option<usize>,
    /// Requests that are read and recorded but never answered
    pub mute: Vec<Command>,
}

impl Default for PanelScript {
    fn default() -> Self {
        Self {
            key: Some(SHARED_KEY),
            // format byte, section 1 disarmed, section 2 armed away
            sections: vec![0x00, 0x01, 0x00, 0x02, 0x01],
            // format byte, input 1 open, input 2 clear, input 3 disabled
            inputs: vec![0x00, 0x01, 0x00, 0x0F],
            arrangement: vec![arrangement_block(&[(1, "Voordeur"), (1, "Keuken"), (1, "")])],
            command_result: 0x01,
            deny_first: false,
            drop_first_after_polls: None,
            mute: Vec::new(),
        }
    }
}

/// Arrangement response data: 3 header bytes then 22-byte records.
pub fn arrangement_block(entries: &[(u8, &str)]) -> Vec<u8> {
    let mut data = vec![0x00, 0x00, 0x00];
    for (sensor_type, name) in entries {
        let mut record = vec![0u8; 22];
        record[1] = *sensor_type;
        let mut padded = [b' '; 16];
        padded[..name.len()].copy_from_slice(name.as_bytes());
        record[3..19].copy_from_slice(&padded);
        data.extend_from_slice(&record);
    }
    data
}

pub struct MockPanel {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Message>>>,
    connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockPanel {
    pub async fn start(script: PanelScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let handle = {
            let requests = requests.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let index = connections.fetch_add(1, Ordering::SeqCst);
                    // One client at a time, like the real panel.
                    serve(stream, &script, index, &requests).await;
                }
            })
        };

        Self {
            addr,
            requests,
            connections,
            handle,
        }
    }

    /// Client configuration pointing at this panel.
    pub fn config(&self) -> PanelConfig {
        PanelConfig::builder()
            .panel_ip("127.0.0.1")
            .panel_port(self.addr.port())
            .shared_key(SHARED_KEY)
            .user_code("1234")
            .poll_interval_ms(200)
            .request_timeout_ms(1000)
            .discovery_timeout_ms(500)
            .connect_timeout_ms(1000)
            .denied_retry_delay_ms(100)
            .reconnect_delay_ms(50)
            .max_reconnect_delay_ms(200)
            .max_connect_retries(0)
            .reconnect_policy(ReconnectPolicy::Persistent)
            .build()
    }

    pub fn requests(&self) -> Vec<Message> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_of(&self, command: Command) -> Vec<Message> {
        self.requests()
            .into_iter()
            .filter(|m| m.command == command)
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockPanel {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    script: &PanelScript,
    index: usize,
    requests: &Mutex<Vec<Message>>,
) {
    let codec = FrameCodec::new(UniiCrypt::new(script.key).unwrap());
    let mut buffer = FrameBuffer::new();
    let mut counters = SessionCounters {
        session_id: 0x1234,
        tx_seq: 1,
        rx_seq: 0,
    };
    let mut chunk = [0u8; 1024];
    let mut polls = 0usize;

    loop {
        let frame = loop {
            if let Some(result) = buffer.next_frame(&codec) {
                match result {
                    Ok(frame) => break frame,
                    Err(_) => continue,
                }
            }
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buffer.extend(&chunk[..n]),
            }
        };
        counters.rx_seq = frame.header.tx_seq;
        let request = frame.message;
        requests.lock().unwrap().push(request.clone());
        if script.mute.contains(&request.command) {
            continue;
        }

        let reply = match request.command {
            Command::ConnectionRequest if script.deny_first && index == 0 => {
                Message::empty(Command::ConnectionDenied)
            }
            Command::ConnectionRequest => Message::empty(Command::ConnectionAccepted),
            Command::NormalDisconnect => return,
            Command::RequestSectionStatus => {
                Message::new(Command::SectionStatus, script.sections.clone())
            }
            Command::RequestInputStatus => {
                polls += 1;
                Message::new(Command::InputStatus, script.inputs.clone())
            }
            Command::RequestInputArrangement => {
                let block = u16::from_be_bytes([request.data[0], request.data[1]]) as usize;
                let data = script
                    .arrangement
                    .get(block.wrapping_sub(1))
                    .cloned()
                    .unwrap_or_default();
                Message::new(Command::InputArrangement, data)
            }
            Command::ArmSection
            | Command::DisarmSection
            | Command::BypassInput
            | Command::UnbypassInput => {
                let Some(response) = request.command.response() else {
                    return;
                };
                Message::new(response, vec![0x00, script.command_result])
            }
            _ => continue,
        };

        let bytes = codec.encode(&counters, &reply).unwrap();
        counters.tx_seq += 1;
        if stream.write_all(&bytes).await.is_err() {
            return;
        }

        if reply.command == Command::ConnectionDenied {
            return;
        }
        if index == 0
            && let Some(limit) = script.drop_first_after_polls
            && polls >= limit
        {
            return;
        }
    }
}
