// MIT License - Copyright (c) 2026 Peter Wright
// Request/response correlation over a single panel connection

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{Dialect, PanelConfig};
use crate::devices::section::{decode_event_log, decode_section_event, SectionStatus};
use crate::error::{Result, UniiError};
use crate::event::{EventSender, PanelEvent};
use crate::frame::{Frame, FrameBuffer, FrameCodec, SessionCounters};
use crate::protocol::{Command, Message};

const BAD_FRAME_LIMIT: usize = 10;
const BAD_FRAME_WINDOW: Duration = Duration::from_secs(60);
const QUEUE_DEPTH: usize = 32;
const INBOUND_DEPTH: usize = 64;
const READ_BUFFER_LEN: usize = 4096;

/// Tunables for one engine instance.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub dialect: Dialect,
    /// Consecutive exchange timeouts that close the connection
    pub max_consecutive_timeouts: u32,
}

impl EngineSettings {
    pub fn from_config(config: &PanelConfig) -> Self {
        Self {
            dialect: config.dialect(),
            max_consecutive_timeouts: config.max_consecutive_timeouts,
        }
    }
}

/// One queued request and the responses that complete it.
struct Exchange {
    message: Message,
    expect: Vec<Command>,
    timeout: Duration,
    reply: oneshot::Sender<Result<Message>>,
}

/// Ends the session from the exchange task, optionally writing a last frame.
struct Close {
    farewell: Option<Message>,
    done: oneshot::Sender<bool>,
}

/// Serialises request/response exchanges with the panel.
///
/// A single task owns the write half and the session counters. Requests are
/// queued FIFO; each one is written only after the previous exchange has
/// received its response or timed out, so frames never interleave on the
/// wire. A reader task owns the read half and forwards validated frames.
/// Frames that arrive while no matching exchange is outstanding are treated
/// as unsolicited panel events.
pub struct CommandEngine {
    queue: mpsc::Sender<Exchange>,
    control: mpsc::Sender<Close>,
    alive: Arc<watch::Sender<bool>>,
    exchange_handle: JoinHandle<()>,
    reader_handle: JoinHandle<()>,
}

impl CommandEngine {
    /// Start the engine on an already-connected byte stream.
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        codec: FrameCodec,
        settings: EngineSettings,
        event_tx: EventSender,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_DEPTH);
        let (control_tx, control_rx) = mpsc::channel(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_DEPTH);
        let alive = Arc::new(watch::Sender::new(true));

        let reader_handle = tokio::spawn(read_frames(reader, codec.clone(), inbound_tx));

        let exchanges = ExchangeLoop {
            writer,
            inbound: inbound_rx,
            control: control_rx,
            codec,
            counters: SessionCounters::default(),
            consecutive_timeouts: 0,
            settings,
            event_tx,
        };
        let exchange_handle = tokio::spawn(exchanges.run(queue_rx, alive.clone()));

        Self {
            queue: queue_tx,
            control: control_tx,
            alive,
            exchange_handle,
            reader_handle,
        }
    }

    /// Send `message` and wait for the response its command maps to.
    pub async fn request(&self, message: Message, timeout: Duration) -> Result<Message> {
        let expect = message.command.response().ok_or_else(|| {
            UniiError::validation(format!("{:?} has no response", message.command))
        })?;
        self.request_any(message, &[expect], timeout).await
    }

    /// Send `message` and wait for any of `expect`.
    pub async fn request_any(
        &self,
        message: Message,
        expect: &[Command],
        timeout: Duration,
    ) -> Result<Message> {
        if expect.is_empty() {
            return Err(UniiError::validation("no response to wait for"));
        }
        if !self.is_connected() {
            return Err(UniiError::ConnectionLost);
        }
        let (reply, rx) = oneshot::channel();
        self.queue
            .send(Exchange {
                message,
                expect: expect.to_vec(),
                timeout,
                reply,
            })
            .await
            .map_err(|_| UniiError::ConnectionLost)?;
        rx.await.unwrap_or(Err(UniiError::ConnectionLost))
    }

    /// Close the session from the exchange task.
    ///
    /// The in-flight exchange and everything still queued fail with
    /// `ConnectionLost` before `farewell` is written, so no queued request
    /// reaches the wire after this call. Returns whether `farewell` was
    /// written.
    pub async fn close(&self, farewell: Option<Message>) -> bool {
        let (done, rx) = oneshot::channel();
        if self.control.send(Close { farewell, done }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Whether the connection is still usable.
    pub fn is_connected(&self) -> bool {
        *self.alive.borrow()
    }

    /// Resolves once the connection has been lost or shut down.
    pub async fn closed(&self) {
        let mut rx = self.alive.subscribe();
        // Returns immediately if already false.
        let _ = rx.wait_for(|alive| !*alive).await;
    }

    /// Stop both tasks; queued and in-flight exchanges fail with `ConnectionLost`.
    pub fn shutdown(&self) {
        self.alive.send_replace(false);
        self.exchange_handle.abort();
        self.reader_handle.abort();
    }
}

impl Drop for CommandEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Outcome {
    Continue,
    Fatal,
    Close(Option<Close>),
}

struct ExchangeLoop<W> {
    writer: W,
    inbound: mpsc::Receiver<Frame>,
    control: mpsc::Receiver<Close>,
    codec: FrameCodec,
    counters: SessionCounters,
    consecutive_timeouts: u32,
    settings: EngineSettings,
    event_tx: EventSender,
}

impl<W: AsyncWrite + Unpin> ExchangeLoop<W> {
    async fn run(mut self, mut queue: mpsc::Receiver<Exchange>, alive: Arc<watch::Sender<bool>>) {
        let closing = loop {
            tokio::select! {
                biased;
                close = self.control.recv() => break close,
                frame = self.inbound.recv() => match frame {
                    Some(frame) => {
                        self.counters.observe(&frame.header);
                        self.handle_unsolicited(&frame.message);
                    }
                    None => {
                        info!("Panel connection closed");
                        break None;
                    }
                },
                exchange = queue.recv() => match exchange {
                    Some(exchange) => match self.perform(exchange).await {
                        Outcome::Continue => {}
                        Outcome::Fatal => break None,
                        Outcome::Close(close) => break close,
                    },
                    None => break None,
                },
            }
        };

        alive.send_replace(false);
        queue.close();
        while let Ok(exchange) = queue.try_recv() {
            let _ = exchange.reply.send(Err(UniiError::ConnectionLost));
        }
        if let Some(close) = closing {
            self.finish(close).await;
        }
        debug!("Exchange loop stopped");
    }

    async fn perform(&mut self, exchange: Exchange) -> Outcome {
        if exchange.reply.is_closed() {
            debug!("Dropping abandoned {:?} request", exchange.message.command);
            return Outcome::Continue;
        }
        let command = exchange.message.command;

        let bytes = match self.codec.encode(&self.counters, &exchange.message) {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = exchange.reply.send(Err(e.into()));
                return Outcome::Continue;
            }
        };
        debug!(
            "Sending {:?} (seq {}, {} data bytes)",
            command,
            self.counters.tx_seq,
            exchange.message.data.len()
        );
        if let Err(e) = self.write_frame(&bytes).await {
            error!("Failed to write {:?}: {}", command, e);
            let _ = exchange.reply.send(Err(UniiError::ConnectionLost));
            return Outcome::Fatal;
        }
        self.counters.advance();

        let deadline = Instant::now() + exchange.timeout;
        loop {
            tokio::select! {
                biased;
                close = self.control.recv() => {
                    debug!("Session closing while waiting for {:?}", command);
                    let _ = exchange.reply.send(Err(UniiError::ConnectionLost));
                    return Outcome::Close(close);
                }
                received = timeout_at(deadline, self.inbound.recv()) => match received {
                    Ok(Some(frame)) => {
                        self.counters.observe(&frame.header);
                        if exchange.expect.contains(&frame.message.command) {
                            self.consecutive_timeouts = 0;
                            let _ = exchange.reply.send(Ok(frame.message));
                            return Outcome::Continue;
                        }
                        self.handle_unsolicited(&frame.message);
                    }
                    Ok(None) => {
                        warn!("Connection lost while waiting for {:?}", command);
                        let _ = exchange.reply.send(Err(UniiError::ConnectionLost));
                        return Outcome::Fatal;
                    }
                    Err(_) => {
                        self.consecutive_timeouts += 1;
                        debug!(
                            "Command timeout: {:?} ({} consecutive)",
                            command, self.consecutive_timeouts
                        );
                        let _ = exchange.reply.send(Err(UniiError::CommandTimeout { command }));
                        if self.consecutive_timeouts >= self.settings.max_consecutive_timeouts {
                            warn!(
                                "{} consecutive timeouts, dropping connection",
                                self.consecutive_timeouts
                            );
                            return Outcome::Fatal;
                        }
                        return Outcome::Continue;
                    }
                },
            }
        }
    }

    /// Write the farewell frame, if any, once the queue has been failed.
    async fn finish(&mut self, close: Close) {
        let mut written = false;
        if let Some(message) = close.farewell {
            match self.codec.encode(&self.counters, &message) {
                Ok(bytes) => match self.write_frame(&bytes).await {
                    Ok(()) => {
                        self.counters.advance();
                        debug!("Sent {:?}", message.command);
                        written = true;
                    }
                    Err(e) => debug!("{:?} not sent: {}", message.command, e),
                },
                Err(e) => debug!("{:?} not encoded: {}", message.command, e),
            }
        }
        let _ = close.done.send(written);
    }

    async fn write_frame(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await
    }

    fn handle_unsolicited(&self, message: &Message) {
        match message.command {
            Command::BypassInputResponse => {
                match decode_section_event(&self.settings.dialect, &message.data) {
                    Some(status) => self.report_section(status),
                    None => debug!("Short section event ignored"),
                }
            }
            Command::EventOccurred => match decode_event_log(&message.data) {
                Some(status) => self.report_section(status),
                None => debug!("Panel event ({} bytes)", message.data.len()),
            },
            other => {
                debug!("Ignoring unsolicited {:?}", other);
            }
        }
    }

    fn report_section(&self, status: SectionStatus) {
        info!("Section {} reported state {:?}", status.id, status.state);
        let _ = self.event_tx.send(PanelEvent::SectionStateReported {
            section_id: status.id,
            state: status.state,
        });
    }
}

/// Counts rejected frames in a sliding 60 s window.
struct BadFrameGuard {
    seen: VecDeque<Instant>,
}

impl BadFrameGuard {
    fn new() -> Self {
        Self {
            seen: VecDeque::with_capacity(BAD_FRAME_LIMIT + 1),
        }
    }

    /// Record a bad frame. Returns true if the limit has been exceeded.
    fn record(&mut self) -> bool {
        let now = Instant::now();
        while self
            .seen
            .front()
            .is_some_and(|first| now.duration_since(*first) > BAD_FRAME_WINDOW)
        {
            self.seen.pop_front();
        }
        self.seen.push_back(now);

        let count = self.seen.len();
        if count > BAD_FRAME_LIMIT {
            error!("Too many invalid frames ({} within {:?})", count, BAD_FRAME_WINDOW);
            true
        } else {
            warn!("Invalid frame (count: {})", count);
            false
        }
    }
}

/// Reader task: turn socket reads into validated frames.
async fn read_frames<R: AsyncRead + Unpin>(
    mut reader: R,
    codec: FrameCodec,
    inbound: mpsc::Sender<Frame>,
) {
    let mut buffer = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_BUFFER_LEN];
    let mut guard = BadFrameGuard::new();

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("Reader: connection closed");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                error!("Reader: read error: {}", e);
                return;
            }
        };
        buffer.extend(&chunk[..n]);

        while let Some(result) = buffer.next_frame(&codec) {
            match result {
                Ok(frame) => {
                    if inbound.send(frame).await.is_err() {
                        return;
                    }
                }
                Err(_) => {
                    if guard.record() {
                        return;
                    }
                }
            }
        }
    }
}
