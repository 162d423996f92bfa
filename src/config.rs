// MIT License - Copyright (c) 2026 Peter Wright
// Connection configuration

use std::str::FromStr;
use std::time::Duration;

use crate::constants::{DEFAULT_MAX_INPUT_BLOCKS, DEFAULT_PORT, KEY_LEN};
use crate::error::{Result, UniiError};
use crate::protocol::validate_user_code;

/// Panel firmware generation. Selects the wire [`Dialect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolGeneration {
    /// Current firmware: one-byte section ids, dense input status.
    #[default]
    Standard,
    /// ML-era firmware: two-byte section ids, two-byte input status records.
    Legacy,
}

impl ProtocolGeneration {
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Standard => Dialect {
                generation: *self,
                section_id_width: 1,
                section_record_len: 2,
                input_status_stride: 1,
                arrangement_record_len: 22,
                inputs_per_block: 44,
                pipelined_polls: true,
            },
            Self::Legacy => Dialect {
                generation: *self,
                section_id_width: 2,
                section_record_len: 3,
                input_status_stride: 2,
                arrangement_record_len: 22,
                inputs_per_block: 44,
                pipelined_polls: false,
            },
        }
    }
}

impl FromStr for ProtocolGeneration {
    type Err = UniiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "standard" | "current" => Ok(Self::Standard),
            "legacy" | "ml" => Ok(Self::Legacy),
            other => Err(UniiError::configuration(format!(
                "unknown protocol generation: {other}"
            ))),
        }
    }
}

/// Per-generation field widths and record sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub generation: ProtocolGeneration,
    /// Bytes used for a section id in commands and status records.
    pub section_id_width: usize,
    /// One section-status record: id + state byte.
    pub section_record_len: usize,
    /// Bytes per input in an input-status response.
    pub input_status_stride: usize,
    pub arrangement_record_len: usize,
    pub inputs_per_block: u16,
    /// Whether section and input status requests may be queued together.
    pub pipelined_polls: bool,
}

/// When the session holds its TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stay connected; reconnect with backoff when the link drops.
    #[default]
    Persistent,
    /// Connect, poll and disconnect on every cycle, freeing the panel's
    /// single connection slot between polls.
    PerPoll,
}

impl FromStr for ReconnectPolicy {
    type Err = UniiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "persistent" => Ok(Self::Persistent),
            "perpoll" => Ok(Self::PerPoll),
            other => Err(UniiError::configuration(format!(
                "unknown reconnect policy: {other}"
            ))),
        }
    }
}

/// Configuration for connecting to a UNii panel.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// Panel host name or IP address
    pub panel_ip: String,
    /// Panel TCP port (default: 6502)
    pub panel_port: u16,
    /// Shared key for basic encryption (1-16 ASCII characters); `None` for cleartext
    pub shared_key: Option<String>,
    /// Firmware generation
    pub generation: ProtocolGeneration,
    /// User code used for arming and bypass when the caller does not supply one
    pub user_code: Option<String>,
    pub reconnect_policy: ReconnectPolicy,
    /// Status poll interval in milliseconds (default: 5000)
    pub poll_interval_ms: u64,
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-exchange response timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Response timeout for input arrangement blocks during discovery
    pub discovery_timeout_ms: u64,
    /// Delay before retrying when the panel reports its connection slot busy
    pub denied_retry_delay_ms: u64,
    /// Reconnection delay in milliseconds (base delay for exponential backoff)
    pub reconnect_delay_ms: u64,
    /// Upper bound for the backoff delay
    pub max_reconnect_delay_ms: u64,
    /// Maximum number of retries for the initial connect (0 = no retries)
    pub max_connect_retries: u32,
    /// Reconnect attempts after a lost link before the session faults; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    /// Consecutive exchange timeouts that force a reconnect
    pub max_consecutive_timeouts: u32,
    /// Highest input arrangement block requested during discovery
    pub max_input_blocks: u16,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            panel_ip: "192.168.1.100".to_string(),
            panel_port: DEFAULT_PORT,
            shared_key: None,
            generation: ProtocolGeneration::Standard,
            user_code: None,
            reconnect_policy: ReconnectPolicy::Persistent,
            poll_interval_ms: 5000,
            connect_timeout_ms: 5000,
            request_timeout_ms: 5000,
            discovery_timeout_ms: 3000,
            denied_retry_delay_ms: 3000,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 60_000,
            max_connect_retries: 3,
            max_reconnect_attempts: None,
            max_consecutive_timeouts: 3,
            max_input_blocks: DEFAULT_MAX_INPUT_BLOCKS,
        }
    }
}

impl PanelConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> PanelConfigBuilder {
        PanelConfigBuilder::default()
    }

    pub fn dialect(&self) -> Dialect {
        self.generation.dialect()
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.panel_ip.trim().is_empty() {
            return Err(UniiError::configuration("panel_ip must not be empty"));
        }
        if self.panel_port == 0 {
            return Err(UniiError::configuration("panel_port must not be 0"));
        }
        if let Some(key) = &self.shared_key {
            if key.is_empty() || key.len() > KEY_LEN {
                return Err(UniiError::configuration(format!(
                    "shared key must be 1-{} characters, got {}",
                    KEY_LEN,
                    key.len()
                )));
            }
            if !key.is_ascii() {
                return Err(UniiError::configuration("shared key must be ASCII"));
            }
        }
        if let Some(code) = &self.user_code {
            validate_user_code(code)
                .map_err(|e| UniiError::configuration(format!("user_code: {e}")))?;
        }
        if self.poll_interval_ms == 0 {
            return Err(UniiError::configuration("poll_interval_ms must be positive"));
        }
        if self.request_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(UniiError::configuration("timeouts must be positive"));
        }
        if self.max_consecutive_timeouts == 0 {
            return Err(UniiError::configuration(
                "max_consecutive_timeouts must be at least 1",
            ));
        }
        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(UniiError::configuration(
                "max_reconnect_delay_ms must not be below reconnect_delay_ms",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.reconnect_delay_ms, self.max_reconnect_delay_ms, attempt)
    }
}

/// Exponential backoff: `base * 2^(attempt-1)` with the exponent capped at 4,
/// then clamped to `max_ms`.
pub fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(4);
    let delay_ms = base_ms.saturating_mul(1 << exponent).min(max_ms);
    Duration::from_millis(delay_ms)
}

/// Builder for PanelConfig.
#[derive(Debug, Clone, Default)]
pub struct PanelConfigBuilder {
    config: PanelConfig,
}

impl PanelConfigBuilder {
    pub fn panel_ip(mut self, ip: impl Into<String>) -> Self {
        self.config.panel_ip = ip.into();
        self
    }

    pub fn panel_port(mut self, port: u16) -> Self {
        self.config.panel_port = port;
        self
    }

    pub fn shared_key(mut self, key: impl Into<String>) -> Self {
        self.config.shared_key = Some(key.into());
        self
    }

    pub fn generation(mut self, generation: ProtocolGeneration) -> Self {
        self.config.generation = generation;
        self
    }

    pub fn user_code(mut self, code: impl Into<String>) -> Self {
        self.config.user_code = Some(code.into());
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect_policy = policy;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn discovery_timeout_ms(mut self, ms: u64) -> Self {
        self.config.discovery_timeout_ms = ms;
        self
    }

    pub fn denied_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.denied_retry_delay_ms = ms;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_delay_ms = ms;
        self
    }

    pub fn max_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.max_reconnect_delay_ms = ms;
        self
    }

    pub fn max_connect_retries(mut self, retries: u32) -> Self {
        self.config.max_connect_retries = retries;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn max_consecutive_timeouts(mut self, count: u32) -> Self {
        self.config.max_consecutive_timeouts = count;
        self
    }

    pub fn max_input_blocks(mut self, blocks: u16) -> Self {
        self.config.max_input_blocks = blocks;
        self
    }

    pub fn build(self) -> PanelConfig {
        self.config
    }
}
