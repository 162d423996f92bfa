// MIT License - Copyright (c) 2026 Peter Wright
// Inputs (zones): catalog records and input status decoding

use bitflags::bitflags;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Dialect;
use crate::constants::{
    ARRANGEMENT_HEADER_LEN, ARRANGEMENT_NAME_LEN, ARRANGEMENT_NAME_OFFSET,
    FREE_TEXT_PLACEHOLDER, INPUT_DISABLED_SENTINEL, STATUS_HEADER_LEN, SensorType,
};
use crate::error::ProtocolError;

bitflags! {
    /// Input status bits (low byte of the status record).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InputStatusFlags: u16 {
        /// Input open / in alarm
        const OPEN             = 0x0001;
        const TAMPER           = 0x0002;
        /// Detector masked
        const ANTI_MASK        = 0x0004;
        const BYPASSED         = 0x0010;
        /// Alarm occurred since the last disarm
        const ALARM_MEMORY     = 0x0020;
        const LOW_BATTERY      = 0x0040;
        /// Wireless supervision lost
        const SUPERVISION_LOSS = 0x0080;
    }
}

impl InputStatusFlags {
    pub fn from_raw(raw: u16) -> Self {
        Self::from_bits_truncate(raw)
    }

    /// Whether the raw value is the panel's "input disabled" marker.
    pub fn is_disabled(raw: u16) -> bool {
        (raw & 0x000F) as u8 == INPUT_DISABLED_SENTINEL
    }

    /// Get the flags that changed between old and new status.
    pub fn changed(old: Self, new: Self) -> Self {
        old ^ new
    }
}

/// Derived input state. Bypass takes precedence over open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputState {
    Clear,
    Open,
    Bypassed,
}

impl InputState {
    pub fn from_flags(flags: InputStatusFlags) -> Self {
        if flags.contains(InputStatusFlags::BYPASSED) {
            Self::Bypassed
        } else if flags.contains(InputStatusFlags::OPEN) {
            Self::Open
        } else {
            Self::Clear
        }
    }
}

/// Classification of a catalog entry; only the first two are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputCategory {
    /// Intrusion detectors that can be bypassed
    SecurityRelevant,
    /// Programmed inputs of any other sensor type
    Diagnostic,
    /// No name programmed
    Unprogrammed,
    /// Still carries the panel's free-text placeholder name
    FreeTextUnused,
}

impl InputCategory {
    pub fn classify(name: &str, sensor_type: u8) -> Self {
        if name.is_empty() {
            Self::Unprogrammed
        } else if name.contains(FREE_TEXT_PLACEHOLDER) {
            Self::FreeTextUnused
        } else if SensorType::from_u8(sensor_type).is_some() {
            Self::SecurityRelevant
        } else {
            Self::Diagnostic
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, Self::SecurityRelevant | Self::Diagnostic)
    }
}

/// Catalog entry discovered from the input arrangement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputInfo {
    pub id: u16,
    pub name: String,
    pub sensor_type: u8,
    pub reaction: u8,
    pub category: InputCategory,
}

/// One record of an input-status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputStatusRecord {
    pub id: u16,
    pub raw: u16,
}

/// An input as published in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Input {
    pub id: u16,
    pub name: String,
    pub category: InputCategory,
    pub state: InputState,
    pub tamper: bool,
    pub anti_mask: bool,
    pub low_battery: bool,
    pub alarm_memory: bool,
    pub supervision_loss: bool,
    pub raw_status: u16,
}

impl Input {
    pub fn from_status(info: &InputInfo, raw: u16) -> Self {
        let flags = InputStatusFlags::from_raw(raw);
        Self {
            id: info.id,
            name: info.name.clone(),
            category: info.category,
            state: InputState::from_flags(flags),
            tamper: flags.contains(InputStatusFlags::TAMPER),
            anti_mask: flags.contains(InputStatusFlags::ANTI_MASK),
            low_battery: flags.contains(InputStatusFlags::LOW_BATTERY),
            alarm_memory: flags.contains(InputStatusFlags::ALARM_MEMORY),
            supervision_loss: flags.contains(InputStatusFlags::SUPERVISION_LOSS),
            raw_status: raw,
        }
    }

    pub fn flags(&self) -> InputStatusFlags {
        InputStatusFlags::from_raw(self.raw_status)
    }

    pub fn is_open(&self) -> bool {
        self.state == InputState::Open
    }

    pub fn is_bypassed(&self) -> bool {
        self.state == InputState::Bypassed
    }
}

/// Decode an input-status response.
///
/// Layout: one format byte, then one record per input at the dialect's
/// stride (big-endian). Input numbers start at 1.
pub fn decode_input_status(
    dialect: &Dialect,
    data: &[u8],
) -> Result<Vec<InputStatusRecord>, ProtocolError> {
    if data.len() < STATUS_HEADER_LEN {
        return Err(ProtocolError::Malformed {
            what: "input status",
            details: "empty response".to_string(),
        });
    }
    let body = &data[STATUS_HEADER_LEN..];
    let stride = dialect.input_status_stride;
    if body.len() % stride != 0 {
        warn!("Input status has {} trailing bytes, ignoring", body.len() % stride);
    }

    let records = body
        .chunks_exact(stride)
        .enumerate()
        .filter_map(|(index, chunk)| {
            let id = u16::try_from(index + 1).ok()?;
            let raw = match stride {
                1 => chunk[0] as u16,
                _ => u16::from_be_bytes([chunk[stride - 2], chunk[stride - 1]]),
            };
            Some(InputStatusRecord { id, raw })
        })
        .collect();
    Ok(records)
}

fn decode_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Decode one input arrangement block into catalog entries.
///
/// Every record is returned, including unprogrammed ones; callers filter on
/// [`InputCategory::is_published`].
pub fn decode_input_arrangement(dialect: &Dialect, block: u16, data: &[u8]) -> Vec<InputInfo> {
    if data.len() < ARRANGEMENT_HEADER_LEN || block == 0 {
        return Vec::new();
    }
    let record_len = dialect.arrangement_record_len;
    let first_id = (block - 1).saturating_mul(dialect.inputs_per_block);

    data[ARRANGEMENT_HEADER_LEN..]
        .chunks_exact(record_len)
        .take(dialect.inputs_per_block as usize)
        .enumerate()
        .map(|(index, record)| {
            let sensor_type = record[1];
            let reaction = record[2];
            let name_end = (ARRANGEMENT_NAME_OFFSET + ARRANGEMENT_NAME_LEN).min(record.len());
            let name = decode_name(&record[ARRANGEMENT_NAME_OFFSET..name_end]);
            let id = first_id.saturating_add(index as u16 + 1);
            let category = InputCategory::classify(&name, sensor_type);
            debug!(
                "Input {}: {:?} type={} reaction={} ({:?})",
                id, name, sensor_type, reaction, category
            );
            InputInfo {
                id,
                name,
                sensor_type,
                reaction,
                category,
            }
        })
        .collect()
}
