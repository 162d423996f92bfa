// MIT License - Copyright (c) 2026 Peter Wright
// Sections (partitions) and section status decoding

use serde::Serialize;
use tracing::warn;

use crate::config::Dialect;
use crate::constants::{
    EVENT_LOG_ARMED, EVENT_LOG_DISARMED, EVENT_LOG_MIN_LEN, EVENT_LOG_SECTION_OFFSET,
    EVENT_LOG_TEXT_OFFSET, STATUS_HEADER_LEN,
};
use crate::error::ProtocolError;

/// Armed state of a section as reported by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "code")]
pub enum SectionArmedState {
    Disarmed,
    ArmedAway,
    /// Exit timer running after an arm request
    PendingExit,
    /// Entry timer running after an armed input opened
    PendingEntry,
    /// Alarm in progress
    Triggered,
    /// A state code this crate does not recognise
    Unknown(u8),
}

impl SectionArmedState {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 | 2 => Self::Disarmed,
            1 => Self::ArmedAway,
            3 => Self::PendingExit,
            4 => Self::PendingEntry,
            5 => Self::Triggered,
            other => Self::Unknown(other),
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, Self::ArmedAway | Self::PendingEntry | Self::Triggered)
    }
}

/// One record of a section-status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionStatus {
    pub id: u16,
    pub state: SectionArmedState,
}

/// A section as published in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub id: u16,
    pub name: String,
    pub armed_state: SectionArmedState,
}

impl Section {
    pub fn new(id: u16, name: impl Into<String>, armed_state: SectionArmedState) -> Self {
        Self {
            id,
            name: name.into(),
            armed_state,
        }
    }

    pub fn default_name(id: u16) -> String {
        format!("Section {id}")
    }

    pub fn is_armed(&self) -> bool {
        self.armed_state.is_armed()
    }
}

fn read_section_id(dialect: &Dialect, bytes: &[u8]) -> u16 {
    match dialect.section_id_width {
        1 => bytes[0] as u16,
        _ => u16::from_be_bytes([bytes[0], bytes[1]]),
    }
}

/// Decode a section-status response.
///
/// Layout: one format byte, then fixed-width `[id][state]` records. A trailing
/// partial record is ignored, as are records for section 0.
pub fn decode_section_status(
    dialect: &Dialect,
    data: &[u8],
) -> Result<Vec<SectionStatus>, ProtocolError> {
    if data.len() < STATUS_HEADER_LEN {
        return Err(ProtocolError::Malformed {
            what: "section status",
            details: "empty response".to_string(),
        });
    }
    let body = &data[STATUS_HEADER_LEN..];
    let record_len = dialect.section_record_len;
    if body.len() % record_len != 0 {
        warn!(
            "Section status has {} trailing bytes, ignoring",
            body.len() % record_len
        );
    }

    let mut sections = Vec::with_capacity(body.len() / record_len);
    for record in body.chunks_exact(record_len) {
        let id = read_section_id(dialect, record);
        if id == 0 {
            continue;
        }
        let code = record[dialect.section_id_width];
        let state = SectionArmedState::from_code(code);
        if let SectionArmedState::Unknown(code) = state {
            warn!("Section {} reported unknown state code {}", id, code);
        }
        sections.push(SectionStatus { id, state });
    }
    Ok(sections)
}

/// Decode an unsolicited "section armed state changed" notification.
pub fn decode_section_event(dialect: &Dialect, data: &[u8]) -> Option<SectionStatus> {
    let width = dialect.section_id_width;
    if data.len() < width + 1 {
        return None;
    }
    let id = read_section_id(dialect, data);
    Some(SectionStatus {
        id,
        state: SectionArmedState::from_code(data[width]),
    })
}

/// Decode a text event-log notification into a section state change.
///
/// Only keypad arm and disarm entries carry a state; every other log line
/// yields `None`.
pub fn decode_event_log(data: &[u8]) -> Option<SectionStatus> {
    if data.len() < EVENT_LOG_MIN_LEN {
        return None;
    }
    let id = data[EVENT_LOG_SECTION_OFFSET] as u16;
    // Latin-1 maps every byte to the code point of the same value.
    let text: String = data[EVENT_LOG_TEXT_OFFSET..]
        .iter()
        .map(|&b| b as char)
        .collect();

    let state = if text.contains(EVENT_LOG_ARMED) {
        SectionArmedState::ArmedAway
    } else if text.contains(EVENT_LOG_DISARMED) {
        SectionArmedState::Disarmed
    } else {
        return None;
    };
    Some(SectionStatus { id, state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolGeneration;

    #[test]
    fn test_state_codes() {
        assert_eq!(SectionArmedState::from_code(0), SectionArmedState::Disarmed);
        assert_eq!(SectionArmedState::from_code(1), SectionArmedState::ArmedAway);
        assert_eq!(SectionArmedState::from_code(2), SectionArmedState::Disarmed);
        assert_eq!(SectionArmedState::from_code(3), SectionArmedState::PendingExit);
        assert_eq!(SectionArmedState::from_code(4), SectionArmedState::PendingEntry);
        assert_eq!(SectionArmedState::from_code(5), SectionArmedState::Triggered);
        assert_eq!(SectionArmedState::from_code(9), SectionArmedState::Unknown(9));
        assert!(SectionArmedState::ArmedAway.is_armed());
        assert!(!SectionArmedState::PendingExit.is_armed());
    }

    #[test]
    fn test_decode_standard() {
        let dialect = ProtocolGeneration::Standard.dialect();
        let data = [0x00, 0x01, 0x02, 0x02, 0x01];
        let sections = decode_section_status(&dialect, &data).unwrap();
        assert_eq!(
            sections,
            vec![
                SectionStatus { id: 1, state: SectionArmedState::Disarmed },
                SectionStatus { id: 2, state: SectionArmedState::ArmedAway },
            ]
        );
    }

    #[test]
    fn test_decode_legacy_wide_ids() {
        let dialect = ProtocolGeneration::Legacy.dialect();
        let data = [0x00, 0x00, 0x01, 0x05, 0x00, 0x02, 0x03];
        let sections = decode_section_status(&dialect, &data).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0], SectionStatus { id: 1, state: SectionArmedState::Triggered });
        assert_eq!(sections[1], SectionStatus { id: 2, state: SectionArmedState::PendingExit });
    }

    #[test]
    fn test_decode_ignores_partial_record_and_section_zero() {
        let dialect = ProtocolGeneration::Standard.dialect();
        let data = [0x00, 0x00, 0x01, 0x03, 0x04, 0x07];
        let sections = decode_section_status(&dialect, &data).unwrap();
        assert_eq!(sections, vec![SectionStatus { id: 3, state: SectionArmedState::PendingEntry }]);
    }

    #[test]
    fn test_decode_empty_is_error() {
        let dialect = ProtocolGeneration::Standard.dialect();
        assert!(decode_section_status(&dialect, &[]).is_err());
        assert!(decode_section_status(&dialect, &[0x00]).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_code_preserved() {
        let dialect = ProtocolGeneration::Standard.dialect();
        let sections = decode_section_status(&dialect, &[0x00, 0x01, 0x42]).unwrap();
        assert_eq!(sections[0].state, SectionArmedState::Unknown(0x42));
    }

    #[test]
    fn test_decode_section_event() {
        let standard = ProtocolGeneration::Standard.dialect();
        assert_eq!(
            decode_section_event(&standard, &[0x02, 0x01]),
            Some(SectionStatus { id: 2, state: SectionArmedState::ArmedAway })
        );
        assert_eq!(decode_section_event(&standard, &[0x02]), None);
    }

    fn event_log(section: u8, text: &str) -> Vec<u8> {
        let mut data = vec![0x00, section, 0x00, 0x1c, 0x1a, 0x02, 0x12, 0x0b, 0x12, 0x09];
        data.extend_from_slice(text.as_bytes());
        data
    }

    #[test]
    fn test_decode_event_log() {
        assert_eq!(
            decode_event_log(&event_log(2, "INSCHAKELEN  GEBR 1")),
            Some(SectionStatus { id: 2, state: SectionArmedState::ArmedAway })
        );
        assert_eq!(
            decode_event_log(&event_log(1, "UITSCHAKELEN GEBR 1")),
            Some(SectionStatus { id: 1, state: SectionArmedState::Disarmed })
        );
        assert_eq!(decode_event_log(&event_log(1, "INBRAAK ZONE 3")), None);
    }

    #[test]
    fn test_decode_event_log_short_or_binary() {
        assert_eq!(decode_event_log(&event_log(1, "X")), None);
        let mut data = event_log(3, "");
        data.extend_from_slice(&[0xE9, 0xFF, 0x00]);
        data.extend_from_slice(b"UITSCHAKELEN");
        assert_eq!(
            decode_event_log(&data),
            Some(SectionStatus { id: 3, state: SectionArmedState::Disarmed })
        );
    }
}
