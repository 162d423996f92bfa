// MIT License - Copyright (c) 2026 Peter Wright
// Command identifiers and request payload encoding

use crate::config::Dialect;
use crate::constants::{
    INPUT_STATUS_ALL, MIN_USER_CODE_DIGITS, RESULT_OK, SECTION_STATUS_ALL, USER_CODE_DIGITS,
    USER_CODE_LEN, USER_CODE_PAD,
};
use crate::error::{Result, UniiError};

/// Command identifiers carried in the first two bytes of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ConnectionRequest,
    ConnectionAccepted,
    ConnectionDenied,
    NormalDisconnect,
    EventOccurred,
    InputStatus,
    RequestInputStatus,
    ArmSection,
    ArmSectionResponse,
    DisarmSection,
    DisarmSectionResponse,
    RequestSectionStatus,
    SectionStatus,
    BypassInput,
    /// Also sent unsolicited as "section armed state changed".
    BypassInputResponse,
    UnbypassInput,
    UnbypassInputResponse,
    RequestInputArrangement,
    InputArrangement,
    /// Any identifier this crate does not interpret.
    Other(u16),
}

impl Command {
    pub fn id(&self) -> u16 {
        match self {
            Self::ConnectionRequest => 0x0001,
            Self::ConnectionAccepted => 0x0002,
            Self::ConnectionDenied => 0x0003,
            Self::NormalDisconnect => 0x0014,
            Self::EventOccurred => 0x0102,
            Self::InputStatus => 0x0105,
            Self::RequestInputStatus => 0x0106,
            Self::ArmSection => 0x0112,
            Self::ArmSectionResponse => 0x0113,
            Self::DisarmSection => 0x0114,
            Self::DisarmSectionResponse => 0x0115,
            Self::RequestSectionStatus => 0x0116,
            Self::SectionStatus => 0x0117,
            Self::BypassInput => 0x0118,
            Self::BypassInputResponse => 0x0119,
            Self::UnbypassInput => 0x011A,
            Self::UnbypassInputResponse => 0x011B,
            Self::RequestInputArrangement => 0x0140,
            Self::InputArrangement => 0x0141,
            Self::Other(id) => *id,
        }
    }

    pub fn from_id(id: u16) -> Self {
        match id {
            0x0001 => Self::ConnectionRequest,
            0x0002 => Self::ConnectionAccepted,
            0x0003 => Self::ConnectionDenied,
            0x0014 => Self::NormalDisconnect,
            0x0102 => Self::EventOccurred,
            0x0105 => Self::InputStatus,
            0x0106 => Self::RequestInputStatus,
            0x0112 => Self::ArmSection,
            0x0113 => Self::ArmSectionResponse,
            0x0114 => Self::DisarmSection,
            0x0115 => Self::DisarmSectionResponse,
            0x0116 => Self::RequestSectionStatus,
            0x0117 => Self::SectionStatus,
            0x0118 => Self::BypassInput,
            0x0119 => Self::BypassInputResponse,
            0x011A => Self::UnbypassInput,
            0x011B => Self::UnbypassInputResponse,
            0x0140 => Self::RequestInputArrangement,
            0x0141 => Self::InputArrangement,
            other => Self::Other(other),
        }
    }

    /// The response identifier the panel answers this request with, if any.
    pub fn response(&self) -> Option<Command> {
        match self {
            Self::ConnectionRequest => Some(Self::ConnectionAccepted),
            Self::RequestInputStatus => Some(Self::InputStatus),
            Self::ArmSection => Some(Self::ArmSectionResponse),
            Self::DisarmSection => Some(Self::DisarmSectionResponse),
            Self::RequestSectionStatus => Some(Self::SectionStatus),
            Self::BypassInput => Some(Self::BypassInputResponse),
            Self::UnbypassInput => Some(Self::UnbypassInputResponse),
            Self::RequestInputArrangement => Some(Self::InputArrangement),
            _ => None,
        }
    }
}

/// A decoded logical message: command identifier plus its data bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(command: Command, data: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            data: data.into(),
        }
    }

    pub fn empty(command: Command) -> Self {
        Self::new(command, Vec::new())
    }
}

// --- User codes ---

/// Check that a user code is all digits and within the accepted length.
pub fn validate_user_code(code: &str) -> Result<()> {
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(UniiError::validation("user code must contain only digits"));
    }
    if code.len() < MIN_USER_CODE_DIGITS || code.len() > USER_CODE_DIGITS {
        return Err(UniiError::validation(format!(
            "user code must be {}-{} digits, got {}",
            MIN_USER_CODE_DIGITS,
            USER_CODE_DIGITS,
            code.len()
        )));
    }
    Ok(())
}

/// Pack a user code into 8 bytes of BCD, right-padded with zero digits.
///
/// `"989898"` packs to `98 98 98 00 00 00 00 00`.
pub fn encode_user_code(code: &str) -> Result<[u8; USER_CODE_LEN]> {
    validate_user_code(code)?;
    let mut packed = [0u8; USER_CODE_LEN];
    let digits = code
        .chars()
        .chain(std::iter::repeat(USER_CODE_PAD))
        .take(USER_CODE_DIGITS)
        .map(|c| c as u8 - b'0')
        .collect::<Vec<_>>();
    for (byte, pair) in packed.iter_mut().zip(digits.chunks(2)) {
        *byte = (pair[0] << 4) | pair[1];
    }
    Ok(packed)
}

/// Unpack a BCD user code, dropping the zero-digit padding.
///
/// Returns `None` if any nibble is not a decimal digit. Codes that
/// legitimately end in `0` cannot be told apart from padding.
pub fn decode_user_code(packed: &[u8]) -> Option<String> {
    let mut digits = String::with_capacity(packed.len() * 2);
    for &byte in packed {
        for nibble in [byte >> 4, byte & 0x0F] {
            if nibble > 9 {
                return None;
            }
            digits.push((b'0' + nibble) as char);
        }
    }
    let trimmed = digits.trim_end_matches(USER_CODE_PAD);
    Some(trimmed.to_string())
}

// --- Request builders ---

/// Encode a section id at the dialect's width (big-endian).
pub fn encode_section_id(dialect: &Dialect, section: u16) -> Result<Vec<u8>> {
    if section == 0 {
        return Err(UniiError::validation("section ids start at 1"));
    }
    match dialect.section_id_width {
        1 => {
            let id = u8::try_from(section).map_err(|_| {
                UniiError::validation(format!("section {} exceeds 1-byte id range", section))
            })?;
            Ok(vec![id])
        }
        _ => Ok(section.to_be_bytes().to_vec()),
    }
}

pub fn section_status_request() -> Message {
    Message::new(Command::RequestSectionStatus, SECTION_STATUS_ALL)
}

pub fn input_status_request() -> Message {
    Message::new(Command::RequestInputStatus, INPUT_STATUS_ALL)
}

pub fn input_arrangement_request(block: u16) -> Message {
    Message::new(Command::RequestInputArrangement, block.to_be_bytes())
}

fn section_control_request(
    command: Command,
    dialect: &Dialect,
    section: u16,
    code: &str,
) -> Result<Message> {
    let mut data = encode_section_id(dialect, section)?;
    data.extend_from_slice(&encode_user_code(code)?);
    Ok(Message::new(command, data))
}

/// `[section id][BCD code]`
pub fn arm_section_request(dialect: &Dialect, section: u16, code: &str) -> Result<Message> {
    section_control_request(Command::ArmSection, dialect, section, code)
}

/// `[section id][BCD code]`
pub fn disarm_section_request(dialect: &Dialect, section: u16, code: &str) -> Result<Message> {
    section_control_request(Command::DisarmSection, dialect, section, code)
}

fn input_control_request(command: Command, input: u16, code: &str) -> Result<Message> {
    if input == 0 {
        return Err(UniiError::validation("input ids start at 1"));
    }
    let mut data = Vec::with_capacity(1 + USER_CODE_LEN + 2);
    data.push(0x00);
    data.extend_from_slice(&encode_user_code(code)?);
    data.extend_from_slice(&input.to_be_bytes());
    Ok(Message::new(command, data))
}

/// `[0x00][BCD code][input u16]`
pub fn bypass_input_request(input: u16, code: &str) -> Result<Message> {
    input_control_request(Command::BypassInput, input, code)
}

/// `[0x00][BCD code][input u16]`
pub fn unbypass_input_request(input: u16, code: &str) -> Result<Message> {
    input_control_request(Command::UnbypassInput, input, code)
}

/// Interpret the result byte of an arm/disarm/bypass/unbypass response.
pub fn check_command_result(request: Command, response: &Message) -> Result<()> {
    match response.data.get(1) {
        Some(&RESULT_OK) => Ok(()),
        Some(&code) => Err(UniiError::CommandRejected {
            command: request,
            code,
        }),
        None => Err(UniiError::CommandRejected {
            command: request,
            code: 0x00,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolGeneration;

    #[test]
    fn test_command_id_roundtrip() {
        for id in [0x0001u16, 0x0002, 0x0003, 0x0014, 0x0105, 0x0117, 0x0119, 0x0141, 0x0999] {
            assert_eq!(Command::from_id(id).id(), id);
        }
        assert_eq!(Command::from_id(0x0999), Command::Other(0x0999));
    }

    #[test]
    fn test_response_pairs() {
        assert_eq!(Command::ArmSection.response(), Some(Command::ArmSectionResponse));
        assert_eq!(Command::RequestInputStatus.response(), Some(Command::InputStatus));
        assert_eq!(Command::NormalDisconnect.response(), None);
    }

    #[test]
    fn test_encode_user_code_989898() {
        let packed = encode_user_code("989898").unwrap();
        assert_eq!(packed, [0x98, 0x98, 0x98, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(decode_user_code(&packed).as_deref(), Some("989898"));
    }

    #[test]
    fn test_encode_user_code_odd_length() {
        let packed = encode_user_code("12345").unwrap();
        assert_eq!(packed, [0x12, 0x34, 0x50, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_user_code_full_width() {
        let packed = encode_user_code("1234567890123456").unwrap();
        assert_eq!(packed, [0x12, 0x34, 0x56, 0x78, 0x90, 0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_user_code_validation() {
        assert!(matches!(encode_user_code("12a4"), Err(UniiError::Validation { .. })));
        assert!(matches!(encode_user_code("123"), Err(UniiError::Validation { .. })));
        assert!(matches!(encode_user_code(""), Err(UniiError::Validation { .. })));
        assert!(matches!(
            encode_user_code("12345678901234567"),
            Err(UniiError::Validation { .. })
        ));
    }

    #[test]
    fn test_decode_user_code_rejects_hex_nibbles() {
        assert_eq!(decode_user_code(&[0x1A, 0, 0, 0, 0, 0, 0, 0]), None);
    }

    #[test]
    fn test_disarm_payload_standard() {
        let dialect = ProtocolGeneration::Standard.dialect();
        let msg = disarm_section_request(&dialect, 1, "1234").unwrap();
        assert_eq!(msg.command, Command::DisarmSection);
        assert_eq!(
            msg.data,
            vec![0x01, 0x12, 0x34, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_arm_payload_legacy_uses_wide_section_id() {
        let dialect = ProtocolGeneration::Legacy.dialect();
        let msg = arm_section_request(&dialect, 2, "1234").unwrap();
        assert_eq!(msg.command, Command::ArmSection);
        assert_eq!(&msg.data[..2], &[0x00, 0x02]);
        assert_eq!(msg.data.len(), 10);
    }

    #[test]
    fn test_disarm_payload_legacy() {
        let dialect = ProtocolGeneration::Legacy.dialect();
        let msg = disarm_section_request(&dialect, 1, "1234").unwrap();
        assert_eq!(
            msg.data,
            vec![0x00, 0x01, 0x12, 0x34, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_section_id_range() {
        let standard = ProtocolGeneration::Standard.dialect();
        assert!(encode_section_id(&standard, 0).is_err());
        assert!(encode_section_id(&standard, 256).is_err());
        let legacy = ProtocolGeneration::Legacy.dialect();
        assert_eq!(encode_section_id(&legacy, 256).unwrap(), vec![0x01, 0x00]);
    }

    #[test]
    fn test_bypass_payload() {
        let msg = bypass_input_request(0x0102, "1234").unwrap();
        assert_eq!(msg.command, Command::BypassInput);
        assert_eq!(
            msg.data,
            vec![0x00, 0x12, 0x34, 0, 0, 0, 0, 0, 0, 0x01, 0x02]
        );
        assert!(unbypass_input_request(0, "1234").is_err());
    }

    #[test]
    fn test_status_requests() {
        assert_eq!(section_status_request().data, vec![0x01, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(input_status_request().data, vec![0x02]);
        assert_eq!(input_arrangement_request(3).data, vec![0x00, 0x03]);
    }

    #[test]
    fn test_check_command_result() {
        let ok = Message::new(Command::ArmSectionResponse, vec![0x01, 0x01]);
        assert!(check_command_result(Command::ArmSection, &ok).is_ok());

        let refused = Message::new(Command::ArmSectionResponse, vec![0x01, 0x00]);
        assert!(matches!(
            check_command_result(Command::ArmSection, &refused),
            Err(UniiError::CommandRejected { code: 0x00, .. })
        ));

        let short = Message::new(Command::ArmSectionResponse, vec![0x01]);
        assert!(check_command_result(Command::ArmSection, &short).is_err());
    }
}
