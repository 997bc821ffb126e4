//! Command/event opcodes and framing (spec §4.6). Payload layouts are
//! decoded by hand with `from_le_bytes`/slicing, the same way the teacher's
//! `gnss_can::Config::from_bytes`/`to_bytes` hand-roll wire framing rather
//! than leaning on a derive macro.

use heapless::Vec;

use crate::config::BLE_MTU;

/// Max payload bytes a single command/event carries beyond its opcode and
/// any fixed header fields.
pub const MAX_CHUNK: usize = BLE_MTU - 1;

/// Pybricks error codes surfaced through the BLE write response (spec §4.6,
/// mirrored from `pbio/include/pbio/error.h` per the expanded spec).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(test), derive(defmt::Format))]
pub enum PybricksError {
    Ok,
    InvalidCommand,
    ValueNotAllowed,
    Busy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandOpcode {
    StopUserProgram = 0x00,
    StartUserProgram = 0x01,
    StartRepl = 0x02,
    WriteUserProgramMeta = 0x03,
    WriteUserRam = 0x04,
    RebootToUpdate = 0x05,
    WriteStdin = 0x06,
    WriteAppData = 0x07,
}

impl CommandOpcode {
    fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x00 => Self::StopUserProgram,
            0x01 => Self::StartUserProgram,
            0x02 => Self::StartRepl,
            0x03 => Self::WriteUserProgramMeta,
            0x04 => Self::WriteUserRam,
            0x05 => Self::RebootToUpdate,
            0x06 => Self::WriteStdin,
            0x07 => Self::WriteAppData,
            _ => return None,
        })
    }
}

/// A decoded command from the host (spec §4.6 command table). Variable-
/// length payloads are bounded at [`MAX_CHUNK`], the largest a single GATT
/// write can carry at the negotiated MTU.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    StopUserProgram,
    StartUserProgram { id: Option<u32> },
    StartRepl { id: Option<u32> },
    WriteUserProgramMeta { size: u32 },
    WriteUserRam { offset: u32, data: Vec<u8, MAX_CHUNK> },
    RebootToUpdate,
    WriteStdin { data: Vec<u8, MAX_CHUNK> },
    WriteAppData { offset: u16, data: Vec<u8, MAX_CHUNK> },
}

fn le_u32(buf: &[u8]) -> Option<u32> {
    buf.get(..4).map(|s| u32::from_le_bytes(s.try_into().unwrap()))
}

fn le_u16(buf: &[u8]) -> Option<u16> {
    buf.get(..2).map(|s| u16::from_le_bytes(s.try_into().unwrap()))
}

/// Parses one framed GATT write into a [`Command`] (spec §4.6 "Framing
/// contract"). The first byte is the opcode, the rest is the payload.
pub fn parse_command(frame: &[u8]) -> Result<Command, PybricksError> {
    let (&opcode_byte, payload) = frame.split_first().ok_or(PybricksError::InvalidCommand)?;
    let opcode = CommandOpcode::from_u8(opcode_byte).ok_or(PybricksError::InvalidCommand)?;

    match opcode {
        CommandOpcode::StopUserProgram => {
            if !payload.is_empty() {
                return Err(PybricksError::ValueNotAllowed);
            }
            Ok(Command::StopUserProgram)
        }
        CommandOpcode::StartUserProgram => Ok(Command::StartUserProgram {
            id: optional_u32(payload)?,
        }),
        CommandOpcode::StartRepl => Ok(Command::StartRepl {
            id: optional_u32(payload)?,
        }),
        CommandOpcode::WriteUserProgramMeta => {
            let size = le_u32(payload).ok_or(PybricksError::ValueNotAllowed)?;
            if payload.len() != 4 {
                return Err(PybricksError::ValueNotAllowed);
            }
            Ok(Command::WriteUserProgramMeta { size })
        }
        CommandOpcode::WriteUserRam => {
            if payload.len() < 4 {
                return Err(PybricksError::ValueNotAllowed);
            }
            let offset = le_u32(payload).unwrap();
            let data = Vec::from_slice(&payload[4..]).map_err(|_| PybricksError::ValueNotAllowed)?;
            Ok(Command::WriteUserRam { offset, data })
        }
        CommandOpcode::RebootToUpdate => {
            if !payload.is_empty() {
                return Err(PybricksError::ValueNotAllowed);
            }
            Ok(Command::RebootToUpdate)
        }
        CommandOpcode::WriteStdin => {
            let data = Vec::from_slice(payload).map_err(|_| PybricksError::ValueNotAllowed)?;
            Ok(Command::WriteStdin { data })
        }
        CommandOpcode::WriteAppData => {
            if payload.len() < 2 {
                return Err(PybricksError::ValueNotAllowed);
            }
            let offset = le_u16(payload).unwrap();
            let data = Vec::from_slice(&payload[2..]).map_err(|_| PybricksError::ValueNotAllowed)?;
            Ok(Command::WriteAppData { offset, data })
        }
    }
}

fn optional_u32(payload: &[u8]) -> Result<Option<u32>, PybricksError> {
    match payload.len() {
        0 => Ok(None),
        4 => Ok(Some(le_u32(payload).unwrap())),
        _ => Err(PybricksError::ValueNotAllowed),
    }
}

/// Event opcodes sent to the host as notifications (spec §4.6 event table).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EventOpcode {
    StatusReport = 0x00,
    WriteStdout = 0x01,
}

/// `STATUS_REPORT` payload: opcode, u32 flags (LE), u8 program_id, u8 slot.
/// Byte-exact with spec §8 scenario 4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub flags: u32,
    pub program_id: u8,
    pub slot: u8,
}

impl StatusReport {
    pub fn encode(self) -> [u8; 7] {
        let mut out = [0u8; 7];
        out[0] = EventOpcode::StatusReport as u8;
        out[1..5].copy_from_slice(&self.flags.to_le_bytes());
        out[5] = self.program_id;
        out[6] = self.slot;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_user_program_rejects_payload() {
        assert_eq!(parse_command(&[0x00, 0x01]), Err(PybricksError::ValueNotAllowed));
        assert_eq!(parse_command(&[0x00]), Ok(Command::StopUserProgram));
    }

    #[test]
    fn start_user_program_with_id_round_trips() {
        let cmd = parse_command(&[0x01, 0x01, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(cmd, Command::StartUserProgram { id: Some(1) });
    }

    #[test]
    fn unknown_opcode_is_invalid_command() {
        assert_eq!(parse_command(&[0xFF]), Err(PybricksError::InvalidCommand));
    }

    #[test]
    fn write_user_ram_splits_offset_and_data() {
        let frame = [0x04, 10, 0, 0, 0, b'h', b'i'];
        let cmd = parse_command(&frame).unwrap();
        match cmd {
            Command::WriteUserRam { offset, data } => {
                assert_eq!(offset, 10);
                assert_eq!(&data[..], b"hi");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn status_report_matches_scenario_4() {
        // Scenario 4 (spec §8): user-program-running bit set, program_id 1, slot 2.
        let report = StatusReport {
            flags: 0x10,
            program_id: 1,
            slot: 2,
        };
        assert_eq!(report.encode(), [0x00, 0x10, 0x00, 0x00, 0x00, 0x01, 0x02]);
    }
}
