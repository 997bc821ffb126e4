//! LUMP wire format (spec §4.3): header byte layout, message framing, and
//! the XOR checksum. Grounded in `uartdev.c`'s `LUMP_MSG_*` header bit
//! layout and the message-dispatch switch.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::MAX_LUMP_PAYLOAD;

pub const EV3_UART_TYPE_MIN: u8 = 29;
pub const EV3_UART_TYPE_MAX: u8 = 101;
pub const EV3_UART_SPEED_MIN: u32 = 2400;
pub const EV3_UART_SPEED_LPF2: u32 = 115_200;
pub const EV3_UART_DATA_KEEP_ALIVE_TIMEOUT_MS: u32 = 100;
pub const EV3_UART_IO_TIMEOUT_MS: u32 = 250;
pub const EV3_UART_MAX_DATA_ERR: u32 = 6;
pub const MAX_SYNC_ERRORS: u32 = 10;
pub const CHECKSUM_SEED: u8 = 0xFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MsgType {
    Sys = 0,
    Cmd = 1,
    Info = 2,
    Data = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SysCmd {
    Sync = 0,
    Nack = 2,
    Ack = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Cmd {
    Type = 0,
    Modes = 1,
    Speed = 2,
    Select = 3,
    Write = 4,
    ExtMode = 6,
    Version = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum InfoCmd {
    Name = 0,
    Raw = 1,
    Pct = 2,
    Si = 3,
    Units = 4,
    Mapping = 5,
    ModeCombos = 6,
    Format = 0x80,
}

/// Decodes the size field of a header byte (bits 2-4) into a payload byte
/// count. Sizes are `{1,2,4,8,16,32}`, encoded as `1 << size_bits` except
/// that the encoding saturates at 32 for `size_bits >= 5`.
pub const fn decode_size(header: u8) -> usize {
    let size_bits = (header >> 3) & 0x7;
    1usize << size_bits
}

fn encode_size_bits(payload_len: usize) -> u8 {
    debug_assert!(payload_len.is_power_of_two() || payload_len == 0);
    match payload_len {
        0 | 1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        16 => 4,
        _ => 5,
    }
}

pub const fn msg_type(header: u8) -> u8 {
    header >> 6
}

pub const fn msg_cmd(header: u8) -> u8 {
    header & 0x07
}

pub fn make_header(ty: MsgType, cmd: u8, payload_len: usize) -> u8 {
    ((ty as u8) << 6) | (encode_size_bits(payload_len) << 3) | (cmd & 0x07)
}

/// XOR checksum over header + payload, seeded with [`CHECKSUM_SEED`] so the
/// all-zero message still produces a non-zero checksum byte.
pub fn checksum(header: u8, payload: &[u8]) -> u8 {
    let mut c = CHECKSUM_SEED ^ header;
    for &b in payload {
        c ^= b;
    }
    c
}

/// A decoded LUMP message: header, payload, and trailing checksum byte (SYS
/// messages carry no checksum, matching `uartdev.c`'s single-byte SYNC/NACK/
/// ACK frames).
#[derive(Clone, Copy)]
pub struct Message {
    pub header: u8,
    payload: [u8; MAX_LUMP_PAYLOAD],
    payload_len: usize,
}

impl Message {
    pub fn sys(cmd: SysCmd) -> Self {
        Self {
            header: make_header(MsgType::Sys, cmd as u8, 0),
            payload: [0; MAX_LUMP_PAYLOAD],
            payload_len: 0,
        }
    }

    pub fn with_payload(ty: MsgType, cmd: u8, data: &[u8]) -> Self {
        let mut payload = [0u8; MAX_LUMP_PAYLOAD];
        let size = encoded_payload_len(data.len());
        payload[..data.len()].copy_from_slice(data);
        Self {
            header: make_header(ty, cmd, size),
            payload,
            payload_len: size,
        }
    }

    pub fn msg_type(&self) -> u8 {
        msg_type(self.header)
    }

    pub fn cmd(&self) -> u8 {
        msg_cmd(self.header)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_len]
    }

    pub fn checksum(&self) -> u8 {
        checksum(self.header, self.payload())
    }

    /// Serializes into `out`, returning the number of bytes written. SYS
    /// messages are a single byte (no checksum), matching the upstream
    /// single-byte SYNC/ACK/NACK frames.
    pub fn encode(&self, out: &mut [u8]) -> usize {
        if self.msg_type() == MsgType::Sys as u8 {
            out[0] = self.header;
            return 1;
        }
        out[0] = self.header;
        out[1..1 + self.payload_len].copy_from_slice(self.payload());
        out[1 + self.payload_len] = self.checksum();
        2 + self.payload_len
    }
}

fn encoded_payload_len(n: usize) -> usize {
    if n <= 1 {
        1
    } else if n <= 2 {
        2
    } else if n <= 4 {
        4
    } else if n <= 8 {
        8
    } else if n <= 16 {
        16
    } else {
        32
    }
}
