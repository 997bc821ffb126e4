//! Iodev data model (spec §3 "Iodev", §4.3): type id, per-mode metadata,
//! capability flags, and the current-mode data buffer. Grounded in
//! `pbio/iodev.h`'s `pbio_iodev_type_id_t` / capability flag enum / mode
//! info layout.

use bitflags::bitflags;
use heapless::String;

use crate::config::{MAX_LUMP_PAYLOAD, MAX_MODES};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CapabilityFlags: u8 {
        const IS_DC_OUTPUT       = 1 << 0;
        const HAS_MOTOR_SPEED    = 1 << 1;
        const HAS_MOTOR_REL_POS  = 1 << 2;
        const HAS_MOTOR_ABS_POS  = 1 << 3;
        const NEEDS_SUPPLY_PIN1  = 1 << 4;
        const NEEDS_SUPPLY_PIN2  = 1 << 5;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(test), derive(defmt::Format))]
pub enum ElementType {
    I8,
    I16,
    I32,
    F32,
}

/// `PBIO_IODEV_TYPE_ID_INTERACTIVE_MOTOR`: the one device that omits the
/// `INFO_NAME` capability-flags byte and relies on a hardcoded fallback
/// (`uartdev.c`'s `LUMP_MODE_FLAGS0_MOTOR | _MOTOR_POWER | _MOTOR_SPEED |
/// _MOTOR_REL_POS`).
pub const INTERACTIVE_MOTOR_TYPE_ID: u8 = 38;

/// Decodes the optional capability-flags byte appended to a "long"
/// `INFO_NAME` message (`uartdev.c`'s `rx_msg[8]`, one bit per
/// `PBIO_IODEV_CAPABILITY_FLAG_*`). The bit layout matches [`CapabilityFlags`]
/// directly.
pub const fn capability_flags_from_byte(raw: u8) -> CapabilityFlags {
    CapabilityFlags::from_bits_truncate(raw)
}

impl ElementType {
    pub const fn size(self) -> usize {
        match self {
            ElementType::I8 => 1,
            ElementType::I16 => 2,
            ElementType::I32 | ElementType::F32 => 4,
        }
    }

    /// Decodes the 2-bit data-type field plus writable bit from a LUMP
    /// `INFO_FORMAT` byte (`PBIO_IODEV_DATA_TYPE_MASK` / `_WRITABLE`).
    pub const fn from_format_byte(b: u8) -> (Self, bool) {
        let ty = match b & 0x03 {
            0 => ElementType::I8,
            1 => ElementType::I16,
            2 => ElementType::I32,
            _ => ElementType::F32,
        };
        (ty, b & 0x04 != 0)
    }
}

/// Metadata for one mode, accumulated across `INFO_NAME` / `INFO_FORMAT` /
/// other info messages during the `INFO` sync phase. `element_type` is
/// `None` until `INFO_FORMAT` arrives for this mode.
#[derive(Clone, Default)]
pub struct ModeInfo {
    pub name: String<12>,
    pub num_values: u8,
    pub element_type: Option<ElementType>,
    pub writable: bool,
}

/// Bits of `EV3_UART_INFO_FLAG_REQUIRED`: info that must have arrived before
/// the `SYS/ACK` ending the `INFO` phase is accepted (spec §4.3 step 4).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InfoReceived {
    pub cmd_type: bool,
    pub cmd_modes: bool,
    pub names: u32,
    pub formats: u32,
}

impl InfoReceived {
    pub fn mark_name(&mut self, mode: u8) {
        self.names |= 1 << mode;
    }

    pub fn mark_format(&mut self, mode: u8) {
        self.formats |= 1 << mode;
    }

    /// All required info received for `num_modes` modes (spec §4.3: "missing
    /// any → abort to ERR").
    pub fn is_complete(&self, num_modes: u8) -> bool {
        if !(self.cmd_type && self.cmd_modes) {
            return false;
        }
        let mask: u32 = if num_modes >= 32 {
            u32::MAX
        } else {
            (1u32 << num_modes) - 1
        };
        (self.names & mask) == mask && (self.formats & mask) == mask
    }
}

/// The attached LUMP device: type id, all mode metadata, capability flags,
/// and the current mode's data buffer. Created on sync completion,
/// destroyed (returns to `type_id = None`) on unplug or fatal parse error
/// (spec §3 Iodev lifecycle).
pub struct Iodev {
    pub type_id: u8,
    pub num_modes: u8,
    pub modes: [ModeInfo; MAX_MODES],
    pub capability_flags: CapabilityFlags,
    pub current_mode: u8,
    pub data: [u8; MAX_LUMP_PAYLOAD],
    pub data_len: usize,
}

impl Iodev {
    pub fn new(type_id: u8) -> Self {
        Self {
            type_id,
            num_modes: 0,
            modes: Default::default(),
            capability_flags: CapabilityFlags::empty(),
            current_mode: 0,
            data: [0; MAX_LUMP_PAYLOAD],
            data_len: 0,
        }
    }

    pub fn mode_info(&self, mode: u8) -> &ModeInfo {
        &self.modes[mode as usize]
    }

    pub fn is_dc_output(&self) -> bool {
        self.capability_flags.contains(CapabilityFlags::IS_DC_OUTPUT)
    }

    pub fn is_feedback_motor(&self) -> bool {
        self.capability_flags
            .contains(CapabilityFlags::HAS_MOTOR_REL_POS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_required_completes_only_after_all_modes_covered() {
        let mut r = InfoReceived::default();
        r.cmd_type = true;
        r.cmd_modes = true;
        assert!(!r.is_complete(2));
        r.mark_name(0);
        r.mark_format(0);
        assert!(!r.is_complete(2));
        r.mark_name(1);
        r.mark_format(1);
        assert!(r.is_complete(2));
    }

    #[test]
    fn format_byte_decodes_type_and_writable() {
        let (ty, writable) = ElementType::from_format_byte(0b0000_0110);
        assert_eq!(ty, ElementType::I32);
        assert!(writable);
        let (ty, writable) = ElementType::from_format_byte(0b0000_0001);
        assert_eq!(ty, ElementType::I16);
        assert!(!writable);
    }
}
