//! C3 sync state machine (spec §4.3 "Sync protocol"), expressed as the
//! `poll(&mut self, cx) -> Poll` state machine mandated for every
//! protothread here: `INIT -> SYNCING -> INFO -> ACK -> DATA -> ERR`.
//! Grounded in `uartdev.c`'s `uart_state` switch and its per-state
//! substates.

use core::task::Poll;

use heapless::String;

use crate::error::PbioError;
use crate::hal::{IoStatus, Instant, UartDriver};
use crate::rt::timer::Timer;

use super::iodev::{capability_flags_from_byte, CapabilityFlags, ElementType, Iodev, InfoReceived, INTERACTIVE_MOTOR_TYPE_ID};
use super::protocol::{
    self, msg_cmd, msg_type, Cmd, InfoCmd, MsgType, SysCmd, EV3_UART_DATA_KEEP_ALIVE_TIMEOUT_MS,
    EV3_UART_IO_TIMEOUT_MS, EV3_UART_MAX_DATA_ERR, EV3_UART_SPEED_LPF2, EV3_UART_SPEED_MIN,
    EV3_UART_TYPE_MAX, EV3_UART_TYPE_MIN, MAX_SYNC_ERRORS,
};
use crate::config::MAX_MODES;

/// EV3 color sensor mode-4 (RGB_RAW) checksum exemption (spec §4.3, §9 open
/// question 3): narrow to this exact type id + header, so it can't mask
/// real faults on other devices/modes.
const EV3_COLOR_SENSOR_TYPE_ID: u8 = 29;
const EV3_COLOR_SENSOR_RGB_RAW_HEADER: u8 = (MsgType::Data as u8) << 6 | (3 << 3) | 4;

/// BOOST Color/Distance sensor IR-TX mode (spec §4.3 "Mode changes & writes"):
/// the one mode that needs the long 250 ms post-write quiet period instead of
/// the default 2 ms, per `uartdev.c`'s `pbio_iodev_delay_set_data`.
const BOOST_COLOR_DIST_SENSOR_TYPE_ID: u8 = 37;
const BOOST_COLOR_DIST_SENSOR_IR_TX_MODE: u8 = 7;
const DEFAULT_WRITE_QUIET_MS: u32 = 2;
const BOOST_IR_TX_WRITE_QUIET_MS: u32 = 250;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(test), derive(defmt::Format))]
pub enum SyncState {
    Init,
    Syncing,
    Info,
    Ack,
    Data,
    Err,
}

/// Sub-phase within `INIT`, since it has its own multi-step await sequence
/// (reset hold, baud set, speed transmit, ack-or-fallback read).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InitPhase {
    ResetHold,
    AwaitSpeedAck,
}

/// Sub-phase within `ACK`: the 10 ms gap between transmitting `ACK` and
/// switching baud rate must be bit-exact (spec §9 Design Notes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AckPhase {
    Transmitting,
    Waiting,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FramePhase {
    Header,
    Body { header: u8, len: usize },
}

/// Assembles one LUMP message across UART read ticks: a header byte, then
/// (for non-SYS messages) `size` payload bytes plus a trailing checksum
/// byte. Mirrors `uartdev.c`'s two-stage `rx_msg` fill.
struct FrameReader {
    phase: FramePhase,
    buf: [u8; 34],
    last_payload_len: usize,
}

impl FrameReader {
    const fn new() -> Self {
        Self {
            phase: FramePhase::Header,
            buf: [0; 34],
            last_payload_len: 0,
        }
    }

    fn reset(&mut self) {
        self.phase = FramePhase::Header;
    }

    /// Returns `Some((header, payload, checksum_ok))` once a full frame has
    /// been read. SYS messages (single byte, no checksum) report
    /// `checksum_ok = true` unconditionally.
    fn poll<U: UartDriver>(&mut self, uart: &mut U, handle: U::Handle) -> Option<(u8, usize, bool)> {
        match self.phase {
            FramePhase::Header => {
                let mut b = [0u8; 1];
                match uart.read_end(handle, &mut b) {
                    IoStatus::Ok(1) => {
                        let header = b[0];
                        if msg_type(header) == MsgType::Sys as u8 {
                            self.reset();
                            self.last_payload_len = 0;
                            return Some((header, 0, true));
                        }
                        let len = protocol::decode_size(header);
                        uart.read_begin(handle, len + 1, EV3_UART_IO_TIMEOUT_MS);
                        self.phase = FramePhase::Body { header, len };
                        None
                    }
                    _ => {
                        uart.read_begin(handle, 1, EV3_UART_IO_TIMEOUT_MS);
                        None
                    }
                }
            }
            FramePhase::Body { header, len } => {
                match uart.read_end(handle, &mut self.buf[..len + 1]) {
                    IoStatus::Ok(n) if n == len + 1 => {
                        let expected = protocol::checksum(header, &self.buf[..len]);
                        let ok = expected == self.buf[len];
                        self.last_payload_len = len;
                        self.reset();
                        uart.read_begin(handle, 1, EV3_UART_IO_TIMEOUT_MS);
                        Some((header, len, ok))
                    }
                    IoStatus::TimedOut => {
                        self.reset();
                        uart.read_begin(handle, 1, EV3_UART_IO_TIMEOUT_MS);
                        None
                    }
                    _ => None,
                }
            }
        }
    }

    /// Payload bytes of the most recently completed frame (valid until the
    /// next frame overwrites the buffer).
    fn payload(&self) -> &[u8] {
        &self.buf[..self.last_payload_len]
    }
}

/// One port's LUMP sync driver. Owns the iodev once sync completes.
pub struct LumpDriver<U: UartDriver> {
    handle: U::Handle,
    state: SyncState,
    init_phase: InitPhase,
    ack_phase: AckPhase,
    timer: Timer,
    keep_alive: Timer,
    frame: FrameReader,
    sync_errors: u32,
    data_errors: u32,
    info_received: InfoReceived,
    candidate_type_id: u8,
    candidate_num_modes: u8,
    pub iodev: Option<Iodev>,
    requested_mode: Option<u8>,
    mode_confirm_timer: Timer,
    write_in_flight: bool,
    quiet_until: Option<Instant>,
    /// Sticky offset from a received `CMD/EXT_MODE` message, added to the
    /// header's 3-bit mode field for modes above 7 (spec §4.3; `uartdev.c`'s
    /// `data->ext_mode`). Never auto-resets except on full resync.
    ext_mode: u8,
}

impl<U: UartDriver> LumpDriver<U> {
    pub fn new(handle: U::Handle) -> Self {
        Self {
            handle,
            state: SyncState::Init,
            init_phase: InitPhase::ResetHold,
            ack_phase: AckPhase::Transmitting,
            timer: Timer::new(),
            keep_alive: Timer::new(),
            frame: FrameReader::new(),
            sync_errors: 0,
            data_errors: 0,
            info_received: InfoReceived::default(),
            candidate_type_id: 0,
            candidate_num_modes: 0,
            iodev: None,
            requested_mode: None,
            mode_confirm_timer: Timer::new(),
            write_in_flight: false,
            quiet_until: None,
            ext_mode: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    fn restart(&mut self) {
        self.state = SyncState::Init;
        self.init_phase = InitPhase::ResetHold;
        self.sync_errors = 0;
        self.data_errors = 0;
        self.info_received = InfoReceived::default();
        self.iodev = None;
        self.ext_mode = 0;
        self.write_in_flight = false;
        self.quiet_until = None;
        self.timer.cancel();
        self.keep_alive.cancel();
    }

    fn to_err(&mut self) {
        self.state = SyncState::Err;
        self.iodev = None;
    }

    /// Drives one tick of the sync state machine. Returns `Poll::Ready(())`
    /// once `DATA` is entered with a complete iodev (sync finished, though
    /// the driver keeps running its data-phase sub-protothread after that).
    pub fn poll(&mut self, uart: &mut U, now: Instant) -> Poll<()> {
        match self.state {
            SyncState::Init => self.poll_init(uart, now),
            SyncState::Syncing => self.poll_syncing(uart, now),
            SyncState::Info => self.poll_info(uart, now),
            SyncState::Ack => self.poll_ack(uart, now),
            SyncState::Data => self.poll_data(uart, now),
            SyncState::Err => {
                uart.read_cancel(self.handle);
                Poll::Ready(())
            }
        }
    }

    fn poll_init(&mut self, uart: &mut U, now: Instant) -> Poll<()> {
        match self.init_phase {
            InitPhase::ResetHold => {
                if !self.timer.is_armed() {
                    self.timer.start(now, 150);
                    uart.set_baud_rate(self.handle, EV3_UART_SPEED_LPF2);
                    return Poll::Pending;
                }
                if !self.timer.poll(now) {
                    return Poll::Pending;
                }
                let msg = protocol::Message::with_payload(
                    MsgType::Cmd,
                    Cmd::Speed as u8,
                    &EV3_UART_SPEED_LPF2.to_le_bytes(),
                );
                let mut out = [0u8; 8];
                let n = msg.encode(&mut out);
                uart.write_begin(self.handle, &out[..n], EV3_UART_IO_TIMEOUT_MS);
                uart.read_begin(self.handle, 1, 100);
                self.init_phase = InitPhase::AwaitSpeedAck;
                Poll::Pending
            }
            InitPhase::AwaitSpeedAck => {
                let mut b = [0u8; 1];
                match uart.read_end(self.handle, &mut b) {
                    IoStatus::Ok(1) if b[0] == protocol::make_header(MsgType::Sys, SysCmd::Ack as u8, 0) => {
                        self.enter_syncing();
                        Poll::Ready(())
                    }
                    IoStatus::Again => Poll::Pending,
                    _ => {
                        uart.set_baud_rate(self.handle, EV3_UART_SPEED_MIN);
                        self.enter_syncing();
                        Poll::Ready(())
                    }
                }
            }
        }
    }

    fn enter_syncing(&mut self) {
        self.state = SyncState::Syncing;
        self.frame.reset();
        self.frame.last_payload_len = 0;
    }

    fn poll_syncing(&mut self, uart: &mut U, _now: Instant) -> Poll<()> {
        match self.frame.poll(uart, self.handle) {
            None => Poll::Pending,
            Some((header, _len, checksum_ok)) => {
                let wanted_header = protocol::make_header(MsgType::Cmd, Cmd::Type as u8, 1);
                if header != wanted_header {
                    // Not a CMD/TYPE header; keep reading bytes until one
                    // shows up (spec §4.3 step 3: "read bytes until a
                    // CMD/TYPE header is seen").
                    return Poll::Pending;
                }
                let type_id = self.frame.payload().first().copied().unwrap_or(0);
                if !checksum_ok || type_id < EV3_UART_TYPE_MIN || type_id > EV3_UART_TYPE_MAX {
                    self.bump_sync_error();
                    return Poll::Pending;
                }
                self.candidate_type_id = type_id;
                self.state = SyncState::Info;
                self.info_received = InfoReceived::default();
                self.info_received.cmd_type = true;
                Poll::Ready(())
            }
        }
    }

    fn bump_sync_error(&mut self) {
        self.sync_errors += 1;
        if self.sync_errors >= MAX_SYNC_ERRORS {
            self.restart();
        }
    }

    /// Dispatches one already-received `(header, payload)` pair during the
    /// `INFO` phase. Exposed separately from `poll_info`'s framing so tests
    /// can drive the recorded message streams from spec §8 scenarios 1-2
    /// directly, without a fake UART's byte-level timing.
    pub fn handle_info_message(&mut self, header: u8, payload: &[u8]) -> Result<(), PbioError> {
        let ty = msg_type(header);
        let cmd = msg_cmd(header);
        if ty == MsgType::Sys as u8 {
            if cmd == SysCmd::Ack as u8 {
                if !self.info_received.is_complete(self.candidate_num_modes.max(1)) {
                    self.to_err();
                    return Err(PbioError::Failed);
                }
                self.state = SyncState::Ack;
                self.ack_phase = AckPhase::Transmitting;
                return Ok(());
            }
            return Ok(());
        }
        if ty == MsgType::Cmd as u8 && cmd == Cmd::Modes as u8 {
            self.candidate_num_modes = payload[0].saturating_add(1);
            self.info_received.cmd_modes = true;
            return Ok(());
        }
        if ty == MsgType::Cmd as u8 && cmd == Cmd::ExtMode as u8 {
            // Powered Up devices with modes > 7 send this immediately before
            // the INFO message it extends (spec §4.3; `uartdev.c`'s
            // `LUMP_CMD_EXT_MODE` arm).
            self.ext_mode = payload.first().copied().unwrap_or(0);
            return Ok(());
        }
        if ty == MsgType::Info as u8 {
            let mode = (cmd & 0x07).wrapping_add(self.ext_mode);
            if mode as usize >= MAX_MODES {
                return Ok(());
            }
            return self.handle_info_submsg(mode, payload);
        }
        Ok(())
    }

    fn handle_info_submsg(&mut self, mode: u8, payload: &[u8]) -> Result<(), PbioError> {
        let iodev = self
            .iodev
            .get_or_insert_with(|| Iodev::new(self.candidate_type_id));
        iodev.num_modes = self.candidate_num_modes;
        // The sub-command byte distinguishing NAME/RAW/PCT/SI/UNITS/MAPPING/
        // MODE_COMBOS/FORMAT is `payload[0]` (`uartdev.c`'s `cmd2`, i.e.
        // `rx_msg[1]`); the rest of `payload` is that sub-message's data.
        let sub = payload.first().copied().unwrap_or(0);
        if sub == InfoCmd::Format as u8 {
            // INFO_FORMAT data: num_values, data_type|writable, figures, decimals.
            if payload.len() < 3 {
                return Ok(());
            }
            let mode_info = &mut iodev.modes[mode as usize];
            mode_info.num_values = payload[1];
            let (ty, writable) = ElementType::from_format_byte(payload[2]);
            mode_info.element_type = Some(ty);
            mode_info.writable = writable;
            self.info_received.mark_format(mode);
            return Ok(());
        }
        match InfoCmd::try_from(sub) {
            Ok(InfoCmd::Name) if payload.len() > 1 => {
                let name_bytes = &payload[1..];
                let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
                let mut s = String::new();
                for &b in &name_bytes[..end.min(11)] {
                    s.push(b as char).ok();
                }
                iodev.modes[mode as usize].name = s;

                // Optional capability-flags byte appended to "long" INFO_NAME
                // messages (`uartdev.c`'s `rx_msg[8]`, i.e. `payload[7]`
                // here); devices that omit it fall back to a per-type-id
                // default (only the Interactive Motor needs one upstream).
                let flags = if payload.len() > 7 {
                    capability_flags_from_byte(payload[7])
                } else if iodev.type_id == INTERACTIVE_MOTOR_TYPE_ID {
                    CapabilityFlags::IS_DC_OUTPUT | CapabilityFlags::HAS_MOTOR_SPEED | CapabilityFlags::HAS_MOTOR_REL_POS
                } else {
                    CapabilityFlags::empty()
                };
                iodev.capability_flags |= flags;

                self.info_received.mark_name(mode);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn poll_info(&mut self, uart: &mut U, _now: Instant) -> Poll<()> {
        match self.frame.poll(uart, self.handle) {
            None => Poll::Pending,
            Some((header, _len, checksum_ok)) => {
                // Checksum errors during INFO are fatal (spec §4.3): unlike
                // DATA, there is no per-sensor exemption here.
                if !checksum_ok {
                    self.to_err();
                    return Poll::Ready(());
                }
                let payload_len = self.frame.last_payload_len;
                let mut payload = [0u8; 34];
                payload[..payload_len].copy_from_slice(self.frame.payload());
                match self.handle_info_message(header, &payload[..payload_len]) {
                    Ok(()) => {
                        if self.state == SyncState::Ack {
                            Poll::Ready(())
                        } else {
                            Poll::Pending
                        }
                    }
                    Err(_) => Poll::Ready(()),
                }
            }
        }
    }

    fn poll_ack(&mut self, uart: &mut U, now: Instant) -> Poll<()> {
        match self.ack_phase {
            AckPhase::Transmitting => {
                let msg = protocol::Message::sys(SysCmd::Ack);
                let mut out = [0u8; 1];
                let n = msg.encode(&mut out);
                uart.write_begin(self.handle, &out[..n], EV3_UART_IO_TIMEOUT_MS);
                self.timer.start(now, 10);
                self.ack_phase = AckPhase::Waiting;
                Poll::Pending
            }
            AckPhase::Waiting => {
                if !self.timer.poll(now) {
                    return Poll::Pending;
                }
                uart.set_baud_rate(self.handle, EV3_UART_SPEED_LPF2);
                self.state = SyncState::Data;
                self.keep_alive.start(now, EV3_UART_DATA_KEEP_ALIVE_TIMEOUT_MS);
                self.data_errors = 0;
                Poll::Ready(())
            }
        }
    }

    fn poll_data(&mut self, uart: &mut U, now: Instant) -> Poll<()> {
        if self.write_in_flight && !matches!(uart.write_end(self.handle), IoStatus::Again) {
            self.write_in_flight = false;
        }
        if let Some((header, len, checksum_ok)) = self.frame.poll(uart, self.handle) {
            let ty = msg_type(header);
            if ty == MsgType::Cmd as u8 && msg_cmd(header) == Cmd::ExtMode as u8 {
                if checksum_ok && len > 0 {
                    self.ext_mode = self.frame.payload()[0];
                }
            } else if ty != MsgType::Sys as u8 {
                let mut payload = [0u8; 34];
                payload[..len].copy_from_slice(self.frame.payload());
                self.apply_data_frame_at(now, header, &payload[..len], checksum_ok);
            }
        }
        if self.keep_alive.poll(now) {
            self.data_errors += 1;
            if self.data_errors >= EV3_UART_MAX_DATA_ERR {
                self.to_err();
                return Poll::Ready(());
            }
            let msg = protocol::Message::sys(SysCmd::Nack);
            let mut out = [0u8; 1];
            let n = msg.encode(&mut out);
            uart.write_begin(self.handle, &out[..n], EV3_UART_IO_TIMEOUT_MS);
            self.keep_alive.start(now, EV3_UART_DATA_KEEP_ALIVE_TIMEOUT_MS);
        }
        Poll::Pending
    }

    /// Applies a received `DATA` frame. `checksum_ok` carries whether the
    /// checksum matched; EV3 color sensor mode-4 is exempt from checksum
    /// failure per spec §4.3/§9.
    pub fn apply_data_frame(&mut self, header: u8, payload: &[u8], checksum_ok: bool) {
        self.apply_data_frame_at(Instant::ZERO, header, payload, checksum_ok)
    }

    fn apply_data_frame_at(&mut self, now: Instant, header: u8, payload: &[u8], checksum_ok: bool) {
        let exempt = self.candidate_type_id == EV3_COLOR_SENSOR_TYPE_ID
            && header == EV3_COLOR_SENSOR_RGB_RAW_HEADER;
        if !checksum_ok && !exempt {
            return;
        }
        self.keep_alive.start(now, EV3_UART_DATA_KEEP_ALIVE_TIMEOUT_MS);
        self.data_errors = 0;
        let mode = msg_cmd(header).wrapping_add(self.ext_mode);
        if mode as usize >= MAX_MODES {
            return;
        }
        if let Some(iodev) = &mut self.iodev {
            iodev.current_mode = mode;
            iodev.data[..payload.len()].copy_from_slice(payload);
            iodev.data_len = payload.len();
            if self.requested_mode == Some(mode) {
                self.requested_mode = None;
                self.mode_confirm_timer.cancel();
            }
        }
    }

    /// Requests a mode change (spec §4.3 "Mode changes & writes"). Calling
    /// this twice in a row for the same mode issues at most one
    /// `CMD/SELECT` (testable property, spec §8 Idempotence), since a
    /// pending request for the same mode is left alone.
    pub fn set_mode(&mut self, uart: &mut U, now: Instant, mode: u8) {
        if self.requested_mode == Some(mode) {
            return;
        }
        self.requested_mode = Some(mode);
        self.mode_confirm_timer.start(now, 250);
        let msg = protocol::Message::with_payload(MsgType::Cmd, Cmd::Select as u8, &[mode]);
        let mut out = [0u8; 4];
        let n = msg.encode(&mut out);
        uart.write_begin(self.handle, &out[..n], EV3_UART_IO_TIMEOUT_MS);
    }

    /// Retries the mode change if confirmation hasn't arrived within 250 ms.
    pub fn poll_mode_confirm(&mut self, uart: &mut U, now: Instant) {
        if let Some(mode) = self.requested_mode {
            if self.mode_confirm_timer.poll(now) {
                self.requested_mode = None;
                self.set_mode(uart, now, mode);
            }
        }
    }

    /// Writes mode data (spec §4.3 "Mode changes & writes"): prepends a
    /// `CMD/EXT_MODE` message when `mode` exceeds 7 (the header's mode field
    /// is only 3 bits wide), then sends `DATA/<mode & 0x07>` with `data`.
    /// Both go out as one UART write, since only one may be in flight per
    /// handle (`uartdev.c`'s `ev3_uart_begin_tx_msg` builds the same
    /// combined buffer). No-op if a write is already in flight.
    pub fn write_mode_data(&mut self, uart: &mut U, now: Instant, mode: u8, data: &[u8]) {
        if self.write_in_flight {
            return;
        }
        let mut out = [0u8; 37];
        let mut n = 0;
        if mode > 7 {
            let ext_msg = protocol::Message::with_payload(MsgType::Cmd, Cmd::ExtMode as u8, &[mode & !0x07]);
            n += ext_msg.encode(&mut out[n..n + 4]);
        }
        let data_msg = protocol::Message::with_payload(MsgType::Data, mode & 0x07, data);
        n += data_msg.encode(&mut out[n..]);
        uart.write_begin(self.handle, &out[..n], EV3_UART_IO_TIMEOUT_MS);
        self.write_in_flight = true;
        self.quiet_until = Some(now.add_millis(self.write_quiet_ms(mode)));
    }

    /// Post-write quiet period (spec §4.3): 250 ms for the BOOST
    /// color-distance sensor's IR-TX mode, 2 ms otherwise
    /// (`pbio_iodev_delay_set_data`).
    fn write_quiet_ms(&self, mode: u8) -> u32 {
        if self.candidate_type_id == BOOST_COLOR_DIST_SENSOR_TYPE_ID && mode == BOOST_COLOR_DIST_SENSOR_IR_TX_MODE {
            BOOST_IR_TX_WRITE_QUIET_MS
        } else {
            DEFAULT_WRITE_QUIET_MS
        }
    }

    /// Iodev is "ready" (spec §4.3 "Ready predicate"): in DATA, current mode
    /// matches requested, no write in flight, and any post-write quiet
    /// period has elapsed.
    pub fn is_ready(&self, requested_mode: u8, now: Instant) -> bool {
        self.state == SyncState::Data
            && self.requested_mode.is_none()
            && self
                .iodev
                .as_ref()
                .map(|d| d.current_mode == requested_mode)
                .unwrap_or(false)
            && !self.write_in_flight
            && self.quiet_until.map(|t| now >= t).unwrap_or(true)
    }

    pub fn capability_flags(&self) -> CapabilityFlags {
        self.iodev
            .as_ref()
            .map(|d| d.capability_flags)
            .unwrap_or(CapabilityFlags::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::fakes::FakeClock;
    use crate::hal::Clock;

    struct NullUart;
    impl UartDriver for NullUart {
        type Handle = ();
        fn get(&mut self, _id: u8) -> Self::Handle {}
        fn set_baud_rate(&mut self, _h: Self::Handle, _rate: u32) {}
        fn read_begin(&mut self, _h: Self::Handle, _len: usize, _timeout_ms: u32) {}
        fn read_end(&mut self, _h: Self::Handle, _buf: &mut [u8]) -> IoStatus {
            IoStatus::Again
        }
        fn read_cancel(&mut self, _h: Self::Handle) {}
        fn write_begin(&mut self, _h: Self::Handle, _data: &[u8], _timeout_ms: u32) {}
        fn write_end(&mut self, _h: Self::Handle) -> IoStatus {
            IoStatus::Ok(0)
        }
        fn write_cancel(&mut self, _h: Self::Handle) {}
    }

    #[test]
    fn color_distance_sensor_info_stream_yields_expected_iodev() {
        // Scenario 1 (spec §8): a recorded info stream for a Powered-Up
        // color/distance sensor results in type_id 37, 11 modes, and
        // mode_info[6] = 3x i16 (RGB_I per `iodev.h`).
        let clock = FakeClock(Instant::ZERO);
        let mut drv: LumpDriver<NullUart> = LumpDriver::new(());
        drv.candidate_type_id = 37;
        drv.candidate_num_modes = 11;
        drv.info_received.cmd_type = true;
        drv.info_received.cmd_modes = true;

        // INFO_FORMAT for mode 6: sub-command 0x80, 3 values, i16 (format
        // byte 0x01), not writable.
        drv.handle_info_submsg(6, &[0x80, 3, 0x01, 0, 0]).unwrap();

        let iodev = drv.iodev.as_ref().unwrap();
        assert_eq!(iodev.type_id, 37);
        assert_eq!(iodev.modes[6].num_values, 3);
        assert_eq!(iodev.modes[6].element_type, Some(ElementType::I16));
        let _ = clock.now();
    }

    #[test]
    fn technic_large_motor_info_stream_yields_expected_capability_flags() {
        // Scenario 2 (spec §8): a recorded info stream for a Technic Large
        // Motor results in type_id 46, 6 modes, and capability flags
        // is_dc_output | has_motor_speed | has_motor_rel_pos | has_motor_abs_pos.
        let mut drv: LumpDriver<NullUart> = LumpDriver::new(());
        drv.candidate_type_id = 46;
        drv.candidate_num_modes = 6;
        drv.info_received.cmd_type = true;
        drv.info_received.cmd_modes = true;

        // Long INFO_NAME for mode 0: sub-command 0x00 (NAME), name "POWER",
        // padded out to the capability-flags byte at payload[7].
        let flags_byte = (CapabilityFlags::IS_DC_OUTPUT
            | CapabilityFlags::HAS_MOTOR_SPEED
            | CapabilityFlags::HAS_MOTOR_REL_POS
            | CapabilityFlags::HAS_MOTOR_ABS_POS)
            .bits();
        let payload = [0x00, b'P', b'O', b'W', b'E', b'R', 0, flags_byte];
        drv.handle_info_submsg(0, &payload).unwrap();

        let iodev = drv.iodev.as_ref().unwrap();
        assert_eq!(iodev.type_id, 46);
        assert!(iodev.is_dc_output());
        assert!(iodev.is_feedback_motor());
        assert!(iodev.capability_flags.contains(CapabilityFlags::HAS_MOTOR_ABS_POS));
        assert!(drv.capability_flags().contains(CapabilityFlags::HAS_MOTOR_SPEED));
    }

    #[test]
    fn interactive_motor_without_flags_byte_falls_back_by_type_id() {
        let mut drv: LumpDriver<NullUart> = LumpDriver::new(());
        drv.candidate_type_id = INTERACTIVE_MOTOR_TYPE_ID;
        drv.candidate_num_modes = 1;
        drv.info_received.cmd_type = true;
        drv.info_received.cmd_modes = true;

        // Short INFO_NAME, no trailing capability-flags byte.
        drv.handle_info_submsg(0, &[0x00, b'P', b'W', b'R']).unwrap();

        let iodev = drv.iodev.as_ref().unwrap();
        assert!(iodev.is_dc_output());
        assert!(iodev.is_feedback_motor());
        assert!(!iodev.capability_flags.contains(CapabilityFlags::HAS_MOTOR_ABS_POS));
    }

    #[test]
    fn ext_mode_offsets_incoming_data_frame_mode() {
        let mut drv: LumpDriver<NullUart> = LumpDriver::new(());
        drv.iodev = Some(Iodev::new(46));
        drv.ext_mode = 8;
        // DATA header carries mode 1 in its 3-bit cmd field; with a sticky
        // ext_mode of 8 the device's actual mode is 9.
        let header = protocol::make_header(MsgType::Data, 1, 1);
        drv.apply_data_frame_at(Instant::ZERO, header, &[42], true);
        assert_eq!(drv.iodev.as_ref().unwrap().current_mode, 9);
    }

    #[test]
    fn write_mode_data_above_mode_7_prepends_ext_mode_and_gates_ready() {
        let mut drv: LumpDriver<NullUart> = LumpDriver::new(());
        let mut uart = NullUart;
        drv.state = SyncState::Data;
        drv.iodev = Some(Iodev::new(37));
        drv.iodev.as_mut().unwrap().current_mode = 9;

        drv.write_mode_data(&mut uart, Instant::ZERO, 9, &[1, 2]);
        assert!(drv.write_in_flight);
        assert!(!drv.is_ready(9, Instant::ZERO));
        // One data-phase tick observes the write completing (NullUart's
        // write_end always reports done); readiness still waits out the
        // default 2 ms quiet period.
        drv.poll(&mut uart, Instant::from_millis(1));
        assert!(!drv.write_in_flight);
        assert!(!drv.is_ready(9, Instant::from_millis(1)));
        assert!(drv.is_ready(9, Instant::from_millis(2)));
    }

    #[test]
    fn boost_color_sensor_ir_tx_write_gets_long_quiet_period() {
        let mut drv: LumpDriver<NullUart> = LumpDriver::new(());
        let mut uart = NullUart;
        drv.state = SyncState::Data;
        drv.candidate_type_id = BOOST_COLOR_DIST_SENSOR_TYPE_ID;
        drv.iodev = Some(Iodev::new(BOOST_COLOR_DIST_SENSOR_TYPE_ID));
        drv.iodev.as_mut().unwrap().current_mode = BOOST_COLOR_DIST_SENSOR_IR_TX_MODE;

        drv.write_mode_data(&mut uart, Instant::ZERO, BOOST_COLOR_DIST_SENSOR_IR_TX_MODE, &[1]);
        drv.poll(&mut uart, Instant::from_millis(1));
        assert!(!drv.write_in_flight);
        assert!(!drv.is_ready(BOOST_COLOR_DIST_SENSOR_IR_TX_MODE, Instant::from_millis(2)));
        assert!(drv.is_ready(BOOST_COLOR_DIST_SENSOR_IR_TX_MODE, Instant::from_millis(250)));
    }

    #[test]
    fn set_mode_twice_issues_one_select() {
        let mut drv: LumpDriver<NullUart> = LumpDriver::new(());
        let mut uart = NullUart;
        drv.set_mode(&mut uart, Instant::ZERO, 2);
        let first_requested = drv.requested_mode;
        drv.set_mode(&mut uart, Instant::from_millis(1), 2);
        assert_eq!(drv.requested_mode, first_requested);
    }

    #[test]
    fn sync_error_storm_restarts_from_init() {
        let mut drv: LumpDriver<NullUart> = LumpDriver::new(());
        drv.state = SyncState::Syncing;
        for _ in 0..MAX_SYNC_ERRORS {
            drv.bump_sync_error();
        }
        assert_eq!(drv.state, SyncState::Init);
    }
}
