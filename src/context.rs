//! Hub context (spec §9 Design Notes "Global mutable state"): the single
//! value that owns every per-port and per-subsystem record plus the system
//! status word, so the firmware binary passes one thing by reference into
//! each subsystem instead of scattering globals. Concrete hardware
//! collaborators (the motor/tacho/UART/BLE/block-device singletons) stay
//! owned by the firmware binary and are threaded through by reference each
//! call, the way the teacher borrows peripherals from its RTIC `Shared`
//! struct into each task rather than owning trait objects here.
//!
//! Per-port state (LUMP driver, servo) is created lazily as C2 classifies
//! each port and torn down when a port's classification changes away from
//! it, rather than allocated up front for every port.

use core::array;

use bbqueue::{Consumer, Producer};

use crate::ble::{self, Command, PybricksError};
use crate::config::{NUM_PORTS, STDIN_RING_SIZE, STDOUT_RING_SIZE};
use crate::error::PbioError;
use crate::hal::{BlockDevice, BluetoothDriver, Instant, MotorDriver, TachoSource, UartDriver};
use crate::hmi::{self, ButtonState};
use crate::lump::LumpDriver;
use crate::motion::{ControlSettings, Servo};
use crate::port::{DeviceKind, PinSample, Port};
use crate::rt::BusyCount;
use crate::status::StatusFlags;
use crate::storage::StorageManager;

fn is_motor(kind: DeviceKind) -> bool {
    matches!(
        kind,
        DeviceKind::TrainMotor | DeviceKind::LargeMotor | DeviceKind::MediumMotor | DeviceKind::XMotor
    )
}

pub struct HubContext<M: MotorDriver, T: TachoSource, U: UartDriver> {
    pub status: crate::status::SystemStatus,
    pub busy: BusyCount,
    ports: [Port; NUM_PORTS],
    lump: [Option<LumpDriver<U>>; NUM_PORTS],
    servos: [Option<Servo<M, T>>; NUM_PORTS],
    pub ble: ble::Controller,
    pub storage: StorageManager,
    pub hmi: hmi::Supervisor,
    servo_settings: ControlSettings,
    program_id: u8,
    reboot_requested: bool,
}

impl<M: MotorDriver, T: TachoSource, U: UartDriver> HubContext<M, T, U> {
    pub fn new(
        num_slots: u8,
        servo_settings: ControlSettings,
        stdin: Producer<'static, STDIN_RING_SIZE>,
        stdout: Consumer<'static, STDOUT_RING_SIZE>,
    ) -> Self {
        Self {
            status: crate::status::SystemStatus::new(),
            busy: BusyCount::new(),
            ports: array::from_fn(|i| Port::new(i as u8)),
            lump: array::from_fn(|_| None),
            servos: array::from_fn(|_| None),
            ble: ble::Controller::new(stdin, stdout),
            storage: StorageManager::new(),
            hmi: hmi::Supervisor::new(num_slots),
            servo_settings,
            program_id: 0,
            reboot_requested: false,
        }
    }

    pub fn reboot_requested(&self) -> bool {
        self.reboot_requested
    }

    /// Boot sequence: load storage, then wait on [`Self::busy`] before
    /// letting [`hmi::Supervisor`] leave [`hmi`]'s boot phase (spec §4.8
    /// "boot"). `running_firmware_hash` identifies the image currently
    /// executing, per spec §4.7.
    pub fn boot(&mut self, dev: &mut impl BlockDevice, running_firmware_hash: [u8; 16]) -> Result<(), PbioError> {
        self.busy.up();
        self.storage.boot(dev, running_firmware_hash)?;
        self.busy.down();
        Ok(())
    }

    /// Feeds one port-detection sample (spec §4.2), creating or tearing
    /// down that port's LUMP/servo record as its classification changes.
    pub fn scan_port(&mut self, port: usize, sample: PinSample, uart: &mut U, motor: &mut M, tacho: &mut T) {
        let prior = self.ports[port].detector.kind;
        if let Some(kind) = self.ports[port].detector.sample(sample) {
            if prior == DeviceKind::UartCandidate && kind != DeviceKind::UartCandidate {
                self.lump[port] = None;
            }
            if is_motor(prior) && !is_motor(kind) {
                self.servos[port] = None;
            }
            match kind {
                DeviceKind::UartCandidate => {
                    let handle = uart.get(port as u8);
                    self.lump[port] = Some(LumpDriver::new(handle));
                }
                k if is_motor(k) => {
                    let motor_handle = motor.get_dev(port as u8);
                    let tacho_handle = tacho.get_dev(port as u8);
                    self.servos[port] = Some(Servo::new(motor_handle, tacho_handle, self.servo_settings));
                }
                _ => {}
            }
        }
    }

    pub fn servo(&mut self, port: usize) -> Option<&mut Servo<M, T>> {
        self.servos[port].as_mut()
    }

    pub fn lump(&mut self, port: usize) -> Option<&mut LumpDriver<U>> {
        self.lump[port].as_mut()
    }

    /// Polls every attached LUMP device's sync state machine (spec §4.3).
    /// Cheap to call every scheduler tick: a device with nothing to do
    /// returns immediately.
    pub fn poll_lump_devices(&mut self, uart: &mut U, now: Instant) {
        for slot in self.lump.iter_mut().flatten() {
            let _ = slot.poll(uart, now);
        }
    }

    /// Decodes and applies one BLE GATT write (spec §4.6), bridging C6's
    /// parsed command into C7 (storage) and C8 (HMI) as needed. Returns the
    /// Pybricks error code for the write response.
    pub fn handle_ble_command(&mut self, frame: &[u8], now: Instant) -> Result<(), PybricksError> {
        let running = self.hmi.is_running();
        let cmd = self.ble.handle_command(frame, running)?;
        match cmd {
            Command::StartUserProgram { id } => {
                let slot = id.map(|v| v as u8);
                self.program_id = self.program_id.wrapping_add(1);
                self.hmi.request_start(slot, &mut self.status, now);
            }
            Command::StopUserProgram => self.hmi.request_stop(),
            Command::WriteUserProgramMeta { size } => {
                self.storage
                    .set_program_size(self.hmi.selected_slot() as usize, size, running)
                    .map_err(|_| PybricksError::ValueNotAllowed)?;
            }
            Command::WriteUserRam { offset, data } => {
                self.storage
                    .set_program_data(offset, &data, running)
                    .map_err(|_| PybricksError::ValueNotAllowed)?;
            }
            Command::RebootToUpdate => self.reboot_requested = true,
            Command::StartRepl { .. } | Command::WriteAppData { .. } => {}
        }
        Ok(())
    }

    /// One scheduler tick's worth of BLE bus work (spec §4.6). Encodes and
    /// sends a status report inline when one is due; a declined send is
    /// simply retried on the next liveness-guard period.
    pub fn tick_ble(&mut self, bt: &mut impl BluetoothDriver, now: Instant) {
        let connected = bt.is_connected();
        if connected && !self.status.test(StatusFlags::BLE_CONNECTED) {
            self.hmi.on_ble_connected(&mut self.status, now);
        } else if !connected && self.status.test(StatusFlags::BLE_CONNECTED) {
            self.hmi.on_ble_disconnected(&mut self.status, now);
        }

        let slot = self.hmi.selected_slot();
        if let Some(report) = self.ble.tick(bt, &mut self.status, self.program_id, slot, now) {
            let bytes = report.encode();
            bt.send(crate::hal::SendCtx { data: &bytes });
        }
    }

    /// One scheduler tick's worth of HMI work (spec §4.8), applying
    /// side-effecting actions that stay within this context's reach
    /// (advertising, storage persist) and returning the rest
    /// (`StartProgram`, `PowerOff`) for the firmware binary to act on.
    pub fn tick_hmi(
        &mut self,
        bt: &mut impl BluetoothDriver,
        storage_dev: &mut impl BlockDevice,
        buttons: ButtonState,
        now: Instant,
    ) -> hmi::Action {
        let action = self.hmi.tick(&mut self.status, &self.busy, buttons, now);
        match action {
            hmi::Action::SetAdvertising(enable) => {
                bt.start_advertising(enable);
                self.status.set(StatusFlags::BLE_ADVERTISING, enable, now);
            }
            hmi::Action::PersistStorage => {
                self.busy.up();
                let _ = self.storage.shutdown(storage_dev);
                self.busy.down();
            }
            hmi::Action::None | hmi::Action::StartProgram(_) | hmi::Action::PowerOff => {}
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::fakes::{FakeBlockDevice, FakeMotorDriver, FakeTachoSource};
    use crate::hal::{IoStatus, SendCtx};

    struct NullUart;
    impl UartDriver for NullUart {
        type Handle = u8;
        fn get(&mut self, id: u8) -> u8 {
            id
        }
        fn set_baud_rate(&mut self, _h: u8, _rate: u32) {}
        fn read_begin(&mut self, _h: u8, _len: usize, _timeout_ms: u32) {}
        fn read_end(&mut self, _h: u8, _buf: &mut [u8]) -> IoStatus {
            IoStatus::Again
        }
        fn read_cancel(&mut self, _h: u8) {}
        fn write_begin(&mut self, _h: u8, _data: &[u8], _timeout_ms: u32) {}
        fn write_end(&mut self, _h: u8) -> IoStatus {
            IoStatus::Ok(0)
        }
        fn write_cancel(&mut self, _h: u8) {}
    }

    struct NullBt {
        connected: bool,
    }
    impl BluetoothDriver for NullBt {
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn send(&mut self, _ctx: SendCtx) -> bool {
            true
        }
        fn send_done(&mut self) -> bool {
            true
        }
        fn start_advertising(&mut self, _enable: bool) {}
        fn is_advertising(&self) -> bool {
            false
        }
        fn poll_receive(&mut self, _buf: &mut [u8]) -> Option<usize> {
            None
        }
    }

    type Ctx = HubContext<FakeMotorDriver, FakeTachoSource, NullUart>;

    fn new_ctx() -> Ctx {
        static STDIN: crate::ble::ByteRing<STDIN_RING_SIZE> = crate::ble::ByteRing::new();
        static STDOUT: crate::ble::ByteRing<STDOUT_RING_SIZE> = crate::ble::ByteRing::new();
        let (stdin_p, _stdin_c) = STDIN.split();
        let (_stdout_p, stdout_c) = STDOUT.split();
        HubContext::new(5, ControlSettings::default(), stdin_p, stdout_c)
    }

    #[test]
    fn start_command_requests_program_start_through_hmi() {
        let mut ctx = new_ctx();
        // Bring the supervisor out of its boot phase first.
        ctx.hmi.tick(
            &mut ctx.status,
            &ctx.busy,
            ButtonState::default(),
            Instant::from_millis(0),
        );
        ctx.hmi.tick(
            &mut ctx.status,
            &ctx.busy,
            ButtonState::default(),
            Instant::from_millis(1000),
        );

        ctx.handle_ble_command(&[0x01, 0x02, 0, 0, 0], Instant::from_millis(1000)).unwrap();
        assert!(ctx.hmi.is_running());
        assert_eq!(ctx.hmi.selected_slot(), 2);
        assert!(ctx.status.test(StatusFlags::USER_PROGRAM_RUNNING));
    }

    #[test]
    fn write_meta_and_ram_reach_storage() {
        let mut ctx = new_ctx();
        ctx.handle_ble_command(&[0x03, 0, 0, 0, 0], Instant::ZERO).unwrap();
        ctx.handle_ble_command(&[0x04, 0, 0, 0, 0, b'h', b'i'], Instant::ZERO).unwrap();
        ctx.handle_ble_command(&[0x03, 2, 0, 0, 0], Instant::ZERO).unwrap();
        assert_eq!(ctx.storage.slot_info(0).1, 2);
        assert_eq!(ctx.storage.program_slice(0), b"hi");
    }

    #[test]
    fn persist_storage_action_writes_back_dirty_data() {
        let mut ctx = new_ctx();
        let mut dev = FakeBlockDevice {
            storage: heapless::Vec::new(),
        };
        dev.storage.extend_from_slice(&[0u8; crate::storage::MAP_SIZE]).ok();
        ctx.boot(&mut dev, [0u8; 16]).unwrap();
        ctx.storage.set_user_data(0, b"x").unwrap();

        let mut bt = NullBt { connected: false };
        let action = ctx.tick_hmi(&mut bt, &mut dev, ButtonState::default(), Instant::from_millis(0));
        assert_eq!(action, hmi::Action::None);
        // storage.shutdown only runs via Action::PersistStorage; exercise it
        // directly here since driving a full idle timeout is covered in the
        // hmi module's own tests.
        ctx.storage.shutdown(&mut dev).unwrap();

        let mut reloaded = StorageManager::new();
        reloaded.boot(&mut dev, [0u8; 16]).unwrap();
        assert_eq!(&reloaded.user_data()[..1], b"x");
    }
}
