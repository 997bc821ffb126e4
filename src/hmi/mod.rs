//! C8: HMI supervisor (spec §4.8). Owns button debouncing, slot selection,
//! the status light, and the top-level `boot -> idle -> running -> idle ->
//! ... -> shutdown` lifecycle, grounded in upstream's two idle-state
//! protothreads (`pbsys_hmi_launch_program_with_button`,
//! `pbsys_hmi_monitor_bluetooth_state`) folded into one `poll`-driven state
//! machine rather than two separately scheduled ones, since both only ever
//! run while [`Phase::Idle`].

pub mod light;

pub use light::{Light, StatusLight};

use crate::config::{BOOT_ANIMATION_MIN_MS, BUTTON_DEBOUNCE_MS, IDLE_TIMEOUT_MS, SHUTDOWN_ANIMATION_MIN_MS};
use crate::hal::Instant;
use crate::rt::{BusyCount, Timer};
use crate::status::{StatusFlags, SystemStatus};

/// Raw button levels sampled this tick. Hubs without left/right or a
/// BLE-toggle button simply never set those fields; there is no separate
/// hal trait for buttons since the CLI surface (spec §6) is hub-specific
/// and debouncing is this module's own job, not a collaborator's.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ButtonState {
    pub center: bool,
    pub left: bool,
    pub right: bool,
    pub ble_toggle: bool,
}

/// What the caller must do in response to this tick. The supervisor never
/// touches BLE/storage/power collaborators directly; it only owns HMI state
/// and the status word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    None,
    SetAdvertising(bool),
    StartProgram(u8),
    PersistStorage,
    PowerOff,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Boot,
    Idle,
    Running,
    Shutdown,
}

/// Debounces one button's raw level into a single pulse fired once the
/// level has been stably high for [`BUTTON_DEBOUNCE_MS`], not re-firing
/// again until the button is released and pressed anew.
#[derive(Clone, Copy, Debug, Default)]
struct Debounce {
    level: bool,
    since: Instant,
    fired: bool,
}

impl Debounce {
    const fn new() -> Self {
        Self {
            level: false,
            since: Instant::ZERO,
            fired: false,
        }
    }

    fn update(&mut self, raw: bool, now: Instant) -> bool {
        if raw != self.level {
            self.level = raw;
            self.since = now;
            self.fired = false;
            return false;
        }
        if raw && !self.fired && now.saturating_since(self.since) >= BUTTON_DEBOUNCE_MS {
            self.fired = true;
            return true;
        }
        false
    }
}

pub struct Supervisor {
    phase: Phase,
    selected_slot: u8,
    num_slots: u8,
    boot_timer: Timer,
    boot_anim_done: bool,
    shutdown_timer: Timer,
    shutdown_anim_done: bool,
    idle_since: Instant,
    stop_requested: bool,
    center: Debounce,
    left: Debounce,
    right: Debounce,
    ble_toggle: Debounce,
}

impl Supervisor {
    pub fn new(num_slots: u8) -> Self {
        Self {
            phase: Phase::Boot,
            selected_slot: 0,
            num_slots,
            boot_timer: Timer::new(),
            boot_anim_done: false,
            shutdown_timer: Timer::new(),
            shutdown_anim_done: false,
            idle_since: Instant::ZERO,
            stop_requested: false,
            center: Debounce::new(),
            left: Debounce::new(),
            right: Debounce::new(),
            ble_toggle: Debounce::new(),
        }
    }

    pub fn selected_slot(&self) -> u8 {
        self.selected_slot
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// One scheduler tick. `busy` gates the boot->idle and shutdown->poweroff
    /// transitions on outstanding async init/deinit work.
    pub fn tick(
        &mut self,
        status: &mut SystemStatus,
        busy: &BusyCount,
        buttons: ButtonState,
        now: Instant,
    ) -> Action {
        match self.phase {
            Phase::Boot => self.tick_boot(busy, now),
            Phase::Idle => self.tick_idle(status, buttons, now),
            Phase::Running => self.tick_running(buttons, now),
            Phase::Shutdown => self.tick_shutdown(status, busy, now),
        }
    }

    fn tick_boot(&mut self, busy: &BusyCount, now: Instant) -> Action {
        if !self.boot_anim_done {
            if !self.boot_timer.is_armed() {
                self.boot_timer.start(now, BOOT_ANIMATION_MIN_MS);
            }
            if self.boot_timer.poll(now) {
                self.boot_anim_done = true;
            }
        }
        if self.boot_anim_done && busy.is_idle() {
            self.phase = Phase::Idle;
            self.idle_since = now;
        }
        Action::None
    }

    fn tick_idle(&mut self, status: &mut SystemStatus, buttons: ButtonState, now: Instant) -> Action {
        if self.center.update(buttons.center, now) {
            let slot = self.selected_slot;
            self.enter_running(status, now);
            return Action::StartProgram(slot);
        }
        if self.left.update(buttons.left, now) {
            self.selected_slot = (self.selected_slot + self.num_slots - 1) % self.num_slots;
            self.idle_since = now;
        }
        if self.right.update(buttons.right, now) {
            self.selected_slot = (self.selected_slot + 1) % self.num_slots;
            self.idle_since = now;
        }
        if self.ble_toggle.update(buttons.ble_toggle, now) {
            self.idle_since = now;
            return Action::SetAdvertising(!status.test(StatusFlags::BLE_ADVERTISING));
        }

        if status.test(StatusFlags::BATTERY_CRITICAL) {
            self.begin_shutdown(status, now);
            return Action::PersistStorage;
        }

        let host_connected = status.test(StatusFlags::BLE_CONNECTED) || status.test(StatusFlags::USB_CONNECTED);
        if host_connected {
            self.idle_since = now;
        } else if now.saturating_since(self.idle_since) >= IDLE_TIMEOUT_MS {
            self.begin_shutdown(status, now);
            return Action::PersistStorage;
        }

        Action::None
    }

    fn tick_running(&mut self, buttons: ButtonState, now: Instant) -> Action {
        if self.center.update(buttons.center, now) {
            self.stop_requested = true;
        }
        Action::None
    }

    fn tick_shutdown(&mut self, status: &mut SystemStatus, busy: &BusyCount, now: Instant) -> Action {
        if !self.shutdown_anim_done && self.shutdown_timer.poll(now) {
            self.shutdown_anim_done = true;
        }
        if self.shutdown_anim_done && busy.is_idle() {
            status.set(StatusFlags::SHUTDOWN, true, now);
            return Action::PowerOff;
        }
        Action::None
    }

    fn enter_running(&mut self, status: &mut SystemStatus, now: Instant) {
        self.phase = Phase::Running;
        self.stop_requested = false;
        status.set(StatusFlags::USER_PROGRAM_RUNNING, true, now);
    }

    fn begin_shutdown(&mut self, status: &mut SystemStatus, now: Instant) {
        self.phase = Phase::Shutdown;
        self.shutdown_anim_done = false;
        self.shutdown_timer.start(now, SHUTDOWN_ANIMATION_MIN_MS);
        status.set(StatusFlags::SHUTDOWN_REQUEST, true, now);
    }

    /// A valid `START_USER_PROGRAM` command arrived over BLE (spec §4.8
    /// "host-event waiter"). Ignored outside [`Phase::Idle`], same as a
    /// center-press.
    pub fn request_start(&mut self, slot: Option<u8>, status: &mut SystemStatus, now: Instant) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        let slot = slot.unwrap_or(self.selected_slot);
        self.selected_slot = slot;
        self.enter_running(status, now);
        true
    }

    /// A `STOP_USER_PROGRAM` command arrived over BLE; delivered to the
    /// running program as the same single stop flag a button-stop sets
    /// (spec §4.8 "running").
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    /// Called by the caller once the running program's entry point returns.
    pub fn finish_running(&mut self, status: &mut SystemStatus, now: Instant) {
        status.set(StatusFlags::USER_PROGRAM_RUNNING, false, now);
        self.stop_requested = false;
        self.phase = Phase::Idle;
        self.idle_since = now;
    }

    pub fn on_ble_connected(&mut self, status: &mut SystemStatus, now: Instant) {
        status.set(StatusFlags::BLE_CONNECTED, true, now);
        self.idle_since = now;
    }

    pub fn on_ble_disconnected(&mut self, status: &mut SystemStatus, now: Instant) {
        status.set(StatusFlags::BLE_CONNECTED, false, now);
    }

    pub fn on_usb_connected(&mut self, status: &mut SystemStatus, now: Instant) {
        status.set(StatusFlags::USB_CONNECTED, true, now);
        self.idle_since = now;
    }

    pub fn on_usb_disconnected(&mut self, status: &mut SystemStatus, now: Instant) {
        status.set(StatusFlags::USB_CONNECTED, false, now);
    }
}
