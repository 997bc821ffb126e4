//! System status flag word (spec §3 "System status") with per-flag
//! last-changed timestamps for debouncing, grounded in the upstream
//! `pbsys_status` struct (`status.c`): a flags word plus a `changed_time`
//! array, updated through a single setter that also re-emits a status event.

use bitflags::bitflags;

use crate::hal::Instant;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StatusFlags: u32 {
        const BATTERY_LOW          = 1 << 0;
        const BATTERY_CRITICAL     = 1 << 1;
        const POWER_BUTTON_PRESSED = 1 << 2;
        const BLE_ADVERTISING      = 1 << 3;
        const USER_PROGRAM_RUNNING = 1 << 4;
        const BLE_CONNECTED        = 1 << 5;
        const USB_CONNECTED        = 1 << 6;
        const FILE_IO              = 1 << 7;
        const SHUTDOWN_REQUEST     = 1 << 8;
        const SHUTDOWN             = 1 << 9;
    }
}

/// Number of distinct flag bits tracked, used to size the `changed_time` table.
const NUM_FLAGS: usize = 10;

fn flag_index(flag: StatusFlags) -> usize {
    flag.bits().trailing_zeros() as usize
}

/// Owns the status flag word and per-flag timestamps, and hands out change
/// notifications so subscribers (status light, BLE status reporter) can
/// react without polling the whole word every tick.
pub struct SystemStatus {
    flags: StatusFlags,
    changed_time: [Instant; NUM_FLAGS],
    dirty: bool,
}

impl SystemStatus {
    pub const fn new() -> Self {
        Self {
            flags: StatusFlags::empty(),
            changed_time: [Instant::ZERO; NUM_FLAGS],
            dirty: false,
        }
    }

    pub fn flags(&self) -> StatusFlags {
        self.flags
    }

    pub fn test(&self, flag: StatusFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Sets or clears a single flag. Returns `true` if the word actually
    /// changed, so callers (the status light, the BLE status reporter) know
    /// whether to act.
    pub fn set(&mut self, flag: StatusFlags, value: bool, now: Instant) -> bool {
        let new_flags = if value {
            self.flags | flag
        } else {
            self.flags & !flag
        };
        if new_flags == self.flags {
            return false;
        }
        self.flags = new_flags;
        self.changed_time[flag_index(flag)] = now;
        self.dirty = true;
        true
    }

    pub fn changed_at(&self, flag: StatusFlags) -> Instant {
        self.changed_time[flag_index(flag)]
    }

    /// Debounce helper: has `flag` held its current value for at least
    /// `min_duration_ms` as of `now`?
    pub fn stable_for(&self, flag: StatusFlags, min_duration_ms: u32, now: Instant) -> bool {
        now.saturating_since(self.changed_time[flag_index(flag)]) >= min_duration_ms
    }

    /// Drains the "something changed since last poll" flag used by the
    /// status reporter protothread (spec §4.6).
    pub fn take_dirty(&mut self) -> bool {
        core::mem::replace(&mut self.dirty, false)
    }
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_change_once() {
        let mut s = SystemStatus::new();
        assert!(s.set(StatusFlags::BLE_CONNECTED, true, Instant::from_millis(10)));
        assert!(!s.set(StatusFlags::BLE_CONNECTED, true, Instant::from_millis(20)));
        assert!(s.test(StatusFlags::BLE_CONNECTED));
        assert_eq!(s.changed_at(StatusFlags::BLE_CONNECTED), Instant::from_millis(10));
    }

    #[test]
    fn dirty_flag_drains_once() {
        let mut s = SystemStatus::new();
        s.set(StatusFlags::USER_PROGRAM_RUNNING, true, Instant::ZERO);
        assert!(s.take_dirty());
        assert!(!s.take_dirty());
    }

    #[test]
    fn stable_for_debounces() {
        let mut s = SystemStatus::new();
        s.set(StatusFlags::BATTERY_LOW, true, Instant::from_millis(100));
        assert!(!s.stable_for(StatusFlags::BATTERY_LOW, 50, Instant::from_millis(120)));
        assert!(s.stable_for(StatusFlags::BATTERY_LOW, 50, Instant::from_millis(160)));
    }
}
