//! Status light subscriber (spec §4.8 "Status light"): maps the system
//! status word and the currently selected slot onto a single light frame.
//! Conditions are not mutually exclusive (e.g. running while advertising),
//! so frames are picked by priority rather than independently.

use crate::status::{StatusFlags, SystemStatus};

/// Priority, highest first: shutdown, battery, running, connected,
/// advertising, then the idle slot indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Light {
    Off,
    RedPulsing,
    GreenBreathing,
    BlueSolid,
    YellowBreathing,
    SlotIndicator(u8),
}

pub fn frame_for(status: &SystemStatus, selected_slot: u8) -> Light {
    if status.test(StatusFlags::SHUTDOWN) || status.test(StatusFlags::SHUTDOWN_REQUEST) {
        Light::Off
    } else if status.test(StatusFlags::BATTERY_CRITICAL) || status.test(StatusFlags::BATTERY_LOW) {
        Light::RedPulsing
    } else if status.test(StatusFlags::USER_PROGRAM_RUNNING) {
        Light::GreenBreathing
    } else if status.test(StatusFlags::BLE_CONNECTED) {
        Light::BlueSolid
    } else if status.test(StatusFlags::BLE_ADVERTISING) {
        Light::YellowBreathing
    } else {
        Light::SlotIndicator(selected_slot)
    }
}

/// Only reports a frame when it differs from the last one returned, so a
/// caller driving an LED/animation peripheral doesn't reissue the same
/// command every tick.
#[derive(Default)]
pub struct StatusLight {
    last: Option<Light>,
}

impl StatusLight {
    pub const fn new() -> Self {
        Self { last: None }
    }

    pub fn poll(&mut self, status: &SystemStatus, selected_slot: u8) -> Option<Light> {
        let frame = frame_for(status, selected_slot);
        if self.last == Some(frame) {
            return None;
        }
        self.last = Some(frame);
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::Instant;

    #[test]
    fn shutdown_outranks_everything_else() {
        let mut status = SystemStatus::new();
        status.set(StatusFlags::USER_PROGRAM_RUNNING, true, Instant::ZERO);
        status.set(StatusFlags::BLE_CONNECTED, true, Instant::ZERO);
        status.set(StatusFlags::SHUTDOWN_REQUEST, true, Instant::ZERO);
        assert_eq!(frame_for(&status, 2), Light::Off);
    }

    #[test]
    fn running_outranks_connected_and_advertising() {
        let mut status = SystemStatus::new();
        status.set(StatusFlags::BLE_ADVERTISING, true, Instant::ZERO);
        status.set(StatusFlags::BLE_CONNECTED, true, Instant::ZERO);
        status.set(StatusFlags::USER_PROGRAM_RUNNING, true, Instant::ZERO);
        assert_eq!(frame_for(&status, 0), Light::GreenBreathing);
    }

    #[test]
    fn idle_with_no_flags_shows_slot_indicator() {
        let status = SystemStatus::new();
        assert_eq!(frame_for(&status, 3), Light::SlotIndicator(3));
    }

    #[test]
    fn poll_only_reports_changes() {
        let mut status = SystemStatus::new();
        let mut light = StatusLight::new();
        assert_eq!(light.poll(&status, 0), Some(Light::SlotIndicator(0)));
        assert_eq!(light.poll(&status, 0), None);
        status.set(StatusFlags::BLE_ADVERTISING, true, Instant::ZERO);
        assert_eq!(light.poll(&status, 0), Some(Light::YellowBreathing));
    }
}
