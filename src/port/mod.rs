//! C2: port detection manager (spec §4.2). Polled every
//! [`crate::config::PORT_POLL_PERIOD_MS`] from C1; classifies the device
//! attached to a port by probing ID1/ID2 pin resistance before handing a
//! UART candidate off to C3.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// What's attached to a port, as last classified by a completed probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(not(test), derive(defmt::Format))]
pub enum DeviceKind {
    None = 0,
    Power,
    TurnDir,
    Light2,
    TrainMotor,
    LargeMotor,
    Light1,
    MediumMotor,
    XMotor,
    Light,
    /// Open ID1 under any ID2 state: a LUMP device is expected. C2 hands
    /// the port to C3 and does not classify it further itself.
    UartCandidate,
    TouchSensor,
    TrainPointSensor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(test), derive(defmt::Format))]
pub enum PowerRequirement {
    None,
    Pin1High,
    Pin2High,
}

/// Sampled logic level of a probe pin, bucketed into the three ranges the
/// lookup table switches on (spec §4.2 step 5: GND / pull-up-or-down / VCC).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinGroup {
    Gnd,
    PullDown,
    Vcc,
}

/// Raw pin reads the board support crate supplies each 2 ms tick. `id2_edge`
/// captures the touch/train-point fast path (steps 1-4), which never needs
/// the four-way probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinSample {
    pub id2_high_to_low: bool,
    pub id2_low_to_high: bool,
    pub id1_group: PinGroup,
    pub id2_group: PinGroup,
}

fn classify_groups(id1: PinGroup, id2: PinGroup) -> DeviceKind {
    use DeviceKind::*;
    use PinGroup::*;
    match (id1, id2) {
        (Gnd, Gnd) => Power,
        (Gnd, Vcc) => TurnDir,
        (Gnd, PullDown) => Light2,
        (Vcc, Gnd) => TrainMotor,
        (Vcc, Vcc) => LargeMotor,
        (Vcc, PullDown) => Light1,
        (PullDown, Gnd) => MediumMotor,
        (PullDown, Vcc) => XMotor,
        (PullDown, PullDown) => Light,
    }
}

/// Debounced classification state machine for one port (spec §4.2).
/// Accepts a classification only after
/// [`crate::config::PORT_DEBOUNCE_SAMPLES`] consecutive identical samples;
/// any deviation resets the counter, which is what makes a mid-detection
/// disconnect self-correcting rather than a special case.
pub struct PortDetector {
    candidate: Option<DeviceKind>,
    run_length: u32,
    pub kind: DeviceKind,
    pub power: PowerRequirement,
}

impl PortDetector {
    pub const fn new() -> Self {
        Self {
            candidate: None,
            run_length: 0,
            kind: DeviceKind::None,
            power: PowerRequirement::None,
        }
    }

    /// Feed one 2 ms sample. Returns `Some(kind)` the tick a new
    /// classification is accepted (i.e. becomes `self.kind`), so the caller
    /// knows to act (hand a UART candidate to C3, or just publish the
    /// classification otherwise).
    pub fn sample(&mut self, s: PinSample) -> Option<DeviceKind> {
        let observed = if s.id2_high_to_low {
            DeviceKind::TouchSensor
        } else if s.id2_low_to_high {
            DeviceKind::TrainPointSensor
        } else {
            classify_groups(s.id1_group, s.id2_group)
        };
        self.advance(observed)
    }

    /// Entry point for the open-ID1 case, kept distinct from [`Self::sample`]
    /// since "open" isn't a [`PinGroup`] bucket (it's the absence of a
    /// resistor pulling ID1 to any of the three rails).
    pub fn sample_open_id1(&mut self) -> Option<DeviceKind> {
        self.advance(DeviceKind::UartCandidate)
    }

    fn advance(&mut self, observed: DeviceKind) -> Option<DeviceKind> {
        if self.candidate == Some(observed) {
            self.run_length += 1;
        } else {
            self.candidate = Some(observed);
            self.run_length = 1;
        }
        if self.run_length >= crate::config::PORT_DEBOUNCE_SAMPLES && self.kind != observed {
            self.kind = observed;
            self.power = power_requirement_for(observed);
            Some(observed)
        } else {
            None
        }
    }
}

impl Default for PortDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn power_requirement_for(kind: DeviceKind) -> PowerRequirement {
    use DeviceKind::*;
    match kind {
        TrainMotor | LargeMotor | MediumMotor | XMotor => PowerRequirement::Pin1High,
        Light | Light1 | Light2 => PowerRequirement::Pin2High,
        _ => PowerRequirement::None,
    }
}

/// One port's detection + (once classified `UartCandidate`) handoff state.
/// `port::mod` only owns the classification half; the UART mux/bus-buffer
/// switch and the call into C3 are driven by the firmware binary's wiring
/// code, since that's board-specific (spec §1 Non-goals: pin maps are
/// external).
pub struct Port {
    pub detector: PortDetector,
    pub id: u8,
}

impl Port {
    pub const fn new(id: u8) -> Self {
        Self {
            detector: PortDetector::new(),
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gnd_gnd() -> PinSample {
        PinSample {
            id2_high_to_low: false,
            id2_low_to_high: false,
            id1_group: PinGroup::Gnd,
            id2_group: PinGroup::Gnd,
        }
    }

    #[test]
    fn requires_debounce_before_accepting() {
        let mut d = PortDetector::new();
        for _ in 0..crate::config::PORT_DEBOUNCE_SAMPLES - 1 {
            assert_eq!(d.sample(gnd_gnd()), None);
        }
        assert_eq!(d.sample(gnd_gnd()), Some(DeviceKind::Power));
        assert_eq!(d.kind, DeviceKind::Power);
    }

    #[test]
    fn noise_resets_run_length() {
        let mut d = PortDetector::new();
        for _ in 0..crate::config::PORT_DEBOUNCE_SAMPLES - 1 {
            d.sample(gnd_gnd());
        }
        // One deviating sample resets the count; classification never fires
        // this round even though we're right at the threshold.
        let noisy = PinSample {
            id1_group: PinGroup::Vcc,
            ..gnd_gnd()
        };
        assert_eq!(d.sample(noisy), None);
        for _ in 0..crate::config::PORT_DEBOUNCE_SAMPLES - 1 {
            assert_eq!(d.sample(gnd_gnd()), None);
        }
        assert_eq!(d.sample(gnd_gnd()), Some(DeviceKind::Power));
    }

    #[test]
    fn touch_sensor_edge_is_immediate_classification_candidate() {
        let mut d = PortDetector::new();
        let s = PinSample {
            id2_high_to_low: true,
            id2_low_to_high: false,
            id1_group: PinGroup::Gnd,
            id2_group: PinGroup::Gnd,
        };
        for _ in 0..crate::config::PORT_DEBOUNCE_SAMPLES - 1 {
            d.sample(s);
        }
        assert_eq!(d.sample(s), Some(DeviceKind::TouchSensor));
    }

    #[test]
    fn large_motor_requires_pin1_power() {
        let mut d = PortDetector::new();
        let s = PinSample {
            id2_high_to_low: false,
            id2_low_to_high: false,
            id1_group: PinGroup::Vcc,
            id2_group: PinGroup::Vcc,
        };
        for _ in 0..crate::config::PORT_DEBOUNCE_SAMPLES {
            d.sample(s);
        }
        assert_eq!(d.kind, DeviceKind::LargeMotor);
        assert_eq!(d.power, PowerRequirement::Pin1High);
    }

    #[test]
    fn uart_candidate_via_open_id1() {
        let mut d = PortDetector::new();
        for _ in 0..crate::config::PORT_DEBOUNCE_SAMPLES - 1 {
            assert_eq!(d.sample_open_id1(), None);
        }
        assert_eq!(d.sample_open_id1(), Some(DeviceKind::UartCandidate));
    }
}
