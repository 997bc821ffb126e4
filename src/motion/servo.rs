//! C5: servo controller (spec §4.5). Drives one motor to follow a
//! [`Trajectory`] with PID + observer feedback at a fixed control rate.
//! Structured the way the teacher's PID loop is structured (a settings
//! struct, a per-tick `control` step producing a clamped duty value), but
//! over the fixed-point units this firmware uses throughout, not floats.

use crate::hal::{Instant, MotorDriver, TachoSource};

use super::angle::MDEG_PER_ROTATION;
use super::trajectory::{Reference, Trajectory};

/// What happens once the trajectory's endpoint time has passed (spec §4.5
/// "Completion").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(not(test), derive(defmt::Format))]
pub enum OnCompletion {
    Hold,
    Coast,
    Brake,
    /// Continue at the trajectory's endpoint speed rather than stopping.
    ContinueAtSpeed,
}

/// Tunable gains and thresholds (spec §4.5 "Servo... Holds control
/// settings"). Scaled so `kp * e_pos` (mdeg error) lands in duty units
/// directly; a real board-support crate would derive these per motor type.
#[derive(Clone, Copy, Debug)]
pub struct ControlSettings {
    pub kp: i32,
    pub ki: i32,
    pub kd: i32,
    /// Below this `|ref_speed|` (ddeg/s), use `kp_low` instead of `kp` to
    /// reduce chatter at hold.
    pub kp_low_threshold: i32,
    pub kp_low: i32,
    pub stall_duty_threshold: i16,
    pub stall_speed_threshold: i32,
    pub stall_window_ms: u32,
    pub integrator_clamp: i32,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            kp: 11,
            ki: 60,
            kd: 1,
            kp_low_threshold: 500,
            kp_low: 4,
            stall_duty_threshold: 7_500,
            stall_speed_threshold: 200,
            stall_window_ms: 300,
            integrator_clamp: 5_000,
        }
    }
}

/// Rolling window that tracks whether `|u|` has stayed above the stall-duty
/// threshold while `|speed|` stayed below the stall-speed threshold for at
/// least `stall_window_ms` (spec §4.5 "Stall detection").
#[derive(Clone, Copy, Debug, Default)]
struct StallWindow {
    since: Option<Instant>,
}

impl StallWindow {
    fn update(&mut self, stalling_now: bool, now: Instant, window_ms: u32) -> bool {
        if !stalling_now {
            self.since = None;
            return false;
        }
        let since = *self.since.get_or_insert(now);
        now.saturating_since(since) >= window_ms
    }
}

pub struct Servo<M: MotorDriver, T: TachoSource> {
    motor: M::Handle,
    tacho: T::Handle,
    trajectory: Trajectory,
    start_time: Instant,
    settings: ControlSettings,
    integrator: i32,
    stall: StallWindow,
    stalled: bool,
    on_completion: OnCompletion,
    completed: bool,
}

impl<M: MotorDriver, T: TachoSource> Servo<M, T> {
    pub fn new(motor: M::Handle, tacho: T::Handle, settings: ControlSettings) -> Self {
        Self {
            motor,
            tacho,
            trajectory: Trajectory::default(),
            start_time: Instant::ZERO,
            settings,
            integrator: 0,
            stall: StallWindow::default(),
            stalled: false,
            on_completion: OnCompletion::Hold,
            completed: false,
        }
    }

    pub fn run_trajectory(&mut self, trajectory: Trajectory, now: Instant, on_completion: OnCompletion) {
        self.trajectory = trajectory;
        self.start_time = now;
        self.integrator = 0;
        self.completed = false;
        self.on_completion = on_completion;
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn elapsed_ticks(&self, now: Instant) -> i32 {
        // 1e-4 s ticks; millisecond resolution input is scaled by 10.
        (now.saturating_since(self.start_time) as i32).saturating_mul(10)
    }

    /// One 1 kHz control tick (spec §4.5 "Loop per tick"). Returns the
    /// reference point used, for callers (e.g. tests) that want to check
    /// tracking error directly.
    pub fn tick(&mut self, motor: &mut M, tacho: &mut T, now: Instant, dt_ms: u32) -> Reference {
        let (rotations, millidegrees) = tacho.get_angle(self.tacho);
        let measured_pos = rotations * MDEG_PER_ROTATION + millidegrees;
        let measured_speed = tacho.get_speed(self.tacho);

        let t = self.elapsed_ticks(now);
        let reference = self.trajectory.evaluate(t);

        let e_pos = reference.position - measured_pos;
        let e_speed = reference.speed - measured_speed;

        self.integrator = (self.integrator + e_pos * dt_ms as i32)
            .max(-self.settings.integrator_clamp)
            .min(self.settings.integrator_clamp);

        let kp = if reference.speed.abs() < self.settings.kp_low_threshold {
            self.settings.kp_low
        } else {
            self.settings.kp
        };

        let feedforward = reference.acceleration / 100 + reference.speed / 50;
        let u = kp * e_pos / 1000
            + self.settings.kd * e_speed / 10
            + self.settings.ki * self.integrator / 100_000
            + feedforward;
        let u = u.max(-(M::MAX_DUTY as i32)).min(M::MAX_DUTY as i32) as i16;

        let stalling_now = u.unsigned_abs() as i32 >= self.settings.stall_duty_threshold as i32
            && measured_speed.abs() < self.settings.stall_speed_threshold;
        self.stalled = self.stall.update(stalling_now, now, self.settings.stall_window_ms);

        if t >= self.trajectory.t3 {
            self.completed = true;
            match self.on_completion {
                OnCompletion::Hold => motor.set_duty_cycle(self.motor, u),
                OnCompletion::Coast => motor.coast(self.motor),
                OnCompletion::Brake => motor.set_duty_cycle(self.motor, 0),
                OnCompletion::ContinueAtSpeed => motor.set_duty_cycle(self.motor, u),
            }
        } else {
            motor.set_duty_cycle(self.motor, u);
        }

        reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::fakes::FakeMotorDriver;
    use crate::motion::trajectory::Command;

    struct FakeTacho {
        position: i32,
    }
    impl TachoSource for FakeTacho {
        type Handle = u8;
        fn get_dev(&mut self, id: u8) -> u8 {
            id
        }
        fn get_angle(&mut self, _h: u8) -> (i32, i32) {
            (0, self.position)
        }
        fn get_speed(&mut self, _h: u8) -> i32 {
            0
        }
    }

    #[test]
    fn stall_window_requires_sustained_condition() {
        let mut w = StallWindow::default();
        assert!(!w.update(true, Instant::from_millis(0), 300));
        assert!(!w.update(true, Instant::from_millis(200), 300));
        assert!(w.update(true, Instant::from_millis(310), 300));
    }

    #[test]
    fn stall_window_resets_when_condition_clears() {
        let mut w = StallWindow::default();
        w.update(true, Instant::from_millis(0), 300);
        assert!(!w.update(false, Instant::from_millis(100), 300));
        assert!(!w.update(true, Instant::from_millis(150), 300));
    }

    #[test]
    fn servo_drives_toward_trajectory_endpoint() {
        let mut motor = FakeMotorDriver::default();
        let mut tacho = FakeTacho { position: 0 };
        let mut servo: Servo<FakeMotorDriver, FakeTacho> =
            Servo::new(0, 0, ControlSettings::default());
        let trj = Trajectory::new(Command {
            position_start: 0,
            speed_start: 0,
            position_end: 90_000,
            duration: 0,
            speed_target: 3000,
            speed_max: super::super::trajectory::SPEED_MAX,
            acceleration: 1500,
            deceleration: 1500,
            continue_running: false,
            timed: false,
        });
        servo.run_trajectory(trj, Instant::ZERO, OnCompletion::Hold);
        let r = servo.tick(&mut motor, &mut tacho, Instant::from_millis(10), 10);
        assert!(r.position > 0);
        assert!(motor.duty[0] != 0 || r.position == 0);
    }
}
