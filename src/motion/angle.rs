//! Angle type (spec §3 "Angle"): a wrap-free `(rotations, millidegrees)`
//! pair. Kept as its own small module since both C4 and C5 need it and
//! neither owns it conceptually.

pub const MDEG_PER_ROTATION: i32 = 360_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(not(test), derive(defmt::Format))]
pub struct Angle {
    pub rotations: i32,
    pub millidegrees: i32,
}

impl Angle {
    pub const ZERO: Angle = Angle {
        rotations: 0,
        millidegrees: 0,
    };

    /// Constructs from an unbounded millidegree value by normalizing into
    /// `|millidegrees| < 360_000`, carrying the remainder into `rotations`.
    pub fn from_mdeg(total_mdeg: i64) -> Self {
        let rotations = (total_mdeg.div_euclid(MDEG_PER_ROTATION as i64)) as i32;
        let millidegrees = (total_mdeg.rem_euclid(MDEG_PER_ROTATION as i64)) as i32;
        Angle {
            rotations,
            millidegrees,
        }
    }

    pub fn as_mdeg(self) -> i64 {
        self.rotations as i64 * MDEG_PER_ROTATION as i64 + self.millidegrees as i64
    }

    /// Re-expresses the same absolute angle with `millidegrees` advanced by
    /// one full rotation, per testable property #2 (spec §8):
    /// `normalize(r, m+360000) == (r+1, m)`.
    pub fn normalize(self) -> Self {
        Self::from_mdeg(self.as_mdeg())
    }
}

impl core::ops::Add for Angle {
    type Output = Angle;
    fn add(self, rhs: Angle) -> Angle {
        Angle::from_mdeg(self.as_mdeg() + rhs.as_mdeg())
    }
}

impl core::ops::Sub for Angle {
    type Output = Angle;
    fn sub(self, rhs: Angle) -> Angle {
        Angle::from_mdeg(self.as_mdeg() - rhs.as_mdeg())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_carries_full_rotation() {
        // Testable property #2: normalize(r, m+360000) = (r+1, m).
        let a = Angle::from_mdeg(1 * MDEG_PER_ROTATION as i64 + 45_000);
        assert_eq!(a, Angle { rotations: 1, millidegrees: 45_000 });
        let b = Angle::from_mdeg(a.as_mdeg() + MDEG_PER_ROTATION as i64);
        assert_eq!(b, Angle { rotations: 2, millidegrees: 45_000 });
    }

    #[test]
    fn negative_millidegrees_normalize_into_prior_rotation() {
        let a = Angle::from_mdeg(-45_000);
        assert_eq!(a, Angle { rotations: -1, millidegrees: 315_000 });
    }

    #[test]
    fn add_and_sub_round_trip() {
        let a = Angle::from_mdeg(500_000);
        let b = Angle::from_mdeg(200_000);
        assert_eq!((a + b) - b, a);
    }
}
