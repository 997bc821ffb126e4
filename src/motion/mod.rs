//! Motion stack: angle representation (C4 support), trajectory generation
//! (C4), and servo control (C5).

pub mod angle;
pub mod servo;
pub mod trajectory;

pub use angle::Angle;
pub use servo::{ControlSettings, OnCompletion, Servo};
pub use trajectory::{Command, Reference, Trajectory};
