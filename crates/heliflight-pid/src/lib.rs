// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-tick PID core for multirotor and helicopter flight controllers.
//!
//! The crate turns a shaped rate setpoint, measured gyro rate and attitude
//! into per-axis P/I/D/F contributions and a clamped sum for the mixer. Around
//! the axis PID it carries iterm relax, absolute control, dynamic D-term
//! filtering, feedforward shaping, angle/horizon leveling, the acro trainer,
//! thrust linearization and the helicopter tail feedforward and rescue logic.
//!
//! ```
//! use heliflight_pid::{PidConfig, PidController, PidProfile, TickInput};
//!
//! let mut controller = PidController::new(PidProfile::default(), PidConfig::default(), 125)
//!     .expect("default profile is valid");
//!
//! let mut input = TickInput::default();
//! input.setpoint = [100.0, 0.0, 0.0];
//! controller.tick(&input);
//!
//! let roll = controller.axis_output(heliflight_pid::Axis::Roll);
//! assert!(roll.sum > 0.0);
//! ```

pub mod acro_trainer;
pub mod axis;
pub mod controller;
pub mod filter;
pub mod heli;
pub mod iterm;
pub mod level;
pub mod profile;
pub mod setpoint;
pub mod thrust;

#[cfg(feature = "debugging")]
mod debug;

pub use axis::{Axis, PidIndex, XYZ_AXIS_COUNT};
pub use controller::{AxisOutput, FlightModes, PidController, SharedPidController, TickInput};
pub use profile::{PidConfig, PidProfile, Pidf, ProfileBank};
pub use thrust::{DefaultThrustLinearization, ThrustLinearization};

#[cfg(feature = "debugging")]
pub use debug::{ControllerDebugger, DebugConfig, DebugFrame, DebugMode};

/// Error type for profile validation and controller configuration.
///
/// The per-tick path never returns errors; these only come from setup calls
/// and from the shared controller.
#[derive(Debug, Clone, PartialEq)]
pub enum PidError {
    /// Invalid parameter value (NaN, infinity, or out of allowed range)
    InvalidParameter(&'static str),
    /// Profile slot index outside the bank
    ProfileIndexOutOfRange { index: usize, count: usize },
    /// Profile name longer than `MAX_PROFILE_NAME_LENGTH`
    ProfileNameTooLong(usize),
    /// Mutex was poisoned, indicating a panic in another thread
    MutexPoisoned,
}

impl std::fmt::Display for PidError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            PidError::InvalidParameter(param) => write!(f, "Invalid parameter: {}", param),
            PidError::ProfileIndexOutOfRange { index, count } => write!(
                f,
                "Profile index {} out of range (bank holds {} profiles)",
                index, count
            ),
            PidError::ProfileNameTooLong(len) => write!(
                f,
                "Profile name is {} characters, at most {} allowed",
                len,
                profile::MAX_PROFILE_NAME_LENGTH
            ),
            PidError::MutexPoisoned => write!(f, "Mutex was poisoned"),
        }
    }
}

impl std::error::Error for PidError {}
