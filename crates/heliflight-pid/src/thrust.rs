// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Thrust linearization.
//!
//! The controller is generic over [`ThrustLinearization`], so a build without
//! the `thrust-linearization` feature composes the pass-through
//! implementation instead of branching at every call site.

use crate::profile::PidProfile;

/// Compensation for the non-linear thrust response of a propulsion unit.
pub trait ThrustLinearization {
    /// Build the compensation from the `thrust_linearization` strength of a profile.
    fn from_profile(profile: &PidProfile) -> Self
    where
        Self: Sized;

    /// Map a requested motor value to the linearized command.
    fn apply(&self, motor_output: f32) -> f32;

    /// Map a throttle value back through the thrust curve for use by
    /// calculations that expect linear thrust.
    fn compensate(&self, throttle: f32) -> f32;
}

/// Identity in both directions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PassThroughThrust;

impl ThrustLinearization for PassThroughThrust {
    fn from_profile(_profile: &PidProfile) -> Self {
        PassThroughThrust
    }

    fn apply(&self, motor_output: f32) -> f32 {
        motor_output
    }

    fn compensate(&self, throttle: f32) -> f32 {
        throttle
    }
}

/// Quadratic thrust curve `thrust = a*t^2 + (1 - a)*t`, with `a` the
/// linearization strength in `[0, 1]`.
#[cfg(feature = "thrust-linearization")]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrustCurve {
    strength: f32,
    reciprocal: f32,
    b: f32,
}

#[cfg(feature = "thrust-linearization")]
impl ThrustCurve {
    pub fn new(percent: u8) -> Self {
        let strength = (percent as f32 / 100.0).min(1.0);
        if strength <= 0.0 {
            return ThrustCurve {
                strength: 0.0,
                reciprocal: 0.0,
                b: 0.0,
            };
        }
        ThrustCurve {
            strength,
            reciprocal: 1.0 / strength,
            b: (1.0 - strength) / (2.0 * strength),
        }
    }

    pub fn strength(&self) -> f32 {
        self.strength
    }
}

#[cfg(feature = "thrust-linearization")]
impl ThrustLinearization for ThrustCurve {
    fn from_profile(profile: &PidProfile) -> Self {
        ThrustCurve::new(profile.thrust_linearization)
    }

    fn apply(&self, motor_output: f32) -> f32 {
        if self.strength > 0.0 && motor_output > 0.0 {
            (motor_output * self.reciprocal + self.b * self.b).sqrt() - self.b
        } else {
            motor_output
        }
    }

    fn compensate(&self, throttle: f32) -> f32 {
        if self.strength > 0.0 {
            throttle * (throttle * self.strength + 1.0 - self.strength)
        } else {
            throttle
        }
    }
}

/// Linearization composed by [`crate::PidController::new`].
#[cfg(feature = "thrust-linearization")]
pub type DefaultThrustLinearization = ThrustCurve;

/// Linearization composed by [`crate::PidController::new`].
#[cfg(not(feature = "thrust-linearization"))]
pub type DefaultThrustLinearization = PassThroughThrust;
