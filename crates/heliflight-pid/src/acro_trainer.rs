// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Acro trainer: caps roll and pitch angle while flying in rate mode.

use log::debug;

use crate::axis::{Axis, XYZ_AXIS_COUNT};
use crate::profile::PidProfile;

/// Gyro rate at which the full lookahead window is used, in deg/s.
pub const ACRO_TRAINER_LOOKAHEAD_RATE_LIMIT: f32 = 500.0;
/// Bound on the correcting setpoint, in deg/s.
pub const ACRO_TRAINER_SETPOINT_LIMIT: f32 = 1000.0;

/// Result of the trainer for one axis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AcroTrainerOutcome {
    pub setpoint: f32,
    /// The trainer took over this tick and the integrator must start over
    pub reset_iterm: bool,
    pub projected_angle: f32,
    /// -1 or 1 while the axis is held at the limit, 0 otherwise
    pub axis_state: i8,
}

/// Keeps roll and pitch inside an angle limit while flying in rate mode.
#[derive(Debug, Clone)]
pub struct AcroTrainer {
    enabled: bool,
    angle_limit: f32,
    lookahead_time: f32,
    gain: f32,
    debug_axis: Axis,
    axis_state: [i8; XYZ_AXIS_COUNT],
}

fn trainer_sign(value: f32) -> i8 {
    if value > 0.0 {
        1
    } else {
        -1
    }
}

impl AcroTrainer {
    pub fn new(profile: &PidProfile) -> Self {
        AcroTrainer {
            enabled: false,
            angle_limit: profile.acro_trainer_angle_limit as f32,
            lookahead_time: profile.acro_trainer_lookahead_ms as f32 / 1000.0,
            gain: profile.acro_trainer_gain as f32 / 10.0,
            debug_axis: profile.acro_trainer_debug_axis,
            axis_state: [0; XYZ_AXIS_COUNT],
        }
    }

    /// Pick up new limits from a profile, keeping the enabled flag.
    pub fn configure(&mut self, profile: &PidProfile) {
        let enabled = self.enabled;
        *self = AcroTrainer::new(profile);
        self.enabled = enabled;
    }

    /// Forget any axis being held at the limit.
    pub fn init(&mut self) {
        self.axis_state = [0; XYZ_AXIS_COUNT];
    }

    /// Turn the trainer on or off. Turning it on starts from a clean state.
    pub fn set_state(&mut self, enabled: bool) {
        if self.enabled != enabled {
            if enabled {
                self.init();
            }
            debug!("Acro trainer {}", if enabled { "enabled" } else { "disabled" });
            self.enabled = enabled;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the trainer acts this tick. There is no hysteresis.
    pub fn is_engaged(&self, rate_mode: bool) -> bool {
        self.enabled && rate_mode
    }

    pub fn debug_axis(&self) -> Axis {
        self.debug_axis
    }

    /// Limit the setpoint of one cyclic axis.
    ///
    /// # Arguments
    ///
    /// * `axis` - Roll or pitch
    /// * `setpoint` - Rate setpoint in deg/s
    /// * `angle` - Trim-adjusted attitude of this axis in degrees
    /// * `gyro_rate` - Measured rate in deg/s
    ///
    /// # Returns
    ///
    /// The limited setpoint and whether the integrator must be cleared
    pub fn apply(&mut self, axis: Axis, setpoint: f32, angle: f32, gyro_rate: f32) -> AcroTrainerOutcome {
        let i = axis.index();
        let setpoint_sign = trainer_sign(setpoint);
        let angle_sign = trainer_sign(angle);
        let mut outcome = AcroTrainerOutcome {
            setpoint,
            ..Default::default()
        };

        // Stick reversed: stop holding
        if self.axis_state[i] != 0 && self.axis_state[i] != setpoint_sign {
            self.axis_state[i] = 0;
        }

        if angle.abs() > self.angle_limit && self.axis_state[i] == 0 && angle_sign == setpoint_sign {
            self.axis_state[i] = angle_sign;
            outcome.reset_iterm = true;
        }

        if self.axis_state[i] != 0 {
            outcome.setpoint = ((self.angle_limit * angle_sign as f32 - angle) * self.gain)
                .clamp(-ACRO_TRAINER_SETPOINT_LIMIT, ACRO_TRAINER_SETPOINT_LIMIT);
        } else {
            // Faster rotation looks further ahead
            let window = (gyro_rate.abs() / ACRO_TRAINER_LOOKAHEAD_RATE_LIMIT).clamp(0.0, 1.0)
                * self.lookahead_time;
            let projected = angle + gyro_rate * window;
            let projected_sign = trainer_sign(projected);
            outcome.projected_angle = projected;

            if projected.abs() > self.angle_limit && projected_sign == setpoint_sign {
                outcome.setpoint = (self.angle_limit * projected_sign as f32 - projected) * self.gain;
                outcome.reset_iterm = true;
            }
        }

        outcome.axis_state = self.axis_state[i];
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trainer() -> AcroTrainer {
        // 20 degree limit, gain 7.5, 50ms lookahead
        let mut trainer = AcroTrainer::new(&PidProfile::default());
        trainer.set_state(true);
        trainer
    }

    #[test]
    fn test_engagement_has_no_hysteresis() {
        let mut trainer = AcroTrainer::new(&PidProfile::default());
        assert!(!trainer.is_engaged(true));
        trainer.set_state(true);
        assert!(trainer.is_engaged(true));
        assert!(!trainer.is_engaged(false));
        trainer.set_state(false);
        assert!(!trainer.is_engaged(true));
    }

    #[test]
    fn test_inside_limit_passes_setpoint() {
        let mut trainer = trainer();
        // 15 degrees at 200 deg/s projects to 19 degrees
        let outcome = trainer.apply(Axis::Roll, 150.0, 15.0, 200.0);
        assert_eq!(outcome.setpoint, 150.0);
        assert!(!outcome.reset_iterm);
        assert!((outcome.projected_angle - 19.0).abs() < 1e-4);
    }

    #[test]
    fn test_projection_past_limit_corrects() {
        let mut trainer = trainer();
        // 15 degrees at 400 deg/s projects to 31 degrees
        let outcome = trainer.apply(Axis::Pitch, 150.0, 15.0, 400.0);
        assert!((outcome.projected_angle - 31.0).abs() < 1e-4);
        assert!((outcome.setpoint + 82.5).abs() < 1e-3);
        assert!(outcome.reset_iterm);
        assert_eq!(outcome.axis_state, 0);
    }

    #[test]
    fn test_over_limit_holds_until_stick_reverses() {
        let mut trainer = trainer();
        let outcome = trainer.apply(Axis::Roll, 100.0, 25.0, 0.0);
        assert_eq!(outcome.axis_state, 1);
        assert!(outcome.reset_iterm);
        assert!((outcome.setpoint + 37.5).abs() < 1e-4);

        // Still pushing: held, no new reset
        let outcome = trainer.apply(Axis::Roll, 100.0, 22.0, -10.0);
        assert_eq!(outcome.axis_state, 1);
        assert!(!outcome.reset_iterm);
        assert!((outcome.setpoint + 15.0).abs() < 1e-4);

        // Stick reversed: released, pilot setpoint back
        let outcome = trainer.apply(Axis::Roll, -100.0, 22.0, -10.0);
        assert_eq!(outcome.axis_state, 0);
        assert_eq!(outcome.setpoint, -100.0);
    }

    #[test]
    fn test_over_limit_away_from_stick_is_not_held() {
        let mut trainer = trainer();
        // Past the limit but the pilot is already rolling back
        let outcome = trainer.apply(Axis::Roll, -100.0, 25.0, -100.0);
        assert_eq!(outcome.axis_state, 0);
        assert_eq!(outcome.setpoint, -100.0);
    }

    #[test]
    fn test_correction_is_bounded() {
        let profile = PidProfile::default().with_acro_trainer(10, 255, 50);
        let mut trainer = AcroTrainer::new(&profile);
        trainer.set_state(true);
        let outcome = trainer.apply(Axis::Roll, 500.0, 170.0, 0.0);
        assert_eq!(outcome.setpoint, -ACRO_TRAINER_SETPOINT_LIMIT);
    }

    #[test]
    fn test_enabling_clears_state() {
        let mut trainer = trainer();
        trainer.apply(Axis::Roll, 100.0, 25.0, 0.0);
        trainer.set_state(false);
        trainer.set_state(true);
        // Inside the limit again with no memory of the hold
        let outcome = trainer.apply(Axis::Roll, 100.0, 5.0, 0.0);
        assert_eq!(outcome.axis_state, 0);
        assert_eq!(outcome.setpoint, 100.0);
    }
}
