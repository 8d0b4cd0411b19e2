// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Iterm governor: how much error reaches the integrator each tick.
//!
//! Iterm relax scales the admitted error down while the pilot is moving the
//! sticks. Absolute control keeps a separate slow error integral and feeds
//! it back through the setpoint. Both vectors are rotated with the airframe
//! so accumulated error stays in the body frame.

use nalgebra::{Rotation3, Vector3};

use crate::axis::{Axis, XYZ_AXIS_COUNT};
use crate::filter::Pt1Filter;
use crate::profile::{ItermRelax, ItermRelaxType, PidProfile, ITERM_RELAX_SETPOINT_THRESHOLD};

/// Fraction of error admitted for a high-passed setpoint rate in deg/s.
///
/// 1.0 at zero, falling linearly to 0.0 at [`ITERM_RELAX_SETPOINT_THRESHOLD`].
pub fn relax_factor(setpoint_hpf: f32) -> f32 {
    (1.0 - setpoint_hpf / ITERM_RELAX_SETPOINT_THRESHOLD).max(0.0)
}

/// Zero inside `±deadband`, shifted toward zero by `deadband` outside.
pub fn apply_deadband(value: f32, deadband: f32) -> f32 {
    if value.abs() < deadband {
        0.0
    } else if value > 0.0 {
        value - deadband
    } else {
        value + deadband
    }
}

/// Move `value` toward zero by `step` without crossing it.
pub fn decay_toward_zero(value: f32, step: f32) -> f32 {
    if value > step {
        value - step
    } else if value < -step {
        value + step
    } else {
        0.0
    }
}

/// Rotate `v` into a body frame that turned by `rotation` (axis-angle, radians).
pub fn rotate_vector(v: &Vector3<f32>, rotation: &Vector3<f32>) -> Vector3<f32> {
    if *rotation == Vector3::zeros() {
        return *v;
    }
    Rotation3::from_scaled_axis(-*rotation) * *v
}

/// Result of iterm relax for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaxOutcome {
    pub iterm_error_rate: f32,
    pub setpoint_lpf: f32,
    pub setpoint_hpf: f32,
    pub relax_factor: f32,
}

/// Result of absolute control for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsoluteControlOutcome {
    pub setpoint: f32,
    pub iterm_error_rate: f32,
    pub correction: f32,
}

/// Adjusted setpoint and integrator input after both corrections.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GovernorOutcome {
    pub setpoint: f32,
    pub iterm_error_rate: f32,
    pub relax_factor: f32,
    pub setpoint_hpf: f32,
    pub ac_correction: f32,
}

#[derive(Debug, Clone)]
pub struct ItermGovernor {
    dt: f32,
    relax: ItermRelax,
    relax_type: ItermRelaxType,
    windup_lpf: [Pt1Filter; XYZ_AXIS_COUNT],

    ac_gain: f32,
    ac_limit: f32,
    ac_error_limit: f32,
    ac_lpf: [Pt1Filter; XYZ_AXIS_COUNT],
    axis_error: Vector3<f32>,

    error_decay_always: bool,
    error_decay_rate: f32,
}

impl ItermGovernor {
    pub fn new(profile: &PidProfile, dt: f32) -> Self {
        ItermGovernor {
            dt,
            relax: profile.iterm_relax,
            relax_type: profile.iterm_relax_type,
            windup_lpf: std::array::from_fn(|_| Pt1Filter::new(profile.iterm_relax_cutoff as f32, dt)),
            ac_gain: profile.abs_control_gain as f32,
            ac_limit: profile.abs_control_limit as f32,
            ac_error_limit: profile.abs_control_error_limit as f32,
            ac_lpf: std::array::from_fn(|_| Pt1Filter::new(profile.abs_control_cutoff as f32, dt)),
            axis_error: Vector3::zeros(),
            error_decay_always: profile.error_decay_always,
            error_decay_rate: profile.error_decay_rate as f32,
        }
    }

    pub fn abs_control_enabled(&self) -> bool {
        self.ac_gain > 0.0
    }

    /// Scale the error fed to the integrator while the setpoint is moving.
    ///
    /// # Arguments
    ///
    /// * `axis` - Axis being governed
    /// * `iterm` - Current integrator value
    /// * `gyro_rate` - Measured rate in deg/s
    /// * `iterm_error_rate` - Error the integrator would otherwise take
    /// * `setpoint` - Current setpoint in deg/s
    ///
    /// # Returns
    ///
    /// The admitted error and the relax signals
    ///
    /// # Notes
    ///
    /// The setpoint lowpass runs every tick, even for axes the mode leaves
    /// alone, so switching modes does not start from a stale filter.
    pub fn apply_iterm_relax(
        &mut self,
        axis: Axis,
        iterm: f32,
        gyro_rate: f32,
        iterm_error_rate: f32,
        setpoint: f32,
    ) -> RelaxOutcome {
        let setpoint_lpf = self.windup_lpf[axis.index()].apply(setpoint);
        let setpoint_hpf = (setpoint - setpoint_lpf).abs();
        let factor = relax_factor(setpoint_hpf);

        let mut admitted = iterm_error_rate;
        if self.relax.applies_to(axis) {
            let is_decreasing_i =
                (iterm > 0.0 && iterm_error_rate < 0.0) || (iterm < 0.0 && iterm_error_rate > 0.0);
            if self.relax.is_incremental() && is_decreasing_i {
                // Unwinding is never held back
            } else {
                admitted = match self.relax_type {
                    ItermRelaxType::Setpoint => iterm_error_rate * factor,
                    ItermRelaxType::Gyro => apply_deadband(setpoint_lpf - gyro_rate, setpoint_hpf),
                };
            }
        }

        RelaxOutcome {
            iterm_error_rate: admitted,
            setpoint_lpf,
            setpoint_hpf,
            relax_factor: if self.relax.applies_to(axis) { factor } else { 1.0 },
        }
    }

    /// Accumulate the absolute error and correct setpoint and integrator input.
    ///
    /// # Arguments
    ///
    /// * `axis` - Axis being governed
    /// * `gyro_rate` - Measured rate in deg/s
    /// * `setpoint` - Setpoint after leveling and relax
    /// * `iterm_error_rate` - Error admitted by relax
    /// * `accumulate` - Whether the craft is flying and error may build up
    /// * `decay` - Whether the accumulated error decays this tick
    ///
    /// # Returns
    ///
    /// Corrected setpoint and integrator input
    pub fn apply_absolute_control(
        &mut self,
        axis: Axis,
        gyro_rate: f32,
        setpoint: f32,
        iterm_error_rate: f32,
        accumulate: bool,
        decay: bool,
    ) -> AbsoluteControlOutcome {
        let unchanged = AbsoluteControlOutcome {
            setpoint,
            iterm_error_rate,
            correction: 0.0,
        };
        if self.ac_gain <= 0.0 {
            return unchanged;
        }

        let i = axis.index();
        let setpoint_lpf = self.ac_lpf[i].apply(setpoint);
        let setpoint_hpf = (setpoint - setpoint_lpf).abs();

        if decay {
            self.axis_error[i] = decay_toward_zero(self.axis_error[i], self.error_decay_rate * self.dt);
        }

        let gmax = setpoint_lpf + 2.0 * setpoint_hpf;
        let gmin = setpoint_lpf - 2.0 * setpoint_hpf;
        let axis_error = self.axis_error[i];

        let ac_error_rate = if gyro_rate >= gmin && gyro_rate <= gmax {
            let to_max = gmax - gyro_rate;
            let to_min = gmin - gyro_rate;
            let rate = if to_max * axis_error < 0.0 { to_max } else { to_min };
            // Never step past zero error in one tick
            if (rate * self.dt).abs() > axis_error.abs() && self.dt > 0.0 {
                -axis_error / self.dt
            } else {
                rate
            }
        } else if gyro_rate > gmax {
            gmax - gyro_rate
        } else {
            gmin - gyro_rate
        };

        if !accumulate {
            return unchanged;
        }

        let limit = self.ac_error_limit;
        self.axis_error[i] = (axis_error + ac_error_rate * self.dt).max(-limit).min(limit);
        let correction = (self.axis_error[i] * self.ac_gain)
            .max(-self.ac_limit)
            .min(self.ac_limit);

        AbsoluteControlOutcome {
            setpoint: setpoint + correction,
            iterm_error_rate: iterm_error_rate + correction,
            correction,
        }
    }

    /// Whether accumulated error decays this tick.
    pub fn error_decay_active(&self, stick_centered: bool) -> bool {
        self.error_decay_rate > 0.0 && (self.error_decay_always || stick_centered)
    }

    /// Decay rate of accumulated error in deg/s.
    pub fn error_decay_rate(&self) -> f32 {
        self.error_decay_rate
    }

    /// Run relax and absolute control for one axis.
    #[allow(clippy::too_many_arguments)]
    pub fn govern(
        &mut self,
        axis: Axis,
        iterm: f32,
        gyro_rate: f32,
        setpoint: f32,
        error_rate: f32,
        airborne: bool,
        stick_centered: bool,
    ) -> GovernorOutcome {
        let relax = self.apply_iterm_relax(axis, iterm, gyro_rate, error_rate, setpoint);
        let decay = self.error_decay_active(stick_centered);
        let ac = self.apply_absolute_control(
            axis,
            gyro_rate,
            setpoint,
            relax.iterm_error_rate,
            airborne,
            decay,
        );

        GovernorOutcome {
            setpoint: ac.setpoint,
            iterm_error_rate: ac.iterm_error_rate,
            relax_factor: relax.relax_factor,
            setpoint_hpf: relax.setpoint_hpf,
            ac_correction: ac.correction,
        }
    }

    pub fn axis_error(&self) -> Vector3<f32> {
        self.axis_error
    }

    pub fn set_axis_error(&mut self, axis_error: Vector3<f32>) {
        self.axis_error = axis_error;
    }

    /// Rotate the accumulated absolute error with the airframe.
    pub fn rotate_axis_error(&mut self, rotation: &Vector3<f32>) {
        self.axis_error = rotate_vector(&self.axis_error, rotation);
    }

    pub fn reset(&mut self) {
        self.axis_error = Vector3::zeros();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const DT: f32 = 1.0 / 8000.0;

    fn make_governor(profile: PidProfile) -> ItermGovernor {
        ItermGovernor::new(&profile, DT)
    }

    fn relax_profile(mode: ItermRelax, relax_type: ItermRelaxType) -> PidProfile {
        PidProfile::default().with_iterm_relax(mode, relax_type, 15)
    }

    #[test]
    fn test_relax_factor_bounds() {
        assert_eq!(relax_factor(0.0), 1.0);
        assert_eq!(relax_factor(ITERM_RELAX_SETPOINT_THRESHOLD), 0.0);
        assert_eq!(relax_factor(400.0), 0.0);
        assert!((relax_factor(20.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_relax_ramp_is_monotonic() {
        println!("\n--- Iterm relax admission vs setpoint step ---");
        let mut previous = f32::MAX;
        for step in 0..=60 {
            let setpoint = step as f32;
            let mut governor = make_governor(relax_profile(ItermRelax::Rpy, ItermRelaxType::Setpoint));
            let outcome = governor.apply_iterm_relax(Axis::Yaw, 0.0, 0.0, 1.0, setpoint);
            if step % 10 == 0 {
                println!(
                    "step {:>3}: hpf {:>7.3}, admitted {:.3}",
                    step, outcome.setpoint_hpf, outcome.iterm_error_rate
                );
            }

            assert!(outcome.iterm_error_rate <= previous + 1e-6);
            previous = outcome.iterm_error_rate;

            if step == 0 {
                assert_eq!(outcome.iterm_error_rate, 1.0, "full admission at rest");
            }
            if outcome.setpoint_hpf >= ITERM_RELAX_SETPOINT_THRESHOLD {
                assert_eq!(outcome.iterm_error_rate, 0.0, "full suppression above threshold");
            }
        }
        assert_eq!(previous, 0.0);
    }

    #[test]
    fn test_relax_rp_leaves_yaw_alone() {
        let mut governor = make_governor(relax_profile(ItermRelax::Rp, ItermRelaxType::Setpoint));
        let yaw = governor.apply_iterm_relax(Axis::Yaw, 0.0, 0.0, 1.0, 300.0);
        assert_eq!(yaw.iterm_error_rate, 1.0);
        assert_eq!(yaw.relax_factor, 1.0);

        let roll = governor.apply_iterm_relax(Axis::Roll, 0.0, 0.0, 1.0, 300.0);
        assert_eq!(roll.iterm_error_rate, 0.0);
    }

    #[test]
    fn test_relax_incremental_lets_iterm_unwind() {
        let mut governor = make_governor(relax_profile(ItermRelax::RpIncrement, ItermRelaxType::Setpoint));
        // I is positive and the error pulls it down: not relaxed
        let unwinding = governor.apply_iterm_relax(Axis::Roll, 10.0, 0.0, -5.0, 300.0);
        assert_eq!(unwinding.iterm_error_rate, -5.0);

        let mut governor = make_governor(relax_profile(ItermRelax::RpIncrement, ItermRelaxType::Setpoint));
        // Same error growing I further: relaxed
        let growing = governor.apply_iterm_relax(Axis::Roll, -10.0, 0.0, -5.0, 300.0);
        assert_eq!(growing.iterm_error_rate, 0.0);
    }

    #[test]
    fn test_relax_gyro_type_uses_deadband() {
        let mut governor = make_governor(relax_profile(ItermRelax::Rp, ItermRelaxType::Gyro));
        // Steady setpoint: hpf is small, error is lpf - gyro
        let mut outcome = governor.apply_iterm_relax(Axis::Pitch, 0.0, 0.0, 0.0, 0.0);
        for _ in 0..8000 {
            outcome = governor.apply_iterm_relax(Axis::Pitch, 0.0, 30.0, 0.0, 50.0);
        }
        assert!(outcome.setpoint_hpf < 1e-3);
        assert!((outcome.iterm_error_rate - 20.0).abs() < 1e-2);

        assert_eq!(apply_deadband(3.0, 5.0), 0.0);
        assert_eq!(apply_deadband(8.0, 5.0), 3.0);
        assert_eq!(apply_deadband(-8.0, 5.0), -3.0);
    }

    #[test]
    fn test_absolute_control_accumulates_and_corrects() {
        let profile = PidProfile::default().with_abs_control(10, 90, 20, 11);
        let mut governor = make_governor(profile);

        // Hold a steady setpoint while the gyro lags behind it
        let mut outcome = governor.apply_absolute_control(Axis::Roll, 0.0, 50.0, 0.0, true, false);
        for _ in 0..200 {
            outcome = governor.apply_absolute_control(Axis::Roll, 0.0, 50.0, 0.0, true, false);
        }
        assert!(governor.axis_error()[0] > 0.0, "error builds up while lagging");
        assert!(outcome.correction > 0.0);
        assert!(outcome.setpoint > 50.0);
        assert_eq!(outcome.iterm_error_rate, outcome.correction);

        // Long enough to hit both limits
        for _ in 0..100_000 {
            outcome = governor.apply_absolute_control(Axis::Roll, 0.0, 50.0, 0.0, true, false);
        }
        assert!(governor.axis_error()[0] <= 20.0);
        assert!(outcome.correction <= 90.0);
    }

    #[test]
    fn test_absolute_control_waits_for_airborne() {
        let profile = PidProfile::default().with_abs_control(10, 90, 20, 11);
        let mut governor = make_governor(profile);
        for _ in 0..1000 {
            let outcome = governor.apply_absolute_control(Axis::Pitch, 0.0, 50.0, 3.0, false, false);
            assert_eq!(outcome.correction, 0.0);
            assert_eq!(outcome.iterm_error_rate, 3.0);
        }
        assert_eq!(governor.axis_error(), Vector3::zeros());
    }

    #[test]
    fn test_absolute_control_error_decay() {
        let profile = PidProfile::default()
            .with_abs_control(10, 90, 20, 11)
            .with_error_decay(true, 40);
        let mut governor = make_governor(profile);
        governor.set_axis_error(Vector3::new(5.0, -5.0, 0.0));
        assert!(governor.error_decay_active(false));

        let mut previous = governor.axis_error();
        // Setpoint and gyro agree, so only decay moves the error
        for _ in 0..8000 {
            governor.govern(Axis::Roll, 0.0, 0.0, 0.0, 0.0, true, false);
            governor.govern(Axis::Pitch, 0.0, 0.0, 0.0, 0.0, true, false);
            let current = governor.axis_error();
            assert!(current[0].abs() <= previous[0].abs());
            assert!(current[1].abs() <= previous[1].abs());
            previous = current;
        }
        // 40 deg/s for one second clears 5 degrees
        assert_eq!(governor.axis_error(), Vector3::zeros());
    }

    #[test]
    fn test_decay_only_with_centered_sticks() {
        let profile = PidProfile::default().with_error_decay(false, 40);
        let governor = make_governor(profile);
        assert!(governor.error_decay_active(true));
        assert!(!governor.error_decay_active(false));

        let disabled = ItermGovernor::new(&PidProfile::default().with_error_decay(true, 0), DT);
        assert!(!disabled.error_decay_active(true));

        assert_eq!(decay_toward_zero(1.0, 0.3), 0.7);
        assert_eq!(decay_toward_zero(-0.2, 0.3), 0.0);
    }

    #[test]
    fn test_rotation_identity_is_noop() {
        let v = Vector3::new(12.5, -3.25, 7.0);
        assert_eq!(rotate_vector(&v, &Vector3::zeros()), v);
    }

    #[test]
    fn test_rotation_then_inverse_restores() {
        let v = Vector3::new(12.5, -3.25, 7.0);
        let rotation = Vector3::new(0.004, -0.002, 0.01);
        let there = rotate_vector(&v, &rotation);
        assert!((there - v).norm() > 1e-3, "rotation should move the vector");
        let back = rotate_vector(&there, &(-rotation));
        assert!((back - v).norm() < 1e-4, "got {:?}", back);
    }

    #[test]
    fn test_rotation_direction() {
        // After the body yaws 90 degrees, error along the old roll axis
        // shows up on the negative pitch axis
        let v = Vector3::new(1.0, 0.0, 0.0);
        let rotated = rotate_vector(&v, &Vector3::new(0.0, 0.0, FRAC_PI_2));
        assert!((rotated - Vector3::new(0.0, -1.0, 0.0)).norm() < 1e-5);
    }
}
