// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Angle and horizon leveling.
//!
//! Everything here is a pure function of stick deflection, attitude and the
//! derived [`LevelConfig`].

use crate::axis::{Axis, PidIndex};
use crate::profile::PidProfile;

/// How leveling mixes into the rate setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelMode {
    /// Stick commands an angle
    Angle,
    /// Stick commands a rate, with self-leveling near center
    Horizon,
}

/// Leveling constants derived from a profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelConfig {
    pub level_gain: f32,
    pub horizon_gain: f32,
    pub horizon_transition: f32,
    pub horizon_cutoff_degrees: f32,
    pub horizon_factor_ratio: f32,
    pub expert_mode: bool,
    pub angle_limit: f32,
}

impl LevelConfig {
    pub fn from_profile(profile: &PidProfile) -> Self {
        let level = profile.gains(PidIndex::Level);
        let tilt = profile.horizon_tilt_effect as f32;
        LevelConfig {
            level_gain: level.p as f32 / 10.0,
            horizon_gain: level.i as f32 / 10.0,
            horizon_transition: level.d as f32,
            horizon_cutoff_degrees: (175.0 - tilt) * 1.8,
            horizon_factor_ratio: (100.0 - tilt) * 0.01,
            expert_mode: profile.horizon_tilt_expert_mode,
            angle_limit: profile.level_angle_limit as f32,
        }
    }
}

/// Strength of self-leveling in horizon mode, in `[0, 1]`.
///
/// # Arguments
///
/// * `config` - Derived leveling constants
/// * `roll_deflection` - Roll stick deflection, -1 to 1
/// * `pitch_deflection` - Pitch stick deflection, -1 to 1
/// * `attitude` - Roll and pitch angles in degrees
///
/// # Notes
///
/// Strength is 1 at center stick and falls toward 0 at full deflection. In
/// expert mode it also falls to 0 as inclination approaches the tilt
/// cutoff, whatever the sticks do. Otherwise inclination only softens the
/// transition, and centered sticks always level.
pub fn calc_horizon_level_strength(
    config: &LevelConfig,
    roll_deflection: f32,
    pitch_deflection: f32,
    attitude: [f32; 2],
) -> f32 {
    let mut strength = 1.0 - roll_deflection.abs().max(pitch_deflection.abs());

    // 0 at level, 90 at vertical, 180 at inverted
    let inclination = attitude[0].abs().max(attitude[1].abs());

    if config.expert_mode {
        if config.horizon_transition > 0.0 && config.horizon_cutoff_degrees > 0.0 {
            let inclination_ratio = ((config.horizon_cutoff_degrees - inclination)
                / config.horizon_cutoff_degrees)
                .clamp(0.0, 1.0);
            strength = (strength - 1.0) * 100.0 / config.horizon_transition + 1.0;
            strength *= inclination_ratio;
        } else {
            strength = 0.0;
        }
    } else {
        let sensitivity = if config.horizon_factor_ratio < 1.01 {
            let inclination_ratio = (180.0 - inclination) / 180.0 * (1.0 - config.horizon_factor_ratio)
                + config.horizon_factor_ratio;
            config.horizon_transition * inclination_ratio
        } else {
            config.horizon_transition
        };

        if sensitivity <= 0.0 {
            strength = 0.0;
        } else {
            strength = (strength - 1.0) * (100.0 / sensitivity) + 1.0;
        }
    }

    if strength.is_nan() {
        return 0.0;
    }
    strength.clamp(0.0, 1.0)
}

/// Level-corrected setpoint for roll or pitch.
///
/// # Arguments
///
/// * `config` - Derived leveling constants
/// * `mode` - Angle or horizon
/// * `deflection` - Stick deflection of this axis, -1 to 1
/// * `attitude` - Current angle of this axis in degrees
/// * `trim` - Accelerometer trim of this axis in degrees
/// * `setpoint` - Rate setpoint from the sticks in deg/s
/// * `horizon_strength` - Output of [`calc_horizon_level_strength`]
///
/// # Returns
///
/// The corrected rate setpoint in deg/s
pub fn pid_level(
    config: &LevelConfig,
    mode: LevelMode,
    deflection: f32,
    attitude: f32,
    trim: f32,
    setpoint: f32,
    horizon_strength: f32,
) -> f32 {
    let limit = config.angle_limit;
    let angle = (limit * deflection).max(-limit).min(limit);
    let error_angle = angle - (attitude - trim);

    match mode {
        LevelMode::Angle => error_angle * config.level_gain,
        LevelMode::Horizon => setpoint + error_angle * config.horizon_gain * horizon_strength,
    }
}

/// Leveling only ever drives roll and pitch.
pub fn levels_axis(axis: Axis) -> bool {
    axis.is_cyclic()
}
