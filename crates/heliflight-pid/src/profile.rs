// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Tunable PID profiles, the process-wide PID config and the profile bank.

use crate::axis::{Axis, PidIndex, XYZ_AXIS_COUNT};
use crate::PidError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const MAX_PID_PROCESS_DENOM: u8 = 16;
pub const PID_PROFILE_COUNT: usize = 3;
pub const MAX_PROFILE_NAME_LENGTH: usize = 8;

pub const PIDSUM_LIMIT: u16 = 500;
pub const PIDSUM_LIMIT_YAW: u16 = 500;
pub const PIDSUM_LIMIT_MIN: u16 = 100;
pub const PIDSUM_LIMIT_MAX: u16 = 1000;

/// Per-axis scale from the integer P gain to the float coefficient.
pub const PTERM_SCALE: [f32; XYZ_AXIS_COUNT] = [0.0032029, 0.0032029, 0.032029];
pub const ITERM_SCALE: [f32; XYZ_AXIS_COUNT] = [0.0488762, 0.0488762, 0.244381];
pub const DTERM_SCALE: [f32; XYZ_AXIS_COUNT] = [0.0000529, 0.0000529, 0.000529];
pub const FF_SCALE: [f32; XYZ_AXIS_COUNT] = [0.00013754, 0.00013754, 0.00013754];

/// Full iterm suppression in setpoint mode at high-passed setpoint rate > 40deg/sec
pub const ITERM_RELAX_SETPOINT_THRESHOLD: f32 = 40.0;
pub const ITERM_RELAX_CUTOFF_DEFAULT: u8 = 15;

/// `rescue_delay` value that keeps the rescue inverted and never rolls upright.
pub const RESCUE_DELAY_DISABLED: u8 = 35;

/// D-term filter stage selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FilterType {
    Pt1,
    Biquad,
    Notch,
}

/// Which axes iterm relax acts on, and whether it only relaxes growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ItermRelax {
    Off,
    Rp,
    Rpy,
    RpIncrement,
    RpyIncrement,
}

impl ItermRelax {
    pub fn applies_to(self, axis: Axis) -> bool {
        match self {
            ItermRelax::Off => false,
            ItermRelax::Rp | ItermRelax::RpIncrement => axis != Axis::Yaw,
            ItermRelax::Rpy | ItermRelax::RpyIncrement => true,
        }
    }

    /// Incremental modes only hold back integral growth, never its decrease.
    pub fn is_incremental(self) -> bool {
        matches!(self, ItermRelax::RpIncrement | ItermRelax::RpyIncrement)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ItermRelaxType {
    Gyro,
    Setpoint,
}

/// Feedforward setpoint interpolation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FfInterpolation {
    Off,
    On,
    Average2,
    Average3,
    Average4,
}

impl FfInterpolation {
    /// Number of interpolated deltas averaged together, zero when disabled.
    pub fn average_len(self) -> usize {
        match self {
            FfInterpolation::Off => 0,
            FfInterpolation::On => 1,
            FfInterpolation::Average2 => 2,
            FfInterpolation::Average3 => 3,
            FfInterpolation::Average4 => 4,
        }
    }
}

/// Integer gains of one PID slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pidf {
    pub p: u8,
    pub i: u8,
    pub d: u8,
    pub f: u16,
}

impl Pidf {
    pub const fn new(p: u8, i: u8, d: u8, f: u16) -> Self {
        Pidf { p, i, d, f }
    }
}

/// A named bundle of tunable PID parameters.
///
/// Filter cutoffs of zero disable the corresponding filter. Profiles are
/// supplied by the configuration store and checked with [`PidProfile::validate`]
/// before the controller uses them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PidProfile {
    pub name: String,
    pub pid: [Pidf; PidIndex::COUNT],

    // D-term and yaw filtering
    pub yaw_lowpass_hz: u16,
    pub dterm_filter_type: FilterType,
    pub dterm_lowpass_hz: u16,
    pub dterm_filter2_type: FilterType,
    pub dterm_lowpass2_hz: u16,
    pub dterm_notch_hz: u16,
    pub dterm_notch_cutoff: u16,
    pub dyn_lpf_dterm_min_hz: u16,
    pub dyn_lpf_dterm_max_hz: u16,
    pub dyn_lpf_curve_expo: u8,

    // Limits
    pub iterm_windup_point_percent: u8,
    pub iterm_limit: u16,
    pub pid_sum_limit: u16,
    pub pid_sum_limit_yaw: u16,
    pub rate_accel_limit: u16,
    pub yaw_rate_accel_limit: u16,

    // Leveling
    pub level_angle_limit: u8,
    pub horizon_tilt_effect: u8,
    pub horizon_tilt_expert_mode: bool,

    // Iterm governor
    pub iterm_rotation: bool,
    pub iterm_relax: ItermRelax,
    pub iterm_relax_type: ItermRelaxType,
    pub iterm_relax_cutoff: u8,
    pub abs_control_gain: u8,
    pub abs_control_limit: u8,
    pub abs_control_error_limit: u8,
    pub abs_control_cutoff: u8,
    pub error_decay_always: bool,
    pub error_decay_rate: u8,

    // Acro trainer
    pub acro_trainer_angle_limit: u8,
    pub acro_trainer_debug_axis: Axis,
    pub acro_trainer_gain: u8,
    pub acro_trainer_lookahead_ms: u16,

    // Feedforward
    pub feed_forward_transition: u8,
    pub ff_boost: u8,
    pub ff_interpolate_sp: FfInterpolation,
    pub ff_max_rate_limit: u8,
    pub ff_spike_limit: u8,
    pub ff_smooth_factor: u8,

    pub thrust_linearization: u8,

    // Helicopter
    pub yaw_col_kf: u16,
    pub yaw_col_pulse_kf: u16,
    pub yaw_cyc_kf: u16,
    pub yaw_base_thrust: u16,
    pub collective_ff_impulse_freq: u16,
    pub rescue_collective: u8,
    pub rescue_collective_boost: u8,
    pub rescue_delay: u8,
    pub elevator_filter_gain: u16,
    /// Milliseconds the stick may stay near center before smoothing stops
    pub elevator_filter_window_time: u8,
    /// Near-center window, in percent of pitch stick deflection (not deg/s)
    pub elevator_filter_window_size: u8,
    pub elevator_filter_hz: u8,
}

impl Default for PidProfile {
    fn default() -> Self {
        PidProfile {
            name: String::new(),
            pid: [
                Pidf::new(42, 85, 35, 90),
                Pidf::new(46, 90, 38, 95),
                Pidf::new(45, 90, 0, 90),
                Pidf::new(50, 50, 75, 0),
                Pidf::new(40, 0, 0, 0),
            ],
            yaw_lowpass_hz: 0,
            dterm_filter_type: FilterType::Pt1,
            dterm_lowpass_hz: 150,
            dterm_filter2_type: FilterType::Pt1,
            dterm_lowpass2_hz: 150,
            dterm_notch_hz: 0,
            dterm_notch_cutoff: 0,
            dyn_lpf_dterm_min_hz: 70,
            dyn_lpf_dterm_max_hz: 170,
            dyn_lpf_curve_expo: 5,
            iterm_windup_point_percent: 100,
            iterm_limit: 400,
            pid_sum_limit: PIDSUM_LIMIT,
            pid_sum_limit_yaw: PIDSUM_LIMIT_YAW,
            rate_accel_limit: 0,
            yaw_rate_accel_limit: 0,
            level_angle_limit: 55,
            horizon_tilt_effect: 75,
            horizon_tilt_expert_mode: false,
            iterm_rotation: false,
            iterm_relax: ItermRelax::Rp,
            iterm_relax_type: ItermRelaxType::Setpoint,
            iterm_relax_cutoff: ITERM_RELAX_CUTOFF_DEFAULT,
            abs_control_gain: 0,
            abs_control_limit: 90,
            abs_control_error_limit: 20,
            abs_control_cutoff: 11,
            error_decay_always: false,
            error_decay_rate: 0,
            acro_trainer_angle_limit: 20,
            acro_trainer_debug_axis: Axis::Roll,
            acro_trainer_gain: 75,
            acro_trainer_lookahead_ms: 50,
            feed_forward_transition: 0,
            ff_boost: 15,
            ff_interpolate_sp: FfInterpolation::Average2,
            ff_max_rate_limit: 100,
            ff_spike_limit: 60,
            ff_smooth_factor: 37,
            thrust_linearization: 0,
            yaw_col_kf: 0,
            yaw_col_pulse_kf: 0,
            yaw_cyc_kf: 0,
            yaw_base_thrust: 0,
            collective_ff_impulse_freq: 100,
            rescue_collective: 30,
            rescue_collective_boost: 10,
            rescue_delay: 30,
            elevator_filter_gain: 0,
            elevator_filter_window_time: 100,
            elevator_filter_window_size: 20,
            elevator_filter_hz: 20,
        }
    }
}

impl PidProfile {
    /// Create a new profile with the default tune.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the gains of one slot.
    ///
    /// # Arguments
    ///
    /// * `index` - Gain slot (roll, pitch, yaw, level or mag)
    /// * `gains` - Integer P, I, D and F gains
    ///
    /// # Returns
    ///
    /// * The updated profile builder
    pub fn with_pid(mut self, index: PidIndex, gains: Pidf) -> Self {
        self.pid[index.index()] = gains;
        self
    }

    pub fn with_dterm_lowpass(mut self, filter_type: FilterType, hz: u16) -> Self {
        self.dterm_filter_type = filter_type;
        self.dterm_lowpass_hz = hz;
        self
    }

    pub fn with_dterm_lowpass2(mut self, filter_type: FilterType, hz: u16) -> Self {
        self.dterm_filter2_type = filter_type;
        self.dterm_lowpass2_hz = hz;
        self
    }

    pub fn with_dterm_notch(mut self, hz: u16, cutoff: u16) -> Self {
        self.dterm_notch_hz = hz;
        self.dterm_notch_cutoff = cutoff;
        self
    }

    /// Configure the throttle-driven D-term lowpass.
    ///
    /// # Arguments
    ///
    /// * `min_hz` - Cutoff at zero throttle, 0 disables the dynamic lowpass
    /// * `max_hz` - Cutoff at full throttle
    /// * `expo` - Curve shape between the two, 0 to 10
    ///
    /// # Returns
    ///
    /// * The updated profile builder
    pub fn with_dyn_lpf(mut self, min_hz: u16, max_hz: u16, expo: u8) -> Self {
        self.dyn_lpf_dterm_min_hz = min_hz;
        self.dyn_lpf_dterm_max_hz = max_hz;
        self.dyn_lpf_curve_expo = expo;
        self
    }

    pub fn with_yaw_lowpass(mut self, hz: u16) -> Self {
        self.yaw_lowpass_hz = hz;
        self
    }

    pub fn with_iterm_windup(mut self, percent: u8) -> Self {
        self.iterm_windup_point_percent = percent;
        self
    }

    pub fn with_iterm_limit(mut self, limit: u16) -> Self {
        self.iterm_limit = limit;
        self
    }

    pub fn with_pid_sum_limits(mut self, roll_pitch: u16, yaw: u16) -> Self {
        self.pid_sum_limit = roll_pitch;
        self.pid_sum_limit_yaw = yaw;
        self
    }

    pub fn with_rate_accel_limits(mut self, roll_pitch: u16, yaw: u16) -> Self {
        self.rate_accel_limit = roll_pitch;
        self.yaw_rate_accel_limit = yaw;
        self
    }

    pub fn with_level_angle_limit(mut self, degrees: u8) -> Self {
        self.level_angle_limit = degrees;
        self
    }

    pub fn with_horizon_tilt(mut self, effect: u8, expert_mode: bool) -> Self {
        self.horizon_tilt_effect = effect;
        self.horizon_tilt_expert_mode = expert_mode;
        self
    }

    pub fn with_iterm_rotation(mut self, enable: bool) -> Self {
        self.iterm_rotation = enable;
        self
    }

    pub fn with_iterm_relax(
        mut self,
        mode: ItermRelax,
        relax_type: ItermRelaxType,
        cutoff: u8,
    ) -> Self {
        self.iterm_relax = mode;
        self.iterm_relax_type = relax_type;
        self.iterm_relax_cutoff = cutoff;
        self
    }

    /// Configure absolute control.
    ///
    /// # Arguments
    ///
    /// * `gain` - Correction strength, 0 disables absolute control
    /// * `limit` - Largest setpoint correction in deg/s
    /// * `error_limit` - Largest accumulated error in degrees
    /// * `cutoff` - Cutoff of the setpoint path estimate in Hz
    ///
    /// # Returns
    ///
    /// * The updated profile builder
    pub fn with_abs_control(mut self, gain: u8, limit: u8, error_limit: u8, cutoff: u8) -> Self {
        self.abs_control_gain = gain;
        self.abs_control_limit = limit;
        self.abs_control_error_limit = error_limit;
        self.abs_control_cutoff = cutoff;
        self
    }

    pub fn with_error_decay(mut self, always: bool, rate: u8) -> Self {
        self.error_decay_always = always;
        self.error_decay_rate = rate;
        self
    }

    pub fn with_acro_trainer(mut self, angle_limit: u8, gain: u8, lookahead_ms: u16) -> Self {
        self.acro_trainer_angle_limit = angle_limit;
        self.acro_trainer_gain = gain;
        self.acro_trainer_lookahead_ms = lookahead_ms;
        self
    }

    pub fn with_acro_trainer_debug_axis(mut self, axis: Axis) -> Self {
        self.acro_trainer_debug_axis = axis;
        self
    }

    pub fn with_ff_transition(mut self, transition: u8) -> Self {
        self.feed_forward_transition = transition;
        self
    }

    pub fn with_ff_boost(mut self, boost: u8) -> Self {
        self.ff_boost = boost;
        self
    }

    /// Configure feedforward interpolation.
    ///
    /// # Arguments
    ///
    /// * `mode` - Interpolation and averaging mode
    /// * `smooth_factor` - Smoothing strength in percent, 0 to 75
    /// * `spike_limit` - Extrapolation horizon in milliseconds, 0 for a full RC frame
    ///
    /// # Returns
    ///
    /// * The updated profile builder
    pub fn with_ff_interpolation(
        mut self,
        mode: FfInterpolation,
        smooth_factor: u8,
        spike_limit: u8,
    ) -> Self {
        self.ff_interpolate_sp = mode;
        self.ff_smooth_factor = smooth_factor;
        self.ff_spike_limit = spike_limit;
        self
    }

    pub fn with_ff_max_rate_limit(mut self, percent: u8) -> Self {
        self.ff_max_rate_limit = percent;
        self
    }

    pub fn with_thrust_linearization(mut self, percent: u8) -> Self {
        self.thrust_linearization = percent;
        self
    }

    /// Configure the tail feedforward from collective and cyclic.
    pub fn with_tail_feedforward(
        mut self,
        collective_kf: u16,
        collective_pulse_kf: u16,
        cyclic_kf: u16,
        base_thrust: u16,
        impulse_freq: u16,
    ) -> Self {
        self.yaw_col_kf = collective_kf;
        self.yaw_col_pulse_kf = collective_pulse_kf;
        self.yaw_cyc_kf = cyclic_kf;
        self.yaw_base_thrust = base_thrust;
        self.collective_ff_impulse_freq = impulse_freq;
        self
    }

    /// Configure the inverted-flight rescue.
    ///
    /// # Arguments
    ///
    /// * `collective` - Collective while rescuing, 100 is 8 degrees of pitch
    /// * `boost` - Extra collective until the delay expires
    /// * `delay` - Tenths of a second to hold inverted before rolling upright;
    ///   0 rolls immediately and [`RESCUE_DELAY_DISABLED`] never rolls
    ///
    /// # Returns
    ///
    /// * The updated profile builder
    pub fn with_rescue(mut self, collective: u8, boost: u8, delay: u8) -> Self {
        self.rescue_collective = collective;
        self.rescue_collective_boost = boost;
        self.rescue_delay = delay;
        self
    }

    pub fn with_elevator_filter(
        mut self,
        gain: u16,
        window_time_ms: u8,
        window_size: u8,
        hz: u8,
    ) -> Self {
        self.elevator_filter_gain = gain;
        self.elevator_filter_window_time = window_time_ms;
        self.elevator_filter_window_size = window_size;
        self.elevator_filter_hz = hz;
        self
    }

    pub fn gains(&self, index: PidIndex) -> Pidf {
        self.pid[index.index()]
    }

    /// Check the ranges the controller relies on.
    ///
    /// # Returns
    ///
    /// Result indicating success or the first offending parameter
    pub fn validate(&self) -> Result<(), PidError> {
        let name_len = self.name.chars().count();
        if name_len > MAX_PROFILE_NAME_LENGTH {
            return Err(PidError::ProfileNameTooLong(name_len));
        }

        let sum_range = PIDSUM_LIMIT_MIN..=PIDSUM_LIMIT_MAX;
        if !sum_range.contains(&self.pid_sum_limit) {
            return Err(PidError::InvalidParameter(
                "pid_sum_limit must be within 100..=1000",
            ));
        }
        if !sum_range.contains(&self.pid_sum_limit_yaw) {
            return Err(PidError::InvalidParameter(
                "pid_sum_limit_yaw must be within 100..=1000",
            ));
        }
        if self.iterm_windup_point_percent > 100 {
            return Err(PidError::InvalidParameter(
                "iterm_windup_point_percent must be at most 100",
            ));
        }
        if self.iterm_relax != ItermRelax::Off && self.iterm_relax_cutoff == 0 {
            return Err(PidError::InvalidParameter(
                "iterm_relax_cutoff must be non-zero while iterm relax is enabled",
            ));
        }
        if self.abs_control_gain > 0 && self.abs_control_cutoff == 0 {
            return Err(PidError::InvalidParameter(
                "abs_control_cutoff must be non-zero while absolute control is enabled",
            ));
        }
        if self.horizon_tilt_effect > 250 {
            return Err(PidError::InvalidParameter(
                "horizon_tilt_effect must be at most 250",
            ));
        }
        if self.dyn_lpf_curve_expo > 10 {
            return Err(PidError::InvalidParameter(
                "dyn_lpf_curve_expo must be at most 10",
            ));
        }
        if self.ff_smooth_factor > 75 {
            return Err(PidError::InvalidParameter(
                "ff_smooth_factor must be at most 75",
            ));
        }
        if self.ff_max_rate_limit > 150 {
            return Err(PidError::InvalidParameter(
                "ff_max_rate_limit must be at most 150",
            ));
        }
        if self.thrust_linearization > 100 {
            return Err(PidError::InvalidParameter(
                "thrust_linearization must be at most 100",
            ));
        }
        if self.rescue_delay > RESCUE_DELAY_DISABLED {
            return Err(PidError::InvalidParameter("rescue_delay must be at most 35"));
        }
        if self.acro_trainer_debug_axis == Axis::Yaw {
            return Err(PidError::InvalidParameter(
                "acro_trainer_debug_axis must be roll or pitch",
            ));
        }

        Ok(())
    }
}

/// Process-wide PID settings, fixed after initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PidConfig {
    /// PID loop runs every `pid_process_denom` gyro samples
    pub pid_process_denom: u8,
    /// Stabilised collective output that gives 8 degrees of collective pitch
    pub collective_reference: u16,
}

impl Default for PidConfig {
    fn default() -> Self {
        PidConfig {
            pid_process_denom: 1,
            collective_reference: 1000,
        }
    }
}

impl PidConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pid_process_denom(mut self, denom: u8) -> Self {
        self.pid_process_denom = denom;
        self
    }

    pub fn with_collective_reference(mut self, reference: u16) -> Self {
        self.collective_reference = reference;
        self
    }

    pub fn validate(&self) -> Result<(), PidError> {
        if self.pid_process_denom == 0 || self.pid_process_denom > MAX_PID_PROCESS_DENOM {
            return Err(PidError::InvalidParameter(
                "pid_process_denom must be within 1..=16",
            ));
        }
        Ok(())
    }
}

/// Fixed set of profile slots with exactly one active.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileBank {
    profiles: [PidProfile; PID_PROFILE_COUNT],
    active: usize,
}

impl Default for ProfileBank {
    fn default() -> Self {
        ProfileBank {
            profiles: std::array::from_fn(|_| PidProfile::default()),
            active: 0,
        }
    }
}

impl ProfileBank {
    /// Create a bank with `profile` in every slot and slot 0 active.
    pub fn new(profile: PidProfile) -> Result<Self, PidError> {
        profile.validate()?;
        Ok(ProfileBank {
            profiles: std::array::from_fn(|_| profile.clone()),
            active: 0,
        })
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active(&self) -> &PidProfile {
        &self.profiles[self.active]
    }

    pub fn profile(&self, index: usize) -> Option<&PidProfile> {
        self.profiles.get(index)
    }

    /// Replace one slot after validating the profile.
    pub fn set_profile(&mut self, index: usize, profile: PidProfile) -> Result<(), PidError> {
        Self::check_index(index)?;
        profile.validate()?;
        self.profiles[index] = profile;
        Ok(())
    }

    pub fn select(&mut self, index: usize) -> Result<(), PidError> {
        Self::check_index(index)?;
        self.active = index;
        Ok(())
    }

    /// Copy slot `src` over slot `dst`.
    ///
    /// # Returns
    ///
    /// Result indicating success or an out-of-range slot
    ///
    /// # Notes
    ///
    /// Copying a slot onto itself does nothing.
    pub fn copy_profile(&mut self, dst: usize, src: usize) -> Result<(), PidError> {
        Self::check_index(dst)?;
        Self::check_index(src)?;
        if dst != src {
            self.profiles[dst] = self.profiles[src].clone();
        }
        Ok(())
    }

    fn check_index(index: usize) -> Result<(), PidError> {
        if index >= PID_PROFILE_COUNT {
            return Err(PidError::ProfileIndexOutOfRange {
                index,
                count: PID_PROFILE_COUNT,
            });
        }
        Ok(())
    }
}
