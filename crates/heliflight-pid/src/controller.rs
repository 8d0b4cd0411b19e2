// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The axis PID engine and the per-tick orchestration around it.

use log::{debug, info, warn};
use nalgebra::Vector3;
use std::sync::{Arc, Mutex};

use crate::acro_trainer::{AcroTrainer, AcroTrainerOutcome};
use crate::axis::{Axis, XYZ_AXIS_COUNT};
use crate::filter::{DtermFilterBank, FilterStage};
use crate::heli::{ElevatorFilter, RescueCommand, RescuePhase, RescueStateMachine, TailFeedforward};
use crate::iterm::{decay_toward_zero, rotate_vector, GovernorOutcome, ItermGovernor};
use crate::level::{calc_horizon_level_strength, levels_axis, pid_level, LevelConfig, LevelMode};
use crate::profile::{
    FilterType, PidConfig, PidProfile, ProfileBank, DTERM_SCALE, FF_SCALE, ITERM_SCALE,
    PTERM_SCALE,
};
use crate::setpoint::{SetpointAccelLimiter, SetpointShaper, DEFAULT_MAX_SETPOINT_RATE};
use crate::thrust::{DefaultThrustLinearization, ThrustLinearization};
use crate::PidError;

#[cfg(feature = "debugging")]
use crate::debug::{ControllerDebugger, DebugConfig, DebugMode};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stick deflection below which an axis counts as centered.
pub const STICK_CENTER_DEFLECTION: f32 = 0.05;

const DEG_TO_RAD: f32 = std::f32::consts::PI / 180.0;

/// P/I/D/F contributions of one axis and their sum, as read by the mixer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxisOutput {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub f: f32,
    /// Sum clamped to the axis sum limit
    pub sum: f32,
    /// Sum before clamping
    pub sum_lim: f32,
}

/// Flight modes engaged this tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlightModes {
    pub angle: bool,
    pub horizon: bool,
    /// Inverted-flight rescue requested
    pub rescue: bool,
}

impl FlightModes {
    /// Leveling requested by the pilot. Angle wins over horizon.
    pub fn level_mode(&self) -> Option<LevelMode> {
        if self.angle {
            Some(LevelMode::Angle)
        } else if self.horizon {
            Some(LevelMode::Horizon)
        } else {
            None
        }
    }

    /// Plain rate mode, nothing leveling the craft.
    pub fn is_rate_mode(&self) -> bool {
        !self.angle && !self.horizon && !self.rescue
    }
}

/// Everything the controller reads in one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickInput {
    /// Tick timestamp in microseconds
    pub time_us: u64,
    /// Filtered gyro rate in deg/s
    pub gyro_rate: [f32; XYZ_AXIS_COUNT],
    /// Roll and pitch attitude in degrees
    pub attitude: [f32; 2],
    /// Accelerometer trim of roll and pitch in degrees
    pub angle_trim: [f32; 2],
    /// Rate setpoint from the stick curves in deg/s
    pub setpoint: [f32; XYZ_AXIS_COUNT],
    /// Stick deflection, -1 to 1
    pub stick_deflection: [f32; XYZ_AXIS_COUNT],
    /// Collective stick deflection, -1 to 1
    pub collective_deflection: f32,
    /// Throttle, 0 to 1
    pub throttle: f32,
    /// Motor output spread reported by the mixer, 0 to 1
    pub motor_mix_range: f32,
    /// A fresh RC frame arrived since the last tick
    pub new_rc_frame: bool,
    /// Interval between RC frames in microseconds
    pub rx_interval_us: u32,
    pub modes: FlightModes,
    pub airborne: bool,
}

/// Internal signals of one axis from the last tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisDiagnostics {
    /// Setpoint after leveling, trainer and de-bounce
    pub setpoint: f32,
    /// Trim-adjusted attitude, zero for yaw
    pub angle: f32,
    pub governor: GovernorOutcome,
    pub acro_trainer: AcroTrainerOutcome,
    /// Gyro rate after the D-term filters
    pub dterm_rate: f32,
    pub boost: f32,
    pub setpoint_derivative: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct AxisCoefficients {
    kp: f32,
    ki: f32,
    kd: f32,
    kf: f32,
}

#[derive(Debug, Clone, Copy, Default)]
struct AxisState {
    iterm: f32,
    previous_dterm_rate: f32,
    // Last finite samples, held over sensor faults
    gyro_rate: f32,
    setpoint: f32,
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn loop_period(gyro_sample_period_us: u32, pid_process_denom: u8) -> f32 {
    gyro_sample_period_us as f32 * pid_process_denom as f32 * 1e-6
}

/// Rate and attitude PID controller for all three axes.
///
/// Generic over the thrust linearization so that builds without the
/// `thrust-linearization` feature compose a pass-through at type level.
///
/// Not thread safe on its own. Wrap it in [`SharedPidController`] when
/// profile changes come from another thread.
pub struct PidController<T: ThrustLinearization = DefaultThrustLinearization> {
    bank: ProfileBank,
    config: PidConfig,
    gyro_sample_period_us: u32,
    dt: f32,
    pid_frequency: f32,

    coefficients: [AxisCoefficients; XYZ_AXIS_COUNT],
    iterm_limit: f32,
    iterm_windup_point: f32,
    sum_limit: [f32; XYZ_AXIS_COUNT],
    ff_transition_inverse: f32,
    iterm_rotation: bool,

    filters: DtermFilterBank,
    yaw_lowpass: FilterStage,
    shaper: SetpointShaper,
    max_setpoint_rates: [f32; XYZ_AXIS_COUNT],
    setpoint_derivative_lpf: Option<(u16, Axis, FilterType)>,
    accel_limiter: SetpointAccelLimiter,
    governor: ItermGovernor,
    level: LevelConfig,
    horizon_level_strength: f32,
    acro_trainer: AcroTrainer,
    thrust: T,
    tail: TailFeedforward,
    elevator: ElevatorFilter,
    rescue: RescueStateMachine,
    rescue_command: RescueCommand,

    axes: [AxisState; XYZ_AXIS_COUNT],
    outputs: [AxisOutput; XYZ_AXIS_COUNT],
    diagnostics: [AxisDiagnostics; XYZ_AXIS_COUNT],

    #[cfg(feature = "debugging")]
    debugger: Option<ControllerDebugger>,
}

impl PidController {
    /// Create a controller with every profile slot holding `profile`.
    ///
    /// # Arguments
    ///
    /// * `profile` - Initial profile, validated before use
    /// * `config` - Process-wide PID settings
    /// * `gyro_sample_period_us` - Gyro sampling period in microseconds
    ///
    /// # Returns
    ///
    /// The controller, or the first invalid profile or config value
    pub fn new(
        profile: PidProfile,
        config: PidConfig,
        gyro_sample_period_us: u32,
    ) -> Result<Self, PidError> {
        Self::with_thrust_linearization(profile, config, gyro_sample_period_us)
    }
}

impl<T: ThrustLinearization> PidController<T> {
    /// Like [`PidController::new`] with an explicit thrust linearization type.
    pub fn with_thrust_linearization(
        profile: PidProfile,
        config: PidConfig,
        gyro_sample_period_us: u32,
    ) -> Result<Self, PidError> {
        Self::from_bank(ProfileBank::new(profile)?, config, gyro_sample_period_us)
    }

    /// Create a controller over an existing profile bank.
    pub fn from_bank(
        bank: ProfileBank,
        config: PidConfig,
        gyro_sample_period_us: u32,
    ) -> Result<Self, PidError> {
        config.validate()?;

        let dt = loop_period(gyro_sample_period_us, config.pid_process_denom);
        if dt <= 0.0 {
            warn!("Gyro sample period is zero, frequency scaled terms are disabled");
        }
        let pid_frequency = if dt > 0.0 { 1.0 / dt } else { 0.0 };

        let profile = bank.active();
        let mut shaper = SetpointShaper::new(profile, dt);
        shaper.set_max_rates([DEFAULT_MAX_SETPOINT_RATE; XYZ_AXIS_COUNT]);

        let mut controller = PidController {
            config,
            gyro_sample_period_us,
            dt,
            pid_frequency,
            coefficients: [AxisCoefficients::default(); XYZ_AXIS_COUNT],
            iterm_limit: 0.0,
            iterm_windup_point: 1.0,
            sum_limit: [0.0; XYZ_AXIS_COUNT],
            ff_transition_inverse: 0.0,
            iterm_rotation: false,
            filters: DtermFilterBank::from_profile(profile, dt),
            yaw_lowpass: FilterStage::new(FilterType::Pt1, profile.yaw_lowpass_hz as f32, dt),
            shaper,
            max_setpoint_rates: [DEFAULT_MAX_SETPOINT_RATE; XYZ_AXIS_COUNT],
            setpoint_derivative_lpf: None,
            accel_limiter: SetpointAccelLimiter::new(profile, dt),
            governor: ItermGovernor::new(profile, dt),
            level: LevelConfig::from_profile(profile),
            horizon_level_strength: 0.0,
            acro_trainer: AcroTrainer::new(profile),
            thrust: T::from_profile(profile),
            tail: TailFeedforward::from_profile(profile, dt),
            elevator: ElevatorFilter::from_profile(profile, dt),
            rescue: RescueStateMachine::new(profile, &config),
            rescue_command: RescueCommand::default(),
            axes: [AxisState::default(); XYZ_AXIS_COUNT],
            outputs: [AxisOutput::default(); XYZ_AXIS_COUNT],
            diagnostics: [AxisDiagnostics::default(); XYZ_AXIS_COUNT],
            #[cfg(feature = "debugging")]
            debugger: None,
            bank,
        };
        controller.init_config();

        info!(
            "PID controller ready: profile {} '{}', loop {:.0}Hz",
            controller.bank.active_index(),
            controller.bank.active().name,
            controller.pid_frequency
        );
        Ok(controller)
    }

    /// Rebuild filters, coefficients and limits from the active profile.
    pub fn init(&mut self) {
        self.dt = loop_period(self.gyro_sample_period_us, self.config.pid_process_denom);
        self.pid_frequency = if self.dt > 0.0 { 1.0 / self.dt } else { 0.0 };
        self.init_filters();
        self.init_config();
        self.init_accel_limits();
    }

    /// Rebuild every filter from the active profile. Filter memory starts over.
    pub fn init_filters(&mut self) {
        let profile = self.bank.active();
        let dt = self.dt;

        self.filters = DtermFilterBank::from_profile(profile, dt);
        self.yaw_lowpass = FilterStage::new(FilterType::Pt1, profile.yaw_lowpass_hz as f32, dt);

        self.shaper = SetpointShaper::new(profile, dt);
        self.shaper.set_max_rates(self.max_setpoint_rates);
        if let Some((cutoff, debug_axis, filter_type)) = self.setpoint_derivative_lpf {
            self.shaper.init_derivative_lpf(cutoff, debug_axis, filter_type);
        }

        self.tail = TailFeedforward::from_profile(profile, dt);
        self.elevator = ElevatorFilter::from_profile(profile, dt);

        let axis_error = self.governor.axis_error();
        self.governor = ItermGovernor::new(profile, dt);
        self.governor.set_axis_error(axis_error);

        for state in self.axes.iter_mut() {
            state.previous_dterm_rate = 0.0;
        }
    }

    /// Derive gains and limits from the active profile.
    pub fn init_config(&mut self) {
        let profile = self.bank.active();
        let ac_gain = profile.abs_control_gain as f32;

        for axis in Axis::ALL {
            let i = axis.index();
            let gains = profile.gains(axis.into());
            let kp = PTERM_SCALE[i] * gains.p as f32;
            let mut ki = ITERM_SCALE[i] * gains.i as f32;
            if ac_gain > 0.0 && axis.is_cyclic() {
                // Absolute control takes over part of the integrator's job
                ki = (ki - ac_gain * PTERM_SCALE[i] / ITERM_SCALE[i] * kp).max(0.0);
            }
            self.coefficients[i] = AxisCoefficients {
                kp,
                ki,
                kd: DTERM_SCALE[i] * gains.d as f32,
                kf: FF_SCALE[i] * gains.f as f32,
            };
        }

        self.iterm_limit = profile.iterm_limit as f32;
        self.iterm_windup_point = profile.iterm_windup_point_percent as f32 / 100.0;
        self.sum_limit = [
            profile.pid_sum_limit as f32,
            profile.pid_sum_limit as f32,
            profile.pid_sum_limit_yaw as f32,
        ];
        self.ff_transition_inverse = if profile.feed_forward_transition > 0 {
            100.0 / profile.feed_forward_transition as f32
        } else {
            0.0
        };
        self.iterm_rotation = profile.iterm_rotation;

        self.level = LevelConfig::from_profile(profile);
        self.acro_trainer.configure(profile);
        self.thrust = T::from_profile(profile);
        self.rescue.configure(profile, &self.config);

        debug!(
            "PID coefficients: roll {:?}, pitch {:?}, yaw {:?}",
            self.coefficients[0], self.coefficients[1], self.coefficients[2]
        );
    }

    /// Rebuild the setpoint acceleration limits from the active profile.
    pub fn init_accel_limits(&mut self) {
        self.accel_limiter = SetpointAccelLimiter::new(self.bank.active(), self.dt);
    }

    /// Clear the integrators and the accumulated absolute error.
    pub fn reset_iterm(&mut self) {
        for state in self.axes.iter_mut() {
            state.iterm = 0.0;
        }
        self.governor.reset();
    }

    /// Copy profile slot `src` over slot `dst`.
    ///
    /// # Returns
    ///
    /// Result indicating success or an out-of-range slot
    ///
    /// # Notes
    ///
    /// Copying over the active slot re-initialises the controller. Copying a
    /// slot onto itself does nothing.
    pub fn copy_profile(&mut self, dst: usize, src: usize) -> Result<(), PidError> {
        self.bank.copy_profile(dst, src)?;
        if dst != src {
            info!("Copied PID profile {} to {}", src, dst);
            if dst == self.bank.active_index() {
                self.init();
            }
        }
        Ok(())
    }

    /// Make slot `index` active and start over from it.
    pub fn select_profile(&mut self, index: usize) -> Result<(), PidError> {
        self.bank.select(index)?;
        info!(
            "Selected PID profile {} '{}'",
            index,
            self.bank.active().name
        );
        self.init();
        self.reset_iterm();
        Ok(())
    }

    /// Replace one profile slot, re-initialising if it is the active one.
    pub fn set_profile(&mut self, index: usize, profile: PidProfile) -> Result<(), PidError> {
        self.bank.set_profile(index, profile)?;
        if index == self.bank.active_index() {
            self.init();
        }
        Ok(())
    }

    pub fn set_acro_trainer_state(&mut self, enabled: bool) {
        self.acro_trainer.set_state(enabled);
    }

    /// Install the lowpass on the feedforward setpoint derivative.
    pub fn init_setpoint_derivative_lpf(
        &mut self,
        cutoff_hz: u16,
        debug_axis: Axis,
        filter_type: FilterType,
    ) {
        self.setpoint_derivative_lpf = Some((cutoff_hz, debug_axis, filter_type));
        self.shaper.init_derivative_lpf(cutoff_hz, debug_axis, filter_type);
    }

    /// Retune the feedforward setpoint derivative lowpass.
    pub fn update_setpoint_derivative_lpf(&mut self, cutoff_hz: u16) {
        if let Some(lpf) = self.setpoint_derivative_lpf.as_mut() {
            lpf.0 = cutoff_hz;
        }
        self.shaper.update_derivative_lpf(cutoff_hz);
    }

    /// Supply the rate-curve maximum of each axis, in deg/s.
    pub fn set_max_setpoint_rates(&mut self, max_rates: [f32; XYZ_AXIS_COUNT]) {
        self.max_setpoint_rates = max_rates;
        self.shaper.set_max_rates(max_rates);
    }

    /// Move the dynamic D-term lowpass to the cutoff for `throttle`.
    pub fn update_dynamic_dterm_lpf(&mut self, throttle: f32) {
        self.filters.update_dynamic(throttle);
    }

    /// Rotate the integrators and the absolute error by a body rotation.
    ///
    /// # Arguments
    ///
    /// * `rotation` - Rotation since the last tick as an axis-angle vector in radians
    ///
    /// # Notes
    ///
    /// Integrators only rotate when `iterm_rotation` is enabled in the
    /// profile. The absolute error rotates whenever absolute control is on.
    pub fn rotate_iterm_and_axis_error(&mut self, rotation: &Vector3<f32>) {
        if self.iterm_rotation {
            let iterm = Vector3::new(self.axes[0].iterm, self.axes[1].iterm, self.axes[2].iterm);
            let rotated = rotate_vector(&iterm, rotation);
            for (state, value) in self.axes.iter_mut().zip(rotated.iter()) {
                state.iterm = *value;
            }
        }
        if self.governor.abs_control_enabled() {
            self.governor.rotate_axis_error(rotation);
        }
    }

    /// Run one control tick.
    ///
    /// # Arguments
    ///
    /// * `input` - Sensor samples, setpoints and modes for this tick
    ///
    /// # Returns
    ///
    /// The per-axis outputs, also available from [`PidController::outputs`]
    ///
    /// # Notes
    ///
    /// Never fails. Non-finite gyro and setpoint samples hold the last finite
    /// value, and any term that still comes out non-finite counts as zero.
    pub fn tick(&mut self, input: &TickInput) -> &[AxisOutput; XYZ_AXIS_COUNT] {
        let throttle = if input.throttle.is_finite() {
            input.throttle.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.update_dynamic_dterm_lpf(throttle);
        self.tail.update_collective(input.collective_deflection);
        self.rescue_command = self.rescue.update(input.modes.rescue, input.time_us);

        let mut gyro = [0.0; XYZ_AXIS_COUNT];
        for (i, rate) in gyro.iter_mut().enumerate() {
            if input.gyro_rate[i].is_finite() {
                self.axes[i].gyro_rate = input.gyro_rate[i];
            }
            if input.setpoint[i].is_finite() {
                self.axes[i].setpoint = input.setpoint[i];
            }
            *rate = self.axes[i].gyro_rate;
        }
        let deflection = input.stick_deflection.map(finite_or_zero);
        let attitude = input.attitude.map(finite_or_zero);
        let trim = input.angle_trim.map(finite_or_zero);

        if self.iterm_rotation || self.governor.abs_control_enabled() {
            let rotation = Vector3::new(gyro[0], gyro[1], gyro[2]) * (self.dt * DEG_TO_RAD);
            self.rotate_iterm_and_axis_error(&rotation);
        }

        let rescuing = self.rescue_command.phase != RescuePhase::Inactive;
        let level_mode = if rescuing {
            None
        } else {
            input.modes.level_mode()
        };
        if level_mode == Some(LevelMode::Horizon) {
            self.horizon_level_strength =
                calc_horizon_level_strength(&self.level, deflection[0], deflection[1], attitude);
        }
        let trainer_engaged = self.acro_trainer.is_engaged(input.modes.is_rate_mode());

        let rx_interval = input.rx_interval_us as f32 * 1e-6;
        let ff_transition = if self.ff_transition_inverse > 0.0 {
            ((1.0 - throttle) * self.ff_transition_inverse).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let windup_frozen =
            self.iterm_windup_point < 1.0 && input.motor_mix_range > self.iterm_windup_point;
        let cyclic_deflection = (deflection[0] * deflection[0] + deflection[1] * deflection[1]).sqrt();
        let thrust_scale = if throttle > 0.0 {
            let scale = self.thrust.apply(throttle) / throttle;
            if scale.is_finite() {
                scale
            } else {
                1.0
            }
        } else {
            1.0
        };

        for axis in Axis::ALL {
            let i = axis.index();
            let gyro_rate = gyro[i];
            let coefficients = self.coefficients[i];
            let mut setpoint = self.accel_limiter.apply(axis, self.axes[i].setpoint);
            let mut angle = 0.0;
            let mut acro_trainer = AcroTrainerOutcome::default();

            // Leveled axes fly attitude, not stick rate
            let mut leveled = false;
            if levels_axis(axis) {
                angle = attitude[i] - trim[i];
                if let Some(target) = self.rescue_command.phase.target_attitude(attitude[0]) {
                    setpoint = (target[i] - attitude[i]) * self.level.level_gain;
                    leveled = true;
                } else if let Some(mode) = level_mode {
                    setpoint = pid_level(
                        &self.level,
                        mode,
                        deflection[i],
                        attitude[i],
                        trim[i],
                        setpoint,
                        self.horizon_level_strength,
                    );
                    leveled = mode == LevelMode::Angle;
                } else if trainer_engaged {
                    acro_trainer = self.acro_trainer.apply(axis, setpoint, angle, gyro_rate);
                    if acro_trainer.reset_iterm {
                        self.axes[i].iterm = 0.0;
                    }
                    setpoint = acro_trainer.setpoint;
                }
            }
            if axis == Axis::Pitch {
                setpoint = self.elevator.apply(setpoint, deflection[i]);
            }

            let shaped = self.shaper.apply(axis, setpoint, input.new_rc_frame, rx_interval);

            let stick_centered = deflection[i].abs() < STICK_CENTER_DEFLECTION;
            let previous_iterm = self.axes[i].iterm;
            let governed = self.governor.govern(
                axis,
                previous_iterm,
                gyro_rate,
                setpoint,
                setpoint - gyro_rate,
                input.airborne,
                stick_centered,
            );
            let error_rate = governed.setpoint - gyro_rate;

            // -----P
            let mut p = finite_or_zero(coefficients.kp * error_rate);
            if axis == Axis::Yaw {
                p = finite_or_zero(self.yaw_lowpass.apply(p));
            }

            // -----I
            let mut iterm = previous_iterm;
            if !windup_frozen {
                let step = coefficients.ki * governed.iterm_error_rate * self.dt;
                if step.is_finite() {
                    iterm += step;
                }
            }
            if self.governor.error_decay_active(stick_centered) {
                let step = coefficients.ki * self.governor.error_decay_rate() * self.dt;
                iterm = decay_toward_zero(iterm, step);
            }
            let iterm = finite_or_zero(iterm)
                .max(-self.iterm_limit)
                .min(self.iterm_limit);
            self.axes[i].iterm = iterm;

            // -----D, on measured rate only
            let dterm_rate = self.filters.apply(i, gyro_rate);
            let delta = -(dterm_rate - self.axes[i].previous_dterm_rate) * self.pid_frequency;
            self.axes[i].previous_dterm_rate = dterm_rate;
            let boost = coefficients.kf * shaped.boost * self.pid_frequency;
            let d = finite_or_zero(coefficients.kd * delta) + finite_or_zero(boost);

            // -----F
            let mut f = if leveled {
                0.0
            } else {
                let feedforward = coefficients.kf * ff_transition * shaped.delta * self.pid_frequency;
                self.shaper
                    .limit_feedforward(axis, finite_or_zero(feedforward), coefficients.kp, setpoint)
            };
            if axis == Axis::Yaw {
                f += self.tail.yaw_feedforward(cyclic_deflection);
            }
            let f = finite_or_zero(f);

            let sum_lim = finite_or_zero((p + iterm + d + f) * thrust_scale);
            let limit = self.sum_limit[i];
            self.outputs[i] = AxisOutput {
                p,
                i: iterm,
                d,
                f,
                sum: sum_lim.max(-limit).min(limit),
                sum_lim,
            };
            self.diagnostics[i] = AxisDiagnostics {
                setpoint,
                angle,
                governor: governed,
                acro_trainer,
                dterm_rate,
                boost,
                setpoint_derivative: self.shaper.filtered_setpoint_derivative(axis),
            };
        }

        #[cfg(feature = "debugging")]
        self.capture_debug(input.time_us);

        &self.outputs
    }

    pub fn axis_output(&self, axis: Axis) -> AxisOutput {
        self.outputs[axis.index()]
    }

    pub fn outputs(&self) -> &[AxisOutput; XYZ_AXIS_COUNT] {
        &self.outputs
    }

    pub fn diagnostics(&self, axis: Axis) -> &AxisDiagnostics {
        &self.diagnostics[axis.index()]
    }

    /// Loop period in seconds.
    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Loop frequency in Hz, zero for a zero period.
    pub fn pid_frequency(&self) -> f32 {
        self.pid_frequency
    }

    pub fn ff_boost_factor(&self) -> f32 {
        self.shaper.boost_factor()
    }

    pub fn ff_smooth_factor(&self) -> f32 {
        self.shaper.smooth_factor()
    }

    pub fn spike_limit_inverse(&self) -> f32 {
        self.shaper.spike_limit_inverse()
    }

    /// Setpoint the feedforward used last tick.
    pub fn previous_setpoint(&self, axis: Axis) -> f32 {
        self.shaper.previous_setpoint(axis)
    }

    pub fn collective_deflection_abs(&self) -> f32 {
        self.tail.collective_deflection_abs()
    }

    pub fn collective_deflection_abs_hpf(&self) -> f32 {
        self.tail.collective_deflection_abs_hpf()
    }

    pub fn iterm(&self, axis: Axis) -> f32 {
        self.axes[axis.index()].iterm
    }

    /// Accumulated absolute control error in degrees.
    pub fn axis_error(&self) -> Vector3<f32> {
        self.governor.axis_error()
    }

    pub fn horizon_level_strength(&self) -> f32 {
        self.horizon_level_strength
    }

    pub fn dterm_lpf_cutoff_hz(&self) -> f32 {
        self.filters.cutoff_hz()
    }

    pub fn rescue_phase(&self) -> RescuePhase {
        self.rescue_command.phase
    }

    /// Collective commanded by the rescue, zero while inactive.
    pub fn rescue_collective(&self) -> f32 {
        self.rescue_command.collective
    }

    pub fn acro_trainer(&self) -> &AcroTrainer {
        &self.acro_trainer
    }

    pub fn thrust_linearization(&self) -> &T {
        &self.thrust
    }

    pub fn profile(&self) -> &PidProfile {
        self.bank.active()
    }

    pub fn profile_bank(&self) -> &ProfileBank {
        &self.bank
    }

    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    /// Attach debug capture to this controller.
    #[cfg(feature = "debugging")]
    pub fn with_debugging(mut self, debug_config: DebugConfig) -> Self {
        self.debugger = Some(ControllerDebugger::new(debug_config));
        self
    }

    #[cfg(feature = "debugging")]
    pub fn debugger(&self) -> Option<&ControllerDebugger> {
        self.debugger.as_ref()
    }

    #[cfg(feature = "debugging")]
    fn capture_debug(&mut self, time_us: u64) {
        let Some(mode) = self.debugger.as_ref().map(|debugger| debugger.mode()) else {
            return;
        };
        let values = self.debug_values(mode, time_us);
        if let Some(debugger) = self.debugger.as_mut() {
            debugger.record(time_us, values);
        }
    }

    #[cfg(feature = "debugging")]
    fn debug_values(&self, mode: DebugMode, time_us: u64) -> [f32; 4] {
        let roll = &self.diagnostics[Axis::Roll.index()];
        let axis_error = self.governor.axis_error();
        match mode {
            DebugMode::ItermRelax => [
                roll.governor.setpoint_hpf,
                roll.governor.relax_factor * 100.0,
                roll.governor.iterm_error_rate,
                axis_error[0],
            ],
            DebugMode::AcroTrainer => {
                let axis = &self.diagnostics[self.acro_trainer.debug_axis().index()];
                [
                    axis.angle * 10.0,
                    axis.acro_trainer.axis_state as f32,
                    axis.setpoint,
                    axis.acro_trainer.projected_angle * 10.0,
                ]
            }
            DebugMode::AcCorrection => [
                self.diagnostics[0].governor.ac_correction,
                self.diagnostics[1].governor.ac_correction,
                self.diagnostics[2].governor.ac_correction,
                0.0,
            ],
            DebugMode::AcError => [axis_error[0], axis_error[1], axis_error[2], 0.0],
            DebugMode::DtermLpf => [
                self.filters.cutoff_hz(),
                roll.dterm_rate,
                self.outputs[0].d,
                self.outputs[1].d,
            ],
            DebugMode::FeedForward => {
                let axis = self.shaper.derivative_lpf_debug_axis().unwrap_or(Axis::Roll);
                let diagnostics = &self.diagnostics[axis.index()];
                [
                    diagnostics.setpoint,
                    diagnostics.setpoint_derivative,
                    self.outputs[axis.index()].f,
                    diagnostics.boost,
                ]
            }
            DebugMode::Rescue => [
                self.rescue_command.phase as u8 as f32,
                self.rescue_command.collective,
                self.rescue.elapsed_us(time_us) as f32 / 1000.0,
                roll.angle,
            ],
        }
    }
}

/// Thread-safe handle around a [`PidController`].
///
/// Profile copy, selection and iterm reset lock the controller, so they
/// always land between two ticks.
pub struct SharedPidController {
    controller: Arc<Mutex<PidController>>,
}

impl Clone for SharedPidController {
    fn clone(&self) -> Self {
        SharedPidController {
            controller: Arc::clone(&self.controller),
        }
    }
}

impl SharedPidController {
    pub fn new(
        profile: PidProfile,
        config: PidConfig,
        gyro_sample_period_us: u32,
    ) -> Result<Self, PidError> {
        Ok(Self::from_controller(PidController::new(
            profile,
            config,
            gyro_sample_period_us,
        )?))
    }

    pub fn from_controller(controller: PidController) -> Self {
        SharedPidController {
            controller: Arc::new(Mutex::new(controller)),
        }
    }

    /// Run one control tick and return a copy of the outputs
    pub fn tick(&self, input: &TickInput) -> Result<[AxisOutput; XYZ_AXIS_COUNT], PidError> {
        let mut controller = self
            .controller
            .lock()
            .map_err(|_| PidError::MutexPoisoned)?;
        Ok(*controller.tick(input))
    }

    pub fn outputs(&self) -> Result<[AxisOutput; XYZ_AXIS_COUNT], PidError> {
        let controller = self
            .controller
            .lock()
            .map_err(|_| PidError::MutexPoisoned)?;
        Ok(*controller.outputs())
    }

    pub fn reset_iterm(&self) -> Result<(), PidError> {
        let mut controller = self
            .controller
            .lock()
            .map_err(|_| PidError::MutexPoisoned)?;
        controller.reset_iterm();
        Ok(())
    }

    pub fn copy_profile(&self, dst: usize, src: usize) -> Result<(), PidError> {
        let mut controller = self
            .controller
            .lock()
            .map_err(|_| PidError::MutexPoisoned)?;
        controller.copy_profile(dst, src)
    }

    pub fn select_profile(&self, index: usize) -> Result<(), PidError> {
        let mut controller = self
            .controller
            .lock()
            .map_err(|_| PidError::MutexPoisoned)?;
        controller.select_profile(index)
    }

    pub fn set_profile(&self, index: usize, profile: PidProfile) -> Result<(), PidError> {
        let mut controller = self
            .controller
            .lock()
            .map_err(|_| PidError::MutexPoisoned)?;
        controller.set_profile(index, profile)
    }

    pub fn set_acro_trainer_state(&self, enabled: bool) -> Result<(), PidError> {
        let mut controller = self
            .controller
            .lock()
            .map_err(|_| PidError::MutexPoisoned)?;
        controller.set_acro_trainer_state(enabled);
        Ok(())
    }

    /// Copy of the active profile
    pub fn active_profile(&self) -> Result<PidProfile, PidError> {
        let controller = self
            .controller
            .lock()
            .map_err(|_| PidError::MutexPoisoned)?;
        Ok(controller.profile().clone())
    }

    pub fn rescue_phase(&self) -> Result<RescuePhase, PidError> {
        let controller = self
            .controller
            .lock()
            .map_err(|_| PidError::MutexPoisoned)?;
        Ok(controller.rescue_phase())
    }

    /// Attach debug capture to the shared controller
    #[cfg(feature = "debugging")]
    pub fn with_debugging(self, debug_config: DebugConfig) -> Result<Self, PidError> {
        {
            let mut controller = self
                .controller
                .lock()
                .map_err(|_| PidError::MutexPoisoned)?;
            controller.debugger = Some(ControllerDebugger::new(debug_config));
        }
        Ok(self)
    }

    #[cfg(feature = "debugging")]
    pub fn latest_debug_frame(&self) -> Result<Option<crate::debug::DebugFrame>, PidError> {
        let controller = self
            .controller
            .lock()
            .map_err(|_| PidError::MutexPoisoned)?;
        Ok(controller
            .debugger()
            .and_then(|debugger| debugger.latest().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::PidIndex;
    use crate::profile::Pidf;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::thread;

    const PERIOD_US: u32 = 125;
    const DT: f32 = 0.000125;

    fn controller(profile: PidProfile) -> PidController {
        PidController::new(profile, PidConfig::default(), PERIOD_US).unwrap()
    }

    fn run(controller: &mut PidController, input: &mut TickInput, ticks: usize) {
        for _ in 0..ticks {
            controller.tick(input);
            input.time_us += PERIOD_US as u64;
        }
    }

    #[test]
    fn test_loop_timing() {
        let controller = controller(PidProfile::default());
        assert!((controller.dt() - DT).abs() < 1e-9);
        assert!((controller.pid_frequency() - 8000.0).abs() < 0.1);

        let config = PidConfig::new().with_pid_process_denom(2);
        let controller = PidController::new(PidProfile::default(), config, PERIOD_US).unwrap();
        assert!((controller.pid_frequency() - 4000.0).abs() < 0.1);

        let config = PidConfig::new().with_pid_process_denom(0);
        assert!(PidController::new(PidProfile::default(), config, PERIOD_US).is_err());
    }

    #[test]
    fn test_sum_never_exceeds_limits() {
        let profile = PidProfile::new()
            .with_pid(PidIndex::Roll, Pidf::new(255, 255, 255, 2000))
            .with_pid(PidIndex::Pitch, Pidf::new(255, 255, 255, 2000))
            .with_pid(PidIndex::Yaw, Pidf::new(255, 255, 255, 2000))
            .with_pid_sum_limits(300, 200)
            .with_abs_control(20, 90, 20, 11)
            .with_iterm_rotation(true)
            .with_thrust_linearization(60)
            .with_tail_feedforward(500, 500, 500, 200, 50)
            .with_elevator_filter(150, 100, 20, 20)
            .with_error_decay(false, 20);
        let mut controller = controller(profile);
        controller.set_acro_trainer_state(true);

        let mut rng = StdRng::seed_from_u64(42);
        let mut input = TickInput::default();
        for tick in 0..5000u32 {
            input.time_us += PERIOD_US as u64;
            input.gyro_rate = [
                rng.gen_range(-3000.0..3000.0),
                rng.gen_range(-3000.0..3000.0),
                rng.gen_range(-3000.0..3000.0),
            ];
            if tick % 97 == 0 {
                input.gyro_rate[tick as usize % 3] = f32::NAN;
            }
            input.setpoint = [
                rng.gen_range(-2000.0..2000.0),
                rng.gen_range(-2000.0..2000.0),
                rng.gen_range(-2000.0..2000.0),
            ];
            input.stick_deflection = [
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            ];
            input.attitude = [rng.gen_range(-180.0..180.0), rng.gen_range(-90.0..90.0)];
            input.collective_deflection = rng.gen_range(-1.0..1.0);
            input.throttle = rng.gen_range(0.0..1.0);
            input.motor_mix_range = rng.gen_range(0.0..1.2);
            input.new_rc_frame = rng.gen_bool(0.1);
            input.rx_interval_us = rng.gen_range(2000..20000);
            input.airborne = rng.gen_bool(0.9);
            input.modes = FlightModes {
                angle: rng.gen_bool(0.2),
                horizon: rng.gen_bool(0.2),
                rescue: rng.gen_bool(0.05),
            };

            let outputs = *controller.tick(&input);
            for (axis, output) in outputs.iter().enumerate() {
                let limit = if axis == 2 { 200.0 } else { 300.0 };
                assert!(
                    output.sum.abs() <= limit,
                    "tick {} axis {}: sum {} over limit {}",
                    tick,
                    axis,
                    output.sum,
                    limit
                );
                assert!(output.i.abs() <= 400.0);
                for term in [output.p, output.i, output.d, output.f, output.sum, output.sum_lim] {
                    assert!(term.is_finite(), "tick {} axis {}: {:?}", tick, axis, output);
                }
            }
        }
    }

    #[test]
    fn test_constant_error_integrates() {
        let mut controller = controller(PidProfile::default());
        let mut input = TickInput {
            gyro_rate: [-10.0, 0.0, 0.0],
            airborne: true,
            ..Default::default()
        };
        run(&mut controller, &mut input, 1000);

        let roll = controller.axis_output(Axis::Roll);
        let expected_i = ITERM_SCALE[0] * 85.0 * 10.0 * 1000.0 * DT;
        println!("roll after 1000 ticks: {:?}, expected I {}", roll, expected_i);
        assert!((roll.i - expected_i).abs() < 1e-3);
        assert!((roll.p - PTERM_SCALE[0] * 42.0 * 10.0).abs() < 1e-4);
        // Gyro is steady, D has settled
        assert!(roll.d.abs() < 1e-3);
        assert_eq!(roll.f, 0.0);

        // Other axes see no error
        assert_eq!(controller.axis_output(Axis::Pitch).i, 0.0);
        assert_eq!(controller.axis_output(Axis::Yaw).sum, 0.0);
    }

    #[test]
    fn test_closed_loop_rate_settles() {
        // Pure integrator airframe: rate' = sum * authority
        const AUTHORITY: f32 = 600.0;
        let mut controller = controller(PidProfile::default());
        let mut rate = 0.0f32;
        let mut input = TickInput {
            setpoint: [100.0, 0.0, 0.0],
            airborne: true,
            ..Default::default()
        };

        let mut peak = 0.0f32;
        for step in 0..4000 {
            input.gyro_rate = [rate, 0.0, 0.0];
            let roll = controller.tick(&input)[0];
            assert!(roll.sum.abs() <= 500.0);
            rate += roll.sum * AUTHORITY * DT;
            input.time_us += PERIOD_US as u64;
            if step > 3000 {
                peak = peak.max((rate - 100.0).abs());
            }
        }

        println!("final roll rate {:.3}, late peak error {:.3}", rate, peak);
        assert!((rate - 100.0).abs() < 2.0);
        assert!(peak < 5.0, "rate should not oscillate late in the run");
    }

    #[test]
    fn test_windup_freezes_integration() {
        let mut controller = controller(PidProfile::default().with_iterm_windup(50));
        let mut input = TickInput {
            gyro_rate: [-10.0, 0.0, 0.0],
            motor_mix_range: 0.8,
            ..Default::default()
        };
        run(&mut controller, &mut input, 100);
        assert_eq!(controller.iterm(Axis::Roll), 0.0, "integration must be frozen");

        input.motor_mix_range = 0.3;
        run(&mut controller, &mut input, 100);
        assert!(controller.iterm(Axis::Roll) > 0.0);
    }

    #[test]
    fn test_error_decay_shrinks_integrators() {
        let mut controller = controller(PidProfile::default().with_error_decay(true, 50));
        controller.axes[0].iterm = 10.0;
        controller.axes[1].iterm = -10.0;

        let mut input = TickInput::default();
        let mut previous = [10.0f32, 10.0f32];
        for _ in 0..1000 {
            controller.tick(&input);
            input.time_us += PERIOD_US as u64;
            for (axis, last) in previous.iter_mut().enumerate() {
                let magnitude = controller.axes[axis].iterm.abs();
                assert!(magnitude <= *last, "integrator grew on axis {}", axis);
                *last = magnitude;
            }
        }
        assert_eq!(controller.iterm(Axis::Roll), 0.0);
        assert_eq!(controller.iterm(Axis::Pitch), 0.0);
    }

    #[test]
    fn test_iterm_rotation() {
        let mut controller = controller(PidProfile::default().with_iterm_rotation(true));
        let start = [10.0, -5.0, 3.0];
        for (state, value) in controller.axes.iter_mut().zip(start) {
            state.iterm = value;
        }

        controller.rotate_iterm_and_axis_error(&Vector3::zeros());
        for (axis, value) in start.iter().enumerate() {
            assert_eq!(controller.axes[axis].iterm, *value);
        }

        let rotation = Vector3::new(0.1, -0.2, 0.3);
        controller.rotate_iterm_and_axis_error(&rotation);
        assert!((controller.axes[0].iterm - start[0]).abs() > 0.1);

        controller.rotate_iterm_and_axis_error(&(-rotation));
        for (axis, value) in start.iter().enumerate() {
            assert!(
                (controller.axes[axis].iterm - value).abs() < 1e-4,
                "axis {}: {} != {}",
                axis,
                controller.axes[axis].iterm,
                value
            );
        }
    }

    #[test]
    fn test_iterm_rotation_disabled() {
        let mut controller = controller(PidProfile::default());
        controller.axes[0].iterm = 10.0;
        controller.rotate_iterm_and_axis_error(&Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(controller.axes[0].iterm, 10.0);
        assert_eq!(controller.axes[1].iterm, 0.0);
    }

    #[test]
    fn test_non_finite_inputs_are_absorbed() {
        let mut controller = controller(PidProfile::default());
        let mut input = TickInput {
            gyro_rate: [20.0, 0.0, 5.0],
            setpoint: [10.0, 0.0, 0.0],
            ..Default::default()
        };
        controller.tick(&input);

        input.gyro_rate = [f32::NAN, f32::INFINITY, f32::NEG_INFINITY];
        input.setpoint[2] = f32::NAN;
        input.throttle = f32::NAN;
        input.attitude = [f32::NAN, 0.0];
        for output in controller.tick(&input) {
            assert!(output.sum.is_finite() && output.sum_lim.is_finite());
        }

        input.gyro_rate = [0.0, 0.0, 0.0];
        input.setpoint = [50.0, 0.0, 0.0];
        for output in controller.tick(&input) {
            assert!(output.p.is_finite() && output.d.is_finite() && output.sum.is_finite());
        }
    }

    #[test]
    fn test_zero_period_disables_frequency_terms() {
        let mut controller =
            PidController::new(PidProfile::default(), PidConfig::default(), 0).unwrap();
        assert_eq!(controller.dt(), 0.0);
        assert_eq!(controller.pid_frequency(), 0.0);

        let input = TickInput {
            gyro_rate: [50.0, 0.0, 0.0],
            setpoint: [100.0, 0.0, 0.0],
            new_rc_frame: true,
            ..Default::default()
        };
        let roll = controller.tick(&input)[0];
        assert!(roll.p > 0.0);
        assert_eq!(roll.d, 0.0);
        assert_eq!(roll.f, 0.0);
        assert_eq!(roll.i, 0.0);
    }

    #[test]
    fn test_copy_and_select_profile() {
        let mut controller = controller(PidProfile::default());
        let aggressive = PidProfile::new()
            .with_name("AGGRO")
            .with_pid(PidIndex::Roll, Pidf::new(80, 90, 40, 0));
        controller.set_profile(1, aggressive).unwrap();
        assert_eq!(controller.profile().name, "");

        controller.copy_profile(0, 1).unwrap();
        assert_eq!(controller.profile().name, "AGGRO");

        let input = TickInput {
            setpoint: [100.0, 0.0, 0.0],
            ..Default::default()
        };
        let roll = controller.tick(&input)[0];
        assert!((roll.p - PTERM_SCALE[0] * 80.0 * 100.0).abs() < 1e-3);

        assert_eq!(
            controller.copy_profile(5, 0),
            Err(PidError::ProfileIndexOutOfRange { index: 5, count: 3 })
        );
        controller.select_profile(2).unwrap();
        assert_eq!(controller.profile_bank().active_index(), 2);
        assert_eq!(controller.iterm(Axis::Roll), 0.0);
        assert!(controller.select_profile(3).is_err());
    }

    #[test]
    fn test_angle_mode_levels() {
        let mut controller = controller(PidProfile::default());
        let input = TickInput {
            attitude: [10.0, 0.0],
            modes: FlightModes {
                angle: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let roll = controller.tick(&input)[0];
        assert!(roll.p < 0.0);
        assert!(roll.sum < 0.0);
        assert_eq!(roll.f, 0.0);
        assert!((controller.diagnostics(Axis::Roll).setpoint + 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_horizon_mode_updates_strength() {
        let mut controller = controller(PidProfile::default());
        let input = TickInput {
            modes: FlightModes {
                horizon: true,
                ..Default::default()
            },
            ..Default::default()
        };
        controller.tick(&input);
        assert_eq!(controller.horizon_level_strength(), 1.0);
    }

    #[test]
    fn test_rescue_rolls_upright() {
        let mut controller = controller(PidProfile::default().with_rescue(30, 10, 0));
        let input = TickInput {
            attitude: [170.0, 0.0],
            modes: FlightModes {
                rescue: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let roll = controller.tick(&input)[0];
        assert_eq!(controller.rescue_phase(), RescuePhase::RollToUpright);
        assert!((controller.rescue_collective() - 300.0).abs() < 1e-3);
        assert!(roll.p < 0.0);
    }

    #[test]
    fn test_rescue_holds_inverted() {
        let mut controller = controller(PidProfile::default());
        let mut input = TickInput {
            attitude: [170.0, 0.0],
            modes: FlightModes {
                rescue: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let roll = controller.tick(&input)[0];
        assert_eq!(controller.rescue_phase(), RescuePhase::InvertedHold);
        assert!((controller.rescue_collective() + 400.0).abs() < 1e-3);
        // Target is 180 degrees, 10 more to go
        assert!(roll.p > 0.0);

        input.modes.rescue = false;
        controller.tick(&input);
        assert_eq!(controller.rescue_phase(), RescuePhase::Inactive);
        assert_eq!(controller.rescue_collective(), 0.0);
    }

    #[test]
    fn test_acro_trainer_limits_angle() {
        let mut controller = controller(PidProfile::default());
        controller.set_acro_trainer_state(true);
        controller.axes[0].iterm = 5.0;

        let input = TickInput {
            attitude: [25.0, 0.0],
            setpoint: [100.0, 0.0, 0.0],
            ..Default::default()
        };
        let roll = controller.tick(&input)[0];
        assert!(roll.p < 0.0);
        assert!(roll.i.abs() < 0.1, "trainer should restart the integrator");
        assert_eq!(controller.diagnostics(Axis::Roll).acro_trainer.axis_state, 1);

        // Leveling modes disengage it
        let mut controller = self::controller(PidProfile::default());
        controller.set_acro_trainer_state(true);
        let input = TickInput {
            modes: FlightModes {
                horizon: true,
                ..Default::default()
            },
            ..input
        };
        controller.tick(&input);
        assert_eq!(controller.diagnostics(Axis::Roll).acro_trainer.axis_state, 0);
    }

    #[test]
    fn test_tail_feedforward_on_yaw() {
        let mut controller =
            controller(PidProfile::default().with_tail_feedforward(0, 0, 0, 100, 0));
        let input = TickInput {
            collective_deflection: -0.4,
            ..Default::default()
        };
        let yaw = controller.tick(&input)[2];
        assert!((yaw.f - 10.0).abs() < 1e-4);
        assert!((controller.collective_deflection_abs() - 0.4).abs() < 1e-6);
        assert!(controller.collective_deflection_abs_hpf() > 0.0);
    }

    #[test]
    fn test_dynamic_lowpass_follows_throttle() {
        let mut controller = controller(PidProfile::default());
        assert_eq!(controller.dterm_lpf_cutoff_hz(), 70.0);
        let input = TickInput {
            throttle: 1.0,
            ..Default::default()
        };
        controller.tick(&input);
        assert!((controller.dterm_lpf_cutoff_hz() - 170.0).abs() < 1e-3);
    }

    #[test]
    fn test_dynamic_lowpass_past_nyquist_keeps_dterm() {
        // 1kHz loop with a dynamic max above the 500Hz Nyquist limit
        let profile = PidProfile::default()
            .with_dterm_lowpass(FilterType::Biquad, 70)
            .with_dyn_lpf(70, 600, 0);
        let config = PidConfig::default().with_pid_process_denom(8);
        let mut controller = PidController::new(profile, config, PERIOD_US).unwrap();

        let mut input = TickInput {
            throttle: 1.0,
            airborne: true,
            ..Default::default()
        };
        for step in 0..2000 {
            input.gyro_rate = [(step as f32 * 0.3).sin() * 50.0, 0.0, 0.0];
            controller.tick(&input);
            assert!(controller.diagnostics(Axis::Roll).dterm_rate.is_finite());
        }
        assert!(controller.dterm_lpf_cutoff_hz() < 500.0);

        input.throttle = 0.0;
        for step in 0..2000 {
            input.gyro_rate = [(step as f32 * 0.3).sin() * 50.0, 0.0, 0.0];
            controller.tick(&input);
        }
        assert!((controller.dterm_lpf_cutoff_hz() - 70.0).abs() < 1e-3);
        assert!(controller.diagnostics(Axis::Roll).dterm_rate.is_finite());
        assert!(controller.axis_output(Axis::Roll).d != 0.0);
    }

    #[test]
    fn test_feedforward_getters() {
        let controller = controller(PidProfile::default());
        assert!((controller.ff_boost_factor() - 0.15).abs() < 1e-6);
        assert!((controller.ff_smooth_factor() - 0.63).abs() < 1e-6);
        assert!((controller.spike_limit_inverse() - 1.0 / 60.0).abs() < 1e-6);
        assert_eq!(controller.previous_setpoint(Axis::Yaw), 0.0);
    }

    #[test]
    fn test_setpoint_derivative_lpf_lifecycle() {
        let mut controller = controller(PidProfile::default());
        controller.init_setpoint_derivative_lpf(100, Axis::Pitch, FilterType::Pt1);
        controller.update_setpoint_derivative_lpf(50);
        // Survives a re-init with the retuned cutoff
        controller.init();
        assert_eq!(controller.setpoint_derivative_lpf, Some((50, Axis::Pitch, FilterType::Pt1)));
        assert_eq!(controller.shaper.derivative_lpf_debug_axis(), Some(Axis::Pitch));
    }

    #[cfg(feature = "thrust-linearization")]
    #[test]
    fn test_thrust_linearization_scales_sums() {
        let mut plain = controller(PidProfile::default());
        let mut linearized = controller(PidProfile::default().with_thrust_linearization(40));
        let input = TickInput {
            setpoint: [100.0, 0.0, 0.0],
            throttle: 0.25,
            ..Default::default()
        };
        let plain_roll = plain.tick(&input)[0];
        let linearized_roll = linearized.tick(&input)[0];
        let expected = linearized.thrust_linearization().apply(0.25) / 0.25;
        assert!(expected > 1.0);
        assert!((linearized_roll.sum_lim / plain_roll.sum_lim - expected).abs() < 1e-3);
    }

    #[test]
    fn test_shared_controller() {
        let controller =
            SharedPidController::new(PidProfile::default(), PidConfig::default(), PERIOD_US)
                .unwrap();
        let ticker = controller.clone();

        let handle = thread::spawn(move || {
            let mut input = TickInput {
                setpoint: [50.0, -20.0, 10.0],
                ..Default::default()
            };
            for _ in 0..200 {
                let outputs = ticker.tick(&input).unwrap();
                assert!(outputs.iter().all(|output| output.sum.is_finite()));
                input.time_us += PERIOD_US as u64;
            }
        });

        controller
            .set_profile(1, PidProfile::new().with_name("SMOOTH"))
            .unwrap();
        controller.copy_profile(0, 1).unwrap();
        controller.reset_iterm().unwrap();
        handle.join().unwrap();

        assert_eq!(controller.active_profile().unwrap().name, "SMOOTH");
        assert_eq!(
            controller.copy_profile(9, 0),
            Err(PidError::ProfileIndexOutOfRange { index: 9, count: 3 })
        );
        assert_eq!(controller.rescue_phase().unwrap(), RescuePhase::Inactive);
    }

    #[cfg(feature = "debugging")]
    #[test]
    fn test_debug_capture() {
        let mut controller = controller(PidProfile::default()).with_debugging(DebugConfig {
            mode: DebugMode::DtermLpf,
            ..Default::default()
        });
        let input = TickInput {
            throttle: 1.0,
            ..Default::default()
        };
        controller.tick(&input);
        let frame = controller
            .debugger()
            .and_then(|debugger| debugger.latest())
            .expect("frame captured");
        assert!((frame.values[0] - 170.0).abs() < 1e-3);
    }
}
