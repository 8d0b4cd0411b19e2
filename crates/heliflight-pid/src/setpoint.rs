// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Setpoint shaping for the feedforward path.
//!
//! Each tick the shaper turns the axis setpoint into a per-tick setpoint
//! delta. With interpolation enabled the delta is taken against a setpoint
//! extrapolated between RC frames, which removes the staircase a 50-500Hz
//! radio link leaves in a 1-8kHz loop.

use log::debug;

use crate::axis::{Axis, XYZ_AXIS_COUNT};
use crate::filter::FilterStage;
use crate::profile::{FfInterpolation, FilterType, PidProfile};

/// Max rate of an axis before any rate curve is supplied, in deg/s.
pub const DEFAULT_MAX_SETPOINT_RATE: f32 = 670.0;

/// Boost is held off within this fraction of the axis max rate.
const FF_BOOST_MAX_RATE_FRACTION: f32 = 0.95;

const FF_HISTORY_LEN: usize = 4;

/// Output of the shaper for one axis and tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShapedSetpoint {
    /// Setpoint change this tick, in deg/s
    pub delta: f32,
    /// High-passed feedforward boost, in the same units as `delta`
    pub boost: f32,
}

#[derive(Debug, Clone, Default)]
struct AxisShaper {
    previous_setpoint: f32,

    // Interpolation
    frame_setpoint: f32,
    frame_speed: f32,
    since_frame: f32,
    horizon: f32,
    predicted: f32,
    history: [f32; FF_HISTORY_LEN],
    history_pos: usize,

    previous_delta: f32,
    smoothed_delta: f32,
    filtered_derivative: f32,
}

#[derive(Debug, Clone)]
struct DerivativeLpf {
    stages: [FilterStage; XYZ_AXIS_COUNT],
    filter_type: FilterType,
    debug_axis: Axis,
}

/// Per-axis feedforward shaper.
#[derive(Debug, Clone)]
pub struct SetpointShaper {
    dt: f32,
    interpolation: FfInterpolation,
    smooth_factor: f32,
    boost_factor: f32,
    spike_limit_inverse: f32,
    lookahead: f32,
    max_rate_limit_percent: f32,
    max_rate: [f32; XYZ_AXIS_COUNT],
    axes: [AxisShaper; XYZ_AXIS_COUNT],
    derivative_lpf: Option<DerivativeLpf>,
}

impl SetpointShaper {
    pub fn new(profile: &PidProfile, dt: f32) -> Self {
        let spike_limit_inverse = if profile.ff_spike_limit > 0 {
            1.0 / profile.ff_spike_limit as f32
        } else {
            0.0
        };

        SetpointShaper {
            dt,
            interpolation: profile.ff_interpolate_sp,
            smooth_factor: 1.0 - profile.ff_smooth_factor as f32 / 100.0,
            boost_factor: profile.ff_boost as f32 / 100.0,
            spike_limit_inverse,
            lookahead: profile.ff_spike_limit as f32 / 1000.0,
            max_rate_limit_percent: profile.ff_max_rate_limit as f32 / 100.0,
            max_rate: [DEFAULT_MAX_SETPOINT_RATE; XYZ_AXIS_COUNT],
            axes: Default::default(),
            derivative_lpf: None,
        }
    }

    /// Supply the rate-curve maximum of each axis, in deg/s.
    pub fn set_max_rates(&mut self, max_rates: [f32; XYZ_AXIS_COUNT]) {
        self.max_rate = max_rates;
    }

    /// Install the setpoint derivative lowpass.
    ///
    /// # Arguments
    ///
    /// * `cutoff_hz` - Cutoff in Hz, 0 leaves the derivative unfiltered
    /// * `debug_axis` - Axis reported by the feedforward debug capture
    /// * `filter_type` - PT1 or biquad lowpass
    pub fn init_derivative_lpf(&mut self, cutoff_hz: u16, debug_axis: Axis, filter_type: FilterType) {
        let stages = std::array::from_fn(|_| FilterStage::new(filter_type, cutoff_hz as f32, self.dt));
        debug!(
            "Setpoint derivative lowpass {:?} at {}Hz, debug axis {}",
            filter_type,
            cutoff_hz,
            debug_axis.name()
        );
        self.derivative_lpf = Some(DerivativeLpf {
            stages,
            filter_type,
            debug_axis,
        });
    }

    /// Retune the setpoint derivative lowpass without clearing its memory.
    ///
    /// Does nothing until [`SetpointShaper::init_derivative_lpf`] ran. Notch
    /// stages, stages disabled by a zero cutoff and cutoffs at or above
    /// Nyquist go through a full rebuild instead.
    pub fn update_derivative_lpf(&mut self, cutoff_hz: u16) {
        let dt = self.dt;
        let below_nyquist = dt.is_finite() && dt > 0.0 && (cutoff_hz as f32) < 0.5 / dt;
        if let Some(lpf) = self.derivative_lpf.as_mut() {
            let retunable = lpf.filter_type != FilterType::Notch && cutoff_hz > 0 && below_nyquist;
            for stage in lpf.stages.iter_mut() {
                if stage.is_enabled() && retunable {
                    stage.retune_lowpass(cutoff_hz as f32, dt);
                } else {
                    *stage = FilterStage::new(lpf.filter_type, cutoff_hz as f32, dt);
                }
            }
        }
    }

    pub fn derivative_lpf_debug_axis(&self) -> Option<Axis> {
        self.derivative_lpf.as_ref().map(|lpf| lpf.debug_axis)
    }

    /// Shape one axis for this tick.
    ///
    /// # Arguments
    ///
    /// * `axis` - Axis being shaped
    /// * `setpoint` - Current setpoint in deg/s
    /// * `new_rc_frame` - Whether a fresh RC frame arrived since the last tick
    /// * `rx_interval` - Seconds between RC frames
    ///
    /// # Returns
    ///
    /// The setpoint delta for the feedforward term and the boost for the D term
    pub fn apply(
        &mut self,
        axis: Axis,
        setpoint: f32,
        new_rc_frame: bool,
        rx_interval: f32,
    ) -> ShapedSetpoint {
        let dt = self.dt;
        let lookahead = self.lookahead;
        let interpolation = self.interpolation;
        let state = &mut self.axes[axis.index()];

        let raw_delta = setpoint - state.previous_setpoint;
        state.previous_setpoint = setpoint;

        let mut delta = if interpolation == FfInterpolation::Off {
            raw_delta
        } else {
            if new_rc_frame {
                let interval = if rx_interval.is_finite() && rx_interval > 0.0 {
                    rx_interval
                } else {
                    dt
                };
                state.frame_speed = if interval > 0.0 {
                    (setpoint - state.frame_setpoint) / interval
                } else {
                    0.0
                };
                state.frame_setpoint = setpoint;
                state.since_frame = 0.0;
                state.horizon = if lookahead > 0.0 {
                    interval.min(lookahead)
                } else {
                    interval
                };
            } else {
                state.since_frame += dt;
            }

            let elapsed = state.since_frame.min(state.horizon);
            let predicted = state.frame_setpoint + state.frame_speed * elapsed;
            let step = predicted - state.predicted;
            state.predicted = predicted;

            state.history[state.history_pos] = step;
            state.history_pos = (state.history_pos + 1) % FF_HISTORY_LEN;
            let len = interpolation.average_len();
            (0..len)
                .map(|back| state.history[(state.history_pos + FF_HISTORY_LEN - 1 - back) % FF_HISTORY_LEN])
                .sum::<f32>()
                / len as f32
        };

        if let Some(lpf) = self.derivative_lpf.as_mut() {
            delta = lpf.stages[axis.index()].apply(delta);
        }
        state.filtered_derivative = if dt > 0.0 { delta / dt } else { 0.0 };

        let mut boost = 0.0;
        if self.boost_factor > 0.0
            && setpoint.abs() < FF_BOOST_MAX_RATE_FRACTION * self.max_rate[axis.index()]
        {
            boost = self.boost_factor * (delta - state.previous_delta);
            if self.spike_limit_inverse > 0.0 {
                let clip = 1.0 / (1.0 + boost.abs() * self.spike_limit_inverse);
                boost *= clip * clip;
            }
        }
        state.previous_delta = delta;

        state.smoothed_delta += self.smooth_factor * (delta - state.smoothed_delta);

        ShapedSetpoint {
            delta: state.smoothed_delta,
            boost,
        }
    }

    /// Bound a roll/pitch feedforward so setpoint plus feedforward stays
    /// under the configured share of the axis max rate.
    pub fn limit_feedforward(&self, axis: Axis, value: f32, kp: f32, setpoint: f32) -> f32 {
        let limit = self.max_rate[axis.index()] * self.max_rate_limit_percent;
        if axis == Axis::Yaw || limit <= 0.0 {
            return value;
        }
        if setpoint.abs() <= limit {
            value.max((-limit - setpoint) * kp).min((limit - setpoint) * kp)
        } else {
            0.0
        }
    }

    pub fn previous_setpoint(&self, axis: Axis) -> f32 {
        self.axes[axis.index()].previous_setpoint
    }

    /// Setpoint derivative after the optional lowpass, in deg/s^2.
    pub fn filtered_setpoint_derivative(&self, axis: Axis) -> f32 {
        self.axes[axis.index()].filtered_derivative
    }

    pub fn boost_factor(&self) -> f32 {
        self.boost_factor
    }

    pub fn smooth_factor(&self) -> f32 {
        self.smooth_factor
    }

    pub fn spike_limit_inverse(&self) -> f32 {
        self.spike_limit_inverse
    }
}

/// Rate-of-change limit on the setpoint itself.
#[derive(Debug, Clone, Default)]
pub struct SetpointAccelLimiter {
    max_velocity: [f32; XYZ_AXIS_COUNT],
    previous: [f32; XYZ_AXIS_COUNT],
}

impl SetpointAccelLimiter {
    /// Limits are in units of 100 deg/s^2; zero disables an axis.
    pub fn new(profile: &PidProfile, dt: f32) -> Self {
        let roll_pitch = profile.rate_accel_limit as f32 * 100.0 * dt;
        let yaw = profile.yaw_rate_accel_limit as f32 * 100.0 * dt;
        SetpointAccelLimiter {
            max_velocity: [roll_pitch, roll_pitch, yaw],
            previous: [0.0; XYZ_AXIS_COUNT],
        }
    }

    pub fn apply(&mut self, axis: Axis, setpoint: f32) -> f32 {
        let i = axis.index();
        let max_velocity = self.max_velocity[i];
        if max_velocity.is_nan() || max_velocity <= 0.0 {
            return setpoint;
        }

        let velocity = setpoint - self.previous[i];
        let limited = if velocity.abs() > max_velocity {
            self.previous[i] + max_velocity.copysign(velocity)
        } else {
            setpoint
        };
        self.previous[i] = limited;
        limited
    }
}
