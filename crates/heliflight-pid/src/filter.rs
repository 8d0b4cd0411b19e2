// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! D-term filter bank: PT1 and biquad stages, the fixed notch and the
//! throttle-driven dynamic lowpass.

use std::f32::consts::PI;

use log::{debug, warn};

use crate::axis::XYZ_AXIS_COUNT;
use crate::profile::{FilterType, PidProfile};

/// Q of a second order Butterworth section.
pub const BIQUAD_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Dynamic cutoff changes smaller than this keep the current coefficients.
pub const DYN_LPF_CUTOFF_EPSILON_HZ: f32 = 0.1;

/// Highest cutoff a live stage is retuned to, as a fraction of the sample rate.
pub const MAX_RETUNE_CUTOFF_RATIO: f32 = 0.45;

/// PT1 gain for cutoff `f_cut` at sample period `dt`.
pub fn pt1_filter_gain(f_cut: f32, dt: f32) -> f32 {
    let rc = 1.0 / (2.0 * PI * f_cut);
    dt / (rc + dt)
}

/// Q of a notch centred on `center_hz` whose lower -3dB point is `cutoff_hz`.
pub fn notch_q(center_hz: f32, cutoff_hz: f32) -> f32 {
    center_hz * cutoff_hz / (center_hz * center_hz - cutoff_hz * cutoff_hz)
}

fn valid_period(dt: f32) -> bool {
    dt.is_finite() && dt > 0.0
}

fn retune_ceiling_hz(dt: f32) -> f32 {
    if valid_period(dt) {
        MAX_RETUNE_CUTOFF_RATIO / dt
    } else {
        0.0
    }
}

/// Cutoff of the dynamic D-term lowpass for a throttle in `[0, 1]`.
///
/// With `expo` of zero the cutoff follows `1.5 t (1 - t^2 / 3)` scaled to the
/// max and floored at the min. Otherwise the curve is
/// `t (1 - t) * expo / 10 + t` between min and max. Both are monotonic in
/// throttle and hit min at 0 and max at 1.
pub fn dyn_dterm_lpf_cutoff_freq(throttle: f32, min_hz: u16, max_hz: u16, expo: u8) -> f32 {
    let throttle = if throttle.is_finite() {
        throttle.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let min = min_hz as f32;
    let max = max_hz as f32;

    if expo > 0 {
        let expof = (expo.min(10) as f32) / 10.0;
        let curve = throttle * (1.0 - throttle) * expof + throttle;
        (max - min) * curve + min
    } else {
        let dyn_throttle = throttle * (1.0 - throttle * throttle / 3.0) * 1.5;
        (dyn_throttle * max).max(min)
    }
}

/// First order lowpass.
#[derive(Debug, Clone, PartialEq)]
pub struct Pt1Filter {
    state: f32,
    k: f32,
}

impl Pt1Filter {
    pub fn new(cutoff_hz: f32, dt: f32) -> Self {
        Pt1Filter {
            state: 0.0,
            k: pt1_filter_gain(cutoff_hz, dt),
        }
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        self.state += self.k * (input - self.state);
        self.state
    }

    /// Retune without touching the filter memory.
    pub fn update_cutoff(&mut self, cutoff_hz: f32, dt: f32) {
        self.k = pt1_filter_gain(cutoff_hz, dt);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    Lowpass,
    Notch,
}

/// Direct form 1 biquad, so it can be retuned on the fly.
#[derive(Debug, Clone, PartialEq)]
pub struct BiquadFilter {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    pub fn lowpass(cutoff_hz: f32, dt: f32) -> Self {
        Self::new(cutoff_hz, dt, BIQUAD_Q, BiquadKind::Lowpass)
    }

    pub fn notch(center_hz: f32, q: f32, dt: f32) -> Self {
        Self::new(center_hz, dt, q, BiquadKind::Notch)
    }

    fn new(hz: f32, dt: f32, q: f32, kind: BiquadKind) -> Self {
        let mut filter = BiquadFilter {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        filter.update(hz, dt, q, kind);
        filter
    }

    /// Recompute coefficients, keeping the delay line.
    pub fn update(&mut self, hz: f32, dt: f32, q: f32, kind: BiquadKind) {
        let omega = 2.0 * PI * hz * dt;
        let sn = omega.sin();
        let cs = omega.cos();
        let alpha = sn / (2.0 * q);

        let (b0, b1, b2) = match kind {
            BiquadKind::Lowpass => ((1.0 - cs) * 0.5, 1.0 - cs, (1.0 - cs) * 0.5),
            BiquadKind::Notch => (1.0, -2.0 * cs, 1.0),
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cs;
        let a2 = 1.0 - alpha;

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    pub fn update_lowpass(&mut self, cutoff_hz: f32, dt: f32) {
        self.update(cutoff_hz, dt, BIQUAD_Q, BiquadKind::Lowpass);
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        let result = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = result;

        result
    }
}

/// One stage of a filter chain. A disabled stage passes its input through.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterStage {
    PassThrough,
    Pt1(Pt1Filter),
    Biquad(BiquadFilter),
}

impl FilterStage {
    /// Build a stage of `filter_type` at `hz`.
    ///
    /// A zero cutoff, a cutoff at or above Nyquist, or an unusable sample
    /// period gives a pass-through stage.
    pub fn new(filter_type: FilterType, hz: f32, dt: f32) -> Self {
        if !valid_period(dt) || !hz.is_finite() || hz <= 0.0 || hz >= 0.5 / dt {
            return FilterStage::PassThrough;
        }
        match filter_type {
            FilterType::Pt1 => FilterStage::Pt1(Pt1Filter::new(hz, dt)),
            FilterType::Biquad => FilterStage::Biquad(BiquadFilter::lowpass(hz, dt)),
            FilterType::Notch => FilterStage::Biquad(BiquadFilter::notch(hz, BIQUAD_Q, dt)),
        }
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        match self {
            FilterStage::PassThrough => input,
            FilterStage::Pt1(filter) => filter.apply(input),
            FilterStage::Biquad(filter) => filter.apply(input),
        }
    }

    /// Move a lowpass stage to a new cutoff. Pass-through stages stay disabled.
    ///
    /// The cutoff is held at [`MAX_RETUNE_CUTOFF_RATIO`] of the sample rate.
    /// A zero, negative or non-finite cutoff leaves the stage as it was.
    pub fn retune_lowpass(&mut self, hz: f32, dt: f32) {
        if !valid_period(dt) || !hz.is_finite() || hz <= 0.0 {
            return;
        }
        let hz = hz.min(retune_ceiling_hz(dt));
        match self {
            FilterStage::PassThrough => {}
            FilterStage::Pt1(filter) => filter.update_cutoff(hz, dt),
            FilterStage::Biquad(filter) => filter.update_lowpass(hz, dt),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, FilterStage::PassThrough)
    }
}

/// Throttle range of the dynamic D-term lowpass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynLpfConfig {
    pub min_hz: u16,
    pub max_hz: u16,
    pub expo: u8,
}

/// The per-axis D-term filter chains and the shared dynamic cutoff.
#[derive(Debug, Clone)]
pub struct DtermFilterBank {
    notch: [FilterStage; XYZ_AXIS_COUNT],
    lowpass: [FilterStage; XYZ_AXIS_COUNT],
    lowpass2: [FilterStage; XYZ_AXIS_COUNT],
    dyn_lpf: Option<DynLpfConfig>,
    cutoff_hz: f32,
    dt: f32,
}

impl DtermFilterBank {
    /// Build every stage from the profile at loop period `dt`.
    pub fn from_profile(profile: &PidProfile, dt: f32) -> Self {
        let nyquist = if valid_period(dt) { 0.5 / dt } else { 0.0 };

        let mut notch_hz = profile.dterm_notch_hz as f32;
        let notch_cutoff = profile.dterm_notch_cutoff as f32;
        if notch_hz > nyquist {
            warn!(
                "D-term notch at {}Hz is above Nyquist ({}Hz), notch disabled",
                notch_hz, nyquist
            );
            notch_hz = 0.0;
        }
        let notch = std::array::from_fn(|_| {
            if notch_hz > 0.0 && notch_cutoff > 0.0 && notch_cutoff < notch_hz && valid_period(dt) {
                FilterStage::Biquad(BiquadFilter::notch(
                    notch_hz,
                    notch_q(notch_hz, notch_cutoff),
                    dt,
                ))
            } else {
                FilterStage::PassThrough
            }
        });

        let mut dyn_lpf = None;
        let mut lowpass_hz = profile.dterm_lowpass_hz as f32;
        if profile.dyn_lpf_dterm_min_hz > 0 {
            match profile.dterm_filter_type {
                FilterType::Pt1 | FilterType::Biquad => {
                    let mut max_hz = profile.dyn_lpf_dterm_max_hz;
                    if max_hz < profile.dyn_lpf_dterm_min_hz {
                        warn!(
                            "Dynamic D-term lowpass max {}Hz below min {}Hz, using min for both",
                            max_hz, profile.dyn_lpf_dterm_min_hz
                        );
                        max_hz = profile.dyn_lpf_dterm_min_hz;
                    }
                    let ceiling = retune_ceiling_hz(dt);
                    if valid_period(dt) && max_hz as f32 > ceiling {
                        let capped = (ceiling as u16).max(profile.dyn_lpf_dterm_min_hz);
                        warn!(
                            "Dynamic D-term lowpass max {}Hz too close to Nyquist ({}Hz), capped at {}Hz",
                            max_hz, nyquist, capped
                        );
                        max_hz = capped;
                    }
                    dyn_lpf = Some(DynLpfConfig {
                        min_hz: profile.dyn_lpf_dterm_min_hz,
                        max_hz,
                        expo: profile.dyn_lpf_curve_expo,
                    });
                    lowpass_hz = profile.dyn_lpf_dterm_min_hz as f32;
                }
                FilterType::Notch => {
                    warn!("Dynamic D-term lowpass needs a PT1 or biquad first stage, disabled");
                }
            }
        }

        let lowpass = std::array::from_fn(|_| FilterStage::new(profile.dterm_filter_type, lowpass_hz, dt));
        let lowpass2 = std::array::from_fn(|_| {
            FilterStage::new(
                profile.dterm_filter2_type,
                profile.dterm_lowpass2_hz as f32,
                dt,
            )
        });

        // A dynamic range needs a live first stage to retune
        if !lowpass[0].is_enabled() {
            dyn_lpf = None;
        }

        debug!(
            "D-term filters: notch {}, lowpass {:?} at {}Hz (dynamic {:?}), lowpass2 {:?} at {}Hz",
            notch[0].is_enabled(),
            profile.dterm_filter_type,
            lowpass_hz,
            dyn_lpf,
            profile.dterm_filter2_type,
            profile.dterm_lowpass2_hz
        );

        DtermFilterBank {
            notch,
            lowpass,
            lowpass2,
            dyn_lpf,
            cutoff_hz: lowpass_hz,
            dt,
        }
    }

    /// Run one axis sample through notch, stage 1 and stage 2.
    pub fn apply(&mut self, axis: usize, input: f32) -> f32 {
        let filtered = self.notch[axis].apply(input);
        let filtered = self.lowpass[axis].apply(filtered);
        self.lowpass2[axis].apply(filtered)
    }

    /// Retune stage 1 for the current throttle.
    ///
    /// Coefficients are only recomputed when the cutoff moved by more than
    /// [`DYN_LPF_CUTOFF_EPSILON_HZ`].
    pub fn update_dynamic(&mut self, throttle: f32) {
        let Some(config) = self.dyn_lpf else {
            return;
        };
        let cutoff = dyn_dterm_lpf_cutoff_freq(throttle, config.min_hz, config.max_hz, config.expo)
            .min(retune_ceiling_hz(self.dt));
        if (cutoff - self.cutoff_hz).abs() <= DYN_LPF_CUTOFF_EPSILON_HZ {
            return;
        }
        for stage in self.lowpass.iter_mut() {
            stage.retune_lowpass(cutoff, self.dt);
        }
        self.cutoff_hz = cutoff;
    }

    /// Current stage 1 cutoff in Hz.
    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    pub fn dyn_lpf(&self) -> Option<DynLpfConfig> {
        self.dyn_lpf
    }
}
