// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Helicopter specific terms: tail torque feedforward, elevator de-bounce
//! and the inverted-flight rescue.

use log::{info, warn};

use crate::filter::Pt1Filter;
use crate::profile::{PidConfig, PidProfile, RESCUE_DELAY_DISABLED};

/// Scale from the integer tail feedforward gains to output units.
pub const TAIL_FF_SCALE: f32 = 0.1;

/// Main rotor torque estimate fed forward into the yaw sum.
#[derive(Debug, Clone)]
pub struct TailFeedforward {
    collective_kf: f32,
    collective_pulse_kf: f32,
    cyclic_kf: f32,
    base_thrust: f32,
    impulse_lpf: Option<Pt1Filter>,
    collective_abs: f32,
    collective_abs_hpf: f32,
}

impl TailFeedforward {
    pub fn from_profile(profile: &PidProfile, dt: f32) -> Self {
        let impulse_lpf = if profile.collective_ff_impulse_freq > 0 && dt > 0.0 {
            Some(Pt1Filter::new(profile.collective_ff_impulse_freq as f32, dt))
        } else {
            None
        };
        TailFeedforward {
            collective_kf: profile.yaw_col_kf as f32 * TAIL_FF_SCALE,
            collective_pulse_kf: profile.yaw_col_pulse_kf as f32 * TAIL_FF_SCALE,
            cyclic_kf: profile.yaw_cyc_kf as f32 * TAIL_FF_SCALE,
            base_thrust: profile.yaw_base_thrust as f32 * TAIL_FF_SCALE,
            impulse_lpf,
            collective_abs: 0.0,
            collective_abs_hpf: 0.0,
        }
    }

    /// Track the collective stick. Called once per tick.
    pub fn update_collective(&mut self, collective_deflection: f32) {
        let abs = if collective_deflection.is_finite() {
            collective_deflection.abs().min(1.0)
        } else {
            0.0
        };
        self.collective_abs = abs;
        self.collective_abs_hpf = match self.impulse_lpf.as_mut() {
            Some(lpf) => abs - lpf.apply(abs),
            None => 0.0,
        };
    }

    /// Absolute collective deflection, 0 to 1.
    pub fn collective_deflection_abs(&self) -> f32 {
        self.collective_abs
    }

    /// High-passed absolute collective deflection. Non-zero only while the
    /// collective is moving.
    pub fn collective_deflection_abs_hpf(&self) -> f32 {
        self.collective_abs_hpf
    }

    /// Yaw feedforward for the current collective and a cyclic deflection magnitude.
    pub fn yaw_feedforward(&self, cyclic_deflection: f32) -> f32 {
        let cyclic = if cyclic_deflection.is_finite() {
            cyclic_deflection.abs().min(1.0)
        } else {
            0.0
        };
        self.collective_kf * self.collective_abs
            + self.collective_pulse_kf * self.collective_abs_hpf
            + self.cyclic_kf * cyclic
            + self.base_thrust
    }
}

/// Smooths fast pitch stick reversals that make the elevator bounce.
#[derive(Debug, Clone)]
pub struct ElevatorFilter {
    gain: f32,
    lpf: Option<Pt1Filter>,
    window_size: f32,
    window_time: f32,
    time_in_window: f32,
    dt: f32,
}

impl ElevatorFilter {
    pub fn from_profile(profile: &PidProfile, dt: f32) -> Self {
        let lpf = if profile.elevator_filter_gain > 0 && profile.elevator_filter_hz > 0 && dt > 0.0 {
            Some(Pt1Filter::new(profile.elevator_filter_hz as f32, dt))
        } else {
            None
        };
        ElevatorFilter {
            gain: profile.elevator_filter_gain as f32 / 100.0,
            lpf,
            window_size: profile.elevator_filter_window_size as f32 / 100.0,
            window_time: profile.elevator_filter_window_time as f32 / 1000.0,
            time_in_window: 0.0,
            dt,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lpf.is_some()
    }

    /// Whether the stick has rested near center long enough to skip de-bounce.
    pub fn is_suppressed(&self) -> bool {
        self.time_in_window > self.window_time
    }

    /// De-bounced pitch setpoint.
    ///
    /// # Arguments
    ///
    /// * `setpoint` - Pitch rate setpoint in deg/s
    /// * `deflection` - Pitch stick deflection, -1 to 1
    pub fn apply(&mut self, setpoint: f32, deflection: f32) -> f32 {
        let Some(lpf) = self.lpf.as_mut() else {
            return setpoint;
        };
        let smoothed = lpf.apply(setpoint);

        if deflection.abs() <= self.window_size {
            self.time_in_window += self.dt;
        } else {
            self.time_in_window = 0.0;
        }

        if self.time_in_window > self.window_time {
            setpoint
        } else {
            setpoint + (smoothed - setpoint) * self.gain
        }
    }
}

/// Phase of the inverted-flight rescue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RescuePhase {
    #[default]
    Inactive,
    /// Level inverted and pull away from the ground
    InvertedHold,
    /// Roll back to upright
    RollToUpright,
    /// Hold inverted for as long as the rescue stays active
    Disabled,
}

impl RescuePhase {
    /// Roll and pitch attitude the rescue levels to, in degrees.
    ///
    /// Inverted targets pick whichever of -180 and 180 is closer to the
    /// current roll.
    pub fn target_attitude(self, roll: f32) -> Option<[f32; 2]> {
        match self {
            RescuePhase::Inactive => None,
            RescuePhase::InvertedHold | RescuePhase::Disabled => {
                let inverted = if roll < 0.0 { -180.0 } else { 180.0 };
                Some([inverted, 0.0])
            }
            RescuePhase::RollToUpright => Some([0.0, 0.0]),
        }
    }
}

/// Output of one rescue update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RescueCommand {
    pub phase: RescuePhase,
    /// Collective command in stabilised output units
    pub collective: f32,
    pub boosted: bool,
}

/// Drives the rescue from the externally detected rescue flag and the tick time.
#[derive(Debug, Clone)]
pub struct RescueStateMachine {
    phase: RescuePhase,
    start_time_us: Option<u64>,
    delay_us: u64,
    never_roll: bool,
    collective: f32,
    boost: f32,
    collective_reference: f32,
}

impl RescueStateMachine {
    pub fn new(profile: &PidProfile, config: &PidConfig) -> Self {
        RescueStateMachine {
            phase: RescuePhase::Inactive,
            start_time_us: None,
            delay_us: profile.rescue_delay as u64 * 100_000,
            never_roll: profile.rescue_delay >= RESCUE_DELAY_DISABLED,
            collective: profile.rescue_collective as f32 / 100.0,
            boost: profile.rescue_collective_boost as f32 / 100.0,
            collective_reference: config.collective_reference as f32,
        }
    }

    /// Pick up new profile values. A rescue in progress carries on.
    pub fn configure(&mut self, profile: &PidProfile, config: &PidConfig) {
        let phase = self.phase;
        let start = self.start_time_us;
        *self = RescueStateMachine::new(profile, config);
        self.phase = phase;
        self.start_time_us = start;
    }

    pub fn phase(&self) -> RescuePhase {
        self.phase
    }

    /// Microseconds since the rescue started, zero while inactive.
    pub fn elapsed_us(&self, time_us: u64) -> u64 {
        self.start_time_us
            .map(|start| time_us.saturating_sub(start))
            .unwrap_or(0)
    }

    /// Advance the rescue by one tick.
    ///
    /// # Arguments
    ///
    /// * `active` - Rescue requested this tick
    /// * `time_us` - Tick timestamp in microseconds
    ///
    /// # Returns
    ///
    /// The phase and collective to fly this tick
    pub fn update(&mut self, active: bool, time_us: u64) -> RescueCommand {
        if !active {
            if self.phase != RescuePhase::Inactive {
                info!("Rescue ended");
            }
            self.reset();
            return RescueCommand::default();
        }

        let next = match self.phase {
            RescuePhase::Inactive => {
                self.start_time_us = Some(time_us);
                if self.never_roll {
                    RescuePhase::Disabled
                } else if self.delay_us == 0 {
                    RescuePhase::RollToUpright
                } else {
                    RescuePhase::InvertedHold
                }
            }
            RescuePhase::InvertedHold if self.elapsed_us(time_us) >= self.delay_us => {
                RescuePhase::RollToUpright
            }
            phase => phase,
        };
        if next != self.phase {
            warn!("Rescue phase {:?} -> {:?}", self.phase, next);
            self.phase = next;
        }

        let boosted = matches!(self.phase, RescuePhase::InvertedHold | RescuePhase::Disabled)
            && self.elapsed_us(time_us) < self.delay_us;
        let collective = match self.phase {
            RescuePhase::Inactive => 0.0,
            RescuePhase::RollToUpright => self.collective * self.collective_reference,
            RescuePhase::InvertedHold | RescuePhase::Disabled => {
                let boost = if boosted { self.boost } else { 0.0 };
                -(self.collective + boost) * self.collective_reference
            }
        };

        RescueCommand {
            phase: self.phase,
            collective,
            boosted,
        }
    }

    pub fn reset(&mut self) {
        self.phase = RescuePhase::Inactive;
        self.start_time_us = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 0.001;
    const TICK_US: u64 = 1_000;

    fn rescue(delay: u8) -> RescueStateMachine {
        let profile = PidProfile::default().with_rescue(30, 10, delay);
        RescueStateMachine::new(&profile, &PidConfig::default())
    }

    #[test]
    fn test_tail_feedforward_terms() {
        let profile = PidProfile::default().with_tail_feedforward(100, 0, 50, 20, 0);
        let mut tail = TailFeedforward::from_profile(&profile, DT);
        tail.update_collective(-0.5);
        assert_eq!(tail.collective_deflection_abs(), 0.5);
        assert_eq!(tail.collective_deflection_abs_hpf(), 0.0);
        // 10 * 0.5 + 5 * 1.0 + 2
        let ff = tail.yaw_feedforward(1.0);
        assert!((ff - 12.0).abs() < 1e-5, "tail feedforward was {}", ff);
    }

    #[test]
    fn test_collective_impulse_decays() {
        let profile = PidProfile::default().with_tail_feedforward(0, 100, 0, 0, 10);
        let mut tail = TailFeedforward::from_profile(&profile, DT);
        tail.update_collective(1.0);
        let first = tail.collective_deflection_abs_hpf();
        assert!(first > 0.9);
        assert!(tail.yaw_feedforward(0.0) > 9.0);

        for _ in 0..2000 {
            tail.update_collective(1.0);
        }
        assert!(tail.collective_deflection_abs_hpf() < 1e-3);
        assert!(tail.yaw_feedforward(0.0) < 0.1);
    }

    #[test]
    fn test_elevator_filter_disabled_by_default() {
        let mut elevator = ElevatorFilter::from_profile(&PidProfile::default(), DT);
        assert!(!elevator.is_enabled());
        assert_eq!(elevator.apply(123.0, 0.5), 123.0);
    }

    #[test]
    fn test_elevator_filter_smooths_reversals() {
        let profile = PidProfile::default().with_elevator_filter(100, 100, 20, 20);
        let mut elevator = ElevatorFilter::from_profile(&profile, DT);
        assert!(elevator.is_enabled());
        // Sudden full stick: the correction holds the setpoint back
        let out = elevator.apply(400.0, 1.0);
        assert!(out < 400.0 && out > 0.0);
    }

    #[test]
    fn test_elevator_filter_suppressed_near_center() {
        let profile = PidProfile::default().with_elevator_filter(100, 100, 20, 20);
        let mut elevator = ElevatorFilter::from_profile(&profile, DT);

        // 150 ticks of small corrections around center
        let mut last = 0.0;
        for _ in 0..150 {
            last = elevator.apply(30.0, 0.1);
        }
        assert!(elevator.is_suppressed());
        assert_eq!(last, 30.0);

        // Leaving the window restarts the timer
        elevator.apply(300.0, 0.8);
        assert!(!elevator.is_suppressed());
    }

    #[test]
    fn test_rescue_zero_delay_rolls_immediately() {
        let mut rescue = rescue(0);
        let command = rescue.update(true, 5_000);
        assert_eq!(command.phase, RescuePhase::RollToUpright);
        assert!((command.collective - 300.0).abs() < 1e-3);
        assert!(!command.boosted);
    }

    #[test]
    fn test_rescue_holds_then_rolls() {
        // 0.5s hold
        let mut rescue = rescue(5);
        let mut time = 1_000_000u64;
        let command = rescue.update(true, time);
        assert_eq!(command.phase, RescuePhase::InvertedHold);
        assert!(command.boosted);
        assert!((command.collective + 400.0).abs() < 1e-3);

        for _ in 0..498 {
            time += TICK_US;
            assert_eq!(rescue.update(true, time).phase, RescuePhase::InvertedHold);
        }
        time += 2 * TICK_US;
        let command = rescue.update(true, time);
        assert_eq!(command.phase, RescuePhase::RollToUpright);
        assert!((command.collective - 300.0).abs() < 1e-3);
        assert_eq!(rescue.elapsed_us(time), 500_000);
    }

    #[test]
    fn test_rescue_sentinel_never_rolls() {
        let mut rescue = rescue(RESCUE_DELAY_DISABLED);
        let mut time = 0u64;
        for _ in 0..10_000 {
            let command = rescue.update(true, time);
            assert_eq!(command.phase, RescuePhase::Disabled);
            time += 10 * TICK_US;
        }
        // Boost has run out, steady inverted collective remains
        let command = rescue.update(true, time);
        assert!(!command.boosted);
        assert!((command.collective + 300.0).abs() < 1e-3);
    }

    #[test]
    fn test_rescue_deactivation_resets() {
        let mut rescue = rescue(5);
        rescue.update(true, 0);
        rescue.update(true, 600_000);
        assert_eq!(rescue.phase(), RescuePhase::RollToUpright);

        let command = rescue.update(false, 700_000);
        assert_eq!(command, RescueCommand::default());
        assert_eq!(rescue.phase(), RescuePhase::Inactive);
        assert_eq!(rescue.elapsed_us(800_000), 0);

        // A new episode starts its own clock
        let command = rescue.update(true, 800_000);
        assert_eq!(command.phase, RescuePhase::InvertedHold);
    }

    #[test]
    fn test_rescue_target_attitude() {
        assert_eq!(RescuePhase::Inactive.target_attitude(10.0), None);
        assert_eq!(RescuePhase::InvertedHold.target_attitude(150.0), Some([180.0, 0.0]));
        assert_eq!(RescuePhase::Disabled.target_attitude(-150.0), Some([-180.0, 0.0]));
        assert_eq!(RescuePhase::RollToUpright.target_attitude(170.0), Some([0.0, 0.0]));
    }
}
