// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of rate-controlled axes.
pub const XYZ_AXIS_COUNT: usize = 3;

/// A rate-controlled body axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Axis {
    Roll = 0,
    Pitch = 1,
    Yaw = 2,
}

impl Axis {
    pub const ALL: [Axis; XYZ_AXIS_COUNT] = [Axis::Roll, Axis::Pitch, Axis::Yaw];

    /// Index into per-axis arrays.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Axis> {
        match index {
            0 => Some(Axis::Roll),
            1 => Some(Axis::Pitch),
            2 => Some(Axis::Yaw),
            _ => None,
        }
    }

    /// Roll and pitch take part in leveling and the acro trainer, yaw does not.
    pub const fn is_cyclic(self) -> bool {
        !matches!(self, Axis::Yaw)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Axis::Roll => "ROLL",
            Axis::Pitch => "PITCH",
            Axis::Yaw => "YAW",
        }
    }
}

/// Slot of a gain set inside a profile.
///
/// The first three mirror [`Axis`]; `Level` holds the angle/horizon gains and
/// `Mag` the heading-hold gains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PidIndex {
    Roll = 0,
    Pitch = 1,
    Yaw = 2,
    Level = 3,
    Mag = 4,
}

impl PidIndex {
    pub const COUNT: usize = 5;

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl From<Axis> for PidIndex {
    fn from(axis: Axis) -> Self {
        match axis {
            Axis::Roll => PidIndex::Roll,
            Axis::Pitch => PidIndex::Pitch,
            Axis::Yaw => PidIndex::Yaw,
        }
    }
}
