// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Sender};
use std::thread;

/// Which internal signals a debug frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugMode {
    /// Roll: setpoint high-pass, relax factor, admitted error, absolute error
    ItermRelax,
    /// Debug axis: angle, hold state, setpoint, projected angle
    AcroTrainer,
    /// Absolute control setpoint correction per axis
    AcCorrection,
    /// Accumulated absolute error per axis
    AcError,
    /// Cutoff, filtered roll gyro, roll and pitch D
    DtermLpf,
    /// Debug axis: setpoint, filtered setpoint derivative, F, boost
    FeedForward,
    /// Phase, collective, elapsed milliseconds, roll attitude
    Rescue,
}

/// Configuration for controller debug capture
#[derive(Debug, Clone)]
pub struct DebugConfig {
    /// Unique ID for this controller instance
    pub controller_id: String,
    pub mode: DebugMode,
    /// Keep one frame out of every this many ticks
    pub sample_every_ticks: u32,
    /// Append frames as JSON lines to this file from a writer thread
    pub log_path: Option<PathBuf>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            controller_id: "heliflight_pid".to_string(),
            mode: DebugMode::ItermRelax,
            sample_every_ticks: 1,
            log_path: None,
        }
    }
}

/// One sampled set of debug values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugFrame {
    pub controller_id: String,
    /// Tick count since the debugger was attached
    pub tick: u64,
    pub time_us: u64,
    pub mode: DebugMode,
    pub values: [f32; 4],
}

/// Samples debug values from the tick and optionally streams them to disk.
pub struct ControllerDebugger {
    config: DebugConfig,
    tx: Option<Sender<DebugFrame>>,
    ticks: u64,
    latest: Option<DebugFrame>,
}

impl ControllerDebugger {
    /// Create a new controller debugger with the given configuration
    pub fn new(config: DebugConfig) -> Self {
        let tx = config.log_path.clone().map(|path| {
            let (tx, rx) = channel::<DebugFrame>();
            let controller_id = config.controller_id.clone();

            thread::spawn(move || {
                info!(
                    "Debug capture for '{}' logging to {}",
                    controller_id,
                    path.display()
                );
                let mut file = match OpenOptions::new().create(true).append(true).open(&path) {
                    Ok(file) => file,
                    Err(e) => {
                        error!("Error opening debug log {}: {}", path.display(), e);
                        return;
                    }
                };

                while let Ok(frame) = rx.recv() {
                    match serde_json::to_string(&frame) {
                        Ok(json) => {
                            if let Err(e) = writeln!(file, "{}", json) {
                                error!("Error writing to debug log: {}", e);
                            }
                        }
                        Err(e) => error!("Error serializing debug frame: {}", e),
                    }
                }
            });
            tx
        });

        Self {
            config,
            tx,
            ticks: 0,
            latest: None,
        }
    }

    pub fn mode(&self) -> DebugMode {
        self.config.mode
    }

    /// Count a tick and keep its values if it falls on the sampling interval
    pub fn record(&mut self, time_us: u64, values: [f32; 4]) {
        let every = self.config.sample_every_ticks.max(1) as u64;
        let tick = self.ticks;
        self.ticks += 1;
        if tick % every != 0 {
            return;
        }

        let frame = DebugFrame {
            controller_id: self.config.controller_id.clone(),
            tick,
            time_us,
            mode: self.config.mode,
            values,
        };

        if let Some(tx) = self.tx.as_ref() {
            if let Err(e) = tx.send(frame.clone()) {
                error!("Failed to send debug frame to writer: {}", e);
            }
        }
        self.latest = Some(frame);
    }

    /// Most recently sampled frame
    pub fn latest(&self) -> Option<&DebugFrame> {
        self.latest.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
