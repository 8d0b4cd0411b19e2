// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use heliflight_pid::profile::FilterType;
use heliflight_pid::{
    Axis, DebugConfig, DebugMode, PidConfig, PidController, PidProfile, TickInput,
};
use std::path::PathBuf;

const GYRO_PERIOD_US: u32 = 125;
const RX_INTERVAL_US: u32 = 4000;

/// This example attaches debug capture to a controller and records the
/// feedforward signals of a stick snap.
///
/// Frames are sampled every 8 ticks (1kHz) and appended as JSON lines to
/// `heliflight_debug.jsonl` in the system temp directory by a writer thread.
fn main() {
    env_logger::init();

    let log_path: PathBuf = std::env::temp_dir().join("heliflight_debug.jsonl");

    println!("Feedforward Debug Capture");
    println!("=========================");
    println!("Writing frames to {}", log_path.display());
    println!();

    let debug_config = DebugConfig {
        controller_id: "feedforward_snap".to_string(),
        mode: DebugMode::FeedForward,
        sample_every_ticks: 8,
        log_path: Some(log_path),
    };

    let mut controller = PidController::new(PidProfile::default(), PidConfig::default(), GYRO_PERIOD_US)
        .expect("default profile is valid")
        .with_debugging(debug_config);
    controller.init_setpoint_derivative_lpf(60, Axis::Roll, FilterType::Pt1);

    println!("Tick | Setpoint | Derivative | F     | Boost");
    println!("-----|----------|------------|-------|------");

    let rx_every = (RX_INTERVAL_US / GYRO_PERIOD_US) as u64;
    for step in 0..2000u64 {
        // Roll stick snaps to 60% at tick 400 and back at tick 1200
        let stick = if (400..1200).contains(&step) { 0.6 } else { 0.0 };
        let input = TickInput {
            time_us: step * GYRO_PERIOD_US as u64,
            setpoint: [stick * 670.0, 0.0, 0.0],
            stick_deflection: [stick, 0.0, 0.0],
            new_rc_frame: step % rx_every == 0,
            rx_interval_us: RX_INTERVAL_US,
            airborne: true,
            ..Default::default()
        };
        controller.tick(&input);

        if step % 100 == 0 {
            if let Some(frame) = controller.debugger().and_then(|debugger| debugger.latest()) {
                println!(
                    "{:4} | {:8.1} | {:10.1} | {:5.2} | {:5.2}",
                    frame.tick, frame.values[0], frame.values[1], frame.values[2], frame.values[3]
                );
            }
        }
    }

    if let Some(debugger) = controller.debugger() {
        println!("\nCaptured {} ticks", debugger.ticks());
    }
}
