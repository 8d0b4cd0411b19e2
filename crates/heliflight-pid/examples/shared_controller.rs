// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use heliflight_pid::{PidConfig, PidIndex, PidProfile, Pidf, SharedPidController, TickInput};
use std::thread;
use std::time::Duration;

const GYRO_PERIOD_US: u32 = 500; // 2kHz

/// This example shares one controller between a control loop thread and a
/// configuration thread, the way a flight controller runs its PID task next
/// to a configurator link.
///
/// The configuration thread edits a spare profile slot, copies it over the
/// active one and later switches slots. Each change locks the controller, so
/// it always lands between two ticks.
fn main() {
    env_logger::init();

    println!("Starting shared controller simulation");
    println!("=====================================");

    let controller =
        SharedPidController::new(PidProfile::new().with_name("CRUISE"), PidConfig::default(), GYRO_PERIOD_US)
            .expect("default profile is valid");

    // Clone controller for the control loop
    let loop_controller = controller.clone();

    let control_thread = thread::spawn(move || {
        let mut roll_rate = 0.0f32;
        for step in 0..4000u32 {
            let input = TickInput {
                time_us: step as u64 * GYRO_PERIOD_US as u64,
                gyro_rate: [roll_rate, 0.0, 0.0],
                setpoint: [200.0, 0.0, 0.0],
                throttle: 0.5,
                airborne: true,
                ..Default::default()
            };
            let outputs = match loop_controller.tick(&input) {
                Ok(outputs) => outputs,
                Err(e) => {
                    eprintln!("CONTROL   | tick failed: {}", e);
                    return;
                }
            };
            roll_rate += (outputs[0].sum * 40.0 - roll_rate * 5.0) * 0.0005;

            if step % 400 == 0 {
                println!(
                    "CONTROL   | t {:5.2}s | roll rate {:7.2} | P {:7.2} | I {:7.2} | sum {:7.2}",
                    step as f32 * 0.0005,
                    roll_rate,
                    outputs[0].p,
                    outputs[0].i,
                    outputs[0].sum
                );
            }
            thread::sleep(Duration::from_micros(500));
        }
        println!("Control thread complete");
    });

    let config_controller = controller.clone();
    let config_thread = thread::spawn(move || {
        thread::sleep(Duration::from_millis(600));
        let stiff = PidProfile::new()
            .with_name("STIFF")
            .with_pid(PidIndex::Roll, Pidf::new(70, 110, 45, 120));
        if let Err(e) = config_controller.set_profile(1, stiff) {
            eprintln!("CONFIG    | set_profile failed: {}", e);
            return;
        }
        println!("CONFIG    | wrote STIFF to slot 1");

        match config_controller.copy_profile(0, 1) {
            Ok(()) => println!("CONFIG    | copied slot 1 over the active slot"),
            Err(e) => eprintln!("CONFIG    | copy failed: {}", e),
        }

        // Out of range slots are rejected
        if let Err(e) = config_controller.copy_profile(7, 0) {
            println!("CONFIG    | rejected copy: {}", e);
        }

        thread::sleep(Duration::from_millis(600));
        match config_controller.select_profile(2) {
            Ok(()) => println!("CONFIG    | switched to slot 2"),
            Err(e) => eprintln!("CONFIG    | select failed: {}", e),
        }
    });

    if control_thread.join().is_err() {
        eprintln!("control thread panicked");
    }
    if config_thread.join().is_err() {
        eprintln!("config thread panicked");
    }

    match controller.active_profile() {
        Ok(profile) => println!("\nActive profile at exit: '{}'", profile.name),
        Err(e) => eprintln!("\nCould not read profile: {}", e),
    }
}
