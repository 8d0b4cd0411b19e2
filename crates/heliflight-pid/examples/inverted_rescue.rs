// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use heliflight_pid::heli::RescuePhase;
use heliflight_pid::{FlightModes, PidConfig, PidController, PidProfile, TickInput};

const GYRO_PERIOD_US: u32 = 250; // 4kHz
const SIMULATION_DURATION_SECONDS: f32 = 6.0;
const PRINT_EVERY_SECONDS: f32 = 0.2;
const ROLL_AUTHORITY: f32 = 40.0;
const ROLL_DAMPING: f32 = 5.0;

fn wrap_degrees(angle: f32) -> f32 {
    let mut angle = angle % 360.0;
    if angle > 180.0 {
        angle -= 360.0;
    } else if angle < -180.0 {
        angle += 360.0;
    }
    angle
}

/// # Inverted Rescue
///
/// A helicopter is found nearly inverted at 160 degrees of roll when the
/// pilot hits the rescue switch. The rescue first levels it inverted and
/// pulls negative collective away from the ground, with a boost during the
/// first moments, then rolls it upright and switches to positive collective.
fn main() {
    env_logger::init();

    // 30% collective, 10% boost, roll upright after 1.5s
    let profile = PidProfile::new()
        .with_name("RESCUE")
        .with_rescue(30, 10, 15)
        .with_tail_feedforward(40, 20, 0, 10, 100);
    let config = PidConfig::new().with_collective_reference(1000);
    let mut controller =
        PidController::new(profile, config, GYRO_PERIOD_US).expect("rescue profile is valid");

    let dt = controller.dt();
    let iterations = (SIMULATION_DURATION_SECONDS / dt) as usize;
    let print_every = (PRINT_EVERY_SECONDS / dt) as usize;

    println!("Inverted Rescue Simulation");
    println!("==========================");
    println!("Loop rate: {:.0} Hz", controller.pid_frequency());
    println!();
    println!("Time(s) | Phase          | Roll(deg) | Roll rate | Collective | Yaw F");
    println!("--------|----------------|-----------|-----------|------------|------");

    let mut roll = 160.0f32;
    let mut roll_rate = 0.0f32;
    let mut collective_deflection = 0.0f32;
    let mut last_phase = RescuePhase::Inactive;

    for step in 0..iterations {
        let time = step as f32 * dt;
        // Rescue switch held for the first five seconds
        let rescue = time < 5.0;

        let input = TickInput {
            time_us: step as u64 * GYRO_PERIOD_US as u64,
            gyro_rate: [roll_rate, 0.0, 0.0],
            attitude: [roll, 0.0],
            collective_deflection,
            throttle: 0.7,
            motor_mix_range: 0.2,
            modes: FlightModes {
                rescue,
                ..Default::default()
            },
            airborne: true,
            ..Default::default()
        };
        let outputs = *controller.tick(&input);

        // Servo travel follows the commanded collective
        collective_deflection = (controller.rescue_collective() / 1000.0).clamp(-1.0, 1.0);

        let accel = outputs[0].sum * ROLL_AUTHORITY - roll_rate * ROLL_DAMPING;
        roll_rate += accel * dt;
        roll = wrap_degrees(roll + roll_rate * dt);

        let phase = controller.rescue_phase();
        if phase != last_phase {
            println!("  -> {:?} at {:.2}s", phase, time);
            last_phase = phase;
        }

        if step % print_every == 0 {
            println!(
                "{:7.2} | {:14} | {:9.1} | {:9.1} | {:10.1} | {:5.2}",
                time,
                format!("{:?}", phase),
                roll,
                roll_rate,
                controller.rescue_collective(),
                outputs[2].f
            );
        }
    }
}
