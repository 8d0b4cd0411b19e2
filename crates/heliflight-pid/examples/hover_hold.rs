// HeliFlight PID: rate and attitude control core for rotorcraft flight controllers
// Copyright (c) 2025 Security Union LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use heliflight_pid::{Axis, FlightModes, PidConfig, PidController, PidProfile, TickInput};
use rand::{thread_rng, Rng};

// Simulation constants - easy to adjust
const SIMULATION_DURATION_SECONDS: f32 = 3.0;
const GYRO_PERIOD_US: u32 = 125; // 8kHz gyro and PID loop
const RX_INTERVAL_US: u32 = 4000; // 250Hz RC link
const GYRO_NOISE_DPS: f32 = 3.0; // Gyro noise amplitude
const PRINT_EVERY_SECONDS: f32 = 0.25;

// Crude airframe: angular acceleration per unit PID sum and rate damping
const AUTHORITY: [f32; 3] = [60.0, 55.0, 40.0];
const DAMPING: [f32; 3] = [4.0, 4.0, 6.0];

/// # Hover Hold Simulation
///
/// Runs the controller at 8kHz against a simple three-axis rigid body with
/// gyro noise and random gusts. The pilot flies angle mode, takes a roll
/// input after one second and lets go again, while the controller holds
/// attitude through the gusts.
fn main() {
    env_logger::init();

    let profile = PidProfile::new()
        .with_name("HOVER")
        .with_iterm_rotation(true)
        .with_thrust_linearization(30);
    let mut controller = PidController::new(profile, PidConfig::default(), GYRO_PERIOD_US)
        .expect("hover profile is valid");

    let dt = controller.dt();
    let iterations = (SIMULATION_DURATION_SECONDS / dt) as usize;
    let print_every = (PRINT_EVERY_SECONDS / dt) as usize;
    let rx_every = (RX_INTERVAL_US / GYRO_PERIOD_US) as usize;

    println!("Hover Hold Simulation");
    println!("=====================");
    println!("Loop rate: {:.0} Hz (dt = {:.6}s)", controller.pid_frequency(), dt);
    println!("Gyro noise: +/-{:.1} deg/s", GYRO_NOISE_DPS);
    println!();
    println!("Time(s) | Roll(deg) | Pitch(deg) | Yaw rate | Roll sum | Pitch sum | Yaw sum");
    println!("--------|-----------|------------|----------|----------|-----------|--------");

    let mut rng = thread_rng();
    let mut rate = [0.0f32; 3];
    let mut attitude = [5.0f32, -3.0];
    let mut gust = [0.0f32; 3];

    for step in 0..iterations {
        let time = step as f32 * dt;

        // Pilot: roll right between 1.0s and 1.5s, sticks centered otherwise
        let roll_stick = if (1.0..1.5).contains(&time) { 0.3 } else { 0.0 };

        // New gust roughly every half second
        if rng.gen_bool(1.0 / 4000.0) {
            gust = [
                rng.gen_range(-200.0..200.0),
                rng.gen_range(-200.0..200.0),
                rng.gen_range(-50.0..50.0),
            ];
            println!("  gust at {:.2}s: {:?}", time, gust);
        }

        let gyro_rate = [
            rate[0] + rng.gen_range(-GYRO_NOISE_DPS..GYRO_NOISE_DPS),
            rate[1] + rng.gen_range(-GYRO_NOISE_DPS..GYRO_NOISE_DPS),
            rate[2] + rng.gen_range(-GYRO_NOISE_DPS..GYRO_NOISE_DPS),
        ];

        let input = TickInput {
            time_us: step as u64 * GYRO_PERIOD_US as u64,
            gyro_rate,
            attitude,
            setpoint: [roll_stick * 670.0, 0.0, 0.0],
            stick_deflection: [roll_stick, 0.0, 0.0],
            throttle: 0.45,
            motor_mix_range: 0.3,
            new_rc_frame: step % rx_every == 0,
            rx_interval_us: RX_INTERVAL_US,
            modes: FlightModes {
                angle: true,
                ..Default::default()
            },
            airborne: true,
            ..Default::default()
        };
        let outputs = *controller.tick(&input);

        for axis in 0..3 {
            let accel = outputs[axis].sum * AUTHORITY[axis] - rate[axis] * DAMPING[axis] + gust[axis];
            rate[axis] += accel * dt;
        }
        attitude[0] += rate[0] * dt;
        attitude[1] += rate[1] * dt;
        for g in gust.iter_mut() {
            *g *= 0.999;
        }

        if step % print_every == 0 {
            println!(
                "{:7.2} | {:9.2} | {:10.2} | {:8.2} | {:8.2} | {:9.2} | {:7.2}",
                time,
                attitude[0],
                attitude[1],
                rate[2],
                outputs[0].sum,
                outputs[1].sum,
                outputs[2].sum
            );
        }
    }

    println!();
    println!(
        "Final integrators: roll {:.3}, pitch {:.3}, yaw {:.3}",
        controller.iterm(Axis::Roll),
        controller.iterm(Axis::Pitch),
        controller.iterm(Axis::Yaw)
    );
}
