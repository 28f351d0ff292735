//! Winder against the simulated firmware

use pickup_winder::sim::SimulatedFirmware;
use pickup_winder::{Winder, WinderConfig, WinderError};
use std::thread;
use std::time::Duration;

fn sim_winder() -> Winder<SimulatedFirmware> {
    Winder::with_config(
        SimulatedFirmware::new(),
        WinderConfig { drain_delay: Duration::ZERO, reply_timeout: Some(Duration::from_millis(100)) },
    )
}

#[test]
fn test_reset_then_count_is_zero() {
    let winder = sim_winder();
    assert_eq!(winder.reset_rev_counter().unwrap(), "ok");
    assert_eq!(winder.get_rev_count().unwrap(), 0);
}

#[test]
fn test_counter_runs_with_motor() {
    let winder = sim_winder();
    winder.set_speed(50).unwrap();
    winder.enable_motor(true).unwrap();
    thread::sleep(Duration::from_millis(120));
    winder.enable_motor(false).unwrap();

    let count = winder.get_rev_count().unwrap();
    assert!(count >= 5, "count {}", count);

    // Disabled motor does not turn
    thread::sleep(Duration::from_millis(30));
    assert_eq!(winder.get_rev_count().unwrap(), count);

    winder.reset_rev_counter().unwrap();
    assert_eq!(winder.get_rev_count().unwrap(), 0);
}

#[test]
fn test_stopped_motor_does_not_count() {
    let winder = sim_winder();
    winder.enable_motor(true).unwrap();
    winder.set_speed(0).unwrap();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(winder.get_rev_count().unwrap(), 0);
}

#[test]
fn test_out_of_range_speed_rejected() {
    let winder = sim_winder();
    assert!(matches!(winder.set_speed(256), Err(WinderError::SpeedOutOfRange(256))));
    // Link still usable
    assert_eq!(winder.get_rev_count().unwrap(), 0);
}

#[test]
fn test_close_leaves_motor_stopped() {
    let winder = sim_winder();
    winder.set_speed(30).unwrap();
    winder.enable_motor(true).unwrap();
    winder.close(Duration::ZERO).unwrap();
    assert!(!winder.is_open());
    assert!(matches!(winder.enable_motor(true), Err(WinderError::Closed)));

    let firmware = winder.into_inner();
    assert!(firmware.is_closed());
    assert!(!firmware.is_enabled());
    assert_eq!(firmware.speed(), 0);
}
