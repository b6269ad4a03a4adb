//! Port discovery against simulated ports

use millkit_communication::{
    PortDiscovery, PortPattern, PortPatterns, SimulatedGrbl, SimulatorOpener,
};
use millkit_core::{ConnectionError, Error};
use millkit_settings::TimingSettings;

fn usb_patterns() -> PortPatterns {
    PortPatterns::new(vec![
        PortPattern::Prefix("/dev/ttyUSB".to_string()),
        PortPattern::Prefix("/dev/ttyACM".to_string()),
    ])
}

const BAUDS: [u32; 2] = [115_200, 9_600];

#[test]
fn test_finds_device_on_slow_baud() {
    let mut opener = SimulatorOpener::new()
        .with_silent_port("/dev/ttyUSB0")
        .with_device(SimulatedGrbl::new("/dev/ttyACM0"), 9_600);
    let log = opener.clone();

    let mut found = None;
    let connection = PortDiscovery::new(&mut opener, usb_patterns(), BAUDS.to_vec())
        .with_timing(TimingSettings::immediate())
        .with_max_rounds(Some(1))
        .on_found(|port| found = Some(port.to_string()))
        .discover_and_open()
        .unwrap();

    assert_eq!(connection.port, "/dev/ttyACM0");
    assert_eq!(connection.baud, 9_600);
    assert!(connection.transport.is_open());
    assert_eq!(found.as_deref(), Some("/dev/ttyACM0"));
    assert_eq!(
        log.attempts(),
        vec![
            ("/dev/ttyACM0".to_string(), 115_200),
            ("/dev/ttyACM0".to_string(), 9_600),
        ]
    );
}

#[test]
fn test_probe_sends_wake_and_reset() {
    let sim = SimulatedGrbl::new("/dev/ttyUSB3");
    let handle = sim.handle();
    let mut opener = SimulatorOpener::new().with_device(sim, 115_200);

    PortDiscovery::new(&mut opener, usb_patterns(), BAUDS.to_vec())
        .with_timing(TimingSettings::immediate())
        .with_max_rounds(Some(1))
        .discover_and_open()
        .unwrap();

    assert_eq!(handle.commands(), vec!["^X", "$$"]);
    assert_eq!(handle.status_queries(), 1);
}

#[test]
fn test_hint_is_tried_first() {
    let mut opener = SimulatorOpener::new()
        .with_device(SimulatedGrbl::new("/dev/ttyUSB0"), 115_200)
        .with_device(SimulatedGrbl::new("/dev/ttyUSB1"), 115_200);

    let connection = PortDiscovery::new(&mut opener, usb_patterns(), BAUDS.to_vec())
        .with_hint(Some("/dev/ttyUSB1".to_string()))
        .with_timing(TimingSettings::immediate())
        .with_max_rounds(Some(1))
        .discover_and_open()
        .unwrap();
    assert_eq!(connection.port, "/dev/ttyUSB1");
}

#[test]
fn test_stale_hint_is_skipped() {
    let mut opener =
        SimulatorOpener::new().with_device(SimulatedGrbl::new("/dev/ttyUSB0"), 115_200);

    let connection = PortDiscovery::new(&mut opener, usb_patterns(), BAUDS.to_vec())
        .with_hint(Some("/dev/ttyUSB7".to_string()))
        .with_timing(TimingSettings::immediate())
        .with_max_rounds(Some(1))
        .discover_and_open()
        .unwrap();
    assert_eq!(connection.port, "/dev/ttyUSB0");
}

#[test]
fn test_non_matching_ports_are_ignored() {
    let mut opener = SimulatorOpener::new().with_device(SimulatedGrbl::new("/dev/ttyS0"), 115_200);

    let err = PortDiscovery::new(&mut opener, usb_patterns(), BAUDS.to_vec())
        .with_timing(TimingSettings::immediate())
        .with_max_rounds(Some(2))
        .discover_and_open()
        .unwrap_err();

    match err {
        Error::Connection(ConnectionError::NoDevice { patterns, rounds }) => {
            assert_eq!(patterns, "/dev/ttyUSB*, /dev/ttyACM*");
            assert_eq!(rounds, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_silent_ports_are_closed_again() {
    let mut opener = SimulatorOpener::new().with_silent_port("/dev/ttyUSB0");
    let log = opener.clone();

    let err = PortDiscovery::new(&mut opener, usb_patterns(), BAUDS.to_vec())
        .with_timing(TimingSettings::immediate())
        .with_max_rounds(Some(1))
        .discover_and_open()
        .unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(log.attempts().len(), 2);
}
