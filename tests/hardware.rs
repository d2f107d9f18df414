//! Tests against an attached PICkit 2.
//!
//! These need a real programmer on the bus and are ignored by default; run
//! them with `cargo test -- --ignored`. They have to be run serially
//! (`--test-threads=1`), because every test opens an exclusive session and
//! a second concurrent open of the same unit fails.
use pk2aux::{DeviceRegistry, Error, PicKit2, PinMode};

fn open_any() -> Result<PicKit2, Error> {
    let registry = DeviceRegistry::scan()?;
    PicKit2::open(registry.find(None)?)
}

/// A scan finds at least one programmer and reports a bus location for it.
#[test]
#[ignore = "needs an attached PICkit 2"]
fn scan_finds_a_device() -> Result<(), Error> {
    let registry = DeviceRegistry::scan()?;
    let record = registry.find(None)?;
    assert!(record.location().contains(':'));
    Ok(())
}

/// The firmware identifies itself as a supported 2.30+ release.
#[test]
#[ignore = "needs an attached PICkit 2"]
fn firmware_is_supported() -> Result<(), Error> {
    let mut device = open_any()?;
    let version = device.firmware_version()?;
    assert!(version.is_supported(), "firmware {version} too old");
    device.close()
}

/// Setting VDD and driving the pin high reads back close to the request.
#[test]
#[ignore = "needs an attached PICkit 2, VDD pin unloaded"]
fn vdd_round_trip() -> Result<(), Error> {
    let mut device = open_any()?;
    device.vdd_set_level(3.3)?;
    device.vdd_set_mode(PinMode::High)?;
    std::thread::sleep(std::time::Duration::from_millis(100));
    let measured = device.vdd_voltage()?;
    assert!(
        (measured - 3.3).abs() < 0.25,
        "VDD read back {measured} V for a 3.3 V request"
    );
    device.vdd_set_mode(PinMode::Floating)?;
    device.close()
}

/// Changing one programming pin leaves the other pin's mode alone.
#[test]
#[ignore = "needs an attached PICkit 2, PGC/PGD pins unloaded"]
fn pg_pins_change_independently() -> Result<(), Error> {
    let mut device = open_any()?;
    device.set_pg_modes(PinMode::Floating, PinMode::Floating)?;
    assert_eq!(device.pg_modes()?, (PinMode::Floating, PinMode::Floating));

    device.pgc_set_mode(PinMode::High)?;
    assert_eq!(device.pg_modes()?, (PinMode::High, PinMode::Floating));
    assert!(device.pgc_level()?);

    device.pgd_set_mode(PinMode::Grounded)?;
    assert_eq!(device.pg_modes()?, (PinMode::High, PinMode::Grounded));

    device.set_pg_modes(PinMode::Floating, PinMode::Floating)?;
    device.close()
}

/// The shadow state survives a close and reopen of the session.
#[test]
#[ignore = "needs an attached PICkit 2"]
fn pin_state_survives_reopen() -> Result<(), Error> {
    let mut device = open_any()?;
    device.set_pg_modes(PinMode::Floating, PinMode::Grounded)?;
    device.close()?;

    let mut device = open_any()?;
    assert_eq!(device.pgc_mode()?, PinMode::Floating);
    assert_eq!(device.pgd_mode()?, PinMode::Grounded);
    device.set_pg_modes(PinMode::Floating, PinMode::Floating)?;
    device.close()
}

/// The UART bridge starts, loops data with TX wired to RX, and stops.
#[test]
#[ignore = "needs an attached PICkit 2, AUX wired to PGC"]
fn uart_loopback() -> Result<(), Error> {
    let mut device = open_any()?;
    device.uart_start(9600)?;
    device.uart_send(b"hello")?;

    let mut received = Vec::new();
    let mut buffer = [0u8; 16];
    for _ in 0..20 {
        let count = device.uart_receive(&mut buffer)?;
        received.extend_from_slice(&buffer[..count]);
        if received.len() >= 5 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    assert_eq!(received, b"hello");

    device.uart_stop()?;
    device.close()
}

/// Sending while the bridge is idle is rejected.
#[test]
#[ignore = "needs an attached PICkit 2"]
fn uart_send_requires_active_bridge() -> Result<(), Error> {
    let mut device = open_any()?;
    assert!(matches!(device.uart_send(b"x"), Err(Error::UartInactive)));
    device.close()
}
