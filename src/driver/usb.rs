//! Interrupt-endpoint transport and USB configuration management.
//!
//! The PICkit 2 presents two configurations: the first is HID, the second a
//! plain vendor interface with one interrupt endpoint each way. The driver
//! works in configuration 2, where generic HID drivers are less likely to
//! grab the device, and puts the original configuration back when it is
//! done.

use std::time::Duration;

use log::{debug, trace};
use rusb::{DeviceHandle, GlobalContext};

use crate::commands::{PACKET_SIZE, cmd};
use crate::error::Error;

/// Interrupt OUT endpoint carrying commands to the device.
const OUT_ENDPOINT: u8 = 0x01;

/// Interrupt IN endpoint carrying responses from the device.
const IN_ENDPOINT: u8 = 0x81;

/// The vendor (non-HID) configuration the driver operates in.
const COMMAND_CONFIGURATION: u8 = 2;

/// The interface owning both interrupt endpoints.
const COMMAND_INTERFACE: u8 = 0;

/// Per-transfer timeout, both directions.
const TRANSFER_TIMEOUT: Duration = Duration::from_millis(1000);

/// Pad a command payload out to one full wire packet.
fn frame(data: &[u8]) -> Result<[u8; PACKET_SIZE], Error> {
    if data.len() > PACKET_SIZE {
        return Err(Error::Overflow(
            "command payload longer than one 64-byte packet",
        ));
    }
    let mut packet = [cmd::END_OF_BUFFER; PACKET_SIZE];
    packet[..data.len()].copy_from_slice(data);
    Ok(packet)
}

/// Send one command packet to the device.
///
/// An empty payload is a success without any transfer taking place.
pub(crate) fn write_packet(
    handle: &DeviceHandle<GlobalContext>,
    data: &[u8],
) -> Result<(), Error> {
    if data.is_empty() {
        return Ok(());
    }
    let packet = frame(data)?;
    let transferred = handle.write_interrupt(OUT_ENDPOINT, &packet, TRANSFER_TIMEOUT)?;
    if transferred != PACKET_SIZE {
        return Err(Error::ShortTransfer {
            expected: PACKET_SIZE,
            transferred,
        });
    }
    trace!("wrote packet, {} command byte(s)", data.len());
    Ok(())
}

/// Read one full response packet from the device.
pub(crate) fn read_packet(handle: &DeviceHandle<GlobalContext>) -> Result<[u8; PACKET_SIZE], Error> {
    let mut packet = [0u8; PACKET_SIZE];
    let transferred = handle.read_interrupt(IN_ENDPOINT, &mut packet, TRANSFER_TIMEOUT)?;
    if transferred != PACKET_SIZE {
        return Err(Error::ShortTransfer {
            expected: PACKET_SIZE,
            transferred,
        });
    }
    Ok(packet)
}

/// Switch the device into the vendor configuration and claim its interface.
///
/// Returns the configuration the device was in beforehand (`None` when it
/// was unconfigured) so the caller can restore it later. After claiming, the
/// active configuration is read back: another process may have reconfigured
/// the device between the switch and the claim, in which case everything is
/// unwound and [`Error::Busy`] is returned. Any failure unwinds the steps
/// already taken in reverse order.
pub(crate) fn enter_command_configuration(
    handle: &mut DeviceHandle<GlobalContext>,
) -> Result<Option<u8>, Error> {
    // Zero means unconfigured; keep that distinct from any real index.
    let original = match handle.active_configuration()? {
        0 => None,
        configuration => Some(configuration),
    };

    if original != Some(COMMAND_CONFIGURATION) {
        handle.set_active_configuration(COMMAND_CONFIGURATION)?;
    }

    if let Err(error) = handle.claim_interface(COMMAND_INTERFACE) {
        restore_configuration(handle, original);
        return Err(error.into());
    }

    match handle.active_configuration() {
        Ok(COMMAND_CONFIGURATION) => Ok(original),
        Ok(_) => {
            let _ = handle.release_interface(COMMAND_INTERFACE);
            restore_configuration(handle, original);
            Err(Error::Busy)
        }
        Err(error) => {
            let _ = handle.release_interface(COMMAND_INTERFACE);
            restore_configuration(handle, original);
            Err(error.into())
        }
    }
}

/// Release the interface and put the original configuration back.
///
/// Both steps always run; the first error encountered is returned.
pub(crate) fn leave_command_configuration(
    handle: &mut DeviceHandle<GlobalContext>,
    original: Option<u8>,
) -> Result<(), Error> {
    let released = handle.release_interface(COMMAND_INTERFACE);
    restore_configuration(handle, original);
    released.map_err(Error::from)
}

/// Best-effort restore of the pre-open configuration.
fn restore_configuration(handle: &mut DeviceHandle<GlobalContext>, original: Option<u8>) {
    if original == Some(COMMAND_CONFIGURATION) {
        return;
    }
    let result = match original {
        Some(configuration) => handle.set_active_configuration(configuration),
        None => handle.unconfigure(),
    };
    if let Err(error) = result {
        debug!("failed to restore original USB configuration: {error}");
    }
}
