//! The open-session driver.

use bit_field::BitField;
use log::debug;
use rusb::{DeviceHandle, GlobalContext};

use crate::commands::{
    PACKET_SIZE, Packet, UNIT_ID_ADDRESS, UNIT_ID_LENGTH, UNIT_ID_MARKER, cmd, script,
};
use crate::device::{DeviceRecord, FirmwareVersion};
use crate::error::Error;

mod pins;
mod power;
mod uart;
pub(crate) mod usb;

pub use power::VoltageReading;

/// Address of the TRISA port-direction register on the programmer's own
/// microcontroller, peeked once at open to learn the PGC/PGD drive state.
const TRISA: u8 = 0x92;

/// An exclusive session with one PICkit 2.
///
/// Open a session with [`PicKit2::open`] on a record from a
/// [`DeviceRegistry`] scan. Opening claims the device's USB interface, so a
/// second open of the same unit, from this or any other process, fails
/// until the session ends. End a session with [`PicKit2::close`], which puts
/// the device's original USB configuration back, or [`PicKit2::reset`],
/// which reboots it.
///
/// All methods block; each underlying USB transfer has a one-second timeout.
/// The driver performs no locking of its own: calls on one session must be
/// serialized by the caller.
///
/// [`DeviceRegistry`]: crate::DeviceRegistry
#[derive(Debug)]
pub struct PicKit2 {
    handle: DeviceHandle<GlobalContext>,
    /// Configuration the device was in before open; `None` = unconfigured.
    original_configuration: Option<u8>,
    /// Shadow drive state of PGC, kept in lockstep with every pin command.
    pgc_floating: bool,
    /// Shadow drive state of PGD, kept in lockstep with every pin command.
    pgd_floating: bool,
    /// UART bridge state; `None` while idle.
    uart: Option<uart::UartState>,
}

impl PicKit2 {
    /// Open an exclusive session with the given device.
    ///
    /// The device is switched to its vendor USB configuration, its interface
    /// is claimed, and the PGC/PGD drive state is read out of the
    /// microcontroller's TRISA register to seed the driver's shadow state
    /// (the firmware offers no direct query for it). If any step fails, all
    /// previous steps are undone before the error is returned.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] when another process holds or reconfigures the
    /// device, otherwise the underlying USB error.
    pub fn open(record: &DeviceRecord) -> Result<Self, Error> {
        let mut handle = record.device().open()?;
        let original_configuration = usb::enter_command_configuration(&mut handle)?;

        let (pgc_floating, pgd_floating) = match read_pg_directions(&handle) {
            Ok(flags) => flags,
            Err(error) => {
                let _ = usb::leave_command_configuration(&mut handle, original_configuration);
                return Err(error);
            }
        };

        debug!(
            "opened session at {} (PGC floating: {pgc_floating}, PGD floating: {pgd_floating})",
            record.location()
        );
        Ok(Self {
            handle,
            original_configuration,
            pgc_floating,
            pgd_floating,
            uart: None,
        })
    }

    /// End the session, restoring the device's pre-open USB configuration.
    ///
    /// UART mode is stopped if it is still active. Every teardown step runs
    /// even if an earlier one fails; the first error encountered is
    /// returned.
    pub fn close(mut self) -> Result<(), Error> {
        let stopped = self.uart_stop();
        let left = usb::leave_command_configuration(&mut self.handle, self.original_configuration);
        debug!("session closed");
        stopped.and(left)
    }

    /// Reboot the device, ending the session.
    ///
    /// UART mode is stopped if active, then the firmware is told to reset
    /// and a USB bus-level reset is issued on top. The device re-enumerates
    /// afterwards, so its pre-open configuration is deliberately not
    /// restored; rescan to find it again.
    pub fn reset(mut self) -> Result<(), Error> {
        let stopped = self.uart_stop();
        let sent = self.write(&Packet::new().command(cmd::RESET));
        let reset = self.handle.reset().map_err(Error::from);
        debug!("device reset issued");
        stopped.and(sent).and(reset)
    }

    /// Query the firmware version.
    pub fn firmware_version(&mut self) -> Result<FirmwareVersion, Error> {
        self.write(&Packet::new().command(cmd::FIRMWARE_VERSION))?;
        Ok(FirmwareVersion::from_buffer(&self.read()?))
    }

    /// Program the unit ID, or erase it with `None`.
    ///
    /// The ID is written to the device's internal EEPROM and survives power
    /// cycles; it shows up in [`DeviceRecord::unit_id`] on the next scan.
    /// Up to 15 ASCII characters are allowed.
    ///
    /// # Errors
    ///
    /// [`Error::Overflow`] for an ID longer than 15 characters and
    /// [`Error::InvalidParameter`] for one containing non-ASCII characters;
    /// neither sends anything to the device.
    pub fn set_unit_id(&mut self, id: Option<&str>) -> Result<(), Error> {
        let record = unit_id_record(id)?;
        let packet = Packet::new()
            .command(cmd::WR_INTERNAL_EE)
            .data(&[UNIT_ID_ADDRESS, UNIT_ID_LENGTH])
            .data(&record);
        self.write(&packet)
    }

    pub(crate) fn write(&self, packet: &Packet) -> Result<(), Error> {
        usb::write_packet(&self.handle, packet.bytes())
    }

    pub(crate) fn read(&self) -> Result<[u8; PACKET_SIZE], Error> {
        usb::read_packet(&self.handle)
    }
}

/// Peek TRISA and decode the PGC/PGD direction bits.
///
/// The firmware cannot report whether PGC and PGD are floating, and its one
/// pin-setting command always writes both pins. Peeking the direction
/// register is the only way to learn the state at open; from then on the
/// shadow flags track every command sent, so this never runs again.
fn read_pg_directions(handle: &DeviceHandle<GlobalContext>) -> Result<(bool, bool), Error> {
    let request = Packet::new()
        .command(cmd::CLR_UPLOAD_BUFFER)
        .script(&[script::PEEK_SFR, TRISA])
        .command(cmd::UPLOAD_DATA);
    usb::write_packet(handle, request.bytes())?;
    let response = usb::read_packet(handle)?;
    assert_eq!(response[0], 1, "SFR peek uploads exactly one byte.");
    let trisa = response[1];
    // PGC is RA3, PGD is RA2; a set direction bit means the pin is an input.
    Ok((trisa.get_bit(3), trisa.get_bit(2)))
}

/// Build the 16-byte EEPROM record for a unit ID.
fn unit_id_record(id: Option<&str>) -> Result<[u8; UNIT_ID_LENGTH as usize], Error> {
    let Some(id) = id else {
        // The erased state is all-ones, the same as factory-fresh EEPROM.
        return Ok([0xFF; UNIT_ID_LENGTH as usize]);
    };
    if !id.is_ascii() {
        return Err(Error::InvalidParameter("unit ID must be ASCII"));
    }
    if id.len() > 15 {
        return Err(Error::Overflow("unit ID longer than 15 characters"));
    }
    let mut record = [0u8; UNIT_ID_LENGTH as usize];
    record[0] = UNIT_ID_MARKER;
    record[1..1 + id.len()].copy_from_slice(id.as_bytes());
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_id_record_is_marker_then_null_padded() {
        let record = unit_id_record(Some("ABC")).unwrap();
        assert_eq!(record[0], b'#');
        assert_eq!(&record[1..4], b"ABC");
        assert_eq!(record[4..], [0u8; 12]);
    }

    #[test]
    fn erased_unit_id_record_is_all_ones() {
        assert_eq!(unit_id_record(None).unwrap(), [0xFF; 16]);
    }

    #[test]
    fn unit_id_accepts_at_most_15_characters() {
        assert!(unit_id_record(Some("ABCDEFGHIJKLMNO")).is_ok());
        assert!(matches!(
            unit_id_record(Some("ABCDEFGHIJKLMNOP")),
            Err(Error::Overflow(_))
        ));
    }

    #[test]
    fn unit_id_must_be_ascii() {
        assert!(matches!(
            unit_id_record(Some("café")),
            Err(Error::InvalidParameter(_))
        ));
    }
}
