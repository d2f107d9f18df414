//! Scanning the USB buses for PICkit 2 units.

use log::debug;
use rusb::{Device, GlobalContext};

use crate::commands::{PACKET_SIZE, Packet, UNIT_ID_ADDRESS, UNIT_ID_LENGTH, UNIT_ID_MARKER, cmd};
use crate::driver::usb;
use crate::error::Error;

const MICROCHIP_VID: u16 = 0x04D8;
const PICKIT2_PID: u16 = 0x0033;

/// One PICkit 2 found during a scan.
///
/// A record keeps a reference to the underlying USB device so that it can be
/// opened later with [`PicKit2::open`]. Records live as long as the registry
/// that produced them.
///
/// [`PicKit2::open`]: crate::PicKit2::open
#[derive(Debug)]
pub struct DeviceRecord {
    unit_id: String,
    bus_number: u8,
    device_address: u8,
    device: Device<GlobalContext>,
}

impl DeviceRecord {
    /// The unit ID programmed into the device, or an empty string if none.
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// The number of the USB bus the device is attached to.
    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    /// The address of the device on its bus.
    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    /// The device's location in the `"bus:address"` form accepted by
    /// [`DeviceRegistry::find`].
    pub fn location(&self) -> String {
        format!("{}:{}", self.bus_number, self.device_address)
    }

    pub(crate) fn device(&self) -> &Device<GlobalContext> {
        &self.device
    }
}

/// The PICkit 2 units found by one scan of the USB buses.
///
/// A registry is a snapshot: it is built by [`DeviceRegistry::scan`] and
/// never changes afterwards. To pick up newly attached units, scan again and
/// use the fresh registry; records from the old one keep working until it is
/// dropped.
#[derive(Debug)]
pub struct DeviceRegistry {
    records: Vec<DeviceRecord>,
}

impl DeviceRegistry {
    /// Scan every USB bus for compatible PICkit 2 units.
    ///
    /// Each candidate with the right vendor and product ID is briefly opened
    /// and probed for its firmware version and unit ID. Candidates that fail
    /// the probe (units held by another process, or running firmware other
    /// than 2.30+) are skipped silently, since unrelated or legacy devices
    /// may legitimately share the bus. Probing does not disturb a device: its
    /// original USB configuration is put back before the probe handle is
    /// closed.
    ///
    /// # Errors
    ///
    /// Only failures to enumerate the buses themselves or to grow the
    /// registry abort a scan; per-device failures do not.
    pub fn scan() -> Result<Self, Error> {
        let mut records: Vec<DeviceRecord> = Vec::new();
        for device in rusb::devices()?.iter() {
            let Some(record) = probe(&device) else {
                continue;
            };
            debug!(
                "found PICkit 2 at {}:{} (unit ID {:?})",
                record.bus_number, record.device_address, record.unit_id
            );
            records.try_reserve(1).map_err(|_| Error::OutOfMemory)?;
            records.push(record);
        }
        debug!("scan complete, {} unit(s) found", records.len());
        Ok(Self { records })
    }

    /// The records found by the scan.
    pub fn devices(&self) -> &[DeviceRecord] {
        &self.records
    }

    /// Find a device by location, or the only device when `location` is
    /// `None`.
    ///
    /// A location has the form `"bus:address"`, as produced by
    /// [`DeviceRecord::location`].
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no record matches (or none exist),
    /// [`Error::Ambiguous`] if no location was given while several units are
    /// attached, and [`Error::InvalidParameter`] for a malformed location.
    pub fn find(&self, location: Option<&str>) -> Result<&DeviceRecord, Error> {
        let wanted = location.map(parse_location).transpose()?;
        let locations: Vec<(u8, u8)> = self
            .records
            .iter()
            .map(|record| (record.bus_number, record.device_address))
            .collect();
        let index = select(&locations, wanted)?;
        Ok(&self.records[index])
    }
}

/// Firmware version reported by a PICkit 2.
///
/// The auxiliary command set requires major version 2 with minor version 30
/// or later; [`DeviceRegistry::scan`] excludes units that do not meet this.
#[derive(Debug, Clone, Copy)]
pub struct FirmwareVersion {
    /// Major version; the protocol gate requires 2.
    pub major: u8,
    /// Minor version; the protocol gate requires at least 30.
    pub minor: u8,
    /// Patch-level version, not part of the compatibility gate.
    pub micro: u8,
}

impl FirmwareVersion {
    pub(crate) fn from_buffer(buffer: &[u8; PACKET_SIZE]) -> Self {
        Self {
            major: buffer[0],
            minor: buffer[1],
            micro: buffer[2],
        }
    }

    /// Whether this firmware speaks the command set the driver relies on.
    ///
    /// A different major version means an incompatible protocol; minor
    /// versions before 30 are missing some of the commands used here. The
    /// protocol reference documents version 2.30.
    pub fn is_supported(&self) -> bool {
        self.major == 2 && self.minor >= 30
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

/// Probe one enumerated USB device, returning a record if it is a
/// compatible PICkit 2.
///
/// Every failure here skips the candidate rather than failing the scan.
fn probe(device: &Device<GlobalContext>) -> Option<DeviceRecord> {
    let descriptor = device.device_descriptor().ok()?;
    if descriptor.vendor_id() != MICROCHIP_VID || descriptor.product_id() != PICKIT2_PID {
        return None;
    }

    let mut handle = match device.open() {
        Ok(handle) => handle,
        Err(error) => {
            debug!(
                "cannot open candidate at {}:{}: {error}",
                device.bus_number(),
                device.address()
            );
            return None;
        }
    };

    let original = match usb::enter_command_configuration(&mut handle) {
        Ok(original) => original,
        Err(error) => {
            debug!(
                "cannot configure candidate at {}:{}: {error}",
                device.bus_number(),
                device.address()
            );
            return None;
        }
    };

    let identified = identify(&handle);
    let _ = usb::leave_command_configuration(&mut handle, original);
    drop(handle);

    match identified {
        Ok(Some(unit_id)) => Some(DeviceRecord {
            unit_id,
            bus_number: device.bus_number(),
            device_address: device.address(),
            device: device.clone(),
        }),
        Ok(None) => None,
        Err(error) => {
            debug!(
                "probe of candidate at {}:{} failed: {error}",
                device.bus_number(),
                device.address()
            );
            None
        }
    }
}

/// Query firmware version and unit ID over an already-claimed handle.
///
/// `Ok(None)` means the unit answered but runs unsupported firmware.
fn identify(handle: &rusb::DeviceHandle<GlobalContext>) -> Result<Option<String>, Error> {
    usb::write_packet(handle, Packet::new().command(cmd::FIRMWARE_VERSION).bytes())?;
    let version = FirmwareVersion::from_buffer(&usb::read_packet(handle)?);
    if !version.is_supported() {
        debug!("skipping unit with unsupported firmware {version}");
        return Ok(None);
    }

    let request = Packet::new()
        .command(cmd::RD_INTERNAL_EE)
        .data(&[UNIT_ID_ADDRESS, UNIT_ID_LENGTH]);
    usb::write_packet(handle, request.bytes())?;
    let response = usb::read_packet(handle)?;
    Ok(Some(parse_unit_id(&response)))
}

/// Decode the unit-ID record read back from EEPROM.
///
/// A programmed record starts with `'#'` followed by up to 15 null-padded
/// characters; anything else (the factory state is all 0xFF) means the unit
/// has no ID.
fn parse_unit_id(buffer: &[u8; PACKET_SIZE]) -> String {
    if buffer[0] != UNIT_ID_MARKER {
        return String::new();
    }
    let id = &buffer[1..UNIT_ID_LENGTH as usize];
    let len = id.iter().position(|&b| b == 0).unwrap_or(id.len());
    String::from_utf8_lossy(&id[..len]).into_owned()
}

/// Parse a `"bus:address"` location string.
fn parse_location(location: &str) -> Result<(u8, u8), Error> {
    const MALFORMED: Error =
        Error::InvalidParameter("device location must have the form \"bus:address\"");
    let Some((bus, address)) = location.split_once(':') else {
        return Err(MALFORMED);
    };
    let bus = bus.parse().map_err(|_| MALFORMED)?;
    let address = address.parse().map_err(|_| MALFORMED)?;
    Ok((bus, address))
}

/// Pick the index of the matching record, or of the only record when no
/// location was requested.
fn select(locations: &[(u8, u8)], wanted: Option<(u8, u8)>) -> Result<usize, Error> {
    match wanted {
        Some(wanted) => locations
            .iter()
            .position(|&location| location == wanted)
            .ok_or(Error::NotFound),
        None => match locations.len() {
            0 => Err(Error::NotFound),
            1 => Ok(0),
            _ => Err(Error::Ambiguous),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_parsing() {
        assert_eq!(parse_location("1:4").unwrap(), (1, 4));
        assert_eq!(parse_location("250:3").unwrap(), (250, 3));
        assert!(parse_location("").is_err());
        assert!(parse_location("1").is_err());
        assert!(parse_location("1:4:2").is_err());
        assert!(parse_location("bus:addr").is_err());
        assert!(parse_location("300:1").is_err());
    }

    #[test]
    fn select_only_device_without_location() {
        assert_eq!(select(&[(1, 4)], None).unwrap(), 0);
    }

    #[test]
    fn select_without_location_needs_exactly_one_device() {
        assert!(matches!(select(&[], None), Err(Error::NotFound)));
        assert!(matches!(
            select(&[(1, 4), (1, 5)], None),
            Err(Error::Ambiguous)
        ));
    }

    #[test]
    fn select_by_location() {
        let locations = [(1, 4), (2, 7)];
        assert_eq!(select(&locations, Some((2, 7))).unwrap(), 1);
        assert!(matches!(
            select(&locations, Some((2, 8))),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn firmware_gate_requires_major_2_minor_30() {
        let version = |major, minor| FirmwareVersion {
            major,
            minor,
            micro: 0,
        };
        assert!(version(2, 30).is_supported());
        assert!(version(2, 32).is_supported());
        assert!(!version(2, 29).is_supported());
        assert!(!version(1, 50).is_supported());
        assert!(!version(3, 0).is_supported());
    }

    #[test]
    fn unit_id_record_parsing() {
        let mut buffer = [0xFFu8; PACKET_SIZE];
        assert_eq!(parse_unit_id(&buffer), "");

        buffer[0] = UNIT_ID_MARKER;
        buffer[1..4].copy_from_slice(b"ABC");
        buffer[4..16].fill(0);
        assert_eq!(parse_unit_id(&buffer), "ABC");

        // A full 15-character ID has no null padding.
        buffer[1..16].copy_from_slice(b"ABCDEFGHIJKLMNO");
        assert_eq!(parse_unit_id(&buffer), "ABCDEFGHIJKLMNO");
    }
}
