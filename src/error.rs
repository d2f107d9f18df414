use thiserror::Error;

/// Errors raised while talking to a PICkit 2.
///
/// USB-level failures (timeouts, transfer errors, a claim held by another
/// process, allocation failures inside libusb) are carried through in the
/// [`Error::Usb`] case.
#[derive(Debug, Error)]
pub enum Error {
    /// A parameter was outside its legal range or malformed.
    ///
    /// Raised for out-of-domain voltages and baud rates, device locations
    /// that do not parse as `"bus:address"`, and non-ASCII unit IDs. Nothing
    /// is sent to the device.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// More data than the fixed-size wire format can carry.
    ///
    /// Raised for command payloads longer than one 64-byte packet and for
    /// unit IDs longer than 15 characters.
    #[error("{0}")]
    Overflow(&'static str),

    /// No scanned device matches the requested location.
    #[error("no matching PICkit 2 found")]
    NotFound,

    /// A device was requested without a location while several are attached.
    #[error("multiple PICkit 2 units attached, a device location is required")]
    Ambiguous,

    /// The device was not in the expected USB configuration after claiming
    /// its interface, meaning another process reconfigured it mid-open.
    #[error("device is busy or was reconfigured by another process")]
    Busy,

    /// An interrupt transfer completed but moved fewer bytes than one packet.
    #[error("short USB transfer: {transferred} of {expected} bytes")]
    ShortTransfer {
        /// The fixed packet size that should have been transferred.
        expected: usize,
        /// The number of bytes the transfer actually moved.
        transferred: usize,
    },

    /// A UART operation that requires an active bridge was called while idle.
    #[error("UART mode is not active")]
    UartInactive,

    /// The device registry could not be grown during a scan.
    #[error("out of memory while growing the device registry")]
    OutOfMemory,

    /// An error reported by the underlying USB stack.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}
