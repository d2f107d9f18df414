#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![deny(unsafe_code)]

mod commands;
mod device;
mod driver;
mod error;
mod pins;

pub use device::{DeviceRecord, DeviceRegistry, FirmwareVersion};
pub use driver::{PicKit2, VoltageReading};
pub use error::Error;
pub use pins::PinMode;
