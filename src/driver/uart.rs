//! The UART bridge, which turns the programmer into a crude serial adapter.

use std::thread;
use std::time::Duration;

use log::debug;

use super::{PicKit2, usb};
use crate::commands::{Packet, cmd};
use crate::error::Error;

/// The device buffers at most this many received bytes per upload.
const PENDING_CAPACITY: usize = 63;

/// Payload bytes per `DOWNLOAD_DATA` packet, leaving room for the command
/// and length bytes.
const CHUNK: usize = 62;

const BAUD_MIN: u32 = 92;
const BAUD_MAX: u32 = 57_600;

/// Bookkeeping for an active bridge.
#[derive(Debug)]
pub(super) struct UartState {
    baud: u32,
    /// Received bytes the caller has not collected yet.
    pending: [u8; PENDING_CAPACITY],
    pending_len: usize,
}

impl UartState {
    fn new(baud: u32) -> Self {
        Self {
            baud,
            pending: [0; PENDING_CAPACITY],
            pending_len: 0,
        }
    }

    /// Move as much buffered data as fits into `buffer`, compacting what
    /// remains to the front.
    fn take_pending(&mut self, buffer: &mut [u8]) -> usize {
        let taken = self.pending_len.min(buffer.len());
        buffer[..taken].copy_from_slice(&self.pending[..taken]);
        self.pending.copy_within(taken..self.pending_len, 0);
        self.pending_len -= taken;
        taken
    }

    /// Hold on to bytes the caller's buffer had no room for.
    fn stash(&mut self, data: &[u8]) {
        self.pending[..data.len()].copy_from_slice(data);
        self.pending_len = data.len();
    }
}

/// # UART bridge
///
/// While the bridge is active the PGC pin carries data from the target and
/// the AUX pin carries data to it, both at TTL levels with the usual 8N1
/// framing. Regular commands keep working, but pin and power operations
/// would fight the bridge for the same pins.
impl PicKit2 {
    /// Start bridging, or change the baud rate of an active bridge.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] if `baud` falls outside 92..=57600, the
    /// range the baud rate generator can express.
    pub fn uart_start(&mut self, baud: u32) -> Result<(), Error> {
        let generator = baud_generator(baud)?;
        if self.uart.is_some() {
            self.uart_stop()?;
        }
        let [generator_low, generator_high] = generator.to_le_bytes();
        self.write(
            &Packet::new()
                .command(cmd::ENTER_UART_MODE)
                .data(&[generator_low, generator_high]),
        )?;
        self.uart = Some(UartState::new(baud));
        debug!("UART bridge running at {baud} baud");
        Ok(())
    }

    /// Stop bridging and return the pins to ordinary control.
    ///
    /// Does nothing when the bridge is not active. Data received but never
    /// collected is discarded.
    pub fn uart_stop(&mut self) -> Result<(), Error> {
        if self.uart.is_none() {
            return Ok(());
        }
        self.write(
            &Packet::new()
                .command(cmd::EXIT_UART_MODE)
                .command(cmd::CLR_UPLOAD_BUFFER),
        )?;
        self.uart = None;
        debug!("UART bridge stopped");
        Ok(())
    }

    /// Collect data received from the target into `buffer`.
    ///
    /// Never blocks; returns the number of bytes written, which is zero
    /// when nothing has arrived or the bridge is not active. Bytes the
    /// device reported but `buffer` had no room for are held for the next
    /// call.
    pub fn uart_receive(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let Some(uart) = self.uart.as_mut() else {
            return Ok(0);
        };
        if uart.pending_len > 0 {
            return Ok(uart.take_pending(buffer));
        }
        let request = Packet::new().command(cmd::UPLOAD_DATA);
        usb::write_packet(&self.handle, request.bytes())?;
        let response = usb::read_packet(&self.handle)?;
        let available = (response[0] as usize).min(PENDING_CAPACITY);
        let delivered = available.min(buffer.len());
        buffer[..delivered].copy_from_slice(&response[1..1 + delivered]);
        uart.stash(&response[1 + delivered..1 + available]);
        Ok(delivered)
    }

    /// Send `data` to the target.
    ///
    /// Blocks until the device has had time to clock the data out, so that
    /// back-to-back sends cannot overrun its transmit buffer.
    ///
    /// # Errors
    ///
    /// [`Error::UartInactive`] if the bridge is not running.
    pub fn uart_send(&mut self, data: &[u8]) -> Result<(), Error> {
        let Some(uart) = self.uart.as_ref() else {
            return Err(Error::UartInactive);
        };
        let baud = uart.baud;
        for chunk in data.chunks(CHUNK) {
            self.write(&download_packet(chunk))?;
            pace(chunk.len(), baud);
        }
        Ok(())
    }
}

/// Compute the device's 16-bit baud rate generator value.
fn baud_generator(baud: u32) -> Result<u16, Error> {
    if !(BAUD_MIN..=BAUD_MAX).contains(&baud) {
        return Err(Error::InvalidParameter("baud rate outside 92..=57600"));
    }
    let generator = 65536.0 - ((1.0 / f64::from(baud) - 3.0e-6) / 1.67e-7);
    Ok(generator.round() as u16)
}

/// Build one transmit packet carrying up to [`CHUNK`] bytes.
fn download_packet(chunk: &[u8]) -> Packet {
    Packet::new()
        .command(cmd::DOWNLOAD_DATA)
        .byte(chunk.len() as u8)
        .data(chunk)
}

/// How long the device needs to clock out `bytes` at `baud`, in
/// milliseconds, counting start and stop bits.
fn drain_millis(bytes: usize, baud: u32) -> u64 {
    1000 * bytes as u64 * 11 / u64::from(baud)
}

/// Sleep until the device has drained its transmit buffer.
fn pace(bytes: usize, baud: u32) {
    let mut remaining = drain_millis(bytes, baud);
    while remaining > 0 {
        let step = remaining.min(1000);
        thread::sleep(Duration::from_millis(step));
        remaining -= step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baud_generator_covers_the_supported_range() {
        assert_eq!(baud_generator(BAUD_MIN).unwrap(), 467);
        assert_eq!(baud_generator(9600).unwrap(), 64930);
        assert_eq!(baud_generator(BAUD_MAX).unwrap(), 65450);
    }

    #[test]
    fn baud_generator_rejects_rates_it_cannot_express() {
        assert!(baud_generator(BAUD_MIN - 1).is_err());
        assert!(baud_generator(BAUD_MAX + 1).is_err());
        assert!(baud_generator(0).is_err());
    }

    #[test]
    fn transmissions_split_into_packet_sized_chunks() {
        let data = [0xA5u8; 200];
        let chunks: Vec<_> = data.chunks(CHUNK).collect();
        assert_eq!(
            chunks.iter().map(|c| c.len()).collect::<Vec<_>>(),
            [62, 62, 62, 14]
        );
        for chunk in chunks {
            let packet = download_packet(chunk);
            assert_eq!(packet.bytes()[0], cmd::DOWNLOAD_DATA);
            assert_eq!(packet.bytes()[1] as usize, chunk.len());
            assert!(packet.bytes().len() <= 64);
        }
    }

    #[test]
    fn pending_data_survives_partial_reads() {
        let mut state = UartState::new(9600);
        state.stash(&[1, 2, 3, 4, 5]);

        let mut small = [0u8; 2];
        assert_eq!(state.take_pending(&mut small), 2);
        assert_eq!(small, [1, 2]);

        let mut rest = [0u8; 8];
        assert_eq!(state.take_pending(&mut rest), 3);
        assert_eq!(&rest[..3], &[3, 4, 5]);
        assert_eq!(state.take_pending(&mut rest), 0);
    }

    #[test]
    fn drain_time_counts_framing_bits() {
        assert_eq!(drain_millis(62, 9600), 71);
        assert_eq!(drain_millis(0, 9600), 0);
        // A full chunk at the slowest rate still paces in capped steps.
        assert_eq!(drain_millis(62, BAUD_MIN), 7413);
    }
}
