//! Firmware opcodes and the outbound command packet builder.
//!
//! Every transaction with the PICkit 2 is one 64-byte packet each way. An
//! outbound packet holds one or more commands back to back; the firmware
//! stops parsing at the first [`cmd::END_OF_BUFFER`] byte, which is what the
//! transport layer pads unused space with. Composite pin and power actions
//! are expressed as an [`cmd::EXECUTE_SCRIPT`] command carrying a short
//! sequence of script opcodes run atomically on the device.

/// Top-level firmware commands, from the v2.30 firmware protocol reference.
///
/// Only the commands used by the auxiliary functions are listed; the
/// programming-related commands are deliberately absent.
pub(crate) mod cmd {
    pub const FIRMWARE_VERSION: u8 = 0x76;
    pub const SETVDD: u8 = 0xA0;
    pub const SETVPP: u8 = 0xA1;
    pub const READ_VOLTAGES: u8 = 0xA3;
    pub const EXECUTE_SCRIPT: u8 = 0xA6;
    pub const DOWNLOAD_DATA: u8 = 0xA8;
    pub const CLR_UPLOAD_BUFFER: u8 = 0xA9;
    pub const UPLOAD_DATA: u8 = 0xAA;
    /// Sentinel marking the end of the commands within a packet.
    pub const END_OF_BUFFER: u8 = 0xAD;
    pub const RESET: u8 = 0xAE;
    pub const WR_INTERNAL_EE: u8 = 0xB1;
    pub const RD_INTERNAL_EE: u8 = 0xB2;
    pub const ENTER_UART_MODE: u8 = 0xB3;
    pub const EXIT_UART_MODE: u8 = 0xB4;
}

/// Script-engine opcodes used by the auxiliary functions.
pub(crate) mod script {
    pub const AUX_STATE_BUFFER: u8 = 0xCE;
    pub const SET_AUX: u8 = 0xCF;
    pub const ICSP_STATES_BUFFER: u8 = 0xDC;
    pub const PEEK_SFR: u8 = 0xE2;
    pub const SET_ICSP_PINS: u8 = 0xF3;
    pub const MCLR_GND_OFF: u8 = 0xF6;
    pub const MCLR_GND_ON: u8 = 0xF7;
    pub const VPP_PWM_OFF: u8 = 0xF8;
    pub const VPP_PWM_ON: u8 = 0xF9;
    pub const VPP_OFF: u8 = 0xFA;
    pub const VPP_ON: u8 = 0xFB;
    pub const VDD_GND_OFF: u8 = 0xFC;
    pub const VDD_GND_ON: u8 = 0xFD;
    pub const VDD_OFF: u8 = 0xFE;
    pub const VDD_ON: u8 = 0xFF;
}

/// Size of every packet on the wire, in both directions.
pub(crate) const PACKET_SIZE: usize = 64;

/// EEPROM address of the 16-byte unit-ID record.
pub(crate) const UNIT_ID_ADDRESS: u8 = 0xF0;

/// Length of the unit-ID record: one marker byte plus up to 15 characters.
pub(crate) const UNIT_ID_LENGTH: u8 = 16;

/// First byte of a programmed unit-ID record.
pub(crate) const UNIT_ID_MARKER: u8 = b'#';

/// Accumulates the commands for one outbound packet.
///
/// The builder only tracks the meaningful head of the packet; padding with
/// [`cmd::END_OF_BUFFER`] happens when the packet is framed for the wire.
/// Overrunning the packet is a driver bug, not a device condition, and
/// fails an assertion.
pub(crate) struct Packet {
    bytes: [u8; PACKET_SIZE],
    len: usize,
}

impl Packet {
    pub(crate) fn new() -> Self {
        Self {
            bytes: [0; PACKET_SIZE],
            len: 0,
        }
    }

    /// Append a top-level command opcode.
    pub(crate) fn command(self, opcode: u8) -> Self {
        self.byte(opcode)
    }

    /// Append a single operand byte.
    pub(crate) fn byte(mut self, value: u8) -> Self {
        assert!(self.len < PACKET_SIZE, "command packet overrun");
        self.bytes[self.len] = value;
        self.len += 1;
        self
    }

    /// Append a run of operand bytes.
    pub(crate) fn data(mut self, values: &[u8]) -> Self {
        assert!(
            self.len + values.len() <= PACKET_SIZE,
            "command packet overrun"
        );
        self.bytes[self.len..self.len + values.len()].copy_from_slice(values);
        self.len += values.len();
        self
    }

    /// Append an `EXECUTE_SCRIPT` command running the given script opcodes.
    pub(crate) fn script(self, ops: &[u8]) -> Self {
        self.command(cmd::EXECUTE_SCRIPT)
            .byte(ops.len() as u8)
            .data(ops)
    }

    /// The meaningful head of the packet.
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_command_carries_length_and_ops() {
        let packet = Packet::new().script(&[script::PEEK_SFR, 0x92]);
        assert_eq!(
            packet.bytes(),
            &[cmd::EXECUTE_SCRIPT, 2, script::PEEK_SFR, 0x92]
        );
    }

    #[test]
    fn commands_chain_back_to_back() {
        let packet = Packet::new()
            .script(&[script::ICSP_STATES_BUFFER])
            .command(cmd::UPLOAD_DATA);
        assert_eq!(
            packet.bytes(),
            &[
                cmd::EXECUTE_SCRIPT,
                1,
                script::ICSP_STATES_BUFFER,
                cmd::UPLOAD_DATA
            ]
        );
    }

    #[test]
    fn full_size_packet_is_accepted() {
        let payload = [0u8; PACKET_SIZE - 2];
        let packet = Packet::new()
            .command(cmd::DOWNLOAD_DATA)
            .byte(payload.len() as u8)
            .data(&payload);
        assert_eq!(packet.bytes().len(), PACKET_SIZE);
    }
}
