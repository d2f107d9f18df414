//! PGC, PGD and AUX pin control.

use bit_field::BitField;

use super::PicKit2;
use crate::commands::{Packet, cmd, script};
use crate::error::Error;
use crate::pins::PinMode;

/// # Programming pin control
///
/// The device configures PGC and PGD with a single command that covers
/// both, so the driver keeps a shadow copy of each pin's drive direction
/// and folds it back in whenever the other pin changes. The shadow is
/// seeded from the device's I/O registers when the session opens; changing
/// a pin mode refreshes it. Drive levels are not shadowed and are read
/// back from the device on demand.
impl PicKit2 {
    /// Configure the PGC pin, leaving PGD as it is.
    pub fn pgc_set_mode(&mut self, mode: PinMode) -> Result<(), Error> {
        let pgd = self.resolve_pgd()?;
        self.set_pg_modes(mode, pgd)
    }

    /// Configure the PGD pin, leaving PGC as it is.
    pub fn pgd_set_mode(&mut self, mode: PinMode) -> Result<(), Error> {
        let pgc = self.resolve_pgc()?;
        self.set_pg_modes(pgc, mode)
    }

    /// Configure the PGC and PGD pins together.
    pub fn set_pg_modes(&mut self, pgc: PinMode, pgd: PinMode) -> Result<(), Error> {
        let ops = [script::SET_ICSP_PINS, icsp_pin_bits(pgc, pgd)];
        self.write(&Packet::new().script(&ops))?;
        self.pgc_floating = pgc == PinMode::Floating;
        self.pgd_floating = pgd == PinMode::Floating;
        Ok(())
    }

    /// Report the modes both programming pins are in, PGC first.
    ///
    /// Floating pins are answered from the shadow state without touching
    /// the device; driven pins need a query for their level.
    pub fn pg_modes(&mut self) -> Result<(PinMode, PinMode), Error> {
        if self.pgc_floating && self.pgd_floating {
            return Ok((PinMode::Floating, PinMode::Floating));
        }
        let states = self.query_icsp_states()?;
        let pgc = resolve_mode(self.pgc_floating, states.get_bit(0));
        let pgd = resolve_mode(self.pgd_floating, states.get_bit(1));
        Ok((pgc, pgd))
    }

    /// Report the mode the PGC pin is in.
    pub fn pgc_mode(&mut self) -> Result<PinMode, Error> {
        self.resolve_pgc()
    }

    /// Report the mode the PGD pin is in.
    pub fn pgd_mode(&mut self) -> Result<PinMode, Error> {
        self.resolve_pgd()
    }

    /// Read the logic level on the PGC pin.
    ///
    /// Meaningful for a floating pin, where the target circuit sets the
    /// level; a driven pin just reads back its own drive.
    pub fn pgc_level(&mut self) -> Result<bool, Error> {
        Ok(self.query_icsp_states()?.get_bit(0))
    }

    /// Read the logic level on the PGD pin.
    ///
    /// Meaningful for a floating pin, where the target circuit sets the
    /// level; a driven pin just reads back its own drive.
    pub fn pgd_level(&mut self) -> Result<bool, Error> {
        Ok(self.query_icsp_states()?.get_bit(1))
    }

    /// Configure the AUX pin.
    ///
    /// AUX is set on its own, so no shadow state is involved.
    pub fn aux_set_mode(&mut self, mode: PinMode) -> Result<(), Error> {
        let operand = match mode {
            PinMode::Grounded => 0x00,
            PinMode::Floating => 0x01,
            PinMode::High => 0x02,
        };
        self.write(&Packet::new().script(&[script::SET_AUX, operand]))
    }

    /// Read the logic level on the AUX pin.
    pub fn aux_level(&mut self) -> Result<bool, Error> {
        self.write(
            &Packet::new()
                .command(cmd::CLR_UPLOAD_BUFFER)
                .script(&[script::AUX_STATE_BUFFER])
                .command(cmd::UPLOAD_DATA),
        )?;
        let response = self.read()?;
        assert_eq!(response[0], 1, "AUX state query uploads exactly one byte.");
        Ok(response[1].get_bit(0))
    }

    fn resolve_pgc(&mut self) -> Result<PinMode, Error> {
        if self.pgc_floating {
            return Ok(PinMode::Floating);
        }
        let states = self.query_icsp_states()?;
        Ok(resolve_mode(false, states.get_bit(0)))
    }

    fn resolve_pgd(&mut self) -> Result<PinMode, Error> {
        if self.pgd_floating {
            return Ok(PinMode::Floating);
        }
        let states = self.query_icsp_states()?;
        Ok(resolve_mode(false, states.get_bit(1)))
    }

    /// Read the ICSP pin state byte, PGC in bit 0 and PGD in bit 1.
    fn query_icsp_states(&mut self) -> Result<u8, Error> {
        self.write(
            &Packet::new()
                .command(cmd::CLR_UPLOAD_BUFFER)
                .script(&[script::ICSP_STATES_BUFFER])
                .command(cmd::UPLOAD_DATA),
        )?;
        let response = self.read()?;
        assert_eq!(response[0], 1, "ICSP state query uploads exactly one byte.");
        Ok(response[1])
    }
}

/// Pack both programming pin modes into the `SET_ICSP_PINS` operand.
fn icsp_pin_bits(pgc: PinMode, pgd: PinMode) -> u8 {
    let mut bits = 0u8;
    bits.set_bit(0, pgc == PinMode::Floating);
    bits.set_bit(1, pgd == PinMode::Floating);
    bits.set_bit(2, pgc == PinMode::High);
    bits.set_bit(3, pgd == PinMode::High);
    bits
}

/// Combine a pin's shadowed direction with its reported level.
fn resolve_mode(floating: bool, level_high: bool) -> PinMode {
    if floating {
        PinMode::Floating
    } else if level_high {
        PinMode::High
    } else {
        PinMode::Grounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icsp_operand_packs_direction_and_drive() {
        assert_eq!(icsp_pin_bits(PinMode::Grounded, PinMode::Grounded), 0b0000);
        assert_eq!(icsp_pin_bits(PinMode::Floating, PinMode::Floating), 0b0011);
        assert_eq!(icsp_pin_bits(PinMode::High, PinMode::High), 0b1100);
        assert_eq!(icsp_pin_bits(PinMode::High, PinMode::Floating), 0b0110);
        assert_eq!(icsp_pin_bits(PinMode::Floating, PinMode::Grounded), 0b0001);
    }

    #[test]
    fn floating_shadow_wins_over_reported_level() {
        assert_eq!(resolve_mode(true, true), PinMode::Floating);
        assert_eq!(resolve_mode(true, false), PinMode::Floating);
        assert_eq!(resolve_mode(false, true), PinMode::High);
        assert_eq!(resolve_mode(false, false), PinMode::Grounded);
    }
}
