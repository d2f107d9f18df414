//! VDD and VPP control and voltage measurement.

use super::PicKit2;
use crate::commands::{PACKET_SIZE, Packet, cmd, script};
use crate::error::Error;
use crate::pins::PinMode;

/// Voltages measured on both power rails by one query.
#[derive(Debug, Clone, Copy)]
pub struct VoltageReading {
    /// Voltage on the VDD pin, whatever its source (regulator, target
    /// circuit, or ground).
    pub vdd: f64,
    /// Voltage at the output of the VPP charge pump.
    pub vpp: f64,
}

impl VoltageReading {
    /// Decode the two little-endian 16-bit ADC samples of a `READ_VOLTAGES`
    /// response.
    fn from_buffer(buffer: &[u8; PACKET_SIZE]) -> Self {
        let vdd_sample = u16::from_le_bytes([buffer[0], buffer[1]]);
        let vpp_sample = u16::from_le_bytes([buffer[2], buffer[3]]);
        Self {
            vdd: f64::from(vdd_sample) * 5.0 / 65536.0,
            vpp: f64::from(vpp_sample) * 13.7 / 65536.0,
        }
    }
}

/// # Power rail control
impl PicKit2 {
    /// Configure the VDD pin.
    ///
    /// The pin can be driven hard to ground ([`PinMode::Grounded`]), left to
    /// float and be powered by the target circuit ([`PinMode::Floating`]),
    /// or driven from the output of the linear regulator
    /// ([`PinMode::High`]); set the regulator's voltage with
    /// [`PicKit2::vdd_set_level`].
    pub fn vdd_set_mode(&mut self, mode: PinMode) -> Result<(), Error> {
        // Always switch one transistor off before the other on. Harmless
        // either way given the series resistors, but it matches the order
        // the reference firmware expects.
        let ops = match mode {
            PinMode::Grounded => [script::VDD_OFF, script::VDD_GND_ON],
            PinMode::Floating => [script::VDD_OFF, script::VDD_GND_OFF],
            PinMode::High => [script::VDD_GND_OFF, script::VDD_ON],
        };
        self.write(&Packet::new().script(&ops))
    }

    /// Set the voltage produced by the VDD linear regulator.
    ///
    /// The regulator drives the pin while its mode is [`PinMode::High`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] for a voltage outside 0.0–5.0 V; nothing
    /// is sent to the device.
    pub fn vdd_set_level(&mut self, voltage: f64) -> Result<(), Error> {
        let (ccpr, fault) = vdd_registers(voltage)?;
        let [ccpr_low, ccpr_high] = ccpr.to_le_bytes();
        self.write(
            &Packet::new()
                .command(cmd::SETVDD)
                .data(&[ccpr_low, ccpr_high, fault]),
        )
    }

    /// Configure the VPP pin.
    ///
    /// The pin can be driven hard to ground ([`PinMode::Grounded`]), left
    /// floating ([`PinMode::Floating`]), or connected to the output of the
    /// charge pump ([`PinMode::High`]); set the pump's voltage with
    /// [`PicKit2::vpp_set_level`].
    pub fn vpp_set_mode(&mut self, mode: PinMode) -> Result<(), Error> {
        let ops = match mode {
            PinMode::Grounded => [script::VPP_OFF, script::MCLR_GND_ON],
            PinMode::Floating => [script::VPP_OFF, script::MCLR_GND_OFF],
            PinMode::High => [script::MCLR_GND_OFF, script::VPP_ON],
        };
        self.write(&Packet::new().script(&ops))
    }

    /// Set the voltage produced by the VPP charge pump, switching the pump
    /// on.
    ///
    /// The pump boosts the VDD regulator's output, so it cannot produce
    /// less than VDD, and high VPP levels may be unreachable when VDD is set
    /// low. Allow the pump around 100 ms to stabilize before relying on its
    /// output.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] for a voltage outside 0.0–13.7 V;
    /// nothing is sent to the device.
    pub fn vpp_set_level(&mut self, voltage: f64) -> Result<(), Error> {
        let (adc, fault) = vpp_registers(voltage)?;
        let packet = Packet::new()
            .script(&[script::VPP_PWM_ON])
            .command(cmd::SETVPP)
            .data(&[0x40, adc, fault]);
        self.write(&packet)
    }

    /// Shut down the VPP charge pump.
    ///
    /// The pin mode is left alone; with the pump stopped, a high VPP pin
    /// settles to roughly the VDD regulator's output. Stopping the pump
    /// saves power when programming voltages are not needed.
    pub fn vpp_stop_pump(&mut self) -> Result<(), Error> {
        self.write(&Packet::new().script(&[script::VPP_PWM_OFF]))
    }

    /// Measure both power rails with a single query.
    pub fn voltages(&mut self) -> Result<VoltageReading, Error> {
        self.write(&Packet::new().command(cmd::READ_VOLTAGES))?;
        Ok(VoltageReading::from_buffer(&self.read()?))
    }

    /// Measure the voltage on the VDD pin.
    pub fn vdd_voltage(&mut self) -> Result<f64, Error> {
        Ok(self.voltages()?.vdd)
    }

    /// Measure the voltage at the output of the VPP charge pump.
    pub fn vpp_voltage(&mut self) -> Result<f64, Error> {
        Ok(self.voltages()?.vpp)
    }
}

/// Compute the PWM duty-cycle (CCPR) and fault-trip registers for a VDD
/// level.
fn vdd_registers(voltage: f64) -> Result<(u16, u8), Error> {
    if !(0.0..=5.0).contains(&voltage) {
        return Err(Error::InvalidParameter("VDD voltage outside 0.0..=5.0 V"));
    }
    let ccpr = ((voltage * 32.0 + 10.5).round() as u32) << 6;
    assert!(ccpr <= u32::from(u16::MAX), "CCPR out of register range");
    let fault = (voltage * 0.7 / 5.0 * 255.0).round() as u32;
    assert!(fault <= u32::from(u8::MAX), "VDD fault out of register range");
    Ok((ccpr as u16, fault as u8))
}

/// Compute the ADC target and fault-trip registers for a VPP level.
fn vpp_registers(voltage: f64) -> Result<(u8, u8), Error> {
    if !(0.0..=13.7).contains(&voltage) {
        return Err(Error::InvalidParameter("VPP voltage outside 0.0..=13.7 V"));
    }
    let adc = (voltage * 18.61).round() as u32;
    assert!(adc <= u32::from(u8::MAX), "VPP target out of register range");
    let fault = (voltage * 0.7 * 18.61).round() as u32;
    assert!(fault <= u32::from(u8::MAX), "VPP fault out of register range");
    Ok((adc as u8, fault as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vdd_registers_cover_the_domain_and_increase() {
        let mut previous = None;
        for tenth in 0..=50 {
            let voltage = f64::from(tenth) * 0.1;
            let (ccpr, _fault) = vdd_registers(voltage).unwrap();
            if let Some(previous) = previous {
                assert!(ccpr > previous, "CCPR not increasing at {voltage} V");
            }
            previous = Some(ccpr);
        }
    }

    #[test]
    fn vdd_known_register_values() {
        // 5.0 V: round(5*32 + 10.5) << 6 = 171 << 6.
        assert_eq!(vdd_registers(5.0).unwrap(), (171 << 6, 178));
        // 0.0 V still carries the fixed offset.
        assert_eq!(vdd_registers(0.0).unwrap().0, 11 << 6);
    }

    #[test]
    fn vdd_rejects_out_of_domain_voltages() {
        assert!(vdd_registers(-0.1).is_err());
        assert!(vdd_registers(5.1).is_err());
        assert!(vdd_registers(f64::NAN).is_err());
    }

    #[test]
    fn vpp_registers_fit_eight_bits_across_the_domain() {
        for tenth in 0..=137 {
            let voltage = f64::from(tenth) * 0.1;
            // The asserts inside would catch an out-of-range register.
            vpp_registers(voltage).unwrap();
        }
        // The very top of the domain saturates the ADC target exactly.
        assert_eq!(vpp_registers(13.7).unwrap(), (255, 178));
    }

    #[test]
    fn vpp_rejects_out_of_domain_voltages() {
        assert!(vpp_registers(-0.1).is_err());
        assert!(vpp_registers(13.8).is_err());
    }

    #[test]
    fn voltage_reading_decodes_little_endian_samples() {
        let mut buffer = [0u8; PACKET_SIZE];
        // Full-scale on both channels reads just below the reference.
        buffer[..4].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        let reading = VoltageReading::from_buffer(&buffer);
        assert!((reading.vdd - 5.0).abs() < 0.001);
        assert!((reading.vpp - 13.7).abs() < 0.001);

        buffer[..4].copy_from_slice(&[0x00, 0x80, 0x00, 0x00]);
        let reading = VoltageReading::from_buffer(&buffer);
        assert!((reading.vdd - 2.5).abs() < 0.001);
        assert_eq!(reading.vpp, 0.0);
    }
}
