//! The tri-state pin termination shared by every controllable pin.

/// How a power or signal pin is electrically terminated at the ICSP
/// connector.
///
/// Precise electrical details differ per pin: VDD high is the output of the
/// linear regulator, VPP high is the output of the charge pump, and the
/// signal pins are driven through series resistors with a clamp to VDD. See
/// the individual pin methods on [`PicKit2`] for specifics.
///
/// [`PicKit2`]: crate::PicKit2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// The pin is driven hard to ground through a transistor.
    Grounded,
    /// The pin is not driven and may be driven by the target circuit.
    Floating,
    /// The pin is driven high.
    High,
}
