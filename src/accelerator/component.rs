use super::fabric::Fabric;
use crate::error::AccError;

/// # Description
/// a clocked piece of hardware connected to the fabric
///
/// every cycle has two phases:
/// 1. `drive` is called on all components until no signal changes any more
/// 2. `cycle` is called on all components with the settled signals, this is the rising edge
///
/// a component only writes the signals it owns, so the order of the calls in a phase does not
/// matter
pub trait Component {
    /// put the outputs on the fabric, may depend on the current inputs for combinational parts
    fn drive(&self, fabric: &mut Fabric);
    /// advance the state by one rising clock edge
    fn cycle(&mut self, fabric: &Fabric) -> Result<(), AccError>;
    /// synchronous reset
    fn reset(&mut self);
}
