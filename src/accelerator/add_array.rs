use super::{
    fabric::Payload,
    metrics::{EnergyCounter, Metered, StageKind},
};
use crate::models::{Cost, TechModel};

/// # Description
/// one adder tree per output lane, summing the `Pin * Kh * Kw` products of the lane onto the
/// running partial sum of its output channel
#[derive(Debug)]
pub struct AddArray {
    pout: usize,
    /// products per output lane
    fan_in: usize,
    unit: Cost,
    energy: EnergyCounter,
}

impl AddArray {
    pub fn new(pin: usize, pout: usize, kk: usize, model: &TechModel) -> Self {
        AddArray {
            pout,
            fan_in: pin * kk,
            unit: model.adder(),
            energy: EnergyCounter::default(),
        }
    }

    /// the tree of every lane plus its accumulator
    pub fn num_adders(&self) -> usize {
        self.pout * self.fan_in
    }

    /// # Arguments
    /// * `active_out`: the number of valid output lanes
    /// * `products`: the multiplier outputs, lane major
    /// * `partial`: the `Pout` partial sums read from the output register
    pub fn compute(
        &mut self,
        active_out: usize,
        products: &[Payload],
        partial: &[Payload],
        out: &mut Vec<Payload>,
    ) {
        self.energy
            .record(self.unit.dynamic_energy, active_out * self.fan_in);
        out.clear();
        if products.is_empty() {
            return;
        }
        for o in 0..self.pout {
            let sum = if o < active_out {
                let lane = &products[o * self.fan_in..(o + 1) * self.fan_in];
                partial.get(o).copied().unwrap_or(0.) + lane.iter().sum::<Payload>()
            } else {
                0.
            };
            out.push(sum);
        }
    }

    pub fn reset(&mut self) {
        self.energy.reset();
    }
}

impl Metered for AddArray {
    fn kind(&self) -> StageKind {
        StageKind::AddArray
    }

    fn area(&self) -> f64 {
        self.unit.area * self.num_adders() as f64
    }

    fn static_power(&self) -> f64 {
        self.unit.static_power * self.num_adders() as f64
    }

    fn energy(&self) -> &EnergyCounter {
        &self.energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate() -> Result<(), Box<dyn std::error::Error>> {
        let model = TechModel::new(28, 16, 1.0)?;
        let mut adds = AddArray::new(1, 3, 2, &model);
        let mut out = Vec::new();
        adds.compute(2, &[1., 2., 3., 4., 5., 6.], &[10., 20., 30.], &mut out);
        // the third lane is past the last output channel
        assert_eq!(out, vec![13., 27., 0.]);
        assert_eq!(adds.num_adders(), 6);
        assert_eq!(adds.energy().ops, 4);
        Ok(())
    }
}
