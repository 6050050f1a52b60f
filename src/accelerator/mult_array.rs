use super::{
    fabric::Payload,
    metrics::{EnergyCounter, Metered, StageKind},
};
use crate::models::{Cost, TechModel};

/// # Description
/// `Pout x Pin x Kh x Kw` multipliers
///
/// lane `(o, i, k)` multiplies activation `(i, k)` with weight `(o, i, k)`. a lane whose output
/// or input channel lies past the end of the layer is idle and produces zero.
#[derive(Debug)]
pub struct MultArray {
    pin: usize,
    pout: usize,
    kk: usize,
    unit: Cost,
    energy: EnergyCounter,
}

impl MultArray {
    pub fn new(pin: usize, pout: usize, kk: usize, model: &TechModel) -> Self {
        MultArray {
            pin,
            pout,
            kk,
            unit: model.multiplier(),
            energy: EnergyCounter::default(),
        }
    }

    pub fn num_mults(&self) -> usize {
        self.pout * self.pin * self.kk
    }

    /// # Arguments
    /// * `active_out`, `active_in`: the number of valid output and input lanes of this group
    /// * `acts`: `Pin * KK` activations, empty when the datapath is not simulated
    /// * `weights`: `Pout * Pin * KK` weights
    pub fn compute(
        &mut self,
        active_out: usize,
        active_in: usize,
        acts: &[Payload],
        weights: &[Payload],
        out: &mut Vec<Payload>,
    ) {
        self.energy
            .record(self.unit.dynamic_energy, active_out * active_in * self.kk);
        out.clear();
        if acts.is_empty() || weights.is_empty() {
            return;
        }
        for o in 0..self.pout {
            for i in 0..self.pin {
                let valid = o < active_out && i < active_in;
                for k in 0..self.kk {
                    let product = if valid {
                        acts[i * self.kk + k] * weights[(o * self.pin + i) * self.kk + k]
                    } else {
                        0.
                    };
                    out.push(product);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.energy.reset();
    }
}

impl Metered for MultArray {
    fn kind(&self) -> StageKind {
        StageKind::MultArray
    }

    fn area(&self) -> f64 {
        self.unit.area * self.num_mults() as f64
    }

    fn static_power(&self) -> f64 {
        self.unit.static_power * self.num_mults() as f64
    }

    fn energy(&self) -> &EnergyCounter {
        &self.energy
    }
}
