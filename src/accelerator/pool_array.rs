use super::{
    fabric::Payload,
    metrics::{EnergyCounter, Metered, StageKind},
};
use crate::{
    models::{Cost, TechModel},
    net::PoolMethod,
};

/// # Description
/// `Pin` reduction units, each reducing one Kh x Kw window to its max or its mean
/// * max: `Kh*Kw - 1` comparators per lane
/// * average: `Kh*Kw - 1` adders per lane
#[derive(Debug)]
pub struct PoolArray {
    pin: usize,
    kk: usize,
    method: PoolMethod,
    unit: Cost,
    energy: EnergyCounter,
}

impl PoolArray {
    pub fn new(pin: usize, kk: usize, method: PoolMethod, model: &TechModel) -> Self {
        let unit = match method {
            PoolMethod::Max => model.comparator(),
            PoolMethod::Avg => model.adder(),
        };
        PoolArray {
            pin,
            kk,
            method,
            unit,
            energy: EnergyCounter::default(),
        }
    }

    pub fn num_units(&self) -> usize {
        self.pin * self.kk.saturating_sub(1)
    }

    /// reduce the `Pin * KK` windows, lanes from `active` on produce zero
    pub fn compute(&mut self, active: usize, windows: &[Payload], out: &mut Vec<Payload>) {
        self.energy.record(
            self.unit.dynamic_energy,
            active * self.kk.saturating_sub(1),
        );
        out.clear();
        if windows.is_empty() {
            return;
        }
        for i in 0..self.pin {
            let window = &windows[i * self.kk..(i + 1) * self.kk];
            let value = if i >= active {
                0.
            } else {
                match self.method {
                    PoolMethod::Max => window.iter().copied().fold(window[0], Payload::max),
                    PoolMethod::Avg => window.iter().sum::<Payload>() / self.kk as Payload,
                }
            };
            out.push(value);
        }
    }

    pub fn reset(&mut self) {
        self.energy.reset();
    }
}

impl Metered for PoolArray {
    fn kind(&self) -> StageKind {
        StageKind::PoolArray
    }

    fn area(&self) -> f64 {
        self.unit.area * self.num_units() as f64
    }

    fn static_power(&self) -> f64 {
        self.unit.static_power * self.num_units() as f64
    }

    fn energy(&self) -> &EnergyCounter {
        &self.energy
    }
}
