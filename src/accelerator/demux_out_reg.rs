use super::{
    fabric::Payload,
    metrics::{EnergyCounter, Metered, StageKind},
};
use crate::models::{Cost, TechModel};

/// # Description
/// the output register of a layer, `Nout` wide, written `Pout` channels at a time
///
/// the register also feeds the partial sums back to the add array
#[derive(Debug)]
pub struct DemuxOutReg {
    pout: usize,
    values: Vec<Payload>,
    cost: Cost,
    energy: EnergyCounter,
}

impl DemuxOutReg {
    pub fn new(nout: usize, pout: usize, model: &TechModel) -> Self {
        let outputs = (nout + pout - 1) / pout;
        DemuxOutReg {
            pout,
            values: vec![0.; nout],
            cost: model.demux(outputs).times(pout),
            energy: EnergyCounter::default(),
        }
    }

    pub fn values(&self) -> &[Payload] {
        &self.values
    }

    pub fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.);
    }

    /// write `data` to the channels starting at `start`, channels past `Nout` are dropped
    pub fn write(&mut self, start: usize, data: &[Payload]) {
        self.energy.record(self.cost.dynamic_energy, 1);
        let end = self.values.len().min(start + self.pout);
        for (i, value) in (start..end).zip(data.iter()) {
            self.values[i] = *value;
        }
    }

    /// the `Pout` partial sums starting at `start`, zero past `Nout`
    pub fn read_into(&self, start: usize, out: &mut Vec<Payload>) {
        out.clear();
        out.extend((start..start + self.pout).map(|i| self.values.get(i).copied().unwrap_or(0.)));
    }

    pub fn reset(&mut self) {
        self.clear();
        self.energy.reset();
    }
}

impl Metered for DemuxOutReg {
    fn kind(&self) -> StageKind {
        StageKind::DemuxOutReg
    }

    fn area(&self) -> f64 {
        self.cost.area
    }

    fn static_power(&self) -> f64 {
        self.cost.static_power
    }

    fn energy(&self) -> &EnergyCounter {
        &self.energy
    }
}
