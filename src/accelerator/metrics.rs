//! # Description
//! - energy counters of the datapath stages and the area/power breakdown built from them
//! - dynamic power is the accumulated energy divided by the elapsed cycles

use std::{collections::BTreeMap, ops::AddAssign};

use serde::Serialize;

/// the report categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StageKind {
    LineBuffer,
    LineBufferMux,
    WeightMem,
    MultArray,
    AddArray,
    PoolArray,
    DemuxOutReg,
    ChannelBuffer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EnergyCounter {
    pub energy: f64,
    pub ops: u64,
}

impl EnergyCounter {
    pub fn record(&mut self, energy_per_op: f64, ops: usize) {
        self.energy += energy_per_op * ops as f64;
        self.ops += ops as u64;
    }

    pub fn average_power(&self, cycles: u64) -> f64 {
        if cycles == 0 {
            0.
        } else {
            self.energy / cycles as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// area in um2, power in uW
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PowerReport {
    pub area: f64,
    pub static_power: f64,
    pub dynamic_power: f64,
}

impl PowerReport {
    pub fn total_power(&self) -> f64 {
        self.static_power + self.dynamic_power
    }
}

impl AddAssign for PowerReport {
    fn add_assign(&mut self, rhs: Self) {
        self.area += rhs.area;
        self.static_power += rhs.static_power;
        self.dynamic_power += rhs.dynamic_power;
    }
}

/// hardware with a cached area and an energy counter
pub trait Metered {
    fn kind(&self) -> StageKind;
    fn area(&self) -> f64;
    fn static_power(&self) -> f64;
    fn energy(&self) -> &EnergyCounter;

    fn report(&self, cycles: u64) -> PowerReport {
        PowerReport {
            area: self.area(),
            static_power: self.static_power(),
            dynamic_power: self.energy().average_power(cycles),
        }
    }
}

/// the per category sums of a whole accelerator
#[derive(Debug, Clone, Default, Serialize)]
pub struct Breakdown {
    pub stages: BTreeMap<StageKind, PowerReport>,
    pub total: PowerReport,
}

impl Breakdown {
    pub fn add(&mut self, kind: StageKind, report: PowerReport) {
        *self.stages.entry(kind).or_default() += report;
        self.total += report;
    }

    pub fn add_stage(&mut self, stage: &dyn Metered, cycles: u64) {
        self.add(stage.kind(), stage.report(cycles));
    }

    pub fn merge(&mut self, other: &Breakdown) {
        for (kind, report) in other.stages.iter() {
            self.add(*kind, *report);
        }
    }
}
