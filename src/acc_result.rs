use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    accelerator::{Breakdown, ChannelId, LayerTransfers, ThroughputStats},
    planner::ParallelismPlan,
    settings::Settings,
};

#[derive(Debug, Serialize)]
pub struct AccResult {
    pub settings: Option<Settings>,
    pub stats: Vec<AccStatistics>,
}

impl AccResult {
    pub fn new() -> Self {
        AccResult {
            settings: None,
            stats: Vec::new(),
        }
    }
}

impl Default for AccResult {
    fn default() -> Self {
        Self::new()
    }
}

/// the report of one simulated network
#[derive(Debug, Serialize)]
pub struct AccStatistics {
    pub cycle: u64,
    pub simulation_time: String,
    pub net_name: String,
    pub plan: ParallelismPlan,
    /// connection names to channel indices, the naming any hardware emitter must follow
    pub registry: BTreeMap<String, ChannelId>,
    pub throughput: ThroughputStats,
    pub layers: Vec<LayerTransfers>,
    /// maximum occupancy of every channel buffer
    pub buffer_occupancies: BTreeMap<String, usize>,
    pub breakdown: Breakdown,
}
