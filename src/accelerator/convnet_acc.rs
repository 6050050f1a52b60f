//! # Description
//! - the assembled accelerator: every layer processing element, channel buffer, split and concat
//!   of a network, wired through one fabric
//! - the layers are walked once in order, so a connection is always defined before it is used
//!
//! # Connection names
//! - `{top}`: the output of a layer, after its appended channel buffer
//! - `{top}_append_channel_buffer`: the raw output of a conv, fc or pooling processing element
//! - `{bottom}_prepend_channel_buffer`: a concat branch after its prepended channel buffer
//! - bypassed layers alias their tops to their bottom

use std::collections::BTreeMap;

use log::{debug, info};
use serde::Serialize;

use super::{
    channel_buffer::{Capacity, ChannelBuffer},
    component::Component,
    concat_pe::ConcatPe,
    conv_pe::ConvLayerPe,
    fabric::{ChannelId, Fabric, Payload},
    layer_ctrl::{CtrlState, LayerCtrl},
    metrics::{Breakdown, Metered},
    pool_pe::PoolLayerPe,
    split_pe::SplitPe,
};
use crate::{
    error::AccError,
    models::TechModel,
    net::{Layer, LayerKind, Net},
    planner::{ParallelismPlan, PipelineDepths},
    settings::Settings,
};

/// one piece of hardware of the accelerator
#[derive(Debug)]
pub enum Unit {
    Conv(ConvLayerPe),
    Pool(PoolLayerPe),
    Buffer(ChannelBuffer),
    Split(SplitPe),
    Concat(ConcatPe),
}

impl Unit {
    pub fn name(&self) -> &str {
        match self {
            Unit::Conv(u) => &u.name,
            Unit::Pool(u) => &u.name,
            Unit::Buffer(u) => &u.name,
            Unit::Split(u) => &u.name,
            Unit::Concat(u) => &u.name,
        }
    }
}

impl Component for Unit {
    fn drive(&self, fabric: &mut Fabric) {
        match self {
            Unit::Conv(u) => u.drive(fabric),
            Unit::Pool(u) => u.drive(fabric),
            Unit::Buffer(u) => u.drive(fabric),
            Unit::Split(u) => u.drive(fabric),
            Unit::Concat(u) => u.drive(fabric),
        }
    }

    fn cycle(&mut self, fabric: &Fabric) -> Result<(), AccError> {
        match self {
            Unit::Conv(u) => u.cycle(fabric),
            Unit::Pool(u) => u.cycle(fabric),
            Unit::Buffer(u) => u.cycle(fabric),
            Unit::Split(u) => u.cycle(fabric),
            Unit::Concat(u) => u.cycle(fabric),
        }
    }

    fn reset(&mut self) {
        match self {
            Unit::Conv(u) => u.reset(),
            Unit::Pool(u) => u.reset(),
            Unit::Buffer(u) => u.reset(),
            Unit::Split(u) => u.reset(),
            Unit::Concat(u) => u.reset(),
        }
    }
}

/// pixels taken and produced by one layer processing element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerTransfers {
    pub name: String,
    pub accepted: u64,
    pub emitted: u64,
}

#[derive(Debug)]
pub struct ConvNetAcc {
    pub name: String,
    fabric: Fabric,
    units: Vec<Unit>,
    input: ChannelId,
    output: ChannelId,
    plan: ParallelismPlan,
}

impl ConvNetAcc {
    /// # Description
    /// build the hardware of `net` with the parallelism of `plan`
    ///
    /// # Return
    /// a configuration error when a connection is undefined or a compute layer has no parallelism
    pub fn new(net: &Net, plan: ParallelismPlan, settings: &Settings) -> Result<Self, AccError> {
        let hardware = &settings.hardware_settings;
        let model = TechModel::new(hardware.tech_node, hardware.bit_width, hardware.clk_freq)?;
        let mut builder = Builder {
            fabric: Fabric::new(),
            units: Vec::new(),
            model,
            settings,
            depths: PipelineDepths {
                nonlinearity: settings.pipeline_settings.extra_pipeline_stage,
            },
            input: None,
        };
        for (idx, layer) in net.layers().iter().enumerate() {
            builder.add_layer(idx, layer, &plan)?;
        }
        let input = builder.input.ok_or(AccError::MissingInput)?;
        let last = net.layers().last().ok_or(AccError::MissingInput)?;
        let output = last
            .tops
            .first()
            .and_then(|top| builder.fabric.lookup(top))
            .ok_or_else(|| AccError::UndefinedConnection {
                layer: last.name.clone(),
                connection: last.tops.first().cloned().unwrap_or_default(),
            })?;
        info!(
            "assembled {}: {} units, {} channels",
            net.name,
            builder.units.len(),
            builder.fabric.len()
        );
        Ok(ConvNetAcc {
            name: net.name.clone(),
            fabric: builder.fabric,
            units: builder.units,
            input,
            output,
            plan,
        })
    }

    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn plan(&self) -> &ParallelismPlan {
        &self.plan
    }

    /// the connection name to channel map, stable across runs of the same network
    pub fn registry(&self) -> &BTreeMap<String, ChannelId> {
        self.fabric.registry()
    }

    /// the boundary input, as deep as the input blob
    pub fn input(&self) -> ChannelId {
        self.input
    }

    /// the boundary output, as deep as the last blob
    pub fn output(&self) -> ChannelId {
        self.output
    }

    /// # Description
    /// evaluate the combinational logic of the accelerator and of the `external` drivers until no
    /// signal changes
    ///
    /// # Return
    /// the number of passes, or an error when the signals keep changing
    pub fn settle(&mut self, external: &[&dyn Component]) -> Result<usize, AccError> {
        let max_passes = 2 * (self.units.len() + external.len()) + 2;
        self.fabric.take_changed();
        for pass in 1..=max_passes {
            for driver in external.iter() {
                driver.drive(&mut self.fabric);
            }
            for unit in self.units.iter() {
                unit.drive(&mut self.fabric);
            }
            if !self.fabric.take_changed() {
                return Ok(pass);
            }
        }
        Err(AccError::CombinationalLoop(max_passes))
    }

    /// the rising edge of every unit, the fabric must be settled
    pub fn clock(&mut self) -> Result<(), AccError> {
        let fabric = &self.fabric;
        for unit in self.units.iter_mut() {
            unit.cycle(fabric)?;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.fabric.reset();
        self.units.iter_mut().for_each(Component::reset);
    }

    /// every buffer is empty and every layer waits for its next input pixel
    pub fn is_drained(&self) -> bool {
        self.units.iter().all(|unit| match unit {
            Unit::Conv(pe) => waiting(pe.ctrl()),
            Unit::Pool(pe) => waiting(pe.ctrl()),
            Unit::Buffer(buffer) => buffer.occupancy() == 0,
            Unit::Split(_) | Unit::Concat(_) => true,
        })
    }

    pub fn layer_transfers(&self) -> Vec<LayerTransfers> {
        self.units
            .iter()
            .filter_map(|unit| match unit {
                Unit::Conv(pe) => Some((&pe.name, pe.accepted, pe.emitted)),
                Unit::Pool(pe) => Some((&pe.name, pe.accepted, pe.emitted)),
                _ => None,
            })
            .map(|(name, accepted, emitted)| LayerTransfers {
                name: name.clone(),
                accepted,
                emitted,
            })
            .collect()
    }

    /// the maximum occupancy of every channel buffer, keyed by buffer name
    pub fn buffer_occupancies(&self) -> BTreeMap<String, usize> {
        self.units
            .iter()
            .filter_map(|unit| match unit {
                Unit::Buffer(buffer) => Some((buffer.name.clone(), buffer.max_occupancy())),
                _ => None,
            })
            .collect()
    }

    /// # Description
    /// the area and power of every stage category after `cycles` simulated cycles
    pub fn breakdown(&self, cycles: u64) -> Breakdown {
        let mut breakdown = Breakdown::default();
        for unit in self.units.iter() {
            let stages: Vec<&dyn Metered> = match unit {
                Unit::Conv(pe) => pe.stages(),
                Unit::Pool(pe) => pe.stages(),
                Unit::Buffer(buffer) => vec![buffer],
                Unit::Split(_) | Unit::Concat(_) => vec![],
            };
            for stage in stages {
                breakdown.add_stage(stage, cycles);
            }
        }
        breakdown
    }

    /// # Description
    /// load the weights of a conv or fc layer, laid out as the weight memory words in read order
    pub fn load_weights(&mut self, layer: &str, weights: Vec<Payload>) -> Result<(), AccError> {
        let pe = self
            .units
            .iter_mut()
            .find_map(|unit| match unit {
                Unit::Conv(pe) if pe.name == layer => Some(pe),
                _ => None,
            })
            .ok_or_else(|| AccError::invalid_layer(layer, "not a convolution class layer"))?;
        pe.weights_mut()
            .load(weights)
            .map_err(|reason| AccError::invalid_layer(layer, reason))
    }
}

fn waiting(ctrl: &LayerCtrl) -> bool {
    ctrl.state() == CtrlState::Accept && ctrl.pipeline().is_idle()
}

struct Builder<'a> {
    fabric: Fabric,
    units: Vec<Unit>,
    model: TechModel,
    settings: &'a Settings,
    depths: PipelineDepths,
    input: Option<ChannelId>,
}

impl Builder<'_> {
    fn lookup(&self, layer: &Layer, connection: &str) -> Result<ChannelId, AccError> {
        self.fabric
            .lookup(connection)
            .ok_or_else(|| AccError::UndefinedConnection {
                layer: layer.name.clone(),
                connection: connection.to_string(),
            })
    }

    fn single_bottom<'l>(&self, layer: &'l Layer) -> Result<&'l str, AccError> {
        match layer.bottoms.as_slice() {
            [bottom] => Ok(bottom),
            _ => Err(AccError::invalid_layer(
                &layer.name,
                format!("expects one bottom, found {}", layer.bottoms.len()),
            )),
        }
    }

    fn top_depth(layer: &Layer) -> Result<usize, AccError> {
        layer
            .top_shapes
            .first()
            .map(|s| s.channels)
            .ok_or_else(|| AccError::invalid_layer(&layer.name, "no output shape"))
    }

    fn add_layer(&mut self, idx: usize, layer: &Layer, plan: &ParallelismPlan) -> Result<(), AccError> {
        debug!("wiring layer {}: {:?}", layer.name, layer.kind);
        match &layer.kind {
            LayerKind::Input => {
                let depth = Self::top_depth(layer)?;
                for top in layer.tops.iter() {
                    let id = self.fabric.allocate(top, depth)?;
                    self.input.get_or_insert(id);
                }
            }
            LayerKind::Convolution(params) | LayerKind::InnerProduct(params) => {
                let prev = self.lookup(layer, self.single_bottom(layer)?)?;
                let p = plan
                    .get(idx)
                    .ok_or_else(|| AccError::MissingParallelism(layer.name.clone()))?;
                let pout = p
                    .pout
                    .ok_or_else(|| AccError::MissingParallelism(layer.name.clone()))?;
                let next = self.append_output(layer)?;
                let pe = ConvLayerPe::new(
                    &layer.name,
                    prev,
                    next,
                    params,
                    p.pin,
                    pout,
                    self.depths,
                    self.settings.hardware_settings.memory_type,
                    self.settings.pipeline_settings.functional_datapath,
                    &self.model,
                )?;
                self.units.push(Unit::Conv(pe));
                self.append_buffer(layer, next)?;
            }
            LayerKind::Pooling(params) => {
                let prev = self.lookup(layer, self.single_bottom(layer)?)?;
                let p = plan
                    .get(idx)
                    .ok_or_else(|| AccError::MissingParallelism(layer.name.clone()))?;
                let next = self.append_output(layer)?;
                let pe = PoolLayerPe::new(
                    &layer.name,
                    prev,
                    next,
                    params,
                    p.pin,
                    self.depths,
                    self.settings.pipeline_settings.functional_datapath,
                    &self.model,
                )?;
                self.units.push(Unit::Pool(pe));
                self.append_buffer(layer, next)?;
            }
            LayerKind::Split => {
                let bottom = self.single_bottom(layer)?;
                let prev = self.lookup(layer, bottom)?;
                if layer.tops.len() < 2 {
                    for top in layer.tops.iter() {
                        self.fabric.alias(top, prev);
                    }
                    return Ok(());
                }
                let depth = self.fabric.channel(prev).depth();
                let nexts = layer
                    .tops
                    .iter()
                    .map(|top| self.fabric.allocate(top, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                self.units
                    .push(Unit::Split(SplitPe::new(&layer.name, prev, nexts)?));
            }
            LayerKind::Concat => {
                let capacity = Capacity::from(self.settings.buffer_settings.inception_buffer_capacity);
                let mut prevs = Vec::with_capacity(layer.bottoms.len());
                for bottom in layer.bottoms.iter() {
                    let branch = self.lookup(layer, bottom)?;
                    let depth = self.fabric.channel(branch).depth();
                    let buffered = self
                        .fabric
                        .allocate(&format!("{}_prepend_channel_buffer", bottom), depth)?;
                    self.units.push(Unit::Buffer(ChannelBuffer::new(
                        &format!("{}_prepend_channel_buffer_{}", layer.name, bottom),
                        branch,
                        buffered,
                        depth,
                        capacity,
                        self.settings.buffer_settings.cut_through,
                        self.model,
                    )));
                    prevs.push(buffered);
                }
                let top = layer
                    .tops
                    .first()
                    .ok_or_else(|| AccError::invalid_layer(&layer.name, "no top"))?;
                let next = self.fabric.allocate(top, Self::top_depth(layer)?)?;
                self.units
                    .push(Unit::Concat(ConcatPe::new(&layer.name, prevs, next)?));
            }
            LayerKind::Bypass => {
                let bottom = self.single_bottom(layer)?;
                let prev = self.lookup(layer, bottom)?;
                for top in layer.tops.iter().filter(|top| top.as_str() != bottom) {
                    debug!("{}: {} aliases {}", layer.name, top, bottom);
                    self.fabric.alias(top, prev);
                }
            }
        }
        Ok(())
    }

    /// the raw output of a processing element, waiting for its buffer
    fn append_output(&mut self, layer: &Layer) -> Result<ChannelId, AccError> {
        let top = self.single_top(layer)?;
        self.fabric.allocate(
            &format!("{}_append_channel_buffer", top),
            Self::top_depth(layer)?,
        )
    }

    fn append_buffer(&mut self, layer: &Layer, raw: ChannelId) -> Result<(), AccError> {
        let top = self.single_top(layer)?;
        let depth = Self::top_depth(layer)?;
        let next = self.fabric.allocate(top, depth)?;
        let buffers = &self.settings.buffer_settings;
        self.units.push(Unit::Buffer(ChannelBuffer::new(
            &format!("{}_append_channel_buffer_{}", layer.name, top),
            raw,
            next,
            depth,
            Capacity::Bounded(buffers.append_buffer_capacity),
            buffers.cut_through,
            self.model,
        )));
        Ok(())
    }

    fn single_top<'l>(&self, layer: &'l Layer) -> Result<&'l str, AccError> {
        match layer.tops.as_slice() {
            [top] => Ok(top),
            _ => Err(AccError::invalid_layer(
                &layer.name,
                format!("expects one top, found {}", layer.tops.len()),
            )),
        }
    }
}
