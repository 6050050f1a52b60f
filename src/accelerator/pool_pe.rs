use log::debug;

use super::{
    component::Component,
    demux_out_reg::DemuxOutReg,
    fabric::{ChannelId, Fabric, Payload},
    layer_ctrl::{ChannelGroups, CtrlKind, LayerCtrl},
    line_buffer::{LineBufferArray, LineBufferMux},
    metrics::Metered,
    pool_array::PoolArray,
};
use crate::{error::AccError, models::TechModel, net::PoolParams, planner::PipelineDepths};

/// # Description
/// the processing element of a pooling layer
///
/// # Pipeline
/// - stage 0: the controller issues an input group and the mux selects its windows
/// - stage 1: pool array
/// - stage 2: write back into the output register at the channels of the group
#[derive(Debug)]
pub struct PoolLayerPe {
    pub name: String,
    input: ChannelId,
    output: ChannelId,
    ctrl: LayerCtrl,
    functional: bool,
    line_buffers: LineBufferArray,
    mux: LineBufferMux,
    pool: PoolArray,
    out_reg: DemuxOutReg,
    windows: Vec<Payload>,
    pooled: Vec<Payload>,
    pub accepted: u64,
    pub emitted: u64,
}

impl PoolLayerPe {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        input: ChannelId,
        output: ChannelId,
        params: &PoolParams,
        pin: usize,
        depths: PipelineDepths,
        functional: bool,
        model: &TechModel,
    ) -> Result<Self, AccError> {
        if pin == 0 || pin > params.nin {
            return Err(AccError::invalid_layer(
                name,
                format!("parallelism {} out of range for {} channels", pin, params.nin),
            ));
        }
        let geometry = params.geometry;
        geometry.validate(name)?;
        let groups = ChannelGroups {
            nin: params.nin,
            pin,
            nout: params.nin,
            pout: pin,
        };
        debug!(
            "{}: {} input groups, {:?} pooling",
            name,
            groups.in_groups(),
            params.method
        );
        Ok(PoolLayerPe {
            name: name.to_string(),
            input,
            output,
            ctrl: LayerCtrl::new(CtrlKind::Pooling, geometry, groups, depths.pool()),
            functional,
            line_buffers: LineBufferArray::new(&geometry, params.nin, functional, model),
            mux: LineBufferMux::new(&geometry, params.nin, pin, model),
            pool: PoolArray::new(pin, geometry.kh * geometry.kw, params.method, model),
            out_reg: DemuxOutReg::new(params.nin, pin, model),
            windows: Vec::new(),
            pooled: Vec::new(),
            accepted: 0,
            emitted: 0,
        })
    }

    pub fn ctrl(&self) -> &LayerCtrl {
        &self.ctrl
    }

    pub fn input(&self) -> ChannelId {
        self.input
    }

    pub fn output(&self) -> ChannelId {
        self.output
    }

    pub fn stages(&self) -> Vec<&dyn Metered> {
        vec![&self.line_buffers, &self.mux, &self.pool, &self.out_reg]
    }

    fn advance_datapath(&mut self) {
        let groups = *self.ctrl.groups();
        let pipeline = self.ctrl.pipeline();
        if let Some(loc) = pipeline.writeback() {
            self.out_reg.write(groups.in_start(loc), &self.pooled);
        }
        if let Some(loc) = pipeline.stage(1) {
            let start = groups.in_start(loc);
            self.pool
                .compute(groups.pin.min(groups.nin - start), &self.windows, &mut self.pooled);
        }
        if let Some(loc) = pipeline.stage(0) {
            self.mux
                .select(&self.line_buffers, loc.in_group, &mut self.windows);
        }
    }
}

impl Component for PoolLayerPe {
    fn drive(&self, fabric: &mut Fabric) {
        fabric.set_ready(self.input, self.ctrl.prev_ready());
        fabric.set_valid(self.output, self.ctrl.next_valid());
        if self.functional {
            fabric.set_data(self.output, 0, self.out_reg.values());
        }
    }

    fn cycle(&mut self, fabric: &Fabric) -> Result<(), AccError> {
        let events = self
            .ctrl
            .step(fabric.valid(self.input), fabric.ready(self.output));
        if events.accepted {
            self.line_buffers.shift(Some(fabric.data(self.input)));
            self.accepted += 1;
        }
        if events.zero_injected {
            self.line_buffers.shift(None);
        }
        if events.emitted {
            self.out_reg.clear();
            self.emitted += 1;
        }
        self.advance_datapath();
        Ok(())
    }

    fn reset(&mut self) {
        self.ctrl.reset();
        self.line_buffers.reset();
        self.mux.reset();
        self.pool.reset();
        self.out_reg.reset();
        self.windows.clear();
        self.pooled.clear();
        self.accepted = 0;
        self.emitted = 0;
    }
}
