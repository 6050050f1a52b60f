use log::debug;

use super::{
    add_array::AddArray,
    component::Component,
    demux_out_reg::DemuxOutReg,
    fabric::{ChannelId, Fabric, Payload},
    layer_ctrl::{ChannelGroups, CtrlKind, LayerCtrl},
    line_buffer::{LineBufferArray, LineBufferMux},
    metrics::Metered,
    mult_array::MultArray,
    weight_mem::WeightMem,
};
use crate::{
    error::AccError,
    models::{MemoryType, TechModel},
    net::ConvParams,
    planner::PipelineDepths,
};

/// # Description
/// the processing element of a convolution or fully connected layer
///
/// # Pipeline
/// - stage 0: the controller issues a group, the mux selects the windows and the weight word is read
/// - stage 1: multiply
/// - stage 2: add onto the partial sums of the output register
/// - the nonlinearity delay stages
/// - last stage: write back into the output register
///
/// the stages advance back to front, so a write back lands before the add stage reads the same
/// partial sum on that edge
#[derive(Debug)]
pub struct ConvLayerPe {
    pub name: String,
    input: ChannelId,
    output: ChannelId,
    ctrl: LayerCtrl,
    functional: bool,
    line_buffers: LineBufferArray,
    mux: LineBufferMux,
    weights: WeightMem,
    mults: MultArray,
    adds: AddArray,
    out_reg: DemuxOutReg,
    acts: Vec<Payload>,
    weight_word: Vec<Payload>,
    products: Vec<Payload>,
    /// the add stage output followed by the delay stages
    sums: Vec<Vec<Payload>>,
    partial: Vec<Payload>,
    pub accepted: u64,
    pub emitted: u64,
}

impl ConvLayerPe {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        input: ChannelId,
        output: ChannelId,
        params: &ConvParams,
        pin: usize,
        pout: usize,
        depths: PipelineDepths,
        memory_type: MemoryType,
        functional: bool,
        model: &TechModel,
    ) -> Result<Self, AccError> {
        if pin == 0 || pin > params.nin || pout == 0 || pout > params.nout {
            return Err(AccError::invalid_layer(
                name,
                format!(
                    "parallelism ({}, {}) out of range for ({}, {}) channels",
                    pin, pout, params.nin, params.nout
                ),
            ));
        }
        let geometry = params.geometry;
        geometry.validate(name)?;
        let kk = geometry.kh * geometry.kw;
        let groups = ChannelGroups {
            nin: params.nin,
            pin,
            nout: params.nout,
            pout,
        };
        let depth = depths.conv();
        debug!(
            "{}: {} input groups, {} output groups, depth {}",
            name,
            groups.in_groups(),
            groups.out_groups(),
            depth
        );
        Ok(ConvLayerPe {
            name: name.to_string(),
            input,
            output,
            ctrl: LayerCtrl::new(CtrlKind::Convolution, geometry, groups, depth),
            functional,
            line_buffers: LineBufferArray::new(&geometry, params.nin, functional, model),
            mux: LineBufferMux::new(&geometry, params.nin, pin, model),
            weights: WeightMem::new(
                pout * pin * kk,
                groups.in_groups() * groups.out_groups(),
                memory_type,
                model,
            ),
            mults: MultArray::new(pin, pout, kk, model),
            adds: AddArray::new(pin, pout, kk, model),
            out_reg: DemuxOutReg::new(params.nout, pout, model),
            acts: Vec::new(),
            weight_word: Vec::new(),
            products: Vec::new(),
            sums: vec![Vec::new(); depth - 3],
            partial: Vec::new(),
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

    pub fn weights_mut(&mut self) -> &mut WeightMem {
        &mut self.weights
    }

    pub fn stages(&self) -> Vec<&dyn Metered> {
        vec![
            &self.line_buffers,
            &self.mux,
            &self.weights,
            &self.mults,
            &self.adds,
            &self.out_reg,
        ]
    }

    fn advance_datapath(&mut self) {
        let groups = *self.ctrl.groups();
        let pipeline = self.ctrl.pipeline();
        let depth = pipeline.depth();
        let active_out = |start: usize| groups.pout.min(groups.nout - start);
        let active_in = |start: usize| groups.pin.min(groups.nin - start);

        if let Some(loc) = pipeline.writeback() {
            let last = self.sums.len() - 1;
            self.out_reg.write(groups.out_start(loc), &self.sums[last]);
        }
        for k in (3..depth - 1).rev() {
            if pipeline.stage(k).is_some() {
                let (head, tail) = self.sums.split_at_mut(k - 2);
                tail[0].clone_from(&head[k - 3]);
            }
        }
        if let Some(loc) = pipeline.stage(2) {
            let start = groups.out_start(loc);
            self.out_reg.read_into(start, &mut self.partial);
            self.adds.compute(
                active_out(start),
                &self.products,
                &self.partial,
                &mut self.sums[0],
            );
        }
        if let Some(loc) = pipeline.stage(1) {
            self.mults.compute(
                active_out(groups.out_start(loc)),
                active_in(groups.in_start(loc)),
                &self.acts,
                &self.weight_word,
                &mut self.products,
            );
        }
        if let Some(loc) = pipeline.stage(0) {
            // the windows stay latched while the output groups of one input group are issued
            if loc.out_group == 0 {
                self.mux
                    .select(&self.line_buffers, loc.in_group, &mut self.acts);
            }
            self.weights
                .read(self.ctrl.mem_rd_addr(), self.functional, &mut self.weight_word);
        }
    }
}

impl Component for ConvLayerPe {
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
        self.weights.reset();
        self.mults.reset();
        self.adds.reset();
        self.out_reg.reset();
        self.acts.clear();
        self.weight_word.clear();
        self.products.clear();
        self.sums.iter_mut().for_each(Vec::clear);
        self.accepted = 0;
        self.emitted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::WindowGeometry;

    /// feed `pixels` (channel major per pixel) and collect `count` outputs
    fn run(
        geometry: WindowGeometry,
        nin: usize,
        nout: usize,
        pin: usize,
        pout: usize,
        pixels: &[Vec<Payload>],
        count: usize,
    ) -> Result<Vec<Vec<Payload>>, Box<dyn std::error::Error>> {
        let model = TechModel::new(28, 16, 1.0)?;
        let mut fabric = Fabric::new();
        let input = fabric.allocate("in", nin)?;
        let output = fabric.allocate("out", nout)?;
        let params = ConvParams {
            nin,
            nout,
            geometry,
        };
        let depths = PipelineDepths { nonlinearity: 1 };
        let mut pe = ConvLayerPe::new(
            "conv", input, output, &params, pin, pout, depths, MemoryType::Rom, true, &model,
        )?;
        pe.reset();
        let mut next = 0;
        let mut outputs = Vec::new();
        for _ in 0..10_000 {
            pe.drive(&mut fabric);
            fabric.set_valid(input, true);
            fabric.set_data(input, 0, &pixels[next % pixels.len()]);
            fabric.set_ready(output, true);
            if fabric.fire(input) {
                next += 1;
            }
            if fabric.fire(output) {
                outputs.push(fabric.data(output).to_vec());
                if outputs.len() == count {
                    break;
                }
            }
            pe.cycle(&fabric)?;
        }
        Ok(outputs)
    }

    #[test]
    fn test_single_window_sum() -> Result<(), Box<dyn std::error::Error>> {
        let pixels = (1..=9)
            .map(|p| vec![p as f64, 10. + p as f64])
            .collect::<Vec<_>>();
        // two input groups and two output groups accumulate onto the same register
        let outputs = run(WindowGeometry::dense(3, 3, 3, 3), 2, 2, 1, 1, &pixels, 2)?;
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0], vec![180., 180.]);
        // the register is cleared between pixels
        assert_eq!(outputs[1], vec![180., 180.]);
        Ok(())
    }

    #[test]
    fn test_zero_padding() -> Result<(), Box<dyn std::error::Error>> {
        let pixels = (1..=4).map(|p| vec![p as f64]).collect::<Vec<_>>();
        let geometry = WindowGeometry::dense(2, 2, 3, 3).with_pad(1, 1);
        let outputs = run(geometry, 1, 3, 1, 1, &pixels, 4)?;
        // every padded window covers the whole 2x2 map
        assert_eq!(outputs, vec![vec![10., 10., 10.]; 4]);
        Ok(())
    }

    #[test]
    fn test_partial_groups() -> Result<(), Box<dyn std::error::Error>> {
        let pixels = vec![vec![1., 2., 3.]];
        // 3 channels in groups of 2, 5 outputs in groups of 2
        let outputs = run(WindowGeometry::dense(1, 1, 1, 1), 3, 5, 2, 2, &pixels, 3)?;
        assert_eq!(outputs, vec![vec![6.; 5]; 3]);
        Ok(())
    }

    #[test]
    fn test_invalid_parallelism() -> Result<(), Box<dyn std::error::Error>> {
        let model = TechModel::new(28, 16, 1.0)?;
        let mut fabric = Fabric::new();
        let input = fabric.allocate("in", 2)?;
        let output = fabric.allocate("out", 2)?;
        let params = ConvParams {
            nin: 2,
            nout: 2,
            geometry: WindowGeometry::dense(2, 2, 1, 1),
        };
        let depths = PipelineDepths { nonlinearity: 1 };
        let result = ConvLayerPe::new(
            "conv", input, output, &params, 3, 1, depths, MemoryType::Rom, true, &model,
        );
        assert!(matches!(result, Err(AccError::InvalidLayer { .. })));
        Ok(())
    }
}
