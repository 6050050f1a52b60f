//! # Description
//! - chooses how many input and output channels every compute layer handles per cycle
//! - all layers are planned against one target rate derived from the input layer, so no layer
//!   bottlenecks the others
//!
//! # Rate model
//! - convolution and fc: `(ceil(Nin/Pin) * ceil(Nout/Pout) + overhead) * h * w`
//! - pooling: `(ceil(Nin/Pin) + overhead) * h * w`
//!
//! where `h * w` is the output map of the layer and `overhead` the pipeline depth of its
//! controller.

use std::collections::BTreeMap;

use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    error::AccError,
    net::{Layer, LayerKind, Net},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlannerStrategy {
    /// round the scaled channel counts, cheap but only a rough match
    ClosedForm,
    /// try every (Pin, Pout) pair
    BruteForce,
}

/// the number of channels processed concurrently by one layer, `pout` is `None` for pooling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Parallelism {
    pub pin: usize,
    pub pout: Option<usize>,
}

impl Parallelism {
    pub fn conv(pin: usize, pout: usize) -> Self {
        Parallelism {
            pin,
            pout: Some(pout),
        }
    }

    pub fn pool(pin: usize) -> Self {
        Parallelism { pin, pout: None }
    }
}

/// the pipeline depths shared by the planner and the controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineDepths {
    /// delay stages between accumulation and write back
    pub nonlinearity: usize,
}

impl PipelineDepths {
    /// issue, multiply, add and write back plus the nonlinearity delay
    pub fn conv(&self) -> usize {
        4 + self.nonlinearity
    }

    /// issue, pool array and write back
    pub fn pool(&self) -> usize {
        3
    }
}

/// # Description
/// the parallelism assignment of a whole network, keyed by layer index
///
/// the same assignment drives the simulator and any hardware emitter
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParallelismPlan {
    /// cycles per frame every layer aims at
    pub target_layer_rate: f64,
    assignments: BTreeMap<usize, Parallelism>,
    /// layer name for every assigned index
    names: BTreeMap<usize, String>,
    /// the rate each layer achieves with its assignment
    rates: BTreeMap<usize, usize>,
}

impl ParallelismPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer_idx: usize, name: &str, parallelism: Parallelism) {
        self.assignments.insert(layer_idx, parallelism);
        self.names.insert(layer_idx, name.to_string());
    }

    pub fn get(&self, layer_idx: usize) -> Option<Parallelism> {
        self.assignments.get(&layer_idx).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str, Parallelism)> + '_ {
        self.assignments
            .iter()
            .map(move |(idx, p)| (*idx, self.names[idx].as_str(), *p))
    }

    pub fn layer_rate(&self, layer_idx: usize) -> Option<usize> {
        self.rates.get(&layer_idx).copied()
    }

    /// the slowest layer sets the rate of the whole accelerator
    pub fn max_layer_rate(&self) -> usize {
        self.rates.values().copied().max().unwrap_or(0)
    }
}

fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// # Description
/// solves the per layer parallelism for a target rate
///
/// # Example
/// ```
/// use convnet_acc::planner::{Planner, PlannerStrategy, PipelineDepths};
/// let planner = Planner::new(PlannerStrategy::BruteForce, PipelineDepths { nonlinearity: 1 });
/// let p = planner.solve_conv("conv", 16, 32, 8, 8, 8. * 8. * 40.).unwrap();
/// assert!(p.pin >= 1 && p.pin <= 16);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Planner {
    pub strategy: PlannerStrategy,
    pub depths: PipelineDepths,
}

impl Planner {
    pub fn new(strategy: PlannerStrategy, depths: PipelineDepths) -> Self {
        Planner { strategy, depths }
    }

    /// the smallest output channel iteration count that keeps write back from aliasing
    pub fn min_out_groups(&self) -> usize {
        1 + self.depths.nonlinearity
    }

    /// cycles left per output pixel once the pipeline overhead is paid, at least one
    fn effective_rate(layer_rate: f64, pixels: usize, overhead: usize) -> f64 {
        let rate = layer_rate / pixels as f64 - overhead as f64;
        if rate <= 0. {
            1.
        } else {
            rate
        }
    }

    /// # Description
    /// plan every compute layer of `net` for `pixel_inference_rate` cycles per input pixel
    pub fn plan(&self, net: &Net, pixel_inference_rate: f64) -> Result<ParallelismPlan, AccError> {
        let input = net.input_shape().ok_or(AccError::MissingInput)?;
        let mut layer_rate = input.pixels() as f64 * pixel_inference_rate;
        if layer_rate <= 0. {
            layer_rate = 1.;
        }
        info!(
            "planning {} for a layer rate of {} cycles",
            net.name, layer_rate
        );
        let mut plan = ParallelismPlan::new();
        plan.target_layer_rate = layer_rate;
        for (idx, layer) in net.layers().iter().enumerate() {
            if let Some(p) = self.plan_layer(layer, layer_rate)? {
                let rate = self.achieved_rate(layer, p);
                info!(
                    "{}: Pin = {}, Pout = {:?}, rate = {}",
                    layer.name, p.pin, p.pout, rate
                );
                plan.insert(idx, &layer.name, p);
                plan.rates.insert(idx, rate);
            }
        }
        info!("max layer rate: {}", plan.max_layer_rate());
        Ok(plan)
    }

    fn plan_layer(&self, layer: &Layer, layer_rate: f64) -> Result<Option<Parallelism>, AccError> {
        let out = layer
            .top_shapes
            .first()
            .copied()
            .ok_or_else(|| AccError::invalid_layer(&layer.name, "no output shape"))?;
        let p = match &layer.kind {
            LayerKind::Convolution(c) => Some(self.solve_conv(
                &layer.name,
                c.nin,
                c.nout,
                out.height,
                out.width,
                layer_rate,
            )?),
            LayerKind::InnerProduct(c) => {
                Some(self.solve_conv(&layer.name, c.nin, c.nout, 1, 1, layer_rate)?)
            }
            LayerKind::Pooling(p) => Some(self.solve_pool(p.nin, out.height, out.width, layer_rate)),
            _ => None,
        };
        Ok(p)
    }

    /// the cycles per frame a layer needs with `p`
    pub fn achieved_rate(&self, layer: &Layer, p: Parallelism) -> usize {
        let pixels = layer.top_shapes.first().map(|s| s.pixels()).unwrap_or(0);
        match &layer.kind {
            LayerKind::Convolution(c) | LayerKind::InnerProduct(c) => {
                let groups = ceil_div(c.nin, p.pin) * ceil_div(c.nout, p.pout.unwrap_or(c.nout));
                (groups + self.depths.conv()) * pixels
            }
            LayerKind::Pooling(c) => (ceil_div(c.nin, p.pin) + self.depths.pool()) * pixels,
            _ => 0,
        }
    }

    /// # Description
    /// solve a convolution class layer with an `h x w` output map
    ///
    /// # Return
    /// an error when no output parallelism keeps `ceil(Nout/Pout) >= 1 + nonlinearity depth`
    pub fn solve_conv(
        &self,
        layer: &str,
        nin: usize,
        nout: usize,
        h: usize,
        w: usize,
        layer_rate: f64,
    ) -> Result<Parallelism, AccError> {
        let rate = Self::effective_rate(layer_rate, h * w, self.depths.conv());
        let required = self.min_out_groups();
        let (pin, pout) = match self.strategy {
            PlannerStrategy::BruteForce => {
                let mut best = (1, 1);
                let mut min_diff = (nin * nout) as f64;
                // pin outer, pout inner: the first pair wins a tie
                for (pin, pout) in (1..=nin).cartesian_product(1..=nout) {
                    let out_groups = ceil_div(nout, pout);
                    if out_groups < required {
                        continue;
                    }
                    let cycles = (ceil_div(nin, pin) * out_groups) as f64;
                    let diff = (cycles - rate).abs();
                    if diff < min_diff {
                        min_diff = diff;
                        best = (pin, pout);
                    }
                }
                best
            }
            PlannerStrategy::ClosedForm => {
                let k = (1. / rate).sqrt();
                let pin = ((k * nin as f64).round() as usize).clamp(1, nin);
                let mut pout = ((k * nout as f64).round() as usize).clamp(1, nout);
                while pout > 1 && ceil_div(nout, pout) < required {
                    pout -= 1;
                }
                (pin, pout)
            }
        };
        debug!(
            "{}: rate {} -> Pin {} Pout {} ({:?})",
            layer, rate, pin, pout, self.strategy
        );
        if ceil_div(nout, pout) < required {
            return Err(AccError::InfeasibleParallelism {
                layer: layer.to_string(),
                nout,
                pout,
                required,
            });
        }
        Ok(Parallelism::conv(pin, pout))
    }

    /// solve a pooling layer with an `h x w` output map, pooling is always closed form
    pub fn solve_pool(&self, nin: usize, h: usize, w: usize, layer_rate: f64) -> Parallelism {
        let rate = Self::effective_rate(layer_rate, h * w, self.depths.pool());
        let pin = ((nin as f64 / rate).round() as usize).clamp(1, nin);
        Parallelism::pool(pin)
    }
}
