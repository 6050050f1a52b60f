use log::{debug, info, warn};

use super::{
    component::Component,
    convnet_acc::ConvNetAcc,
    testbench::{OutputSink, Pattern, RampSource, ThroughputStats},
};
use crate::{
    acc_result::AccStatistics,
    error::AccError,
    net::Net,
    settings::SimulationSettings,
};

/// # Description
/// the accelerator with the testbench on its boundary ports, stepped one clock at a time
///
/// each cycle:
/// 1. settle the combinational logic of the accelerator and the testbench
/// 2. clock the testbench and every unit of the accelerator on the settled signals
///
/// the run ends when the requested frames are received and the accelerator is drained, or when
/// the cycle limit is hit
#[derive(Debug)]
pub struct System {
    acc: ConvNetAcc,
    source: RampSource,
    sink: OutputSink,
    total_cycle: u64,
    reset_period: u64,
    max_cycles: u64,
    frames: usize,
    finished: bool,
}

impl System {
    pub fn new(acc: ConvNetAcc, net: &Net, settings: &SimulationSettings) -> Result<Self, AccError> {
        let input_shape = net.input_shape().ok_or(AccError::MissingInput)?;
        let output_pixels = net
            .layers()
            .last()
            .and_then(|l| l.top_shapes.first())
            .map(|s| s.pixels())
            .ok_or(AccError::MissingInput)?;
        let lanes = acc.fabric().channel(acc.input()).depth();
        let source =
            RampSource::new(acc.input(), lanes, input_shape.pixels()).with_frames(settings.frames);
        let sink = OutputSink::new(acc.output(), output_pixels);
        Ok(System {
            acc,
            source,
            sink,
            total_cycle: 0,
            reset_period: settings.reset_period,
            max_cycles: settings.max_cycles,
            frames: settings.frames,
            finished: false,
        })
    }

    /// gate the source with `source` and the sink with `sink`
    pub fn with_patterns(mut self, source: Pattern, sink: Pattern) -> Self {
        self.source = self.source.with_pattern(source);
        self.sink = self.sink.with_pattern(sink);
        self
    }

    /// keep the received output pixels
    pub fn keep_outputs(mut self) -> Self {
        self.sink = self.sink.keep_data();
        self
    }

    pub fn accelerator(&self) -> &ConvNetAcc {
        &self.acc
    }

    pub fn accelerator_mut(&mut self) -> &mut ConvNetAcc {
        &mut self.acc
    }

    pub fn source(&self) -> &RampSource {
        &self.source
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }

    pub fn total_cycle(&self) -> u64 {
        self.total_cycle
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// hold everything in reset for the reset period
    pub fn reset(&mut self) {
        self.acc.reset();
        self.source.reset();
        self.sink.reset();
        self.total_cycle = self.reset_period;
        self.finished = false;
    }

    /// # Description
    /// one clock cycle of the whole system, does ***NOT*** update the cycle
    pub fn cycle(&mut self) -> Result<(), AccError> {
        let external: [&dyn Component; 2] = [&self.source, &self.sink];
        let passes = self.acc.settle(&external)?;
        debug!("@{} settled after {} passes", self.total_cycle, passes);
        let fabric = self.acc.fabric();
        self.source.cycle(fabric)?;
        self.sink.cycle(fabric)?;
        self.acc.clock()?;
        if self.sink.frames_received() >= self.frames
            && self.source.exhausted()
            && self.acc.is_drained()
        {
            self.finished = true;
        }
        Ok(())
    }

    pub fn run(&mut self) -> Result<AccStatistics, AccError> {
        debug!("start running");
        self.reset();
        while !self.finished {
            if self.total_cycle >= self.max_cycles {
                warn!(
                    "stopped at the cycle limit {} with {} of {} frames received",
                    self.max_cycles,
                    self.sink.frames_received(),
                    self.frames
                );
                break;
            }
            self.cycle()?;
            self.total_cycle += 1;
        }
        let stats = self.statistics();
        self.print_stats(&stats.throughput);
        Ok(stats)
    }

    pub fn statistics(&self) -> AccStatistics {
        AccStatistics {
            cycle: self.total_cycle,
            simulation_time: String::new(),
            net_name: self.acc.name.clone(),
            plan: self.acc.plan().clone(),
            registry: self.acc.registry().clone(),
            throughput: ThroughputStats::new(&self.source, &self.sink),
            layers: self.acc.layer_transfers(),
            buffer_occupancies: self.acc.buffer_occupancies(),
            breakdown: self.acc.breakdown(self.total_cycle),
        }
    }

    fn print_stats(&self, throughput: &ThroughputStats) {
        info!("Total cycles: {}", self.total_cycle);
        info!("Total injection pixels no.: {}", throughput.injected);
        if let Some(injection) = throughput.injection {
            info!("Min injection interval [cycles]: {}", injection.min);
            info!("Max injection interval [cycles]: {}", injection.max);
            info!("Avg injection interval [cycles]: {:.3}", injection.avg);
        } else {
            info!("Not enough simulation time");
        }
        if let Some(steady) = throughput.steady_output_interval() {
            info!("Steady state output interval [cycles]: {}", steady);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        planner::{Planner, PipelineDepths},
        settings::Settings,
    };

    #[test]
    fn test_lenet_frames() -> Result<(), Box<dyn std::error::Error>> {
        simple_logger::init_with_level(log::Level::Warn).unwrap_or(());
        let settings = Settings::new(vec!["configs/default.toml".into()])?;
        let net = Net::load("configs/nets/lenet.json")?;
        let planner = Planner::new(
            settings.planner_strategy,
            PipelineDepths {
                nonlinearity: settings.pipeline_settings.extra_pipeline_stage,
            },
        );
        let plan = planner.plan(&net, settings.pixel_inference_rate)?;
        let acc = ConvNetAcc::new(&net, plan, &settings)?;
        let mut system = System::new(acc, &net, &settings.simulation_settings)?;
        let stats = system.run()?;
        assert!(system.finished());
        assert_eq!(stats.throughput.frames_received, settings.simulation_settings.frames);
        assert_eq!(stats.cycle, system.total_cycle());
        assert!(stats.breakdown.total.area > 0.);
        Ok(())
    }
}
