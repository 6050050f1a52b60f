//! # Description
//! - the stimulus and the monitor on the boundary ports of an accelerator
//! - the source offers a ramp, every lane of pixel `i` carries `i`
//! - both sides follow the handshake discipline: an asserted `valid` is held until it is taken,
//!   and after every transfer the side rests for one cycle
//! - an optional pattern gates when a side may start a new handshake, used to fuzz back-pressure

use log::{debug, trace};
use serde::Serialize;

use super::{
    component::Component,
    fabric::{ChannelId, Fabric, Payload},
};
use crate::error::AccError;

/// when a side may start a new handshake, indexed by cycle and repeated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pattern(Vec<bool>);

impl Pattern {
    pub fn new(mask: Vec<bool>) -> Self {
        Pattern(mask)
    }

    pub fn allows(&self, cycle: u64) -> bool {
        if self.0.is_empty() {
            return true;
        }
        self.0[(cycle % self.0.len() as u64) as usize]
    }
}

#[derive(Debug)]
pub struct RampSource {
    output: ChannelId,
    lanes: usize,
    /// pixels of one input frame
    frame_pixels: usize,
    /// stop after this many pixels, unlimited if `None`
    limit: Option<u64>,
    pattern: Pattern,
    cycle: u64,
    valid: bool,
    value: u64,
    /// cycles at which a pixel was taken by the accelerator
    pub inject_times: Vec<u64>,
}

impl RampSource {
    pub fn new(output: ChannelId, lanes: usize, frame_pixels: usize) -> Self {
        RampSource {
            output,
            lanes,
            frame_pixels,
            limit: None,
            pattern: Pattern::default(),
            cycle: 0,
            valid: false,
            value: 0,
            inject_times: Vec::new(),
        }
    }

    /// stop offering after `frames` whole frames
    pub fn with_frames(mut self, frames: usize) -> Self {
        self.limit = Some((frames * self.frame_pixels) as u64);
        self
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn injected(&self) -> u64 {
        self.inject_times.len() as u64
    }

    pub fn frame_pixels(&self) -> usize {
        self.frame_pixels
    }

    pub fn exhausted(&self) -> bool {
        self.limit.map_or(false, |limit| self.injected() >= limit)
    }
}

impl Component for RampSource {
    fn drive(&self, fabric: &mut Fabric) {
        fabric.set_valid(self.output, self.valid);
        let data = vec![self.value as Payload; self.lanes];
        fabric.set_data(self.output, 0, &data);
    }

    fn cycle(&mut self, fabric: &Fabric) -> Result<(), AccError> {
        if self.valid {
            if fabric.fire(self.output) {
                trace!("@{} testbench sends pixel {}", self.cycle, self.value);
                self.inject_times.push(self.cycle);
                self.valid = false;
                self.value += 1;
            }
        } else if !self.exhausted() && self.pattern.allows(self.cycle) {
            self.valid = true;
        }
        self.cycle += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.cycle = 0;
        self.valid = false;
        self.value = 0;
        self.inject_times.clear();
    }
}

#[derive(Debug)]
pub struct OutputSink {
    input: ChannelId,
    /// pixels of one output frame
    frame_pixels: usize,
    pattern: Pattern,
    keep_data: bool,
    cycle: u64,
    ready: bool,
    /// cycles at which an output pixel was received
    pub output_times: Vec<u64>,
    /// the received pixels, only kept with `keep_data`
    pub outputs: Vec<Vec<Payload>>,
}

impl OutputSink {
    pub fn new(input: ChannelId, frame_pixels: usize) -> Self {
        OutputSink {
            input,
            frame_pixels,
            pattern: Pattern::default(),
            keep_data: false,
            cycle: 0,
            ready: false,
            output_times: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn keep_data(mut self) -> Self {
        self.keep_data = true;
        self
    }

    pub fn received(&self) -> u64 {
        self.output_times.len() as u64
    }

    pub fn frames_received(&self) -> usize {
        if self.frame_pixels == 0 {
            return 0;
        }
        self.output_times.len() / self.frame_pixels
    }

    pub fn frame_pixels(&self) -> usize {
        self.frame_pixels
    }
}

impl Component for OutputSink {
    fn drive(&self, fabric: &mut Fabric) {
        fabric.set_ready(self.input, self.ready);
    }

    fn cycle(&mut self, fabric: &Fabric) -> Result<(), AccError> {
        if self.ready && fabric.fire(self.input) {
            trace!("@{} testbench receives {:?}", self.cycle, fabric.data(self.input));
            self.output_times.push(self.cycle);
            if self.keep_data {
                self.outputs.push(fabric.data(self.input).to_vec());
            }
            if self.output_times.len() % self.frame_pixels.max(1) == 0 {
                debug!("@{} frame {} received", self.cycle, self.frames_received());
            }
            self.ready = false;
        } else {
            self.ready = self.pattern.allows(self.cycle);
        }
        self.cycle += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.cycle = 0;
        self.ready = false;
        self.output_times.clear();
        self.outputs.clear();
    }
}

/// the spacing of a series of transfers, in cycles
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntervalStats {
    pub transfers: usize,
    pub min: u64,
    pub max: u64,
    pub avg: f64,
}

impl IntervalStats {
    /// `None` with less than two transfers
    pub fn from_times(times: &[u64]) -> Option<Self> {
        if times.len() < 2 {
            return None;
        }
        let (min, max) = times
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold((u64::MAX, 0), |(min, max), d| (min.min(d), max.max(d)));
        let span = times[times.len() - 1] - times[0];
        Some(IntervalStats {
            transfers: times.len(),
            min,
            max,
            avg: span as f64 / (times.len() - 1) as f64,
        })
    }
}

/// the throughput seen at the boundary ports
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThroughputStats {
    pub injected: u64,
    pub received: u64,
    pub frames_received: usize,
    pub injection: Option<IntervalStats>,
    pub output: Option<IntervalStats>,
    /// the output spacing within each complete frame, the first frame includes the warm-up
    pub output_frames: Vec<IntervalStats>,
}

impl ThroughputStats {
    pub fn new(source: &RampSource, sink: &OutputSink) -> Self {
        let frame = sink.frame_pixels().max(1);
        ThroughputStats {
            injected: source.injected(),
            received: sink.received(),
            frames_received: sink.frames_received(),
            injection: IntervalStats::from_times(&source.inject_times),
            output: IntervalStats::from_times(&sink.output_times),
            output_frames: sink
                .output_times
                .chunks_exact(frame)
                .filter_map(IntervalStats::from_times)
                .collect(),
        }
    }

    /// the steady state output interval: the smallest spacing inside the second frame
    ///
    /// the padded row changes stretch some gaps, they only show in the `avg` of the frame
    pub fn steady_output_interval(&self) -> Option<u64> {
        self.output_frames.get(1).map(|f| f.min)
    }
}
