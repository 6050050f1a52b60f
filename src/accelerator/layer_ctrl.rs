//! # Description
//! - the per layer controller walking a window over the padded input map
//! - one explicit state machine advanced once per clock edge, shared by the convolution class
//!   (conv and fc) and the pooling class
//!
//! # Schedule of one output pixel
//! 1. scan: pad positions inject a zero for one cycle, real pixels raise `ready` until the
//!    upstream is valid
//! 2. when the newest pixel completes a window, issue one channel group per cycle, output
//!    groups innermost
//! 3. drain the pipeline until the last group is written back
//! 4. raise `valid` until the downstream is ready, clear the output register and go back to 1

use log::trace;
use serde::Serialize;

use super::pipeline::{GroupLocation, PipelineRegister};
use crate::net::WindowGeometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelKind {
    TopPad,
    LeftPad,
    RightPad,
    BottomPad,
    Real,
}

impl PixelKind {
    pub fn is_pad(&self) -> bool {
        !matches!(self, PixelKind::Real)
    }
}

impl WindowGeometry {
    /// pixels needed before the first window is complete
    pub fn warm_up(&self) -> usize {
        self.padded_width() * (self.kh - 1) + self.kw - 1
    }

    /// classify the padded pixel `c`, counted from 0 in raster order
    pub fn classify(&self, c: usize) -> PixelKind {
        let width = self.padded_width();
        let col = c % width;
        if c < self.pad_h * width {
            PixelKind::TopPad
        } else if c >= width * (self.h + self.pad_h) {
            PixelKind::BottomPad
        } else if col < self.pad_w {
            PixelKind::LeftPad
        } else if col >= self.w + self.pad_w {
            PixelKind::RightPad
        } else {
            PixelKind::Real
        }
    }

    /// # Description
    /// whether the `count`-th pixel of the pass completes a window on the stride grid
    ///
    /// # Example
    /// ```
    /// use convnet_acc::net::WindowGeometry;
    /// let g = WindowGeometry::dense(5, 5, 3, 3);
    /// let fired: Vec<_> = (1..=25).filter(|c| g.fires_at(*c)).collect();
    /// assert_eq!(fired, vec![13, 14, 15, 18, 19, 20, 23, 24, 25]);
    /// ```
    pub fn fires_at(&self, count: usize) -> bool {
        if count <= self.warm_up() {
            return false;
        }
        let pixel = count - 1;
        let width = self.padded_width();
        let (row, col) = (pixel / width, pixel % width);
        if row >= self.padded_height() || col + 1 < self.kw {
            return false;
        }
        (row + 1 - self.kh) % self.stride_h == 0 && (col + 1 - self.kw) % self.stride_w == 0
    }
}

/// the two controller variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CtrlKind {
    /// input groups outer, output groups inner, weights read every issue
    Convolution,
    /// input groups only
    Pooling,
}

/// channel counts and parallelism of one layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelGroups {
    pub nin: usize,
    pub pin: usize,
    pub nout: usize,
    pub pout: usize,
}

impl ChannelGroups {
    pub fn in_groups(&self) -> usize {
        (self.nin + self.pin - 1) / self.pin
    }

    pub fn out_groups(&self) -> usize {
        (self.nout + self.pout - 1) / self.pout
    }

    pub fn in_start(&self, loc: GroupLocation) -> usize {
        loc.in_group * self.pin
    }

    pub fn out_start(&self, loc: GroupLocation) -> usize {
        loc.out_group * self.pout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CtrlState {
    /// held in reset, the next edge starts the scan
    Idle,
    /// a padding zero is presented to the line buffer
    ZeroInject,
    /// `ready` is raised, waiting for the upstream `valid`
    Accept,
    /// the next group to issue
    Compute { in_group: usize, out_group: usize },
    /// edges left until the last group is written back
    Drain { remaining: usize },
    /// `valid` is raised, waiting for the downstream `ready`
    Emit,
}

/// what happened on one clock edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CtrlEvents {
    /// a real pixel was taken from the input channel
    pub accepted: bool,
    /// a padding zero was shifted into the line buffer
    pub zero_injected: bool,
    /// the pixel count that completed a window
    pub fired_at: Option<usize>,
    /// the group issued into pipeline slot 0
    pub issued: Option<GroupLocation>,
    /// the output pixel was taken by the downstream
    pub emitted: bool,
}

/// # Description
/// the controller of one layer
///
/// # Example
/// ```ignore
/// let mut ctrl = LayerCtrl::new(CtrlKind::Convolution, geometry, groups, 5);
/// loop {
///     let events = ctrl.step(prev_valid, next_ready);
///     // drive the datapath with ctrl.pipeline() and the events
/// }
/// ```
#[derive(Debug, Clone)]
pub struct LayerCtrl {
    kind: CtrlKind,
    geometry: WindowGeometry,
    groups: ChannelGroups,
    state: CtrlState,
    /// pixels of the current pass consumed so far
    counter: usize,
    pipeline: PipelineRegister,
    prev_ready: bool,
    next_valid: bool,
    zero_in: bool,
    /// output register clear
    clear: bool,
    mem_rd_addr: usize,
}

impl LayerCtrl {
    pub fn new(
        kind: CtrlKind,
        geometry: WindowGeometry,
        groups: ChannelGroups,
        pipeline_depth: usize,
    ) -> Self {
        let groups = match kind {
            CtrlKind::Convolution => groups,
            CtrlKind::Pooling => ChannelGroups {
                nout: groups.nin,
                pout: groups.pin,
                ..groups
            },
        };
        LayerCtrl {
            kind,
            geometry,
            groups,
            state: CtrlState::Idle,
            counter: 0,
            pipeline: PipelineRegister::new(pipeline_depth),
            prev_ready: false,
            next_valid: false,
            zero_in: false,
            clear: true,
            mem_rd_addr: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = CtrlState::Idle;
        self.counter = 0;
        self.pipeline.reset();
        self.prev_ready = false;
        self.next_valid = false;
        self.zero_in = false;
        self.clear = true;
        self.mem_rd_addr = 0;
    }

    pub fn state(&self) -> CtrlState {
        self.state
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn geometry(&self) -> &WindowGeometry {
        &self.geometry
    }

    pub fn groups(&self) -> &ChannelGroups {
        &self.groups
    }

    pub fn pipeline(&self) -> &PipelineRegister {
        &self.pipeline
    }

    pub fn prev_ready(&self) -> bool {
        self.prev_ready
    }

    pub fn next_valid(&self) -> bool {
        self.next_valid
    }

    pub fn zero_in(&self) -> bool {
        self.zero_in
    }

    pub fn clear(&self) -> bool {
        self.clear
    }

    /// the weight memory address of the last issued group
    pub fn mem_rd_addr(&self) -> usize {
        self.mem_rd_addr
    }

    /// # Description
    /// advance one clock edge with the sampled handshake inputs
    pub fn step(&mut self, prev_valid: bool, next_ready: bool) -> CtrlEvents {
        let mut events = CtrlEvents::default();
        match self.state {
            CtrlState::Idle => self.scan(),
            CtrlState::ZeroInject => {
                self.zero_in = false;
                events.zero_injected = true;
                self.pixel_done(&mut events);
            }
            CtrlState::Accept => {
                if prev_valid {
                    self.prev_ready = false;
                    events.accepted = true;
                    self.pixel_done(&mut events);
                }
            }
            CtrlState::Compute {
                in_group,
                out_group,
            } => self.issue(in_group, out_group, &mut events),
            CtrlState::Drain { remaining } => {
                if remaining <= 1 {
                    self.next_valid = true;
                    self.state = CtrlState::Emit;
                } else {
                    self.state = CtrlState::Drain {
                        remaining: remaining - 1,
                    };
                }
            }
            CtrlState::Emit => {
                if next_ready {
                    self.next_valid = false;
                    self.clear = true;
                    events.emitted = true;
                    self.scan();
                }
            }
        }
        self.pipeline.advance(events.issued);
        events
    }

    /// set up the handling of the next padded pixel
    fn scan(&mut self) {
        if self.counter == self.geometry.padded_pixels() {
            self.counter = 0;
        }
        if self.geometry.classify(self.counter).is_pad() {
            self.zero_in = true;
            self.state = CtrlState::ZeroInject;
        } else {
            self.prev_ready = true;
            self.state = CtrlState::Accept;
        }
    }

    fn pixel_done(&mut self, events: &mut CtrlEvents) {
        self.counter += 1;
        if self.geometry.fires_at(self.counter) {
            trace!("window complete at pixel {}", self.counter);
            events.fired_at = Some(self.counter);
            self.clear = false;
            self.issue(0, 0, events);
        } else {
            self.scan();
        }
    }

    fn issue(&mut self, in_group: usize, out_group: usize, events: &mut CtrlEvents) {
        let out_groups = match self.kind {
            CtrlKind::Convolution => self.groups.out_groups(),
            CtrlKind::Pooling => 1,
        };
        events.issued = Some(GroupLocation {
            in_group,
            out_group,
        });
        self.mem_rd_addr = out_group + in_group * out_groups;
        let (in_group, out_group) = if out_group + 1 < out_groups {
            (in_group, out_group + 1)
        } else {
            (in_group + 1, 0)
        };
        if in_group < self.groups.in_groups() {
            self.state = CtrlState::Compute {
                in_group,
                out_group,
            };
        } else if self.pipeline.depth() > 1 {
            self.state = CtrlState::Drain {
                remaining: self.pipeline.depth() - 1,
            };
        } else {
            self.next_valid = true;
            self.state = CtrlState::Emit;
        }
    }
}
