//! # Description
//! - this module is the accelerator module
//! - the main sub module is system, the assembled accelerator and the testbench are in system
//! - read convnet_acc.rs for the wiring of a network
//!
//! # Components
//! - fabric and component: the handshake channels and the two phase clocking contract
//! - layer_ctrl and pipeline: the controller of a layer and its pipeline register
//! - conv_pe and pool_pe: the processing element of a layer, built from the datapath stages
//! - line_buffer, weight_mem, mult_array, add_array, pool_array, demux_out_reg: the datapath stages
//! - channel_buffer, split_pe and concat_pe: the elements between the layers
//! - testbench: the stimulus and the monitor on the boundary ports
//!

pub mod add_array;
pub mod channel_buffer;
pub mod component;
pub mod concat_pe;
pub mod conv_pe;
pub mod convnet_acc;
pub mod demux_out_reg;
pub mod fabric;
pub mod layer_ctrl;
pub mod line_buffer;
pub mod metrics;
pub mod mult_array;
pub mod pipeline;
pub mod pool_array;
pub mod pool_pe;
pub mod split_pe;
pub mod system;
pub mod testbench;
pub mod weight_mem;

pub use convnet_acc::{ConvNetAcc, LayerTransfers, Unit};
pub use fabric::{ChannelId, Fabric};
pub use metrics::{Breakdown, PowerReport, StageKind};
pub use system::System;
pub use testbench::{IntervalStats, Pattern, ThroughputStats};
