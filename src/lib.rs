//! the crate convnet_acc plans and simulates convolutional neural network accelerators.
//! there are 5 parts in the crate:
//!
//! - net: the layer graph read from a json network description, with every blob shape inferred.
//! - planner: the per layer parallelism that makes every layer meet one target rate.
//! - models: the area and power fits of the arithmetic units and memories.
//! - accelerator: the cycle accurate hardware assembled from the net and the plan.
//! - acc_result: the result statics to record the result.
//!

pub mod acc_result;
pub mod accelerator;
pub mod cmd_args;
pub mod error;
pub mod models;
pub mod net;
pub mod planner;
pub mod settings;

pub use acc_result::{AccResult, AccStatistics};
pub use accelerator::{ConvNetAcc, System};
pub use error::AccError;
pub use net::Net;
pub use planner::Planner;
