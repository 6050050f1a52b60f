//! # Description
//! - the error type shared by the planner, the network loader and the accelerator
//! - every variant is a configuration error: the network description or the settings are malformed
//! - back-pressure and full buffers are never errors, they are handled by the handshakes

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccError {
    #[error("undefined previous layer connection `{connection}` used by layer `{layer}`")]
    UndefinedConnection { layer: String, connection: String },
    #[error("connection `{0}` is defined twice")]
    DuplicateConnection(String),
    #[error("unsupported pooling method `{method}` in layer `{layer}`")]
    UnsupportedPoolMethod { layer: String, method: String },
    #[error(
        "infeasible parallelism for layer `{layer}`: ceil({nout}/{pout}) must be at least {required}"
    )]
    InfeasibleParallelism {
        layer: String,
        nout: usize,
        pout: usize,
        required: usize,
    },
    #[error("invalid parameters for layer `{layer}`: {reason}")]
    InvalidLayer { layer: String, reason: String },
    #[error("no parallelism assigned to layer `{0}`")]
    MissingParallelism(String),
    #[error("the network has no input layer")]
    MissingInput,
    #[error("undefined technology node: {0}nm")]
    UndefinedTechNode(u32),
    #[error("combinational signals did not settle after {0} passes")]
    CombinationalLoop(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed network description: {0}")]
    Json(#[from] serde_json::Error),
}

impl AccError {
    pub(crate) fn invalid_layer(layer: &str, reason: impl Into<String>) -> Self {
        AccError::InvalidLayer {
            layer: layer.to_string(),
            reason: reason.into(),
        }
    }
}
