use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::string::String;

use crate::{models::MemoryType, planner::PlannerStrategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// network descriptions, glob patterns are allowed
    pub net_paths: Vec<String>,
    /// cycles per input pixel for the whole accelerator, non-positive means as fast as possible
    pub pixel_inference_rate: f64,
    pub planner_strategy: PlannerStrategy,
    pub hardware_settings: HardwareSettings,
    pub pipeline_settings: PipelineSettings,
    pub buffer_settings: BufferSettings,
    pub simulation_settings: SimulationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareSettings {
    /// technology node in nm
    pub tech_node: u32,
    pub bit_width: usize,
    /// clock frequency in GHz
    pub clk_freq: f64,
    /// storage used for the kernel weights
    pub memory_type: MemoryType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// delay stages between accumulation and write back (the nonlinearity)
    pub extra_pipeline_stage: usize,
    /// perform the arithmetic instead of only the handshakes
    pub functional_datapath: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSettings {
    /// capacity of the buffer appended after every conv, pool and fc layer
    pub append_buffer_capacity: usize,
    /// capacity of the buffers in front of every concat input, unbounded when absent
    pub inception_buffer_capacity: Option<usize>,
    /// let an empty buffer forward the upstream element in the same cycle
    pub cut_through: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// cycles the reset is held before the stimulus starts
    pub reset_period: u64,
    /// hard limit of simulated cycles
    pub max_cycles: u64,
    /// stop after this many frames were received at the output
    pub frames: usize,
}

impl Settings {
    /// # Description
    /// merge the config files in order, later files override earlier ones
    pub fn new(config_path: Vec<String>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        for i in config_path {
            builder = builder.add_source(File::with_name(&i));
        }
        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings() -> Result<(), Box<dyn std::error::Error>> {
        let settings = Settings::new(vec!["configs/default.toml".into()])?;
        // serialize settings to json
        let json = serde_json::to_string_pretty(&settings)?;
        println!("{}", json);
        assert_eq!(settings.hardware_settings.tech_node, 28);
        assert_eq!(settings.hardware_settings.memory_type, MemoryType::Rom);
        assert_eq!(settings.planner_strategy, PlannerStrategy::BruteForce);
        assert!(settings.buffer_settings.inception_buffer_capacity.is_none());
        Ok(())
    }

    #[test]
    fn test_settings_override() -> Result<(), Box<dyn std::error::Error>> {
        let settings = Settings::new(vec![
            "configs/default.toml".into(),
            "configs/fast.toml".into(),
        ])?;
        assert_eq!(settings.pixel_inference_rate, 1.0);
        assert_eq!(settings.planner_strategy, PlannerStrategy::ClosedForm);
        // untouched keys come from the default file
        assert_eq!(settings.hardware_settings.bit_width, 16);
        Ok(())
    }
}
