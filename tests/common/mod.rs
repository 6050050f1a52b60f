#![allow(dead_code)]

use convnet_acc::{
    net::{LayerKind, NetParameter},
    planner::{ParallelismPlan, PipelineDepths},
    settings::Settings,
    AccError, AccStatistics, ConvNetAcc, Net, Planner, System,
};

pub fn init_logger() {
    simple_logger::init_with_level(log::Level::Warn).unwrap_or(());
}

pub fn default_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    Ok(Settings::new(vec!["configs/default.toml".into()])?)
}

pub fn net_from_str(json: &str) -> Result<Net, Box<dyn std::error::Error>> {
    let param: NetParameter = serde_json::from_str(json)?;
    Ok(Net::from_parameter(param)?)
}

pub fn plan(net: &Net, settings: &Settings) -> Result<ParallelismPlan, AccError> {
    let planner = Planner::new(
        settings.planner_strategy,
        PipelineDepths {
            nonlinearity: settings.pipeline_settings.extra_pipeline_stage,
        },
    );
    planner.plan(net, settings.pixel_inference_rate)
}

pub fn build_system(
    net: &Net,
    plan: ParallelismPlan,
    settings: &Settings,
) -> Result<System, AccError> {
    let acc = ConvNetAcc::new(net, plan, settings)?;
    System::new(acc, net, &settings.simulation_settings)
}

/// every compute layer took and produced exactly `frames` whole frames
pub fn assert_conserved(net: &Net, stats: &AccStatistics, frames: u64) {
    let input = net.input_shape().map(|s| s.pixels() as u64).unwrap_or(0);
    assert_eq!(stats.throughput.injected, frames * input);
    for layer in net.layers().iter().filter(|l| l.is_compute()) {
        let transfers = stats
            .layers
            .iter()
            .find(|t| t.name == layer.name)
            .unwrap_or_else(|| panic!("no transfers for {}", layer.name));
        let in_pixels = layer.bottom_shapes[0].pixels() as u64;
        let out_pixels = layer.top_shapes[0].pixels() as u64;
        assert_eq!(transfers.accepted, frames * in_pixels, "{} accepted", layer.name);
        assert_eq!(transfers.emitted, frames * out_pixels, "{} emitted", layer.name);
    }
    let last = net.layers().last().map(|l| l.top_shapes[0].pixels() as u64);
    assert_eq!(Some(stats.throughput.received), last.map(|p| p * frames));
}

pub fn compute_layers(net: &Net) -> usize {
    net.layers()
        .iter()
        .filter(|l| {
            matches!(
                l.kind,
                LayerKind::Convolution(_) | LayerKind::InnerProduct(_) | LayerKind::Pooling(_)
            )
        })
        .count()
}
