mod common;
use chrono::Local;
use convnet_acc::{
    accelerator::Pattern,
    planner::{Parallelism, ParallelismPlan, PipelineDepths},
    settings::Settings,
    AccError, AccResult, Net,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const SINGLE_CONV: &str = r#"{
  "name": "single_conv",
  "layers": [
    {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 4, 8, 8]},
    {"name": "conv1", "type": "Convolution", "bottom": ["data"], "top": ["conv1"],
     "num_output": 8, "kernel_size": 3, "pad": 1, "stride": 1}
  ]
}"#;

const CONV_POOL: &str = r#"{
  "name": "conv_pool",
  "layers": [
    {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 2, 4, 4]},
    {"name": "conv1", "type": "Convolution", "bottom": ["data"], "top": ["conv1"],
     "num_output": 2, "kernel_size": 1},
    {"name": "pool1", "type": "Pooling", "bottom": ["conv1"], "top": ["pool1"],
     "pool": "MAX", "kernel_size": 2, "stride": 2}
  ]
}"#;

#[test]
fn test_end_to_end_interval() -> Result<(), Box<dyn std::error::Error>> {
    common::init_logger();
    let settings = common::default_settings()?;
    let net = common::net_from_str(SINGLE_CONV)?;
    let mut plan = ParallelismPlan::new();
    plan.insert(1, "conv1", Parallelism::conv(2, 4));
    let mut system = common::build_system(&net, plan, &settings)?;
    let stats = system.run()?;
    assert_eq!(stats.throughput.frames_received, 2);

    let depths = PipelineDepths {
        nonlinearity: settings.pipeline_settings.extra_pipeline_stage,
    };
    // ceil(4/2) * ceil(8/4) groups plus the pipeline depth
    let period = (2 * 2 + depths.conv()) as u64;
    assert_eq!(stats.throughput.steady_output_interval(), Some(period));
    assert_eq!(period, 9);
    // row changes only add the scan of the two leftmost padded columns of each row
    let frame = stats.throughput.output_frames[1];
    assert_eq!(frame.transfers, 64);
    assert!(frame.avg >= period as f64, "avg {}", frame.avg);
    assert!(frame.avg < (period + 1) as f64, "avg {}", frame.avg);
    common::assert_conserved(&net, &stats, 2);
    Ok(())
}

#[test]
fn test_functional_datapath() -> Result<(), Box<dyn std::error::Error>> {
    common::init_logger();
    let mut settings = common::default_settings()?;
    settings.pipeline_settings.functional_datapath = true;
    let net = common::net_from_str(CONV_POOL)?;
    let mut plan = ParallelismPlan::new();
    plan.insert(1, "conv1", Parallelism::conv(1, 1));
    plan.insert(2, "pool1", Parallelism::pool(1));
    let mut system = common::build_system(&net, plan, &settings)?.keep_outputs();
    system.run()?;
    // unit weights sum the two equal lanes, the pooling picks the bottom right pixel of each block
    let expected = [5., 7., 13., 15., 21., 23., 29., 31.]
        .iter()
        .map(|v| vec![2. * v; 2])
        .collect::<Vec<_>>();
    assert_eq!(system.sink().outputs, expected);
    Ok(())
}

#[test]
fn test_lenet_conservation() -> Result<(), Box<dyn std::error::Error>> {
    common::init_logger();
    let settings = common::default_settings()?;
    let net = Net::load("configs/nets/lenet.json")?;
    let plan = common::plan(&net, &settings)?;
    assert_eq!(plan.iter().count(), common::compute_layers(&net));
    let mut system = common::build_system(&net, plan, &settings)?;
    let stats = system.run()?;
    assert!(system.finished());
    common::assert_conserved(&net, &stats, settings.simulation_settings.frames as u64);
    // the softmax is bypassed, the output is the channel of ip2
    assert_eq!(stats.registry["prob"], stats.registry["ip2"]);
    Ok(())
}

#[test]
fn test_inception() -> Result<(), Box<dyn std::error::Error>> {
    common::init_logger();
    let settings = Settings::new(vec![
        "configs/default.toml".into(),
        "configs/fast.toml".into(),
    ])?;
    let net = Net::load("configs/nets/inception.json")?;
    let plan = common::plan(&net, &settings)?;
    let mut system = common::build_system(&net, plan, &settings)?;
    let stats = system.run()?;
    assert!(system.finished());
    common::assert_conserved(&net, &stats, settings.simulation_settings.frames as u64);

    let registry = &stats.registry;
    for name in [
        "conv1_split_0",
        "conv1_split_2",
        "inception/1x1_prepend_channel_buffer",
        "inception/3x3_prepend_channel_buffer",
        "inception/pool_proj_prepend_channel_buffer",
        "inception/3x3_append_channel_buffer",
        "inception/output",
    ] {
        assert!(registry.contains_key(name), "missing {}", name);
    }
    // every branch entering the concat is buffered
    let prepend = stats
        .buffer_occupancies
        .keys()
        .filter(|name| name.starts_with("inception/output_prepend_channel_buffer_"))
        .count();
    assert_eq!(prepend, 3);
    Ok(())
}

#[test]
fn test_fuzzed_backpressure() -> Result<(), Box<dyn std::error::Error>> {
    common::init_logger();
    let settings = common::default_settings()?;
    let net = Net::load("configs/nets/inception.json")?;
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..3 {
        let source = Pattern::new((0..97).map(|_| rng.gen_bool(0.6)).collect());
        let sink = Pattern::new((0..89).map(|_| rng.gen_bool(0.3)).collect());
        let plan = common::plan(&net, &settings)?;
        let mut system = common::build_system(&net, plan, &settings)?.with_patterns(source, sink);
        let stats = system.run()?;
        // every offered pixel is eventually taken, nothing is lost or duplicated
        assert!(system.finished());
        common::assert_conserved(&net, &stats, settings.simulation_settings.frames as u64);
    }
    Ok(())
}

#[test]
fn test_bounded_inception_buffers() -> Result<(), Box<dyn std::error::Error>> {
    common::init_logger();
    let mut settings = common::default_settings()?;
    // deep enough to cover the row the 3x3 branch lags behind the 1x1 branch
    settings.buffer_settings.inception_buffer_capacity = Some(16);
    settings.buffer_settings.cut_through = false;
    let net = Net::load("configs/nets/inception.json")?;
    let plan = common::plan(&net, &settings)?;
    let mut system = common::build_system(&net, plan, &settings)?;
    let stats = system.run()?;
    assert!(system.finished());
    for (name, occupancy) in stats.buffer_occupancies.iter() {
        if name.contains("_prepend_channel_buffer_") {
            assert!(*occupancy <= 16, "{} holds {}", name, occupancy);
        } else {
            assert!(*occupancy <= settings.buffer_settings.append_buffer_capacity);
        }
    }
    Ok(())
}

#[test]
fn test_configuration_errors() -> Result<(), Box<dyn std::error::Error>> {
    common::init_logger();
    let undefined = r#"{
      "name": "broken",
      "layers": [
        {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 2, 4, 4]},
        {"name": "conv1", "type": "Convolution", "bottom": ["dat"], "top": ["conv1"],
         "num_output": 4, "kernel_size": 3}
      ]
    }"#;
    let err = common::net_from_str(undefined).expect_err("undefined bottom");
    assert!(matches!(
        err.downcast_ref::<AccError>(),
        Some(AccError::UndefinedConnection { layer, connection })
            if layer == "conv1" && connection == "dat"
    ));

    let stochastic = r#"{
      "name": "broken",
      "layers": [
        {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 2, 4, 4]},
        {"name": "pool1", "type": "Pooling", "bottom": ["data"], "top": ["pool1"],
         "pool": "STOCHASTIC", "kernel_size": 2, "stride": 2}
      ]
    }"#;
    let err = common::net_from_str(stochastic).expect_err("unsupported pooling");
    assert!(matches!(
        err.downcast_ref::<AccError>(),
        Some(AccError::UnsupportedPoolMethod { .. })
    ));

    // a single output channel can never hide the pipeline behind the output groups
    let narrow = r#"{
      "name": "narrow",
      "layers": [
        {"name": "data", "type": "Input", "top": ["data"], "shape": [1, 2, 4, 4]},
        {"name": "conv1", "type": "Convolution", "bottom": ["data"], "top": ["conv1"],
         "num_output": 1, "kernel_size": 3}
      ]
    }"#;
    let net = common::net_from_str(narrow)?;
    let settings = common::default_settings()?;
    assert!(matches!(
        common::plan(&net, &settings),
        Err(AccError::InfeasibleParallelism { .. })
    ));
    Ok(())
}

#[test]
fn test_result_json() -> Result<(), Box<dyn std::error::Error>> {
    common::init_logger();
    std::fs::create_dir_all("output")?;
    let settings = common::default_settings()?;
    let mut results = AccResult::new();
    results.settings = Some(settings.clone());
    let net = common::net_from_str(SINGLE_CONV)?;
    let plan = common::plan(&net, &settings)?;
    let mut system = common::build_system(&net, plan, &settings)?;
    results.stats.push(system.run()?);

    let json = serde_json::to_string_pretty(&results)?;
    let value: serde_json::Value = serde_json::from_str(&json)?;
    assert_eq!(value["stats"][0]["net_name"], "single_conv");
    assert!(value["stats"][0]["breakdown"]["stages"]["MultArray"]["area"].as_f64() > Some(0.));
    let current_time: String = Local::now().format("%Y-%m-%d-%H-%M-%S%.6f").to_string();
    std::fs::write(format!("output/test-{}.json", current_time), json)?;
    Ok(())
}
