use chrono::Local;
use clap::{Command, CommandFactory, Parser};
use clap_complete::{generate, Generator};
use convnet_acc::{
    cmd_args::Args,
    planner::PipelineDepths,
    settings::Settings,
    AccResult, ConvNetAcc, Net, Planner, System,
};
use log::info;
use std::io;
fn print_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}
fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logger::init_with_level(log::Level::Info)?;

    let mut config_names = vec![String::from("configs/default.toml")];
    let args = Args::parse();
    if let Some(generator) = args.generator {
        let mut cmd = Args::command();
        eprintln!("Generating completion file for {:?}...", generator);
        print_completions(generator, &mut cmd);
        return Ok(());
    }
    println!("{:?}", args);

    // config_names append args
    for arg in args.config_names.into_iter() {
        config_names.push(arg);
    }

    let mut results = AccResult::new();
    let settings = Settings::new(config_names)?;
    results.settings = Some(settings.clone());
    println!("{}", serde_json::to_string_pretty(&settings)?);
    // create the folder for output
    std::fs::create_dir_all("output")?;

    let mut net_paths = vec![];
    for pattern in settings.net_paths.iter() {
        for path in glob::glob(pattern)? {
            net_paths.push(path?);
        }
    }

    let planner = Planner::new(
        settings.planner_strategy,
        PipelineDepths {
            nonlinearity: settings.pipeline_settings.extra_pipeline_stage,
        },
    );

    for net_path in net_paths {
        let start_time = std::time::Instant::now();
        info!("simulating {:?}", net_path);
        let net = Net::load(&net_path)?;
        let plan = planner.plan(&net, settings.pixel_inference_rate)?;
        let acc = ConvNetAcc::new(&net, plan, &settings)?;
        let mut system = System::new(acc, &net, &settings.simulation_settings)?;

        // run the system
        let mut stat = system.run()?;

        // record the simulation time
        let simulation_time = start_time.elapsed().as_secs();
        let seconds = simulation_time % 60;
        let minutes = (simulation_time / 60) % 60;
        let hours = (simulation_time / 60) / 60;
        stat.simulation_time = format!("{}:{}:{}", hours, minutes, seconds);
        results.stats.push(stat);
    }

    let current_time: String = Local::now().format("%Y-%m-%d-%H-%M-%S%.6f").to_string();
    let output_path = format!("output/{}.json", current_time);

    println!("{}", serde_json::to_string_pretty(&results)?);
    // write json of results to output_path
    std::fs::write(output_path, serde_json::to_string_pretty(&results)?)?;
    Ok(())
}
