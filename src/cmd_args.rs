use clap::Parser;
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// config files applied after configs/default.toml, later files override earlier ones
    pub config_names: Vec<String>,
    /// print the completion script for a shell and exit
    #[clap(long = "generate", arg_enum)]
    pub generator: Option<Shell>,
}
