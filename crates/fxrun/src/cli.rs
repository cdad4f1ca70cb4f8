use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "fxrun",
    author,
    version,
    about = "Load, validate and hot-reload rtfx post-processing shaders"
)]
pub struct Cli {
    /// Configuration file; defaults to `fxrun.toml` in the config directory.
    #[arg(long, short, value_name = "PATH", env = "FXRUN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Override the shader folder named by the configuration.
    #[arg(long, value_name = "DIR", global = true)]
    pub shader_folder: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load every shader on a headless device and report the result.
    Check(CheckArgs),
    /// Keep the shaders loaded and reload them whenever the folder changes.
    Watch(WatchArgs),
    /// Print resolved configuration paths.
    Paths,
}

#[derive(Parser, Debug, Default)]
pub struct CheckArgs {
    /// Emit the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug, Default)]
pub struct WatchArgs {
    /// Stop after this many reloads (0 = run until interrupted).
    #[arg(long, value_name = "COUNT", default_value_t = 0)]
    pub max_reloads: usize,
}

pub fn parse() -> Cli {
    Cli::parse()
}
