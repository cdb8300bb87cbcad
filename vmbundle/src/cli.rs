use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "vmbundle",
    about = "Bundle, upload and register the running machine as a cloud image.",
    version
)]
pub struct Cli {
    /// Bundle without the instance metadata service or scratch volumes.
    #[arg(long = "nocloud")]
    pub nocloud: bool,

    /// TOML configuration file.
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level or filter (e.g., trace, debug, info, warn, error). Default: info.
    #[arg(long = "log", value_name = "LEVEL", default_value = "info")]
    pub log: String,
}
