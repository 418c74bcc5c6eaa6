use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "run-test-services")]
#[command(about = "Start test services for a shell session and export their connection details")]
pub struct Cli {
    /// Services to start (defaults to all built-in services)
    pub services: Vec<String>,

    /// Config file path (defaults to service-fixtures.yaml, searched upwards)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory the <kind>-details.json files are written to
    #[arg(short, long, default_value = ".")]
    pub details_dir: PathBuf,

    /// Pass service output through to this terminal
    #[arg(short, long)]
    pub verbose: bool,
}
