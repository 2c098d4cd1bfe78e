use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use utils::version;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy pods, nodes and containers from the legacy store to the successor store
    Migrate(RunArgs),
    /// Print the node capacity reconciliation as JSON without writing anything
    Plan(RunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Settings file, in yaml
    #[arg(
        long,
        env = "ERU_CONFIG_PATH",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/etc/eru/migrate.yaml"
    )]
    pub config: PathBuf,

    /// Only migrate the named pod
    #[arg(long)]
    pub pod: Option<String>,
}
