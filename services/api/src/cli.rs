use crate::maintenance::{run_prune, run_wave, PruneArgs, WaveCommand};
use crate::server;
use admission_intake::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Admission Intake",
    about = "Serve and maintain the multi-step admission intake flow",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Hard-delete drafts whose retention window has passed
    Prune(PruneArgs),
    /// Manage admission waves
    Wave {
        #[command(subcommand)]
        command: WaveCommand,
    },
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Prune(args) => run_prune(args),
        Command::Wave { command } => run_wave(command),
    }
}
