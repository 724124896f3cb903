use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use ratesync::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for ratesync::AppCommand {
    fn from(cmd: Commands) -> ratesync::AppCommand {
        match cmd {
            Commands::Run => ratesync::AppCommand::Run,
            Commands::Test { name } => ratesync::AppCommand::Test { name },
            Commands::Serve => ratesync::AppCommand::Serve,
            Commands::Sources => ratesync::AppCommand::Sources,
            Commands::Rates { currency } => ratesync::AppCommand::Rates { currency },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch today's rate for every active source once
    Run,
    /// Test the connection of one source, undoing its bookkeeping on failure
    Test {
        /// Source name as configured
        name: String,
    },
    /// Run the daily scheduler until interrupted
    Serve,
    /// List configured rate sources
    Sources,
    /// List stored exchange rates
    Rates {
        /// Only show rates for this currency code
        #[arg(long)]
        currency: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => ratesync::cli::setup::setup(),
        Some(cmd) => ratesync::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
