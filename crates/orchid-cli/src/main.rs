//! Orchid CLI: run, validate, and inspect agent workflow documents.
//!
//! A thin adapter over the orchid-core engine: the same interpreter a
//! server or desktop shell would embed, driven from the terminal with
//! stdio bound as the client channel.

use clap::{Parser, Subcommand};

use orchid_cli::commands;

/// Command-line interface for the Orchid engine.
#[derive(Parser)]
#[command(name = "orchid", version, about = "Orchid CLI — agent workflow runtime")]
pub struct Cli {
    /// Root directory for engine state (capability directory, generated
    /// modules, document revisions)
    #[arg(long, env = "ORCHID_DATA_DIR")]
    data_dir: Option<String>,

    /// Extra directory searched for agent documents referenced by bare
    /// name (repeatable, searched before the defaults)
    #[arg(long = "agent-dir")]
    agent_dirs: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an operation from an agent document
    Run {
        /// Path, agent id, or bare name of the agent document
        file: String,
        /// Operation to run
        #[arg(long, short = 'o', default_value = "default")]
        operation: String,
        /// Operation input as a JSON string (objects pass through,
        /// scalars arrive as `input.value`)
        #[arg(long, short = 'i', default_value = "{}")]
        input: String,
        /// Client identity forwarded to the run
        #[arg(long)]
        client_id: Option<String>,
        /// Print the step trace after the run
        #[arg(long, short = 't')]
        trace: bool,
    },

    /// Validate an agent document without executing it
    Validate {
        /// Path to the agent document
        file: String,
    },

    /// Inspect the capability directory
    Capability {
        #[command(subcommand)]
        action: CapabilityAction,
    },
}

#[derive(Subcommand)]
enum CapabilityAction {
    /// List builtin modules and every directory record
    List,
    /// Show what answers for one capability
    Resolve {
        /// Qualified `module.function` name
        capability: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchid_core=warn,orchid_cli=info".into()),
        )
        .init();

    let config = commands::engine_config(cli.data_dir.as_deref(), &cli.agent_dirs);

    let result = match cli.command {
        Commands::Run {
            file,
            operation,
            input,
            client_id,
            trace,
        } => {
            commands::run::run(
                config,
                &file,
                &operation,
                &input,
                client_id.as_deref(),
                trace,
            )
            .await
        }

        Commands::Validate { file } => commands::validate::run(&file).await,

        Commands::Capability { action } => match action {
            CapabilityAction::List => commands::capability::list(config).await,
            CapabilityAction::Resolve { capability } => {
                commands::capability::resolve(config, &capability).await
            }
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
