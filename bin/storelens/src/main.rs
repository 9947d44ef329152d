mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "storelens")]
#[command(about = "App store review analysis with a remote browser and LLM tooling", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP entrypoint (long-running daemon)
    Serve {
        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Run the review analysis pipeline for one app
    Analyze {
        /// App name to analyze (e.g. "Pokémon UNITE")
        app_name: String,

        /// Two-letter country code
        #[arg(long, default_value = "us")]
        country: String,

        /// Exact star rating to filter on (1-5); any other value fetches all
        #[arg(long, default_value_t = -1)]
        rank: i64,
    },

    /// Ask the agent a free-form question (it decides which tools to use)
    Ask {
        /// The question or instruction
        prompt: String,
    },

    /// Capture a page screenshot via a remote browser session
    Capture {
        /// URL to open
        url: String,

        /// Where to write the PNG (defaults to the output directory)
        #[arg(short, long)]
        output: Option<String>,

        /// Keep the session alive after the capture until Ctrl-C
        #[arg(long)]
        hold: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port, host } => {
            commands::serve::run(host, port).await?;
        }
        Commands::Analyze {
            app_name,
            country,
            rank,
        } => {
            commands::analyze::run(&app_name, &country, rank).await?;
        }
        Commands::Ask { prompt } => {
            commands::ask::run(&prompt).await?;
        }
        Commands::Capture { url, output, hold } => {
            commands::capture::run(&url, output.as_deref(), hold).await?;
        }
    }

    Ok(())
}
