use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing::{info, warn};

use crate::backend::{EchoBackend, ProviderRouter};
use crate::config::Config;
use crate::events::OutEvent;
use crate::lexer;
use crate::service::ZflowService;

#[derive(Parser)]
#[command(name = "zflow")]
#[command(about = "Zflow - parse and run LLM orchestration scripts", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a script and print its events as SSE frames
    Run {
        /// Script file, or '-' for stdin
        script: String,

        /// Text to use instead of the leading input variable
        #[arg(short = 'i', long = "input")]
        input: Option<String>,
    },

    /// Parse a script and print its canonical form
    Check {
        /// Script file, or '-' for stdin
        script: String,

        /// Print the environment and AST as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the token stream of a script
    Tokens {
        /// Script file, or '-' for stdin
        script: String,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load configuration before any command so config errors surface first
    let config = Config::load_from(cli.config.as_deref())?;
    init_logging(&config);

    match cli.command {
        Commands::Run { script, input } => {
            let source = read_script(&script)?;
            run_script(&config, &source, input).await?;
        }

        Commands::Check { script, json } => {
            let source = read_script(&script)?;
            let service = ZflowService::new(Arc::new(echo_router(&config)), &config);
            let parsed = service.compile(&source)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&parsed)?);
            } else {
                print!("{}", parsed);
            }
        }

        Commands::Tokens { script } => {
            let source = read_script(&script)?;
            for token in lexer::tokenize(&source)? {
                println!(
                    "{}:{}\t{}\t{:?}",
                    token.span.line + 1,
                    token.span.col + 1,
                    token.kind.describe(),
                    token.text
                );
            }
        }
    }

    Ok(())
}

async fn run_script(config: &Config, source: &str, input: Option<String>) -> Result<()> {
    let service = ZflowService::new(Arc::new(echo_router(config)), config);
    let mut handle = service.execute_with_input(source, input)?;

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling run");
            cancel.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    let mut failure = None;
    while let Some(event) = handle.events().next().await {
        stdout.write_all(event.to_sse().as_bytes())?;
        stdout.flush()?;
        if let OutEvent::Error { message } = event {
            failure = Some(message);
        }
    }

    if let Some(message) = failure {
        anyhow::bail!("run failed: {}", message);
    }
    if handle.cancellation_token().is_cancelled() {
        warn!(run_id = %handle.run_id(), "run cancelled");
    }
    Ok(())
}

/// Router with the built-in `echo` provider registered
fn echo_router(config: &Config) -> ProviderRouter {
    let echo = EchoBackend::new(config.executor.side_context_label.clone());
    ProviderRouter::new().register("echo", Arc::new(echo))
}

fn read_script(path: &str) -> Result<String> {
    if path == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read script from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read script {}", path))
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter));

    // Logs go to stderr so stdout carries only command output
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
