use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use std::path::PathBuf;
use std::sync::Arc;
use tabular_copilot::collaborators::{JsonFileSchemaProvider, LoggingCommitter};
use tabular_copilot::{AssistError, Assistant, EngineConfig, Outcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tabular-copilot")]
#[command(about = "Natural-language queries, measures and model edits for tabular models")]
struct Args {
    /// JSON model description to connect to
    #[arg(short, long)]
    schema: PathBuf,

    /// Engine configuration file (JSON); TABULAR_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Commit planned mutations and measures to the catalog
    #[arg(long)]
    apply: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle a single request
    Ask { request: String },
    /// Read requests from stdin, one per line
    Repl,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref()).context("loading engine configuration")?;
    let assistant = Assistant::new(config)?;

    let status = assistant
        .connect(Arc::new(JsonFileSchemaProvider::new(&args.schema)))
        .await
        .with_context(|| format!("connecting to {}", args.schema.display()))?;
    info!(
        "Connected: {} tables, {} measures",
        status.tables, status.measures
    );

    match args.command {
        Command::Ask { request } => run(&assistant, &request, args.apply).await,
        Command::Repl => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if matches!(line, "exit" | "quit") {
                    break;
                }
                if let Err(e) = run(&assistant, line, args.apply).await {
                    error!("{:#}", e);
                }
            }
            Ok(())
        }
    }
}

async fn run(assistant: &Assistant, request: &str, apply: bool) -> Result<()> {
    let outcome = match assistant.handle(request).await {
        Ok(outcome) => outcome,
        Err(AssistError::Validation(errors)) => {
            println!("Request could not be turned into a valid expression:");
            println!("{}", errors.iter().map(|e| format!("  - {}", e)).join("\n"));
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    match &outcome {
        Outcome::Query { dax, .. } | Outcome::Measure { dax, .. } => println!("\n{}", dax),
        _ => {}
    }

    let plan = match outcome {
        Outcome::Measure { plan, .. } | Outcome::Mutation { plan } => plan,
        _ => return Ok(()),
    };
    if apply {
        let version = assistant.commit(plan, Arc::new(LoggingCommitter)).await?;
        println!("Committed; catalog is now at version {}", version);
    } else {
        println!("Plan not applied (pass --apply to commit)");
    }
    Ok(())
}
