mod metrics;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use index::GraphStore;
use pipeline::{LogFormat, Pipeline, Services, Settings};
use query::RetrievalMode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graphrag")]
#[command(about = "Build a knowledge graph from documents and answer questions over it")]
struct Cli {
    /// Settings file (TOML); graphrag.toml in the working directory when present
    #[arg(long, short, global = true, env = "GRAPHRAG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load documents and run extraction, summarization and community reports
    Build {
        /// Files or directories (.txt, .md, .csv, .jsonl, .xlsx)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Delete the existing graph first
        #[arg(long)]
        clear: bool,
    },
    /// Answer a question from the graph
    Query {
        question: String,

        /// Retrieval mode: vector | cypher | global
        #[arg(long, default_value = "vector")]
        mode: RetrievalMode,

        /// Entities or community reports to retrieve
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Print entity, relationship and community counts
    Stats,
    /// Run the HTTP API
    Serve {
        /// Address to listen on, overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    init_tracing(settings.log.format);

    match cli.command {
        Command::Build { paths, clear } => {
            settings.pipeline.clear_graph |= clear;
            let documents = ingest::load_paths(&paths, &settings.ingest)
                .await
                .context("failed to load documents")?;
            let services = Services::connect(&settings).await?;

            let report = Pipeline::new(services, settings.pipeline.clone())
                .run(&documents)
                .await?;
            print_json(&report)?;
        }
        Command::Query {
            question,
            mode,
            top_k,
        } => {
            if let Some(top_k) = top_k {
                settings.retrieval.top_k = top_k;
            }
            settings.validate()?;
            let services = Services::connect(&settings).await?;

            let answer = services
                .retriever(settings.retrieval)
                .answer(&question, mode)
                .await?;
            print_json(&answer)?;
        }
        Command::Stats => {
            let services = Services::connect(&settings).await?;
            let stats = services
                .graph
                .stats()
                .await
                .context("failed to read graph stats")?;
            print_json(&stats)?;
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.server.bind.clone());
            let services = Services::connect(&settings).await?;
            server::serve(server::AppState::new(settings, services), &bind).await?;
        }
    }

    Ok(())
}
