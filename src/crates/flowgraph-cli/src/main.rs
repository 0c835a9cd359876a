//! # flowgraph-cli
//!
//! Runs a configured pipeline: load the YAML configuration, register the
//! requested extensions, build the DAG, run it with the configured `args`,
//! and emit the terminal value through the selected formatter. The process
//! exits nonzero when the terminal envelope carries a nonzero code; the
//! value is still emitted.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use flowgraph_core::{FlowConfig, OperatorRegistry, Pipeline};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "flowgraph")]
#[command(about = "Run a flowgraph pipeline from configuration", long_about = None)]
#[command(version)]
struct Cli {
    /// Pipeline configuration file
    #[arg(short, long, default_value = "flowgraph.yaml")]
    config: PathBuf,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn render(&self, value: &serde_json::Value) -> Result<String> {
        match self {
            Format::Json => serde_json::to_string(value).context("cannot render JSON output"),
            Format::Yaml => serde_yaml::to_string(value).context("cannot render YAML output"),
        }
    }
}

async fn run(cli: Cli) -> Result<i64> {
    let config = FlowConfig::from_file(&cli.config)
        .with_context(|| format!("cannot load configuration '{}'", cli.config.display()))?;

    let mut registry = OperatorRegistry::new();
    if config.ext.is_empty() {
        flowgraph_ops::register_defaults(&mut registry);
    } else {
        for ext in &config.ext {
            flowgraph_ops::load_extension(ext, &mut registry)
                .with_context(|| format!("cannot load extension '{}'", ext))?;
        }
    }

    let pipeline = Pipeline::from_config(&config.pipeline, &registry)
        .context("cannot build pipeline")?;

    tracing::info!(pipeline = %pipeline.name(), "running");
    let envelope = pipeline.run(config.args.clone()).await;
    if envelope.code != 0 {
        tracing::error!(
            pipeline = %pipeline.name(),
            code = envelope.code,
            "pipeline finished with an error code"
        );
    }

    let rendered = cli.format.render(&envelope.data)?;
    match &cli.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("cannot write output '{}'", path.display()))?,
        None => println!("{}", rendered),
    }

    Ok(envelope.code)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "fatal");
            ExitCode::FAILURE
        }
    }
}
