//! Helios Indexer CLI
//!
//! Bulk loads NDJSON into Elasticsearch, exports indices, runs compensated
//! update-by-query and refreshes indices.

mod commands;
mod config;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

use clap::Parser;
use helios_indexer::ClusterClient;
use helios_indexer::backends::elasticsearch::ElasticsearchClient;
use helios_indexer::backends::memory::InMemoryCluster;
use helios_indexer::template::IndexTemplate;
use tracing::info;

use crate::config::{BackendKind, CliConfig, Command};

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("helios_indexer={},hfs_indexer={}", level, level))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Builds the cluster client selected on the command line.
fn create_client(config: &CliConfig) -> anyhow::Result<Arc<dyn ClusterClient>> {
    match config.backend {
        BackendKind::Elasticsearch => {
            let es_config = config.elasticsearch_config();
            info!(nodes = ?es_config.nodes, "Connecting to Elasticsearch");
            Ok(Arc::new(ElasticsearchClient::new(es_config)?))
        }
        BackendKind::Memory => {
            info!("Using in-memory cluster");
            Ok(Arc::new(InMemoryCluster::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let client = create_client(&config)?;
    let template = IndexTemplate::new(client, config.indexer_config())?;

    match &config.command {
        Command::Load {
            index,
            file,
            id_field,
            create_only,
        } => {
            let summary = commands::load(
                &template,
                index,
                file,
                id_field,
                *create_only,
                config.shutdown_timeout,
            )
            .await?;
            println!(
                "enqueued {} documents ({} blank lines skipped), shutdown {:?}",
                summary.enqueued, summary.skipped, summary.shutdown
            );
            if !summary.shutdown.is_complete() {
                std::process::exit(2);
            }
            return Ok(());
        }
        Command::Export { index, query, out } => {
            let written = match out {
                Some(path) => {
                    let mut writer = BufWriter::new(File::create(path)?);
                    commands::export(&template, index, query.as_deref(), &mut writer).await?
                }
                None => {
                    let stdout = io::stdout();
                    let mut writer = stdout.lock();
                    let written =
                        commands::export(&template, index, query.as_deref(), &mut writer).await?;
                    writer.flush()?;
                    written
                }
            };
            info!(documents = written, "Exported");
        }
        Command::UpdateByQuery {
            index,
            query,
            script_source,
            params,
        } => {
            let succeeded = commands::update_by_query(
                &template,
                index,
                query,
                script_source,
                params.as_deref(),
            )
            .await?;
            if !succeeded {
                template.close(config.shutdown_timeout).await?;
                std::process::exit(2);
            }
        }
        Command::Refresh { indices } => {
            commands::refresh(&template, indices).await?;
        }
    }

    template.close(config.shutdown_timeout).await?;
    Ok(())
}
