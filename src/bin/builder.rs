//! Builder CLI: expand a concept graph from the configured seed, then mine
//! random relationships among the processed concepts.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use conceptloom::builder::Builder;
use conceptloom::config::Settings;
use conceptloom::llm::OllamaClient;
use conceptloom::store::Neo4jStore;
use conceptloom::telemetry;

#[derive(Debug, Parser)]
#[command(name = "builder", about = "Grow a concept knowledge graph from a seed")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(term) => term,
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        cancel.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    telemetry::init();
    let args = Args::parse();
    let explicit = args.config != PathBuf::from("config.yaml");
    let settings = Settings::load(&args.config, explicit)?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let store = Neo4jStore::connect(
        &settings.neo4j.uri,
        &settings.neo4j.user,
        &settings.neo4j.password,
        settings.neo4j.max_retries,
        settings.neo4j.retry_interval(),
    )
    .await?;
    let llm = OllamaClient::new(&settings.llm)?;

    let builder = Builder::with_options(
        Arc::new(store),
        Arc::new(llm),
        conceptloom::builder::BuilderOptions {
            worker_count: settings.graph.worker_count,
            ..Default::default()
        },
    );

    let stats = builder
        .build(
            &settings.graph.seed_concept,
            settings.graph.max_nodes,
            settings.graph.deadline(),
            &cancel,
        )
        .await?;
    println!("{}", stats.summary());

    if settings.graph.random_relationships >= 1 && builder.node_count() >= 2 {
        let mining = builder
            .mine_random_relationships(
                settings.graph.random_relationships,
                settings.graph.concurrency,
                &cancel,
            )
            .await?;
        println!("{}", mining.summary());
    }

    Ok(())
}
