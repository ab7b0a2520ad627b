//! Enricher CLI: continuously (or once) probe random unconnected concept
//! pairs and write the relationships the model reports.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use conceptloom::config::Settings;
use conceptloom::enricher::Enricher;
use conceptloom::llm::OllamaClient;
use conceptloom::store::Neo4jStore;
use conceptloom::telemetry;

#[derive(Debug, Parser)]
#[command(
    name = "enricher",
    about = "Discover relationships between existing concepts"
)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Process a single batch and exit.
    #[arg(long)]
    run_once: bool,

    /// Pairs to sample in --run-once mode; defaults to enricher.batch_size.
    #[arg(long)]
    count: Option<usize>,
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

    let batch_size = settings.enricher.batch_size;
    let enricher = Enricher::new(Arc::new(store), Arc::new(llm), settings.enricher);

    let stats = if args.run_once {
        enricher.run_once(args.count.unwrap_or(batch_size)).await?
    } else {
        enricher.run_continuously(&cancel).await?
    };
    println!("{}", stats.summary());

    Ok(())
}
