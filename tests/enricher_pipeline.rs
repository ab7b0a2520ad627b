//! End-to-end enricher scenarios: no-op batches, the global creation cap,
//! lifecycle guards, and outage tolerance.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{store_with_concepts, BrokenModel, RelationScript, ScriptedModel};
use conceptloom::config::EnricherSettings;
use conceptloom::enricher::{EnrichError, Enricher};
use conceptloom::store::GraphStore;

fn settings(max_relationships: u64) -> EnricherSettings {
    EnricherSettings {
        batch_size: 10,
        interval_seconds: 1,
        max_relationships,
        concurrency: 3,
    }
}

#[tokio::test]
async fn fully_connected_graph_is_a_no_op() {
    let store = store_with_concepts(&["Tea", "Ceramics"]).await;
    store
        .upsert_relationship("Tea", "Ceramics", "SERVED_IN", None, None)
        .await
        .unwrap();

    let enricher = Enricher::new(
        Arc::clone(&store) as Arc<dyn GraphStore>,
        Arc::new(ScriptedModel::new(0, RelationScript::Always)),
        settings(0),
    );
    let stats = enricher.run_once(10).await.unwrap();

    assert_eq!(stats.batches_completed, 1);
    assert_eq!(stats.pairs_processed, 0);
    assert_eq!(stats.relationships_created, 0);
    assert_eq!(store.relationships().len(), 1);
}

#[tokio::test]
async fn run_once_writes_discovered_relationships() {
    let store = store_with_concepts(&["A", "B", "C", "D"]).await;
    let enricher = Enricher::new(
        Arc::clone(&store) as Arc<dyn GraphStore>,
        Arc::new(ScriptedModel::new(0, RelationScript::Always)),
        settings(0),
    );

    let stats = enricher.run_once(3).await.unwrap();

    assert_eq!(stats.batches_completed, 1);
    assert_eq!(stats.pairs_processed, 3);
    assert_eq!(stats.relationships_found, 3);
    assert_eq!(stats.relationships_created, 3);
    assert_eq!(store.relationships().len(), 3);
    assert!(stats.last_batch_at.is_some());
}

#[tokio::test]
async fn continuous_run_terminates_at_the_cap_exactly() {
    // Eight unconnected concepts give far more candidate pairs than the cap.
    let store = store_with_concepts(&["A", "B", "C", "D", "E", "F", "G", "H"]).await;
    let before = store.graph_stats().await.unwrap().relationship_count;

    let enricher = Enricher::new(
        Arc::clone(&store) as Arc<dyn GraphStore>,
        Arc::new(ScriptedModel::new(0, RelationScript::Always)),
        settings(3),
    );
    let cancel = CancellationToken::new();

    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        enricher.run_continuously(&cancel),
    )
    .await
    .expect("run must terminate at the cap")
    .unwrap();

    assert_eq!(stats.relationships_created, 3);
    assert!(!stats.running);
    let after = store.graph_stats().await.unwrap().relationship_count;
    assert_eq!(after - before, 3);
}

#[tokio::test]
async fn second_start_fails_while_running_and_stop_ends_the_run() {
    // Unbounded cap and a long interval keep the run alive between ticks.
    let store = store_with_concepts(&["A", "B", "C"]).await;
    let enricher = Arc::new(Enricher::new(
        Arc::clone(&store) as Arc<dyn GraphStore>,
        Arc::new(ScriptedModel::new(0, RelationScript::Never)),
        EnricherSettings {
            batch_size: 2,
            interval_seconds: 600,
            max_relationships: 0,
            concurrency: 2,
        },
    ));

    let cancel = CancellationToken::new();
    let running = {
        let enricher = Arc::clone(&enricher);
        let cancel = cancel.clone();
        tokio::spawn(async move { enricher.run_continuously(&cancel).await })
    };

    // Wait for the first tick to mark the instance running.
    let mut waited = Duration::ZERO;
    while !enricher.is_running() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert!(enricher.is_running());

    assert!(matches!(
        enricher.run_continuously(&cancel).await,
        Err(EnrichError::AlreadyRunning)
    ));

    enricher.stop().unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("stop must end the run")
        .unwrap()
        .unwrap();
    assert!(!stats.running);
    assert!(!enricher.is_running());
    assert!(matches!(enricher.stop(), Err(EnrichError::NotRunning)));
}

#[tokio::test]
async fn cancellation_ends_a_continuous_run() {
    let store = store_with_concepts(&["A", "B", "C"]).await;
    let enricher = Enricher::new(
        Arc::clone(&store) as Arc<dyn GraphStore>,
        Arc::new(ScriptedModel::new(0, RelationScript::Never)),
        EnricherSettings {
            batch_size: 2,
            interval_seconds: 600,
            max_relationships: 0,
            concurrency: 2,
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let stats = tokio::time::timeout(
        Duration::from_secs(5),
        enricher.run_continuously(&cancel),
    )
    .await
    .expect("cancellation must end the run")
    .unwrap();
    assert!(!stats.running);
}

#[tokio::test]
async fn probe_failures_skip_the_pair_but_advance_the_batch() {
    let store = store_with_concepts(&["A", "B", "C", "D"]).await;
    let enricher = Enricher::new(
        Arc::clone(&store) as Arc<dyn GraphStore>,
        Arc::new(BrokenModel),
        settings(0),
    );

    let stats = enricher.run_once(4).await.unwrap();

    assert_eq!(stats.batches_completed, 1);
    assert_eq!(stats.pairs_processed, 4);
    assert_eq!(stats.relationships_created, 0);
    assert!(store.relationships().is_empty());
}
