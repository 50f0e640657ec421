//! Basic usage example for the rategate crate.
//!
//! Run with `RUST_LOG=rategate=debug cargo run --example basic` to see the
//! queue's own log lines.

use async_trait::async_trait;
use rategate::{
    AdvancedSearchRequest, CatalogSearch, PauseEvent, ObserverError, RequestQueue,
    RequestQueueBuilder, SearchRequest,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
#[error("catalog returned HTTP {0}")]
struct DemoError(u16);

/// Pretend catalog that rejects every third call.
#[derive(Default)]
struct DemoCatalog {
    calls: AtomicU32,
}

impl DemoCatalog {
    fn answer(&self, query: &str) -> Result<Vec<String>, DemoError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % 3 == 0 {
            return Err(DemoError(429));
        }
        Ok(vec![format!("{} (vol. 1)", query), format!("{} (vol. 2)", query)])
    }
}

#[async_trait]
impl CatalogSearch for DemoCatalog {
    type Output = Vec<String>;
    type Error = DemoError;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<String>, DemoError> {
        self.answer(&request.query)
    }

    async fn advanced_search(
        &self,
        request: &AdvancedSearchRequest,
    ) -> Result<Vec<String>, DemoError> {
        self.answer(&request.query)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Basic Request Queue Example ===\n");

    // Example 1: Paced slots
    paced_slots_example().await;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 2: Gated searches with retry
    search_example().await;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 3: Pause and resume
    pause_example().await;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 4: Monitoring metrics
    metrics_example().await;
}

/// A fast queue so the demo finishes in a couple of seconds.
fn demo_queue() -> RequestQueue {
    RequestQueueBuilder::new()
        .max_requests_per_minute(300)
        .no_external_limit()
        .safety_delay_ms(20)
        .retries(2, 100)
        .build()
}

async fn paced_slots_example() {
    println!("1. Paced Slots:");

    let queue = demo_queue();
    println!(
        "   {}/min ceiling, {}ms between grants",
        queue.config().max_requests_per_minute,
        queue.config().grant_spacing().as_millis()
    );

    let start = Instant::now();
    let tickets: Vec<_> = (0..5).map(|_| queue.enqueue()).collect();
    for ticket in tickets {
        let id = ticket.granted().await;
        println!("   Slot {} granted at {:>4}ms", id, start.elapsed().as_millis());
    }
}

async fn search_example() {
    println!("2. Gated Searches:");

    let queue = demo_queue();
    let catalog = Arc::new(DemoCatalog::default());

    let mut handles = Vec::new();
    for title in ["Mushishi", "Aria", "Yokohama Kaidashi Kikou", "Planetes"] {
        let queue = queue.clone();
        let catalog = catalog.clone();
        handles.push(tokio::spawn(async move {
            let result = queue
                .search_with_rate_limit(&*catalog, &SearchRequest::new(title), true)
                .await;
            (title, result)
        }));
    }

    for handle in handles {
        match handle.await {
            Ok((title, Ok(hits))) => println!("   {:<24} ✅ {} hits", title, hits.len()),
            Ok((title, Err(e))) => println!("   {:<24} ❌ {}", title, e),
            Err(e) => println!("   task failed: {}", e),
        }
    }

    let advanced = AdvancedSearchRequest::new("Dungeon Meshi")
        .genre("Fantasy")
        .format("MANGA")
        .sort_by("POPULARITY_DESC");
    match queue
        .advanced_search_with_rate_limit(&*catalog, &advanced, true)
        .await
    {
        Ok(hits) => println!("   Advanced search       ✅ {:?}", hits),
        Err(e) => println!("   Advanced search       ❌ {}", e),
    }

    println!(
        "   Catalog saw {} calls",
        catalog.calls.load(Ordering::SeqCst)
    );
}

async fn pause_example() {
    println!("3. Pause and Resume:");

    let queue = demo_queue();
    queue
        .pause_gate()
        .add_observer(Arc::new(|event: &PauseEvent| -> Result<(), ObserverError> {
            let label = if event.paused { "paused" } else { "resumed" };
            println!("   [observer] matching {}", label);
            Ok(())
        }));

    queue.set_paused(true);
    let start = Instant::now();
    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue.acquire_slot().await;
            start.elapsed()
        })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("   Pending while paused: {}", queue.pending());
    queue.set_paused(false);

    match waiter.await {
        Ok(waited) => println!("   Slot granted after {}ms", waited.as_millis()),
        Err(e) => println!("   task failed: {}", e),
    }
}

async fn metrics_example() {
    println!("4. Monitoring Metrics:");

    let queue = demo_queue();
    let catalog = DemoCatalog::default();
    for title in ["Blame!", "Knights of Sidonia", "Biomega"] {
        let _ = queue
            .search_with_rate_limit(&catalog, &SearchRequest::new(title), true)
            .await;
    }

    let metrics = queue.metrics();
    println!("{}", metrics.summary());
    println!("   Status: {}", metrics.status());
}
