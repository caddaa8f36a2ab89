//! Todo Access Example
//!
//! This example demonstrates:
//! 1. Serving a todo list through a healthy cache
//! 2. Losing the cache and degrading to the authoritative store
//! 3. Watching the breakers open, probe and close again
//!
//! Run with `RUST_LOG=debug cargo run --example todos` for the full trace.

use std::sync::Arc;
use std::time::Duration;

use todos_resilience::{
    BreakerSettings, Identity, MemoryCache, ServiceConfig, TodoAccessService, TodoItem,
};
use tracing_subscriber::EnvFilter;

fn show(label: &str, items: &[TodoItem]) {
    let ids: Vec<u64> = items.iter().map(|item| item.id).collect();
    println!("{label:<28} {ids:?}");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== Todo Access Example ===\n");

    let config = ServiceConfig {
        breaker: BreakerSettings {
            timeout_ms: 200,
            reset_timeout_ms: 1_000,
            ..BreakerSettings::default()
        },
        ..ServiceConfig::load()?
    };
    let cache = Arc::new(MemoryCache::new());
    let service = TodoAccessService::new(config, cache.clone());
    let alice = Identity::from("alice");

    // 1. Healthy cache
    show("seeded list:", &service.list(&alice).await);
    let milk = service.create(&alice, "buy milk").await?;
    println!("created:                     {milk:?}");
    service.delete(&alice, 2).await?;
    show("after delete:", &service.list(&alice).await);

    // 2. The cache goes away; every operation still completes
    cache.fail_all(true);
    for n in 0..6 {
        service.create(&alice, &format!("offline {n}")).await?;
    }
    show("while cache is down:", &service.list(&alice).await);

    let health = service.health();
    println!(
        "\nbreakers: read={} write={} publish={}",
        health.cache_read.state, health.cache_write.state, health.audit_publish.state
    );

    // 3. The cache recovers; after the cool-down a trial call closes each breaker
    cache.fail_all(false);
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    service.create(&alice, "back online").await?;
    show("after recovery:", &service.list(&alice).await);

    println!("\n{}", serde_json::to_string_pretty(&service.health())?);
    println!("\n=== Example Completed ===");
    Ok(())
}
