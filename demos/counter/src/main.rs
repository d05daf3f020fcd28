//! Counter demo binary
//!
//! Runs a tick loop at a fixed rate, dispatching local and remote actions
//! and printing every snapshot change.

use counter::{ADD, AMOUNT, CounterState, DECREMENT, INCREMENT, RESET, RemoteMiddleware, RequestLog};
use flux_store_core::Action;
use flux_store_runtime::metrics::MetricsExporter;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "counter=debug,flux_store_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut exporter = MetricsExporter::new();
    exporter.install()?;

    println!("=== Counter Demo: Flux Store ===\n");

    let remote = RemoteMiddleware::new(
        tokio::runtime::Handle::current(),
        Duration::from_millis(40),
        Arc::new(|address: &str| match address.strip_prefix("remote://") {
            Some(amount) => amount.parse::<i64>().map_err(|e| e.to_string()),
            None => Err(format!("unknown address {address}")),
        }),
    );
    let mut store = counter::store(Some(remote))?;

    store.subscribe(|old, new| {
        for domain in old.changed_domains(new) {
            println!("  changed: {domain}");
        }
    });

    let count = store.state::<CounterState>("counter").map_or(0, |s| s.count);
    println!("Initial count: {count}");

    let actions = [
        Action::new(INCREMENT),
        Action::new(INCREMENT),
        Action::new(ADD).with_entry(AMOUNT, 10),
        Action::new(ADD).with_address("remote://25"),
        Action::new(ADD).with_address("remote://not-a-number"),
        Action::new(DECREMENT),
        Action::new(RESET),
        Action::new(INCREMENT),
    ];
    for action in actions {
        println!(">>> Dispatching: kind {}", action.kind());
        store.dispatch_with(action, |done| {
            match &done.error {
                None => println!("<<< Completed: kind {}", done.kind()),
                Some(error) => println!("<<< Completed: kind {} with error {error}", done.kind()),
            }
        })?;
    }

    // ~60 pulses per second, like a frame loop
    let mut interval = tokio::time::interval(Duration::from_millis(16));
    let mut ticks = 0u64;
    while !store.is_idle() {
        interval.tick().await;
        store.tick()?;
        ticks += 1;
    }

    let count = store.state::<CounterState>("counter").map_or(0, |s| s.count);
    println!("\nFinal count: {count} after {ticks} ticks");
    if let Some(log) = store.state::<RequestLog>("requests") {
        println!(
            "Remote lookups: {} succeeded, {} failed (last error: {:?})",
            log.succeeded, log.failed, log.last_error
        );
    }

    let health = store.health();
    println!("Store health: {}", health.status);

    if let Some(rendered) = exporter.render() {
        println!("\n=== Metrics ===\n{rendered}");
    }

    store.teardown();
    Ok(())
}
