//! Three replicas editing one document over an in-process relay.
//!
//! `RUST_LOG=debug` shows every applied operation. `LOGOOT_JITTER_MS=<n>`
//! delays each delivery by up to `n` ms so peers see operations out of order.

use log::info;
use logoot_core::{Relay, RelayConfig, Replica, ReplicaConfig, ReplicaError};
use std::time::Duration;

fn relay_config() -> RelayConfig {
    let jitter = std::env::var("LOGOOT_JITTER_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis);
    RelayConfig {
        jitter,
        ..RelayConfig::default()
    }
}

/// Flush every replica's queued commands, then wait for the relay to drain.
async fn settle(relay: &Relay, replicas: &[Replica]) -> Result<(), ReplicaError> {
    for r in replicas {
        r.text().await?;
    }
    relay.settle().await;
    Ok(())
}

async fn report(replicas: &[Replica]) -> Result<(), ReplicaError> {
    for r in replicas {
        println!("{}: {:?}", r.site_id(), r.text().await?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = relay_config();
    info!("Starting logoot simulation (jitter: {:?})", config.jitter);

    let replicas = ["A", "B", "C"]
        .into_iter()
        .map(|site| Replica::spawn(site, ReplicaConfig::default()))
        .collect::<Result<Vec<_>, _>>()?;
    let relay = Relay::new(config);
    relay.connect_all(&replicas)?;

    let (a, b, c) = (&replicas[0], &replicas[1], &replicas[2]);

    a.append("hello").await?;
    settle(&relay, &replicas).await?;
    report(&replicas).await?;

    // B replaces the 'e' while C concurrently appends.
    b.local_delete(1).await?;
    b.local_insert(1, 'a').await?;
    c.append(" world").await?;
    settle(&relay, &replicas).await?;
    report(&replicas).await?;

    let stats = relay.stats();
    info!(
        "Relay forwarded {} message(s), delivered {}, dropped {}",
        stats.messages_forwarded, stats.messages_delivered, stats.messages_dropped
    );
    Ok(())
}
