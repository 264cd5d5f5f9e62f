//! Fan-out of each replica's outbox to every peer inbox.
//!
//! ```text
//!              ┌──────── link ──► peer B inbox
//!  A outbox ──►│
//!              └──────── link ──► peer C inbox
//! ```
//!
//! One task drains each source outbox and hands a copy of every message to
//! one link per peer. A link is an unbounded in-flight buffer plus a delivery
//! task that waits for room in the peer's bounded inbox. The source task
//! therefore never blocks on a slow peer, which rules out the cycle where two
//! replicas each wait on the other's full inbox. Nothing is dropped unless
//! the receiving replica has stopped.
//!
//! With `jitter` set, every message is held for a random delay before
//! delivery, so peers see operations out of order.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::protocol::Message;
use crate::replica::Replica;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum random delay applied to each delivery (None = deliver in order)
    pub jitter: Option<Duration>,
    /// Poll interval used by [`Relay::settle`]
    pub settle_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            jitter: None,
            settle_interval: Duration::from_millis(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("replica {0} is already attached to a relay")]
    AlreadyAttached(String),
}

/// Statistics for monitoring relay health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub messages_forwarded: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub in_flight: u64,
    pub attached_replicas: usize,
}

struct AtomicRelayStats {
    messages_forwarded: AtomicU64,
    messages_delivered: AtomicU64,
    messages_dropped: AtomicU64,
    in_flight: AtomicU64,
}

impl AtomicRelayStats {
    fn new() -> Self {
        Self {
            messages_forwarded: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
        }
    }
}

/// A replica whose outbox this relay drains, with how much it has consumed.
struct Source {
    replica: Replica,
    consumed: Arc<AtomicU64>,
}

/// Broadcast relay between replicas.
#[derive(Clone)]
pub struct Relay {
    config: RelayConfig,
    stats: Arc<AtomicRelayStats>,
    sources: Arc<Mutex<Vec<Source>>>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            stats: Arc::new(AtomicRelayStats::new()),
            sources: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Forward everything `replica` publishes to every member of `peers`
    /// other than itself.
    ///
    /// Messages published before attachment are still in the outbox and get
    /// forwarded too.
    pub fn run_protocol(&self, replica: &Replica, peers: &[Replica]) -> Result<(), RelayError> {
        let mut outbox = replica
            .take_outbox()
            .ok_or_else(|| RelayError::AlreadyAttached(replica.site_id().to_string()))?;

        let links: Vec<mpsc::UnboundedSender<Message>> = peers
            .iter()
            .filter(|peer| peer.site_id() != replica.site_id())
            .map(|peer| self.spawn_link(peer))
            .collect();

        let consumed = Arc::new(AtomicU64::new(0));
        self.lock_sources().push(Source {
            replica: replica.clone(),
            consumed: consumed.clone(),
        });

        log::info!(
            "Relay attached {} to {} peer(s)",
            replica.site_id(),
            links.len()
        );

        let stats = self.stats.clone();
        tokio::spawn(async move {
            while let Some(msg) = outbox.recv().await {
                for link in &links {
                    stats.in_flight.fetch_add(1, Ordering::SeqCst);
                    stats.messages_forwarded.fetch_add(1, Ordering::Relaxed);
                    if link.send(msg.clone()).is_err() {
                        stats.in_flight.fetch_sub(1, Ordering::SeqCst);
                        stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                consumed.fetch_add(1, Ordering::SeqCst);
            }
        });
        Ok(())
    }

    /// Attach every replica to all the others.
    pub fn connect_all(&self, replicas: &[Replica]) -> Result<(), RelayError> {
        for replica in replicas {
            self.run_protocol(replica, replicas)?;
        }
        Ok(())
    }

    /// Wait until every message published so far by an attached replica has
    /// reached every peer inbox.
    ///
    /// Commands still queued at a replica are not covered; query that
    /// replica's text first to flush them.
    pub async fn settle(&self) {
        while !self.is_settled() {
            tokio::time::sleep(self.config.settle_interval).await;
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            messages_forwarded: self.stats.messages_forwarded.load(Ordering::Relaxed),
            messages_delivered: self.stats.messages_delivered.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            in_flight: self.stats.in_flight.load(Ordering::SeqCst),
            attached_replicas: self.lock_sources().len(),
        }
    }

    fn is_settled(&self) -> bool {
        // Consumption is checked before in-flight: a message is counted in
        // flight before its source counts it consumed.
        let drained = self
            .lock_sources()
            .iter()
            .all(|s| s.consumed.load(Ordering::SeqCst) == s.replica.published());
        drained && self.stats.in_flight.load(Ordering::SeqCst) == 0
    }

    fn spawn_link(&self, peer: &Replica) -> mpsc::UnboundedSender<Message> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let inbox = peer.inbox_sender();
        let stats = self.stats.clone();
        let jitter = self.config.jitter;
        let peer_id = peer.site_id().to_string();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match jitter {
                    Some(max) => {
                        let delay = rand::thread_rng().gen_range(Duration::ZERO..=max);
                        let inbox = inbox.clone();
                        let stats = stats.clone();
                        let peer_id = peer_id.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            deliver(&inbox, msg, &stats, &peer_id).await;
                        });
                    }
                    None => deliver(&inbox, msg, &stats, &peer_id).await,
                }
            }
        });
        tx
    }

    fn lock_sources(&self) -> std::sync::MutexGuard<'_, Vec<Source>> {
        self.sources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn deliver(
    inbox: &mpsc::Sender<Message>,
    msg: Message,
    stats: &AtomicRelayStats,
    peer_id: &str,
) {
    if inbox.send(msg).await.is_ok() {
        stats.messages_delivered.fetch_add(1, Ordering::Relaxed);
    } else {
        log::warn!("Peer {peer_id} has stopped, message dropped");
        stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }
    stats.in_flight.fetch_sub(1, Ordering::SeqCst);
}
