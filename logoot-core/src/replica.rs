//! Replica actor: the only task that mutates a replica's atom sequence.
//!
//! ```text
//!  local_insert / local_delete / text ──► commands (bounded) ─┐
//!                                                             ├─► ReplicaActor ──► outbox ──► Relay
//!  Relay / deliver ───────────────────► inbox (bounded) ─────┘        │
//!                                                                AtomStore
//! ```
//!
//! The actor takes one unit of work at a time from whichever queue has data,
//! so the store needs no lock. Each queue is FIFO; there is no ordering
//! between the two. Remote operations are applied but never re-published.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::atom::Atom;
use crate::position::{Position, PositionError};
use crate::protocol::{Message, Operation, ProtocolError};
use crate::relay::{Relay, RelayError};
use crate::store::{AtomStore, DeleteOutcome, InsertOutcome};

/// Replica configuration.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Local command queue capacity
    pub command_capacity: usize,
    /// Inbound message queue capacity
    pub inbox_capacity: usize,
    /// Outbound message queue capacity
    pub outbox_capacity: usize,
    /// Upper bound on waiting for a query reply (None = wait forever)
    pub text_timeout: Option<Duration>,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            command_capacity: 100,
            inbox_capacity: 100,
            outbox_capacity: 100,
            text_timeout: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("site id must not be empty")]
    EmptySiteId,
    #[error("replica {0} has stopped")]
    Closed(String),
    #[error("timed out waiting for replica {0}")]
    Timeout(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Position(#[from] PositionError),
}

/// Local work items, each with its own typed payload.
#[derive(Debug)]
enum Command {
    Insert { index: usize, ch: char },
    Delete { index: usize },
    DeletePosition { position: Position },
    Text { reply: oneshot::Sender<String> },
    Atoms { reply: oneshot::Sender<Vec<Atom>> },
}

/// Handle to a running replica. Cheap to clone; all clones address the same actor.
#[derive(Clone)]
pub struct Replica {
    site_id: Arc<str>,
    commands: mpsc::Sender<Command>,
    inbox: mpsc::Sender<Message>,
    outbox: Arc<Mutex<Option<mpsc::Receiver<Message>>>>,
    published: Arc<AtomicU64>,
    text_timeout: Option<Duration>,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("site_id", &self.site_id)
            .field("published", &self.published())
            .finish()
    }
}

impl Replica {
    /// Start a replica actor on the current Tokio runtime.
    ///
    /// Every local edit is published to the outbox, which holds at most
    /// `outbox_capacity` messages. Until a relay attaches (or the caller
    /// takes the outbox and drains it) the actor blocks once the outbox is
    /// full, and later queries wait for it. A replica used on its own should
    /// still be attached to a relay with no peers.
    pub fn spawn(site_id: impl Into<String>, config: ReplicaConfig) -> Result<Self, ReplicaError> {
        let site_id: String = site_id.into();
        if site_id.is_empty() {
            return Err(ReplicaError::EmptySiteId);
        }
        let site_id: Arc<str> = Arc::from(site_id);

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity);
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity);
        let (outbox_tx, outbox_rx) = mpsc::channel(config.outbox_capacity);
        let published = Arc::new(AtomicU64::new(0));

        let actor = ReplicaActor {
            site_id: site_id.clone(),
            store: AtomStore::new(),
            commands: cmd_rx,
            inbox: inbox_rx,
            outbox: outbox_tx,
            published: published.clone(),
        };
        tokio::spawn(actor.run());

        log::info!("Replica {site_id} started");
        Ok(Self {
            site_id,
            commands: cmd_tx,
            inbox: inbox_tx,
            outbox: Arc::new(Mutex::new(Some(outbox_rx))),
            published,
            text_timeout: config.text_timeout,
        })
    }

    /// Start a replica with a freshly minted random site id.
    pub fn spawn_anonymous(config: ReplicaConfig) -> Result<Self, ReplicaError> {
        Self::spawn(Uuid::new_v4().simple().to_string(), config)
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Queue a character insert at visible `index`.
    ///
    /// Returns once the command is queued, not once it is applied. Indices
    /// past the end insert at the end.
    pub async fn local_insert(&self, index: usize, ch: char) -> Result<(), ReplicaError> {
        self.send(Command::Insert { index, ch }).await
    }

    /// Queue inserts that append `text` one character at a time.
    pub async fn append(&self, text: &str) -> Result<(), ReplicaError> {
        for ch in text.chars() {
            self.local_insert(usize::MAX, ch).await?;
        }
        Ok(())
    }

    /// Queue deletion of the visible character at `index`. Out of range is a no-op.
    pub async fn local_delete(&self, index: usize) -> Result<(), ReplicaError> {
        self.send(Command::Delete { index }).await
    }

    /// Queue deletion of the atom at `position`, known locally or not.
    ///
    /// The position goes out to every peer, so it must pass the same
    /// structural checks peers apply to incoming messages.
    pub async fn delete(&self, position: Position) -> Result<(), ReplicaError> {
        position.validate()?;
        self.send(Command::DeletePosition { position }).await
    }

    /// Current visible text, after everything queued before this call is applied.
    pub async fn text(&self) -> Result<String, ReplicaError> {
        self.request(|reply| Command::Text { reply }).await
    }

    /// Full atom sequence including tombstones.
    pub async fn atoms(&self) -> Result<Vec<Atom>, ReplicaError> {
        self.request(|reply| Command::Atoms { reply }).await
    }

    /// Push a remote message into the inbox, waiting while it is full.
    pub async fn deliver(&self, msg: Message) -> Result<(), ReplicaError> {
        self.inbox
            .send(msg)
            .await
            .map_err(|_| ReplicaError::Closed(self.site_id.to_string()))
    }

    /// Decode a wire message and push it into the inbox.
    ///
    /// Undecodable bytes are rejected here and never reach the actor.
    pub async fn deliver_encoded(&self, bytes: &[u8]) -> Result<(), ReplicaError> {
        let msg = Message::decode(bytes)?;
        self.deliver(msg).await
    }

    /// Take the receiving end of the outbox. Only the first call gets it.
    pub fn take_outbox(&self) -> Option<mpsc::Receiver<Message>> {
        self.outbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Attach this replica to `peers` through `relay`.
    pub fn run_protocol(&self, relay: &Relay, peers: &[Replica]) -> Result<(), RelayError> {
        relay.run_protocol(self, peers)
    }

    /// Number of messages this replica has placed on its outbox.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    pub(crate) fn inbox_sender(&self) -> mpsc::Sender<Message> {
        self.inbox.clone()
    }

    async fn send(&self, cmd: Command) -> Result<(), ReplicaError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| ReplicaError::Closed(self.site_id.to_string()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ReplicaError> {
        let exchange = async {
            let (tx, rx) = oneshot::channel();
            self.send(make(tx)).await?;
            rx.await
                .map_err(|_| ReplicaError::Closed(self.site_id.to_string()))
        };
        match self.text_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| ReplicaError::Timeout(self.site_id.to_string()))?,
            None => exchange.await,
        }
    }
}

/// The task that owns the store.
struct ReplicaActor {
    site_id: Arc<str>,
    store: AtomStore,
    commands: mpsc::Receiver<Command>,
    inbox: mpsc::Receiver<Message>,
    outbox: mpsc::Sender<Message>,
    published: Arc<AtomicU64>,
}

impl ReplicaActor {
    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                Some(cmd) = self.commands.recv() => self.handle_command(cmd).await,
                Some(msg) = self.inbox.recv() => self.apply_remote(msg),
                else => break,
            };
            if let Err(e) = step {
                log::error!("Replica {} stopping: {e}", self.site_id);
                return;
            }
        }
        log::info!("Replica {} shut down", self.site_id);
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<(), ProtocolError> {
        match cmd {
            Command::Insert { index, ch } => self.local_insert(index, ch).await,
            Command::Delete { index } => match self.store.position_at(index).cloned() {
                Some(position) => self.local_delete(position).await,
                None => log::debug!(
                    "[{}] delete index {index} out of range (len {})",
                    self.site_id,
                    self.store.len()
                ),
            },
            Command::DeletePosition { position } => self.local_delete(position).await,
            Command::Text { reply } => {
                self.drain_inbox()?;
                let _ = reply.send(self.store.snapshot());
            }
            Command::Atoms { reply } => {
                self.drain_inbox()?;
                let _ = reply.send(self.store.atoms().to_vec());
            }
        }
        Ok(())
    }

    async fn local_insert(&mut self, index: usize, ch: char) {
        let len = self.store.len();
        if index > len {
            log::debug!("[{}] insert index {index} clamped to {len}", self.site_id);
        }
        let (left, right) = self.store.neighbors(index.min(len));
        let position = match Position::between(left, right, &self.site_id) {
            Ok(p) => p,
            Err(e) => {
                log::error!("[{}] cannot allocate position: {e}", self.site_id);
                return;
            }
        };

        log::debug!("[{}] insert {ch:?} at {index} -> {position}", self.site_id);
        let atom = Atom::new(position, ch);
        self.store.insert(atom.clone());
        self.publish(Message::insert(&*self.site_id, atom)).await;
    }

    async fn local_delete(&mut self, position: Position) {
        let outcome = self.store.mark_deleted(&position);
        log::debug!("[{}] delete {position}: {outcome:?}", self.site_id);

        let atom = match self.store.get(&position) {
            Some(atom) => atom.clone(),
            None => Atom::tombstone(position),
        };
        self.publish(Message::delete(&*self.site_id, atom)).await;
    }

    /// Apply an operation from a peer. Errors here are fatal to the actor.
    fn apply_remote(&mut self, msg: Message) -> Result<(), ProtocolError> {
        msg.validate()?;
        let position = &msg.atom.position;
        match msg.operation {
            Operation::Insert => {
                log::debug!(
                    "[{}] apply insert {:?} at {position} from {}",
                    self.site_id,
                    msg.atom.ch,
                    msg.from
                );
                if self.store.insert(msg.atom) == InsertOutcome::Duplicate {
                    log::debug!("[{}] duplicate insert ignored", self.site_id);
                }
            }
            Operation::Delete => {
                if self.store.mark_deleted(position) == DeleteOutcome::Buffered {
                    log::debug!(
                        "[{}] delete {position} from {} buffered until its insert arrives",
                        self.site_id,
                        msg.from
                    );
                }
            }
        }
        Ok(())
    }

    /// Apply everything already waiting in the inbox.
    fn drain_inbox(&mut self) -> Result<(), ProtocolError> {
        while let Ok(msg) = self.inbox.try_recv() {
            self.apply_remote(msg)?;
        }
        Ok(())
    }

    async fn publish(&mut self, msg: Message) {
        if self.outbox.send(msg).await.is_ok() {
            self.published.fetch_add(1, Ordering::SeqCst);
        } else {
            log::warn!("[{}] outbox closed, operation not propagated", self.site_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionComponent;

    fn spawn(site: &str) -> Replica {
        Replica::spawn(site, ReplicaConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_append_builds_text() {
        let r = spawn("A");
        let _outbox = r.take_outbox();
        r.append("hello").await.unwrap();
        assert_eq!(r.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_insert_index_is_clamped() {
        let r = spawn("A");
        let _outbox = r.take_outbox();
        r.local_insert(0, 'b').await.unwrap();
        r.local_insert(99, 'c').await.unwrap();
        r.local_insert(0, 'a').await.unwrap();
        assert_eq!(r.text().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_local_ops_are_published() {
        let r = spawn("A");
        let mut outbox = r.take_outbox().unwrap();
        r.append("ab").await.unwrap();
        r.local_delete(0).await.unwrap();
        assert_eq!(r.text().await.unwrap(), "b");

        let first = outbox.recv().await.unwrap();
        assert_eq!(first.operation, Operation::Insert);
        assert_eq!(first.from, "A");
        assert_eq!(first.atom.ch, 'a');
        let second = outbox.recv().await.unwrap();
        assert_eq!(second.atom.ch, 'b');
        let third = outbox.recv().await.unwrap();
        assert_eq!(third.operation, Operation::Delete);
        assert_eq!(third.atom.position, first.atom.position);
        assert_eq!(r.published(), 3);
    }

    #[tokio::test]
    async fn test_remote_ops_not_republished() {
        let r = spawn("B");
        let mut outbox = r.take_outbox().unwrap();
        let atom = Atom::new(Position::new(vec![PositionComponent::new(10, "A")]), 'x');
        r.deliver(Message::insert("A", atom)).await.unwrap();
        assert_eq!(r.text().await.unwrap(), "x");
        assert_eq!(r.published(), 0);
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_out_of_range_is_noop() {
        let r = spawn("A");
        let _outbox = r.take_outbox();
        r.append("ab").await.unwrap();
        r.local_delete(5).await.unwrap();
        assert_eq!(r.text().await.unwrap(), "ab");
        assert_eq!(r.published(), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_position_is_buffered_and_published() {
        let r = spawn("A");
        let mut outbox = r.take_outbox().unwrap();
        let p = Position::new(vec![PositionComponent::new(10, "B")]);
        r.delete(p.clone()).await.unwrap();

        let sent = outbox.recv().await.unwrap();
        assert_eq!(sent.operation, Operation::Delete);
        assert!(sent.atom.deleted);

        r.deliver(Message::insert("B", Atom::new(p, 'z'))).await.unwrap();
        assert_eq!(r.text().await.unwrap(), "");
        let atoms = r.atoms().await.unwrap();
        assert_eq!(atoms.len(), 1);
        assert!(atoms[0].deleted);
    }

    #[tokio::test]
    async fn test_malformed_message_stops_replica() {
        let r = spawn("A");
        let _outbox = r.take_outbox();
        let bad = Message::insert("B", Atom::new(Position::new(Vec::new()), 'x'));
        r.deliver(bad).await.unwrap();
        assert!(matches!(r.text().await, Err(ReplicaError::Closed(_))));
    }

    #[tokio::test]
    async fn test_delete_rejects_invalid_position() {
        let r = spawn("A");
        let mut outbox = r.take_outbox().unwrap();
        r.append("hi").await.unwrap();

        let err = r.delete(Position::new(Vec::new())).await.unwrap_err();
        assert!(matches!(err, ReplicaError::Position(PositionError::Invalid { .. })));
        let anonymous = Position::new(vec![PositionComponent::new(5, "")]);
        assert!(r.delete(anonymous).await.is_err());

        assert_eq!(r.text().await.unwrap(), "hi");
        assert_eq!(r.published(), 2);
        outbox.recv().await.unwrap();
        outbox.recv().await.unwrap();
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deliver_encoded_rejects_garbage() {
        let r = spawn("A");
        let err = r.deliver_encoded(&[0xFF, 0xFE]).await.unwrap_err();
        assert!(matches!(err, ReplicaError::Protocol(_)));
        assert_eq!(r.text().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_outbox_taken_once() {
        let r = spawn("A");
        assert!(r.take_outbox().is_some());
        assert!(r.take_outbox().is_none());
    }

    #[tokio::test]
    async fn test_empty_site_rejected() {
        assert!(matches!(
            Replica::spawn("", ReplicaConfig::default()),
            Err(ReplicaError::EmptySiteId)
        ));
    }

    #[tokio::test]
    async fn test_anonymous_site_is_unique() {
        let a = Replica::spawn_anonymous(ReplicaConfig::default()).unwrap();
        let b = Replica::spawn_anonymous(ReplicaConfig::default()).unwrap();
        assert!(!a.site_id().is_empty());
        assert_ne!(a.site_id(), b.site_id());
    }

    #[tokio::test]
    async fn test_text_times_out_when_actor_is_stalled() {
        let config = ReplicaConfig {
            outbox_capacity: 1,
            text_timeout: Some(Duration::from_millis(50)),
            ..ReplicaConfig::default()
        };
        let r = Replica::spawn("A", config).unwrap();
        // Nobody drains the outbox: the second publish blocks the actor.
        let _outbox = r.take_outbox();
        r.append("ab").await.unwrap();
        assert!(matches!(r.text().await, Err(ReplicaError::Timeout(_))));
    }
}
