//! # logoot-core - Replicated plain-text sequence for collaborative editing
//!
//! Every participant runs a [`Replica`]: an actor that owns a sorted sequence
//! of character [`Atom`]s, each tagged with a dense, globally unique
//! [`Position`]. Replicas exchange insert/delete [`Message`]s through a
//! [`Relay`] and converge to the same text whatever order those messages
//! arrive in.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  commands   ┌──────────────┐  outbox   ┌─────────────┐
//! │ Replica      │ ──────────► │ ReplicaActor │ ────────► │ Relay       │
//! │ (handle)     │ ◄────────── │ (one task)   │           │ (fan-out)   │
//! └──────────────┘  text/atoms └──────┬───────┘           └──────┬──────┘
//!                                     │ ▲                        │
//!                                     ▼ │ inbox                  ▼
//!                              ┌──────────────┐           peer inboxes
//!                              │ AtomStore    │
//!                              │ (sorted Vec) │
//!                              └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`position`]: Position identifiers, ordering and allocation
//! - [`atom`]: Character record with tombstone flag
//! - [`store`]: Sorted atom sequence with dedup and buffered deletes
//! - [`protocol`]: Insert/delete envelope and its wire encodings
//! - [`replica`]: Replica actor and its handle
//! - [`relay`]: In-process broadcast relay between replicas
//!
//! ## Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | Convergence | total order on positions, tombstones never removed |
//! | Idempotence | inserts of a known position are dropped |
//! | Delete before insert | delete buffered until the insert arrives |
//! | No lost operations | bounded queues block producers instead of dropping |

pub mod position;
pub mod atom;
pub mod store;
pub mod protocol;
pub mod replica;
pub mod relay;

// Re-exports for convenience
pub use atom::Atom;
pub use position::{Position, PositionComponent, PositionError, BASE};
pub use protocol::{Message, Operation, ProtocolError};
pub use relay::{Relay, RelayConfig, RelayError, RelayStats};
pub use replica::{Replica, ReplicaConfig, ReplicaError};
pub use store::{AtomStore, DeleteOutcome, InsertOutcome};
