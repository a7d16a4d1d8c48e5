//! Bidirectional sync core between human-edited markdown task lists and
//! an application-owned sidecar record store.
//!
//! File → store: [`reconcile`] parses a board file, resolves a stable
//! identity per task line, upserts sidecar cards, deletes vanished cards
//! behind safety guards, and stamps `<!-- kb:id=… -->` markers back into
//! the file. Store → file: [`writeback`] mirrors single-field changes
//! (done state, priority, column hint) onto the exact original line.
//!
//! [`engine::SyncEngine`] is the front door; it carries the explicit
//! store handle, serializes operations per board, and brackets every
//! write with watcher suppression.

pub mod engine;
pub mod fsutil;
pub mod identity;
pub mod parser;
pub mod reconcile;
pub mod store;
pub mod types;
pub mod watcher;
pub mod writeback;

pub use engine::{ChangeNotifier, SyncEngine};
pub use reconcile::ReconcileOutcome;
pub use store::{CardStore, StoreError, SyncState};
pub use types::{Board, Card, ParsedTask, PriorityDef};
pub use writeback::WriteBackResult;
