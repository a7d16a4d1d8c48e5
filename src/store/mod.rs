pub mod memory;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Card;

/// Per-file sync bookkeeping: the content hash last seen by a reconcile
/// pass and when it was recorded. One last-write-wins row per file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub content_hash: String,
    pub synced_at: DateTime<Utc>,
}

impl SyncState {
    pub fn now(content_hash: String) -> Self {
        Self {
            content_hash,
            synced_at: Utc::now(),
        }
    }
}

/// Abstract sidecar record store.
/// Implementations: MemoryStore (in-process), future: sqlite, remote.
pub trait CardStore: Send + Sync {
    /// Look up a card by its stable ID, across all boards.
    fn get_card(&self, id: &str) -> Option<Card>;

    /// All cards for a board, ordered by sequence number.
    fn cards_for_board(&self, board_id: &str) -> Vec<Card>;

    /// Insert a new card. Fails if the ID already exists on any board.
    fn insert_card(&self, card: Card) -> Result<(), StoreError>;

    /// Replace an existing card.
    fn update_card(&self, card: Card) -> Result<(), StoreError>;

    /// Delete a card by ID.
    fn delete_card(&self, id: &str) -> Result<(), StoreError>;

    /// Highest sequence number currently assigned on a board (0 when empty).
    fn max_sequence(&self, board_id: &str) -> u64;

    /// Sync-state row for a file path, if one has been recorded.
    fn sync_state(&self, path: &Path) -> Option<SyncState>;

    /// Record the sync-state row for a file path (last write wins).
    fn set_sync_state(&self, path: &Path, state: SyncState);
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Card ID already exists: {0}")]
    DuplicateId(String),

    #[error("Card not found: {0}")]
    CardNotFound(String),
}
