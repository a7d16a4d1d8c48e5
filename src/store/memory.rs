/// In-memory sidecar store.
///
/// RwLock-guarded maps keyed by card ID and file path. The default backend
/// for tests and single-process deployments; the trait boundary keeps a
/// database-backed store possible without touching the engine.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::types::Card;

use super::{CardStore, StoreError, SyncState};

#[derive(Debug, Default)]
pub struct MemoryStore {
    cards: RwLock<HashMap<String, Card>>,
    sync_states: RwLock<HashMap<PathBuf, SyncState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn card_count(&self) -> usize {
        self.cards.read().unwrap().len()
    }
}

impl CardStore for MemoryStore {
    fn get_card(&self, id: &str) -> Option<Card> {
        self.cards.read().unwrap().get(id).cloned()
    }

    fn cards_for_board(&self, board_id: &str) -> Vec<Card> {
        let mut cards: Vec<Card> = self
            .cards
            .read()
            .unwrap()
            .values()
            .filter(|c| c.board_id == board_id)
            .cloned()
            .collect();
        cards.sort_by_key(|c| c.sequence);
        cards
    }

    fn insert_card(&self, card: Card) -> Result<(), StoreError> {
        let mut cards = self.cards.write().unwrap();
        if cards.contains_key(&card.id) {
            return Err(StoreError::DuplicateId(card.id));
        }
        cards.insert(card.id.clone(), card);
        Ok(())
    }

    fn update_card(&self, card: Card) -> Result<(), StoreError> {
        let mut cards = self.cards.write().unwrap();
        if !cards.contains_key(&card.id) {
            return Err(StoreError::CardNotFound(card.id));
        }
        cards.insert(card.id.clone(), card);
        Ok(())
    }

    fn delete_card(&self, id: &str) -> Result<(), StoreError> {
        self.cards
            .write()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::CardNotFound(id.to_string()))
    }

    fn max_sequence(&self, board_id: &str) -> u64 {
        self.cards
            .read()
            .unwrap()
            .values()
            .filter(|c| c.board_id == board_id)
            .map(|c| c.sequence)
            .max()
            .unwrap_or(0)
    }

    fn sync_state(&self, path: &Path) -> Option<SyncState> {
        self.sync_states.read().unwrap().get(path).cloned()
    }

    fn set_sync_state(&self, path: &Path, state: SyncState) {
        self.sync_states
            .write()
            .unwrap()
            .insert(path.to_path_buf(), state);
    }
}
