/// Entry points for the sync core.
///
/// A SyncEngine owns the collaborator handles (sidecar store, vault root,
/// write suppressor, change notifier) and serializes every reconcile and
/// write-back per board behind a per-board lock. Across different boards
/// operations run in parallel; against the same board file they must not.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::reconcile::{self, ReconcileOutcome};
use crate::store::CardStore;
use crate::types::Board;
use crate::watcher::WriteSuppressor;
use crate::writeback::{self, WriteBackResult};

/// Fire-and-forget "something changed" signal, consumed by the pub/sub
/// layer. Failures are the notifier's problem, not the engine's.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, board_id: &str);
}

pub struct SyncEngine {
    store: Arc<dyn CardStore>,
    vault_root: PathBuf,
    suppressor: Arc<WriteSuppressor>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
    /// Per-board write locks to prevent concurrent modification.
    board_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn CardStore>, vault_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            vault_root: vault_root.into(),
            suppressor: Arc::new(WriteSuppressor::new()),
            notifier: None,
            board_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// The suppressor the file watcher should consult before re-triggering
    /// a reconcile for a path.
    pub fn suppressor(&self) -> Arc<WriteSuppressor> {
        self.suppressor.clone()
    }

    pub fn store(&self) -> Arc<dyn CardStore> {
        self.store.clone()
    }

    pub fn board_path(&self, board: &Board) -> PathBuf {
        self.vault_root.join(&board.file_path)
    }

    /// Run one file → store reconcile pass for a board.
    pub fn reconcile(&self, board: &Board) -> ReconcileOutcome {
        let lock = self.board_lock(&board.id);
        let _guard = lock.lock().unwrap();

        let outcome =
            reconcile::reconcile_file(self.store.as_ref(), board, &self.board_path(board), &self.suppressor);
        if !outcome.is_noop() {
            self.fire(&board.id);
        }
        outcome
    }

    /// Mirror a done-state change onto the board file.
    pub fn set_done(&self, board: &Board, card_id: &str, done: bool) -> WriteBackResult {
        let lock = self.board_lock(&board.id);
        let _guard = lock.lock().unwrap();

        let result = writeback::set_done(
            self.store.as_ref(),
            &self.board_path(board),
            &self.suppressor,
            card_id,
            done,
        );
        if result.success && result.changed {
            self.fire(&board.id);
        }
        result
    }

    /// Mirror a priority change onto the board file.
    pub fn set_priority(
        &self,
        board: &Board,
        card_id: &str,
        priority: Option<&str>,
    ) -> WriteBackResult {
        let lock = self.board_lock(&board.id);
        let _guard = lock.lock().unwrap();

        let result = writeback::set_priority(
            self.store.as_ref(),
            board,
            &self.board_path(board),
            &self.suppressor,
            card_id,
            priority,
        );
        if result.success && result.changed {
            self.fire(&board.id);
        }
        result
    }

    /// Mirror a column change onto the board file's marker hint.
    pub fn set_column(&self, board: &Board, card_id: &str, column: &str) -> WriteBackResult {
        let lock = self.board_lock(&board.id);
        let _guard = lock.lock().unwrap();

        let result = writeback::set_column(
            self.store.as_ref(),
            &self.board_path(board),
            &self.suppressor,
            card_id,
            column,
        );
        if result.success && result.changed {
            self.fire(&board.id);
        }
        result
    }

    /// Is a change event for `path` one of our own writes?
    pub fn is_self_write(&self, path: &Path) -> bool {
        self.suppressor.is_suppressed(path)
    }

    fn board_lock(&self, board_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.board_locks.lock().unwrap();
        locks
            .entry(board_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn fire(&self, board_id: &str) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(board_id);
        }
    }
}
