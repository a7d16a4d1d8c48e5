/// File → store reconciliation.
///
/// One pass per board file: parse the file, resolve a stable identity for
/// every task line, upsert sidecar records, delete vanished records behind
/// safety guards, and re-stamp lines whose identity marker is missing or
/// wrong. The pass never errors across its boundary; failures are logged
/// and reflected in the counts.
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::fsutil;
use crate::identity::{self, OsRandom};
use crate::parser;
use crate::store::{CardStore, SyncState};
use crate::types::{Board, Card, ParsedTask};
use crate::watcher::WriteSuppressor;

/// Counts reported by one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub board_id: String,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub migrated: usize,
}

impl ReconcileOutcome {
    pub fn zero(board_id: &str) -> Self {
        Self {
            board_id: board_id.to_string(),
            added: 0,
            updated: 0,
            removed: 0,
            migrated: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0 && self.migrated == 0
    }
}

/// A line whose marker must be written back into the file.
#[derive(Debug, Clone)]
struct StampPatch {
    /// 1-based line number captured at parse time.
    line_number: usize,
    /// Exact line text captured at parse time.
    original: String,
    /// Replacement line carrying the resolved marker.
    patched: String,
}

/// Run one reconcile pass for `board` against the file at `path`.
pub fn reconcile_file(
    store: &dyn CardStore,
    board: &Board,
    path: &Path,
    suppressor: &WriteSuppressor,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::zero(&board.id);

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!(
                "[kb.reconcile.read] Cannot read board {} at {:?}: {}",
                board.id,
                path,
                e
            );
            return outcome;
        }
    };

    let pre_hash = fsutil::content_hash(&content);
    if store.sync_state(path).map(|s| s.content_hash) == Some(pre_hash.clone()) {
        return outcome;
    }

    let tasks = parser::extract_tasks(&content, &board.priorities);
    let existing = store.cards_for_board(&board.id);

    let mut claimed: HashSet<String> = HashSet::new();
    let mut patches: Vec<StampPatch> = Vec::new();
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    let mut random = OsRandom;

    for task in &tasks {
        let occurrence = {
            let counter = occurrences
                .entry(identity::normalize_title(&task.title))
                .or_insert(0);
            let current = *counter;
            *counter += 1;
            current
        };

        let (id, needs_stamp, migrated) = match &task.marker_id {
            Some(marker_id) => {
                let cross_board = store
                    .get_card(marker_id)
                    .map_or(false, |c| c.board_id != board.id);
                if claimed.contains(marker_id) || cross_board {
                    // Copy-pasted duplicate or collision with another
                    // board: this line gets a fresh identity.
                    let fresh = identity::mint_id(&mut random, |cand| {
                        claimed.contains(cand) || store.get_card(cand).is_some()
                    });
                    (fresh, true, false)
                } else {
                    (marker_id.clone(), false, false)
                }
            }
            None => {
                let legacy = identity::legacy_fingerprint_id(&task.title, &board.id, occurrence);
                let adoptable = !claimed.contains(&legacy)
                    && store
                        .get_card(&legacy)
                        .map_or(false, |c| c.board_id == board.id);
                if adoptable {
                    (legacy, true, true)
                } else {
                    let fresh = identity::mint_id(&mut random, |cand| {
                        claimed.contains(cand) || store.get_card(cand).is_some()
                    });
                    (fresh, true, false)
                }
            }
        };
        claimed.insert(id.clone());

        if needs_stamp {
            patches.push(StampPatch {
                line_number: task.line_number,
                original: task.raw_line.clone(),
                patched: identity::inject_marker(&task.raw_line, &id, task.column_hint.as_deref()),
            });
        }

        upsert_card(store, board, task, &id, migrated, &mut outcome);
    }

    remove_vanished(store, board, &existing, &claimed, tasks.len(), &mut outcome);

    if patches.is_empty() {
        store.set_sync_state(path, SyncState::now(pre_hash));
    } else {
        match write_stamps(path, &patches, suppressor) {
            Some(new_content) => {
                // Record the post-patch hash so our own stamp write does
                // not trigger a redundant follow-up pass.
                store.set_sync_state(path, SyncState::now(fsutil::content_hash(&new_content)));
            }
            None => store.set_sync_state(path, SyncState::now(pre_hash)),
        }
    }

    outcome
}

fn upsert_card(
    store: &dyn CardStore,
    board: &Board,
    task: &ParsedTask,
    id: &str,
    migrated: bool,
    outcome: &mut ReconcileOutcome,
) {
    let now = Utc::now();

    match store.get_card(id) {
        Some(mut card) => {
            card.title = task.title.clone();
            card.raw_line = task.raw_line.clone();
            card.line_number = task.line_number;
            card.priority = task.priority.clone();
            card.sub_items = task.sub_items.clone();
            card.fingerprint = identity::line_fingerprint(&task.raw_line);
            // Only a done/undone transition that crosses the done-column
            // boundary moves the card; manual placement survives re-parse.
            if task.done != card.done {
                if task.done && !board.is_done_column(&card.column) {
                    card.column = board.primary_done_column().to_string();
                } else if !task.done && board.is_done_column(&card.column) {
                    card.column = board.backlog_column().to_string();
                }
            }
            card.done = task.done;
            card.updated_at = now;

            if let Err(e) = store.update_card(card) {
                log::error!("[kb.reconcile.store] Update failed for card {}: {}", id, e);
                return;
            }
            if migrated {
                outcome.migrated += 1;
            } else {
                outcome.updated += 1;
            }
        }
        None => {
            let column = match task.column_hint.as_deref() {
                Some(hint) if board.has_column(hint) => hint.to_string(),
                _ if task.done => board.primary_done_column().to_string(),
                _ => board.backlog_column().to_string(),
            };
            let position = store
                .cards_for_board(&board.id)
                .iter()
                .filter(|c| c.column == column)
                .count();
            let card = Card {
                id: id.to_string(),
                board_id: board.id.clone(),
                column,
                position,
                title: task.title.clone(),
                raw_line: task.raw_line.clone(),
                line_number: task.line_number,
                done: task.done,
                priority: task.priority.clone(),
                labels: Vec::new(),
                due_date: None,
                sub_items: task.sub_items.clone(),
                description: String::new(),
                fingerprint: identity::line_fingerprint(&task.raw_line),
                sequence: store.max_sequence(&board.id) + 1,
                created_at: now,
                updated_at: now,
            };
            if let Err(e) = store.insert_card(card) {
                log::error!("[kb.reconcile.store] Insert failed for card {}: {}", id, e);
                return;
            }
            outcome.added += 1;
        }
    }
}

/// Delete records no parsed task claimed, unless a safety guard trips.
fn remove_vanished(
    store: &dyn CardStore,
    board: &Board,
    existing: &[Card],
    claimed: &HashSet<String>,
    parsed_count: usize,
    outcome: &mut ReconcileOutcome,
) {
    let candidates: Vec<&Card> = existing
        .iter()
        .filter(|c| !claimed.contains(&c.id))
        .collect();
    if candidates.is_empty() {
        return;
    }

    if parsed_count == 0 && candidates.len() == existing.len() {
        log::warn!(
            "[kb.reconcile.guard] Board {}: no tasks parsed but {} cards exist; \
             treating as truncated read, nothing deleted",
            board.id,
            existing.len()
        );
        return;
    }

    if existing.len() >= 5 && candidates.len() * 5 >= existing.len() * 4 {
        log::warn!(
            "[kb.reconcile.guard] Board {}: {} of {} cards would be deleted; \
             refusing, manual reconcile required",
            board.id,
            candidates.len(),
            existing.len()
        );
        return;
    }

    for card in candidates {
        match store.delete_card(&card.id) {
            Ok(()) => outcome.removed += 1,
            Err(e) => {
                log::error!("[kb.reconcile.store] Delete failed for card {}: {}", card.id, e)
            }
        }
    }
}

/// Re-read the file and patch the flagged lines, verifying each against the
/// text captured at parse time. Returns the written content, or None when
/// nothing could be patched or the write failed.
fn write_stamps(
    path: &Path,
    patches: &[StampPatch],
    suppressor: &WriteSuppressor,
) -> Option<String> {
    let fresh = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::error!("[kb.reconcile.stamp] Re-read of {:?} failed: {}", path, e);
            return None;
        }
    };

    let mut lines: Vec<String> = fresh.split('\n').map(str::to_string).collect();
    let mut patched_any = false;

    for patch in patches {
        let idx = patch.line_number.saturating_sub(1);
        if lines.get(idx).map(String::as_str) == Some(patch.original.as_str()) {
            lines[idx] = patch.patched.clone();
            patched_any = true;
        } else if let Some(pos) = lines.iter().position(|l| *l == patch.original) {
            // The file shifted under us; the line moved but is intact.
            lines[pos] = patch.patched.clone();
            patched_any = true;
        } else {
            log::warn!(
                "[kb.reconcile.stamp] Line {} of {:?} changed during reconcile, skipping stamp",
                patch.line_number,
                path
            );
        }
    }

    if !patched_any {
        return None;
    }

    let new_content = lines.join("\n");
    let _guard = suppressor.begin_write(path);
    match fsutil::atomic_write(path, &new_content) {
        Ok(()) => Some(new_content),
        Err(e) => {
            log::error!("[kb.reconcile.stamp] Stamp write to {:?} failed: {}", path, e);
            None
        }
    }
}
