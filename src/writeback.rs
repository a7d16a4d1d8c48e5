/// Store → file write-back.
///
/// Three narrow operations, each mirroring one application-side field
/// change (done state, priority, column hint) onto the exact original
/// line of the board file. Every operation locates its target line
/// defensively and fails with a structured result rather than writing
/// blindly into a file that has drifted.
use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::fsutil;
use crate::identity;
use crate::parser;
use crate::store::CardStore;
use crate::types::{Board, Card};
use crate::watcher::WriteSuppressor;

/// How far above and below the cached line number the fuzzy locate looks.
const FUZZY_WINDOW: usize = 5;

const PREVIEW_LEN: usize = 80;

/// Result of one write-back operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteBackResult {
    pub success: bool,
    pub changed: bool,
    pub line_number: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WriteBackResult {
    fn ok(changed: bool, line_number: usize) -> Self {
        Self {
            success: true,
            changed,
            line_number,
            error: None,
        }
    }

    fn failure(line_number: usize, error: impl Into<String>) -> Self {
        Self {
            success: false,
            changed: false,
            line_number,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocateMode {
    /// Marker match, falling back to normalized-text comparison for
    /// legacy lines that have not been stamped yet.
    MarkerOrFuzzy,
    /// Marker match only; unmarked lines are an error.
    MarkerOnly,
}

/// Flip the checkbox mark of the card's line.
pub fn set_done(
    store: &dyn CardStore,
    path: &Path,
    suppressor: &WriteSuppressor,
    card_id: &str,
    done: bool,
) -> WriteBackResult {
    let Some(mut card) = store.get_card(card_id) else {
        return WriteBackResult::failure(0, format!("card not found: {}", card_id));
    };

    let mut lines = match read_lines(path, &card) {
        Ok(lines) => lines,
        Err(result) => return result,
    };
    let idx = match locate_line(&lines, &card, LocateMode::MarkerOrFuzzy) {
        Ok(idx) => idx,
        Err(e) => return WriteBackResult::failure(card.line_number, e),
    };

    let Some(cb) = parser::split_checkbox(&lines[idx]) else {
        return WriteBackResult::failure(idx + 1, "target is not a checkbox line");
    };

    let currently_done = cb.mark != ' ';
    if currently_done == done {
        refresh_cache(store, &mut card, &lines[idx], idx);
        return WriteBackResult::ok(false, idx + 1);
    }

    // Flip only the single mark character.
    let mark_index = cb.mark_index;
    let mut new_line = lines[idx].clone();
    new_line.replace_range(mark_index..mark_index + 1, if done { "x" } else { " " });
    lines[idx] = new_line.clone();

    if let Err(result) = write_lines(path, &lines, suppressor, idx) {
        return result;
    }

    card.done = done;
    card.raw_line = new_line;
    card.line_number = idx + 1;
    card.fingerprint = identity::line_fingerprint(&card.raw_line);
    card.updated_at = Utc::now();
    persist_card(store, card);
    WriteBackResult::ok(true, idx + 1)
}

/// Rewrite the priority emoji of the card's line. Requires a marker.
pub fn set_priority(
    store: &dyn CardStore,
    board: &Board,
    path: &Path,
    suppressor: &WriteSuppressor,
    card_id: &str,
    priority: Option<&str>,
) -> WriteBackResult {
    let Some(mut card) = store.get_card(card_id) else {
        return WriteBackResult::failure(0, format!("card not found: {}", card_id));
    };

    let emoji = match priority {
        Some(id) => match board.priority(id) {
            Some(def) => Some(def.emoji.clone()),
            None => {
                return WriteBackResult::failure(
                    card.line_number,
                    format!("unknown priority id: {}", id),
                )
            }
        },
        None => None,
    };

    let mut lines = match read_lines(path, &card) {
        Ok(lines) => lines,
        Err(result) => return result,
    };
    let idx = match locate_line(&lines, &card, LocateMode::MarkerOnly) {
        Ok(idx) => idx,
        Err(e) => return WriteBackResult::failure(card.line_number, e),
    };

    let Some(cb) = parser::split_checkbox(&lines[idx]) else {
        return WriteBackResult::failure(idx + 1, "target is not a checkbox line");
    };

    let mut rest = cb.title.to_string();
    for def in &board.priorities {
        if !def.emoji.is_empty() {
            rest = rest.replace(&def.emoji, " ");
        }
    }
    let rest = parser::collapse_spaces(&rest);
    let composed = match emoji {
        Some(emoji) if rest.is_empty() => emoji,
        Some(emoji) => format!("{} {}", emoji, rest),
        None => rest,
    };
    let new_line = format!("{}{}", &lines[idx][..cb.title_start], composed);

    if new_line == lines[idx] {
        refresh_cache(store, &mut card, &new_line, idx);
        return WriteBackResult::ok(false, idx + 1);
    }
    lines[idx] = new_line.clone();

    if let Err(result) = write_lines(path, &lines, suppressor, idx) {
        return result;
    }

    card.priority = priority.map(str::to_string);
    card.raw_line = new_line;
    card.line_number = idx + 1;
    card.fingerprint = identity::line_fingerprint(&card.raw_line);
    card.updated_at = Utc::now();
    persist_card(store, card);
    WriteBackResult::ok(true, idx + 1)
}

/// Rewrite the `kb:col` hint inside the card's marker. Requires a marker;
/// legacy lines must pass through a reconcile first to acquire one.
pub fn set_column(
    store: &dyn CardStore,
    path: &Path,
    suppressor: &WriteSuppressor,
    card_id: &str,
    column: &str,
) -> WriteBackResult {
    let Some(mut card) = store.get_card(card_id) else {
        return WriteBackResult::failure(0, format!("card not found: {}", card_id));
    };

    let mut lines = match read_lines(path, &card) {
        Ok(lines) => lines,
        Err(result) => return result,
    };
    let idx = match locate_line(&lines, &card, LocateMode::MarkerOnly) {
        Ok(idx) => idx,
        Err(e) => return WriteBackResult::failure(card.line_number, e),
    };

    let Some(new_line) = identity::rewrite_marker_column(&lines[idx], Some(column)) else {
        return WriteBackResult::failure(idx + 1, "line carries no identity marker");
    };

    if new_line == lines[idx] {
        refresh_cache(store, &mut card, &new_line, idx);
        return WriteBackResult::ok(false, idx + 1);
    }
    lines[idx] = new_line.clone();

    if let Err(result) = write_lines(path, &lines, suppressor, idx) {
        return result;
    }

    card.column = column.to_string();
    card.raw_line = new_line;
    card.line_number = idx + 1;
    card.fingerprint = identity::line_fingerprint(&card.raw_line);
    card.updated_at = Utc::now();
    persist_card(store, card);
    WriteBackResult::ok(true, idx + 1)
}

/// Find the card's line. 0-based index on success.
fn locate_line(lines: &[String], card: &Card, mode: LocateMode) -> Result<usize, String> {
    let cached = card.line_number.saturating_sub(1);

    // (a) cached line still carries our marker
    if let Some(line) = lines.get(cached) {
        if marker_matches(line, &card.id) {
            return Ok(cached);
        }
    }

    // (b) marker scan over the whole file
    if let Some(pos) = lines.iter().position(|l| marker_matches(l, &card.id)) {
        return Ok(pos);
    }

    if mode == LocateMode::MarkerOnly {
        return Err(format!(
            "no line carries marker kb:id={}; reconcile the board first",
            card.id
        ));
    }

    // (c) legacy line without a marker: normalized text comparison at the
    // cached position, then a ±5 line window. Nearest match wins; on equal
    // distance the earlier line wins.
    let target = normalized_task_text(&card.raw_line);
    if !target.is_empty() {
        if let Some(line) = lines.get(cached) {
            if normalized_task_text(line) == target {
                return Ok(cached);
            }
        }
        for offset in 1..=FUZZY_WINDOW {
            let above = cached.checked_sub(offset);
            let below = cached + offset;
            for idx in above.into_iter().chain(std::iter::once(below)) {
                if idx < lines.len() && normalized_task_text(&lines[idx]) == target {
                    return Ok(idx);
                }
            }
        }
    }

    // (d) never guess further
    let found = lines.get(cached).map(String::as_str).unwrap_or("");
    Err(format!(
        "content mismatch at line {}: expected \"{}\", found \"{}\"",
        card.line_number,
        preview(&card.raw_line),
        preview(found)
    ))
}

fn marker_matches(line: &str, card_id: &str) -> bool {
    identity::extract_marker(line).map_or(false, |(id, _)| id == card_id)
}

/// Checkbox-stripped, marker-stripped, whitespace-normalized, case-folded
/// view of a task line. Empty for non-task lines.
fn normalized_task_text(line: &str) -> String {
    parser::split_checkbox(line)
        .map(|cb| identity::normalize_title(&identity::strip_marker(cb.title)))
        .unwrap_or_default()
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_LEN).collect();
    if text.chars().count() > PREVIEW_LEN {
        out.push('\u{2026}');
    }
    out
}

fn read_lines(path: &Path, card: &Card) -> Result<Vec<String>, WriteBackResult> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.split('\n').map(str::to_string).collect()),
        Err(e) => Err(WriteBackResult::failure(
            card.line_number,
            format!("cannot read {:?}: {}", path, e),
        )),
    }
}

fn write_lines(
    path: &Path,
    lines: &[String],
    suppressor: &WriteSuppressor,
    idx: usize,
) -> Result<(), WriteBackResult> {
    let _guard = suppressor.begin_write(path);
    fsutil::atomic_write(path, &lines.join("\n")).map_err(|e| {
        WriteBackResult::failure(idx + 1, format!("write to {:?} failed: {}", path, e))
    })
}

/// Keep the cached line text and number current after a no-op resolution.
fn refresh_cache(store: &dyn CardStore, card: &mut Card, line: &str, idx: usize) {
    if card.line_number != idx + 1 || card.raw_line != line {
        card.line_number = idx + 1;
        card.raw_line = line.to_string();
        card.fingerprint = identity::line_fingerprint(line);
        persist_card(store, card.clone());
    }
}

fn persist_card(store: &dyn CardStore, card: Card) {
    let id = card.id.clone();
    if let Err(e) = store.update_card(card) {
        log::warn!("[kb.writeback.store] Cache update failed for card {}: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::reconcile_file;
    use crate::store::memory::MemoryStore;
    use crate::types::PriorityDef;
    use tempfile::TempDir;

    fn board() -> Board {
        Board {
            id: "work".into(),
            name: "Work".into(),
            file_path: "work.md".into(),
            columns: vec!["Backlog".into(), "Doing".into(), "Done".into()],
            priorities: vec![
                PriorityDef::new("urgent", "\u{1F53A}", "Urgent"),
                PriorityDef::new("high", "\u{23EB}", "High"),
            ],
            done_columns: vec!["Done".into()],
        }
    }

    /// Write the file, reconcile it so cards exist, and hand everything back.
    fn setup(content: &str) -> (TempDir, std::path::PathBuf, MemoryStore, WriteSuppressor) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("work.md");
        fs::write(&path, content).unwrap();
        let store = MemoryStore::new();
        let sup = WriteSuppressor::new();
        reconcile_file(&store, &board(), &path, &sup);
        (dir, path, store, sup)
    }

    #[test]
    fn test_set_done_flips_only_the_mark() {
        let (_dir, path, store, sup) = setup("- [ ] \u{1F53A} Ship it\n");
        let card = store.cards_for_board("work").remove(0);

        let res = set_done(&store, &path, &sup, &card.id, true);
        assert!(res.success);
        assert!(res.changed);
        assert_eq!(res.line_number, 1);

        let content = fs::read_to_string(&path).unwrap();
        let before = store.get_card(&card.id).unwrap().raw_line;
        assert!(content.starts_with("- [x] \u{1F53A} Ship it"));
        assert_eq!(content.lines().next().unwrap(), before);
        assert!(store.get_card(&card.id).unwrap().done);
    }

    #[test]
    fn test_set_done_noop_when_already_done() {
        let (_dir, path, store, sup) = setup("- [x] Finished\n");
        let card = store.cards_for_board("work").remove(0);
        let content_before = fs::read_to_string(&path).unwrap();

        let res = set_done(&store, &path, &sup, &card.id, true);
        assert!(res.success);
        assert!(!res.changed);
        assert_eq!(fs::read_to_string(&path).unwrap(), content_before);
    }

    #[test]
    fn test_set_done_fuzzy_window_after_lines_inserted() {
        let (_dir, path, store, sup) = setup("# Plan\n\n- [ ] Walk dog\n");
        let card = store.cards_for_board("work").remove(0);
        assert_eq!(card.line_number, 3);

        // Strip the marker (legacy card) and insert two lines above.
        let mut c = store.get_card(&card.id).unwrap();
        c.raw_line = "- [ ] Walk dog".into();
        store.update_card(c).unwrap();
        fs::write(
            &path,
            "# Plan\n\nnew intro line\nanother line\n- [ ] Walk dog\n",
        )
        .unwrap();

        let res = set_done(&store, &path, &sup, &card.id, true);
        assert!(res.success, "{:?}", res.error);
        assert!(res.changed);
        assert_eq!(res.line_number, 5);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("- [x] Walk dog"));
        assert_eq!(store.get_card(&card.id).unwrap().line_number, 5);
    }

    #[test]
    fn test_set_done_fails_on_content_mismatch() {
        let (_dir, path, store, sup) = setup("- [ ] Walk dog\n");
        let card = store.cards_for_board("work").remove(0);

        fs::write(&path, "completely different file\nwith other text\n").unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let res = set_done(&store, &path, &sup, &card.id, true);
        assert!(!res.success);
        let err = res.error.unwrap();
        assert!(err.contains("content mismatch"));
        assert!(err.contains("Walk dog"));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_set_priority_replaces_emoji() {
        let (_dir, path, store, sup) = setup("- [ ] \u{1F53A} Ship release\n");
        let card = store.cards_for_board("work").remove(0);
        assert_eq!(card.priority.as_deref(), Some("urgent"));

        let res = set_priority(&store, &board(), &path, &sup, &card.id, Some("high"));
        assert!(res.success, "{:?}", res.error);
        assert!(res.changed);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("- [ ] \u{23EB} Ship release"));
        assert!(!content.contains('\u{1F53A}'));
        assert_eq!(
            store.get_card(&card.id).unwrap().priority.as_deref(),
            Some("high")
        );
    }

    #[test]
    fn test_set_priority_to_none_strips_emoji() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("work.md");
        fs::write(
            &path,
            "- [ ] \u{1F53A} Ship release <!-- kb:id=ab12cd34 -->\n",
        )
        .unwrap();
        let store = MemoryStore::new();
        let sup = WriteSuppressor::new();
        reconcile_file(&store, &board(), &path, &sup);

        let res = set_priority(&store, &board(), &path, &sup, "ab12cd34", None);
        assert!(res.success, "{:?}", res.error);
        assert!(res.changed);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "- [ ] Ship release <!-- kb:id=ab12cd34 -->\n"
        );
        assert!(store.get_card("ab12cd34").unwrap().priority.is_none());
    }

    #[test]
    fn test_set_priority_unknown_id_fails() {
        let (_dir, path, store, sup) = setup("- [ ] Task\n");
        let card = store.cards_for_board("work").remove(0);
        let before = fs::read_to_string(&path).unwrap();

        let res = set_priority(&store, &board(), &path, &sup, &card.id, Some("blocker"));
        assert!(!res.success);
        assert!(res.error.unwrap().contains("unknown priority"));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_set_column_rewrites_hint() {
        let (_dir, path, store, sup) = setup("- [ ] Task\n");
        let card = store.cards_for_board("work").remove(0);

        let res = set_column(&store, &path, &sup, &card.id, "In Review");
        // "In Review" is not a configured column on this board, but the
        // write-back only manages the hint text.
        assert!(res.success, "{:?}", res.error);
        assert!(res.changed);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains(&format!("kb:id={} kb:col=In+Review", card.id)));
        assert_eq!(store.get_card(&card.id).unwrap().column, "In Review");

        // Second application is a no-op.
        let res = set_column(&store, &path, &sup, &card.id, "In Review");
        assert!(res.success);
        assert!(!res.changed);
    }

    #[test]
    fn test_set_column_without_marker_fails_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("work.md");
        fs::write(&path, "- [ ] Unstamped task\n").unwrap();
        let store = MemoryStore::new();
        let sup = WriteSuppressor::new();

        // Card exists but the file line was never stamped.
        let now = Utc::now();
        store
            .insert_card(Card {
                id: "0badf00d".into(),
                board_id: "work".into(),
                column: "Backlog".into(),
                position: 0,
                title: "Unstamped task".into(),
                raw_line: "- [ ] Unstamped task".into(),
                line_number: 1,
                done: false,
                priority: None,
                labels: Vec::new(),
                due_date: None,
                sub_items: Vec::new(),
                description: String::new(),
                fingerprint: String::new(),
                sequence: 1,
                created_at: now,
                updated_at: now,
            })
            .unwrap();

        let before = fs::read_to_string(&path).unwrap();
        let res = set_column(&store, &path, &sup, "0badf00d", "Doing");
        assert!(!res.success);
        assert!(res.error.unwrap().contains("kb:id=0badf00d"));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_result_wire_shape() {
        let res = WriteBackResult::ok(true, 7);
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["lineNumber"], 7);
        assert_eq!(json["success"], true);
        assert_eq!(json["changed"], true);
        assert!(json.get("error").is_none());

        let res = WriteBackResult::failure(3, "boom");
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn test_unknown_card_fails() {
        let (_dir, path, store, sup) = setup("- [ ] Task\n");
        let res = set_done(&store, &path, &sup, "ffffffff", true);
        assert!(!res.success);
        assert!(res.error.unwrap().contains("card not found"));
    }
}
