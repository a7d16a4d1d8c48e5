/// Task-line extractor.
///
/// Turns board markdown into an ordered list of ParsedTask records:
///   --- optional YAML frontmatter ---
///   - [ ] Task title 🔺 <!-- kb:id=a1b2c3d4 -->
///     indented sub-item
///
/// Pure text processing, no I/O. Never fails: lines that do not look like
/// checkbox tasks are simply not tasks.
use std::sync::LazyLock;

use regex::Regex;

use crate::identity;
use crate::types::{ParsedTask, PriorityDef};

static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)- \[( |x|X)\] ?(.*)$").unwrap());

static MD_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]\((https?://[^)\s]+)\)").unwrap());

static BARE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>)"]+"#).unwrap());

/// Byte layout of a checkbox line, for surgical single-field edits.
#[derive(Debug)]
pub(crate) struct CheckboxLine<'a> {
    /// Byte offset of the mark character inside `[ ]`/`[x]`/`[X]`.
    pub mark_index: usize,
    pub mark: char,
    /// Byte offset where the title text begins.
    pub title_start: usize,
    pub title: &'a str,
}

/// Split a line into its checkbox parts, or None if it is not a task line.
pub(crate) fn split_checkbox(line: &str) -> Option<CheckboxLine<'_>> {
    TASK_RE.captures(line).map(|caps| {
        let mark = caps.get(2).expect("mark group");
        let title = caps.get(3).expect("title group");
        CheckboxLine {
            mark_index: mark.start(),
            mark: mark.as_str().chars().next().unwrap_or(' '),
            title_start: title.start(),
            title: title.as_str(),
        }
    })
}

/// Extract all task lines from board file text, in file order.
pub fn extract_tasks(content: &str, priorities: &[PriorityDef]) -> Vec<ParsedTask> {
    let mut tasks: Vec<ParsedTask> = Vec::new();
    // Index into `tasks` of the task still collecting sub-items.
    let mut open: Option<usize> = None;
    let mut in_frontmatter = false;
    let mut seen_task = false;

    for (i, line) in content.split('\n').enumerate() {
        let caps = TASK_RE.captures(line);

        if !seen_task && line == "---" && caps.is_none() {
            in_frontmatter = !in_frontmatter;
            continue;
        }

        if let Some(caps) = caps {
            // A task line inside unterminated frontmatter ends the block.
            in_frontmatter = false;
            seen_task = true;

            let done = !caps[2].trim().is_empty();
            let title_text = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            tasks.push(build_task(line, i + 1, done, title_text, priorities));
            open = Some(tasks.len() - 1);
            continue;
        }

        if in_frontmatter {
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with('\t') || line.starts_with("  ") {
            if let Some(idx) = open {
                tasks[idx].sub_items.push(line.trim().to_string());
            }
            continue;
        }

        // Non-task, non-blank, non-indented: stop collecting sub-items.
        open = None;
    }

    for task in &mut tasks {
        task.urls = extract_urls(&task.title, &task.sub_items);
    }

    tasks
}

fn build_task(
    line: &str,
    line_number: usize,
    done: bool,
    title_text: &str,
    priorities: &[PriorityDef],
) -> ParsedTask {
    let (marker_id, column_hint) = match identity::extract_marker(title_text) {
        Some((id, col)) => (Some(id), col),
        None => (None, None),
    };
    let unmarked = identity::strip_marker(title_text);

    let (priority, title) = detect_priority(&unmarked, priorities);

    ParsedTask {
        title,
        raw_line: line.to_string(),
        line_number,
        done,
        priority,
        urls: Vec::new(),
        sub_items: Vec::new(),
        marker_id,
        column_hint,
    }
}

/// Find the first configured priority whose emoji appears anywhere in the
/// text; strip that emoji from the display title.
fn detect_priority(title: &str, priorities: &[PriorityDef]) -> (Option<String>, String) {
    for def in priorities {
        if !def.emoji.is_empty() && title.contains(&def.emoji) {
            let cleaned = collapse_spaces(&title.replace(&def.emoji, " "));
            return (Some(def.id.clone()), cleaned);
        }
    }
    (None, title.trim().to_string())
}

pub(crate) fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c == ' ' {
            if !last_space {
                out.push(c);
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out.trim().to_string()
}

/// URLs from the title and sub-items: markdown-link targets in appearance
/// order first, then bare URLs not already collected.
fn extract_urls(title: &str, sub_items: &[String]) -> Vec<String> {
    let mut text = title.to_string();
    for item in sub_items {
        text.push('\n');
        text.push_str(item);
    }

    let mut urls: Vec<String> = Vec::new();
    for caps in MD_LINK_RE.captures_iter(&text) {
        let url = caps[1].to_string();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    for m in BARE_URL_RE.find_iter(&text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';']).to_string();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}
