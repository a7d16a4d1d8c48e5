/// Stable-identity helpers.
///
/// Task lines carry an HTML-comment marker at the end of the line:
/// `<!-- kb:id=XXXXXXXX -->` or `<!-- kb:id=XXXXXXXX kb:col=Some+Column -->`.
/// The id is 8 lowercase hex chars; the column hint encodes spaces as `+`.
/// Lines without a marker are re-identified via a fingerprint of their
/// normalized title.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!-- kb:id=([0-9a-f]{8})( kb:col=([^ >]+))? -->").unwrap()
});

/// Extract the marker id and decoded column hint from a line.
pub fn extract_marker(line: &str) -> Option<(String, Option<String>)> {
    MARKER_RE.captures(line).map(|caps| {
        let id = caps[1].to_string();
        let col = caps.get(3).map(|m| decode_column(m.as_str()));
        (id, col)
    })
}

/// Remove the marker from a line, tidying the space that carried it.
pub fn strip_marker(line: &str) -> String {
    let stripped = MARKER_RE.replace(line, "");
    stripped.trim_end().to_string()
}

/// Append a marker to a line, replacing any existing one.
pub fn inject_marker(line: &str, id: &str, column: Option<&str>) -> String {
    let base = strip_marker(line);
    match column {
        Some(col) => format!("{} <!-- kb:id={} kb:col={} -->", base, id, encode_column(col)),
        None => format!("{} <!-- kb:id={} -->", base, id),
    }
}

/// Replace the marker portion of a line in place, keeping the identity and
/// setting (or clearing) the column hint. Returns None when the line has no
/// marker at all.
pub fn rewrite_marker_column(line: &str, column: Option<&str>) -> Option<String> {
    let m = MARKER_RE.find(line)?;
    let (id, _) = extract_marker(line)?;
    let replacement = match column {
        Some(col) => format!("<!-- kb:id={} kb:col={} -->", id, encode_column(col)),
        None => format!("<!-- kb:id={} -->", id),
    };
    let mut out = String::with_capacity(line.len());
    out.push_str(&line[..m.start()]);
    out.push_str(&replacement);
    out.push_str(&line[m.end()..]);
    Some(out)
}

pub fn encode_column(column: &str) -> String {
    column.replace(' ', "+")
}

pub fn decode_column(encoded: &str) -> String {
    encoded.replace('+', " ")
}

/// Normalize a title for fingerprinting and fuzzy matching: NFC, trimmed,
/// case-folded, internal whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    let nfc: String = title.nfc().collect();
    nfc.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Identity previously assigned to unmarked legacy lines: derived from the
/// normalized title, the board, and a same-title occurrence counter.
pub fn legacy_fingerprint_id(title: &str, board_id: &str, occurrence: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_title(title).as_bytes());
    hasher.update([0x1f]);
    hasher.update(board_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(occurrence.to_le_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..4])
}

/// SHA-256 of a raw task line, cached on the card to detect drift in
/// fields the sidecar does not manage.
pub fn line_fingerprint(raw_line: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_line.as_bytes());
    hex::encode(hasher.finalize())
}

/// Source of randomness for id minting. Injectable so the hash fallback
/// is testable with a source that always fails.
pub trait RandomSource {
    fn try_fill(&mut self, dest: &mut [u8]) -> Result<(), rand::Error>;
}

/// OS-backed randomness (the normal case).
#[derive(Debug, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn try_fill(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        rand::rngs::OsRng.try_fill_bytes(dest)
    }
}

const MAX_MINT_ATTEMPTS: usize = 5;

static MINT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mint a fresh 8-hex-char id not rejected by `taken`.
///
/// Secure randomness first; on failure, a hash of a nanosecond timestamp
/// plus a process-local counter. After the attempt budget the hash fallback
/// is accepted as collision-free for practical purposes.
pub fn mint_id(source: &mut dyn RandomSource, mut taken: impl FnMut(&str) -> bool) -> String {
    for _ in 0..MAX_MINT_ATTEMPTS {
        let mut buf = [0u8; 4];
        let id = match source.try_fill(&mut buf) {
            Ok(()) => hex::encode(buf),
            Err(e) => {
                log::warn!("[kb.identity.mint] Secure randomness unavailable: {}", e);
                fallback_id()
            }
        };
        if !taken(&id) {
            return id;
        }
    }
    fallback_id()
}

fn fallback_id() -> String {
    let seq = MINT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut hasher = Sha256::new();
    hasher.update(seq.to_le_bytes());
    hasher.update(ts.to_le_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..4])
}
