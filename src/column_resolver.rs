//! Fuzzy column-reference resolution: maps a noisy free-text fragment to
//! exactly one canonical schema column, or None when the caller must ask.
//!
//! Layers run in priority order, first hit wins:
//! 1. verb/filler stripping, 2. exact match, 3. word-boundary substring,
//! 4. token-set match (longest column first), 5. scored best-effort,
//! 6. long-substring anywhere, 7. ordinal "column N".

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref ORDINAL: Regex = Regex::new(r"(?i)\bcolumn\s+(\d+)\b").unwrap();
}

/// Operation verbs and filler words stripped before matching. Deliberately
/// does not include "column", which the ordinal layer needs.
const STOP_WORDS: &[&str] = &[
    "remove", "delete", "drop", "fill", "impute", "replace", "normalize",
    "normalise", "convert", "rename", "show", "preview", "describe",
    "summarize", "summarise", "aggregate", "group", "pivot", "train",
    "count", "create", "add", "modify", "change", "update", "clean",
    "handle", "null", "nulls", "missing", "blank", "blanks", "value",
    "values", "row", "rows", "data", "the", "a", "an", "of", "in", "on",
    "for", "from", "to", "with", "by", "please", "me", "my", "all", "this",
    "that", "and",
];

fn normalize(s: &str) -> String {
    WHITESPACE
        .replace_all(s.trim(), " ")
        .to_lowercase()
}

fn strip_stop_words(fragment: &str) -> String {
    let kept: Vec<&str> = fragment
        .split_whitespace()
        .filter(|w| {
            let lw = w.to_lowercase();
            let lw = lw.trim_matches(|c: char| !c.is_alphanumeric());
            !STOP_WORDS.contains(&lw)
        })
        .collect();
    kept.join(" ")
}

/// Word-boundary match of `needle` inside `haystack`, case-insensitive.
fn boundary_match(needle: &str, haystack: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let pattern = format!(r"(?i)\b{}\b", regex::escape(needle));
    Regex::new(&pattern)
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

/// One fragment word matches inside a column name if it hits a word boundary
/// or, for words of 2+ characters, appears as a plain substring.
fn word_matches_in(word: &str, column: &str) -> bool {
    if boundary_match(word, column) {
        return true;
    }
    word.len() >= 2 && normalize(column).contains(&word.to_lowercase())
}

/// Resolve a free-text fragment to one canonical column name.
pub fn resolve_column(fragment: &str, columns: &[String]) -> Option<String> {
    if columns.is_empty() || fragment.trim().is_empty() {
        return None;
    }

    // Layer 1: strip verbs/fillers; keep the original if too little remains.
    let stripped = strip_stop_words(fragment);
    let candidate = if stripped.trim().len() < 2 {
        fragment.to_string()
    } else {
        stripped
    };
    let candidate_norm = normalize(&candidate);
    let fragment_norm = normalize(fragment);

    // Layer 2: exact match, case-insensitive, whitespace-normalized.
    for col in columns {
        if normalize(col) == candidate_norm || normalize(col) == fragment_norm {
            return Some(col.clone());
        }
    }

    // Layer 3: whole-message substring with word-boundary check. Longest
    // column first so a short name cannot shadow a longer one it prefixes.
    let mut by_length: Vec<&String> = columns.iter().collect();
    by_length.sort_by_key(|c| std::cmp::Reverse(c.len()));
    for col in &by_length {
        if boundary_match(col, fragment) {
            return Some((*col).clone());
        }
    }

    // Layer 4: token-set match. Every fragment word must land inside the
    // column name; longest column names tried first.
    let words: Vec<&str> = candidate_norm.split_whitespace().collect();
    if !words.is_empty() {
        for col in &by_length {
            if words.iter().all(|w| word_matches_in(w, col)) {
                return Some((*col).clone());
            }
        }
    }

    // Layer 5: best-effort scoring. The last fragment word is usually the
    // distinguishing suffix, so it carries a dedicated bonus.
    if !words.is_empty() {
        let last_word = words[words.len() - 1];
        let mut best: Option<(&String, f64, bool)> = None;
        for col in &by_length {
            let matched = words.iter().filter(|w| word_matches_in(w, col)).count();
            if matched == 0 {
                continue;
            }
            let last_matched = word_matches_in(last_word, col);
            let mut score = (matched as f64 / words.len() as f64) * 100.0;
            if last_matched {
                score += 50.0;
            }
            score += (col.len().min(10)) as f64 / 10.0;
            match best {
                Some((_, best_score, _)) if best_score >= score => {}
                _ => best = Some((col, score, last_matched)),
            }
        }
        if let Some((col, score, last_matched)) = best {
            let threshold = if last_matched { 30.0 } else { 50.0 };
            if score >= threshold {
                return Some(col.clone());
            }
        }
    }

    // Layer 6: long column names (5+ chars) found anywhere in the message.
    for col in &by_length {
        if col.len() >= 5 && fragment_norm.contains(&normalize(col)) {
            return Some((*col).clone());
        }
    }

    // Layer 7: literal "column N" resolves by 1-based position.
    if let Some(caps) = ORDINAL.captures(fragment) {
        if let Ok(n) = caps[1].parse::<usize>() {
            if n >= 1 && n <= columns.len() {
                return Some(columns[n - 1].clone());
            }
        }
    }

    None
}
