//! Content sanitization for email text that may reach the LLM.
//!
//! A sequence of pure string filters: injection-phrase removal, delimiter
//! removal, HTML stripping, control-character removal, repetition
//! collapse, and a length cap. The safety validator runs after the
//! pipeline and can reject the content outright, in which case the caller
//! falls back to regex-only extraction.

use once_cell::sync::Lazy;
use regex::Regex;

/// Hard cap on text handed to the LLM.
const MAX_LLM_CONTENT_LEN: usize = 2000;

/// Above this share of special characters the content is rejected.
const SPECIAL_CHAR_DENSITY_LIMIT: f64 = 0.30;

/// Longest run of one character that survives the collapse.
const MAX_CHAR_RUN: usize = 3;

/// Longest run of one repeated word that survives the collapse.
const MAX_WORD_RUN: usize = 3;

static INJECTION_PHRASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(ignore\s+(all\s+)?(previous|prior|above)\s+(instructions?|prompts?|context)|disregard\s+(all\s+)?(previous|prior)\s+instructions?|you\s+are\s+now\s+(an?\s+)?\w+|forget\s+(everything|all)\s+(you|above)|system\s*prompt|act\s+as\s+(an?\s+)?(admin|administrator|root|system)|new\s+instructions?\s*:)",
    )
    .expect("static regex")
});

static INSTRUCTION_DELIMITERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(```+|###+|\[INST\]|\[/INST\]|<\|im_start\|>|<\|im_end\|>|<<SYS>>|<</SYS>>|\{\{.*?\}\})",
    )
    .expect("static regex")
});

static HTML_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|iframe)\b.*?</(script|style|iframe)>")
        .expect("static regex")
});

static HTML_TAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<[^>]{1,512}>").expect("static regex"));

pub fn remove_injection_phrases(text: &str) -> String {
    INJECTION_PHRASES.replace_all(text, " ").into_owned()
}

pub fn remove_instruction_delimiters(text: &str) -> String {
    INSTRUCTION_DELIMITERS.replace_all(text, " ").into_owned()
}

/// Drop script/style/iframe blocks wholesale, then flatten remaining tags.
pub fn strip_html(text: &str) -> String {
    let without_blocks = HTML_BLOCKS.replace_all(text, " ");
    HTML_TAGS.replace_all(&without_blocks, " ").into_owned()
}

pub fn remove_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Collapse long character runs and long runs of a repeated word.
pub fn collapse_repetition(text: &str) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut last_char: Option<char> = None;
    let mut run = 0_usize;
    for c in text.chars() {
        if Some(c) == last_char {
            run += 1;
        } else {
            last_char = Some(c);
            run = 1;
        }
        if run <= MAX_CHAR_RUN {
            collapsed.push(c);
        }
    }

    let mut words: Vec<&str> = Vec::new();
    let mut word_run = 0_usize;
    for word in collapsed.split_whitespace() {
        if words.last().is_some_and(|last| {
            last.eq_ignore_ascii_case(word)
        }) {
            word_run += 1;
        } else {
            word_run = 1;
        }
        if word_run <= MAX_WORD_RUN {
            words.push(word);
        }
    }
    words.join(" ")
}

pub fn truncate_with_ellipsis(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_len).collect();
    format!("{truncated}…")
}

/// The full pipeline, in order.
pub fn sanitize_for_llm(text: &str) -> String {
    let text = remove_injection_phrases(text);
    let text = remove_instruction_delimiters(&text);
    let text = strip_html(&text);
    let text = remove_control_chars(&text);
    let text = collapse_repetition(&text);
    truncate_with_ellipsis(&text, MAX_LLM_CONTENT_LEN)
}

/// Post-pipeline safety gate. Rejected content never reaches the LLM.
pub fn is_safe_for_llm(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let special = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    (special as f64 / total as f64) <= SPECIAL_CHAR_DENSITY_LIMIT
}

/// Tracking numbers keep alphanumerics only, capped at 50 characters.
pub fn sanitize_tracking_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(50)
        .collect()
}
