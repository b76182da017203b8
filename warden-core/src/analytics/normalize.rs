//! Message normalization for pattern clustering
//!
//! Variable parts of an error message (URLs, UUIDs, addresses and hashes,
//! numbers) are masked so that messages differing only in those parts share
//! one signature.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::classifier::ErrorType;

/// Longest normalized text kept in a signature
const MAX_SIGNATURE_LEN: usize = 200;

static MASKS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\b(?:https?|wss?|ipfs)://\S+", "<url>"),
        (
            r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
            "<uuid>",
        ),
        (r"(?i)\b0x[0-9a-f]{64}\b", "<hash>"),
        (r"(?i)\b0x[0-9a-f]{40}\b", "<address>"),
        (r"(?i)\b0x[0-9a-f]+\b", "<hex>"),
        (r"\d+(?:\.\d+)?", "<n>"),
        (r"\s+", " "),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Mask the variable parts of `message`
pub fn normalize_message(message: &str) -> String {
    let mut text = message.trim().to_lowercase();
    for (re, replacement) in MASKS.iter() {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    let mut text = text.trim().to_string();
    if text.len() > MAX_SIGNATURE_LEN {
        let mut cut = MAX_SIGNATURE_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.truncate(text.trim_end().len());
    }
    text
}

/// Clustering key: error type plus normalized message
pub fn signature(error_type: ErrorType, message: &str) -> String {
    format!("{}:{}", error_type.as_str(), normalize_message(message))
}
