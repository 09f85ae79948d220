// src/identity.rs
//! Identity Normalizer: a stable key per listing, independent of its rank on
//! the result page or of the run that discovered it.
//!
//! Preference order:
//! 1. the numeric posting ID in the permalink (`.../7712345678.html`) → `cl:<id>`
//! 2. otherwise a SHA-256 over normalized title + price → `tp:<hex>`

use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::crawl::types::RawListing;
use crate::fingerprint::{to_hex, DELIMITER};

/// Identity for a raw listing. Deterministic, position-free.
pub fn identity(raw: &RawListing) -> String {
    if let Some(id) = posting_id(&raw.url) {
        return format!("cl:{id}");
    }
    content_identity(&raw.title, &raw.price)
}

/// Numeric posting ID from a permalink, if it has one.
pub fn posting_id(url: &str) -> Option<&str> {
    static RE_ID: OnceCell<Regex> = OnceCell::new();
    let re = RE_ID.get_or_init(|| Regex::new(r"/(\d+)\.html").unwrap());
    re.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Content-derived fallback identity.
pub fn content_identity(title: &str, price: &str) -> String {
    let key = format!(
        "{}{}{}",
        normalize_text(title).to_lowercase(),
        DELIMITER,
        normalize_price(price)
    );
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    format!("tp:{}", to_hex(&digest[..16]))
}

/// Normalize text: decode entities, strip tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (incl. nbsp)
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"[\s\u{00A0}]+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// "$1,200", "1200", "$ 1200.00" all map to "1200".
fn normalize_price(price: &str) -> String {
    let digits: String = price
        .split('.')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.trim_start_matches('0').to_string()
}
