//! Text preprocessing domain logic for the content pipeline's preprocess
//! stage: HTML stripping, tokenization, keyword/entity extraction, a
//! character-class language heuristic, category normalization, quality
//! scoring, and the per-content-kind attribute whitelist. No I/O.

use std::collections::{HashMap, HashSet};

use pirex_types::{AttributeValue, Attributes, ContentKind};

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "is", "are", "was", "were", "be", "been", "being",
    "to", "of", "in", "on", "for", "with", "as", "by", "at", "from", "that", "this", "it",
    "its", "into", "than", "then", "so", "such", "not", "no", "will", "can",
];

/// Strip HTML tags and decode the small set of named entities common in
/// scraped content descriptions. Not a full HTML parser: the pack carries no
/// HTML-parsing crate and the recommendation core has no need for one.
pub fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    decode_entities(&out)
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Lowercase whitespace tokenization with punctuation stripped from token
/// edges.
pub fn tokenize(input: &str) -> Vec<String> {
    input
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn remove_stop_words(tokens: &[String]) -> Vec<String> {
    let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    tokens.iter().filter(|t| !stop.contains(t.as_str())).cloned().collect()
}

/// Top `n` tokens by frequency, descending, ties broken alphabetically for
/// determinism.
pub fn extract_keywords(tokens: &[String], n: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in tokens {
        *counts.entry(t.as_str()).or_insert(0) += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(n).map(|(t, _)| t.to_string()).collect()
}

fn regex_matches(pattern: &regex::Regex, input: &str) -> Vec<String> {
    pattern.find_iter(input).map(|m| m.as_str().to_string()).collect()
}

pub fn extract_emails(input: &str) -> Vec<String> {
    let re = regex::Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
    regex_matches(&re, input)
}

pub fn extract_urls(input: &str) -> Vec<String> {
    let re = regex::Regex::new(r"https?://[^\s<>\x22]+").unwrap();
    regex_matches(&re, input)
}

pub fn extract_numeric_tokens(input: &str) -> Vec<String> {
    let re = regex::Regex::new(r"\b\d+(\.\d+)?\b").unwrap();
    regex_matches(&re, input)
}

/// Cheap character-class language heuristic: counts Latin vs CJK code
/// points and picks the dominant class; falls back to `"unknown"` when
/// there isn't enough signal either way.
pub fn detect_language(input: &str) -> String {
    let mut latin = 0usize;
    let mut cjk = 0usize;
    for ch in input.chars() {
        let code = ch as u32;
        if ch.is_ascii_alphabetic() {
            latin += 1;
        } else if (0x4E00..=0x9FFF).contains(&code)
            || (0x3040..=0x30FF).contains(&code)
            || (0xAC00..=0xD7A3).contains(&code)
        {
            cjk += 1;
        }
    }
    if latin == 0 && cjk == 0 {
        "unknown".to_string()
    } else if cjk > latin {
        "cjk".to_string()
    } else {
        "en".to_string()
    }
}

const CATEGORY_ALIASES: &[(&str, &str)] = &[
    ("films", "movies"),
    ("movie", "movies"),
    ("tv-shows", "television"),
    ("tv", "television"),
    ("books", "literature"),
    ("ebook", "literature"),
    ("electronics", "tech"),
    ("gadgets", "tech"),
];

/// Normalize a category name against a small built-in alias table,
/// lowercasing and trimming first.
pub fn normalize_category(raw: &str) -> String {
    let normalized = raw.trim().to_lowercase();
    for (alias, canonical) in CATEGORY_ALIASES {
        if normalized == *alias {
            return canonical.to_string();
        }
    }
    normalized
}

/// Per-content-kind attribute whitelist: keys outside this set are dropped
/// by the preprocess stage rather than persisted, per the
/// no-arbitrary-attribute-bags design note.
pub fn attribute_whitelist(kind: ContentKind) -> &'static [&'static str] {
    match kind {
        ContentKind::Product => &["brand", "price", "sku", "color", "size", "in_stock"],
        ContentKind::Video => &["duration_seconds", "resolution", "creator", "series"],
        ContentKind::Article => &["author", "publication", "word_count"],
        ContentKind::Course => &["instructor", "duration_hours", "level", "language"],
        ContentKind::Book => &["author", "isbn", "page_count", "publisher"],
    }
}

/// Filter an attribute map down to the keys allowed for `kind`.
pub fn whitelist_attributes(kind: ContentKind, attributes: &Attributes) -> Attributes {
    let allowed = attribute_whitelist(kind);
    attributes
        .iter()
        .filter(|(k, _)| allowed.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Inputs to the quality-score formula: completeness signals only, per the
/// spec's "weighted sum of completeness signals" resolution of the
/// under-specified weighting scheme.
pub struct QualitySignals {
    pub title_len: usize,
    pub has_description: bool,
    pub image_count: usize,
    pub category_count: usize,
    pub attribute_count: usize,
}

/// Weighted sum of completeness signals, clamped to `[0, 1]`. Weights are an
/// explicit calibration choice (title presence matters most, then
/// description, then breadth of metadata) left open by the spec's
/// under-specified scheme.
pub fn compute_quality_score(signals: &QualitySignals) -> f64 {
    let title_score = (signals.title_len as f64 / 60.0).min(1.0) * 0.35;
    let description_score = if signals.has_description { 0.25 } else { 0.0 };
    let image_score = (signals.image_count as f64 / 3.0).min(1.0) * 0.2;
    let category_score = (signals.category_count as f64 / 3.0).min(1.0) * 0.1;
    let attribute_score = (signals.attribute_count as f64 / 5.0).min(1.0) * 0.1;

    (title_score + description_score + image_score + category_score + attribute_score).clamp(0.0, 1.0)
}

pub fn attribute_value_eq(a: &AttributeValue, b: &AttributeValue) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_removes_tags_and_decodes_entities() {
        let input = "<p>Fish &amp; chips</p>";
        assert_eq!(strip_html(input), "Fish & chips");
    }

    #[test]
    fn tokenize_lowercases_and_strips_punctuation() {
        let tokens = tokenize("Hello, WORLD!");
        assert_eq!(tokens, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn remove_stop_words_drops_common_words() {
        let tokens = vec!["the".to_string(), "quick".to_string(), "fox".to_string()];
        let filtered = remove_stop_words(&tokens);
        assert_eq!(filtered, vec!["quick".to_string(), "fox".to_string()]);
    }

    #[test]
    fn extract_keywords_ranks_by_frequency() {
        let tokens = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let keywords = extract_keywords(&tokens, 1);
        assert_eq!(keywords, vec!["a".to_string()]);
    }

    #[test]
    fn extract_emails_finds_address() {
        let found = extract_emails("contact us at support@example.com today");
        assert_eq!(found, vec!["support@example.com".to_string()]);
    }

    #[test]
    fn detect_language_falls_back_to_unknown_for_digits_only() {
        assert_eq!(detect_language("12345"), "unknown");
    }

    #[test]
    fn normalize_category_resolves_alias() {
        assert_eq!(normalize_category("Films"), "movies");
        assert_eq!(normalize_category("Something Else"), "something else");
    }

    #[test]
    fn whitelist_attributes_drops_unknown_keys() {
        let mut attrs = Attributes::new();
        attrs.insert("brand".to_string(), AttributeValue::Text("Acme".to_string()));
        attrs.insert("unrelated".to_string(), AttributeValue::Bool(true));
        let filtered = whitelist_attributes(ContentKind::Product, &attrs);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("brand"));
    }

    #[test]
    fn quality_score_is_clamped_to_unit_interval() {
        let signals = QualitySignals {
            title_len: 1000,
            has_description: true,
            image_count: 100,
            category_count: 100,
            attribute_count: 100,
        };
        assert!((compute_quality_score(&signals) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_item_has_zero_quality_score() {
        let signals = QualitySignals {
            title_len: 0,
            has_description: false,
            image_count: 0,
            category_count: 0,
            attribute_count: 0,
        };
        assert_eq!(compute_quality_score(&signals), 0.0);
    }
}
