//! Tag post-processing and repair.
//!
//! Every tag the backend returns goes through [`process_tag`] regardless of
//! what the prompt asked for. A review whose repaired tags number fewer than
//! three is reported as [`TagRepair::Incomplete`] so the caller can regenerate.

use std::sync::LazyLock;

use regex::Regex;

/// Default display cap for one tag, in characters.
pub const DEFAULT_MAX_TAG_LEN: usize = 28;

/// Tags per review.
pub const TAGS_PER_REVIEW: usize = 3;

/// Words dropped first when a tag is too long.
const FILLER_WORDS: &[&str] = &[
    "very",
    "highly",
    "really",
    "quite",
    "mostly",
    "generally",
    "appreciating",
    "noting",
    "finding",
];

/// All-caps words up to this length are kept as acronyms (`HOA`, `EV`).
const ACRONYM_MAX_LEN: usize = 5;

static BOILERPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\w\s&/\-]").expect("BOILERPLATE_RE regex should compile")
});

fn title_word(word: &str) -> String {
    let letters: Vec<char> = word.chars().filter(|c| c.is_alphabetic()).collect();
    let is_acronym = letters.len() >= 2
        && word.chars().count() <= ACRONYM_MAX_LEN
        && letters.iter().all(|c| c.is_uppercase());
    if is_acronym {
        return word.to_string();
    }

    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Strip quotes and boilerplate punctuation, collapse whitespace and title-case.
pub fn clean_tag(raw: &str) -> String {
    let unquoted = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”' | '‘' | '’'));
    let stripped = BOILERPLATE_RE.replace_all(unquoted, "");
    stripped
        .split_whitespace()
        .map(title_word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bring a cleaned tag within `max_len` characters.
///
/// Filler words go first; if that is not enough the tag is cut at `max_len`
/// and trailing whitespace trimmed. No attempt is made to keep whole words.
pub fn shorten_tag(tag: &str, max_len: usize) -> String {
    if tag.chars().count() <= max_len {
        return tag.to_string();
    }

    let without_filler = tag
        .split_whitespace()
        .filter(|w| !FILLER_WORDS.contains(&w.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ");
    if !without_filler.is_empty() && without_filler.chars().count() <= max_len {
        return without_filler;
    }

    let source = if without_filler.is_empty() {
        tag
    } else {
        without_filler.as_str()
    };
    let cut: String = source.chars().take(max_len).collect();
    cut.trim_end().to_string()
}

/// Clean and shorten one tag. `None` when nothing survives.
pub fn process_tag(raw: &str, max_len: usize) -> Option<String> {
    let tag = shorten_tag(&clean_tag(raw), max_len);
    (!tag.is_empty()).then_some(tag)
}

/// Exactly three non-empty tags, each within the length cap it was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet([String; TAGS_PER_REVIEW]);

impl TagSet {
    /// Build from already-processed tags. Takes the first three; `None` if fewer.
    pub fn from_processed(tags: impl IntoIterator<Item = String>) -> Option<Self> {
        let mut iter = tags.into_iter().filter(|t| !t.is_empty());
        Some(Self([iter.next()?, iter.next()?, iter.next()?]))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_inner(self) -> [String; TAGS_PER_REVIEW] {
        self.0
    }
}

/// Outcome of repairing one review's raw tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagRepair {
    Accepted(TagSet),
    /// Fewer than three tags survived post-processing.
    Incomplete { kept: Vec<String> },
}

/// Post-process raw backend tags into a [`TagSet`] if possible.
pub fn repair_tags<S: AsRef<str>>(raw: &[S], max_len: usize) -> TagRepair {
    let kept: Vec<String> = raw
        .iter()
        .filter_map(|t| process_tag(t.as_ref(), max_len))
        .collect();
    if kept.len() >= TAGS_PER_REVIEW {
        if let Some(set) = TagSet::from_processed(kept.iter().cloned()) {
            return TagRepair::Accepted(set);
        }
    }
    TagRepair::Incomplete { kept }
}
