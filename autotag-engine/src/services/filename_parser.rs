//! Filename parsing and text normalization
//!
//! Turns DJ/rip style file names ("2A - 125 - Artist - Title (Extended Mix)")
//! into a [`ParsedName`]: artist, title, featured artists, remixer and mix
//! qualifiers. The tokenizer here is shared with the candidate scorer so the
//! local name and catalog titles are normalized identically.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{MixQualifier, QualifierSet};

/// Rip/download noise removed before anything else
const GARBAGE: &[&str] = &[
    "Unknown Artist -",
    "Unknown Artist",
    "www.youtube.com",
    "www.mp3",
    "Youtube Rip",
    "y2mate.com",
    "y2mate",
    "_320kbps",
    "320kbps",
];

/// Words that carry version information rather than identity
const QUALIFIER_WORDS: &[&str] = &[
    "original",
    "mix",
    "extended",
    "club",
    "dub",
    "radio",
    "edit",
    "remix",
    "instrumental",
    "version",
    "bootleg",
];

const FEAT_WORDS: &[&str] = &["feat", "ft", "featuring"];

static CAMELOT_BPM_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}[A-Z]\s+-\s+\d{2,3}\s+-\s+").unwrap());
static CAMELOT_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}[A-Z]\s+-\s+").unwrap());
static TRACK_NUMBER_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2,3}\s*[-.]\s+").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static FEAT_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+").unwrap());
static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^)]*)\)|\[([^\]]*)\]").unwrap());
static ACRONYM_DOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\w)\.(\w)").unwrap());
static TOKEN_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").unwrap());
static QUALIFIER_TRAILER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*\b(?:original|extended|club|dub|radio|remix|edit|mix|instrumental|version|bootleg)\b.*$")
        .unwrap()
});

static QUALIFIER_PATTERNS: Lazy<Vec<(Regex, MixQualifier)>> = Lazy::new(|| {
    [
        (r"\boriginal mix\b", MixQualifier::Original),
        (r"\bextended\b", MixQualifier::Extended),
        (r"\bclub mix\b", MixQualifier::Club),
        (r"\bdub\b", MixQualifier::Dub),
        (r"\bradio edit\b", MixQualifier::RadioEdit),
        (r"\bremix\b", MixQualifier::Remix),
        (r"\binstrumental\b", MixQualifier::Instrumental),
    ]
    .into_iter()
    .map(|(pattern, q)| (Regex::new(pattern).unwrap(), q))
    .collect()
});

static EDIT_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bedit\b").unwrap());

static COMPILATION_PATTERNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:best of|greatest hits|the best|collections?|ultimate|anthems|hits|various artists)\b",
    )
    .unwrap()
});

/// Title/artist roles recovered from a local name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedName {
    /// Main artist (featured artists split off)
    pub artist: Option<String>,
    /// Full title including any bracketed suffix
    pub title: String,
    pub featured: Vec<String>,
    pub remixer: Option<String>,
    pub qualifiers: QualifierSet,
}

impl ParsedName {
    /// "artist title" text used for catalog search and tokenization
    pub fn search_text(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} {}", artist, self.title),
            None => self.title.clone(),
        }
    }
}

/// Strip rip noise, Camelot/BPM prefixes and track numbers from a file stem
pub fn clean_filename(stem: &str) -> String {
    let mut cleaned = stem.to_string();
    for garbage in GARBAGE {
        cleaned = cleaned.replace(garbage, "");
    }

    let cleaned = CAMELOT_BPM_PREFIX.replace(cleaned.trim_start(), "");
    let cleaned = CAMELOT_PREFIX.replace(&cleaned, "");
    let cleaned = TRACK_NUMBER_PREFIX.replace(&cleaned, "");

    let cleaned = cleaned.replace('_', " ");
    let cleaned = collapse_whitespace(&cleaned);
    cleaned
        .strip_prefix("- ")
        .map(|s| s.trim().to_string())
        .unwrap_or(cleaned)
}

/// Split "Artist - Title"; names without a separator are all title
pub fn split_artist_title(cleaned: &str) -> (Option<String>, String) {
    match cleaned.split_once(" - ") {
        Some((artist, title)) if !artist.trim().is_empty() && !title.trim().is_empty() => {
            (Some(artist.trim().to_string()), title.trim().to_string())
        }
        _ => (None, cleaned.trim().to_string()),
    }
}

/// Split "Main feat. Guest" into the main artist and featured artists
pub fn split_featured(artist: &str) -> (String, Vec<String>) {
    let artist = collapse_whitespace(artist);
    match FEAT_SPLIT.find(&artist) {
        Some(m) => {
            let main = artist[..m.start()].trim().to_string();
            let rest = artist[m.end()..].trim();
            let featured = if rest.is_empty() {
                Vec::new()
            } else {
                vec![rest.to_string()]
            };
            (main, featured)
        }
        None => (artist, Vec::new()),
    }
}

/// Separate a title into its base and the bracketed suffix text
///
/// `"Praise You (Purple Disco Machine Extended Remix)"` →
/// `("Praise You", "Purple Disco Machine Extended Remix")`
pub fn split_title_suffix(title: &str) -> (String, String) {
    let mut parts = Vec::new();
    for caps in BRACKETED.captures_iter(title) {
        if let Some(inner) = caps.get(1).or_else(|| caps.get(2)) {
            let inner = inner.as_str().trim();
            if !inner.is_empty() {
                parts.push(inner.to_string());
            }
        }
    }
    let base = BRACKETED.replace_all(title, "");
    (collapse_whitespace(&base), collapse_whitespace(&parts.join(" ")))
}

/// Detect DJ mix qualifiers anywhere in `text`
pub fn detect_qualifiers(text: &str) -> QualifierSet {
    let lowered = text.to_lowercase();
    let mut found: QualifierSet = QUALIFIER_PATTERNS
        .iter()
        .filter(|(re, _)| re.is_match(&lowered))
        .map(|(_, q)| *q)
        .collect();

    // "edit" on its own, not as part of "radio edit"
    let plain_edit = EDIT_WORD
        .find_iter(&lowered)
        .any(|m| !lowered[..m.start()].trim_end().ends_with("radio"));
    if plain_edit {
        found.insert(MixQualifier::Edit);
    }
    found
}

/// Remixer named in a remix suffix, e.g. "Purple Disco Machine" from
/// "Purple Disco Machine Extended Remix"
pub fn extract_remixer(suffix: &str) -> Option<String> {
    if !detect_qualifiers(suffix).contains(&MixQualifier::Remix) {
        return None;
    }
    let name = QUALIFIER_TRAILER.replace(suffix, "");
    let name = name.trim().trim_end_matches(|c: char| c == '\'' || c == '\u{2019}');
    (!name.is_empty()).then(|| name.to_string())
}

/// Lowercased identity tokens: acronyms collapsed, punctuation split,
/// qualifier and feat. words dropped, first occurrence order kept
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = normalize_quotes(&text.to_lowercase());
    let collapsed = collapse_acronyms(&lowered);

    let mut tokens: Vec<String> = Vec::new();
    for token in TOKEN_SPLIT.split(&collapsed) {
        if token.is_empty() || QUALIFIER_WORDS.contains(&token) || FEAT_WORDS.contains(&token) {
            continue;
        }
        if !tokens.iter().any(|t| t == token) {
            tokens.push(token.to_string());
        }
    }
    tokens
}

/// Query text with brackets and qualifier words removed, for relaxed searches
pub fn relaxed_query(text: &str) -> String {
    let (base, _) = split_title_suffix(text);
    let (main, _) = split_featured(&base);
    let kept: Vec<&str> = main
        .split_whitespace()
        .filter(|w| {
            let lw = w.to_lowercase();
            !QUALIFIER_WORDS.contains(&lw.as_str()) && !FEAT_WORDS.contains(&lw.trim_end_matches('.'))
        })
        .collect();
    kept.join(" ").replace(" - ", " ")
}

/// Greatest-hits style release titles
pub fn is_probable_compilation(title: &str) -> bool {
    COMPILATION_PATTERNS.is_match(title)
}

/// Full parse of a file stem
pub fn parse_filename(stem: &str) -> ParsedName {
    let cleaned = clean_filename(stem);
    let (artist, title) = split_artist_title(&cleaned);

    let (artist, mut featured) = match artist {
        Some(a) => {
            let (main, feat) = split_featured(&a);
            (Some(main), feat)
        }
        None => (None, Vec::new()),
    };

    // "Title (feat. Guest)" carries the guest in the title
    let (_, suffix) = split_title_suffix(&title);
    for part in BRACKETED.captures_iter(&title) {
        if let Some(inner) = part.get(1).or_else(|| part.get(2)) {
            let padded = format!(" {} ", inner.as_str());
            if let Some(m) = FEAT_SPLIT.find(&padded) {
                let guest = padded[m.end()..].trim();
                if !guest.is_empty() && !featured.iter().any(|f| f == guest) {
                    featured.push(guest.to_string());
                }
            }
        }
    }

    ParsedName {
        artist,
        qualifiers: detect_qualifiers(&title),
        remixer: extract_remixer(&suffix),
        featured,
        title,
    }
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

fn collapse_acronyms(text: &str) -> String {
    // Two passes so overlapping matches ("f.r.e.a.k") collapse fully
    let once = ACRONYM_DOT.replace_all(text, "$1$2");
    ACRONYM_DOT.replace_all(&once, "$1$2").into_owned()
}

fn normalize_quotes(text: &str) -> String {
    text.replace(|c: char| c == '\u{2019}' || c == '`', "'")
        .replace(|c: char| c == '\u{201c}' || c == '\u{201d}', "\"")
}
