//! Candidate normalization
//!
//! Turns raw mention text from the extraction step into the keys the
//! resolver matches on. Everything here is pure: no store access, no
//! lookups, same input always gives the same keys.

use crate::error::EmptyCandidate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Phrases dropped from the front of a title, longest first.
const LEADING_NOISE: &[&str] = &[
    "a book called",
    "the book called",
    "a novel called",
    "book called",
    "the book",
    "his book",
    "her book",
    "their book",
    "my book",
    "your book",
    "the novel",
    "his novel",
    "her novel",
    "the",
    "a",
    "an",
];

const HONORIFICS: &[&str] = &["dr", "prof", "professor", "mr", "mrs", "ms", "sir", "dame"];

/// Tokens too common to pull fuzzy candidates from the token index.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "of", "and", "or", "to", "in", "on", "for", "with", "by", "at", "from", "is",
];

/// A capitalized personal name, allowing lowercase particles ("van der").
const NAME_PATTERN: &str = r"[\p{Lu}][\p{L}.'’-]*(?:\s+(?:(?:van|von|der|den|de|da|di|du|del|la|le)\s+)*[\p{Lu}][\p{L}.'’-]*){0,3}";

static TRAILING_AUTHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?P<title>.*?\S)\s+(?:by|By|BY)\s+(?P<author>{NAME_PATTERN})\s*[.!?]?\s*$"
    ))
    .expect("trailing author pattern is valid")
});

static CONTEXT_AUTHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b(?:by|By)\s+(?P<author>{NAME_PATTERN})"))
        .expect("context author pattern is valid")
});

/// Matching keys for one mention candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedCandidate {
    /// Title as written, author clause removed; sent to external lookups
    pub title: String,
    /// Whole title including any subtitle words
    pub full_key: String,
    /// Title with the subtitle dropped; equals `full_key` when there is none
    pub short_key: String,
    /// Author name as written, pulled from a "by ..." clause
    pub author_hint: Option<String>,
}

impl NormalizedCandidate {
    /// Distinct keys, full key first.
    pub fn keys(&self) -> Vec<&str> {
        if self.short_key == self.full_key {
            vec![self.full_key.as_str()]
        } else {
            vec![self.full_key.as_str(), self.short_key.as_str()]
        }
    }

    /// Significant tokens across both keys, deduplicated, in first-seen order.
    pub fn significant_tokens(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = Vec::new();
        for key in self.keys() {
            for token in significant_tokens(key) {
                if !tokens.contains(&token) {
                    tokens.push(token);
                }
            }
        }
        tokens
    }
}

/// Normalize a raw mention together with its optional context snippet.
///
/// A trailing "by <Name>" clause is split off as the author hint; if the
/// raw text has none, the context snippet is searched for one.
pub fn normalize_candidate(
    raw: &str,
    context: Option<&str>,
) -> Result<NormalizedCandidate, EmptyCandidate> {
    let trimmed = raw.trim();
    if !has_content(trimmed) {
        return Err(EmptyCandidate);
    }

    let (title, mut author_hint) = split_author_clause(trimmed);
    if author_hint.is_none() {
        author_hint = context.and_then(author_from_context);
    }

    let (full_key, short_key) = title_keys(title)?;
    Ok(NormalizedCandidate {
        title: title.trim().to_string(),
        full_key,
        short_key,
        author_hint,
    })
}

/// Full matching key for a title. `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> Result<String, EmptyCandidate> {
    normalize_candidate(raw, None).map(|c| c.full_key)
}

/// Both keys for a canonical title (no author splitting).
pub fn title_keys(title: &str) -> Result<(String, String), EmptyCandidate> {
    let folded = fold(title);
    let (main, subtitle) = split_subtitle(&folded);
    let main_words = clean_words(main);
    let subtitle_words = subtitle.map(clean_words).unwrap_or_default();

    if main_words.is_empty() && subtitle_words.is_empty() {
        return Err(EmptyCandidate);
    }

    let joined = [main_words.as_str(), subtitle_words.as_str()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    let short_source = if main_words.is_empty() {
        &subtitle_words
    } else {
        &main_words
    };

    Ok((strip_leading_noise(&joined), strip_leading_noise(short_source)))
}

/// Lowercase, diacritic-free, honorific-free author name.
pub fn normalize_author(name: &str) -> String {
    clean_words(&fold(name))
        .split(' ')
        .filter(|word| !word.is_empty() && !HONORIFICS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tokens of a normalized key worth indexing.
pub fn significant_tokens(key: &str) -> impl Iterator<Item = &str> {
    key.split(' ')
        .filter(|token| !token.is_empty() && !STOPWORDS.contains(token))
}

fn has_content(s: &str) -> bool {
    s.chars().any(char::is_alphanumeric)
}

fn split_author_clause(raw: &str) -> (&str, Option<String>) {
    match TRAILING_AUTHOR.captures(raw) {
        Some(caps) => {
            let title = caps.name("title").map_or(raw, |m| m.as_str());
            if !has_content(title) {
                return (raw, None);
            }
            let author = caps.name("author").map(|m| m.as_str().trim().to_string());
            (title, author)
        }
        None => (raw, None),
    }
}

fn author_from_context(context: &str) -> Option<String> {
    CONTEXT_AUTHOR
        .captures(context)
        .and_then(|caps| caps.name("author"))
        .map(|m| m.as_str().trim().to_string())
}

/// Lowercase and strip diacritics. Lowercasing runs on both sides of the
/// decomposition so the result is stable under repeated folding.
fn fold(s: &str) -> String {
    s.to_lowercase()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

fn split_subtitle(s: &str) -> (&str, Option<&str>) {
    let candidates = [
        s.find(':').map(|i| (i, 1)),
        s.find('—').map(|i| (i, '—'.len_utf8())),
        s.find('–').map(|i| (i, '–'.len_utf8())),
        s.find(" - ").map(|i| (i, 3)),
    ];
    match candidates.into_iter().flatten().min_by_key(|(i, _)| *i) {
        Some((i, len)) => (&s[..i], Some(&s[i + len..])),
        None => (s, None),
    }
}

fn clean_words(s: &str) -> String {
    s.replace('&', " and ")
        .chars()
        .filter(|c| !matches!(c, '\'' | '’' | '‘'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop leading articles and noise phrases until none apply. Never strips
/// the last remaining word.
fn strip_leading_noise(key: &str) -> String {
    let mut current = key;
    'outer: loop {
        for phrase in LEADING_NOISE {
            if let Some(rest) = current
                .strip_prefix(*phrase)
                .and_then(|r| r.strip_prefix(' '))
            {
                if rest.is_empty() {
                    break 'outer;
                }
                current = rest;
                continue 'outer;
            }
        }
        break;
    }
    current.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_normalization() {
        assert_eq!(
            normalize("Thinking, Fast and Slow").unwrap(),
            "thinking fast and slow"
        );
        assert_eq!(
            normalize("  THINKING   fast & slow!! ").unwrap(),
            "thinking fast and slow"
        );
    }

    #[test]
    fn test_leading_articles_and_noise() {
        assert_eq!(normalize("The Body Keeps the Score").unwrap(), "body keeps the score");
        assert_eq!(normalize("his book Sapiens").unwrap(), "sapiens");
        assert_eq!(normalize("the book, \"Atomic Habits\"").unwrap(), "atomic habits");
        assert_eq!(normalize("a book called The Road").unwrap(), "road");
        assert_eq!(normalize("An Absolutely Remarkable Thing").unwrap(), "absolutely remarkable thing");
    }

    #[test]
    fn test_article_only_title_is_kept() {
        assert_eq!(normalize("The").unwrap(), "the");
        assert_eq!(normalize("The Book").unwrap(), "book");
    }

    #[test]
    fn test_subtitle_goes_to_short_key() {
        let c = normalize_candidate("Sapiens: A Brief History of Humankind", None).unwrap();
        assert_eq!(c.full_key, "sapiens a brief history of humankind");
        assert_eq!(c.short_key, "sapiens");

        let c = normalize_candidate("Range — Why Generalists Triumph", None).unwrap();
        assert_eq!(c.short_key, "range");
        assert_eq!(c.full_key, "range why generalists triumph");

        let c = normalize_candidate("Deep Work - Rules for Focused Success", None).unwrap();
        assert_eq!(c.short_key, "deep work");
    }

    #[test]
    fn test_trailing_author_clause_becomes_hint() {
        let c = normalize_candidate("Sapiens by Harari", None).unwrap();
        assert_eq!(c.title, "Sapiens");
        assert_eq!(c.full_key, "sapiens");
        assert_eq!(c.author_hint.as_deref(), Some("Harari"));

        let c = normalize_candidate("Outlive by Dr. Peter Attia", None).unwrap();
        assert_eq!(c.full_key, "outlive");
        assert_eq!(c.author_hint.as_deref(), Some("Dr. Peter Attia"));
    }

    #[test]
    fn test_lowercase_by_is_part_of_the_title() {
        let c = normalize_candidate("stand by me", None).unwrap();
        assert_eq!(c.full_key, "stand by me");
        assert!(c.author_hint.is_none());
    }

    #[test]
    fn test_author_hint_from_context() {
        let c = normalize_candidate(
            "Body Keeps Score",
            Some("that trauma book by Bessel van der Kolk, you know the one"),
        )
        .unwrap();
        assert_eq!(c.author_hint.as_deref(), Some("Bessel van der Kolk"));
    }

    #[test]
    fn test_diacritics_are_folded() {
        assert_eq!(normalize("Cien años de soledad").unwrap(), "cien anos de soledad");
        assert_eq!(normalize_author("Gabriel García Márquez"), "gabriel garcia marquez");
    }

    #[test]
    fn test_author_honorifics_removed() {
        assert_eq!(normalize_author("Dr. Peter Attia"), "peter attia");
        assert_eq!(normalize_author("Prof Brian Cox"), "brian cox");
    }

    #[test]
    fn test_empty_candidates_rejected() {
        assert_eq!(normalize(""), Err(EmptyCandidate));
        assert_eq!(normalize("   \t\n"), Err(EmptyCandidate));
        assert_eq!(normalize("?!--"), Err(EmptyCandidate));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let samples = [
            "Thinking, Fast and Slow",
            "Sapiens: A Brief History of Humankind",
            "Sapiens by Harari",
            "the book The Road",
            "The",
            "The: The",
            "Cien años de soledad",
            "ℌello Ⅻ ﬁsh",
            "İstanbul: Memories and the City",
            "his book — the subtitle only",
            "1984",
            "Señor 日本語 🎉",
        ];
        for raw in samples {
            let once = normalize(raw).unwrap();
            let twice = normalize(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_significant_tokens_skip_stopwords() {
        let c = normalize_candidate("The Lord of the Rings: The Return of the King", None).unwrap();
        let tokens = c.significant_tokens();
        assert_eq!(tokens, vec!["lord", "rings", "return", "king"]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_word() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,9}".prop_filter("author marker", |w| w.as_str() != "by"),
            Just("años".to_string()),
            Just("señor".to_string()),
            Just("o'brien".to_string()),
            Just("1984".to_string()),
        ]
    }

    fn arb_phrase() -> impl Strategy<Value = String> {
        prop::collection::vec(arb_word(), 1..5).prop_map(|words| words.join(" "))
    }

    fn arb_separator() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just(": "),
            Just(":"),
            Just(" — "),
            Just("—"),
            Just(" – "),
            Just(" - "),
        ]
    }

    fn arb_noise() -> impl Strategy<Value = Vec<&'static str>> {
        prop::collection::vec(prop::sample::select(LEADING_NOISE.to_vec()), 0..4)
    }

    /// Flip the case of each character where the mask says so.
    fn recase(s: &str, mask: &[bool]) -> String {
        s.chars()
            .zip(mask.iter().cycle())
            .map(|(c, upper)| {
                if *upper {
                    c.to_uppercase().collect::<String>()
                } else {
                    c.to_string()
                }
            })
            .collect()
    }

    fn arb_title() -> impl Strategy<Value = String> {
        (
            arb_noise(),
            arb_phrase(),
            prop::option::of((arb_separator(), arb_noise(), arb_phrase())),
            prop::collection::vec(any::<bool>(), 1..16),
        )
            .prop_map(|(noise, main, subtitle, mask)| {
                let mut raw = noise.join(" ");
                if !raw.is_empty() {
                    raw.push(' ');
                }
                raw.push_str(&main);
                if let Some((separator, sub_noise, sub)) = subtitle {
                    raw.push_str(separator);
                    for phrase in sub_noise {
                        raw.push_str(phrase);
                        raw.push(' ');
                    }
                    raw.push_str(&sub);
                }
                recase(&raw, &mask)
            })
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(raw in arb_title()) {
            let once = normalize(&raw).unwrap();
            let twice = normalize(&once).unwrap();
            prop_assert_eq!(once, twice, "not idempotent for {:?}", raw);
        }

        #[test]
        fn short_key_is_stable_under_renormalization(raw in arb_title()) {
            let (full, short) = title_keys(&raw).unwrap();
            prop_assert_eq!(title_keys(&full).unwrap().0, full.clone());
            prop_assert_eq!(title_keys(&short).unwrap().0, short);
        }
    }
}
