//! Similarity scoring between normalized keys and author names.

use crate::database::Book;
use crate::normalizer::{normalize_author, NormalizedCandidate};
use std::collections::HashSet;

/// Symmetric similarity of two normalized keys, bounded to [0, 1].
///
/// The larger of normalized Levenshtein similarity (catches typos and
/// transcription slips) and token Jaccard overlap (catches reordering).
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(a, b)
        .max(token_overlap(a, b))
        .clamp(0.0, 1.0)
}

fn token_overlap(a: &str, b: &str) -> f64 {
    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

/// Best similarity between any candidate key and any key of `book`.
pub fn score(candidate: &NormalizedCandidate, book: &Book) -> f64 {
    let book_keys: Vec<&str> = if book.keys.is_empty() {
        vec![book.normalized_key.as_str()]
    } else {
        book.keys.iter().map(String::as_str).collect()
    };

    candidate
        .keys()
        .into_iter()
        .flat_map(|ck| book_keys.iter().map(move |bk| similarity(ck, bk)))
        .fold(0.0, f64::max)
}

/// Whether an author hint plausibly names one of `authors`.
///
/// A single-word hint is compared to surnames ("Harari" names
/// "Yuval Noah Harari"); longer hints need the full name to be close.
pub fn author_matches(hint: &str, authors: &[String], threshold: f64) -> bool {
    let hint = normalize_author(hint);
    if hint.is_empty() {
        return false;
    }
    let hint_is_surname = !hint.contains(' ');

    authors.iter().any(|author| {
        let author = normalize_author(author);
        if author.is_empty() {
            return false;
        }
        if strsim::jaro_winkler(&hint, &author) >= threshold {
            return true;
        }
        let surname = author.rsplit(' ').next().unwrap_or(&author);
        if hint_is_surname {
            return strsim::jaro_winkler(&hint, surname) >= threshold;
        }
        let hint_surname = hint.rsplit(' ').next().unwrap_or(&hint);
        let same_initial = hint.chars().next() == author.chars().next();
        same_initial && strsim::jaro_winkler(hint_surname, surname) >= threshold
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize_candidate;

    fn book(keys: &[&str], authors: &[&str]) -> Book {
        Book {
            id: 1,
            title: keys[0].to_string(),
            normalized_key: keys[0].to_string(),
            authors: authors.iter().map(|a| a.to_string()).collect(),
            isbn: None,
            external_id: None,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            created_at: String::new(),
        }
    }

    #[test]
    fn test_similarity_is_symmetric_and_bounded() {
        let pairs = [
            ("thinking fast and slow", "thinking fast and slwo"),
            ("body keeps score", "body keeps the score"),
            ("sapiens", "sapiens a brief history of humankind"),
            ("a", "completely different words"),
        ];
        for (a, b) in pairs {
            let ab = similarity(a, b);
            assert_eq!(ab, similarity(b, a));
            assert!((0.0..=1.0).contains(&ab));
        }
        assert_eq!(similarity("dune", "dune"), 1.0);
        assert_eq!(similarity("", "dune"), 0.0);
    }

    #[test]
    fn test_reordered_tokens_score_high() {
        assert_eq!(similarity("fast and slow thinking", "thinking fast and slow"), 1.0);
    }

    #[test]
    fn test_mid_band_example() {
        let s = similarity("body keeps score", "body keeps the score");
        assert!((s - 0.8).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn test_score_uses_best_key_pair() {
        let candidate = normalize_candidate("Sapiens", None).unwrap();
        let b = book(&["sapiens a brief history of humankind", "sapiens"], &[]);
        assert_eq!(score(&candidate, &b), 1.0);
    }

    #[test]
    fn test_author_surname_hint() {
        let authors = vec!["Yuval Noah Harari".to_string()];
        assert!(author_matches("Harari", &authors, 0.9));
        assert!(author_matches("Yuval Harari", &authors, 0.9));
        assert!(!author_matches("Kahneman", &authors, 0.9));
    }

    #[test]
    fn test_author_full_name_with_honorific() {
        let authors = vec!["Bessel van der Kolk".to_string()];
        assert!(author_matches("Dr. Bessel van der Kolk", &authors, 0.9));
        assert!(!author_matches("", &authors, 0.9));
        assert!(!author_matches("Dr.", &authors, 0.9));
    }
}
