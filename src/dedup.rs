//! Duplicate suppression for incoming feed items.
//!
//! Three layers, applied in order by the batch job:
//! 1. seen-set: URLs already processed in a previous run
//! 2. signature: digest over (normalized title, URL) pairs in the archive
//! 3. near-duplicate: sequence-matching similarity ratio against recent
//!    titles, with a fixed threshold (0.6 by default)
//!
//! The ratio follows difflib semantics: `2*M / (len(a) + len(b))` where `M`
//! is the total size of the longest matching blocks, computed recursively.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
// Punctuation and symbols only: Thai combining vowels and tone marks are
// category Mn and must survive normalization.
static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{P}\p{S}]+").unwrap());

/// Lowercase a title, drop punctuation, and collapse runs of whitespace.
///
/// Thai has no case, so lowercasing only affects embedded Latin text; the
/// point is that `"Songkran 2026!"` and `"songkran 2026"` normalize equal.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, " ");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

fn hex_digest(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Digest of a normalized title, used as the comment-thread key.
pub fn title_digest(title: &str) -> String {
    hex_digest(&normalize_title(title))
}

/// Dedup signature over the (title, URL) pair.
pub fn signature(title: &str, url: &str) -> String {
    hex_digest(&format!("{}|{}", normalize_title(title), url))
}

/// Sequence-matching similarity ratio between two strings, in `[0, 1]`.
///
/// Identical strings score 1.0, strings with no characters in common 0.0.
/// The ratio is symmetric in its arguments.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = match_total(&a, &b, 0, a.len(), 0, b.len());
    2.0 * matched as f64 / total as f64
}

/// Total length of matching blocks in `a[alo..ahi]` vs `b[blo..bhi]`:
/// the longest common block, plus (recursively) whatever matches on each
/// side of it.
fn match_total(a: &[char], b: &[char], alo: usize, ahi: usize, blo: usize, bhi: usize) -> usize {
    let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
    if k == 0 {
        return 0;
    }
    k + match_total(a, b, alo, i, blo, j)
        + match_total(a, b, i + k, ahi, j + k, bhi)
}

/// Longest matching block between `a[alo..ahi]` and `b[blo..bhi]`,
/// returned as `(start_in_a, start_in_b, length)`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let mut b_positions: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, &c) in b.iter().enumerate().take(bhi).skip(blo) {
        b_positions.entry(c).or_default().push(j);
    }

    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0usize);
    // run lengths of matches ending at (i-1, j-1)
    let mut run_lengths: HashMap<usize, usize> = HashMap::new();

    for i in alo..ahi {
        let mut next_runs: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b_positions.get(&a[i]) {
            for &j in positions {
                let k = j
                    .checked_sub(1)
                    .and_then(|prev| run_lengths.get(&prev).copied())
                    .unwrap_or(0)
                    + 1;
                next_runs.insert(j, k);
                if k > best_size {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_size = k;
                }
            }
        }
        run_lengths = next_runs;
    }

    (best_i, best_j, best_size)
}

/// Check a candidate title against recent archive titles. Returns the first
/// title whose similarity reaches `threshold`, with its score.
pub fn find_near_duplicate<'a>(
    title: &str,
    recent_titles: &'a [String],
    threshold: f64,
) -> Option<(&'a str, f64)> {
    let normalized = normalize_title(title);
    for existing in recent_titles {
        let score = similarity(&normalized, &normalize_title(existing));
        if score >= threshold {
            return Some((existing.as_str(), score));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_title("Songkran 2026!"), "songkran 2026");
        assert_eq!(normalize_title("  Hello,   World  "), "hello world");
        assert_eq!(normalize_title("สงกรานต์ \"เชียงใหม่\""), "สงกรานต์ เชียงใหม่");
    }

    #[test]
    fn similarity_of_identical_strings_is_one() {
        assert!((similarity("เที่ยวเชียงใหม่", "เที่ยวเชียงใหม่") - 1.0).abs() < 1e-9);
        assert!((similarity("", "") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn similarity_of_disjoint_strings_is_zero() {
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = "thailand reopens island to tourists";
        let b = "thailand reopens islands for tourism";
        assert!((similarity(a, b) - similarity(b, a)).abs() < 1e-9);
    }

    #[test]
    fn threshold_separates_near_duplicates_from_unrelated() {
        let a = "phuket airport reopens after flooding";
        let near = "phuket airport reopens after flood";
        let unrelated = "new street food market opens in chiang mai";
        assert!(similarity(a, near) >= 0.6);
        assert!(similarity(a, unrelated) < 0.6);
    }

    #[test]
    fn known_difflib_ratio() {
        // difflib.SequenceMatcher(None, "abcd", "bcde").ratio() == 0.75
        assert!((similarity("abcd", "bcde") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn signature_is_stable_across_title_formatting() {
        let a = signature("Songkran 2026!", "https://example.com/a");
        let b = signature("songkran   2026", "https://example.com/a");
        assert_eq!(a, b);
        let c = signature("songkran 2026", "https://example.com/other");
        assert_ne!(a, c);
    }

    #[test]
    fn title_digest_is_hex_and_fixed_width() {
        let d = title_digest("Loy Krathong festival returns");
        assert_eq!(d.len(), 16);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn find_near_duplicate_matches_and_misses() {
        let recent = vec![
            "Phuket airport reopens after flooding".to_string(),
            "Baht hits four-year high against dollar".to_string(),
        ];
        let hit = find_near_duplicate("phuket airport reopens after flood", &recent, 0.6);
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().0, recent[0]);
        assert!(find_near_duplicate("night market guide for beginners", &recent, 0.6).is_none());
    }
}
