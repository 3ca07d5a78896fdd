//! String similarity used to compare error output between attempts.
//!
//! [`similarity`] (word-set overlap) drives pattern classification and its
//! 0.85 loop cutoff. [`edit_similarity`] (normalized Levenshtein) compares
//! joined error blobs when building retry feedback. The thresholds are
//! calibrated per metric, so the two are not interchangeable.

use std::collections::BTreeSet;

/// Word-set overlap between two error lists, in `[0, 1]`.
///
/// Both empty is identical (1.0); exactly one empty is disjoint (0.0).
/// Otherwise each list is joined, lower-cased and split on whitespace, and
/// the result is `|A ∩ B| / |A ∪ B|`.
pub fn similarity(a: &[String], b: &[String]) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }
    let wa = word_set(a);
    let wb = word_set(b);
    let union = wa.union(&wb).count();
    if union == 0 {
        // Only whitespace on both sides.
        return 1.0;
    }
    let inter = wa.intersection(&wb).count();
    inter as f64 / union as f64
}

fn word_set(errors: &[String]) -> BTreeSet<String> {
    errors
        .join(" ")
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Normalized edit similarity: `1 - levenshtein(s1, s2) / max(len)`.
///
/// Lengths are counted in chars. Two empty strings are identical.
pub fn edit_similarity(s1: &str, s2: &str) -> f64 {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// Classic two-row DP; insertion, deletion and substitution cost 1.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_lists() {
        assert_eq!(similarity(&[], &[]), 1.0);
        assert_eq!(similarity(&[], &list(&["x"])), 0.0);
        assert_eq!(similarity(&list(&["x"]), &[]), 0.0);
    }

    #[test]
    fn identical_lists_score_one() {
        let a = list(&["selector not found"]);
        assert_eq!(similarity(&a, &a.clone()), 1.0);
    }

    #[test]
    fn order_and_case_insensitive() {
        let a = list(&["Timeout waiting", "selector missing"]);
        let b = list(&["selector MISSING", "timeout Waiting"]);
        assert_eq!(similarity(&a, &b), 1.0);
    }

    #[test]
    fn partial_overlap() {
        // {a, b, c} vs {b, c, d}: 2 / 4
        let a = list(&["a b c"]);
        let b = list(&["b c d"]);
        assert!((similarity(&a, &b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn symmetric_and_bounded() {
        let cases = [
            (list(&["x y"]), list(&["y z w"])),
            (list(&["error: missing semicolon"]), list(&["error", "missing"])),
            (list(&["  "]), list(&["a"])),
            (list(&["one", "two"]), list(&["three"])),
        ];
        for (a, b) in &cases {
            let ab = similarity(a, b);
            let ba = similarity(b, a);
            assert_eq!(ab, ba);
            assert!((0.0..=1.0).contains(&ab));
        }
    }

    #[test]
    fn edit_similarity_identity() {
        for s in ["", "a", "selector not found", "ünïcödé"] {
            assert_eq!(edit_similarity(s, s), 1.0);
        }
    }

    #[test]
    fn edit_similarity_known_distance() {
        // kitten → sitting is 3 edits over 7 chars
        let sim = edit_similarity("kitten", "sitting");
        assert!((sim - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
    }

    #[test]
    fn edit_similarity_disjoint() {
        assert_eq!(edit_similarity("abc", ""), 0.0);
        assert_eq!(edit_similarity("abc", "xyz"), 0.0);
    }
}
