use once_cell::sync::Lazy;
use regex::Regex;

use super::classify::Classification;

/// Confidence bounds for heuristic extraction.
pub const MIN_CONFIDENCE: f64 = 0.55;
pub const MAX_CONFIDENCE: f64 = 0.92;

static FILE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w./-]+/[\w.-]+\.\w{1,6}|\b\w+\.(?:rs|md|toml|json|sql|py|ts)\b").unwrap());
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-z][a-z0-9]*_[a-z0-9_]+\b|\b[a-z]+[A-Z][A-Za-z0-9]+\b").unwrap());
static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{2,}\b").unwrap());
static COMMIT_HASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9a-f]{7,40}\b").unwrap());
static HEDGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(maybe|not sure|i think|probably|might|perhaps|unclear|guess)\b").unwrap()
});
static VAGUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(stuff|things|somehow|whatever|some kind of|etc\.?)\b").unwrap()
});

/// Combine the type prior with specificity signals and uncertainty
/// penalties. Scores land in [0.55, 0.92] with enough distinct values to
/// rank a non-trivial session.
pub fn confidence(content: &str, classification: &Classification) -> f64 {
    let mut score = classification.prior;

    if FILE_PATH.is_match(content) {
        score += 0.05;
    }
    if IDENTIFIER.is_match(content) {
        score += 0.04;
    }
    if NUMERIC.is_match(content) {
        score += 0.03;
    }
    if COMMIT_HASH.is_match(content) {
        score += 0.05;
    }
    if content.contains('`') {
        score += 0.03;
    }

    if content.contains('?') {
        score -= 0.06;
    }
    if HEDGE.is_match(content) {
        score -= 0.05;
    }
    if VAGUE.is_match(content) {
        score -= 0.04;
    }

    score.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

#[cfg(test)]
mod tests {
    use db::models::memory_item::MemoryType;

    use super::*;

    fn class(prior: f64) -> Classification {
        Classification {
            item_type: MemoryType::Learning,
            prior,
        }
    }

    #[test]
    fn specific_content_outranks_vague_content() {
        let specific = confidence(
            "We decided to store blobs under snapshots/objects/ab/cdef.rs keyed by sha256",
            &class(0.66),
        );
        let vague = confidence("maybe we should change some stuff?", &class(0.58));
        assert!(specific > vague);
        assert!(specific <= MAX_CONFIDENCE);
        assert!(vague >= MIN_CONFIDENCE);
    }

    #[test]
    fn scores_stay_in_bounds() {
        let best = confidence(
            "Pinned commit deadbeef1234 in services/sync.rs uses `similar` with 42 hunks via tree_root_hash",
            &class(0.66),
        );
        let worst = confidence("maybe stuff? not sure somehow", &class(0.58));
        assert!((MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&best));
        assert!((MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&worst));
        assert_eq!(worst, MIN_CONFIDENCE);
    }

    #[test]
    fn signal_combinations_produce_distinct_values() {
        let samples = [
            "plain statement about behavior of the cache",
            "uses services/fs.rs for writes",
            "uses services/fs.rs with tree_root_hash",
            "uses services/fs.rs with tree_root_hash and 500 KB cap",
            "maybe uses the cache?",
            "we chose `sqlx` for the store",
            "we chose `sqlx` in crates/db/src/lib.rs",
            "retry limit is 30",
        ];
        let mut scores: Vec<u64> = samples
            .iter()
            .map(|s| (confidence(s, &class(if s.contains("chose") { 0.66 } else { 0.58 })) * 1000.0) as u64)
            .collect();
        scores.sort_unstable();
        scores.dedup();
        assert!(scores.len() >= 6, "expected spread, got {scores:?}");
    }
}
