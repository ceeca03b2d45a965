use db::models::memory_item::MemoryType;
use once_cell::sync::Lazy;
use regex::Regex;

/// Ordered cue table; the first matching pattern wins. Segments with no
/// cue default to `Learning` with a lower prior.
static CUES: Lazy<Vec<(MemoryType, Regex)>> = Lazy::new(|| {
    vec![
        (
            MemoryType::Decision,
            Regex::new(
                r"(?i)\b(decided|we(?:'ll| will) use|going with|chose|opted for|let'?s use|settled on|picked)\b",
            )
            .unwrap(),
        ),
        (
            MemoryType::Constraint,
            Regex::new(
                r"(?i)\b(must(?: not)?|cannot|can'?t|has to|needs? to be|only works|requires?|limited to|max(?:imum)? of)\b",
            )
            .unwrap(),
        ),
        (
            MemoryType::Gotcha,
            Regex::new(
                r"(?i)\b(gotcha|watch out|careful|surprisingly|turns? out|silently|edge case|beware|pitfall|footgun|subtle(?:ty)?)\b",
            )
            .unwrap(),
        ),
        (
            MemoryType::StyleRule,
            Regex::new(
                r"(?i)\b(convention|style|prefer|always use|never use|naming|formatt?(?:ing|ed)?|idiomatic|lint)\b",
            )
            .unwrap(),
        ),
    ]
});

/// Prior confidence contribution when a cue matched vs. the default bucket.
pub const MATCHED_PRIOR: f64 = 0.66;
pub const DEFAULT_PRIOR: f64 = 0.58;

#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub item_type: MemoryType,
    pub prior: f64,
}

/// Heuristic v1: regex-and-cue mapping from content to memory type.
pub fn classify(content: &str) -> Classification {
    for (item_type, cue) in CUES.iter() {
        if cue.is_match(content) {
            return Classification {
                item_type: *item_type,
                prior: MATCHED_PRIOR,
            };
        }
    }
    Classification {
        item_type: MemoryType::Learning,
        prior: DEFAULT_PRIOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cue_table_maps_each_type() {
        assert_eq!(
            classify("We decided to use sqlx for persistence").item_type,
            MemoryType::Decision
        );
        assert_eq!(
            classify("The migration must not rewrite the table").item_type,
            MemoryType::Constraint
        );
        assert_eq!(
            classify("Turns out the pool deadlocks with one connection").item_type,
            MemoryType::Gotcha
        );
        assert_eq!(
            classify("Convention: error enums per module").item_type,
            MemoryType::StyleRule
        );
        assert_eq!(
            classify("The scheduler retries three times on timeout").item_type,
            MemoryType::Learning
        );
    }

    #[test]
    fn matched_cues_carry_higher_prior() {
        let matched = classify("we chose tokio");
        let fallback = classify("general observation about the codebase");
        assert!(matched.prior > fallback.prior);
    }
}
