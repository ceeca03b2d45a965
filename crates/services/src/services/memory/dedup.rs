use std::collections::HashMap;

/// Sparse TF-IDF vector keyed by term.
type TermVector = HashMap<String, f64>;

fn tokenize(content: &str) -> Vec<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

fn cosine(a: &TermVector, b: &TermVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, weight)| large.get(term).map(|other| weight * other))
        .sum();
    let norm_a: f64 = a.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Build TF-IDF vectors over the candidate corpus.
fn vectorize(contents: &[&str]) -> Vec<TermVector> {
    let mut document_frequency: HashMap<String, usize> = HashMap::new();
    let tokenized: Vec<Vec<String>> = contents.iter().map(|c| tokenize(c)).collect();
    for tokens in &tokenized {
        let mut seen: Vec<&String> = tokens.iter().collect();
        seen.sort_unstable();
        seen.dedup();
        for term in seen {
            *document_frequency.entry(term.clone()).or_insert(0) += 1;
        }
    }
    let corpus_size = contents.len().max(1) as f64;
    tokenized
        .into_iter()
        .map(|tokens| {
            let mut tf: HashMap<String, f64> = HashMap::new();
            let len = tokens.len().max(1) as f64;
            for token in tokens {
                *tf.entry(token).or_insert(0.0) += 1.0 / len;
            }
            tf.into_iter()
                .map(|(term, tf)| {
                    let df = document_frequency.get(&term).copied().unwrap_or(1) as f64;
                    let idf = (corpus_size / df).ln() + 1.0;
                    (term, tf * idf)
                })
                .collect()
        })
        .collect()
}

/// Group near-duplicate candidates by TF-IDF cosine similarity and keep one
/// exemplar per group: the highest confidence, ties broken by content hash
/// so re-runs are deterministic. Returns the surviving indexes in their
/// original order plus the number discarded.
pub fn dedup_indexes(
    contents: &[&str],
    confidences: &[f64],
    content_hashes: &[&str],
    threshold: f64,
) -> (Vec<usize>, usize) {
    let vectors = vectorize(contents);
    let mut group_of: Vec<usize> = (0..contents.len()).collect();
    let mut representatives: Vec<usize> = Vec::new();
    for index in 0..contents.len() {
        let mut assigned = None;
        for &rep in &representatives {
            if cosine(&vectors[index], &vectors[rep]) >= threshold {
                assigned = Some(rep);
                break;
            }
        }
        match assigned {
            Some(rep) => group_of[index] = group_of[rep],
            None => {
                group_of[index] = index;
                representatives.push(index);
            }
        }
    }

    // Pick the exemplar per group.
    let mut best: HashMap<usize, usize> = HashMap::new();
    for index in 0..contents.len() {
        let group = group_of[index];
        let current = *best.entry(group).or_insert(index);
        let better = confidences[index] > confidences[current]
            || (confidences[index] == confidences[current]
                && content_hashes[index] < content_hashes[current]);
        if better {
            best.insert(group, index);
        }
    }
    let mut survivors: Vec<usize> = best.into_values().collect();
    survivors.sort_unstable();
    let discarded = contents.len() - survivors.len();
    (survivors, discarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_duplicates_collapse_to_highest_confidence() {
        let contents = [
            "we decided to use sqlx with the sqlite backend for the persistence layer because the cli must keep working offline",
            "we decided to use sqlx with the sqlite backend for the persistence layer because the cli must keep working disconnected",
            "the deploy journal lives under the claude directory",
        ];
        let refs: Vec<&str> = contents.to_vec();
        let confidences = [0.70, 0.80, 0.60];
        let hashes = ["aaa", "bbb", "ccc"];
        let (survivors, discarded) = dedup_indexes(&refs, &confidences, &hashes, 0.85);
        assert_eq!(discarded, 1);
        assert!(survivors.contains(&1), "higher-confidence duplicate wins");
        assert!(survivors.contains(&2));
        assert!(!survivors.contains(&0));
    }

    #[test]
    fn distinct_content_survives() {
        let contents = [
            "snapshot blobs are content addressed",
            "memory items cap at two thousand characters",
        ];
        let refs: Vec<&str> = contents.to_vec();
        let (survivors, discarded) = dedup_indexes(&refs, &[0.6, 0.6], &["a", "b"], 0.85);
        assert_eq!(survivors.len(), 2);
        assert_eq!(discarded, 0);
    }

    #[test]
    fn equal_confidence_ties_break_by_content_hash() {
        let contents = [
            "Always run the linter before pushing changes.",
            "always run the linter before pushing changes",
        ];
        let refs: Vec<&str> = contents.to_vec();
        let (survivors, _) = dedup_indexes(&refs, &[0.7, 0.7], &["zzz", "aaa"], 0.85);
        assert_eq!(survivors, vec![1], "lower content hash wins the tie");
    }
}
