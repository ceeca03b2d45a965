use chrono::{DateTime, Utc};
use db::models::memory_item::{
    CreateMemoryItem, MemoryItem, MemoryItemError, MemoryType, Provenance,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use super::fs::FsService;

pub mod classify;
pub mod dedup;
pub mod score;
pub mod transcript;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Item(#[from] MemoryItemError),
    #[error("LLM extraction mode is not enabled in this build")]
    FeatureDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    Heuristic,
    /// Batched semantic classification; falls back to heuristic scoring on
    /// transport failure. Not wired in the core build.
    Llm,
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub max_corpus_bytes: usize,
    pub min_segment_chars: usize,
    pub dedup_threshold: f64,
    pub mode: ExtractionMode,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            max_corpus_bytes: 500 * 1000,
            min_segment_chars: 24,
            dedup_threshold: 0.85,
            mode: ExtractionMode::Heuristic,
        }
    }
}

/// A scored candidate learning, not yet persisted. Always enters the store
/// with `status=candidate`; promotion is a separate, reviewed step.
#[derive(Debug, Clone)]
pub struct MemoryCandidate {
    pub content: String,
    pub item_type: MemoryType,
    pub confidence: f64,
    pub content_hash: String,
    pub provenance: Provenance,
}

#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub candidates: Vec<MemoryCandidate>,
    pub warnings: Vec<String>,
    pub parsed_lines: usize,
    pub retained_segments: usize,
    pub truncated_lines: usize,
    pub deduplicated: usize,
}

#[derive(Debug)]
pub struct AppliedExtraction {
    pub inserted: Vec<MemoryItem>,
    /// Candidates skipped because an identical item already existed.
    pub duplicates: usize,
}

/// Offline classification and dedup of agent-session transcripts into
/// candidate learnings with provenance.
#[derive(Debug, Clone, Default)]
pub struct MemoryExtractionService {
    pub config: ExtractionConfig,
}

impl MemoryExtractionService {
    pub fn new(config: ExtractionConfig) -> Self {
        MemoryExtractionService { config }
    }

    /// Run the pipeline on a raw transcript. Pure computation; the preview
    /// capability calls this without touching the store.
    pub fn extract(&self, input: &str) -> Result<ExtractionOutcome, MemoryError> {
        if self.config.mode == ExtractionMode::Llm {
            return Err(MemoryError::FeatureDisabled);
        }
        let parsed = transcript::parse(input, self.config.max_corpus_bytes);
        let mut outcome = ExtractionOutcome {
            warnings: parsed.warnings,
            parsed_lines: parsed.parsed_lines,
            retained_segments: parsed.segments.len(),
            truncated_lines: parsed.truncated_lines,
            ..Default::default()
        };

        let mut candidates = Vec::new();
        for segment in &parsed.segments {
            if segment.text.chars().count() < self.config.min_segment_chars {
                continue;
            }
            let content = utils::text::truncate_chars(&segment.text, MemoryItem::MAX_CONTENT_CHARS);
            let classification = classify::classify(&content);
            let confidence = score::confidence(&content, &classification);
            let content_hash = FsService::compute_content_hash(content.as_bytes());
            candidates.push(MemoryCandidate {
                provenance: Provenance {
                    source_type: "memory_extraction".to_string(),
                    session_id: segment.session_id.clone(),
                    message_uuid: segment.message_uuid.clone(),
                    run_id: None,
                    git_branch: segment.git_branch.clone(),
                    commit_sha: None,
                    created_by: Some(segment.role.clone()),
                    timestamp: segment
                        .timestamp
                        .as_deref()
                        .and_then(parse_timestamp),
                },
                content,
                item_type: classification.item_type,
                confidence,
                content_hash,
            });
        }

        let contents: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
        let confidences: Vec<f64> = candidates.iter().map(|c| c.confidence).collect();
        let hashes: Vec<&str> = candidates.iter().map(|c| c.content_hash.as_str()).collect();
        let (survivors, discarded) = dedup::dedup_indexes(
            &contents,
            &confidences,
            &hashes,
            self.config.dedup_threshold,
        );
        outcome.deduplicated = discarded;
        let mut survivor_flags = vec![false; candidates.len()];
        for index in survivors {
            survivor_flags[index] = true;
        }
        outcome.candidates = candidates
            .into_iter()
            .zip(survivor_flags)
            .filter_map(|(candidate, keep)| keep.then_some(candidate))
            .collect();

        tracing::debug!(
            segments = outcome.retained_segments,
            candidates = outcome.candidates.len(),
            deduplicated = outcome.deduplicated,
            "memory extraction finished"
        );
        Ok(outcome)
    }

    /// Persist an extraction outcome for a project. Exact duplicates of
    /// existing items are counted, not errors.
    pub async fn apply(
        &self,
        pool: &SqlitePool,
        project_id: Uuid,
        outcome: &ExtractionOutcome,
    ) -> Result<AppliedExtraction, MemoryError> {
        let mut inserted = Vec::new();
        let mut duplicates = 0;
        for candidate in &outcome.candidates {
            let mut conn = pool.acquire().await?;
            let result = MemoryItem::create_tx(
                &mut *conn,
                &CreateMemoryItem {
                    project_id,
                    item_type: candidate.item_type,
                    content: candidate.content.clone(),
                    confidence: candidate.confidence,
                    provenance: candidate.provenance.clone(),
                    anchors: Vec::new(),
                    ttl_policy: None,
                    content_hash: candidate.content_hash.clone(),
                },
                Uuid::new_v4(),
            )
            .await;
            match result {
                Ok(item) => inserted.push(item),
                Err(MemoryItemError::DuplicateContent) => duplicates += 1,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(AppliedExtraction {
            inserted,
            duplicates,
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
