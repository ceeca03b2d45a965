use serde::Deserialize;

/// Envelope around one JSONL transcript line. Fields we do not consume are
/// ignored; unknown message types are dropped with a warning downstream.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptLine {
    pub session_id: Option<String>,
    pub timestamp: Option<String>,
    pub git_branch: Option<String>,
    #[serde(rename = "type")]
    pub line_type: Option<String>,
    pub message: Option<TranscriptMessage>,
    #[serde(default)]
    pub is_meta: bool,
    pub uuid: Option<String>,
    pub tool_use_result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptMessage {
    pub role: Option<String>,
    pub content: Option<MessageContent>,
}

/// Message content is either a bare string or an array of typed blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

/// A retained piece of conversational text with the provenance needed to
/// trace it back to its message.
#[derive(Debug, Clone)]
pub struct Segment {
    pub text: String,
    pub role: String,
    pub session_id: Option<String>,
    pub message_uuid: Option<String>,
    pub git_branch: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Default)]
pub struct ParsedTranscript {
    pub segments: Vec<Segment>,
    pub warnings: Vec<String>,
    /// Complete JSONL lines dropped by the size guard, oldest first.
    pub truncated_lines: usize,
    /// Lines that parsed as JSON envelopes.
    pub parsed_lines: usize,
    /// Whole input fell back to plain text.
    pub plain_text: bool,
}

/// Message types that never carry conversational content.
const DROPPED_TYPES: &[&str] = &["progress", "file-history-snapshot", "system"];

/// Parse a session transcript: JSONL first, plain text as the fallback
/// when not a single line parses. Applies the corpus size guard and the
/// conversational filter.
pub fn parse(input: &str, max_corpus_bytes: usize) -> ParsedTranscript {
    let mut out = ParsedTranscript::default();

    let mut lines: Vec<&str> = input.lines().collect();
    let total_bytes: usize = input.len();
    if total_bytes > max_corpus_bytes {
        // Truncate from the oldest complete line until within budget.
        let mut bytes = total_bytes;
        let mut dropped = 0;
        while bytes > max_corpus_bytes && dropped < lines.len() {
            bytes -= lines[dropped].len() + 1;
            dropped += 1;
        }
        lines.drain(..dropped);
        out.truncated_lines = dropped;
        out.warnings.push(format!(
            "transcript exceeded {max_corpus_bytes} bytes; dropped {dropped} oldest lines"
        ));
    }

    for (index, raw) in lines.iter().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let line: TranscriptLine = match serde_json::from_str(raw) {
            Ok(line) => line,
            Err(_) => {
                out.warnings.push(format!("line {}: not valid JSON, skipped", index + 1));
                continue;
            }
        };
        out.parsed_lines += 1;
        filter_line(line, &mut out);
    }

    if out.parsed_lines == 0 {
        // Nothing parsed as JSON: the whole input is plain text.
        out.plain_text = true;
        out.segments.clear();
        for paragraph in lines.join("\n").split("\n\n") {
            let text = paragraph.trim();
            if text.is_empty() {
                continue;
            }
            out.segments.push(Segment {
                text: text.to_string(),
                role: "user".to_string(),
                session_id: None,
                message_uuid: None,
                git_branch: None,
                timestamp: None,
            });
        }
    }
    out
}

/// Retain only conversational content per the filter rules.
fn filter_line(line: TranscriptLine, out: &mut ParsedTranscript) {
    let line_type = line.line_type.as_deref().unwrap_or("");
    if DROPPED_TYPES.contains(&line_type) {
        return;
    }
    if line_type != "user" && line_type != "assistant" {
        out.warnings
            .push(format!("unknown message type '{line_type}', dropped"));
        return;
    }
    let Some(message) = line.message else {
        return;
    };
    let role = message.role.clone().unwrap_or_else(|| line_type.to_string());

    if line_type == "user" && (line.is_meta || line.tool_use_result.is_some()) {
        return;
    }

    let mut texts = Vec::new();
    match message.content {
        Some(MessageContent::Text(text)) => texts.push(text),
        Some(MessageContent::Blocks(blocks)) => {
            for block in blocks {
                match block.block_type.as_deref() {
                    // Assistant text blocks only; tool_use and tool_result
                    // blocks carry machine payloads.
                    Some("text") => {
                        if let Some(text) = block.text {
                            texts.push(text);
                        }
                    }
                    _ => {}
                }
            }
        }
        None => {}
    }

    for text in texts {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.segments.push(Segment {
            text: trimmed.to_string(),
            role: role.clone(),
            session_id: line.session_id.clone(),
            message_uuid: line.uuid.clone(),
            git_branch: line.git_branch.clone(),
            timestamp: line.timestamp.clone(),
        });
    }
}
