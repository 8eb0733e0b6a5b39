//! Milestone-based chunking: parsed documents → pre-blocks.
//!
//! Conversation logs are segmented along their timestamped milestone
//! sections into Q&A exchanges, then grouped into blocks of roughly
//! `target_exchanges` each. Documentation files become one block per
//! section. Working files are not supported yet.
//!
//! # Block sizing
//!
//! With the defaults (`target = 4`, `min = 1`, `max = 15`):
//!
//! - Sessions with at most `2 × target` exchanges stay in a single block.
//! - Larger sessions split into contiguous windows of `target` exchanges
//!   (`target + 1` when the session would otherwise produce more than five
//!   chunks).
//! - A final remainder smaller than `min` merges into the previous window,
//!   so the last block may be oversized by up to `min - 1`.
//!
//! Multi-block sessions get part-numbered topics:
//! `<session topic> (Part 2: <first milestone title of the chunk>)`.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::models::{ParsedDocument, PreBlock, PreExchange, Section};
use crate::parser::parse_date;

/// Chunking configuration.
#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    pub min_exchanges_per_block: usize,
    pub max_exchanges_per_block: usize,
    /// Target exchanges per block; clamped to 3–5.
    pub target_exchanges: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            min_exchanges_per_block: 1,
            max_exchanges_per_block: 15,
            target_exchanges: 4,
        }
    }
}

impl ChunkOptions {
    fn validated(mut self) -> Self {
        if self.min_exchanges_per_block < 1 {
            self.min_exchanges_per_block = 1;
        }
        if self.max_exchanges_per_block < self.min_exchanges_per_block {
            self.max_exchanges_per_block = 15;
        }
        if !(3..=5).contains(&self.target_exchanges) {
            self.target_exchanges = 4;
        }
        self
    }
}

/// Titles that mark metadata sections rather than milestones.
const METADATA_SECTION_TITLES: &[&str] = &[
    "session goal",
    "session arc",
    "session overview",
    "progress summary",
    "key decisions",
    "files modified",
    "recovery instructions",
    "session summary",
    "tag index",
];

static SESSION_LOG_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Session Log:\s*\d{4}-\d{2}-\d{2}\s*-\s*").unwrap());
static FILENAME_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"session-(\d{4})-(\d{2})-(\d{2})-(\d{2})(\d{2})").unwrap());
static TIME_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})").unwrap());
static TIME_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(~(\d{1,2}):(\d{2})\)").unwrap());
static STRIP_TIME_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d{1,2}:\d{2}\s+-\s+").unwrap());
static STRIP_TIME_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\(~\d{1,2}:\d{2}\)").unwrap());

static MODEL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:model|using|with)\s*[:=]?\s*([a-z0-9][a-z0-9\-\.]+)(?:\s+model)?",
        r"([a-z0-9]+(?:-[a-z0-9]+)+)\s+model",
        r"claude[- ]([0-9]+(?:\.[0-9]+)?(?:[a-z\-]+)*)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid model pattern"))
    .collect()
});

/// Technical terms matched as substrings for documentation tagging.
const TECHNICAL_TERMS: &[&str] = &[
    "api", "database", "frontend", "backend", "deployment", "testing",
    "authentication", "authorization", "cache", "queue", "migration",
    "docker", "kubernetes", "postgres", "redis", "nginx", "react",
    "golang", "python", "typescript", "javascript", "sql",
];

/// Convert a parsed document into pre-blocks, dispatching on source type.
pub fn chunk_document(doc: &ParsedDocument, opts: ChunkOptions) -> Result<Vec<PreBlock>> {
    let opts = opts.validated();

    match doc.source.file_type.as_str() {
        "conversation-log" => chunk_conversation_log(doc, opts),
        "spec" | "doc" | "readme" | "mission" => Ok(chunk_documentation(doc)),
        "working-file" => bail!("working file chunking not supported"),
        other => bail!("unsupported file type: {}", other),
    }
}

// ============ Conversation logs ============

fn chunk_conversation_log(doc: &ParsedDocument, opts: ChunkOptions) -> Result<Vec<PreBlock>> {
    let session_topic = extract_session_topic(doc);
    let session_date = extract_session_date(doc);
    let session_id = generate_session_id(&doc.source.file_path, session_date);

    let exchanges = extract_exchanges_from_sections(&doc.sections);
    if exchanges.is_empty() {
        bail!("no exchanges found in conversation log");
    }

    if exchanges.len() <= opts.target_exchanges * 2 {
        return Ok(vec![create_pre_block(
            session_topic,
            exchanges,
            doc,
            &session_id,
            session_date,
            1,
            1,
        )]);
    }

    Ok(split_into_blocks(
        &session_topic,
        exchanges,
        doc,
        &session_id,
        session_date,
        opts,
    ))
}

/// Session topic from metadata (`session_title` > `session_goal`), else the
/// first H1 stripped of the `Session Log: YYYY-MM-DD - ` prefix.
pub fn extract_session_topic(doc: &ParsedDocument) -> String {
    if let Some(topic) = doc.metadata.get("session_title").and_then(Value::as_str) {
        if !topic.is_empty() {
            return topic.to_string();
        }
    }
    if let Some(goal) = doc.metadata.get("session_goal").and_then(Value::as_str) {
        if !goal.is_empty() {
            return goal.to_string();
        }
    }

    for section in &doc.sections {
        if section.level == 1 && !section.title.is_empty() {
            return SESSION_LOG_PREFIX_RE
                .replace(&section.title, "")
                .trim()
                .to_string();
        }
    }

    "Untitled Session".to_string()
}

/// Session date from metadata (`session_date` > `started_at`), else the
/// filename (`session-YYYY-MM-DD-HHMM`), else file mtime.
pub fn extract_session_date(doc: &ParsedDocument) -> DateTime<Utc> {
    for key in ["session_date", "started_at"] {
        if let Some(date) = doc
            .metadata
            .get(key)
            .and_then(Value::as_str)
            .and_then(parse_date)
        {
            return date;
        }
    }

    if let Some(caps) = FILENAME_DATE_RE.captures(&doc.source.file_path) {
        let stamp = format!(
            "{}-{}-{}T{}:{}:00Z",
            &caps[1], &caps[2], &caps[3], &caps[4], &caps[5]
        );
        if let Ok(t) = DateTime::parse_from_rfc3339(&stamp) {
            return t.with_timezone(&Utc);
        }
    }

    doc.source.last_modified
}

/// The filename without extension when it begins with `session-`, else a
/// date-derived id.
pub fn generate_session_id(file_path: &str, date: DateTime<Utc>) -> String {
    let filename = file_path
        .rsplit('/')
        .next()
        .unwrap_or(file_path)
        .trim_end_matches(".md");

    if filename.starts_with("session-") {
        return filename.to_string();
    }

    format!("session-{}", date.format("%Y-%m-%d-%H%M"))
}

/// Walk the section tree and extract milestone exchanges. H1 sections and
/// metadata sections are skipped but their children are still visited, so
/// nothing below them is lost. A section becomes an exchange only when both
/// its title (minus the timestamp) and its rendered body are non-empty.
pub fn extract_exchanges_from_sections(sections: &[Section]) -> Vec<PreExchange> {
    let mut exchanges = Vec::new();

    for section in sections {
        if section.level == 1 || is_metadata_section(&section.title) {
            exchanges.extend(extract_exchanges_from_sections(&section.children));
            continue;
        }

        let question = extract_milestone_title(&section.title);
        let answer = build_answer_from_section(section);

        if !question.is_empty() && !answer.is_empty() {
            exchanges.push(PreExchange {
                question,
                answer,
                timestamp: extract_timestamp_from_title(&section.title),
                model_used: extract_model_used(&section.content),
            });
        }

        exchanges.extend(extract_exchanges_from_sections(&section.children));
    }

    exchanges
}

/// True when the section title names session metadata rather than a
/// milestone (case-insensitive substring match).
pub fn is_metadata_section(title: &str) -> bool {
    let lower = title.trim().to_lowercase();
    METADATA_SECTION_TITLES.iter().any(|m| lower.contains(m))
}

/// Extract the milestone time from a title (`16:05 - …` or `… (~13:00)`),
/// bound to today's date; falls back to now.
pub fn extract_timestamp_from_title(title: &str) -> DateTime<Utc> {
    let now = Utc::now();

    for re in [&*TIME_PREFIX_RE, &*TIME_SUFFIX_RE] {
        if let Some(caps) = re.captures(title) {
            let hour: u32 = caps[1].parse().unwrap_or(0);
            let minute: u32 = caps[2].parse().unwrap_or(0);
            if let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) {
                return now.date_naive().and_time(time).and_utc();
            }
        }
    }

    now
}

/// The milestone title with the leading `HH:MM -` prefix or trailing
/// `(~HH:MM)` suffix stripped.
pub fn extract_milestone_title(title: &str) -> String {
    let title = STRIP_TIME_PREFIX_RE.replace(title, "");
    let title = STRIP_TIME_SUFFIX_RE.replace(&title, "");
    title.trim().to_string()
}

/// The section body plus each level-3 child rendered as
/// `**<child title>:**\n<child content>`, joined by blank lines.
fn build_answer_from_section(section: &Section) -> String {
    let mut parts = Vec::new();

    if !section.content.is_empty() {
        parts.push(section.content.trim().to_string());
    }

    for child in &section.children {
        if child.level == 3 && !child.content.is_empty() {
            parts.push(format!("**{}:**\n{}", child.title, child.content.trim()));
        }
    }

    parts.join("\n\n")
}

/// First plausible model-name match in the content, else `None`. A match
/// must look like a model slug (contains a dash, more than two chars).
pub fn extract_model_used(content: &str) -> Option<String> {
    let lower = content.to_lowercase();

    for re in MODEL_PATTERNS.iter() {
        if let Some(caps) = re.captures(&lower) {
            let model = caps[1].trim();
            if model.len() > 2 && model.contains('-') {
                return Some(model.to_string());
            }
        }
    }

    None
}

fn split_into_blocks(
    base_topic: &str,
    exchanges: Vec<PreExchange>,
    doc: &ParsedDocument,
    session_id: &str,
    session_date: DateTime<Utc>,
    opts: ChunkOptions,
) -> Vec<PreBlock> {
    let total = exchanges.len();

    let mut chunk_size = opts.target_exchanges;
    if total / chunk_size > 5 {
        // Too many chunks; widen each one slightly.
        chunk_size = opts.target_exchanges + 1;
    }

    let total_chunks = total.div_ceil(chunk_size);
    let mut blocks = Vec::new();
    let mut start = 0;

    while start < total {
        let mut end = (start + chunk_size).min(total);

        // A remainder smaller than the minimum merges into this chunk.
        let remaining = total - end;
        if remaining > 0 && remaining < opts.min_exchanges_per_block {
            end = total;
        }

        let chunk: Vec<PreExchange> = exchanges[start..end].to_vec();
        let chunk_number = start / chunk_size + 1;

        let topic = if total_chunks > 1 {
            let first_title = extract_milestone_title(&chunk[0].question);
            format!("{} (Part {}: {})", base_topic, chunk_number, first_title)
        } else {
            base_topic.to_string()
        };

        blocks.push(create_pre_block(
            topic,
            chunk,
            doc,
            session_id,
            session_date,
            chunk_number,
            total_chunks,
        ));

        start = end;
    }

    blocks
}

fn create_pre_block(
    topic: String,
    exchanges: Vec<PreExchange>,
    doc: &ParsedDocument,
    session_id: &str,
    session_date: DateTime<Utc>,
    chunk_number: usize,
    total_chunks: usize,
) -> PreBlock {
    let mut metadata = doc.metadata.clone();
    metadata.insert("session_id".to_string(), Value::String(session_id.to_string()));
    metadata.insert(
        "session_date".to_string(),
        Value::String(session_date.to_rfc3339()),
    );
    metadata.insert("chunk_number".to_string(), Value::from(chunk_number));
    metadata.insert("total_chunks".to_string(), Value::from(total_chunks));
    metadata.insert("exchange_count".to_string(), Value::from(exchanges.len()));

    let tags = extract_tags(&doc.metadata);

    let started_at = exchanges
        .first()
        .map(|e| e.timestamp)
        .unwrap_or(session_date);
    let completed_at = exchanges.last().map(|e| e.timestamp);

    PreBlock {
        topic,
        exchanges,
        metadata,
        tags,
        project_path: extract_project_path(&doc.source.file_path),
        source_file: doc.source.file_path.clone(),
        source_type: doc.source.file_type.clone(),
        source_hash: doc.source.file_hash.clone(),
        started_at,
        completed_at,
        visibility: doc.source.visibility.clone(),
        organization_id: doc.source.organization_id,
        source_url: doc.source.source_url.clone(),
        source_attribution: doc.source.source_attribution.clone(),
    }
}

/// Tags from document metadata: a `tags` string list, or a `tag_index`
/// string of hashtags.
pub fn extract_tags(metadata: &Map<String, Value>) -> Vec<String> {
    if let Some(Value::Array(tags)) = metadata.get("tags") {
        return tags
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }

    if let Some(tag_index) = metadata.get("tag_index").and_then(Value::as_str) {
        return parse_tag_index(tag_index);
    }

    Vec::new()
}

/// Parse hashtags out of a tag index string like
/// `#context-preservation #agent-os #system-standards`.
pub fn parse_tag_index(tag_index: &str) -> Vec<String> {
    tag_index
        .split_whitespace()
        .filter_map(|part| part.strip_prefix('#'))
        .map(|tag| tag.trim_matches(|c| ".,;:".contains(c)))
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Project path from a source file path: everything before the first
/// occurrence of a known project marker, else the parent-of-parent.
pub fn extract_project_path(file_path: &str) -> String {
    const MARKERS: &[&str] = &["/conversation-logs/", "/specs/", "/docs/", "/builds/"];

    for marker in MARKERS {
        if let Some(idx) = file_path.find(marker) {
            return file_path[..idx].to_string();
        }
    }

    let parts: Vec<&str> = file_path.split('/').collect();
    if parts.len() > 2 {
        return parts[..parts.len() - 2].join("/");
    }

    file_path.to_string()
}

// ============ Documentation ============

/// One block per meaningful section: the section title becomes the single
/// exchange's question, its content (plus child sections rendered as
/// `### title` blocks) the answer.
fn chunk_documentation(doc: &ParsedDocument) -> Vec<PreBlock> {
    let doc_title = extract_document_title(doc);
    let mut blocks = Vec::new();

    for section in &doc.sections {
        if section.level == 1 {
            for child in &section.children {
                if let Some(block) = create_documentation_block(doc, &doc_title, child) {
                    blocks.push(block);
                }
            }
        } else if let Some(block) = create_documentation_block(doc, &doc_title, section) {
            blocks.push(block);
        }
    }

    blocks
}

/// Document title from metadata, the first H1, or the filename.
pub fn extract_document_title(doc: &ParsedDocument) -> String {
    if let Some(title) = doc.metadata.get("title").and_then(Value::as_str) {
        if !title.is_empty() {
            return title.to_string();
        }
    }

    for section in &doc.sections {
        if section.level == 1 {
            return section.title.clone();
        }
    }

    doc.source
        .file_path
        .rsplit('/')
        .next()
        .unwrap_or(&doc.source.file_path)
        .trim_end_matches(".md")
        .to_string()
}

fn create_documentation_block(
    doc: &ParsedDocument,
    doc_title: &str,
    section: &Section,
) -> Option<PreBlock> {
    if section.title.is_empty() {
        return None;
    }

    let mut content = section.content.clone();
    if !section.children.is_empty() {
        content.push_str("\n\n");
        for child in &section.children {
            content.push_str(&format!("### {}\n{}\n\n", child.title, child.content));
        }
    }

    let answer = content.trim().to_string();
    if answer.is_empty() {
        return None;
    }

    let exchange = PreExchange {
        question: section.title.clone(),
        answer,
        timestamp: doc.source.last_modified,
        model_used: Some("documentation".to_string()),
    };

    let mut metadata = Map::new();
    metadata.insert("section_level".to_string(), Value::from(section.level));
    metadata.insert(
        "section_title".to_string(),
        Value::String(section.title.clone()),
    );
    metadata.insert("doc_title".to_string(), Value::String(doc_title.to_string()));

    Some(PreBlock {
        topic: format!("{}: {}", doc_title, section.title),
        exchanges: vec![exchange],
        metadata,
        tags: extract_documentation_tags(doc, section),
        project_path: extract_project_path(&doc.source.file_path),
        source_file: doc.source.file_path.clone(),
        source_type: doc.source.file_type.clone(),
        source_hash: doc.source.file_hash.clone(),
        started_at: doc.source.last_modified,
        completed_at: Some(doc.source.last_modified),
        visibility: doc.source.visibility.clone(),
        organization_id: doc.source.organization_id,
        source_url: doc.source.source_url.clone(),
        source_attribution: doc.source.source_attribution.clone(),
    })
}

/// Documentation tags: the source type, any metadata tags, and keyword hits
/// against the technical-term list; lowercased and deduplicated preserving
/// first occurrence.
fn extract_documentation_tags(doc: &ParsedDocument, section: &Section) -> Vec<String> {
    let mut tags = vec![doc.source.file_type.clone()];

    if let Some(Value::Array(doc_tags)) = doc.metadata.get("tags") {
        tags.extend(doc_tags.iter().filter_map(Value::as_str).map(str::to_string));
    }

    let text = format!("{} {}", section.title, section.content).to_lowercase();
    for term in TECHNICAL_TERMS {
        if text.contains(term) {
            tags.push(term.to_string());
        }
    }

    dedup_tags(tags)
}

fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && seen.insert(tag.clone()) {
            result.push(tag);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImportSource;
    use chrono::{Datelike, TimeZone, Timelike};
    use uuid::Uuid;

    fn test_conversation_log(exchange_count: usize, topic: &str) -> ParsedDocument {
        let base = Utc.with_ymd_and_hms(2025, 10, 15, 16, 0, 0).unwrap();

        let mut children = vec![Section {
            level: 2,
            title: "Session Goal".to_string(),
            content: "Test session goal".to_string(),
            ..Section::default()
        }];

        for i in 0..exchange_count {
            let ts = base + chrono::Duration::minutes(15 * i as i64);
            children.push(Section {
                level: 2,
                title: format!("{:02}:{:02} - Milestone {}", ts.hour(), ts.minute(), i + 1),
                content: format!("Content for milestone {}", i + 1),
                ..Section::default()
            });
        }

        let sections = vec![Section {
            level: 1,
            title: format!("Session Log: 2025-10-15 - {}", topic),
            children,
            ..Section::default()
        }];

        let mut metadata = Map::new();
        metadata.insert("session_title".to_string(), Value::String(topic.to_string()));
        metadata.insert(
            "session_date".to_string(),
            Value::String(base.to_rfc3339()),
        );
        metadata.insert(
            "tags".to_string(),
            Value::Array(vec![
                Value::String("test".to_string()),
                Value::String("chunking".to_string()),
            ]),
        );

        let mut source = ImportSource::new(
            "/test/conversation-logs/session-2025-10-15-1600.md".to_string(),
            "conversation-log".to_string(),
            base,
            "test-hash-123".to_string(),
            0,
        );
        source.visibility = "public".to_string();

        ParsedDocument {
            source,
            metadata,
            sections,
        }
    }

    #[test]
    fn small_session_single_block() {
        let doc = test_conversation_log(3, "Small Session Test");
        let blocks = chunk_document(&doc, ChunkOptions::default()).unwrap();

        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.topic, "Small Session Test");
        assert_eq!(block.exchanges.len(), 3);
        assert_eq!(block.source_file, doc.source.file_path);
        assert_eq!(block.source_type, "conversation-log");
        assert_eq!(block.source_hash, "test-hash-123");

        assert_eq!(block.metadata["chunk_number"], Value::from(1usize));
        assert_eq!(block.metadata["total_chunks"], Value::from(1usize));
        assert_eq!(block.metadata["exchange_count"], Value::from(3usize));
        assert_eq!(
            block.metadata["session_id"].as_str().unwrap(),
            "session-2025-10-15-1600"
        );

        // Exchange timestamps bind to today's date, so only hour/minute of
        // the window bounds are meaningful.
        assert_eq!(block.started_at.hour(), 16);
        assert_eq!(block.started_at.minute(), 0);
        let completed = block.completed_at.unwrap();
        assert_eq!(completed.hour(), 16);
        assert_eq!(completed.minute(), 30);
    }

    #[test]
    fn medium_session_single_block() {
        let doc = test_conversation_log(7, "Medium Session Test");
        let blocks = chunk_document(&doc, ChunkOptions::default()).unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].topic, "Medium Session Test");
        assert_eq!(blocks[0].exchanges.len(), 7);
    }

    #[test]
    fn large_session_splits_with_part_topics() {
        let doc = test_conversation_log(15, "Large Session Test");
        let blocks = chunk_document(&doc, ChunkOptions::default()).unwrap();

        assert!(blocks.len() >= 2, "large session should produce 2+ blocks");
        assert!(blocks.len() <= 4, "should not over-chunk");

        let total: usize = blocks.iter().map(|b| b.exchanges.len()).sum();
        assert_eq!(total, 15, "all exchanges preserved");

        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.metadata["chunk_number"], Value::from(i + 1));
            assert_eq!(block.metadata["total_chunks"], Value::from(blocks.len()));
            assert!(block.topic.contains("Large Session Test"));
        }
        for block in &blocks[1..] {
            assert!(block.topic.contains("(Part "));
        }
    }

    #[test]
    fn very_large_session_respects_bounds() {
        let doc = test_conversation_log(30, "Very Large Session");
        let opts = ChunkOptions::default();
        let blocks = chunk_document(&doc, opts).unwrap();

        assert!(blocks.len() >= 5);

        // chunk_size bumps to target + 1 when count/target > 5; the final
        // window may absorb a small remainder.
        let chunk_size = opts.target_exchanges + 1;
        for block in &blocks {
            let n = block.exchanges.len();
            assert!(n >= opts.min_exchanges_per_block);
            assert!(n <= opts.max_exchanges_per_block);
            assert!(n <= chunk_size + opts.min_exchanges_per_block - 1);
        }
    }

    #[test]
    fn single_exchange_session() {
        let doc = test_conversation_log(1, "Single Exchange");
        let blocks = chunk_document(&doc, ChunkOptions::default()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].exchanges.len(), 1);
    }

    #[test]
    fn max_exchanges_respected() {
        let doc = test_conversation_log(20, "Max Test");
        let opts = ChunkOptions {
            min_exchanges_per_block: 1,
            max_exchanges_per_block: 5,
            target_exchanges: 4,
        };
        let blocks = chunk_document(&doc, opts).unwrap();

        for block in &blocks {
            assert!(block.exchanges.len() <= opts.max_exchanges_per_block);
        }
    }

    #[test]
    fn session_topic_extraction() {
        // From H1 with prefix.
        let doc = ParsedDocument {
            source: ImportSource::new(
                "/t.md".into(),
                "conversation-log".into(),
                Utc::now(),
                "h".into(),
                0,
            ),
            metadata: Map::new(),
            sections: vec![Section {
                level: 1,
                title: "Session Log: 2025-10-15 - Context Preservation System".to_string(),
                ..Section::default()
            }],
        };
        assert_eq!(extract_session_topic(&doc), "Context Preservation System");

        // From metadata session_title.
        let mut doc = doc;
        doc.metadata.insert(
            "session_title".to_string(),
            Value::String("Test Session Title".to_string()),
        );
        assert_eq!(extract_session_topic(&doc), "Test Session Title");

        // session_goal when no title.
        doc.metadata.remove("session_title");
        doc.metadata.insert(
            "session_goal".to_string(),
            Value::String("Implement Feature X".to_string()),
        );
        doc.sections.clear();
        assert_eq!(extract_session_topic(&doc), "Implement Feature X");

        // Fallback.
        doc.metadata.clear();
        assert_eq!(extract_session_topic(&doc), "Untitled Session");
    }

    #[test]
    fn session_date_extraction() {
        let expected = Utc.with_ymd_and_hms(2025, 10, 15, 16, 0, 0).unwrap();

        let mut doc = ParsedDocument {
            source: ImportSource::new(
                "/path/to/session-2025-10-15-1600.md".into(),
                "conversation-log".into(),
                Utc::now(),
                "h".into(),
                0,
            ),
            metadata: Map::new(),
            sections: Vec::new(),
        };

        // From filename.
        assert_eq!(extract_session_date(&doc), expected);

        // Metadata started_at takes precedence over the filename.
        doc.metadata.insert(
            "started_at".to_string(),
            Value::String("2025-01-01T08:00:00Z".to_string()),
        );
        assert_eq!(extract_session_date(&doc).month(), 1);

        // session_date wins over started_at.
        doc.metadata.insert(
            "session_date".to_string(),
            Value::String(expected.to_rfc3339()),
        );
        assert_eq!(extract_session_date(&doc), expected);
    }

    #[test]
    fn exchanges_skip_metadata_sections() {
        let sections = vec![
            Section {
                level: 1,
                title: "Session Log: 2025-10-15".to_string(),
                ..Section::default()
            },
            Section {
                level: 2,
                title: "Session Goal".to_string(),
                content: "This is a metadata section and should be skipped".to_string(),
                ..Section::default()
            },
            Section {
                level: 2,
                title: "16:00 - Session Started".to_string(),
                content: "User requested feature implementation".to_string(),
                children: vec![
                    Section {
                        level: 3,
                        title: "Progress".to_string(),
                        content: "Created project structure".to_string(),
                        ..Section::default()
                    },
                    Section {
                        level: 3,
                        title: "Decisions".to_string(),
                        content: "Use milestone chunking".to_string(),
                        ..Section::default()
                    },
                ],
                ..Section::default()
            },
            Section {
                level: 2,
                title: "16:15 - Feature Implementation".to_string(),
                content: "Implemented core feature".to_string(),
                ..Section::default()
            },
        ];

        let exchanges = extract_exchanges_from_sections(&sections);

        // The metadata section is skipped; the milestone emits first and its
        // level-3 descendants follow in order.
        let questions: Vec<&str> = exchanges.iter().map(|e| e.question.as_str()).collect();
        assert_eq!(
            questions,
            vec![
                "Session Started",
                "Progress",
                "Decisions",
                "Feature Implementation"
            ]
        );

        assert!(exchanges[0].answer.contains("User requested feature implementation"));
        assert!(exchanges[0].answer.contains("**Progress:**"));
        assert!(exchanges[0].answer.contains("Created project structure"));
        assert!(exchanges[0].answer.contains("**Decisions:**"));

        assert_eq!(exchanges[3].answer, "Implemented core feature");
    }

    #[test]
    fn metadata_section_detection() {
        for title in [
            "Session Goal",
            "Session Overview",
            "Progress Summary",
            "Key Decisions",
            "Session Summary",
            "Tag Index",
        ] {
            assert!(is_metadata_section(title), "{} should be metadata", title);
        }
        for title in [
            "16:00 - Session Started",
            "Implementation Details",
            "Feature Work",
        ] {
            assert!(!is_metadata_section(title), "{} should not be metadata", title);
        }
    }

    #[test]
    fn milestone_title_stripping() {
        assert_eq!(
            extract_milestone_title("16:00 - Session Started"),
            "Session Started"
        );
        assert_eq!(extract_milestone_title("9:30 - Morning Sync"), "Morning Sync");
        assert_eq!(
            extract_milestone_title("Phase 1: Title (~13:00)"),
            "Phase 1: Title"
        );
        assert_eq!(
            extract_milestone_title("No timestamp here"),
            "No timestamp here"
        );
        assert_eq!(extract_milestone_title("  16:45  -  Cleanup  "), "Cleanup");
    }

    #[test]
    fn timestamp_binds_to_today() {
        let now = Utc::now();
        for (title, hour, minute) in [
            ("16:00 - Session Started", 16, 0),
            ("9:30 - Morning Sync", 9, 30),
            ("Phase 1: Review (~13:05)", 13, 5),
        ] {
            let ts = extract_timestamp_from_title(title);
            assert_eq!(ts.hour(), hour);
            assert_eq!(ts.minute(), minute);
            assert_eq!(ts.date_naive(), now.date_naive());
        }
    }

    #[test]
    fn tags_from_metadata_and_tag_index() {
        let mut metadata = Map::new();
        metadata.insert(
            "tags".to_string(),
            Value::Array(vec![
                Value::String("context-preservation".to_string()),
                Value::String("agent-os".to_string()),
            ]),
        );
        assert_eq!(
            extract_tags(&metadata),
            vec!["context-preservation", "agent-os"]
        );

        let mut metadata = Map::new();
        metadata.insert(
            "tag_index".to_string(),
            Value::String("#context-preservation #agent-os #system-standards".to_string()),
        );
        assert_eq!(
            extract_tags(&metadata),
            vec!["context-preservation", "agent-os", "system-standards"]
        );

        assert!(extract_tags(&Map::new()).is_empty());
    }

    #[test]
    fn tag_index_parsing() {
        assert_eq!(
            parse_tag_index("#tag1, #tag2; #tag3."),
            vec!["tag1", "tag2", "tag3"]
        );
        assert!(parse_tag_index("No hashtags here").is_empty());
        assert_eq!(parse_tag_index("#single"), vec!["single"]);
    }

    #[test]
    fn project_path_extraction() {
        assert_eq!(
            extract_project_path("/Users/sam/project/conversation-logs/2025-10/session.md"),
            "/Users/sam/project"
        );
        assert_eq!(
            extract_project_path("/path/to/project/specs/feature.md"),
            "/path/to/project"
        );
        assert_eq!(
            extract_project_path("/path/to/project/docs/readme.md"),
            "/path/to/project"
        );
        assert_eq!(
            extract_project_path("/path/to/project/builds/feature/spec.md"),
            "/path/to/project"
        );
        assert_eq!(
            extract_project_path("/some/random/path/file.md"),
            "/some/random"
        );
    }

    #[test]
    fn model_detection() {
        assert_eq!(
            extract_model_used("Using claude-3.5-sonnet model for this task").as_deref(),
            Some("claude-3.5-sonnet")
        );
        assert_eq!(
            extract_model_used("Model: gpt-4-turbo").as_deref(),
            Some("gpt-4-turbo")
        );
        assert_eq!(extract_model_used("No model mentioned here"), None);
    }

    #[test]
    fn unsupported_types_error() {
        let mut doc = test_conversation_log(3, "T");
        doc.source.file_type = "working-file".to_string();
        let err = chunk_document(&doc, ChunkOptions::default()).unwrap_err();
        assert!(err.to_string().contains("not supported"));

        doc.source.file_type = "unknown-type".to_string();
        let err = chunk_document(&doc, ChunkOptions::default()).unwrap_err();
        assert!(err.to_string().contains("unsupported file type"));
    }

    #[test]
    fn empty_session_errors() {
        let doc = ParsedDocument {
            source: ImportSource::new(
                "/test/session.md".into(),
                "conversation-log".into(),
                Utc::now(),
                "h".into(),
                0,
            ),
            metadata: Map::new(),
            sections: vec![
                Section {
                    level: 1,
                    title: "Empty Session".to_string(),
                    ..Section::default()
                },
                Section {
                    level: 2,
                    title: "Session Goal".to_string(),
                    content: "Metadata only".to_string(),
                    ..Section::default()
                },
            ],
        };

        let err = chunk_document(&doc, ChunkOptions::default()).unwrap_err();
        assert!(err.to_string().contains("no exchanges found"));
    }

    #[test]
    fn visibility_is_preserved() {
        let org = Uuid::new_v4();
        let mut doc = test_conversation_log(5, "Visibility Test");
        doc.source.visibility = "org-private".to_string();
        doc.source.organization_id = Some(org);

        let blocks = chunk_document(&doc, ChunkOptions::default()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].visibility, "org-private");
        assert_eq!(blocks[0].organization_id, Some(org));
    }

    #[test]
    fn documentation_chunking() {
        let source = {
            let mut s = ImportSource::new(
                "/proj/docs/architecture-doc.md".to_string(),
                "doc".to_string(),
                Utc.with_ymd_and_hms(2025, 10, 15, 12, 0, 0).unwrap(),
                "doc-hash".to_string(),
                0,
            );
            s.visibility = "org-private".to_string();
            s
        };

        let doc = ParsedDocument {
            source,
            metadata: Map::new(),
            sections: vec![Section {
                level: 1,
                title: "Architecture".to_string(),
                children: vec![
                    Section {
                        level: 2,
                        title: "Database Layer".to_string(),
                        content: "We use postgres with a cache in front.".to_string(),
                        children: vec![Section {
                            level: 3,
                            title: "Connection Pooling".to_string(),
                            content: "Pool of 25 connections.".to_string(),
                            ..Section::default()
                        }],
                        ..Section::default()
                    },
                    Section {
                        level: 2,
                        title: "Empty Section".to_string(),
                        content: String::new(),
                        ..Section::default()
                    },
                ],
                ..Section::default()
            }],
        };

        let blocks = chunk_document(&doc, ChunkOptions::default()).unwrap();
        assert_eq!(blocks.len(), 1, "empty sections are dropped");

        let block = &blocks[0];
        assert_eq!(block.topic, "Architecture: Database Layer");
        assert_eq!(block.exchanges.len(), 1);
        assert_eq!(block.exchanges[0].question, "Database Layer");
        assert!(block.exchanges[0].answer.contains("postgres with a cache"));
        assert!(block.exchanges[0].answer.contains("### Connection Pooling"));
        assert_eq!(block.exchanges[0].model_used.as_deref(), Some("documentation"));

        // Tags: source type + keyword hits, lowercased and deduplicated.
        assert!(block.tags.contains(&"doc".to_string()));
        assert!(block.tags.contains(&"postgres".to_string()));
        assert!(block.tags.contains(&"database".to_string()));
        assert!(block.tags.contains(&"cache".to_string()));

        assert_eq!(block.started_at, doc.source.last_modified);
        assert_eq!(block.completed_at, Some(doc.source.last_modified));
    }

    #[test]
    fn chunk_coverage_equals_milestone_count() {
        for n in [3, 9, 15, 23, 30] {
            let doc = test_conversation_log(n, "Coverage");
            let blocks = chunk_document(&doc, ChunkOptions::default()).unwrap();
            let total: usize = blocks.iter().map(|b| b.exchanges.len()).sum();
            assert_eq!(total, n);
        }
    }
}
