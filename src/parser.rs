//! Markdown parsers for conversation logs and generic documents.
//!
//! Both flavors emit a [`ParsedDocument`]: a metadata map plus a
//! hierarchical section tree built from ATX headers. Parsing never fails
//! on content — only I/O errors propagate.
//!
//! The conversation-log parser is the rich path. It understands the
//! session-log layout:
//!
//! ```text
//! # Session Log: 2025-10-15 - Context Preservation System
//!
//! **Project:** Builder Platform
//! **Started:** 2025-10-15T16:00:00-07:00
//!
//! ## Session Goal
//! ...
//!
//! ## 16:00 - Session Started
//! ...
//!
//! ## Tag Index
//! #context-preservation #agent-os
//! ```
//!
//! Header `**Key:** Value` lines become snake_case metadata entries, named
//! H2 sections (`Session Goal`, `Session Summary`) and the `**Outcome:**`
//! line are lifted into metadata, and the `## Tag Index` hashtags become
//! the document's tags. Timestamps are normalized to RFC 3339 strings so
//! the metadata map stays a plain JSON object.
//!
//! The generic parser covers specs, docs, and working files: the same
//! section tree plus naive `key: value` YAML frontmatter.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::models::{ImportSource, ParsedDocument, Section};

static SESSION_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Session Log: (.+?) - (.+)$").unwrap());
static BOLD_KV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*([^:]+):\*\*\s*(.+)$").unwrap());
static OUTCOME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*Outcome:\*\*\s*(.+)").unwrap());
static TAG_INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^## Tag Index\s*\n\s*(.+)$").unwrap());
static HASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#([a-zA-Z0-9_-]+)").unwrap());

/// Parse a source file into a structured document, dispatching on the
/// source type. Only I/O can fail; any content parses into something.
pub fn parse_source(source: &ImportSource) -> anyhow::Result<ParsedDocument> {
    let content = std::fs::read_to_string(&source.file_path)
        .map_err(|e| anyhow::anyhow!("failed to read file {}: {}", source.file_path, e))?;

    if source.file_type == "conversation-log" {
        Ok(parse_conversation_log(source.clone(), &content))
    } else {
        Ok(parse_markdown(source.clone(), &content))
    }
}

/// Parse a conversation log: header metadata, section tree, and tags.
pub fn parse_conversation_log(source: ImportSource, content: &str) -> ParsedDocument {
    let mut metadata = parse_header(content);

    let tags = extract_tag_index(content);
    if !tags.is_empty() {
        metadata.insert(
            "tags".to_string(),
            Value::Array(tags.into_iter().map(Value::String).collect()),
        );
    }

    let flat = scan_sections(content, 4);
    let sections = build_hierarchy(flat);

    ParsedDocument {
        source,
        metadata,
        sections,
    }
}

/// Parse generic Markdown: frontmatter metadata plus a section tree at any
/// header depth.
pub fn parse_markdown(source: ImportSource, content: &str) -> ParsedDocument {
    let metadata = extract_frontmatter(content);
    let flat = scan_sections(content, usize::MAX);
    let sections = build_hierarchy(flat);

    ParsedDocument {
        source,
        metadata,
        sections,
    }
}

/// Extract metadata from the document header region: the H1 title, any
/// `**Key:** Value` lines, the named metadata sections, and the outcome.
fn parse_header(content: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    let mut in_header = false;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();

        if let Some(title) = trimmed.strip_prefix("# ") {
            metadata.insert("title".to_string(), Value::String(title.to_string()));
            if let Some(caps) = SESSION_TITLE_RE.captures(title) {
                metadata.insert(
                    "session_date_str".to_string(),
                    Value::String(caps[1].to_string()),
                );
                metadata.insert(
                    "session_description".to_string(),
                    Value::String(caps[2].to_string()),
                );
                if let Some(date) = parse_date(&caps[1]) {
                    metadata.insert(
                        "session_date".to_string(),
                        Value::String(date.to_rfc3339()),
                    );
                }
            }
            in_header = true;
            continue;
        }

        if in_header && trimmed.starts_with("**") {
            if let Some(caps) = BOLD_KV_RE.captures(trimmed) {
                let key = caps[1].trim().to_lowercase().replace(' ', "_");
                let value = caps[2].trim().to_string();

                if key == "started" {
                    if let Some(t) = parse_timestamp(&value) {
                        metadata.insert(key, Value::String(t.to_rfc3339()));
                        continue;
                    }
                }
                metadata.insert(key, Value::String(value));
            }
        }

        // Header region ends at a horizontal rule or a blank gap past the
        // opening lines.
        if in_header && (trimmed == "---" || (trimmed.is_empty() && i > 5)) {
            break;
        }
    }

    if let Some(goal) = extract_section_content(content, "Session Goal") {
        metadata.insert("session_goal".to_string(), Value::String(goal));
    }
    if let Some(summary) = extract_section_content(content, "Session Summary") {
        metadata.insert("session_summary".to_string(), Value::String(summary));
    }
    if let Some(caps) = OUTCOME_RE.captures(content) {
        metadata.insert(
            "outcome".to_string(),
            Value::String(caps[1].trim().to_string()),
        );
    }

    metadata
}

/// Content of a named H2 section, up to the next H2 or end of input.
fn extract_section_content(content: &str, section_title: &str) -> Option<String> {
    let pattern = format!(r"(?ms)^## {}\s*\n(.*?)(?:^## |\z)", regex::escape(section_title));
    let re = Regex::new(&pattern).ok()?;
    re.captures(content).map(|caps| caps[1].trim().to_string())
}

/// Hashtags from the `## Tag Index` section.
fn extract_tag_index(content: &str) -> Vec<String> {
    let mut tags = Vec::new();
    if let Some(caps) = TAG_INDEX_RE.captures(content) {
        for m in HASHTAG_RE.captures_iter(&caps[1]) {
            tags.push(m[1].to_string());
        }
    }
    tags
}

/// Scan content into a flat list of sections. Headers deeper than
/// `max_level` are treated as body text.
fn scan_sections(content: &str, max_level: usize) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<Section> = None;
    let mut body = String::new();

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        let hashes = trimmed.chars().take_while(|&c| c == '#').count();
        let is_header = hashes > 0
            && hashes <= max_level
            && trimmed[hashes..].starts_with(' ');

        if is_header {
            if let Some(mut section) = current.take() {
                section.content = body.trim().to_string();
                sections.push(section);
            }
            body.clear();

            current = Some(Section {
                level: hashes,
                title: trimmed[hashes..].trim().to_string(),
                content: String::new(),
                children: Vec::new(),
                line: i + 1,
            });
        } else if current.is_some() {
            body.push_str(line);
            body.push('\n');
        }
    }

    if let Some(mut section) = current.take() {
        section.content = body.trim().to_string();
        sections.push(section);
    }

    sections
}

/// Fold a flat section list into a tree: each section's children are the
/// following sections with strictly greater level, until a level at or
/// below its own appears.
fn build_hierarchy(flat: Vec<Section>) -> Vec<Section> {
    let mut roots: Vec<Section> = Vec::new();
    // Stack of index paths into `roots`, innermost last.
    let mut stack: Vec<Vec<usize>> = Vec::new();

    for section in flat {
        while let Some(path) = stack.last() {
            if section_at(&roots, path).level >= section.level {
                stack.pop();
            } else {
                break;
            }
        }

        match stack.last().cloned() {
            None => {
                roots.push(section);
                stack.push(vec![roots.len() - 1]);
            }
            Some(mut path) => {
                let parent = section_at_mut(&mut roots, &path);
                parent.children.push(section);
                path.push(parent.children.len() - 1);
                stack.push(path);
            }
        }
    }

    roots
}

fn section_at<'a>(roots: &'a [Section], path: &[usize]) -> &'a Section {
    let mut node = &roots[path[0]];
    for &i in &path[1..] {
        node = &node.children[i];
    }
    node
}

fn section_at_mut<'a>(roots: &'a mut [Section], path: &[usize]) -> &'a mut Section {
    let mut node = &mut roots[path[0]];
    for &i in &path[1..] {
        node = &mut node.children[i];
    }
    node
}

/// YAML-ish frontmatter between leading `---` delimiters, parsed as naive
/// `key: value` lines.
fn extract_frontmatter(content: &str) -> Map<String, Value> {
    let mut metadata = Map::new();

    let Some(rest) = content.strip_prefix("---\n") else {
        return metadata;
    };
    let Some((front, _)) = rest.split_once("\n---\n") else {
        return metadata;
    };

    for line in front.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim();
            if !key.is_empty() {
                metadata.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
    }

    metadata
}

/// Try a fixed list of date formats, returning UTC.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t.and_utc());
        }
    }

    const DATE_FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%B %d, %Y",
        "%b %d, %Y",
        "%d/%m/%Y",
        "%m/%d/%Y",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }

    None
}

/// Timestamp parsing for header values, tolerating backtick wrapping.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim_matches('`');
    parse_date(s)
}
