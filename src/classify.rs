//! Visibility and source classification.
//!
//! Every discovered file gets a visibility tier (`public`, `org-private`,
//! `individual`) and a fine-grained source class before anything is parsed.
//! Classification reads only the first 200 lines (~10 KB) of the file to
//! bound cost, and applies signals in precedence order:
//!
//! 1. Explicit manual tags in content (`#public`, `#private`, `#confidential`)
//! 2. Detected public URLs (documentation hosts, Q&A sites, public repos,
//!    blogs, official docs), demoted to org-private when any retained URL
//!    matches a paywall pattern
//! 3. Directory path markers (client directories, personal directories)
//! 4. The configured default visibility; `auto` resolves to org-private
//!
//! Public-web sources keep their retained URL list for attribution; the
//! first URL becomes the block's `source_url` with a domain-aware
//! attribution string.

use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::models::ImportSource;

/// Lines read from the head of a file for classification (~10 KB).
const MAX_CLASSIFY_LINES: usize = 200;

static PUBLIC_URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Documentation sites
        r"https?://[^\s)]*\.readthedocs\.io[^\s)]*",
        r"https?://docs\.[^\s)]+",
        r"https?://[^\s)]*\.github\.io[^\s)]*",
        // Q&A and community
        r"https?://stackoverflow\.com[^\s)]*",
        r"https?://stackexchange\.com[^\s)]*",
        r"https?://serverfault\.com[^\s)]*",
        r"https?://superuser\.com[^\s)]*",
        // Public repositories
        r"https?://github\.com/[^/\s)]+/[^/\s)]+",
        r"https?://gitlab\.com/[^/\s)]+/[^/\s)]+",
        // Technical blogs
        r"https?://medium\.com[^\s)]*",
        r"https?://dev\.to[^\s)]*",
        r"https?://hashnode\.com[^\s)]*",
        // Official documentation
        r"https?://developer\.mozilla\.org[^\s)]*",
        r"https?://golang\.org[^\s)]*",
        r"https?://python\.org[^\s)]*",
        r"https?://rust-lang\.org[^\s)]*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid public URL pattern"))
    .collect()
});

static PAYWALL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"patreon\.com",
        r"medium\.com/.*membership",
        r"substack\.com/subscribe",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid paywall pattern"))
    .collect()
});

const CLIENT_DIRECTORY_MARKERS: &[&str] = &["/work/", "/client-", "/clients/"];
const PERSONAL_DIRECTORY_MARKERS: &[&str] = &["/personal/", "/home/"];

static PERSONAL_DOCUMENTS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Users/[^/]+/Documents").expect("invalid documents pattern"));

/// Classify a discovered source by reading the head of its file.
///
/// Classification is soft: callers treat failures as recoverable and fall
/// back to the default classification.
pub fn classify_source(
    source: &mut ImportSource,
    default_visibility: &str,
    org_id: Option<Uuid>,
) -> Result<()> {
    let content = read_head(&source.file_path)?;
    classify_content(source, &content, default_visibility, org_id);
    Ok(())
}

/// Classification over already-read content. Split from the file read so
/// the precedence rules are testable without touching the filesystem.
pub fn classify_content(
    source: &mut ImportSource,
    content: &str,
    default_visibility: &str,
    org_id: Option<Uuid>,
) {
    // Manual tags take absolute precedence.
    if content.contains("#public") {
        source.visibility = "public".to_string();
        source.source_class = "user-contributed".to_string();
        return;
    }
    if content.contains("#private") || content.contains("#confidential") {
        source.visibility = "org-private".to_string();
        source.source_class = "confidential".to_string();
        source.contains_pii = true;
        return;
    }

    // Public URLs in content.
    let urls = extract_public_urls(content);
    if !urls.is_empty() {
        if urls.iter().any(|u| is_paywall_url(u)) {
            source.visibility = "org-private".to_string();
            source.source_class = "paywall-content".to_string();
        } else {
            source.visibility = "public".to_string();
            source.source_class = "public-web".to_string();
            source.source_url = Some(urls[0].clone());
            source.source_attribution = Some(generate_attribution(&urls[0]));
            source.metadata.insert(
                "source_urls".to_string(),
                Value::Array(urls.into_iter().map(Value::String).collect()),
            );
        }
        return;
    }

    // Directory path markers.
    let path = &source.file_path;
    if CLIENT_DIRECTORY_MARKERS.iter().any(|m| path.contains(m)) {
        source.visibility = "org-private".to_string();
        source.source_class = "client-data".to_string();
        source.organization_id = org_id;
        return;
    }
    if PERSONAL_DIRECTORY_MARKERS.iter().any(|m| path.contains(m))
        || PERSONAL_DOCUMENTS_PATTERN.is_match(path)
    {
        source.visibility = "individual".to_string();
        source.source_class = "personal".to_string();
        return;
    }

    // Default behavior.
    if default_visibility == "auto" {
        source.visibility = "org-private".to_string();
        source.source_class = "private-repo".to_string();
        source.organization_id = org_id;
    } else {
        source.visibility = default_visibility.to_string();
        source.source_class = "user-specified".to_string();
        if default_visibility == "org-private" {
            source.organization_id = org_id;
        }
    }
}

/// All public URLs in content, deduplicated preserving first occurrence.
fn extract_public_urls(content: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for pattern in PUBLIC_URL_PATTERNS.iter() {
        for m in pattern.find_iter(content) {
            let url = m.as_str().to_string();
            if seen.insert(url.clone()) {
                urls.push(url);
            }
        }
    }

    urls
}

fn is_paywall_url(url: &str) -> bool {
    PAYWALL_PATTERNS.iter().any(|p| p.is_match(url))
}

/// Domain-aware attribution text for a source URL.
pub fn generate_attribution(source_url: &str) -> String {
    if source_url.is_empty() {
        return String::new();
    }

    let host = source_url
        .split("//")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("");

    match host {
        h if h.contains("stackoverflow.com") => format!("Source: Stack Overflow - {}", source_url),
        h if h.contains("github.com") => format!("Source: GitHub - {}", source_url),
        h if h.contains("readthedocs.io") => format!("Source: Documentation - {}", source_url),
        h if h.contains("medium.com") => format!("Source: Medium - {}", source_url),
        h if h.contains("dev.to") => format!("Source: DEV Community - {}", source_url),
        _ => format!("Source: {}", source_url),
    }
}

/// Read the first [`MAX_CLASSIFY_LINES`] lines of a file.
fn read_head(path: &str) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut content = String::new();

    for line in reader.lines().take(MAX_CLASSIFY_LINES) {
        content.push_str(&line?);
        content.push('\n');
    }

    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn source(path: &str) -> ImportSource {
        ImportSource::new(
            path.to_string(),
            "doc".to_string(),
            Utc::now(),
            "hash".to_string(),
            0,
        )
    }

    #[test]
    fn manual_public_tag_wins() {
        let mut s = source("/repo/notes-doc.md");
        classify_content(&mut s, "Some notes #public with content", "auto", None);
        assert_eq!(s.visibility, "public");
        assert_eq!(s.source_class, "user-contributed");
    }

    #[test]
    fn confidential_tag_wins_over_urls() {
        let mut s = source("/repo/notes-doc.md");
        classify_content(
            &mut s,
            "#confidential\nSee https://stackoverflow.com/questions/123",
            "auto",
            None,
        );
        assert_eq!(s.visibility, "org-private");
        assert_eq!(s.source_class, "confidential");
        assert!(s.contains_pii);
    }

    #[test]
    fn stackoverflow_url_classifies_public_web() {
        let mut s = source("/repo/notes-doc.md");
        classify_content(
            &mut s,
            "Answer from https://stackoverflow.com/questions/123 helped here",
            "auto",
            None,
        );
        assert_eq!(s.visibility, "public");
        assert_eq!(s.source_class, "public-web");
        assert_eq!(
            s.source_url.as_deref(),
            Some("https://stackoverflow.com/questions/123")
        );
        assert_eq!(
            s.source_attribution.as_deref(),
            Some("Source: Stack Overflow - https://stackoverflow.com/questions/123")
        );

        let urls = s.metadata.get("source_urls").unwrap().as_array().unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(
            urls[0].as_str().unwrap(),
            "https://stackoverflow.com/questions/123"
        );
    }

    #[test]
    fn paywall_url_demotes_to_org_private() {
        let mut s = source("/repo/notes-doc.md");
        classify_content(
            &mut s,
            "Read https://medium.com/some-story/membership for more",
            "auto",
            None,
        );
        assert_eq!(s.visibility, "org-private");
        assert_eq!(s.source_class, "paywall-content");
        assert!(s.source_url.is_none());
    }

    #[test]
    fn client_directory_marker() {
        let org = Uuid::new_v4();
        let mut s = source("/data/clients/acme/session-notes.md");
        classify_content(&mut s, "no signals in content", "auto", Some(org));
        assert_eq!(s.visibility, "org-private");
        assert_eq!(s.source_class, "client-data");
        assert_eq!(s.organization_id, Some(org));
    }

    #[test]
    fn personal_directory_marker() {
        let mut s = source("/Users/sam/Documents/journal.md");
        classify_content(&mut s, "no signals in content", "auto", None);
        assert_eq!(s.visibility, "individual");
        assert_eq!(s.source_class, "personal");
    }

    #[test]
    fn auto_default_resolves_to_private_repo() {
        let org = Uuid::new_v4();
        let mut s = source("/repo/design-doc.md");
        classify_content(&mut s, "no signals in content", "auto", Some(org));
        assert_eq!(s.visibility, "org-private");
        assert_eq!(s.source_class, "private-repo");
        assert_eq!(s.organization_id, Some(org));
    }

    #[test]
    fn explicit_default_is_honored() {
        let mut s = source("/repo/design-doc.md");
        classify_content(&mut s, "no signals in content", "public", None);
        assert_eq!(s.visibility, "public");
        assert_eq!(s.source_class, "user-specified");
        assert!(s.organization_id.is_none());
    }

    #[test]
    fn url_dedup_preserves_first_occurrence() {
        let urls = extract_public_urls(
            "https://github.com/rust-lang/rust and again https://github.com/rust-lang/rust \
             plus https://dev.to/article",
        );
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "https://github.com/rust-lang/rust");
    }

    #[test]
    fn classify_reads_only_file_head() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("long-doc.md");
        // Put a #public marker beyond line 200; it must be ignored.
        let mut content = String::new();
        for _ in 0..250 {
            content.push_str("filler line\n");
        }
        content.push_str("#public\n");
        std::fs::write(&path, content).unwrap();

        let mut s = source(path.to_str().unwrap());
        classify_source(&mut s, "auto", None).unwrap();
        assert_eq!(s.source_class, "private-repo");
    }
}
