use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use globset::Glob;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

use crate::models::{ImportOptions, ImportSource};

/// A filename glob and the source type it maps to.
#[derive(Debug, Clone)]
struct FilePattern {
    pattern: String,
    file_type: String,
}

/// Walk the root directory and collect all importable files.
///
/// Each requested file type maps to one or more filename globs
/// (`session-*.md` → conversation-log, `*-spec.md` → spec, …). Excluded
/// directories short-circuit descent. The result is ordered
/// lexicographically by path so runs are deterministic.
pub fn discover(opts: &ImportOptions) -> Result<Vec<ImportSource>> {
    let patterns = file_patterns(&opts.file_types);
    let mut sources = Vec::new();

    let root = Path::new(&opts.root_dir);
    if !root.exists() {
        anyhow::bail!("root directory does not exist: {}", opts.root_dir);
    }

    let mut it = WalkDir::new(root).into_iter();
    while let Some(entry) = it.next() {
        let entry = entry.with_context(|| "failed to walk directory")?;
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(path);
        let rel_str = rel.to_string_lossy().to_string();

        if entry.file_type().is_dir() {
            if !rel_str.is_empty() && should_exclude(&rel_str, &opts.exclude_patterns) {
                it.skip_current_dir();
            }
            continue;
        }

        if should_exclude(&rel_str, &opts.exclude_patterns) {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        let matched = patterns
            .iter()
            .find(|p| glob_matches(&p.pattern, &file_name));

        if let Some(pattern) = matched {
            let metadata = entry.metadata()?;
            let modified = metadata
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            let modified: DateTime<Utc> = modified.into();

            let hash = hash_file(path)
                .with_context(|| format!("failed to hash file {}", path.display()))?;

            sources.push(ImportSource::new(
                path.to_string_lossy().to_string(),
                pattern.file_type.clone(),
                modified,
                hash,
                metadata.len(),
            ));
        }
    }

    sources.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    Ok(sources)
}

/// Expand requested file types into filename patterns. `all` expands to
/// every known type. Pattern order matters: the first match wins, so
/// README/MISSION take their specific types before the `*.md` catch-all.
fn file_patterns(types: &[String]) -> Vec<FilePattern> {
    let mut patterns = Vec::new();

    for t in types {
        match t.as_str() {
            "logs" | "conversation-logs" => {
                patterns.push(FilePattern {
                    pattern: "session-*.md".to_string(),
                    file_type: "conversation-log".to_string(),
                });
            }
            "specs" | "specifications" => {
                patterns.push(FilePattern {
                    pattern: "*-spec.md".to_string(),
                    file_type: "spec".to_string(),
                });
                patterns.push(FilePattern {
                    pattern: "*-specification.md".to_string(),
                    file_type: "spec".to_string(),
                });
            }
            "docs" | "documentation" => {
                patterns.push(FilePattern {
                    pattern: "README.md".to_string(),
                    file_type: "readme".to_string(),
                });
                patterns.push(FilePattern {
                    pattern: "MISSION.md".to_string(),
                    file_type: "mission".to_string(),
                });
                patterns.push(FilePattern {
                    pattern: "*.md".to_string(),
                    file_type: "doc".to_string(),
                });
            }
            "working" => {
                patterns.push(FilePattern {
                    pattern: ".working.md".to_string(),
                    file_type: "working-file".to_string(),
                });
            }
            "all" => {
                return file_patterns(&[
                    "logs".to_string(),
                    "specs".to_string(),
                    "docs".to_string(),
                    "working".to_string(),
                ]);
            }
            _ => {}
        }
    }

    patterns
}

/// A path is excluded when it matches an exclude glob, or when it starts
/// with the pattern's prefix (trailing `/*` stripped), which is how whole
/// directories are excluded.
fn should_exclude(rel_path: &str, patterns: &[String]) -> bool {
    for pattern in patterns {
        if glob_matches(pattern, rel_path) {
            return true;
        }
        let prefix = pattern.trim_end_matches("/*");
        if !prefix.is_empty() && rel_path.starts_with(prefix) {
            return true;
        }
    }
    false
}

fn glob_matches(pattern: &str, candidate: &str) -> bool {
    Glob::new(pattern)
        .map(|g| g.compile_matcher().is_match(candidate))
        .unwrap_or(false)
}

/// SHA-256 over the full file bytes, streamed in 64 KiB chunks.
fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn opts(root: &str, types: &[&str]) -> ImportOptions {
        ImportOptions {
            root_dir: root.to_string(),
            file_types: types.iter().map(|t| t.to_string()).collect(),
            ..ImportOptions::default()
        }
    }

    #[test]
    fn patterns_for_all_cover_every_type() {
        let patterns = file_patterns(&["all".to_string()]);
        let types: Vec<&str> = patterns.iter().map(|p| p.file_type.as_str()).collect();
        assert!(types.contains(&"conversation-log"));
        assert!(types.contains(&"spec"));
        assert!(types.contains(&"readme"));
        assert!(types.contains(&"mission"));
        assert!(types.contains(&"doc"));
        assert!(types.contains(&"working-file"));
    }

    #[test]
    fn readme_matches_before_doc_catch_all() {
        let patterns = file_patterns(&["docs".to_string()]);
        let first = patterns
            .iter()
            .find(|p| glob_matches(&p.pattern, "README.md"))
            .unwrap();
        assert_eq!(first.file_type, "readme");
    }

    #[test]
    fn exclusion_by_glob_and_prefix() {
        let patterns = vec![".git/*".to_string(), "*.test.md".to_string()];
        assert!(should_exclude(".git/config", &patterns));
        assert!(should_exclude("chunker.test.md", &patterns));
        assert!(!should_exclude("docs/readme.md", &patterns));
        // Prefix match with trailing wildcard stripped.
        assert!(should_exclude(".git", &patterns));
    }

    #[test]
    fn discover_finds_and_types_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("conversation-logs")).unwrap();
        fs::write(
            root.join("conversation-logs/session-2025-10-15-1600.md"),
            "# Session Log: 2025-10-15 - Test\n",
        )
        .unwrap();
        fs::write(root.join("api-spec.md"), "# API Spec\n").unwrap();
        fs::write(root.join("README.md"), "# Readme\n").unwrap();
        fs::write(root.join("notes.txt"), "not markdown\n").unwrap();

        let sources = discover(&opts(root.to_str().unwrap(), &["all"])).unwrap();
        let mut found: Vec<(&str, &str)> = sources
            .iter()
            .map(|s| {
                let name = Path::new(&s.file_path).file_name().unwrap().to_str().unwrap();
                (name, s.file_type.as_str())
            })
            .collect();
        found.sort();

        assert_eq!(
            found,
            vec![
                ("README.md", "readme"),
                ("api-spec.md", "spec"),
                ("session-2025-10-15-1600.md", "conversation-log"),
            ]
        );
    }

    #[test]
    fn discover_is_ordered_and_hashes_content() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("b-doc.md"), "bravo").unwrap();
        fs::write(root.join("a-doc.md"), "alpha").unwrap();

        let sources = discover(&opts(root.to_str().unwrap(), &["docs"])).unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].file_path < sources[1].file_path);
        // SHA-256 of "alpha"
        assert_eq!(
            sources[0].file_hash,
            "8ed3f6ad685b959ead7022518e1af76cd816f8e8ec7ccdda1ed4018e8f2223f8"
        );
        assert_eq!(sources[0].file_size, 5);
    }

    #[test]
    fn excluded_directories_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/evil-doc.md"), "skip me").unwrap();
        fs::write(root.join("keep-doc.md"), "keep me").unwrap();

        let sources = discover(&opts(root.to_str().unwrap(), &["docs"])).unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].file_path.ends_with("keep-doc.md"));
    }

    #[test]
    fn discover_errors_on_missing_root() {
        let result = discover(&opts("/nonexistent/path/xyz", &["all"]));
        assert!(result.is_err());
    }
}
