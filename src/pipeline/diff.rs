//! Changed-file classification and diff-shape statistics.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::cache::FetchCache;
use crate::config::{FilterConfig, SearchConfig};
use crate::error::Result;
use crate::platform::types::{ChangedFile, Cursor, PullRef};
use crate::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Code,
    Test,
    Doc,
    /// Build, packaging and CI files. Never counted as code.
    Config,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub additions: u64,
    pub deletions: u64,
    pub category: FileCategory,
}

impl FileChange {
    pub fn changes(&self) -> u64 {
        self.additions + self.deletions
    }
}

/// Path heuristics deciding what counts as source, test and doc files.
#[derive(Debug, Clone)]
pub struct PathRules {
    source_suffixes: Vec<String>,
}

impl PathRules {
    pub fn for_language(language: &str) -> Self {
        let suffixes: &[&str] = match language.to_lowercase().as_str() {
            "python" => &[".py", ".pyi"],
            "rust" => &[".rs"],
            "go" => &[".go"],
            "javascript" => &[".js", ".jsx", ".mjs", ".cjs"],
            "typescript" => &[".ts", ".tsx"],
            "java" => &[".java"],
            "kotlin" => &[".kt", ".kts"],
            "ruby" => &[".rb"],
            "c" => &[".c", ".h"],
            "c++" => &[".cc", ".cpp", ".cxx", ".hpp", ".hh", ".h"],
            "c#" => &[".cs"],
            "php" => &[".php"],
            "swift" => &[".swift"],
            "scala" => &[".scala"],
            other => return Self::with_suffixes(vec![format!(".{other}")]),
        };
        Self::with_suffixes(suffixes.iter().map(|s| s.to_string()).collect())
    }

    pub fn with_suffixes(suffixes: Vec<String>) -> Self {
        let source_suffixes = suffixes
            .into_iter()
            .map(|s| {
                let s = s.trim().to_lowercase();
                if s.starts_with('.') {
                    s
                } else {
                    format!(".{s}")
                }
            })
            .collect();
        Self { source_suffixes }
    }

    pub fn from_config(search: &SearchConfig, filters: &FilterConfig) -> Self {
        match &filters.source_extensions {
            Some(extensions) if !extensions.is_empty() => Self::with_suffixes(extensions.clone()),
            _ => Self::for_language(&search.language),
        }
    }

    /// Test wins over doc, doc over config, config over code.
    pub fn categorize(&self, path: &str) -> FileCategory {
        if is_test_path(path) {
            FileCategory::Test
        } else if is_doc_path(path) {
            FileCategory::Doc
        } else if is_config_path(path) {
            FileCategory::Config
        } else {
            FileCategory::Code
        }
    }

    pub fn is_source(&self, path: &str) -> bool {
        let lower = path.to_lowercase();
        self.source_suffixes.iter().any(|s| lower.ends_with(s.as_str()))
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.replace('\\', "/").to_lowercase())
}

fn is_test_path(path: &str) -> bool {
    let lower = normalize(path);
    let basename = lower.rsplit('/').next().unwrap_or(&lower);
    let stem = basename.rsplit_once('.').map_or(basename, |(stem, _)| stem);

    const TEST_DIRS: [&str; 6] = [
        "/tests/",
        "/test/",
        "/testing/",
        "/fixtures/",
        "/__tests__/",
        "/spec/",
    ];

    basename.starts_with("test_")
        || basename.starts_with("test.")
        || stem.ends_with("_test")
        || stem.ends_with("_spec")
        || basename.contains(".test.")
        || basename.contains(".spec.")
        || basename == "conftest.py"
        || TEST_DIRS.iter().any(|d| lower.contains(d))
}

fn is_doc_path(path: &str) -> bool {
    let lower = normalize(path);
    let basename = lower.rsplit('/').next().unwrap_or(&lower);
    let ext = basename.rsplit_once('.').map_or("", |(_, ext)| ext);

    const DOC_DIRS: [&str; 3] = ["/docs/", "/doc/", "/documentation/"];
    const DOC_EXTENSIONS: [&str; 4] = ["md", "rst", "txt", "adoc"];
    const DOC_NAMES: [&str; 7] = [
        "readme",
        "changelog",
        "contributing",
        "license",
        "licence",
        "history",
        "authors",
    ];

    DOC_DIRS.iter().any(|d| lower.contains(d))
        || DOC_EXTENSIONS.contains(&ext)
        || DOC_NAMES.iter().any(|n| basename.starts_with(n))
}

fn is_config_path(path: &str) -> bool {
    let lower = normalize(path);
    let basename = lower.rsplit('/').next().unwrap_or(&lower);
    let ext = basename.rsplit_once('.').map_or("", |(_, ext)| ext);

    const CONFIG_EXTENSIONS: [&str; 6] = ["cfg", "ini", "toml", "yaml", "yml", "json"];
    const CONFIG_NAMES: [&str; 2] = ["setup.py", "makefile"];

    CONFIG_EXTENSIONS.contains(&ext)
        || CONFIG_NAMES.contains(&basename)
        || basename.starts_with("dockerfile")
        || lower.contains("/.github/")
}

/// Shape of a pull request's diff over counted code files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub code_file_count: usize,
    pub max_single_file_change: u64,
    pub total_line_changes: u64,
    pub distinct_directories: usize,
    pub test_file_count: usize,
    pub doc_file_count: usize,
}

impl DiffStats {
    pub fn test_touched(&self) -> bool {
        self.test_file_count > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffReport {
    pub files: Vec<FileChange>,
    pub stats: DiffStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffVerdict {
    Pass(String),
    Reject(String),
}

pub struct DiffAnalyzer {
    platform: Arc<dyn Platform>,
    cache: Arc<FetchCache>,
    rules: PathRules,
    min_code_files: usize,
    min_max_file_changes: u64,
}

impl DiffAnalyzer {
    pub fn new(
        platform: Arc<dyn Platform>,
        cache: Arc<FetchCache>,
        rules: PathRules,
        filters: &FilterConfig,
    ) -> Self {
        Self {
            platform,
            cache,
            rules,
            min_code_files: filters.min_non_test_doc_py_files,
            min_max_file_changes: filters.min_max_file_changes,
        }
    }

    /// Fetch (once per run) and classify the pull request's changed files.
    pub async fn analyze(&self, pr: &PullRef) -> Result<DiffReport> {
        let files = self
            .cache
            .pull_files(pr, || self.fetch_files(pr))
            .await?;
        Ok(self.summarize(&files))
    }

    async fn fetch_files(&self, pr: &PullRef) -> Result<Vec<ChangedFile>> {
        let mut files = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let page = self.platform.list_pull_files(pr, cursor.as_ref()).await?;
            for skipped in &page.skipped {
                tracing::warn!(pr = %pr, detail = %skipped, "Skipping malformed file entry");
            }
            files.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        tracing::debug!(pr = %pr, files = files.len(), "Fetched changed files");
        Ok(files)
    }

    pub fn summarize(&self, files: &[ChangedFile]) -> DiffReport {
        let changes: Vec<FileChange> = files
            .iter()
            .map(|f| FileChange {
                path: f.path.clone(),
                additions: f.additions,
                deletions: f.deletions,
                category: self.rules.categorize(&f.path),
            })
            .collect();

        let mut stats = DiffStats::default();
        let mut directories = BTreeSet::new();
        for change in &changes {
            match change.category {
                FileCategory::Test => stats.test_file_count += 1,
                FileCategory::Doc => stats.doc_file_count += 1,
                FileCategory::Code if self.rules.is_source(&change.path) => {
                    stats.code_file_count += 1;
                    stats.total_line_changes += change.changes();
                    stats.max_single_file_change =
                        stats.max_single_file_change.max(change.changes());
                    let dir = change.path.rsplit_once('/').map_or("", |(dir, _)| dir);
                    directories.insert(dir.to_string());
                }
                FileCategory::Code | FileCategory::Config => {}
            }
        }
        stats.distinct_directories = directories.len();

        DiffReport {
            files: changes,
            stats,
        }
    }

    /// The code-file count is checked before the largest change.
    pub fn check(&self, stats: &DiffStats) -> DiffVerdict {
        if stats.code_file_count < self.min_code_files {
            return DiffVerdict::Reject(format!(
                "only {} code files < {}",
                stats.code_file_count, self.min_code_files
            ));
        }
        if stats.max_single_file_change < self.min_max_file_changes {
            return DiffVerdict::Reject(format!(
                "largest code file change {} < {}",
                stats.max_single_file_change, self.min_max_file_changes
            ));
        }
        DiffVerdict::Pass(format!(
            "{} code files, largest change {}",
            stats.code_file_count, stats.max_single_file_change
        ))
    }
}
