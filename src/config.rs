use serde::Deserialize;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub scoring: ScoreWeights,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    /// Personal access token. Falls back to `GITHUB_TOKEN` / `GH_TOKEN`.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

// Manual Debug impl to avoid leaking the token
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("api_url", &self.api_url)
            .field("graphql_url", &self.graphql_url)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_api_url(),
            graphql_url: default_graphql_url(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of each backoff delay that is randomised away (0.0 - 1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Longest a caller may be parked waiting for quota before the run aborts.
    #[serde(default = "default_max_rate_limit_wait_secs")]
    pub max_rate_limit_wait_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            max_rate_limit_wait_secs: default_max_rate_limit_wait_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_min_stars")]
    pub min_stars: u64,
    #[serde(default = "default_max_repos")]
    pub max_repos: usize,
    #[serde(default = "default_max_repo_size_mb")]
    pub max_repo_size_mb: u64,
    /// Terms excluded from repository search (`NOT <term>`).
    #[serde(default = "default_exclude_terms")]
    pub exclude_terms: Vec<String>,
    #[serde(default)]
    pub extra_query: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            min_stars: default_min_stars(),
            max_repos: default_max_repos(),
            max_repo_size_mb: default_max_repo_size_mb(),
            exclude_terms: default_exclude_terms(),
            extra_query: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    #[serde(default = "default_max_issues_per_repo")]
    pub max_issues_per_repo: usize,
    #[serde(default = "default_min_code_files")]
    pub min_non_test_doc_py_files: usize,
    #[serde(default = "default_min_max_file_changes")]
    pub min_max_file_changes: u64,
    #[serde(default = "default_true")]
    pub require_pure_text: bool,
    #[serde(default = "default_true")]
    pub reject_screenshot_mentions: bool,
    #[serde(default = "default_true")]
    pub require_merged_pr: bool,
    #[serde(default = "default_min_body_length")]
    pub min_body_length: usize,
    #[serde(default = "default_min_complexity_score")]
    pub min_complexity_score: f64,
    /// Overrides the source suffixes derived from `search.language`.
    #[serde(default)]
    pub source_extensions: Option<Vec<String>>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_issues_per_repo: default_max_issues_per_repo(),
            min_non_test_doc_py_files: default_min_code_files(),
            min_max_file_changes: default_min_max_file_changes(),
            require_pure_text: true,
            reject_screenshot_mentions: true,
            require_merged_pr: true,
            min_body_length: default_min_body_length(),
            min_complexity_score: default_min_complexity_score(),
            source_extensions: None,
        }
    }
}

/// Rates and caps of the complexity score contributions.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ScoreWeights {
    #[serde(default = "default_points_per_code_file")]
    pub points_per_code_file: f64,
    #[serde(default = "default_code_file_cap")]
    pub code_file_cap: f64,
    #[serde(default = "default_lines_per_point")]
    pub total_lines_per_point: f64,
    #[serde(default = "default_total_lines_cap")]
    pub total_lines_cap: f64,
    #[serde(default = "default_max_file_lines_per_point")]
    pub max_file_lines_per_point: f64,
    #[serde(default = "default_max_file_cap")]
    pub max_file_cap: f64,
    #[serde(default = "default_body_chars_per_point")]
    pub body_chars_per_point: f64,
    #[serde(default = "default_body_cap")]
    pub body_cap: f64,
    #[serde(default = "default_points_per_directory")]
    pub points_per_directory: f64,
    #[serde(default = "default_directory_cap")]
    pub directory_cap: f64,
    #[serde(default = "default_test_bonus")]
    pub test_bonus: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            points_per_code_file: default_points_per_code_file(),
            code_file_cap: default_code_file_cap(),
            total_lines_per_point: default_lines_per_point(),
            total_lines_cap: default_total_lines_cap(),
            max_file_lines_per_point: default_max_file_lines_per_point(),
            max_file_cap: default_max_file_cap(),
            body_chars_per_point: default_body_chars_per_point(),
            body_cap: default_body_cap(),
            points_per_directory: default_points_per_directory(),
            directory_cap: default_directory_cap(),
            test_bonus: default_test_bonus(),
        }
    }
}

impl ScoreWeights {
    pub fn max_total(&self) -> f64 {
        self.code_file_cap
            + self.total_lines_cap
            + self.max_file_cap
            + self.body_cap
            + self.directory_cap
            + self.test_bonus
    }

    pub fn validate(&self) -> Result<()> {
        let values = [
            ("points_per_code_file", self.points_per_code_file),
            ("code_file_cap", self.code_file_cap),
            ("total_lines_cap", self.total_lines_cap),
            ("max_file_cap", self.max_file_cap),
            ("body_cap", self.body_cap),
            ("points_per_directory", self.points_per_directory),
            ("directory_cap", self.directory_cap),
            ("test_bonus", self.test_bonus),
        ];
        for (name, value) in values {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::Config(format!(
                    "scoring.{name} must be a non-negative number, got {value}"
                )));
            }
        }

        let divisors = [
            ("total_lines_per_point", self.total_lines_per_point),
            ("max_file_lines_per_point", self.max_file_lines_per_point),
            ("body_chars_per_point", self.body_chars_per_point),
        ];
        for (name, value) in divisors {
            if !value.is_finite() || value <= 0.0 {
                return Err(AppError::Config(format!(
                    "scoring.{name} must be positive, got {value}"
                )));
            }
        }

        if self.max_total() > 100.0 {
            return Err(AppError::Config(format!(
                "scoring caps add up to {}, which exceeds 100",
                self.max_total()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_repo_concurrency")]
    pub repo_concurrency: usize,
    #[serde(default = "default_issue_concurrency")]
    pub issue_concurrency: usize,
    /// Also return non-passing candidates with their rejection reasons.
    #[serde(default)]
    pub include_rejected: bool,
    /// Stop the run once this many passing candidates were found.
    #[serde(default)]
    pub max_candidates: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            repo_concurrency: default_repo_concurrency(),
            issue_concurrency: default_issue_concurrency(),
            include_rejected: false,
            max_candidates: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_graphql_url() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_user_agent() -> String {
    format!("issue-scout/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_max_rate_limit_wait_secs() -> u64 {
    15 * 60
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_language() -> String {
    "Python".to_string()
}

fn default_min_stars() -> u64 {
    200
}

fn default_max_repos() -> usize {
    50
}

fn default_max_repo_size_mb() -> u64 {
    200
}

fn default_exclude_terms() -> Vec<String> {
    ["collection", "list", "guide", "projects", "exercises"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_issues_per_repo() -> usize {
    100
}

fn default_min_code_files() -> usize {
    4
}

fn default_min_max_file_changes() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_min_body_length() -> usize {
    80
}

fn default_min_complexity_score() -> f64 {
    25.0
}

fn default_points_per_code_file() -> f64 {
    5.0
}

fn default_code_file_cap() -> f64 {
    25.0
}

fn default_lines_per_point() -> f64 {
    20.0
}

fn default_total_lines_cap() -> f64 {
    25.0
}

fn default_max_file_lines_per_point() -> f64 {
    6.0
}

fn default_max_file_cap() -> f64 {
    20.0
}

fn default_body_chars_per_point() -> f64 {
    120.0
}

fn default_body_cap() -> f64 {
    10.0
}

fn default_points_per_directory() -> f64 {
    3.0
}

fn default_directory_cap() -> f64 {
    15.0
}

fn default_test_bonus() -> f64 {
    5.0
}

fn default_repo_concurrency() -> usize {
    4
}

fn default_issue_concurrency() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            // Try default paths
            builder = builder.add_source(config::File::with_name("issue-scout").required(false));
        }

        // Environment variable overrides with ISSUE_SCOUT_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("ISSUE_SCOUT")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transport.max_attempts == 0 {
            return Err(AppError::Config(
                "transport.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.transport.jitter) {
            return Err(AppError::Config(format!(
                "transport.jitter must be within 0.0..=1.0, got {}",
                self.transport.jitter
            )));
        }
        if self.pipeline.repo_concurrency == 0 || self.pipeline.issue_concurrency == 0 {
            return Err(AppError::Config(
                "pipeline concurrency must be at least 1".to_string(),
            ));
        }
        if self.search.language.trim().is_empty() {
            return Err(AppError::Config("search.language is empty".to_string()));
        }
        self.scoring.validate()
    }

    /// Token from the config file, else from the usual GitHub env vars.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .or_else(|| std::env::var("GH_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
    }
}
