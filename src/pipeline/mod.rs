pub mod candidate;
pub mod diff;
pub mod linkage;
pub mod purity;
pub mod scoring;
pub mod sources;

use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::Serialize;

use crate::cache::{CacheStats, FetchCache};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::platform::types::{Issue, Repository};
use crate::platform::{Authenticator, Platform};
use crate::shutdown::CancelSignal;

pub use candidate::{Candidate, CandidateStatus, Diagnostic, Stage};
use diff::{DiffAnalyzer, DiffVerdict, PathRules};
use linkage::{Linkage, LinkageResolver};
use purity::{PurityFilter, PurityVerdict};
use scoring::{CandidateScorer, ComplexityScorer, ScoreInput};
use sources::{IssueItem, IssueSource, RepoScreening, RepositorySource};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub repos_accepted: usize,
    pub repos_rejected: usize,
    pub issues_evaluated: usize,
    pub pure_rejected: usize,
    pub unlinked: usize,
    pub ambiguous: usize,
    pub diff_rejected: usize,
    pub below_threshold: usize,
    pub passing: usize,
    pub skipped: usize,
}

impl RunStats {
    fn record(&mut self, status: CandidateStatus) {
        debug_assert!(status.is_terminal(), "unfinished candidate {status:?}");
        self.issues_evaluated += 1;
        match status {
            CandidateStatus::PureRejected => self.pure_rejected += 1,
            CandidateStatus::Unlinked => self.unlinked += 1,
            CandidateStatus::Ambiguous => self.ambiguous += 1,
            CandidateStatus::DiffRejected => self.diff_rejected += 1,
            CandidateStatus::BelowThreshold => self.below_threshold += 1,
            CandidateStatus::Passing => self.passing += 1,
            CandidateStatus::Skipped => self.skipped += 1,
            CandidateStatus::IssuePending
            | CandidateStatus::PureAccepted
            | CandidateStatus::Linked
            | CandidateStatus::DiffAccepted => {}
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Passing candidates by score (descending), then, if requested, the
    /// rest in discovery order.
    pub candidates: Vec<Candidate>,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: RunStats,
    pub cache: CacheStats,
    pub cancelled: bool,
    pub limit_reached: bool,
}

impl RunReport {
    pub fn passing(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| c.is_passing())
    }
}

/// A run-fatal error, with whatever the run produced before it.
#[derive(Debug, thiserror::Error)]
#[error("run aborted after {produced} passing candidates: {source}")]
pub struct RunError {
    pub produced: usize,
    pub report: Box<RunReport>,
    pub source: AppError,
}

pub struct Pipeline {
    platform: Arc<dyn Platform>,
    config: AppConfig,
    cancel: CancelSignal,
    cache: Arc<FetchCache>,
    scorer: Arc<dyn CandidateScorer>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl Pipeline {
    pub fn new(
        platform: Arc<dyn Platform>,
        config: &AppConfig,
        cancel: CancelSignal,
    ) -> Result<Self> {
        let scorer = ComplexityScorer::new(config.scoring.clone())?;
        Ok(Self {
            platform,
            config: config.clone(),
            cancel,
            cache: Arc::new(FetchCache::new()),
            scorer: Arc::new(scorer),
            authenticator: None,
        })
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn CandidateScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub async fn run(self) -> std::result::Result<RunReport, RunError> {
        let started = std::time::Instant::now();

        if let Some(authenticator) = &self.authenticator {
            if let Err(e) = authenticator.authenticate().await {
                tracing::error!(error = %e, "Authentication failed");
                return Err(RunError {
                    produced: 0,
                    report: Box::default(),
                    source: e,
                });
            }
        }

        let evaluator = Evaluator::new(&self);
        let source = RepositorySource::new(
            self.platform.clone(),
            self.config.search.clone(),
            self.cancel.clone(),
        );

        let mut outcomes = pin!(source
            .stream()
            .map(|item| evaluator.screen(item))
            .buffered(self.config.pipeline.repo_concurrency));

        let mut discovered = Vec::new();
        let mut diagnostics = Vec::new();
        let mut stats = RunStats::default();
        while let Some(outcome) = outcomes.next().await {
            match outcome.screening {
                Screening::Accepted => stats.repos_accepted += 1,
                Screening::Rejected => stats.repos_rejected += 1,
                Screening::None => {}
            }
            discovered.extend(outcome.candidates);
            diagnostics.extend(outcome.diagnostics);
        }

        let fatal = evaluator.take_fatal();
        let limit_reached = evaluator.limit_reached.load(Ordering::SeqCst);
        for candidate in &discovered {
            stats.record(candidate.status);
        }

        let (mut candidates, rest): (Vec<_>, Vec<_>) =
            discovered.into_iter().partition(|c| c.is_passing());
        // sort_by is stable, so discovery order breaks ties
        candidates.sort_by(|a, b| b.total_score().total_cmp(&a.total_score()));
        if self.config.pipeline.include_rejected {
            candidates.extend(rest);
        }

        let report = RunReport {
            candidates,
            diagnostics,
            stats,
            cache: self.cache.stats(),
            cancelled: self.cancel.is_cancelled() && !limit_reached && fatal.is_none(),
            limit_reached,
        };

        tracing::info!(
            passing = report.stats.passing,
            evaluated = report.stats.issues_evaluated,
            repos = report.stats.repos_accepted,
            cache_hits = report.cache.hits,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run finished"
        );

        match fatal {
            Some(source) => Err(RunError {
                produced: report.stats.passing,
                report: Box::new(report),
                source,
            }),
            None => Ok(report),
        }
    }
}

enum Screening {
    Accepted,
    Rejected,
    None,
}

struct RepoOutcome {
    screening: Screening,
    candidates: Vec<Candidate>,
    diagnostics: Vec<Diagnostic>,
}

impl RepoOutcome {
    fn new(screening: Screening) -> Self {
        Self {
            screening,
            candidates: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn noted(screening: Screening, diagnostic: Option<Diagnostic>) -> Self {
        let mut outcome = Self::new(screening);
        outcome.diagnostics.extend(diagnostic);
        outcome
    }
}

enum IssueEvent {
    Evaluated(Option<Candidate>),
    Noted(Diagnostic),
    Failed(AppError),
}

/// Run-scoped stage components shared by every worker future.
struct Evaluator {
    platform: Arc<dyn Platform>,
    purity: PurityFilter,
    linkage: LinkageResolver,
    diff: DiffAnalyzer,
    scorer: Arc<dyn CandidateScorer>,
    min_score: f64,
    max_issues: usize,
    issue_concurrency: usize,
    max_candidates: Option<usize>,
    cancel: CancelSignal,
    passing: AtomicUsize,
    limit_reached: AtomicBool,
    fatal: Mutex<Option<AppError>>,
}

impl Evaluator {
    fn new(pipeline: &Pipeline) -> Self {
        let config = &pipeline.config;
        let platform = pipeline.platform.clone();
        Self {
            purity: PurityFilter::from_config(&config.filters),
            linkage: LinkageResolver::new(
                platform.clone(),
                pipeline.cache.clone(),
                config.filters.require_merged_pr,
            ),
            diff: DiffAnalyzer::new(
                platform.clone(),
                pipeline.cache.clone(),
                PathRules::from_config(&config.search, &config.filters),
                &config.filters,
            ),
            platform,
            scorer: pipeline.scorer.clone(),
            min_score: config.filters.min_complexity_score,
            max_issues: config.filters.max_issues_per_repo,
            issue_concurrency: config.pipeline.issue_concurrency,
            max_candidates: config.pipeline.max_candidates,
            cancel: pipeline.cancel.clone(),
            passing: AtomicUsize::new(0),
            limit_reached: AtomicBool::new(false),
            fatal: Mutex::new(None),
        }
    }

    fn abort(&self, error: AppError) {
        tracing::error!(error = %error, "Fatal error, aborting run");
        {
            let mut fatal = self.fatal.lock().unwrap_or_else(|p| p.into_inner());
            if fatal.is_none() {
                *fatal = Some(error);
            }
        }
        self.cancel.cancel();
    }

    fn take_fatal(&self) -> Option<AppError> {
        self.fatal.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    /// Fatal errors abort the run, cancellation is silent, the rest become
    /// diagnostics.
    fn triage(&self, stage: Stage, subject: &str, error: AppError) -> Option<Diagnostic> {
        if error.is_cancelled() {
            return None;
        }
        if error.is_fatal() {
            self.abort(error);
            return None;
        }
        tracing::warn!(stage = ?stage, subject = %subject, error = %error, "Skipping after error");
        Some(Diagnostic::new(stage, subject, error.to_string()))
    }

    fn record_passing(&self) {
        let passing = self.passing.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.max_candidates {
            if passing >= max && !self.limit_reached.swap(true, Ordering::SeqCst) {
                tracing::info!(max_candidates = max, "Candidate limit reached, stopping");
                self.cancel.cancel();
            }
        }
    }

    async fn screen(&self, item: Result<RepoScreening>) -> RepoOutcome {
        match item {
            Ok(RepoScreening::Accepted(repo)) => self.evaluate_repo(repo).await,
            Ok(RepoScreening::Rejected { repo, reason }) => {
                tracing::debug!(repo = %repo.full_name, reason = %reason, "Repository rejected");
                RepoOutcome::noted(
                    Screening::Rejected,
                    Some(Diagnostic::new(Stage::Repository, repo.full_name, reason)),
                )
            }
            Ok(RepoScreening::Malformed(detail)) => RepoOutcome::noted(
                Screening::None,
                Some(Diagnostic::new(Stage::Repository, "search", detail)),
            ),
            Err(e) => RepoOutcome::noted(
                Screening::None,
                self.triage(Stage::Repository, "search", e),
            ),
        }
    }

    async fn evaluate_repo(&self, repo: Repository) -> RepoOutcome {
        let mut outcome = RepoOutcome::new(Screening::Accepted);
        if self.cancel.is_cancelled() {
            return outcome;
        }
        tracing::info!(repo = %repo.full_name, stars = repo.stars, "Evaluating repository");

        let source = IssueSource::new(self.platform.clone(), self.max_issues, self.cancel.clone());
        let repo = &repo;
        let mut events = pin!(source
            .stream(&repo.full_name)
            .map(move |item| async move {
                match item {
                    Ok(IssueItem::Issue(issue)) => {
                        IssueEvent::Evaluated(self.evaluate_issue(repo, issue).await)
                    }
                    Ok(IssueItem::Malformed(detail)) => IssueEvent::Noted(Diagnostic::new(
                        Stage::Issues,
                        repo.full_name.clone(),
                        detail,
                    )),
                    Err(e) => IssueEvent::Failed(e),
                }
            })
            .buffered(self.issue_concurrency));

        while let Some(event) = events.next().await {
            match event {
                IssueEvent::Evaluated(candidate) => outcome.candidates.extend(candidate),
                IssueEvent::Noted(diagnostic) => outcome.diagnostics.push(diagnostic),
                IssueEvent::Failed(e) => {
                    outcome
                        .diagnostics
                        .extend(self.triage(Stage::Issues, &repo.full_name, e));
                    break;
                }
            }
        }
        outcome
    }

    /// Walk one issue through the stages, stopping at the first rejection.
    async fn evaluate_issue(&self, repo: &Repository, issue: Issue) -> Option<Candidate> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let mut candidate = Candidate::new(repo.clone(), issue);

        match self.purity.classify(&candidate.issue) {
            PurityVerdict::Reject(reason) => {
                tracing::debug!(
                    issue = %candidate.issue.reference(),
                    reason = %reason,
                    "Issue text rejected"
                );
                candidate.advance(CandidateStatus::PureRejected, reason);
                return Some(candidate);
            }
            PurityVerdict::Pass => candidate.advance(CandidateStatus::PureAccepted, "pure text"),
        }

        let pr = match self.linkage.resolve(&candidate.issue).await {
            Ok(Linkage::Linked(pr)) => {
                candidate.advance(CandidateStatus::Linked, format!("closed by {}", pr.reference()));
                pr
            }
            Ok(Linkage::Unlinked { reason }) => {
                candidate.advance(CandidateStatus::Unlinked, reason);
                return Some(candidate);
            }
            Ok(Linkage::Ambiguous { count, reason }) => {
                tracing::debug!(issue = %candidate.issue.reference(), count, "Ambiguous linkage");
                candidate.advance(CandidateStatus::Ambiguous, reason);
                return Some(candidate);
            }
            Err(e) => return self.skip(candidate, Stage::Linkage, e),
        };
        candidate.pull_request = Some(pr.as_ref().clone());

        let report = match self.diff.analyze(&pr.reference()).await {
            Ok(report) => report,
            Err(e) => return self.skip(candidate, Stage::Diff, e),
        };
        let verdict = self.diff.check(&report.stats);
        let input = ScoreInput::new(&report.stats, &candidate.issue.body);
        candidate.files = report.files;
        candidate.stats = Some(report.stats);
        match verdict {
            DiffVerdict::Reject(reason) => {
                candidate.advance(CandidateStatus::DiffRejected, reason);
                return Some(candidate);
            }
            DiffVerdict::Pass(reason) => candidate.advance(CandidateStatus::DiffAccepted, reason),
        }

        let breakdown = self.scorer.score(&input);
        let total = breakdown.total;
        candidate.score = Some(breakdown);
        if total >= self.min_score {
            candidate.advance(
                CandidateStatus::Passing,
                format!("score {total:.2} >= {}", self.min_score),
            );
            tracing::info!(issue = %candidate.issue.reference(), score = total, "Candidate found");
            self.record_passing();
        } else {
            candidate.advance(
                CandidateStatus::BelowThreshold,
                format!("score {total:.2} < {}", self.min_score),
            );
        }
        Some(candidate)
    }

    fn skip(&self, mut candidate: Candidate, stage: Stage, error: AppError) -> Option<Candidate> {
        let subject = candidate.issue.reference().to_string();
        let diagnostic = self.triage(stage, &subject, error)?;
        candidate.advance(CandidateStatus::Skipped, diagnostic.message);
        Some(candidate)
    }
}
