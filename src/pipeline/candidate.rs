use serde::Serialize;

use crate::platform::types::{Issue, PullRequest, Repository};

use super::diff::{DiffStats, FileChange};
use super::scoring::ScoreBreakdown;

/// Per-issue evaluation state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    IssuePending,
    PureAccepted,
    PureRejected,
    Linked,
    Unlinked,
    Ambiguous,
    DiffAccepted,
    DiffRejected,
    Passing,
    BelowThreshold,
    /// A local error stopped evaluation.
    Skipped,
}

impl CandidateStatus {
    pub fn can_advance_to(self, next: CandidateStatus) -> bool {
        use CandidateStatus::*;
        match (self, next) {
            (IssuePending | PureAccepted | Linked | DiffAccepted, Skipped) => true,
            (IssuePending, PureAccepted | PureRejected) => true,
            (PureAccepted, Linked | Unlinked | Ambiguous) => true,
            (Linked, DiffAccepted | DiffRejected) => true,
            (DiffAccepted, Passing | BelowThreshold) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            CandidateStatus::IssuePending
                | CandidateStatus::PureAccepted
                | CandidateStatus::Linked
                | CandidateStatus::DiffAccepted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Repository,
    Issues,
    Purity,
    Linkage,
    Diff,
    Scoring,
}

/// A note about an item that was screened out or could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub stage: Stage,
    pub subject: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(stage: Stage, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub repository: Repository,
    pub issue: Issue,
    pub pull_request: Option<PullRequest>,
    pub files: Vec<FileChange>,
    pub stats: Option<DiffStats>,
    pub score: Option<ScoreBreakdown>,
    pub status: CandidateStatus,
    pub reasons: Vec<String>,
}

impl Candidate {
    pub fn new(repository: Repository, issue: Issue) -> Self {
        Self {
            repository,
            issue,
            pull_request: None,
            files: Vec::new(),
            stats: None,
            score: None,
            status: CandidateStatus::IssuePending,
            reasons: Vec::new(),
        }
    }

    pub fn advance(&mut self, status: CandidateStatus, reason: impl Into<String>) {
        debug_assert!(
            self.status.can_advance_to(status),
            "illegal transition {:?} -> {:?}",
            self.status,
            status
        );
        self.status = status;
        self.reasons.push(reason.into());
    }

    pub fn is_passing(&self) -> bool {
        self.status == CandidateStatus::Passing
    }

    pub fn total_score(&self) -> f64 {
        self.score.as_ref().map_or(0.0, |s| s.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::CandidateStatus::*;

    #[test]
    fn test_transitions_only_move_forward() {
        assert!(IssuePending.can_advance_to(PureAccepted));
        assert!(PureAccepted.can_advance_to(Ambiguous));
        assert!(DiffAccepted.can_advance_to(BelowThreshold));
        assert!(Linked.can_advance_to(Skipped));

        assert!(!PureRejected.can_advance_to(Linked));
        assert!(!IssuePending.can_advance_to(Passing));
        assert!(!Passing.can_advance_to(Skipped));
        assert!(!Linked.can_advance_to(PureAccepted));
    }

    #[test]
    fn test_terminal_states() {
        for status in [
            PureRejected,
            Unlinked,
            Ambiguous,
            DiffRejected,
            Passing,
            BelowThreshold,
            Skipped,
        ] {
            assert!(status.is_terminal(), "{status:?}");
        }
        for status in [IssuePending, PureAccepted, Linked, DiffAccepted] {
            assert!(!status.is_terminal(), "{status:?}");
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&BelowThreshold).unwrap(),
            "\"below_threshold\""
        );
    }
}
