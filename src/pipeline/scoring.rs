use serde::Serialize;

use crate::config::ScoreWeights;
use crate::error::Result;

use super::diff::DiffStats;

/// Everything the score depends on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreInput {
    pub code_file_count: usize,
    pub total_line_changes: u64,
    pub max_single_file_change: u64,
    pub body_length: usize,
    pub distinct_directories: usize,
    pub test_touched: bool,
}

impl ScoreInput {
    pub fn new(stats: &DiffStats, body: &str) -> Self {
        Self {
            code_file_count: stats.code_file_count,
            total_line_changes: stats.total_line_changes,
            max_single_file_change: stats.max_single_file_change,
            body_length: body.trim().chars().count(),
            distinct_directories: stats.distinct_directories,
            test_touched: stats.test_touched(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLabel {
    Low,
    Medium,
    High,
}

impl ComplexityLabel {
    pub fn for_total(total: f64) -> Self {
        if total >= 75.0 {
            ComplexityLabel::High
        } else if total >= 50.0 {
            ComplexityLabel::Medium
        } else {
            ComplexityLabel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub code_files: f64,
    pub total_lines: f64,
    pub largest_file: f64,
    pub body: f64,
    pub directories: f64,
    pub tests: f64,
    pub total: f64,
    pub label: ComplexityLabel,
}

pub trait CandidateScorer: Send + Sync {
    fn score(&self, input: &ScoreInput) -> ScoreBreakdown;
}

#[derive(Debug, Clone)]
pub struct ComplexityScorer {
    weights: ScoreWeights,
}

impl ComplexityScorer {
    pub fn new(weights: ScoreWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }
}

fn contribution(points: f64, cap: f64) -> f64 {
    points.clamp(0.0, cap)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl CandidateScorer for ComplexityScorer {
    fn score(&self, input: &ScoreInput) -> ScoreBreakdown {
        let w = &self.weights;
        let code_files = contribution(
            input.code_file_count as f64 * w.points_per_code_file,
            w.code_file_cap,
        );
        let total_lines = contribution(
            input.total_line_changes as f64 / w.total_lines_per_point,
            w.total_lines_cap,
        );
        let largest_file = contribution(
            input.max_single_file_change as f64 / w.max_file_lines_per_point,
            w.max_file_cap,
        );
        let body = contribution(input.body_length as f64 / w.body_chars_per_point, w.body_cap);
        let directories = contribution(
            input.distinct_directories as f64 * w.points_per_directory,
            w.directory_cap,
        );
        let tests = if input.test_touched { w.test_bonus } else { 0.0 };

        let total = round2(code_files + total_lines + largest_file + body + directories + tests)
            .clamp(0.0, 100.0);

        ScoreBreakdown {
            code_files,
            total_lines,
            largest_file,
            body,
            directories,
            tests,
            total,
            label: ComplexityLabel::for_total(total),
        }
    }
}
