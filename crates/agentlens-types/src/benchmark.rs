//! Benchmark configuration (spec §3, §4.11). The statistical engine itself
//! lives in `agentlens-engine::benchmark`; this crate only owns the
//! persisted shape.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkStatus {
    Draft,
    Running,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    AvgCost,
    ErrorRate,
    ToolSuccessRate,
    CompletionRate,
    AvgTokens,
    AvgDuration,
}

impl Metric {
    /// Lower-is-better metrics declare a winner on lower mean; for
    /// `AvgTokens` no winner is ever declared (spec §4.11: "neutral").
    pub fn lower_is_better(&self) -> Option<bool> {
        match self {
            Self::AvgCost | Self::ErrorRate | Self::AvgDuration => Some(true),
            Self::CompletionRate | Self::ToolSuccessRate => Some(false),
            Self::AvgTokens => None,
        }
    }

    /// Whether this metric is naturally a proportion, eligible for the
    /// categorical (chi-squared) comparison path in addition to Welch's t.
    pub fn is_proportion(&self) -> bool {
        matches!(self, Self::CompletionRate | Self::ErrorRate | Self::ToolSuccessRate)
    }
}

/// Selects the statistical test a comparison uses. Proportion metrics
/// (`tool_success_rate`, `error_rate`, `completion_rate`) are treated as
/// continuous (Welch's t-test) by default; a caller can opt a proportion
/// metric into the categorical chi-squared path explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComparisonKind {
    #[default]
    Continuous,
    Categorical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkVariant {
    pub name: String,
    pub tag: String,
    pub sort_order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Benchmark {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub status: BenchmarkStatus,
    pub metrics: Vec<Metric>,
    pub min_sessions_per_variant: u32,
    pub variants: Vec<BenchmarkVariant>,
}
