//! The loop's finite state set and its transition table.
//!
//! ```text
//! REFINE_QUERY ─▶ PLAN_ROUTE ─▶ RETRIEVE ─▶ GRADE_EVIDENCE ──pass/exhausted──▶ GENERATE
//!      ▲                                      │  ▲    │                          │
//!      │                              retry   │  │    │ retry+web                ▼
//!      ├──────────────────────────────────────┘  └─ WEB_FALLBACK            GRADE_ANSWER
//!      │                                                                 retry │  │ pass
//!      ├───────────────────────────────────────────────────────────────────────┘  ▼
//!      │                          retry (hallucination policy = retry)      GROUND_CHECK
//!      └──────────────────────────────────────────────────────────────────────────┤
//!                                                                                 ▼
//!                                                                             TERMINAL
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// A state of the retrieval loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    RefineQuery,
    PlanRoute,
    Retrieve,
    GradeEvidence,
    WebFallback,
    Generate,
    GradeAnswer,
    GroundCheck,
    Terminal,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::RefineQuery,
        Stage::PlanRoute,
        Stage::Retrieve,
        Stage::GradeEvidence,
        Stage::WebFallback,
        Stage::Generate,
        Stage::GradeAnswer,
        Stage::GroundCheck,
        Stage::Terminal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RefineQuery => "REFINE_QUERY",
            Stage::PlanRoute => "PLAN_ROUTE",
            Stage::Retrieve => "RETRIEVE",
            Stage::GradeEvidence => "GRADE_EVIDENCE",
            Stage::WebFallback => "WEB_FALLBACK",
            Stage::Generate => "GENERATE",
            Stage::GradeAnswer => "GRADE_ANSWER",
            Stage::GroundCheck => "GROUND_CHECK",
            Stage::Terminal => "TERMINAL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Terminal)
    }

    /// Whether the stage's outcome is decided by a quality gate.
    pub fn is_gated(&self) -> bool {
        matches!(self, Stage::GradeEvidence | Stage::GradeAnswer | Stage::GroundCheck)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision a gated stage reached.
///
/// `Retry` and `Exhausted` are only produced after the shared round counter was
/// consumed; `Exhausted` means the ceiling has been reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Pass,
    Retry { web_fallback: bool },
    Exhausted,
}

/// The transition table.
///
/// Ungated stages ignore `gate`.
pub fn next_stage(stage: Stage, gate: Gate) -> Stage {
    match (stage, gate) {
        (Stage::RefineQuery, _) => Stage::PlanRoute,
        (Stage::PlanRoute, _) => Stage::Retrieve,
        (Stage::Retrieve, _) => Stage::GradeEvidence,

        (Stage::GradeEvidence, Gate::Pass) => Stage::Generate,
        (Stage::GradeEvidence, Gate::Retry { web_fallback: true }) => Stage::WebFallback,
        (Stage::GradeEvidence, Gate::Retry { web_fallback: false }) => Stage::RefineQuery,
        (Stage::GradeEvidence, Gate::Exhausted) => Stage::Generate,

        (Stage::WebFallback, _) => Stage::GradeEvidence,
        (Stage::Generate, _) => Stage::GradeAnswer,

        (Stage::GradeAnswer, Gate::Pass) => Stage::GroundCheck,
        (Stage::GradeAnswer, Gate::Retry { .. }) => Stage::RefineQuery,
        (Stage::GradeAnswer, Gate::Exhausted) => Stage::Terminal,

        (Stage::GroundCheck, Gate::Retry { .. }) => Stage::RefineQuery,
        (Stage::GroundCheck, Gate::Pass | Gate::Exhausted) => Stage::Terminal,

        (Stage::Terminal, _) => Stage::Terminal,
    }
}

/// Whether `from → to` is a loop-back edge, i.e. one that starts another round.
pub fn is_loop_back(from: Stage, to: Stage) -> bool {
    matches!(
        (from, to),
        (Stage::GradeEvidence, Stage::RefineQuery | Stage::WebFallback)
            | (Stage::GradeAnswer | Stage::GroundCheck, Stage::RefineQuery)
    )
}

/// One executed transition, kept for auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Stage,
    pub to: Stage,
    /// Value of the round counter after the transition.
    pub round_count: u32,
}
