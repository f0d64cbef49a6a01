//! Route planning: retrieval parameters and open-world detection.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::RetrievalParameters;

/// The planner's decision for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub parameters: RetrievalParameters,
    pub needs_web_fallback: bool,
    /// The trigger term that flagged the query as open-world, if any.
    pub matched_trigger: Option<String>,
}

/// Chooses retrieval parameters and decides whether web fallback is warranted.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlanner {
    defaults: RetrievalParameters,
    triggers: Vec<String>,
}

impl QueryPlanner {
    /// Create a planner. Trigger terms are matched case-insensitively.
    pub fn new(defaults: RetrievalParameters, triggers: &[String]) -> Self {
        let triggers = triggers
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { defaults, triggers }
    }

    /// Plan retrieval for `query`.
    ///
    /// Parameters from an earlier round are kept as they are; the defaults
    /// only apply on the first round.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`](crate::RagError::InvalidParameter) if
    /// the resulting parameters are invalid.
    pub fn plan(&self, query: &str, prior: Option<&RetrievalParameters>) -> Result<RoutePlan> {
        let parameters = prior.cloned().unwrap_or_else(|| self.defaults.clone());
        parameters.validate()?;

        let matched_trigger = self.open_world_trigger(query).map(str::to_string);
        Ok(RoutePlan { parameters, needs_web_fallback: matched_trigger.is_some(), matched_trigger })
    }

    /// The first trigger term contained in `query`.
    pub fn open_world_trigger(&self, query: &str) -> Option<&str> {
        let lower = query.to_lowercase();
        self.triggers.iter().find(|t| lower.contains(t.as_str())).map(String::as_str)
    }
}
