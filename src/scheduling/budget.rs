// src/scheduling/budget.rs
//! Per-agent action budget
//!
//! A budget maps each [`ActionCategory`] to a target share (percent) of all
//! actions the agent performs. The scheduler does not keep a sliding window:
//! it compares the cumulative share of a category against its target, so
//! categories never run out, they throttle themselves toward their share.
//!
//! # Budget draw
//!
//! ```text
//! 100% ─┬─ consuming   ∈ [min_consuming, max_consuming]
//!       └─ production  = 100 - consuming
//!            ├─ voting      ∈ [min_voting, max_voting]   (of production)
//!            └─ rest        = 100 - voting
//!                 ├─ posting    = rest / d,  d ∈ [2, 4]
//!                 └─ commenting = rest - posting
//! ```
//!
//! Production sub-shares are rescaled by `production / 100`.

use crate::utils::errors::{EngineError, Result};
use crate::utils::random::RandomSource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Closed set of action categories, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Consume,
    Vote,
    Comment,
    Produce,
}

impl ActionCategory {
    /// All categories in declaration order
    pub const ALL: [ActionCategory; 4] = [
        ActionCategory::Consume,
        ActionCategory::Vote,
        ActionCategory::Comment,
        ActionCategory::Produce,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::Consume => "consume",
            ActionCategory::Vote => "vote",
            ActionCategory::Comment => "comment",
            ActionCategory::Produce => "produce",
        }
    }

    /// Categories that need generated work
    pub fn is_production(&self) -> bool {
        matches!(self, ActionCategory::Comment | ActionCategory::Produce)
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionCategory {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "consume" => Ok(ActionCategory::Consume),
            "vote" => Ok(ActionCategory::Vote),
            "comment" => Ok(ActionCategory::Comment),
            "produce" | "post" => Ok(ActionCategory::Produce),
            other => Err(EngineError::ConfigError(format!(
                "Unknown action category '{}'",
                other
            ))),
        }
    }
}

/// Ranges the per-cycle budget draw picks from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetLimits {
    pub min_consuming: i64,
    pub max_consuming: i64,
    pub min_voting: i64,
    pub max_voting: i64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            min_consuming: 60,
            max_consuming: 70,
            min_voting: 40,
            max_voting: 50,
        }
    }
}

impl BudgetLimits {
    /// Ranges must be ordered and within `[0, 100]`
    pub fn validate(&self) -> Result<()> {
        let ranges = [
            ("consuming", self.min_consuming, self.max_consuming),
            ("voting", self.min_voting, self.max_voting),
        ];
        for (name, min, max) in ranges {
            if !(0..=100).contains(&min) || !(0..=100).contains(&max) {
                return Err(EngineError::ConfigError(format!(
                    "{} range [{}, {}] must lie within [0, 100]",
                    name, min, max
                )));
            }
            if min > max {
                return Err(EngineError::ConfigError(format!(
                    "{} range is inverted: {} > {}",
                    name, min, max
                )));
            }
        }
        Ok(())
    }
}

/// Target percentage per category
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Budget {
    targets: HashMap<ActionCategory, i64>,
}

impl Budget {
    /// Budget with explicit targets
    pub fn from_targets(targets: impl IntoIterator<Item = (ActionCategory, i64)>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }

    /// Draw a budget for one work cycle
    pub fn draw(limits: &BudgetLimits, rng: &mut RandomSource) -> Self {
        let consuming = rng.int_in(limits.min_consuming, limits.max_consuming);
        let production = 100 - consuming;

        let prod_voting = rng.int_in(limits.min_voting, limits.max_voting);
        let mut prod_commenting = 100 - prod_voting;
        let prod_posting = prod_commenting / rng.int_in(2, 4);
        prod_commenting -= prod_posting;

        let budget = Self::from_targets([
            (ActionCategory::Consume, consuming),
            (ActionCategory::Vote, prod_voting * production / 100),
            (ActionCategory::Comment, prod_commenting * production / 100),
            (ActionCategory::Produce, prod_posting * production / 100),
        ]);

        debug!("Drew budget {:?}", budget.targets);
        budget
    }

    /// Apply flat `name -> percent` overrides; unknown names are ignored
    pub fn with_overrides(mut self, overrides: &HashMap<String, i64>) -> Self {
        for (name, pct) in overrides {
            match name.parse::<ActionCategory>() {
                Ok(category) => {
                    self.targets.insert(category, *pct);
                }
                Err(_) => debug!("Ignoring unknown budget key '{}'", name),
            }
        }
        self
    }

    /// Target for a category; `None` when not configured
    pub fn target(&self, category: ActionCategory) -> Option<i64> {
        self.targets.get(&category).copied()
    }

    /// Configured categories in declaration order
    pub fn categories(&self) -> Vec<ActionCategory> {
        ActionCategory::ALL
            .into_iter()
            .filter(|c| self.targets.contains_key(c))
            .collect()
    }

    pub fn targets(&self) -> &HashMap<ActionCategory, i64> {
        &self.targets
    }

    /// Share of total effort spent producing (everything but consuming)
    pub fn production(&self) -> i64 {
        100 - self.target(ActionCategory::Consume).unwrap_or(0)
    }
}

/// Decides whether an action may be performed now
#[derive(Debug, Clone)]
pub struct ActionBudgetScheduler {
    budget: Budget,
    counts: HashMap<ActionCategory, u64>,
}

impl ActionBudgetScheduler {
    /// Scheduler with zeroed counters
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            counts: HashMap::new(),
        }
    }

    /// Redraw the budget for a new work cycle and reset the counters
    pub fn begin_cycle(
        &mut self,
        limits: &BudgetLimits,
        overrides: &HashMap<String, i64>,
        rng: &mut RandomSource,
    ) {
        self.budget = Budget::draw(limits, rng).with_overrides(overrides);
        self.counts.clear();
    }

    /// Cumulative share test: `round(100 * count / total) <= target`
    pub fn can_do(&self, category: ActionCategory) -> bool {
        let target = match self.budget.target(category) {
            Some(target) => target,
            None => return false,
        };

        self.current_pct(category) <= target
    }

    /// True when every other configured category is denied
    pub fn must_do(&self, category: ActionCategory) -> bool {
        self.budget
            .categories()
            .into_iter()
            .filter(|other| *other != category)
            .all(|other| !self.can_do(other))
    }

    /// Count one executed action
    pub fn register(&mut self, category: ActionCategory) {
        *self.counts.entry(category).or_insert(0) += 1;
    }

    /// Pick the next category to attempt
    ///
    /// A forced category wins, first in declaration order when several are
    /// forced at once. Otherwise a uniform pick among permitted categories.
    pub fn choose(&self, rng: &mut RandomSource) -> Option<ActionCategory> {
        let configured = self.budget.categories();

        if let Some(forced) = configured.iter().copied().find(|c| self.must_do(*c)) {
            return Some(forced);
        }

        let permitted: Vec<ActionCategory> =
            configured.iter().copied().filter(|c| self.can_do(*c)).collect();

        rng.choose(&permitted)
            .copied()
            .or_else(|| configured.first().copied())
    }

    /// Current share of a category, rounded
    pub fn current_pct(&self, category: ActionCategory) -> i64 {
        let total = self.total();
        let count = self.count(category);
        let denominator = if total == 0 { 100.0 } else { total as f64 };
        (100.0 * count as f64 / denominator).round() as i64
    }

    pub fn count(&self, category: ActionCategory) -> u64 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn counts(&self) -> &HashMap<ActionCategory, u64> {
        &self.counts
    }

    pub fn targets(&self) -> &HashMap<ActionCategory, i64> {
        self.budget.targets()
    }
}
