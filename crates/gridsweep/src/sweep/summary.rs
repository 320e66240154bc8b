use std::{fmt, time::Duration};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunOutcome {
    #[default]
    Completed,
    /// The call budget ran out; everything written so far is kept.
    BudgetExhausted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::BudgetExhausted => "stopped: call budget exhausted",
        })
    }
}

/// End-of-run report. Always produced, including when the budget stops a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepSummary {
    pub outcome: RunOutcome,
    pub coarse_points: usize,
    pub coarse_searched: usize,
    pub coarse_skipped: usize,
    pub refinements_triggered: usize,
    pub refinements_resumed: usize,
    pub fine_searched: usize,
    pub fine_skipped: usize,
    pub fine_suppressed: usize,
    pub points_failed: usize,
    pub near_limit_hits: usize,
    pub calls_made: u64,
    pub rate_limited_responses: u64,
    pub unique_entities: usize,
    pub new_entities: usize,
    pub elapsed: Duration,
}

impl SweepSummary {
    /// Coarse and fine points whose searches ran to completion this run.
    pub fn points_processed(&self) -> usize {
        self.coarse_searched + self.fine_searched
    }

    pub fn searches_issued(&self) -> bool {
        self.calls_made > 0
    }

    /// New entities per provider call; zero when nothing was called.
    pub fn places_per_call(&self) -> f64 {
        if self.calls_made == 0 {
            0.0
        } else {
            self.new_entities as f64 / self.calls_made as f64
        }
    }
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sweep {} in {:.1?}", self.outcome, self.elapsed)?;
        writeln!(
            f,
            "  points processed:      {} ({} coarse, {} fine)",
            self.points_processed(),
            self.coarse_searched,
            self.fine_searched
        )?;
        writeln!(
            f,
            "  coarse grid:           {} points, {} already complete",
            self.coarse_points, self.coarse_skipped
        )?;
        writeln!(
            f,
            "  refinements:           {} triggered, {} resumed",
            self.refinements_triggered, self.refinements_resumed
        )?;
        writeln!(
            f,
            "  fine points skipped:   {} complete, {} near a searched area",
            self.fine_skipped, self.fine_suppressed
        )?;
        writeln!(f, "  points failed:         {}", self.points_failed)?;
        writeln!(f, "  near-limit searches:   {}", self.near_limit_hits)?;
        writeln!(
            f,
            "  calls made:            {} ({} rate limited)",
            self.calls_made, self.rate_limited_responses
        )?;
        write!(
            f,
            "  unique entities:       {} ({} new this run)",
            self.unique_entities, self.new_entities
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_places_per_call() {
        let mut summary = SweepSummary::default();
        assert_eq!(summary.places_per_call(), 0.0);
        summary.calls_made = 8;
        summary.new_entities = 20;
        assert_eq!(summary.places_per_call(), 2.5);
    }

    #[test]
    fn test_display_mentions_outcome_and_totals() {
        let summary = SweepSummary {
            outcome: RunOutcome::BudgetExhausted,
            coarse_searched: 3,
            fine_searched: 9,
            calls_made: 20,
            unique_entities: 140,
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.starts_with("Sweep stopped: call budget exhausted"));
        assert!(text.contains("points processed:      12 (3 coarse, 9 fine)"));
        assert!(text.contains("unique entities:       140 (0 new this run)"));
    }
}
