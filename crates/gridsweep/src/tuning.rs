//! Parameter sensitivity sweep.
//!
//! Runs the orchestrator over every combination of coarse radius, subdivision
//! threshold and fine-radius divisor on the first few coarse points of a region,
//! each combination in a fresh temporary directory, and reports how many provider
//! calls each one needed for how many places.

use std::{fmt, time::Duration};

use gridsweep_places::{Bounds, NearbySearch};
use itertools::iproduct;
use tempfile::TempDir;
use tracing::{info, instrument};

use crate::{
    client::RecordingPause,
    config::SweepConfig,
    error::Result,
    sweep::{GridSweeper, SweepSummary},
};

/// The parameter values to combine.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningGrid {
    pub radii_m: Vec<f64>,
    pub thresholds: Vec<usize>,
    pub divisors: Vec<f64>,
    /// Coarse points searched per combination.
    pub max_coarse_points: usize,
}

impl Default for TuningGrid {
    fn default() -> Self {
        Self {
            radii_m: vec![300.0, 500.0, 750.0],
            thresholds: vec![45, 50, 55],
            divisors: vec![2.5, 3.0, 4.0],
            max_coarse_points: 10,
        }
    }
}

impl TuningGrid {
    pub fn combinations(&self) -> usize {
        self.radii_m.len() * self.thresholds.len() * self.divisors.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuningResult {
    pub radius_m: f64,
    pub threshold: usize,
    pub divisor: f64,
    pub summary: SweepSummary,
}

impl TuningResult {
    pub fn places_per_call(&self) -> f64 {
        self.summary.places_per_call()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TuningReport {
    pub results: Vec<TuningResult>,
}

impl TuningReport {
    /// The combination with the most places per call.
    pub fn best(&self) -> Option<&TuningResult> {
        self.results
            .iter()
            .max_by(|a, b| a.places_per_call().total_cmp(&b.places_per_call()))
    }
}

impl fmt::Display for TuningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>8} {:>9} {:>7} {:>6} {:>7} {:>11} {:>11}",
            "radius", "threshold", "divisor", "calls", "places", "refinements", "places/call"
        )?;
        for r in &self.results {
            writeln!(
                f,
                "{:>8.0} {:>9} {:>7.1} {:>6} {:>7} {:>11} {:>11.2}",
                r.radius_m,
                r.threshold,
                r.divisor,
                r.summary.calls_made,
                r.summary.unique_entities,
                r.summary.refinements_triggered,
                r.places_per_call()
            )?;
        }
        if let Some(best) = self.best() {
            write!(
                f,
                "best: radius {} m, threshold {}, divisor {} ({:.2} places/call)",
                best.radius_m,
                best.threshold,
                best.divisor,
                best.places_per_call()
            )?;
        }
        Ok(())
    }
}

/// Run every combination of `grid` over `bounds`, with a fresh provider from
/// `make_provider` for each.
///
/// The grid step follows the radius, courtesy delays are dropped and nothing sleeps.
#[instrument(name = "Parameter Sweep", skip_all, level = "info", fields(combinations = grid.combinations()))]
pub fn run_parameter_sweep<P, F>(
    base: &SweepConfig,
    bounds: &Bounds,
    grid: &TuningGrid,
    mut make_provider: F,
) -> Result<TuningReport>
where
    P: NearbySearch,
    F: FnMut() -> P,
{
    let mut report = TuningReport::default();

    for (&radius_m, &threshold, &divisor) in
        iproduct!(&grid.radii_m, &grid.thresholds, &grid.divisors)
    {
        let dir = TempDir::new()?;
        let config = SweepConfig {
            initial_radius_m: radius_m,
            grid_step_m: radius_m,
            subdivision_threshold: threshold,
            fine_radius_divisor: divisor,
            max_coarse_points: Some(grid.max_coarse_points),
            output_dir: dir.path().to_path_buf(),
            coarse_delay: Duration::ZERO,
            fine_delay: Duration::ZERO,
            show_progress: false,
            ..base.clone()
        }
        .validate()?;

        let mut sweeper = GridSweeper::new(config, make_provider(), RecordingPause::new())?;
        let summary = sweeper.run(bounds)?;
        info!(
            radius_m,
            threshold,
            divisor,
            calls = summary.calls_made,
            places = summary.unique_entities,
            "Combination finished"
        );
        report.results.push(TuningResult {
            radius_m,
            threshold,
            divisor,
            summary,
        });
    }
    Ok(report)
}
