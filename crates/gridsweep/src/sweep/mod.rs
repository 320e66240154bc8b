//! The refinement orchestrator.
//!
//! [`GridSweeper`] walks the coarse grid once, in order. Per coarse point:
//!
//! 1. `complete` points are skipped;
//! 2. `refining` points (a previous run stopped mid-refinement) go straight to the
//!    fine pass;
//! 3. otherwise the point is searched through all pages and its entities persisted;
//!    below the subdivision threshold it is marked `complete`;
//! 4. at or above the threshold it is marked `refining` and a fine grid is laid over
//!    the coarse query area;
//! 5. each fine point is skipped if complete or suppressed if it sits close to an
//!    already searched fine area, otherwise searched, persisted and marked `complete`;
//! 6. the coarse point is marked `complete` once every fine point has been dealt with.
//!
//! Budget exhaustion stops the run; ledger and file errors abort it; any other
//! search failure abandons the point and the run moves on.

use std::time::{Duration, Instant};

use gridsweep_places::{Bounds, NearbyRequest, NearbySearch};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, instrument, warn};

use crate::{
    aggregate::PointAggregate,
    client::{ClientError, Pause, SearchAdapter, ThreadPause},
    config::{RunFiles, SweepConfig},
    error::Result,
    geometry::max_distance_from_center,
    grid::{SearchPoint, generate_coverage_grid, generate_fine_grid},
    ledger::{AuditLog, EntityStore, PointState, ProgressLedger, RunState},
};

mod summary;

pub use summary::{RunOutcome, SweepSummary};

/// What happened to one coarse point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointFlow {
    Skipped,
    Done,
    Failed,
    Stop,
}

/// Drives a full sweep against one provider, owning all run state.
pub struct GridSweeper<P, Z = ThreadPause> {
    config: SweepConfig,
    files: RunFiles,
    adapter: SearchAdapter<P, Z>,
    state: RunState,
    ledger: ProgressLedger,
    store: EntityStore,
    refinement_log: AuditLog,
    near_limit_log: AuditLog,
    summary: SweepSummary,
}

impl<P: NearbySearch, Z: Pause> GridSweeper<P, Z> {
    /// Rebuild run state from the files under `config.output_dir` and open them for
    /// appending.
    pub fn new(config: SweepConfig, provider: P, pause: Z) -> Result<Self> {
        let files = config.run_files();
        let state = RunState::load(&files.progress, &files.place_ids)?;
        let ledger = ProgressLedger::open(&files.progress)?;
        let store = EntityStore::open(&files.place_ids, &files.details_dir)?;
        let adapter = SearchAdapter::new(provider, pause, config.adapter_settings());

        Ok(Self {
            refinement_log: AuditLog::new(&files.refinements),
            near_limit_log: AuditLog::new(&files.near_limit),
            config,
            files,
            adapter,
            state,
            ledger,
            store,
            summary: SweepSummary::default(),
        })
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn files(&self) -> &RunFiles {
        &self.files
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn adapter(&self) -> &SearchAdapter<P, Z> {
        &self.adapter
    }

    pub fn into_adapter(self) -> SearchAdapter<P, Z> {
        self.adapter
    }

    /// Sweep the coarse grid over `bounds`.
    #[instrument(
        name = "Grid Sweep",
        skip_all,
        level = "info",
        fields(region = %self.config.region, category = %self.config.category)
    )]
    pub fn run(&mut self, bounds: &Bounds) -> Result<SweepSummary> {
        let started = Instant::now();
        let entities_before = self.state.known_entity_ids().len();
        let calls_before = self.adapter.calls_made();
        self.summary = SweepSummary::default();

        let mut points = generate_coverage_grid(bounds, self.config.grid_step_m);
        if let Some(limit) = self.config.max_coarse_points {
            points.truncate(limit);
        }
        self.summary.coarse_points = points.len();
        info!(
            %bounds,
            extent_m = max_distance_from_center(bounds).round(),
            coarse_points = points.len(),
            radius_m = self.config.initial_radius_m,
            provider = self.adapter.provider_name(),
            "Starting sweep"
        );

        let bar = self.progress_bar(points.len());
        for (idx, point) in points.iter().enumerate() {
            let flow = self.process_coarse(point)?;
            bar.inc(1);
            bar.set_message(format!("{} places", self.state.known_entity_ids().len()));

            match flow {
                PointFlow::Stop => {
                    self.summary.outcome = RunOutcome::BudgetExhausted;
                    break;
                }
                PointFlow::Done | PointFlow::Failed if idx + 1 < points.len() => {
                    self.adapter.pause(self.config.coarse_delay);
                }
                _ => {}
            }
        }
        bar.finish_and_clear();

        self.summary.calls_made = self.adapter.calls_made() - calls_before;
        self.summary.rate_limited_responses = self.adapter.rate_limited_responses();
        self.summary.unique_entities = self.state.known_entity_ids().len();
        self.summary.new_entities = self.summary.unique_entities - entities_before;
        self.summary.elapsed = started.elapsed();

        info!(
            outcome = %self.summary.outcome,
            calls = self.summary.calls_made,
            unique_entities = self.summary.unique_entities,
            refinements = self.summary.refinements_triggered,
            "Sweep finished"
        );
        Ok(self.summary.clone())
    }

    #[instrument(name = "Coarse point", skip_all, level = "debug", fields(point = %point))]
    fn process_coarse(&mut self, point: &SearchPoint) -> Result<PointFlow> {
        match self.state.state_of(point) {
            PointState::Complete => {
                self.summary.coarse_skipped += 1;
                return Ok(PointFlow::Skipped);
            }
            PointState::Refining => {
                info!(point = %point, "Resuming interrupted refinement");
                self.summary.refinements_resumed += 1;
                return self.refine(point);
            }
            PointState::Pending => {}
        }

        let radius = self.config.initial_radius_m;
        let aggregate = match self.search_point(point, radius) {
            Ok(aggregate) => aggregate,
            Err(e) => return Ok(self.client_failure(point, &e)),
        };
        self.summary.coarse_searched += 1;
        self.persist(&aggregate)?;

        let total = aggregate.total_results;
        if total >= self.config.near_limit_warning {
            warn!(
                point = %point,
                results = total,
                "Search close to the provider cap, threshold margin may be too thin"
            );
            self.near_limit_log.record(point.location(), total, radius)?;
            self.summary.near_limit_hits += 1;
        }

        if aggregate.hit_cap(self.config.subdivision_threshold) {
            info!(point = %point, results = total, "Result cap reached, refining");
            self.refinement_log.record(point.location(), total, radius)?;
            self.mark(point, PointState::Refining)?;
            self.summary.refinements_triggered += 1;
            self.refine(point)
        } else {
            self.mark(point, PointState::Complete)?;
            Ok(PointFlow::Done)
        }
    }

    /// Fine pass over a coarse point already marked `refining`.
    #[instrument(name = "Refine", skip_all, level = "debug", fields(point = %coarse))]
    fn refine(&mut self, coarse: &SearchPoint) -> Result<PointFlow> {
        let fine_radius = self.config.fine_radius_m();
        let proximity = self.config.proximity_threshold_m();
        let fine_points = generate_fine_grid(
            coarse.location(),
            self.config.initial_radius_m,
            self.config.fine_step_m(),
        );
        debug!(
            fine_points = fine_points.len(),
            fine_radius_m = fine_radius,
            "Generated fine grid"
        );

        let mut all_done = true;
        for fine in &fine_points {
            if self.state.is_complete(fine) {
                self.summary.fine_skipped += 1;
                continue;
            }
            if self.state.near_searched_fine_area(fine.location(), proximity) {
                self.summary.fine_suppressed += 1;
                continue;
            }

            match self.search_point(fine, fine_radius) {
                Ok(aggregate) => {
                    self.persist(&aggregate)?;
                    self.mark(fine, PointState::Complete)?;
                    self.summary.fine_searched += 1;
                }
                Err(e) => {
                    if self.client_failure(fine, &e) == PointFlow::Stop {
                        return Ok(PointFlow::Stop);
                    }
                    all_done = false;
                }
            }
            self.adapter.pause(self.config.fine_delay);
        }

        if all_done {
            self.mark(coarse, PointState::Complete)?;
            Ok(PointFlow::Done)
        } else {
            warn!(point = %coarse, "Fine pass incomplete, point stays refining");
            Ok(PointFlow::Failed)
        }
    }

    /// Search one point through every page.
    fn search_point(
        &mut self,
        point: &SearchPoint,
        radius_m: f64,
    ) -> std::result::Result<PointAggregate, ClientError> {
        let request = NearbyRequest::new(point.location(), radius_m, &self.config.category);
        let mut aggregate = PointAggregate::new();

        let mut page = self.adapter.search(&request)?;
        loop {
            aggregate.absorb(&page, self.state.known_entity_ids());
            let Some(token) = page.next_page_token.take() else {
                break;
            };
            page = self.adapter.next_page(&request, &token)?;
        }

        debug!(
            point = %point,
            pages = aggregate.pages,
            results = aggregate.total_results,
            new_unique = aggregate.newly_unique,
            "Point searched"
        );
        Ok(aggregate)
    }

    fn persist(&mut self, aggregate: &PointAggregate) -> Result<usize> {
        Ok(self
            .store
            .persist(&aggregate.entities, self.state.known_entity_ids_mut())?)
    }

    fn mark(&mut self, point: &SearchPoint, state: PointState) -> Result<()> {
        self.ledger.record(point, state)?;
        self.state.mark(point, state);
        Ok(())
    }

    fn client_failure(&mut self, point: &SearchPoint, error: &ClientError) -> PointFlow {
        if error.is_budget_exhausted() {
            info!(point = %point, %error, "Stopping run");
            PointFlow::Stop
        } else {
            warn!(point = %point, %error, "Search failed, point abandoned");
            self.summary.points_failed += 1;
            PointFlow::Failed
        }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} coarse points, {msg}")
        {
            bar.set_style(style.progress_chars("█░"));
        }
        bar.enable_steady_tick(Duration::from_millis(200));
        bar
    }
}
