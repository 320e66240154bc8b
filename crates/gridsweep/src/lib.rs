//! Gridsweep - adaptive grid crawler for radius-limited place search services
//!
//! Nearby-search services answer "what is within `r` meters of this point", cap every
//! query at a fixed number of results and page through them slowly. Gridsweep covers
//! a region with such queries anyway: it tiles the region with a coarse grid, notices
//! when a query came back saturated, and re-covers that query's area with a finer grid
//! of smaller queries. Progress is written to an append-only ledger so an interrupted
//! run picks up where it stopped without repeating completed searches.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use gridsweep::{GridSweeper, SweepConfigBuilder, synthetic::SyntheticPlaces, client::ThreadPause};
//!
//! let config = SweepConfigBuilder::quick_test().build()?;
//! let bounds = config.region.fixed_bounds().expect("test areas have bounds");
//!
//! let mut sweeper = GridSweeper::new(config, SyntheticPlaces::berlin(42), ThreadPause)?;
//! let summary = sweeper.run(&bounds)?;
//! println!("{summary}");
//! # Ok::<(), gridsweep::error::GridSweepError>(())
//! ```
//!
//! # Layout
//!
//! - [`geometry`] and [`grid`]: distances and the coarse and fine lattices
//! - [`client`]: call budget, rate-limit backoff and pagination around a provider
//! - [`aggregate`]: folding result pages into per-point tallies and entities
//! - [`ledger`]: the progress ledger, entity files and run-state replay
//! - [`sweep`]: the refinement orchestrator
//! - [`synthetic`] and [`tuning`]: offline provider and parameter sensitivity sweep
//!
//! The provider boundary (wire types, the `NearbySearch` trait and the live HTTP
//! client) lives in the `gridsweep-places` crate, re-exported as [`places`].

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

pub mod aggregate;
pub mod client;
pub mod config;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod ledger;
pub mod sweep;
pub mod synthetic;
pub mod tuning;

pub use aggregate::{Entity, PointAggregate, process_page};
pub use client::{CallBudget, ClientError, Pause, RateController, SearchAdapter};
pub use config::{Region, RunFiles, SweepConfig, SweepConfigBuilder, TestArea};
pub use error::{GridSweepError, Result};
pub use grid::{PointKind, SearchPoint, generate_coverage_grid, generate_fine_grid};
pub use gridsweep_places as places;
pub use ledger::{EntityStore, PointState, ProgressLedger, RunState};
pub use sweep::{GridSweeper, RunOutcome, SweepSummary};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Initialize logging for gridsweep.
///
/// Installs a fmt subscriber filtered by `RUST_LOG` when set, `level` otherwise,
/// with HTTP client internals kept at `warn`. Safe to call more than once.
///
/// ```rust
/// use gridsweep::init_logging;
/// use tracing::Level;
///
/// init_logging(Level::INFO)?;
/// # Ok::<(), gridsweep::error::GridSweepError>(())
/// ```
pub fn init_logging(level: impl Into<LevelFilter>) -> Result<&'static ()> {
    LOGGER_INIT.get_or_try_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level.into().to_string()))?
            .add_directive("hyper_util=warn".parse()?)
            .add_directive("reqwest=warn".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .init();
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_env() {
        let _ = init_logging(tracing::Level::WARN);
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        setup_test_env();
        assert!(init_logging(tracing::Level::DEBUG).is_ok());
    }

    #[test]
    fn test_reexports_cover_a_run() {
        setup_test_env();
        let config = SweepConfigBuilder::quick_test().build().unwrap();
        assert_eq!(config.region, Region::TestArea(TestArea::Alexanderplatz));
        let points = generate_coverage_grid(&TestArea::Alexanderplatz.bounds(), config.grid_step_m);
        assert!(points.iter().all(|p| p.kind() == PointKind::Coarse));
    }
}
