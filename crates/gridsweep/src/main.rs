use anyhow::{Context, Result};
use gridsweep::{
    GridSweeper, SweepConfig,
    client::RecordingPause,
    places::{Bounds, FixedBounds, Geocoder},
    synthetic::{BERLIN_BOUNDS, SyntheticPlaces},
    tuning::{TuningGrid, run_parameter_sweep},
};
use tracing::{Level, info, warn};

const DEFAULT_SEED: u64 = 42;

fn main() -> Result<()> {
    gridsweep::init_logging(Level::INFO)?;

    let config = SweepConfig::from_env().context("Invalid GRIDSWEEP_* configuration")?;
    let seed = match std::env::var("GRIDSWEEP_SEED") {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("GRIDSWEEP_SEED: invalid value '{raw}'"))?,
        Err(_) => DEFAULT_SEED,
    };
    let tune = std::env::var("GRIDSWEEP_TUNE").is_ok_and(|v| matches!(v.trim(), "1" | "true"));

    info!(
        region = %config.region,
        category = %config.category,
        dry_run = config.dry_run,
        call_budget = config.call_budget,
        output_dir = ?config.output_dir,
        "Configuration loaded"
    );

    if tune {
        anyhow::ensure!(
            config.dry_run,
            "Parameter tuning only runs against the synthetic provider, set GRIDSWEEP_DRY_RUN=1"
        );
        let bounds = resolve_bounds(&config, &FixedBounds(BERLIN_BOUNDS))?;
        let report = run_parameter_sweep(&config, &bounds, &TuningGrid::default(), || {
            SyntheticPlaces::berlin(seed)
        })?;
        println!("{report}");
        return Ok(());
    }

    if config.dry_run {
        run_dry(config, seed)
    } else {
        run_live(config)
    }
}

fn resolve_bounds(config: &SweepConfig, geocoder: &impl Geocoder) -> Result<Bounds> {
    if let Some(bounds) = config.region.fixed_bounds() {
        return Ok(bounds);
    }
    let location = config.region.to_string();
    geocoder
        .bounding_box(&location)
        .with_context(|| format!("Could not resolve '{location}' to a bounding box"))
}

fn run_dry(config: SweepConfig, seed: u64) -> Result<()> {
    if config.region.fixed_bounds().is_none() {
        warn!(region = %config.region, "Dry runs do not geocode, sweeping central Berlin");
    }
    let bounds = resolve_bounds(&config, &FixedBounds(BERLIN_BOUNDS))?;

    let mut sweeper = GridSweeper::new(config, SyntheticPlaces::berlin(seed), RecordingPause::new())?;
    let summary = sweeper.run(&bounds)?;
    let skipped_wait = sweeper.adapter().pauser().total();
    info!(skipped_wait = ?skipped_wait, "Dry run finished without sleeping");
    println!("{summary}");
    Ok(())
}

#[cfg(feature = "live_api")]
fn run_live(config: SweepConfig) -> Result<()> {
    use gridsweep::{client::ThreadPause, places::GooglePlacesClient};

    let client = GooglePlacesClient::from_env()?;
    let bounds = resolve_bounds(&config, &client)?;

    let mut sweeper = GridSweeper::new(config, client, ThreadPause)?;
    let summary = sweeper.run(&bounds)?;
    println!("{summary}");
    Ok(())
}

#[cfg(not(feature = "live_api"))]
fn run_live(_config: SweepConfig) -> Result<()> {
    anyhow::bail!("Built without the live_api feature, set GRIDSWEEP_DRY_RUN=1 for a synthetic run")
}
