//! Run configuration.
//!
//! [`SweepConfig`] holds every knob of a run with defaults matching the reference
//! constants; [`SweepConfigBuilder`] offers presets and validation, and
//! [`SweepConfig::from_env`] layers `GRIDSWEEP_*` variables on top of the defaults.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use gridsweep_places::{Bounds, MAX_SEARCH_RADIUS_M};
use tracing::warn;

use crate::{
    client::{AdapterSettings, MIN_PAGINATION_WAIT},
    error::{GridSweepError, Result},
};

pub const OUTPUT_DIR_DEFAULT: &str = "./gridsweep_data";
pub const DEFAULT_LOCATION: &str = "Berlin, Germany";
pub const DEFAULT_CATEGORY: &str = "physiotherapist";

/// Predefined small areas for trial runs without geocoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestArea {
    Alexanderplatz,
    Tiergarten,
    Kreuzberg,
    Friedrichstrasse,
}

impl TestArea {
    pub const ALL: [Self; 4] = [
        Self::Alexanderplatz,
        Self::Tiergarten,
        Self::Kreuzberg,
        Self::Friedrichstrasse,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Alexanderplatz => "alexanderplatz",
            Self::Tiergarten => "tiergarten",
            Self::Kreuzberg => "kreuzberg",
            Self::Friedrichstrasse => "friedrichstrasse",
        }
    }

    pub fn bounds(self) -> Bounds {
        match self {
            Self::Alexanderplatz => Bounds::new(52.5150, 13.4050, 52.5250, 13.4150),
            Self::Tiergarten => Bounds::new(52.5100, 13.3500, 52.5200, 13.3600),
            Self::Kreuzberg => Bounds::new(52.4900, 13.3900, 52.5000, 13.4000),
            Self::Friedrichstrasse => Bounds::new(52.5000, 13.3850, 52.5300, 13.3950),
        }
    }
}

impl fmt::Display for TestArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TestArea {
    type Err = GridSweepError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|area| area.name() == wanted)
            .ok_or_else(|| {
                GridSweepError::ConfigError(format!(
                    "Unknown test area '{s}', expected one of: {}",
                    Self::ALL.map(Self::name).join(", ")
                ))
            })
    }
}

/// The area a run covers.
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    /// Free-text location, geocoded once at startup.
    Place(String),
    TestArea(TestArea),
    Bounds(Bounds),
}

impl Region {
    /// Fixed bounds, if the region does not need geocoding.
    pub fn fixed_bounds(&self) -> Option<Bounds> {
        match self {
            Self::Place(_) => None,
            Self::TestArea(area) => Some(area.bounds()),
            Self::Bounds(bounds) => Some(*bounds),
        }
    }

    /// File-name friendly label, used to keep the state of different runs apart.
    pub fn label(&self) -> String {
        match self {
            Self::Place(location) => slug(location),
            Self::TestArea(area) => format!("test_{}", area.name()),
            Self::Bounds(b) => slug(&format!(
                "bounds_{:.4}_{:.4}_{:.4}_{:.4}",
                b.min_lat, b.min_lng, b.max_lat, b.max_lng
            )),
        }
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::Place(DEFAULT_LOCATION.to_string())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Place(location) => f.write_str(location),
            Self::TestArea(area) => write!(f, "test area {area}"),
            Self::Bounds(bounds) => write!(f, "bounds {bounds}"),
        }
    }
}

/// All parameters of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub region: Region,
    pub category: String,
    /// Radius of every coarse query, in meters.
    pub initial_radius_m: f64,
    /// Distance between neighbouring coarse points, in meters.
    pub grid_step_m: f64,
    /// Result count at which a coarse query is presumed truncated.
    pub subdivision_threshold: usize,
    pub fine_radius_divisor: f64,
    pub overlap_factor: f64,
    /// Fine points closer than `fine_radius * proximity_factor` to an already
    /// searched fine area are suppressed.
    pub proximity_factor: f64,
    pub near_limit_warning: usize,
    /// Zero means unlimited.
    pub call_budget: u64,
    pub dry_run: bool,
    pub pagination_wait: Duration,
    pub coarse_delay: Duration,
    pub fine_delay: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_rate_limit_retries: u32,
    pub max_transport_retries: u32,
    pub max_coarse_points: Option<usize>,
    pub output_dir: PathBuf,
    pub show_progress: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            region: Region::default(),
            category: DEFAULT_CATEGORY.to_string(),
            initial_radius_m: 750.0,
            grid_step_m: 750.0,
            subdivision_threshold: 45,
            fine_radius_divisor: 3.0,
            overlap_factor: 1.0,
            proximity_factor: 0.5,
            near_limit_warning: 58,
            call_budget: 0,
            dry_run: false,
            pagination_wait: MIN_PAGINATION_WAIT,
            coarse_delay: Duration::from_secs(1),
            fine_delay: Duration::from_millis(500),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            max_rate_limit_retries: 50,
            max_transport_retries: 2,
            max_coarse_points: None,
            output_dir: default_output_dir(),
            show_progress: true,
        }
    }
}

impl SweepConfig {
    pub fn builder() -> SweepConfigBuilder {
        SweepConfigBuilder::new()
    }

    pub fn fine_radius_m(&self) -> f64 {
        self.initial_radius_m / self.fine_radius_divisor
    }

    pub fn fine_step_m(&self) -> f64 {
        self.fine_radius_m() * self.overlap_factor
    }

    pub fn proximity_threshold_m(&self) -> f64 {
        self.fine_radius_m() * self.proximity_factor
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            pagination_wait: self.pagination_wait,
            backoff_base: self.backoff_base,
            backoff_max: self.backoff_max,
            max_rate_limit_retries: self.max_rate_limit_retries,
            max_transport_retries: self.max_transport_retries,
            call_budget: self.call_budget,
        }
    }

    pub fn run_files(&self) -> RunFiles {
        RunFiles::new(
            &self.output_dir,
            &self.category,
            &self.region.label(),
            self.dry_run,
        )
    }

    /// Check every parameter, clamping the pagination wait to the service minimum.
    pub fn validate(mut self) -> Result<Self> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(GridSweepError::ConfigError(format!(
                    "{name} must be a positive number, got {value}"
                )))
            }
        };
        positive("initial_radius_m", self.initial_radius_m)?;
        positive("grid_step_m", self.grid_step_m)?;
        positive("fine_radius_divisor", self.fine_radius_divisor)?;
        positive("overlap_factor", self.overlap_factor)?;

        if self.initial_radius_m > MAX_SEARCH_RADIUS_M {
            return Err(GridSweepError::ConfigError(format!(
                "initial_radius_m must not exceed {MAX_SEARCH_RADIUS_M} m, got {}",
                self.initial_radius_m
            )));
        }
        if !(self.proximity_factor.is_finite() && self.proximity_factor >= 0.0) {
            return Err(GridSweepError::ConfigError(format!(
                "proximity_factor must be non-negative, got {}",
                self.proximity_factor
            )));
        }
        if self.subdivision_threshold == 0 {
            return Err(GridSweepError::ConfigError(
                "subdivision_threshold must be at least 1".into(),
            ));
        }
        if self.category.trim().is_empty() {
            return Err(GridSweepError::ConfigError("category must not be empty".into()));
        }
        if self.backoff_base.is_zero() || self.backoff_base > self.backoff_max {
            return Err(GridSweepError::ConfigError(format!(
                "backoff must satisfy 0 < base <= max, got {:?} and {:?}",
                self.backoff_base, self.backoff_max
            )));
        }
        match &self.region {
            Region::Place(location) if location.trim().is_empty() => {
                return Err(GridSweepError::ConfigError("location must not be empty".into()));
            }
            Region::Bounds(bounds) if !bounds.is_valid() => {
                return Err(GridSweepError::ConfigError(format!("invalid bounds {bounds}")));
            }
            _ => {}
        }
        if self.pagination_wait < MIN_PAGINATION_WAIT {
            warn!(
                requested = ?self.pagination_wait,
                minimum = ?MIN_PAGINATION_WAIT,
                "Pagination wait raised to the service minimum"
            );
            self.pagination_wait = MIN_PAGINATION_WAIT;
        }
        Ok(self)
    }

    /// Defaults overridden by `GRIDSWEEP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder = SweepConfigBuilder::new();

        if let Some(location) = get("GRIDSWEEP_LOCATION") {
            builder = builder.location(location);
        }
        if let Some(area) = get("GRIDSWEEP_TEST_AREA") {
            builder = builder.test_area(area.parse()?);
        }
        if let Some(category) = get("GRIDSWEEP_CATEGORY") {
            builder = builder.category(category);
        }
        if let Some(v) = parse_var(&get, "GRIDSWEEP_RADIUS")? {
            builder = builder.initial_radius(v);
        }
        if let Some(v) = parse_var(&get, "GRIDSWEEP_GRID_STEP")? {
            builder = builder.grid_step(v);
        }
        if let Some(v) = parse_var(&get, "GRIDSWEEP_THRESHOLD")? {
            builder = builder.subdivision_threshold(v);
        }
        if let Some(v) = parse_var(&get, "GRIDSWEEP_FINE_DIVISOR")? {
            builder = builder.fine_radius_divisor(v);
        }
        if let Some(v) = parse_var(&get, "GRIDSWEEP_OVERLAP")? {
            builder = builder.overlap_factor(v);
        }
        if let Some(v) = parse_var(&get, "GRIDSWEEP_CALL_BUDGET")? {
            builder = builder.call_budget(v);
        }
        if let Some(v) = parse_var(&get, "GRIDSWEEP_MAX_COARSE_POINTS")? {
            builder = builder.max_coarse_points(v);
        }
        if let Some(v) = parse_flag(&get, "GRIDSWEEP_DRY_RUN")? {
            builder = builder.dry_run(v);
        }
        if let Some(v) = parse_flag(&get, "GRIDSWEEP_PROGRESS")? {
            builder = builder.show_progress(v);
        }
        if let Some(secs) = parse_var::<f64>(&get, "GRIDSWEEP_COARSE_DELAY_SECS")? {
            builder = builder.coarse_delay(duration_from_secs("GRIDSWEEP_COARSE_DELAY_SECS", secs)?);
        }
        if let Some(secs) = parse_var::<f64>(&get, "GRIDSWEEP_FINE_DELAY_SECS")? {
            builder = builder.fine_delay(duration_from_secs("GRIDSWEEP_FINE_DELAY_SECS", secs)?);
        }
        if let Some(dir) = get("GRIDSWEEP_OUTPUT_DIR") {
            builder = builder.output_dir(dir);
        }
        builder.build()
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                GridSweepError::ConfigError(format!("{key}: invalid value '{raw}': {e}"))
            })
        })
        .transpose()
}

fn parse_flag(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    get(key)
        .map(|raw| match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(GridSweepError::ConfigError(format!(
                "{key}: expected a boolean, got '{raw}'"
            ))),
        })
        .transpose()
}

fn duration_from_secs(key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| GridSweepError::ConfigError(format!("{key}: {e}")))
}

/// Builder for [`SweepConfig`] with presets for common area types.
#[derive(Debug, Clone, Default)]
pub struct SweepConfigBuilder {
    config: SweepConfig,
}

impl SweepConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SweepConfig::default(),
        }
    }

    /// Smaller queries for city centres where most coarse points saturate.
    pub fn dense_urban() -> Self {
        let mut builder = Self::new();
        builder.config.initial_radius_m = 500.0;
        builder.config.grid_step_m = 500.0;
        builder.config.subdivision_threshold = 45;
        builder.config.fine_radius_divisor = 3.0;
        builder
    }

    /// Wide queries for suburbs and rural areas where saturation is rare.
    pub fn sparse() -> Self {
        let mut builder = Self::new();
        builder.config.initial_radius_m = 1500.0;
        builder.config.grid_step_m = 1500.0;
        builder.config.subdivision_threshold = 50;
        builder.config.fine_radius_divisor = 2.5;
        builder
    }

    /// A small synthetic run over Alexanderplatz with no courtesy delays.
    pub fn quick_test() -> Self {
        let mut builder = Self::new();
        builder.config.region = Region::TestArea(TestArea::Alexanderplatz);
        builder.config.dry_run = true;
        builder.config.call_budget = 200;
        builder.config.coarse_delay = Duration::ZERO;
        builder.config.fine_delay = Duration::ZERO;
        builder.config.show_progress = false;
        builder
    }

    /// Sweep a named location, resolved to bounds through the geocoder.
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.config.region = Region::Place(location.into());
        self
    }

    /// Sweep one of the predefined test areas.
    pub fn test_area(mut self, area: TestArea) -> Self {
        self.config.region = Region::TestArea(area);
        self
    }

    /// Sweep an explicit bounding box.
    pub fn bounds(mut self, bounds: Bounds) -> Self {
        self.config.region = Region::Bounds(bounds);
        self
    }

    /// Place category passed to every search.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.config.category = category.into();
        self
    }

    /// Coarse query radius in meters.
    pub fn initial_radius(mut self, meters: f64) -> Self {
        self.config.initial_radius_m = meters;
        self
    }

    /// Spacing of the coarse grid in meters.
    pub fn grid_step(mut self, meters: f64) -> Self {
        self.config.grid_step_m = meters;
        self
    }

    /// Result count at which a coarse point is refined.
    pub fn subdivision_threshold(mut self, threshold: usize) -> Self {
        self.config.subdivision_threshold = threshold;
        self
    }

    /// Fine query radius is the coarse radius divided by this.
    pub fn fine_radius_divisor(mut self, divisor: f64) -> Self {
        self.config.fine_radius_divisor = divisor;
        self
    }

    /// Fine grid step as a multiple of the fine radius.
    pub fn overlap_factor(mut self, factor: f64) -> Self {
        self.config.overlap_factor = factor;
        self
    }

    /// Skip fine points closer than `fine_radius * factor` to a searched fine area.
    pub fn proximity_factor(mut self, factor: f64) -> Self {
        self.config.proximity_factor = factor;
        self
    }

    /// Result count that gets logged as close to the provider cap.
    pub fn near_limit_warning(mut self, results: usize) -> Self {
        self.config.near_limit_warning = results;
        self
    }

    /// Zero disables the budget.
    pub fn call_budget(mut self, calls: u64) -> Self {
        self.config.call_budget = calls;
        self
    }

    /// Use the synthetic provider and keep output apart from live runs.
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.config.dry_run = enabled;
        self
    }

    /// Wait before each continuation page, raised to at least 2 s.
    pub fn pagination_wait(mut self, wait: Duration) -> Self {
        self.config.pagination_wait = wait;
        self
    }

    /// Courtesy delay between coarse points.
    pub fn coarse_delay(mut self, delay: Duration) -> Self {
        self.config.coarse_delay = delay;
        self
    }

    /// Courtesy delay after each fine search.
    pub fn fine_delay(mut self, delay: Duration) -> Self {
        self.config.fine_delay = delay;
        self
    }

    /// Rate-limit backoff floor and ceiling.
    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.backoff_base = base;
        self.config.backoff_max = max;
        self
    }

    /// Retries of one request after `OVER_QUERY_LIMIT`.
    pub fn max_rate_limit_retries(mut self, retries: u32) -> Self {
        self.config.max_rate_limit_retries = retries;
        self
    }

    /// Retries of one request after a transport failure.
    pub fn max_transport_retries(mut self, retries: u32) -> Self {
        self.config.max_transport_retries = retries;
        self
    }

    /// Only sweep the first `points` coarse points.
    pub fn max_coarse_points(mut self, points: usize) -> Self {
        self.config.max_coarse_points = Some(points);
        self
    }

    /// Directory for the ledger, identifier and detail files.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Draw a progress bar on stderr.
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.config.show_progress = enabled;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<SweepConfig> {
        self.config.validate()
    }
}

/// Paths of every file a run reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFiles {
    pub dir: PathBuf,
    pub progress: PathBuf,
    pub place_ids: PathBuf,
    pub refinements: PathBuf,
    pub near_limit: PathBuf,
    pub details_dir: PathBuf,
}

impl RunFiles {
    pub fn new(dir: impl AsRef<Path>, category: &str, region_label: &str, dry_run: bool) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let mode = if dry_run { "dry_run" } else { "live" };
        let suffix = format!("{}_{region_label}_{mode}", slug(category));
        Self {
            progress: dir.join(format!("progress_{suffix}.txt")),
            place_ids: dir.join(format!("place_ids_{suffix}.txt")),
            refinements: dir.join(format!("refinements_{suffix}.txt")),
            near_limit: dir.join(format!("near_limit_log_{suffix}.txt")),
            details_dir: dir.join("detailed_place_data"),
            dir,
        }
    }
}

#[cfg(feature = "system-dirs")]
pub fn default_output_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "gridsweep").map_or_else(
        || PathBuf::from(OUTPUT_DIR_DEFAULT),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

#[cfg(not(feature = "system-dirs"))]
pub fn default_output_dir() -> PathBuf {
    PathBuf::from(OUTPUT_DIR_DEFAULT)
}

/// Lowercase, with every run of non-alphanumeric characters collapsed to `_`.
fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}
