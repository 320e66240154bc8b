//! Search point lattices.
//!
//! Two generators live here: the region-wide coarse grid that seeds a sweep, and the
//! disk-shaped fine grid laid over a coarse point whose query came back saturated.
//! Every point is rounded to [`COORD_DECIMALS`](crate::geometry::COORD_DECIMALS)
//! places on construction, and that rounded pair plus the [`PointKind`] is the
//! point's identity in the progress ledger.

use std::{fmt, str::FromStr};

use gridsweep_places::{Bounds, LatLng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geometry::{
    haversine_distance_m, meters_to_lat_degrees, meters_to_lng_degrees, round_coord,
    round_lat_lng,
};

/// Which lattice a point belongs to. Persisted as `standard` / `mini`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PointKind {
    /// Region-wide grid point.
    #[serde(rename = "standard")]
    Coarse,
    /// Refinement grid point around a saturated coarse point.
    #[serde(rename = "mini")]
    Fine,
}

impl PointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coarse => "standard",
            Self::Fine => "mini",
        }
    }
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Coarse),
            "mini" => Ok(Self::Fine),
            other => Err(format!("unknown point kind '{other}'")),
        }
    }
}

/// Ledger identity of a point: coordinates in integer micro-degrees plus kind.
///
/// Integers make the key hashable and immune to float formatting differences
/// between the run that wrote a ledger line and the run that reads it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointKey {
    lat_e6: i64,
    lng_e6: i64,
    kind: PointKind,
}

impl PointKey {
    pub fn new(lat: f64, lng: f64, kind: PointKind) -> Self {
        Self {
            lat_e6: (round_coord(lat) * 1e6).round() as i64,
            lng_e6: (round_coord(lng) * 1e6).round() as i64,
            kind,
        }
    }

    pub fn kind(&self) -> PointKind {
        self.kind
    }

    pub fn location(&self) -> LatLng {
        LatLng::new(self.lat_e6 as f64 / 1e6, self.lng_e6 as f64 / 1e6)
    }
}

impl fmt::Display for PointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.location();
        write!(f, "{},{},{}", location.lat, location.lng, self.kind)
    }
}

/// A single place to issue a nearby search from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchPoint {
    location: LatLng,
    kind: PointKind,
}

impl SearchPoint {
    pub fn new(lat: f64, lng: f64, kind: PointKind) -> Self {
        Self {
            location: round_lat_lng(LatLng::new(lat, lng)),
            kind,
        }
    }

    pub fn coarse(lat: f64, lng: f64) -> Self {
        Self::new(lat, lng, PointKind::Coarse)
    }

    pub fn fine(lat: f64, lng: f64) -> Self {
        Self::new(lat, lng, PointKind::Fine)
    }

    pub fn location(&self) -> LatLng {
        self.location
    }

    pub fn lat(&self) -> f64 {
        self.location.lat
    }

    pub fn lng(&self) -> f64 {
        self.location.lng
    }

    pub fn kind(&self) -> PointKind {
        self.kind
    }

    pub fn key(&self) -> PointKey {
        PointKey::new(self.location.lat, self.location.lng, self.kind)
    }
}

impl fmt::Display for SearchPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.location)
    }
}

/// Cover `bounds` with coarse points `step_m` apart.
///
/// Rows run south to north; each row runs west to east with a longitude step
/// recomputed for that row's latitude. The final row and column are allowed to
/// overshoot the bound so the far edges are never left uncovered.
pub fn generate_coverage_grid(bounds: &Bounds, step_m: f64) -> Vec<SearchPoint> {
    if !bounds.is_valid() {
        warn!(%bounds, "Refusing to build a grid over invalid bounds");
        return Vec::new();
    }
    if !(step_m.is_finite() && step_m > 0.0) {
        warn!(step_m, "Grid step must be a positive number of meters");
        return Vec::new();
    }

    let lat_step = meters_to_lat_degrees(step_m);
    let mut points = Vec::new();

    for row in 0usize.. {
        let lat = bounds.min_lat + row as f64 * lat_step;
        let lng_step = meters_to_lng_degrees(step_m, lat);

        for col in 0usize.. {
            let lng = bounds.min_lng + col as f64 * lng_step;
            points.push(SearchPoint::coarse(lat, lng));
            if lng >= bounds.max_lng {
                break;
            }
        }

        if lat >= bounds.max_lat {
            break;
        }
    }

    debug!(
        points = points.len(),
        step_m, "Generated coverage grid"
    );
    points
}

/// Lattice of fine points `step_m` apart covering the disk of `radius_m` around
/// `center`.
///
/// The square lattice has a half-extent of `ceil(radius / step)` steps so the disk
/// is always reached, and the center itself is always part of the result.
pub fn generate_fine_grid(center: LatLng, radius_m: f64, step_m: f64) -> Vec<SearchPoint> {
    let center = round_lat_lng(center);
    if !(radius_m.is_finite() && radius_m >= 0.0) {
        warn!(radius_m, "Fine grid radius must be a non-negative number of meters");
        return Vec::new();
    }
    if !(step_m.is_finite() && step_m > 0.0) {
        warn!(step_m, "Fine grid step must be positive, covering the center only");
        return vec![SearchPoint::fine(center.lat, center.lng)];
    }

    let half_extent = (radius_m / step_m).ceil() as i64;
    let lat_step = meters_to_lat_degrees(step_m);
    let lng_step = meters_to_lng_degrees(step_m, center.lat);

    let mut points = Vec::new();
    for i in -half_extent..=half_extent {
        for j in -half_extent..=half_extent {
            let point = SearchPoint::fine(
                center.lat + i as f64 * lat_step,
                center.lng + j as f64 * lng_step,
            );
            if haversine_distance_m(center, point.location()) <= radius_m {
                points.push(point);
            }
        }
    }
    points
}
