//! Deterministic stand-in for the nearby-search service, used by dry runs, the tuning
//! sweep and tests.
//!
//! The world is a set of layers: one jittered lattice of places per density hotspot
//! plus a sparse background lattice. Each lattice cell `(i, j)` of a layer draws its
//! place (or its absence) from a generator seeded by `(seed, category, layer, i, j)`
//! alone, so overlapping queries see exactly the same places and identifiers without
//! the world ever being materialised. Queries behave like the real service: results inside the query disk
//! sorted by distance, at most 60 in total, 20 per page, with continuation tokens.

use std::{fmt::Write as _, hash::BuildHasher};

use ahash::{AHashMap, RandomState};
use gridsweep_places::{
    Bounds, Geometry, LatLng, MAX_SEARCH_RADIUS_M, NearbyPage, NearbyRequest, NearbySearch, PAGE_SIZE,
    PROVIDER_RESULT_CAP, PlaceResult, SearchStatus,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::Value;
use tracing::trace;

use crate::geometry::{haversine_distance_m, meters_to_lat_degrees, meters_to_lng_degrees};

const STREETS: [&str; 8] = [
    "Karl-Marx-Allee",
    "Oranienstraße",
    "Torstraße",
    "Invalidenstraße",
    "Friedrichstraße",
    "Bergmannstraße",
    "Alte Schönhauser Straße",
    "Potsdamer Straße",
];

/// Berlin's geocoded viewport, used when a dry run cannot geocode its location.
pub const BERLIN_BOUNDS: Bounds = Bounds::new(52.3382, 13.0883, 52.6755, 13.7611);

/// How tightly places are packed in a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Density {
    High,
    Medium,
    Low,
}

impl Density {
    /// Lattice spacing in meters of latitude.
    fn spacing_m(self) -> f64 {
        match self {
            Self::High => 120.0,
            Self::Medium => 200.0,
            Self::Low => 600.0,
        }
    }

    /// Share of lattice cells holding a place.
    fn occupancy(self) -> f64 {
        match self {
            Self::High => 0.8,
            Self::Medium => 0.7,
            Self::Low => 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    pub name: String,
    pub center: LatLng,
    pub radius_m: f64,
    pub density: Density,
}

impl Hotspot {
    pub fn new(name: impl Into<String>, center: LatLng, radius_m: f64, density: Density) -> Self {
        Self {
            name: name.into(),
            center,
            radius_m,
            density,
        }
    }
}

/// Central Berlin: the hotspots the default dry run is built around.
pub fn berlin_hotspots() -> Vec<Hotspot> {
    vec![
        Hotspot::new(
            "Alexanderplatz",
            LatLng::new(52.520008, 13.404954),
            2000.0,
            Density::High,
        ),
        Hotspot::new(
            "Kreuzberg",
            LatLng::new(52.504556, 13.391794),
            1500.0,
            Density::Medium,
        ),
        Hotspot::new("Mitte", LatLng::new(52.531, 13.386), 1200.0, Density::High),
        Hotspot::new(
            "Tiergarten",
            LatLng::new(52.5182, 13.3765),
            1800.0,
            Density::Medium,
        ),
    ]
}

struct Layer<'a> {
    id: u64,
    label: &'a str,
    density: Density,
    extent: Option<(LatLng, f64)>,
}

/// Synthetic nearby-search provider.
#[derive(Debug, Clone)]
pub struct SyntheticPlaces {
    seed: u64,
    hotspots: Vec<Hotspot>,
    background: Option<Density>,
    rate_limit_every: Option<u64>,
    calls: u64,
    pending_pages: AHashMap<String, Vec<PlaceResult>>,
    next_token: u64,
}

impl SyntheticPlaces {
    pub fn new(seed: u64, hotspots: Vec<Hotspot>) -> Self {
        Self {
            seed,
            hotspots,
            background: Some(Density::Low),
            rate_limit_every: None,
            calls: 0,
            pending_pages: AHashMap::new(),
            next_token: 0,
        }
    }

    pub fn berlin(seed: u64) -> Self {
        Self::new(seed, berlin_hotspots())
    }

    pub fn with_background(mut self, background: Option<Density>) -> Self {
        self.background = background;
        self
    }

    /// Answer every `n`-th call with `OVER_QUERY_LIMIT`. Zero disables injection.
    pub fn with_rate_limit_every(mut self, n: u64) -> Self {
        self.rate_limit_every = (n > 0).then_some(n);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn layers(&self) -> Vec<Layer<'_>> {
        let background = self.background.map(|density| Layer {
            id: 0,
            label: "Outskirts",
            density,
            extent: None,
        });
        background
            .into_iter()
            .chain(self.hotspots.iter().zip(1u64..).map(|(spot, id)| Layer {
                id,
                label: &spot.name,
                density: spot.density,
                extent: Some((spot.center, spot.radius_m)),
            }))
            .collect()
    }

    /// Every place of the world inside the disk, nearest first.
    fn places_in_disk(&self, category: &str, center: LatLng, radius_m: f64) -> Vec<PlaceResult> {
        let world_key = world_key(self.seed, category);
        let lat_pad = meters_to_lat_degrees(radius_m);
        let poleward_lat = (center.lat.abs() + lat_pad).min(89.9);
        let lng_pad = meters_to_lng_degrees(radius_m, poleward_lat);

        let mut hits: Vec<(f64, PlaceResult)> = Vec::new();
        for layer in self.layers() {
            let out_of_reach = layer.extent.is_some_and(|(spot, spot_radius)| {
                haversine_distance_m(spot, center) > spot_radius + radius_m
            });
            if out_of_reach {
                continue;
            }
            let cell = meters_to_lat_degrees(layer.density.spacing_m());
            let rows = cell_range(center.lat, lat_pad, cell);
            let cols = cell_range(center.lng, lng_pad, cell);

            for i in rows.clone() {
                for j in cols.clone() {
                    let mut rng = cell_rng(world_key, layer.id, i, j);
                    if !rng.gen_bool(layer.density.occupancy()) {
                        continue;
                    }
                    let location = LatLng::new(
                        (i as f64 + 0.5 + rng.gen_range(-0.4..0.4)) * cell,
                        (j as f64 + 0.5 + rng.gen_range(-0.4..0.4)) * cell,
                    );
                    let outside_layer = layer.extent.is_some_and(|(spot, spot_radius)| {
                        haversine_distance_m(spot, location) > spot_radius
                    });
                    if outside_layer {
                        continue;
                    }
                    let distance = haversine_distance_m(center, location);
                    if distance <= radius_m {
                        hits.push((distance, make_place(category, &layer, i, j, &mut rng, location)));
                    }
                }
            }
        }

        hits.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.place_id.cmp(&b.1.place_id))
        });
        hits.into_iter().map(|(_, place)| place).collect()
    }

    fn paginate(&mut self, mut places: Vec<PlaceResult>) -> NearbyPage {
        if places.len() <= PAGE_SIZE {
            return NearbyPage::ok(places, None);
        }
        let rest = places.split_off(PAGE_SIZE);
        let token = format!("synthetic-token-{}", self.next_token);
        self.next_token += 1;
        self.pending_pages.insert(token.clone(), rest);
        NearbyPage::ok(places, Some(token))
    }
}

impl NearbySearch for SyntheticPlaces {
    fn nearby(&mut self, request: &NearbyRequest) -> NearbyPage {
        self.calls += 1;
        if self.rate_limit_every.is_some_and(|n| self.calls % n == 0) {
            trace!(call = self.calls, "Injecting rate limit");
            return NearbyPage::over_query_limit();
        }

        if let Some(token) = &request.page_token {
            return match self.pending_pages.remove(token) {
                Some(rest) => self.paginate(rest),
                None => NearbyPage::with_status(SearchStatus::Other("INVALID_REQUEST".into())),
            };
        }

        if !(request.radius_m > 0.0 && request.radius_m <= MAX_SEARCH_RADIUS_M) {
            return NearbyPage {
                error_message: Some(format!("radius {} out of range", request.radius_m)),
                ..NearbyPage::with_status(SearchStatus::Other("INVALID_REQUEST".into()))
            };
        }

        let mut places = self.places_in_disk(&request.category, request.location, request.radius_m);
        places.truncate(PROVIDER_RESULT_CAP);
        self.paginate(places)
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

fn cell_range(center: f64, pad: f64, cell: f64) -> std::ops::RangeInclusive<i64> {
    // Jitter moves a place up to 0.4 cells away from its cell center.
    let lo = ((center - pad) / cell).floor() as i64 - 1;
    let hi = ((center + pad) / cell).ceil() as i64 + 1;
    lo..=hi
}

fn make_place(
    category: &str,
    layer: &Layer<'_>,
    i: i64,
    j: i64,
    rng: &mut StdRng,
    location: LatLng,
) -> PlaceResult {
    let mut name = title_case(category);
    let _ = write!(name, " {} {}", layer.label, rng.gen_range(100..1000));

    let closed = rng.gen_bool(0.05);
    let street = STREETS[rng.gen_range(0..STREETS.len())];
    let mut place = PlaceResult {
        place_id: Some(format!("synthetic-{}-{i}-{j}", layer.id)),
        name: Some(name),
        geometry: Some(Geometry { location }),
        types: vec![
            category.to_string(),
            "point_of_interest".into(),
            "establishment".into(),
        ],
        business_status: Some(if closed { "CLOSED_TEMPORARILY" } else { "OPERATIONAL" }.into()),
        rating: Some(rng.gen_range(30.0_f64..=50.0).round() / 10.0),
        user_ratings_total: Some(rng.gen_range(1..=300)),
        plus_code: None,
        vicinity: Some(format!("{street} {}, Berlin", rng.gen_range(1..=120))),
        extra: serde_json::Map::new(),
    };
    place.extra.insert("synthetic".into(), Value::Bool(true));
    place
}

fn title_case(text: &str) -> String {
    text.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Per-category key mixed into every cell seed.
fn world_key(seed: u64, category: &str) -> u64 {
    RandomState::with_seeds(seed, 0x6772_6964, 0x7377_6565, 0x7000_0001).hash_one(category)
}

/// Generator for one lattice cell. It depends on its arguments only, so every query
/// touching the cell draws the same place.
fn cell_rng(world_key: u64, layer: u64, i: i64, j: i64) -> StdRng {
    let mut seed = [0u8; 32];
    for (chunk, part) in seed
        .chunks_exact_mut(8)
        .zip([world_key, layer, i as u64, j as u64])
    {
        chunk.copy_from_slice(&part.to_le_bytes());
    }
    StdRng::from_seed(seed)
}

#[cfg(test)]
mod tests {
    use ahash::AHashSet;

    use super::*;

    const ALEXANDERPLATZ: LatLng = LatLng::new(52.520008, 13.404954);

    fn request(location: LatLng, radius_m: f64) -> NearbyRequest {
        NearbyRequest::new(location, radius_m, "physiotherapist")
    }

    fn all_pages(provider: &mut SyntheticPlaces, request: &NearbyRequest) -> Vec<NearbyPage> {
        let mut pages = vec![provider.nearby(request)];
        while let Some(token) = pages.last().and_then(|p| p.next_page_token.clone()) {
            pages.push(provider.nearby(&request.continuation(token)));
        }
        pages
    }

    fn ids(pages: &[NearbyPage]) -> Vec<String> {
        pages
            .iter()
            .flat_map(|p| p.results.iter())
            .filter_map(|r| r.place_id.clone())
            .collect()
    }

    #[test]
    fn test_dense_area_saturates_across_three_pages() {
        let mut provider = SyntheticPlaces::berlin(7);
        let pages = all_pages(&mut provider, &request(ALEXANDERPLATZ, 750.0));

        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|p| p.status == SearchStatus::Ok));
        assert!(pages.iter().all(|p| p.results.len() == PAGE_SIZE));
        assert!(pages[2].next_page_token.is_none());

        let ids = ids(&pages);
        assert_eq!(ids.len(), PROVIDER_RESULT_CAP);
        assert_eq!(ids.iter().collect::<AHashSet<_>>().len(), ids.len());
    }

    #[test]
    fn test_results_are_inside_disk_and_sorted() {
        let mut provider = SyntheticPlaces::berlin(7);
        let pages = all_pages(&mut provider, &request(ALEXANDERPLATZ, 750.0));
        let distances: Vec<f64> = pages
            .iter()
            .flat_map(|p| p.results.iter())
            .map(|r| haversine_distance_m(ALEXANDERPLATZ, r.location().unwrap()))
            .collect();
        assert!(distances.iter().all(|d| *d <= 750.0));
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_same_seed_same_world() {
        let a = ids(&all_pages(&mut SyntheticPlaces::berlin(1), &request(ALEXANDERPLATZ, 400.0)));
        let b = ids(&all_pages(&mut SyntheticPlaces::berlin(1), &request(ALEXANDERPLATZ, 400.0)));
        let c = ids(&all_pages(&mut SyntheticPlaces::berlin(2), &request(ALEXANDERPLATZ, 400.0)));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_overlapping_queries_share_identifiers() {
        let mut provider = SyntheticPlaces::berlin(7);
        let east = LatLng::new(
            ALEXANDERPLATZ.lat,
            ALEXANDERPLATZ.lng + meters_to_lng_degrees(200.0, ALEXANDERPLATZ.lat),
        );
        let first: AHashSet<_> = ids(&all_pages(&mut provider, &request(ALEXANDERPLATZ, 750.0)))
            .into_iter()
            .collect();
        let second: AHashSet<_> = ids(&all_pages(&mut provider, &request(east, 750.0)))
            .into_iter()
            .collect();
        assert!(first.intersection(&second).count() > 0);
    }

    #[test]
    fn test_sparse_area_fits_one_page() {
        let mut provider = SyntheticPlaces::berlin(7);
        let page = provider.nearby(&request(LatLng::new(10.0, 10.0), 750.0));
        assert!(page.status.is_success());
        assert!(page.results.len() < PAGE_SIZE);
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_no_background_means_empty_outside_hotspots() {
        let mut provider = SyntheticPlaces::berlin(7).with_background(None);
        let page = provider.nearby(&request(LatLng::new(48.1, 11.5), 2000.0));
        assert_eq!(page.status, SearchStatus::ZeroResults);
    }

    #[test]
    fn test_rate_limit_injection_is_periodic() {
        let mut provider = SyntheticPlaces::berlin(7).with_rate_limit_every(3);
        let statuses: Vec<_> = (0..6)
            .map(|_| provider.nearby(&request(LatLng::new(10.0, 10.0), 100.0)).status)
            .collect();
        assert_eq!(statuses[2], SearchStatus::OverQueryLimit);
        assert_eq!(statuses[5], SearchStatus::OverQueryLimit);
        assert!(statuses[0].is_success() && statuses[1].is_success());
        assert_eq!(provider.calls(), 6);
    }

    #[test]
    fn test_bad_token_and_radius_are_rejected() {
        let mut provider = SyntheticPlaces::berlin(7);
        let stale = request(ALEXANDERPLATZ, 750.0).continuation("nope");
        assert_eq!(
            provider.nearby(&stale).status,
            SearchStatus::Other("INVALID_REQUEST".into())
        );
        assert!(!provider.nearby(&request(ALEXANDERPLATZ, 6000.0)).status.is_success());
    }

    #[test]
    fn test_place_fields() {
        let mut provider = SyntheticPlaces::berlin(7);
        let page = provider.nearby(&request(ALEXANDERPLATZ, 300.0));
        let place = &page.results[0];
        assert!(place.place_id.as_deref().unwrap().starts_with("synthetic-"));
        assert!(place.name.as_deref().unwrap().starts_with("Physiotherapist "));
        assert_eq!(place.types[0], "physiotherapist");
        let rating = place.rating.unwrap();
        assert!((3.0..=5.0).contains(&rating));
        assert_eq!(place.extra["synthetic"], Value::Bool(true));
    }

    #[test]
    fn test_cell_generator_is_stateless() {
        let key = world_key(7, "physiotherapist");
        let draw = |mut rng: StdRng| -> Vec<f64> { (0..4).map(|_| rng.gen_range(0.0..1.0)).collect() };
        assert_eq!(draw(cell_rng(key, 2, 10, -3)), draw(cell_rng(key, 2, 10, -3)));
        assert_ne!(
            cell_rng(key, 2, 10, -3).gen_range(0.0..1.0),
            cell_rng(key, 2, 10, -2).gen_range(0.0..1.0)
        );
        assert_ne!(world_key(7, "physiotherapist"), world_key(7, "dentist"));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("physiotherapist"), "Physiotherapist");
        assert_eq!(title_case("car_repair"), "Car Repair");
    }
}
