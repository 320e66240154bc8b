//! Wire types shared by every nearby-search provider.
//!
//! The shapes follow the Places "nearby search" JSON response closely enough that
//! the live client can deserialize straight into them, while staying small enough
//! for the synthetic and scripted providers to construct by hand.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hard upper bound the nearby-search service accepts for a query radius.
pub const MAX_SEARCH_RADIUS_M: f64 = 5000.0;

/// Results the service returns per page.
pub const PAGE_SIZE: usize = 20;

/// Total results the service will ever return for one query across all pages.
pub const PROVIDER_RESULT_CAP: usize = 60;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lng)
    }
}

/// Axis-aligned bounding box, south-west corner to north-east corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Build from `(min_lat, min_lng, max_lat, max_lng)`.
    pub const fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        }
    }

    pub fn from_corners(south_west: LatLng, north_east: LatLng) -> Self {
        Self::new(south_west.lat, south_west.lng, north_east.lat, north_east.lng)
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// South-west, south-east, north-west, north-east.
    pub fn corners(&self) -> [LatLng; 4] {
        [
            LatLng::new(self.min_lat, self.min_lng),
            LatLng::new(self.min_lat, self.max_lng),
            LatLng::new(self.max_lat, self.min_lng),
            LatLng::new(self.max_lat, self.max_lng),
        ]
    }

    /// Finite and not inverted. A degenerate (zero-area) box is still valid.
    pub fn is_valid(&self) -> bool {
        [self.min_lat, self.min_lng, self.max_lat, self.max_lng]
            .iter()
            .all(|v| v.is_finite())
            && self.min_lat <= self.max_lat
            && self.min_lng <= self.max_lng
            && (-90.0..=90.0).contains(&self.min_lat)
            && (-90.0..=90.0).contains(&self.max_lat)
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.4}, {:.4}, {:.4}, {:.4})",
            self.min_lat, self.min_lng, self.max_lat, self.max_lng
        )
    }
}

/// Response status of a single nearby-search call.
///
/// `RequestFailed` never comes from the service itself: providers report transport
/// errors and unparseable bodies with it so they are never mistaken for an empty page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SearchStatus {
    Ok,
    ZeroResults,
    OverQueryLimit,
    RequestFailed,
    Other(String),
}

impl SearchStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ok => "OK",
            Self::ZeroResults => "ZERO_RESULTS",
            Self::OverQueryLimit => "OVER_QUERY_LIMIT",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::Other(status) => status,
        }
    }

    /// `OK` and `ZERO_RESULTS` both mean the call itself worked.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::ZeroResults)
    }
}

impl From<String> for SearchStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "OK" => Self::Ok,
            "ZERO_RESULTS" => Self::ZeroResults,
            "OVER_QUERY_LIMIT" => Self::OverQueryLimit,
            "REQUEST_FAILED" => Self::RequestFailed,
            _ => Self::Other(value),
        }
    }
}

impl From<SearchStatus> for String {
    fn from(value: SearchStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub location: LatLng,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlusCode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compound_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_code: Option<String>,
}

/// One place as returned inside a nearby-search page.
///
/// Fields the engine does not interpret are kept in `extra` so the raw payload can
/// be persisted without loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ratings_total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plus_code: Option<PlusCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vicinity: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlaceResult {
    pub fn location(&self) -> Option<LatLng> {
        self.geometry.as_ref().map(|g| g.location)
    }

    /// The full record as JSON, including fields the engine does not model.
    pub fn raw_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One page of a nearby search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyPage {
    pub status: SearchStatus,
    #[serde(default)]
    pub results: Vec<PlaceResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl NearbyPage {
    pub fn ok(results: Vec<PlaceResult>, next_page_token: Option<String>) -> Self {
        if results.is_empty() && next_page_token.is_none() {
            return Self::zero_results();
        }
        Self {
            status: SearchStatus::Ok,
            results,
            next_page_token,
            error_message: None,
        }
    }

    pub fn zero_results() -> Self {
        Self::with_status(SearchStatus::ZeroResults)
    }

    pub fn over_query_limit() -> Self {
        Self::with_status(SearchStatus::OverQueryLimit)
    }

    /// A transport or decoding failure; never an empty success.
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::with_status(SearchStatus::RequestFailed)
        }
    }

    pub fn with_status(status: SearchStatus) -> Self {
        Self {
            status,
            results: Vec::new(),
            next_page_token: None,
            error_message: None,
        }
    }
}

/// Parameters of one nearby-search call. A continuation carries `page_token`; the
/// service ignores the other fields in that case but they are kept for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyRequest {
    pub location: LatLng,
    pub radius_m: f64,
    pub category: String,
    pub page_token: Option<String>,
}

impl NearbyRequest {
    pub fn new(location: LatLng, radius_m: f64, category: impl Into<String>) -> Self {
        Self {
            location,
            radius_m,
            category: category.into(),
            page_token: None,
        }
    }

    pub fn continuation(&self, page_token: impl Into<String>) -> Self {
        Self {
            page_token: Some(page_token.into()),
            ..self.clone()
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.page_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_strings() {
        for raw in ["OK", "ZERO_RESULTS", "OVER_QUERY_LIMIT", "REQUEST_FAILED"] {
            let status = SearchStatus::from(raw.to_string());
            assert_eq!(status.as_str(), raw);
        }
        let other = SearchStatus::from("INVALID_REQUEST".to_string());
        assert_eq!(other, SearchStatus::Other("INVALID_REQUEST".into()));
        assert!(!other.is_success());
        assert!(SearchStatus::ZeroResults.is_success());
    }

    #[test]
    fn test_page_deserializes_service_json() {
        let body = r#"{
            "html_attributions": [],
            "next_page_token": "tok-1",
            "status": "OK",
            "results": [{
                "place_id": "ChIJ123",
                "name": "Physio Mitte",
                "geometry": {"location": {"lat": 52.52, "lng": 13.40}, "viewport": {}},
                "types": ["physiotherapist", "health"],
                "business_status": "OPERATIONAL",
                "rating": 4.7,
                "user_ratings_total": 88,
                "plus_code": {"compound_code": "G9C2+XX Berlin", "global_code": "9F4MG9C2+XX"},
                "vicinity": "Alexanderplatz 1",
                "opening_hours": {"open_now": true}
            }]
        }"#;

        let page: NearbyPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.status, SearchStatus::Ok);
        assert_eq!(page.next_page_token.as_deref(), Some("tok-1"));
        assert_eq!(page.results.len(), 1);

        let place = &page.results[0];
        assert_eq!(place.place_id.as_deref(), Some("ChIJ123"));
        assert_eq!(place.location(), Some(LatLng::new(52.52, 13.40)));
        assert_eq!(place.user_ratings_total, Some(88));
        assert!(place.extra.contains_key("opening_hours"));

        let raw = place.raw_payload();
        assert_eq!(raw["opening_hours"]["open_now"], Value::Bool(true));
        assert_eq!(raw["plus_code"]["global_code"], "9F4MG9C2+XX");
    }

    #[test]
    fn test_status_only_page_has_no_results() {
        let page: NearbyPage = serde_json::from_str(r#"{"status": "OVER_QUERY_LIMIT"}"#).unwrap();
        assert_eq!(page.status, SearchStatus::OverQueryLimit);
        assert!(page.results.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_empty_ok_page_collapses_to_zero_results() {
        assert_eq!(NearbyPage::ok(vec![], None).status, SearchStatus::ZeroResults);
        assert_eq!(
            NearbyPage::ok(vec![], Some("t".into())).status,
            SearchStatus::Ok
        );
    }

    #[test]
    fn test_bounds_helpers() {
        let bounds = Bounds::new(52.51, 13.35, 52.52, 13.36);
        assert!(bounds.is_valid());
        let center = bounds.center();
        assert!((center.lat - 52.515).abs() < 1e-9);
        assert!((center.lng - 13.355).abs() < 1e-9);
        assert_eq!(bounds.corners()[3], LatLng::new(52.52, 13.36));

        assert!(!Bounds::new(52.52, 13.35, 52.51, 13.36).is_valid());
        assert!(!Bounds::new(f64::NAN, 13.35, 52.51, 13.36).is_valid());
    }

    #[test]
    fn test_continuation_keeps_query() {
        let request = NearbyRequest::new(LatLng::new(1.0, 2.0), 750.0, "cafe");
        assert!(!request.is_continuation());
        let next = request.continuation("abc");
        assert!(next.is_continuation());
        assert_eq!(next.category, "cafe");
        assert_eq!(next.page_token.as_deref(), Some("abc"));
    }
}
