use reqwest::Client;
use serde::Deserialize;
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument, warn};

use crate::{
    Bounds, Geocoder, LatLng, NearbyPage, NearbyRequest, NearbySearch, PlacesError, Result,
    SearchStatus,
};

const NEARBY_SEARCH_URL: &str = "https://maps.googleapis.com/maps/api/place/nearbysearch/json";
const GEOCODING_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Blocking client for the Places nearby-search and Geocoding web services.
///
/// Requests run on a private tokio runtime so callers stay synchronous; the engine
/// issues exactly one request at a time anyway.
pub struct GooglePlacesClient {
    api_key: String,
    http: Client,
    rt: Runtime,
    nearby_url: String,
    geocode_url: String,
}

impl GooglePlacesClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            http: Client::new(),
            rt: Runtime::new()?,
            nearby_url: NEARBY_SEARCH_URL.to_string(),
            geocode_url: GEOCODING_URL.to_string(),
        })
    }

    /// Build a client from `GOOGLE_MAPS_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Self::new(crate::api_key_from_env()?)
    }

    /// Point the client at different endpoints, e.g. a local stub server.
    pub fn with_base_urls(
        mut self,
        nearby_url: impl Into<String>,
        geocode_url: impl Into<String>,
    ) -> Self {
        self.nearby_url = nearby_url.into();
        self.geocode_url = geocode_url.into();
        self
    }

    fn nearby_params(&self, request: &NearbyRequest) -> Vec<(&'static str, String)> {
        nearby_query_params(request, &self.api_key)
    }

    async fn fetch_page(&self, request: &NearbyRequest) -> Result<NearbyPage> {
        let response = self
            .http
            .get(&self.nearby_url)
            .query(&self.nearby_params(request))
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn fetch_viewport(&self, location: &str) -> Result<GeocodeResponse> {
        let response = self
            .http
            .get(&self.geocode_url)
            .query(&[("address", location), ("key", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl NearbySearch for GooglePlacesClient {
    fn nearby(&mut self, request: &NearbyRequest) -> NearbyPage {
        debug!(
            location = %request.location,
            radius_m = request.radius_m,
            continuation = request.is_continuation(),
            "Nearby search request"
        );
        match self.rt.block_on(self.fetch_page(request)) {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "Nearby search request failed");
                NearbyPage::request_failed(e.to_string())
            }
        }
    }

    fn name(&self) -> &'static str {
        "google-places"
    }
}

impl Geocoder for GooglePlacesClient {
    #[instrument(name = "Geocode location", skip(self), level = "info")]
    fn bounding_box(&self, location: &str) -> Result<Bounds> {
        let response = self.rt.block_on(self.fetch_viewport(location))?;
        let bounds = response.into_bounds(location)?;
        info!(%bounds, "Resolved bounding box");
        Ok(bounds)
    }
}

fn nearby_query_params(request: &NearbyRequest, api_key: &str) -> Vec<(&'static str, String)> {
    match &request.page_token {
        Some(token) => vec![("pagetoken", token.clone()), ("key", api_key.to_string())],
        None => vec![
            (
                "location",
                format!("{},{}", request.location.lat, request.location.lng),
            ),
            ("radius", format!("{}", request.radius_m.round())),
            ("type", request.category.clone()),
            ("key", api_key.to_string()),
        ],
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: SearchStatus,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: GeocodeGeometry,
}

#[derive(Debug, Deserialize)]
struct GeocodeGeometry {
    viewport: Viewport,
}

#[derive(Debug, Deserialize)]
struct Viewport {
    northeast: LatLng,
    southwest: LatLng,
}

impl GeocodeResponse {
    fn into_bounds(self, location: &str) -> Result<Bounds> {
        if self.status != SearchStatus::Ok {
            return Err(PlacesError::Geocode {
                location: location.to_string(),
                status: self.status.to_string(),
            });
        }
        self.results
            .into_iter()
            .next()
            .map(|r| Bounds::from_corners(r.geometry.viewport.southwest, r.geometry.viewport.northeast))
            .ok_or_else(|| PlacesError::Geocode {
                location: location.to_string(),
                status: SearchStatus::ZeroResults.to_string(),
            })
    }
}
