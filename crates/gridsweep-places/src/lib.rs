//! Provider boundary for the gridsweep engine.
//!
//! This crate owns everything that talks to (or stands in for) the external
//! nearby-search and geocoding services: the wire types, the [`NearbySearch`] and
//! [`Geocoder`] traits, and, with the default `live_api` feature, an HTTP client for
//! the Google Places web service.

use tracing::warn;

#[cfg(feature = "live_api")]
pub mod google;
pub mod provider;
pub mod types;

#[cfg(feature = "live_api")]
pub use google::GooglePlacesClient;
pub use provider::{FixedBounds, Geocoder, NearbySearch};
pub use types::{
    Bounds, Geometry, LatLng, MAX_SEARCH_RADIUS_M, NearbyPage, NearbyRequest, PAGE_SIZE,
    PROVIDER_RESULT_CAP, PlaceResult, PlusCode, SearchStatus,
};

/// Environment variable holding the API key for the live client.
pub const API_KEY_ENV: &str = "GOOGLE_MAPS_API_KEY";

mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum PlacesError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
        #[cfg(feature = "live_api")]
        #[error("HTTP error: {0}")]
        Http(#[from] reqwest::Error),
        #[error("Serialization error: {0}")]
        Serde(#[from] serde_json::Error),
        #[error("API key not found, set the {0} environment variable")]
        MissingApiKey(&'static str),
        #[error("Geocoding '{location}' failed with status {status}")]
        Geocode { location: String, status: String },
    }

    pub type Result<T> = std::result::Result<T, PlacesError>;
}

pub use error::{PlacesError, Result};

/// Read the API key for the live client from the environment.
pub fn api_key_from_env() -> Result<String> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => {
            warn!(var = API_KEY_ENV, "No API key in environment");
            Err(PlacesError::MissingApiKey(API_KEY_ENV))
        }
    }
}
