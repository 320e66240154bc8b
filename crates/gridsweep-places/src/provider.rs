use crate::{Bounds, NearbyPage, NearbyRequest, Result};

/// Anything that can answer a single nearby-search call.
///
/// Implementations must never fail silently: transport errors and undecodable bodies
/// come back as a page with [`crate::SearchStatus::RequestFailed`]. Retrying,
/// backoff and call budgeting are the caller's job.
pub trait NearbySearch {
    fn nearby(&mut self, request: &NearbyRequest) -> NearbyPage;

    /// Short label used in logs.
    fn name(&self) -> &'static str {
        "nearby-search"
    }
}

impl<T: NearbySearch + ?Sized> NearbySearch for &mut T {
    fn nearby(&mut self, request: &NearbyRequest) -> NearbyPage {
        (**self).nearby(request)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<T: NearbySearch + ?Sized> NearbySearch for Box<T> {
    fn nearby(&mut self, request: &NearbyRequest) -> NearbyPage {
        (**self).nearby(request)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Resolves a free-text location into the area to cover.
pub trait Geocoder {
    fn bounding_box(&self, location: &str) -> Result<Bounds>;
}

/// A geocoder that always answers with the same box; handy for tests and for
/// callers that already know their bounds.
#[derive(Debug, Clone, Copy)]
pub struct FixedBounds(pub Bounds);

impl Geocoder for FixedBounds {
    fn bounding_box(&self, _location: &str) -> Result<Bounds> {
        Ok(self.0)
    }
}
