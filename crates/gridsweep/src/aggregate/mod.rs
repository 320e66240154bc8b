//! Merging result pages into per-point tallies and entity records.

use ahash::AHashSet;
use gridsweep_places::{LatLng, NearbyPage, PlaceResult, PlusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A discovered place, in the shape it is persisted as a detail record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "id")]
    pub entity_id: String,
    pub name: Option<String>,
    pub location: Option<LatLng>,
    #[serde(rename = "types")]
    pub category_tags: Vec<String>,
    #[serde(rename = "business_status")]
    pub status: Option<String>,
    pub rating: Option<f64>,
    #[serde(rename = "user_ratings_total")]
    pub rating_count: Option<u32>,
    #[serde(rename = "plus_code")]
    pub structured_address_code: Option<PlusCode>,
    pub vicinity: Option<String>,
    #[serde(rename = "raw")]
    pub raw_detail_payload: Value,
}

impl Entity {
    /// `None` when the provider did not assign an identifier.
    pub fn from_place(place: &PlaceResult) -> Option<Self> {
        let entity_id = place.place_id.as_deref()?.trim();
        if entity_id.is_empty() {
            return None;
        }
        Some(Self {
            entity_id: entity_id.to_string(),
            name: place.name.clone(),
            location: place.location(),
            category_tags: place.types.clone(),
            status: place.business_status.clone(),
            rating: place.rating,
            rating_count: place.user_ratings_total,
            structured_address_code: place.plus_code.clone(),
            vicinity: place.vicinity.clone(),
            raw_detail_payload: place.raw_payload(),
        })
    }
}

/// Outcome of folding one page into a point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageTally {
    /// Identifiers neither known to the run nor already seen at this point.
    pub newly_unique: usize,
    /// Everything the page returned, duplicates included; drives cap detection.
    pub page_results: usize,
    /// Every identifiable result on the page, unique or not.
    pub entities: Vec<Entity>,
}

/// Fold one page into `point_local_ids`. Every identifier on the page lands in the
/// point-local set; only those absent from both sets count as newly unique.
///
/// `known_entity_ids` is only read here; it grows at the persistence step.
pub fn process_page(
    page: &NearbyPage,
    known_entity_ids: &AHashSet<String>,
    point_local_ids: &mut AHashSet<String>,
) -> PageTally {
    let mut tally = PageTally {
        page_results: page.results.len(),
        ..Default::default()
    };

    for place in &page.results {
        let Some(entity) = Entity::from_place(place) else {
            warn!(name = ?place.name, "Result without a place id, not persisted");
            continue;
        };
        let first_at_point = point_local_ids.insert(entity.entity_id.clone());
        if first_at_point && !known_entity_ids.contains(&entity.entity_id) {
            tally.newly_unique += 1;
        }
        tally.entities.push(entity);
    }
    tally
}

/// Running totals for one search point across its pages.
#[derive(Debug, Clone, Default)]
pub struct PointAggregate {
    pub total_results: usize,
    pub newly_unique: usize,
    pub pages: usize,
    pub local_ids: AHashSet<String>,
    pub entities: Vec<Entity>,
}

impl PointAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, page: &NearbyPage, known_entity_ids: &AHashSet<String>) {
        let tally = process_page(page, known_entity_ids, &mut self.local_ids);
        self.total_results += tally.page_results;
        self.newly_unique += tally.newly_unique;
        self.pages += 1;
        self.entities.extend(tally.entities);
    }

    /// The query is presumed truncated once the result count reaches `threshold`.
    pub fn hit_cap(&self, threshold: usize) -> bool {
        self.total_results >= threshold
    }
}
