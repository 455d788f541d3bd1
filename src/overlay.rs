//! Clipping of polygon datasets to a city's boundary.
use crate::index::EnvelopeIndex;
use crate::types::{CityBoundary, OpportunityArea, Park, SchoolDistrict, TractRecord};
use geo::{Area, BooleanOps, BoundingRect, Intersects, MultiPolygon};
use rayon::prelude::*;
use tracing::debug;

/// Records that carry a polygonal footprint which can be clipped.
pub trait Footprint: Clone + Send + Sync {
    fn footprint(&self) -> &MultiPolygon<f64>;
    fn with_footprint(&self, geometry: MultiPolygon<f64>) -> Self;
}

macro_rules! impl_footprint {
    ($($ty:ty),*) => {
        $(impl Footprint for $ty {
            fn footprint(&self) -> &MultiPolygon<f64> {
                &self.geometry
            }

            fn with_footprint(&self, geometry: MultiPolygon<f64>) -> Self {
                Self { geometry, ..self.clone() }
            }
        })*
    };
}

impl_footprint!(TractRecord, SchoolDistrict, Park, OpportunityArea, CityBoundary);

/// Intersects every record with `boundary`, keeping only the overlapping part.
///
/// Records that only touch the boundary (zero-area overlap) are dropped.
/// Output keeps the input order.
pub fn overlay<T: Footprint>(boundary: &MultiPolygon<f64>, dataset: &[T]) -> Vec<T> {
    let Some(bbox) = boundary.bounding_rect() else {
        return Vec::new();
    };

    let index = EnvelopeIndex::build(dataset.iter().map(Footprint::footprint));
    let candidates = index.candidates(bbox);
    debug!("Clipping {} of {} records to boundary", candidates.len(), dataset.len());

    candidates
        .par_iter()
        .filter_map(|&i| {
            let record = &dataset[i];
            if !record.footprint().intersects(boundary) {
                return None;
            }
            let clipped = record.footprint().intersection(boundary);
            (clipped.unsigned_area() > 0.0).then(|| record.with_footprint(clipped))
        })
        .collect()
}

/// Union of all polygons in `parts`; `None` when there are none.
pub fn dissolve<'a, I>(parts: I) -> Option<MultiPolygon<f64>>
where
    I: IntoIterator<Item = &'a MultiPolygon<f64>>,
{
    parts
        .into_iter()
        .cloned()
        .reduce(|acc, next| acc.union(&next))
}
