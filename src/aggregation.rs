use crate::analysis;
use crate::index::EnvelopeIndex;
use crate::projection::{equal_area_m2, square_meters_to_acres};
use crate::repository::DatasetRepository;
use crate::types::{CleanSite, Cycle, TractRecord, TractSummary};
use anyhow::Result;
use geo::{BoundingRect, Intersects, MultiPolygon};
use std::collections::HashMap;
use tracing::debug;

/// Total cleaned capacity of the sites intersecting each tract, keyed by tract id.
///
/// A site spanning several tracts counts fully toward each of them. Missing
/// capacity counts as zero. Tracts no site touches are absent.
pub fn production_by_tract(tracts: &[TractRecord], sites: &[CleanSite]) -> HashMap<String, f64> {
    let index = EnvelopeIndex::build(tracts.iter().map(|t| &t.geometry));
    let mut production: HashMap<String, f64> = HashMap::new();

    for site in sites {
        let Some(rect) = site.geometry.bounding_rect() else { continue };
        for i in index.candidates(rect) {
            let tract = &tracts[i];
            if site.geometry.intersects(&tract.geometry) {
                *production.entry(tract.tract.clone()).or_default() += site.capacity.unwrap_or(0.0);
            }
        }
    }

    debug!("{} sites fell in {} of {} tracts", sites.len(), production.len(), tracts.len());
    production
}

/// Capacity, acreage and density per tract, with `area_m2` measuring each tract.
pub fn summarize_tracts_with<F>(tracts: Vec<TractRecord>, sites: &[CleanSite], area_m2: F) -> Vec<TractSummary>
where
    F: Fn(&MultiPolygon<f64>) -> f64,
{
    let production = production_by_tract(&tracts, sites);

    tracts
        .into_iter()
        .map(|tract| {
            let capacity = production.get(&tract.tract).copied().unwrap_or(0.0);
            let acres = square_meters_to_acres(area_m2(&tract.geometry));
            TractSummary {
                homes_per_acre: capacity / acres,
                capacity,
                acres,
                tract,
            }
        })
        .collect()
}

/// As [`summarize_tracts_with`], measuring area in the Conus Albers equal-area projection.
pub fn summarize_tracts(tracts: Vec<TractRecord>, sites: &[CleanSite]) -> Vec<TractSummary> {
    summarize_tracts_with(tracts, sites, equal_area_m2)
}

/// The city's pollution tracts with the capacity its `cycle` inventory plans in each.
///
/// Empty for a city without a boundary.
pub fn tracts_for_cycle(repo: &DatasetRepository, city: &str, cycle: Cycle) -> Result<Vec<TractSummary>> {
    let sites = analysis::sites_for_cycle(repo, city, cycle)?;
    let tracts = analysis::pollution_for(repo, city)?;
    Ok(summarize_tracts(tracts, &sites))
}

pub fn tracts_for_fifth_cycle(repo: &DatasetRepository, city: &str) -> Result<Vec<TractSummary>> {
    tracts_for_cycle(repo, city, Cycle::Fifth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use geo::{point, polygon, Area, Geometry};

    fn square(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x, y: y), (x: x + size, y: y), (x: x + size, y: y + size), (x: x, y: y + size), (x: x, y: y),
        ]])
    }

    fn tract(id: &str, geometry: MultiPolygon<f64>) -> TractRecord {
        TractRecord {
            tract: id.into(),
            city: None,
            ci_score_p: Some(50.0),
            diesel_pm: None,
            lead_pctl: None,
            haz_waste: None,
            traffic: None,
            geometry,
        }
    }

    fn site(id: usize, capacity: Option<f64>, geometry: Geometry<f64>) -> CleanSite {
        CleanSite {
            id,
            jurisdiction: "Oakland".into(),
            cycle_tag: "RHNA5".into(),
            capacity,
            geometry,
        }
    }

    fn planar(g: &MultiPolygon<f64>) -> f64 {
        g.unsigned_area()
    }

    #[test]
    fn sums_capacity_per_tract() {
        let tracts = vec![tract("A", square(0.0, 0.0, 10.0)), tract("B", square(10.0, 0.0, 10.0))];
        let sites = vec![
            site(0, Some(5.0), Geometry::Point(point!(x: 2.0, y: 2.0))),
            site(1, Some(7.0), Geometry::Point(point!(x: 3.0, y: 3.0))),
            site(2, None, Geometry::Point(point!(x: 4.0, y: 4.0))),
            // straddles both tracts
            site(3, Some(2.0), Geometry::MultiPolygon(square(9.0, 1.0, 2.0))),
            site(4, Some(100.0), Geometry::Point(point!(x: 50.0, y: 50.0))),
        ];
        let production = production_by_tract(&tracts, &sites);
        assert_eq!(production["A"], 14.0);
        assert_eq!(production["B"], 2.0);
        assert_eq!(production.len(), 2);
    }

    #[test]
    fn point_on_shared_edge_joins_both_tracts() {
        let tracts = vec![tract("A", square(0.0, 0.0, 1.0)), tract("B", square(1.0, 0.0, 1.0))];
        let sites = vec![site(0, Some(3.0), Geometry::Point(point!(x: 1.0, y: 0.5)))];
        let production = production_by_tract(&tracts, &sites);
        assert_eq!(production["A"], 3.0);
        assert_eq!(production["B"], 3.0);
    }

    #[test]
    fn tracts_without_sites_have_zero_density() {
        let tracts = vec![tract("A", square(0.0, 0.0, 1000.0)), tract("B", square(5000.0, 0.0, 1000.0))];
        let summaries = summarize_tracts_with(tracts, &[], planar);
        assert_eq!(summaries.len(), 2);
        for s in &summaries {
            assert_eq!(s.capacity, 0.0);
            assert_eq!(s.homes_per_acre, 0.0);
            assert_abs_diff_eq!(s.acres, 247.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn density_is_capacity_per_acre() {
        // 1 km² tract, 247 acres
        let tracts = vec![tract("A", square(0.0, 0.0, 1000.0))];
        let sites = vec![site(0, Some(15.0), Geometry::Point(point!(x: 500.0, y: 500.0)))];
        let summaries = summarize_tracts_with(tracts, &sites, planar);
        assert_eq!(summaries[0].capacity, 15.0);
        assert_abs_diff_eq!(summaries[0].homes_per_acre, 15.0 / 247.0, epsilon = 1e-12);
        assert_abs_diff_eq!(summaries[0].homes_per_acre, 0.0607, epsilon = 1e-4);
    }
}
