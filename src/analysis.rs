//! City-scoped queries and the equity metrics built on them.
use crate::aggregation;
use crate::overlay::overlay;
use crate::repository::DatasetRepository;
use crate::stats::{pearson, Correlation};
use crate::types::{
    CleanSite, Cycle, OpportunityArea, Park, PermittedSite, SchoolDistrict, ScoreField,
    TractRecord, TractSummary,
};
use anyhow::Result;
use tracing::{debug, warn};

/// The city's sites with capacity cleaned by the city's rules.
pub fn sites_for(repo: &DatasetRepository, city: &str) -> Result<Vec<CleanSite>> {
    let sites = repo.sites()?.iter().filter(|s| s.jurisdiction == city);
    Ok(repo.rules().clean(city, sites))
}

pub fn sites_for_cycle(repo: &DatasetRepository, city: &str, cycle: Cycle) -> Result<Vec<CleanSite>> {
    let mut sites = sites_for(repo, city)?;
    sites.retain(|s| s.cycle() == Some(cycle));
    debug!("{} has {} {} cycle sites", city, sites.len(), cycle);
    Ok(sites)
}

/// Fifth-cycle sites, flagged where a building permit was matched to them.
pub fn sites_with_development_indicator(repo: &DatasetRepository, city: &str) -> Result<Vec<PermittedSite>> {
    let matches = repo.matches()?.for_city(city);
    if matches.is_none() {
        warn!("No permit matches recorded for {}", city);
    }

    let sites = sites_for_cycle(repo, city, Cycle::Fifth)?;
    Ok(sites
        .into_iter()
        .map(|site| PermittedSite {
            permitted: matches.is_some_and(|m| m.contains(&site.id)),
            site,
        })
        .collect())
}

/// Pollution tracts clipped to the city's boundary.
pub fn pollution_for(repo: &DatasetRepository, city: &str) -> Result<Vec<TractRecord>> {
    match repo.city_limits(city)? {
        Some(limits) => Ok(overlay(&limits, repo.pollution()?)),
        None => Ok(Vec::new()),
    }
}

pub fn schools_for(repo: &DatasetRepository, city: &str) -> Result<Vec<SchoolDistrict>> {
    match repo.city_limits(city)? {
        Some(limits) => Ok(overlay(&limits, repo.schools()?)),
        None => Ok(Vec::new()),
    }
}

/// Elementary school districts clipped to the city's boundary.
pub fn elementary_schools_for(repo: &DatasetRepository, city: &str) -> Result<Vec<SchoolDistrict>> {
    let Some(limits) = repo.city_limits(city)? else {
        return Ok(Vec::new());
    };
    let elementary: Vec<SchoolDistrict> = repo
        .schools()?
        .iter()
        .filter(|s| s.district_name.contains("Elementary"))
        .cloned()
        .collect();
    Ok(overlay(&limits, &elementary))
}

pub fn opportunity_for(repo: &DatasetRepository, city: &str) -> Result<Vec<OpportunityArea>> {
    match repo.city_limits(city)? {
        Some(limits) => Ok(overlay(&limits, repo.opportunity()?)),
        None => Ok(Vec::new()),
    }
}

/// Parks whose `city` attribute names the city.
pub fn parks_for(repo: &DatasetRepository, city: &str) -> Result<Vec<Park>> {
    Ok(repo.parks()?.iter().filter(|p| p.city == city).cloned().collect())
}

/// Pearson r between homes per acre and `field` over tracts where both are defined.
pub fn correlation_of(tracts: &[TractSummary], field: ScoreField) -> Correlation {
    pearson(
        tracts
            .iter()
            .filter_map(|t| field.value(&t.tract).map(|score| (t.homes_per_acre, score))),
    )
}

pub fn correlation_with(
    repo: &DatasetRepository,
    city: &str,
    cycle: Cycle,
    field: ScoreField,
) -> Result<Correlation> {
    let tracts = aggregation::tracts_for_cycle(repo, city, cycle)?;
    Ok(correlation_of(&tracts, field))
}

/// Correlation of housing density with the CalEnviroScreen percentile.
pub fn score_correlation(repo: &DatasetRepository, city: &str, cycle: Cycle) -> Result<Correlation> {
    correlation_with(repo, city, cycle, ScoreField::CiScoreP)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TractDiscrepancy {
    pub city: String,
    /// Tracts whose `City` attribute is this city.
    pub labelled: usize,
    /// Tracts overlapping this city's boundary.
    pub overlapping: usize,
}

impl TractDiscrepancy {
    pub fn difference(&self) -> i64 {
        self.overlapping as i64 - self.labelled as i64
    }
}

/// Cities where tract labels disagree with geometry, i.e. tracts spanning a city line.
pub fn city_tract_discrepancies(repo: &DatasetRepository) -> Result<Vec<TractDiscrepancy>> {
    let mut discrepancies = Vec::new();
    for city in repo.cities()? {
        let labelled = repo
            .pollution()?
            .iter()
            .filter(|t| t.city.as_deref() == Some(city.as_str()))
            .count();
        let overlapping = pollution_for(repo, &city)?.len();
        if labelled != overlapping {
            discrepancies.push(TractDiscrepancy { city, labelled, overlapping });
        }
    }
    Ok(discrepancies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::lon_lat_to_web_mercator;
    use crate::types::{CityBoundary, PermitMatches, RawCapacity, SiteRecord};
    use approx::assert_abs_diff_eq;
    use geo::{coord, point, polygon, Area, Geometry, MultiPolygon};
    use std::collections::{HashMap, HashSet};

    fn square(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x, y: y), (x: x + size, y: y), (x: x + size, y: y + size), (x: x, y: y + size), (x: x, y: y),
        ]])
    }

    fn boundary(city: &str, geometry: MultiPolygon<f64>) -> CityBoundary {
        CityBoundary { city: city.into(), county: "Alameda".into(), geometry }
    }

    fn tract(id: &str, city: &str, score: Option<f64>, geometry: MultiPolygon<f64>) -> TractRecord {
        TractRecord {
            tract: id.into(),
            city: Some(city.into()),
            ci_score_p: score,
            diesel_pm: score.map(|s| s / 10.0),
            lead_pctl: None,
            haz_waste: None,
            traffic: None,
            geometry,
        }
    }

    fn site(id: usize, city: &str, cycle: &str, raw: &str, x: f64, y: f64) -> SiteRecord {
        SiteRecord {
            id,
            jurisdiction: city.into(),
            cycle_tag: cycle.into(),
            raw_capacity: RawCapacity::Text(raw.into()),
            geometry: Geometry::Point(point!(x: x, y: y)),
        }
    }

    fn oakland_repo() -> DatasetRepository {
        DatasetRepository::in_memory()
            .with_boundaries(vec![boundary("Oakland", square(0.0, 0.0, 100.0))])
            .with_sites(vec![
                site(0, "Oakland", "RHNA5", "10-20", 10.0, 10.0),
                site(1, "Oakland", "RHNA4", "5 to 9", 60.0, 10.0),
                site(2, "Oakland", "RHNA5", "TBD", 10.0, 20.0),
                site(3, "Berkeley", "RHNA5", "40", 10.0, 10.0),
                site(4, "Oakland", "RHNA5", "30", 60.0, 60.0),
            ])
            .with_pollution(vec![
                tract("1", "Oakland", Some(80.0), square(0.0, 0.0, 50.0)),
                tract("2", "Oakland", Some(20.0), square(50.0, 0.0, 50.0)),
                tract("3", "Berkeley", Some(50.0), square(50.0, 50.0, 100.0)),
                tract("4", "Berkeley", Some(10.0), square(500.0, 500.0, 10.0)),
            ])
    }

    #[test]
    fn sites_are_filtered_and_cleaned() {
        let repo = oakland_repo();
        let sites = sites_for(&repo, "Oakland").unwrap();
        let caps: Vec<Option<f64>> = sites.iter().map(|s| s.capacity).collect();
        assert_eq!(caps, vec![Some(20.0), Some(9.0), None, Some(30.0)]);

        let fifth = sites_for_cycle(&repo, "Oakland", Cycle::Fifth).unwrap();
        assert_eq!(fifth.iter().map(|s| s.id).collect::<Vec<_>>(), vec![0, 2, 4]);
        let fourth = sites_for_cycle(&repo, "Oakland", Cycle::Fourth).unwrap();
        assert_eq!(fourth.len(), 1);
        assert_eq!(fourth[0].capacity, Some(9.0));
    }

    #[test]
    fn unknown_city_yields_empty_results() {
        let repo = oakland_repo();
        assert!(pollution_for(&repo, "Atlantis").unwrap().is_empty());
        assert!(sites_for(&repo, "Atlantis").unwrap().is_empty());
        assert!(aggregation::tracts_for_cycle(&repo, "Atlantis", Cycle::Fifth).unwrap().is_empty());
        let c = score_correlation(&repo, "Atlantis", Cycle::Fifth).unwrap();
        assert!(!c.is_defined());
    }

    #[test]
    fn pollution_is_clipped_to_the_city() {
        let repo = oakland_repo();
        let tracts = pollution_for(&repo, "Oakland").unwrap();
        let ids: Vec<&str> = tracts.iter().map(|t| t.tract.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_abs_diff_eq!(tracts[2].geometry.unsigned_area(), 2500.0, epsilon = 1e-6);
    }

    #[test]
    fn tracts_for_cycle_fill_missing_capacity_with_zero() {
        let repo = oakland_repo();
        let summaries = aggregation::tracts_for_fifth_cycle(&repo, "Oakland").unwrap();
        let caps: HashMap<&str, f64> = summaries.iter().map(|s| (s.tract.tract.as_str(), s.capacity)).collect();
        assert_eq!(caps["1"], 20.0);
        assert_eq!(caps["2"], 0.0);
        assert_eq!(caps["3"], 30.0);
    }

    #[test]
    fn discrepancies_count_tracts_spanning_city_lines() {
        let repo = oakland_repo();
        let found = city_tract_discrepancies(&repo).unwrap();
        assert_eq!(
            found,
            vec![TractDiscrepancy { city: "Oakland".into(), labelled: 2, overlapping: 3 }]
        );
        assert_eq!(found[0].difference(), 1);
    }

    #[test]
    fn development_indicator_marks_matched_sites() {
        let mut matches = HashMap::new();
        matches.insert("Oakland".to_string(), HashSet::from([4usize, 1]));
        let repo = oakland_repo().with_matches(PermitMatches(matches));

        let flagged = sites_with_development_indicator(&repo, "Oakland").unwrap();
        let permitted: Vec<(usize, bool)> = flagged.iter().map(|p| (p.site.id, p.permitted)).collect();
        assert_eq!(permitted, vec![(0, false), (2, false), (4, true)]);

        let none = sites_with_development_indicator(&repo, "Berkeley").unwrap();
        assert!(none.iter().all(|p| !p.permitted));
    }

    #[test]
    fn schools_and_parks_are_scoped_to_the_city() {
        let repo = oakland_repo()
            .with_schools(vec![
                SchoolDistrict { district_name: "Oakland Unified".into(), geometry: square(0.0, 0.0, 100.0) },
                SchoolDistrict { district_name: "Piedmont Elementary".into(), geometry: square(90.0, 90.0, 20.0) },
                SchoolDistrict { district_name: "Far Elementary".into(), geometry: square(900.0, 900.0, 20.0) },
            ])
            .with_parks(vec![
                Park { city: "Oakland".into(), name: Some("Lakeside".into()), geometry: square(1.0, 1.0, 1.0) },
                Park { city: "Berkeley".into(), name: None, geometry: square(2.0, 2.0, 1.0) },
            ])
            .with_opportunity(vec![OpportunityArea {
                id: "6001".into(),
                category: Some("High Resource".into()),
                score: Some(0.4),
                geometry: square(-50.0, -50.0, 100.0),
            }]);

        assert_eq!(schools_for(&repo, "Oakland").unwrap().len(), 2);
        let elementary = elementary_schools_for(&repo, "Oakland").unwrap();
        assert_eq!(elementary.len(), 1);
        assert_eq!(elementary[0].district_name, "Piedmont Elementary");

        let parks = parks_for(&repo, "Oakland").unwrap();
        assert_eq!(parks.len(), 1);
        assert_eq!(parks[0].name.as_deref(), Some("Lakeside"));

        let opportunity = opportunity_for(&repo, "Oakland").unwrap();
        assert_abs_diff_eq!(opportunity[0].geometry.unsigned_area(), 2500.0, epsilon = 1e-6);
    }

    #[test]
    fn correlation_uses_only_scored_tracts() {
        let summary = |score: Option<f64>, density: f64| TractSummary {
            tract: tract("t", "Oakland", score, square(0.0, 0.0, 1.0)),
            capacity: density,
            acres: 1.0,
            homes_per_acre: density,
        };
        let tracts = vec![
            summary(Some(10.0), 1.0),
            summary(Some(20.0), 2.0),
            summary(None, 100.0),
            summary(Some(30.0), 3.0),
        ];
        let c = correlation_of(&tracts, ScoreField::CiScoreP);
        assert_eq!(c.n, 3);
        assert_abs_diff_eq!(c.coefficient, 1.0, epsilon = 1e-12);

        let diesel = correlation_of(&tracts, ScoreField::DieselPm);
        assert_eq!(diesel.n, 3);
        assert!(correlation_of(&tracts, ScoreField::LeadPctl).n == 0);
    }

    #[test]
    fn single_tract_end_to_end() {
        // A ~1 km² tract in Oakland, score 50, with one "10-15" site inside.
        let sw = lon_lat_to_web_mercator(coord! { x: -122.27, y: 37.80 });
        let km_in_mercator = 1000.0 / 37.80f64.to_radians().cos();
        let geometry = square(sw.x, sw.y, km_in_mercator);

        let repo = DatasetRepository::in_memory()
            .with_boundaries(vec![boundary("Oakland", geometry.clone())])
            .with_pollution(vec![tract("6001400100", "Oakland", Some(50.0), geometry)])
            .with_sites(vec![site(
                0,
                "Oakland",
                "RHNA5",
                "10-15",
                sw.x + km_in_mercator / 2.0,
                sw.y + km_in_mercator / 2.0,
            )]);

        let summaries = aggregation::tracts_for_cycle(&repo, "Oakland", Cycle::Fifth).unwrap();
        assert_eq!(summaries.len(), 1);
        let t = &summaries[0];
        assert_eq!(t.capacity, 15.0);
        assert!((t.acres - 247.0).abs() / 247.0 < 0.01, "acres = {}", t.acres);
        assert!((t.homes_per_acre - 0.0607).abs() < 0.001, "density = {}", t.homes_per_acre);

        let c = score_correlation(&repo, "Oakland", Cycle::Fifth).unwrap();
        assert_eq!(c.n, 1);
        assert!(!c.is_defined());
    }

    #[test]
    fn cycle_outside_four_and_five_is_rejected() {
        assert!(Cycle::try_from(3).is_err());
    }
}
