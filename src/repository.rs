//! Lazily loaded datasets and the city boundary resolver.
use crate::capacity::CapacityRules;
use crate::config::AppConfig;
use crate::data;
use crate::error::AnalysisError;
use crate::overlay::dissolve;
use crate::types::{
    CityBoundary, DatasetKind, OpportunityArea, Park, PermitMatches, SchoolDistrict, SiteRecord,
    TractRecord, WalkScore,
};
use anyhow::Result;
use geo::MultiPolygon;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::info;

/// Holds every dataset the analysis reads, each loaded on first access and
/// kept for the lifetime of the repository. Nothing is ever reloaded; build a
/// new repository to start from a clean cache.
///
/// Concurrent first access to the same dataset is memory safe but not
/// coordinated: each racing thread may load the file, the first to finish is
/// stored and the other copies are dropped.
pub struct DatasetRepository {
    config: Option<AppConfig>,
    rules: CapacityRules,
    sites: OnceLock<Vec<SiteRecord>>,
    pollution: OnceLock<Vec<TractRecord>>,
    boundaries: OnceLock<Vec<CityBoundary>>,
    schools: OnceLock<Vec<SchoolDistrict>>,
    parks: OnceLock<Vec<Park>>,
    walk_scores: OnceLock<Vec<WalkScore>>,
    opportunity: OnceLock<Vec<OpportunityArea>>,
    matches: OnceLock<PermitMatches>,
}

fn cached<'a, T>(
    cell: &'a OnceLock<T>,
    kind: DatasetKind,
    load: impl FnOnce() -> Result<T>,
) -> Result<&'a T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    info!("Loading {} dataset", kind);
    let value = load()?;
    Ok(cell.get_or_init(|| value))
}

impl DatasetRepository {
    /// Repository backed by the files named in `config`.
    pub fn from_config(config: AppConfig) -> Self {
        let rules = CapacityRules::with_overrides(&config.capacity_rules);
        Self::new(Some(config), rules)
    }

    /// Repository with no backing files; datasets must be supplied with the `with_*` methods.
    pub fn in_memory() -> Self {
        Self::new(None, CapacityRules::default())
    }

    fn new(config: Option<AppConfig>, rules: CapacityRules) -> Self {
        Self {
            config,
            rules,
            sites: OnceLock::new(),
            pollution: OnceLock::new(),
            boundaries: OnceLock::new(),
            schools: OnceLock::new(),
            parks: OnceLock::new(),
            walk_scores: OnceLock::new(),
            opportunity: OnceLock::new(),
            matches: OnceLock::new(),
        }
    }

    pub fn with_sites(mut self, sites: Vec<SiteRecord>) -> Self {
        self.sites = OnceLock::from(sites);
        self
    }

    pub fn with_pollution(mut self, tracts: Vec<TractRecord>) -> Self {
        self.pollution = OnceLock::from(tracts);
        self
    }

    pub fn with_boundaries(mut self, boundaries: Vec<CityBoundary>) -> Self {
        self.boundaries = OnceLock::from(boundaries);
        self
    }

    pub fn with_schools(mut self, schools: Vec<SchoolDistrict>) -> Self {
        self.schools = OnceLock::from(schools);
        self
    }

    pub fn with_parks(mut self, parks: Vec<Park>) -> Self {
        self.parks = OnceLock::from(parks);
        self
    }

    pub fn with_opportunity(mut self, areas: Vec<OpportunityArea>) -> Self {
        self.opportunity = OnceLock::from(areas);
        self
    }

    pub fn with_matches(mut self, matches: PermitMatches) -> Self {
        self.matches = OnceLock::from(matches);
        self
    }

    pub fn rules(&self) -> &CapacityRules {
        &self.rules
    }

    fn config(&self, kind: DatasetKind) -> Result<&AppConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| AnalysisError::DatasetUnavailable(kind).into())
    }

    pub fn sites(&self) -> Result<&[SiteRecord]> {
        let kind = DatasetKind::Sites;
        cached(&self.sites, kind, || {
            let features = data::load_features(&self.config(kind)?.input.sites)?;
            Ok(data::sites_from_features(features)?)
        })
        .map(Vec::as_slice)
    }

    pub fn pollution(&self) -> Result<&[TractRecord]> {
        let kind = DatasetKind::Pollution;
        cached(&self.pollution, kind, || {
            let features = data::load_features(&self.config(kind)?.input.pollution)?;
            Ok(data::tracts_from_features(features)?)
        })
        .map(Vec::as_slice)
    }

    pub fn boundaries(&self) -> Result<&[CityBoundary]> {
        let kind = DatasetKind::Boundaries;
        cached(&self.boundaries, kind, || {
            let features = data::load_features(&self.config(kind)?.input.boundaries)?;
            Ok(data::boundaries_from_features(features)?)
        })
        .map(Vec::as_slice)
    }

    pub fn schools(&self) -> Result<&[SchoolDistrict]> {
        let kind = DatasetKind::Schools;
        cached(&self.schools, kind, || {
            let features = data::load_features(&self.config(kind)?.input.schools)?;
            Ok(data::schools_from_features(features)?)
        })
        .map(Vec::as_slice)
    }

    pub fn parks(&self) -> Result<&[Park]> {
        let kind = DatasetKind::Parks;
        cached(&self.parks, kind, || {
            let features = data::load_features(&self.config(kind)?.input.parks)?;
            Ok(data::parks_from_features(features)?)
        })
        .map(Vec::as_slice)
    }

    pub fn walk_scores(&self) -> Result<&[WalkScore]> {
        let kind = DatasetKind::WalkScores;
        cached(&self.walk_scores, kind, || {
            data::load_walk_scores(&self.config(kind)?.input.walk_scores)
        })
        .map(Vec::as_slice)
    }

    pub fn opportunity(&self) -> Result<&[OpportunityArea]> {
        let kind = DatasetKind::Opportunity;
        cached(&self.opportunity, kind, || {
            let config = self.config(kind)?;
            let features = data::load_features(&config.input.opportunity)?;
            Ok(data::opportunity_from_features(features, &config.opportunity)?)
        })
        .map(Vec::as_slice)
    }

    pub fn matches(&self) -> Result<&PermitMatches> {
        let kind = DatasetKind::Matches;
        cached(&self.matches, kind, || data::load_matches(&self.config(kind)?.input.matches))
    }

    /// The city's boundary, all of its polygons merged. `None` for an unknown city.
    pub fn city_limits(&self, city: &str) -> Result<Option<MultiPolygon<f64>>> {
        let parts = self
            .boundaries()?
            .iter()
            .filter(|b| b.city == city)
            .map(|b| &b.geometry);
        Ok(dissolve(parts))
    }

    /// Cities present in both the site inventory and the boundary map, sorted.
    pub fn cities(&self) -> Result<Vec<String>> {
        let with_sites: BTreeSet<&str> = self.sites()?.iter().map(|s| s.jurisdiction.as_str()).collect();
        let mapped: BTreeSet<&str> = self.boundaries()?.iter().map(|b| b.city.as_str()).collect();
        Ok(with_sites.intersection(&mapped).map(|c| c.to_string()).collect())
    }
}
