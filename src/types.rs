use geo::{Geometry, MultiPolygon};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    Sites,
    Pollution,
    Boundaries,
    Schools,
    Parks,
    WalkScores,
    Opportunity,
    Matches,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatasetKind::Sites => "sites",
            DatasetKind::Pollution => "pollution",
            DatasetKind::Boundaries => "boundaries",
            DatasetKind::Schools => "schools",
            DatasetKind::Parks => "parks",
            DatasetKind::WalkScores => "walk scores",
            DatasetKind::Opportunity => "opportunity",
            DatasetKind::Matches => "matches",
        };
        f.write_str(name)
    }
}

/// RHNA planning cycle. Only the 4th and 5th cycles appear in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cycle {
    Fourth,
    Fifth,
}

impl Cycle {
    pub fn tag(self) -> &'static str {
        match self {
            Cycle::Fourth => "RHNA4",
            Cycle::Fifth => "RHNA5",
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Cycle::Fourth => 4,
            Cycle::Fifth => 5,
        }
    }

    /// Cycle for an inventory `rhnacyc` value; `None` for any other tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "RHNA4" => Some(Cycle::Fourth),
            "RHNA5" => Some(Cycle::Fifth),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Cycle {
    type Error = AnalysisError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            4 => Ok(Cycle::Fourth),
            5 => Ok(Cycle::Fifth),
            other => Err(AnalysisError::InvalidCycle(other)),
        }
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}th", self.number())
    }
}

/// The inventory's `relcapcty` column as it comes off disk.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCapacity {
    Text(String),
    Number(f64),
    Missing,
}

#[derive(Debug, Clone)]
pub struct SiteRecord {
    /// Row position in the full inventory file; permit matches refer to it.
    pub id: usize,
    pub jurisdiction: String,
    pub cycle_tag: String,
    pub raw_capacity: RawCapacity,
    pub geometry: Geometry<f64>,
}

/// A site after capacity cleaning. `capacity` is finite and non-negative when present.
#[derive(Debug, Clone)]
pub struct CleanSite {
    pub id: usize,
    pub jurisdiction: String,
    pub cycle_tag: String,
    pub capacity: Option<f64>,
    pub geometry: Geometry<f64>,
}

impl CleanSite {
    pub fn cycle(&self) -> Option<Cycle> {
        Cycle::from_tag(&self.cycle_tag)
    }
}

#[derive(Debug, Clone)]
pub struct PermittedSite {
    pub site: CleanSite,
    pub permitted: bool,
}

/// One CalEnviroScreen tract. Scores are `None` where the source carries its -999 sentinel.
#[derive(Debug, Clone)]
pub struct TractRecord {
    pub tract: String,
    pub city: Option<String>,
    pub ci_score_p: Option<f64>,
    pub diesel_pm: Option<f64>,
    pub lead_pctl: Option<f64>,
    pub haz_waste: Option<f64>,
    pub traffic: Option<f64>,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreField {
    #[serde(rename = "CIscoreP")]
    CiScoreP,
    #[serde(rename = "Diesel_PM")]
    DieselPm,
    #[serde(rename = "Lead_Pctl")]
    LeadPctl,
    #[serde(rename = "Haz_Waste_")]
    HazWaste,
    #[serde(rename = "Traffic")]
    Traffic,
}

impl ScoreField {
    pub const ALL: [ScoreField; 5] = [
        ScoreField::CiScoreP,
        ScoreField::DieselPm,
        ScoreField::LeadPctl,
        ScoreField::HazWaste,
        ScoreField::Traffic,
    ];

    pub fn column(self) -> &'static str {
        match self {
            ScoreField::CiScoreP => "CIscoreP",
            ScoreField::DieselPm => "Diesel_PM",
            ScoreField::LeadPctl => "Lead_Pctl",
            ScoreField::HazWaste => "Haz_Waste_",
            ScoreField::Traffic => "Traffic",
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.column() == column)
    }

    pub fn value(self, tract: &TractRecord) -> Option<f64> {
        match self {
            ScoreField::CiScoreP => tract.ci_score_p,
            ScoreField::DieselPm => tract.diesel_pm,
            ScoreField::LeadPctl => tract.lead_pctl,
            ScoreField::HazWaste => tract.haz_waste,
            ScoreField::Traffic => tract.traffic,
        }
    }
}

/// A tract clipped to a city, with the housing capacity planned inside it.
#[derive(Debug, Clone)]
pub struct TractSummary {
    pub tract: TractRecord,
    pub capacity: f64,
    pub acres: f64,
    pub homes_per_acre: f64,
}

#[derive(Debug, Clone)]
pub struct CityBoundary {
    pub city: String,
    pub county: String,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
pub struct SchoolDistrict {
    pub district_name: String,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
pub struct Park {
    pub city: String,
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
pub struct OpportunityArea {
    pub id: String,
    pub category: Option<String>,
    pub score: Option<f64>,
    pub geometry: MultiPolygon<f64>,
}

/// A row of the EPA Smart Location Database.
#[derive(Debug, Clone, Deserialize)]
pub struct WalkScore {
    #[serde(rename = "GEOID20")]
    pub geoid: String,
    #[serde(rename = "NatWalkInd")]
    pub national_walk_index: Option<f64>,
}

/// Site ids with a matching building permit, per city.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct PermitMatches(pub HashMap<String, HashSet<usize>>);

impl PermitMatches {
    pub fn for_city(&self, city: &str) -> Option<&HashSet<usize>> {
        self.0.get(city)
    }
}
