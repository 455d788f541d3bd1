//! Cleaning of the inventory's realistic-capacity column.
//!
//! Jurisdictions reported capacity in whatever format they liked: ranges
//! ("10-20", "5 to 9"), unit-type suffixes ("12 sfr"), or prose ("4 primary
//! and 4 accessory units"). Each jurisdiction with a known quirk maps to an
//! ordered list of string rules; every value is then coerced to a number,
//! with anything unparseable becoming missing.
//!
//! Rules are adapted from the YIMBY Law housing-elements data loading utils.
use serde::Deserialize;
use std::collections::HashMap;

use crate::types::{CleanSite, RawCapacity, SiteRecord};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityRule {
    /// Split on the separator and keep the last piece.
    LastAfter(String),
    /// Remove every occurrence of the substring.
    Strip(String),
    /// Split on a space and keep the first piece.
    FirstToken,
    /// "N primary and M accessory units" becomes 2N.
    ///
    /// Heuristic: assumes a site's accessory units always equal its primary
    /// units. A value whose leading token is not an integer becomes missing.
    DoublePrimaryUnits,
}

/// Value flowing through the rule chain.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Number(f64),
    Missing,
}

impl CapacityRule {
    fn apply(&self, cell: Cell) -> Cell {
        let text = match cell {
            Cell::Text(text) => text,
            other => return other,
        };
        match self {
            CapacityRule::LastAfter(sep) => {
                Cell::Text(text.rsplit(sep.as_str()).next().unwrap_or_default().to_string())
            }
            CapacityRule::Strip(s) => Cell::Text(text.replace(s.as_str(), "")),
            CapacityRule::FirstToken => {
                Cell::Text(text.split(' ').next().unwrap_or_default().to_string())
            }
            CapacityRule::DoublePrimaryUnits => {
                if !text.contains("primary and") {
                    return Cell::Text(text);
                }
                text.split(' ')
                    .next()
                    .and_then(|t| t.parse::<i64>().ok())
                    .and_then(|primary| primary.checked_mul(2))
                    .map(|units| Cell::Number(units as f64))
                    .unwrap_or(Cell::Missing)
            }
        }
    }
}

fn coerce(cell: Cell) -> Option<f64> {
    let value = match cell {
        Cell::Number(n) => n,
        Cell::Text(text) => text.trim().parse::<f64>().ok()?,
        Cell::Missing => return None,
    };
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Jurisdiction name to ordered cleaning rules.
#[derive(Debug, Clone)]
pub struct CapacityRules {
    by_city: HashMap<String, Vec<CapacityRule>>,
}

impl Default for CapacityRules {
    fn default() -> Self {
        use CapacityRule::*;

        let ranges = vec![LastAfter("-".into()), LastAfter(" to ".into())];
        let unit_suffixes = vec![
            Strip("á".into()),
            Strip("sfr".into()),
            Strip("SFR".into()),
            Strip("mfr".into()),
            FirstToken,
        ];

        let mut by_city = HashMap::new();
        for city in ["Oakland", "Los Altos Hills", "Napa County", "Newark"] {
            by_city.insert(city.to_string(), ranges.clone());
        }
        for city in ["Danville", "San Ramon", "Corte Madera", "Portola Valley"] {
            by_city.insert(city.to_string(), unit_suffixes.clone());
        }
        by_city.insert("El Cerrito".to_string(), vec![DoublePrimaryUnits, FirstToken]);
        Self { by_city }
    }
}

impl CapacityRules {
    /// Built-in rules with the given per-city overrides layered on top.
    pub fn with_overrides(overrides: &HashMap<String, Vec<CapacityRule>>) -> Self {
        let mut rules = Self::default();
        for (city, city_rules) in overrides {
            rules.insert(city.clone(), city_rules.clone());
        }
        rules
    }

    fn insert(&mut self, city: String, rules: Vec<CapacityRule>) {
        self.by_city.insert(city, rules);
    }

    pub fn rules_for(&self, city: &str) -> &[CapacityRule] {
        self.by_city.get(city).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clean_value(&self, city: &str, raw: &RawCapacity) -> Option<f64> {
        let start = match raw {
            RawCapacity::Text(text) => Cell::Text(text.clone()),
            RawCapacity::Number(n) => Cell::Number(*n),
            RawCapacity::Missing => Cell::Missing,
        };
        let cell = self
            .rules_for(city)
            .iter()
            .fold(start, |cell, rule| rule.apply(cell));
        coerce(cell)
    }

    pub fn clean_site(&self, city: &str, site: &SiteRecord) -> CleanSite {
        CleanSite {
            id: site.id,
            jurisdiction: site.jurisdiction.clone(),
            cycle_tag: site.cycle_tag.clone(),
            capacity: self.clean_value(city, &site.raw_capacity),
            geometry: site.geometry.clone(),
        }
    }

    pub fn clean<'a, I>(&self, city: &str, sites: I) -> Vec<CleanSite>
    where
        I: IntoIterator<Item = &'a SiteRecord>,
    {
        sites.into_iter().map(|s| self.clean_site(city, s)).collect()
    }
}
