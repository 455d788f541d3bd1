use crate::projection::web_mercator_to_lon_lat;
use crate::stats::Correlation;
use crate::types::{Cycle, ScoreField, TractSummary};
use anyhow::{Context, Result};
use geo::MapCoords;
use geojson::{Feature, FeatureCollection, GeoJson};
use std::fs;
use std::io::Write;
use std::path::Path;

fn optional(value: Option<f64>) -> serde_json::Value {
    value.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null)
}

/// Tract summaries as a WGS84 FeatureCollection, scores and density as properties.
pub fn tracts_to_geojson(tracts: &[TractSummary]) -> GeoJson {
    let features = tracts.iter().map(|summary| {
        let lon_lat = summary.tract.geometry.map_coords(web_mercator_to_lon_lat);
        let mut feature = Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&lon_lat))),
            id: None,
            properties: None,
            foreign_members: None,
        };
        feature.set_property("Tract", summary.tract.tract.clone());
        feature.set_property("City", summary.tract.city.clone());
        for field in ScoreField::ALL {
            feature.set_property(field.column(), optional(field.value(&summary.tract)));
        }
        feature.set_property("realcap", summary.capacity);
        feature.set_property("acres", summary.acres);
        feature.set_property("homes per acre", optional(Some(summary.homes_per_acre).filter(|d| d.is_finite())));
        feature
    });

    GeoJson::from(features.collect::<FeatureCollection>())
}

pub fn write_tracts(path: &Path, tracts: &[TractSummary]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    fs::write(path, tracts_to_geojson(tracts).to_string())
        .with_context(|| format!("Failed to write GeoJSON: {:?}", path))?;
    Ok(())
}

/// One CSV row per city: `city,cycle,score,n,r,p`.
pub fn write_correlations<W: Write>(
    writer: W,
    cycle: Cycle,
    field: ScoreField,
    rows: &[(String, Correlation)],
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["city", "cycle", "score", "n", "r", "p"])?;
    for (city, c) in rows {
        wtr.write_record([
            city.clone(),
            cycle.number().to_string(),
            field.column().to_string(),
            c.n.to_string(),
            c.coefficient.to_string(),
            c.p_value.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
