use crate::config::{GeometrySource, OpportunityColumns};
use crate::error::SchemaError;
use crate::projection::{wkt_name, Crs};
use crate::types::{
    CityBoundary, DatasetKind, OpportunityArea, Park, PermitMatches, RawCapacity, SchoolDistrict,
    SiteRecord, TractRecord, WalkScore,
};
use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use geo::{Geometry, MapCoords, MultiPolygon};
use shapefile::dbase::FieldValue;
use shapefile::{Reader, Shape};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info};

/// CalEnviroScreen marks indicators it could not compute with -999.
const CES_NO_DATA: f64 = -999.0;

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Null,
}

/// One feature as read from disk, geometry already in Web Mercator.
#[derive(Debug, Clone)]
pub struct RawFeature {
    pub attributes: HashMap<String, AttrValue>,
    pub geometry: Option<Geometry<f64>>,
}

impl RawFeature {
    pub fn new(attributes: Vec<(&str, AttrValue)>, geometry: Geometry<f64>) -> Self {
        Self {
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            geometry: Some(geometry),
        }
    }
}

pub fn load_features(source: &GeometrySource) -> Result<Vec<RawFeature>> {
    let extension = source.path.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Input geometry file has no extension: {:?}", source.path))?;

    let features = match extension.as_str() {
        "shp" => load_shapefile(&source.path, source.crs)?,
        "json" | "geojson" => load_geojson(&source.path, source.crs)?,
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    info!("Loaded {} features from {:?}", features.len(), source.path);
    Ok(features)
}

fn load_shapefile(path: &Path, crs: Crs) -> Result<Vec<RawFeature>> {
    check_prj(path, crs)?;

    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut features = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result
            .with_context(|| format!("Failed to read Shapefile record: {:?}", path))?;

        let geometry = match shape {
            Shape::NullShape => None,
            shape => {
                let geometry = Geometry::<f64>::try_from(shape)
                    .map_err(|e| anyhow!("Failed to convert shape: {:?}", e))?;
                Some(geometry)
            }
        };

        let attributes = HashMap::<String, FieldValue>::from(record)
            .into_iter()
            .map(|(name, value)| (name, field_value_to_attr(value)))
            .collect();

        features.push(RawFeature {
            attributes,
            geometry: geometry.map(|g| reproject(g, crs)),
        });
    }

    Ok(features)
}

/// Compares the CRS a shapefile's `.prj` names with the one it is configured as.
fn check_prj(path: &Path, declared: Crs) -> Result<()> {
    let prj = path.with_extension("prj");
    if !prj.exists() {
        debug!("No .prj beside {:?}, treating it as {}", path, declared);
        return Ok(());
    }
    let wkt = fs::read_to_string(&prj)
        .with_context(|| format!("Failed to read projection file: {:?}", prj))?;
    ensure_crs(path, declared, Crs::from_wkt(&wkt), wkt_name(&wkt))?;
    Ok(())
}

fn ensure_crs(file: &Path, declared: Crs, found: Option<Crs>, name: &str) -> Result<(), SchemaError> {
    if found == Some(declared) {
        return Ok(());
    }
    Err(SchemaError::CrsMismatch {
        file: file.display().to_string(),
        declared,
        found: found.map(|c| c.to_string()).unwrap_or_else(|| name.to_string()),
    })
}

fn field_value_to_attr(value: FieldValue) -> AttrValue {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => AttrValue::Text(s),
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => {
            AttrValue::Number(n)
        }
        FieldValue::Float(Some(f)) => AttrValue::Number(f as f64),
        FieldValue::Integer(i) => AttrValue::Number(i as f64),
        FieldValue::Logical(Some(b)) => AttrValue::Bool(b),
        _ => AttrValue::Null,
    }
}

fn load_geojson(path: &Path, crs: Crs) -> Result<Vec<RawFeature>> {
    use geojson::GeoJson;

    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);

    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let named_crs = collection
        .foreign_members
        .as_ref()
        .and_then(|members| members.get("crs"))
        .and_then(|member| member.pointer("/properties/name"))
        .and_then(|name| name.as_str());
    if let Some(name) = named_crs {
        ensure_crs(path, crs, Crs::from_name(name), name)?;
    }

    let mut features = Vec::with_capacity(collection.features.len());

    for feature in collection.features {
        let attributes = feature.properties.unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name, json_to_attr(value)))
            .collect();

        let geometry = match feature.geometry {
            Some(geom) => {
                let geometry: Geometry<f64> = geom.value.try_into()
                    .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;
                Some(reproject(geometry, crs))
            }
            None => None,
        };

        features.push(RawFeature { attributes, geometry });
    }

    Ok(features)
}

fn json_to_attr(value: serde_json::Value) -> AttrValue {
    match value {
        serde_json::Value::String(s) => AttrValue::Text(s),
        serde_json::Value::Number(n) => n.as_f64().map(AttrValue::Number).unwrap_or(AttrValue::Null),
        serde_json::Value::Bool(b) => AttrValue::Bool(b),
        serde_json::Value::Null => AttrValue::Null,
        other => AttrValue::Text(other.to_string()),
    }
}

fn reproject(geometry: Geometry<f64>, crs: Crs) -> Geometry<f64> {
    match crs {
        Crs::WebMercator => geometry,
        crs => geometry.map_coords(|c| crs.to_web_mercator(c)),
    }
}

/// Typed access to a feature's attributes, reporting schema problems for one dataset.
struct Columns<'a> {
    dataset: DatasetKind,
    attributes: &'a HashMap<String, AttrValue>,
}

impl<'a> Columns<'a> {
    fn new(dataset: DatasetKind, feature: &'a RawFeature) -> Self {
        Self { dataset, attributes: &feature.attributes }
    }

    fn get(&self, column: &str) -> Result<&'a AttrValue, SchemaError> {
        self.attributes.get(column).ok_or_else(|| SchemaError::MissingColumn {
            dataset: self.dataset,
            column: column.to_string(),
        })
    }

    fn bad(&self, column: &str, detail: impl Into<String>) -> SchemaError {
        SchemaError::BadValue {
            dataset: self.dataset,
            column: column.to_string(),
            detail: detail.into(),
        }
    }

    fn text(&self, column: &str) -> Result<Option<String>, SchemaError> {
        match self.get(column)? {
            AttrValue::Text(s) if s.is_empty() => Ok(None),
            AttrValue::Text(s) => Ok(Some(s.clone())),
            AttrValue::Null => Ok(None),
            other => Err(self.bad(column, format!("expected text, found {:?}", other))),
        }
    }

    /// Identifier columns are sometimes stored as numbers (e.g. CES tract ids).
    fn identifier(&self, column: &str) -> Result<String, SchemaError> {
        match self.get(column)? {
            AttrValue::Text(s) if !s.is_empty() => Ok(s.clone()),
            AttrValue::Number(n) if n.fract() == 0.0 => Ok(format!("{}", *n as i64)),
            AttrValue::Number(n) => Ok(n.to_string()),
            other => Err(self.bad(column, format!("expected identifier, found {:?}", other))),
        }
    }

    fn number(&self, column: &str) -> Result<Option<f64>, SchemaError> {
        match self.get(column)? {
            AttrValue::Number(n) => Ok(Some(*n)),
            AttrValue::Null => Ok(None),
            AttrValue::Text(s) if s.trim().is_empty() => Ok(None),
            AttrValue::Text(s) => s.trim().parse().map(Some)
                .map_err(|_| self.bad(column, format!("expected number, found '{}'", s))),
            AttrValue::Bool(_) => Err(self.bad(column, "expected number, found boolean")),
        }
    }

    fn score(&self, column: &str) -> Result<Option<f64>, SchemaError> {
        Ok(self.number(column)?.filter(|v| *v > CES_NO_DATA && v.is_finite()))
    }
}

fn polygonal(dataset: DatasetKind, geometry: Option<&Geometry<f64>>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Some(Geometry::Polygon(p)) => Some(MultiPolygon::new(vec![p.clone()])),
        Some(Geometry::MultiPolygon(mp)) => Some(mp.clone()),
        other => {
            debug!("{}: skipping non-polygon geometry {:?}", dataset, other.map(geometry_name));
            None
        }
    }
}

fn geometry_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Title-cases a name the way pandas' `str.title` does.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

pub fn sites_from_features(features: Vec<RawFeature>) -> Result<Vec<SiteRecord>, SchemaError> {
    let dataset = DatasetKind::Sites;
    let mut sites = Vec::with_capacity(features.len());

    for (id, feature) in features.into_iter().enumerate() {
        let cols = Columns::new(dataset, &feature);
        let jurisdiction = cols.text("jurisdict")?.unwrap_or_default();
        let cycle_tag = cols.text("rhnacyc")?.unwrap_or_default();
        let raw_capacity = match cols.get("relcapcty")? {
            AttrValue::Text(s) => RawCapacity::Text(s.clone()),
            AttrValue::Number(n) => RawCapacity::Number(*n),
            _ => RawCapacity::Missing,
        };

        let geometry = match feature.geometry {
            Some(g @ (Geometry::Point(_) | Geometry::Polygon(_) | Geometry::MultiPolygon(_))) => g,
            Some(other) => {
                return Err(SchemaError::Geometry {
                    dataset,
                    detail: format!("site {} is a {}", id, geometry_name(&other)),
                })
            }
            None => continue,
        };

        sites.push(SiteRecord { id, jurisdiction, cycle_tag, raw_capacity, geometry });
    }

    Ok(sites)
}

pub fn tracts_from_features(features: Vec<RawFeature>) -> Result<Vec<TractRecord>, SchemaError> {
    let dataset = DatasetKind::Pollution;
    let mut tracts = Vec::with_capacity(features.len());

    for feature in &features {
        let cols = Columns::new(dataset, feature);
        let tract = cols.identifier("Tract")?;
        let city = cols.text("City")?;
        let ci_score_p = cols.score("CIscoreP")?;
        let diesel_pm = cols.score("Diesel_PM")?;
        let lead_pctl = cols.score("Lead_Pctl")?;
        let haz_waste = cols.score("Haz_Waste_")?;
        let traffic = cols.score("Traffic")?;

        let Some(geometry) = polygonal(dataset, feature.geometry.as_ref()) else { continue };

        tracts.push(TractRecord {
            tract,
            city,
            ci_score_p,
            diesel_pm,
            lead_pctl,
            haz_waste,
            traffic,
            geometry,
        });
    }

    Ok(tracts)
}

pub fn boundaries_from_features(features: Vec<RawFeature>) -> Result<Vec<CityBoundary>, SchemaError> {
    let dataset = DatasetKind::Boundaries;
    let mut boundaries = Vec::with_capacity(features.len());

    for feature in &features {
        let cols = Columns::new(dataset, feature);
        let Some(city) = cols.text("city")? else {
            debug!("{}: skipping boundary without a city name", dataset);
            continue;
        };
        let city = title_case(&city);
        let county = title_case(&cols.text("county")?.unwrap_or_default());

        let Some(geometry) = polygonal(dataset, feature.geometry.as_ref()) else { continue };
        boundaries.push(CityBoundary { city, county, geometry });
    }

    Ok(boundaries)
}

pub fn schools_from_features(features: Vec<RawFeature>) -> Result<Vec<SchoolDistrict>, SchemaError> {
    let dataset = DatasetKind::Schools;
    let mut schools = Vec::with_capacity(features.len());

    for feature in &features {
        let cols = Columns::new(dataset, feature);
        let district_name = cols.text("DistrictNa")?.unwrap_or_default();

        let Some(geometry) = polygonal(dataset, feature.geometry.as_ref()) else { continue };
        schools.push(SchoolDistrict { district_name, geometry });
    }

    Ok(schools)
}

pub fn parks_from_features(features: Vec<RawFeature>) -> Result<Vec<Park>, SchemaError> {
    let dataset = DatasetKind::Parks;
    let mut parks = Vec::with_capacity(features.len());

    for feature in &features {
        let cols = Columns::new(dataset, feature);
        let city = cols.text("city")?.unwrap_or_default();
        let name = match feature.attributes.get("name") {
            Some(_) => cols.text("name")?,
            None => None,
        };

        let Some(geometry) = polygonal(dataset, feature.geometry.as_ref()) else { continue };
        parks.push(Park { city, name, geometry });
    }

    Ok(parks)
}

pub fn opportunity_from_features(
    features: Vec<RawFeature>,
    columns: &OpportunityColumns,
) -> Result<Vec<OpportunityArea>, SchemaError> {
    let dataset = DatasetKind::Opportunity;
    let mut areas = Vec::with_capacity(features.len());

    for feature in &features {
        let cols = Columns::new(dataset, feature);
        let id = cols.identifier(&columns.id)?;
        let category = match &columns.category {
            Some(column) => cols.text(column)?,
            None => None,
        };
        let score = match &columns.score {
            Some(column) => cols.number(column)?,
            None => None,
        };

        let Some(geometry) = polygonal(dataset, feature.geometry.as_ref()) else { continue };
        areas.push(OpportunityArea { id, category, score, geometry });
    }

    Ok(areas)
}

pub fn load_walk_scores(path: &Path) -> Result<Vec<WalkScore>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);

    let headers = rdr.headers()?.clone();
    for column in ["GEOID20", "NatWalkInd"] {
        if !headers.iter().any(|h| h == column) {
            return Err(SchemaError::MissingColumn {
                dataset: DatasetKind::WalkScores,
                column: column.to_string(),
            }
            .into());
        }
    }

    let mut scores = Vec::new();
    for result in rdr.deserialize() {
        let row: WalkScore = result
            .with_context(|| format!("Failed to parse walk score row in {:?}", path))?;
        scores.push(row);
    }

    info!("Loaded {} walk score rows from {:?}", scores.len(), path);
    Ok(scores)
}

pub fn load_matches(path: &Path) -> Result<PermitMatches> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open matches file: {:?}", path))?;
    let matches: PermitMatches = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse matches JSON: {:?}", path))?;
    info!("Loaded permit matches for {} cities", matches.0.len());
    Ok(matches)
}
