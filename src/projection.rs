//! Coordinate reference systems used by the analysis.
//!
//! Everything is stored in Web Mercator (EPSG:3857) after load. Areas are
//! measured in NAD83 / Conus Albers (EPSG:5070), an equal-area conic on the
//! GRS80 ellipsoid, following Snyder's "Map Projections: A Working Manual".
use geo::{Area, Coord, MapCoords, MultiPolygon};
use serde::Deserialize;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;

const EARTH_RADIUS: f64 = 6_378_137.0;

// GRS80
const GRS80_A: f64 = 6_378_137.0;
const GRS80_INV_F: f64 = 298.257_222_101;

// EPSG:5070 parameters
const ALBERS_LAT0: f64 = 23.0;
const ALBERS_LON0: f64 = -96.0;
const ALBERS_LAT1: f64 = 29.5;
const ALBERS_LAT2: f64 = 45.5;

pub const ACRES_PER_SQ_KM: f64 = 247.0;

/// CRS a source file is stored in. Declared per dataset in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crs {
    #[default]
    Wgs84,
    WebMercator,
}

/// Substrings that mark a projected WKT as spherical Web Mercator.
const WEB_MERCATOR_WKT: [&str; 5] = [
    "PSEUDO-MERCATOR",
    "PSEUDO_MERCATOR",
    "WEB_MERCATOR",
    "MERCATOR_AUXILIARY_SPHERE",
    "POPULAR_VISUALISATION",
];

impl Crs {
    /// Reads the CRS from a `.prj` (ESRI or OGC WKT). `None` for any other
    /// projected CRS. Geographic datums are not told apart.
    pub fn from_wkt(wkt: &str) -> Option<Crs> {
        let upper = wkt.trim_start().to_uppercase();
        if upper.starts_with("PROJCS") || upper.starts_with("PROJCRS") {
            WEB_MERCATOR_WKT
                .iter()
                .any(|marker| upper.contains(marker))
                .then_some(Crs::WebMercator)
        } else if upper.starts_with("GEOGCS") || upper.starts_with("GEOGCRS") {
            Some(Crs::Wgs84)
        } else {
            None
        }
    }

    /// Reads a legacy GeoJSON `crs` name such as `urn:ogc:def:crs:EPSG::3857`.
    pub fn from_name(name: &str) -> Option<Crs> {
        match name.rsplit(':').next().unwrap_or_default() {
            "3857" | "900913" | "102100" => Some(Crs::WebMercator),
            "4326" | "4269" | "CRS84" => Some(Crs::Wgs84),
            _ => None,
        }
    }

    pub fn to_web_mercator(self, c: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Wgs84 => lon_lat_to_web_mercator(c),
            Crs::WebMercator => c,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Wgs84 => f.write_str("wgs84"),
            Crs::WebMercator => f.write_str("web_mercator"),
        }
    }
}

/// The quoted name of a WKT's outermost element, e.g. `WGS 84 / Pseudo-Mercator`.
pub fn wkt_name(wkt: &str) -> &str {
    wkt.split('"').nth(1).unwrap_or(wkt).trim()
}

pub fn lon_lat_to_web_mercator(c: Coord<f64>) -> Coord<f64> {
    let lat = c.y.clamp(-85.051_128_78, 85.051_128_78).to_radians();
    Coord {
        x: EARTH_RADIUS * c.x.to_radians(),
        y: EARTH_RADIUS * (FRAC_PI_4 + lat / 2.0).tan().ln(),
    }
}

pub fn web_mercator_to_lon_lat(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (c.x / EARTH_RADIUS).to_degrees(),
        y: (2.0 * (c.y / EARTH_RADIUS).exp().atan() - FRAC_PI_2).to_degrees(),
    }
}

/// Forward Albers Equal Area Conic with the EPSG:5070 parameters.
pub struct ConusAlbers {
    e: f64,
    n: f64,
    c: f64,
    rho0: f64,
}

impl ConusAlbers {
    pub fn new() -> Self {
        let f = 1.0 / GRS80_INV_F;
        let e = (2.0 * f - f * f).sqrt();

        let m = |lat: f64| {
            let s = lat.to_radians().sin();
            lat.to_radians().cos() / (1.0 - e * e * s * s).sqrt()
        };
        let q = |lat: f64| q_of(e, lat.to_radians().sin());

        let (m1, m2) = (m(ALBERS_LAT1), m(ALBERS_LAT2));
        let (q0, q1, q2) = (q(ALBERS_LAT0), q(ALBERS_LAT1), q(ALBERS_LAT2));
        let n = (m1 * m1 - m2 * m2) / (q2 - q1);
        let c = m1 * m1 + n * q1;
        let rho0 = GRS80_A * (c - n * q0).sqrt() / n;

        Self { e, n, c, rho0 }
    }

    pub fn project(&self, lon_lat: Coord<f64>) -> Coord<f64> {
        let q = q_of(self.e, lon_lat.y.to_radians().sin());
        let rho = GRS80_A * (self.c - self.n * q).sqrt() / self.n;
        let theta = self.n * (lon_lat.x - ALBERS_LON0).to_radians();
        Coord {
            x: rho * theta.sin(),
            y: self.rho0 - rho * theta.cos(),
        }
    }
}

impl Default for ConusAlbers {
    fn default() -> Self {
        Self::new()
    }
}

fn q_of(e: f64, sin_lat: f64) -> f64 {
    let es = e * sin_lat;
    (1.0 - e * e) * (sin_lat / (1.0 - es * es) - (1.0 / (2.0 * e)) * ((1.0 - es) / (1.0 + es)).ln())
}

/// Area in square meters of a Web Mercator geometry, measured in EPSG:5070.
pub fn equal_area_m2(geometry: &MultiPolygon<f64>) -> f64 {
    let albers = ConusAlbers::new();
    geometry
        .map_coords(|c| albers.project(web_mercator_to_lon_lat(c)))
        .unsigned_area()
}

pub fn square_meters_to_acres(m2: f64) -> f64 {
    m2 / 1e6 * ACRES_PER_SQ_KM
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use geo::{polygon, GeodesicArea};

    #[test]
    fn web_mercator_round_trip() {
        let oakland = Coord { x: -122.2711, y: 37.8044 };
        let back = web_mercator_to_lon_lat(lon_lat_to_web_mercator(oakland));
        assert_abs_diff_eq!(back.x, oakland.x, epsilon = 1e-9);
        assert_abs_diff_eq!(back.y, oakland.y, epsilon = 1e-9);
    }

    #[test]
    fn web_mercator_origin_and_antimeridian() {
        let origin = lon_lat_to_web_mercator(Coord { x: 0.0, y: 0.0 });
        assert_abs_diff_eq!(origin.x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(origin.y, 0.0, epsilon = 1e-9);
        let edge = lon_lat_to_web_mercator(Coord { x: 180.0, y: 0.0 });
        assert_abs_diff_eq!(edge.x, 20_037_508.342_789_244, epsilon = 1e-6);
    }

    #[test]
    fn albers_origin_maps_to_zero() {
        let p = ConusAlbers::new().project(Coord { x: ALBERS_LON0, y: ALBERS_LAT0 });
        assert_abs_diff_eq!(p.x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn albers_area_matches_geodesic_area() {
        // Roughly a census tract in downtown Oakland.
        let lon_lat = polygon![
            (x: -122.280, y: 37.800),
            (x: -122.265, y: 37.800),
            (x: -122.265, y: 37.812),
            (x: -122.280, y: 37.812),
            (x: -122.280, y: 37.800),
        ];
        let geodesic = lon_lat.geodesic_area_unsigned();
        let mercator = MultiPolygon::new(vec![lon_lat.map_coords(lon_lat_to_web_mercator)]);
        let albers = equal_area_m2(&mercator);
        assert!(
            ((albers - geodesic) / geodesic).abs() < 0.005,
            "albers {albers} vs geodesic {geodesic}"
        );
    }

    #[test]
    fn recognizes_prj_contents() {
        let esri = r#"PROJCS["WGS_1984_Web_Mercator_Auxiliary_Sphere",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Mercator_Auxiliary_Sphere"]]"#;
        let geographic = r#"GEOGCS["GCS_North_American_1983",DATUM["D_North_American_1983",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
        let teale = r#"PROJCS["NAD_1983_California_Teale_Albers",GEOGCS["GCS_North_American_1983"],PROJECTION["Albers"]]"#;

        assert_eq!(Crs::from_wkt(esri), Some(Crs::WebMercator));
        assert_eq!(Crs::from_wkt(geographic), Some(Crs::Wgs84));
        assert_eq!(Crs::from_wkt(teale), None);
        assert_eq!(wkt_name(teale), "NAD_1983_California_Teale_Albers");
    }

    #[test]
    fn recognizes_geojson_crs_names() {
        assert_eq!(Crs::from_name("urn:ogc:def:crs:EPSG::3857"), Some(Crs::WebMercator));
        assert_eq!(Crs::from_name("urn:ogc:def:crs:OGC:1.3:CRS84"), Some(Crs::Wgs84));
        assert_eq!(Crs::from_name("EPSG:4326"), Some(Crs::Wgs84));
        assert_eq!(Crs::from_name("EPSG:3310"), None);
    }

    #[test]
    fn one_square_kilometer_is_247_acres() {
        assert_abs_diff_eq!(square_meters_to_acres(1e6), 247.0, epsilon = 1e-12);
    }
}
