use crate::config::AppConfig;
use crate::types::{CityKey, CityPolygon};
use anyhow::{Context, Result, anyhow, bail};
use geo::{MapCoords, MultiPolygon};
use shapefile::Reader;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// One administrative polygon with its two name levels.
#[derive(Debug, Clone)]
pub struct BoundaryRow {
    pub region: String,
    pub subregion: String,
    pub geometry: MultiPolygon<f64>,
}

/// Projection of the boundary layer as delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCrs {
    /// EPSG:4326, already what the maps expect
    Wgs84,
    /// EPSG:3857 spherical mercator metres
    WebMercator,
}

impl SourceCrs {
    pub fn from_epsg(code: u32) -> Result<Self> {
        match code {
            4326 => Ok(SourceCrs::Wgs84),
            3857 | 900913 => Ok(SourceCrs::WebMercator),
            other => Err(anyhow!("Unsupported boundary projection EPSG:{}", other)),
        }
    }

    /// Reads the ESRI WKT found in a .prj sidecar.
    pub fn from_wkt(wkt: &str) -> Result<Self> {
        let wkt = wkt.trim();
        if wkt.starts_with("GEOGCS") {
            if !wkt.contains("WGS_1984") && !wkt.contains("WGS 84") {
                warn!("Boundary datum is not WGS84, treating coordinates as EPSG:4326");
            }
            return Ok(SourceCrs::Wgs84);
        }
        if wkt.starts_with("PROJCS") && (wkt.contains("Mercator_Auxiliary_Sphere")
            || wkt.contains("Pseudo-Mercator")
            || wkt.contains("Popular_Visualisation"))
        {
            return Ok(SourceCrs::WebMercator);
        }
        Err(anyhow!("Unsupported boundary projection: {}", wkt.chars().take(60).collect::<String>()))
    }

    pub fn to_wgs84(self, geometry: MultiPolygon<f64>) -> MultiPolygon<f64> {
        match self {
            SourceCrs::Wgs84 => geometry,
            SourceCrs::WebMercator => geometry.map_coords(|c| geo::Coord {
                x: (c.x / EARTH_RADIUS_M).to_degrees(),
                y: (2.0 * (c.y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees(),
            }),
        }
    }
}

pub fn load_city_polygons(config: &AppConfig) -> Result<Vec<CityPolygon>> {
    let path = &config.input.boundaries;
    let extension = path.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Boundary file has no extension"))?;

    let rows = match extension.as_str() {
        "shp" => {
            let crs = match config.input.source_epsg {
                Some(code) => SourceCrs::from_epsg(code)?,
                None => detect_shapefile_crs(path)?,
            };
            load_shapefile(path, &config.input.region_column, &config.input.subregion_column, crs)?
        }
        // RFC 7946 GeoJSON is always WGS84
        "json" | "geojson" => load_geojson(path, &config.input.region_column, &config.input.subregion_column)?,
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };
    info!(rows = rows.len(), "Loaded boundary layer");

    let cities = city_polygons(rows, &config.region.name)?;
    info!(cities = cities.len(), region = %config.region.name, "Filtered boundaries to region");
    Ok(cities)
}

fn detect_shapefile_crs(path: &Path) -> Result<SourceCrs> {
    let prj = path.with_extension("prj");
    match fs::read_to_string(&prj) {
        Ok(wkt) => SourceCrs::from_wkt(&wkt),
        Err(_) => {
            warn!("No projection file at {:?}, assuming EPSG:4326", prj);
            Ok(SourceCrs::Wgs84)
        }
    }
}

/// Keeps the rows of `region`, keyed by normalised sub-region name.
///
/// Rows sharing a key are merged into one multipolygon.
pub fn city_polygons(rows: Vec<BoundaryRow>, region: &str) -> Result<Vec<CityPolygon>> {
    let mut merged: BTreeMap<CityKey, MultiPolygon<f64>> = BTreeMap::new();

    for row in rows.into_iter().filter(|row| row.region == region) {
        let key = CityKey::from_boundary_name(&row.subregion);
        if key.is_empty() {
            continue;
        }
        merged.entry(key)
            .or_insert_with(|| MultiPolygon::new(Vec::new()))
            .0
            .extend(row.geometry.0);
    }

    if merged.is_empty() {
        bail!("No boundaries matched region '{}'", region);
    }

    Ok(merged.into_iter()
        .map(|(key, geometry)| CityPolygon { key, geometry })
        .collect())
}

fn load_shapefile(path: &Path, region_col: &str, subregion_col: &str, crs: SourceCrs) -> Result<Vec<BoundaryRow>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut rows = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let region = match shape_text(&record, region_col)? {
            Some(s) => s,
            None => continue,
        };
        let subregion = match shape_text(&record, subregion_col)? {
            Some(s) => s,
            None => continue,
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => continue, // Skip non-polygon shapes
        };

        rows.push(BoundaryRow {
            region,
            subregion,
            geometry: crs.to_wgs84(geometry),
        });
    }

    Ok(rows)
}

fn shape_text(record: &shapefile::dbase::Record, column: &str) -> Result<Option<String>> {
    let value = record.get(column)
        .ok_or_else(|| anyhow!("Column '{}' not found in Shapefile", column))?;
    match value {
        shapefile::dbase::FieldValue::Character(Some(s)) => Ok(Some(s.clone())),
        shapefile::dbase::FieldValue::Character(None) => Ok(None),
        _ => Err(anyhow!("Shapefile column '{}' must be a string", column)),
    }
}

fn load_geojson(path: &Path, region_col: &str, subregion_col: &str) -> Result<Vec<BoundaryRow>> {
    use geojson::GeoJson;

    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let geojson = GeoJson::from_reader(BufReader::new(file)).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut rows = Vec::new();

    for feature in collection.features {
        let text = |column: &str| -> Result<Option<String>> {
            let props = feature.properties.as_ref()
                .ok_or_else(|| anyhow!("GeoJSON feature has no properties"))?;
            match props.get(column) {
                Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
                Some(serde_json::Value::Null) => Ok(None),
                Some(_) => Err(anyhow!("GeoJSON property '{}' must be a string", column)),
                None => Err(anyhow!("Property '{}' not found in GeoJSON", column)),
            }
        };
        let (Some(region), Some(subregion)) = (text(region_col)?, text(subregion_col)?) else {
            continue;
        };

        let geometry = match &feature.geometry {
            Some(geom) => {
                let valid_geo: geo::Geometry<f64> = geom.value.clone().try_into()
                    .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;
                match valid_geo {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => continue, // Skip points/lines
                }
            }
            None => continue,
        };

        rows.push(BoundaryRow { region, subregion, geometry });
    }

    Ok(rows)
}
