use serde::Deserialize;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    pub region: RegionConfig,
    pub output: OutputConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub sale_csv: PathBuf,
    pub rent_csv: PathBuf,
    pub jobs_csv: PathBuf,
    pub schools_csv: PathBuf,
    /// Shapefile (.shp) or GeoJSON boundary layer
    pub boundaries: PathBuf,
    #[serde(default = "default_region_column")]
    pub region_column: String,
    #[serde(default = "default_subregion_column")]
    pub subregion_column: String,
    /// Overrides the projection read from the .prj sidecar (4326 or 3857)
    pub source_epsg: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegionConfig {
    /// Value of the region column to keep, e.g. "Metropolitan Manila"
    pub name: String,
    /// Short name used in chart titles
    #[serde(default = "default_region_label")]
    pub label: String,
    #[serde(default = "default_latitude_min")]
    pub latitude_min: f64,
    #[serde(default = "default_latitude_max")]
    pub latitude_max: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub figure_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
}

fn default_region_column() -> String {
    "NAME_1".to_string()
}

fn default_subregion_column() -> String {
    "NAME_2".to_string()
}

fn default_region_label() -> String {
    "Metro Manila".to_string()
}

fn default_latitude_min() -> f64 {
    14.0
}

fn default_latitude_max() -> f64 {
    15.0
}

impl RegionConfig {
    /// Half-open latitude band used to drop mis-geocoded sale listings.
    pub fn latitude_range(&self) -> Range<f64> {
        self.latitude_min..self.latitude_max
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}
