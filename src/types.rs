use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalised city name used for every join and lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CityKey(String);

impl CityKey {
    /// Trim and lowercase a city cell or a click payload.
    pub fn new(raw: &str) -> Self {
        CityKey(raw.trim().to_lowercase())
    }

    /// Boundary layers name cities "City of Manila" or "Makati City"; strip
    /// those markers before the usual normalisation.
    pub fn from_boundary_name(raw: &str) -> Self {
        CityKey::new(&raw.replace("City of", "").replace("City", ""))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First letter upper-cased, the rest lower-cased ("san juan" -> "San juan").
    pub fn capitalized(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
            None => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for CityKey {
    fn from(raw: String) -> Self {
        CityKey::new(&raw)
    }
}

impl From<CityKey> for String {
    fn from(key: CityKey) -> Self {
        key.0
    }
}

impl fmt::Display for CityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A row that belongs to a city.
pub trait CityRecord {
    fn city(&self) -> &CityKey;
}

/// A row with a numeric value column that gets aggregated per city.
pub trait ValueRecord: CityRecord {
    fn value(&self) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub city: CityKey,
    pub price: f64,
    pub floor_area: f64,
    pub bedrooms: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobPosting {
    pub city: CityKey,
    pub company: String,
    pub salary: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct School {
    pub city: CityKey,
    pub sector: String,
    pub curricular_class: String,
    pub name: String,
}

impl CityRecord for Listing {
    fn city(&self) -> &CityKey {
        &self.city
    }
}

impl ValueRecord for Listing {
    fn value(&self) -> f64 {
        self.price
    }
}

impl CityRecord for JobPosting {
    fn city(&self) -> &CityKey {
        &self.city
    }
}

impl ValueRecord for JobPosting {
    fn value(&self) -> f64 {
        self.salary
    }
}

impl CityRecord for School {
    fn city(&self) -> &CityKey {
        &self.city
    }
}

#[derive(Debug, Clone)]
pub struct CityPolygon {
    pub key: CityKey,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
pub struct CityAggregate {
    pub key: CityKey,
    pub geometry: MultiPolygon<f64>,
    /// Median of the dataset's value column for this city
    pub statistic: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CityCount {
    pub city: CityKey,
    pub count: usize,
}

/// Choice of the city comparison radio group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    #[default]
    Sale,
    Rent,
    Jobs,
}

/// Choice of the property comparison radio group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    #[default]
    Sale,
    Rent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_names_normalise() {
        let keys: Vec<CityKey> = ["City of Manila", "Makati City", " Pasig "]
            .iter()
            .map(|raw| CityKey::from_boundary_name(raw))
            .collect();
        let names: Vec<&str> = keys.iter().map(CityKey::as_str).collect();
        assert_eq!(names, vec!["manila", "makati", "pasig"]);
    }

    #[test]
    fn test_multi_word_city_keeps_inner_space() {
        assert_eq!(CityKey::from_boundary_name("City of San Juan").as_str(), "san juan");
        assert_eq!(CityKey::from_boundary_name("Quezon City").as_str(), "quezon");
    }

    #[test]
    fn test_capitalized_matches_title_case_of_first_word_only() {
        assert_eq!(CityKey::new("san juan").capitalized(), "San juan");
        assert_eq!(CityKey::new("MAKATI").capitalized(), "Makati");
        assert_eq!(CityKey::new("").capitalized(), "");
    }

    #[test]
    fn test_deserialising_a_key_normalises_it() {
        let key: CityKey = serde_json::from_str("\" Makati \"").unwrap();
        assert_eq!(key, CityKey::new("makati"));
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"makati\"");
    }
}
