use crate::boundaries;
use crate::config::AppConfig;
use crate::data::{self, RawTables};
use crate::stats;
use crate::types::{
    CityAggregate, CityCount, CityKey, CityPolygon, CityRecord, Dataset, JobPosting, Listing,
    PropertyKind, School, ValueRecord,
};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use tracing::{debug, info};

/// City aggregates indexed by key.
pub type CityAggregates = BTreeMap<CityKey, CityAggregate>;

/// Everything the dashboard reads, built once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub region_label: String,
    pub sale: Vec<Listing>,
    pub rent: Vec<Listing>,
    pub jobs: Vec<JobPosting>,
    pub schools: Vec<School>,
    pub cities: Vec<CityPolygon>,
    pub sale_by_city: CityAggregates,
    pub rent_by_city: CityAggregates,
    pub jobs_by_city: CityAggregates,
    /// Sale listings inside the region's latitude band
    pub sale_in_region: Vec<Listing>,
    pub school_counts: Vec<CityCount>,
}

impl PreparedData {
    pub fn aggregates(&self, dataset: Dataset) -> &CityAggregates {
        match dataset {
            Dataset::Sale => &self.sale_by_city,
            Dataset::Rent => &self.rent_by_city,
            Dataset::Jobs => &self.jobs_by_city,
        }
    }

    /// Listings behind the budget slider and the scatter map.
    pub fn mapped_listings(&self, kind: PropertyKind) -> &[Listing] {
        match kind {
            PropertyKind::Sale => &self.sale_in_region,
            PropertyKind::Rent => &self.rent,
        }
    }
}

pub fn prepare(config: &AppConfig) -> Result<PreparedData> {
    let tables = data::load_tables(config)?;
    let cities = boundaries::load_city_polygons(config)?;
    let prepared = assemble(
        tables,
        cities,
        config.region.latitude_range(),
        &config.region.label,
    );

    info!(
        sale_cities = prepared.sale_by_city.len(),
        rent_cities = prepared.rent_by_city.len(),
        job_cities = prepared.jobs_by_city.len(),
        sale_in_region = prepared.sale_in_region.len(),
        "Data preparation complete"
    );
    Ok(prepared)
}

/// Joins loaded tables with city polygons.
pub fn assemble(
    tables: RawTables,
    cities: Vec<CityPolygon>,
    latitude_range: Range<f64>,
    region_label: &str,
) -> PreparedData {
    let RawTables { sale, rent, jobs, schools } = tables;

    let (sale_by_city, (rent_by_city, jobs_by_city)) = rayon::join(
        || join_medians(&cities, &city_medians(&sale)),
        || rayon::join(
            || join_medians(&cities, &city_medians(&rent)),
            || join_medians(&cities, &city_medians(&jobs)),
        ),
    );

    let sale_in_region = within_latitude(&sale, &latitude_range);
    debug!(dropped = sale.len() - sale_in_region.len(), "Latitude outliers removed from sale listings");

    let school_counts = count_by_city(&schools);

    PreparedData {
        region_label: region_label.to_string(),
        sale,
        rent,
        jobs,
        schools,
        cities,
        sale_by_city,
        rent_by_city,
        jobs_by_city,
        sale_in_region,
        school_counts,
    }
}

/// Median of the value column per city; cities without a finite value are absent.
/// Rows with a blank city are ignored.
pub fn city_medians<T: ValueRecord>(rows: &[T]) -> BTreeMap<CityKey, f64> {
    let mut grouped: BTreeMap<&CityKey, Vec<f64>> = BTreeMap::new();
    for row in rows.iter().filter(|row| !row.city().is_empty()) {
        grouped.entry(row.city()).or_default().push(row.value());
    }

    grouped.into_iter()
        .filter_map(|(city, values)| stats::median(values).map(|m| (city.clone(), m)))
        .collect()
}

/// Inner join: a city needs both a polygon and a median.
pub fn join_medians(cities: &[CityPolygon], medians: &BTreeMap<CityKey, f64>) -> CityAggregates {
    cities.iter()
        .filter_map(|city| {
            medians.get(&city.key).map(|&statistic| {
                (city.key.clone(), CityAggregate {
                    key: city.key.clone(),
                    geometry: city.geometry.clone(),
                    statistic,
                })
            })
        })
        .collect()
}

pub fn within_latitude(rows: &[Listing], range: &Range<f64>) -> Vec<Listing> {
    rows.iter()
        .filter(|row| range.contains(&row.latitude))
        .cloned()
        .collect()
}

/// Row count per city, largest first, ties by key. Blank cities are not counted.
pub fn count_by_city<T: CityRecord>(rows: &[T]) -> Vec<CityCount> {
    let mut counts: HashMap<&CityKey, usize> = HashMap::new();
    for row in rows.iter().filter(|row| !row.city().is_empty()) {
        *counts.entry(row.city()).or_default() += 1;
    }

    let mut counts: Vec<CityCount> = counts.into_iter()
        .map(|(city, count)| CityCount { city: city.clone(), count })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.city.cmp(&b.city)));
    counts
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use geo::{MultiPolygon, polygon};

    pub(crate) fn listing(city: &str, price: f64, latitude: f64) -> Listing {
        Listing {
            city: CityKey::new(city),
            price,
            floor_area: price / 1000.0,
            bedrooms: 1.0,
            latitude,
            longitude: 121.0,
            name: format!("{} {}", city, price),
        }
    }

    pub(crate) fn job(city: &str, company: &str, salary: f64) -> JobPosting {
        JobPosting { city: CityKey::new(city), company: company.to_string(), salary }
    }

    pub(crate) fn school(city: &str, sector: &str, class: &str, name: &str) -> School {
        School {
            city: CityKey::new(city),
            sector: sector.to_string(),
            curricular_class: class.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn city(name: &str, x: f64) -> CityPolygon {
        CityPolygon {
            key: CityKey::from_boundary_name(name),
            geometry: MultiPolygon::new(vec![polygon![
                (x: x, y: 14.5), (x: x + 0.05, y: 14.5), (x: x + 0.05, y: 14.6), (x: x, y: 14.6), (x: x, y: 14.5)
            ]]),
        }
    }

    pub(crate) fn fixture() -> PreparedData {
        let tables = RawTables {
            sale: vec![
                listing("makati", 100.0, 14.55),
                listing("makati", 300.0, 14.56),
                listing("makati", 200.0, 16.2),
                listing("pasig", 50.0, 14.57),
                listing("caloocan", 80.0, 14.65),
            ],
            rent: vec![
                listing("makati", 30.0, 14.55),
                listing("pasig", 10.0, 14.57),
                listing("pasig", 20.0, 14.58),
            ],
            jobs: vec![
                job("makati", "Acme", 40.0),
                job("makati", "Acme", 60.0),
                job("makati", "Globex", 50.0),
                job("pasig", "Initech", 20.0),
            ],
            schools: vec![
                school("manila", "Public", "Purely ES", "Rizal ES"),
                school("manila", "Private", "Purely JHS", "Bonifacio HS"),
                school("makati", "Public", "Purely ES", "Makati ES"),
            ],
        };
        let cities = vec![
            city("Makati City", 121.0),
            city(" Pasig ", 121.1),
            city("City of Manila", 120.9),
        ];
        assemble(tables, cities, 14.0..15.0, "Metro Manila")
    }

    #[test]
    fn test_inner_join_drops_cities_missing_either_side() {
        let data = fixture();
        // caloocan has listings but no polygon; manila has a polygon but no listings
        let keys: Vec<&str> = data.sale_by_city.keys().map(CityKey::as_str).collect();
        assert_eq!(keys, vec!["makati", "pasig"]);
        assert!(!data.jobs_by_city.contains_key(&CityKey::new("manila")));
    }

    #[test]
    fn test_statistic_is_city_median() {
        let data = fixture();
        for (key, aggregate) in &data.sale_by_city {
            let direct = stats::median(data.sale.iter().filter(|l| &l.city == key).map(|l| l.price));
            assert_eq!(Some(aggregate.statistic), direct);
        }
        assert_eq!(data.sale_by_city[&CityKey::new("makati")].statistic, 200.0);
        assert_eq!(data.rent_by_city[&CityKey::new("pasig")].statistic, 15.0);
        assert_eq!(data.jobs_by_city[&CityKey::new("makati")].statistic, 50.0);
    }

    #[test]
    fn test_city_with_only_missing_values_is_not_aggregated() {
        let rows = vec![listing("pasig", f64::NAN, 14.5), listing("makati", 10.0, 14.5)];
        let medians = city_medians(&rows);
        assert_eq!(medians.len(), 1);
        assert!(medians.contains_key(&CityKey::new("makati")));
    }

    #[test]
    fn test_preparation_is_idempotent() {
        let a = fixture();
        let b = fixture();
        for dataset in [Dataset::Sale, Dataset::Rent, Dataset::Jobs] {
            let left: Vec<(&CityKey, f64)> = a.aggregates(dataset).iter().map(|(k, v)| (k, v.statistic)).collect();
            let right: Vec<(&CityKey, f64)> = b.aggregates(dataset).iter().map(|(k, v)| (k, v.statistic)).collect();
            assert_eq!(left, right);
        }
        let keys_a: Vec<&CityKey> = a.cities.iter().map(|c| &c.key).collect();
        let keys_b: Vec<&CityKey> = b.cities.iter().map(|c| &c.key).collect();
        assert_eq!(keys_a, keys_b);
    }

    #[test]
    fn test_latitude_outliers_are_excluded() {
        let data = fixture();
        assert!(data.sale_in_region.iter().all(|l| l.latitude != 16.2));
        assert!(data.sale_in_region.iter().any(|l| l.latitude == 14.55));
        assert_eq!(data.sale_in_region.len(), 4);

        let edge = within_latitude(&[listing("makati", 1.0, 15.0), listing("makati", 1.0, 14.0)], &(14.0..15.0));
        assert_eq!(edge.len(), 1);
        assert_eq!(edge[0].latitude, 14.0);
    }

    #[test]
    fn test_school_counts_sorted_by_count() {
        let data = fixture();
        assert_eq!(data.school_counts, vec![
            CityCount { city: CityKey::new("manila"), count: 2 },
            CityCount { city: CityKey::new("makati"), count: 1 },
        ]);
    }

    #[test]
    fn test_blank_city_rows_are_not_grouped() {
        let schools = vec![
            school("", "Public", "Purely ES", "Nameless ES"),
            school("manila", "Public", "Purely ES", "Rizal ES"),
        ];
        assert_eq!(count_by_city(&schools), vec![CityCount { city: CityKey::new("manila"), count: 1 }]);

        let rows = vec![listing(" ", 10.0, 14.5), listing("makati", 20.0, 14.5)];
        let medians = city_medians(&rows);
        assert_eq!(medians.keys().map(CityKey::as_str).collect::<Vec<_>>(), vec!["makati"]);
    }

    mod files {
        use super::*;
        use crate::boundaries::tests::{WGS84_PRJ, write_shapefile};
        use std::fs;
        use std::path::Path;

        const SALE: &str = "city,price,floor_area,bedroom_num,latitude,longitude,listing
Makati,100,50,1,14.55,121.02,Loft A
makati,300,80,2,14.56,121.02,Loft B
Manila,200,60,1,16.2,120.95,Condo C
Bacoor,90,40,1,14.4,120.9,House D
";
        const RENT: &str = "city,price,floor_area,bedroom_num,latitude,longitude,listing
Makati,20,30,1,14.55,121.02,Studio A
Makati,40,45,2,14.56,121.03,Studio B
";
        const JOBS: &str = "city,company,salary
Manila,Acme,50
Manila,Globex,
";
        const SCHOOLS: &str = "city,sector,curricular_class,school_name
Manila,Public,Purely ES,Rizal ES
,Public,Purely ES,Nameless ES
";

        fn write_inputs(dir: &Path, sale: &str) -> AppConfig {
            fs::write(dir.join("sale.csv"), sale).unwrap();
            fs::write(dir.join("rent.csv"), RENT).unwrap();
            fs::write(dir.join("jobs.csv"), JOBS).unwrap();
            fs::write(dir.join("schools.csv"), SCHOOLS).unwrap();

            let shp = dir.join("adm2.shp");
            write_shapefile(&shp, &[
                ("Metropolitan Manila", "Makati City", 121.0),
                ("Metropolitan Manila", "City of Manila", 120.9),
                ("Cavite", "Bacoor City", 120.8),
            ]);
            fs::write(shp.with_extension("prj"), WGS84_PRJ).unwrap();

            AppConfig::from_toml_str(&format!(r#"
                [input]
                sale_csv = "{dir}/sale.csv"
                rent_csv = "{dir}/rent.csv"
                jobs_csv = "{dir}/jobs.csv"
                schools_csv = "{dir}/schools.csv"
                boundaries = "{dir}/adm2.shp"

                [region]
                name = "Metropolitan Manila"

                [output]
                figure_dir = "{dir}/out"

                [server]
                port = 8050
            "#, dir = dir.display())).unwrap()
        }

        #[test]
        fn test_prepare_over_files_on_disk() {
            let dir = tempfile::tempdir().unwrap();
            let config = write_inputs(dir.path(), SALE);
            let data = prepare(&config).unwrap();

            let keys: Vec<&str> = data.cities.iter().map(|c| c.key.as_str()).collect();
            assert_eq!(keys, vec!["makati", "manila"]);

            assert_eq!(data.sale_by_city[&CityKey::new("makati")].statistic, 200.0);
            assert_eq!(data.sale_by_city[&CityKey::new("manila")].statistic, 200.0);
            assert!(!data.sale_by_city.contains_key(&CityKey::new("bacoor")));
            assert_eq!(data.rent_by_city.keys().map(CityKey::as_str).collect::<Vec<_>>(), vec!["makati"]);
            assert_eq!(data.jobs_by_city[&CityKey::new("manila")].statistic, 50.0);

            // Condo C sits at latitude 16.2
            assert_eq!(data.sale_in_region.len(), 3);
            assert_eq!(data.school_counts, vec![CityCount { city: CityKey::new("manila"), count: 1 }]);
        }

        #[test]
        fn test_prepare_fails_on_missing_column() {
            let dir = tempfile::tempdir().unwrap();
            let without_price = SALE.replacen("city,price,", "city,cost,", 1);
            let config = write_inputs(dir.path(), &without_price);
            let err = prepare(&config).unwrap_err();
            assert!(format!("{:#}", err).contains("price"));
        }
    }
}
