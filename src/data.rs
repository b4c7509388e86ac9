use crate::config::AppConfig;
use crate::types::{CityKey, JobPosting, Listing, School};
use anyhow::{Context, Result, anyhow};
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// The four cleaned datasets, in file order.
#[derive(Debug, Clone, Default)]
pub struct RawTables {
    pub sale: Vec<Listing>,
    pub rent: Vec<Listing>,
    pub jobs: Vec<JobPosting>,
    pub schools: Vec<School>,
}

pub fn load_tables(config: &AppConfig) -> Result<RawTables> {
    info!("Loading tables...");

    let tables = RawTables {
        sale: load_listings(&config.input.sale_csv)?,
        rent: load_listings(&config.input.rent_csv)?,
        jobs: load_jobs(&config.input.jobs_csv)?,
        schools: load_schools(&config.input.schools_csv)?,
    };

    info!(
        sale = tables.sale.len(),
        rent = tables.rent.len(),
        jobs = tables.jobs.len(),
        schools = tables.schools.len(),
        "Loaded tables"
    );
    Ok(tables)
}

pub fn load_listings(path: &Path) -> Result<Vec<Listing>> {
    read_listings(open(path)?, &path.display().to_string())
}

pub fn load_jobs(path: &Path) -> Result<Vec<JobPosting>> {
    read_jobs(open(path)?, &path.display().to_string())
}

pub fn load_schools(path: &Path) -> Result<Vec<School>> {
    read_schools(open(path)?, &path.display().to_string())
}

fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open CSV file: {:?}", path))
}

pub fn read_listings<R: Read>(reader: R, source: &str) -> Result<Vec<Listing>> {
    let mut table = Table::new(reader, source)?;
    let city = table.column("city")?;
    let price = table.column("price")?;
    let floor_area = table.column("floor_area")?;
    let bedrooms = table.column("bedroom_num")?;
    let latitude = table.column("latitude")?;
    let longitude = table.column("longitude")?;
    let name = table.column("listing")?;

    table.rows(|row| {
        Ok(Listing {
            city: CityKey::new(row.text(city)),
            price: row.number(price)?,
            floor_area: row.number(floor_area)?,
            bedrooms: row.number(bedrooms)?,
            latitude: row.number(latitude)?,
            longitude: row.number(longitude)?,
            name: row.text(name).to_string(),
        })
    })
}

pub fn read_jobs<R: Read>(reader: R, source: &str) -> Result<Vec<JobPosting>> {
    let mut table = Table::new(reader, source)?;
    let city = table.column("city")?;
    let company = table.column("company")?;
    let salary = table.column("salary")?;

    table.rows(|row| {
        Ok(JobPosting {
            city: CityKey::new(row.text(city)),
            company: row.text(company).to_string(),
            salary: row.number(salary)?,
        })
    })
}

pub fn read_schools<R: Read>(reader: R, source: &str) -> Result<Vec<School>> {
    let mut table = Table::new(reader, source)?;
    let city = table.column("city")?;
    let sector = table.column("sector")?;
    let curricular_class = table.column("curricular_class")?;
    let name = table.column("school_name")?;

    table.rows(|row| {
        Ok(School {
            city: CityKey::new(row.text(city)),
            sector: row.text(sector).to_string(),
            curricular_class: row.text(curricular_class).to_string(),
            name: row.text(name).to_string(),
        })
    })
}

struct Table<'a, R: Read> {
    reader: csv::Reader<R>,
    source: &'a str,
    col_indices: HashMap<String, usize>,
}

impl<'a, R: Read> Table<'a, R> {
    fn new(reader: R, source: &'a str) -> Result<Self> {
        let mut reader = ReaderBuilder::new().from_reader(reader);
        let headers = reader.headers()
            .with_context(|| format!("Failed to read CSV header of {}", source))?
            .clone();

        // Map column names to indices for faster lookup
        let col_indices: HashMap<String, usize> = headers.iter().enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect();

        Ok(Table { reader, source, col_indices })
    }

    fn column(&self, name: &str) -> Result<usize> {
        self.col_indices.get(name).copied()
            .ok_or_else(|| anyhow!("Column '{}' not found in {}", name, self.source))
    }

    fn rows<T>(&mut self, mut parse: impl FnMut(&Row<'_>) -> Result<T>) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for (i, result) in self.reader.records().enumerate() {
            let record = result.with_context(|| format!("Malformed CSV in {}", self.source))?;
            let row = Row { record: &record, source: self.source, line: i + 2 };
            rows.push(parse(&row)?);
        }
        Ok(rows)
    }
}

struct Row<'a> {
    record: &'a StringRecord,
    source: &'a str,
    line: usize,
}

impl Row<'_> {
    fn text(&self, idx: usize) -> &str {
        self.record.get(idx).unwrap_or("").trim()
    }

    /// Empty cells are missing values; anything else must parse.
    fn number(&self, idx: usize) -> Result<f64> {
        let cell = self.text(idx);
        if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
            return Ok(f64::NAN);
        }
        cell.parse::<f64>()
            .with_context(|| format!("Invalid number '{}' in {} line {}", cell, self.source, self.line))
    }
}
