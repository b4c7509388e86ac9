//! The dashboard callbacks. Each one is a pure function of the prepared
//! tables and a [`UiState`] snapshot.

use crate::processing::PreparedData;
use crate::render::{self, Figure};
use crate::stats;
use crate::types::{CityKey, CityRecord, Dataset, Listing, PropertyKind};
use serde::{Deserialize, Serialize};

const TOP_COMPANIES: usize = 10;

/// Current value of every control plus the last click on each clickable chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiState {
    #[serde(default)]
    pub dataset: Dataset,
    #[serde(default)]
    pub property: PropertyKind,
    /// Budget slider value; `None` until the slider has been bounded
    #[serde(default)]
    pub budget: Option<f64>,
    /// City clicked on the choropleth
    #[serde(default)]
    pub selected_city: Option<CityKey>,
    /// City bar clicked on the school chart
    #[serde(default)]
    pub selected_bar: Option<CityKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SliderBounds {
    pub min: f64,
    pub max: f64,
    /// Median, also the value the slider resets to
    pub default: f64,
}

/// Which rows a detail chart covers.
#[derive(Debug, Clone, Copy)]
enum Scope<'a> {
    Region,
    City(&'a CityKey),
}

impl<'a> Scope<'a> {
    fn from_selection(selection: &'a Option<CityKey>) -> Self {
        match selection {
            Some(city) => Scope::City(city),
            None => Scope::Region,
        }
    }

    fn filter<'r, T: CityRecord>(self, rows: &'r [T]) -> Vec<&'r T> {
        match self {
            Scope::Region => rows.iter().collect(),
            Scope::City(city) => rows.iter().filter(|row| row.city() == city).collect(),
        }
    }

    fn color(self, dataset: Dataset) -> &'static str {
        match self {
            Scope::City(city) => render::city_color(city).unwrap_or(render::dataset_color(dataset)),
            Scope::Region => render::dataset_color(dataset),
        }
    }

    fn no_data(self) -> String {
        match self {
            Scope::City(city) => format!("No records for {} City", city.capitalized()),
            Scope::Region => "No records".to_string(),
        }
    }
}

pub fn update_choropleth(data: &PreparedData, state: &UiState) -> Figure {
    let label = &data.region_label;
    let title = match state.dataset {
        Dataset::Sale => format!("Median Property Prices in Select {} Cities", label),
        Dataset::Rent => format!("Median Rental Prices in Select {} Cities", label),
        Dataset::Jobs => format!("Median Job Salaries in Select {} Cities", label),
    };
    render::choropleth(data.aggregates(state.dataset), state.dataset, title)
}

/// Floor area scatter for listings, top companies for jobs.
pub fn update_detail(data: &PreparedData, state: &UiState) -> Figure {
    let scope = Scope::from_selection(&state.selected_city);
    let label = &data.region_label;

    match state.dataset {
        Dataset::Sale | Dataset::Rent => {
            let (rows, noun) = match state.dataset {
                Dataset::Rent => (&data.rent, "Rental"),
                _ => (&data.sale, "Property"),
            };
            let title = match scope {
                Scope::City(city) => format!("{} Price vs Floor Area in {} City", noun, city.capitalized()),
                Scope::Region => format!("{} Price vs Floor Area in Select {}", noun, label),
            };
            let rows = scope.filter(rows);
            if rows.is_empty() {
                return Figure::no_data(title, render::detail_layout(), scope.no_data());
            }
            render::price_scatter(&rows, title)
        }
        Dataset::Jobs => {
            let title = match scope {
                Scope::City(city) => format!("Top Ten Companies with Most Job Openings in {} City", city.capitalized()),
                Scope::Region => "Top Ten Companies with Most Job Openings".to_string(),
            };
            let rows = scope.filter(&data.jobs);
            if rows.is_empty() {
                return Figure::no_data(title, render::detail_layout(), scope.no_data());
            }
            render::company_bar(&rows, TOP_COMPANIES, scope.color(Dataset::Jobs), title)
        }
    }
}

pub fn update_histogram(data: &PreparedData, state: &UiState) -> Figure {
    let scope = Scope::from_selection(&state.selected_city);
    let place = match scope {
        Scope::City(city) => format!("{} City", city.capitalized()),
        Scope::Region => "Select Cities".to_string(),
    };

    let (values, bins, value_label, title): (Vec<f64>, usize, &'static str, String) = match state.dataset {
        Dataset::Sale => (
            scope.filter(&data.sale).iter().map(|row| row.price).collect(),
            5,
            "price",
            format!("Distribution of Property Prices in {}", place),
        ),
        Dataset::Rent => (
            scope.filter(&data.rent).iter().map(|row| row.price).collect(),
            5,
            "price",
            format!("Distribution of Rental Prices in {}", place),
        ),
        Dataset::Jobs => {
            let title = match scope {
                Scope::City(city) => format!("Distribution of Salaries Offered in {} City", city.capitalized()),
                Scope::Region => "Distribution of Salaries in Select Cities".to_string(),
            };
            (scope.filter(&data.jobs).iter().map(|row| row.salary).collect(), 6, "salary", title)
        }
    };

    if values.iter().all(|v| !v.is_finite()) {
        return Figure::no_data(title, render::detail_layout(), scope.no_data());
    }
    render::histogram(values, bins, value_label, scope.color(state.dataset), title)
}

/// {min, max, median} of price over the listings the scatter map shows.
pub fn slider_bounds(rows: &[Listing]) -> Option<SliderBounds> {
    let prices = || rows.iter().map(|row| row.price);
    Some(SliderBounds {
        min: stats::min(prices())?,
        max: stats::max(prices())?,
        default: stats::median(prices())?,
    })
}

pub fn update_slider(data: &PreparedData, state: &UiState) -> Option<SliderBounds> {
    slider_bounds(data.mapped_listings(state.property))
}

pub fn update_scatter_map(data: &PreparedData, state: &UiState) -> Figure {
    let rows = data.mapped_listings(state.property);
    let title = match state.property {
        PropertyKind::Sale => "Properties for Sale within Budget",
        PropertyKind::Rent => "Properties for Rent within Budget",
    }
    .to_string();

    let budget = state.budget.or_else(|| slider_bounds(rows).map(|b| b.default));
    let Some(budget) = budget else {
        return Figure::no_data(title, render::scatter_map_layout(), "No listings with a price");
    };

    let rows: Vec<&Listing> = rows.iter().filter(|row| row.price <= budget).collect();
    if rows.is_empty() {
        return Figure::no_data(title, render::scatter_map_layout(), "No listings within budget");
    }
    render::scatter_map(&rows, state.property, title)
}

pub fn school_bar(data: &PreparedData, _state: &UiState) -> Figure {
    let title = format!("Total Number of Schools in Select {} Cities", data.region_label);
    render::school_bar(&data.school_counts, title)
}

pub fn update_treemap(data: &PreparedData, state: &UiState) -> Figure {
    let scope = Scope::from_selection(&state.selected_bar);
    let title = match scope {
        Scope::City(city) => format!(
            "Schools in {} City Grouped According to its Sector and Curricular Offering",
            city.capitalized()
        ),
        Scope::Region => format!(
            "Schools in {} Grouped According to its Sector and Curricular Offering",
            data.region_label
        ),
    };

    let rows = scope.filter(&data.schools);
    if rows.is_empty() {
        return Figure::no_data(title, render::treemap_layout(), scope.no_data());
    }
    render::treemap(&rows, title)
}
