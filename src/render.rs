//! Declarative chart specifications handed to the rendering surface.
//!
//! Nothing here draws; each builder turns already-scoped rows into a
//! serialisable [`Figure`] with data arrays, colours and layout hints.

use crate::processing::CityAggregates;
use crate::stats::{self, Bin};
use crate::types::{CityCount, CityKey, Dataset, JobPosting, Listing, PropertyKind, School};
use geojson::{Feature, FeatureCollection, Geometry, feature::Id};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Fixed colour per city so repeated runs look the same.
pub const CITY_COLORS: &[(&str, &str)] = &[
    ("quezon", "#9369a8"),
    ("manila", "#cd4a77"),
    ("taguig", "#3078b4"),
    ("pasig", "#9fdbad"),
    ("makati", "#f3df4d"),
    ("mandaluyong", "#feae51"),
    ("san juan", "#ec8b83"),
];

pub const BEDROOM_COLORS: &[(&str, &str)] = &[
    ("1.0", "#636EFA"),
    ("2.0", "#EF553B"),
    ("3.0", "#00CC96"),
];

pub const CURRICULAR_COLORS: &[(&str, &str)] = &[
    ("Purely ES", "#9d915a"),
    ("All Offering (K to 12)", "#b35f44"),
    ("ES and JHS (K to 10)", "#96999b"),
    ("Purely SHS", "#f0e3ce"),
    ("JHS with SHS", "#7f3838"),
    ("Purely JHS", "#00a779"),
];

/// Qualitative fallback for categories missing from a fixed map.
const QUALITATIVE: &[&str] = &[
    "#636EFA", "#EF553B", "#00CC96", "#AB63FA", "#FFA15A",
    "#19D3F3", "#FF6692", "#B6E880", "#FF97FF", "#FECB52",
];

const MEAN_COLOR: &str = "#FD3216";
const MEDIAN_COLOR: &str = "#00FE35";
const TREEMAP_ROOT_COLOR: &str = "#98b2d1";
const TEMPLATE: &str = "plotly_white";

const CHOROPLETH_CENTER: LatLon = LatLon { lat: 14.60886, lon: 121.037402 };
const DETAIL_HEIGHT: u32 = 420;

pub fn city_color(city: &CityKey) -> Option<&'static str> {
    lookup(CITY_COLORS, city.as_str())
}

/// Colour used when no city is selected.
pub fn dataset_color(dataset: Dataset) -> &'static str {
    match dataset {
        Dataset::Sale => "#b30000",
        Dataset::Rent => "#004999",
        Dataset::Jobs => "#357a38",
    }
}

fn lookup(map: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    map.iter().find(|(k, _)| *k == key).map(|(_, color)| *color)
}

/// Assigns fixed colours, then cycles the qualitative palette over the rest
/// in the order the labels are given.
fn category_colors(labels: &[String], fixed: &[(&str, &'static str)]) -> HashMap<String, &'static str> {
    let mut colors = HashMap::new();
    let mut next = fixed.len();
    for label in labels {
        if colors.contains_key(label) {
            continue;
        }
        let color = lookup(fixed, label).unwrap_or_else(|| {
            let color = QUALITATIVE[next % QUALITATIVE.len()];
            next += 1;
            color
        });
        colors.insert(label.clone(), color);
    }
    colors
}

#[derive(Debug, Clone, Serialize)]
pub struct Figure {
    pub title: String,
    pub layout: Layout,
    pub chart: Chart,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Layout {
    pub width: Option<u32>,
    pub height: u32,
    pub template: Option<&'static str>,
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub duration_ms: u32,
    pub easing: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chart {
    Choropleth(ChoroplethChart),
    Scatter(ScatterChart),
    Bar(BarChart),
    Histogram(HistogramChart),
    ScatterMap(ScatterMapChart),
    Treemap(TreemapChart),
    /// The scoped table had no rows
    NoData { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapView {
    pub center: LatLon,
    pub zoom: f64,
    pub style: Option<&'static str>,
    pub opacity: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColorScale {
    Reds,
    Blues,
    Greens,
    OrRd,
    #[serde(rename = "algae")]
    Algae,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChoroplethChart {
    pub geojson: FeatureCollection,
    pub locations: Vec<CityKey>,
    pub values: Vec<f64>,
    pub value_label: &'static str,
    pub color_scale: ColorScale,
    pub map: MapView,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScatterTrace {
    pub name: String,
    pub color: &'static str,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub hover: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScatterChart {
    pub x_label: &'static str,
    pub y_label: &'static str,
    pub legend_title: &'static str,
    pub traces: Vec<ScatterTrace>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Serialize)]
pub struct BarChart {
    pub orientation: Orientation,
    pub categories: Vec<String>,
    pub values: Vec<usize>,
    pub colors: Vec<&'static str>,
    pub text: Vec<String>,
    pub hover: Vec<String>,
    pub category_label: &'static str,
    pub value_label: &'static str,
    pub show_legend: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceLine {
    pub label: &'static str,
    pub value: f64,
    pub color: &'static str,
    pub dash: &'static str,
    pub width: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramChart {
    pub value_label: &'static str,
    pub color: &'static str,
    pub values: Vec<f64>,
    pub bins: Vec<Bin>,
    pub reference_lines: Vec<ReferenceLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScatterMapChart {
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    pub values: Vec<f64>,
    pub hover: Vec<String>,
    pub value_label: &'static str,
    pub color_scale: ColorScale,
    pub map: MapView,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreemapNode {
    pub id: String,
    pub label: String,
    pub parent: String,
    pub value: usize,
    pub color: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreemapChart {
    pub path: [&'static str; 3],
    pub nodes: Vec<TreemapNode>,
    pub root_color: &'static str,
}

impl Figure {
    pub fn no_data(title: String, layout: Layout, message: impl Into<String>) -> Self {
        Figure { title, layout, chart: Chart::NoData { message: message.into() } }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.chart, Chart::NoData { .. })
    }
}

pub fn choropleth(aggregates: &CityAggregates, dataset: Dataset, title: String) -> Figure {
    let features = aggregates.values()
        .map(|aggregate| Feature {
            bbox: None,
            geometry: Some(Geometry::new(geojson::Value::from(&aggregate.geometry))),
            id: Some(Id::String(aggregate.key.to_string())),
            properties: None,
            foreign_members: None,
        })
        .collect();

    let (value_label, color_scale) = match dataset {
        Dataset::Sale => ("price", ColorScale::Reds),
        Dataset::Rent => ("price", ColorScale::Blues),
        Dataset::Jobs => ("salary", ColorScale::Greens),
    };

    Figure {
        title,
        layout: Layout { width: Some(620), height: 640, ..Layout::default() },
        chart: Chart::Choropleth(ChoroplethChart {
            geojson: FeatureCollection { bbox: None, features, foreign_members: None },
            locations: aggregates.keys().cloned().collect(),
            values: aggregates.values().map(|a| a.statistic).collect(),
            value_label,
            color_scale,
            map: MapView { center: CHOROPLETH_CENTER, zoom: 10.0, style: Some("light"), opacity: None },
        }),
    }
}

pub fn detail_layout() -> Layout {
    Layout { height: DETAIL_HEIGHT, template: Some(TEMPLATE), ..Layout::default() }
}

/// pandas renders float bedroom counts as "2.0"; keep the same labels.
fn bedroom_label(bedrooms: f64) -> String {
    if bedrooms.is_nan() {
        "nan".to_string()
    } else {
        format!("{:.1}", bedrooms)
    }
}

/// Price against floor area, one trace per bedroom count.
pub fn price_scatter(rows: &[&Listing], title: String) -> Figure {
    let mut order: Vec<String> = Vec::new();
    let mut traces: HashMap<String, ScatterTrace> = HashMap::new();

    for row in rows {
        let label = bedroom_label(row.bedrooms);
        let trace = traces.entry(label.clone()).or_insert_with(|| {
            order.push(label.clone());
            ScatterTrace { name: label, color: "", x: Vec::new(), y: Vec::new(), hover: Vec::new() }
        });
        trace.x.push(row.floor_area);
        trace.y.push(row.price);
        trace.hover.push(row.name.clone());
    }

    let colors = category_colors(&order, BEDROOM_COLORS);
    let traces = order.iter()
        .filter_map(|label| traces.remove(label))
        .map(|mut trace| {
            trace.color = colors[&trace.name];
            trace
        })
        .collect();

    Figure {
        title,
        layout: detail_layout(),
        chart: Chart::Scatter(ScatterChart {
            x_label: "floor area",
            y_label: "price",
            legend_title: "# of Bedrooms",
            traces,
        }),
    }
}

/// Companies with the most postings, at most `limit`, smallest bar first.
pub fn company_bar(rows: &[&JobPosting], limit: usize, color: &'static str, title: String) -> Figure {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        *counts.entry(row.company.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(limit);
    ranked.reverse();

    Figure {
        title,
        layout: detail_layout(),
        chart: Chart::Bar(BarChart {
            orientation: Orientation::Horizontal,
            categories: ranked.iter().map(|(company, _)| company.to_string()).collect(),
            values: ranked.iter().map(|(_, count)| *count).collect(),
            colors: vec![color; ranked.len()],
            text: ranked.iter().map(|(_, count)| count.to_string()).collect(),
            hover: Vec::new(),
            category_label: "company",
            value_label: "count",
            show_legend: false,
        }),
    }
}

pub fn histogram(values: Vec<f64>, bins: usize, value_label: &'static str, color: &'static str, title: String) -> Figure {
    let mut reference_lines = Vec::new();
    if let Some(mean) = stats::mean(values.iter().copied()) {
        reference_lines.push(ReferenceLine { label: "Mean", value: mean, color: MEAN_COLOR, dash: "dashdot", width: 3 });
    }
    if let Some(median) = stats::median(values.iter().copied()) {
        reference_lines.push(ReferenceLine { label: "Median", value: median, color: MEDIAN_COLOR, dash: "dot", width: 3 });
    }

    Figure {
        title,
        layout: detail_layout(),
        chart: Chart::Histogram(HistogramChart {
            value_label,
            color,
            bins: stats::equal_width_bins(values.iter().copied(), bins),
            values,
            reference_lines,
        }),
    }
}

pub fn scatter_map_layout() -> Layout {
    Layout {
        width: Some(1170),
        height: 780,
        template: None,
        transition: Some(Transition { duration_ms: 1400, easing: "circle-in" }),
    }
}

pub fn scatter_map(rows: &[&Listing], kind: PropertyKind, title: String) -> Figure {
    let (center, zoom, color_scale) = match kind {
        PropertyKind::Sale => (LatLon { lat: 14.59665, lon: 121.0369 }, 11.5, ColorScale::OrRd),
        PropertyKind::Rent => (LatLon { lat: 14.5663, lon: 121.0372 }, 12.0, ColorScale::Algae),
    };
    let rows: Vec<&&Listing> = rows.iter()
        .filter(|row| row.latitude.is_finite() && row.longitude.is_finite())
        .collect();

    Figure {
        title,
        layout: scatter_map_layout(),
        chart: Chart::ScatterMap(ScatterMapChart {
            lat: rows.iter().map(|row| row.latitude).collect(),
            lon: rows.iter().map(|row| row.longitude).collect(),
            values: rows.iter().map(|row| row.price).collect(),
            hover: rows.iter().map(|row| row.name.clone()).collect(),
            value_label: "price",
            color_scale,
            map: MapView { center, zoom, style: None, opacity: Some(0.5) },
        }),
    }
}

/// Static bar chart of schools per city.
pub fn school_bar(counts: &[CityCount], title: String) -> Figure {
    Figure {
        title,
        layout: Layout { width: Some(1200), height: 600, template: Some(TEMPLATE), transition: None },
        chart: Chart::Bar(BarChart {
            orientation: Orientation::Vertical,
            categories: counts.iter().map(|c| c.city.capitalized()).collect(),
            values: counts.iter().map(|c| c.count).collect(),
            colors: counts.iter()
                .enumerate()
                .map(|(i, c)| city_color(&c.city).unwrap_or(QUALITATIVE[i % QUALITATIVE.len()]))
                .collect(),
            text: counts.iter().map(|c| c.count.to_string()).collect(),
            hover: counts.iter().map(|c| format!("{} City", title_case(c.city.as_str()))).collect(),
            category_label: "City",
            value_label: "Count",
            show_legend: false,
        }),
    }
}

fn title_case(words: &str) -> String {
    words.split_whitespace()
        .map(|word| CityKey::new(word).capitalized())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn treemap_layout() -> Layout {
    Layout {
        width: Some(1200),
        height: 1000,
        template: None,
        transition: Some(Transition { duration_ms: 750, easing: "quad" }),
    }
}

/// sector -> curricular class -> school, sized by school count.
pub fn treemap(rows: &[&School], title: String) -> Figure {
    let classes: Vec<String> = rows.iter().map(|row| row.curricular_class.clone()).collect();
    let colors = category_colors(&classes, CURRICULAR_COLORS);

    // keyed by label path so no label text can collide with another branch
    let mut counts: BTreeMap<Vec<&str>, (usize, Option<&'static str>)> = BTreeMap::new();
    for row in rows {
        let color = Some(colors[&row.curricular_class]);
        let path = [row.sector.as_str(), row.curricular_class.as_str(), row.name.as_str()];
        for depth in 1..=path.len() {
            let color = if depth == 1 { None } else { color };
            counts.entry(path[..depth].to_vec()).or_insert((0, color)).0 += 1;
        }
    }

    // prefixes sort before their extensions, so parents are numbered first
    let mut ids: HashMap<&[&str], String> = HashMap::new();
    let mut nodes = Vec::with_capacity(counts.len());
    for (n, (path, (value, color))) in counts.iter().enumerate() {
        let id = format!("n{}", n);
        let parent = match path.split_last() {
            Some((_, [])) | None => String::new(),
            Some((_, prefix)) => ids.get(prefix).cloned().unwrap_or_default(),
        };
        nodes.push(TreemapNode {
            id: id.clone(),
            label: path.last().copied().unwrap_or_default().to_string(),
            parent,
            value: *value,
            color: *color,
        });
        ids.insert(path.as_slice(), id);
    }

    Figure {
        title,
        layout: treemap_layout(),
        chart: Chart::Treemap(TreemapChart {
            path: ["sector", "curricular_class", "school_name"],
            nodes,
            root_color: TREEMAP_ROOT_COLOR,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::tests::{fixture, job, listing, school};
    use std::collections::HashSet;

    #[test]
    fn test_choropleth_carries_one_feature_per_aggregate() {
        let data = fixture();
        let figure = choropleth(&data.sale_by_city, Dataset::Sale, "t".into());
        let Chart::Choropleth(chart) = &figure.chart else { panic!("expected choropleth") };
        assert_eq!(chart.geojson.features.len(), 2);
        assert_eq!(chart.locations, vec![CityKey::new("makati"), CityKey::new("pasig")]);
        assert_eq!(chart.values, vec![200.0, 50.0]);
        assert_eq!(chart.color_scale, ColorScale::Reds);
        let json = serde_json::to_value(&figure).unwrap();
        assert_eq!(json["chart"]["type"], "choropleth");
        assert_eq!(json["chart"]["geojson"]["features"][0]["id"], "makati");
    }

    #[test]
    fn test_scatter_groups_by_bedrooms_with_fixed_colors() {
        let mut a = listing("makati", 100.0, 14.5);
        a.bedrooms = 2.0;
        let b = listing("makati", 200.0, 14.5);
        let mut c = listing("makati", 300.0, 14.5);
        c.bedrooms = 5.0;
        let figure = price_scatter(&[&a, &b, &c], "t".into());
        let Chart::Scatter(chart) = &figure.chart else { panic!("expected scatter") };
        let names: Vec<&str> = chart.traces.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["2.0", "1.0", "5.0"]);
        assert_eq!(chart.traces[0].color, "#EF553B");
        assert_eq!(chart.traces[1].color, "#636EFA");
        assert_eq!(chart.traces[2].color, "#AB63FA");
    }

    #[test]
    fn test_company_bar_keeps_top_ten_ascending() {
        let mut rows = Vec::new();
        for i in 0..12 {
            for _ in 0..=i {
                rows.push(job("makati", &format!("Company {:02}", i), 1.0));
            }
        }
        let refs: Vec<&JobPosting> = rows.iter().collect();
        let figure = company_bar(&refs, 10, "#357a38", "t".into());
        let Chart::Bar(chart) = &figure.chart else { panic!("expected bar") };
        assert_eq!(chart.values.len(), 10);
        assert_eq!(chart.values.first(), Some(&3));
        assert_eq!(chart.values.last(), Some(&12));
        assert_eq!(chart.categories.last().map(String::as_str), Some("Company 11"));
    }

    #[test]
    fn test_histogram_has_mean_and_median_lines() {
        let figure = histogram(vec![1.0, 2.0, 6.0], 5, "price", "#b30000", "t".into());
        let Chart::Histogram(chart) = &figure.chart else { panic!("expected histogram") };
        assert_eq!(chart.bins.len(), 5);
        assert_eq!(chart.reference_lines[0].value, 3.0);
        assert_eq!(chart.reference_lines[1].value, 2.0);
    }

    #[test]
    fn test_treemap_nodes_sum_to_parent() {
        let rows = [
            school("manila", "Public", "Purely ES", "A"),
            school("manila", "Public", "Purely ES", "B"),
            school("manila", "Public", "Purely JHS", "C"),
        ];
        let refs: Vec<&School> = rows.iter().collect();
        let figure = treemap(&refs, "t".into());
        let Chart::Treemap(chart) = &figure.chart else { panic!("expected treemap") };
        let node = |label: &str| chart.nodes.iter().find(|n| n.label == label).unwrap();
        assert_eq!(node("Public").value, 3);
        assert_eq!(node("Public").parent, "");
        assert_eq!(node("Purely ES").value, 2);
        assert_eq!(node("A").parent, node("Purely ES").id);
        assert_eq!(node("C").color, Some("#00a779"));
        assert_eq!(chart.nodes.len(), 6);
    }

    #[test]
    fn test_treemap_ids_survive_slashes_in_labels() {
        let rows = [
            school("manila", "Public", "ES/JHS", "A"),
            school("manila", "Public", "ES", "JHS/A"),
        ];
        let refs: Vec<&School> = rows.iter().collect();
        let figure = treemap(&refs, "t".into());
        let Chart::Treemap(chart) = &figure.chart else { panic!("expected treemap") };
        let ids: HashSet<&str> = chart.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids.len(), chart.nodes.len());
        assert_eq!(chart.nodes.len(), 5);
        assert!(chart.nodes.iter().all(|n| n.value == 1 || n.label == "Public"));
    }

    #[test]
    fn test_school_bar_labels() {
        let counts = vec![CityCount { city: CityKey::new("san juan"), count: 4 }];
        let figure = school_bar(&counts, "t".into());
        let Chart::Bar(chart) = &figure.chart else { panic!("expected bar") };
        assert_eq!(chart.categories, vec!["San juan"]);
        assert_eq!(chart.hover, vec!["San Juan City"]);
        assert_eq!(chart.colors, vec!["#ec8b83"]);
    }
}
