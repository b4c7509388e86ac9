//! Reactive update graph.
//!
//! Callbacks declare the signals they read and, optionally, the signal their
//! output drives. The graph orders them topologically once at construction;
//! a recompute runs every callback reachable from the changed signals,
//! each exactly once, in that order.

use crate::callbacks::{self, SliderBounds, UiState};
use crate::processing::PreparedData;
use crate::render::Figure;
use crate::types::{CityKey, Dataset, PropertyKind};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Inputs a callback can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    DatasetRadio,
    PropertyRadio,
    Budget,
    MapClick,
    BarClick,
}

/// Named outputs on the rendering surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputId {
    ChoroplethMap,
    DetailChart,
    Histogram,
    BudgetSlider,
    ScatterMap,
    SchoolBar,
    Treemap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "spec", rename_all = "snake_case")]
pub enum Output {
    Figure(Figure),
    /// `None` when the selected listings have no price at all
    Slider(Option<SliderBounds>),
}

#[derive(Clone, Copy)]
enum Run {
    Figure(fn(&PreparedData, &UiState) -> Figure),
    Slider(fn(&PreparedData, &UiState) -> Option<SliderBounds>),
}

pub struct Callback {
    pub name: &'static str,
    pub output: OutputId,
    pub inputs: &'static [Signal],
    /// Signal set from this callback's output
    pub drives: Option<Signal>,
    run: Run,
}

impl Callback {
    fn figure(
        name: &'static str,
        output: OutputId,
        inputs: &'static [Signal],
        run: fn(&PreparedData, &UiState) -> Figure,
    ) -> Self {
        Callback { name, output, inputs, drives: None, run: Run::Figure(run) }
    }
}

/// Callbacks in dependency order.
pub struct UpdateGraph {
    callbacks: Vec<Callback>,
}

impl UpdateGraph {
    pub fn dashboard() -> Result<Self> {
        use Signal::*;

        Self::new(vec![
            Callback::figure("update_scatter_map", OutputId::ScatterMap, &[PropertyRadio, Budget], callbacks::update_scatter_map),
            Callback::figure("update_choropleth", OutputId::ChoroplethMap, &[DatasetRadio], callbacks::update_choropleth),
            Callback::figure("update_detail", OutputId::DetailChart, &[DatasetRadio, MapClick], callbacks::update_detail),
            Callback::figure("update_histogram", OutputId::Histogram, &[DatasetRadio, MapClick], callbacks::update_histogram),
            Callback {
                name: "update_slider",
                output: OutputId::BudgetSlider,
                inputs: &[PropertyRadio],
                drives: Some(Budget),
                run: Run::Slider(callbacks::update_slider),
            },
            Callback::figure("school_bar", OutputId::SchoolBar, &[], callbacks::school_bar),
            Callback::figure("update_treemap", OutputId::Treemap, &[BarClick], callbacks::update_treemap),
        ])
    }

    /// Orders `callbacks` so every driver runs before its readers.
    pub fn new(callbacks: Vec<Callback>) -> Result<Self> {
        let mut remaining = callbacks;
        let mut ordered: Vec<Callback> = Vec::with_capacity(remaining.len());
        let mut outputs = HashSet::new();

        for callback in &remaining {
            if !outputs.insert(callback.output) {
                bail!("Output {:?} is produced by more than one callback", callback.output);
            }
        }

        while !remaining.is_empty() {
            // ready when no other pending callback drives one of its inputs
            let ready = remaining.iter().position(|candidate| {
                !remaining.iter().any(|other| {
                    other.drives.is_some_and(|signal| candidate.inputs.contains(&signal))
                })
            });
            match ready {
                Some(idx) => ordered.push(remaining.remove(idx)),
                None => {
                    let names: Vec<&str> = remaining.iter().map(|c| c.name).collect();
                    bail!("Callback cycle between {:?}", names);
                }
            }
        }

        Ok(UpdateGraph { callbacks: ordered })
    }

    pub fn callbacks(&self) -> impl Iterator<Item = &Callback> {
        self.callbacks.iter()
    }

    /// Runs every callback, as on first page load.
    pub fn initial(&self, data: &PreparedData, state: UiState) -> Recompute {
        self.run(data, state, None)
    }

    /// Runs the callbacks affected by `changed`.
    pub fn recompute(&self, data: &PreparedData, state: UiState, changed: &[Signal]) -> Recompute {
        self.run(data, state, Some(changed.iter().copied().collect()))
    }

    /// Applies `event` to the caller's `state` and returns only the outputs it touched.
    pub fn handle(&self, data: &PreparedData, mut state: UiState, event: UiEvent) -> Recompute {
        let signal = event.apply(&mut state);
        self.recompute(data, state, &[signal])
    }

    fn run(&self, data: &PreparedData, mut state: UiState, mut dirty: Option<HashSet<Signal>>) -> Recompute {
        let mut outputs = BTreeMap::new();

        for callback in &self.callbacks {
            let affected = match &dirty {
                None => true,
                Some(signals) => callback.inputs.iter().any(|s| signals.contains(s)),
            };
            if !affected {
                continue;
            }
            debug!(callback = callback.name, "Recomputing");

            let output = match callback.run {
                Run::Figure(run) => Output::Figure(run(data, &state)),
                Run::Slider(run) => {
                    let bounds = run(data, &state);
                    // the slider snaps back to the new default
                    state.budget = bounds.map(|b| b.default);
                    Output::Slider(bounds)
                }
            };
            if let (Some(signal), Some(signals)) = (callback.drives, dirty.as_mut()) {
                signals.insert(signal);
            }
            outputs.insert(callback.output, output);
        }

        Recompute { state, outputs }
    }
}

/// New state plus every output that changed.
#[derive(Debug, Clone, Serialize)]
pub struct Recompute {
    pub state: UiState,
    pub outputs: BTreeMap<OutputId, Output>,
}

/// One user action from the rendering surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiEvent {
    DatasetSelected { dataset: Dataset },
    PropertySelected { property: PropertyKind },
    BudgetChanged { value: f64 },
    CityClicked { city: CityKey },
    CityCleared,
    BarClicked { label: CityKey },
    BarCleared,
}

impl UiEvent {
    /// Applies the event and reports the signal it changed.
    pub fn apply(self, state: &mut UiState) -> Signal {
        match self {
            UiEvent::DatasetSelected { dataset } => {
                state.dataset = dataset;
                Signal::DatasetRadio
            }
            UiEvent::PropertySelected { property } => {
                state.property = property;
                Signal::PropertyRadio
            }
            UiEvent::BudgetChanged { value } => {
                state.budget = Some(value);
                Signal::Budget
            }
            UiEvent::CityClicked { city } => {
                state.selected_city = Some(city);
                Signal::MapClick
            }
            UiEvent::CityCleared => {
                state.selected_city = None;
                Signal::MapClick
            }
            UiEvent::BarClicked { label } => {
                state.selected_bar = Some(label);
                Signal::BarClick
            }
            UiEvent::BarCleared => {
                state.selected_bar = None;
                Signal::BarClick
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::tests::fixture;

    fn figure_json(update: &Recompute, id: OutputId) -> String {
        serde_json::to_string(&update.outputs[&id]).unwrap()
    }

    fn ids(update: &Recompute) -> Vec<OutputId> {
        update.outputs.keys().copied().collect()
    }

    #[test]
    fn test_slider_runs_before_scatter_map() {
        let graph = UpdateGraph::dashboard().unwrap();
        let order: Vec<&str> = graph.callbacks().map(|c| c.name).collect();
        let slider = order.iter().position(|n| *n == "update_slider").unwrap();
        let scatter = order.iter().position(|n| *n == "update_scatter_map").unwrap();
        assert!(slider < scatter);
    }

    #[test]
    fn test_cycle_is_rejected() {
        fn blank(_: &PreparedData, _: &UiState) -> Option<SliderBounds> {
            None
        }
        let a = Callback { name: "a", output: OutputId::BudgetSlider, inputs: &[Signal::MapClick], drives: Some(Signal::Budget), run: Run::Slider(blank) };
        let b = Callback { name: "b", output: OutputId::Histogram, inputs: &[Signal::Budget], drives: Some(Signal::MapClick), run: Run::Slider(blank) };
        assert!(UpdateGraph::new(vec![a, b]).is_err());
    }

    #[test]
    fn test_initial_run_fills_every_output_and_budget() {
        let data = fixture();
        let update = UpdateGraph::dashboard().unwrap().initial(&data, UiState::default());
        assert_eq!(update.outputs.len(), 7);
        assert_eq!(update.state.budget, Some(90.0));
    }

    #[test]
    fn test_map_click_touches_only_detail_and_histogram() {
        let data = fixture();
        let graph = UpdateGraph::dashboard().unwrap();
        let start = graph.initial(&data, UiState::default()).state;
        let update = graph.handle(&data, start, UiEvent::CityClicked { city: CityKey::new("makati") });
        assert_eq!(ids(&update), vec![OutputId::DetailChart, OutputId::Histogram]);
    }

    #[test]
    fn test_property_change_resets_budget_and_redraws_map() {
        let data = fixture();
        let graph = UpdateGraph::dashboard().unwrap();
        let start = graph.initial(&data, UiState::default()).state;
        let moved = graph.handle(&data, start, UiEvent::BudgetChanged { value: 60.0 });
        assert_eq!(moved.state.budget, Some(60.0));

        let update = graph.handle(&data, moved.state, UiEvent::PropertySelected { property: PropertyKind::Rent });
        assert_eq!(ids(&update), vec![OutputId::BudgetSlider, OutputId::ScatterMap]);
        assert_eq!(update.state.budget, Some(20.0));
    }

    #[test]
    fn test_clearing_selection_matches_never_selecting() {
        let data = fixture();
        let graph = UpdateGraph::dashboard().unwrap();
        let pristine = graph.initial(&data, UiState::default());

        let clicked = graph.handle(&data, pristine.state.clone(), UiEvent::CityClicked { city: CityKey::new("makati") });
        let cleared = graph.handle(&data, clicked.state, UiEvent::CityCleared);

        for id in [OutputId::DetailChart, OutputId::Histogram] {
            assert_eq!(figure_json(&cleared, id), figure_json(&pristine, id));
        }
        assert_eq!(cleared.state, pristine.state);
    }

    #[test]
    fn test_states_from_different_clients_stay_independent() {
        let data = fixture();
        let graph = UpdateGraph::dashboard().unwrap();
        let start = graph.initial(&data, UiState::default()).state;

        let first = graph.handle(&data, start.clone(), UiEvent::CityClicked { city: CityKey::new("makati") });
        let second = graph.handle(&data, start, UiEvent::DatasetSelected { dataset: Dataset::Rent });

        assert_eq!(first.state.selected_city, Some(CityKey::new("makati")));
        assert_eq!(second.state.selected_city, None);
        assert_eq!(second.state.dataset, Dataset::Rent);
        let Output::Figure(detail) = &second.outputs[&OutputId::DetailChart] else { panic!("expected figure") };
        assert_eq!(detail.title, "Rental Price vs Floor Area in Select Metro Manila");
    }

    #[test]
    fn test_events_deserialise_from_surface_payloads() {
        let event: UiEvent = serde_json::from_str(r#"{"event":"bar_clicked","label":"Quezon"}"#).unwrap();
        assert_eq!(event, UiEvent::BarClicked { label: CityKey::new("quezon") });
        let event: UiEvent = serde_json::from_str(r#"{"event":"city_cleared"}"#).unwrap();
        assert_eq!(event, UiEvent::CityCleared);
        // an empty string is a selection, not an absence
        let event: UiEvent = serde_json::from_str(r#"{"event":"city_clicked","city":""}"#).unwrap();
        let mut state = UiState::default();
        event.apply(&mut state);
        assert_eq!(state.selected_city, Some(CityKey::new("")));
    }
}
