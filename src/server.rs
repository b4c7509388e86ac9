use crate::config::AppConfig;
use crate::callbacks::UiState;
use crate::graph::{Recompute, UiEvent, UpdateGraph};
use crate::processing::PreparedData;
use crate::types::{CityKey, CityPolygon};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::Point;
use rstar::{RTree, RTreeObject, AABB};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

// Wrapper for RTree indexing
struct CityIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for CityIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Resolves a clicked coordinate to the city whose polygon contains it.
pub struct CityLocator {
    cities: Vec<CityPolygon>,
    tree: RTree<CityIndex>,
}

impl CityLocator {
    pub fn new(cities: Vec<CityPolygon>) -> Self {
        let tree_items: Vec<CityIndex> = cities.iter().enumerate()
            .filter_map(|(i, city)| {
                let rect = city.geometry.bounding_rect()?;
                Some(CityIndex {
                    index: i,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        CityLocator { cities, tree: RTree::bulk_load(tree_items) }
    }

    pub fn locate(&self, lon: f64, lat: f64) -> Option<&CityKey> {
        let point = Point::new(lon, lat);
        let envelope = AABB::from_point([lon, lat]);

        self.tree.locate_in_envelope_intersecting(&envelope)
            .filter_map(|candidate| self.cities.get(candidate.index))
            .find(|city| city.geometry.contains(&point))
            .map(|city| &city.key)
    }
}

/// Shared, read-only server state. UI state lives with each client.
pub struct AppState {
    pub data: Arc<PreparedData>,
    pub graph: UpdateGraph,
    /// Outputs for a fresh page
    pub initial: Recompute,
    pub locator: CityLocator,
}

/// A client's current state and the action it just took.
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    #[serde(default)]
    pub state: UiState,
    pub event: UiEvent,
}

#[derive(Deserialize)]
pub struct LocateParams {
    lat: f64,
    lon: f64,
}

pub fn router(data: Arc<PreparedData>, static_dir: Option<&std::path::Path>) -> Result<Router> {
    let locator = CityLocator::new(data.cities.clone());
    let graph = UpdateGraph::dashboard()?;
    let initial = graph.initial(&data, UiState::default());

    let state = Arc::new(AppState { data, graph, initial, locator });

    let mut app = Router::new()
        .route("/api/figures", get(figures_handler))
        .route("/api/events", post(event_handler))
        .route("/api/locate", get(locate_handler));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    Ok(app.layer(CorsLayer::permissive()).with_state(state))
}

pub async fn start_server(config: AppConfig, data: Arc<PreparedData>) -> Result<()> {
    let app = router(data, config.server.static_dir.as_deref())?;

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn figures_handler(State(state): State<Arc<AppState>>) -> Json<Recompute> {
    Json(state.initial.clone())
}

async fn event_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EventRequest>,
) -> Json<Recompute> {
    info!(event = ?request.event, "UI event");
    Json(state.graph.handle(&state.data, request.state, request.event))
}

async fn locate_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LocateParams>,
) -> Json<Option<CityKey>> {
    Json(state.locator.locate(params.lon, params.lat).cloned())
}
