use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::cli::ServeArgs;
use crate::dataset::{self, FacilityRecord};
use crate::geo::Coordinates;
use crate::geocode::Geocoder;
use crate::rank::{self, Complaint, RankParams, SortKey};
use crate::storage::{StoragePaths, file_present_nonempty};

// Fallback query center when the caller supplies neither coordinates nor an
// address: downtown Chicago.
const DEFAULT_ORIGIN: Coordinates = Coordinates {
    lat: 41.8781,
    lon: -87.6298,
};

const DEFAULT_TOP_K: usize = 50;
const MAX_TOP_K: usize = 2000;
const DEFAULT_WITHIN_KM: f64 = 200.0;

#[derive(Clone)]
struct AppState {
    facilities: Arc<Vec<FacilityRecord>>,
    geocoder: Geocoder,
    meta: Option<serde_json::Value>,
}

pub async fn run(opts: ServeArgs) -> anyhow::Result<()> {
    let paths = StoragePaths::new(&opts.data_dir);
    if !file_present_nonempty(&paths.cache_parquet) {
        return Err(anyhow!(
            "Facility cache not found at {}. Run: hospitrack build",
            paths.cache_parquet.display()
        ));
    }

    // One-time, single-threaded load; a failure here must abort startup
    // rather than serve a partial dataset.
    let t0 = std::time::Instant::now();
    let facilities = dataset::load_facilities(&paths.cache_parquet)
        .with_context(|| format!("load facility cache at {}", paths.cache_parquet.display()))?;
    tracing::info!(
        "Loaded {} facilities in {:.2}s",
        facilities.len(),
        t0.elapsed().as_secs_f64()
    );

    let meta = if std::fs::metadata(&paths.meta_path)
        .map(|m| m.len() > 0)
        .unwrap_or(false)
    {
        let s = std::fs::read_to_string(&paths.meta_path)?;
        serde_json::from_str(&s).ok()
    } else {
        None
    };

    let state = AppState {
        facilities: Arc::new(facilities),
        geocoder: Geocoder::new().context("build geocoder client")?,
        meta,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/stats", get(api_stats))
        .route("/api/states", get(api_states))
        .route("/api/hospitals", get(api_hospitals))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    facilities: usize,
}

async fn healthz(State(st): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ready",
        facilities: st.facilities.len(),
    })
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    meta: Option<serde_json::Value>,
}

async fn api_stats(State(st): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse { meta: st.meta })
}

#[derive(Debug, Serialize)]
struct StatesResponse {
    states: Vec<String>,
}

/// Distinct state codes present in the dataset, for the UI dropdown.
async fn api_states(State(st): State<AppState>) -> impl IntoResponse {
    let states: BTreeSet<String> = st
        .facilities
        .iter()
        .filter_map(|f| f.state.as_deref())
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty() && s.len() <= 3)
        .collect();
    Json(StatesResponse {
        states: states.into_iter().collect(),
    })
}

#[derive(Debug, Deserialize)]
struct HospitalsParams {
    /// Free-form address or "city, ST"; geocoded when lat/lon are absent.
    address: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    state: Option<String>,
    sort: Option<String>,
    complaint: Option<String>,
    top_k: Option<usize>,
    within_km: Option<f64>,
}

#[derive(Debug, Serialize)]
struct HospitalsResponse {
    count: usize,
    results: Vec<rank::RankedFacility>,
}

async fn api_hospitals(
    State(st): State<AppState>,
    Query(p): Query<HospitalsParams>,
) -> impl IntoResponse {
    let origin = match resolve_origin(&st, &p).await {
        Ok(o) => o,
        Err(resp) => return resp,
    };

    let params = RankParams {
        origin,
        radius_km: p.within_km.unwrap_or(DEFAULT_WITHIN_KM),
        sort: SortKey::parse(p.sort.as_deref().unwrap_or("")),
        complaint: Complaint::parse(p.complaint.as_deref().unwrap_or("")),
        state: p.state.clone(),
        top_k: p.top_k.unwrap_or(DEFAULT_TOP_K).min(MAX_TOP_K),
    };

    match rank::rank(&st.facilities, &params) {
        Ok(results) => Json(HospitalsResponse {
            count: results.len(),
            results,
        })
        .into_response(),
        // Both error variants are caller mistakes: bad radius/top_k or an
        // out-of-range origin.
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// Explicit lat/lon wins; otherwise geocode a non-empty address; otherwise
/// fall back to the default center. A geocoding failure is reported to the
/// caller, not papered over.
async fn resolve_origin(
    st: &AppState,
    p: &HospitalsParams,
) -> Result<Coordinates, axum::response::Response> {
    if let (Some(lat), Some(lon)) = (p.lat, p.lon) {
        return Ok(Coordinates::new(lat, lon));
    }

    let address = p.address.as_deref().map(str::trim).unwrap_or("");
    if address.is_empty() {
        return Ok(DEFAULT_ORIGIN);
    }

    match st.geocoder.resolve(address).await {
        Ok(c) => Ok(c),
        Err(e) => {
            tracing::warn!("Geocoding failed for {:?}: {}", address, e);
            Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                "could not determine your location",
            )
                .into_response())
        }
    }
}
