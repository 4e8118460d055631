use std::time::Duration;

use serde::Deserialize;

use crate::geo::Coordinates;

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
const USER_AGENT: &str = "HospiTrack/0.1 (https://github.com/hospitrack)";
const ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("location not found")]
    NotFound,
    #[error("geocoder returned an unusable coordinate")]
    BadCoordinate,
    #[error("geocoder request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Thin client for the OpenStreetMap Nominatim search API. Used to resolve
/// free-text addresses; failures surface as `GeocodeError` so the HTTP layer
/// can report "could not determine your location" instead of crashing.
#[derive(Debug, Clone)]
pub struct Geocoder {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct NominatimHit {
    lat: String,
    lon: String,
}

impl Geocoder {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: NOMINATIM_URL.to_string(),
        })
    }

    pub async fn resolve(&self, query: &str) -> Result<Coordinates, GeocodeError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(GeocodeError::NotFound);
        }

        let mut last_err: Option<GeocodeError> = None;
        for attempt in 1..=ATTEMPTS {
            match self.resolve_once(query).await {
                Ok(c) => return Ok(c),
                // Timeouts and connection drops get a retry with a short
                // politeness pause; anything else is final.
                Err(GeocodeError::Http(e)) if e.is_timeout() || e.is_connect() => {
                    tracing::warn!(
                        "Geocoder attempt {}/{} failed for {:?}: {}",
                        attempt,
                        ATTEMPTS,
                        query,
                        e
                    );
                    last_err = Some(GeocodeError::Http(e));
                    if attempt < ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(GeocodeError::NotFound))
    }

    async fn resolve_once(&self, query: &str) -> Result<Coordinates, GeocodeError> {
        let hits: Vec<NominatimHit> = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(hit) = hits.first() else {
            return Err(GeocodeError::NotFound);
        };
        let lat: f64 = hit.lat.parse().map_err(|_| GeocodeError::BadCoordinate)?;
        let lon: f64 = hit.lon.parse().map_err(|_| GeocodeError::BadCoordinate)?;
        let coords = Coordinates::new(lat, lon);
        if !coords.in_range() {
            return Err(GeocodeError::BadCoordinate);
        }
        Ok(coords)
    }
}
