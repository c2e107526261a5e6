//! Dashboard side panels: air quality, exchange rates, and geocoding.
//!
//! Panels are best-effort. A missing API key disables the panel, a failed
//! call keeps the previous snapshot, and refreshes only happen once the
//! cached report is older than the staleness window.

use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::error::AggregatorError;
use crate::models::{AirQuality, ExchangeRates, PanelReport, Place};
use crate::sources::rss::CLIENT;

const WAQI_BASE: &str = "https://api.waqi.info";
const EXCHANGE_BASE: &str = "https://open.er-api.com";
const GEOCODE_BASE: &str = "https://maps.googleapis.com";

/// API keys for the panel providers. `None` disables the provider.
#[derive(Debug, Clone, Default)]
pub struct PanelKeys {
    pub waqi_token: Option<String>,
    pub maps_api_key: Option<String>,
}

/// True when the cached report is missing or older than the window.
pub fn is_stale(report: &PanelReport, staleness_hours: i64) -> bool {
    match report.fetched_at {
        None => true,
        Some(at) => Utc::now() - at > Duration::hours(staleness_hours),
    }
}

/// Refresh stale panels, keeping previous snapshots on per-provider failure.
#[instrument(level = "info", skip_all)]
pub async fn refresh_if_stale(
    previous: PanelReport,
    config: &AppConfig,
    keys: &PanelKeys,
) -> PanelReport {
    if !is_stale(&previous, config.staleness_hours) {
        info!("Panels fresh; skipping refresh");
        return previous;
    }

    let mut report = previous;

    if let Some(token) = keys.waqi_token.as_deref() {
        match fetch_air_quality(WAQI_BASE, &config.aqi_city, token).await {
            Ok(aqi) => report.air_quality = Some(aqi),
            Err(e) => warn!(error = %e, "Air-quality refresh failed; keeping last snapshot"),
        }
    }

    match fetch_exchange_rates(EXCHANGE_BASE, &config.currencies).await {
        Ok(rates) => report.exchange_rates = Some(rates),
        Err(e) => warn!(error = %e, "Exchange-rate refresh failed; keeping last snapshot"),
    }

    report.fetched_at = Some(Utc::now());
    report
}

#[derive(Debug, Deserialize)]
struct WaqiResponse {
    status: String,
    #[serde(default)]
    data: Option<WaqiData>,
}

#[derive(Debug, Deserialize)]
struct WaqiData {
    aqi: i64,
    #[serde(default)]
    dominentpol: Option<String>,
    city: WaqiCity,
}

#[derive(Debug, Deserialize)]
struct WaqiCity {
    name: String,
}

/// Fetch the WAQI air-quality snapshot for one city.
pub async fn fetch_air_quality(
    base: &str,
    city: &str,
    token: &str,
) -> Result<AirQuality, AggregatorError> {
    let url = format!("{base}/feed/{city}/?token={token}");
    let response = CLIENT.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(AggregatorError::NonOkStatus(response.status().as_u16()));
    }
    let parsed: WaqiResponse = response.json().await?;
    let data = match (parsed.status.as_str(), parsed.data) {
        ("ok", Some(data)) => data,
        (status, _) => {
            return Err(AggregatorError::Upstream(format!(
                "WAQI returned status {status}"
            )))
        }
    };
    Ok(AirQuality {
        city: data.city.name,
        aqi: data.aqi,
        dominant_pollutant: data.dominentpol,
    })
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    result: String,
    #[serde(default)]
    rates: std::collections::BTreeMap<String, f64>,
}

/// Fetch THB-per-unit rates for the configured currencies.
///
/// The upstream quotes everything against THB as the base, so a unit of a
/// foreign currency costs `1 / rate` baht.
pub async fn fetch_exchange_rates(
    base: &str,
    currencies: &[String],
) -> Result<ExchangeRates, AggregatorError> {
    let url = format!("{base}/v6/latest/THB");
    let response = CLIENT.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(AggregatorError::NonOkStatus(response.status().as_u16()));
    }
    let parsed: ExchangeResponse = response.json().await?;
    if parsed.result != "success" {
        return Err(AggregatorError::Upstream(format!(
            "exchange API returned result {}",
            parsed.result
        )));
    }

    let mut thb_per_unit = std::collections::BTreeMap::new();
    for code in currencies {
        match parsed.rates.get(code) {
            Some(rate) if *rate > 0.0 => {
                thb_per_unit.insert(code.clone(), 1.0 / rate);
            }
            _ => warn!(code, "Currency missing from exchange response"),
        }
    }

    Ok(ExchangeRates {
        base: "THB".to_string(),
        thb_per_unit,
    })
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
    geometry: GeocodeGeometry,
}

#[derive(Debug, Deserialize)]
struct GeocodeGeometry {
    location: GeocodeLocation,
}

#[derive(Debug, Deserialize)]
struct GeocodeLocation {
    lat: f64,
    lng: f64,
}

/// Geocode an event location. Returns `Ok(None)` when nothing matches or no
/// maps key is configured.
#[instrument(level = "info", skip_all, fields(%query))]
pub async fn lookup_place(
    keys: &PanelKeys,
    query: &str,
) -> Result<Option<Place>, AggregatorError> {
    lookup_place_at(GEOCODE_BASE, keys, query).await
}

pub(crate) async fn lookup_place_at(
    base: &str,
    keys: &PanelKeys,
    query: &str,
) -> Result<Option<Place>, AggregatorError> {
    let Some(key) = keys.maps_api_key.as_deref() else {
        return Ok(None);
    };
    let url = format!(
        "{base}/maps/api/geocode/json?address={}&key={key}",
        urlencoding::encode(query)
    );
    let response = CLIENT.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(AggregatorError::NonOkStatus(response.status().as_u16()));
    }
    let parsed: GeocodeResponse = response.json().await?;
    if parsed.status != "OK" {
        warn!(status = %parsed.status, "Geocoding returned no result");
        return Ok(None);
    }
    Ok(parsed.results.into_iter().next().map(|result| Place {
        lat: result.geometry.location.lat,
        lng: result.geometry.location.lng,
        formatted_address: result.formatted_address,
    }))
}
