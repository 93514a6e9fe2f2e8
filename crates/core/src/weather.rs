//! Weather lookup tool backed by the Open-Meteo geocoding and forecast APIs.
//!
//! The realtime model calls `get_weather` with coordinates and/or a place
//! name. The lookup answers by pushing events straight into the upstream link:
//! one `conversation.item.create` with the forecast (or an error text), and on
//! success a `response.create` asking the model to talk about it.

use crate::{
    defaults::WEATHER_INSTRUCTIONS,
    link::Upstream,
    protocol::realtime::{ClientEvent, Item, Modality, ResponseConfig},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

pub const OPEN_METEO_GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
pub const OPEN_METEO_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Arguments of a `get_weather` function call.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WeatherQuery {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub location_name: Option<String>,
}

/// A tool that answers weather function calls through the upstream link.
#[async_trait]
pub trait WeatherTool: Send + Sync {
    /// Looks up the weather and reports the result through `upstream`.
    async fn lookup(&self, query: WeatherQuery, upstream: &dyn Upstream);
}

/// What a lookup produced, before it is turned into upstream events.
#[derive(Debug, PartialEq)]
enum Outcome {
    Forecast(Value),
    Problem(String),
}

#[derive(Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingHit>,
}

#[derive(Deserialize)]
struct GeocodingHit {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    name: Option<String>,
}

/// [`WeatherTool`] implementation calling Open-Meteo over HTTP.
pub struct OpenMeteoWeather {
    client: reqwest::Client,
    geocoding_url: String,
    forecast_url: String,
    instructions: String,
}

impl Default for OpenMeteoWeather {
    fn default() -> Self {
        Self::new(OPEN_METEO_GEOCODING_URL, OPEN_METEO_FORECAST_URL)
    }
}

impl OpenMeteoWeather {
    /// Creates a lookup against the given geocoding and forecast endpoints.
    pub fn new(geocoding_url: impl Into<String>, forecast_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            geocoding_url: geocoding_url.into(),
            forecast_url: forecast_url.into(),
            instructions: WEATHER_INSTRUCTIONS.to_string(),
        }
    }

    async fn resolve(&self, query: WeatherQuery) -> Result<Outcome> {
        let WeatherQuery {
            mut lat,
            mut lon,
            location_name,
        } = query;
        let mut location_name = location_name.filter(|name| !name.is_empty());

        if let Some(name) = location_name.clone() {
            let geocoding: GeocodingResponse = self
                .client
                .get(&self.geocoding_url)
                .query(&[("name", name.as_str()), ("count", "1")])
                .send()
                .await
                .context("geocoding request failed")?
                .error_for_status()?
                .json()
                .await
                .context("geocoding response was not valid JSON")?;

            let Some(hit) = geocoding.results.into_iter().next() else {
                return Ok(Outcome::Problem(format!("Location '{name}' not found")));
            };
            // A resolved place name overrides any coordinates the model guessed.
            lat = Some(hit.latitude);
            lon = Some(hit.longitude);
            location_name = Some(hit.name.unwrap_or(name));
        }

        let (Some(lat), Some(lon)) = (lat, lon) else {
            return Ok(Outcome::Problem(
                "Both latitude and longitude are required".to_string(),
            ));
        };

        let mut forecast: Value = self
            .client
            .get(&self.forecast_url)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("current_weather", "true".to_string()),
                ("temperature_unit", "celsius".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .context("forecast request failed")?
            .error_for_status()?
            .json()
            .await
            .context("forecast response was not valid JSON")?;

        if let (Some(name), Some(object)) = (location_name, forecast.as_object_mut()) {
            object.insert("location_name".to_string(), Value::String(name));
        }
        Ok(Outcome::Forecast(forecast))
    }

    fn events_for(&self, outcome: Outcome) -> Vec<ClientEvent> {
        match outcome {
            Outcome::Problem(message) => vec![user_note(format!("Error: {message}"))],
            Outcome::Forecast(data) => {
                let pretty =
                    serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
                vec![
                    user_note(format!("Weather data: {pretty}")),
                    ClientEvent::ResponseCreate {
                        event_id: None,
                        response: Some(ResponseConfig {
                            modalities: Some(vec![Modality::Audio, Modality::Text]),
                            instructions: Some(self.instructions.clone()),
                            ..Default::default()
                        }),
                    },
                ]
            }
        }
    }
}

#[async_trait]
impl WeatherTool for OpenMeteoWeather {
    async fn lookup(&self, query: WeatherQuery, upstream: &dyn Upstream) {
        info!(?query, "Executing tool 'get_weather'");
        let outcome = match self.resolve(query).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = ?e, "Weather lookup failed");
                Outcome::Problem(format!("Error fetching weather data: {e:#}"))
            }
        };
        if let Outcome::Problem(message) = &outcome {
            warn!(%message, "Reporting weather problem to the model");
        }

        for event in self.events_for(outcome) {
            if let Err(e) = upstream.send(event).await {
                error!(error = %e, "Failed to deliver weather result to the realtime API");
                return;
            }
        }
    }
}

fn user_note(text: String) -> ClientEvent {
    ClientEvent::ConversationItemCreate {
        event_id: None,
        previous_item_id: None,
        item: Item::user_text(None, text),
    }
}
