//! Weather capability: current conditions from a WeatherAPI-compatible
//! endpoint.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use crate::capabilities::{Capability, CapabilityOutput};
use crate::context::RoutingContext;
use crate::error::CapabilityError;
use crate::store::Metadata;

/// Default current-conditions endpoint.
pub const DEFAULT_WEATHER_API_URL: &str = "http://api.weatherapi.com/v1/current.json";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct WeatherReport {
    location: ReportLocation,
    current: CurrentConditions,
}

#[derive(Debug, Deserialize)]
struct ReportLocation {
    country: String,
    localtime: String,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    temp_c: f64,
    temp_f: f64,
    feelslike_c: f64,
    condition: Condition,
    humidity: f64,
    wind_kph: f64,
    wind_dir: String,
}

#[derive(Debug, Deserialize)]
struct Condition {
    text: String,
}

/// `agent_task:weather` provider.
pub struct WeatherCapability {
    api_key: SecretString,
    api_url: String,
    client: reqwest::Client,
}

impl WeatherCapability {
    pub fn new(api_key: SecretString, api_url: impl Into<String>) -> Result<Self, CapabilityError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            api_key,
            api_url: api_url.into(),
            client,
        })
    }

    /// reqwest errors carry the request URL, which holds the key; it is
    /// stripped before the error leaves this function.
    async fn fetch(&self, location: &str) -> Result<serde_json::Value, CapabilityError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("q", location),
                ("key", self.api_key.expose_secret()),
                ("aqi", "no"),
            ])
            .send()
            .await
            .map_err(reqwest::Error::without_url)?
            .error_for_status()
            .map_err(reqwest::Error::without_url)?;

        Ok(response.json().await.map_err(reqwest::Error::without_url)?)
    }
}

#[async_trait]
impl Capability for WeatherCapability {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Current weather conditions for a location"
    }

    async fn process(
        &self,
        _query: &str,
        params: &Metadata,
        _ctx: &RoutingContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let location = params
            .get("location")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or_default();

        if location.is_empty() {
            return Ok(CapabilityOutput::failure(
                "Which location would you like the weather for?",
                "missing parameter: location",
            ));
        }

        info!(location, "Fetching current weather");
        let raw = self.fetch(location).await?;
        let report: WeatherReport = serde_json::from_value(raw.clone())
            .map_err(|e| CapabilityError::InvalidResponse(format!("weather payload: {e}")))?;
        debug!(location, condition = %report.current.condition.text, "Weather received");

        Ok(CapabilityOutput::success(format_report(location, &report)).with_data(raw))
    }
}

fn format_report(location: &str, report: &WeatherReport) -> String {
    let now = &report.current;
    format!(
        "Weather in {location}, {country} as of {time}:\n  \
         Temperature: {temp_c}°C / {temp_f}°F (feels like {feels}°C)\n  \
         Condition: {condition}\n  \
         Humidity: {humidity}%\n  \
         Wind: {wind} kph {dir}\n",
        country = report.location.country,
        time = report.location.localtime,
        temp_c = now.temp_c,
        temp_f = now.temp_f,
        feels = now.feelslike_c,
        condition = now.condition.text,
        humidity = now.humidity,
        wind = now.wind_kph,
        dir = now.wind_dir,
    )
}
