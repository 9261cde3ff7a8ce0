// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Current weather from wttr.in's JSON format (`?format=j1`), reduced to a
//! short line such as `"Light rain, 12°C"`.

use std::time::Duration;

use async_trait::async_trait;
use pebble_config::model::WeatherConfig;
use pebble_core::{AdapterType, HealthStatus, PebbleError, PluginAdapter, WeatherAdapter};
use serde::Deserialize;
use tracing::debug;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Deserialize)]
struct WttrResponse {
    #[serde(default)]
    current_condition: Vec<CurrentCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentCondition {
    #[serde(rename = "temp_C", default)]
    temp_c: Option<String>,
    #[serde(default)]
    weather_desc: Vec<ValueField>,
}

#[derive(Debug, Deserialize)]
struct ValueField {
    value: String,
}

/// `"{condition}, {temp}°C"`, with `Unknown` for missing parts.
fn describe(body: &WttrResponse) -> String {
    let current = body.current_condition.first();
    let condition = current
        .and_then(|c| c.weather_desc.first())
        .map(|d| d.value.trim())
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN);
    let temp = current
        .and_then(|c| c.temp_c.as_deref())
        .map(|t| format!("{t}°C"))
        .unwrap_or_else(|| UNKNOWN.to_string());
    format!("{condition}, {temp}")
}

pub struct WttrWeather {
    client: reqwest::Client,
    base_url: String,
}

impl WttrWeather {
    pub fn new(config: &WeatherConfig) -> Result<Self, PebbleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("pebble/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PebbleError::Internal(format!("failed to build weather client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PluginAdapter for WttrWeather {
    fn name(&self) -> &str {
        "wttr"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Weather
    }

    async fn health_check(&self) -> Result<HealthStatus, PebbleError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), PebbleError> {
        Ok(())
    }
}

#[async_trait]
impl WeatherAdapter for WttrWeather {
    async fn current_weather(&self, city: &str) -> Result<String, PebbleError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(PebbleError::Internal("no city given for weather lookup".into()));
        }
        let url = format!("{}/{}?format=j1", self.base_url, city.replace(' ', "+"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PebbleError::Internal(format!("weather lookup for {city} failed: {e}")))?;
        let body: WttrResponse = response
            .json()
            .await
            .map_err(|e| PebbleError::Internal(format!("unreadable weather for {city}: {e}")))?;
        let report = describe(&body);
        debug!(city, report = %report, "weather fetched");
        Ok(report)
    }
}
