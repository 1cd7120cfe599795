use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::ToolFunction;
use crate::{RagError, Result};

const TOOL_NAME: &str = "get_weather_tool";
const DEFAULT_WEATHER_URL: &str = "https://wttr.in/";
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Current conditions for a location, backed by the wttr.in JSON API
#[derive(Debug, Clone)]
pub struct WeatherTool {
    base_url: String,
    agent: ureq::Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Deserialize)]
struct WttrResponse {
    current_condition: Vec<CurrentCondition>,
}

#[derive(Debug, Deserialize)]
struct CurrentCondition {
    #[serde(rename = "temp_C")]
    temp_c: String,
    #[serde(rename = "temp_F")]
    temp_f: String,
    #[serde(rename = "FeelsLikeC")]
    feels_like_c: String,
    #[serde(rename = "FeelsLikeF")]
    feels_like_f: String,
    humidity: String,
    #[serde(rename = "windspeedKmph")]
    windspeed_kmph: String,
    #[serde(rename = "weatherDesc", default)]
    weather_desc: Vec<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: String,
}

impl Default for WeatherTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl WeatherTool {
    #[inline]
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Self {
            base_url: DEFAULT_WEATHER_URL.to_string(),
            agent,
        }
    }

    /// Point the tool at another wttr.in-compatible endpoint
    #[inline]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_url(&self, location: &str) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid weather base URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("Weather base URL cannot take a path: {}", self.base_url))?
            .pop_if_empty()
            .push(location);
        url.query_pairs_mut().append_pair("format", "j1");
        Ok(url)
    }

    fn fetch_blocking(&self, location: &str, unit: TemperatureUnit) -> anyhow::Result<Value> {
        let url = self.request_url(location)?;
        debug!("Fetching weather from {}", url);

        let body = self
            .agent
            .get(url.as_str())
            .call()
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .context("Could not fetch weather data")?;

        let parsed: WttrResponse =
            serde_json::from_str(&body).context("Failed to parse weather response")?;
        let current = parsed
            .current_condition
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Weather response has no current conditions"))?;

        let description = current
            .weather_desc
            .into_iter()
            .next()
            .map(|d| d.value)
            .unwrap_or_default();

        let (temperature, feels_like) = match unit {
            TemperatureUnit::Celsius => (
                format!("{}°C", current.temp_c),
                format!("{}°C", current.feels_like_c),
            ),
            TemperatureUnit::Fahrenheit => (
                format!("{}°F", current.temp_f),
                format!("{}°F", current.feels_like_f),
            ),
        };

        Ok(json!({
            "location": location,
            "temperature": temperature,
            "description": description,
            "humidity": format!("{}%", current.humidity),
            "wind_speed": format!("{} km/h", current.windspeed_kmph),
            "feels_like": feels_like,
        }))
    }
}

fn tool_error(message: impl Into<String>) -> RagError {
    RagError::ToolExecution {
        tool: TOOL_NAME.to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl ToolFunction for WeatherTool {
    #[inline]
    fn name(&self) -> &str {
        TOOL_NAME
    }

    #[inline]
    fn description(&self) -> &str {
        "Get the current weather for a location"
    }

    #[inline]
    fn json_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The location to get the weather for, e.g. San Francisco, CA"
                },
                "format": {
                    "type": "string",
                    "description": "The format to return the weather in, e.g. 'celsius' or 'fahrenheit'",
                    "enum": ["celsius", "fahrenheit"]
                }
            },
            "required": ["location", "format"]
        })
    }

    #[inline]
    async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value> {
        let location = arguments
            .get("location")
            .and_then(Value::as_str)
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| tool_error("Missing required parameter: location"))?
            .to_string();

        let unit = match arguments.get("format").and_then(Value::as_str) {
            Some("fahrenheit") => TemperatureUnit::Fahrenheit,
            Some("celsius") => TemperatureUnit::Celsius,
            other => {
                return Err(tool_error(format!(
                    "Unsupported temperature format: {other:?}"
                )));
            }
        };

        let tool = self.clone();
        tokio::task::spawn_blocking(move || tool.fetch_blocking(&location, unit))
            .await
            .map_err(|e| tool_error(format!("Weather task failed: {e}")))?
            .map_err(|e| {
                warn!("Weather lookup failed: {:#}", e);
                tool_error(format!("{e:#}"))
            })
    }
}
