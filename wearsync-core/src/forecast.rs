//! Forecast data: the snapshot value object, the provider interface, and the
//! helpers a provider uses to build a snapshot (condition art, temperature formatting).

use serde::{Deserialize, Serialize};

/// Today's forecast as shown on the watch face. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastSnapshot {
    icon: Vec<u8>,
    min_temp: String,
    max_temp: String,
}

impl ForecastSnapshot {
    /// `icon` is the already-compressed condition image (PNG in practice);
    /// temperatures are already formatted for display.
    pub fn new(icon: Vec<u8>, min_temp: impl Into<String>, max_temp: impl Into<String>) -> Self {
        Self {
            icon,
            min_temp: min_temp.into(),
            max_temp: max_temp.into(),
        }
    }

    pub fn icon(&self) -> &[u8] {
        &self.icon
    }

    pub fn min_temp(&self) -> &str {
        &self.min_temp
    }

    pub fn max_temp(&self) -> &str {
        &self.max_temp
    }
}

/// Source of the current forecast. Pure read, may block on disk or database I/O:
/// never call from the transport's event path.
pub trait SnapshotProvider: Send + Sync {
    /// `Ok(None)` when no record exists for today.
    fn current_snapshot(&self) -> Result<Option<ForecastSnapshot>, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid forecast data: {0}")]
    Parse(String),
    #[error("no art for weather condition {0}")]
    UnknownCondition(i32),
}

/// One row of the "today" query. Temperatures are Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub condition_id: i32,
    pub max_temp: f64,
    pub min_temp: f64,
}

impl ForecastRecord {
    /// Build a snapshot from this record and the encoded art for its condition.
    pub fn to_snapshot(&self, icon: Vec<u8>, unit: TemperatureUnit) -> ForecastSnapshot {
        ForecastSnapshot::new(
            icon,
            format_temperature(self.min_temp, unit),
            format_temperature(self.max_temp, unit),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Metric,
    Imperial,
}

impl std::str::FromStr for TemperatureUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "metric" => Ok(TemperatureUnit::Metric),
            "imperial" => Ok(TemperatureUnit::Imperial),
            other => Err(format!("unknown temperature unit: {other}")),
        }
    }
}

/// Format a Celsius reading as whole degrees in `unit`. Halves round up, so -2.5 formats as "-2".
pub fn format_temperature(celsius: f64, unit: TemperatureUnit) -> String {
    let value = match unit {
        TemperatureUnit::Metric => celsius,
        TemperatureUnit::Imperial => celsius * 1.8 + 32.0,
    };
    let s = format!("{:.0}", (value + 0.5).floor());
    // "-0" reads badly on a watch face.
    if s == "-0" {
        "0".to_string()
    } else {
        s
    }
}

/// Condition art shipped with the phone app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeatherArt {
    Storm,
    LightRain,
    Rain,
    Snow,
    Fog,
    Clear,
    LightClouds,
    Clouds,
}

impl WeatherArt {
    /// File stem of the art resource, e.g. `art_light_rain`.
    pub fn file_stem(self) -> &'static str {
        match self {
            WeatherArt::Storm => "art_storm",
            WeatherArt::LightRain => "art_light_rain",
            WeatherArt::Rain => "art_rain",
            WeatherArt::Snow => "art_snow",
            WeatherArt::Fog => "art_fog",
            WeatherArt::Clear => "art_clear",
            WeatherArt::LightClouds => "art_light_clouds",
            WeatherArt::Clouds => "art_clouds",
        }
    }
}

/// Map an OpenWeatherMap condition id to its art. None for ids without art.
pub fn art_for_condition(condition_id: i32) -> Option<WeatherArt> {
    match condition_id {
        200..=232 => Some(WeatherArt::Storm),
        300..=321 => Some(WeatherArt::LightRain),
        500..=504 => Some(WeatherArt::Rain),
        511 => Some(WeatherArt::Snow),
        520..=531 => Some(WeatherArt::Rain),
        600..=622 => Some(WeatherArt::Snow),
        701..=761 => Some(WeatherArt::Fog),
        781 => Some(WeatherArt::Storm),
        800 => Some(WeatherArt::Clear),
        801 => Some(WeatherArt::LightClouds),
        802..=804 => Some(WeatherArt::Clouds),
        _ => None,
    }
}
