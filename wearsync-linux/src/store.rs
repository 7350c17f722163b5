//! File-backed forecast store: the phone's local weather data, read on every request.
//!
//! ```toml
//! [[day]]
//! date = "2026-10-18"
//! condition_id = 500
//! max_temp = 12.4
//! min_temp = 3.6
//! ```

use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use serde::Deserialize;
use tracing::debug;
use wearsync_core::{
    art_for_condition, ForecastRecord, ForecastSnapshot, ProviderError, SnapshotProvider,
    TemperatureUnit,
};

#[derive(Debug, Deserialize)]
struct StoreFile {
    #[serde(default)]
    day: Vec<DayEntry>,
}

#[derive(Debug, Deserialize)]
struct DayEntry {
    date: NaiveDate,
    condition_id: i32,
    max_temp: f64,
    min_temp: f64,
}

impl DayEntry {
    fn record(&self) -> ForecastRecord {
        ForecastRecord {
            condition_id: self.condition_id,
            max_temp: self.max_temp,
            min_temp: self.min_temp,
        }
    }
}

pub struct FileForecastStore {
    path: PathBuf,
    icon_dir: PathBuf,
    unit: TemperatureUnit,
    today: Option<NaiveDate>,
}

impl FileForecastStore {
    pub fn new(path: impl Into<PathBuf>, icon_dir: impl Into<PathBuf>, unit: TemperatureUnit) -> Self {
        Self {
            path: path.into(),
            icon_dir: icon_dir.into(),
            unit,
            today: None,
        }
    }

    /// Pin "today" instead of using the local date.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    fn todays_record(&self) -> Result<Option<ForecastRecord>, ProviderError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "forecast store missing");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let file: StoreFile =
            toml::from_str(&text).map_err(|e| ProviderError::Parse(e.to_string()))?;
        let today = self.today();
        Ok(file.day.iter().find(|d| d.date == today).map(DayEntry::record))
    }
}

impl SnapshotProvider for FileForecastStore {
    fn current_snapshot(&self) -> Result<Option<ForecastSnapshot>, ProviderError> {
        let Some(record) = self.todays_record()? else {
            return Ok(None);
        };
        let art = art_for_condition(record.condition_id)
            .ok_or(ProviderError::UnknownCondition(record.condition_id))?;
        let icon_path = self.icon_dir.join(format!("{}.png", art.file_stem()));
        let icon = std::fs::read(&icon_path)?;
        debug!(condition = record.condition_id, icon = %icon_path.display(), "loaded today's forecast");
        Ok(Some(record.to_snapshot(icon, self.unit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORE: &str = r#"
[[day]]
date = "2026-10-17"
condition_id = 800
max_temp = 20.0
min_temp = 10.0

[[day]]
date = "2026-10-18"
condition_id = 500
max_temp = 5.0
min_temp = -2.5
"#;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn setup(store: &str) -> (tempfile::TempDir, FileForecastStore) {
        let dir = tempfile::tempdir().unwrap();
        let icons = dir.path().join("icons");
        std::fs::create_dir_all(&icons).unwrap();
        std::fs::write(icons.join("art_rain.png"), b"PNGDATA").unwrap();
        let path = dir.path().join("forecast.toml");
        std::fs::write(&path, store).unwrap();
        let store = FileForecastStore::new(path, icons, TemperatureUnit::Metric);
        (dir, store)
    }

    #[test]
    fn picks_todays_record() {
        let (_dir, store) = setup(STORE);
        let store = store.with_today(date("2026-10-18"));
        let snapshot = store.current_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.icon(), b"PNGDATA");
        assert_eq!(snapshot.min_temp(), "-2");
        assert_eq!(snapshot.max_temp(), "5");
    }

    #[test]
    fn imperial_units() {
        let (dir, _) = setup(STORE);
        let store = FileForecastStore::new(
            dir.path().join("forecast.toml"),
            dir.path().join("icons"),
            TemperatureUnit::Imperial,
        )
        .with_today(date("2026-10-18"));
        let snapshot = store.current_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.max_temp(), "41");
    }

    #[test]
    fn no_record_for_today_is_none() {
        let (_dir, store) = setup(STORE);
        let store = store.with_today(date("2026-10-20"));
        assert!(store.current_snapshot().unwrap().is_none());
    }

    #[test]
    fn missing_store_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileForecastStore::new(
            dir.path().join("absent.toml"),
            dir.path(),
            TemperatureUnit::Metric,
        );
        assert!(store.current_snapshot().unwrap().is_none());
    }

    #[test]
    fn missing_icon_is_io_error() {
        let (_dir, store) = setup(STORE);
        let store = store.with_today(date("2026-10-17"));
        assert!(matches!(store.current_snapshot(), Err(ProviderError::Io(_))));
    }

    #[test]
    fn unknown_condition_and_bad_file() {
        let (_dir, store) = setup(
            "[[day]]\ndate = \"2026-10-18\"\ncondition_id = 42\nmax_temp = 1.0\nmin_temp = 0.0\n",
        );
        let store = store.with_today(date("2026-10-18"));
        assert!(matches!(
            store.current_snapshot(),
            Err(ProviderError::UnknownCondition(42))
        ));

        let (_dir, store) = setup("[[day]]\ndate = 7\n");
        assert!(matches!(store.current_snapshot(), Err(ProviderError::Parse(_))));
    }
}
