use crate::core::model::{Owner, data_epoch};
use crate::core::split::RatioOrientation;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Holding {
    pub symbol: String,
    pub currency: String,
    /// Earliest time to backfill from when the instrument is first tracked.
    #[serde(default)]
    pub track_from: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Portfolio {
    pub name: String,
    #[serde(default)]
    pub holdings: Vec<Holding>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub yahoo: Option<YahooProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            yahoo: Some(YahooProviderConfig {
                base_url: "https://query1.finance.yahoo.com".to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    /// Global floor; nothing older is ever requested.
    pub data_start: DateTime<Utc>,
    /// Backfill depth for owners with no tracking state, holding start or
    /// transactions.
    pub initial_lookback_days: i64,
    /// Samples written per commit while syncing.
    pub flush_chunk_size: usize,
    /// Owners processed concurrently.
    pub workers: usize,
    pub split_ratio: RatioOrientation,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            data_start: DateTime::parse_from_rfc3339("2000-01-01T00:00:00Z")
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| data_epoch()),
            initial_lookback_days: 365,
            flush_chunk_size: 1000,
            workers: 4,
            split_ratio: RatioOrientation::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub sync_interval_secs: u64,
    pub compaction_interval_secs: u64,
    pub split_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 300,
            compaction_interval_secs: 86_400,
            split_interval_secs: 3_600,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub portfolios: Vec<Portfolio>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    pub currency: String,
    pub data_path: Option<String>,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("in", "codito", "xmf-history")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("in", "codito", "xmf-history")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Distinct instruments across portfolios, with the earliest configured
    /// `track_from` when several holdings name the same instrument.
    pub fn instruments(&self) -> BTreeMap<Owner, Option<DateTime<Utc>>> {
        let mut instruments: BTreeMap<Owner, Option<DateTime<Utc>>> = BTreeMap::new();
        for holding in self.portfolios.iter().flat_map(|p| &p.holdings) {
            let owner = Owner::instrument(&holding.symbol, &holding.currency);
            let entry = instruments.entry(owner).or_insert(holding.track_from);
            *entry = match (*entry, holding.track_from) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        instruments
    }

    /// One exchange rate owner per holding currency that differs from the
    /// base currency.
    pub fn exchange_rates(&self) -> Vec<Owner> {
        let base = self.currency.to_uppercase();
        let mut quotes: Vec<String> = self
            .portfolios
            .iter()
            .flat_map(|p| &p.holdings)
            .map(|h| h.currency.to_uppercase())
            .filter(|c| *c != base)
            .collect();
        quotes.sort();
        quotes.dedup();
        quotes
            .iter()
            .map(|q| Owner::exchange_rate(&base, q))
            .collect()
    }

    /// Instruments followed by exchange rates.
    pub fn owners(&self) -> Vec<Owner> {
        self.instruments()
            .into_keys()
            .chain(self.exchange_rates())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
portfolios:
  - name: "Tech Stocks"
    holdings:
      - symbol: "AAPL"
        currency: "USD"
      - symbol: "ASML.AS"
        currency: "EUR"
        track_from: "2023-01-01T00:00:00Z"
  - name: "India"
    holdings:
      - symbol: "INFY.NS"
        currency: "INR"
      - symbol: "ASML.AS"
        currency: "EUR"
        track_from: "2022-06-01T00:00:00Z"
currency: "USD"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.portfolios.len(), 2);
        assert_eq!(config.portfolios[0].name, "Tech Stocks");
        assert_eq!(config.portfolios[0].holdings.len(), 2);
        assert_eq!(config.currency, "USD");
        assert!(config.data_path.is_none());

        let instruments = config.instruments();
        assert_eq!(instruments.len(), 3);
        assert_eq!(
            instruments[&Owner::instrument("ASML.AS", "EUR")],
            Some(Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(instruments[&Owner::instrument("AAPL", "USD")], None);

        assert_eq!(
            config.exchange_rates(),
            vec![
                Owner::exchange_rate("USD", "EUR"),
                Owner::exchange_rate("USD", "INR")
            ]
        );
        assert_eq!(config.owners().len(), 5);

        assert!(config.providers.yahoo.is_some());
        assert_eq!(
            config.providers.yahoo.as_ref().unwrap().base_url,
            "https://query1.finance.yahoo.com".to_string()
        );
        assert_eq!(config.history.flush_chunk_size, 1000);
        assert_eq!(config.history.split_ratio, RatioOrientation::Direct);
        assert_eq!(config.schedule.sync_interval_secs, 300);
    }

    #[test]
    fn test_config_overrides() {
        let yaml_str = r#"
portfolios: []
providers:
  yahoo:
    base_url: "http://example.com/yahoo"
currency: "EUR"
data_path: "/tmp/xmf-history"
history:
  data_start: "2010-01-01T00:00:00Z"
  workers: 1
  split_ratio: swapped
schedule:
  compaction_interval_secs: 60
        "#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(
            config.providers.yahoo.as_ref().unwrap().base_url,
            "http://example.com/yahoo"
        );
        assert_eq!(
            config.history.data_start,
            Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(config.history.workers, 1);
        assert_eq!(config.history.initial_lookback_days, 365);
        assert_eq!(config.history.split_ratio, RatioOrientation::Swapped);
        assert_eq!(config.schedule.compaction_interval_secs, 60);
        assert_eq!(config.schedule.sync_interval_secs, 300);
        assert_eq!(
            config.default_data_path().unwrap(),
            PathBuf::from("/tmp/xmf-history")
        );
    }
}
