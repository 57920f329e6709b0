use std::collections::HashSet;
use std::env;
use std::str::FromStr;

use thiserror::Error;

/// Search-condition path segment appended to the complex listing entry URL:
/// built within 20 years, average asking price above the floor.
pub const SEARCH_CONDITION: &str = "su1y4bp5ep10000";

/// City subdomains the target site serves that this scraper understands.
pub const CITIES: [&str; 3] = ["bj", "sh", "sz"];

/// Administrative districts with too few qualifying complexes to be worth
/// crawling. Overridable via `DISTRICT_BLACKLIST`.
pub const DEFAULT_DISTRICT_BLACKLIST: [&str; 5] = [
    "chongming",
    "shanghaizhoubian",
    "jinshan",
    "fengxian",
    "qingpu",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("unsupported city code {0:?} (expected one of bj, sh, sz)")]
    UnsupportedCity(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub city: String,
    pub database_url: String,
    pub delay_ms: u64,
    pub queue_capacity: usize,
    pub flush_interval_secs: u64,
    pub district_blacklist: HashSet<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let city = require("CITY")?;
        if !CITIES.contains(&city.as_str()) {
            return Err(ConfigError::UnsupportedCity(city));
        }

        let district_blacklist = match env::var("DISTRICT_BLACKLIST") {
            Ok(raw) => raw
                .split(',')
                .map(|code| code.trim().to_string())
                .filter(|code| !code.is_empty())
                .collect(),
            Err(_) => DEFAULT_DISTRICT_BLACKLIST
                .iter()
                .map(|code| code.to_string())
                .collect(),
        };

        // The intake channel and flush timer both reject zero.
        let queue_capacity = optional("QUEUE_CAPACITY", 1000)?;
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "QUEUE_CAPACITY",
                value: "0".to_string(),
            });
        }
        let flush_interval_secs = optional("FLUSH_INTERVAL_SECS", 5)?;
        if flush_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "FLUSH_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            city,
            database_url: require("DATABASE_URL")?,
            delay_ms: optional("DELAY_MS", 300)?,
            queue_capacity,
            flush_interval_secs,
            district_blacklist,
        })
    }

    pub fn base_url(&self) -> String {
        format!("https://{}.lianjia.com", self.city)
    }

    pub fn start_url(&self) -> String {
        format!("{}/xiaoqu/{}", self.base_url(), SEARCH_CONDITION)
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}
