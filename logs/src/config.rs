use log::warn;
use query_compiler::range::{self, Clock};
use query_compiler::template::DEFAULT_LIMIT;
use query_compiler::{DatetimeHelper, Deployment, Plan};
use serde::Deserialize;
use std::fs::File;
use std::io;
use std::sync::Arc;
use timeseries::FillOptions;
use timeseries::fill::{DEFAULT_DENSITY_THRESHOLD, DEFAULT_MAX_BUCKETS};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/logs-explorer/config.yaml";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub deployment: Deployment,
    pub row_limit: usize,
    pub plan: Plan,
    pub helpers: HelperSet,
    pub timeseries: TimeseriesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deployment: Deployment::default(),
            row_limit: DEFAULT_LIMIT,
            plan: Plan::default(),
            helpers: HelperSet::default(),
            timeseries: TimeseriesConfig::default(),
        }
    }
}

/// Which page's time range presets to offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelperSet {
    #[default]
    Explorer,
    Previewer,
}

impl HelperSet {
    /// The presets of this set that the plan may use.
    pub fn helpers(&self, plan: Plan, clock: Arc<dyn Clock>) -> Vec<DatetimeHelper> {
        let helpers = match self {
            Self::Explorer => range::explorer_helpers(clock),
            Self::Previewer => range::previewer_helpers(clock),
        };
        helpers
            .into_iter()
            .filter(|h| h.is_available_for(plan))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimeseriesConfig {
    pub density_threshold: usize,
    pub max_buckets: usize,
}

impl Default for TimeseriesConfig {
    fn default() -> Self {
        Self {
            density_threshold: DEFAULT_DENSITY_THRESHOLD,
            max_buckets: DEFAULT_MAX_BUCKETS,
        }
    }
}

impl TimeseriesConfig {
    pub fn fill_options(&self) -> FillOptions {
        FillOptions::default()
            .with_density_threshold(self.density_threshold)
            .with_max_buckets(self.max_buckets)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    IO(std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Reads the config file. A missing file yields the defaults.
pub fn load(filename: &str) -> Result<Config, Error> {
    let file = match File::open(filename) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Config file {} not found, using defaults", filename);
            return Ok(Config::default());
        }
        Err(e) => return Err(Error::IO(e)),
    };
    let c: Config = serde_yml::from_reader(file).map_err(Error::Parse)?;
    validate(c)
}

fn validate(c: Config) -> Result<Config, Error> {
    if c.row_limit == 0 {
        return Err(Error::Invalid("row_limit must be greater than zero"));
    }
    if c.timeseries.max_buckets == 0 {
        return Err(Error::Invalid("timeseries.max_buckets must be greater than zero"));
    }
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use query_compiler::range::FixedClock;

    #[test]
    fn test_partial_config() {
        let c: Config = serde_yml::from_str(
            "deployment: self_hosted\nplan: team\ntimeseries:\n  max_buckets: 500\n",
        )
        .unwrap();
        assert_eq!(c.deployment, Deployment::SelfHosted);
        assert_eq!(c.plan, Plan::Team);
        assert_eq!(c.row_limit, 100);
        assert_eq!(c.helpers, HelperSet::Explorer);
        assert_eq!(c.timeseries.max_buckets, 500);
        assert_eq!(c.timeseries.density_threshold, 10_000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let c = load("/nonexistent/logs-explorer.yaml").unwrap();
        assert_eq!(c.row_limit, DEFAULT_LIMIT);
        assert_eq!(c.deployment, Deployment::Platform);
    }

    #[test]
    fn test_zero_row_limit_rejected() {
        let c: Config = serde_yml::from_str("row_limit: 0\n").unwrap();
        assert!(matches!(validate(c), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_helpers_filtered_by_plan() {
        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let free = HelperSet::Explorer.helpers(Plan::Free, clock.clone());
        let texts: Vec<&str> = free.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["Last hour", "Last 24 hours"]);

        assert_eq!(HelperSet::Explorer.helpers(Plan::Pro, clock.clone()).len(), 4);
        assert_eq!(HelperSet::Previewer.helpers(Plan::Free, clock).len(), 3);
    }
}
