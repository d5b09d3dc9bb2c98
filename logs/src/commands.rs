use crate::config::Config;
use anyhow::anyhow;
use clap::{Args, Subcommand};
use log::{debug, info, warn};
use query_compiler::plan::should_show_upgrade_prompt;
use query_compiler::range::{self, Clock};
use query_compiler::{
    Builder, DatePickerValue, DatetimeHelper, FilterSelection, LogSource, Param,
    ResolvedTimeRange, Statement,
};
use serde::Serialize;
use std::io::Read;
use std::sync::Arc;
use timeseries::{TimeSeriesPoint, fill_timeseries};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Event rows, newest first
    Rows {
        #[command(flatten)]
        query: QueryArgs,

        #[arg(long, help = "Maximum number of rows, defaults to the configured row limit")]
        limit: Option<usize>,
    },
    /// Number of matching events
    Count {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Ok, error and warning counts per time bucket
    Chart {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// A single event by id
    Single {
        #[arg(short, long, help = "Log source table")]
        source: String,

        #[arg(long, help = "Event id")]
        id: String,

        #[arg(long, help = "Print the SQL with parameters substituted")]
        inline: bool,
    },
    /// Resolves a time range, or suggests ranges for free-form input
    Range {
        #[command(flatten)]
        range: RangeArgs,

        #[arg(long, help = "Free-form input such as \"30m\" or \"2 days\"", conflicts_with = "helper")]
        input: Option<String>,
    },
    /// Lists the known log sources
    Sources,
    /// Gap-fills a JSON time series read from stdin
    Fill {
        #[arg(long, help = "Bucket interval such as 1m, 5m, 1h or 1d")]
        interval: Option<String>,

        #[arg(long, help = "Lower bound of the series")]
        min: Option<String>,

        #[arg(long, help = "Upper bound of the series")]
        max: Option<String>,

        #[arg(long, help = "Value inserted for missing buckets", default_value_t = 0.0)]
        default_value: f64,
    },
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[arg(short, long, help = "Log source table")]
    source: String,

    #[arg(long, help = "Filter selection as a JSON object")]
    filters: Option<String>,

    #[command(flatten)]
    range: RangeArgs,

    #[arg(long, help = "Print the SQL with parameters substituted")]
    inline: bool,
}

#[derive(Args, Debug)]
pub struct RangeArgs {
    #[arg(long, help = "Time range preset, such as \"Last hour\"")]
    helper: Option<String>,

    #[arg(long, help = "Start of a custom time range", conflicts_with = "helper")]
    from: Option<String>,

    #[arg(long, help = "End of a custom time range", conflicts_with = "helper")]
    to: Option<String>,
}

impl RangeArgs {
    fn picker_value(&self) -> DatePickerValue {
        if self.from.is_none() && self.to.is_none() {
            return DatePickerValue {
                is_helper: true,
                text: self.helper.clone(),
                ..Default::default()
            };
        }

        DatePickerValue {
            from: self.from.clone().unwrap_or_default(),
            to: self.to.clone().unwrap_or_default(),
            is_helper: false,
            text: None,
        }
    }
}

#[derive(Serialize)]
struct QueryOutput {
    sql: String,
    params: Vec<Param>,
    iso_timestamp_start: String,
    iso_timestamp_end: String,
}

#[derive(Serialize)]
struct RangeOutput {
    from: String,
    to: String,
    upgrade_prompt: bool,
}

#[derive(Serialize)]
struct SourceOutput {
    name: String,
    description: &'static str,
}

#[derive(Serialize)]
struct HelperOutput {
    text: String,
    from: String,
    to: String,
    default: bool,
}

impl From<&DatetimeHelper> for HelperOutput {
    fn from(helper: &DatetimeHelper) -> Self {
        Self {
            text: helper.text.clone(),
            from: helper.calc_from(),
            to: helper.calc_to(),
            default: helper.default,
        }
    }
}

pub struct Runner<'a> {
    config: &'a Config,
    clock: Arc<dyn Clock>,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a Config, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Runs a command against the given stdin and returns what to print.
    pub fn run(&self, command: Command, stdin: impl Read) -> Result<String, anyhow::Error> {
        match command {
            Command::Rows { query, limit } => {
                let limit = limit.unwrap_or(self.config.row_limit);
                self.compile(&query, |b, _| b.with_limit(limit).row_query())
            }
            Command::Count { query } => self.compile(&query, |b, _| b.count_query()),
            Command::Chart { query } => self.compile(&query, |b, range| b.chart_query(range)),
            Command::Single { source, id, inline } => {
                if id.trim().is_empty() {
                    return Err(anyhow!("Event id must not be empty"));
                }
                let source = LogSource::from(source.as_str());
                let statement = query_compiler::single_row_query(&source, &id);
                if inline {
                    return Ok(statement.inline().to_string());
                }
                Ok(serde_json::to_string_pretty(&statement)?)
            }
            Command::Range { range, input } => match input {
                Some(input) => self.suggest_ranges(&input),
                None => {
                    let resolved = self.resolve_range(&range);
                    let upgrade_prompt = should_show_upgrade_prompt(
                        &resolved.from,
                        self.config.plan,
                        self.clock.as_ref(),
                    );
                    Ok(serde_json::to_string_pretty(&RangeOutput {
                        from: resolved.from,
                        to: resolved.to,
                        upgrade_prompt,
                    })?)
                }
            },
            Command::Sources => {
                let sources: Vec<SourceOutput> = LogSource::ALL
                    .iter()
                    .map(|source| SourceOutput {
                        name: source.table_name().to_string(),
                        description: source.description(),
                    })
                    .collect();
                Ok(serde_json::to_string_pretty(&sources)?)
            }
            Command::Fill {
                interval,
                min,
                max,
                default_value,
            } => {
                let series: Vec<TimeSeriesPoint> = serde_json::from_reader(stdin)?;
                let mut options = self
                    .config
                    .timeseries
                    .fill_options()
                    .with_bounds(min, max)
                    .with_default_value(default_value);
                if let Some(interval) = interval {
                    options = options.with_interval(interval);
                }
                let filled = fill_timeseries(series, &options)?;
                Ok(serde_json::to_string_pretty(&filled)?)
            }
        }
    }

    fn compile<F>(&self, query: &QueryArgs, build: F) -> Result<String, anyhow::Error>
    where
        F: FnOnce(Builder<'_>, &ResolvedTimeRange) -> Statement,
    {
        let source = LogSource::from(query.source.as_str());
        if let LogSource::Other(name) = &source {
            warn!("Unknown log source {}, using the generic shape", name);
        }
        let filters = match &query.filters {
            Some(json) => FilterSelection::from_json(json)?,
            None => FilterSelection::new(),
        };
        let range = self.resolve_range(&query.range);
        if should_show_upgrade_prompt(&range.from, self.config.plan, self.clock.as_ref()) {
            info!(
                "Range starting {} exceeds the {} retention of the plan",
                range.from,
                self.config.plan.query_limit().text
            );
        }

        let statement = build(
            Builder::new(&source)
                .with_filters(&filters)
                .with_deployment(self.config.deployment)
                .with_clock(self.clock.as_ref()),
            &range,
        );
        debug!("Compiled {} query with {} params", source, statement.params.len());
        if query.inline {
            return Ok(statement.inline().to_string());
        }

        Ok(serde_json::to_string_pretty(&QueryOutput {
            sql: statement.sql,
            params: statement.params,
            iso_timestamp_start: range.from,
            iso_timestamp_end: range.to,
        })?)
    }

    fn helpers(&self) -> Vec<DatetimeHelper> {
        self.config.helpers.helpers(self.config.plan, self.clock.clone())
    }

    fn resolve_range(&self, args: &RangeArgs) -> ResolvedTimeRange {
        range::resolve_log_date_range(&args.picker_value(), &self.helpers(), self.clock.as_ref())
    }

    fn suggest_ranges(&self, input: &str) -> Result<String, anyhow::Error> {
        let helpers = range::generate_helpers_from_input(input, self.clock.clone())
            .unwrap_or_else(|| self.helpers());
        let output: Vec<HelperOutput> = helpers.iter().map(HelperOutput::from).collect();
        Ok(serde_json::to_string_pretty(&output)?)
    }
}
