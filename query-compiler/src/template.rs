use crate::filter::{self, FilterSelection};
use crate::range::{Clock, ResolvedTimeRange, SystemClock};
use crate::source::LogSource;
use crate::sql::{SqlFragment, Statement};
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, warn};
use serde::Deserialize;
use timeseries::Granularity;
use timeseries::timestamp::{parse_timestamp, to_iso};

pub const DEFAULT_LIMIT: usize = 100;

/// Where the analytics backend runs. Self-hosted stacks do not carry the
/// project `identifier` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deployment {
    #[default]
    Platform,
    SelfHosted,
}

pub struct Builder<'a> {
    source: &'a LogSource,
    filters: Option<&'a FilterSelection>,
    deployment: Deployment,
    limit: usize,
    clock: &'a dyn Clock,
}

impl<'a> Builder<'a> {
    pub fn new(source: &'a LogSource) -> Self {
        Self {
            source,
            filters: None,
            deployment: Deployment::default(),
            limit: DEFAULT_LIMIT,
            clock: &SystemClock,
        }
    }

    #[inline]
    pub fn with_filters(mut self, filters: &'a FilterSelection) -> Self {
        self.filters = Some(filters);

        self
    }

    #[inline]
    pub fn with_deployment(mut self, deployment: Deployment) -> Self {
        self.deployment = deployment;

        self
    }

    #[inline]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;

        self
    }

    /// Clock used for the blank ends of a chart range.
    #[inline]
    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;

        self
    }

    /// Base restriction of view-like sources followed by the compiled filters.
    fn conditions(&self) -> Vec<SqlFragment> {
        let mut conditions: Vec<SqlFragment> = self
            .source
            .base_predicate()
            .map(SqlFragment::sql)
            .into_iter()
            .collect();
        if let Some(filters) = self.filters {
            conditions.extend(filter::compile_conditions(self.source, filters));
        }

        conditions
    }

    fn projection(&self) -> String {
        let table = self.source.physical_table();
        match (self.source, self.deployment) {
            (LogSource::Edge, Deployment::Platform) => format!(
                "id, {table}.timestamp, identifier, event_message, request.method, request.path, response.status_code"
            ),
            (LogSource::Edge, Deployment::SelfHosted) => format!(
                "id, {table}.timestamp, event_message, request.method, request.path, response.status_code"
            ),
            (LogSource::Postgres | LogSource::PgCron, Deployment::Platform) => format!(
                "id, {table}.timestamp, identifier, event_message, parsed.error_severity"
            ),
            (LogSource::Postgres | LogSource::PgCron, Deployment::SelfHosted) => {
                format!("id, {table}.timestamp, event_message, parsed.error_severity")
            }
            (LogSource::Functions, _) => format!(
                "id, {table}.timestamp, event_message, metadata.event_type, metadata.function_id, metadata.level"
            ),
            (LogSource::Auth, _) => format!(
                "id, {table}.timestamp, event_message, metadata.level, metadata.status, metadata.path, metadata.msg as msg, metadata.error"
            ),
            (LogSource::FunctionEdge, _) => format!(
                "id, {table}.timestamp, event_message, response.status_code, request.method, m.function_id, m.execution_time_ms, m.deployment_id, m.version"
            ),
            _ => format!("id, {table}.timestamp, event_message"),
        }
    }

    /// `select <projection> from <table> <joins> <where> order by timestamp desc limit <n>`
    pub fn row_query(&self) -> Statement {
        let table = self.source.physical_table();
        SqlFragment::join(
            [
                SqlFragment::sql(format!("select {} from {}", self.projection(), table)),
                joins(self.source),
                filter::where_clause(self.conditions()),
                SqlFragment::sql(format!("order by timestamp desc limit {}", self.limit)),
            ],
            " ",
        )
        .build()
    }

    pub fn count_query(&self) -> Statement {
        let table = self.source.physical_table();
        SqlFragment::join(
            [
                SqlFragment::sql(format!("SELECT count(*) as count FROM {}", table)),
                joins(self.source),
                filter::where_clause(self.conditions()),
            ],
            " ",
        )
        .build()
    }

    /// Event counts per time bucket, split into ok, error and warning.
    ///
    /// The window is extended backwards so the chart has enough history to
    /// show a sensible number of buckets.
    pub fn chart_query(&self, range: &ResolvedTimeRange) -> Statement {
        let window = ChartWindow::from_range(range, self.clock);
        let (granularity, lower_bound) = match window {
            Some(w) => (w.granularity, Some(w.lookback_start)),
            None => {
                warn!(
                    "Could not parse chart range {} to {}, querying without a lower bound",
                    range.from, range.to
                );
                (Granularity::Minute, None)
            }
        };

        let table = self.source.physical_table();
        let error = self.source.error_condition();
        let warning = self.source.warning_condition();
        let mut conditions = self.conditions();
        if let Some(start) = lower_bound {
            conditions.push(SqlFragment::sql("t.timestamp > ").param(to_iso(start)));
        }

        SqlFragment::join(
            [
                SqlFragment::sql(format!(
                    "SELECT timestamp_trunc(t.timestamp, {granularity}) as timestamp, \
                     count(case when not coalesce(({error}) or ({warning}), false) then 1 end) as ok_count, \
                     count(case when {error} then 1 end) as error_count, \
                     count(case when {warning} then 1 end) as warning_count \
                     FROM {table} t"
                )),
                joins(self.source),
                filter::where_clause(conditions),
                SqlFragment::sql("GROUP BY timestamp ORDER BY timestamp ASC"),
            ],
            " ",
        )
        .build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartWindow {
    pub granularity: Granularity,
    pub lookback_start: DateTime<Utc>,
}

impl ChartWindow {
    /// Windows longer than three days are bucketed by day and extended by a
    /// week, longer than twelve hours by hour and extended by five days,
    /// anything else by minute and extended by six hours.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let width = end - start;
        let (granularity, extend) = if width > TimeDelta::days(3) {
            (Granularity::Day, TimeDelta::days(7))
        } else if width > TimeDelta::hours(12) {
            (Granularity::Hour, TimeDelta::hours(24 * 5))
        } else {
            (Granularity::Minute, TimeDelta::minutes(60 * 6))
        };
        debug!("Chart window of {} minutes uses {} buckets", width.num_minutes(), granularity);

        Self {
            granularity,
            lookback_start: start.checked_sub_signed(extend).unwrap_or(start),
        }
    }

    /// Blank ends default to now. `None` when an end is set but unparseable.
    fn from_range(range: &ResolvedTimeRange, clock: &dyn Clock) -> Option<Self> {
        let bound = |value: &str| match value.trim() {
            "" => Some(clock.now()),
            value => parse_timestamp(value),
        };
        Some(Self::new(bound(&range.from)?, bound(&range.to)?))
    }
}

/// The source's unnest joins as one clause, empty for flat sources.
pub fn joins_for(source: &LogSource) -> String {
    source.joins().join(" ")
}

fn joins(source: &LogSource) -> SqlFragment {
    SqlFragment::sql(joins_for(source))
}

pub fn row_query(source: &LogSource, filters: &FilterSelection, limit: usize) -> Statement {
    Builder::new(source)
        .with_filters(filters)
        .with_limit(limit)
        .row_query()
}

pub fn count_query(source: &LogSource, filters: &FilterSelection) -> Statement {
    Builder::new(source).with_filters(filters).count_query()
}

pub fn chart_query(
    source: &LogSource,
    range: &ResolvedTimeRange,
    filters: &FilterSelection,
) -> Statement {
    Builder::new(source).with_filters(filters).chart_query(range)
}

/// Looks up one event by id.
///
/// The id is bound as a parameter. Ids are expected to come from a previous
/// result set, not from free text.
pub fn single_row_query(source: &LogSource, id: &str) -> Statement {
    SqlFragment::sql(format!(
        "select id, timestamp, event_message, metadata from {} where id = ",
        source.physical_table()
    ))
    .param(id)
    .text(" limit 1")
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterValue;
    use crate::range::FixedClock;

    fn range(from: &str, to: &str) -> ResolvedTimeRange {
        ResolvedTimeRange {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn status_error() -> FilterSelection {
        FilterSelection::new().with(
            "status_code",
            FilterSelection::new().with("error", FilterValue::Bool(true)),
        )
    }

    #[test]
    fn test_joins_for() {
        assert_eq!(
            joins_for(&LogSource::Postgres),
            "cross join unnest(metadata) as m cross join unnest(m.parsed) as parsed"
        );
        assert_eq!(joins_for(&LogSource::Storage), "");
    }

    #[test]
    fn test_row_query_edge() {
        let statement = row_query(&LogSource::Edge, &status_error(), 100);
        assert_eq!(
            statement.sql,
            "select id, edge_logs.timestamp, identifier, event_message, request.method, request.path, response.status_code \
             from edge_logs \
             cross join unnest(metadata) as m cross join unnest(m.request) as request cross join unnest(m.response) as response \
             where (response.status_code between 500 and 599) \
             order by timestamp desc limit 100"
        );
        assert!(statement.params.is_empty());
    }

    #[test]
    fn test_row_query_without_filters_has_no_where() {
        let statement = row_query(&LogSource::Storage, &FilterSelection::new(), 10);
        assert_eq!(
            statement.sql,
            "select id, storage_logs.timestamp, event_message from storage_logs order by timestamp desc limit 10"
        );
    }

    #[test]
    fn test_row_query_self_hosted() {
        let statement = Builder::new(&LogSource::Postgres)
            .with_deployment(Deployment::SelfHosted)
            .row_query();
        assert!(statement.sql.starts_with(
            "select id, postgres_logs.timestamp, event_message, parsed.error_severity from postgres_logs"
        ));
    }

    #[test]
    fn test_unknown_source_uses_generic_shape() {
        let source = LogSource::from("my_collection");
        let filters = FilterSelection::new().with("level", "error");
        let statement = row_query(&source, &filters, 50);
        assert_eq!(
            statement.inline(),
            "select id, my_collection.timestamp, event_message from my_collection where (level = 'error') order by timestamp desc limit 50"
        );
    }

    #[test]
    fn test_count_query() {
        let statement = count_query(&LogSource::Auth, &FilterSelection::new());
        assert_eq!(
            statement.sql,
            "SELECT count(*) as count FROM auth_logs cross join unnest(metadata) as metadata"
        );
    }

    #[test]
    fn test_pg_cron_rewrites_to_postgres() {
        let filters = FilterSelection::new().with("search_query", "vacuum");
        let statement = count_query(&LogSource::PgCron, &filters);
        assert_eq!(
            statement.inline(),
            "SELECT count(*) as count FROM postgres_logs \
             cross join unnest(metadata) as m cross join unnest(m.parsed) as parsed \
             where (parsed.application_name = 'pg_cron' or regexp_contains(event_message, 'cron job')) \
             and (regexp_contains(event_message, 'vacuum'))"
        );
        assert!(!statement.sql.contains("pg_cron_logs"));
    }

    #[test]
    fn test_single_row_query() {
        let statement = single_row_query(&LogSource::Edge, "abc-123");
        assert_eq!(
            statement.sql,
            "select id, timestamp, event_message, metadata from edge_logs where id = @p0 limit 1"
        );
        assert_eq!(
            statement.inline(),
            "select id, timestamp, event_message, metadata from edge_logs where id = 'abc-123' limit 1"
        );
    }

    #[test]
    fn test_chart_query_edge_errors() {
        let statement = chart_query(
            &LogSource::Edge,
            &range("2024-01-01T00:00:00.000Z", "2024-01-01T01:00:00.000Z"),
            &status_error(),
        );

        assert!(statement.sql.contains("timestamp_trunc(t.timestamp, minute) as timestamp"));
        assert!(statement.sql.contains("count(case when response.status_code >= 500 then 1 end) as error_count"));
        assert!(statement.sql.contains(
            "where (response.status_code between 500 and 599) and t.timestamp > @p0"
        ));
        assert!(statement.sql.ends_with("GROUP BY timestamp ORDER BY timestamp ASC"));
        assert!(statement.inline().contains("t.timestamp > '2023-12-31T18:00:00.000Z'"));
    }

    #[test]
    fn test_chart_query_without_filters() {
        let statement = chart_query(
            &LogSource::Functions,
            &range("2024-01-01T00:00:00.000Z", "2024-01-02T00:00:00.000Z"),
            &FilterSelection::new(),
        );
        assert!(statement.sql.contains("timestamp_trunc(t.timestamp, hour)"));
        assert!(statement.sql.contains("metadata.level = 'warn'"));
        assert!(statement.inline().contains("where t.timestamp > '2023-12-27T00:00:00.000Z'"));
    }

    #[test]
    fn test_chart_window() {
        let at = |s: &str| parse_timestamp(s).unwrap();
        let window = ChartWindow::new(at("2024-01-01T00:00:00Z"), at("2024-01-08T00:00:00Z"));
        assert_eq!(window.granularity, Granularity::Day);
        assert_eq!(window.lookback_start, at("2023-12-25T00:00:00Z"));

        let window = ChartWindow::new(at("2024-01-01T00:00:00Z"), at("2024-01-01T12:00:00Z"));
        assert_eq!(window.granularity, Granularity::Minute);
    }

    #[test]
    fn test_chart_blank_start_defaults_to_now() {
        let clock = FixedClock(parse_timestamp("2024-01-01T03:00:00Z").unwrap());
        let range = range("", "2024-01-01T01:00:00Z");
        let statement = Builder::new(&LogSource::Edge)
            .with_clock(&clock)
            .chart_query(&range);
        assert!(statement.inline().contains("where t.timestamp > '2023-12-31T21:00:00.000Z'"));

        let range = ResolvedTimeRange {
            from: "2024-01-01T02:30:00Z".to_string(),
            to: " ".to_string(),
        };
        let statement = Builder::new(&LogSource::Edge)
            .with_clock(&clock)
            .chart_query(&range);
        assert!(statement.sql.contains("timestamp_trunc(t.timestamp, minute)"));
        assert!(statement.inline().contains("where t.timestamp > '2023-12-31T20:30:00.000Z'"));
    }

    #[test]
    fn test_chart_ok_count_treats_null_as_ok() {
        let statement = chart_query(
            &LogSource::Edge,
            &range("2024-01-01T00:00:00Z", "2024-01-01T01:00:00Z"),
            &FilterSelection::new(),
        );
        assert!(statement.sql.contains(
            "count(case when not coalesce((response.status_code >= 500) or \
             (response.status_code >= 400 and response.status_code < 500), false) then 1 end) as ok_count"
        ));
    }

    #[test]
    fn test_chart_query_unparseable_range() {
        let statement = chart_query(&LogSource::Edge, &range("", "soon"), &FilterSelection::new());
        assert!(statement.params.is_empty());
        assert!(!statement.sql.contains("where"));
    }
}
