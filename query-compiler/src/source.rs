use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// A backend subsystem whose events can be queried.
///
/// Parsing never fails: names that are not a known table or product alias
/// become [`LogSource::Other`] and get the generic query shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogSource {
    Edge,
    Postgres,
    Functions,
    FunctionEdge,
    Auth,
    Realtime,
    Storage,
    Postgrest,
    Supavisor,
    Warehouse,
    PgCron,
    Other(String),
}

impl LogSource {
    pub const ALL: [LogSource; 11] = [
        Self::Edge,
        Self::Postgres,
        Self::Functions,
        Self::FunctionEdge,
        Self::Auth,
        Self::Realtime,
        Self::Storage,
        Self::Postgrest,
        Self::Supavisor,
        Self::Warehouse,
        Self::PgCron,
    ];

    pub fn table_name(&self) -> &str {
        match self {
            Self::Edge => "edge_logs",
            Self::Postgres => "postgres_logs",
            Self::Functions => "function_logs",
            Self::FunctionEdge => "function_edge_logs",
            Self::Auth => "auth_logs",
            Self::Realtime => "realtime_logs",
            Self::Storage => "storage_logs",
            Self::Postgrest => "postgrest_logs",
            Self::Supavisor => "supavisor_logs",
            Self::Warehouse => "warehouse_logs",
            Self::PgCron => "pg_cron_logs",
            Self::Other(name) => name,
        }
    }

    /// The table that physically holds the source's events. Differs from
    /// [`LogSource::table_name`] for sources that are views over another table.
    pub fn physical_table(&self) -> &str {
        match self {
            Self::PgCron => Self::Postgres.table_name(),
            _ => self.table_name(),
        }
    }

    /// Restriction applied on the physical table for view-like sources.
    pub fn base_predicate(&self) -> Option<&'static str> {
        match self {
            Self::PgCron => Some(
                "(parsed.application_name = 'pg_cron' or regexp_contains(event_message, 'cron job'))",
            ),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Edge => "Logs obtained from the network edge, containing all API requests",
            Self::Postgres => "Database logs obtained directly from Postgres",
            Self::Functions => "Function logs generated from runtime execution",
            Self::FunctionEdge => "Function call logs, containing the request and response",
            Self::Auth => "Authentication logs from GoTrue",
            Self::Realtime => "Realtime server for Postgres logical replication broadcasting",
            Self::Storage => "Object storage logs",
            Self::Postgrest => "RESTful API web server logs",
            Self::Supavisor => "Cloud-native Postgres connection pooler logs",
            Self::Warehouse => "Logs obtained from a data warehouse collection",
            Self::PgCron => "Postgres logs from pg_cron cron jobs",
            Self::Other(_) => "Custom log collection",
        }
    }

    /// Cross join unnests that expose nested metadata records under the
    /// aliases the filter templates and projections refer to.
    pub fn joins(&self) -> &'static [&'static str] {
        match self {
            Self::Edge => &[
                "cross join unnest(metadata) as m",
                "cross join unnest(m.request) as request",
                "cross join unnest(m.response) as response",
            ],
            Self::Postgres | Self::PgCron => &[
                "cross join unnest(metadata) as m",
                "cross join unnest(m.parsed) as parsed",
            ],
            Self::Functions | Self::Auth => &["cross join unnest(metadata) as metadata"],
            Self::FunctionEdge => &[
                "cross join unnest(metadata) as m",
                "cross join unnest(m.response) as response",
                "cross join unnest(m.request) as request",
            ],
            Self::Supavisor => &["cross join unnest(metadata) as m"],
            _ => &[],
        }
    }

    /// Predicate matching error events, used by the event chart.
    pub fn error_condition(&self) -> &'static str {
        match self {
            Self::Edge | Self::FunctionEdge => "response.status_code >= 500",
            Self::Postgres | Self::PgCron => "parsed.error_severity in ('ERROR', 'FATAL', 'PANIC')",
            Self::Auth | Self::Functions => "metadata.level in ('error', 'fatal')",
            Self::Supavisor => "m.level = 'error'",
            _ => "false",
        }
    }

    /// Predicate matching warning events, used by the event chart.
    pub fn warning_condition(&self) -> &'static str {
        match self {
            Self::Edge | Self::FunctionEdge => {
                "response.status_code >= 400 and response.status_code < 500"
            }
            Self::Postgres | Self::PgCron => "parsed.error_severity = 'WARNING'",
            Self::Auth => "metadata.level = 'warning'",
            Self::Functions => "metadata.level = 'warn'",
            Self::Supavisor => "m.level = 'warning'",
            _ => "false",
        }
    }
}

impl FromStr for LogSource {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = match s {
            "edge_logs" | "api" => Self::Edge,
            "postgres_logs" | "database" => Self::Postgres,
            "function_logs" | "functions" => Self::Functions,
            "function_edge_logs" | "fn_edge" => Self::FunctionEdge,
            "auth_logs" | "auth" => Self::Auth,
            "realtime_logs" | "realtime" => Self::Realtime,
            "storage_logs" | "storage" => Self::Storage,
            "postgrest_logs" | "postgrest" => Self::Postgrest,
            "supavisor_logs" | "supavisor" => Self::Supavisor,
            "warehouse_logs" | "warehouse" => Self::Warehouse,
            "pg_cron_logs" | "pg_cron" => Self::PgCron,
            other => Self::Other(other.to_string()),
        };
        Ok(source)
    }
}

impl From<&str> for LogSource {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(source) => source,
            Err(e) => match e {},
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl Serialize for LogSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.table_name())
    }
}

impl<'de> Deserialize<'de> for LogSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(LogSource::from(name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_table_names() {
        for source in LogSource::ALL {
            assert_eq!(LogSource::from(source.table_name()), source);
        }
        assert_eq!(LogSource::from("api"), LogSource::Edge);
        assert_eq!(LogSource::from("pg_cron"), LogSource::PgCron);
        assert_eq!(
            LogSource::from("my_collection"),
            LogSource::Other("my_collection".to_string())
        );
    }

    #[test]
    fn test_pg_cron_is_view_over_postgres() {
        assert_eq!(LogSource::PgCron.table_name(), "pg_cron_logs");
        assert_eq!(LogSource::PgCron.physical_table(), "postgres_logs");
        assert!(LogSource::PgCron.base_predicate().is_some());
        assert_eq!(LogSource::PgCron.joins(), LogSource::Postgres.joins());
        assert!(LogSource::Postgres.base_predicate().is_none());
    }

    #[test]
    fn test_sources_without_metadata_have_no_joins() {
        assert!(LogSource::Realtime.joins().is_empty());
        assert!(LogSource::Other("x".to_string()).joins().is_empty());
        assert_eq!(LogSource::Edge.joins().len(), 3);
    }
}
