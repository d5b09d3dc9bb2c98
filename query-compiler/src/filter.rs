use crate::Error;
use crate::source::LogSource;
use crate::sql::{Param, SqlFragment};
use log::warn;
use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;

static COLUMN_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.]+$").unwrap());

macro_rules! filter_keys {
    ($($variant:ident => $path:literal,)+) => {
        /// Every filter dot-path that some source has a template for.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum FilterKey {
            $($variant,)+
        }

        impl FilterKey {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $path,)+
                }
            }

            pub fn from_path(path: &str) -> Option<Self> {
                match path {
                    $($path => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

filter_keys! {
    SearchQuery => "search_query",
    Database => "database",
    StatusCodeError => "status_code.error",
    StatusCodeSuccess => "status_code.success",
    StatusCodeWarning => "status_code.warning",
    StatusCodeServerError => "status_code.server_error",
    StatusCodeClientError => "status_code.client_error",
    StatusCodeRedirection => "status_code.redirection",
    ProductDatabase => "product.database",
    ProductStorage => "product.storage",
    ProductAuth => "product.auth",
    ProductRealtime => "product.realtime",
    MethodGet => "method.get",
    MethodPost => "method.post",
    MethodPut => "method.put",
    MethodPatch => "method.patch",
    MethodDelete => "method.delete",
    MethodOptions => "method.options",
    SeverityError => "severity.error",
    SeverityNoError => "severity.noError",
    SeverityNotError => "severity.notError",
    SeverityLog => "severity.log",
    SeverityInfo => "severity.info",
    SeverityDebug => "severity.debug",
    SeverityWarn => "severity.warn",
    SeverityWarning => "severity.warning",
    EndpointsAdmin => "endpoints.admin",
    EndpointsSignup => "endpoints.signup",
    EndpointsAuthentication => "endpoints.authentication",
    EndpointsRecover => "endpoints.recover",
    EndpointsUser => "endpoints.user",
    EndpointsLogout => "endpoints.logout",
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a filter key turns into a condition.
#[derive(Debug, Clone, Copy)]
pub enum FilterTemplate {
    /// A fixed condition, applied when the key's value is truthy.
    Literal(&'static str),
    /// A condition built from the key's value.
    Rule(fn(&FilterValue) -> SqlFragment),
}

fn search_query(value: &FilterValue) -> SqlFragment {
    SqlFragment::sql("regexp_contains(event_message, ")
        .param(value.to_param())
        .text(")")
}

fn identifier(value: &FilterValue) -> SqlFragment {
    SqlFragment::sql("identifier = ").param(value.to_param())
}

fn pooler_project(value: &FilterValue) -> SqlFragment {
    SqlFragment::sql("m.project like ").param(format!("{}%", value.to_text()))
}

use FilterKey::*;
use FilterTemplate::{Literal, Rule};

const POSTGRES_TEMPLATES: &[(FilterKey, FilterTemplate)] = &[
    (SearchQuery, Rule(search_query)),
    (Database, Rule(identifier)),
    (SeverityError, Literal("parsed.error_severity in ('ERROR', 'FATAL', 'PANIC')")),
    (SeverityNoError, Literal("parsed.error_severity not in ('ERROR', 'FATAL', 'PANIC')")),
    (SeverityLog, Literal("parsed.error_severity = 'LOG'")),
];

const EDGE_TEMPLATES: &[(FilterKey, FilterTemplate)] = &[
    (SearchQuery, Rule(search_query)),
    (Database, Rule(identifier)),
    (StatusCodeError, Literal("response.status_code between 500 and 599")),
    (StatusCodeSuccess, Literal("response.status_code between 200 and 299")),
    (StatusCodeWarning, Literal("response.status_code between 400 and 499")),
    (
        ProductDatabase,
        Literal("request.path like '/rest/%' or request.path like '/graphql/%'"),
    ),
    (ProductStorage, Literal("request.path like '/storage/%'")),
    (ProductAuth, Literal("request.path like '/auth/%'")),
    (ProductRealtime, Literal("request.path like '/realtime/%'")),
    (MethodGet, Literal("request.method = 'GET'")),
    (MethodPost, Literal("request.method = 'POST'")),
    (MethodPut, Literal("request.method = 'PUT'")),
    (MethodPatch, Literal("request.method = 'PATCH'")),
    (MethodDelete, Literal("request.method = 'DELETE'")),
    (MethodOptions, Literal("request.method = 'OPTIONS'")),
];

const FUNCTION_EDGE_TEMPLATES: &[(FilterKey, FilterTemplate)] = &[
    (SearchQuery, Rule(search_query)),
    (StatusCodeError, Literal("response.status_code between 500 and 599")),
    (StatusCodeSuccess, Literal("response.status_code between 200 and 299")),
    (StatusCodeWarning, Literal("response.status_code between 400 and 499")),
];

const FUNCTION_TEMPLATES: &[(FilterKey, FilterTemplate)] = &[
    (SearchQuery, Rule(search_query)),
    (SeverityError, Literal("metadata.level = 'error'")),
    (SeverityNotError, Literal("metadata.level != 'error'")),
    (SeverityLog, Literal("metadata.level = 'log'")),
    (SeverityInfo, Literal("metadata.level = 'info'")),
    (SeverityDebug, Literal("metadata.level = 'debug'")),
    (SeverityWarn, Literal("metadata.level = 'warn'")),
];

const AUTH_TEMPLATES: &[(FilterKey, FilterTemplate)] = &[
    (SearchQuery, Rule(search_query)),
    (SeverityError, Literal("metadata.level = 'error' or metadata.level = 'fatal'")),
    (SeverityWarning, Literal("metadata.level = 'warning'")),
    (SeverityInfo, Literal("metadata.level = 'info'")),
    (StatusCodeServerError, Literal("cast(metadata.status as int64) between 500 and 599")),
    (StatusCodeClientError, Literal("cast(metadata.status as int64) between 400 and 499")),
    (StatusCodeRedirection, Literal("cast(metadata.status as int64) between 300 and 399")),
    (StatusCodeSuccess, Literal("cast(metadata.status as int64) between 200 and 299")),
    (EndpointsAdmin, Literal(r#"REGEXP_CONTAINS(metadata.path, "/admin")"#)),
    (EndpointsSignup, Literal(r#"REGEXP_CONTAINS(metadata.path, "/signup|/invite|/verify")"#)),
    (
        EndpointsAuthentication,
        Literal(r#"REGEXP_CONTAINS(metadata.path, "/token|/authorize|/callback|/otp|/magiclink")"#),
    ),
    (EndpointsRecover, Literal(r#"REGEXP_CONTAINS(metadata.path, "/recover")"#)),
    (EndpointsUser, Literal(r#"REGEXP_CONTAINS(metadata.path, "/user")"#)),
    (EndpointsLogout, Literal(r#"REGEXP_CONTAINS(metadata.path, "/logout")"#)),
];

const POSTGREST_TEMPLATES: &[(FilterKey, FilterTemplate)] = &[
    (SearchQuery, Rule(search_query)),
    (Database, Rule(identifier)),
];

const SUPAVISOR_TEMPLATES: &[(FilterKey, FilterTemplate)] = &[
    (SearchQuery, Rule(search_query)),
    (Database, Rule(pooler_project)),
];

const COMMON_TEMPLATES: &[(FilterKey, FilterTemplate)] = &[(SearchQuery, Rule(search_query))];

impl LogSource {
    pub fn filter_templates(&self) -> &'static [(FilterKey, FilterTemplate)] {
        match self {
            Self::Postgres | Self::PgCron => POSTGRES_TEMPLATES,
            Self::Edge => EDGE_TEMPLATES,
            Self::FunctionEdge => FUNCTION_EDGE_TEMPLATES,
            Self::Functions => FUNCTION_TEMPLATES,
            Self::Auth => AUTH_TEMPLATES,
            Self::Postgrest => POSTGREST_TEMPLATES,
            Self::Supavisor => SUPAVISOR_TEMPLATES,
            Self::Realtime | Self::Storage | Self::Warehouse => COMMON_TEMPLATES,
            Self::Other(_) => &[],
        }
    }

    pub fn filter_template(&self, key: FilterKey) -> Option<FilterTemplate> {
        self.filter_templates()
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, template)| *template)
    }
}

/// A value in a filter selection, shaped like JSON. `Null` plays the part of
/// an unset value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    Group(FilterSelection),
}

impl FilterValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => n.as_f64().is_some_and(|v| v != 0.0 && !v.is_nan()),
            Self::Text(s) => !s.is_empty(),
            Self::Group(_) => true,
        }
    }

    pub fn to_param(&self) -> Param {
        match self {
            Self::Null => Param::Null,
            Self::Bool(b) => Param::Bool(*b),
            Self::Number(n) => Param::Number(n.clone()),
            Self::Text(s) => Param::Text(s.clone()),
            Self::Group(_) => Param::Text(self.to_text()),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<FilterSelection> for FilterValue {
    fn from(value: FilterSelection) -> Self {
        Self::Group(value)
    }
}

/// An ordered mapping of filter keys to values. Root keys are ANDed together;
/// the keys of a nested group are ORed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSelection {
    entries: Vec<(String, FilterValue)>,
}

impl FilterSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(Error::ParseFilters)
    }

    /// Replaces the value of an existing key in place, or appends the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FilterValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    #[inline]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.insert(key, value);

        self
    }

    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dot paths of every truthy leaf, depth first in key order.
    fn truthy_leaves<'a>(&'a self, parent: &str, leaves: &mut Vec<(String, &'a FilterValue)>) {
        for (key, value) in self.iter().filter(|(_, v)| v.is_truthy()) {
            let path = format!("{}.{}", parent, key);
            match value {
                FilterValue::Group(group) => group.truthy_leaves(&path, leaves),
                _ => leaves.push((path, value)),
            }
        }
    }
}

impl Serialize for FilterSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FilterSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SelectionVisitor;

        impl<'de> Visitor<'de> for SelectionVisitor {
            type Value = FilterSelection;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of filter keys to values")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut selection = FilterSelection::new();
                while let Some((key, value)) = access.next_entry::<String, FilterValue>()? {
                    selection.insert(key, value);
                }
                Ok(selection)
            }
        }

        deserializer.deserialize_map(SelectionVisitor)
    }
}

/// Resolves the condition for a single dot path.
fn resolve(source: &LogSource, path: &str, value: &FilterValue) -> Option<SqlFragment> {
    let template = FilterKey::from_path(path).and_then(|key| source.filter_template(key));
    match template {
        Some(Rule(rule)) if *value != FilterValue::Null => Some(rule(value)),
        Some(Rule(_)) => None,
        Some(Literal(_)) if *value == FilterValue::Bool(false) => None,
        Some(Literal(condition)) => Some(SqlFragment::sql(condition)),
        // No template: compare for equality. Only text is quoted.
        None if COLUMN_PATH.is_match(path) => {
            Some(SqlFragment::sql(format!("{} = ", path)).param(value.to_param()))
        }
        None => {
            warn!("Dropping filter on invalid column path {:?}", path);
            None
        }
    }
}

/// Compiles each root key of the selection into a parenthesized condition,
/// dropping keys that contribute nothing.
pub fn compile_conditions(source: &LogSource, filters: &FilterSelection) -> Vec<SqlFragment> {
    filters
        .iter()
        .filter_map(|(root, value)| match value {
            FilterValue::Null => None,
            FilterValue::Text(s) if s.is_empty() => None,
            FilterValue::Group(group) => {
                let mut leaves = Vec::new();
                group.truthy_leaves(root, &mut leaves);
                let nested = SqlFragment::join(
                    leaves
                        .iter()
                        .filter_map(|(path, leaf)| resolve(source, path, leaf)),
                    " or ",
                );
                (!nested.is_empty()).then(|| nested.parenthesized())
            }
            scalar => resolve(source, root, scalar).map(SqlFragment::parenthesized),
        })
        .collect()
}

/// Compiles a filter selection into a `where ...` clause, or an empty
/// fragment when no condition applies.
pub fn compile_where(source: &LogSource, filters: &FilterSelection) -> SqlFragment {
    where_clause(compile_conditions(source, filters))
}

pub(crate) fn where_clause(conditions: Vec<SqlFragment>) -> SqlFragment {
    let conditions = SqlFragment::join(conditions, " and ");
    if conditions.is_empty() {
        return conditions;
    }
    SqlFragment::sql("where ").append(conditions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(entries: &[(&str, FilterValue)]) -> FilterSelection {
        entries
            .iter()
            .fold(FilterSelection::new(), |s, (k, v)| s.with(*k, v.clone()))
    }

    #[test]
    fn test_empty_selection_compiles_to_nothing() {
        let source = LogSource::Edge;
        assert!(compile_where(&source, &FilterSelection::new()).is_empty());

        let blank = FilterSelection::new()
            .with("search_query", "")
            .with("database", FilterValue::Null);
        assert!(compile_where(&source, &blank).is_empty());
    }

    #[test]
    fn test_default_equality_quoting() {
        let source = LogSource::Edge;
        let filters = FilterSelection::new().with("my.nested.value", "abc");
        assert_eq!(
            compile_where(&source, &filters).to_inline(),
            "where (my.nested.value = 'abc')"
        );

        let filters = FilterSelection::new().with("my.nested.value", 123);
        assert_eq!(
            compile_where(&source, &filters).to_inline(),
            "where (my.nested.value = 123)"
        );
    }

    #[test]
    fn test_nested_literal_templates_or() {
        let source = LogSource::Edge;
        let filters = FilterSelection::new().with(
            "status_code",
            group(&[("error", true.into()), ("warning", true.into()), ("success", false.into())]),
        );
        assert_eq!(
            compile_where(&source, &filters).to_inline(),
            "where (response.status_code between 500 and 599 or response.status_code between 400 and 499)"
        );
    }

    #[test]
    fn test_false_leaf_excluded() {
        let source = LogSource::Postgres;
        let filters = FilterSelection::new().with(
            "severity",
            group(&[("error", true.into()), ("log", false.into())]),
        );
        assert_eq!(
            compile_where(&source, &filters).to_inline(),
            "where (parsed.error_severity in ('ERROR', 'FATAL', 'PANIC'))"
        );
    }

    #[test]
    fn test_group_without_truthy_leaves_contributes_nothing() {
        let source = LogSource::Edge;
        let filters = FilterSelection::new()
            .with("status_code", group(&[("error", false.into())]))
            .with("method", FilterSelection::new());
        assert!(compile_where(&source, &filters).is_empty());
    }

    #[test]
    fn test_roots_are_anded_in_order() {
        let source = LogSource::Edge;
        let filters = FilterSelection::new()
            .with("search_query", "timeout")
            .with("method", group(&[("get", true.into())]));
        let statement = compile_where(&source, &filters).build();

        assert_eq!(
            statement.sql,
            "where (regexp_contains(event_message, @p0)) and (request.method = 'GET')"
        );
        assert_eq!(statement.params, vec![Param::from("timeout")]);
        assert_eq!(
            statement.inline(),
            "where (regexp_contains(event_message, 'timeout')) and (request.method = 'GET')"
        );
    }

    #[test]
    fn test_templated_root_false_contributes_nothing() {
        let source = LogSource::Edge;
        let filters = FilterSelection::new().with("status_code.error", false);
        assert!(compile_where(&source, &filters).is_empty());

        let filters = FilterSelection::new().with("status_code.error", true);
        assert_eq!(
            compile_where(&source, &filters).to_inline(),
            "where (response.status_code between 500 and 599)"
        );
    }

    #[test]
    fn test_unknown_nested_key_falls_back_to_equality() {
        let source = LogSource::Edge;
        let filters = FilterSelection::new().with(
            "request",
            group(&[("host", "example.com".into()), ("port", 443.into())]),
        );
        assert_eq!(
            compile_where(&source, &filters).to_inline(),
            "where (request.host = 'example.com' or request.port = 443)"
        );
    }

    #[test]
    fn test_unsupported_key_for_source_uses_equality() {
        // auth has no `database` template
        let filters = FilterSelection::new().with("database", "abc");
        assert_eq!(
            compile_where(&LogSource::Auth, &filters).to_inline(),
            "where (database = 'abc')"
        );
        assert_eq!(
            compile_where(&LogSource::Edge, &filters).to_inline(),
            "where (identifier = 'abc')"
        );
        assert_eq!(
            compile_where(&LogSource::Supavisor, &filters).to_inline(),
            "where (m.project like 'abc%')"
        );
    }

    #[test]
    fn test_values_are_escaped_inline() {
        let filters = FilterSelection::new().with("search_query", "it's");
        let statement = compile_where(&LogSource::Edge, &filters).build();
        assert_eq!(statement.sql, "where (regexp_contains(event_message, @p0))");
        assert_eq!(
            statement.inline(),
            r"where (regexp_contains(event_message, 'it\'s'))"
        );
    }

    #[test]
    fn test_from_json_preserves_order() {
        let filters = FilterSelection::from_json(
            r#"{"status_code": {"error": true}, "search_query": "boom", "ignored": null}"#,
        )
        .unwrap();
        let keys: Vec<&str> = filters.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["status_code", "search_query", "ignored"]);
        assert_eq!(
            compile_where(&LogSource::Edge, &filters).to_inline(),
            "where (response.status_code between 500 and 599) and (regexp_contains(event_message, 'boom'))"
        );

        assert!(FilterSelection::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_invalid_column_path_is_dropped() {
        let filters = FilterSelection::new()
            .with("x) or (1=1", "a")
            .with("metadata.request_id", "b")
            .with("bad", FilterSelection::new().with("key; drop", true));
        let statement = compile_where(&LogSource::Storage, &filters).build();
        assert_eq!(statement.sql, "where (metadata.request_id = @p0)");
        assert_eq!(statement.params, vec![Param::from("b")]);
    }

    #[test]
    fn test_filter_key_paths() {
        assert_eq!(FilterKey::from_path("severity.noError"), Some(FilterKey::SeverityNoError));
        assert_eq!(FilterKey::StatusCodeError.as_str(), "status_code.error");
        assert_eq!(FilterKey::from_path("status_code"), None);
    }
}
