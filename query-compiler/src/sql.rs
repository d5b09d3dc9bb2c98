use serde::Serialize;
use std::fmt;

/// A value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Param {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl Param {
    /// Renders the value as a SQL literal. Strings are single-quoted with
    /// backslashes and quotes escaped; everything else is written bare.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        }
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Sql(String),
    Param(Param),
}

/// A piece of SQL text interleaved with bound values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    parts: Vec<Part>,
}

impl SqlFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sql(text: impl Into<String>) -> Self {
        Self::new().text(text)
    }

    #[inline]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.parts.push(Part::Sql(text));
        }

        self
    }

    #[inline]
    pub fn param(mut self, param: impl Into<Param>) -> Self {
        self.parts.push(Part::Param(param.into()));

        self
    }

    #[inline]
    pub fn append(mut self, other: SqlFragment) -> Self {
        self.parts.extend(other.parts);

        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Joins fragments with a separator, skipping empty ones.
    pub fn join(fragments: impl IntoIterator<Item = SqlFragment>, separator: &str) -> Self {
        let mut joined = Self::new();
        for fragment in fragments.into_iter().filter(|f| !f.is_empty()) {
            if !joined.is_empty() {
                joined = joined.text(separator);
            }
            joined = joined.append(fragment);
        }

        joined
    }

    #[inline]
    pub fn parenthesized(self) -> Self {
        Self::sql("(").append(self).text(")")
    }

    pub fn to_inline(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                Part::Sql(s) => s.clone(),
                Part::Param(p) => p.to_literal(),
            })
            .collect()
    }

    /// Numbers the placeholders `@p0`, `@p1`, ... in order of appearance.
    pub fn build(self) -> Statement {
        let mut sql = String::new();
        let mut params = Vec::new();
        let inline = self.to_inline();
        for part in self.parts {
            match part {
                Part::Sql(s) => sql.push_str(&s),
                Part::Param(p) => {
                    sql.push_str(&format!("@p{}", params.len()));
                    params.push(p);
                }
            }
        }

        Statement {
            sql,
            params,
            inline,
        }
    }
}

impl fmt::Display for SqlFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_inline())
    }
}

/// A compiled statement, ready to hand to the query executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
    #[serde(skip)]
    inline: String,
}

impl Statement {
    /// The statement with every parameter substituted as a literal.
    pub fn inline(&self) -> &str {
        &self.inline
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inline)
    }
}
