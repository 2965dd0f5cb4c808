//! A parametric SQL accumulator: raw text is always literal, values are
//! always placeholders. No caller ever string-interpolates a parameter
//! into the SQL text directly.

use sqlx::query::QueryAs;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}
impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}
impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}
impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}
impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    sql: String,
    params: Vec<SqlValue>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw, parameter-free SQL text.
    pub fn query(mut self, literal: &str) -> Self {
        self.sql.push_str(literal);
        self
    }

    /// Append `(?,?,...)` for `values.len()` placeholders and record the
    /// values in emission order.
    pub fn param<V: Into<SqlValue>>(mut self, values: Vec<V>) -> Self {
        let placeholders = std::iter::repeat("?")
            .take(values.len())
            .collect::<Vec<_>>()
            .join(",");
        self.sql.push('(');
        self.sql.push_str(&placeholders);
        self.sql.push(')');
        self.params.extend(values.into_iter().map(Into::into));
        self
    }

    /// Append a single placeholder for one scalar value.
    pub fn param_one<V: Into<SqlValue>>(mut self, value: V) -> Self {
        self.sql.push('?');
        self.params.push(value.into());
        self
    }

    /// Inline another builder's SQL wrapped in parentheses and extend the
    /// parameter list with its params, in order.
    pub fn sub_query(mut self, other: QueryBuilder) -> Self {
        let (sql, params) = other.build();
        self.sql.push('(');
        self.sql.push_str(&sql);
        self.sql.push(')');
        self.params.extend(params);
        self
    }

    pub fn build(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }
}

/// Bind a builder's `(sql, params)` output onto a `sqlx::query_as` call, in
/// emission order. Generic over the row type so both `Unit` and `Usage`
/// queries share this one binder.
pub fn bind_query_as<'q, O>(
    sql: &'q str,
    params: &[SqlValue],
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>>
where
    O: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let mut query = sqlx::query_as::<_, O>(sql);
    for p in params {
        query = match p {
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Bool(b) => query.bind(*b),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_count_matches_param_count() {
        let (sql, params) = QueryBuilder::new()
            .query("SELECT * FROM units WHERE usr IN ")
            .param(vec!["alice".to_string(), "bob".to_string()])
            .query(" AND project = ")
            .param_one("proj".to_string())
            .build();

        assert_eq!(sql.matches('?').count(), params.len());
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn sub_query_merges_params_in_order() {
        let inner = QueryBuilder::new()
            .query("SELECT project FROM units WHERE usr = ")
            .param_one("alice".to_string());

        let (sql, params) = QueryBuilder::new()
            .query("SELECT * FROM usage WHERE project IN ")
            .sub_query(inner)
            .build();

        assert_eq!(sql.matches('?').count(), params.len());
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn empty_builder_has_no_placeholders() {
        let (sql, params) = QueryBuilder::new().query("SELECT 1").build();
        assert_eq!(sql.matches('?').count(), 0);
        assert!(params.is_empty());
    }
}
