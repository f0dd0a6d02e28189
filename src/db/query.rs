//! Filters, sorting and pagination compiled to SQL over JSON documents.
use crate::error::{Error, Result};
use crate::schema::Schema;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;
use std::collections::BTreeMap;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

static PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid path regex")
});

/// Value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Text(String),
    Int(i64),
    Real(f64),
    Bool(bool),
}

impl Bind {
    fn from_json(value: &Value) -> Result<Option<Self>> {
        Ok(match value {
            Value::Null => None,
            Value::Bool(b) => Some(Bind::Bool(*b)),
            Value::String(s) => Some(Bind::Text(s.clone())),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Bind::Int(i),
                None => Bind::Real(n.as_f64().unwrap_or_default()),
            }),
            Value::Array(_) | Value::Object(_) => {
                return Err(Error::InvalidQuery(format!(
                    "cannot compare against composite value {value}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    Gte(String, Value),
    Lte(String, Value),
    After(String, DateTime<Utc>),
    Before(String, DateTime<Utc>),
    /// Case-insensitive substring match on any of the fields.
    Contains(Vec<String>, String),
    Exists(String),
    /// Array at the path holds the value.
    HasElement(String, Value),
    /// Some object in the array at the first path has `field == value`.
    ElementField(String, String, Value),
    IdIn(Vec<String>),
    Any(Vec<Condition>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// `field` ascending, `-field` descending.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let sort = match spec.strip_prefix('-') {
            Some(field) => Sort::desc(field),
            None => Sort::asc(spec.strip_prefix('+').unwrap_or(spec)),
        };
        column(&sort.field)?;
        Ok(sort)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub conditions: Vec<Condition>,
    pub sort: Vec<Sort>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, path: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::Eq(path.to_string(), value.into()))
    }

    pub fn ne(self, path: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::Ne(path.to_string(), value.into()))
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// `WHERE ...` (or empty) plus its binds.
    pub(crate) fn where_clause(&self) -> Result<(String, Vec<Bind>)> {
        let mut binds = Vec::new();
        let mut parts = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            parts.push(compile(condition, &mut binds)?);
        }
        if parts.is_empty() {
            return Ok((String::new(), binds));
        }
        Ok((format!(" WHERE {}", parts.join(" AND ")), binds))
    }

    pub(crate) fn tail(&self) -> Result<String> {
        let mut sql = String::new();
        if !self.sort.is_empty() {
            let keys = self
                .sort
                .iter()
                .map(|s| Ok(format!("{} {}", sort_key(&s.field)?, if s.descending { "DESC" } else { "ASC" })))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
            sql.push_str(", id ASC");
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        Ok(sql)
    }
}

/// SQL expression reading `path` out of the stored document.
pub(crate) fn column(path: &str) -> Result<String> {
    if path == "_id" || path == "id" {
        return Ok("id".to_string());
    }
    if !PATH_RE.is_match(path) {
        return Err(Error::InvalidQuery(format!("invalid field path `{path}`")));
    }
    Ok(format!("json_extract(doc, '$.{path}')"))
}

const RFC3339_GLOB: &str = "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T*";

/// Ordering expression for `path`. Timestamps are written with a varying number
/// of fractional digits, so RFC 3339 strings order by `julianday` rather than text.
fn sort_key(path: &str) -> Result<String> {
    let col = column(path)?;
    if col == "id" {
        return Ok(col);
    }
    Ok(format!(
        "CASE WHEN {col} GLOB '{RFC3339_GLOB}' THEN julianday({col}) ELSE {col} END"
    ))
}

fn compile(condition: &Condition, binds: &mut Vec<Bind>) -> Result<String> {
    Ok(match condition {
        Condition::Eq(path, value) => match Bind::from_json(value)? {
            Some(bind) => {
                binds.push(bind);
                format!("{} = ?", column(path)?)
            }
            None => format!("{} IS NULL", column(path)?),
        },
        Condition::Ne(path, value) => match Bind::from_json(value)? {
            Some(bind) => {
                binds.push(bind);
                let col = column(path)?;
                format!("({col} IS NULL OR {col} <> ?)")
            }
            None => format!("{} IS NOT NULL", column(path)?),
        },
        Condition::In(path, values) => {
            if values.is_empty() {
                return Ok("0".to_string());
            }
            for value in values {
                let bind = Bind::from_json(value)?
                    .ok_or_else(|| Error::InvalidQuery("null inside IN list".into()))?;
                binds.push(bind);
            }
            format!("{} IN ({})", column(path)?, placeholders(values.len()))
        }
        Condition::Gte(path, value) | Condition::Lte(path, value) => {
            let bind = Bind::from_json(value)?
                .ok_or_else(|| Error::InvalidQuery(format!("cannot range-compare {path} to null")))?;
            binds.push(bind);
            let op = if matches!(condition, Condition::Gte(..)) { ">=" } else { "<=" };
            format!("{} {op} ?", column(path)?)
        }
        Condition::After(path, at) | Condition::Before(path, at) => {
            binds.push(Bind::Text(at.to_rfc3339()));
            let op = if matches!(condition, Condition::After(..)) { ">=" } else { "<=" };
            format!("julianday({}) {op} julianday(?)", column(path)?)
        }
        Condition::Contains(paths, needle) => {
            if paths.is_empty() {
                return Err(Error::InvalidQuery("search needs at least one field".into()));
            }
            let mut ors = Vec::with_capacity(paths.len());
            for path in paths {
                binds.push(Bind::Text(needle.to_lowercase()));
                ors.push(format!(
                    "instr(lower(coalesce({}, '')), ?) > 0",
                    column(path)?
                ));
            }
            format!("({})", ors.join(" OR "))
        }
        Condition::Exists(path) => format!("{} IS NOT NULL", column(path)?),
        Condition::HasElement(path, value) => {
            let bind = Bind::from_json(value)?
                .ok_or_else(|| Error::InvalidQuery("cannot search arrays for null".into()))?;
            binds.push(bind);
            format!(
                "EXISTS (SELECT 1 FROM json_each(doc, '$.{}') WHERE value = ?)",
                checked(path)?
            )
        }
        Condition::ElementField(path, field, value) => {
            let bind = Bind::from_json(value)?
                .ok_or_else(|| Error::InvalidQuery("cannot search arrays for null".into()))?;
            binds.push(bind);
            format!(
                "EXISTS (SELECT 1 FROM json_each(doc, '$.{}') WHERE json_extract(value, '$.{}') = ?)",
                checked(path)?,
                checked(field)?
            )
        }
        Condition::IdIn(ids) => {
            if ids.is_empty() {
                return Ok("0".to_string());
            }
            binds.extend(ids.iter().cloned().map(Bind::Text));
            format!("id IN ({})", placeholders(ids.len()))
        }
        Condition::Any(conditions) => {
            if conditions.is_empty() {
                return Ok("0".to_string());
            }
            let parts = conditions
                .iter()
                .map(|c| compile(c, binds))
                .collect::<Result<Vec<_>>>()?;
            format!("({})", parts.join(" OR "))
        }
    })
}

fn checked(path: &str) -> Result<&str> {
    if PATH_RE.is_match(path) {
        Ok(path)
    } else {
        Err(Error::InvalidQuery(format!("invalid field path `{path}`")))
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub(crate) fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    binds: &'q [Bind],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            Bind::Text(s) => query.bind(s.as_str()),
            Bind::Int(i) => query.bind(*i),
            Bind::Real(f) => query.bind(*f),
            Bind::Bool(b) => query.bind(*b),
        };
    }
    query
}

/// Query-string style listing parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort: Option<String>,
    pub search: Option<String>,
    pub active: Option<bool>,
    pub featured: Option<bool>,
    /// Equality filters keyed by document path (`category`, `metadata.source`).
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    pub date_field: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ListParams {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn with_filter(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.filters.insert(path.to_string(), value.into());
        self
    }

    /// Filters only; paging and sorting are applied by the caller.
    pub fn to_query(&self, schema: &Schema) -> Result<Query> {
        let mut query = Query::new();
        if let Some(active) = self.active {
            query = query.eq(schema.active_field.unwrap_or("active"), active);
        }
        if let Some(featured) = self.featured {
            query = query.eq("featured", featured);
        }
        for (path, value) in &self.filters {
            query = query.eq(path, value.clone());
        }
        if let Some(needle) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let fields = schema.search_fields.iter().map(|f| f.to_string()).collect();
            query = query.filter(Condition::Contains(fields, needle.to_string()));
        }
        if self.from.is_some() || self.to.is_some() {
            let field = self.date_field.clone().unwrap_or_else(|| "createdAt".to_string());
            if let Some(from) = self.from {
                query = query.filter(Condition::After(field.clone(), from));
            }
            if let Some(to) = self.to {
                query = query.filter(Condition::Before(field, to));
            }
        }
        Ok(query)
    }

    pub fn sort_order(&self) -> Result<Sort> {
        match self.sort.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(spec) => Sort::parse(spec),
            None => Ok(Sort::desc("createdAt")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        Self {
            page,
            limit,
            total,
            pages: total.div_ceil(u64::from(limit.max(1))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sort_direction_parsed() {
        assert_eq!(Sort::parse("-priority").unwrap(), Sort::desc("priority"));
        assert_eq!(Sort::parse("name").unwrap(), Sort::asc("name"));
        assert!(Sort::parse("name; DROP TABLE x").is_err());
    }

    #[test]
    fn where_clause_collects_binds_in_order() {
        let q = Query::new()
            .eq("category", "lacteos")
            .eq("active", true)
            .filter(Condition::Contains(vec!["name".into(), "slug".into()], "Leche".into()));
        let (sql, binds) = q.where_clause().unwrap();
        assert_eq!(
            sql,
            " WHERE json_extract(doc, '$.category') = ? AND json_extract(doc, '$.active') = ? AND \
             (instr(lower(coalesce(json_extract(doc, '$.name'), '')), ?) > 0 OR \
             instr(lower(coalesce(json_extract(doc, '$.slug'), '')), ?) > 0)"
        );
        assert_eq!(
            binds,
            vec![
                Bind::Text("lacteos".into()),
                Bind::Bool(true),
                Bind::Text("leche".into()),
                Bind::Text("leche".into())
            ]
        );
    }

    #[test]
    fn sorts_go_through_julianday() {
        let tail = Query::new()
            .sort(Sort::desc("createdAt"))
            .sort(Sort::asc("id"))
            .limit(5)
            .tail()
            .unwrap();
        assert_eq!(
            tail,
            " ORDER BY CASE WHEN json_extract(doc, '$.createdAt') GLOB \
             '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T*' \
             THEN julianday(json_extract(doc, '$.createdAt')) \
             ELSE json_extract(doc, '$.createdAt') END DESC, id ASC, id ASC LIMIT 5"
        );
    }

    #[test]
    fn null_equality_uses_is_null() {
        let (sql, binds) = Query::new().eq("sku", Value::Null).where_clause().unwrap();
        assert_eq!(sql, " WHERE json_extract(doc, '$.sku') IS NULL");
        assert!(binds.is_empty());
    }

    #[test]
    fn composite_values_rejected() {
        let q = Query::new().eq("tags", json!(["a"]));
        assert!(matches!(q.where_clause(), Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn empty_in_matches_nothing() {
        let (sql, _) = Query::new()
            .filter(Condition::IdIn(vec![]))
            .where_clause()
            .unwrap();
        assert_eq!(sql, " WHERE 0");
    }

    #[test]
    fn list_params_defaults_and_caps() {
        let params = ListParams::default();
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), 20);
        assert_eq!(params.sort_order().unwrap(), Sort::desc("createdAt"));

        let params: ListParams = serde_json::from_value(json!({"page": 0, "limit": 500})).unwrap();
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), 100);
    }

    #[test]
    fn pagination_rounds_pages_up() {
        assert_eq!(Pagination::new(1, 20, 41).pages, 3);
        assert_eq!(Pagination::new(1, 20, 0).pages, 0);
    }
}
