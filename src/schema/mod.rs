//! Entity schemas: record shapes, declarative constraints and pre-save hooks.
//!
//! - `slug`: the URL slug transform shared by catalog entities.
//! - `catalog`: per-supermarket raw catalogs and the processed catalog.
//! - `user`: accounts, addresses, sessions and carts.
//! - `commerce`: orders.
//! - `system`: notifications, API logs and settings.

pub mod catalog;
pub mod commerce;
pub mod slug;
pub mod system;
pub mod user;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use slug::slugify;

/// Storage-facing description of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub model: &'static str,
    /// Physical collection, when pluralizing the model name would get it wrong.
    pub collection: Option<&'static str>,
    /// Document paths backed by a unique index. Missing values never collide.
    pub unique: &'static [&'static str],
    pub slug_field: Option<&'static str>,
    pub active_field: Option<&'static str>,
    pub search_fields: &'static [&'static str],
}

impl Schema {
    pub const BASE: Schema = Schema {
        model: "",
        collection: None,
        unique: &[],
        slug_field: None,
        active_field: None,
        search_fields: &[],
    };

    pub fn collection_name(&self) -> String {
        match self.collection {
            Some(name) => name.to_string(),
            None => pluralize(self.model),
        }
    }
}

/// A record type persisted in one collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn schema() -> &'static Schema;

    /// Derived fields, run before every write.
    fn before_save(&mut self, _now: DateTime<Utc>) {}

    fn validate(&self, _check: &mut Violations) {}
}

/// Lowercased model name with an English plural suffix.
pub fn pluralize(model: &str) -> String {
    let lower = model.to_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{lower}es");
    }
    format!("{lower}s")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Collects constraint failures for one record.
#[derive(Debug, Default)]
pub struct Violations(Vec<Violation>);

impl Violations {
    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(Violation::new(field, message));
    }

    pub fn required(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(field, "is required");
        }
    }

    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize) {
        let n = value.chars().count();
        if n < min {
            self.push(field, format!("must be at least {min} characters"));
        } else if n > max {
            self.push(field, format!("must be at most {max} characters"));
        }
    }

    pub fn max_len(&mut self, field: &str, value: Option<&str>, max: usize) {
        if let Some(v) = value {
            self.length(field, v, 0, max);
        }
    }

    pub fn range(&mut self, field: &str, value: f64, min: Option<f64>, max: Option<f64>) {
        if min.is_some_and(|m| value < m) || max.is_some_and(|m| value > m) {
            let msg = match (min, max) {
                (Some(lo), Some(hi)) => format!("must be between {lo} and {hi}"),
                (Some(lo), None) => format!("must be at least {lo}"),
                (None, Some(hi)) => format!("must be at most {hi}"),
                (None, None) => unreachable!(),
            };
            self.push(field, msg);
        }
    }

    pub fn non_negative(&mut self, field: &str, value: Option<f64>) {
        if let Some(v) = value {
            self.range(field, v, Some(0.0), None);
        }
    }

    pub fn pattern(&mut self, field: &str, value: Option<&str>, re: &Regex, message: &str) {
        if let Some(v) = value {
            if !re.is_match(v) {
                self.push(field, message);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<Violation> {
        self.0
    }
}

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}

/// Runs hooks then validation, the order every write goes through.
pub fn prepare<E: Entity>(entity: &mut E, now: DateTime<Utc>) -> crate::Result<()> {
    entity.before_save(now);
    let mut check = Violations::default();
    entity.validate(&mut check);
    if check.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation {
            model: E::schema().model,
            violations: check.into_inner(),
        })
    }
}
