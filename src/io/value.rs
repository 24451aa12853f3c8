use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Number;

use super::error::IoError;
use super::row::IoRow;

/// Wire format for [`IoValue::Date`].
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Wire format for [`IoValue::DateTime`].
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// One value stored in a record.
///
/// Scalars cover what a form field or a database column can hold. `Rows` is
/// the list/grid section of a screen and is only allowed at the top level of
/// an [`Io`](super::Io); rows themselves are flat.
#[derive(Debug, Clone, PartialEq)]
pub enum IoValue {
    Null,
    Str(String),
    Number(Number),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Rows(Vec<IoRow>),
}

impl IoValue {
    /// Name used in type-mismatch errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            IoValue::Null => "null",
            IoValue::Str(_) => "string",
            IoValue::Number(_) => "number",
            IoValue::Bool(_) => "bool",
            IoValue::Date(_) => "date",
            IoValue::DateTime(_) => "datetime",
            IoValue::Rows(_) => "rows",
        }
    }

    /// Absent-equivalent for typed getters: null or a whitespace-only string.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            IoValue::Null => true,
            IoValue::Str(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub(crate) fn from_f64(key: &str, v: f64) -> Result<Self, IoError> {
        Number::from_f64(v)
            .map(IoValue::Number)
            .ok_or_else(|| IoError::NotFinite(key.to_string()))
    }
}

/// Insertion-ordered field list shared by [`Io`](super::Io) and [`IoRow`].
///
/// Records hold tens of fields, so a vector with linear lookup keeps wire
/// order without pulling in an ordered map.
#[doc(hidden)]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(String, IoValue)>,
}

impl Fields {
    pub(crate) fn get(&self, key: &str) -> Option<&IoValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert a new key; existing keys are an error.
    pub(crate) fn insert(&mut self, key: &str, value: IoValue) -> Result<(), IoError> {
        if self.contains(key) {
            return Err(IoError::DuplicateKey(key.to_string()));
        }
        self.entries.push((key.to_string(), value));
        Ok(())
    }

    /// Insert or replace in place, keeping the original position.
    pub(crate) fn replace(&mut self, key: &str, value: IoValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<IoValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &IoValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
