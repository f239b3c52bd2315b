//! Field-value rows as stored in the entity store.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{FabricError, FabricResult};

/// Key-value tuple representing a field and its value.
pub type FieldValue = (String, String);

/// Collection of field-value pairs for a table row.
pub type FieldValues = Vec<FieldValue>;

/// Equality filter: every pair must match the row for it to be selected.
/// An empty filter selects every row.
pub type Filter = FieldValues;

/// Helper trait for working with field-value collections.
pub trait FieldValuesExt {
    /// Gets the value for a field, if present.
    fn get_field(&self, field: &str) -> Option<&str>;

    /// Gets the value for a field, returning the default if not present.
    fn get_field_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str;

    /// Checks if a field exists.
    fn has_field(&self, field: &str) -> bool;

    /// Gets a field that must be present.
    fn require_field(&self, table: &str, field: &str) -> FabricResult<&str>;

    /// Gets and parses a field that must be present.
    fn parse_field<T>(&self, table: &str, field: &str) -> FabricResult<T>
    where
        T: FromStr,
        T::Err: Display;

    /// Replaces the value of `field`, appending it if absent.
    fn set_field(&mut self, field: &str, value: impl Into<String>);

    /// Returns true if every pair of `filter` is present with the same value.
    fn matches(&self, filter: &[FieldValue]) -> bool;
}

impl FieldValuesExt for FieldValues {
    fn get_field(&self, field: &str) -> Option<&str> {
        self.iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    fn get_field_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str {
        self.get_field(field).unwrap_or(default)
    }

    fn has_field(&self, field: &str) -> bool {
        self.iter().any(|(f, _)| f == field)
    }

    fn require_field(&self, table: &str, field: &str) -> FabricResult<&str> {
        self.get_field(field).ok_or_else(|| {
            FabricError::store("decode", format!("{} row is missing field '{}'", table, field))
        })
    }

    fn parse_field<T>(&self, table: &str, field: &str) -> FabricResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.require_field(table, field)?;
        raw.parse().map_err(|e: T::Err| {
            FabricError::store(
                "decode",
                format!("{}.{} = '{}': {}", table, field, raw, e),
            )
        })
    }

    fn set_field(&mut self, field: &str, value: impl Into<String>) {
        let value = value.into();
        match self.iter_mut().find(|(f, _)| f == field) {
            Some(entry) => entry.1 = value,
            None => self.push((field.to_string(), value)),
        }
    }

    fn matches(&self, filter: &[FieldValue]) -> bool {
        filter
            .iter()
            .all(|(f, v)| self.get_field(f) == Some(v.as_str()))
    }
}

/// Builds a FieldValues collection from key-value pairs.
#[macro_export]
macro_rules! field_values {
    ($($field:expr => $value:expr),* $(,)?) => {
        vec![
            $(($field.to_string(), $value.to_string()),)*
        ]
    };
}
