//! Slash-separated pointers into attribute and property documents.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Path to a value inside a JSON object, e.g. `/location/room`.
///
/// The leading slash is optional when parsing and always present when
/// displayed. Every segment must be non-empty; the root pointer `/` is not
/// addressable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPointer(Vec<String>);

impl JsonPointer {
    /// Parse a pointer.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPointer`] for an empty pointer or
    /// one containing an empty segment (`/a//b`, a trailing `/`).
    pub fn parse(pointer: &str) -> Result<Self, ValidationError> {
        let trimmed = pointer.strip_prefix('/').unwrap_or(pointer);
        if trimmed.is_empty() {
            return Err(ValidationError::InvalidPointer {
                pointer: pointer.to_owned(),
                reason: "pointer must address at least one key",
            });
        }
        let segments: Vec<String> = trimmed.split('/').map(str::to_owned).collect();
        if segments.iter().any(String::is_empty) {
            return Err(ValidationError::InvalidPointer {
                pointer: pointer.to_owned(),
                reason: "empty segment",
            });
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Value at this pointer, if every intermediate level is an object.
    pub fn get<'a>(&self, root: &'a Map<String, Value>) -> Option<&'a Value> {
        let (last, parents) = self.0.split_last()?;
        let mut current = root;
        for segment in parents {
            current = current.get(segment)?.as_object()?;
        }
        current.get(last)
    }

    /// Store `value` at this pointer, creating intermediate objects and
    /// replacing non-object intermediates.
    ///
    /// Returns the previous value at the pointer, if any.
    pub fn set(&self, root: &mut Map<String, Value>, value: Value) -> Option<Value> {
        let (last, parents) = self.0.split_last()?;
        let mut current = root;
        for segment in parents {
            let slot = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            current = slot.as_object_mut()?;
        }
        current.insert(last.clone(), value)
    }

    /// Remove and return the value at this pointer.
    pub fn remove(&self, root: &mut Map<String, Value>) -> Option<Value> {
        let (last, parents) = self.0.split_last()?;
        let mut current = root;
        for segment in parents {
            current = current.get_mut(segment)?.as_object_mut()?;
        }
        current.remove(last)
    }
}

impl fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for JsonPointer {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JsonPointer> for String {
    fn from(pointer: JsonPointer) -> Self {
        pointer.to_string()
    }
}
