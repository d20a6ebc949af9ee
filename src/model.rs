//! The thing entity and its building blocks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Identifier of a thing in `<namespace>:<name>` form.
///
/// The namespace may be empty, the name may not. Neither part may contain
/// `/` or whitespace, since the ID is used as a path segment by file-backed
/// stores and transport adapters.
///
/// # Examples
///
/// ```
/// use thing_persistence::ThingId;
///
/// let id = ThingId::new("org.example:sensor-1").unwrap();
/// assert_eq!(id.namespace(), "org.example");
/// assert_eq!(id.name(), "sensor-1");
/// assert!(ThingId::new("no-namespace").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThingId(String);

impl ThingId {
    /// Validate and wrap a thing ID.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidThingId`] if the value has no `:`
    /// separator, an empty name, or a forbidden character.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        let invalid = |reason: &'static str| ValidationError::InvalidThingId {
            id: id.clone(),
            reason,
        };
        let Some((_, name)) = id.split_once(':') else {
            return Err(invalid("missing ':' between namespace and name"));
        };
        if name.is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if id.chars().any(|c| c == '/' || c.is_whitespace() || c.is_control()) {
            return Err(invalid("contains '/', whitespace, or a control character"));
        }
        Ok(Self(id))
    }

    /// The part before the first `:`.
    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map(|(ns, _)| ns).unwrap_or_default()
    }

    /// The part after the first `:`.
    pub fn name(&self) -> &str {
        self.0.split_once(':').map(|(_, n)| n).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ThingId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ThingId> for String {
    fn from(id: ThingId) -> Self {
        id.0
    }
}

/// Lifecycle tag of a persisted thing.
///
/// Values other than `ACTIVE` and `DELETED` are kept verbatim in
/// [`Lifecycle::Unknown`] so recovery can report them instead of failing
/// to deserialize the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Lifecycle {
    Active,
    Deleted,
    Unknown(String),
}

impl From<String> for Lifecycle {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ACTIVE" => Lifecycle::Active,
            "DELETED" => Lifecycle::Deleted,
            _ => Lifecycle::Unknown(value),
        }
    }
}

impl From<Lifecycle> for String {
    fn from(lifecycle: Lifecycle) -> Self {
        match lifecycle {
            Lifecycle::Active => "ACTIVE".to_owned(),
            Lifecycle::Deleted => "DELETED".to_owned(),
            Lifecycle::Unknown(other) => other,
        }
    }
}

/// Wire schema version of a thing and the events it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaVersion(pub u8);

impl SchemaVersion {
    pub const V_1: SchemaVersion = SchemaVersion(1);
    pub const V_2: SchemaVersion = SchemaVersion(2);
    pub const LATEST: SchemaVersion = SchemaVersion::V_2;
}

impl Default for SchemaVersion {
    fn default() -> Self {
        SchemaVersion::LATEST
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A named capability of a thing with its own property document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Identifiers of the definitions this feature conforms to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
}

impl Feature {
    /// A feature with the given properties and no definition.
    pub fn with_properties(properties: Map<String, Value>) -> Self {
        Self {
            definition: None,
            properties: Some(properties),
        }
    }
}

/// Map of feature ID to feature.
pub type Features = BTreeMap<String, Feature>;

/// The digital twin itself: identity, lifecycle, revision, and payload.
///
/// A `Thing` is always produced by folding events; `revision` equals the
/// number of events applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    pub thing_id: ThingId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    #[serde(default)]
    pub revision: u64,
    /// Epoch milliseconds of the last applied event, when it carried a timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
    #[serde(default)]
    pub schema_version: SchemaVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,
}

impl Thing {
    /// An empty thing with no lifecycle, revision 0, and the latest schema.
    pub fn new(thing_id: ThingId) -> Self {
        Self {
            thing_id,
            policy_id: None,
            lifecycle: None,
            revision: 0,
            modified: None,
            schema_version: SchemaVersion::LATEST,
            attributes: None,
            features: None,
        }
    }

    /// Whether the thing carries the `DELETED` lifecycle.
    pub fn is_deleted(&self) -> bool {
        self.lifecycle == Some(Lifecycle::Deleted)
    }

    /// Look up a feature by ID.
    pub fn feature(&self, feature_id: &str) -> Option<&Feature> {
        self.features.as_ref()?.get(feature_id)
    }

    /// JSON representation used in response payloads.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Validate a feature ID: non-empty and free of `/`.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidFeatureId`] otherwise.
pub fn validate_feature_id(feature_id: &str) -> Result<(), ValidationError> {
    if feature_id.is_empty() || feature_id.contains('/') {
        return Err(ValidationError::InvalidFeatureId(feature_id.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use serde_json::json;

    use super::*;

    pub(crate) fn thing_id(name: &str) -> ThingId {
        ThingId::new(format!("org.example:{name}")).expect("fixture ID is valid")
    }

    /// A thing with one attribute and one feature, as a creation payload.
    pub(crate) fn sample_thing(name: &str) -> Thing {
        let mut thing = Thing::new(thing_id(name));
        thing.policy_id = Some(format!("org.example:{name}-policy"));
        thing.attributes = json!({"location": "kitchen"}).as_object().cloned();
        let mut features = Features::new();
        features.insert(
            "temperature".to_owned(),
            Feature::with_properties(
                json!({"value": 21.5})
                    .as_object()
                    .cloned()
                    .expect("object literal"),
            ),
        );
        thing.features = Some(features);
        thing
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::test_fixtures::*;
    use super::*;

    #[test]
    fn thing_id_splits_namespace_and_name() {
        let id = ThingId::new("org.example:lamp:1").expect("valid ID");
        assert_eq!(id.namespace(), "org.example");
        assert_eq!(id.name(), "lamp:1");
        assert_eq!(id.to_string(), "org.example:lamp:1");
    }

    #[test]
    fn thing_id_allows_empty_namespace() {
        let id = ThingId::new(":lamp").expect("empty namespace is valid");
        assert_eq!(id.namespace(), "");
    }

    #[test]
    fn thing_id_rejects_malformed_values() {
        for bad in ["lamp", "org.example:", "org.example:a/b", "org.example:a b"] {
            assert!(ThingId::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn thing_id_deserialization_validates() {
        let ok: ThingId = serde_json::from_value(json!("ns:name")).expect("valid");
        assert_eq!(ok.as_str(), "ns:name");
        assert!(serde_json::from_value::<ThingId>(json!("nonamespace")).is_err());
    }

    #[test]
    fn lifecycle_serializes_as_upper_case_strings() {
        assert_eq!(
            serde_json::to_value(Lifecycle::Active).expect("serialize"),
            json!("ACTIVE")
        );
        let unknown: Lifecycle = serde_json::from_value(json!("ARCHIVED")).expect("deserialize");
        assert_eq!(unknown, Lifecycle::Unknown("ARCHIVED".to_owned()));
        assert_eq!(
            serde_json::to_value(unknown).expect("serialize"),
            json!("ARCHIVED")
        );
    }

    #[test]
    fn thing_json_uses_camel_case_and_skips_absent_fields() {
        let thing = Thing::new(thing_id("t1"));
        let value = thing.to_json();
        assert_eq!(
            value,
            json!({"thingId": "org.example:t1", "revision": 0, "schemaVersion": 2})
        );
    }

    #[test]
    fn thing_serde_roundtrip_preserves_payload() {
        let mut thing = sample_thing("t2");
        thing.lifecycle = Some(Lifecycle::Active);
        thing.revision = 4;
        thing.modified = Some(1_700_000_000_000);

        let json = serde_json::to_string(&thing).expect("serialize");
        let back: Thing = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, thing);
    }

    #[test]
    fn is_deleted_only_for_deleted_lifecycle() {
        let mut thing = Thing::new(thing_id("t3"));
        assert!(!thing.is_deleted());
        thing.lifecycle = Some(Lifecycle::Deleted);
        assert!(thing.is_deleted());
        thing.lifecycle = Some(Lifecycle::Unknown("X".to_owned()));
        assert!(!thing.is_deleted());
    }

    #[test]
    fn feature_id_validation() {
        assert!(validate_feature_id("temperature").is_ok());
        assert!(validate_feature_id("").is_err());
        assert!(validate_feature_id("a/b").is_err());
    }
}
