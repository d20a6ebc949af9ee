//! Persisted thing events and their wire format.
//!
//! An event is the durable fact produced by one accepted command. It is
//! appended to the journal exactly once, folded onto the thing by
//! [`apply_event`](crate::apply_event), and published on
//! [`THING_EVENT_TOPIC`].

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::Headers;
use crate::model::{Feature, Features, Thing, ThingId};
use crate::pointer::JsonPointer;

/// Prefix shared by every event type string; also the publish topic.
pub const EVENT_TYPE_PREFIX: &str = "things.events:";

/// Topic on which every applied event is published.
pub const THING_EVENT_TOPIC: &str = EVENT_TYPE_PREFIX;

/// What happened to the thing.
///
/// Serialized adjacently tagged, like commands. Created and modified are
/// distinct events so subscribers can tell a new sub-resource from an
/// overwritten one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ThingEventPayload {
    #[serde(rename = "things.events:thingCreated")]
    ThingCreated { thing: Thing },
    #[serde(rename = "things.events:thingModified")]
    ThingModified { thing: Thing },
    #[serde(rename = "things.events:thingDeleted")]
    ThingDeleted,

    #[serde(rename = "things.events:attributesCreated")]
    AttributesCreated { attributes: Map<String, Value> },
    #[serde(rename = "things.events:attributesModified")]
    AttributesModified { attributes: Map<String, Value> },
    #[serde(rename = "things.events:attributesDeleted")]
    AttributesDeleted,
    #[serde(rename = "things.events:attributeCreated")]
    AttributeCreated { pointer: JsonPointer, value: Value },
    #[serde(rename = "things.events:attributeModified")]
    AttributeModified { pointer: JsonPointer, value: Value },
    #[serde(rename = "things.events:attributeDeleted")]
    AttributeDeleted { pointer: JsonPointer },

    #[serde(rename = "things.events:featuresCreated")]
    FeaturesCreated { features: Features },
    #[serde(rename = "things.events:featuresModified")]
    FeaturesModified { features: Features },
    #[serde(rename = "things.events:featuresDeleted")]
    FeaturesDeleted,
    #[serde(rename = "things.events:featureCreated")]
    FeatureCreated { feature_id: String, feature: Feature },
    #[serde(rename = "things.events:featureModified")]
    FeatureModified { feature_id: String, feature: Feature },
    #[serde(rename = "things.events:featureDeleted")]
    FeatureDeleted { feature_id: String },
    #[serde(rename = "things.events:featurePropertyCreated")]
    FeaturePropertyCreated {
        feature_id: String,
        pointer: JsonPointer,
        value: Value,
    },
    #[serde(rename = "things.events:featurePropertyModified")]
    FeaturePropertyModified {
        feature_id: String,
        pointer: JsonPointer,
        value: Value,
    },
    #[serde(rename = "things.events:featurePropertyDeleted")]
    FeaturePropertyDeleted {
        feature_id: String,
        pointer: JsonPointer,
    },
}

/// Stable type strings of every event, as used by the fold table.
pub mod event_types {
    pub const THING_CREATED: &str = "things.events:thingCreated";
    pub const THING_MODIFIED: &str = "things.events:thingModified";
    pub const THING_DELETED: &str = "things.events:thingDeleted";
    pub const ATTRIBUTES_CREATED: &str = "things.events:attributesCreated";
    pub const ATTRIBUTES_MODIFIED: &str = "things.events:attributesModified";
    pub const ATTRIBUTES_DELETED: &str = "things.events:attributesDeleted";
    pub const ATTRIBUTE_CREATED: &str = "things.events:attributeCreated";
    pub const ATTRIBUTE_MODIFIED: &str = "things.events:attributeModified";
    pub const ATTRIBUTE_DELETED: &str = "things.events:attributeDeleted";
    pub const FEATURES_CREATED: &str = "things.events:featuresCreated";
    pub const FEATURES_MODIFIED: &str = "things.events:featuresModified";
    pub const FEATURES_DELETED: &str = "things.events:featuresDeleted";
    pub const FEATURE_CREATED: &str = "things.events:featureCreated";
    pub const FEATURE_MODIFIED: &str = "things.events:featureModified";
    pub const FEATURE_DELETED: &str = "things.events:featureDeleted";
    pub const FEATURE_PROPERTY_CREATED: &str = "things.events:featurePropertyCreated";
    pub const FEATURE_PROPERTY_MODIFIED: &str = "things.events:featurePropertyModified";
    pub const FEATURE_PROPERTY_DELETED: &str = "things.events:featurePropertyDeleted";
}

impl ThingEventPayload {
    /// The stable `type` string of this event.
    pub fn event_type(&self) -> &'static str {
        use event_types::*;
        match self {
            ThingEventPayload::ThingCreated { .. } => THING_CREATED,
            ThingEventPayload::ThingModified { .. } => THING_MODIFIED,
            ThingEventPayload::ThingDeleted => THING_DELETED,
            ThingEventPayload::AttributesCreated { .. } => ATTRIBUTES_CREATED,
            ThingEventPayload::AttributesModified { .. } => ATTRIBUTES_MODIFIED,
            ThingEventPayload::AttributesDeleted => ATTRIBUTES_DELETED,
            ThingEventPayload::AttributeCreated { .. } => ATTRIBUTE_CREATED,
            ThingEventPayload::AttributeModified { .. } => ATTRIBUTE_MODIFIED,
            ThingEventPayload::AttributeDeleted { .. } => ATTRIBUTE_DELETED,
            ThingEventPayload::FeaturesCreated { .. } => FEATURES_CREATED,
            ThingEventPayload::FeaturesModified { .. } => FEATURES_MODIFIED,
            ThingEventPayload::FeaturesDeleted => FEATURES_DELETED,
            ThingEventPayload::FeatureCreated { .. } => FEATURE_CREATED,
            ThingEventPayload::FeatureModified { .. } => FEATURE_MODIFIED,
            ThingEventPayload::FeatureDeleted { .. } => FEATURE_DELETED,
            ThingEventPayload::FeaturePropertyCreated { .. } => FEATURE_PROPERTY_CREATED,
            ThingEventPayload::FeaturePropertyModified { .. } => FEATURE_PROPERTY_MODIFIED,
            ThingEventPayload::FeaturePropertyDeleted { .. } => FEATURE_PROPERTY_DELETED,
        }
    }
}

/// A persisted fact about one thing.
///
/// `revision` is the journal sequence number this event produced. The
/// `timestamp` is left empty by strategies and stamped by the actor just
/// before the append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingEvent {
    pub thing_id: ThingId,
    pub revision: u64,
    /// Epoch milliseconds at persistence time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub headers: Headers,
    pub payload: ThingEventPayload,
}

impl ThingEvent {
    /// An event without timestamp.
    ///
    /// # Arguments
    ///
    /// * `thing_id` - The thing the event belongs to.
    /// * `revision` - The revision this event produces.
    /// * `headers` - Headers inherited from the triggering command.
    /// * `payload` - What happened.
    pub fn new(
        thing_id: ThingId,
        revision: u64,
        headers: Headers,
        payload: ThingEventPayload,
    ) -> Self {
        Self {
            thing_id,
            revision,
            timestamp: None,
            headers,
            payload,
        }
    }

    /// Set the persistence timestamp.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::UNIX_EPOCH
        .elapsed()
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
