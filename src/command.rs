//! Command envelope, headers, and responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Feature, Features, SchemaVersion, Thing, ThingId};
use crate::pointer::JsonPointer;

/// Prefix shared by every command type string.
pub const COMMAND_TYPE_PREFIX: &str = "things.commands:";

/// Prefix shared by every response type string.
pub const RESPONSE_TYPE_PREFIX: &str = "things.responses:";

/// Cross-cutting metadata carried by commands, events, and responses.
///
/// Events inherit the headers of the command that produced them, with the
/// schema version pinned to the thing's schema.
///
/// # Examples
///
/// ```
/// use thing_persistence::Headers;
/// use serde_json::json;
///
/// let headers = Headers::default()
///     .with_correlation_id("req-abc-123")
///     .with_auth_subject("user:42")
///     .with_metadata(json!({"source": "api"}));
///
/// assert_eq!(headers.correlation_id.as_deref(), Some("req-abc-123"));
/// assert_eq!(headers.auth_subjects, vec!["user:42".to_owned()]);
/// assert!(!headers.dry_run);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Headers {
    /// Correlation ID for tracing a request across actors and services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<SchemaVersion>,
    /// When set, the command is evaluated and answered but never persisted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    /// Authenticated subjects of the requester.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_subjects: Vec<String>,
    /// Arbitrary metadata forwarded onto produced events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Headers {
    /// Set the correlation ID.
    ///
    /// # Arguments
    ///
    /// * `id` - Any value convertible to `String` used to correlate this
    ///   command with replies, events, and log lines.
    ///
    /// # Returns
    ///
    /// The updated `Headers` with the correlation ID set.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the schema version.
    pub fn with_schema_version(mut self, version: SchemaVersion) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Mark the command as a dry run.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Append an authenticated subject.
    ///
    /// # Arguments
    ///
    /// * `subject` - Identity of the requester, e.g. `"user:42"`.
    ///
    /// # Returns
    ///
    /// The updated `Headers` with the subject appended.
    pub fn with_auth_subject(mut self, subject: impl Into<String>) -> Self {
        self.auth_subjects.push(subject.into());
        self
    }

    /// Set arbitrary metadata.
    ///
    /// # Arguments
    ///
    /// * `meta` - A `serde_json::Value` forwarded onto produced events.
    ///
    /// # Returns
    ///
    /// The updated `Headers` with the metadata set.
    pub fn with_metadata(mut self, meta: Value) -> Self {
        self.metadata = Some(meta);
        self
    }
}

/// The operation a command requests.
///
/// Serialized adjacently tagged: `{"type": "things.commands:<action>", "data": {..}}`.
/// Unit variants carry no `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum CommandPayload {
    #[serde(rename = "things.commands:createThing")]
    CreateThing { thing: Thing },
    #[serde(rename = "things.commands:modifyThing")]
    ModifyThing { thing: Thing },
    #[serde(rename = "things.commands:retrieveThing")]
    RetrieveThing,
    #[serde(rename = "things.commands:deleteThing")]
    DeleteThing,

    #[serde(rename = "things.commands:modifyAttributes")]
    ModifyAttributes { attributes: Map<String, Value> },
    #[serde(rename = "things.commands:retrieveAttributes")]
    RetrieveAttributes,
    #[serde(rename = "things.commands:deleteAttributes")]
    DeleteAttributes,
    #[serde(rename = "things.commands:modifyAttribute")]
    ModifyAttribute { pointer: JsonPointer, value: Value },
    #[serde(rename = "things.commands:retrieveAttribute")]
    RetrieveAttribute { pointer: JsonPointer },
    #[serde(rename = "things.commands:deleteAttribute")]
    DeleteAttribute { pointer: JsonPointer },

    #[serde(rename = "things.commands:modifyFeatures")]
    ModifyFeatures { features: Features },
    #[serde(rename = "things.commands:retrieveFeatures")]
    RetrieveFeatures,
    #[serde(rename = "things.commands:deleteFeatures")]
    DeleteFeatures,
    #[serde(rename = "things.commands:modifyFeature")]
    ModifyFeature { feature_id: String, feature: Feature },
    #[serde(rename = "things.commands:retrieveFeature")]
    RetrieveFeature { feature_id: String },
    #[serde(rename = "things.commands:deleteFeature")]
    DeleteFeature { feature_id: String },
    #[serde(rename = "things.commands:modifyFeatureProperty")]
    ModifyFeatureProperty {
        feature_id: String,
        pointer: JsonPointer,
        value: Value,
    },
    #[serde(rename = "things.commands:retrieveFeatureProperty")]
    RetrieveFeatureProperty {
        feature_id: String,
        pointer: JsonPointer,
    },
    #[serde(rename = "things.commands:deleteFeatureProperty")]
    DeleteFeatureProperty {
        feature_id: String,
        pointer: JsonPointer,
    },
}

/// Stable type strings of every command, as used by the strategy table.
pub mod command_types {
    pub const CREATE_THING: &str = "things.commands:createThing";
    pub const MODIFY_THING: &str = "things.commands:modifyThing";
    pub const RETRIEVE_THING: &str = "things.commands:retrieveThing";
    pub const DELETE_THING: &str = "things.commands:deleteThing";
    pub const MODIFY_ATTRIBUTES: &str = "things.commands:modifyAttributes";
    pub const RETRIEVE_ATTRIBUTES: &str = "things.commands:retrieveAttributes";
    pub const DELETE_ATTRIBUTES: &str = "things.commands:deleteAttributes";
    pub const MODIFY_ATTRIBUTE: &str = "things.commands:modifyAttribute";
    pub const RETRIEVE_ATTRIBUTE: &str = "things.commands:retrieveAttribute";
    pub const DELETE_ATTRIBUTE: &str = "things.commands:deleteAttribute";
    pub const MODIFY_FEATURES: &str = "things.commands:modifyFeatures";
    pub const RETRIEVE_FEATURES: &str = "things.commands:retrieveFeatures";
    pub const DELETE_FEATURES: &str = "things.commands:deleteFeatures";
    pub const MODIFY_FEATURE: &str = "things.commands:modifyFeature";
    pub const RETRIEVE_FEATURE: &str = "things.commands:retrieveFeature";
    pub const DELETE_FEATURE: &str = "things.commands:deleteFeature";
    pub const MODIFY_FEATURE_PROPERTY: &str = "things.commands:modifyFeatureProperty";
    pub const RETRIEVE_FEATURE_PROPERTY: &str = "things.commands:retrieveFeatureProperty";
    pub const DELETE_FEATURE_PROPERTY: &str = "things.commands:deleteFeatureProperty";
}

impl CommandPayload {
    /// The stable `type` string of this command.
    pub fn command_type(&self) -> &'static str {
        use command_types::*;
        match self {
            CommandPayload::CreateThing { .. } => CREATE_THING,
            CommandPayload::ModifyThing { .. } => MODIFY_THING,
            CommandPayload::RetrieveThing => RETRIEVE_THING,
            CommandPayload::DeleteThing => DELETE_THING,
            CommandPayload::ModifyAttributes { .. } => MODIFY_ATTRIBUTES,
            CommandPayload::RetrieveAttributes => RETRIEVE_ATTRIBUTES,
            CommandPayload::DeleteAttributes => DELETE_ATTRIBUTES,
            CommandPayload::ModifyAttribute { .. } => MODIFY_ATTRIBUTE,
            CommandPayload::RetrieveAttribute { .. } => RETRIEVE_ATTRIBUTE,
            CommandPayload::DeleteAttribute { .. } => DELETE_ATTRIBUTE,
            CommandPayload::ModifyFeatures { .. } => MODIFY_FEATURES,
            CommandPayload::RetrieveFeatures => RETRIEVE_FEATURES,
            CommandPayload::DeleteFeatures => DELETE_FEATURES,
            CommandPayload::ModifyFeature { .. } => MODIFY_FEATURE,
            CommandPayload::RetrieveFeature { .. } => RETRIEVE_FEATURE,
            CommandPayload::DeleteFeature { .. } => DELETE_FEATURE,
            CommandPayload::ModifyFeatureProperty { .. } => MODIFY_FEATURE_PROPERTY,
            CommandPayload::RetrieveFeatureProperty { .. } => RETRIEVE_FEATURE_PROPERTY,
            CommandPayload::DeleteFeatureProperty { .. } => DELETE_FEATURE_PROPERTY,
        }
    }
}

/// A command addressed to one thing.
///
/// Immutable once dispatched; the actor only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingCommand {
    pub thing_id: ThingId,
    #[serde(default)]
    pub headers: Headers,
    pub payload: CommandPayload,
}

impl ThingCommand {
    /// A command with default headers.
    pub fn new(thing_id: ThingId, payload: CommandPayload) -> Self {
        Self {
            thing_id,
            headers: Headers::default(),
            payload,
        }
    }

    /// Replace the headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn command_type(&self) -> &'static str {
        self.payload.command_type()
    }

    /// Whether this command creates the thing.
    pub fn is_creation(&self) -> bool {
        matches!(self.payload, CommandPayload::CreateThing { .. })
    }

    pub fn is_dry_run(&self) -> bool {
        self.headers.dry_run
    }
}

/// Successful answer to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    /// `things.responses:<action>`, mirroring the command type.
    #[serde(rename = "type")]
    pub response_type: String,
    pub thing_id: ThingId,
    /// HTTP-like status: 201 created, 204 modified/deleted, 200 retrieved.
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl CommandResponse {
    fn for_command(command: &ThingCommand, status: u16, payload: Option<Value>) -> Self {
        let action = command
            .command_type()
            .strip_prefix(COMMAND_TYPE_PREFIX)
            .unwrap_or(command.command_type());
        Self {
            response_type: format!("{RESPONSE_TYPE_PREFIX}{action}"),
            thing_id: command.thing_id.clone(),
            status,
            headers: command.headers.clone(),
            payload,
        }
    }

    /// 201 with the created resource.
    pub fn created(command: &ThingCommand, payload: Value) -> Self {
        Self::for_command(command, 201, Some(payload))
    }

    /// 204 without a body.
    pub fn no_content(command: &ThingCommand) -> Self {
        Self::for_command(command, 204, None)
    }

    /// 200 with the retrieved resource.
    pub fn ok(command: &ThingCommand, payload: Value) -> Self {
        Self::for_command(command, 200, Some(payload))
    }
}
