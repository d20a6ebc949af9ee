//! Strategies for features and feature properties.

use serde_json::Value;

use crate::command::{CommandPayload, CommandResponse, ThingCommand};
use crate::error::ThingError;
use crate::event::ThingEventPayload;
use crate::model::{Feature, Thing, validate_feature_id};
use crate::pointer::JsonPointer;

use super::{StrategyContext, StrategyResult, event_for};

fn invalid_feature_id(command: &ThingCommand, feature_id: &str) -> Option<StrategyResult> {
    validate_feature_id(feature_id).err().map(|e| {
        StrategyResult::error(
            ThingError::InvalidCommand {
                thing_id: command.thing_id.clone(),
                reason: e.to_string(),
            },
            command,
        )
    })
}

fn features_not_accessible(command: &ThingCommand) -> StrategyResult {
    StrategyResult::error(
        ThingError::FeaturesNotAccessible {
            thing_id: command.thing_id.clone(),
        },
        command,
    )
}

fn feature_not_accessible(command: &ThingCommand, feature_id: &str) -> StrategyResult {
    StrategyResult::error(
        ThingError::FeatureNotAccessible {
            thing_id: command.thing_id.clone(),
            feature_id: feature_id.to_owned(),
        },
        command,
    )
}

fn property_not_accessible(
    command: &ThingCommand,
    feature_id: &str,
    pointer: &JsonPointer,
) -> StrategyResult {
    StrategyResult::error(
        ThingError::FeaturePropertyNotAccessible {
            thing_id: command.thing_id.clone(),
            feature_id: feature_id.to_owned(),
            pointer: pointer.clone(),
        },
        command,
    )
}

fn property<'a>(feature: &'a Feature, pointer: &JsonPointer) -> Option<&'a Value> {
    feature.properties.as_ref().and_then(|p| pointer.get(p))
}

pub(super) fn modify_features(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::ModifyFeatures { features } = &command.payload else {
        return StrategyResult::unsupported(command);
    };
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    if let Some(rejection) = features
        .keys()
        .find_map(|feature_id| invalid_feature_id(command, feature_id))
    {
        return rejection;
    }

    if thing.features.is_some() {
        let event = event_for(
            command,
            next_revision,
            ThingEventPayload::FeaturesModified {
                features: features.clone(),
            },
        );
        StrategyResult::persist(event, CommandResponse::no_content(command))
    } else {
        let payload = serde_json::to_value(features).unwrap_or_default();
        let event = event_for(
            command,
            next_revision,
            ThingEventPayload::FeaturesCreated {
                features: features.clone(),
            },
        );
        StrategyResult::persist(event, CommandResponse::created(command, payload))
    }
}

pub(super) fn retrieve_features(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    _next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    if !matches!(command.payload, CommandPayload::RetrieveFeatures) {
        return StrategyResult::unsupported(command);
    }
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    match &thing.features {
        Some(features) => StrategyResult::reply(CommandResponse::ok(
            command,
            serde_json::to_value(features).unwrap_or_default(),
        )),
        None => features_not_accessible(command),
    }
}

pub(super) fn delete_features(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    if !matches!(command.payload, CommandPayload::DeleteFeatures) {
        return StrategyResult::unsupported(command);
    }
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    if thing.features.is_none() {
        return features_not_accessible(command);
    }
    let event = event_for(command, next_revision, ThingEventPayload::FeaturesDeleted);
    StrategyResult::persist(event, CommandResponse::no_content(command))
}

pub(super) fn modify_feature(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::ModifyFeature {
        feature_id,
        feature,
    } = &command.payload
    else {
        return StrategyResult::unsupported(command);
    };
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    if let Some(rejection) = invalid_feature_id(command, feature_id) {
        return rejection;
    }

    if thing.feature(feature_id).is_some() {
        let event = event_for(
            command,
            next_revision,
            ThingEventPayload::FeatureModified {
                feature_id: feature_id.clone(),
                feature: feature.clone(),
            },
        );
        StrategyResult::persist(event, CommandResponse::no_content(command))
    } else {
        let payload = serde_json::to_value(feature).unwrap_or_default();
        let event = event_for(
            command,
            next_revision,
            ThingEventPayload::FeatureCreated {
                feature_id: feature_id.clone(),
                feature: feature.clone(),
            },
        );
        StrategyResult::persist(event, CommandResponse::created(command, payload))
    }
}

pub(super) fn retrieve_feature(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    _next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::RetrieveFeature { feature_id } = &command.payload else {
        return StrategyResult::unsupported(command);
    };
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    match thing.feature(feature_id) {
        Some(feature) => StrategyResult::reply(CommandResponse::ok(
            command,
            serde_json::to_value(feature).unwrap_or_default(),
        )),
        None => feature_not_accessible(command, feature_id),
    }
}

pub(super) fn delete_feature(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::DeleteFeature { feature_id } = &command.payload else {
        return StrategyResult::unsupported(command);
    };
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    if thing.feature(feature_id).is_none() {
        return feature_not_accessible(command, feature_id);
    }
    let event = event_for(
        command,
        next_revision,
        ThingEventPayload::FeatureDeleted {
            feature_id: feature_id.clone(),
        },
    );
    StrategyResult::persist(event, CommandResponse::no_content(command))
}

/// Set one property; the feature itself must already exist.
pub(super) fn modify_feature_property(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::ModifyFeatureProperty {
        feature_id,
        pointer,
        value,
    } = &command.payload
    else {
        return StrategyResult::unsupported(command);
    };
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    let Some(feature) = thing.feature(feature_id) else {
        return feature_not_accessible(command, feature_id);
    };

    if property(feature, pointer).is_some() {
        let event = event_for(
            command,
            next_revision,
            ThingEventPayload::FeaturePropertyModified {
                feature_id: feature_id.clone(),
                pointer: pointer.clone(),
                value: value.clone(),
            },
        );
        StrategyResult::persist(event, CommandResponse::no_content(command))
    } else {
        let event = event_for(
            command,
            next_revision,
            ThingEventPayload::FeaturePropertyCreated {
                feature_id: feature_id.clone(),
                pointer: pointer.clone(),
                value: value.clone(),
            },
        );
        StrategyResult::persist(event, CommandResponse::created(command, value.clone()))
    }
}

pub(super) fn retrieve_feature_property(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    _next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::RetrieveFeatureProperty {
        feature_id,
        pointer,
    } = &command.payload
    else {
        return StrategyResult::unsupported(command);
    };
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    let Some(feature) = thing.feature(feature_id) else {
        return feature_not_accessible(command, feature_id);
    };
    match property(feature, pointer) {
        Some(value) => StrategyResult::reply(CommandResponse::ok(command, value.clone())),
        None => property_not_accessible(command, feature_id, pointer),
    }
}

pub(super) fn delete_feature_property(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::DeleteFeatureProperty {
        feature_id,
        pointer,
    } = &command.payload
    else {
        return StrategyResult::unsupported(command);
    };
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    let Some(feature) = thing.feature(feature_id) else {
        return feature_not_accessible(command, feature_id);
    };
    if property(feature, pointer).is_none() {
        return property_not_accessible(command, feature_id, pointer);
    }
    let event = event_for(
        command,
        next_revision,
        ThingEventPayload::FeaturePropertyDeleted {
            feature_id: feature_id.clone(),
            pointer: pointer.clone(),
        },
    );
    StrategyResult::persist(event, CommandResponse::no_content(command))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::test_fixtures::*;
    use super::*;
    use crate::model::Features;

    fn ptr(p: &str) -> JsonPointer {
        JsonPointer::parse(p).expect("valid pointer")
    }

    #[test]
    fn modify_features_rejects_invalid_ids() {
        let thing = live_thing("a");
        let mut features = Features::new();
        features.insert(String::new(), Feature::default());
        let result = run_created(&thing, &command("a", CommandPayload::ModifyFeatures { features }));
        assert!(result.event.is_none());
        assert!(matches!(
            error_of(&result),
            ThingError::InvalidCommand { .. }
        ));
    }

    #[test]
    fn modify_features_without_features_creates() {
        let mut thing = live_thing("a");
        thing.features = None;
        let result = run_created(
            &thing,
            &command(
                "a",
                CommandPayload::ModifyFeatures {
                    features: Features::new(),
                },
            ),
        );
        assert!(matches!(
            result.event.expect("persists").payload,
            ThingEventPayload::FeaturesCreated { .. }
        ));
        assert_eq!(result.response.expect("ok").status, 201);
    }

    #[test]
    fn delete_features_on_missing_is_not_accessible() {
        let mut thing = live_thing("a");
        thing.features = None;
        let result = run_created(&thing, &command("a", CommandPayload::DeleteFeatures));
        assert_eq!(error_of(&result).error_code(), "things:features.notfound");
    }

    #[test]
    fn modify_feature_creates_then_modifies() {
        let thing = live_thing("a");
        let new_feature = command(
            "a",
            CommandPayload::ModifyFeature {
                feature_id: "humidity".to_owned(),
                feature: Feature::default(),
            },
        );
        let result = run_created(&thing, &new_feature);
        assert!(matches!(
            result.event.expect("persists").payload,
            ThingEventPayload::FeatureCreated { .. }
        ));

        let existing = command(
            "a",
            CommandPayload::ModifyFeature {
                feature_id: "temperature".to_owned(),
                feature: Feature::default(),
            },
        );
        let result = run_created(&thing, &existing);
        assert!(matches!(
            result.event.expect("persists").payload,
            ThingEventPayload::FeatureModified { .. }
        ));
    }

    #[test]
    fn retrieve_feature_returns_properties() {
        let thing = live_thing("a");
        let cmd = command(
            "a",
            CommandPayload::RetrieveFeature {
                feature_id: "temperature".to_owned(),
            },
        );
        let response = run_created(&thing, &cmd).response.expect("ok");
        assert_eq!(response.payload, Some(json!({"properties": {"value": 21.5}})));
    }

    #[test]
    fn property_on_missing_feature_is_feature_not_accessible() {
        let thing = live_thing("a");
        let cmd = command(
            "a",
            CommandPayload::ModifyFeatureProperty {
                feature_id: "ghost".to_owned(),
                pointer: ptr("/on"),
                value: json!(true),
            },
        );
        let result = run_created(&thing, &cmd);
        assert!(result.event.is_none());
        assert!(matches!(
            error_of(&result),
            ThingError::FeatureNotAccessible { .. }
        ));
    }

    #[test]
    fn modify_feature_property_distinguishes_created_and_modified() {
        let thing = live_thing("a");
        let existing = command(
            "a",
            CommandPayload::ModifyFeatureProperty {
                feature_id: "temperature".to_owned(),
                pointer: ptr("/value"),
                value: json!(22.0),
            },
        );
        let result = run_created(&thing, &existing);
        assert!(matches!(
            result.event.expect("persists").payload,
            ThingEventPayload::FeaturePropertyModified { .. }
        ));

        let fresh = command(
            "a",
            CommandPayload::ModifyFeatureProperty {
                feature_id: "temperature".to_owned(),
                pointer: ptr("/unit"),
                value: json!("C"),
            },
        );
        let result = run_created(&thing, &fresh);
        assert_eq!(result.response.as_ref().map(|r| r.status).ok(), Some(201));
        assert!(matches!(
            result.event.expect("persists").payload,
            ThingEventPayload::FeaturePropertyCreated { .. }
        ));
    }

    #[test]
    fn retrieve_and_delete_missing_property() {
        let thing = live_thing("a");
        let retrieve = command(
            "a",
            CommandPayload::RetrieveFeatureProperty {
                feature_id: "temperature".to_owned(),
                pointer: ptr("/missing"),
            },
        );
        let result = run_created(&thing, &retrieve);
        assert_eq!(
            error_of(&result).error_code(),
            "things:feature.property.notfound"
        );

        let delete = command(
            "a",
            CommandPayload::DeleteFeatureProperty {
                feature_id: "temperature".to_owned(),
                pointer: ptr("/value"),
            },
        );
        let result = run_created(&thing, &delete);
        assert!(matches!(
            result.event.expect("persists").payload,
            ThingEventPayload::FeaturePropertyDeleted { .. }
        ));
    }
}
