//! Strategies for the attribute document and single attributes.

use serde_json::Value;

use crate::command::{CommandPayload, CommandResponse, ThingCommand};
use crate::error::ThingError;
use crate::event::ThingEventPayload;
use crate::model::Thing;

use super::{StrategyContext, StrategyResult, event_for};

pub(super) fn modify_attributes(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::ModifyAttributes { attributes } = &command.payload else {
        return StrategyResult::unsupported(command);
    };
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };

    if thing.attributes.is_some() {
        let event = event_for(
            command,
            next_revision,
            ThingEventPayload::AttributesModified {
                attributes: attributes.clone(),
            },
        );
        StrategyResult::persist(event, CommandResponse::no_content(command))
    } else {
        let response = CommandResponse::created(command, Value::Object(attributes.clone()));
        let event = event_for(
            command,
            next_revision,
            ThingEventPayload::AttributesCreated {
                attributes: attributes.clone(),
            },
        );
        StrategyResult::persist(event, response)
    }
}

pub(super) fn retrieve_attributes(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    _next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    if !matches!(command.payload, CommandPayload::RetrieveAttributes) {
        return StrategyResult::unsupported(command);
    }
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    match &thing.attributes {
        Some(attributes) => StrategyResult::reply(CommandResponse::ok(
            command,
            Value::Object(attributes.clone()),
        )),
        None => attributes_not_accessible(command),
    }
}

pub(super) fn delete_attributes(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    if !matches!(command.payload, CommandPayload::DeleteAttributes) {
        return StrategyResult::unsupported(command);
    }
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    if thing.attributes.is_none() {
        return attributes_not_accessible(command);
    }
    let event = event_for(command, next_revision, ThingEventPayload::AttributesDeleted);
    StrategyResult::persist(event, CommandResponse::no_content(command))
}

pub(super) fn modify_attribute(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::ModifyAttribute { pointer, value } = &command.payload else {
        return StrategyResult::unsupported(command);
    };
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };

    let exists = thing
        .attributes
        .as_ref()
        .and_then(|attributes| pointer.get(attributes))
        .is_some();
    if exists {
        let event = event_for(
            command,
            next_revision,
            ThingEventPayload::AttributeModified {
                pointer: pointer.clone(),
                value: value.clone(),
            },
        );
        StrategyResult::persist(event, CommandResponse::no_content(command))
    } else {
        let event = event_for(
            command,
            next_revision,
            ThingEventPayload::AttributeCreated {
                pointer: pointer.clone(),
                value: value.clone(),
            },
        );
        StrategyResult::persist(event, CommandResponse::created(command, value.clone()))
    }
}

pub(super) fn retrieve_attribute(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    _next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::RetrieveAttribute { pointer } = &command.payload else {
        return StrategyResult::unsupported(command);
    };
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    match thing.attributes.as_ref().and_then(|a| pointer.get(a)) {
        Some(value) => StrategyResult::reply(CommandResponse::ok(command, value.clone())),
        None => StrategyResult::error(
            ThingError::AttributeNotAccessible {
                thing_id: command.thing_id.clone(),
                pointer: pointer.clone(),
            },
            command,
        ),
    }
}

pub(super) fn delete_attribute(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::DeleteAttribute { pointer } = &command.payload else {
        return StrategyResult::unsupported(command);
    };
    let Some(thing) = thing else {
        return StrategyResult::not_accessible(command);
    };
    if thing.attributes.as_ref().and_then(|a| pointer.get(a)).is_none() {
        return StrategyResult::error(
            ThingError::AttributeNotAccessible {
                thing_id: command.thing_id.clone(),
                pointer: pointer.clone(),
            },
            command,
        );
    }
    let event = event_for(
        command,
        next_revision,
        ThingEventPayload::AttributeDeleted {
            pointer: pointer.clone(),
        },
    );
    StrategyResult::persist(event, CommandResponse::no_content(command))
}

fn attributes_not_accessible(command: &ThingCommand) -> StrategyResult {
    StrategyResult::error(
        ThingError::AttributesNotAccessible {
            thing_id: command.thing_id.clone(),
        },
        command,
    )
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::super::test_fixtures::*;
    use super::*;
    use crate::pointer::JsonPointer;

    fn ptr(p: &str) -> JsonPointer {
        JsonPointer::parse(p).expect("valid pointer")
    }

    #[test]
    fn modify_attributes_on_thing_without_attributes_creates() {
        let mut thing = live_thing("a");
        thing.attributes = None;
        let attributes: Map<String, Value> =
            json!({"color": "red"}).as_object().cloned().expect("object");
        let cmd = command(
            "a",
            CommandPayload::ModifyAttributes {
                attributes: attributes.clone(),
            },
        );
        let result = run_created(&thing, &cmd);
        assert_eq!(
            result.event.expect("persists").payload,
            ThingEventPayload::AttributesCreated { attributes }
        );
        assert_eq!(result.response.expect("ok").status, 201);
    }

    #[test]
    fn modify_attributes_on_existing_attributes_modifies() {
        let thing = live_thing("a");
        let cmd = command(
            "a",
            CommandPayload::ModifyAttributes {
                attributes: Map::new(),
            },
        );
        let result = run_created(&thing, &cmd);
        assert!(matches!(
            result.event.expect("persists").payload,
            ThingEventPayload::AttributesModified { .. }
        ));
        assert_eq!(result.response.expect("ok").status, 204);
    }

    #[test]
    fn retrieve_missing_attributes_is_not_accessible() {
        let mut thing = live_thing("a");
        thing.attributes = None;
        let result = run_created(&thing, &command("a", CommandPayload::RetrieveAttributes));
        assert!(matches!(
            error_of(&result),
            ThingError::AttributesNotAccessible { .. }
        ));
    }

    #[test]
    fn delete_attributes_persists_when_present() {
        let thing = live_thing("a");
        let result = run_created(&thing, &command("a", CommandPayload::DeleteAttributes));
        assert_eq!(
            result.event.expect("persists").payload,
            ThingEventPayload::AttributesDeleted
        );
    }

    #[test]
    fn modify_attribute_distinguishes_created_and_modified() {
        let thing = live_thing("a");

        let existing = command(
            "a",
            CommandPayload::ModifyAttribute {
                pointer: ptr("/location"),
                value: json!("hall"),
            },
        );
        let result = run_created(&thing, &existing);
        assert!(matches!(
            result.event.expect("persists").payload,
            ThingEventPayload::AttributeModified { .. }
        ));

        let fresh = command(
            "a",
            CommandPayload::ModifyAttribute {
                pointer: ptr("/owner/name"),
                value: json!("ada"),
            },
        );
        let result = run_created(&thing, &fresh);
        assert!(matches!(
            result.event.expect("persists").payload,
            ThingEventPayload::AttributeCreated { .. }
        ));
        let response = result.response.expect("ok");
        assert_eq!(response.status, 201);
        assert_eq!(response.payload, Some(json!("ada")));
    }

    #[test]
    fn retrieve_attribute_returns_value() {
        let thing = live_thing("a");
        let cmd = command(
            "a",
            CommandPayload::RetrieveAttribute {
                pointer: ptr("location"),
            },
        );
        let response = run_created(&thing, &cmd).response.expect("ok");
        assert_eq!(response.payload, Some(json!("kitchen")));
    }

    #[test]
    fn delete_missing_attribute_is_not_accessible() {
        let thing = live_thing("a");
        let cmd = command(
            "a",
            CommandPayload::DeleteAttribute {
                pointer: ptr("/nope"),
            },
        );
        let result = run_created(&thing, &cmd);
        assert!(result.event.is_none());
        assert_eq!(error_of(&result).error_code(), "things:attribute.notfound");
    }
}
