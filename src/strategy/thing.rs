//! Strategies for whole-thing commands.

use crate::command::{CommandPayload, CommandResponse, ThingCommand};
use crate::error::ThingError;
use crate::event::ThingEventPayload;
use crate::model::{Lifecycle, SchemaVersion, Thing, validate_feature_id};

use super::{StrategyContext, StrategyResult, event_for};

/// Reject a thing payload that names another thing or carries invalid
/// feature IDs.
fn validate_payload(command: &ThingCommand, payload: &Thing) -> Result<(), ThingError> {
    if payload.thing_id != command.thing_id {
        return Err(ThingError::IdMismatch {
            expected: command.thing_id.clone(),
            found: payload.thing_id.clone(),
        });
    }
    for feature_id in payload.features.iter().flat_map(|f| f.keys()) {
        validate_feature_id(feature_id).map_err(|e| ThingError::InvalidCommand {
            thing_id: command.thing_id.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// Create the thing, or resurrect a deleted one at the next revision.
pub(super) fn create_thing(
    ctx: &StrategyContext,
    _thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::CreateThing { thing: payload } = &command.payload else {
        return StrategyResult::unsupported(command);
    };
    if let Err(error) = validate_payload(command, payload) {
        tracing::debug!(parent: &ctx.span, %error, "rejecting thing creation");
        return StrategyResult::error(error, command);
    }

    let created = Thing {
        lifecycle: Some(Lifecycle::Active),
        revision: next_revision,
        modified: None,
        schema_version: command
            .headers
            .schema_version
            .unwrap_or(SchemaVersion::LATEST),
        ..payload.clone()
    };
    let response = CommandResponse::created(command, created.to_json());
    let event = event_for(
        command,
        next_revision,
        ThingEventPayload::ThingCreated { thing: created },
    );
    StrategyResult::persist(event, response).and_then(ctx.become_created())
}

/// A create against a live thing is a conflict.
pub(super) fn create_thing_conflict(
    ctx: &StrategyContext,
    _thing: Option<&Thing>,
    _next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    tracing::debug!(parent: &ctx.span, "thing already exists");
    StrategyResult::error(
        ThingError::Conflict {
            thing_id: ctx.thing_id.clone(),
        },
        command,
    )
}

/// Replace the thing's payload, keeping its lifecycle and, if the
/// replacement has none, its policy.
pub(super) fn modify_thing(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    let CommandPayload::ModifyThing { thing: payload } = &command.payload else {
        return StrategyResult::unsupported(command);
    };
    let Some(current) = thing else {
        return StrategyResult::not_accessible(command);
    };
    if let Err(error) = validate_payload(command, payload) {
        return StrategyResult::error(error, command);
    }

    let replacement = Thing {
        policy_id: payload
            .policy_id
            .clone()
            .or_else(|| current.policy_id.clone()),
        lifecycle: current.lifecycle.clone(),
        revision: next_revision,
        modified: None,
        schema_version: current.schema_version,
        ..payload.clone()
    };
    let event = event_for(
        command,
        next_revision,
        ThingEventPayload::ThingModified { thing: replacement },
    );
    StrategyResult::persist(event, CommandResponse::no_content(command))
}

pub(super) fn retrieve_thing(
    _ctx: &StrategyContext,
    thing: Option<&Thing>,
    _next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    if !matches!(command.payload, CommandPayload::RetrieveThing) {
        return StrategyResult::unsupported(command);
    }
    match thing {
        Some(thing) => StrategyResult::reply(CommandResponse::ok(command, thing.to_json())),
        None => StrategyResult::not_accessible(command),
    }
}

/// Mark the thing deleted. The thing stays in memory with lifecycle
/// `DELETED` until passivation.
pub(super) fn delete_thing(
    ctx: &StrategyContext,
    thing: Option<&Thing>,
    next_revision: u64,
    command: &ThingCommand,
) -> StrategyResult {
    if !matches!(command.payload, CommandPayload::DeleteThing) {
        return StrategyResult::unsupported(command);
    }
    if thing.is_none() {
        return StrategyResult::not_accessible(command);
    }
    let event = event_for(command, next_revision, ThingEventPayload::ThingDeleted);
    StrategyResult::persist(event, CommandResponse::no_content(command))
        .and_then(ctx.become_deleted())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::Transition;
    use super::super::test_fixtures::*;
    use super::*;
    use crate::command::Headers;
    use crate::model::test_fixtures::{sample_thing, thing_id};

    #[test]
    fn create_produces_active_thing_at_next_revision() {
        let cmd = command(
            "a",
            CommandPayload::CreateThing {
                thing: sample_thing("a"),
            },
        );
        let result = create_thing(&ctx("a"), None, 1, &cmd);

        let event = result.event.expect("create persists an event");
        assert_eq!(event.revision, 1);
        assert_eq!(event.timestamp, None);
        let ThingEventPayload::ThingCreated { thing } = &event.payload else {
            panic!("expected ThingCreated, got {:?}", event.payload);
        };
        assert_eq!(thing.lifecycle, Some(Lifecycle::Active));
        assert_eq!(thing.revision, 1);

        let response = result.response.expect("create succeeds");
        assert_eq!(response.status, 201);
        assert_eq!(response.payload.as_ref().map(|p| &p["revision"]), Some(&json!(1)));
        assert_eq!(result.transition, Some(Transition::BecomeCreated));
    }

    #[test]
    fn create_uses_schema_version_from_headers() {
        let cmd = command(
            "a",
            CommandPayload::CreateThing {
                thing: sample_thing("a"),
            },
        )
        .with_headers(Headers::default().with_schema_version(SchemaVersion::V_1));
        let result = create_thing(&ctx("a"), None, 1, &cmd);
        let Some(event) = result.event else {
            panic!("expected an event");
        };
        let ThingEventPayload::ThingCreated { thing } = event.payload else {
            panic!("expected ThingCreated");
        };
        assert_eq!(thing.schema_version, SchemaVersion::V_1);
    }

    #[test]
    fn create_rejects_foreign_thing_id() {
        let cmd = ThingCommand::new(
            thing_id("a"),
            CommandPayload::CreateThing {
                thing: sample_thing("b"),
            },
        );
        let result = create_thing(&ctx("a"), None, 1, &cmd);
        assert!(result.event.is_none());
        assert!(result.transition.is_none());
        assert!(matches!(error_of(&result), ThingError::IdMismatch { .. }));
    }

    #[test]
    fn create_rejects_invalid_feature_id() {
        let mut payload = sample_thing("a");
        payload
            .features
            .get_or_insert_with(Default::default)
            .insert("bad/id".to_owned(), Default::default());
        let cmd = command("a", CommandPayload::CreateThing { thing: payload });
        let result = create_thing(&ctx("a"), None, 1, &cmd);
        assert!(matches!(
            error_of(&result),
            ThingError::InvalidCommand { .. }
        ));
    }

    #[test]
    fn create_on_live_thing_conflicts() {
        let thing = live_thing("a");
        let cmd = command(
            "a",
            CommandPayload::CreateThing {
                thing: sample_thing("a"),
            },
        );
        let result = run_created(&thing, &cmd);
        assert!(result.event.is_none());
        assert_eq!(error_of(&result).status(), 409);
    }

    #[test]
    fn modify_keeps_lifecycle_and_policy() {
        let thing = live_thing("a");
        let mut replacement = Thing::new(thing_id("a"));
        replacement.attributes = json!({"new": true}).as_object().cloned();
        let cmd = command(
            "a",
            CommandPayload::ModifyThing {
                thing: replacement,
            },
        );
        let result = run_created(&thing, &cmd);
        let event = result.event.expect("modify persists");
        let ThingEventPayload::ThingModified { thing: modified } = event.payload else {
            panic!("expected ThingModified");
        };
        assert_eq!(modified.lifecycle, Some(Lifecycle::Active));
        assert_eq!(modified.policy_id, thing.policy_id);
        assert_eq!(modified.revision, 2);
        assert_eq!(result.response.expect("ok").status, 204);
    }

    #[test]
    fn retrieve_returns_current_thing_without_event() {
        let thing = live_thing("a");
        let cmd = command("a", CommandPayload::RetrieveThing);
        let result = run_created(&thing, &cmd);
        assert!(result.event.is_none());
        let response = result.response.expect("retrieve succeeds");
        assert_eq!(response.status, 200);
        assert_eq!(response.payload, Some(thing.to_json()));
    }

    #[test]
    fn delete_requests_become_deleted() {
        let thing = live_thing("a");
        let cmd = command("a", CommandPayload::DeleteThing);
        let result = run_created(&thing, &cmd);
        let event = result.event.expect("delete persists");
        assert_eq!(event.payload, ThingEventPayload::ThingDeleted);
        assert_eq!(event.revision, 2);
        assert_eq!(result.transition, Some(Transition::BecomeDeleted));
    }

    #[test]
    fn strategies_leave_input_untouched() {
        let thing = live_thing("a");
        let before = thing.clone();
        let _ = run_created(&thing, &command("a", CommandPayload::DeleteThing));
        assert_eq!(thing, before);
    }
}
