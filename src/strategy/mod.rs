//! Command strategy table.
//!
//! A strategy is a pure function from `(context, current thing, next
//! revision, command)` to a [`StrategyResult`]: at most one event to
//! persist, the reply, and an optional lifecycle transition. Strategies
//! never mutate the thing, never touch the journal, and never read the
//! clock, so replaying their events reproduces the same state.
//!
//! [`CommandStrategies`] groups strategies into two sets keyed by command
//! type: the [`StrategySet::Creation`] set consulted while no live thing
//! exists, and the [`StrategySet::Created`] set consulted while it does.
//! A missing entry means "not defined here"; what happens next is the
//! actor's decision.

mod attributes;
mod features;
mod thing;

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::command::{CommandResponse, ThingCommand, command_types};
use crate::error::{ErrorResponse, ThingError};
use crate::event::{ThingEvent, ThingEventPayload};
use crate::model::{Thing, ThingId};

/// Signature shared by every command strategy.
///
/// # Arguments
///
/// * `ctx` - Thing ID, log span, and transition requests.
/// * `thing` - Current state, `None` if the thing was never created.
/// * `next_revision` - Revision the produced event must carry.
/// * `command` - The command being processed.
pub type CommandStrategy =
    fn(&StrategyContext, Option<&Thing>, u64, &ThingCommand) -> StrategyResult;

/// Lifecycle transition a strategy asks the actor to perform after its
/// event was durably appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecomeCreated,
    BecomeDeleted,
}

/// Inputs a strategy may use besides the thing and the command.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub thing_id: ThingId,
    /// Span of the command being processed; strategies log under it.
    pub span: tracing::Span,
}

impl StrategyContext {
    pub fn new(thing_id: ThingId, span: tracing::Span) -> Self {
        Self { thing_id, span }
    }

    /// Request the transition into the created state.
    pub fn become_created(&self) -> Transition {
        Transition::BecomeCreated
    }

    /// Request the transition into the deleted state.
    pub fn become_deleted(&self) -> Transition {
        Transition::BecomeDeleted
    }
}

/// Outcome of one strategy invocation.
#[derive(Debug, Clone)]
pub struct StrategyResult {
    /// Event to persist before replying. `None` replies immediately.
    pub event: Option<ThingEvent>,
    pub response: Result<CommandResponse, ErrorResponse>,
    /// Applied only after `event` was persisted.
    pub transition: Option<Transition>,
}

impl StrategyResult {
    /// Reply without persisting anything.
    pub fn reply(response: CommandResponse) -> Self {
        Self {
            event: None,
            response: Ok(response),
            transition: None,
        }
    }

    /// Persist `event`, then reply with `response`.
    pub fn persist(event: ThingEvent, response: CommandResponse) -> Self {
        Self {
            event: Some(event),
            response: Ok(response),
            transition: None,
        }
    }

    /// Request a lifecycle transition after the persist.
    pub fn and_then(mut self, transition: Transition) -> Self {
        self.transition = Some(transition);
        self
    }

    /// Reject the command with a domain error and the command's headers.
    pub fn error(error: ThingError, command: &ThingCommand) -> Self {
        Self {
            event: None,
            response: Err(ErrorResponse::new(error, command.headers.clone())),
            transition: None,
        }
    }

    /// The registered strategy received a command of another kind.
    pub(crate) fn unsupported(command: &ThingCommand) -> Self {
        Self::error(
            ThingError::CommandNotSupported {
                command_type: command.command_type().to_owned(),
            },
            command,
        )
    }

    /// The command targets a thing that does not exist.
    pub(crate) fn not_accessible(command: &ThingCommand) -> Self {
        Self::error(
            ThingError::NotAccessible {
                thing_id: command.thing_id.clone(),
            },
            command,
        )
    }
}

/// Build the event a command produces, inheriting its headers.
pub(crate) fn event_for(
    command: &ThingCommand,
    next_revision: u64,
    payload: ThingEventPayload,
) -> ThingEvent {
    ThingEvent::new(
        command.thing_id.clone(),
        next_revision,
        command.headers.clone(),
        payload,
    )
}

/// Which strategy set applies to the current lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategySet {
    /// No live thing: not yet recovered, never created, or deleted.
    Creation,
    /// A live thing exists.
    Created,
}

/// Registry of strategies keyed by `(set, command type)`.
pub struct CommandStrategies {
    creation: HashMap<&'static str, CommandStrategy>,
    created: HashMap<&'static str, CommandStrategy>,
}

static STANDARD: LazyLock<CommandStrategies> = LazyLock::new(CommandStrategies::build_standard);

impl CommandStrategies {
    /// The built-in strategy table for things.
    pub fn standard() -> &'static CommandStrategies {
        &STANDARD
    }

    fn build_standard() -> Self {
        use command_types::*;

        let mut creation: HashMap<&'static str, CommandStrategy> = HashMap::new();
        creation.insert(CREATE_THING, thing::create_thing);

        let mut created: HashMap<&'static str, CommandStrategy> = HashMap::new();
        created.insert(CREATE_THING, thing::create_thing_conflict);
        created.insert(MODIFY_THING, thing::modify_thing);
        created.insert(RETRIEVE_THING, thing::retrieve_thing);
        created.insert(DELETE_THING, thing::delete_thing);

        created.insert(MODIFY_ATTRIBUTES, attributes::modify_attributes);
        created.insert(RETRIEVE_ATTRIBUTES, attributes::retrieve_attributes);
        created.insert(DELETE_ATTRIBUTES, attributes::delete_attributes);
        created.insert(MODIFY_ATTRIBUTE, attributes::modify_attribute);
        created.insert(RETRIEVE_ATTRIBUTE, attributes::retrieve_attribute);
        created.insert(DELETE_ATTRIBUTE, attributes::delete_attribute);

        created.insert(MODIFY_FEATURES, features::modify_features);
        created.insert(RETRIEVE_FEATURES, features::retrieve_features);
        created.insert(DELETE_FEATURES, features::delete_features);
        created.insert(MODIFY_FEATURE, features::modify_feature);
        created.insert(RETRIEVE_FEATURE, features::retrieve_feature);
        created.insert(DELETE_FEATURE, features::delete_feature);
        created.insert(MODIFY_FEATURE_PROPERTY, features::modify_feature_property);
        created.insert(RETRIEVE_FEATURE_PROPERTY, features::retrieve_feature_property);
        created.insert(DELETE_FEATURE_PROPERTY, features::delete_feature_property);

        Self { creation, created }
    }

    /// Find the strategy for `command_type` in `set`.
    ///
    /// # Returns
    ///
    /// `None` when the command is not defined for that set.
    pub fn lookup(&self, set: StrategySet, command_type: &str) -> Option<CommandStrategy> {
        let table = match set {
            StrategySet::Creation => &self.creation,
            StrategySet::Created => &self.created,
        };
        table.get(command_type).copied()
    }

    /// Whether `command_type` has a strategy in `set`.
    pub fn is_defined(&self, set: StrategySet, command_type: &str) -> bool {
        self.lookup(set, command_type).is_some()
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use crate::command::CommandPayload;
    use crate::model::test_fixtures::{sample_thing, thing_id};

    pub(crate) fn ctx(name: &str) -> StrategyContext {
        StrategyContext::new(thing_id(name), tracing::Span::none())
    }

    pub(crate) fn command(name: &str, payload: CommandPayload) -> ThingCommand {
        ThingCommand::new(thing_id(name), payload)
    }

    /// Run the standard `Created` strategy for `cmd` against `thing`.
    pub(crate) fn run_created(thing: &Thing, cmd: &ThingCommand) -> StrategyResult {
        let strategy = CommandStrategies::standard()
            .lookup(StrategySet::Created, cmd.command_type())
            .expect("strategy is registered");
        strategy(
            &ctx(cmd.thing_id.name()),
            Some(thing),
            thing.revision + 1,
            cmd,
        )
    }

    /// A live thing at revision 1 as produced by a create.
    pub(crate) fn live_thing(name: &str) -> Thing {
        let mut thing = sample_thing(name);
        thing.lifecycle = Some(crate::model::Lifecycle::Active);
        thing.revision = 1;
        thing
    }

    pub(crate) fn error_of(result: &StrategyResult) -> &ThingError {
        &result
            .response
            .as_ref()
            .expect_err("strategy should reject")
            .error
    }
}
