//! Event-sourced persistence runtime for digital twins ("things").
//!
//! Every thing is owned by one actor that validates commands against its
//! current state, appends the resulting events to a journal, folds them into
//! the in-memory thing, publishes them, snapshots periodically, and asks to
//! be passivated when idle. [`ThingSupervisorBuilder`] wires the adapters
//! together and hands out [`ThingHandle`]s.

mod activity;
pub use activity::{ActivityDecision, CheckForActivity, decide};
mod actor;
pub use actor::{ActorDeps, ActorState, ActorStats, ThingHandle, spawn_thing_actor};
mod apply;
pub use apply::apply_event;
mod command;
mod config;
mod error;
mod event;
mod journal;
mod model;
mod pointer;
mod publish;
mod snapshot;
mod storage;
mod strategy;
mod supervisor;

pub use command::{
    COMMAND_TYPE_PREFIX, CommandPayload, CommandResponse, Headers, RESPONSE_TYPE_PREFIX,
    ThingCommand, command_types,
};
pub use config::ThingConfig;
pub use error::{
    AskError, ConfigError, ErrorResponse, JournalError, RecoveryError, SnapshotError, ThingError,
    ValidationError,
};
pub use event::{EVENT_TYPE_PREFIX, THING_EVENT_TOPIC, ThingEvent, ThingEventPayload, event_types};
pub use journal::{InMemoryJournal, Journal};
pub use model::{Feature, Features, Lifecycle, SchemaVersion, Thing, ThingId, validate_feature_id};
pub use pointer::JsonPointer;
pub use publish::{BroadcastPublisher, DEFAULT_PUBLISH_CAPACITY, EventPublisher, Publication};
pub use snapshot::{
    FileSnapshotStore, InMemorySnapshotStore, Snapshot, SnapshotManager, SnapshotStore,
    SnapshotTag,
};
pub use storage::FileJournal;
pub use strategy::{
    CommandStrategies, CommandStrategy, StrategyContext, StrategyResult, StrategySet, Transition,
};
pub use supervisor::{
    SupervisorEvent, SupervisorLink, SupervisorSignal, ThingSupervisor, ThingSupervisorBuilder,
};
