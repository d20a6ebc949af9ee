//! Actor loop that owns one thing and processes its commands.
//!
//! Each actor is a `tokio` task reading from a bounded `mpsc` mailbox. It
//! exclusively owns the thing state, its revision, and the snapshot and
//! activity bookkeeping; nothing else mutates them. Commands are handled
//! one at a time: the journal append of one command completes, and its
//! event is applied, before the next message is dequeued.
//!
//! Public API: [`ThingHandle`] (cloneable async handle) and
//! [`spawn_thing_actor`] (validates config, starts the task).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use crate::activity::{ActivityDecision, ActivityTimer, CheckForActivity, decide};
use crate::apply::apply_event;
use crate::command::{CommandResponse, ThingCommand};
use crate::config::ThingConfig;
use crate::error::{
    AskError, ConfigError, ErrorResponse, JournalError, RecoveryError, SnapshotError, ThingError,
};
use crate::event::{THING_EVENT_TOPIC, ThingEvent, ThingEventPayload, now_millis};
use crate::journal::Journal;
use crate::model::{Lifecycle, Thing, ThingId};
use crate::publish::EventPublisher;
use crate::snapshot::{SnapshotManager, SnapshotStore};
use crate::strategy::{CommandStrategies, StrategyContext, StrategySet, Transition};
use crate::supervisor::SupervisorLink;

/// Result type sent back through the command reply channel.
pub(crate) type CommandReply = Result<CommandResponse, ErrorResponse>;

/// Lifecycle state of a thing actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    /// Spawned, recovery not started.
    Uninitialized,
    /// Loading the snapshot and replaying the journal.
    Recovering,
    /// The thing is active; every command is served.
    Created,
    /// No live thing; only creation is served.
    Deleted,
    /// The loop has exited.
    Stopped,
}

/// Point-in-time view of an actor, for introspection and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorStats {
    pub state: ActorState,
    pub revision: u64,
    pub last_snapshot_revision: u64,
    pub access_counter: u64,
    pub lifecycle: Option<Lifecycle>,
}

/// Messages sent from [`ThingHandle`] to the actor loop.
pub(crate) enum ActorMessage {
    /// Process a command and reply on `reply`. Dropping `reply` without
    /// sending means the command was unhandled.
    Command {
        command: ThingCommand,
        reply: oneshot::Sender<CommandReply>,
    },

    /// Report [`ActorStats`]. Does not count as an access.
    Stats { reply: oneshot::Sender<ActorStats> },

    /// Exit the loop after the messages queued before it.
    Stop,
}

/// Collaborators an actor talks to.
#[derive(Clone)]
pub struct ActorDeps {
    pub journal: Arc<dyn Journal>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub supervisor: Arc<dyn SupervisorLink>,
}

/// Completion report of a background snapshot save.
struct SnapshotOutcome {
    revision: u64,
    result: Result<(), SnapshotError>,
}

/// What recovery rebuilt.
struct Recovered {
    thing: Option<Thing>,
    revision: u64,
    snapshot_revision: u64,
    replayed: usize,
}

/// Load the latest snapshot, then replay the journal tail after it.
///
/// # Errors
///
/// * [`RecoveryError::Snapshot`] / [`RecoveryError::Journal`] -- a store failed.
/// * [`RecoveryError::OutOfOrder`] -- the journal tail has a gap or is unordered.
/// * [`RecoveryError::TimedOut`] -- `timeout` elapsed first.
async fn recover(
    journal: Arc<dyn Journal>,
    snapshots: Arc<dyn SnapshotStore>,
    thing_id: ThingId,
    timeout: Duration,
) -> Result<Recovered, RecoveryError> {
    let replay = async {
        let (mut thing, mut revision) = match snapshots.load_latest(&thing_id).await? {
            Some(snapshot) => (Some(snapshot.thing), snapshot.revision),
            None => (None, 0),
        };
        let snapshot_revision = revision;

        let events = journal.load_events(&thing_id, revision + 1).await?;
        for event in &events {
            if event.revision != revision + 1 {
                return Err(RecoveryError::OutOfOrder {
                    expected: revision + 1,
                    found: event.revision,
                });
            }
            thing = apply_event(event, thing, event.revision);
            revision = event.revision;
        }

        Ok::<_, RecoveryError>(Recovered {
            thing,
            revision,
            snapshot_revision,
            replayed: events.len(),
        })
    };
    tokio::time::timeout(timeout, replay)
        .await
        .map_err(|_| RecoveryError::TimedOut(timeout))?
}

/// The actor's owned state. Lives on the actor task only.
struct ThingActor {
    thing_id: ThingId,
    config: ThingConfig,
    deps: ActorDeps,
    state: ActorState,
    thing: Option<Thing>,
    revision: u64,
    snapshots: SnapshotManager,
    access_counter: u64,
    passivation_requested: bool,
    activity: ActivityTimer,
    snapshot_tx: mpsc::UnboundedSender<SnapshotOutcome>,
    snapshot_rx: mpsc::UnboundedReceiver<SnapshotOutcome>,
}

impl ThingActor {
    fn new(thing_id: ThingId, config: ThingConfig, deps: ActorDeps) -> Self {
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let threshold = config.threshold();
        Self {
            thing_id,
            config,
            deps,
            state: ActorState::Uninitialized,
            thing: None,
            revision: 0,
            snapshots: SnapshotManager::new(threshold, 0),
            access_counter: 0,
            passivation_requested: false,
            activity: ActivityTimer::default(),
            snapshot_tx,
            snapshot_rx,
        }
    }

    /// Recover, then serve messages until stopped.
    async fn run(mut self, mut rx: mpsc::Receiver<ActorMessage>) {
        let Some(buffered) = self.recover_serving(&mut rx).await else {
            self.state = ActorState::Stopped;
            return;
        };
        for (command, reply) in buffered {
            if self.state == ActorState::Stopped {
                self.reply_not_accessible(&command, reply);
            } else {
                self.handle_command(command, reply).await;
            }
        }

        let period = self.config.snapshot_interval;
        let mut snapshot_timer = tokio::time::interval_at(Instant::now() + period, period);
        snapshot_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.state != ActorState::Stopped {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(ActorMessage::Command { command, reply }) => {
                        self.handle_command(command, reply).await;
                    }
                    Some(ActorMessage::Stats { reply }) => {
                        let _ = reply.send(self.stats());
                    }
                    // Stop requested or every handle dropped.
                    Some(ActorMessage::Stop) | None => break,
                },
                _ = snapshot_timer.tick() => self.take_snapshot("interval"),
                check = self.activity.fired() => self.check_activity(check),
                Some(outcome) = self.snapshot_rx.recv() => self.snapshot_completed(outcome),
            }
        }

        self.state = ActorState::Stopped;
        tracing::info!(revision = self.revision, "thing actor stopped");
    }

    /// Run recovery while answering the mailbox.
    ///
    /// Creation commands are buffered and returned for processing once
    /// recovery finished; anything else is answered not-accessible.
    ///
    /// # Returns
    ///
    /// The buffered creation commands, or `None` if the actor must exit.
    async fn recover_serving(
        &mut self,
        rx: &mut mpsc::Receiver<ActorMessage>,
    ) -> Option<Vec<(ThingCommand, oneshot::Sender<CommandReply>)>> {
        self.state = ActorState::Recovering;
        let recovery = recover(
            self.deps.journal.clone(),
            self.deps.snapshots.clone(),
            self.thing_id.clone(),
            self.config.recovery_timeout,
        );
        tokio::pin!(recovery);

        let mut buffered = Vec::new();
        let outcome = loop {
            tokio::select! {
                result = &mut recovery => break result,
                msg = rx.recv() => match msg {
                    Some(ActorMessage::Command { command, reply }) => {
                        self.log_incoming(&command);
                        if command.is_creation() && command.thing_id == self.thing_id {
                            buffered.push((command, reply));
                        } else {
                            tracing::debug!(
                                command_type = command.command_type(),
                                "command received during recovery"
                            );
                            self.reply_not_accessible(&command, reply);
                            self.schedule_activity_check();
                        }
                    }
                    Some(ActorMessage::Stats { reply }) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(ActorMessage::Stop) | None => return None,
                },
            }
        };

        match outcome {
            Ok(recovered) => {
                self.finish_recovery(recovered);
                Some(buffered)
            }
            Err(error) => {
                // Fatal to this instance only; the supervisor starts a fresh one.
                tracing::error!(%error, "recovery failed");
                None
            }
        }
    }

    fn finish_recovery(&mut self, recovered: Recovered) {
        tracing::debug!(
            revision = recovered.revision,
            snapshot_revision = recovered.snapshot_revision,
            replayed = recovered.replayed,
            "recovery completed"
        );
        self.thing = recovered.thing;
        self.revision = recovered.revision;
        self.snapshots = SnapshotManager::new(self.config.threshold(), recovered.snapshot_revision);

        if let Some(thing) = self.thing.as_mut()
            && thing.lifecycle.is_none()
        {
            thing.lifecycle = Some(Lifecycle::Active);
        }

        match self.thing.as_ref().and_then(|t| t.lifecycle.clone()) {
            Some(Lifecycle::Active) => self.become_state(ActorState::Created),
            Some(Lifecycle::Deleted) | None => self.become_state(ActorState::Deleted),
            Some(Lifecycle::Unknown(lifecycle)) => {
                tracing::error!(
                    %lifecycle,
                    "unknown lifecycle after recovery, treating thing as deleted"
                );
                self.become_state(ActorState::Deleted);
            }
        }
    }

    /// Switch to `Created` or `Deleted` and tell the supervisor.
    fn become_state(&mut self, state: ActorState) {
        tracing::debug!(from = ?self.state, to = ?state, "lifecycle transition");
        self.state = state;
        self.deps.supervisor.notify_initialized(&self.thing_id);
        self.deps.supervisor.manual_reset(&self.thing_id);
        self.schedule_activity_check();
    }

    fn activity_interval(&self) -> Duration {
        match self.state {
            ActorState::Deleted => self.config.activity_check_deleted_interval,
            _ => self.config.activity_check_interval,
        }
    }

    fn schedule_activity_check(&mut self) {
        let check = CheckForActivity {
            revision: self.revision,
            access_counter: self.access_counter,
        };
        self.activity.schedule(self.activity_interval(), check);
    }

    fn log_incoming(&self, command: &ThingCommand) {
        if !self.config.log_incoming_messages {
            return;
        }
        tracing::debug!(
            command_type = command.command_type(),
            correlation_id = command.headers.correlation_id.as_deref(),
            "incoming command"
        );
        if command.thing_id != self.thing_id {
            tracing::warn!(
                addressed = %command.thing_id,
                "command addressed to another thing"
            );
        }
    }

    async fn handle_command(
        &mut self,
        command: ThingCommand,
        reply: oneshot::Sender<CommandReply>,
    ) {
        let span = tracing::info_span!(
            "command",
            thing_id = %self.thing_id,
            command_type = command.command_type(),
            correlation_id = command.headers.correlation_id.as_deref()
        );
        self.process(command, reply, span.clone())
            .instrument(span)
            .await;
    }

    async fn process(
        &mut self,
        command: ThingCommand,
        reply: oneshot::Sender<CommandReply>,
        span: tracing::Span,
    ) {
        self.log_incoming(&command);

        let set = match self.state {
            ActorState::Created => StrategySet::Created,
            _ => StrategySet::Creation,
        };
        let strategy = if command.thing_id == self.thing_id {
            CommandStrategies::standard().lookup(set, command.command_type())
        } else {
            None
        };
        let Some(strategy) = strategy else {
            if self.state == ActorState::Created {
                tracing::warn!(
                    addressed = %command.thing_id,
                    "unhandled command, dropping without reply"
                );
            } else {
                self.reply_not_accessible(&command, reply);
            }
            return;
        };

        let ctx = StrategyContext::new(self.thing_id.clone(), span);
        let result = strategy(&ctx, self.thing.as_ref(), self.revision + 1, &command);
        let Some(event) = result.event else {
            self.reply(reply, result.response);
            return;
        };
        let event = self.stamp(event);

        if command.is_dry_run() {
            tracing::debug!(event_type = event.event_type(), "dry run, not persisting");
            self.reply(reply, result.response);
            return;
        }

        if let Err(reason) = self.persist(&event).await {
            let error = ThingError::Unavailable {
                thing_id: self.thing_id.clone(),
                reason,
            };
            self.reply(reply, Err(ErrorResponse::new(error, command.headers)));
            return;
        }

        self.revision = event.revision;
        self.thing = apply_event(&event, self.thing.take(), event.revision);
        self.deps.publisher.publish(THING_EVENT_TOPIC, &event, true);
        match result.transition {
            Some(Transition::BecomeCreated) => self.become_state(ActorState::Created),
            Some(Transition::BecomeDeleted) => self.become_state(ActorState::Deleted),
            None => {}
        }
        self.reply(reply, result.response);

        if self.snapshots.threshold_passed(self.revision) {
            self.take_snapshot("threshold");
        }
    }

    /// Set the persistence timestamp and pin the schema version to the
    /// thing's schema.
    fn stamp(&self, event: ThingEvent) -> ThingEvent {
        let mut event = event.with_timestamp(now_millis());
        let schema_version = match &event.payload {
            ThingEventPayload::ThingCreated { thing } => Some(thing.schema_version),
            _ => self.thing.as_ref().map(|t| t.schema_version),
        };
        if schema_version.is_some() {
            event.headers.schema_version = schema_version;
        }
        event
    }

    /// Append `event` at the current revision.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason. On a journal conflict the actor
    /// also moves to `Stopped`, since another writer owns the stream. A
    /// timed-out append has an unknown outcome and stops the actor too.
    async fn persist(&mut self, event: &ThingEvent) -> Result<(), String> {
        let append = self.deps.journal.append(&self.thing_id, event, self.revision);
        match tokio::time::timeout(self.config.persist_timeout, append).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error @ JournalError::Conflict { .. })) => {
                tracing::error!(%error, "conflicting writer detected, stopping");
                self.state = ActorState::Stopped;
                Err(error.to_string())
            }
            Ok(Err(error)) => {
                tracing::error!(%error, revision = event.revision, "persisting event failed");
                Err(error.to_string())
            }
            Err(_) => {
                tracing::error!(
                    timeout = ?self.config.persist_timeout,
                    revision = event.revision,
                    "persisting event timed out, stopping"
                );
                self.state = ActorState::Stopped;
                Err("journal append timed out".to_owned())
            }
        }
    }

    fn reply(&mut self, reply: oneshot::Sender<CommandReply>, response: CommandReply) {
        self.access_counter += 1;
        // The caller may have given up waiting.
        let _ = reply.send(response);
    }

    fn reply_not_accessible(&mut self, command: &ThingCommand, reply: oneshot::Sender<CommandReply>) {
        let error = ThingError::NotAccessible {
            thing_id: command.thing_id.clone(),
        };
        self.reply(reply, Err(ErrorResponse::new(error, command.headers.clone())));
    }

    /// Start a background snapshot save if one is due.
    fn take_snapshot(&mut self, trigger: &'static str) {
        let Some(snapshot) = self.snapshots.begin(self.thing.as_ref(), self.revision) else {
            return;
        };
        tracing::debug!(trigger, revision = snapshot.revision, "taking snapshot");

        let store = self.deps.snapshots.clone();
        let outcomes = self.snapshot_tx.clone();
        let thing_id = self.thing_id.clone();
        tokio::spawn(async move {
            let result = store.save(&thing_id, &snapshot).await;
            let _ = outcomes.send(SnapshotOutcome {
                revision: snapshot.revision,
                result,
            });
        });
    }

    fn snapshot_completed(&mut self, outcome: SnapshotOutcome) {
        match outcome.result {
            Ok(()) => {
                tracing::debug!(revision = outcome.revision, "snapshot saved");
                self.snapshots.complete(outcome.revision, true);
            }
            Err(error) => {
                tracing::error!(%error, revision = outcome.revision, "saving snapshot failed");
                self.snapshots.complete(outcome.revision, false);
            }
        }
    }

    fn check_activity(&mut self, check: CheckForActivity) {
        let is_deleted = self.thing.as_ref().is_some_and(Thing::is_deleted);
        let decision = decide(
            check,
            is_deleted,
            self.snapshots.is_up_to_date(self.revision),
            self.access_counter,
        );
        match decision {
            ActivityDecision::SnapshotDeleted => {
                self.take_snapshot("deleted");
                self.schedule_activity_check();
            }
            ActivityDecision::StillActive => self.schedule_activity_check(),
            ActivityDecision::Passivate => self.request_passivation(),
        }
    }

    fn request_passivation(&mut self) {
        if self.passivation_requested {
            return;
        }
        self.passivation_requested = true;
        tracing::info!(revision = self.revision, "thing idle, requesting passivation");
        self.deps.supervisor.request_passivate(&self.thing_id);
    }

    fn stats(&self) -> ActorStats {
        ActorStats {
            state: self.state,
            revision: self.revision,
            last_snapshot_revision: self.snapshots.last_snapshot_revision(),
            access_counter: self.access_counter,
            lifecycle: self.thing.as_ref().and_then(|t| t.lifecycle.clone()),
        }
    }
}

/// Async handle to a running thing actor.
///
/// Lightweight, cloneable, and `Send + Sync`. Communicates with the actor
/// task over a bounded channel.
#[derive(Debug, Clone)]
pub struct ThingHandle {
    thing_id: ThingId,
    sender: mpsc::Sender<ActorMessage>,
    ask_timeout: Duration,
}

impl ThingHandle {
    pub fn thing_id(&self) -> &ThingId {
        &self.thing_id
    }

    /// Send a command and wait for the reply, up to the configured ask timeout.
    ///
    /// A command without correlation ID gets a fresh UUID.
    ///
    /// # Arguments
    ///
    /// * `command` - The command to process.
    ///
    /// # Returns
    ///
    /// The success response of the command.
    ///
    /// # Errors
    ///
    /// * [`AskError::Rejected`] -- the actor answered with a domain error.
    /// * [`AskError::Timeout`] -- no reply within the ask timeout.
    /// * [`AskError::NoReply`] -- the actor dropped the command as unhandled.
    /// * [`AskError::ActorGone`] -- the actor task has exited.
    pub async fn ask(&self, command: ThingCommand) -> Result<CommandResponse, AskError> {
        self.ask_with_timeout(command, self.ask_timeout).await
    }

    /// Like [`ask`](ThingHandle::ask) with a caller-supplied timeout.
    pub async fn ask_with_timeout(
        &self,
        mut command: ThingCommand,
        timeout: Duration,
    ) -> Result<CommandResponse, AskError> {
        if command.headers.correlation_id.is_none() {
            command.headers.correlation_id = Some(Uuid::new_v4().to_string());
        }
        let exchange = async {
            let (tx, rx) = oneshot::channel();
            self.sender
                .send(ActorMessage::Command { command, reply: tx })
                .await
                .map_err(|_| AskError::ActorGone)?;
            match rx.await {
                Ok(reply) => reply.map_err(AskError::Rejected),
                Err(_) if self.sender.is_closed() => Err(AskError::ActorGone),
                Err(_) => Err(AskError::NoReply),
            }
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| AskError::Timeout(timeout))?
    }

    /// Read the actor's lifecycle state and counters.
    ///
    /// # Errors
    ///
    /// Returns [`AskError::ActorGone`] if the actor task has exited.
    pub async fn stats(&self) -> Result<ActorStats, AskError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::Stats { reply: tx })
            .await
            .map_err(|_| AskError::ActorGone)?;
        rx.await.map_err(|_| AskError::ActorGone)
    }

    /// Ask the actor to exit once the messages already queued are processed.
    pub async fn stop(&self) {
        // An exited actor is already stopped.
        let _ = self.sender.send(ActorMessage::Stop).await;
    }

    /// Check whether the actor backing this handle is still running.
    ///
    /// Returns `false` once the actor task has exited (passivation, stop,
    /// recovery failure, or a journal conflict).
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Spawn an actor for `thing_id` on the current `tokio` runtime.
///
/// Recovery starts immediately in the background; commands sent before it
/// finishes are handled as described on [`ActorState::Recovering`].
///
/// # Arguments
///
/// * `thing_id` - The thing this actor owns.
/// * `config` - Timeouts, intervals, and snapshot threshold.
/// * `deps` - Journal, snapshot store, publisher, and supervisor link.
///
/// # Returns
///
/// A [`ThingHandle`] and the `JoinHandle` of the actor task.
///
/// # Errors
///
/// Returns [`ConfigError`] if `config` fails validation.
pub fn spawn_thing_actor(
    thing_id: ThingId,
    config: ThingConfig,
    deps: ActorDeps,
) -> Result<(ThingHandle, JoinHandle<()>), ConfigError> {
    config.validate()?;
    Ok(start(thing_id, config, deps))
}

/// Spawn an actor with an already validated config.
pub(crate) fn start(
    thing_id: ThingId,
    config: ThingConfig,
    deps: ActorDeps,
) -> (ThingHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.mailbox_capacity);
    let handle = ThingHandle {
        thing_id: thing_id.clone(),
        sender: tx,
        ask_timeout: config.ask_timeout,
    };
    let span = tracing::info_span!("thing_actor", thing_id = %thing_id);
    let actor = ThingActor::new(thing_id, config, deps);
    let task = tokio::spawn(actor.run(rx).instrument(span));
    (handle, task)
}
