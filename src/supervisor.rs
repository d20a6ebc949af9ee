//! Routing table of resident thing actors and the supervisor protocol.
//!
//! [`ThingSupervisor`] spawns one actor per thing ID on first use, hands out
//! cached [`ThingHandle`]s while the actor is alive, stops actors that ask
//! to be passivated, and restarts actors that exited unexpectedly after an
//! exponential backoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::actor::{self, ActorDeps, ThingHandle};
use crate::command::{CommandResponse, ThingCommand};
use crate::config::ThingConfig;
use crate::error::{AskError, ConfigError};
use crate::journal::{InMemoryJournal, Journal};
use crate::model::ThingId;
use crate::publish::{BroadcastPublisher, EventPublisher};
use crate::snapshot::{InMemorySnapshotStore, SnapshotStore};

/// Messages a thing actor sends to whoever supervises it.
///
/// Implementations must not block; they are called from the actor loop.
pub trait SupervisorLink: Send + Sync + 'static {
    /// The actor entered `Created` or `Deleted` and is serving commands.
    fn notify_initialized(&self, thing_id: &ThingId);

    /// The actor has been idle for a full activity interval and should be
    /// stopped.
    fn request_passivate(&self, thing_id: &ThingId);

    /// Reset the restart backoff kept for this thing.
    fn manual_reset(&self, thing_id: &ThingId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorSignal {
    Initialized,
    ManualReset,
    Passivate,
}

/// One supervisor protocol message, tagged with the sending thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorEvent {
    pub thing_id: ThingId,
    pub signal: SupervisorSignal,
}

impl SupervisorLink for mpsc::UnboundedSender<SupervisorEvent> {
    fn notify_initialized(&self, thing_id: &ThingId) {
        let kind = SupervisorSignal::Initialized;
        signal(self, event(thing_id, kind), thing_id, kind);
    }

    fn request_passivate(&self, thing_id: &ThingId) {
        let kind = SupervisorSignal::Passivate;
        signal(self, event(thing_id, kind), thing_id, kind);
    }

    fn manual_reset(&self, thing_id: &ThingId) {
        let kind = SupervisorSignal::ManualReset;
        signal(self, event(thing_id, kind), thing_id, kind);
    }
}

fn signal<T>(
    tx: &mpsc::UnboundedSender<T>,
    message: T,
    thing_id: &ThingId,
    signal: SupervisorSignal,
) {
    // Closed once the supervisor is gone; the actor carries on unsupervised.
    if tx.send(message).is_err() {
        tracing::trace!(thing_id = %thing_id, ?signal, "supervisor gone, signal dropped");
    }
}

fn event(thing_id: &ThingId, signal: SupervisorSignal) -> SupervisorEvent {
    SupervisorEvent {
        thing_id: thing_id.clone(),
        signal,
    }
}

/// Signal tagged with the incarnation of the actor that sent it.
type TaggedEvent = (u64, SupervisorEvent);

/// Link handed to one supervised actor.
struct IncarnationLink {
    incarnation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl IncarnationLink {
    fn send(&self, thing_id: &ThingId, kind: SupervisorSignal) {
        signal(&self.tx, (self.incarnation, event(thing_id, kind)), thing_id, kind);
    }
}

impl SupervisorLink for IncarnationLink {
    fn notify_initialized(&self, thing_id: &ThingId) {
        self.send(thing_id, SupervisorSignal::Initialized);
    }

    fn request_passivate(&self, thing_id: &ThingId) {
        self.send(thing_id, SupervisorSignal::Passivate);
    }

    fn manual_reset(&self, thing_id: &ThingId) {
        self.send(thing_id, SupervisorSignal::ManualReset);
    }
}

/// A resident actor in the routing table.
#[derive(Clone)]
struct ActorEntry {
    incarnation: u64,
    handle: ThingHandle,
    task: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
    passivated: Arc<AtomicBool>,
}

impl ActorEntry {
    fn new(incarnation: u64, handle: ThingHandle, task: JoinHandle<()>) -> Self {
        Self {
            incarnation,
            handle,
            task: Arc::new(tokio::sync::Mutex::new(Some(task))),
            passivated: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_serving(&self) -> bool {
        self.handle.is_alive() && !self.passivated.load(Ordering::SeqCst)
    }


    /// Wait until the actor task has finished. Concurrent callers all wait.
    async fn join(&self) {
        let mut task = self.task.lock().await;
        if let Some(running) = task.take()
            && let Err(e) = running.await
        {
            tracing::error!(
                thing_id = %self.handle.thing_id(),
                error = %e,
                "thing actor task failed"
            );
        }
    }
}

struct Inner {
    config: ThingConfig,
    journal: Arc<dyn Journal>,
    snapshots: Arc<dyn SnapshotStore>,
    publisher: Arc<dyn EventPublisher>,
    signals: mpsc::UnboundedSender<TaggedEvent>,
    /// Source of actor incarnation numbers.
    incarnations: AtomicU64,
    actors: RwLock<HashMap<ThingId, ActorEntry>>,
    /// Next restart delay per thing that exited unexpectedly.
    restarts: Mutex<HashMap<ThingId, Duration>>,
}

/// Owner of every resident thing actor.
///
/// `Clone` is cheap -- all internal state is `Arc`-wrapped.
#[derive(Clone)]
pub struct ThingSupervisor {
    inner: Arc<Inner>,
}

// Manual `Debug` because the adapters are trait objects.
impl std::fmt::Debug for ThingSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThingSupervisor")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ThingSupervisor {
    /// Get a handle to the actor of `thing_id`, spawning it if needed.
    ///
    /// If the actor is resident and alive, returns a clone of its handle.
    /// If the previous actor is being passivated, waits for it to stop
    /// first. If the previous actor exited on its own, the restart is
    /// delayed by the current backoff for that thing.
    ///
    /// # Arguments
    ///
    /// * `thing_id` - The thing to route to.
    ///
    /// # Returns
    ///
    /// A [`ThingHandle`] for sending commands.
    pub async fn get(&self, thing_id: &ThingId) -> ThingHandle {
        // Fast path: check the table with a read lock.
        let previous = {
            let actors = self.inner.actors.read().await;
            match actors.get(thing_id) {
                Some(entry) if entry.is_serving() => return entry.handle.clone(),
                other => other.cloned(),
            }
        };

        // Slow path: the previous actor must be gone before a new one starts.
        if let Some(previous) = previous {
            previous.join().await;
            if !previous.passivated.load(Ordering::SeqCst) {
                let delay = self.next_backoff(thing_id);
                tracing::warn!(
                    thing_id = %thing_id,
                    ?delay,
                    "thing actor stopped unexpectedly, restarting after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let mut actors = self.inner.actors.write().await;
        if let Some(entry) = actors.get(thing_id)
            && entry.is_serving()
        {
            return entry.handle.clone();
        }

        tracing::debug!(thing_id = %thing_id, "spawning thing actor");
        let incarnation = self.inner.incarnations.fetch_add(1, Ordering::SeqCst);
        let (handle, task) = actor::start(
            thing_id.clone(),
            self.inner.config.clone(),
            self.deps(incarnation),
        );
        actors.insert(thing_id.clone(), ActorEntry::new(incarnation, handle.clone(), task));
        handle
    }

    /// Route `command` to its thing's actor and wait for the reply.
    ///
    /// A command that reaches an actor which exits before processing it is
    /// retried once against a fresh actor.
    ///
    /// # Errors
    ///
    /// Returns [`AskError`] as described on [`ThingHandle::ask`].
    pub async fn ask(&self, command: ThingCommand) -> Result<CommandResponse, AskError> {
        let handle = self.get(&command.thing_id).await;
        match handle.ask(command.clone()).await {
            Err(AskError::ActorGone) => {
                tracing::debug!(thing_id = %command.thing_id, "actor gone, retrying once");
                self.get(&command.thing_id).await.ask(command).await
            }
            other => other,
        }
    }

    /// Stop the actor of `thing_id` and remove it from the routing table.
    ///
    /// Messages queued before the stop are still processed. Returns once
    /// the actor task has finished.
    ///
    /// # Returns
    ///
    /// `true` if an actor was resident.
    pub async fn passivate(&self, thing_id: &ThingId) -> bool {
        let entry = self.inner.actors.read().await.get(thing_id).cloned();
        let Some(entry) = entry else {
            return false;
        };
        self.stop_entry(thing_id, entry).await;
        true
    }

    /// Passivate on an actor's own request. A request from an actor that
    /// was already replaced is ignored.
    async fn passivate_incarnation(&self, thing_id: &ThingId, incarnation: u64) -> bool {
        let entry = self.inner.actors.read().await.get(thing_id).cloned();
        match entry {
            Some(entry) if entry.incarnation == incarnation => {
                self.stop_entry(thing_id, entry).await;
                true
            }
            _ => {
                tracing::debug!(thing_id = %thing_id, incarnation, "stale passivation request");
                false
            }
        }
    }

    async fn stop_entry(&self, thing_id: &ThingId, entry: ActorEntry) {
        entry.passivated.store(true, Ordering::SeqCst);
        entry.handle.stop().await;
        entry.join().await;

        let mut actors = self.inner.actors.write().await;
        if actors
            .get(thing_id)
            .is_some_and(|e| e.incarnation == entry.incarnation)
        {
            actors.remove(thing_id);
        }
        tracing::info!(
            thing_id = %thing_id,
            incarnation = entry.incarnation,
            "thing actor passivated"
        );
    }

    /// Number of actors currently alive in the routing table.
    pub async fn resident_count(&self) -> usize {
        let actors = self.inner.actors.read().await;
        actors.values().filter(|e| e.handle.is_alive()).count()
    }

    /// Stop every resident actor and wait for all of them to finish.
    pub async fn shutdown(&self) {
        let entries: Vec<ActorEntry> = {
            let mut actors = self.inner.actors.write().await;
            actors.drain().map(|(_, entry)| entry).collect()
        };
        let count = entries.len();
        for entry in &entries {
            entry.passivated.store(true, Ordering::SeqCst);
            entry.handle.stop().await;
        }
        for entry in &entries {
            entry.join().await;
        }
        tracing::info!(count, "supervisor shut down");
    }

    fn deps(&self, incarnation: u64) -> ActorDeps {
        ActorDeps {
            journal: self.inner.journal.clone(),
            snapshots: self.inner.snapshots.clone(),
            publisher: self.inner.publisher.clone(),
            supervisor: Arc::new(IncarnationLink {
                incarnation,
                tx: self.inner.signals.clone(),
            }),
        }
    }

    /// Current restart delay for `thing_id`; doubles the stored delay up to
    /// the configured maximum.
    fn next_backoff(&self, thing_id: &ThingId) -> Duration {
        let config = &self.inner.config;
        let mut restarts = self
            .inner
            .restarts
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let delay = restarts
            .entry(thing_id.clone())
            .or_insert(config.restart_min_backoff);
        let current = *delay;
        *delay = (*delay * 2).min(config.restart_max_backoff);
        current
    }

    fn reset_backoff(&self, thing_id: &ThingId) {
        self.inner
            .restarts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(thing_id);
    }
}

/// Handle supervisor protocol messages until the supervisor is dropped.
async fn run_signal_loop(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<TaggedEvent>) {
    while let Some((incarnation, event)) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let supervisor = ThingSupervisor { inner };
        match event.signal {
            SupervisorSignal::Initialized => {
                tracing::debug!(thing_id = %event.thing_id, "thing actor initialized");
            }
            SupervisorSignal::ManualReset => supervisor.reset_backoff(&event.thing_id),
            SupervisorSignal::Passivate => {
                // Off the signal loop: passivation waits for the actor to finish.
                tokio::spawn(async move {
                    supervisor
                        .passivate_incarnation(&event.thing_id, incarnation)
                        .await;
                });
            }
        }
    }
    tracing::debug!("supervisor signal loop stopped");
}

/// Builder for configuring a [`ThingSupervisor`].
///
/// Every adapter defaults to its in-memory implementation.
///
/// # Examples
///
/// ```no_run
/// use thing_persistence::{FileJournal, FileSnapshotStore, ThingConfig, ThingSupervisorBuilder};
///
/// # async fn example() -> Result<(), thing_persistence::ConfigError> {
/// let supervisor = ThingSupervisorBuilder::new()
///     .journal(FileJournal::new("/var/lib/things"))
///     .snapshot_store(FileSnapshotStore::new("/var/lib/things"))
///     .config(ThingConfig::default())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ThingSupervisorBuilder {
    journal: Option<Arc<dyn Journal>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    config: ThingConfig,
}

impl ThingSupervisorBuilder {
    pub fn new() -> Self {
        Self {
            journal: None,
            snapshots: None,
            publisher: None,
            config: ThingConfig::default(),
        }
    }

    /// Set the journal every actor appends to and replays from.
    pub fn journal(mut self, journal: impl Journal) -> Self {
        self.journal = Some(Arc::new(journal));
        self
    }

    /// Set the store for snapshots.
    pub fn snapshot_store(mut self, store: impl SnapshotStore) -> Self {
        self.snapshots = Some(Arc::new(store));
        self
    }

    /// Set the bus applied events are published to.
    ///
    /// Pass a clone of a [`BroadcastPublisher`] to keep a handle for
    /// subscribing.
    pub fn publisher(mut self, publisher: impl EventPublisher) -> Self {
        self.publisher = Some(Arc::new(publisher));
        self
    }

    /// Set the per-actor configuration.
    ///
    /// If not called, [`ThingConfig::default()`] is used.
    pub fn config(mut self, config: ThingConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the config and start the supervisor.
    ///
    /// Must be called from within a `tokio` runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config fails validation.
    pub fn build(self) -> Result<ThingSupervisor, ConfigError> {
        self.config.validate()?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            config: self.config,
            journal: self
                .journal
                .unwrap_or_else(|| Arc::new(InMemoryJournal::new())),
            snapshots: self
                .snapshots
                .unwrap_or_else(|| Arc::new(InMemorySnapshotStore::new())),
            publisher: self
                .publisher
                .unwrap_or_else(|| Arc::new(BroadcastPublisher::default())),
            signals: signal_tx,
            incarnations: AtomicU64::new(1),
            actors: RwLock::new(HashMap::new()),
            restarts: Mutex::new(HashMap::new()),
        });
        tokio::spawn(run_signal_loop(Arc::downgrade(&inner), signal_rx));
        Ok(ThingSupervisor { inner })
    }
}

impl Default for ThingSupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
