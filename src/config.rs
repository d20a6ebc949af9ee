//! Runtime configuration consumed by thing actors and the supervisor.
//!
//! [`ThingConfig`] is a plain struct with public fields. Construct it with
//! struct-update syntax over [`ThingConfig::default()`] and hand it to
//! [`ThingSupervisorBuilder::config`](crate::ThingSupervisorBuilder::config)
//! or [`spawn_thing_actor`](crate::spawn_thing_actor). Both validate before
//! any actor starts.

use std::time::Duration;

use crate::error::ConfigError;

/// Tuning knobs for snapshotting, activity checks, timeouts and restarts.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use thing_persistence::ThingConfig;
///
/// let config = ThingConfig {
///     snapshot_threshold: 10,
///     ..ThingConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// assert_eq!(config.ask_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct ThingConfig {
    /// Period of the snapshot timer. Every tick attempts a snapshot of an
    /// initialized thing that has unsnapshotted revisions.
    ///
    /// Default: 15 minutes.
    pub snapshot_interval: Duration,

    /// Number of unsnapshotted revisions after which a persist triggers a
    /// snapshot. Signed so a negative value from an external source can be
    /// reported instead of silently wrapped. `0` snapshots after every event.
    ///
    /// Default: 50.
    pub snapshot_threshold: i64,

    /// Idle check interval while the thing is active.
    ///
    /// Default: 2 hours.
    pub activity_check_interval: Duration,

    /// Idle check interval while the thing is deleted. Shorter than the
    /// active interval so deleted things leave memory sooner.
    ///
    /// Default: 5 minutes.
    pub activity_check_deleted_interval: Duration,

    /// How long [`ThingHandle::ask`](crate::ThingHandle::ask) waits for a reply.
    ///
    /// Default: 10 seconds.
    pub ask_timeout: Duration,

    /// Upper bound on snapshot load plus event replay.
    ///
    /// Default: 30 seconds.
    pub recovery_timeout: Duration,

    /// Upper bound on a single journal append.
    ///
    /// Default: 5 seconds.
    pub persist_timeout: Duration,

    /// Capacity of each actor's bounded mailbox.
    ///
    /// Default: 32.
    pub mailbox_capacity: usize,

    /// First delay before respawning an actor that stopped on its own.
    ///
    /// Default: 1 second.
    pub restart_min_backoff: Duration,

    /// Cap for the doubling restart delay.
    ///
    /// Default: 10 seconds.
    pub restart_max_backoff: Duration,

    /// Log every incoming command at debug level.
    ///
    /// Default: `false`.
    pub log_incoming_messages: bool,
}

impl Default for ThingConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: Duration::from_secs(15 * 60),
            snapshot_threshold: 50,
            activity_check_interval: Duration::from_secs(2 * 60 * 60),
            activity_check_deleted_interval: Duration::from_secs(5 * 60),
            ask_timeout: Duration::from_secs(10),
            recovery_timeout: Duration::from_secs(30),
            persist_timeout: Duration::from_secs(5),
            mailbox_capacity: 32,
            restart_min_backoff: Duration::from_secs(1),
            restart_max_backoff: Duration::from_secs(10),
            log_incoming_messages: false,
        }
    }
}

impl ThingConfig {
    /// Check the configuration for values no actor can run with.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::NegativeSnapshotThreshold`] -- the threshold is below zero.
    /// * [`ConfigError::ZeroDuration`] -- an interval or timeout is zero.
    /// * [`ConfigError::ZeroMailbox`] -- the mailbox capacity is zero.
    /// * [`ConfigError::InvertedBackoff`] -- the minimum backoff exceeds the maximum.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshot_threshold < 0 {
            return Err(ConfigError::NegativeSnapshotThreshold(
                self.snapshot_threshold,
            ));
        }
        let durations = [
            ("snapshot_interval", self.snapshot_interval),
            ("activity_check_interval", self.activity_check_interval),
            (
                "activity_check_deleted_interval",
                self.activity_check_deleted_interval,
            ),
            ("ask_timeout", self.ask_timeout),
            ("recovery_timeout", self.recovery_timeout),
            ("persist_timeout", self.persist_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroDuration(name));
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::ZeroMailbox);
        }
        if self.restart_min_backoff > self.restart_max_backoff {
            return Err(ConfigError::InvertedBackoff {
                min: self.restart_min_backoff,
                max: self.restart_max_backoff,
            });
        }
        Ok(())
    }

    /// The snapshot threshold as an unsigned revision count.
    ///
    /// Only meaningful after [`validate`](ThingConfig::validate) succeeded.
    pub(crate) fn threshold(&self) -> u64 {
        u64::try_from(self.snapshot_threshold).unwrap_or(0)
    }
}
