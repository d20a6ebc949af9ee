//! Activity monitoring and the passivation decision.
//!
//! While resident, an actor keeps one pending activity check. The check
//! remembers the revision and access counter observed when it was
//! scheduled; when it fires, [`decide`] compares them against the current
//! values.

use std::future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Sleep;

/// Values observed when an activity check was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckForActivity {
    pub revision: u64,
    pub access_counter: u64,
}

/// What the actor does when an activity check fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityDecision {
    /// Deleted thing with unsnapshotted revisions: snapshot it and check
    /// again on the deleted interval.
    SnapshotDeleted,
    /// Accessed since the check was scheduled: check again later.
    StillActive,
    /// Idle: ask the supervisor to stop this actor.
    Passivate,
}

/// Decide the outcome of a fired activity check.
///
/// # Arguments
///
/// * `check` - Values captured when the check was scheduled.
/// * `is_deleted` - Whether the thing currently has lifecycle `DELETED`.
/// * `snapshot_up_to_date` - Whether the last snapshot covers the current revision.
/// * `access_counter` - Current access counter.
pub fn decide(
    check: CheckForActivity,
    is_deleted: bool,
    snapshot_up_to_date: bool,
    access_counter: u64,
) -> ActivityDecision {
    if is_deleted && !snapshot_up_to_date {
        ActivityDecision::SnapshotDeleted
    } else if access_counter > check.access_counter {
        ActivityDecision::StillActive
    } else {
        ActivityDecision::Passivate
    }
}

/// The single pending activity check of an actor.
///
/// Rescheduling replaces the pending check. [`fired`](ActivityTimer::fired)
/// is cancel safe, so it can be polled from `tokio::select!` on every loop
/// iteration without losing the deadline.
#[derive(Debug, Default)]
pub(crate) struct ActivityTimer {
    pending: Option<(Pin<Box<Sleep>>, CheckForActivity)>,
}

impl ActivityTimer {
    pub(crate) fn schedule(&mut self, after: Duration, check: CheckForActivity) {
        tracing::trace!(
            ?after,
            revision = check.revision,
            access_counter = check.access_counter,
            "scheduling activity check"
        );
        self.pending = Some((Box::pin(tokio::time::sleep(after)), check));
    }

    #[cfg(test)]
    pub(crate) fn is_scheduled(&self) -> bool {
        self.pending.is_some()
    }

    /// Wait for the pending check. Never completes while none is scheduled.
    pub(crate) async fn fired(&mut self) -> CheckForActivity {
        match self.pending.as_mut() {
            Some((sleep, _)) => sleep.as_mut().await,
            None => future::pending::<()>().await,
        }
        match self.pending.take() {
            Some((_, check)) => check,
            None => future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: CheckForActivity = CheckForActivity {
        revision: 3,
        access_counter: 7,
    };

    #[test]
    fn idle_thing_is_passivated() {
        assert_eq!(decide(CHECK, false, false, 7), ActivityDecision::Passivate);
    }

    #[test]
    fn accessed_thing_stays() {
        assert_eq!(decide(CHECK, false, true, 8), ActivityDecision::StillActive);
    }

    #[test]
    fn deleted_thing_without_snapshot_is_snapshotted_first() {
        assert_eq!(
            decide(CHECK, true, false, 99),
            ActivityDecision::SnapshotDeleted
        );
    }

    #[test]
    fn deleted_and_snapshotted_thing_is_passivated_when_idle() {
        assert_eq!(decide(CHECK, true, true, 7), ActivityDecision::Passivate);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_interval() {
        let mut timer = ActivityTimer::default();
        timer.schedule(Duration::from_secs(60), CHECK);
        assert!(timer.is_scheduled());

        let start = tokio::time::Instant::now();
        let fired = timer.fired().await;
        assert_eq!(fired, CHECK);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(!timer.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_pending_check() {
        let mut timer = ActivityTimer::default();
        timer.schedule(Duration::from_secs(10), CHECK);
        let replacement = CheckForActivity {
            revision: 4,
            access_counter: 8,
        };
        timer.schedule(Duration::from_secs(20), replacement);

        let start = tokio::time::Instant::now();
        assert_eq!(timer.fired().await, replacement);
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn unscheduled_timer_never_fires() {
        let mut timer = ActivityTimer::default();
        let result = tokio::time::timeout(Duration::from_secs(3600), timer.fired()).await;
        assert!(result.is_err());
    }
}
