//! Auto-refresh change detection.
//!
//! A viewer polls the `metricsUpdatedAt` marker and reloads only when it
//! moved. A run of unchanged polls is capped so that a marker which fails
//! to advance (clock skew, a writer that forgot to bump it) cannot hide new
//! data forever.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Inputs to [`evaluate_auto_refresh_no_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoRefreshInput {
    /// The previous load did not complete (some shards missing).
    pub is_partial: bool,
    pub next_updated_at: Option<i64>,
    pub last_updated_at: Option<i64>,
    pub skip_streak: u32,
    pub max_skip_streak: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    /// Marker unchanged; the refresh was skipped.
    NoChange,
    /// Marker unchanged, but the skip streak hit its cap.
    MaxSkipStreak,
    /// Marker moved, is missing, or the previous load was partial.
    ChangedOrUnknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutoRefreshDecision {
    pub should_skip: bool,
    pub next_skip_streak: u32,
    pub reason: RefreshReason,
}

/// Decide whether a poll may skip reloading.
#[must_use]
pub const fn evaluate_auto_refresh_no_change(input: &AutoRefreshInput) -> AutoRefreshDecision {
    let unchanged = !input.is_partial
        && match (input.next_updated_at, input.last_updated_at) {
            (Some(next), Some(last)) => next == last,
            _ => false,
        };

    if !unchanged {
        return AutoRefreshDecision {
            should_skip: false,
            next_skip_streak: 0,
            reason: RefreshReason::ChangedOrUnknown,
        };
    }
    if input.skip_streak >= input.max_skip_streak {
        return AutoRefreshDecision {
            should_skip: false,
            next_skip_streak: 0,
            reason: RefreshReason::MaxSkipStreak,
        };
    }
    AutoRefreshDecision {
        should_skip: true,
        next_skip_streak: input.skip_streak.saturating_add(1),
        reason: RefreshReason::NoChange,
    }
}

/// Outcome of [`RefreshScheduler::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RefreshPoll {
    /// A refresh is already running; this tick is dropped.
    InFlight,
    Skip { reason: RefreshReason },
    /// Reload now, then call [`RefreshScheduler::complete`] or
    /// [`RefreshScheduler::abort`].
    Refresh { reason: RefreshReason },
}

/// Poll-side state: last observed marker, skip streak and in-flight guard.
///
/// The in-flight flag is the only backpressure; it is not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshScheduler {
    #[serde(default)]
    pub last_updated_at: Option<i64>,
    #[serde(default)]
    pub skip_streak: u32,
    #[serde(default)]
    pub max_skip_streak: u32,
    #[serde(default)]
    pub partial: bool,
    #[serde(skip)]
    in_flight: bool,
}

impl RefreshScheduler {
    #[must_use]
    pub fn new(max_skip_streak: u32) -> Self {
        Self {
            max_skip_streak,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Evaluate one tick against the freshly read marker.
    pub fn poll(&mut self, next_updated_at: Option<i64>) -> RefreshPoll {
        if self.in_flight {
            return RefreshPoll::InFlight;
        }
        let decision = evaluate_auto_refresh_no_change(&AutoRefreshInput {
            is_partial: self.partial,
            next_updated_at,
            last_updated_at: self.last_updated_at,
            skip_streak: self.skip_streak,
            max_skip_streak: self.max_skip_streak,
        });
        self.skip_streak = decision.next_skip_streak;
        debug!(?decision, "auto-refresh poll");
        if decision.should_skip {
            RefreshPoll::Skip {
                reason: decision.reason,
            }
        } else {
            self.in_flight = true;
            RefreshPoll::Refresh {
                reason: decision.reason,
            }
        }
    }

    /// Record a finished reload that observed `updated_at`.
    pub fn complete(&mut self, updated_at: Option<i64>, partial: bool) {
        self.in_flight = false;
        self.last_updated_at = updated_at;
        self.partial = partial;
    }

    /// Clear the in-flight flag after a failed reload. The next poll forces
    /// a refresh.
    pub fn abort(&mut self) {
        self.in_flight = false;
        self.partial = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(next: Option<i64>, last: Option<i64>, streak: u32) -> AutoRefreshInput {
        AutoRefreshInput {
            is_partial: false,
            next_updated_at: next,
            last_updated_at: last,
            skip_streak: streak,
            max_skip_streak: 3,
        }
    }

    #[test]
    fn unchanged_marker_skips_and_counts() {
        let decision = evaluate_auto_refresh_no_change(&input(Some(5), Some(5), 1));
        assert!(decision.should_skip);
        assert_eq!(decision.next_skip_streak, 2);
        assert_eq!(decision.reason, RefreshReason::NoChange);
    }

    #[test]
    fn streak_cap_forces_refresh() {
        let decision = evaluate_auto_refresh_no_change(&input(Some(5), Some(5), 3));
        assert!(!decision.should_skip);
        assert_eq!(decision.next_skip_streak, 0);
        assert_eq!(decision.reason, RefreshReason::MaxSkipStreak);
    }

    #[test]
    fn change_missing_marker_or_partial_load_refreshes() {
        for case in [
            input(Some(6), Some(5), 2),
            input(None, Some(5), 2),
            input(Some(5), None, 2),
            input(None, None, 2),
            AutoRefreshInput {
                is_partial: true,
                ..input(Some(5), Some(5), 0)
            },
        ] {
            let decision = evaluate_auto_refresh_no_change(&case);
            assert!(!decision.should_skip, "{case:?}");
            assert_eq!(decision.next_skip_streak, 0);
            assert_eq!(decision.reason, RefreshReason::ChangedOrUnknown);
        }
    }

    #[test]
    fn scheduler_guards_in_flight_refresh() {
        let mut scheduler = RefreshScheduler::new(2);
        assert!(matches!(scheduler.poll(Some(1)), RefreshPoll::Refresh { .. }));
        assert_eq!(scheduler.poll(Some(2)), RefreshPoll::InFlight);
        scheduler.complete(Some(1), false);

        assert!(matches!(scheduler.poll(Some(1)), RefreshPoll::Skip { .. }));
        assert!(matches!(scheduler.poll(Some(1)), RefreshPoll::Skip { .. }));
        assert_eq!(
            scheduler.poll(Some(1)),
            RefreshPoll::Refresh {
                reason: RefreshReason::MaxSkipStreak
            }
        );
        scheduler.abort();
        assert_eq!(
            scheduler.poll(Some(1)),
            RefreshPoll::Refresh {
                reason: RefreshReason::ChangedOrUnknown
            }
        );
    }
}
