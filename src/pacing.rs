//! Pacing scheduler: one re-armable, cancellable show timer plus the
//! loading-indicator deadline.
//!
//! The scheduler owns no tasks and never sleeps itself; it tracks the
//! payload and its absolute due time, and the controller's select loop
//! sleeps on [`show_due`](PacingScheduler::show_due) /
//! [`loading_due`](PacingScheduler::loading_due). That keeps every timer
//! decision on the single owning context, which is what makes
//! [`pause`](PacingScheduler::pause) race-free: once it returns, no due
//! time is exposed, so nothing can fire.
//!
//! Pausing remembers the remaining run of the original absolute due time;
//! resuming re-arms for exactly that remainder, preserving total wall-clock
//! pacing across pause/resume.

use tokio::time::{Duration, Instant};

use crate::node::DisplayItem;

/// Default delay before a scheduled node is shown.
pub const DEFAULT_SHOW_DELAY: Duration = Duration::from_millis(500);
/// Default threshold after which the loading placeholder appears.
pub const DEFAULT_LOADING_THRESHOLD: Duration = Duration::from_millis(1000);

#[derive(Clone, Debug)]
struct PendingShow {
    item: DisplayItem,
    due: Instant,
}

/// Timer state for paced presentation.
#[derive(Debug)]
pub struct PacingScheduler {
    loading_threshold: Duration,
    pending: Option<PendingShow>,
    /// Remaining run of the show timer, captured by `pause`.
    show_remaining: Option<Duration>,
    loading_due: Option<Instant>,
    loading_remaining: Option<Duration>,
    paused: bool,
}

impl PacingScheduler {
    #[must_use]
    pub fn new(loading_threshold: Duration) -> Self {
        Self {
            loading_threshold,
            pending: None,
            show_remaining: None,
            loading_due: None,
            loading_remaining: None,
            paused: false,
        }
    }

    /// Arm the show timer for `item` at `now + delay`, and the loading
    /// deadline at `now + threshold` in case the show runs long.
    ///
    /// Replaces any previously pending show.
    pub fn schedule(&mut self, item: DisplayItem, delay: Duration, now: Instant) {
        self.pending = Some(PendingShow {
            item,
            due: now + delay,
        });
        self.show_remaining = None;
        self.loading_due = Some(now + self.loading_threshold);
        self.loading_remaining = None;
    }

    /// Arm only the loading deadline (used while a completion, such as
    /// speech synthesis, defers the next step).
    pub fn arm_loading(&mut self, now: Instant) {
        self.loading_due = Some(now + self.loading_threshold);
        self.loading_remaining = None;
    }

    /// Disarm the loading deadline without touching the pending show.
    pub fn disarm_loading(&mut self) {
        self.loading_due = None;
        self.loading_remaining = None;
    }

    /// Drop everything pending.
    pub fn cancel(&mut self) {
        self.pending = None;
        self.show_remaining = None;
        self.loading_due = None;
        self.loading_remaining = None;
        self.paused = false;
    }

    /// Suspend both timers, remembering their remaining runs.
    pub fn pause(&mut self, now: Instant) {
        if self.paused {
            return;
        }
        self.paused = true;
        if let Some(pending) = &self.pending {
            self.show_remaining = Some(pending.due.saturating_duration_since(now));
        }
        if let Some(due) = self.loading_due {
            self.loading_remaining = Some(due.saturating_duration_since(now));
        }
    }

    /// Re-arm suspended timers for their remaining runs.
    pub fn resume(&mut self, now: Instant) {
        if !self.paused {
            return;
        }
        self.paused = false;
        if let (Some(pending), Some(remaining)) = (&mut self.pending, self.show_remaining.take()) {
            pending.due = now + remaining;
        }
        if let Some(remaining) = self.loading_remaining.take() {
            self.loading_due = Some(now + remaining);
        }
    }

    /// Absolute due time of the pending show; `None` while paused or idle.
    #[must_use]
    pub fn show_due(&self) -> Option<Instant> {
        if self.paused {
            return None;
        }
        self.pending.as_ref().map(|p| p.due)
    }

    /// Absolute due time of the loading deadline; `None` while paused or
    /// disarmed.
    #[must_use]
    pub fn loading_due(&self) -> Option<Instant> {
        if self.paused { None } else { self.loading_due }
    }

    /// Consume the pending show once its timer fired. Disarms the loading
    /// deadline: the real item is about to appear.
    pub fn take_pending_show(&mut self) -> Option<DisplayItem> {
        self.loading_due = None;
        self.loading_remaining = None;
        self.show_remaining = None;
        self.pending.take().map(|p| p.item)
    }

    /// Mark the loading deadline as consumed once its timer fired.
    pub fn take_loading_deadline(&mut self) {
        self.loading_due = None;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl Default for PacingScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_LOADING_THRESHOLD)
    }
}
