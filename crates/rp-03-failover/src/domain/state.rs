//! Failover state
//!
//! State Machine:
//! ```text
//! [FOLLOWING] ──evaluate: now - last_primary_activity >= threshold──→ [INDEPENDENT]
//!     ↑                                                                    │
//!     └────── on_primary_template: sequence > highest seen before ─────────┘
//! ```
//!
//! Primary activity is a completed handshake, a heartbeat ack or a pushed
//! template. Transitions are deterministic in the inputs; the clock is
//! passed in.

use shared_types::FailoverMode;
use std::time::Duration;
use tokio::time::Instant;

/// Inputs other than templates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailoverSignal {
    /// Handshake completed or heartbeat acknowledged.
    PrimaryActivity,
    /// A heartbeat went unanswered.
    HeartbeatMissed,
    /// The template channel dropped.
    ChannelDown,
}

/// What to do with a template pushed by the primary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimaryTemplateAction {
    /// Following: hand it to the applier.
    Apply,
    /// Independent and fresh: switch back to the primary's authority.
    Resume,
    /// Independent and not fresh: keep local authority.
    Ignore,
}

/// A mode change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    WentIndependent,
    ResumedFollowing,
}

/// Failover state owned by the controller.
#[derive(Debug, Clone)]
pub struct FailoverState {
    mode: FailoverMode,
    last_primary_activity: Instant,
    last_template_at: Option<Instant>,
    last_transition_at: Option<Instant>,
    missed_heartbeats: u32,
    /// Highest primary sequence seen; frozen while independent.
    highest_primary_sequence: u64,
}

impl FailoverState {
    /// Start following; the threshold counts from `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            mode: FailoverMode::Following,
            last_primary_activity: now,
            last_template_at: None,
            last_transition_at: None,
            missed_heartbeats: 0,
            highest_primary_sequence: 0,
        }
    }

    pub fn mode(&self) -> FailoverMode {
        self.mode
    }

    pub fn is_independent(&self) -> bool {
        self.mode == FailoverMode::Independent
    }

    pub fn missed_heartbeats(&self) -> u32 {
        self.missed_heartbeats
    }

    pub fn last_template_at(&self) -> Option<Instant> {
        self.last_template_at
    }

    pub fn last_transition_at(&self) -> Option<Instant> {
        self.last_transition_at
    }

    pub fn highest_primary_sequence(&self) -> u64 {
        self.highest_primary_sequence
    }

    /// Time since the primary was last heard from.
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_primary_activity)
    }

    pub fn observe(&mut self, signal: FailoverSignal, now: Instant) {
        match signal {
            FailoverSignal::PrimaryActivity => {
                self.last_primary_activity = now;
                self.missed_heartbeats = 0;
            }
            FailoverSignal::HeartbeatMissed => {
                self.missed_heartbeats = self.missed_heartbeats.saturating_add(1);
            }
            FailoverSignal::ChannelDown => {}
        }
    }

    /// Classify a primary template and apply its state effects.
    pub fn on_primary_template(&mut self, sequence: u64, now: Instant) -> PrimaryTemplateAction {
        self.observe(FailoverSignal::PrimaryActivity, now);

        match self.mode {
            FailoverMode::Following => {
                self.highest_primary_sequence = self.highest_primary_sequence.max(sequence);
                PrimaryTemplateAction::Apply
            }
            FailoverMode::Independent if sequence > self.highest_primary_sequence => {
                self.highest_primary_sequence = sequence;
                self.mode = FailoverMode::Following;
                self.last_transition_at = Some(now);
                PrimaryTemplateAction::Resume
            }
            FailoverMode::Independent => PrimaryTemplateAction::Ignore,
        }
    }

    /// A template from either authority was installed.
    pub fn record_applied(&mut self, now: Instant) {
        self.last_template_at = Some(now);
    }

    /// Go independent once the primary has been silent for `threshold`.
    pub fn evaluate(&mut self, now: Instant, threshold: Duration) -> Option<Transition> {
        if self.mode == FailoverMode::Following && self.silence(now) >= threshold {
            self.mode = FailoverMode::Independent;
            self.last_transition_at = Some(now);
            return Some(Transition::WentIndependent);
        }
        None
    }
}
