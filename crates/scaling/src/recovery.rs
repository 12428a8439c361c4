//! Connection recovery state machine.
//!
//! Classifies each error from the broker's error stream and decides whether
//! to keep waiting for the client's own reconnection, or to escalate. The
//! machine owns its failure counters and is driven with an injected clock,
//! so it is testable in isolation from the event source; it performs no side
//! effects of its own — the caller acts on the returned [`RecoveryAction`].

use std::time::{Duration, Instant};

use jobstream_core::config::InstanceRole;

/// Two consecutive connection failures separated by more than this window
/// start a fresh retry sequence with a zeroed outage counter.
pub const RESET_WINDOW: Duration = Duration::from_secs(30);

/// Marker the broker puts in errors when the connection is refused.
const CONNECTION_REFUSED_MARKER: &str = "ECONNREFUSED";

/// Marker for the broker's own stalled-job retry budget being exhausted.
const STALLED_BUDGET_MARKER: &str = "job stalled more than maxStalledCount";

/// Marker for a failed broker-side script initialization.
const SCRIPT_INIT_MARKER: &str = "Error initializing Lua scripts";

/// Where the machine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    /// No connection failure observed yet.
    Stable,
    /// Riding out connection failures within the outage budget.
    Retrying,
    /// Outage budget exceeded; terminal — the process must exit.
    Escalated,
}

/// What the caller should do about one observed error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Transient connection failure: log a warning and take no further
    /// action — the underlying client handles its own reconnection.
    Retry { cumulative_outage: Duration },

    /// The cumulative outage budget is exhausted: signal the supervisor to
    /// terminate the process. Emitted at most once per machine.
    Escalate { cumulative_outage: Duration },

    /// The broker gave up retrying a stalled job (worker role only).
    StalledJobBudget,

    /// Broker-side initialization failed (worker role only); immediately
    /// fatal, since it cannot self-heal even if the connection recovers.
    FatalInit,

    /// Not a recognised class: re-surface to the supervisor, never swallow.
    Raise,

    /// Observed after escalation; the error is dropped.
    Ignore,
}

/// Per-process connection failure counters plus the classification logic.
///
/// Mutated only from the error-stream listener task, so no synchronization
/// is needed. Rebuilt fresh on process start; nothing is persisted.
#[derive(Debug)]
pub struct ConnectionRecovery {
    role: InstanceRole,
    outage_budget: Duration,
    phase: RecoveryPhase,
    last_attempt: Option<Instant>,
    cumulative_outage: Duration,
}

impl ConnectionRecovery {
    pub fn new(role: InstanceRole, outage_budget: Duration) -> Self {
        Self {
            role,
            outage_budget,
            phase: RecoveryPhase::Stable,
            last_attempt: None,
            cumulative_outage: Duration::ZERO,
        }
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    /// Unresolved outage time accumulated in the current retry sequence.
    pub fn cumulative_outage(&self) -> Duration {
        self.cumulative_outage
    }

    /// Classify one error message observed at `now`.
    pub fn observe(&mut self, message: &str, now: Instant) -> RecoveryAction {
        if self.phase == RecoveryPhase::Escalated {
            return RecoveryAction::Ignore;
        }

        if message.contains(CONNECTION_REFUSED_MARKER) {
            return self.observe_connection_refused(now);
        }

        if self.role == InstanceRole::Worker && message.contains(STALLED_BUDGET_MARKER) {
            return RecoveryAction::StalledJobBudget;
        }

        if self.role == InstanceRole::Worker && message.contains(SCRIPT_INIT_MARKER) {
            return RecoveryAction::FatalInit;
        }

        RecoveryAction::Raise
    }

    fn observe_connection_refused(&mut self, now: Instant) -> RecoveryAction {
        let elapsed = self.last_attempt.map(|at| now.duration_since(at));
        self.last_attempt = Some(now);
        self.phase = RecoveryPhase::Retrying;

        match elapsed {
            // First failure, or quiet long enough to count as a fresh
            // retry sequence.
            None => {
                self.cumulative_outage = Duration::ZERO;
                RecoveryAction::Retry {
                    cumulative_outage: self.cumulative_outage,
                }
            }
            Some(elapsed) if elapsed > RESET_WINDOW => {
                self.cumulative_outage = Duration::ZERO;
                RecoveryAction::Retry {
                    cumulative_outage: self.cumulative_outage,
                }
            }
            Some(elapsed) => {
                self.cumulative_outage += elapsed;
                if self.cumulative_outage > self.outage_budget {
                    self.phase = RecoveryPhase::Escalated;
                    RecoveryAction::Escalate {
                        cumulative_outage: self.cumulative_outage,
                    }
                } else {
                    RecoveryAction::Retry {
                        cumulative_outage: self.cumulative_outage,
                    }
                }
            }
        }
    }
}
