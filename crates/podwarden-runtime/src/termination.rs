use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for grace periods too long to represent as an `Instant`: roughly
/// thirty years
pub const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Identifies one armed deadline. Rotated whenever the deadline changes so a
/// timer armed for an older deadline can be recognised when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeadlineToken(u64);

/// A delete request for a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationRequest {
    pub grace_period: Duration,
    pub requested_at: Instant,
}

impl TerminationRequest {
    pub fn new(grace_period: Duration, requested_at: Instant) -> Self {
        Self {
            grace_period,
            requested_at,
        }
    }

    /// Deadline implied by this request alone
    pub fn deadline(&self) -> Instant {
        self.requested_at + self.grace_period.min(FAR_FUTURE)
    }
}

/// Why a pod stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every container exited before the deadline
    Graceful,
    /// The deadline elapsed and remaining containers were killed
    Forced,
}

/// Termination lifecycle of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationState {
    Active,
    Terminating {
        deadline: Instant,
        token: DeadlineToken,
        grace_period: Duration,
    },
    Stopped {
        reason: StopReason,
        at: Instant,
    },
}

/// Result of applying a termination request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationDecision {
    /// First request: deadline armed and signals issued
    Started {
        deadline: Instant,
        token: DeadlineToken,
    },
    /// Request moved the deadline earlier; signals re-issued
    Shortened {
        deadline: Instant,
        previous: Instant,
        token: DeadlineToken,
    },
    /// Request would not shorten the deadline in effect
    Unchanged { deadline: Instant },
    AlreadyStopped,
}

impl TerminationDecision {
    /// Whether the request requires arming a timer and signalling containers
    pub fn armed(&self) -> Option<(Instant, DeadlineToken)> {
        match *self {
            TerminationDecision::Started { deadline, token }
            | TerminationDecision::Shortened {
                deadline, token, ..
            } => Some((deadline, token)),
            _ => None,
        }
    }
}

/// What to do when a deadline timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineFire {
    /// Current deadline elapsed: kill whatever is still running
    ForceKill,
    /// Timer belonged to a superseded deadline, or the pod already stopped
    Stale,
}

/// Owns the grace-period deadline and signal bookkeeping for one pod.
///
/// The effective deadline is always the earliest deadline implied by any
/// accepted request: a later request may shorten it, never extend it.
#[derive(Debug)]
pub struct TerminationManager {
    state: TerminationState,
    next_token: u64,
    signal_deliveries: u32,
}

impl Default for TerminationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationManager {
    pub fn new() -> Self {
        Self {
            state: TerminationState::Active,
            next_token: 0,
            signal_deliveries: 0,
        }
    }

    pub fn state(&self) -> TerminationState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            TerminationState::Terminating { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    pub fn is_terminating(&self) -> bool {
        matches!(self.state, TerminationState::Terminating { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, TerminationState::Stopped { .. })
    }

    /// Number of times termination signals were issued to the pod
    pub fn signal_deliveries(&self) -> u32 {
        self.signal_deliveries
    }

    fn rotate_token(&mut self) -> DeadlineToken {
        self.next_token += 1;
        DeadlineToken(self.next_token)
    }

    pub fn request(&mut self, request: TerminationRequest) -> TerminationDecision {
        let candidate = request.deadline();
        match self.state {
            TerminationState::Active => {
                let token = self.rotate_token();
                self.state = TerminationState::Terminating {
                    deadline: candidate,
                    token,
                    grace_period: request.grace_period,
                };
                self.signal_deliveries += 1;
                TerminationDecision::Started {
                    deadline: candidate,
                    token,
                }
            }
            TerminationState::Terminating { deadline, .. } if candidate < deadline => {
                let token = self.rotate_token();
                self.state = TerminationState::Terminating {
                    deadline: candidate,
                    token,
                    grace_period: request.grace_period,
                };
                self.signal_deliveries += 1;
                TerminationDecision::Shortened {
                    deadline: candidate,
                    previous: deadline,
                    token,
                }
            }
            TerminationState::Terminating { deadline, .. } => {
                TerminationDecision::Unchanged { deadline }
            }
            TerminationState::Stopped { .. } => TerminationDecision::AlreadyStopped,
        }
    }

    /// Every container has exited. Returns true if this stopped the pod.
    pub fn all_exited(&mut self, now: Instant) -> bool {
        match self.state {
            TerminationState::Terminating { .. } => {
                self.state = TerminationState::Stopped {
                    reason: StopReason::Graceful,
                    at: now,
                };
                true
            }
            _ => false,
        }
    }

    /// Stop a pod whose containers had all exited before it was asked to
    /// terminate; nothing is signalled
    pub fn stop_exited(&mut self, now: Instant) -> bool {
        match self.state {
            TerminationState::Stopped { .. } => false,
            _ => {
                self.state = TerminationState::Stopped {
                    reason: StopReason::Graceful,
                    at: now,
                };
                true
            }
        }
    }

    /// A deadline timer fired. Only the timer for the current token counts.
    pub fn deadline_elapsed(&mut self, token: DeadlineToken, now: Instant) -> DeadlineFire {
        match self.state {
            TerminationState::Terminating { token: current, .. } if current == token => {
                self.state = TerminationState::Stopped {
                    reason: StopReason::Forced,
                    at: now,
                };
                DeadlineFire::ForceKill
            }
            _ => DeadlineFire::Stale,
        }
    }
}
