//! Distribution session lifecycle states

use std::fmt;

/// Where a distribution session is in its lifecycle.
///
/// `Uninitialized -> DescriptorReady -> Seeding -> AwaitingPeers -> Completed`,
/// with `Aborted` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    DescriptorReady,
    Seeding,
    AwaitingPeers,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Falling back to `Uninitialized` is allowed until seeding starts, so a
    /// failed build can be retried.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (current, _) if current.is_terminal() => false,
            (_, Aborted) => true,
            (Uninitialized, DescriptorReady) => true,
            (DescriptorReady, Seeding) | (DescriptorReady, Uninitialized) => true,
            (Seeding, AwaitingPeers) | (Seeding, Uninitialized) => true,
            // Peers can finish before the seeding bookkeeping catches up.
            (_, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::DescriptorReady => "descriptor-ready",
            SessionState::Seeding => "seeding",
            SessionState::AwaitingPeers => "awaiting-peers",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
