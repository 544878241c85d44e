use core::fmt;

/// Lifecycle phases of a [`Server`](crate::Server).
///
/// Phases only move forward, in declaration order:
///
/// 1. [`Idle`](ServerState::Idle): constructed, `serve` not called yet.
/// 2. [`Running`](ServerState::Running): listener bound, accepting.
/// 3. [`Draining`](ServerState::Draining): shutdown triggered; the
///    cancellation token is cancelled and the handler and listener are being
///    closed while in-flight connections finish.
/// 4. [`Stopped`](ServerState::Stopped): `serve` has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
