//! Error taxonomy for the simulation core.
//!
//! Errors are handled at the component boundary that produces them; the
//! tick loop never unwinds from an individual entity failure. Rejected
//! client actions carry a reason string back to the originator, invalid
//! client reports are dropped silently, and only a room-level
//! consistency failure tears the room down.

use std::fmt;

/// Outcome of a client-originated action that can fail validation.
pub type ActionResult<T = ()> = Result<T, Reject>;

/// A validation rejection: no state change happened, the reason may be
/// surfaced to the originating client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    pub reason: String,
}

impl Reject {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Reject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rejected: {}", self.reason)
    }
}

impl std::error::Error for Reject {}

/// Non-fatal faults raised inside the tick, logged and contained at the
/// producing component.
#[derive(Debug, Clone, PartialEq)]
pub enum SimFault {
    /// Spawn placement gave up after its attempt budget; the spawn is
    /// skipped.
    SpawnExhausted { what: &'static str, attempts: u32 },
    /// An invariant broke (e.g. a sandbag box index out of range); the
    /// offending operation is skipped after best-effort repair.
    StateViolation { detail: String },
    /// A client-reported event did not match server state (damage to a
    /// dead enemy, opening an opened chest); dropped silently.
    Desync { detail: String },
}

impl fmt::Display for SimFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimFault::SpawnExhausted { what, attempts } => {
                write!(f, "spawn exhausted for {what} after {attempts} attempts")
            }
            SimFault::StateViolation { detail } => write!(f, "state violation: {detail}"),
            SimFault::Desync { detail } => write!(f, "client desync: {detail}"),
        }
    }
}

impl std::error::Error for SimFault {}

/// Room-terminating failure. The hosting layer kicks the room's clients
/// with a `roomTerminated` reason and the service continues.
#[derive(Debug, Clone)]
pub struct FatalRoomError {
    pub room_id: String,
    pub detail: String,
}

impl fmt::Display for FatalRoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "room {} terminated: {}", self.room_id, self.detail)
    }
}

impl std::error::Error for FatalRoomError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_is_preserved() {
        let r = Reject::new("Insufficient ducats");
        assert_eq!(r.reason, "Insufficient ducats");
        assert_eq!(r.to_string(), "rejected: Insufficient ducats");
    }

    #[test]
    fn test_fault_display() {
        let f = SimFault::SpawnExhausted {
            what: "horde enemy",
            attempts: 20,
        };
        assert!(f.to_string().contains("20"));
    }
}
