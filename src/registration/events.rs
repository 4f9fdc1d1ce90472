//! Events for the registration lifecycle state machine.
//!
//! This modules is private and restricted to the
//! [`registration`](crate::registration) scope.
//!
//! Refer to the [`states`](super::states) module for an overview of states,
//! events and transitions.

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Events fired by the registration engine as it works through register,
/// update, bootstrap and deregister requests.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Event {
    /// A bootstrap session was admitted and the request is about to be sent.
    Bootstrap,
    /// A register request is about to be sent.
    Register,
    /// The server created or refreshed the registration.
    Registered,
    /// A registration update is about to be sent.
    Update,
    /// A deregister request is about to be sent.
    Deregister,
    /// The deregister request failed and the registration is kept.
    Retained,
    /// The registration is gone: deregistered, refused, timed out, or no
    /// usable server.
    Lost,
}
