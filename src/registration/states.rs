//! States of the registration lifecycle state machine.
//!
//! The following state diagram summarizes the states and transitions the
//! client goes through:
//!
//! ```text
//!                        START
//!                          |
//!                          v
//!                  .--------------.
//!                  | Unregistered |<------- Lost (from any state)
//!                  '--------------'
//!          Bootstrap |          | Register
//!                    v          v
//!   .---------------.  Register   .-------------.
//!   | Bootstrapping |------------>| Registering |<--------------.
//!   '---------------'<------------'-------------'               |
//!           ^           Bootstrap        |                      |
//!           |                 Registered |                      | Register
//!           |                            v                      |
//!           |                    .------------.  Update   .----------.
//!           |                    | Registered |---------->| Updating |
//!           |                    '------------'<----------'----------'
//!           |                      |      ^    Registered       |
//!           |           Deregister |      | Retained            |
//!           |                      v      |                     |
//!           |                 .---------------.                 |
//!           |                 | Deregistering |                 |
//!           |                 '---------------'                 |
//!           '---------------------------------------------------'
//!                                  Bootstrap
//! ```
//!
//! Each transition is triggered by an [`Event`]; the resulting state only
//! depends on the current state and the event.

use std::fmt;

use super::events::Event;

// =============================================================================
// Public Interface
// =============================================================================

/// Where the client stands with respect to its device management server.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Lifecycle {
    Unregistered,
    Bootstrapping,
    Registering,
    Registered,
    Updating,
    Deregistering,
}
impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle::Unregistered
    }
}
impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Crate-Public Interface
// =============================================================================

impl Lifecycle {
    /// The state reached from `self` when `event` fires, or `None` when the
    /// event is not expected in this state.
    pub(crate) fn on(self, event: Event) -> Option<Lifecycle> {
        use Lifecycle::*;

        match (self, event) {
            (Bootstrapping, Event::Bootstrap) => None,
            (_, Event::Bootstrap) => Some(Bootstrapping),
            (Deregistering, Event::Register) => None,
            (_, Event::Register) => Some(Registering),
            (Registering, Event::Registered) | (Updating, Event::Registered) => Some(Registered),
            (Registered, Event::Update) => Some(Updating),
            (Registered, Event::Deregister) => Some(Deregistering),
            (Deregistering, Event::Retained) => Some(Registered),
            (_, Event::Lost) => Some(Unregistered),
            _ => None,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn register_then_renew() {
    let state = Lifecycle::default();
    let state = state.on(Event::Register).unwrap();
    let state = state.on(Event::Registered).unwrap();
    assert_eq!(state, Lifecycle::Registered);
    let state = state.on(Event::Update).unwrap();
    assert_eq!(state.on(Event::Registered), Some(Lifecycle::Registered));
}

#[test]
fn update_failure_escalation() {
    let updating = Lifecycle::Updating;
    assert_eq!(updating.on(Event::Register), Some(Lifecycle::Registering));
    assert_eq!(updating.on(Event::Bootstrap), Some(Lifecycle::Bootstrapping));
    assert_eq!(
        Lifecycle::Registering.on(Event::Bootstrap),
        Some(Lifecycle::Bootstrapping)
    );
}

#[test]
fn deregister_outcomes() {
    let deregistering = Lifecycle::Registered.on(Event::Deregister).unwrap();
    assert_eq!(deregistering.on(Event::Retained), Some(Lifecycle::Registered));
    assert_eq!(deregistering.on(Event::Lost), Some(Lifecycle::Unregistered));
}

#[test]
fn unexpected_events() {
    assert_eq!(Lifecycle::Unregistered.on(Event::Update), None);
    assert_eq!(Lifecycle::Unregistered.on(Event::Registered), None);
    assert_eq!(Lifecycle::Unregistered.on(Event::Deregister), None);
    assert_eq!(Lifecycle::Bootstrapping.on(Event::Bootstrap), None);
    assert_eq!(Lifecycle::Registered.on(Event::Retained), None);
}
