//! `lwm2m-lifecycle` keeps a constrained LWM2M device known to its device
//! management (DM) server and, when that is not possible, gets it re-provisioned
//! by its bootstrap server.
//!
//! The crate implements the client side of the registration and bootstrap
//! interfaces:
//!
//! * the [`RegistrationEngine`] decides whether to register, renew,
//!   re-register or bootstrap, and owns the single timeline all of this runs
//!   on,
//! * the [`BootstrapSessionHandler`] gates the bootstrap handshake, checking
//!   that only the bootstrap server finishes the session or purges the client
//!   objects,
//! * [`extract`] derives the bootstrap and DM server descriptors from the
//!   client's own `Security` and `Server` objects,
//! * the [`PskStore`] resolves pre-shared keys and identities for the secure
//!   transport from the same objects.
//!
//! Sockets, DTLS, CoAP retransmissions and payload encoding are out of scope.
//! They are reached through the [`RequestSender`] and [`ObjectStore`]
//! collaborator traits.
//!
//! The registration lifecycle is implemented as a state machine with the
//! following characteristics:
//!
//! * Can only be in one state at any time.
//! * Transitions between states are triggered via typed **events** and follow
//!   defined semantics; an event that is not expected in the current state is
//!   reported and ignored.
//! * The state machine never stops on a failure. A timeout triggers the next
//!   fallback, a rejection triggers one escalation step (update → register →
//!   bootstrap), and missing configuration is logged and left for the next
//!   provisioning.
//! * Work is scheduled on one ordered timeline so that register, update and
//!   bootstrap never overlap. Renewals are single-shot and rescheduled after
//!   each completed cycle.

mod bootstrap;
mod credentials;
mod error;
mod object;
mod registration;
mod scheduler;
mod servers;
mod settings;
mod transport;

pub use bootstrap::{BootstrapEndpoint, BootstrapSessionHandler, Rejection};
pub use credentials::{PskStore, PSK_MODE};
pub use error::{Error, Result};
pub use object::*;
pub use registration::{Lifecycle, RegistrationEngine};
pub use scheduler::{ManualScheduler, Scheduler, SingleWorker, Task, TaskHandle};
pub use servers::{
    extract, BindingMode, DmServerInfo, Scheme, ServerInfo, ServerUri, ServersInfo, COAPS_PORT,
    COAP_PORT,
};
pub use settings::{Settings, SettingsBuilder};
pub use transport::{Identity, Request, RequestSender, Response, ResponseCode};
