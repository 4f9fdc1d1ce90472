//! Registration lifecycle of the LWM2M client.
//!
//! **Example** - Driving the lifecycle on a background worker:
//! ```no_run
//! use std::sync::Arc;
//! use lwm2m_lifecycle::{
//!     BootstrapSessionHandler, MemoryStore, RegistrationEngine, RequestSender, SettingsBuilder,
//!     SingleWorker,
//! };
//!
//! # fn transport() -> Arc<dyn RequestSender> { unimplemented!() }
//! let store = Arc::new(MemoryStore::new());
//! let bootstrap = Arc::new(BootstrapSessionHandler::new(store.clone()));
//! let engine = RegistrationEngine::new(
//!     SettingsBuilder::new().endpoint("sensor-42").finalize(),
//!     store,
//!     transport(),
//!     bootstrap,
//!     Arc::new(SingleWorker::new()),
//! )
//! .expect("a single device management server");
//! engine.start();
//! // ... on graceful shutdown
//! engine.shutdown();
//! ```

mod engine;
mod events;
mod states;

pub use engine::RegistrationEngine;
pub use states::Lifecycle;
