//! The registration engine: decides whether to register, renew, re-register
//! or bootstrap, and runs all of it on a single timeline.
//!
//! All lifecycle operations are serialized: the ones scheduled on the timeline
//! (start, renewals) and the ones called directly by the host (manual update,
//! stop). The current servers are extracted again by every operation since a
//! bootstrap session may have rewritten the `Security` and `Server` objects in
//! the meantime.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};

use super::events::Event;
use super::states::Lifecycle;
use crate::bootstrap::BootstrapSessionHandler;
use crate::error::{Error, Result};
use crate::object::{object_links, ObjectStore};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::servers::{extract, DmServerInfo, ServerInfo, ServersInfo};
use crate::settings::Settings;
use crate::transport::{Request, RequestSender, Response, ResponseCode};

// =============================================================================
// Public Interface
// =============================================================================

/// Drives the registration lifecycle of the client with its device management
/// server, falling back to the bootstrap server when registration is not
/// possible.
///
/// Operations never fail loudly: each one logs its failures, decides the next
/// lifecycle state and reports with a `bool` whether it reached its goal.
pub struct RegistrationEngine {
    inner: Arc<Inner>,
}
impl RegistrationEngine {
    /// Create an engine over the given collaborators.
    ///
    /// Fails with [`Error::UnsupportedServers`] when the object store
    /// currently lists more than one device management server.
    pub fn new(
        settings: Settings,
        store: Arc<dyn ObjectStore>,
        sender: Arc<dyn RequestSender>,
        bootstrap: Arc<BootstrapSessionHandler>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        if let Some(servers) = extract(store.as_ref()) {
            if servers.device_managements.len() > 1 {
                return Err(Error::UnsupportedServers(servers.device_managements.len()));
            }
        }
        Ok(RegistrationEngine {
            inner: Arc::new(Inner {
                settings,
                store,
                sender,
                bootstrap,
                scheduler,
                serial: Mutex::new(()),
                state: Mutex::new(RegistrationState::default()),
            }),
        })
    }

    /// Schedule the initial decision on the timeline: register when a device
    /// management server is known, bootstrap otherwise or when registering
    /// fails.
    pub fn start(&self) {
        let inner = Arc::downgrade(&self.inner);
        self.inner.scheduler.submit(Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.start();
            }
        }));
    }

    /// Register with the device management server. On success, the renewal
    /// is scheduled `lifetime - renewal_margin` from now.
    pub fn register(&self) -> bool {
        let _serial = self.inner.serialize();
        self.inner.register()
    }

    /// Refresh the registration, escalating to a new registration and then to
    /// bootstrap on failure. Any pending renewal is cancelled first.
    pub fn update(&self) -> bool {
        let _serial = self.inner.serialize();
        self.inner.update()
    }

    /// Run a bootstrap session, then register with the provisioned server.
    /// Returns `false` right away, without side effects, when a session is
    /// already running.
    pub fn bootstrap(&self) -> bool {
        if self.inner.bootstrap.is_active() {
            debug!("Bootstrap already in progress");
            return false;
        }
        let _serial = self.inner.serialize();
        self.inner.bootstrap()
    }

    /// Remove the registration from the server. Succeeds right away when not
    /// registered.
    pub fn deregister(&self) -> bool {
        let _serial = self.inner.serialize();
        self.inner.deregister()
    }

    /// Graceful stop, to be called by the host: deregister and drop any
    /// pending renewal. An in-flight bootstrap session is left to complete or
    /// time out.
    pub fn stop(&self) -> bool {
        let _serial = self.inner.serialize();
        let deregistered = self.inner.deregister();
        self.inner.cancel_renewal();
        deregistered
    }

    /// [`stop`](RegistrationEngine::stop), after cutting short any bootstrap
    /// wait, then shut the timeline down.
    pub fn shutdown(&self) -> bool {
        self.inner.bootstrap.cancel();
        let stopped = self.stop();
        self.inner.scheduler.shutdown();
        stopped
    }

    /// The registration id assigned by the server, if registered.
    pub fn registration_id(&self) -> Option<String> {
        self.inner.state().registration_id.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state().lifecycle
    }

    pub fn bootstrap_handler(&self) -> &Arc<BootstrapSessionHandler> {
        &self.inner.bootstrap
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }
}

// =============================================================================
// Private stuff
// =============================================================================

#[derive(Debug, Default)]
struct RegistrationState {
    registration_id: Option<String>,
    renewal: Option<TaskHandle>,
    /// Bumped whenever the pending renewal is replaced or cancelled.
    renewal_generation: u64,
    lifecycle: Lifecycle,
}

struct Inner {
    settings: Settings,
    store: Arc<dyn ObjectStore>,
    sender: Arc<dyn RequestSender>,
    bootstrap: Arc<BootstrapSessionHandler>,
    scheduler: Arc<dyn Scheduler>,
    /// Held for the whole duration of a lifecycle operation.
    serial: Mutex<()>,
    state: Mutex<RegistrationState>,
}
impl Inner {
    fn serialize(&self) -> MutexGuard<'_, ()> {
        self.serial.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> MutexGuard<'_, RegistrationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start(self: &Arc<Self>) {
        let _serial = self.serialize();
        info!("=> Start");
        let dm_known = extract(self.store.as_ref())
            .map_or(false, |servers| !servers.device_managements.is_empty());
        if !dm_known || !self.register() {
            self.bootstrap();
        }
    }

    // -------------------------------------------------------------------------
    // Register
    // -------------------------------------------------------------------------

    fn register(self: &Arc<Self>) -> bool {
        self.fire(Event::Register);
        match self.send_register() {
            Ok((registration_id, lifetime)) => {
                info!("Registered with location '{}'", registration_id);
                self.state().registration_id = Some(registration_id);
                self.schedule_renewal(lifetime);
                self.fire(Event::Registered);
                true
            }
            Err(e) => {
                info!("Registration failed: {}", e);
                self.forget_registration();
                false
            }
        }
    }

    fn send_register(&self) -> Result<(String, u64)> {
        let servers = self.servers()?;
        let dm = servers.device_management()?;
        let (lifetime, binding) = match (dm.lifetime, dm.binding) {
            (Some(lifetime), Some(binding)) => (lifetime, binding),
            _ => {
                return Err(Error::Unconfigured(format!(
                    "no lifetime or binding for {}",
                    dm.info.uri
                )))
            }
        };

        let request = Request::Register {
            endpoint: self.settings.endpoint.clone(),
            lifetime,
            binding: binding.as_str().into(),
            object_links: object_links(self.store.as_ref()),
        };
        let response = self.send(dm, request)?;
        match response.code {
            ResponseCode::Created => match response.registration_id {
                Some(registration_id) => Ok((registration_id, lifetime)),
                None => {
                    warn!("register response without location");
                    Err(Error::Rejected(ResponseCode::Created))
                }
            },
            code @ ResponseCode::Deleted
            | code @ ResponseCode::Changed
            | code @ ResponseCode::Content
            | code @ ResponseCode::BadRequest
            | code @ ResponseCode::Unauthorized
            | code @ ResponseCode::Forbidden
            | code @ ResponseCode::NotFound
            | code @ ResponseCode::MethodNotAllowed
            | code @ ResponseCode::InternalServerError => Err(Error::Rejected(code)),
        }
    }

    // -------------------------------------------------------------------------
    // Update
    // -------------------------------------------------------------------------

    fn update(self: &Arc<Self>) -> bool {
        self.cancel_renewal();
        let registration_id = match self.state().registration_id.clone() {
            Some(registration_id) => registration_id,
            None => {
                warn!("Registration update skipped: not registered");
                return false;
            }
        };

        self.fire(Event::Update);
        match self.send_update(registration_id) {
            Ok(lifetime) => {
                info!("Registration updated");
                self.schedule_renewal(lifetime);
                self.fire(Event::Registered);
                true
            }
            Err(Error::Timeout) => {
                // The server cannot be reached anymore, credentials or
                // addresses may have changed.
                info!("Registration update failed: timeout");
                self.forget_registration();
                self.bootstrap()
            }
            Err(Error::Rejected(code)) => {
                info!("Registration update failed: {}", code);
                self.register() || self.bootstrap()
            }
            Err(e) => {
                error!("Registration update failed: {}", e);
                self.forget_registration();
                false
            }
        }
    }

    fn send_update(&self, registration_id: String) -> Result<u64> {
        let servers = self.servers()?;
        let dm = servers.device_management()?;
        let lifetime = dm
            .lifetime
            .ok_or_else(|| Error::Unconfigured(format!("no lifetime for {}", dm.info.uri)))?;

        let response = self.send(dm, Request::Update { registration_id })?;
        match response.code {
            ResponseCode::Changed => Ok(lifetime),
            code @ ResponseCode::Created
            | code @ ResponseCode::Deleted
            | code @ ResponseCode::Content
            | code @ ResponseCode::BadRequest
            | code @ ResponseCode::Unauthorized
            | code @ ResponseCode::Forbidden
            | code @ ResponseCode::NotFound
            | code @ ResponseCode::MethodNotAllowed
            | code @ ResponseCode::InternalServerError => Err(Error::Rejected(code)),
        }
    }

    // -------------------------------------------------------------------------
    // Bootstrap
    // -------------------------------------------------------------------------

    fn bootstrap(self: &Arc<Self>) -> bool {
        let (server, address) = match self.open_session() {
            Ok(session) => session,
            Err(Error::SessionConflict) => {
                debug!("Bootstrap already in progress");
                return false;
            }
            Err(e) => {
                error!("Cannot bootstrap: {}", e);
                return false;
            }
        };

        self.fire(Event::Bootstrap);
        let request = Request::Bootstrap {
            endpoint: self.settings.endpoint.clone(),
        };
        let finished = match self.sender.send(
            address,
            server.is_secure(),
            request,
            self.settings.request_timeout,
        ) {
            None => {
                info!("Bootstrap failed: timeout");
                false
            }
            Some(response) => self.await_bootstrap(response),
        };
        self.bootstrap.cancel();

        if finished {
            info!("Bootstrap finished");
            self.register()
        } else {
            self.forget_registration();
            false
        }
    }

    fn open_session(&self) -> Result<(ServerInfo, SocketAddr)> {
        let server = self
            .servers()?
            .bootstrap()
            .cloned()
            .ok_or_else(|| Error::Unconfigured("no bootstrap server".into()))?;
        let address = server.address()?;
        if !self.bootstrap.try_admit(server.clone()) {
            return Err(Error::SessionConflict);
        }
        Ok((server, address))
    }

    fn await_bootstrap(&self, response: Response) -> bool {
        match response.code {
            ResponseCode::Changed => {
                debug!("Bootstrap request accepted, waiting for finish");
                let finished = self
                    .bootstrap
                    .await_completion(self.settings.bootstrap_timeout);
                if !finished {
                    info!(
                        "Bootstrap failed: not finished within {:?}",
                        self.settings.bootstrap_timeout
                    );
                }
                finished
            }
            code @ ResponseCode::Created
            | code @ ResponseCode::Deleted
            | code @ ResponseCode::Content
            | code @ ResponseCode::BadRequest
            | code @ ResponseCode::Unauthorized
            | code @ ResponseCode::Forbidden
            | code @ ResponseCode::NotFound
            | code @ ResponseCode::MethodNotAllowed
            | code @ ResponseCode::InternalServerError => {
                info!("Bootstrap failed: {}", code);
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Deregister
    // -------------------------------------------------------------------------

    fn deregister(&self) -> bool {
        let registration_id = match self.state().registration_id.clone() {
            Some(registration_id) => registration_id,
            None => return true,
        };
        let servers = match self.servers() {
            Ok(servers) => servers,
            Err(e) => {
                error!("Missing info to deregister: {}", e);
                return false;
            }
        };
        let dm = match servers.device_management() {
            Ok(dm) => dm,
            Err(e) => {
                error!("Missing info to deregister: {}", e);
                return false;
            }
        };

        self.fire(Event::Deregister);
        let response = match self.send(dm, Request::Deregister { registration_id }) {
            Ok(response) => response,
            Err(e) => {
                info!("Deregistration failed: {}", e);
                self.fire(Event::Retained);
                return false;
            }
        };
        match response.code {
            // Not found: the server already expired it.
            ResponseCode::Deleted | ResponseCode::NotFound => {
                info!("Deregistered: {}", response.code);
                self.forget_registration();
                true
            }
            code @ ResponseCode::Created
            | code @ ResponseCode::Changed
            | code @ ResponseCode::Content
            | code @ ResponseCode::BadRequest
            | code @ ResponseCode::Unauthorized
            | code @ ResponseCode::Forbidden
            | code @ ResponseCode::MethodNotAllowed
            | code @ ResponseCode::InternalServerError => {
                info!("Deregistration failed: {}", code);
                self.fire(Event::Retained);
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn servers(&self) -> Result<ServersInfo> {
        extract(self.store.as_ref())
            .ok_or_else(|| Error::Unconfigured("no security or server object".into()))
    }

    fn send(&self, dm: &DmServerInfo, request: Request) -> Result<Response> {
        let address = dm.info.address()?;
        debug!("{:?} -> {}", request, address);
        self.sender
            .send(
                address,
                dm.info.is_secure(),
                request,
                self.settings.request_timeout,
            )
            .ok_or(Error::Timeout)
    }

    /// Single-shot renewal, `lifetime - renewal_margin` from now. Replaces the
    /// pending renewal, if any.
    fn schedule_renewal(self: &Arc<Self>, lifetime: u64) {
        let delay = Duration::from_secs(lifetime)
            .checked_sub(self.settings.renewal_margin)
            .unwrap_or_default();
        debug!("next registration update in {:?}", delay);

        let generation = {
            let mut state = self.state();
            state.renewal_generation += 1;
            state.renewal_generation
        };
        let inner: Weak<Inner> = Arc::downgrade(self);
        let renewal = self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    let _serial = inner.serialize();
                    // Cancelled or replaced while waiting for the timeline.
                    if inner.state().renewal_generation != generation {
                        debug!("stale registration update skipped");
                        return;
                    }
                    inner.update();
                }
            }),
        );
        if let Some(previous) = self.state().renewal.replace(renewal) {
            previous.cancel();
        }
    }

    fn cancel_renewal(&self) {
        let mut state = self.state();
        state.renewal_generation += 1;
        if let Some(renewal) = state.renewal.take() {
            renewal.cancel();
        }
    }

    fn forget_registration(&self) {
        self.state().registration_id = None;
        self.cancel_renewal();
        self.fire(Event::Lost);
    }

    fn fire(&self, event: Event) {
        let mut state = self.state();
        match state.lifecycle.on(event) {
            Some(next) => {
                if next != state.lifecycle {
                    info!("=> {}", next);
                }
                state.lifecycle = next;
            }
            None => warn!("unexpected {:?} at {}", event, state.lifecycle),
        }
    }
}
