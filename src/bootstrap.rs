//! Client side of the bootstrap session.
//!
//! The registration engine opens a session before sending its
//! `Bootstrap-Request`, then waits for the bootstrap server to push its
//! configuration and close the session with `Bootstrap-Finish`. The inbound
//! protocol messages are served on another thread than the waiting engine, so
//! the session is the meeting point of both.
//!
//! ```text
//!                try_admit()
//!       .------.  ok   .--------.  on_finish()  .----------.
//!  .--->| Idle |------>| Active |-------------->| Finished |
//!  |    '------'       '--------'   (signal)    '----------'
//!  |                       |                         |
//!  |        cancel()       | wait expired            |
//!  |                       v                         |
//!  |               .-------------------.             |
//!  |               | TimedOut/Canceled |             |
//!  |               '-------------------'             |
//!  |                       |                         |
//!  '-----------------------'-------------------------'
//!                   cancel() by the driver
//! ```
//!
//! Only the bootstrap server admitted with the session may finish it or purge
//! the client objects with `Bootstrap-Delete`.

use std::sync::{
    mpsc::{self, Receiver, SyncSender, TrySendError},
    Arc, Mutex,
};
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use crate::object::{ObjectStore, SECURITY_ID, SEC_BOOTSTRAP};
use crate::servers::ServerInfo;
use crate::transport::{Identity, ResponseCode};

// =============================================================================
// Public Interface
// =============================================================================

/// Why an inbound bootstrap message was refused. The session is left as it was.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum Rejection {
    #[error("not from the bootstrap server")]
    NotFromBootstrapServer,
    #[error("no pending bootstrap session")]
    NoPendingSession,
    #[error("bootstrap delete not allowed on `{0}`")]
    NotAllowed(String),
}

/// Gate and meeting point of a bootstrap session.
pub struct BootstrapSessionHandler {
    store: Arc<dyn ObjectStore>,
    session: Mutex<Session>,
    /// Receiving end of the current session's completion channel, taken by the
    /// driver when it starts waiting.
    completion: Mutex<Option<Receiver<()>>>,
}
impl BootstrapSessionHandler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        BootstrapSessionHandler {
            store,
            session: Mutex::new(Session::default()),
            completion: Mutex::new(None),
        }
    }

    /// Open a session with `peer` unless one is already active. Each admitted
    /// session gets its own completion channel.
    pub fn try_admit(&self, peer: ServerInfo) -> bool {
        let mut session = match self.session.lock() {
            Ok(session) => session,
            Err(_) => return false,
        };
        if session.active {
            debug!("bootstrap session already active, {} refused", peer.uri);
            return false;
        }

        let (signal, completion) = mpsc::sync_channel(1);
        info!("=> Bootstrap session with {}", peer.uri);
        *session = Session {
            active: true,
            peer: Some(peer),
            signal: Some(signal),
        };
        if let Ok(mut slot) = self.completion.lock() {
            *slot = Some(completion);
        }
        true
    }

    /// Block until the session is finished by the bootstrap server or
    /// `timeout` elapses. Returns `true` iff the session finished in time.
    /// Returns `false` right away when the session is cancelled meanwhile.
    pub fn await_completion(&self, timeout: Duration) -> bool {
        let completion = match self.completion.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match completion {
            Some(completion) => completion.recv_timeout(timeout).is_ok(),
            None => false,
        }
    }

    /// Handle `Bootstrap-Finish` from `identity`.
    ///
    /// Closing the session is left to the driver once its wait returns.
    pub fn on_finish(&self, identity: &Identity) -> Result<(), Rejection> {
        let session = self
            .session
            .lock()
            .map_err(|_| Rejection::NoPendingSession)?;
        session.admit(identity)?;

        if let Some(signal) = &session.signal {
            match signal.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => debug!("nobody waits for this session"),
            }
        }
        info!("=> Bootstrap finished by {}", identity.peer_address);
        Ok(())
    }

    /// Handle `Bootstrap-Delete` on `path` from `identity`.
    ///
    /// Only the root path is accepted. Every object instance is deleted through
    /// the store, except the bootstrap server's own `Security` instance.
    pub fn on_delete(&self, identity: &Identity, path: &str) -> Result<(), Rejection> {
        let session = self
            .session
            .lock()
            .map_err(|_| Rejection::NoPendingSession)?;
        session.admit(identity)?;
        if !path.is_empty() && path != "/" {
            return Err(Rejection::NotAllowed(path.to_owned()));
        }

        for object_id in self.store.object_ids() {
            let object = match self.store.read(object_id) {
                Some(object) => object,
                None => continue,
            };
            for instance in object.instances.values() {
                if object_id == SECURITY_ID && instance.boolean(SEC_BOOTSTRAP) == Some(true) {
                    debug!("keeping bootstrap security instance /0/{}", instance.id);
                    continue;
                }
                let code = self.store.delete(identity, object_id, instance.id);
                if !code.is_success() {
                    warn!("delete /{}/{}: {}", object_id, instance.id, code);
                }
            }
        }
        info!("bootstrap delete from {}", identity.peer_address);
        Ok(())
    }

    /// Close the session whatever its progress. A pending wait returns
    /// `false` immediately.
    pub fn cancel(&self) {
        if let Ok(mut session) = self.session.lock() {
            if session.active {
                debug!("=> Bootstrap session closed");
            }
            *session = Session::default();
            if let Ok(mut slot) = self.completion.lock() {
                slot.take();
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.lock().map(|s| s.active).unwrap_or(false)
    }

    /// The server the active session was opened with.
    pub fn peer(&self) -> Option<ServerInfo> {
        self.session.lock().ok().and_then(|s| s.peer.clone())
    }
}

/// Inbound protocol endpoints of the bootstrap interface, answering with the
/// response codes the bootstrap server expects.
#[derive(Clone)]
pub struct BootstrapEndpoint {
    handler: Arc<BootstrapSessionHandler>,
}
impl BootstrapEndpoint {
    pub fn new(handler: Arc<BootstrapSessionHandler>) -> Self {
        BootstrapEndpoint { handler }
    }

    /// `POST /bs`
    pub fn finish(&self, identity: &Identity) -> ResponseCode {
        match self.handler.on_finish(identity) {
            Ok(()) => ResponseCode::Changed,
            Err(e) => {
                warn!("bootstrap finish from {}: {}", identity.peer_address, e);
                ResponseCode::BadRequest
            }
        }
    }

    /// `DELETE /`
    pub fn delete(&self, identity: &Identity, path: &str) -> ResponseCode {
        match self.handler.on_delete(identity, path) {
            Ok(()) => ResponseCode::Deleted,
            Err(e) => {
                warn!("bootstrap delete from {}: {}", identity.peer_address, e);
                ResponseCode::MethodNotAllowed
            }
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

#[derive(Default)]
struct Session {
    active: bool,
    peer: Option<ServerInfo>,
    signal: Option<SyncSender<()>>,
}
impl Session {
    /// Requests are only taken from the admitted peer, compared by IP address.
    fn admit(&self, identity: &Identity) -> Result<(), Rejection> {
        if !self.active {
            return Err(Rejection::NoPendingSession);
        }
        let from_peer = self
            .peer
            .as_ref()
            .and_then(|peer| peer.address)
            .map_or(false, |address| {
                address.ip() == identity.peer_address.ip()
            });
        if from_peer {
            Ok(())
        } else {
            Err(Rejection::NotFromBootstrapServer)
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::*;
    use crate::servers::extract;
    use std::thread;
    use std::time::Instant;

    const BS: &str = "coap://127.0.0.1:5783";

    fn setup() -> (Arc<MemoryStore>, BootstrapSessionHandler, ServerInfo) {
        let store = Arc::new(MemoryStore::new());
        store.put_security(0, Security::no_sec_bootstrap(BS));
        store.put_security(1, Security::no_sec("coap://127.0.0.1:5683", 2222));
        store.put_server(0, Server::new(2222, 30, "U"));
        store.host(DEVICE_ID);
        let peer = extract(store.as_ref()).unwrap().bootstraps[0].clone();
        let handler = BootstrapSessionHandler::new(store.clone());
        (store, handler, peer)
    }

    fn from(address: &str) -> Identity {
        Identity::new(address.parse().unwrap())
    }

    #[test]
    fn admits_one_session_at_a_time() {
        let (_, handler, peer) = setup();
        assert!(handler.try_admit(peer.clone()));
        assert!(!handler.try_admit(peer.clone()));
        assert!(handler.is_active());
        handler.cancel();
        assert!(!handler.is_active());
        assert!(handler.try_admit(peer));
    }

    #[test]
    fn concurrent_admission_has_one_winner() {
        let (_, handler, peer) = setup();
        let handler = Arc::new(handler);
        let racers: Vec<_> = (0..2)
            .map(|_| {
                let handler = handler.clone();
                let peer = peer.clone();
                thread::spawn(move || handler.try_admit(peer))
            })
            .collect();
        let admitted: Vec<bool> = racers.into_iter().map(|r| r.join().unwrap()).collect();
        assert_eq!(admitted.iter().filter(|a| **a).count(), 1);
        assert!(handler.is_active());
        assert_eq!(handler.peer(), Some(peer));
    }

    #[test]
    fn finish_signals_waiter() {
        let (_, handler, peer) = setup();
        let handler = Arc::new(handler);
        assert!(handler.try_admit(peer));

        let remote = handler.clone();
        let finisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.on_finish(&from("127.0.0.1:40000"))
        });
        let start = Instant::now();
        assert!(handler.await_completion(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(finisher.join().unwrap(), Ok(()));
        // Still active until the driver closes it.
        assert!(handler.is_active());
    }

    #[test]
    fn wait_times_out_without_finish() {
        let (_, handler, peer) = setup();
        assert!(handler.try_admit(peer));
        assert!(!handler.await_completion(Duration::from_millis(20)));
    }

    #[test]
    fn stale_signal_does_not_satisfy_next_session() {
        let (_, handler, peer) = setup();
        assert!(handler.try_admit(peer.clone()));
        assert_eq!(handler.on_finish(&from("127.0.0.1:1")), Ok(()));
        handler.cancel();

        assert!(handler.try_admit(peer));
        assert!(!handler.await_completion(Duration::from_millis(20)));
    }

    #[test]
    fn cancel_releases_waiter() {
        let (_, handler, peer) = setup();
        let handler = Arc::new(handler);
        assert!(handler.try_admit(peer));
        let remote = handler.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let start = Instant::now();
        assert!(!handler.await_completion(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[test]
    fn rejects_without_session() {
        let (_, handler, _) = setup();
        assert_eq!(
            handler.on_finish(&from("127.0.0.1:1")),
            Err(Rejection::NoPendingSession)
        );
        assert_eq!(
            handler.on_delete(&from("127.0.0.1:1"), ""),
            Err(Rejection::NoPendingSession)
        );
    }

    #[test]
    fn rejects_foreign_identity() {
        let (store, handler, peer) = setup();
        assert!(handler.try_admit(peer.clone()));
        let stranger = from("10.1.2.3:5783");
        assert_eq!(
            handler.on_finish(&stranger),
            Err(Rejection::NotFromBootstrapServer)
        );
        assert_eq!(
            handler.on_delete(&stranger, "/"),
            Err(Rejection::NotFromBootstrapServer)
        );
        assert!(handler.is_active());
        assert_eq!(handler.peer(), Some(peer));
        assert_eq!(store.read(SECURITY_ID).unwrap().instances.len(), 2);
        assert!(!handler.await_completion(Duration::from_millis(10)));
    }

    #[test]
    fn delete_on_object_path_not_allowed() {
        let (store, handler, peer) = setup();
        assert!(handler.try_admit(peer));
        assert_eq!(
            handler.on_delete(&from("127.0.0.1:5783"), "/0"),
            Err(Rejection::NotAllowed("/0".into()))
        );
        assert_eq!(store.read(SECURITY_ID).unwrap().instances.len(), 2);
        assert_eq!(store.read(SERVER_ID).unwrap().instances.len(), 1);
    }

    #[test]
    fn delete_keeps_bootstrap_security() {
        let (store, handler, peer) = setup();
        assert!(handler.try_admit(peer));
        assert_eq!(handler.on_delete(&from("127.0.0.1:5783"), "/"), Ok(()));

        let securities = store.read(SECURITY_ID).unwrap();
        assert_eq!(securities.instances.keys().collect::<Vec<_>>(), vec![&0]);
        assert!(store.read(SERVER_ID).unwrap().instances.is_empty());
        assert!(store.read(DEVICE_ID).unwrap().instances.is_empty());
    }

    /// A store refusing every deletion.
    struct Locked(MemoryStore);
    impl ObjectStore for Locked {
        fn object_ids(&self) -> Vec<u16> {
            self.0.object_ids()
        }

        fn read(&self, object_id: u16) -> Option<Object> {
            self.0.read(object_id)
        }

        fn delete(&self, _: &Identity, _: u16, _: u16) -> ResponseCode {
            ResponseCode::Unauthorized
        }
    }

    #[test]
    fn delete_refused_by_store_is_not_fatal() {
        let store = MemoryStore::new();
        store.put_security(0, Security::no_sec_bootstrap(BS));
        store.put_server(0, Server::new(2222, 30, "U"));
        let store = Arc::new(Locked(store));
        let peer = extract(store.as_ref()).unwrap().bootstraps[0].clone();
        let handler = BootstrapSessionHandler::new(store.clone());
        assert!(handler.try_admit(peer));

        assert_eq!(handler.on_delete(&from("127.0.0.1:5783"), "/"), Ok(()));
        assert_eq!(store.read(SERVER_ID).unwrap().instances.len(), 1);
        assert!(handler.is_active());
    }

    #[test]
    fn endpoint_response_codes() {
        let (_, handler, peer) = setup();
        let handler = Arc::new(handler);
        let endpoint = BootstrapEndpoint::new(handler.clone());
        let bs = from("127.0.0.1:5783");

        assert_eq!(endpoint.finish(&bs), ResponseCode::BadRequest);
        assert!(handler.try_admit(peer));
        assert_eq!(endpoint.delete(&bs, "/1"), ResponseCode::MethodNotAllowed);
        assert_eq!(endpoint.delete(&bs, ""), ResponseCode::Deleted);
        assert_eq!(endpoint.finish(&bs), ResponseCode::Changed);
    }
}
