//! Test doubles shared by the lifecycle scenarios.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lwm2m_lifecycle::*;

pub const BS_URI: &str = "coap://127.0.0.1:5783";
pub const DM_URI: &str = "coap://127.0.0.1:5683";
pub const SHORT_ID: u16 = 2222;

pub fn bs_identity() -> Identity {
    Identity::new("127.0.0.1:5783".parse().unwrap())
}

/// A request as it reached the transport.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Sent {
    pub address: SocketAddr,
    pub secure: bool,
    pub request: Request,
}

type Responder = Box<dyn Fn(&Request) -> Option<Response> + Send + Sync>;

/// A transport answering with a scripted responder and recording every
/// request.
pub struct ScriptedSender {
    sent: Mutex<Vec<Sent>>,
    responder: Responder,
}
impl ScriptedSender {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&Request) -> Option<Response> + Send + Sync + 'static,
    {
        Arc::new(ScriptedSender {
            sent: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        })
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count<P: Fn(&Request) -> bool>(&self, predicate: P) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| predicate(&s.request))
            .count()
    }

    pub fn bootstraps(&self) -> usize {
        self.count(|r| matches!(r, Request::Bootstrap { .. }))
    }

    pub fn registers(&self) -> usize {
        self.count(|r| matches!(r, Request::Register { .. }))
    }

    pub fn updates(&self) -> usize {
        self.count(|r| matches!(r, Request::Update { .. }))
    }

    pub fn deregisters(&self) -> usize {
        self.count(|r| matches!(r, Request::Deregister { .. }))
    }
}
impl RequestSender for ScriptedSender {
    fn send(
        &self,
        address: SocketAddr,
        secure: bool,
        request: Request,
        _timeout: Option<Duration>,
    ) -> Option<Response> {
        let response = (self.responder)(&request);
        self.sent.lock().unwrap().push(Sent {
            address,
            secure,
            request,
        });
        response
    }
}

/// Security and Server objects with a bootstrap server and one DM server.
pub fn provisioned(lifetime: u64) -> Arc<MemoryStore> {
    let store = bootstrap_only();
    provision_dm(&store, DM_URI, lifetime);
    store
}

/// Only the bootstrap server is known.
pub fn bootstrap_only() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.host(SECURITY_ID);
    store.host(SERVER_ID);
    store.put_security(0, Security::no_sec_bootstrap(BS_URI));
    store.put(DEVICE_ID, ObjectInstance::new(0));
    store
}

pub fn provision_dm(store: &MemoryStore, uri: &str, lifetime: u64) {
    store.put_security(1, Security::no_sec(uri, SHORT_ID));
    store.put_server(0, Server::new(SHORT_ID, lifetime, "U"));
}

pub struct Harness {
    pub engine: RegistrationEngine,
    pub scheduler: Arc<ManualScheduler>,
    pub handler: Arc<BootstrapSessionHandler>,
}

pub fn harness(store: Arc<MemoryStore>, sender: Arc<ScriptedSender>) -> Harness {
    let handler = Arc::new(BootstrapSessionHandler::new(store.clone()));
    harness_with(store, sender, handler, Duration::from_millis(100))
}

pub fn harness_with(
    store: Arc<MemoryStore>,
    sender: Arc<ScriptedSender>,
    handler: Arc<BootstrapSessionHandler>,
    bootstrap_timeout: Duration,
) -> Harness {
    let scheduler = Arc::new(ManualScheduler::new());
    let settings = SettingsBuilder::new()
        .endpoint("test-client")
        .bootstrap_timeout(bootstrap_timeout)
        .finalize();
    let engine = RegistrationEngine::new(
        settings,
        store,
        sender,
        handler.clone(),
        scheduler.clone(),
    )
    .unwrap();
    Harness {
        engine,
        scheduler,
        handler,
    }
}

/// Answers every request with the usual success code.
pub fn happy(request: &Request) -> Option<Response> {
    match request {
        Request::Register { .. } => Some(Response::created("abc123")),
        Request::Update { .. } => Some(Response::new(ResponseCode::Changed)),
        Request::Deregister { .. } => Some(Response::new(ResponseCode::Deleted)),
        Request::Bootstrap { .. } => Some(Response::new(ResponseCode::Changed)),
    }
}
