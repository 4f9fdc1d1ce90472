//! Contract with the object store collaborator, and a simple in-memory store.
//!
//! The lifecycle engine only needs whole-object reads of the `Security` and
//! `Server` objects, instance deletion for `Bootstrap-Delete`, and the list of
//! hosted objects for the registration link description. Everything else about
//! objects and resources belongs to the store.

use std::{collections::BTreeMap, convert::TryFrom, sync::Mutex};

use log::{debug, trace};

use crate::transport::{Identity, ResponseCode};

// =============================================================================
// Public Interface
// =============================================================================

/// LWM2M Security object.
pub const SECURITY_ID: u16 = 0;
/// LWM2M Server object.
pub const SERVER_ID: u16 = 1;
/// LWM2M Device object.
pub const DEVICE_ID: u16 = 3;

// Security object resources
pub const SEC_SERVER_URI: u16 = 0;
pub const SEC_BOOTSTRAP: u16 = 1;
pub const SEC_SECURITY_MODE: u16 = 2;
pub const SEC_PUBKEY_IDENTITY: u16 = 3;
pub const SEC_SERVER_PUBKEY: u16 = 4;
pub const SEC_SECRET_KEY: u16 = 5;
pub const SEC_SERVER_ID: u16 = 10;

// Server object resources
pub const SRV_SERVER_ID: u16 = 0;
pub const SRV_LIFETIME: u16 = 1;
pub const SRV_BINDING: u16 = 7;

/// Value held by a single resource.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ResourceValue {
    Boolean(bool),
    Integer(i64),
    String(String),
    Opaque(Vec<u8>),
}

/// A snapshot of one object instance.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ObjectInstance {
    pub id: u16,
    pub resources: BTreeMap<u16, ResourceValue>,
}
impl ObjectInstance {
    pub fn new(id: u16) -> Self {
        ObjectInstance {
            id,
            resources: BTreeMap::new(),
        }
    }

    pub fn with(mut self, resource_id: u16, value: ResourceValue) -> Self {
        self.resources.insert(resource_id, value);
        self
    }

    pub fn boolean(&self, resource_id: u16) -> Option<bool> {
        match self.resources.get(&resource_id) {
            Some(ResourceValue::Boolean(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn integer(&self, resource_id: u16) -> Option<i64> {
        match self.resources.get(&resource_id) {
            Some(ResourceValue::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn string(&self, resource_id: u16) -> Option<&str> {
        match self.resources.get(&resource_id) {
            Some(ResourceValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn opaque(&self, resource_id: u16) -> Option<&[u8]> {
        match self.resources.get(&resource_id) {
            Some(ResourceValue::Opaque(value)) => Some(value.as_slice()),
            _ => None,
        }
    }
}

/// A snapshot of one object with all its instances, ordered by instance id.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Object {
    pub id: u16,
    pub instances: BTreeMap<u16, ObjectInstance>,
}

/// Read/delete access to the client objects.
///
/// Every call is atomic on its own; two calls are not guaranteed to observe the
/// same store state.
pub trait ObjectStore: Send + Sync {
    /// Ids of all hosted objects, in ascending order.
    fn object_ids(&self) -> Vec<u16>;

    /// Read a whole object. `None` when the object is not hosted at all.
    fn read(&self, object_id: u16) -> Option<Object>;

    /// Delete one instance on behalf of `identity`. Access control on the
    /// identity, if any, is the store's business.
    fn delete(&self, identity: &Identity, object_id: u16, instance_id: u16) -> ResponseCode;
}

/// CoRE link-format description of the hosted objects, as sent in register
/// requests. The Security object is never advertised.
pub fn object_links(store: &dyn ObjectStore) -> String {
    let mut links = Vec::new();
    for object_id in store.object_ids() {
        if object_id == SECURITY_ID {
            continue;
        }
        match store.read(object_id) {
            Some(object) if !object.instances.is_empty() => {
                for instance_id in object.instances.keys() {
                    links.push(format!("</{}/{}>", object_id, instance_id));
                }
            }
            _ => links.push(format!("</{}>", object_id)),
        }
    }
    links.join(",")
}

// -----------------------------------------------------------------------------
// Security and Server instances
// -----------------------------------------------------------------------------

/// Values of a Security object instance.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Security {
    pub server_uri: String,
    pub bootstrap_server: bool,
    pub security_mode: i64,
    pub public_key_or_identity: Vec<u8>,
    pub server_public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
    pub short_server_id: Option<u16>,
}
impl Security {
    /// A bootstrap server reached without security.
    pub fn no_sec_bootstrap(server_uri: impl Into<String>) -> Self {
        Security {
            server_uri: server_uri.into(),
            bootstrap_server: true,
            security_mode: 3,
            public_key_or_identity: Vec::new(),
            server_public_key: Vec::new(),
            secret_key: Vec::new(),
            short_server_id: None,
        }
    }

    /// A device management server reached without security.
    pub fn no_sec(server_uri: impl Into<String>, short_server_id: u16) -> Self {
        Security {
            bootstrap_server: false,
            short_server_id: Some(short_server_id),
            ..Security::no_sec_bootstrap(server_uri)
        }
    }

    /// A device management server reached over a pre-shared key channel.
    pub fn psk(
        server_uri: impl Into<String>,
        short_server_id: u16,
        identity: &[u8],
        key: &[u8],
    ) -> Self {
        Security {
            security_mode: 0,
            public_key_or_identity: identity.to_vec(),
            secret_key: key.to_vec(),
            ..Security::no_sec(server_uri, short_server_id)
        }
    }

    /// A device management server reached over a raw public key channel.
    pub fn rpk(
        server_uri: impl Into<String>,
        short_server_id: u16,
        client_public_key: &[u8],
        client_private_key: &[u8],
        server_public_key: &[u8],
    ) -> Self {
        Security {
            security_mode: 1,
            public_key_or_identity: client_public_key.to_vec(),
            server_public_key: server_public_key.to_vec(),
            secret_key: client_private_key.to_vec(),
            ..Security::no_sec(server_uri, short_server_id)
        }
    }

    pub fn into_instance(self, instance_id: u16) -> ObjectInstance {
        let mut instance = ObjectInstance::new(instance_id)
            .with(SEC_SERVER_URI, ResourceValue::String(self.server_uri))
            .with(SEC_BOOTSTRAP, ResourceValue::Boolean(self.bootstrap_server))
            .with(SEC_SECURITY_MODE, ResourceValue::Integer(self.security_mode))
            .with(
                SEC_PUBKEY_IDENTITY,
                ResourceValue::Opaque(self.public_key_or_identity),
            )
            .with(
                SEC_SERVER_PUBKEY,
                ResourceValue::Opaque(self.server_public_key),
            )
            .with(SEC_SECRET_KEY, ResourceValue::Opaque(self.secret_key));
        if let Some(id) = self.short_server_id {
            instance = instance.with(SEC_SERVER_ID, ResourceValue::Integer(id.into()));
        }
        instance
    }
}

/// Values of a Server object instance.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Server {
    pub short_server_id: u16,
    /// Seconds.
    pub lifetime: u64,
    pub binding: String,
}
impl Server {
    pub fn new(short_server_id: u16, lifetime: u64, binding: impl Into<String>) -> Self {
        Server {
            short_server_id,
            lifetime,
            binding: binding.into(),
        }
    }

    pub fn into_instance(self, instance_id: u16) -> ObjectInstance {
        ObjectInstance::new(instance_id)
            .with(
                SRV_SERVER_ID,
                ResourceValue::Integer(self.short_server_id.into()),
            )
            .with(
                SRV_LIFETIME,
                ResourceValue::Integer(i64::try_from(self.lifetime).unwrap_or(i64::MAX)),
            )
            .with(SRV_BINDING, ResourceValue::String(self.binding))
    }
}

// -----------------------------------------------------------------------------
// In-memory store
// -----------------------------------------------------------------------------

/// An [`ObjectStore`] holding its objects in memory. Deletes are accepted from
/// any identity.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<u16, Object>>,
}
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host an object, even without any instance.
    pub fn host(&self, object_id: u16) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.entry(object_id).or_insert_with(|| Object {
                id: object_id,
                instances: BTreeMap::new(),
            });
        }
    }

    /// Insert or replace an instance, hosting its object if needed.
    pub fn put(&self, object_id: u16, instance: ObjectInstance) {
        if let Ok(mut objects) = self.objects.lock() {
            let object = objects.entry(object_id).or_insert_with(|| Object {
                id: object_id,
                instances: BTreeMap::new(),
            });
            object.instances.insert(instance.id, instance);
        }
    }

    pub fn put_security(&self, instance_id: u16, security: Security) {
        self.put(SECURITY_ID, security.into_instance(instance_id));
    }

    pub fn put_server(&self, instance_id: u16, server: Server) {
        self.put(SERVER_ID, server.into_instance(instance_id));
    }
}
impl ObjectStore for MemoryStore {
    fn object_ids(&self) -> Vec<u16> {
        match self.objects.lock() {
            Ok(objects) => objects.keys().copied().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn read(&self, object_id: u16) -> Option<Object> {
        trace!("read /{}", object_id);
        self.objects.lock().ok()?.get(&object_id).cloned()
    }

    fn delete(&self, identity: &Identity, object_id: u16, instance_id: u16) -> ResponseCode {
        let mut objects = match self.objects.lock() {
            Ok(objects) => objects,
            Err(_) => return ResponseCode::InternalServerError,
        };
        let removed = objects
            .get_mut(&object_id)
            .and_then(|object| object.instances.remove(&instance_id));
        match removed {
            Some(_) => {
                debug!(
                    "deleted /{}/{} on behalf of {}",
                    object_id, instance_id, identity.peer_address
                );
                ResponseCode::Deleted
            }
            None => ResponseCode::NotFound,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
