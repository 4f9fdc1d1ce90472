//! Pre-shared key lookups for the secure transport.
//!
//! The DTLS layer needs two answers during a handshake: the key matching the
//! identity a peer presents, and the identity to present when connecting to a
//! given peer. Both come from the PSK-mode instances of the `Security` object,
//! re-read on every call.

use std::{net::SocketAddr, sync::Arc};

use log::{error, trace};

use crate::object::*;
use crate::servers::ServerUri;

/// `Security` object security mode of pre-shared key instances.
pub const PSK_MODE: i64 = 0;

/// Resolves PSK credentials from the `Security` object.
#[derive(Clone)]
pub struct PskStore {
    store: Arc<dyn ObjectStore>,
}
impl PskStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        PskStore { store }
    }

    /// The secret key stored for `identity`, matched byte for byte.
    pub fn key(&self, identity: &[u8]) -> Option<Vec<u8>> {
        self.psk_instances()
            .into_iter()
            .find(|security| security.opaque(SEC_PUBKEY_IDENTITY) == Some(identity))
            .and_then(|security| security.opaque(SEC_SECRET_KEY).map(<[u8]>::to_vec))
    }

    /// The identity to present to `peer`, found by comparing it with the
    /// resolved server URI of each PSK instance.
    pub fn identity(&self, peer: &SocketAddr) -> Option<Vec<u8>> {
        self.psk_instances()
            .into_iter()
            .find(|security| {
                let raw = security.string(SEC_SERVER_URI).unwrap_or_default();
                match raw.parse::<ServerUri>().and_then(|uri| uri.resolve()) {
                    Ok(address) => address == *peer,
                    Err(e) => {
                        error!("security instance {}: {}", security.id, e);
                        false
                    }
                }
            })
            .and_then(|security| security.opaque(SEC_PUBKEY_IDENTITY).map(<[u8]>::to_vec))
    }

    fn psk_instances(&self) -> Vec<ObjectInstance> {
        let securities = match self.store.read(SECURITY_ID) {
            Some(object) => object,
            None => {
                trace!("no security object, no psk");
                return Vec::new();
            }
        };
        securities
            .instances
            .into_iter()
            .map(|(_, instance)| instance)
            .filter(|instance| instance.integer(SEC_SECURITY_MODE) == Some(PSK_MODE))
            .collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn psk_store() -> PskStore {
        let store = MemoryStore::new();
        store.put_security(0, Security::no_sec_bootstrap("coap://127.0.0.1:5783"));
        store.put_security(
            1,
            Security::psk("coaps://127.0.0.1:5684", 1, b"client-1", &[1, 2, 3, 4]),
        );
        store.put_security(
            2,
            Security::psk("coaps://127.0.0.2:5684", 2, b"client-2", &[5, 6, 7, 8]),
        );
        store.put_security(3, Security::no_sec("coap://127.0.0.3:5683", 3));
        PskStore::new(Arc::new(store))
    }

    #[test]
    fn key_by_identity() {
        let psk = psk_store();
        assert_eq!(psk.key(b"client-2"), Some(vec![5, 6, 7, 8]));
        assert_eq!(psk.key(b"client-3"), None);
        assert_eq!(psk.key(b""), None);
    }

    #[test]
    fn identity_by_peer() {
        let psk = psk_store();
        let peer = "127.0.0.1:5684".parse().unwrap();
        assert_eq!(psk.identity(&peer), Some(b"client-1".to_vec()));
    }

    #[test]
    fn identity_ignores_non_psk_instances() {
        let psk = psk_store();
        let peer = "127.0.0.3:5683".parse().unwrap();
        assert_eq!(psk.identity(&peer), None);
        let wrong_port = "127.0.0.1:5685".parse().unwrap();
        assert_eq!(psk.identity(&wrong_port), None);
    }

    #[test]
    fn empty_security_object() {
        let store = MemoryStore::new();
        let psk = PskStore::new(Arc::new(store));
        assert_eq!(psk.key(b"client-1"), None);
        assert_eq!(psk.identity(&"127.0.0.1:5684".parse().unwrap()), None);
    }
}
