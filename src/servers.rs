//! Server descriptors and their extraction from the client objects.
//!
//! The `Security` object lists every server the client knows about, flagged as
//! either a bootstrap server or a device management (DM) server. A DM server
//! gets its registration parameters (lifetime, binding) from the `Server`
//! object instance sharing its *short server id*.
//!
//! ```text
//!   Security /0/i                         Server /1/j
//!  .------------------------.            .------------------.
//!  | uri: coap://dm:5683    |            | short id: 2222   |
//!  | bootstrap: false       |   join on  | lifetime: 30     |
//!  | short id: 2222         |----------->| binding: U       |
//!  '------------------------'            '------------------'
//! ```
//!
//! Descriptors are snapshots: [`extract`] is called again whenever the current
//! servers are needed since bootstrap and management writes may change the
//! objects at any time.

use std::{
    convert::TryFrom,
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    str::FromStr,
};

use log::{debug, error, warn};

use crate::error::{Error, Result};
use crate::object::*;

// =============================================================================
// Public Interface
// =============================================================================

/// Default port of the `coap` scheme.
pub const COAP_PORT: u16 = 5683;
/// Default port of the `coaps` scheme.
pub const COAPS_PORT: u16 = 5684;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Scheme {
    Coap,
    Coaps,
}

/// A parsed `coap[s]://host[:port]` server URI. Paths are ignored.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ServerUri {
    pub scheme: Scheme,
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
}
impl ServerUri {
    /// Resolve to the first socket address of the host.
    pub fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| Error::Unconfigured(format!("cannot resolve `{}`", self.host)))
    }
}
impl FromStr for ServerUri {
    type Err = Error;

    fn from_str(uri: &str) -> Result<Self> {
        let invalid = || Error::InvalidUri(uri.to_owned());

        let (scheme, rest) = if let Some(rest) = uri.strip_prefix("coaps://") {
            (Scheme::Coaps, rest)
        } else if let Some(rest) = uri.strip_prefix("coap://") {
            (Scheme::Coap, rest)
        } else {
            return Err(invalid());
        };

        let authority = rest.split('/').next().unwrap_or_default();
        if authority.contains('@') {
            return Err(invalid());
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            match after {
                "" => (host, None),
                _ => (host, Some(after.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match authority.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };
        if host.is_empty() || (host.contains(':') && !authority.starts_with('[')) {
            return Err(invalid());
        }

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => match scheme {
                Scheme::Coap => COAP_PORT,
                Scheme::Coaps => COAPS_PORT,
            },
        };

        Ok(ServerUri {
            scheme,
            host: host.to_owned(),
            port,
        })
    }
}
impl fmt::Display for ServerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Coap => "coap",
            Scheme::Coaps => "coaps",
        };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Transport binding declared for a DM server.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BindingMode {
    U,
    UQ,
    S,
    SQ,
    US,
    UQS,
}
impl BindingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BindingMode::U => "U",
            BindingMode::UQ => "UQ",
            BindingMode::S => "S",
            BindingMode::SQ => "SQ",
            BindingMode::US => "US",
            BindingMode::UQS => "UQS",
        }
    }
}
impl FromStr for BindingMode {
    type Err = String;

    fn from_str(binding: &str) -> std::result::Result<Self, Self::Err> {
        match binding {
            "U" => Ok(BindingMode::U),
            "UQ" => Ok(BindingMode::UQ),
            "S" => Ok(BindingMode::S),
            "SQ" => Ok(BindingMode::SQ),
            "US" => Ok(BindingMode::US),
            "UQS" => Ok(BindingMode::UQS),
            other => Err(format!("unknown binding mode `{}`", other)),
        }
    }
}

/// A server known to the client.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServerInfo {
    pub uri: ServerUri,
    /// `None` when the host could not be resolved at extraction time.
    pub address: Option<SocketAddr>,
    pub short_server_id: Option<u16>,
}
impl ServerInfo {
    /// Secure iff the URI uses the `coaps` scheme.
    pub fn is_secure(&self) -> bool {
        self.uri.scheme == Scheme::Coaps
    }

    pub fn address(&self) -> Result<SocketAddr> {
        self.address
            .ok_or_else(|| Error::Unconfigured(format!("no address for {}", self.uri)))
    }
}

/// A device management server with its registration parameters. Lifetime and
/// binding are absent when no `Server` instance matched the short server id.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DmServerInfo {
    pub info: ServerInfo,
    /// Seconds.
    pub lifetime: Option<u64>,
    pub binding: Option<BindingMode>,
}
impl DmServerInfo {
    pub fn is_usable(&self) -> bool {
        self.info.address.is_some() && self.lifetime.is_some() && self.binding.is_some()
    }
}

/// All servers found in one extraction, in `Security` instance order.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ServersInfo {
    pub bootstraps: Vec<ServerInfo>,
    pub device_managements: Vec<DmServerInfo>,
}
impl ServersInfo {
    /// The operative bootstrap server: the first one found.
    pub fn bootstrap(&self) -> Option<&ServerInfo> {
        self.bootstraps.first()
    }

    /// The single DM server the engine drives.
    pub fn device_management(&self) -> Result<&DmServerInfo> {
        match self.device_managements.as_slice() {
            [] => Err(Error::Unconfigured("no device management server".into())),
            [dm] => Ok(dm),
            many => Err(Error::UnsupportedServers(many.len())),
        }
    }
}
impl fmt::Display for ServersInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bs: Vec<String> = self.bootstraps.iter().map(|s| s.uri.to_string()).collect();
        let dm: Vec<String> = self
            .device_managements
            .iter()
            .map(|s| s.info.uri.to_string())
            .collect();
        write!(f, "Servers [bs={:?}, dm={:?}]", bs, dm)
    }
}

/// Build a fresh [`ServersInfo`] from the `Security` and `Server` objects.
///
/// Returns `None` when either object is not hosted, i.e. the client is not
/// configured at all. Instances with an unreadable server URI are logged and
/// skipped.
pub fn extract(store: &dyn ObjectStore) -> Option<ServersInfo> {
    let securities = store.read(SECURITY_ID)?;
    let servers = store.read(SERVER_ID)?;

    let mut infos = ServersInfo::default();
    for security in securities.instances.values() {
        let info = match server_info(security) {
            Ok(info) => info,
            Err(e) => {
                error!("skipping security instance {}: {}", security.id, e);
                continue;
            }
        };

        if security.boolean(SEC_BOOTSTRAP).unwrap_or(false) {
            infos.bootstraps.push(info);
        } else {
            infos.device_managements.push(dm_server_info(info, &servers));
        }
    }

    debug!("{}", infos);
    Some(infos)
}

// =============================================================================
// Private stuff
// =============================================================================

fn server_info(security: &ObjectInstance) -> Result<ServerInfo> {
    let raw = security
        .string(SEC_SERVER_URI)
        .ok_or_else(|| Error::InvalidUri(String::new()))?;
    let uri: ServerUri = raw.parse()?;

    let address = match uri.resolve() {
        Ok(address) => Some(address),
        Err(e) => {
            warn!("{}: {}", uri, e);
            None
        }
    };
    let short_server_id = security
        .integer(SEC_SERVER_ID)
        .and_then(|id| u16::try_from(id).ok());

    Ok(ServerInfo {
        uri,
        address,
        short_server_id,
    })
}

fn dm_server_info(info: ServerInfo, servers: &Object) -> DmServerInfo {
    let server = info.short_server_id.and_then(|short_id| {
        servers
            .instances
            .values()
            .find(|server| server.integer(SRV_SERVER_ID) == Some(short_id.into()))
    });

    let mut dm = DmServerInfo {
        info,
        lifetime: None,
        binding: None,
    };
    match server {
        Some(server) => {
            dm.lifetime = server
                .integer(SRV_LIFETIME)
                .and_then(|lifetime| u64::try_from(lifetime).ok());
            dm.binding = match server.string(SRV_BINDING).map(str::parse::<BindingMode>) {
                Some(Ok(binding)) => Some(binding),
                Some(Err(e)) => {
                    warn!("server instance {}: {}", server.id, e);
                    None
                }
                None => None,
            };
        }
        None => warn!(
            "no server instance for short server id {:?} ({})",
            dm.info.short_server_id, dm.info.uri
        ),
    }
    dm
}

// =============================================================================
// Unit Tests
// =============================================================================
