//! Contract with the transport collaborator.
//!
//! The lifecycle engine never touches sockets. It hands fully described
//! [`Request`]s to a [`RequestSender`] and interprets the returned
//! [`Response`]. A `None` response means the peer did not answer within the
//! request timeout.

use std::{fmt, net::SocketAddr, time::Duration};

// =============================================================================
// Public Interface
// =============================================================================

/// Protocol response codes the client side of the lifecycle can observe.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResponseCode {
    /// 2.01
    Created,
    /// 2.02
    Deleted,
    /// 2.04
    Changed,
    /// 2.05
    Content,
    /// 4.00
    BadRequest,
    /// 4.01
    Unauthorized,
    /// 4.03
    Forbidden,
    /// 4.04
    NotFound,
    /// 4.05
    MethodNotAllowed,
    /// 5.00
    InternalServerError,
}
impl ResponseCode {
    /// The dotted `class.detail` rendering used on the wire.
    pub fn as_dotted(self) -> &'static str {
        match self {
            ResponseCode::Created => "2.01",
            ResponseCode::Deleted => "2.02",
            ResponseCode::Changed => "2.04",
            ResponseCode::Content => "2.05",
            ResponseCode::BadRequest => "4.00",
            ResponseCode::Unauthorized => "4.01",
            ResponseCode::Forbidden => "4.03",
            ResponseCode::NotFound => "4.04",
            ResponseCode::MethodNotAllowed => "4.05",
            ResponseCode::InternalServerError => "5.00",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            ResponseCode::Created
                | ResponseCode::Deleted
                | ResponseCode::Changed
                | ResponseCode::Content
        )
    }
}
impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.as_dotted())
    }
}

/// Requests the lifecycle engine sends to bootstrap and management servers.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Request {
    Register {
        endpoint: String,
        /// Registration lifetime in seconds.
        lifetime: u64,
        /// Binding mode letter(s), e.g. `U`.
        binding: String,
        /// CoRE link-format description of the client objects.
        object_links: String,
    },
    Update {
        registration_id: String,
    },
    Deregister {
        registration_id: String,
    },
    Bootstrap {
        endpoint: String,
    },
}

/// A protocol response. Only `Register` responses carry a registration id.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Response {
    pub code: ResponseCode,
    pub registration_id: Option<String>,
}
impl Response {
    pub fn new(code: ResponseCode) -> Self {
        Response {
            code,
            registration_id: None,
        }
    }

    /// A `Created` answer to a register request.
    pub fn created(registration_id: impl Into<String>) -> Self {
        Response {
            code: ResponseCode::Created,
            registration_id: Some(registration_id.into()),
        }
    }
}

/// Identity of the peer behind an inbound request, as established by the
/// secure channel or the socket layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Identity {
    pub peer_address: SocketAddr,
}
impl Identity {
    pub fn new(peer_address: SocketAddr) -> Self {
        Identity { peer_address }
    }
}

/// Synchronous request/response exchange with a server.
///
/// Implementations block until a response arrives or the timeout expires, in
/// which case they return `None`.
pub trait RequestSender: Send + Sync {
    fn send(
        &self,
        address: SocketAddr,
        secure: bool,
        request: Request,
        timeout: Option<Duration>,
    ) -> Option<Response>;
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn success_codes() {
    assert!(ResponseCode::Created.is_success());
    assert!(ResponseCode::Changed.is_success());
    assert!(!ResponseCode::NotFound.is_success());
    assert!(!ResponseCode::InternalServerError.is_success());
}

#[test]
fn display_includes_dotted_code() {
    assert_eq!(
        ResponseCode::MethodNotAllowed.to_string(),
        "MethodNotAllowed (4.05)"
    );
}
