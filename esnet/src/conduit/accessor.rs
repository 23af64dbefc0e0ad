use crate::messenger::InetMessenger;
use super::Key;

/// Extracts the demultiplexing key of a message.
///
/// Accessors only read the addressing fields of the messenger. The layer above the mux has
/// already parsed its header and filled them in.
pub trait Accessor: Send + Sync {
    /// The key of `m`.
    fn key(&self, m: &InetMessenger) -> Key;
}

/// Keys on the interface a message arrived at or leaves through.
pub struct ScopeAccessor;

/// Keys on the IP protocol number.
pub struct ProtocolAccessor;

/// Keys on the local port.
pub struct LocalPortAccessor;

/// Keys on the remote port.
pub struct RemotePortAccessor;

/// Keys on the local address.
pub struct LocalAddressAccessor;

/// Keys on the remote address.
pub struct RemoteAddressAccessor;

/// Keys on the IP identification.
pub struct IdentAccessor;

impl Accessor for ScopeAccessor {
    fn key(&self, m: &InetMessenger) -> Key {
        match m.scope {
            0 => Key::Any,
            scope => Key::Scope(scope),
        }
    }
}

impl Accessor for ProtocolAccessor {
    fn key(&self, m: &InetMessenger) -> Key {
        Key::Protocol(m.messenger.kind())
    }
}

impl Accessor for LocalPortAccessor {
    fn key(&self, m: &InetMessenger) -> Key {
        Key::port(m.local_port)
    }
}

impl Accessor for RemotePortAccessor {
    fn key(&self, m: &InetMessenger) -> Key {
        Key::port(m.remote_port)
    }
}

impl Accessor for LocalAddressAccessor {
    fn key(&self, m: &InetMessenger) -> Key {
        Key::address(m.local_ip())
    }
}

impl Accessor for RemoteAddressAccessor {
    fn key(&self, m: &InetMessenger) -> Key {
        Key::address(m.remote_ip())
    }
}

impl Accessor for IdentAccessor {
    fn key(&self, m: &InetMessenger) -> Key {
        Key::Ident(m.ident)
    }
}
