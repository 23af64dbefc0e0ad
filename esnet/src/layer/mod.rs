//! The process logic of protocol layers.
//!
//! ## Layering
//!
//! Each protocol layer is split into two parts; the packet logic contained in `wire` and the
//! processing part in this module. A layer's processing is a [`Receiver`] attached to a protocol
//! node of the conduit graph. The graph decides where a message goes next, the receiver only
//! decides what happens to it at its node and whether it travels on.
//!
//! ## Receiving
//!
//! A frame enters at the adapter of its interface and travels toward the B side. The IP receiver
//! validates the header, hands fragments to reassembly and advances the cursor past its header.
//! Muxes pick the transport by protocol number and the connection or socket by ports and
//! addresses. Every receiver fills in the addressing it parsed so that the muxes below can key on
//! it without looking at the bytes again.
//!
//! ## Sending
//!
//! Output starts at a socket's node and travels toward the A side. Each layer prepends its header
//! into the headroom of the messenger. The IP receiver picks the interface, fragments if the path
//! MTU requires it and the scope mux delivers the frame to the device.
//!
//! ## Answering
//!
//! Error reports travel like input but describe a datagram the stack sent. ICMP fills the
//! addressing from the quoted header, so the report reaches exactly the connection that caused it.
//!
//! [`Receiver`]: ../conduit/trait.Receiver.html
use core::fmt;

use crate::wire::Ipv4Address;

pub mod icmp;
pub mod ip;
pub mod tcp;
pub mod udp;

/// The result type of socket and stack operations.
pub type Result<T> = core::result::Result<T, Error>;

/// An address and port, one side of a socket.
///
/// The unspecified address and port zero stand for any address and any port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: Ipv4Address,
    pub port: u16,
}

impl Endpoint {
    /// Any address, any port.
    pub const UNSPECIFIED: Endpoint = Endpoint { addr: Ipv4Address::UNSPECIFIED, port: 0 };

    pub fn new(addr: Ipv4Address, port: u16) -> Self {
        Endpoint { addr, port }
    }

    /// Whether both address and port are given.
    pub fn is_specified(&self) -> bool {
        !self.addr.is_unspecified() && self.port != 0
    }
}

impl From<(Ipv4Address, u16)> for Endpoint {
    fn from((addr, port): (Ipv4Address, u16)) -> Self {
        Endpoint { addr, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The operation was not permitted.
    ///
    /// Returned when the socket, endpoint or receiver does not allow or implement an operation in
    /// its current state.
    Illegal,

    /// Not enough space for the requested packet.
    ///
    /// In contrast to `Illegal` this would signal that a smaller size may be possible.
    BadSize,

    /// Unable to find a route towards the destination address.
    Unreachable,

    /// The action could not be completed because there were not enough resources.
    ///
    /// The main difference towards `Illegal` is that implies that it would have been legal with
    /// more resources, for example a full backlog or no free ephemeral port.
    Exhausted,

    /// The operation would have to block and the socket does not.
    WouldBlock,

    /// The socket has no connection.
    NotConnected,

    /// The peer refused the connection.
    ConnectionRefused,

    /// The peer reset the connection.
    ConnectionReset,

    /// The connection was aborted locally, or by a hard network error.
    ConnectionAborted,

    /// A timeout expired, either the caller's or one of the retransmission limits.
    TimedOut,

    /// The local address and port are already bound.
    AddrInUse,

    /// The direction of the socket was shut down.
    Shutdown,

    /// The datagram does not fit and may not be fragmented.
    MessageTooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            Error::Illegal => "operation not permitted",
            Error::BadSize => "bad packet size",
            Error::Unreachable => "destination unreachable",
            Error::Exhausted => "resources exhausted",
            Error::WouldBlock => "operation would block",
            Error::NotConnected => "not connected",
            Error::ConnectionRefused => "connection refused",
            Error::ConnectionReset => "connection reset by peer",
            Error::ConnectionAborted => "connection aborted",
            Error::TimedOut => "timed out",
            Error::AddrInUse => "address in use",
            Error::Shutdown => "socket shut down",
            Error::MessageTooLong => "message too long",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

/// Can convert from a wire error.
///
/// This indicates some layer tried to operate on a packet but failed.
impl From<crate::wire::Error> for Error {
    fn from(err: crate::wire::Error) -> Self {
        use crate::wire::Error as WireError;
        match err {
            WireError::Truncated => Error::BadSize,
            _ => Error::Illegal,
        }
    }
}
