use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::conduit::{Conduit, Installer, Receiver, Side, Transporter, Uninstaller};
use crate::layer::icmp::{classify, Severity};
use crate::layer::{Endpoint, Error, Result};
use crate::messenger::{InetMessenger, Messenger, Op};
use crate::stack::Context;
use crate::time::Duration;
use crate::wire::{udp_packet, Checksum, IpProtocol, UdpRepr};
use crate::wire::{IPV4_HEADER_LEN, IPV4_MAX_DATAGRAM, UDP_HEADER_LEN};

/// A datagram socket.
///
/// Received datagrams queue up to the configured length, later ones are dropped. A connected
/// socket only accepts datagrams from its peer and reports ICMP errors about its datagrams on the
/// next call.
pub struct DatagramSocket {
    ctx: Arc<Context>,
    node: Option<Arc<Conduit>>,
    shared: Arc<Shared>,
    local: Option<Endpoint>,
    timeout: Option<Duration>,
}

struct Shared {
    state: Mutex<State>,
    readable: Condvar,
    limit: usize,
}

struct State {
    datagrams: VecDeque<(Endpoint, Vec<u8>)>,
    peer: Option<Endpoint>,
    error: Option<Error>,
}

struct DatagramLeaf {
    shared: Arc<Shared>,
}

impl Receiver for DatagramLeaf {
    fn input(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        let from = Endpoint::new(m.remote_ip(), m.remote_port);
        let mut state = self.shared.state.lock();
        if state.peer.map_or(false, |peer| peer != from) {
            return false;
        }
        if state.datagrams.len() >= self.shared.limit {
            net_trace!("udp: queue full, dropping datagram from {}", from);
            return false;
        }
        state.datagrams.push_back((from, m.messenger.payload().to_vec()));
        self.shared.readable.notify_all();
        true
    }

    fn error(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        let code = match m.error {
            Some(code) => code,
            None => return false,
        };
        let to = Endpoint::new(m.remote_ip(), m.remote_port);
        let mut state = self.shared.state.lock();
        if state.peer != Some(to) {
            return false;
        }
        state.error = match classify(&code) {
            Severity::Hard(err) | Severity::Soft(err) => Some(err),
            Severity::PathMtu => Some(Error::MessageTooLong),
            Severity::Quench => return true,
        };
        self.shared.readable.notify_all();
        true
    }
}

impl DatagramSocket {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        let limit = ctx.config.datagram_queue;
        DatagramSocket {
            ctx,
            node: None,
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    datagrams: VecDeque::new(),
                    peer: None,
                    error: None,
                }),
                readable: Condvar::new(),
                limit,
            }),
            local: None,
            timeout: None,
        }
    }

    /// Bind to a local address and port.
    ///
    /// The unspecified address accepts datagrams to any local address, port zero picks a free
    /// ephemeral port.
    pub fn bind(&mut self, local: Endpoint) -> Result<()> {
        if self.node.is_some() {
            return Err(Error::Illegal);
        }
        if !local.addr.is_unspecified() && !self.ctx.registry.is_local(local.addr) {
            return Err(Error::Unreachable);
        }
        let ports = self.ctx.udp().and_then(|udp| udp.side_b()).ok_or(Error::Illegal)?;
        let port = match local.port {
            0 => self.ctx.ephemeral_port(IpProtocol::Udp)?,
            port => port,
        };

        let mut m = InetMessenger::new(Messenger::new(0), Op::Input);
        if !local.addr.is_unspecified() {
            m.local = Some(self.ctx.registry.address(local.addr));
        }
        m.local_port = port;
        let receiver = Arc::new(DatagramLeaf { shared: self.shared.clone() });
        let leaf = Conduit::adapter("udp socket", receiver);
        let node = Installer::with_leaf(&m, leaf).install(&ports)?;
        net_debug!("udp: bound to {}:{}", local.addr, port);
        self.node = Some(node);
        self.local = Some(Endpoint::new(local.addr, port));
        Ok(())
    }

    /// Only exchange datagrams with `remote` from now on.
    pub fn connect(&mut self, remote: Endpoint) -> Result<()> {
        if !remote.is_specified() {
            return Err(Error::Illegal);
        }
        if self.node.is_none() {
            self.bind(Endpoint::UNSPECIFIED)?;
        }
        let mut state = self.shared.state.lock();
        state.peer = Some(remote);
        state.datagrams.retain(|(from, _)| *from == remote);
        Ok(())
    }

    /// Send one datagram to `remote`.
    pub fn send_to(&mut self, data: &[u8], remote: Endpoint) -> Result<usize> {
        if !remote.is_specified() {
            return Err(Error::Illegal);
        }
        if IPV4_HEADER_LEN + UDP_HEADER_LEN + data.len() > IPV4_MAX_DATAGRAM {
            return Err(Error::MessageTooLong);
        }
        if self.node.is_none() {
            self.bind(Endpoint::UNSPECIFIED)?;
        }
        let (node, local) = match (&self.node, self.local) {
            (Some(node), Some(local)) => (node.clone(), local),
            _ => return Err(Error::Illegal),
        };

        let repr = UdpRepr { src_port: local.port, dst_port: remote.port, payload_len: data.len() };
        let mut bytes = vec![0; repr.buffer_len()];
        bytes[UDP_HEADER_LEN..].copy_from_slice(data);
        repr.emit(udp_packet::new_unchecked_mut(&mut bytes), local.addr, remote.addr,
            Checksum::Ignored);

        let messenger = Messenger::with_headroom(IPV4_HEADER_LEN, &bytes);
        let mut m = InetMessenger::new(messenger, Op::Output);
        if !local.addr.is_unspecified() {
            m.local = Some(self.ctx.registry.address(local.addr));
        }
        m.remote = Some(self.ctx.registry.address(remote.addr));
        m.local_port = local.port;
        m.remote_port = remote.port;
        m.set_protocol(IpProtocol::Udp);
        if Transporter::new(&mut m).send(&node, Side::A) {
            Ok(data.len())
        } else {
            Err(Error::Unreachable)
        }
    }

    /// Send one datagram to the connected peer.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        let peer = self.take_pending_error()?.ok_or(Error::NotConnected)?;
        self.send_to(data, peer)
    }

    fn take_pending_error(&self) -> Result<Option<Endpoint>> {
        let mut state = self.shared.state.lock();
        match state.error.take() {
            Some(err) => Err(err),
            None => Ok(state.peer),
        }
    }

    /// Receive one datagram into `buf` and return its length and sender.
    ///
    /// A datagram larger than `buf` is truncated.
    pub fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, Endpoint)> {
        if self.node.is_none() {
            return Err(Error::NotConnected);
        }
        let mut state = self.shared.state.lock();
        loop {
            if let Some(err) = state.error.take() {
                return Err(err);
            }
            if let Some((from, data)) = state.datagrams.pop_front() {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                return Ok((len, from));
            }
            if self.ctx.timers.clock().is_manual() {
                return Err(Error::WouldBlock);
            }
            match self.timeout {
                Some(timeout) if timeout == Duration::from_millis(0) => {
                    return Err(Error::WouldBlock)
                },
                Some(timeout) => {
                    if self.shared.readable.wait_for(&mut state, timeout).timed_out()
                        && state.datagrams.is_empty()
                    {
                        return Err(Error::TimedOut);
                    }
                },
                None => self.shared.readable.wait(&mut state),
            }
        }
    }

    /// Receive one datagram from the connected peer.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.recv_from(buf).map(|(len, _)| len)
    }

    /// Limit how long receiving waits. `None` waits forever, a zero duration not at all.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Never wait when receiving.
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.timeout = if nonblocking { Some(Duration::from_millis(0)) } else { None };
    }

    /// The bound address and port.
    pub fn local_addr(&self) -> Option<Endpoint> {
        self.local
    }

    /// The connected peer.
    pub fn peer_addr(&self) -> Option<Endpoint> {
        self.shared.state.lock().peer
    }

    /// Whether a datagram is waiting.
    pub fn is_readable(&self) -> bool {
        !self.shared.state.lock().datagrams.is_empty()
    }

    /// Take the recorded error, if any.
    pub fn take_error(&self) -> Option<Error> {
        self.shared.state.lock().error.take()
    }

    /// Release the port.
    pub fn close(&mut self) {
        if let Some(node) = self.node.take() {
            Uninstaller::new().uninstall(&node);
        }
        self.local = None;
        self.shared.readable.notify_all();
    }
}

impl Drop for DatagramSocket {
    fn drop(&mut self) {
        self.close();
    }
}
