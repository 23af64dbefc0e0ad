use std::sync::Arc;

use crate::conduit::Key;
use crate::layer::{Endpoint, Error, Result};
use crate::stack::Context;
use crate::time::Duration;
use crate::wire::IpProtocol;

use super::stream::{Listener, Stream};
use super::tcb::{State, Tcb};

/// A stream socket.
///
/// A fresh socket is unbound. It becomes a connection with [`connect`], or a listener with
/// [`listen`] from which [`accept`] takes connections. Reads and writes block unless a timeout
/// of zero is set or the stack runs on a manual clock, then they fail with `WouldBlock`.
///
/// Closing a connection sends a FIN after the queued data. The connection stays in the stack until
/// the exchange of FINs completes even when the socket is gone.
///
/// [`connect`]: #method.connect
/// [`listen`]: #method.listen
/// [`accept`]: #method.accept
pub struct StreamSocket {
    ctx: Arc<Context>,
    role: Role,
    timeout: Option<Duration>,
}

enum Role {
    Unbound,
    Stream(Arc<Stream>),
    Listener(Arc<Listener>),
    Closed,
}

impl StreamSocket {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        StreamSocket {
            ctx,
            role: Role::Unbound,
            timeout: None,
        }
    }

    fn with_stream(ctx: Arc<Context>, stream: Arc<Stream>, timeout: Option<Duration>) -> Self {
        StreamSocket {
            ctx,
            role: Role::Stream(stream),
            timeout,
        }
    }

    fn stream(&self) -> Result<&Arc<Stream>> {
        match &self.role {
            Role::Stream(stream) => Ok(stream),
            _ => Err(Error::NotConnected),
        }
    }

    /// Bind to a local address and port.
    ///
    /// The unspecified address accepts connections to any local address, port zero picks a free
    /// ephemeral port.
    pub fn bind(&mut self, local: Endpoint) -> Result<()> {
        match self.role {
            Role::Unbound => (),
            _ => return Err(Error::Illegal),
        }
        if !local.addr.is_unspecified() && !self.ctx.registry.is_local(local.addr) {
            return Err(Error::Unreachable);
        }
        let port = match local.port {
            0 => self.ctx.ephemeral_port(IpProtocol::Tcp)?,
            port => port,
        };
        let local = Endpoint::new(local.addr, port);
        if self.is_listened_on(local) {
            return Err(Error::AddrInUse);
        }

        let tcb = Tcb::new(&self.ctx.config, local, self.ctx.now());
        let stream = Stream::new(self.ctx.clone(), tcb);
        stream.attach(local, Endpoint::UNSPECIFIED)?;
        net_debug!("tcp {}: bound", local);
        self.role = Role::Stream(stream);
        Ok(())
    }

    /// Whether a listener holds exactly this port and address.
    fn is_listened_on(&self, local: Endpoint) -> bool {
        self.ctx.listeners()
            .and_then(|ports| ports.child(&Key::port(local.port)))
            .and_then(|addresses| addresses.child(&Key::address(local.addr)))
            .is_some()
    }

    /// Open a connection to `remote`.
    ///
    /// An unbound socket is bound to the address of the route toward `remote` and an ephemeral
    /// port. Unless the socket may not block, waits for the handshake to complete.
    pub fn connect(&mut self, remote: Endpoint) -> Result<()> {
        if !remote.is_specified() {
            return Err(Error::Illegal);
        }
        if let Role::Unbound = self.role {
            self.bind(Endpoint::UNSPECIFIED)?;
        }
        let stream = match &self.role {
            Role::Stream(stream) => stream.clone(),
            _ => return Err(Error::Illegal),
        };
        let bound = {
            let tcb = stream.tcb.lock();
            if tcb.state != State::Closed || tcb.remote.is_specified() {
                return Err(Error::Illegal);
            }
            tcb.local
        };
        let addr = match bound.addr {
            addr if addr.is_unspecified() => self.ctx.source_for(remote.addr)?,
            addr => addr,
        };
        stream.connect(Endpoint::new(addr, bound.port), remote)?;
        stream.wait_connected(self.timeout).or_else(|err| match err {
            Error::WouldBlock => Ok(()),
            err => Err(err),
        })
    }

    /// Accept connections, queueing at most `backlog` not yet accepted ones.
    ///
    /// The backlog is capped by the configuration. An unbound socket listens on an ephemeral
    /// port of every local address.
    pub fn listen(&mut self, backlog: usize) -> Result<()> {
        if let Role::Unbound = self.role {
            self.bind(Endpoint::UNSPECIFIED)?;
        }
        let stream = match &self.role {
            Role::Stream(stream) => stream.clone(),
            _ => return Err(Error::Illegal),
        };
        let local = {
            let tcb = stream.tcb.lock();
            if tcb.state != State::Closed || tcb.remote.is_specified() {
                return Err(Error::Illegal);
            }
            tcb.local
        };
        let backlog = backlog.min(self.ctx.config.max_backlog).max(1);
        // The port moves from the connection tree to the listeners.
        stream.close();
        match Listener::install(self.ctx.clone(), local, backlog) {
            Ok(listener) => {
                self.role = Role::Listener(listener);
                Ok(())
            },
            Err(err) => {
                self.role = Role::Closed;
                Err(err)
            },
        }
    }

    /// Take the next established connection.
    pub fn accept(&mut self) -> Result<StreamSocket> {
        match &self.role {
            Role::Listener(listener) => {
                let stream = listener.accept(self.timeout)?;
                Ok(StreamSocket::with_stream(self.ctx.clone(), stream, self.timeout))
            },
            _ => Err(Error::Illegal),
        }
    }

    /// Read received data into `buf`.
    ///
    /// Returns `Ok(0)` once the peer closed its side and everything was read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream()?.read(buf, self.timeout)
    }

    /// Queue data for sending. Returns the number of octets queued, which may be fewer than given.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.stream()?.write(data, false, self.timeout)
    }

    /// Queue data and mark everything queued so far as urgent.
    pub fn write_urgent(&mut self, data: &[u8]) -> Result<usize> {
        self.stream()?.write(data, true, self.timeout)
    }

    /// Octets of urgent data the peer sent that were not read yet.
    pub fn urgent_pending(&self) -> usize {
        self.stream().map_or(0, |stream| stream.tcb.lock().urgent_pending())
    }

    /// Stop reading. Data arriving from now on resets the connection.
    pub fn shutdown_input(&mut self) -> Result<()> {
        self.stream()?.shutdown_input();
        Ok(())
    }

    /// Send a FIN after the queued data. Reading continues.
    pub fn shutdown_output(&mut self) -> Result<()> {
        let stream = self.stream()?;
        if !stream.tcb.lock().state.sends() {
            return Err(Error::NotConnected);
        }
        stream.shutdown_output();
        Ok(())
    }

    /// Close the socket.
    pub fn close(&mut self) {
        match std::mem::replace(&mut self.role, Role::Closed) {
            Role::Stream(stream) => stream.close(),
            Role::Listener(listener) => listener.close(),
            Role::Unbound | Role::Closed => (),
        }
    }

    /// Limit how long reading, writing, connecting and accepting wait. `None` waits forever, a
    /// zero duration not at all.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Never wait.
    pub fn set_nonblocking(&mut self, nonblocking: bool) {
        self.timeout = if nonblocking { Some(Duration::from_millis(0)) } else { None };
    }

    /// The state of the connection, `Listen` for a listener.
    pub fn state(&self) -> State {
        match &self.role {
            Role::Stream(stream) => stream.tcb.lock().state,
            Role::Listener(_) => State::Listen,
            Role::Unbound | Role::Closed => State::Closed,
        }
    }

    /// Whether a read would not wait.
    pub fn is_readable(&self) -> bool {
        self.stream().map_or(false, |stream| stream.tcb.lock().is_readable())
    }

    /// Whether a write would not wait.
    pub fn is_writable(&self) -> bool {
        self.stream().map_or(false, |stream| stream.tcb.lock().is_writable())
    }

    /// Whether `accept` would not wait.
    pub fn is_acceptable(&self) -> bool {
        match &self.role {
            Role::Listener(listener) => listener.is_acceptable(),
            _ => false,
        }
    }

    /// Whether a pending `connect` finished, successfully or not.
    pub fn is_connectable(&self) -> bool {
        self.stream().map_or(false, |stream| {
            let tcb = stream.tcb.lock();
            tcb.state.is_synchronized() || tcb.error.is_some()
        })
    }

    /// Take the error of the connection.
    ///
    /// The error that ended a connection is reported every time, a soft error only once.
    pub fn take_error(&self) -> Option<Error> {
        self.stream().ok().and_then(|stream| stream.tcb.lock().take_error())
    }

    /// The local address and port.
    pub fn local_addr(&self) -> Option<Endpoint> {
        match &self.role {
            Role::Stream(stream) => Some(stream.tcb.lock().local),
            Role::Listener(listener) => Some(listener.local()),
            Role::Unbound | Role::Closed => None,
        }
    }

    /// The peer of the connection.
    pub fn peer_addr(&self) -> Option<Endpoint> {
        self.stream().ok()
            .map(|stream| stream.tcb.lock().remote)
            .filter(Endpoint::is_specified)
    }
}

impl Drop for StreamSocket {
    fn drop(&mut self) {
        self.close();
    }
}
