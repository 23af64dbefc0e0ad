//! Assembly of the protocol graph.
//!
//! A [`Stack`] owns one graph:
//!
//! ```text
//!  interfaces ── scope mux ══ ip ── protocol mux ─┬─ icmp ── echo mux ── ping sockets
//!                                                 ├─ udp ── ports ── addresses ── datagram sockets
//!                                                 └─ tcp ── ports ── addresses ── remote ports
//!                                                                  ── remote addresses ── streams
//! ```
//!
//! Listening streams live in a second tree keyed by local port and address that the tcp factory
//! consults when no connection matches a segment.
//!
//! [`Stack`]: struct.Stack.html
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::conduit::{connect_aa, connect_ab, Conduit, Key, ProtocolAccessor, ScopeAccessor};
use crate::layer::icmp::{self, PingSocket, ProtocolUnreachable};
use crate::layer::ip::IpReceiver;
use crate::layer::tcp::{self, IsnGenerator, StreamSocket};
use crate::layer::udp::{self, DatagramSocket};
use crate::layer::{Error, Result};
use crate::nic::{Device, Interface};
use crate::registry::Registry;
use crate::time::{Clock, Instant, SystemClock};
use crate::timer::Timers;
use crate::wire::{Checksum, IpProtocol, Ipv4Address, Ipv4Cidr};

/// State shared by every receiver of one stack.
pub(crate) struct Context {
    pub(crate) config: Config,
    pub(crate) registry: Registry,
    pub(crate) timers: Arc<Timers>,
    pub(crate) checksum: Checksum,
    pub(crate) isn: IsnGenerator,
    graph: RwLock<Graph>,
    next_port: Mutex<u16>,
    next_echo: AtomicU16,
}

/// Weak handles on the fixed nodes, the stack holds them strongly.
#[derive(Default)]
struct Graph {
    ip: Weak<Conduit>,
    protocols: Weak<Conduit>,
    icmp: Weak<Conduit>,
    echo: Weak<Conduit>,
    udp: Weak<Conduit>,
    tcp: Weak<Conduit>,
    listeners: Weak<Conduit>,
}

impl Context {
    fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        let checksum = config.checksum;
        let next_port = config.ephemeral_start;
        Context {
            config,
            registry: Registry::new(),
            timers: Timers::new(clock),
            checksum,
            isn: IsnGenerator::from_std_hash(),
            graph: RwLock::new(Graph::default()),
            next_port: Mutex::new(next_port),
            next_echo: AtomicU16::new(1),
        }
    }

    /// The current time of the stack's clock.
    pub(crate) fn now(&self) -> Instant {
        self.timers.now()
    }

    pub(crate) fn ip(&self) -> Option<Arc<Conduit>> {
        self.graph.read().ip.upgrade()
    }

    /// The mux of transport protocols above IP.
    pub(crate) fn protocols(&self) -> Option<Arc<Conduit>> {
        self.graph.read().protocols.upgrade()
    }

    pub(crate) fn icmp(&self) -> Option<Arc<Conduit>> {
        self.graph.read().icmp.upgrade()
    }

    pub(crate) fn echo(&self) -> Option<Arc<Conduit>> {
        self.graph.read().echo.upgrade()
    }

    pub(crate) fn udp(&self) -> Option<Arc<Conduit>> {
        self.graph.read().udp.upgrade()
    }

    pub(crate) fn tcp(&self) -> Option<Arc<Conduit>> {
        self.graph.read().tcp.upgrade()
    }

    pub(crate) fn listeners(&self) -> Option<Arc<Conduit>> {
        self.graph.read().listeners.upgrade()
    }

    /// Pick a free port for `protocol` from the ephemeral range.
    pub(crate) fn ephemeral_port(&self, protocol: IpProtocol) -> Result<u16> {
        let roots: Vec<Arc<Conduit>> = match protocol {
            IpProtocol::Tcp => self.tcp().and_then(|tcp| tcp.side_b()).into_iter()
                .chain(self.listeners())
                .collect(),
            IpProtocol::Udp => self.udp().and_then(|udp| udp.side_b()).into_iter().collect(),
            _ => return Err(Error::Illegal),
        };

        let start = self.config.ephemeral_start;
        let mut next = self.next_port.lock();
        for _ in 0..=(u16::max_value() - start) {
            let port = *next;
            *next = if port == u16::max_value() { start } else { port + 1 };
            if roots.iter().all(|root| root.child(&Key::Port(port)).is_none()) {
                return Ok(port);
            }
        }
        Err(Error::Exhausted)
    }

    /// An identifier for a new echo socket.
    pub(crate) fn echo_ident(&self) -> u16 {
        self.next_echo.fetch_add(1, Ordering::Relaxed)
    }

    /// The local address used to reach `remote`.
    pub(crate) fn source_for(&self, remote: Ipv4Address) -> Result<Ipv4Address> {
        self.registry.route(remote)
            .map(|interface| interface.cidr.address())
            .ok_or(Error::Unreachable)
    }
}

/// A complete TCP/IP stack.
///
/// Frames enter through the interfaces added with [`add_interface`]. Either call [`poll`]
/// periodically or [`start`] the background threads that pump the devices and run the timers.
///
/// [`add_interface`]: #method.add_interface
/// [`poll`]: #method.poll
/// [`start`]: #method.start
pub struct Stack {
    ctx: Arc<Context>,
    scopes: Arc<Conduit>,
    ip: Arc<Conduit>,
    listeners: Arc<Conduit>,
    interfaces: Mutex<Vec<Arc<Interface>>>,
    timer_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Stack {
    /// A stack following the system clock.
    pub fn new(config: Config) -> Self {
        Stack::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// A stack reading time from `clock`.
    ///
    /// With a manual clock nothing happens on its own: advance the clock and `poll`.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        let ctx = Arc::new(Context::new(config, clock));

        let scopes = Conduit::mux("scope", Arc::new(ScopeAccessor));
        let ip = Conduit::protocol("ip", Arc::new(IpReceiver::new(ctx.clone())));
        connect_aa(&ip, &scopes);

        let protocols = Conduit::mux("protocol", Arc::new(ProtocolAccessor));
        let unreachable = Arc::new(ProtocolUnreachable::new(ctx.clone()));
        protocols.set_factory(Some(Conduit::factory("protocol", None, Some(unreachable))));
        connect_ab(&ip, &protocols);

        let (icmp, echo) = icmp::protocol(&ctx);
        let udp = udp::protocol(&ctx);
        let (tcp, listeners) = tcp::protocol(&ctx);
        for (protocol, node) in [(IpProtocol::Icmp, &icmp), (IpProtocol::Udp, &udp),
            (IpProtocol::Tcp, &tcp)].iter()
        {
            if protocols.insert(Key::Protocol((*protocol).into()), (*node).clone()).is_err() {
                net_debug!("stack: {} registered twice", protocol);
            }
        }

        *ctx.graph.write() = Graph {
            ip: Arc::downgrade(&ip),
            protocols: Arc::downgrade(&protocols),
            icmp: Arc::downgrade(&icmp),
            echo: Arc::downgrade(&echo),
            udp: Arc::downgrade(&udp),
            tcp: Arc::downgrade(&tcp),
            listeners: Arc::downgrade(&listeners),
        };

        Stack {
            ctx,
            scopes,
            ip,
            listeners,
            interfaces: Mutex::new(Vec::new()),
            timer_thread: Mutex::new(None),
        }
    }

    /// The configuration the stack was created with.
    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// The interface and address registry.
    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    /// The timer queue.
    pub fn timers(&self) -> &Arc<Timers> {
        &self.ctx.timers
    }

    /// The current time of the stack's clock.
    pub fn now(&self) -> Instant {
        self.ctx.now()
    }

    /// The IP node, the root of the protocol graph.
    pub fn ip(&self) -> &Arc<Conduit> {
        &self.ip
    }

    /// The tree of listening streams, consulted when a segment matches no connection.
    pub fn listeners(&self) -> &Arc<Conduit> {
        &self.listeners
    }

    /// Attach a device as a new interface with the address and subnet `cidr`.
    pub fn add_interface(&self, device: Arc<dyn Device>, cidr: Ipv4Cidr) -> Result<Arc<Interface>> {
        let scope = self.ctx.registry.add_interface(cidr, device.mtu());
        let interface = Arc::new(Interface::new(scope, cidr, device));
        if let Err(err) = self.scopes.insert(Key::Scope(scope), interface.node().clone()) {
            self.ctx.registry.remove_interface(scope);
            return Err(err);
        }
        net_debug!("stack: interface {} is {}", scope, cidr);
        self.interfaces.lock().push(interface.clone());
        Ok(interface)
    }

    /// Detach the interface with this scope id.
    pub fn remove_interface(&self, scope: u32) -> bool {
        let interface = {
            let mut interfaces = self.interfaces.lock();
            match interfaces.iter().position(|interface| interface.scope() == scope) {
                Some(index) => interfaces.remove(index),
                None => return false,
            }
        };
        interface.stop();
        self.scopes.remove(interface.node());
        self.ctx.registry.remove_interface(scope);
        true
    }

    /// All attached interfaces.
    pub fn interfaces(&self) -> Vec<Arc<Interface>> {
        self.interfaces.lock().clone()
    }

    /// Deliver every frame queued at the devices and run due timers.
    ///
    /// Returns the number of frames delivered.
    pub fn poll(&self) -> usize {
        let mut delivered = 0;
        loop {
            self.ctx.timers.run_expired();
            let round: usize = self.interfaces().iter().map(|interface| interface.poll()).sum();
            if round == 0 {
                break;
            }
            delivered += round;
        }
        delivered
    }

    /// Run every timer that is due.
    pub fn run_timers(&self) -> usize {
        self.ctx.timers.run_expired()
    }

    /// Start the timer thread and the frame pump of every interface.
    pub fn start(&self) {
        let mut thread = self.timer_thread.lock();
        if thread.is_none() {
            *thread = Some(self.ctx.timers.start());
        }
        for interface in self.interfaces().iter() {
            interface.start();
        }
    }

    /// Stop all background threads.
    pub fn stop(&self) {
        for interface in self.interfaces().iter() {
            interface.stop();
        }
        self.ctx.timers.stop();
        if let Some(thread) = self.timer_thread.lock().take() {
            if thread.join().is_err() {
                net_debug!("stack: timer thread panicked");
            }
        }
    }

    /// A new, unbound stream socket.
    pub fn stream_socket(&self) -> StreamSocket {
        StreamSocket::new(self.ctx.clone())
    }

    /// A new, unbound datagram socket.
    pub fn datagram_socket(&self) -> DatagramSocket {
        DatagramSocket::new(self.ctx.clone())
    }

    /// A socket exchanging echo requests and replies with `remote`.
    pub fn ping_socket(&self, remote: Ipv4Address) -> Result<PingSocket> {
        PingSocket::new(self.ctx.clone(), remote)
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> &Arc<Context> {
        &self.ctx
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.stop();
    }
}
