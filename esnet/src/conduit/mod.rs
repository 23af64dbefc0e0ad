//! The composition graph messages travel through.
//!
//! ## Structure
//!
//! A [`Conduit`] is one node of the graph. Its *A* side faces the network, its *B* side the
//! applications. There are four kinds of nodes:
//!
//! * A protocol node runs one layer's [`Receiver`] and has one neighbour on each side.
//! * A mux extracts a [`Key`] from the message with its [`Accessor`] and forwards it to the child
//!   registered under that key, or under `Key::Any` when there is no exact match.
//! * An adapter is a leaf, typically a socket or a device, with no B side.
//! * A factory hangs off a mux and handles lookup misses. It either clones its prototype into a
//!   new branch or lets its receiver answer the message, e.g. with a reset.
//!
//! A node holds its B side strongly and its A side weakly, so dropping a branch from its mux is
//! enough to free everything below it.
//!
//! ## Traversal
//!
//! A [`Visitor`] is carried through the graph by [`Conduit::accept`]. The node decides the
//! direction from the neighbour the visitor came from and the visitor decides what happens at
//! each node. The [`Transporter`] delivers messages, the other visitors install and remove
//! branches.
//!
//! [`Conduit`]: struct.Conduit.html
//! [`Conduit::accept`]: struct.Conduit.html#method.accept
//! [`Receiver`]: trait.Receiver.html
//! [`Key`]: enum.Key.html
//! [`Accessor`]: trait.Accessor.html
//! [`Visitor`]: trait.Visitor.html
//! [`Transporter`]: struct.Transporter.html
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::messenger::{InetMessenger, Op};
use crate::wire::Ipv4Address;

mod accessor;
mod visitor;

#[cfg(test)]
mod tests;

pub use self::accessor::{
    Accessor,
    IdentAccessor,
    LocalAddressAccessor,
    LocalPortAccessor,
    ProtocolAccessor,
    RemoteAddressAccessor,
    RemotePortAccessor,
    ScopeAccessor};

pub use self::visitor::{
    Broadcast,
    Connector,
    Disconnector,
    Installer,
    Transporter,
    Uninstaller,
    Visitor};

/// The two directions of the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// Toward the network.
    A,
    /// Toward the applications.
    B,
}

/// The key a mux demultiplexes on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Matches any message without an exact entry.
    Any,
    /// An interface scope id.
    Scope(u32),
    /// An IP protocol number.
    Protocol(u8),
    /// A port.
    Port(u16),
    /// An IPv4 address.
    Address(Ipv4Address),
    /// The IP identification of a fragmented datagram.
    Ident(u16),
}

impl Key {
    /// The key of a port, where port zero stands for any port.
    pub fn port(port: u16) -> Key {
        match port {
            0 => Key::Any,
            port => Key::Port(port),
        }
    }

    /// The key of an address, where the unspecified address stands for any address.
    pub fn address(address: Ipv4Address) -> Key {
        if address.is_unspecified() {
            Key::Any
        } else {
            Key::Address(address)
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Key::Any => write!(f, "*"),
            Key::Scope(scope) => write!(f, "scope {}", scope),
            Key::Protocol(protocol) => write!(f, "protocol {}", protocol),
            Key::Port(port) => write!(f, "port {}", port),
            Key::Address(address) => write!(f, "{}", address),
            Key::Ident(ident) => write!(f, "ident {}", ident),
        }
    }
}

/// The processing attached to a protocol node, an adapter or a factory.
///
/// Each method handles one operation and returns whether the message travels on. The node passed
/// along is the one the receiver is attached to, for a factory receiver the mux that missed.
pub trait Receiver: Send + Sync {
    /// Handle a message received from the network.
    fn input(&self, _m: &mut InetMessenger, _c: &Arc<Conduit>) -> bool {
        true
    }

    /// Handle a message sent toward the network.
    fn output(&self, _m: &mut InetMessenger, _c: &Arc<Conduit>) -> bool {
        true
    }

    /// Handle a report about an earlier output.
    fn error(&self, _m: &mut InetMessenger, _c: &Arc<Conduit>) -> bool {
        true
    }

    /// Create the receiver of a new branch installed under `key` for the message `m`.
    ///
    /// Prototypes return `Some`, everything else refuses to be cloned.
    fn clone_for(&self, _key: &Key, _m: &InetMessenger) -> Option<Arc<dyn Receiver>> {
        None
    }
}

/// Call the handler for the operation of `m`.
pub(crate) fn dispatch(receiver: &dyn Receiver, m: &mut InetMessenger, c: &Arc<Conduit>) -> bool {
    match m.op {
        Op::Input => receiver.input(m, c),
        Op::Output => receiver.output(m, c),
        Op::Error => receiver.error(m, c),
    }
}

/// A node of the graph.
pub struct Conduit {
    name: &'static str,
    side_a: Mutex<Option<Weak<Conduit>>>,
    kind: Kind,
}

enum Kind {
    Protocol(Protocol),
    Mux(Mux),
    Adapter(Arc<dyn Receiver>),
    Factory(Factory),
}

struct Protocol {
    side_b: Mutex<Option<Arc<Conduit>>>,
    receiver: Arc<dyn Receiver>,
}

/// The keyed children of a mux node.
pub struct Mux {
    accessor: Arc<dyn Accessor>,
    factory: Mutex<Option<Arc<Conduit>>>,
    children: Mutex<BTreeMap<Key, Arc<Conduit>>>,
}

struct Factory {
    prototype: Option<Arc<Conduit>>,
    receiver: Option<Arc<dyn Receiver>>,
}

impl Conduit {
    fn new(name: &'static str, kind: Kind) -> Arc<Conduit> {
        Arc::new(Conduit {
            name,
            side_a: Mutex::new(None),
            kind,
        })
    }

    /// A protocol node running `receiver`.
    pub fn protocol(name: &'static str, receiver: Arc<dyn Receiver>) -> Arc<Conduit> {
        Conduit::new(name, Kind::Protocol(Protocol {
            side_b: Mutex::new(None),
            receiver,
        }))
    }

    /// A mux keyed by `accessor`, without a factory.
    pub fn mux(name: &'static str, accessor: Arc<dyn Accessor>) -> Arc<Conduit> {
        Conduit::new(name, Kind::Mux(Mux {
            accessor,
            factory: Mutex::new(None),
            children: Mutex::new(BTreeMap::new()),
        }))
    }

    /// A leaf delivering to `receiver`.
    pub fn adapter(name: &'static str, receiver: Arc<dyn Receiver>) -> Arc<Conduit> {
        Conduit::new(name, Kind::Adapter(receiver))
    }

    /// A factory handling lookup misses of the mux it is attached to.
    ///
    /// On a miss the receiver, if any, handles the message and decides whether the lookup is
    /// retried. Without a receiver the missing branch is built from the prototype.
    pub fn factory(
        name: &'static str,
        prototype: Option<Arc<Conduit>>,
        receiver: Option<Arc<dyn Receiver>>,
    ) -> Arc<Conduit> {
        Conduit::new(name, Kind::Factory(Factory { prototype, receiver }))
    }

    /// The name given at construction, for tracing.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The neighbour toward the network.
    pub fn side_a(&self) -> Option<Arc<Conduit>> {
        self.side_a.lock().as_ref().and_then(Weak::upgrade)
    }

    fn set_side_a(&self, node: Option<&Arc<Conduit>>) {
        *self.side_a.lock() = node.map(Arc::downgrade);
    }

    /// The neighbour toward the applications, for protocol nodes.
    pub fn side_b(&self) -> Option<Arc<Conduit>> {
        match &self.kind {
            Kind::Protocol(protocol) => protocol.side_b.lock().clone(),
            _ => None,
        }
    }

    /// The mux state, if this is a mux.
    pub fn as_mux(&self) -> Option<&Mux> {
        match &self.kind {
            Kind::Mux(mux) => Some(mux),
            _ => None,
        }
    }

    /// Whether this node is a mux.
    pub fn is_mux(&self) -> bool {
        self.as_mux().is_some()
    }

    /// The receiver of a protocol node or adapter.
    pub fn receiver(&self) -> Option<&Arc<dyn Receiver>> {
        match &self.kind {
            Kind::Protocol(protocol) => Some(&protocol.receiver),
            Kind::Adapter(receiver) => Some(receiver),
            _ => None,
        }
    }

    /// Create a fresh copy of this prototype for a branch under `key`.
    ///
    /// A mux copies its accessor and factory but none of its children. Protocol nodes and
    /// adapters ask their receiver, which may refuse.
    pub fn clone_for(&self, key: &Key, m: &InetMessenger) -> Option<Arc<Conduit>> {
        match &self.kind {
            Kind::Mux(mux) => {
                let clone = Conduit::mux(self.name, mux.accessor.clone());
                clone.set_factory(mux.factory());
                Some(clone)
            },
            Kind::Protocol(protocol) => protocol.receiver.clone_for(key, m)
                .map(|receiver| Conduit::protocol(self.name, receiver)),
            Kind::Adapter(receiver) => receiver.clone_for(key, m)
                .map(|receiver| Conduit::adapter(self.name, receiver)),
            Kind::Factory(_) => None,
        }
    }

    /// Attach a factory to a mux. Ignored for other nodes.
    pub fn set_factory(&self, factory: Option<Arc<Conduit>>) {
        if let Kind::Mux(mux) = &self.kind {
            *mux.factory.lock() = factory;
        }
    }

    /// The child of a mux registered under exactly `key`.
    pub fn child(&self, key: &Key) -> Option<Arc<Conduit>> {
        self.as_mux().and_then(|mux| mux.get(key))
    }

    /// Register `child` under `key` of this mux.
    ///
    /// Fails with `AddrInUse` if the key is taken and with `Illegal` if this is not a mux.
    pub fn insert(self: &Arc<Self>, key: Key, child: Arc<Conduit>) -> crate::layer::Result<()> {
        let mux = self.as_mux().ok_or(crate::layer::Error::Illegal)?;
        let mut children = mux.children.lock();
        if children.contains_key(&key) {
            return Err(crate::layer::Error::AddrInUse);
        }
        child.set_side_a(Some(self));
        children.insert(key, child);
        Ok(())
    }

    /// Remove `child` from this mux. Returns whether it was found.
    pub fn remove(&self, child: &Arc<Conduit>) -> bool {
        let mux = match self.as_mux() {
            Some(mux) => mux,
            None => return false,
        };
        let mut children = mux.children.lock();
        let key = children.iter()
            .find(|(_, node)| Arc::ptr_eq(node, child))
            .map(|(key, _)| *key);
        match key {
            Some(key) => {
                children.remove(&key);
                child.set_side_a(None);
                true
            },
            None => false,
        }
    }

    fn is_side_a(&self, node: &Arc<Conduit>) -> bool {
        self.side_a().map_or(false, |a| Arc::ptr_eq(&a, node))
    }

    fn is_side_b(&self, node: &Arc<Conduit>) -> bool {
        self.side_b().map_or(false, |b| Arc::ptr_eq(&b, node))
    }

    /// Let the visitor pass this node, coming from `from`.
    ///
    /// Returns whether the visitor reached the end of its path, the semantics of which depend
    /// on the visitor: the transporter reports delivery, the installer success.
    pub fn accept(self: &Arc<Self>, v: &mut dyn Visitor, from: Option<&Arc<Conduit>>) -> bool {
        let toward = match &self.kind {
            Kind::Protocol(_) => match from {
                Some(from) if self.is_side_b(from) => Side::A,
                _ => Side::B,
            },
            Kind::Mux(_) => match from {
                Some(from) if !self.is_side_a(from) => Side::A,
                _ => Side::B,
            },
            Kind::Adapter(_) => match from {
                None => Side::A,
                Some(_) => Side::B,
            },
            Kind::Factory(_) => return false,
        };
        self.pass(v, toward, from)
    }

    /// Start a traversal at this node in an explicit direction.
    ///
    /// Starting toward A at a leaf skips its own receiver. This is how sockets send and how
    /// devices hand in received frames.
    pub fn start(self: &Arc<Self>, v: &mut dyn Visitor, toward: Side) -> bool {
        match (&self.kind, toward) {
            (Kind::Adapter(_), Side::A) | (Kind::Mux(_), Side::A) => self.forward(v, Side::A),
            _ => self.pass(v, toward, None),
        }
    }

    /// Hand the visitor to the neighbour toward `toward` without visiting this node.
    ///
    /// A receiver uses this to emit messages of its own, e.g. the fragments of a datagram.
    pub fn forward(self: &Arc<Self>, v: &mut dyn Visitor, toward: Side) -> bool {
        let next = match toward {
            Side::A => self.side_a(),
            Side::B => self.side_b(),
        };
        match next {
            Some(next) => next.accept(v, Some(self)),
            None => false,
        }
    }

    fn pass(self: &Arc<Self>, v: &mut dyn Visitor, toward: Side, from: Option<&Arc<Conduit>>)
        -> bool
    {
        match &self.kind {
            Kind::Protocol(protocol) => {
                if !v.at_protocol(self, &protocol.receiver, toward) {
                    return false;
                }
                let next = match toward {
                    Side::A => self.side_a(),
                    Side::B => self.side_b(),
                };
                match next {
                    Some(next) => next.accept(v, Some(self)),
                    None => {
                        net_trace!("{}: no neighbour toward {:?}", self.name, toward);
                        false
                    },
                }
            },
            Kind::Mux(mux) => match toward {
                Side::B => match v.at_mux(self, mux) {
                    Some(child) => child.accept(v, Some(self)),
                    None => false,
                },
                Side::A => {
                    if let Some(from) = from {
                        if !v.leave_mux(self, mux, from) {
                            return false;
                        }
                    }
                    match self.side_a() {
                        Some(next) => next.accept(v, Some(self)),
                        None => false,
                    }
                },
            },
            Kind::Adapter(receiver) => match toward {
                Side::B => v.at_adapter(self, receiver),
                Side::A => match self.side_a() {
                    Some(next) => next.accept(v, Some(self)),
                    None => false,
                },
            },
            Kind::Factory(_) => false,
        }
    }
}

impl Mux {
    /// Extract the key of a message.
    pub fn key(&self, m: &InetMessenger) -> Key {
        self.accessor.key(m)
    }

    /// The child under exactly `key`.
    pub fn get(&self, key: &Key) -> Option<Arc<Conduit>> {
        self.children.lock().get(key).cloned()
    }

    /// The child under `key`, falling back to the wildcard entry.
    pub fn lookup(&self, key: &Key) -> Option<Arc<Conduit>> {
        let children = self.children.lock();
        children.get(key)
            .or_else(|| children.get(&Key::Any))
            .cloned()
    }

    /// All children, in key order.
    pub fn children(&self) -> Vec<Arc<Conduit>> {
        self.children.lock().values().cloned().collect()
    }

    /// The number of children.
    pub fn len(&self) -> usize {
        self.children.lock().len()
    }

    /// Whether the mux has no children.
    pub fn is_empty(&self) -> bool {
        self.children.lock().is_empty()
    }

    /// The attached factory node.
    pub fn factory(&self) -> Option<Arc<Conduit>> {
        self.factory.lock().clone()
    }

    /// Let the factory handle a miss of `m` at `mux`. Returns whether to retry the lookup.
    fn on_miss(&self, m: &mut InetMessenger, mux: &Arc<Conduit>) -> bool {
        let factory = match self.factory() {
            Some(factory) => factory,
            None => return false,
        };
        let factory = match &factory.kind {
            Kind::Factory(factory) => factory,
            _ => return false,
        };
        match (&factory.receiver, &factory.prototype) {
            (Some(receiver), _) => dispatch(receiver.as_ref(), m, mux),
            (None, Some(_)) => Installer::new(m).install(mux).is_ok(),
            (None, None) => false,
        }
    }

    /// Insert the clone of the factory prototype for `key`, or return the existing child.
    fn instantiate(&self, mux: &Arc<Conduit>, key: Key, m: &InetMessenger)
        -> Option<Arc<Conduit>>
    {
        let factory = self.factory()?;
        let prototype = match &factory.kind {
            Kind::Factory(Factory { prototype: Some(prototype), .. }) => prototype.clone(),
            _ => return None,
        };
        let mut children = self.children.lock();
        if let Some(existing) = children.get(&key) {
            return Some(existing.clone());
        }
        let clone = prototype.clone_for(&key, m)?;
        clone.set_side_a(Some(mux));
        children.insert(key, clone.clone());
        Some(clone)
    }

    /// Whether the factory prototype of this mux is absent, i.e. leaves belong at this level.
    fn is_leaf_level(&self) -> bool {
        match self.factory() {
            Some(factory) => match &factory.kind {
                Kind::Factory(Factory { prototype, .. }) => prototype.is_none(),
                _ => true,
            },
            None => true,
        }
    }
}

/// Make `b` the B side neighbour of the protocol node `a`.
pub fn connect_ab(a: &Arc<Conduit>, b: &Arc<Conduit>) {
    if let Kind::Protocol(protocol) = &a.kind {
        *protocol.side_b.lock() = Some(b.clone());
    }
    b.set_side_a(Some(a));
}

/// Join two nodes on their A sides, e.g. the IP node and the mux of interfaces.
///
/// Both links are weak, the owner of the graph keeps both nodes alive.
pub fn connect_aa(x: &Arc<Conduit>, y: &Arc<Conduit>) {
    x.set_side_a(Some(y));
    y.set_side_a(Some(x));
}

impl fmt::Debug for Conduit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Protocol(_) => "protocol",
            Kind::Mux(_) => "mux",
            Kind::Adapter(_) => "adapter",
            Kind::Factory(_) => "factory",
        };
        f.debug_struct("Conduit")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}
