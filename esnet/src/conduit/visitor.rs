use std::sync::Arc;

use crate::layer::{Error, Result};
use crate::messenger::InetMessenger;
use super::{dispatch, Conduit, Mux, Receiver, Side};

/// A traversal of the graph.
///
/// The node calls back into the visitor for every step. Returning `false` (or `None` at a mux)
/// ends the traversal.
pub trait Visitor {
    /// Pass a protocol node in direction `toward`.
    fn at_protocol(&mut self, c: &Arc<Conduit>, receiver: &Arc<dyn Receiver>, toward: Side)
        -> bool;

    /// Choose the child of a mux when travelling toward B.
    fn at_mux(&mut self, c: &Arc<Conduit>, mux: &Mux) -> Option<Arc<Conduit>>;

    /// Leave a mux toward A, coming from its child `from`.
    fn leave_mux(&mut self, _c: &Arc<Conduit>, _mux: &Mux, _from: &Arc<Conduit>) -> bool {
        true
    }

    /// Arrive at a leaf.
    fn at_adapter(&mut self, c: &Arc<Conduit>, receiver: &Arc<dyn Receiver>) -> bool;
}

/// Delivers a message, running every receiver on its path.
///
/// A mux that finds no child for the key asks its factory. When that does not help either the
/// message is dropped silently.
pub struct Transporter<'a> {
    m: &'a mut InetMessenger,
}

impl<'a> Transporter<'a> {
    /// Carry `m`.
    pub fn new(m: &'a mut InetMessenger) -> Self {
        Transporter { m }
    }

    /// Start at `node` toward `toward`. Returns whether the message reached the end of its path.
    pub fn send(&mut self, node: &Arc<Conduit>, toward: Side) -> bool {
        node.start(self, toward)
    }
}

impl Visitor for Transporter<'_> {
    fn at_protocol(&mut self, c: &Arc<Conduit>, receiver: &Arc<dyn Receiver>, _: Side) -> bool {
        dispatch(receiver.as_ref(), self.m, c)
    }

    fn at_mux(&mut self, c: &Arc<Conduit>, mux: &Mux) -> Option<Arc<Conduit>> {
        let key = mux.key(self.m);
        if let Some(child) = mux.lookup(&key) {
            return Some(child);
        }
        if mux.on_miss(self.m, c) {
            return mux.lookup(&key);
        }
        net_trace!("{}: no branch for {}", c.name(), key);
        None
    }

    fn at_adapter(&mut self, c: &Arc<Conduit>, receiver: &Arc<dyn Receiver>) -> bool {
        dispatch(receiver.as_ref(), self.m, c)
    }
}

/// Installs the branch for the exact keys of a message.
///
/// Walking toward B, every missing mux is cloned from the prototype of its parent's factory. At
/// the level whose factory has no prototype the given leaf is inserted; without a leaf the walk
/// ends where the prototypes do, with a cloned leaf. No receiver runs.
pub struct Installer<'a> {
    m: &'a InetMessenger,
    leaf: Option<Arc<Conduit>>,
    result: Option<Result<Arc<Conduit>>>,
}

impl<'a> Installer<'a> {
    /// Install the branch described by `m`, cloning its leaf from the prototypes.
    pub fn new(m: &'a InetMessenger) -> Self {
        Installer { m, leaf: None, result: None }
    }

    /// Install the branch described by `m` and put `leaf` at its end.
    pub fn with_leaf(m: &'a InetMessenger, leaf: Arc<Conduit>) -> Self {
        Installer { m, leaf: Some(leaf), result: None }
    }

    /// Run from `start`, a protocol node or mux. Returns the leaf of the branch.
    pub fn install(mut self, start: &Arc<Conduit>) -> Result<Arc<Conduit>> {
        start.start(&mut self, Side::B);
        self.result.unwrap_or(Err(Error::Illegal))
    }
}

impl Visitor for Installer<'_> {
    fn at_protocol(&mut self, _: &Arc<Conduit>, _: &Arc<dyn Receiver>, toward: Side) -> bool {
        toward == Side::B
    }

    fn at_mux(&mut self, c: &Arc<Conduit>, mux: &Mux) -> Option<Arc<Conduit>> {
        let key = mux.key(self.m);
        if let Some(child) = mux.get(&key) {
            if child.is_mux() {
                return Some(child);
            }
            self.result = Some(match self.leaf {
                Some(_) => Err(Error::AddrInUse),
                None => Ok(child),
            });
            return None;
        }

        if mux.is_leaf_level() {
            self.result = Some(match self.leaf.take() {
                Some(leaf) => c.insert(key, leaf.clone()).map(|_| leaf),
                None => Err(Error::Illegal),
            });
            return None;
        }

        match mux.instantiate(c, key, self.m) {
            Some(clone) if clone.is_mux() => Some(clone),
            Some(clone) => {
                self.result = Some(Ok(clone));
                None
            },
            None => {
                self.result = Some(Err(Error::Illegal));
                None
            },
        }
    }

    fn at_adapter(&mut self, c: &Arc<Conduit>, _: &Arc<dyn Receiver>) -> bool {
        self.result = Some(Ok(c.clone()));
        true
    }
}

/// Removes a branch and every mux it leaves empty.
///
/// Pruning stops at the first mux that still has children and at muxes whose parent is not a
/// mux, those belong to a protocol.
#[derive(Default)]
pub struct Uninstaller {
    removed: usize,
}

impl Uninstaller {
    /// A fresh uninstaller.
    pub fn new() -> Self {
        Uninstaller::default()
    }

    /// Remove `leaf` from its mux. Returns whether anything was removed.
    pub fn uninstall(&mut self, leaf: &Arc<Conduit>) -> bool {
        if let Some(parent) = leaf.side_a() {
            if parent.is_mux() {
                parent.accept(self, Some(leaf));
            }
        }
        self.removed > 0
    }

    /// The number of nodes removed so far.
    pub fn removed(&self) -> usize {
        self.removed
    }
}

impl Visitor for Uninstaller {
    fn at_protocol(&mut self, _: &Arc<Conduit>, _: &Arc<dyn Receiver>, _: Side) -> bool {
        false
    }

    fn at_mux(&mut self, _: &Arc<Conduit>, _: &Mux) -> Option<Arc<Conduit>> {
        None
    }

    fn leave_mux(&mut self, c: &Arc<Conduit>, mux: &Mux, from: &Arc<Conduit>) -> bool {
        if c.remove(from) {
            self.removed += 1;
        }
        mux.is_empty() && c.side_a().map_or(false, |parent| parent.is_mux())
    }

    fn at_adapter(&mut self, _: &Arc<Conduit>, _: &Arc<dyn Receiver>) -> bool {
        false
    }
}

/// Detaches a branch so that it can be connected under different keys.
///
/// The leaf keeps its state, only its place in the graph is given up.
#[derive(Default)]
pub struct Disconnector {
    inner: Uninstaller,
}

impl Disconnector {
    /// A fresh disconnector.
    pub fn new() -> Self {
        Disconnector::default()
    }

    /// Detach `leaf`. Returns whether it was attached.
    pub fn disconnect(&mut self, leaf: &Arc<Conduit>) -> bool {
        self.inner.uninstall(leaf)
    }
}

/// Connects a detached leaf under the keys of a message.
pub struct Connector<'a> {
    inner: Installer<'a>,
}

impl<'a> Connector<'a> {
    /// Prepare to connect `leaf` under the keys of `m`.
    pub fn new(m: &'a InetMessenger, leaf: Arc<Conduit>) -> Self {
        Connector { inner: Installer::with_leaf(m, leaf) }
    }

    /// Run from `start`.
    pub fn connect(self, start: &Arc<Conduit>) -> Result<Arc<Conduit>> {
        self.inner.install(start)
    }
}

/// Delivers a copy of a message to every branch below a mux.
pub struct Broadcast<'a> {
    m: &'a mut InetMessenger,
    delivered: usize,
}

impl<'a> Broadcast<'a> {
    /// Carry `m`.
    pub fn new(m: &'a mut InetMessenger) -> Self {
        Broadcast { m, delivered: 0 }
    }

    /// Fan out from `mux`. Returns the number of leaves that consumed a copy.
    pub fn deliver(mut self, mux: &Arc<Conduit>) -> usize {
        mux.start(&mut self, Side::B);
        self.delivered
    }
}

impl Visitor for Broadcast<'_> {
    fn at_protocol(&mut self, c: &Arc<Conduit>, receiver: &Arc<dyn Receiver>, _: Side) -> bool {
        dispatch(receiver.as_ref(), self.m, c)
    }

    fn at_mux(&mut self, c: &Arc<Conduit>, mux: &Mux) -> Option<Arc<Conduit>> {
        let original = self.m.clone();
        for child in mux.children() {
            *self.m = original.clone();
            child.accept(self, Some(c));
        }
        None
    }

    fn at_adapter(&mut self, c: &Arc<Conduit>, receiver: &Arc<dyn Receiver>) -> bool {
        if dispatch(receiver.as_ref(), self.m, c) {
            self.delivered += 1;
        }
        true
    }
}
