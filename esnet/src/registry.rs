//! Interned addresses and the configured interfaces.
//!
//! Every message carries its addresses as shared [`Address`] handles. The registry hands out one
//! handle per IP address so that state learned about a peer, currently its path MTU, is seen by
//! every connection talking to it.
//!
//! [`Address`]: struct.Address.html
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::wire::{Ipv4Address, Ipv4Cidr, IPV4_MIN_MTU};

/// A shared handle on an IPv4 address.
pub struct Address {
    ip: Ipv4Address,
    path_mtu: AtomicUsize,
}

/// One configured interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// The scope id, the key of the interface in the scope mux.
    pub scope: u32,
    /// The address and subnet of the interface.
    pub cidr: Ipv4Cidr,
    /// The largest datagram the link carries.
    pub mtu: usize,
}

/// Addresses with learned state kept alive by the registry itself.
const PINNED_MAX: usize = 256;

/// Address interning and interface configuration of one stack.
pub struct Registry {
    addresses: Mutex<HashMap<Ipv4Address, Weak<Address>>>,
    pinned: Mutex<HashMap<Ipv4Address, Arc<Address>>>,
    interfaces: RwLock<Vec<InterfaceInfo>>,
    next_scope: AtomicU32,
}

impl Address {
    fn new(ip: Ipv4Address) -> Self {
        Address {
            ip,
            path_mtu: AtomicUsize::new(0),
        }
    }

    /// The IP address.
    pub fn ip(&self) -> Ipv4Address {
        self.ip
    }

    /// The path MTU learned toward this address.
    pub fn path_mtu(&self) -> Option<usize> {
        match self.path_mtu.load(Ordering::Relaxed) {
            0 => None,
            mtu => Some(mtu),
        }
    }

    /// Record a path MTU, e.g. from a "fragmentation needed" report.
    ///
    /// Values below the minimum every host must accept are raised to it.
    pub fn set_path_mtu(&self, mtu: usize) {
        self.path_mtu.store(mtu.max(IPV4_MIN_MTU), Ordering::Relaxed);
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.ip)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.ip)
    }
}

impl Registry {
    /// A registry without interfaces.
    pub fn new() -> Self {
        Registry {
            addresses: Mutex::new(HashMap::new()),
            pinned: Mutex::new(HashMap::new()),
            interfaces: RwLock::new(Vec::new()),
            next_scope: AtomicU32::new(1),
        }
    }

    /// The shared handle of an IP address.
    pub fn address(&self, ip: Ipv4Address) -> Arc<Address> {
        let mut addresses = self.addresses.lock();
        if let Some(address) = addresses.get(&ip).and_then(Weak::upgrade) {
            return address;
        }
        if addresses.len() >= 64 {
            addresses.retain(|_, address| address.strong_count() > 0);
        }
        let address = Arc::new(Address::new(ip));
        addresses.insert(ip, Arc::downgrade(&address));
        address
    }

    /// Record the path MTU toward `address` and keep the handle interned.
    ///
    /// The value outlives the last connection to the peer.
    pub fn set_path_mtu(&self, address: &Arc<Address>, mtu: usize) {
        address.set_path_mtu(mtu);
        let mut pinned = self.pinned.lock();
        if pinned.len() >= PINNED_MAX && !pinned.contains_key(&address.ip) {
            pinned.retain(|_, address| Arc::strong_count(address) > 1);
        }
        if pinned.len() < PINNED_MAX {
            pinned.insert(address.ip, address.clone());
        }
    }

    /// Configure a new interface and return its scope id.
    pub fn add_interface(&self, cidr: Ipv4Cidr, mtu: usize) -> u32 {
        let scope = self.next_scope.fetch_add(1, Ordering::Relaxed);
        self.interfaces.write().push(InterfaceInfo { scope, cidr, mtu });
        scope
    }

    /// Remove the interface with this scope.
    pub fn remove_interface(&self, scope: u32) {
        self.interfaces.write().retain(|info| info.scope != scope);
    }

    /// The interface with this scope.
    pub fn interface(&self, scope: u32) -> Option<InterfaceInfo> {
        self.interfaces.read().iter().find(|info| info.scope == scope).copied()
    }

    /// All configured interfaces.
    pub fn interfaces(&self) -> Vec<InterfaceInfo> {
        self.interfaces.read().clone()
    }

    /// Choose the interface to reach `dst`.
    ///
    /// The interface whose subnet contains the destination wins, otherwise the first configured
    /// interface acts as the default route.
    pub fn route(&self, dst: Ipv4Address) -> Option<InterfaceInfo> {
        let interfaces = self.interfaces.read();
        interfaces.iter()
            .find(|info| info.cidr.contains(dst))
            .or_else(|| interfaces.first())
            .copied()
    }

    /// Whether a datagram for `dst` arriving at `scope` is meant for this stack.
    pub fn accepts(&self, scope: u32, dst: Ipv4Address) -> bool {
        self.interfaces.read().iter()
            .any(|info| (info.scope == scope || info.cidr.address() == dst)
                && info.cidr.accepts(dst))
    }

    /// Whether `ip` is the address of a local interface.
    pub fn is_local(&self, ip: Ipv4Address) -> bool {
        self.interfaces.read().iter().any(|info| info.cidr.address() == ip)
    }

    /// Whether `ip` is a broadcast address of some interface.
    pub fn is_broadcast(&self, ip: Ipv4Address) -> bool {
        ip.is_broadcast() || self.interfaces.read().iter()
            .any(|info| info.cidr.broadcast() == Some(ip))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interning_shares_state() {
        let registry = Registry::new();
        let ip = Ipv4Address::new(10, 0, 0, 2);
        let a = registry.address(ip);
        let b = registry.address(ip);
        assert!(Arc::ptr_eq(&a, &b));
        a.set_path_mtu(1000);
        assert_eq!(b.path_mtu(), Some(1000));
        b.set_path_mtu(100);
        assert_eq!(a.path_mtu(), Some(IPV4_MIN_MTU));
    }

    #[test]
    fn learned_path_mtu_is_kept() {
        let registry = Registry::new();
        let ip = Ipv4Address::new(10, 0, 0, 2);
        registry.set_path_mtu(&registry.address(ip), 1000);
        assert_eq!(registry.address(ip).path_mtu(), Some(1000));

        // Without the registry's pin the state dies with the handle.
        registry.address(ip).set_path_mtu(900);
        let other = Ipv4Address::new(10, 0, 0, 3);
        registry.address(other).set_path_mtu(900);
        assert_eq!(registry.address(ip).path_mtu(), Some(900));
        assert_eq!(registry.address(other).path_mtu(), None);
    }

    #[test]
    fn route_prefers_subnet() {
        let registry = Registry::new();
        let first = registry.add_interface(Ipv4Cidr::new(Ipv4Address::new(10, 0, 0, 1), 24), 1500);
        let second = registry.add_interface(Ipv4Cidr::new(Ipv4Address::new(10, 1, 0, 1), 16), 9000);
        assert_eq!(registry.route(Ipv4Address::new(10, 1, 3, 4)).map(|i| i.scope), Some(second));
        assert_eq!(registry.route(Ipv4Address::new(8, 8, 8, 8)).map(|i| i.scope), Some(first));
        assert!(registry.accepts(first, Ipv4Address::new(10, 0, 0, 255)));
        assert!(registry.accepts(first, Ipv4Address::new(10, 0, 0, 1)));
        assert!(!registry.accepts(first, Ipv4Address::new(10, 0, 0, 7)));
        registry.remove_interface(first);
        assert_eq!(registry.route(Ipv4Address::new(8, 8, 8, 8)).map(|i| i.scope), Some(second));
    }
}
