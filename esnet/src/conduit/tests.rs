use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::messenger::{InetMessenger, Messenger, Op};
use super::*;

/// Records every message it sees together with its own id.
struct Recorder {
    id: usize,
    next_id: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<(usize, Op, u16)>>>,
}

impl Recorder {
    fn prototype(log: &Arc<Mutex<Vec<(usize, Op, u16)>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            id: 0,
            next_id: Arc::new(AtomicUsize::new(1)),
            log: log.clone(),
        })
    }

    fn record(&self, m: &InetMessenger) -> bool {
        self.log.lock().push((self.id, m.op, m.local_port));
        true
    }
}

impl Receiver for Recorder {
    fn input(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        self.record(m)
    }

    fn output(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        self.record(m)
    }

    fn clone_for(&self, _: &Key, _: &InetMessenger) -> Option<Arc<dyn Receiver>> {
        Some(Arc::new(Recorder {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            next_id: self.next_id.clone(),
            log: self.log.clone(),
        }))
    }
}

struct Pass;

impl Receiver for Pass {}

fn message(op: Op, local_port: u16) -> InetMessenger {
    let mut m = InetMessenger::new(Messenger::new(4), op);
    m.local_port = local_port;
    m
}

type Log = Arc<Mutex<Vec<(usize, Op, u16)>>>;

/// A protocol node over a port mux whose factory clones recorder leaves.
fn port_tree() -> (Arc<Conduit>, Arc<Conduit>, Log) {
    let log = Log::default();
    let top = Conduit::protocol("top", Arc::new(Pass));
    let mux = Conduit::mux("ports", Arc::new(LocalPortAccessor));
    let prototype = Conduit::adapter("leaf", Recorder::prototype(&log));
    mux.set_factory(Some(Conduit::factory("ports", Some(prototype), None)));
    connect_ab(&top, &mux);
    (top, mux, log)
}

#[test]
fn factory_creates_one_branch_per_key() {
    let (top, mux, log) = port_tree();

    assert!(Transporter::new(&mut message(Op::Input, 7)).send(&top, Side::B));
    assert!(Transporter::new(&mut message(Op::Input, 9)).send(&top, Side::B));
    assert!(Transporter::new(&mut message(Op::Input, 7)).send(&top, Side::B));

    let mux = mux.as_mux().unwrap();
    assert_eq!(mux.len(), 2);
    let log = log.lock();
    assert_eq!(log.len(), 3);
    let (first, _, _) = log[0];
    let (second, _, _) = log[1];
    assert_ne!(first, second);
    assert_eq!(log[2].0, first);
    assert_eq!(log[2].2, 7);
}

#[test]
fn miss_without_factory_drops() {
    let top = Conduit::protocol("top", Arc::new(Pass));
    let mux = Conduit::mux("ports", Arc::new(LocalPortAccessor));
    connect_ab(&top, &mux);
    assert!(!Transporter::new(&mut message(Op::Input, 7)).send(&top, Side::B));
}

#[test]
fn wildcard_catches_unknown_keys() {
    let log = Log::default();
    let top = Conduit::protocol("top", Arc::new(Pass));
    let mux = Conduit::mux("ports", Arc::new(LocalPortAccessor));
    connect_ab(&top, &mux);
    let exact = Conduit::adapter("exact", Recorder::prototype(&log));
    let any = Recorder::prototype(&log).clone_for(&Key::Any, &message(Op::Input, 0)).unwrap();
    mux.insert(Key::Port(80), exact).unwrap();
    mux.insert(Key::Any, Conduit::adapter("any", any)).unwrap();

    Transporter::new(&mut message(Op::Input, 80)).send(&top, Side::B);
    Transporter::new(&mut message(Op::Input, 81)).send(&top, Side::B);
    let log = log.lock();
    assert_eq!(log[0].0, 0);
    assert_eq!(log[1].0, 1);
}

#[test]
fn installer_refuses_taken_key() {
    let top = Conduit::protocol("top", Arc::new(Pass));
    let mux = Conduit::mux("ports", Arc::new(LocalPortAccessor));
    connect_ab(&top, &mux);
    let m = message(Op::Output, 5);

    let leaf = Conduit::adapter("a", Arc::new(Pass));
    let installed = Installer::with_leaf(&m, leaf.clone()).install(&top).unwrap();
    assert!(Arc::ptr_eq(&installed, &leaf));
    assert!(leaf.side_a().map_or(false, |a| Arc::ptr_eq(&a, &mux)));

    let other = Conduit::adapter("b", Arc::new(Pass));
    assert_eq!(Installer::with_leaf(&m, other).install(&top).err(),
        Some(crate::layer::Error::AddrInUse));
}

/// protocol -> port mux -> address mux -> leaf, with prototypes for the inner mux.
fn two_level_tree() -> (Arc<Conduit>, Arc<Conduit>) {
    let top = Conduit::protocol("top", Arc::new(Pass));
    let ports = Conduit::mux("ports", Arc::new(LocalPortAccessor));
    let addresses = Conduit::mux("addresses", Arc::new(RemoteAddressAccessor));
    addresses.set_factory(Some(Conduit::factory("addresses", None, None)));
    ports.set_factory(Some(Conduit::factory("ports", Some(addresses), None)));
    connect_ab(&top, &ports);
    (top, ports)
}

#[test]
fn uninstaller_prunes_empty_muxes() {
    let (top, ports) = two_level_tree();
    let mut m = message(Op::Output, 5);
    let registry = crate::registry::Registry::new();
    m.remote = Some(registry.address(crate::wire::Ipv4Address::new(10, 0, 0, 1)));

    let first = Installer::with_leaf(&m, Conduit::adapter("a", Arc::new(Pass)))
        .install(&top).unwrap();
    m.remote = Some(registry.address(crate::wire::Ipv4Address::new(10, 0, 0, 2)));
    let second = Installer::with_leaf(&m, Conduit::adapter("b", Arc::new(Pass)))
        .install(&top).unwrap();
    assert_eq!(ports.as_mux().unwrap().len(), 1);

    assert!(Uninstaller::new().uninstall(&first));
    assert_eq!(ports.as_mux().unwrap().len(), 1);
    let mut uninstaller = Uninstaller::new();
    assert!(uninstaller.uninstall(&second));
    assert_eq!(uninstaller.removed(), 2);
    assert!(ports.as_mux().unwrap().is_empty());
    assert!(top.side_b().is_some());
}

#[test]
fn move_between_keys() {
    let (top, ports) = two_level_tree();
    let leaf = Conduit::adapter("a", Arc::new(Pass));
    let bound = message(Op::Output, 5);
    Installer::with_leaf(&bound, leaf.clone()).install(&top).unwrap();

    assert!(Disconnector::new().disconnect(&leaf));
    assert!(leaf.side_a().is_none());
    let connected = message(Op::Output, 6);
    Connector::new(&connected, leaf.clone()).connect(&top).unwrap();
    let ports = ports.as_mux().unwrap();
    assert!(ports.get(&Key::Port(5)).is_none());
    assert!(ports.get(&Key::Port(6)).is_some());
}

#[test]
fn broadcast_reaches_every_leaf() {
    let log = Log::default();
    let mux = Conduit::mux("ports", Arc::new(LocalPortAccessor));
    let prototype = Recorder::prototype(&log);
    for port in 1..4 {
        let receiver = prototype.clone_for(&Key::Port(port), &message(Op::Input, port)).unwrap();
        mux.insert(Key::Port(port), Conduit::adapter("leaf", receiver)).unwrap();
    }
    let mut m = message(Op::Input, 1);
    assert_eq!(Broadcast::new(&mut m).deliver(&mux), 3);
    assert_eq!(log.lock().len(), 3);
}

#[test]
fn output_climbs_through_protocols() {
    let log = Log::default();
    let bottom = Conduit::protocol("bottom", Recorder::prototype(&log));
    let top = Conduit::protocol("top", Arc::new(Pass));
    let mux = Conduit::mux("ports", Arc::new(LocalPortAccessor));
    let device = Conduit::adapter("device", Recorder::prototype(&log));
    let scope = Conduit::mux("scope", Arc::new(ScopeAccessor));
    scope.insert(Key::Any, device).unwrap();
    connect_aa(&bottom, &scope);
    connect_ab(&bottom, &top);
    connect_ab(&top, &mux);
    let leaf = Conduit::adapter("socket", Arc::new(Pass));
    mux.insert(Key::Port(3), leaf.clone()).unwrap();

    let mut m = message(Op::Output, 3);
    assert!(Transporter::new(&mut m).send(&leaf, Side::A));
    let log = log.lock();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|&(_, op, _)| op == Op::Output));
}
