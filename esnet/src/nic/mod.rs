//! Network interfaces.
//!
//! A [`Device`] moves raw IPv4 datagrams, one per frame. The stack wraps every device in an
//! [`Interface`]: an adapter leaf below the scope mux that writes outgoing frames to the device,
//! and a pump that reads incoming frames and starts them on their way toward the IP node.
//!
//! The pump either runs on its own thread, see [`Interface::start`], or is driven by hand through
//! [`Interface::poll`].
//!
//! [`Device`]: trait.Device.html
//! [`Interface`]: struct.Interface.html
//! [`Interface::start`]: struct.Interface.html#method.start
//! [`Interface::poll`]: struct.Interface.html#method.poll
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::conduit::{Conduit, Receiver, Side, Transporter};
use crate::layer::{Error, Result};
use crate::messenger::{InetMessenger, Messenger, Op};
use crate::time::Duration;
use crate::wire::Ipv4Cidr;

pub mod loopback;

/// How long the pump thread waits for a frame before checking whether it should stop.
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// A source and sink of link frames.
pub trait Device: Send + Sync {
    /// Queue one frame for transmission.
    fn send(&self, frame: &[u8]) -> Result<()>;

    /// Receive one frame into `buf` and return its length.
    ///
    /// Waits at most `timeout`, forever with `None`. An elapsed timeout is reported as
    /// `TimedOut`, an empty queue polled with a zero timeout as `WouldBlock`.
    fn recv(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize>;

    /// The largest frame the device carries.
    fn mtu(&self) -> usize;

    /// Called before the pump thread starts.
    fn start(&self) {}

    /// Called after the pump thread stopped.
    fn stop(&self) {}
}

/// A device attached to a stack.
pub struct Interface {
    scope: u32,
    cidr: Ipv4Cidr,
    device: Arc<dyn Device>,
    node: Arc<Conduit>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// The leaf writing outgoing frames to the device.
struct DeviceReceiver {
    device: Arc<dyn Device>,
}

impl Receiver for DeviceReceiver {
    fn input(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }

    fn output(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        match self.device.send(m.messenger.payload()) {
            Ok(()) => true,
            Err(err) => {
                net_debug!("nic: send of {} octets failed: {}", m.messenger.length(), err);
                false
            },
        }
    }

    fn error(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }
}

impl Interface {
    pub(crate) fn new(scope: u32, cidr: Ipv4Cidr, device: Arc<dyn Device>) -> Self {
        let node = Conduit::adapter("nic", Arc::new(DeviceReceiver { device: device.clone() }));
        Interface {
            scope,
            cidr,
            device,
            node,
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    /// The scope id, unique within the stack.
    pub fn scope(&self) -> u32 {
        self.scope
    }

    /// The address and subnet.
    pub fn cidr(&self) -> Ipv4Cidr {
        self.cidr
    }

    /// The device.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// The leaf of this interface in the graph.
    pub fn node(&self) -> &Arc<Conduit> {
        &self.node
    }

    /// Hand one received frame to the stack.
    pub fn deliver(&self, frame: &[u8]) -> bool {
        deliver(&self.node, self.scope, frame)
    }

    /// Deliver every frame the device has queued, without waiting.
    ///
    /// Returns the number of frames delivered.
    pub fn poll(&self) -> usize {
        let mut buf = vec![0; self.device.mtu()];
        let mut count = 0;
        loop {
            match self.device.recv(&mut buf, Some(Duration::from_millis(0))) {
                Ok(len) => {
                    self.deliver(&buf[..len]);
                    count += 1;
                },
                Err(Error::WouldBlock) | Err(Error::TimedOut) => break,
                Err(err) => {
                    net_debug!("nic: scope {} receive failed: {}", self.scope, err);
                    break;
                },
            }
        }
        count
    }

    /// Pump frames on a background thread until `stop`.
    pub fn start(&self) {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        self.device.start();

        let (device, node) = (self.device.clone(), self.node.clone());
        let running = self.running.clone();
        let scope = self.scope;
        *thread = Some(thread::spawn(move || {
            let mut buf = vec![0; device.mtu()];
            while running.load(Ordering::SeqCst) {
                match device.recv(&mut buf, Some(PUMP_INTERVAL)) {
                    Ok(len) => {
                        deliver(&node, scope, &buf[..len]);
                    },
                    Err(Error::WouldBlock) | Err(Error::TimedOut) => (),
                    Err(err) => {
                        net_debug!("nic: scope {} pump stopped: {}", scope, err);
                        break;
                    },
                }
            }
        }));
    }

    /// Stop the pump thread and wait for it.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                net_debug!("nic: scope {} pump panicked", self.scope);
            }
            self.device.stop();
        }
    }
}

fn deliver(node: &Arc<Conduit>, scope: u32, frame: &[u8]) -> bool {
    let mut m = InetMessenger::new(Messenger::from_slice(frame), Op::Input);
    m.scope = scope;
    Transporter::new(&mut m).send(node, Side::A)
}
