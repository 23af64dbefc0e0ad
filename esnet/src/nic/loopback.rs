//! Implementation of a software loop-back device.
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use parking_lot::{Condvar, Mutex};

use crate::layer::{Error, Result};
use crate::time::Duration;
use super::Device;

type Filter = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// A software loop-back device.
///
/// Frames sent on one end are queued for receipt on the other. A device created with `new` is
/// its own other end. A filter may drop frames on their way, for loss tests.
pub struct Loopback {
    mtu: usize,
    inbox: Arc<Queue>,
    outbox: Arc<Queue>,
    filter: Mutex<Option<Filter>>,
}

#[derive(Default)]
struct Queue {
    frames: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
}

impl Queue {
    fn push(&self, frame: &[u8]) {
        self.frames.lock().push_back(frame.to_vec());
        self.ready.notify_one();
    }
}

impl Loopback {
    /// A device receiving what it sends.
    pub fn new(mtu: usize) -> Arc<Self> {
        let queue = Arc::new(Queue::default());
        Arc::new(Loopback {
            mtu,
            inbox: queue.clone(),
            outbox: queue,
            filter: Mutex::new(None),
        })
    }

    /// Two devices connected back to back.
    pub fn pair(mtu: usize) -> (Arc<Self>, Arc<Self>) {
        let (left, right) = (Arc::new(Queue::default()), Arc::new(Queue::default()));
        let a = Loopback {
            mtu,
            inbox: left.clone(),
            outbox: right.clone(),
            filter: Mutex::new(None),
        };
        let b = Loopback {
            mtu,
            inbox: right,
            outbox: left,
            filter: Mutex::new(None),
        };
        (Arc::new(a), Arc::new(b))
    }

    /// Only send frames for which `filter` returns `true`.
    pub fn set_filter<F>(&self, filter: F)
        where F: FnMut(&[u8]) -> bool + Send + 'static
    {
        *self.filter.lock() = Some(Box::new(filter));
    }

    /// Send every frame again.
    pub fn clear_filter(&self) {
        *self.filter.lock() = None;
    }

    /// The number of frames waiting to be received.
    pub fn pending(&self) -> usize {
        self.inbox.frames.lock().len()
    }

    /// Take the next received frame without waiting.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.inbox.frames.lock().pop_front()
    }

    /// Queue a frame as if it had been received.
    pub fn inject(&self, frame: &[u8]) {
        self.inbox.push(frame);
    }
}

impl Device for Loopback {
    fn send(&self, frame: &[u8]) -> Result<()> {
        if frame.len() > self.mtu {
            return Err(Error::BadSize);
        }
        if let Some(filter) = self.filter.lock().as_mut() {
            if !filter(frame) {
                net_trace!("loopback: filtered {} octets", frame.len());
                return Ok(());
            }
        }
        self.outbox.push(frame);
        Ok(())
    }

    fn recv(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let deadline = timeout.map(|timeout| StdInstant::now() + timeout);
        let mut frames = self.inbox.frames.lock();
        loop {
            if let Some(frame) = frames.pop_front() {
                if frame.len() > buf.len() {
                    return Err(Error::BadSize);
                }
                buf[..frame.len()].copy_from_slice(&frame);
                return Ok(frame.len());
            }
            match deadline {
                None => self.inbox.ready.wait(&mut frames),
                Some(_) if timeout == Some(Duration::from_millis(0)) => {
                    return Err(Error::WouldBlock);
                },
                Some(deadline) => {
                    if self.inbox.ready.wait_until(&mut frames, deadline).timed_out()
                        && frames.is_empty()
                    {
                        return Err(Error::TimedOut);
                    }
                },
            }
        }
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pair_crosses() {
        let (a, b) = Loopback::pair(64);
        a.send(b"ping").unwrap();
        assert_eq!(a.pending(), 0);
        assert_eq!(b.pending(), 1);
        let mut buf = [0; 64];
        assert_eq!(b.recv(&mut buf, Some(Duration::from_millis(0))), Ok(4));
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(b.recv(&mut buf, Some(Duration::from_millis(0))), Err(Error::WouldBlock));
        assert_eq!(b.recv(&mut buf, Some(Duration::from_millis(1))), Err(Error::TimedOut));
    }

    #[test]
    fn filter_and_mtu() {
        let nic = Loopback::new(8);
        assert_eq!(nic.send(&[0; 9]), Err(Error::BadSize));
        nic.set_filter(|frame| frame[0] != 0xff);
        nic.send(&[0xff]).unwrap();
        nic.send(&[0x01]).unwrap();
        assert_eq!(nic.try_recv(), Some(vec![0x01]));
        assert_eq!(nic.try_recv(), None);
    }
}
