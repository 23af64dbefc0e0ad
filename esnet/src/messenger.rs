//! Packet buffers with a cursor.
//!
//! A [`Messenger`] owns a fixed-capacity byte region. Every layer views and overwrites its header
//! in place at the cursor, then moves the cursor past the header on the way up or in front of
//! the payload on the way down. An [`InetMessenger`] adds the addressing that the conduit graph
//! demultiplexes on.
//!
//! All accessors are bounded. A request that would touch bytes outside `[0, len)` yields `None`
//! or is clamped, it never panics.
//!
//! [`Messenger`]: struct.Messenger.html
//! [`InetMessenger`]: struct.InetMessenger.html
use std::fmt;
use std::sync::Arc;

use crate::registry::Address;
use crate::wire::{ip_checksum, IpProtocol, Icmpv4Message, Ipv4Address};

/// A byte buffer with a bounded read/write cursor.
#[derive(Clone)]
pub struct Messenger {
    chunk: Box<[u8]>,
    len: usize,
    position: usize,
    kind: u8,
    saved: Vec<usize>,
}

impl Messenger {
    /// A zeroed buffer of `capacity` bytes, all of which are valid.
    pub fn new(capacity: usize) -> Self {
        Messenger {
            chunk: vec![0; capacity].into_boxed_slice(),
            len: capacity,
            position: 0,
            kind: 0,
            saved: Vec::new(),
        }
    }

    /// A buffer holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Messenger {
            chunk: data.to_vec().into_boxed_slice(),
            len: data.len(),
            position: 0,
            kind: 0,
            saved: Vec::new(),
        }
    }

    /// A buffer of `headroom + data.len()` bytes with `data` at the end and the cursor on it.
    ///
    /// Lower layers prepend their headers into the headroom.
    pub fn with_headroom(headroom: usize, data: &[u8]) -> Self {
        let mut messenger = Messenger::new(headroom + data.len());
        messenger.chunk[headroom..].copy_from_slice(data);
        messenger.position = headroom;
        messenger
    }

    /// The number of bytes that may ever be valid.
    pub fn capacity(&self) -> usize {
        self.chunk.len()
    }

    /// The number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether there are no valid bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Change the number of valid bytes.
    ///
    /// Requests beyond the capacity are ignored. The cursor is pulled back to the new end if it
    /// was past it.
    pub fn set_len(&mut self, len: usize) -> bool {
        if len > self.chunk.len() {
            return false;
        }
        self.len = len;
        self.position = self.position.min(len);
        true
    }

    /// The current cursor.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor to an absolute offset. Out-of-range offsets are ignored.
    pub fn set_position(&mut self, position: usize) {
        if position <= self.len {
            self.position = position;
        }
    }

    /// Move the cursor by a signed offset.
    ///
    /// Refuses, and returns `false`, when the result would lie outside `[0, len]`.
    pub fn move_position(&mut self, delta: isize) -> bool {
        let target = if delta < 0 {
            self.position.checked_sub(delta.unsigned_abs())
        } else {
            self.position.checked_add(delta as usize)
        };
        match target {
            Some(target) if target <= self.len => {
                self.position = target;
                true
            },
            _ => false,
        }
    }

    /// The number of valid bytes at and after the cursor.
    pub fn length(&self) -> usize {
        self.len - self.position
    }

    /// The type tag, the IP protocol number of the content.
    pub fn kind(&self) -> u8 {
        self.kind
    }

    /// Set the type tag.
    pub fn set_kind(&mut self, kind: u8) {
        self.kind = kind;
    }

    /// Remember the cursor.
    pub fn save_position(&mut self) {
        self.saved.push(self.position);
    }

    /// Return to the most recently saved cursor.
    pub fn restore_position(&mut self) -> bool {
        match self.saved.pop() {
            Some(position) => {
                self.set_position(position);
                true
            },
            None => false,
        }
    }

    /// A view of `count` bytes at absolute `offset`.
    ///
    /// `None` unless `count > 0` and `offset + count <= len`.
    pub fn fix(&self, count: usize, offset: usize) -> Option<&[u8]> {
        let end = Self::checked_range(count, offset, self.len)?;
        Some(&self.chunk[offset..end])
    }

    /// A mutable view of `count` bytes at absolute `offset`.
    pub fn fix_mut(&mut self, count: usize, offset: usize) -> Option<&mut [u8]> {
        let end = Self::checked_range(count, offset, self.len)?;
        Some(&mut self.chunk[offset..end])
    }

    /// A view of `count` bytes at the cursor.
    pub fn fix_here(&self, count: usize) -> Option<&[u8]> {
        self.fix(count, self.position)
    }

    /// A mutable view of `count` bytes at the cursor.
    pub fn fix_here_mut(&mut self, count: usize) -> Option<&mut [u8]> {
        let position = self.position;
        self.fix_mut(count, position)
    }

    fn checked_range(count: usize, offset: usize, len: usize) -> Option<usize> {
        if count == 0 || offset >= len {
            return None;
        }
        let end = offset.checked_add(count)?;
        if end > len {
            None
        } else {
            Some(end)
        }
    }

    /// All valid bytes from the cursor on.
    pub fn payload(&self) -> &[u8] {
        &self.chunk[self.position..self.len]
    }

    /// All valid bytes from the cursor on, mutably.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.chunk[self.position..self.len]
    }

    /// All valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.chunk[..self.len]
    }

    /// Copy bytes at the cursor into `buf` and advance. Returns the number of bytes copied.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let count = buf.len().min(self.length());
        buf[..count].copy_from_slice(&self.chunk[self.position..self.position + count]);
        self.position += count;
        count
    }

    /// Copy `data` to the cursor and advance. Returns the number of bytes copied.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.length());
        self.chunk[self.position..self.position + count].copy_from_slice(&data[..count]);
        self.position += count;
        count
    }

    /// The one's complement sum of `count` bytes at the cursor, clamped to the valid bytes.
    pub fn sum_up(&self, count: usize) -> u16 {
        let end = self.position + count.min(self.length());
        ip_checksum::data(&self.chunk[self.position..end])
    }
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("len", &self.len)
            .field("position", &self.position)
            .field("kind", &self.kind)
            .finish()
    }
}

/// The direction and meaning of a message in the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    /// Received from the network, travelling toward the applications.
    Input,
    /// Sent by an application, travelling toward the network.
    Output,
    /// An error report about an earlier output, travelling toward the applications.
    Error,
}

/// The error carried by an `Op::Error` message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorCode {
    /// The ICMP message type that reported the error.
    pub message: Icmpv4Message,
    /// The ICMP code.
    pub code: u8,
    /// Next-hop MTU of a "fragmentation required" report, zero otherwise.
    pub mtu: u16,
}

/// A messenger with the addressing used to route it through the graph.
///
/// For input the local side is the destination of the datagram. For error reports the addressing
/// describes the quoted datagram as the local stack sent it, so the local side is its source.
#[derive(Clone, Debug)]
pub struct InetMessenger {
    pub messenger: Messenger,
    pub op: Op,
    pub local: Option<Arc<Address>>,
    pub remote: Option<Arc<Address>>,
    pub local_port: u16,
    pub remote_port: u16,
    /// The interface the message arrived on or leaves through, `0` when unspecified.
    pub scope: u32,
    /// The IP identification of a fragment.
    pub ident: u16,
    /// Whether the datagram must not be fragmented on output.
    pub dont_frag: bool,
    pub error: Option<ErrorCode>,
}

impl InetMessenger {
    /// Wrap a messenger for an operation with no addressing yet.
    pub fn new(messenger: Messenger, op: Op) -> Self {
        InetMessenger {
            messenger,
            op,
            local: None,
            remote: None,
            local_port: 0,
            remote_port: 0,
            scope: 0,
            ident: 0,
            dont_frag: false,
            error: None,
        }
    }

    /// The local IP address, unspecified when not set.
    pub fn local_ip(&self) -> Ipv4Address {
        self.local.as_ref().map(|a| a.ip()).unwrap_or(Ipv4Address::UNSPECIFIED)
    }

    /// The remote IP address, unspecified when not set.
    pub fn remote_ip(&self) -> Ipv4Address {
        self.remote.as_ref().map(|a| a.ip()).unwrap_or(Ipv4Address::UNSPECIFIED)
    }

    /// The protocol of the content, from the type tag.
    pub fn protocol(&self) -> IpProtocol {
        IpProtocol::from(self.messenger.kind())
    }

    /// Set the protocol of the content.
    pub fn set_protocol(&mut self, protocol: IpProtocol) {
        self.messenger.set_kind(protocol.into())
    }

    /// Swap local and remote addressing, e.g. to answer a message.
    pub fn reverse(&mut self) {
        core::mem::swap(&mut self.local, &mut self.remote);
        core::mem::swap(&mut self.local_port, &mut self.remote_port);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fix_rejects_out_of_range() {
        let m = Messenger::from_slice(&[1, 2, 3, 4]);
        assert_eq!(m.fix(2, 2), Some(&[3, 4][..]));
        assert_eq!(m.fix(0, 0), None);
        assert_eq!(m.fix(1, 4), None);
        assert_eq!(m.fix(3, 2), None);
        assert_eq!(m.fix(usize::max_value(), 1), None);
    }

    #[test]
    fn cursor_stays_in_bounds() {
        let mut m = Messenger::from_slice(&[0; 8]);
        assert!(m.move_position(8));
        assert_eq!(m.length(), 0);
        assert!(!m.move_position(1));
        assert!(!m.move_position(-9));
        assert!(m.move_position(-3));
        assert_eq!(m.position(), 5);
        m.set_position(9);
        assert_eq!(m.position(), 5);
        assert_eq!(m.fix_here(3), Some(&[0, 0, 0][..]));
        assert_eq!(m.fix_here(4), None);
    }

    #[test]
    fn read_write_clamp() {
        let mut m = Messenger::new(4);
        assert_eq!(m.write(&[9, 8, 7, 6, 5]), 4);
        m.set_position(1);
        let mut buf = [0; 8];
        assert_eq!(m.read(&mut buf), 3);
        assert_eq!(&buf[..3], &[8, 7, 6]);
    }

    #[test]
    fn save_and_restore() {
        let mut m = Messenger::new(10);
        m.set_position(3);
        m.save_position();
        m.move_position(4);
        assert!(m.restore_position());
        assert_eq!(m.position(), 3);
        assert!(!m.restore_position());
    }

    #[test]
    fn sum_up_words() {
        let mut m = Messenger::from_slice(&[0xff, 0x00, 0x12, 0x34, 0x01]);
        // 0xff00 + 0x1234 overflows, the carry wraps around.
        assert_eq!(m.sum_up(4), 0x1135);
        m.set_position(2);
        assert_eq!(m.sum_up(16), 0x1234 + 0x0100);

        let m = Messenger::from_slice(&[0xff, 0xff, 0x00, 0x01]);
        assert_eq!(m.sum_up(4), 0x0001);
    }

    #[test]
    fn headroom_prepends() {
        let mut m = Messenger::with_headroom(4, b"abc");
        assert_eq!(m.payload(), b"abc");
        assert!(m.move_position(-4));
        assert_eq!(m.length(), 7);
        assert!(m.set_len(5));
        assert!(!m.set_len(8));
    }
}
