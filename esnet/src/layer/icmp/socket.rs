use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::conduit::{Conduit, Installer, Receiver, Side, Transporter, Uninstaller};
use crate::layer::{Error, Result};
use crate::messenger::{InetMessenger, Messenger, Op};
use crate::stack::Context;
use crate::time::Duration;
use crate::wire::{icmpv4_packet, Checksum, Icmpv4Repr, IpProtocol, Ipv4Address};
use crate::wire::{ICMPV4_HEADER_LEN, IPV4_HEADER_LEN};

/// Exchanges echo requests and replies with one remote host.
///
/// Replies are matched by the remote address and an identifier chosen when the socket is
/// created. They queue until read, up to the configured datagram queue length.
pub struct PingSocket {
    ctx: Arc<Context>,
    remote: Ipv4Address,
    ident: u16,
    node: Arc<Conduit>,
    shared: Arc<Shared>,
    timeout: Option<Duration>,
}

struct Shared {
    replies: Mutex<VecDeque<(u16, Vec<u8>)>>,
    readable: Condvar,
    limit: usize,
}

struct EchoLeaf {
    shared: Arc<Shared>,
}

impl Receiver for EchoLeaf {
    fn input(&self, m: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        let packet = match icmpv4_packet::new_checked(m.messenger.payload()) {
            Ok(packet) => packet,
            Err(_) => return false,
        };
        let mut replies = self.shared.replies.lock();
        if replies.len() >= self.shared.limit {
            net_trace!("icmp: echo queue full, dropping reply");
            return false;
        }
        replies.push_back((packet.echo_seq_no(), packet.payload_slice().to_vec()));
        self.shared.readable.notify_all();
        true
    }

    fn error(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }
}

impl PingSocket {
    pub(crate) fn new(ctx: Arc<Context>, remote: Ipv4Address) -> Result<Self> {
        let echo = ctx.echo().ok_or(Error::Illegal)?;
        let shared = Arc::new(Shared {
            replies: Mutex::new(VecDeque::new()),
            readable: Condvar::new(),
            limit: ctx.config.datagram_queue,
        });

        let mut m = InetMessenger::new(Messenger::new(0), Op::Input);
        m.remote = Some(ctx.registry.address(remote));
        for _ in 0..u16::max_value() {
            m.ident = ctx.echo_ident();
            let leaf = Conduit::adapter("ping", Arc::new(EchoLeaf { shared: shared.clone() }));
            match Installer::with_leaf(&m, leaf).install(&echo) {
                Ok(node) => return Ok(PingSocket {
                    ctx,
                    remote,
                    ident: m.ident,
                    node,
                    shared,
                    timeout: None,
                }),
                Err(Error::AddrInUse) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(Error::Exhausted)
    }

    /// The remote host.
    pub fn remote(&self) -> Ipv4Address {
        self.remote
    }

    /// The echo identifier of this socket.
    pub fn ident(&self) -> u16 {
        self.ident
    }

    /// Limit how long `recv` waits. `None` waits forever, a zero duration not at all.
    ///
    /// A stack on a manual clock never waits.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Send an echo request with sequence number `seq_no` carrying `payload`.
    pub fn send(&self, seq_no: u16, payload: &[u8]) -> Result<()> {
        let repr = Icmpv4Repr::EchoRequest {
            ident: self.ident,
            seq_no,
            payload_len: payload.len(),
        };
        let mut bytes = vec![0; repr.buffer_len()];
        bytes[ICMPV4_HEADER_LEN..].copy_from_slice(payload);
        repr.emit(icmpv4_packet::new_unchecked_mut(&mut bytes), Checksum::Ignored);

        let messenger = Messenger::with_headroom(IPV4_HEADER_LEN, &bytes);
        let mut m = InetMessenger::new(messenger, Op::Output);
        m.remote = Some(self.ctx.registry.address(self.remote));
        m.set_protocol(IpProtocol::Icmp);
        if Transporter::new(&mut m).send(&self.node, Side::A) {
            Ok(())
        } else {
            Err(Error::Unreachable)
        }
    }

    /// Take the next reply: its sequence number and payload.
    pub fn recv(&self) -> Result<(u16, Vec<u8>)> {
        let mut replies = self.shared.replies.lock();
        loop {
            if let Some(reply) = replies.pop_front() {
                return Ok(reply);
            }
            if self.ctx.timers.clock().is_manual() {
                return Err(Error::WouldBlock);
            }
            match self.timeout {
                Some(timeout) if timeout == Duration::from_millis(0) => {
                    return Err(Error::WouldBlock)
                },
                Some(timeout) => {
                    if self.shared.readable.wait_for(&mut replies, timeout).timed_out()
                        && replies.is_empty()
                    {
                        return Err(Error::TimedOut);
                    }
                },
                None => self.shared.readable.wait(&mut replies),
            }
        }
    }

    /// The number of replies waiting.
    pub fn pending(&self) -> usize {
        self.shared.replies.lock().len()
    }
}

impl Drop for PingSocket {
    fn drop(&mut self) {
        Uninstaller::new().uninstall(&self.node);
    }
}
