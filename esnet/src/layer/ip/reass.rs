//! Reassembly of fragmented datagrams.
//!
//! Every datagram in reassembly is a leaf of its own, keyed by local address, remote address and
//! identification. The first fragment instantiates the leaf from the prototype. Holes are tracked
//! as described in RFC 815: a list of `[first, last]` ranges of missing octets, initially one
//! hole covering every possible payload octet.
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::conduit::{Conduit, IdentAccessor, Key, LocalAddressAccessor, Receiver};
use crate::conduit::{RemoteAddressAccessor, Side, Transporter, Uninstaller};
use crate::layer::icmp::{self, Report};
use crate::messenger::{InetMessenger, Messenger, Op};
use crate::stack::Context;
use crate::timer::Token;
use crate::wire::{ipv4_packet, Icmpv4TimeExceeded, ICMPV4_ORIGINAL_DATA_LEN};
use crate::wire::{IPV4_HEADER_LEN, IPV4_MAX_DATAGRAM};

/// Build the detached tree of muxes datagrams are reassembled in.
pub(crate) fn reassembly_tree(ctx: &Arc<Context>) -> Arc<Conduit> {
    let prototype = Conduit::adapter("reassembly", Arc::new(Prototype { ctx: ctx.clone() }));

    let idents = Conduit::mux("reassembly ident", Arc::new(IdentAccessor));
    idents.set_factory(Some(Conduit::factory("reassembly", Some(prototype), None)));
    let remotes = Conduit::mux("reassembly remote", Arc::new(RemoteAddressAccessor));
    remotes.set_factory(Some(Conduit::factory("reassembly", Some(idents), None)));
    let locals = Conduit::mux("reassembly local", Arc::new(LocalAddressAccessor));
    locals.set_factory(Some(Conduit::factory("reassembly", Some(remotes), None)));
    locals
}

struct Prototype {
    ctx: Arc<Context>,
}

impl Receiver for Prototype {
    fn input(&self, _: &mut InetMessenger, _: &Arc<Conduit>) -> bool {
        false
    }

    fn clone_for(&self, _: &Key, _: &InetMessenger) -> Option<Arc<dyn Receiver>> {
        Some(Arc::new(Reassembly::new(self.ctx.clone())))
    }
}

/// A range of missing payload octets, both ends inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Hole {
    pub(crate) first: usize,
    pub(crate) last: usize,
}

/// The hole list of one datagram together with the received payload.
pub(crate) struct Holes {
    holes: Vec<Hole>,
    buffer: Vec<u8>,
    total: Option<usize>,
}

/// Why a fragment was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Refused {
    /// The fragment carries no payload.
    Empty,
    /// A fragment other than the last is not a multiple of eight octets long.
    Unaligned,
    /// The fragment extends beyond the largest datagram or the known end.
    TooLong,
    /// The total length claims less than the header, the payload length would be negative.
    Teardrop,
}

impl Holes {
    /// A list with one hole covering every possible payload octet.
    pub(crate) fn new(header_len: usize) -> Self {
        let capacity = IPV4_MAX_DATAGRAM - header_len;
        Holes {
            holes: vec![Hole { first: 0, last: capacity - 1 }],
            buffer: vec![0; capacity],
            total: None,
        }
    }

    /// Whether every octet up to the final fragment has arrived.
    #[cfg(test)]
    pub(crate) fn is_complete(&self) -> bool {
        self.holes.is_empty() && self.total.is_some()
    }

    /// The reassembled payload, once complete.
    pub(crate) fn payload(&self) -> Option<&[u8]> {
        match self.total {
            Some(total) if self.holes.is_empty() => Some(&self.buffer[..total]),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn holes(&self) -> &[Hole] {
        &self.holes
    }

    /// Fill the holes overlapped by a fragment at `offset`.
    ///
    /// Octets that already arrived are kept, the first copy of any octet wins.
    pub(crate) fn add(&mut self, offset: usize, data: &[u8], more_frags: bool)
        -> Result<(), Refused>
    {
        if data.is_empty() {
            return Err(Refused::Empty);
        }
        if more_frags && data.len() % 8 != 0 {
            return Err(Refused::Unaligned);
        }
        let first = offset;
        let last = offset + data.len() - 1;
        if last >= self.buffer.len() || self.total.map_or(false, |total| last >= total) {
            return Err(Refused::TooLong);
        }

        let mut holes = Vec::with_capacity(self.holes.len() + 1);
        for &hole in self.holes.iter() {
            if first > hole.last || last < hole.first {
                holes.push(hole);
                continue;
            }

            let start = first.max(hole.first);
            let end = last.min(hole.last);
            self.buffer[start..=end].copy_from_slice(&data[start - first..=end - first]);

            if first > hole.first {
                holes.push(Hole { first: hole.first, last: first - 1 });
            }
            if last < hole.last && more_frags {
                holes.push(Hole { first: last + 1, last: hole.last });
            }
        }

        if !more_frags {
            let total = last + 1;
            holes.retain(|hole| hole.first < total);
            for hole in holes.iter_mut() {
                hole.last = hole.last.min(total - 1);
            }
            self.total = Some(total);
        }
        self.holes = holes;
        Ok(())
    }
}

/// The leaf holding one datagram in reassembly.
struct Reassembly {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: Arc<Context>,
    state: Mutex<State>,
}

struct State {
    holes: Option<Holes>,
    /// Header of the offset zero fragment.
    header: Option<Vec<u8>>,
    /// Header and leading payload of the first fragment, quoted in a timeout report.
    quote: Vec<u8>,
    node: Weak<Conduit>,
    timer: Option<Token>,
    done: bool,
}

impl Reassembly {
    fn new(ctx: Arc<Context>) -> Self {
        Reassembly {
            inner: Arc::new(Inner {
                ctx,
                state: Mutex::new(State {
                    holes: None,
                    header: None,
                    quote: Vec::new(),
                    node: Weak::new(),
                    timer: None,
                    done: false,
                }),
            }),
        }
    }
}

impl Inner {
    /// Give up on the datagram and remove the leaf.
    fn teardown(&self, state: &mut State) {
        state.done = true;
        state.holes = None;
        if let Some(timer) = state.timer.take() {
            self.ctx.timers.cancel(timer);
        }
        if let Some(node) = state.node.upgrade() {
            Uninstaller::new().uninstall(&node);
        }
    }

    fn expire(&self) {
        let quote = {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.timer = None;
            // Only a datagram whose first fragment arrived is reported.
            let quote = state.header.as_ref().map(|_| state.quote.clone());
            self.teardown(&mut state);
            quote
        };
        net_debug!("ip: reassembly timed out");
        if let Some(quote) = quote {
            icmp::report(&self.ctx, &quote, Report::TimeExceeded(Icmpv4TimeExceeded::FragExpired));
        }
    }

    /// Build the complete datagram from the zero offset header and the payload.
    fn complete(&self, header: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut datagram = Vec::with_capacity(header.len() + payload.len());
        datagram.extend_from_slice(header);
        datagram.extend_from_slice(payload);
        let packet = ipv4_packet::new_unchecked_mut(&mut datagram);
        packet.set_total_len((header.len() + payload.len()) as u16);
        packet.set_more_frags(false);
        packet.set_frag_offset(0);
        if self.ctx.checksum.manual() {
            packet.fill_checksum();
        } else {
            packet.set_checksum(0);
        }
        datagram
    }

    /// Add the fragment in `m`. Returns the whole datagram once the last hole is filled.
    fn add(self: &Arc<Self>, m: &InetMessenger, c: &Arc<Conduit>) -> Option<(Vec<u8>, usize)> {
        let mut state = self.state.lock();
        if state.done {
            return None;
        }
        state.node = Arc::downgrade(c);

        let datagram = m.messenger.payload();
        if datagram.len() < IPV4_HEADER_LEN {
            return None;
        }
        let packet = ipv4_packet::new_unchecked(datagram);
        let header_len = usize::from(packet.header_len());
        let (offset, more_frags) = (usize::from(packet.frag_offset()), packet.more_frags());
        let total_len = usize::from(packet.total_len()).min(datagram.len());
        let payload_len = total_len as isize - header_len as isize;
        if payload_len < 0 || header_len < IPV4_HEADER_LEN {
            net_debug!("ip: teardrop fragment of {}: {:?}", m.ident, Refused::Teardrop);
            self.teardown(&mut state);
            return None;
        }
        let datagram = &datagram[..header_len + payload_len as usize];
        let quoted = datagram.len().min(header_len + ICMPV4_ORIGINAL_DATA_LEN);

        if state.holes.is_none() {
            state.holes = Some(Holes::new(header_len));
            state.quote = datagram[..quoted].to_vec();
            let weak = Arc::downgrade(self);
            let timeout = self.ctx.config.reassembly_timeout;
            state.timer = Some(self.ctx.timers.schedule_after(timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.expire();
                }
            }));
        }
        if offset == 0 && state.header.is_none() {
            state.header = Some(datagram[..header_len].to_vec());
            state.quote = datagram[..quoted].to_vec();
        }

        let added = match state.holes.as_mut() {
            Some(holes) => holes.add(offset, &datagram[header_len..], more_frags),
            None => return None,
        };
        if let Err(refused) = added {
            net_debug!("ip: refusing fragment of {}: {:?}", m.ident, refused);
            self.teardown(&mut state);
            return None;
        }

        let complete = match (&state.holes, &state.header) {
            (Some(holes), Some(header)) => holes.payload()
                .map(|payload| self.complete(header, payload)),
            _ => None,
        }?;
        self.teardown(&mut state);
        Some((complete, header_len))
    }
}

impl Receiver for Reassembly {
    fn input(&self, m: &mut InetMessenger, c: &Arc<Conduit>) -> bool {
        let (datagram, header_len) = match self.inner.add(m, c) {
            Some(complete) => complete,
            None => return false,
        };

        net_trace!("ip: reassembled {} octets of {}", datagram.len(), m.ident);
        let mut whole = InetMessenger::new(Messenger::from_slice(&datagram), Op::Input);
        whole.local = m.local.clone();
        whole.remote = m.remote.clone();
        whole.scope = m.scope;
        whole.ident = m.ident;
        whole.set_protocol(m.protocol());
        whole.messenger.set_position(header_len);
        if let Some(ip) = self.inner.ctx.ip() {
            ip.forward(&mut Transporter::new(&mut whole), Side::B);
        }
        true
    }
}
