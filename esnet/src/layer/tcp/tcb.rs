//! The connection record.
//!
//! A `Tcb` is the complete state of one connection: the state machine, both sequence spaces,
//! the rings holding the data, congestion control, round trip estimation and the deadlines of
//! its timers. It never sends anything itself. Segment arrival and timer expiry return
//! [`Signals`] and the segments to send are pulled with `dispatch`, so that the owner can release
//! the lock before handing them to the graph.
//!
//! [`Signals`]: struct.Signals.html
use crate::config::Config;
use crate::layer::{Endpoint, Error};
use crate::storage::{Assembler, RingBuffer};
use crate::time::{Duration, Instant};
use crate::wire::{TcpFlags, TcpRepr, TcpSeqNumber};

use super::scoreboard::Scoreboard;

/// Out-of-order ranges the receiver keeps track of.
const MAX_RECV_RANGES: usize = 8;

/// Largest window that fits the header without window scaling.
pub(crate) const MAX_WINDOW: usize = 65535;

/// State enum of the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// No connection, either not yet opened or already finished.
    Closed,

    /// Waiting for connection requests.
    Listen,

    /// Our connection request is out, waiting for the answer.
    SynSent,

    /// A connection request was answered, waiting for its acknowledgment.
    SynReceived,

    /// An open connection.
    Established,

    /// Closed our side, the FIN is not yet acknowledged.
    FinWait1,

    /// Closed our side and the peer acknowledged it.
    FinWait2,

    /// Both sides sent FIN at the same time, ours is not yet acknowledged.
    Closing,

    /// Both sides closed. Held for twice the segment lifetime to absorb stray segments.
    TimeWait,

    /// The peer closed its side.
    CloseWait,

    /// Closed our side after the peer had closed its own.
    LastAck,
}

impl State {
    /// Whether the connection was ever synchronized, i.e. both initial sequence numbers are
    /// known and acknowledged.
    pub fn is_synchronized(self) -> bool {
        match self {
            State::Closed | State::Listen | State::SynSent | State::SynReceived => false,
            _ => true,
        }
    }

    /// Whether data from the peer is still accepted.
    pub(crate) fn receives(self) -> bool {
        match self {
            State::Established | State::FinWait1 | State::FinWait2 => true,
            _ => false,
        }
    }

    /// Whether the local side may still queue data.
    pub(crate) fn sends(self) -> bool {
        match self {
            State::SynSent | State::SynReceived | State::Established | State::CloseWait => true,
            _ => false,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        State::Closed
    }
}

/// The sending sequence space.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Send {
    /// The oldest unacknowledged sequence number.
    ///
    /// In RFC793 this is referred to as `SND.UNA`. The send ring starts here once the SYN is
    /// acknowledged.
    pub(crate) una: TcpSeqNumber,

    /// The next sequence number to use for transmission.
    ///
    /// In RFC793 this is referred to as `SND.NXT`. A timeout moves it back to `una`.
    pub(crate) nxt: TcpSeqNumber,

    /// The highest sequence number sent so far.
    pub(crate) max: TcpSeqNumber,

    /// The window last advertised by the peer, `SND.WND`.
    pub(crate) wnd: usize,

    /// The largest window the peer ever advertised.
    pub(crate) max_wnd: usize,

    /// Segment sequence number of the last window update, `SND.WL1`.
    pub(crate) wl1: TcpSeqNumber,

    /// Segment acknowledgment number of the last window update, `SND.WL2`.
    pub(crate) wl2: TcpSeqNumber,

    /// The initial sequence number, `ISS`.
    pub(crate) iss: TcpSeqNumber,

    /// The end of urgent data, `SND.UP`.
    pub(crate) up: Option<TcpSeqNumber>,
}

/// The receiving sequence space.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Receive {
    /// The next expected sequence number, `RCV.NXT`.
    pub(crate) nxt: TcpSeqNumber,

    /// The window we advertised, relative to `nxt`.
    ///
    /// Shrinks as data arrives and only grows again in steps large enough to avoid the silly
    /// window syndrome.
    pub(crate) wnd: usize,

    /// The initial receive sequence number, `IRS`.
    pub(crate) irs: TcpSeqNumber,

    /// The end of urgent data announced by the peer, `RCV.UP`.
    pub(crate) up: Option<TcpSeqNumber>,

    /// Whether the peer's FIN arrived.
    pub(crate) fin: bool,
}

/// TCP NewReno congestion control.
#[derive(Clone, Copy, Debug)]
pub(crate) struct NewReno {
    /// The window dictated by congestion.
    pub(crate) cwnd: usize,

    /// Decider between slow start and congestion avoidance.
    pub(crate) ssthresh: usize,

    /// Octets acknowledged in congestion avoidance since the window last grew.
    pub(crate) acked: usize,

    /// Consecutive duplicate acknowledgments.
    pub(crate) dupacks: usize,

    /// `SND.MAX` when loss was detected. Fast recovery ends once it is acknowledged.
    pub(crate) recover: TcpSeqNumber,

    /// Whether fast recovery is in progress.
    pub(crate) recovering: bool,

    /// The segment at `SND.UNA` must be retransmitted once, regardless of windows.
    pub(crate) retransmit_una: bool,
}

/// Round trip estimation, RFC 6298.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Rtt {
    pub(crate) srtt: Option<Duration>,
    pub(crate) rttvar: Duration,
    pub(crate) rto: Duration,
    /// The sequence number being timed and when it was sent. Cleared on retransmission.
    pub(crate) timing: Option<(TcpSeqNumber, Instant)>,
}

/// Output signals of the state machine.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Signals {
    /// A reset to send in answer to an unacceptable segment.
    pub(crate) reset: Option<TcpRepr>,

    /// The handshake completed.
    pub(crate) established: bool,

    /// The connection ended and its record should be deleted.
    pub(crate) closed: bool,
}

/// One segment to send.
#[derive(Clone, Debug)]
pub(crate) struct Segment {
    pub(crate) repr: TcpRepr,
    pub(crate) payload: Vec<u8>,
    pub(crate) dont_frag: bool,
}

/// The connection record.
pub(crate) struct Tcb {
    pub(crate) state: State,
    pub(crate) config: Config,
    pub(crate) local: Endpoint,
    pub(crate) remote: Endpoint,

    pub(crate) snd: Send,
    pub(crate) rcv: Receive,
    pub(crate) cc: NewReno,
    pub(crate) rtt: Rtt,

    /// Data queued by the user, starting at `SND.UNA`.
    pub(crate) send_ring: RingBuffer,
    /// In-order data not yet read, out-of-order data is written behind it unallocated.
    pub(crate) recv_ring: RingBuffer,
    /// Out-of-order data, relative to `RCV.NXT`.
    pub(crate) assembler: Assembler,
    pub(crate) scoreboard: Scoreboard,

    /// The segment size we send, lowered by path MTU discovery.
    pub(crate) mss: usize,
    /// The segment size we announce, from the MTU of the outgoing interface.
    pub(crate) local_mss: usize,
    /// Whether both sides offered selective acknowledgments.
    pub(crate) sack: bool,
    /// Whether sent datagrams carry don't fragment.
    pub(crate) dont_frag: bool,

    /// Consecutive expiries of the retransmission timer.
    pub(crate) backoff: u32,
    /// When the current series of retransmissions started.
    pub(crate) r0: Instant,
    /// Whether the peer's zero window is being probed.
    pub(crate) persist: bool,
    /// A window probe is due.
    pub(crate) probe: bool,

    /// An acknowledgment must go out with the next segment, or alone.
    pub(crate) ack_now: bool,
    /// Data segments received since the last acknowledgment.
    pub(crate) unacked_segments: usize,
    /// Deadline of the retransmission, persist or `TimeWait` timer.
    pub(crate) rxmit_at: Option<Instant>,
    /// Deadline of the delayed acknowledgment.
    pub(crate) ack_at: Option<Instant>,

    /// No more data will be queued, a FIN follows the data.
    pub(crate) shut_wr: bool,
    /// The user gave up reading, data arriving from now on resets the connection.
    pub(crate) shut_rd: bool,
    /// Our FIN was acknowledged.
    pub(crate) fin_acked: bool,

    /// A hard error that ended the connection.
    pub(crate) error: Option<Error>,
    /// A soft error, reported once or when the connection times out.
    pub(crate) soft_error: Option<Error>,
}

impl Tcb {
    /// A closed record for `local`.
    pub(crate) fn new(config: &Config, local: Endpoint, now: Instant) -> Self {
        let mss = config.mss;
        let rto = config.rto_default;
        Tcb {
            state: State::Closed,
            config: config.clone(),
            local,
            remote: Endpoint::UNSPECIFIED,
            snd: Send {
                una: TcpSeqNumber(0),
                nxt: TcpSeqNumber(0),
                max: TcpSeqNumber(0),
                wnd: 0,
                max_wnd: 0,
                wl1: TcpSeqNumber(0),
                wl2: TcpSeqNumber(0),
                iss: TcpSeqNumber(0),
                up: None,
            },
            rcv: Receive {
                nxt: TcpSeqNumber(0),
                wnd: config.recv_buffer.min(MAX_WINDOW),
                irs: TcpSeqNumber(0),
                up: None,
                fin: false,
            },
            cc: NewReno {
                cwnd: mss,
                ssthresh: config.ssthresh as usize,
                acked: 0,
                dupacks: 0,
                recover: TcpSeqNumber(0),
                recovering: false,
                retransmit_una: false,
            },
            rtt: Rtt {
                srtt: None,
                rttvar: rto / 4,
                rto,
                timing: None,
            },
            send_ring: RingBuffer::new(config.send_buffer),
            recv_ring: RingBuffer::new(config.recv_buffer),
            assembler: Assembler::new(MAX_RECV_RANGES),
            scoreboard: Scoreboard::new(),
            mss,
            local_mss: mss,
            sack: false,
            dont_frag: true,
            backoff: 0,
            r0: now,
            persist: false,
            probe: false,
            ack_now: false,
            unacked_segments: 0,
            rxmit_at: None,
            ack_at: None,
            shut_wr: false,
            shut_rd: false,
            fin_acked: false,
            error: None,
            soft_error: None,
        }
    }

    /// Start an active open toward `remote`.
    pub(crate) fn connect(&mut self, remote: Endpoint, iss: TcpSeqNumber, local_mss: usize) {
        self.remote = remote;
        self.local_mss = local_mss;
        self.init_send(iss);
        self.set_state(State::SynSent);
    }

    /// A record answering the connection request `syn` received by a listener.
    pub(crate) fn accept(config: &Config, local: Endpoint, remote: Endpoint, syn: &TcpRepr,
        iss: TcpSeqNumber, local_mss: usize, now: Instant) -> Self
    {
        let mut tcb = Tcb::new(config, local, now);
        tcb.remote = remote;
        tcb.local_mss = local_mss;
        tcb.init_send(iss);
        tcb.init_receive(syn);
        tcb.set_state(State::SynReceived);
        tcb
    }

    fn init_send(&mut self, iss: TcpSeqNumber) {
        self.snd.iss = iss;
        self.snd.una = iss;
        self.snd.nxt = iss;
        self.snd.max = iss;
        self.cc.recover = iss;
    }

    /// Take over the peer's initial sequence number and options.
    pub(super) fn init_receive(&mut self, syn: &TcpRepr) {
        self.rcv.irs = syn.seq_number;
        self.rcv.nxt = syn.seq_number + 1;
        self.snd.wnd = usize::from(syn.window_len);
        self.snd.max_wnd = self.snd.wnd;
        self.snd.wl1 = syn.seq_number;
        self.sack = self.config.sack && syn.sack_permitted;
        let peer_mss = syn.max_seg_size.map_or(self.config.mss, usize::from);
        self.mss = peer_mss.min(self.local_mss).max(1);
        // RFC 2581 allows an initial window of two segments.
        self.cc.cwnd = 2 * self.mss;
    }

    /// The handshake completed. A FIN requested meanwhile goes out now.
    pub(crate) fn establish(&mut self) {
        let state = if self.shut_wr { State::FinWait1 } else { State::Established };
        self.set_state(state);
    }

    pub(crate) fn set_state(&mut self, state: State) {
        if self.state != state {
            net_debug!("tcp {} -> {}: {:?} -> {:?}", self.local, self.remote, self.state, state);
            self.state = state;
        }
    }

    /// The sequence number after the last queued octet.
    pub(crate) fn data_end(&self) -> TcpSeqNumber {
        self.snd.una + self.send_ring.len()
    }

    /// Octets sent but not acknowledged, in sequence space.
    pub(crate) fn flight(&self) -> usize {
        self.snd.max - self.snd.una
    }

    /// The earliest timer deadline.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        match (self.rxmit_at, self.ack_at) {
            (Some(a), Some(b)) => Some(if a < b { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    /// Whether the user may read, i.e. a read would not wait.
    pub(crate) fn is_readable(&self) -> bool {
        !self.recv_ring.is_empty() || self.rcv.fin || self.error.is_some()
            || self.state == State::Closed
    }

    /// Whether the user may write without waiting.
    pub(crate) fn is_writable(&self) -> bool {
        match self.state {
            State::Established | State::CloseWait => !self.shut_wr && self.send_ring.window() > 0,
            _ => self.error.is_some(),
        }
    }

    /// Queue data from the user. Returns the number of octets taken.
    pub(crate) fn enqueue(&mut self, data: &[u8]) -> usize {
        self.send_ring.enqueue_slice(data)
    }

    /// Mark everything queued so far as urgent.
    pub(crate) fn mark_urgent(&mut self) {
        self.snd.up = Some(self.data_end());
    }

    /// Read in-order data. Returns the number of octets read.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> usize {
        let count = self.recv_ring.dequeue_slice(buf);
        if count > 0 && self.update_window() {
            self.ack_now = true;
        }
        if let Some(up) = self.rcv.up {
            if up <= self.rcv.nxt - self.recv_ring.len() {
                self.rcv.up = None;
            }
        }
        count
    }

    /// Octets of urgent data not yet read.
    pub(crate) fn urgent_pending(&self) -> usize {
        match self.rcv.up {
            Some(up) => up - (self.rcv.nxt - self.recv_ring.len()),
            None => 0,
        }
    }

    /// Grow the advertised window if it grew enough. Returns whether it did.
    ///
    /// The window only opens by at least the smaller of half the buffer and one segment.
    pub(crate) fn update_window(&mut self) -> bool {
        let available = self.recv_ring.window().min(MAX_WINDOW);
        let step = (self.recv_ring.capacity() / 2).min(self.local_mss).max(1);
        if available >= self.rcv.wnd + step {
            self.rcv.wnd = available;
            true
        } else {
            false
        }
    }

    /// Close the connection from the user's side.
    ///
    /// Returns whether the record can be deleted right away.
    pub(crate) fn close(&mut self) -> Signals {
        let mut signals = Signals::default();
        self.shut_rd = true;
        match self.state {
            State::Closed | State::Listen | State::SynSent => {
                self.set_state(State::Closed);
                signals.closed = true;
            },
            State::SynReceived => {
                signals.reset = Some(self.reset());
                self.set_state(State::Closed);
                self.error = Some(Error::ConnectionAborted);
                signals.closed = true;
            },
            _ => self.shutdown_output(),
        }
        signals
    }

    /// Send a FIN after the queued data.
    pub(crate) fn shutdown_output(&mut self) {
        if self.shut_wr {
            return;
        }
        self.shut_wr = true;
        match self.state {
            State::Established => self.set_state(State::FinWait1),
            State::CloseWait => self.set_state(State::LastAck),
            _ => (),
        }
    }

    /// Stop reading. Queued data is discarded.
    pub(crate) fn shutdown_input(&mut self) {
        self.shut_rd = true;
        self.recv_ring.clear();
        self.assembler.clear();
    }

    /// End the connection with `error`. Returns the reset to send, if the peer knows us.
    pub(crate) fn abort(&mut self, error: Error) -> Option<TcpRepr> {
        let reset = match self.state {
            State::SynReceived | State::Established | State::FinWait1 | State::FinWait2
                | State::CloseWait | State::Closing | State::LastAck => Some(self.reset()),
            _ => None,
        };
        self.terminate(error);
        reset
    }

    /// End the connection with `error` without telling the peer.
    pub(crate) fn terminate(&mut self, error: Error) {
        net_debug!("tcp {} -> {}: aborted, {}", self.local, self.remote, error);
        self.error = Some(error);
        self.set_state(State::Closed);
        self.rxmit_at = None;
        self.ack_at = None;
        self.persist = false;
    }

    /// Close without error, after the peer acknowledged our FIN or reset the connection.
    pub(crate) fn finish(&mut self) {
        self.set_state(State::Closed);
        self.rxmit_at = None;
        self.ack_at = None;
        self.persist = false;
    }

    pub(crate) fn enter_time_wait(&mut self, now: Instant) {
        self.set_state(State::TimeWait);
        self.rxmit_at = Some(now + 2 * self.config.msl);
        self.ack_at = None;
        self.persist = false;
        self.probe = false;
    }

    /// A reset at the current send position.
    pub(crate) fn reset(&self) -> TcpRepr {
        let mut repr = self.header(TcpFlags::RST);
        repr.seq_number = self.snd.nxt;
        repr.ack_number = None;
        repr.window_len = 0;
        repr.sack_ranges = [None; 3];
        repr
    }

    /// A header for the connection with the current acknowledgment and window.
    pub(crate) fn header(&self, flags: TcpFlags) -> TcpRepr {
        TcpRepr {
            src_port: self.local.port,
            dst_port: self.remote.port,
            flags,
            seq_number: self.snd.nxt,
            ack_number: Some(self.rcv.nxt),
            window_len: self.rcv.wnd.min(MAX_WINDOW) as u16,
            urgent_at: 0,
            max_seg_size: None,
            sack_permitted: false,
            sack_ranges: self.sack_ranges(),
            payload_len: 0,
        }
    }

    /// The out-of-order ranges to report, as sequence numbers.
    fn sack_ranges(&self) -> [Option<(u32, u32)>; 3] {
        let mut ranges = [None; 3];
        if !self.sack {
            return ranges;
        }
        let nxt = self.rcv.nxt;
        for (slot, (left, right)) in ranges.iter_mut().zip(self.assembler.iter_data()) {
            let left = nxt + left as usize;
            let right = nxt + right as usize;
            *slot = Some((left.to_u32(), right.to_u32()));
        }
        ranges
    }

    /// Take the error to report to the user: the hard error stays, a soft one is reported once.
    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.error.or_else(|| self.soft_error.take())
    }
}

/// An answer to a segment no connection exists for, RFC 793 "Reset Generation".
///
/// Never answers a reset.
pub(crate) fn reset_for(segment: &TcpRepr) -> Option<TcpRepr> {
    if segment.flags.rst() {
        return None;
    }
    let (seq_number, ack_number) = match segment.ack_number {
        Some(ack) => (ack, None),
        None => (TcpSeqNumber(0), Some(segment.seq_end())),
    };
    Some(TcpRepr {
        src_port: segment.dst_port,
        dst_port: segment.src_port,
        flags: TcpFlags::RST,
        seq_number,
        ack_number,
        window_len: 0,
        urgent_at: 0,
        max_seg_size: None,
        sack_permitted: false,
        sack_ranges: [None; 3],
        payload_len: 0,
    })
}
