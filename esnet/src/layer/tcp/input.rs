//! Segment arrival, RFC 793 section 3.9 with the congestion control of RFC 5681 and RFC 6582.
use crate::layer::Error;
use crate::time::Instant;
use crate::wire::{TcpRepr, TcpSeqNumber};

use super::tcb::{reset_for, Signals, State, Tcb};

/// Duplicate acknowledgments that signal a lost segment.
pub(crate) const DUPACK_THRESHOLD: usize = 3;

impl Tcb {
    /// Process one segment whose payload is `payload`.
    pub(crate) fn arrives(&mut self, segment: &TcpRepr, payload: &[u8], now: Instant) -> Signals {
        match self.state {
            State::Closed | State::Listen => Signals {
                reset: reset_for(segment),
                ..Signals::default()
            },
            State::SynSent => self.arrives_syn_sent(segment, now),
            _ => self.arrives_synchronizing(segment, payload, now),
        }
    }

    fn arrives_syn_sent(&mut self, segment: &TcpRepr, now: Instant) -> Signals {
        let mut signals = Signals::default();
        if let Some(ack) = segment.ack_number {
            if ack <= self.snd.iss || ack > self.snd.max {
                if !segment.flags.rst() {
                    signals.reset = reset_for(segment);
                }
                return signals;
            }
        }

        if segment.flags.rst() {
            if segment.ack_number.is_some() {
                self.terminate(Error::ConnectionRefused);
                signals.closed = true;
            }
            return signals;
        }

        if !segment.flags.syn() {
            return signals;
        }

        self.init_receive(segment);
        match segment.ack_number {
            Some(ack) => {
                // Our SYN is acknowledged.
                if let Some((_, sent)) = self.rtt.timing.take() {
                    self.sample_rtt(now - sent);
                }
                self.snd.una = ack;
                self.snd.nxt = ack;
                self.snd.wl2 = ack;
                self.backoff = 0;
                self.rxmit_at = None;
                self.ack_now = true;
                self.establish();
                signals.established = true;
            },
            None => {
                // Simultaneous open, answer with SYN-ACK.
                self.snd.nxt = self.snd.iss;
                self.set_state(State::SynReceived);
            },
        }
        signals
    }

    fn arrives_synchronizing(&mut self, segment: &TcpRepr, payload: &[u8], now: Instant)
        -> Signals
    {
        let mut signals = Signals::default();
        let mut segment = *segment;
        let mut payload = payload;

        if self.state == State::SynReceived && segment.flags.syn()
            && segment.seq_number == self.rcv.irs && segment.ack_number.is_some()
        {
            // The peer's SYN-ACK after a simultaneous open, its SYN we know.
            segment.flags.set_syn(false);
            segment.seq_number += 1;
        }

        // With a closed window a probe at `RCV.NXT` still carries a valid ACK, only its data
        // is refused.
        if self.rcv.wnd == 0 && !payload.is_empty() && segment.seq_number == self.rcv.nxt {
            payload = &payload[..0];
            segment.payload_len = 0;
            segment.flags.set_fin(false);
            self.ack_now = true;
        }

        if !self.is_acceptable(&segment, payload.len()) {
            if segment.flags.rst() {
                return signals;
            }
            self.ack_now = true;
            match self.state {
                State::SynReceived if segment.flags.syn() && segment.seq_number == self.rcv.irs => {
                    // Our SYN-ACK got lost.
                    self.snd.nxt = self.snd.iss;
                    self.ack_now = false;
                },
                State::TimeWait if segment.flags.fin() => self.enter_time_wait(now),
                _ => (),
            }
            net_trace!("tcp {} -> {}: unacceptable segment {}", self.local, self.remote, segment);
            return signals;
        }

        // Trim what we already have from the front.
        let nxt = self.rcv.nxt;
        if segment.seq_number < nxt {
            let mut excess = nxt - segment.seq_number;
            if segment.flags.syn() {
                segment.flags.set_syn(false);
                segment.seq_number += 1;
                excess -= 1;
            }
            let cut = excess.min(payload.len());
            payload = &payload[cut..];
            segment.seq_number += cut;
            if excess > cut {
                segment.flags.set_fin(false);
            }
        }

        // And what does not fit the window from the back.
        let room = self.rcv.wnd.saturating_sub(segment.seq_number - nxt);
        if payload.len() > room {
            payload = &payload[..room];
            segment.flags.set_fin(false);
        }
        segment.payload_len = payload.len();

        if segment.flags.rst() {
            match self.state {
                State::SynReceived => self.error = Some(Error::ConnectionRefused),
                State::Closing | State::LastAck | State::TimeWait => (),
                _ => self.error = Some(Error::ConnectionReset),
            }
            net_debug!("tcp {} -> {}: reset by peer", self.local, self.remote);
            self.finish();
            signals.closed = true;
            return signals;
        }

        if segment.flags.syn() {
            signals.reset = self.abort(Error::ConnectionReset);
            signals.closed = true;
            return signals;
        }

        let ack = match segment.ack_number {
            Some(ack) => ack,
            None => return signals,
        };

        if self.state == State::SynReceived {
            if ack <= self.snd.una || ack > self.snd.max {
                signals.reset = reset_for(&segment);
                return signals;
            }
            if let Some((_, sent)) = self.rtt.timing.take() {
                self.sample_rtt(now - sent);
            }
            self.snd.una = ack;
            self.snd.nxt = self.snd.nxt.max(ack);
            self.backoff = 0;
            self.rxmit_at = None;
            self.establish();
            signals.established = true;
        }

        if ack > self.snd.max {
            self.ack_now = true;
            return signals;
        }

        if self.sack {
            for &(left, right) in segment.sack_ranges.iter().flatten() {
                let (left, right) = (TcpSeqNumber::from_u32(left), TcpSeqNumber::from_u32(right));
                self.scoreboard.add(left, right, self.snd.una, self.snd.max);
            }
        }

        let window = usize::from(segment.window_len);
        if ack > self.snd.una {
            self.new_ack(ack, now);
        } else if ack == self.snd.una
            && payload.is_empty()
            && !segment.flags.fin()
            && window == self.snd.wnd
            && self.snd.max > self.snd.una
            && !self.persist
        {
            self.duplicate_ack();
        }

        if self.snd.wl1 < segment.seq_number
            || (self.snd.wl1 == segment.seq_number && self.snd.wl2 <= ack)
        {
            self.snd.wnd = window;
            self.snd.wl1 = segment.seq_number;
            self.snd.wl2 = ack;
            self.snd.max_wnd = self.snd.max_wnd.max(window);
            if window > 0 && self.persist {
                self.persist = false;
                self.probe = false;
                self.backoff = 0;
                self.rxmit_at = None;
            }
        }

        if self.fin_acked {
            match self.state {
                State::FinWait1 => self.set_state(State::FinWait2),
                State::Closing => self.enter_time_wait(now),
                State::LastAck => {
                    self.finish();
                    signals.closed = true;
                    return signals;
                },
                _ => (),
            }
        }

        if segment.flags.urg() && segment.urgent_at > 0 && self.state.receives() {
            let up = segment.seq_number + usize::from(segment.urgent_at);
            self.rcv.up = Some(self.rcv.up.map_or(up, |current| current.max(up)));
        }

        if !payload.is_empty() && self.state.receives() {
            if self.shut_rd {
                net_debug!("tcp {} -> {}: data after input shutdown", self.local, self.remote);
                signals.reset = self.abort(Error::ConnectionAborted);
                signals.closed = true;
                return signals;
            }
            self.receive(segment.seq_number, payload, now);
        }

        if segment.flags.fin() && segment.seq_number + payload.len() == self.rcv.nxt {
            self.receive_fin(now);
        }

        signals
    }

    /// RFC 793 acceptability test, with an empty window still accepting a bare FIN or ACK at
    /// `RCV.NXT`.
    fn is_acceptable(&self, segment: &TcpRepr, payload_len: usize) -> bool {
        let start = self.rcv.nxt;
        let window = if payload_len == 0 { self.rcv.wnd.max(1) } else { self.rcv.wnd };
        let end = start + window;
        match segment.sequence_len() {
            _ if window == 0 => false,
            0 => segment.seq_number.in_window(start, end),
            len => segment.seq_number.in_window(start, end)
                || (segment.seq_number + (len - 1)).in_window(start, end),
        }
    }

    fn new_ack(&mut self, ack: TcpSeqNumber, now: Instant) {
        let acked = ack - self.snd.una;
        if let Some((seq, sent)) = self.rtt.timing {
            if seq < ack {
                self.rtt.timing = None;
                self.sample_rtt(now - sent);
            }
        }

        let data = acked.min(self.send_ring.len());
        self.send_ring.dequeue_allocated(data);
        if acked > data {
            self.fin_acked = true;
        }
        self.snd.una = ack;
        self.snd.nxt = self.snd.nxt.max(ack);
        if self.snd.up.map_or(false, |up| up <= ack) {
            self.snd.up = None;
        }
        self.scoreboard.advance(ack);
        self.backoff = 0;
        self.r0 = now;

        let mss = self.mss;
        let cc = &mut self.cc;
        if cc.recovering {
            if ack >= cc.recover {
                cc.recovering = false;
                cc.cwnd = cc.ssthresh;
                cc.acked = 0;
                self.scoreboard.end_recovery();
            } else {
                // Partial acknowledgment: the next hole is lost as well.
                cc.retransmit_una = !self.sack;
                cc.cwnd = cc.cwnd.saturating_sub(acked) + mss;
            }
        } else if cc.cwnd < cc.ssthresh {
            cc.cwnd += acked.min(mss);
        } else {
            cc.acked += acked;
            if cc.acked >= cc.cwnd {
                cc.acked -= cc.cwnd;
                cc.cwnd += mss;
            }
        }
        cc.dupacks = 0;

        if !self.persist {
            self.rxmit_at = if self.snd.max > self.snd.una {
                Some(now + self.rtt.rto)
            } else {
                None
            };
        }
    }

    fn duplicate_ack(&mut self) {
        self.cc.dupacks += 1;
        if self.cc.recovering {
            if !self.sack {
                self.cc.cwnd += self.mss;
            }
            return;
        }

        let lost = self.cc.dupacks >= DUPACK_THRESHOLD
            || (self.sack && self.scoreboard.sacked() > DUPACK_THRESHOLD * self.mss);
        // A loss in the window that was already recovered by a timeout is not counted twice.
        if !lost || self.snd.una < self.cc.recover {
            return;
        }

        let flight = self.flight();
        let cc = &mut self.cc;
        cc.ssthresh = (flight / 2).max(2 * self.mss);
        cc.recover = self.snd.max;
        cc.cwnd = if self.sack {
            cc.ssthresh
        } else {
            cc.ssthresh + DUPACK_THRESHOLD * self.mss
        };
        cc.recovering = true;
        cc.retransmit_una = true;
        cc.acked = 0;
        self.rtt.timing = None;
        net_debug!("tcp {} -> {}: fast retransmit at {}", self.local, self.remote, self.snd.una);
    }

    fn receive(&mut self, seq: TcpSeqNumber, payload: &[u8], now: Instant) {
        let offset = seq - self.rcv.nxt;
        if offset > 0 {
            let written = self.recv_ring.write_unallocated(offset, payload);
            if self.assembler.add(offset as u32, written as u32).is_err() {
                net_trace!("tcp {} -> {}: too many holes, dropping {} octets",
                    self.local, self.remote, written);
            }
            self.ack_now = true;
            return;
        }

        let count = self.recv_ring.enqueue_slice(payload);
        let following = self.assembler.advance(count as u32) as usize;
        let following = self.recv_ring.enqueue_unallocated(following);
        let delivered = count + following;
        self.rcv.nxt += delivered;
        self.rcv.wnd = self.rcv.wnd.saturating_sub(delivered);

        if following > 0 || !self.assembler.is_empty() {
            self.ack_now = true;
            return;
        }
        self.unacked_segments += 1;
        if self.unacked_segments >= 2 || self.config.delayed_ack == Default::default() {
            self.ack_now = true;
        } else if self.ack_at.is_none() {
            self.ack_at = Some(now + self.config.delayed_ack);
        }
    }

    fn receive_fin(&mut self, now: Instant) {
        if self.rcv.fin {
            return;
        }
        self.rcv.fin = true;
        self.rcv.nxt += 1;
        self.ack_now = true;
        match self.state {
            State::SynReceived | State::Established => self.set_state(State::CloseWait),
            State::FinWait1 if self.fin_acked => self.enter_time_wait(now),
            State::FinWait1 => self.set_state(State::Closing),
            State::FinWait2 => self.enter_time_wait(now),
            _ => (),
        }
    }
}
