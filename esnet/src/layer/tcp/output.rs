//! Segment generation.
//!
//! `dispatch` returns at most one segment per call and is called until it returns `None`. The
//! order of preference is: a retransmission at `SND.UNA` after a loss, a lost hole reported by
//! selective acknowledgments, a window probe, new data, and finally a bare acknowledgment.
use crate::time::Instant;
use crate::wire::{TcpFlags, TcpSeqNumber, TCP_HEADER_LEN};

use super::input::DUPACK_THRESHOLD;
use super::tcb::{Segment, State, Tcb};

/// What a segment carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Carry {
    Retransmission,
    Probe,
    Data,
}

impl Tcb {
    /// The next segment to send, if any.
    pub(crate) fn dispatch(&mut self, now: Instant) -> Option<Segment> {
        match self.state {
            State::Closed | State::Listen => None,
            State::SynSent | State::SynReceived => self.dispatch_syn(now),
            State::TimeWait => self.dispatch_ack(),
            _ => self.dispatch_data(now),
        }
    }

    fn dispatch_syn(&mut self, now: Instant) -> Option<Segment> {
        if self.snd.nxt != self.snd.iss {
            return match self.state {
                State::SynReceived => self.dispatch_ack(),
                _ => None,
            };
        }

        let mut repr = self.header(TcpFlags::SYN);
        repr.seq_number = self.snd.iss;
        repr.sack_ranges = [None; 3];
        repr.max_seg_size = Some(self.local_mss.min(usize::from(u16::max_value())) as u16);
        match self.state {
            State::SynSent => {
                repr.ack_number = None;
                repr.sack_permitted = self.config.sack;
            },
            _ => repr.sack_permitted = self.sack,
        }

        self.snd.nxt = self.snd.iss + 1;
        self.snd.max = self.snd.max.max(self.snd.nxt);
        if self.backoff == 0 {
            self.rtt.timing = Some((self.snd.iss, now));
        }
        self.arm_retransmission(now);
        self.acknowledged();
        Some(Segment { repr, payload: Vec::new(), dont_frag: self.dont_frag })
    }

    /// A bare acknowledgment, if one is owed.
    fn dispatch_ack(&mut self) -> Option<Segment> {
        if !self.ack_now {
            return None;
        }
        let repr = self.header(TcpFlags::default());
        self.acknowledged();
        Some(Segment { repr, payload: Vec::new(), dont_frag: self.dont_frag })
    }

    fn dispatch_data(&mut self, now: Instant) -> Option<Segment> {
        let una = self.snd.una;
        let data_end = self.data_end();
        let room = self.payload_room();

        let (seq, len, kind) = if self.cc.retransmit_una {
            self.cc.retransmit_una = false;
            (una, (data_end - una).min(room), Carry::Retransmission)
        } else if let Some((seq, len)) = self.sack_retransmission(room) {
            (seq, len, Carry::Retransmission)
        } else if self.probe {
            self.probe = false;
            (una, (data_end - una).min(1), Carry::Probe)
        } else {
            let seq = self.snd.nxt;
            let len = self.sendable(seq, data_end, room);
            (seq, len, Carry::Data)
        };

        // The FIN follows the last octet, once that is sent.
        let fin = self.shut_wr && !self.fin_acked && seq + len == data_end
            && (kind != Carry::Data || self.snd.nxt <= data_end);

        if len == 0 && !fin {
            if kind == Carry::Data && self.snd.wnd == 0 && data_end > una
                && self.snd.nxt == una && !self.persist
            {
                self.enter_persist(now);
            }
            return self.dispatch_ack();
        }

        let mut flags = TcpFlags::default();
        flags.set_fin(fin);
        flags.set_psh(len > 0 && seq + len == data_end);
        let mut repr = self.header(flags);
        repr.seq_number = seq;
        repr.payload_len = len;
        if let Some(up) = self.snd.up {
            if seq < up {
                repr.urgent_at = (up - seq).min(usize::from(u16::max_value())) as u16;
            }
        }

        let mut payload = vec![0; len];
        self.send_ring.read_allocated(seq - una, &mut payload);

        let end = seq + len + if fin { 1 } else { 0 };
        match kind {
            Carry::Data => {
                if self.rtt.timing.is_none() && self.backoff == 0 && end > self.snd.max {
                    self.rtt.timing = Some((seq, now));
                }
                self.snd.nxt = end;
            },
            Carry::Retransmission => self.rtt.timing = None,
            Carry::Probe => (),
        }
        self.snd.max = self.snd.max.max(end);
        if !self.persist {
            self.arm_retransmission(now);
        }
        self.acknowledged();
        net_trace!("tcp {} -> {}: {}", self.local, self.remote, repr);
        Some(Segment { repr, payload, dont_frag: self.dont_frag })
    }

    /// The octets of new data at `seq` that windows, congestion and silly window avoidance allow.
    fn sendable(&self, seq: TcpSeqNumber, data_end: TcpSeqNumber, room: usize) -> usize {
        let una = self.snd.una;
        let unsent = data_end - seq;
        if unsent == 0 {
            return 0;
        }

        let peer = (una + self.snd.wnd) - seq;
        let congestion = if self.cc.recovering && self.sack {
            let pipe = self.scoreboard.pipe(una, self.snd.max, self.mss);
            self.cc.cwnd.saturating_sub(pipe)
        } else {
            // RFC 3042, the first two duplicate acknowledgments each allow one new segment.
            let limited = if self.cc.recovering || self.cc.dupacks >= DUPACK_THRESHOLD {
                0
            } else {
                self.cc.dupacks * self.mss
            };
            (self.cc.cwnd + limited).saturating_sub(seq - una)
        };
        let len = unsent.min(peer).min(congestion).min(room);
        if len == 0 {
            return 0;
        }

        // RFC 1122 sender side silly window avoidance, with Nagle's algorithm.
        let idle = seq == una;
        let full = len == room;
        let half_window = self.snd.max_wnd > 0 && len >= self.snd.max_wnd / 2;
        let pushed = len == unsent && (idle || !self.config.nagle);
        if full || half_window || pushed || (idle && len == peer) {
            len
        } else {
            0
        }
    }

    /// The next lost hole to resend during fast recovery with selective acknowledgments.
    fn sack_retransmission(&mut self, room: usize) -> Option<(TcpSeqNumber, usize)> {
        if !(self.sack && self.cc.recovering) {
            return None;
        }
        let (una, max, mss) = (self.snd.una, self.snd.max, self.mss);
        let pipe = self.scoreboard.pipe(una, max, mss);
        if pipe + room.min(mss) > self.cc.cwnd {
            return None;
        }
        let data_end = self.data_end();
        let recover = self.cc.recover.min(data_end);
        self.scoreboard.next_retransmission(una, recover, mss, room)
    }

    /// Payload octets that fit a segment next to the options.
    fn payload_room(&self) -> usize {
        let options = self.header(TcpFlags::default()).header_len() - TCP_HEADER_LEN;
        self.mss.saturating_sub(options).max(1)
    }

    /// An acknowledgment went out with the current `RCV.NXT`.
    fn acknowledged(&mut self) {
        self.ack_now = false;
        self.ack_at = None;
        self.unacked_segments = 0;
    }
}
