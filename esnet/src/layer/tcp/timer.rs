//! Round trip estimation and the retransmission, persist, delayed acknowledgment and `TimeWait`
//! timers of one connection.
//!
//! The estimator follows RFC 6298. Every expiry of the retransmission timer doubles the timeout
//! and starts over at `SND.UNA` with a congestion window of one segment. A new acknowledgment
//! clears the backoff, the next timeout is the estimate again. The connection is
//! abandoned once the number of expiries exceeds the bound on backoffs, or once it exceeds R1 and
//! R2 has passed since the series started.
use crate::layer::Error;
use crate::time::{Duration, Instant};

use super::tcb::{Signals, State, Tcb};

impl Tcb {
    /// Feed one round trip measurement to the estimator.
    pub(crate) fn sample_rtt(&mut self, r: Duration) {
        let rtt = &mut self.rtt;
        match rtt.srtt {
            None => {
                rtt.srtt = Some(r);
                rtt.rttvar = r / 2;
            },
            Some(srtt) => {
                let delta = if srtt > r { srtt - r } else { r - srtt };
                rtt.rttvar = (rtt.rttvar * 3 + delta) / 4;
                rtt.srtt = Some((srtt * 7 + r) / 8);
            },
        }
        let srtt = rtt.srtt.unwrap_or(r);
        let rto = srtt + (4 * rtt.rttvar).max(Duration::from_millis(1));
        rtt.rto = rto.max(self.config.rto_min).min(self.config.rto_max);
    }

    /// The retransmission timeout after the current number of backoffs.
    fn backed_off(&self) -> Duration {
        let factor = 1u32 << self.backoff.min(16);
        (self.rtt.rto * factor).min(self.config.rto_max)
    }

    /// Start the retransmission timer unless it is running.
    pub(crate) fn arm_retransmission(&mut self, now: Instant) {
        if self.rxmit_at.is_none() {
            self.rxmit_at = Some(now + self.rtt.rto);
        }
    }

    /// Start probing a zero window.
    pub(crate) fn enter_persist(&mut self, now: Instant) {
        net_trace!("tcp {} -> {}: zero window, persisting", self.local, self.remote);
        self.persist = true;
        self.probe = false;
        self.backoff = 0;
        self.r0 = now;
        self.rxmit_at = Some(now + self.rtt.rto);
    }

    /// Run the timers that are due at `now`.
    pub(crate) fn on_timer(&mut self, now: Instant) -> Signals {
        let mut signals = Signals::default();
        if self.ack_at.map_or(false, |at| at <= now) {
            self.ack_at = None;
            self.ack_now = true;
        }
        if self.rxmit_at.map_or(false, |at| at <= now) {
            self.rxmit_at = None;
            self.expired(now, &mut signals);
        }
        signals
    }

    fn expired(&mut self, now: Instant, signals: &mut Signals) {
        match self.state {
            State::Closed | State::Listen => return,
            State::TimeWait => {
                self.finish();
                signals.closed = true;
                return;
            },
            _ => (),
        }

        if self.persist {
            if now - self.r0 >= self.config.persist_max {
                self.terminate(Error::TimedOut);
                signals.closed = true;
                return;
            }
            self.backoff += 1;
            self.probe = true;
            self.rxmit_at = Some(now + self.backed_off());
            return;
        }

        if self.backoff == 0 {
            self.r0 = now;
        }
        self.backoff += 1;
        let r2 = if self.state.is_synchronized() { self.config.r2 } else { self.config.r2_syn };
        if self.backoff > self.config.max_backoff
            || (self.backoff > self.config.r1 && now - self.r0 >= r2)
        {
            let error = self.soft_error.take().unwrap_or(Error::TimedOut);
            self.terminate(error);
            signals.closed = true;
            return;
        }

        if self.state.is_synchronized() && self.backoff == self.config.pmtud_backoff
            && self.dont_frag
        {
            // Large segments may vanish without an ICMP error, try the default size instead.
            net_debug!("tcp {} -> {}: suspected black hole, mss {} -> {}",
                self.local, self.remote, self.mss, self.mss.min(self.config.mss));
            self.mss = self.mss.min(self.config.mss);
            self.dont_frag = false;
        }

        let rto = self.backed_off();
        net_trace!("tcp {} -> {}: retransmission {} at {}, rto {:?}",
            self.local, self.remote, self.backoff, self.snd.una, rto);
        self.go_back();
        self.rxmit_at = Some(now + rto);
    }

    /// Treat everything outstanding as lost, RFC 5681 section 3.1.
    fn go_back(&mut self) {
        let flight = self.flight();
        let cc = &mut self.cc;
        cc.ssthresh = (flight / 2).max(2 * self.mss);
        cc.cwnd = self.mss;
        cc.acked = 0;
        cc.dupacks = 0;
        cc.recovering = false;
        cc.retransmit_una = false;
        cc.recover = self.snd.max;
        self.scoreboard.clear();
        self.rtt.timing = None;
        self.snd.nxt = if self.state.is_synchronized() { self.snd.una } else { self.snd.iss };
    }

    /// The path MTU toward the peer dropped to `mtu`.
    ///
    /// Segments are resent at the smaller size without touching the congestion state, the loss
    /// was not caused by congestion.
    pub(crate) fn path_mtu(&mut self, mtu: usize) {
        let mss = mtu.saturating_sub(40).max(1);
        if mss >= self.mss {
            return;
        }
        net_debug!("tcp {} -> {}: path mtu {}, mss {} -> {}",
            self.local, self.remote, mtu, self.mss, mss);
        self.mss = mss;
        self.rtt.timing = None;
        if self.state.is_synchronized() {
            self.snd.nxt = self.snd.una;
        }
    }

    /// The peer asked to slow down.
    pub(crate) fn quench(&mut self) {
        self.cc.cwnd = self.mss;
    }
}
