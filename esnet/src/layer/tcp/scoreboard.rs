//! The sender's record of selectively acknowledged data.
//!
//! Loss recovery follows RFC 3517: a hole is considered lost once enough data above it was
//! SACKed, `pipe` estimates the octets still in the network, and holes are retransmitted in
//! order, each at most once per recovery episode.
use crate::wire::TcpSeqNumber;

/// Octets above a hole, in segments, that declare it lost.
const DUP_THRESH: usize = 3;

/// SACKed ranges above `SND.UNA`, sorted and disjoint.
#[derive(Clone, Debug, Default)]
pub(crate) struct Scoreboard {
    blocks: Vec<(TcpSeqNumber, TcpSeqNumber)>,
    /// The highest octet retransmitted in this recovery episode, `HighRxt` of RFC 3517.
    high_rxt: Option<TcpSeqNumber>,
}

impl Scoreboard {
    /// Upper bound on remembered ranges, the peer reports at most a few per segment.
    const MAX_BLOCKS: usize = 16;

    pub(crate) fn new() -> Self {
        Scoreboard::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Forget everything, after a retransmission timeout.
    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
        self.high_rxt = None;
    }

    /// End a recovery episode. SACK information stays valid.
    pub(crate) fn end_recovery(&mut self) {
        self.high_rxt = None;
    }

    /// Record one SACK block. Blocks outside `(una, max]` are reneging or bogus and ignored.
    pub(crate) fn add(&mut self, left: TcpSeqNumber, right: TcpSeqNumber, una: TcpSeqNumber,
        max: TcpSeqNumber)
    {
        if !(una < right && left < right && right <= max) {
            return;
        }
        let mut merged = (left.max(una), right);
        self.blocks.retain(|&(l, r)| {
            if r < merged.0 || merged.1 < l {
                true
            } else {
                merged.0 = merged.0.min(l);
                merged.1 = merged.1.max(r);
                false
            }
        });
        let at = self.blocks.iter().position(|&(l, _)| merged.0 < l).unwrap_or(self.blocks.len());
        self.blocks.insert(at, merged);
        if self.blocks.len() > Self::MAX_BLOCKS {
            // Keep the lowest ranges, those decide what gets retransmitted next.
            self.blocks.truncate(Self::MAX_BLOCKS);
        }
    }

    /// Drop everything below the new `SND.UNA`.
    pub(crate) fn advance(&mut self, una: TcpSeqNumber) {
        self.blocks.retain(|&(_, r)| una < r);
        if let Some(first) = self.blocks.first_mut() {
            first.0 = first.0.max(una);
        }
        if self.high_rxt.map_or(false, |high| high < una) {
            self.high_rxt = Some(una);
        }
    }

    /// The number of SACKed octets.
    pub(crate) fn sacked(&self) -> usize {
        self.blocks.iter().map(|&(l, r)| r - l).sum()
    }

    fn sacked_above(&self, seq: TcpSeqNumber) -> usize {
        self.blocks.iter()
            .filter(|&&(_, r)| seq < r)
            .map(|&(l, r)| r - l.max(seq))
            .sum()
    }

    /// Whether the hole starting at `seq` is considered lost.
    fn is_lost(&self, seq: TcpSeqNumber, mss: usize) -> bool {
        let above = self.blocks.iter().filter(|&&(l, _)| seq < l).count();
        above >= DUP_THRESH || self.sacked_above(seq) >= DUP_THRESH * mss
    }

    /// The holes between `una` and `max`, the last one ending at `max`.
    fn holes(&self, una: TcpSeqNumber, max: TcpSeqNumber) -> Vec<(TcpSeqNumber, TcpSeqNumber)> {
        let mut holes = Vec::with_capacity(self.blocks.len() + 1);
        let mut at = una;
        for &(l, r) in self.blocks.iter() {
            if at < l {
                holes.push((at, l));
            }
            at = at.max(r);
        }
        if at < max {
            holes.push((at, max));
        }
        holes
    }

    /// Estimate the octets in flight.
    pub(crate) fn pipe(&self, una: TcpSeqNumber, max: TcpSeqNumber, mss: usize) -> usize {
        self.holes(una, max).into_iter()
            .map(|(l, r)| {
                let mut pipe = 0;
                if !self.is_lost(l, mss) {
                    pipe += r - l;
                }
                if let Some(high) = self.high_rxt {
                    pipe += high.min(r) - l;
                }
                pipe
            })
            .sum()
    }

    /// The next lost range to retransmit, at most `len` octets below `recover`.
    ///
    /// The range is marked as retransmitted.
    pub(crate) fn next_retransmission(&mut self, una: TcpSeqNumber, recover: TcpSeqNumber,
        mss: usize, len: usize) -> Option<(TcpSeqNumber, usize)>
    {
        let high = self.high_rxt.unwrap_or(una);
        let found = self.holes(una, recover).into_iter()
            .filter(|&(_, r)| high < r)
            .map(|(l, r)| (l.max(high), r))
            .find(|&(l, _)| self.is_lost(l, mss));
        let (start, end) = found?;
        let len = (end - start).min(len);
        if len == 0 {
            return None;
        }
        self.high_rxt = Some(start + len);
        Some((start, len))
    }
}
