//! Tunables of a stack.
//!
//! The defaults follow RFC 793, RFC 1122 and RFC 2988. Every value can be overridden with the
//! builder-style setter of the same name:
//!
//! ```
//! use esnet::Config;
//! use std::time::Duration;
//!
//! let config = Config::default()
//!     .delayed_ack(Duration::from_millis(100))
//!     .nagle(false);
//! assert_eq!(config.mss, 536);
//! ```
use crate::time::Duration;
use crate::wire::Checksum;

/// Configuration of one stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Default maximum segment size, used until the peer announces its own.
    pub mss: usize,
    /// Capacity of each connection's receive ring.
    pub recv_buffer: usize,
    /// Capacity of each connection's send ring.
    pub send_buffer: usize,
    /// Initial slow start threshold.
    pub ssthresh: u32,
    /// Retransmission timeout before the first round trip was measured.
    pub rto_default: Duration,
    /// Lower bound of the retransmission timeout.
    pub rto_min: Duration,
    /// Upper bound of the retransmission timeout.
    pub rto_max: Duration,
    /// Maximum segment lifetime. `TimeWait` lasts twice as long.
    pub msl: Duration,
    /// Retransmissions after which the path is considered suspect.
    pub r1: u32,
    /// Total retransmission time after which an established connection is aborted.
    pub r2: Duration,
    /// Total retransmission time after which a connection attempt is aborted.
    pub r2_syn: Duration,
    /// Bound on consecutive retransmissions.
    pub max_backoff: u32,
    /// Retransmission count at which the segment size falls back to the default.
    pub pmtud_backoff: u32,
    /// Longest time a zero window is probed before the connection is aborted.
    pub persist_max: Duration,
    /// Delay of a pure acknowledgment.
    pub delayed_ack: Duration,
    /// Lifetime of an incomplete fragmented datagram.
    pub reassembly_timeout: Duration,
    /// Time to live of sent datagrams.
    pub ttl: u8,
    /// Whether selective acknowledgments are offered.
    pub sack: bool,
    /// Whether small segments are coalesced while data is unacknowledged.
    pub nagle: bool,
    /// Upper bound on any listen backlog.
    pub max_backlog: usize,
    /// Number of datagrams a datagram socket queues.
    pub datagram_queue: usize,
    /// First port handed out to sockets bound to port zero.
    pub ephemeral_start: u16,
    /// Whether checksums are computed and verified.
    pub checksum: Checksum,
}

impl Default for Config {
    fn default() -> Self {
        let msl = Duration::from_secs(120);
        let rto_max = 2 * msl;
        let max_backoff = 16;
        Config {
            mss: 536,
            recv_buffer: 8 * 1024,
            send_buffer: 8 * 1024,
            ssthresh: 65535,
            rto_default: Duration::from_secs(3),
            rto_min: Duration::from_secs(1),
            rto_max,
            msl,
            r1: 3,
            r2: Duration::from_secs(100),
            r2_syn: Duration::from_secs(180),
            max_backoff,
            pmtud_backoff: 4,
            persist_max: max_backoff * rto_max,
            delayed_ack: Duration::from_millis(200),
            reassembly_timeout: Duration::from_secs(600),
            ttl: 64,
            sack: true,
            nagle: true,
            max_backlog: 128,
            datagram_queue: 64,
            ephemeral_start: 49152,
            checksum: Checksum::Manual,
        }
    }
}

macro_rules! setters {
    ($($(#[$attr:meta])* $name:ident: $ty:ty),* $(,)*) => {
        impl Config {
            $(
                $(#[$attr])*
                pub fn $name(mut self, value: $ty) -> Self {
                    self.$name = value;
                    self
                }
            )*
        }
    }
}

setters! {
    /// Set the default maximum segment size.
    mss: usize,
    /// Set the receive ring capacity.
    recv_buffer: usize,
    /// Set the send ring capacity.
    send_buffer: usize,
    /// Set the initial slow start threshold.
    ssthresh: u32,
    /// Set the initial retransmission timeout.
    rto_default: Duration,
    /// Set the lower bound of the retransmission timeout.
    rto_min: Duration,
    /// Set the upper bound of the retransmission timeout.
    rto_max: Duration,
    /// Set the maximum segment lifetime.
    msl: Duration,
    /// Set R1.
    r1: u32,
    /// Set R2.
    r2: Duration,
    /// Set R2 of connection attempts.
    r2_syn: Duration,
    /// Set the bound on consecutive retransmissions.
    max_backoff: u32,
    /// Set the black hole detection threshold.
    pmtud_backoff: u32,
    /// Set the longest zero window probing time.
    persist_max: Duration,
    /// Set the acknowledgment delay.
    delayed_ack: Duration,
    /// Set the reassembly lifetime.
    reassembly_timeout: Duration,
    /// Set the time to live.
    ttl: u8,
    /// Enable or disable selective acknowledgments.
    sack: bool,
    /// Enable or disable small segment coalescing.
    nagle: bool,
    /// Set the upper bound on listen backlogs.
    max_backlog: usize,
    /// Set the datagram queue length.
    datagram_queue: usize,
    /// Set the first ephemeral port.
    ephemeral_start: u16,
    /// Set the checksum policy.
    checksum: Checksum,
}
