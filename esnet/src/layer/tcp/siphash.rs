//! Initial sequence numbers, RFC 6528.
//!
//! The secret is the key of SipHash-2-4 rather than a suffix of the hashed message:
//!
//! > SipHash: a fast short-input PRF, Jean-Philippe Aumasson and Daniel J. Bernstein
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};

use crate::time::Instant;
use crate::wire::{Ipv4Address, TcpSeqNumber};

/// An initial sequence number generator based on SipHash-2-4.
///
/// > ISN = M + SipHash-2-4(secretkey, localip, localport, remoteip, remoteport)
///
/// where `M` is a timer ticking every four microseconds, here approximated from milliseconds.
pub struct IsnGenerator {
    keys: (u64, u64),
}

// The initial values, as ASCII text.
const IV: [&[u8; 8]; 4] = [
    b"somepseu",
    b"dorandom",
    b"lygenera",
    b"tedbytes"];

struct State {
    v0: u64,
    v1: u64,
    v2: u64,
    v3: u64,
}

impl IsnGenerator {
    /// Derive a key from the standard `RandomState`.
    ///
    /// The numbers `0u64` and `1u64` are hashed with clones of one hasher and the two tags
    /// become the key.
    pub fn from_std_hash() -> Self {
        let hash = RandomState::new().build_hasher();
        let tag = |n: u64| {
            let mut hash = hash.clone();
            hash.write_u64(n);
            hash.finish()
        };
        IsnGenerator {
            keys: (tag(0), tag(1)),
        }
    }

    /// Create a generator with a secret key.
    pub fn from_secret_key_bytes(bytes: [u8; 16]) -> Self {
        let mut a = [0; 8];
        let mut b = [0; 8];
        a.copy_from_slice(&bytes[..8]);
        b.copy_from_slice(&bytes[8..]);
        IsnGenerator { keys: (u64::from_le_bytes(a), u64::from_le_bytes(b)) }
    }

    /// The initial sequence number of the connection between the two endpoints at `time`.
    pub fn get_isn(&self, local: Ipv4Address, local_port: u16, remote: Ipv4Address,
        remote_port: u16, time: Instant) -> TcpSeqNumber
    {
        let mut state = State::init(self.keys.0, self.keys.1);
        let m = u64::from(local.to_network_integer())
            | u64::from(remote.to_network_integer()) << 32;
        let p = u64::from(local_port)
            | u64::from(remote_port) << 16
            // Message length = 12
            | 12_u64 << 56;
        state.absorb(m);
        state.absorb(p);
        let hash = state.finalize() as u32;

        // 250 ticks of four microseconds per millisecond.
        let ticks = (time.total_millis() as u64).wrapping_mul(250) as u32;
        TcpSeqNumber::from_u32(hash.wrapping_add(ticks))
    }
}

impl State {
    const SIP_C: usize = 2;
    const SIP_D: usize = 4;

    fn init(k0: u64, k1: u64) -> Self {
        State {
            v0: u64::from_be_bytes(*IV[0]) ^ k0,
            v1: u64::from_be_bytes(*IV[1]) ^ k1,
            v2: u64::from_be_bytes(*IV[2]) ^ k0,
            v3: u64::from_be_bytes(*IV[3]) ^ k1,
        }
    }

    fn round(&mut self) {
        self.v0 = self.v0.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(13);
        self.v1 ^= self.v0;
        self.v0 = self.v0.rotate_left(32);
        self.v2 = self.v2.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(16);
        self.v3 ^= self.v2;
        self.v0 = self.v0.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(21);
        self.v3 ^= self.v0;
        self.v2 = self.v2.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(17);
        self.v1 ^= self.v2;
        self.v2 = self.v2.rotate_left(32);
    }

    /// Process a single portion of the message.
    ///
    /// Note that all users need to manually add absorbing the length in the last block. This is
    /// slightly easier to read since it arranges the input to only have 8-btye blocks in all cases
    /// which separates the length block completely and makes it a constant.
    fn absorb(&mut self, m: u64) {
        self.v3 ^= m;
        (0..Self::SIP_C).for_each(|_| self.round());
        self.v0 ^= m;
    }

    /// Do the finalization rounds.
    fn finalize(mut self) -> u64 {
        self.v2 ^= 0xff;
        (0..Self::SIP_D).for_each(|_| self.round());
        self.v0 ^ self.v1 ^ self.v2 ^ self.v3
    }
}

#[cfg(test)]
mod tests {
    use core::fmt;
    use super::*;

    struct DebugState<'a>(&'a State);

    impl fmt::Debug for DebugState<'_> {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "{:x} ", self.0.v0)?;
            write!(f, "{:x} ", self.0.v1)?;
            write!(f, "{:x} ", self.0.v2)?;
            write!(f, "{:x} ", self.0.v3)
        }
    }

    impl super::State {
        fn debug(&self) -> DebugState {
            DebugState(self)
        }
    }

    /// Appendix A of the paper.
    #[test]
    fn manual_test_vectors() {
        let k0 = u64::from_le_bytes(0x0001020304050607_u64.to_be_bytes());
        let k1 = u64::from_le_bytes(0x08090a0b0c0d0e0f_u64.to_be_bytes());

        let mut state = State::init(k0, k1);
        println!("{:?}", state.debug());
        let m0 = u64::from_le_bytes(0x0001020304050607_u64.to_be_bytes());
        state.absorb(m0);
        println!("{:?}", state.debug());
        let m1 = u64::from_le_bytes(0x08090a0b0c0d0e0f_u64.to_be_bytes());
        state.absorb(m1);
        println!("{:?}", state.debug());

        assert_eq!(state.finalize(), 0xa129ca6149be45e5);
    }

    #[test]
    fn isn_depends_on_tuple_and_time() {
        let isn = IsnGenerator::from_secret_key_bytes([7; 16]);
        let (a, b) = (Ipv4Address::new(10, 0, 0, 1), Ipv4Address::new(10, 0, 0, 2));
        let first = isn.get_isn(a, 80, b, 4000, Instant::from_millis(0));
        assert_eq!(first, isn.get_isn(a, 80, b, 4000, Instant::from_millis(0)));
        assert_ne!(first, isn.get_isn(a, 80, b, 4001, Instant::from_millis(0)));
        assert_eq!(isn.get_isn(a, 80, b, 4000, Instant::from_millis(1)), first + 250);
    }
}
