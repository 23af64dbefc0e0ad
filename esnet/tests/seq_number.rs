//! Modular ordering of sequence numbers across the wraparound.
use proptest::prelude::*;

use esnet::wire::TcpSeqNumber;

const HALF: usize = i32::MAX as usize;

proptest! {
    #[test]
    fn advancing_stays_ahead(raw in any::<u32>(), step in 1usize..HALF) {
        let start = TcpSeqNumber::from_u32(raw);
        let later = start + step;
        prop_assert!(start < later);
        prop_assert!(later > start);
        prop_assert_eq!(later - start, step);
        prop_assert_eq!(start - later, 0);
        prop_assert_eq!(later - step, start);
    }

    #[test]
    fn raw_value_wraps(raw in any::<u32>(), step in 0usize..HALF) {
        let start = TcpSeqNumber::from_u32(raw);
        prop_assert_eq!((start + step).to_u32(), raw.wrapping_add(step as u32));
    }

    #[test]
    fn window_is_half_open(raw in any::<u32>(), len in 1usize..0x1_0000, at in 0usize..0x2_0000) {
        let start = TcpSeqNumber::from_u32(raw);
        let end = start + len;
        prop_assert_eq!((start + at).in_window(start, end), at < len);
        prop_assert!(!(start - 1).in_window(start, end));
    }

    #[test]
    fn max_and_min_agree(a in any::<u32>(), step in 0usize..HALF) {
        let a = TcpSeqNumber::from_u32(a);
        let b = a + step;
        prop_assert_eq!(a.max(b), b);
        prop_assert_eq!(b.max(a), b);
        prop_assert_eq!(a.min(b), a);
        prop_assert_eq!(b.diff(a), step as i32);
    }
}
