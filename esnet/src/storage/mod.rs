//! Buffers shared by the protocol layers.
//!
//! [`RingBuffer`] holds the byte streams of a connection, [`Assembler`] remembers which parts of
//! the stream ahead of the in-order front have already arrived.
//!
//! [`RingBuffer`]: struct.RingBuffer.html
//! [`Assembler`]: struct.Assembler.html
mod assembler;
mod ring;

pub use self::assembler::{Assembler, Contig, TooManyHoles};
pub use self::ring::RingBuffer;
