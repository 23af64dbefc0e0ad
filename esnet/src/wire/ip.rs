use core::fmt;

enum_with_unknown! {
    /// IP datagram encapsulated protocol.
    pub enum Protocol(u8) {
        Icmp = 0x01,
        Tcp  = 0x06,
        Udp  = 0x11
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Icmp => write!(f, "ICMP"),
            Protocol::Tcp  => write!(f, "TCP"),
            Protocol::Udp  => write!(f, "UDP"),
            Protocol::Unknown(id) => write!(f, "0x{:02x}", id),
        }
    }
}

/// RFC 1071 one's complement arithmetic.
pub mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::Protocol;
    use crate::wire::Ipv4Address as Address;

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final complement).
    pub fn data(mut data: &[u8]) -> u16 {
        let mut accum = 0;

        // For each 32-byte chunk...
        const CHUNK_SIZE: usize = 32;
        while data.len() >= CHUNK_SIZE {
            let mut d = &data[..CHUNK_SIZE];
            // ... take by 2 bytes and sum them.
            while d.len() >= 2 {
                accum += NetworkEndian::read_u16(d) as u32;
                d = &d[2..];
            }

            data = &data[CHUNK_SIZE..];
        }

        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }

        // Add the last remaining odd byte, if any.
        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        propagate_carries(accum)
    }

    /// Combine several RFC 1071 compliant checksums.
    pub fn combine(checksums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in checksums {
            accum += word as u32;
        }
        propagate_carries(accum)
    }

    /// Compute the IPv4 pseudo header checksum of a transport segment.
    pub fn pseudo_header(src_addr: Address, dst_addr: Address, protocol: Protocol, length: u32)
        -> u16
    {
        let mut proto_len = [0u8; 4];
        proto_len[1] = protocol.into();
        NetworkEndian::write_u16(&mut proto_len[2..4], length as u16);

        combine(&[
            data(src_addr.as_bytes()),
            data(dst_addr.as_bytes()),
            data(&proto_len[..])
        ])
    }

    /// Checksum over pseudo header and the segment, as stored in transport headers.
    ///
    /// The checksum field within `segment` must be zero or hold the value under test.
    pub fn transport(src_addr: Address, dst_addr: Address, protocol: Protocol, segment: &[u8])
        -> u16
    {
        combine(&[
            pseudo_header(src_addr, dst_addr, protocol, segment.len() as u32),
            data(segment),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::checksum;
    use crate::wire::{IpProtocol, Ipv4Address};

    #[test]
    fn odd_length_pads_right() {
        assert_eq!(checksum::data(&[0x12]), 0x1200);
        assert_eq!(checksum::data(&[0x12, 0x34, 0x56]), 0x1234 + 0x5600);
    }

    #[test]
    fn carries_wrap_around() {
        assert_eq!(checksum::data(&[0xff, 0xff, 0x00, 0x01]), 0x0001);
        assert_eq!(checksum::combine(&[0xffff, 0x0002]), 0x0002);
    }

    #[test]
    fn pseudo_header_sums_fields() {
        let src = Ipv4Address::new(10, 0, 0, 1);
        let dst = Ipv4Address::new(10, 0, 0, 2);
        let sum = checksum::pseudo_header(src, dst, IpProtocol::Tcp, 20);
        assert_eq!(sum, 0x0a00 + 0x0001 + 0x0a00 + 0x0002 + 0x0006 + 20);
    }
}
