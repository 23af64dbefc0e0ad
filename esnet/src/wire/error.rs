use core::fmt;

/// The error type for parsing packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The packet was shorter than its headers claim.
    ///
    /// Either shorter than the minimum header, or a length field points past the end of the data
    /// that was actually received.
    Truncated,

    /// The checksum did not match the content.
    WrongChecksum,

    /// An identifier in the packet is not one this stack knows about.
    Unrecognized,

    /// The packet was recognized but is self-contradictory.
    ///
    /// Examples: a header length smaller than the fixed header, a TCP option whose length field
    /// disagrees with its kind, a zero port.
    Malformed,
}

/// The result type for packet parsing.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated     => write!(f, "truncated packet"),
            Error::WrongChecksum => write!(f, "checksum error"),
            Error::Unrecognized  => write!(f, "unrecognized packet"),
            Error::Malformed     => write!(f, "malformed packet"),
        }
    }
}

impl std::error::Error for Error { }
