use std::fmt;


/// Errors encountered while decoding the Watcom debugging information.
///
/// Unknown tag bytes are not errors; they decode to the `Other` arm of the
/// corresponding tag enum so that files produced by newer tools still decode.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Error {
    /// A read required more bytes than remain in the current region.
    ///
    /// `offset` is the position at which the read was attempted, relative to
    /// the base of the buffer handed to the top-level decode call.
    Truncated { offset: usize, needed: usize, available: usize, context: &'static str },
    /// The decoded values contradict the structure of the format, e.g. a
    /// demand table whose offsets decrease or a field record with no
    /// preceding list header.
    Structural { offset: usize, context: &'static str },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { offset, needed, available, context }
                => write!(
                    f,
                    "reading {} at offset {:#X} requires {} more bytes but only {} remain",
                    context, offset, needed, available,
                ),
            Self::Structural { offset, context }
                => write!(f, "inconsistent {} at offset {:#X}", context, offset),
        }
    }
}
impl std::error::Error for Error {
}
