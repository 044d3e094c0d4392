pub mod cursor;
pub mod error;
pub mod watcom;


/// Decodes an ISO-8859-1 byte string into a `String`.
///
/// Watcom debug information predates Unicode; every byte maps 1:1 to the
/// Unicode code point of the same value.
pub(crate) fn latin1_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
