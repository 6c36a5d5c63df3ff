//! Mail data transparency (RFC 5321 section 4.5.2).
//!
//! Every line of the message that begins with `.` gets one extra `.` so the
//! server cannot mistake it for the end-of-data marker. The message bytes are
//! otherwise untouched; line endings are the caller's business.

/// Applies dot-stuffing to a message body.
///
/// A leading `.` is doubled and every `\n.` becomes `\n..`. Must be applied
/// exactly once to a buffer; [`dot_unstuff`] is its inverse.
#[must_use]
pub fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let extra = data.windows(2).filter(|w| *w == b"\n.").count()
        + usize::from(data.first() == Some(&b'.'));
    let mut out = Vec::with_capacity(data.len() + extra);
    let mut line_start = true;
    for &byte in data {
        if line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        line_start = byte == b'\n';
    }
    out
}

/// Removes dot-stuffing: drops one `.` at the start of every line.
#[must_use]
pub fn dot_unstuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut line_start = true;
    for &byte in data {
        if !(line_start && byte == b'.') {
            out.push(byte);
        }
        line_start = byte == b'\n';
    }
    out
}

/// Returns the end-of-data marker to append after a stuffed body.
///
/// A body already ending in CRLF only needs `.CRLF`; anything else first
/// gets its line terminated.
#[must_use]
pub fn end_of_data(stuffed: &[u8]) -> &'static [u8] {
    if stuffed.ends_with(b"\r\n") {
        b".\r\n"
    } else {
        b"\r\n.\r\n"
    }
}

/// Produces the complete wire form of a message for the DATA phase.
#[must_use]
pub fn encode_body(data: &[u8]) -> Vec<u8> {
    let mut wire = dot_stuff(data);
    wire.extend_from_slice(end_of_data(&wire));
    wire
}
