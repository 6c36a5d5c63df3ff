//! SMTP reply line parser.

use crate::error::{Error, Result};
use crate::types::{EnhancedStatus, Reply, ReplyCode};

/// Parses one line of an SMTP reply.
///
/// Accepted shapes (the trailing CRLF or LF is optional):
/// - Continuation: `250-First line`
/// - Final or single: `250 Last line`
/// - Either, with an RFC 3463 status: `550 5.1.1 No such user`
/// - Code only: `250`
///
/// # Errors
///
/// Returns [`Error::MalformedReply`] if the line matches none of these.
pub fn parse_line(line: &[u8]) -> Result<Reply> {
    let line = strip_line_ending(line);

    let Some((code, rest)) = split_code(line) else {
        return Err(malformed(line));
    };

    let (is_multiline, rest) = match rest.split_first() {
        None => (false, rest),
        Some((b'-', rest)) => (true, rest),
        Some((b' ', rest)) => (false, rest),
        Some(_) => return Err(malformed(line)),
    };

    let (enhanced_status, text) = match split_enhanced_status(rest) {
        Some((status, text)) => (Some(status), text),
        None => (None, rest),
    };

    Ok(Reply {
        code: ReplyCode::new(code),
        enhanced_status,
        text: String::from_utf8_lossy(text).into_owned(),
        is_multiline,
    })
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn malformed(line: &[u8]) -> Error {
    Error::MalformedReply(String::from_utf8_lossy(line).into_owned())
}

/// Splits off a three-digit reply code.
fn split_code(line: &[u8]) -> Option<(u16, &[u8])> {
    let (digits, rest) = line.split_at_checked(3)?;
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code = digits
        .iter()
        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
    Some((code, rest))
}

/// Splits off a leading `d.d.d` followed by a space or end of line.
fn split_enhanced_status(text: &[u8]) -> Option<(EnhancedStatus, &[u8])> {
    let end = text.iter().position(|&b| b == b' ').unwrap_or(text.len());
    let token = &text[..end];
    let remainder = text.get(end + 1..).unwrap_or_default();

    let mut parts = token.split(|&b| b == b'.');
    let class = parse_number(parts.next()?)?;
    let subject = parse_number(parts.next()?)?;
    let detail = parse_number(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }

    Some((EnhancedStatus::new(class, subject, detail), remainder))
}

fn parse_number(digits: &[u8]) -> Option<u16> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}
