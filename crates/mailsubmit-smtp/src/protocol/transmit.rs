//! Outgoing protocol data.
//!
// Allow missing_const_for_fn since Vec methods aren't const in stable Rust.
#![allow(clippy::missing_const_for_fn)]

use crate::command::Tag;

/// Bytes the I/O layer must write, in order.
///
/// A transmit holds one command, a pipelined batch of commands, or raw
/// data (SASL continuation, message body) that carries no tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Raw bytes to send to the server.
    pub data: Vec<u8>,
    /// Tags of the commands contained in `data`, in order.
    pub tags: Vec<Tag>,
}

impl Transmit {
    /// Creates a transmit for one tagged command.
    #[must_use]
    pub fn command(tag: Tag, data: Vec<u8>) -> Self {
        Self {
            data,
            tags: vec![tag],
        }
    }

    /// Creates an untagged transmit.
    #[must_use]
    pub fn raw(data: Vec<u8>) -> Self {
        Self {
            data,
            tags: Vec::new(),
        }
    }

    /// Appends another transmit, forming a pipelined batch.
    pub fn append(&mut self, mut other: Self) {
        self.data.append(&mut other.data);
        self.tags.append(&mut other.tags);
    }

    /// Returns the data as a string slice, if valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Returns the length of the data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the transmit is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl AsRef<[u8]> for Transmit {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::command::TagGenerator;

    #[test]
    fn test_raw_has_no_tags() {
        let t = Transmit::raw(b"Zm9v\r\n".to_vec());
        assert!(t.tags.is_empty());
        assert_eq!(t.len(), 6);
        assert!(!t.is_empty());
    }

    #[test]
    fn test_append_batches() {
        let mut tags = TagGenerator::new();
        let (a, b) = (tags.next_tag(), tags.next_tag());
        let mut batch = Transmit::command(a, b"RCPT TO:<a@x>\r\n".to_vec());
        batch.append(Transmit::command(b, b"DATA\r\n".to_vec()));
        assert_eq!(batch.as_str(), Some("RCPT TO:<a@x>\r\nDATA\r\n"));
        assert_eq!(batch.tags, vec![a, b]);
    }

    #[test]
    fn test_as_ref() {
        let t = Transmit::raw(vec![1, 2, 3]);
        let slice: &[u8] = t.as_ref();
        assert_eq!(slice, &[1, 2, 3]);
    }
}
