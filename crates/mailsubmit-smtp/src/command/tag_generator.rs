//! Command tag generator.
//!
//! SMTP has no tags on the wire. Tags are local identifiers that let the
//! caller correlate an enqueued command with the reply consumed for it.

/// Locally assigned command tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(u64);

impl Tag {
    /// Returns the numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tag generator for SMTP commands.
///
/// Generates strictly increasing tags starting at 1.
#[derive(Debug, Clone, Default)]
pub struct TagGenerator {
    counter: u64,
}

impl TagGenerator {
    /// Creates a new tag generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { counter: 0 }
    }

    /// Generates the next tag.
    #[must_use]
    pub const fn next_tag(&mut self) -> Tag {
        self.counter += 1;
        Tag(self.counter)
    }

    /// Returns the number of tags issued so far.
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.counter
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

    #[test]
    fn test_tag_generation() {
        let mut generator = TagGenerator::new();
        assert_eq!(generator.next_tag().value(), 1);
        assert_eq!(generator.next_tag().value(), 2);
        assert_eq!(generator.issued(), 2);
    }

    #[test]
    fn test_tags_increase() {
        let mut generator = TagGenerator::default();
        let mut previous = generator.next_tag();
        for _ in 0..1000 {
            let tag = generator.next_tag();
            assert!(tag > previous, "tags must be strictly increasing");
            previous = tag;
        }
    }

    #[test]
    fn test_display() {
        let mut generator = TagGenerator::new();
        assert_eq!(generator.next_tag().to_string(), "#1");
    }
}
