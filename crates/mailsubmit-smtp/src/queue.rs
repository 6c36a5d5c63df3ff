//! Command queue and pipelining discipline.
//!
//! Commands are tagged when enqueued and leave the queue in FIFO order,
//! either one at a time or as a pipelined batch (RFC 2920). Every sent
//! command moves to the in-flight list, and replies are matched against
//! that list strictly in order. SMTP replies carry no tag, so this ordering
//! is the only correlation there is.

use std::collections::VecDeque;

use tracing::debug;

use crate::command::{Command, Tag, TagGenerator, Verb};
use crate::protocol::Transmit;

/// A command waiting to be sent.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    /// Tag assigned at enqueue time.
    pub tag: Tag,
    /// The command.
    pub command: Command,
}

/// A command that has been sent and awaits its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    /// Tag of the sent command.
    pub tag: Tag,
    /// Verb of the sent command.
    pub verb: Verb,
}

/// FIFO of unsent commands plus the in-flight list.
#[derive(Debug, Default)]
pub struct CommandQueue {
    tags: TagGenerator,
    queued: VecDeque<QueuedCommand>,
    in_flight: VecDeque<InFlight>,
}

impl CommandQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command and returns its tag.
    pub fn enqueue(&mut self, command: Command) -> Tag {
        let tag = self.tags.next_tag();
        self.queued.push_back(QueuedCommand { tag, command });
        tag
    }

    /// Serializes the head of the queue and marks it in flight.
    ///
    /// Returns `None` if nothing is queued.
    pub fn drain(&mut self) -> Option<Transmit> {
        let queued = self.queued.pop_front()?;
        Some(self.send(&queued))
    }

    /// Serializes every queued command into one pipelined batch.
    ///
    /// Returns `None` if nothing is queued.
    pub fn drain_all(&mut self) -> Option<Transmit> {
        let mut batch: Option<Transmit> = None;
        while let Some(queued) = self.queued.pop_front() {
            let transmit = self.send(&queued);
            match &mut batch {
                Some(batch) => batch.append(transmit),
                None => batch = Some(transmit),
            }
        }
        batch
    }

    fn send(&mut self, queued: &QueuedCommand) -> Transmit {
        debug!(tag = %queued.tag, "C: {}", queued.command.redacted());
        self.in_flight.push_back(InFlight {
            tag: queued.tag,
            verb: queued.command.verb(),
        });
        Transmit::command(queued.tag, queued.command.serialize())
    }

    /// Returns the command the next reply answers.
    #[must_use]
    pub fn awaiting(&self) -> Option<InFlight> {
        self.in_flight.front().copied()
    }

    /// Retires the oldest in-flight command once its final reply arrived.
    pub fn acknowledge(&mut self) -> Option<InFlight> {
        self.in_flight.pop_front()
    }

    /// Returns true if a command with this verb awaits its reply.
    #[must_use]
    pub fn is_in_flight(&self, verb: Verb) -> bool {
        self.in_flight.iter().any(|f| f.verb == verb)
    }

    /// Number of commands waiting to be sent.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Number of commands sent but not yet answered.
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns true if nothing is queued or in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty()
    }

    /// Forgets all queued and in-flight commands. Tags keep increasing.
    pub fn clear(&mut self) {
        self.queued.clear();
        self.in_flight.clear();
    }
}
