use crate::config::ProbeCount;
use crate::probe::Probe;
use crate::types::{Identifier, Sequence};
use indexmap::IndexMap;
use std::time::{Duration, Instant, SystemTime};
use tracing::instrument;

/// The outcome of matching a reply against the probes we have sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// The first reply for an in-flight probe.
    Matched { probe: Probe, rtt: Duration },
    /// A further reply for a probe which has already been matched.
    Duplicate(Sequence),
    /// A reply for a sequence which is not in flight, either expired or never sent.
    Unknown(Sequence),
}

/// Assigns sequence numbers to probes and matches replies to them.
///
/// Each probe moves from in-flight to matched (first reply wins) or is
/// expired once it has been in flight for `reply_timeout`. Matched sequences
/// are remembered for a further `reply_timeout` so later replies for them are
/// reported as duplicates.
///
/// Both tables are ordered by insertion time which allows expiry to only
/// inspect the oldest entries.
#[derive(Debug)]
pub struct SequenceTracker {
    identifier: Identifier,
    count: ProbeCount,
    reply_timeout: Duration,
    next_sequence: Sequence,
    sent: usize,
    in_flight: IndexMap<Sequence, Probe>,
    matched: IndexMap<Sequence, Instant>,
}

impl SequenceTracker {
    #[must_use]
    pub fn new(identifier: Identifier, count: ProbeCount, reply_timeout: Duration) -> Self {
        Self {
            identifier,
            count,
            reply_timeout,
            next_sequence: Sequence(0),
            sent: 0,
            in_flight: IndexMap::new(),
            matched: IndexMap::new(),
        }
    }

    /// Create the next probe and record it as in flight.
    ///
    /// Returns `None` once `count` probes have been sent.
    #[instrument(skip(self), level = "trace")]
    pub fn next_probe(&mut self, sent: Instant, sent_at: SystemTime) -> Option<Probe> {
        if !self.count.allows(self.sent) {
            return None;
        }
        let sequence = self.next_sequence;
        let probe = Probe::new(sequence, self.identifier, sent, sent_at);
        self.matched.shift_remove(&sequence);
        self.in_flight.shift_remove(&sequence);
        self.in_flight.insert(sequence, probe);
        self.next_sequence = sequence.next();
        self.sent += 1;
        Some(probe)
    }

    /// Match a reply for `sequence` received at `received`.
    ///
    /// Probes which expired before `received` are collected first, so a late
    /// reply is never matched.
    #[instrument(skip(self), level = "trace")]
    pub fn match_reply(&mut self, sequence: Sequence, received: Instant) -> Match {
        self.expire(received);
        if let Some(probe) = self.in_flight.shift_remove(&sequence) {
            self.matched.insert(sequence, received);
            let rtt = received.saturating_duration_since(probe.sent);
            Match::Matched { probe, rtt }
        } else if self.matched.contains_key(&sequence) {
            Match::Duplicate(sequence)
        } else {
            Match::Unknown(sequence)
        }
    }

    /// Remove an in-flight probe which an `ICMP` error reported as lost.
    #[instrument(skip(self), level = "trace")]
    pub fn fail(&mut self, sequence: Sequence) -> Option<Probe> {
        self.in_flight.shift_remove(&sequence)
    }

    /// Expire in-flight probes older than `reply_timeout` and forget matched
    /// sequences older than `reply_timeout`.
    ///
    /// Returns the number of in-flight probes expired.
    pub fn expire(&mut self, now: Instant) -> usize {
        let timeout = self.reply_timeout;
        let mut expired = 0;
        while self
            .in_flight
            .first()
            .is_some_and(|(_, probe)| now.saturating_duration_since(probe.sent) >= timeout)
        {
            self.in_flight.shift_remove_index(0);
            expired += 1;
        }
        while self
            .matched
            .first()
            .is_some_and(|(_, matched)| now.saturating_duration_since(*matched) >= timeout)
        {
            self.matched.shift_remove_index(0);
        }
        if expired > 0 {
            tracing::debug!(expired, in_flight = self.in_flight.len(), "expired probes");
        }
        expired
    }

    /// The number of probes sent.
    #[must_use]
    pub const fn sent(&self) -> usize {
        self.sent
    }

    /// The number of probes awaiting a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Have all probes been sent and either matched or expired?
    ///
    /// Never true for an unbounded count.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.count.allows(self.sent) && self.in_flight.is_empty()
    }
}
