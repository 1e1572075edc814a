use super::modular_cmp::is_acked;
use crate::protocols::tcp::segment::Segment;
use std::{collections::BTreeMap, time::Duration};

/// Identifies one entry of the retransmission table
pub type RetransmitId = u64;

/// A segment that consumes sequence space and waits to be acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retransmit {
    pub segment: Segment,
    /// How many times the segment was sent again after the first time
    pub retries: u32,
    /// For data segments, the stream offset just past the last octet carried
    pub stream_end: Option<u64>,
}

/// The retransmission table of a connection. Entries are kept in the order
/// they were sent.
#[derive(Debug, Default, Clone)]
pub struct Retransmissions {
    next_id: RetransmitId,
    entries: BTreeMap<RetransmitId, Retransmit>,
}

impl Retransmissions {
    /// Adds a freshly sent segment to the table
    pub fn insert(&mut self, segment: Segment, stream_end: Option<u64>) -> RetransmitId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            Retransmit {
                segment,
                retries: 0,
                stream_end,
            },
        );
        id
    }

    /// Puts an entry taken out by [`Retransmissions::remove`] back in place
    pub fn restore(&mut self, id: RetransmitId, entry: Retransmit) {
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: RetransmitId) -> Option<Retransmit> {
        self.entries.remove(&id)
    }

    /// Removes every entry whose last sequence number is covered by `ack`.
    pub fn acknowledge(&mut self, ack: u32) -> Vec<(RetransmitId, Retransmit)> {
        let acked: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| is_acked(entry.segment.last_seq(), ack))
            .map(|(id, _)| *id)
            .collect();
        acked
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry)))
            .collect()
    }

    /// Removes every entry with the given sequence number
    pub fn remove_seq(&mut self, seq: u32) -> Vec<RetransmitId> {
        let ids: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.segment.header.seq == seq)
            .map(|(id, _)| *id)
            .collect();
        for id in ids.iter() {
            self.entries.remove(id);
        }
        ids
    }

    /// Empties the table, returning the ids of the removed entries
    pub fn clear(&mut self) -> Vec<RetransmitId> {
        std::mem::take(&mut self.entries).into_keys().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The timers a connection runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Fires when the given retransmission entry should be sent again
    Retransmit(RetransmitId),
    /// Fires when TIME-WAIT is over
    TimeWait,
}

/// A request from the TCB to whoever runs its timers. Starting a timer that is
/// already running restarts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Start(TimerKind, Duration),
    Cancel(TimerKind),
}
