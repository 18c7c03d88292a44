/// Receive-side reorder buffer.
///
/// Frames travel on independent streams, so they arrive in any order. The
/// buffer releases items in strictly increasing sequence order starting at
/// `expected`. An item that never arrives holds back everything after it
/// until the caller invokes [`ReorderBuffer::skip_gap`].
///
/// Sequence numbers do not wrap. Once `u32::MAX` has been released every
/// later item counts as a duplicate.

use std::collections::BTreeMap;

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    expected: u64,
    pending: BTreeMap<u32, T>,
    duplicates: u64,
    skipped: u64,
}

impl<T> ReorderBuffer<T> {
    /// Buffer expecting `first` as the first sequence number.
    pub fn new(first: u32) -> Self {
        Self {
            expected: u64::from(first),
            pending: BTreeMap::new(),
            duplicates: 0,
            skipped: 0,
        }
    }

    /// Accept one item. Returns the items now releasable, in order.
    ///
    /// Items at or below an already released sequence number, or already
    /// pending, are dropped and counted as duplicates.
    pub fn push(&mut self, seq: u32, item: T) -> Vec<T> {
        if u64::from(seq) < self.expected || self.pending.contains_key(&seq) {
            self.duplicates += 1;
            return Vec::new();
        }
        if u64::from(seq) != self.expected {
            self.pending.insert(seq, item);
            return Vec::new();
        }

        let mut released = vec![item];
        self.expected += 1;
        self.drain_ready(&mut released);
        released
    }

    /// Give up on the missing sequence numbers before the lowest pending
    /// item and release everything contiguous from there.
    pub fn skip_gap(&mut self) -> Vec<T> {
        let Some(&first) = self.pending.keys().next() else {
            return Vec::new();
        };
        self.skipped += u64::from(first) - self.expected;
        self.expected = u64::from(first);
        let mut released = Vec::new();
        self.drain_ready(&mut released);
        released
    }

    fn drain_ready(&mut self, out: &mut Vec<T>) {
        while let Some(entry) = self.pending.first_entry() {
            if u64::from(*entry.key()) != self.expected {
                break;
            }
            out.push(entry.remove());
            self.expected += 1;
        }
    }

    /// Next sequence number to be released.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Sequence numbers abandoned by [`ReorderBuffer::skip_gap`].
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
