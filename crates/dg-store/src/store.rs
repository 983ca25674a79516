//! # EventStore — Four Partitions, One Sequence
//!
//! The in-process store implementation. Each [`EventKind`] owns one
//! append-only partition behind its own `RwLock`; a shared `AtomicI64`
//! hands out globally unique, monotonically increasing sequence numbers
//! starting at 1.
//!
//! Appends optionally write through to a [`Journal`]; opening a store over
//! a journal directory replays surviving rows and resumes the sequence
//! counter at `max(seq) + 1`.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, RwLock};

use dg_core::{EventKind, EventRecord, ALL_KINDS};

use crate::journal::Journal;
use crate::query::{OrderCol, QuerySpec, ResultSet, StoreExecutor};
use crate::StoreError;

/// Longest accepted event domain, in characters.
pub const MAX_DOMAIN_LEN: usize = 16;

/// Longest accepted event name, in characters.
pub const MAX_NAME_LEN: usize = 32;

pub struct EventStore {
    partitions: [RwLock<Vec<EventRecord>>; 4],
    /// Next sequence number to hand out. Sequences start at 1.
    next_seq: AtomicI64,
    journal: Option<Mutex<Journal>>,
}

impl EventStore {
    /// A volatile store with no journal attached.
    pub fn new() -> Self {
        Self {
            partitions: [
                RwLock::new(Vec::new()),
                RwLock::new(Vec::new()),
                RwLock::new(Vec::new()),
                RwLock::new(Vec::new()),
            ],
            next_seq: AtomicI64::new(1),
            journal: None,
        }
    }

    /// Open a journal-backed store, replaying whatever rows survive in
    /// `dir` and resuming the sequence counter past the highest one seen.
    ///
    /// Replayed rows keep their stored sequence numbers; they bypass
    /// `append` entirely.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let (journal, replayed) = Journal::open(dir)?;
        let mut store = Self::new();
        let mut max_seq = 0;
        for record in replayed {
            max_seq = max_seq.max(record.seq);
            store.partition(record.kind).write().unwrap().push(record);
        }
        store.next_seq.store(max_seq + 1, Ordering::SeqCst);
        store.journal = Some(Mutex::new(journal));
        tracing::info!(resumed_seq = max_seq + 1, "event store opened");
        Ok(store)
    }

    #[inline]
    fn partition(&self, kind: EventKind) -> &RwLock<Vec<EventRecord>> {
        &self.partitions[(kind.as_u32() - 1) as usize]
    }

    /// Validate, stamp a sequence number, append, and mirror to the
    /// journal when one is attached. Returns the assigned sequence.
    pub fn append(&self, mut event: EventRecord) -> Result<i64, StoreError> {
        if event.domain.is_empty() || event.domain.chars().count() > MAX_DOMAIN_LEN {
            return Err(StoreError::InvalidEvent(format!(
                "domain must be 1..={MAX_DOMAIN_LEN} chars"
            )));
        }
        if event.name.is_empty() || event.name.chars().count() > MAX_NAME_LEN {
            return Err(StoreError::InvalidEvent(format!(
                "name must be 1..={MAX_NAME_LEN} chars"
            )));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        event.seq = seq;

        if let Some(journal) = &self.journal {
            journal.lock().unwrap().append(&event)?;
        }
        self.partition(event.kind).write().unwrap().push(event);
        Ok(seq)
    }

    /// Number of rows currently held in one partition.
    pub fn count(&self, kind: EventKind) -> usize {
        self.partition(kind).read().unwrap().len()
    }

    /// Highest sequence number assigned so far (0 when the store is empty).
    pub fn max_seq(&self) -> i64 {
        self.next_seq.load(Ordering::SeqCst) - 1
    }

    /// Per-partition row counts in wire-value order.
    pub fn counts(&self) -> [(EventKind, usize); 4] {
        ALL_KINDS.map(|kind| (kind, self.count(kind)))
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreExecutor for EventStore {
    fn execute(&self, kind: EventKind, spec: &QuerySpec) -> Result<ResultSet, StoreError> {
        let partition = self.partition(kind).read().unwrap();
        let mut rows: Vec<EventRecord> = partition
            .iter()
            .filter(|row| spec.predicate.as_ref().map_or(true, |p| p.matches(row)))
            .cloned()
            .collect();
        drop(partition);

        // Break time-column ties by sequence so pagination walks a total order.
        match spec.order.col {
            OrderCol::Time => rows.sort_by_key(|r| (r.happen_time, r.seq)),
            OrderCol::Seq => rows.sort_by_key(|r| r.seq),
        }
        if !spec.order.ascending {
            rows.reverse();
        }
        rows.truncate(spec.limit);
        Ok(ResultSet::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_core::{Cond, Op};

    use crate::query::OrderBy;

    fn spec(predicate: Option<Cond>, col: OrderCol, limit: usize) -> QuerySpec {
        QuerySpec {
            predicate,
            order: OrderBy::ascending(col),
            limit,
        }
    }

    #[test]
    fn test_append_assigns_monotonic_global_sequences() {
        let store = EventStore::new();
        let a = store
            .append(EventRecord::new("D", "E1", EventKind::Fault, 10))
            .unwrap();
        let b = store
            .append(EventRecord::new("D", "E2", EventKind::Behavior, 20))
            .unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(store.max_seq(), 2);
        assert_eq!(store.count(EventKind::Fault), 1);
        assert_eq!(store.count(EventKind::Behavior), 1);
    }

    #[test]
    fn test_append_rejects_invalid_domain_and_name() {
        let store = EventStore::new();
        let empty = EventRecord::new("", "E", EventKind::Fault, 0);
        assert!(store.append(empty).is_err());
        let long = EventRecord::new("D".repeat(17), "E", EventKind::Fault, 0);
        assert!(store.append(long).is_err());
        let long_name = EventRecord::new("D", "E".repeat(33), EventKind::Fault, 0);
        assert!(store.append(long_name).is_err());
    }

    #[test]
    fn test_execute_orders_by_time_with_seq_tiebreak_and_honors_limit() {
        let store = EventStore::new();
        store
            .append(EventRecord::new("D", "E", EventKind::Fault, 30))
            .unwrap();
        store
            .append(EventRecord::new("D", "E", EventKind::Fault, 10))
            .unwrap();
        store
            .append(EventRecord::new("D", "E", EventKind::Fault, 10))
            .unwrap();

        let rows: Vec<_> = store
            .execute(EventKind::Fault, &spec(None, OrderCol::Time, 2))
            .unwrap()
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].happen_time, rows[0].seq), (10, 2));
        assert_eq!((rows[1].happen_time, rows[1].seq), (10, 3));
    }

    #[test]
    fn test_execute_pushes_predicate_down() {
        let store = EventStore::new();
        store
            .append(EventRecord::new("AAF", "E", EventKind::Fault, 1).with_param("PID", 1))
            .unwrap();
        store
            .append(EventRecord::new("AAF", "E", EventKind::Fault, 2).with_param("PID", 2))
            .unwrap();

        let predicate = Some(Cond::leaf("PID", Op::Eq, 2i64));
        let rows: Vec<_> = store
            .execute(EventKind::Fault, &spec(predicate, OrderCol::Seq, 100))
            .unwrap()
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].seq, 2);
    }

    #[test]
    fn test_result_set_reports_exact_len() {
        let store = EventStore::new();
        for i in 0..5 {
            store
                .append(EventRecord::new("D", "E", EventKind::Security, i))
                .unwrap();
        }
        let result = store
            .execute(EventKind::Security, &spec(None, OrderCol::Seq, 3))
            .unwrap();
        assert_eq!(result.len(), 3);
    }
}
