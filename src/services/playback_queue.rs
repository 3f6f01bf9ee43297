//! Playback Queue
//!
//! Ordered list of queue entries. Index 0 is the current entry, the one the
//! streaming worker plays. All mutations go through one re-entrant lock so a
//! caller that already holds it (for example while enqueueing a whole album)
//! can keep calling the public methods. Every mutation writes a snapshot to
//! the state store; the queue is reloaded from that snapshot on startup.

use crate::error::{AppError, Result};
use crate::models::{EntryId, MediaId, MediaKind, QueueEntry, QueuePosition, QueueRow};
use crate::services::state_store::StateStore;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PlaybackQueue {
    kind: MediaKind,
    entries: ReentrantMutex<RefCell<VecDeque<QueueEntry>>>,
    store: Arc<dyn StateStore>,
}

impl PlaybackQueue {
    /// Create the queue for `kind`, restoring the last snapshot from `store`.
    ///
    /// A snapshot that cannot be read falls back to an empty queue.
    pub fn load(kind: MediaKind, store: Arc<dyn StateStore>) -> Self {
        let entries = match Self::restore(kind, store.as_ref()) {
            Ok(entries) => {
                info!("Restored {} queue with {} entries", kind, entries.len());
                entries
            }
            Err(e) => {
                warn!("Could not restore {} queue, starting empty: {}", kind, e);
                VecDeque::new()
            }
        };

        Self {
            kind,
            entries: ReentrantMutex::new(RefCell::new(entries)),
            store,
        }
    }

    fn restore(kind: MediaKind, store: &dyn StateStore) -> Result<VecDeque<QueueEntry>> {
        let rows = store.load_queue(kind)?;
        let mut seen = HashSet::with_capacity(rows.len());
        let mut entries = VecDeque::with_capacity(rows.len());

        for row in rows {
            let entry = QueueEntry::try_from(row)?;
            if !seen.insert(entry.entry_id) {
                warn!("Dropping duplicate queue entry {} while restoring", entry.entry_id);
                continue;
            }
            entries.push_back(entry);
        }

        Ok(entries)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Run `f` while holding the queue lock. Calls made from inside `f`
    /// re-enter the lock, so the sequence is atomic for other threads.
    pub fn transaction<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.entries.lock();
        f(self)
    }

    pub fn enqueue(&self, media_id: MediaId, position: QueuePosition) -> EntryId {
        self.enqueue_entry(media_id, position, false)
    }

    /// Enqueue with an explicit random flag; the engine uses this for refills.
    pub fn enqueue_entry(&self, media_id: MediaId, position: QueuePosition, is_random: bool) -> EntryId {
        let guard = self.entries.lock();
        let entry_id = {
            let mut entries = guard.borrow_mut();

            let mut entry_id = EntryId::generate();
            while entries.iter().any(|e| e.entry_id == entry_id) {
                entry_id = EntryId::generate();
            }

            let entry = QueueEntry {
                entry_id,
                media_id,
                is_random,
            };

            match position {
                QueuePosition::Last => entries.push_back(entry),
                QueuePosition::Next if entries.is_empty() => entries.push_back(entry),
                QueuePosition::Next => entries.insert(1, entry),
            }
            entry_id
        };

        debug!("Enqueued media {} as {} ({:?})", media_id, entry_id, position);
        self.persist(&guard.borrow());
        entry_id
    }

    /// Enqueue several media at once (a whole album, say), keeping their order
    /// for both positions.
    pub fn enqueue_many(&self, media_ids: &[MediaId], position: QueuePosition, is_random: bool) -> Vec<EntryId> {
        self.transaction(|queue| match position {
            QueuePosition::Last => media_ids
                .iter()
                .map(|&id| queue.enqueue_entry(id, position, is_random))
                .collect(),
            QueuePosition::Next => {
                // An empty queue takes the first id as current entry, the rest
                // goes behind it in order.
                let (head, rest) = match media_ids.split_first() {
                    Some((&first, rest)) if queue.is_empty() => {
                        (Some(queue.enqueue_entry(first, QueuePosition::Last, is_random)), rest)
                    }
                    _ => (None, media_ids),
                };

                let mut ids: Vec<EntryId> = rest
                    .iter()
                    .rev()
                    .map(|&id| queue.enqueue_entry(id, QueuePosition::Next, is_random))
                    .collect();
                ids.reverse();
                head.into_iter().chain(ids).collect()
            }
        })
    }

    pub fn current(&self) -> Option<QueueEntry> {
        let guard = self.entries.lock();
        let entries = guard.borrow();
        entries.front().copied()
    }

    /// Drop the current entry and return the new one
    pub fn advance(&self) -> Option<QueueEntry> {
        let guard = self.entries.lock();
        let next = {
            let mut entries = guard.borrow_mut();
            if entries.pop_front().is_none() {
                return None;
            }
            entries.front().copied()
        };

        self.persist(&guard.borrow());
        next
    }

    /// Remove any entry except the current one
    pub fn remove(&self, entry_id: EntryId) -> Result<QueueEntry> {
        let guard = self.entries.lock();
        let removed = {
            let mut entries = guard.borrow_mut();
            let pos = entries
                .iter()
                .position(|e| e.entry_id == entry_id)
                .ok_or(AppError::EntryNotFound(entry_id))?;

            if pos == 0 {
                return Err(AppError::CurrentEntryProtected);
            }
            entries.remove(pos).ok_or(AppError::EntryNotFound(entry_id))?
        };

        debug!("Removed queue entry {} (media {})", entry_id, removed.media_id);
        self.persist(&guard.borrow());
        Ok(removed)
    }

    /// Place `entry_id` directly behind `after_id`
    pub fn move_entry(&self, entry_id: EntryId, after_id: EntryId) -> Result<()> {
        let guard = self.entries.lock();
        {
            let mut entries = guard.borrow_mut();
            if entries.front().map(|e| e.entry_id) == Some(entry_id) {
                return Err(AppError::CurrentEntryProtected);
            }
            if entry_id == after_id {
                return Ok(());
            }

            let from = entries
                .iter()
                .position(|e| e.entry_id == entry_id)
                .ok_or(AppError::EntryNotFound(entry_id))?;
            let after = entries
                .iter()
                .position(|e| e.entry_id == after_id)
                .ok_or(AppError::EntryNotFound(after_id))?;

            // Removing `from` shifts everything behind it one slot forward
            let to = if after < from { after + 1 } else { after };
            let entry = entries.remove(from).ok_or(AppError::EntryNotFound(entry_id))?;
            entries.insert(to, entry);
        }

        debug!("Moved queue entry {} behind {}", entry_id, after_id);
        self.persist(&guard.borrow());
        Ok(())
    }

    pub fn entry(&self, entry_id: EntryId) -> Option<QueueEntry> {
        let guard = self.entries.lock();
        let entries = guard.borrow();
        entries.iter().find(|e| e.entry_id == entry_id).copied()
    }

    pub fn snapshot(&self) -> Vec<QueueEntry> {
        let guard = self.entries.lock();
        let entries = guard.borrow();
        entries.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        let guard = self.entries.lock();
        let len = guard.borrow().len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &VecDeque<QueueEntry>) {
        let rows: Vec<QueueRow> = entries.iter().map(QueueRow::from).collect();
        if let Err(e) = self.store.save_queue(self.kind, &rows) {
            warn!("Failed to save {} queue snapshot: {}", self.kind, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::state_store::MemoryStateStore;
    use std::thread;

    fn queue() -> (PlaybackQueue, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new());
        (PlaybackQueue::load(MediaKind::Audio, store.clone()), store)
    }

    fn media_ids(queue: &PlaybackQueue) -> Vec<MediaId> {
        queue.snapshot().iter().map(|e| e.media_id).collect()
    }

    #[test]
    fn test_enqueue_current_advance() {
        let (queue, _) = queue();
        assert!(queue.current().is_none());

        queue.enqueue(7357, QueuePosition::Last);
        queue.enqueue(1337, QueuePosition::Last);
        assert_eq!(queue.current().unwrap().media_id, 7357);

        assert_eq!(queue.advance().unwrap().media_id, 1337);
        assert_eq!(queue.current().unwrap().media_id, 1337);

        assert!(queue.advance().is_none());
        assert!(queue.current().is_none());
        assert!(queue.advance().is_none());
    }

    #[test]
    fn test_next_never_replaces_current() {
        let (queue, _) = queue();
        queue.enqueue(1, QueuePosition::Next);
        queue.enqueue(2, QueuePosition::Last);
        queue.enqueue(3, QueuePosition::Next);

        assert_eq!(media_ids(&queue), vec![1, 3, 2]);
    }

    #[test]
    fn test_current_entry_is_protected() {
        let (queue, store) = queue();
        let current = queue.enqueue(1, QueuePosition::Last);
        let other = queue.enqueue(2, QueuePosition::Last);
        let before = queue.snapshot();
        let saves = store.save_count();

        assert!(matches!(queue.remove(current), Err(AppError::CurrentEntryProtected)));
        assert!(matches!(
            queue.move_entry(current, other),
            Err(AppError::CurrentEntryProtected)
        ));
        assert!(matches!(
            queue.move_entry(current, current),
            Err(AppError::CurrentEntryProtected)
        ));

        assert_eq!(queue.snapshot(), before);
        assert_eq!(store.save_count(), saves);
    }

    #[test]
    fn test_remove_unknown_entry() {
        let (queue, _) = queue();
        queue.enqueue(1, QueuePosition::Last);
        let missing = EntryId::from_u128(99);
        assert!(matches!(queue.remove(missing), Err(AppError::EntryNotFound(id)) if id == missing));
    }

    #[test]
    fn test_remove_entry() {
        let (queue, _) = queue();
        queue.enqueue(1, QueuePosition::Last);
        let second = queue.enqueue(2, QueuePosition::Last);
        queue.enqueue(3, QueuePosition::Last);

        assert_eq!(queue.remove(second).unwrap().media_id, 2);
        assert_eq!(media_ids(&queue), vec![1, 3]);
    }

    #[test]
    fn test_move_forward_and_backward() {
        let (queue, _) = queue();
        let a = queue.enqueue(1, QueuePosition::Last);
        let b = queue.enqueue(2, QueuePosition::Last);
        let c = queue.enqueue(3, QueuePosition::Last);
        let d = queue.enqueue(4, QueuePosition::Last);

        queue.move_entry(b, d).unwrap();
        assert_eq!(media_ids(&queue), vec![1, 3, 4, 2]);

        queue.move_entry(b, a).unwrap();
        assert_eq!(media_ids(&queue), vec![1, 2, 3, 4]);

        queue.move_entry(d, b).unwrap();
        assert_eq!(media_ids(&queue), vec![1, 2, 4, 3]);

        queue.move_entry(c, c).unwrap();
        assert_eq!(media_ids(&queue), vec![1, 2, 4, 3]);
    }

    #[test]
    fn test_enqueue_many_keeps_order() {
        let (queue, _) = queue();
        queue.enqueue_many(&[10, 11], QueuePosition::Next, false);
        assert_eq!(media_ids(&queue), vec![10, 11]);

        queue.enqueue_many(&[20, 21, 22], QueuePosition::Next, false);
        assert_eq!(media_ids(&queue), vec![10, 20, 21, 22, 11]);

        let ids = queue.enqueue_many(&[30, 31], QueuePosition::Last, true);
        assert_eq!(media_ids(&queue), vec![10, 20, 21, 22, 11, 30, 31]);
        assert!(ids.iter().all(|id| queue.entry(*id).unwrap().is_random));
    }

    #[test]
    fn test_nested_transaction_reenters_lock() {
        let (queue, _) = queue();
        let ids = queue.transaction(|q| {
            let first = q.enqueue(1, QueuePosition::Last);
            let inner = q.transaction(|q| q.enqueue(2, QueuePosition::Last));
            assert_eq!(q.len(), 2);
            (first, inner)
        });

        assert_eq!(queue.current().unwrap().entry_id, ids.0);
        assert_eq!(queue.entry(ids.1).unwrap().media_id, 2);
    }

    #[test]
    fn test_snapshot_restored_verbatim() {
        let store = Arc::new(MemoryStateStore::new());
        let first = PlaybackQueue::load(MediaKind::Audio, store.clone());
        first.enqueue(5, QueuePosition::Last);
        first.enqueue_entry(6, QueuePosition::Last, true);
        let before = first.snapshot();

        let second = PlaybackQueue::load(MediaKind::Audio, store.clone());
        assert_eq!(second.snapshot(), before);

        let video = PlaybackQueue::load(MediaKind::Video, store);
        assert!(video.is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_falls_back_to_empty() {
        let store = Arc::new(MemoryStateStore::new());
        store
            .save_queue(
                MediaKind::Audio,
                &[QueueRow {
                    entryid: "not-a-number".into(),
                    mediaid: 1,
                    israndom: "False".into(),
                }],
            )
            .unwrap();

        let queue = PlaybackQueue::load(MediaKind::Audio, store);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicate_rows_are_dropped_on_restore() {
        let store = Arc::new(MemoryStateStore::new());
        let row = QueueRow {
            entryid: "12345".into(),
            mediaid: 1,
            israndom: "False".into(),
        };
        store
            .save_queue(MediaKind::Audio, &[row.clone(), row])
            .unwrap();

        let queue = PlaybackQueue::load(MediaKind::Audio, store);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_concurrent_enqueue() {
        let (queue, _) = queue();
        let queue = Arc::new(queue);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        queue.enqueue(t * 100 + i, QueuePosition::Last);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 200);
        let unique: HashSet<EntryId> = snapshot.iter().map(|e| e.entry_id).collect();
        assert_eq!(unique.len(), 200);
    }
}
