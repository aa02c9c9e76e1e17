use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::EffectError;
use crate::listener::{ChangeBuffer, PendingChange};
use crate::params::ParameterStore;

/// Receives the batch applied by a flush, typically to schedule a UI update.
pub trait RefreshTarget: Send {
    fn refresh(&mut self, changes: &[PendingChange]);
}

impl<F> RefreshTarget for F
where
    F: FnMut(&[PendingChange]) + Send,
{
    fn refresh(&mut self, changes: &[PendingChange]) {
        self(changes)
    }
}

/// Moves buffered plugin changes into the [`ParameterStore`] at idle time.
pub struct ChangeFlusher {
    buffer: Arc<ChangeBuffer>,
    store: Arc<ParameterStore>,
    batch: Vec<PendingChange>,
    target: Option<Box<dyn RefreshTarget>>,
    log_overflow: bool,
}

impl ChangeFlusher {
    pub fn new(buffer: Arc<ChangeBuffer>, store: Arc<ParameterStore>) -> Self {
        let batch = Vec::with_capacity(buffer.capacity());
        Self {
            buffer,
            store,
            batch,
            target: None,
            log_overflow: true,
        }
    }

    pub fn with_overflow_logging(mut self, enabled: bool) -> Self {
        self.log_overflow = enabled;
        self
    }

    pub fn attach<T>(&mut self, target: T)
    where
        T: RefreshTarget + 'static,
    {
        self.target = Some(Box::new(target));
    }

    /// Stops refresh notifications. Later flushes still update the store.
    pub fn detach(&mut self) {
        self.target = None;
    }

    pub fn is_attached(&self) -> bool {
        self.target.is_some()
    }

    /// Applies every pending change and returns how many parameters changed.
    ///
    /// Within one batch the change with the highest sequence wins for each id.
    /// An empty buffer is a no-op returning 0.
    pub fn flush(&mut self) -> usize {
        self.batch.clear();
        self.buffer.drain_into(&mut self.batch);

        let dropped = self.buffer.take_dropped();
        if dropped > 0 && self.log_overflow {
            let error = EffectError::QueueOverflow { dropped };
            warn!(%error, "oldest pending changes lost");
        }
        if self.batch.is_empty() {
            return 0;
        }

        self.batch.sort_unstable_by_key(|change| (change.id, change.sequence));
        self.batch.dedup_by(|later, earlier| {
            if later.id == earlier.id {
                *earlier = *later;
                true
            } else {
                false
            }
        });

        for change in &self.batch {
            self.store.set(change.id, change.value);
        }
        let applied = self.batch.len();
        trace!(applied, "flushed pending parameter changes");

        if let Some(target) = self.target.as_mut() {
            target.refresh(&self.batch);
        }
        applied
    }

    pub fn buffer(&self) -> &Arc<ChangeBuffer> {
        &self.buffer
    }

    pub fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }
}

impl std::fmt::Debug for ChangeFlusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFlusher")
            .field("buffer", &self.buffer)
            .field("attached", &self.target.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamId, ParameterInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (Arc<ChangeBuffer>, Arc<ParameterStore>, ChangeFlusher) {
        let store = Arc::new(ParameterStore::with_parameters([
            ParameterInfo::new(1, "A", 0.0, 1.0, 0.0),
            ParameterInfo::new(2, "B", 0.0, 1.0, 0.0),
        ]));
        let buffer = Arc::new(ChangeBuffer::new([ParamId(1), ParamId(2)], 4));
        let flusher = ChangeFlusher::new(Arc::clone(&buffer), Arc::clone(&store));
        (buffer, store, flusher)
    }

    #[test]
    fn second_flush_without_events_is_a_no_op() {
        let (buffer, store, mut flusher) = setup();
        buffer.push(ParamId(1), 0.4);
        assert_eq!(flusher.flush(), 1);
        let before = store.snapshot();
        store.drain_dirty();

        assert_eq!(flusher.flush(), 0);
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.dirty_count(), 0);
    }

    #[test]
    fn overflow_duplicates_resolve_to_last_sequence() {
        let (buffer, store, mut flusher) = setup();
        buffer.push(ParamId(9), 1.0);
        buffer.push(ParamId(9), 2.0);
        buffer.push(ParamId(9), 3.0);
        assert_eq!(flusher.flush(), 1);
        assert_eq!(store.get(ParamId(9)), Ok(3.0));
    }

    #[test]
    fn refresh_fires_only_when_attached_and_something_changed() {
        let (buffer, _store, mut flusher) = setup();
        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&refreshes);
        flusher.attach(move |changes: &[PendingChange]| {
            counter.fetch_add(changes.len(), Ordering::SeqCst);
        });

        assert_eq!(flusher.flush(), 0);
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);

        buffer.push(ParamId(1), 0.1);
        buffer.push(ParamId(2), 0.2);
        assert_eq!(flusher.flush(), 2);
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);

        flusher.detach();
        buffer.push(ParamId(1), 0.3);
        assert_eq!(flusher.flush(), 1);
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }
}
