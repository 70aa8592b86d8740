use std::collections::VecDeque;

use axon_types::Update;
use parking_lot::{Mutex, MutexGuard};

/// Ordered buffer of updates awaiting application to memory.
///
/// Append-only except for the local driver, which dequeues the head on
/// `Exec`. One mutex covers append and head-take; remote appends interleave
/// with local ones only at this granularity.
#[derive(Default)]
pub struct Pool {
    inner: Mutex<VecDeque<Update>>
}

impl Pool {
    pub fn append(&self, update: Update) {
        self.inner.lock().push_back(update);
    }

    pub fn append_all(&self, updates: impl IntoIterator<Item = Update>) {
        let mut inner = self.inner.lock();
        inner.extend(updates);
    }

    pub fn take_head(&self) -> Option<Update> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Locks the pool for a caller that needs emptiness and its own action
    /// to be one atomic step (`do_if_stable`).
    pub(crate) fn locked(&self) -> MutexGuard<'_, VecDeque<Update>> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod test {
    use axon_types::{Assignment, Value};

    use super::*;

    fn update(resource: &str, value: i64) -> Update {
        Update::new(vec![Assignment::new(resource, Value::Integer(value))]).unwrap()
    }

    #[test]
    fn fifo_order() {
        let pool = Pool::default();
        pool.append(update("a", 1));
        pool.append_all([update("b", 2), update("c", 3)]);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.take_head(), Some(update("a", 1)));
        assert_eq!(pool.take_head(), Some(update("b", 2)));
        assert_eq!(pool.take_head(), Some(update("c", 3)));
        assert_eq!(pool.take_head(), None);
        assert!(pool.is_empty());
    }
}
