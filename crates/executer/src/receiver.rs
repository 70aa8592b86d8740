use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc
    }
};

use axon_types::Update;
use itertools::Itertools;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{coordinator::Coordinator, pool::Pool};

/// Updates a transaction server prepared, waiting for the commit/abort
/// decision of their transaction.
pub(crate) struct PreparedUpdates {
    updates:  Vec<Update>,
    decision: oneshot::Receiver<bool>,
    echo:     oneshot::Sender<bool>
}

/// The transaction server's side of the confirm signal.
pub(crate) struct ConfirmHandle {
    decision: oneshot::Sender<bool>,
    echo:     oneshot::Receiver<bool>
}

impl PreparedUpdates {
    pub(crate) fn new(updates: Vec<Update>) -> (Self, ConfirmHandle) {
        let (decision_tx, decision_rx) = oneshot::channel();
        let (echo_tx, echo_rx) = oneshot::channel();
        (
            Self { updates, decision: decision_rx, echo: echo_tx },
            ConfirmHandle { decision: decision_tx, echo: echo_rx }
        )
    }
}

impl ConfirmHandle {
    /// Delivers the decision and waits until the receiver has acted on it,
    /// so the caller observes completion before reporting `done`.
    pub(crate) async fn resolve(self, decision: bool) -> bool {
        let _ = self.decision.send(decision);
        self.echo.await.unwrap_or(false)
    }
}

/// The single serial consumer owning the pool's remote append path.
///
/// Records are acted on strictly in arrival order: the head's confirm
/// signal gates everything behind it, so pool append order equals enqueue
/// order for committed transactions no matter which decision lands first.
pub(crate) struct UpdateReceiver {
    pool:        Arc<Pool>,
    coordinator: Arc<Coordinator>,
    pending:     Arc<AtomicUsize>,
    rx:          mpsc::Receiver<PreparedUpdates>
}

impl UpdateReceiver {
    pub(crate) fn new(
        pool: Arc<Pool>,
        coordinator: Arc<Coordinator>,
        pending: Arc<AtomicUsize>,
        rx: mpsc::Receiver<PreparedUpdates>
    ) -> Self {
        Self { pool, coordinator, pending, rx }
    }

    pub(crate) async fn run(mut self) {
        let mut queue: VecDeque<PreparedUpdates> = VecDeque::new();
        let mut open = true;
        loop {
            let mut head = match queue.pop_front() {
                Some(head) => head,
                None if open => match self.rx.recv().await {
                    Some(record) => record,
                    None => {
                        open = false;
                        continue
                    }
                },
                None => return
            };

            // Wait for the head's decision while buffering later arrivals.
            let decision = loop {
                tokio::select! {
                    decision = &mut head.decision => break decision.unwrap_or(false),
                    record = self.rx.recv(), if open => match record {
                        Some(record) => queue.push_back(record),
                        None => open = false
                    }
                }
            };

            if decision {
                debug!(
                    count = head.updates.len(),
                    updates = %head.updates.iter().format("; "),
                    "adding remote updates to the pool"
                );
                for update in &head.updates {
                    self.coordinator.notify_applied(update);
                }
                self.pool.append_all(head.updates);
            }
            // decrement before the echo so a server that observed the echo
            // can rely on the pending count being settled
            self.pending.fetch_sub(1, Ordering::AcqRel);
            let _ = head.echo.send(decision);
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use axon_types::{Assignment, Value};

    use super::*;

    struct Fixture {
        pool:        Arc<Pool>,
        coordinator: Arc<Coordinator>,
        pending:     Arc<AtomicUsize>,
        tx:          mpsc::Sender<PreparedUpdates>,
        task:        tokio::task::JoinHandle<()>
    }

    fn fixture() -> Fixture {
        let pool = Arc::new(Pool::default());
        let coordinator = Arc::new(Coordinator::default());
        let pending = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(
            UpdateReceiver::new(pool.clone(), coordinator.clone(), pending.clone(), rx).run()
        );
        Fixture { pool, coordinator, pending, tx, task }
    }

    impl Fixture {
        async fn enqueue(&self, resource: &str, value: i64) -> ConfirmHandle {
            let update =
                Update::new(vec![Assignment::new(resource, Value::Integer(value))]).unwrap();
            let (record, confirm) = PreparedUpdates::new(vec![update]);
            self.pending.fetch_add(1, Ordering::AcqRel);
            self.tx.send(record).await.unwrap();
            confirm
        }
    }

    #[tokio::test]
    async fn commits_preserve_enqueue_order() {
        let fx = fixture();
        let first = fx.enqueue("a", 1).await;
        let second = fx.enqueue("b", 2).await;

        // resolve out of order: the later enqueue decides first
        let second_task = tokio::spawn(second.resolve(true));
        tokio::task::yield_now().await;
        assert!(fx.pool.is_empty(), "second must wait for the head");

        assert!(first.resolve(true).await);
        assert!(second_task.await.unwrap());

        assert_eq!(
            fx.pool.take_head(),
            Some(Update::new(vec![Assignment::new("a", Value::Integer(1))]).unwrap())
        );
        assert_eq!(
            fx.pool.take_head(),
            Some(Update::new(vec![Assignment::new("b", Value::Integer(2))]).unwrap())
        );
        assert_eq!(fx.pending.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn dropped_records_never_reach_the_pool() {
        let fx = fixture();
        let first = fx.enqueue("a", 1).await;
        let second = fx.enqueue("b", 2).await;

        assert!(!first.resolve(false).await);
        assert!(second.resolve(true).await);

        assert_eq!(
            fx.pool.take_head(),
            Some(Update::new(vec![Assignment::new("b", Value::Integer(2))]).unwrap())
        );
        assert_eq!(fx.pool.take_head(), None);
    }

    #[tokio::test]
    async fn appended_updates_invalidate_tickets() {
        let fx = fixture();
        let ticket = fx
            .coordinator
            .request_read(HashSet::from(["a".to_owned()]));

        let confirm = fx.enqueue("a", 9).await;
        assert!(confirm.resolve(true).await);
        assert!(!fx.coordinator.confirm_read(&ticket));
    }

    #[tokio::test]
    async fn drains_queue_then_exits_on_close() {
        let fx = fixture();
        let confirm = fx.enqueue("a", 1).await;
        drop(fx.tx);
        assert!(confirm.resolve(true).await);
        fx.task.await.unwrap();
        assert_eq!(fx.pool.len(), 1);
    }
}
