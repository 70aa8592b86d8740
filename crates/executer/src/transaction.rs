use std::{collections::HashSet, sync::atomic::Ordering};

use axon_types::{Command, ExternalAction, Update};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error};

use crate::{
    error::EvalError,
    evaluator::{cond_eval_actions, Evaluator},
    receiver::PreparedUpdates,
    transport::{CommandPort, RemoteTransaction},
    Inner
};

/// Accepts inbound transactions until cancelled, spawning one isolated
/// server task per transaction.
pub(crate) async fn accept<E: Evaluator>(
    inner: std::sync::Arc<Inner<E>>,
    mut inbound: mpsc::Receiver<RemoteTransaction>,
    to_receiver: mpsc::Sender<PreparedUpdates>,
    cancel: CancellationToken,
    tracker: TaskTracker
) {
    loop {
        let transaction = tokio::select! {
            _ = cancel.cancelled() => return,
            transaction = inbound.recv() => match transaction {
                Some(transaction) => transaction,
                None => return
            }
        };
        tracker.spawn(serve(
            inner.clone(),
            to_receiver.clone(),
            cancel.clone(),
            transaction
        ));
    }
}

/// Runs the receiver side of the 3-phase handshake for one inbound
/// transaction, possibly handing a prepared record to the update receiver.
pub(crate) async fn serve<E: Evaluator>(
    inner: std::sync::Arc<Inner<E>>,
    to_receiver: mpsc::Sender<PreparedUpdates>,
    cancel: CancellationToken,
    transaction: RemoteTransaction
) {
    let (payload, mut port) = transaction.into_parts();

    let actions = match inner.evaluator.unmarshal(&payload, &inner.types) {
        Ok(actions) => actions,
        Err(err) => {
            error!(act = "unmarshalling", obj = "external actions", %err,
                   "error during external actions unmarshalling");
            let _ = port.send(Command::Aborted).await;
            return
        }
    };

    // Everything this transaction would read on this node.
    let mut working_set: HashSet<String> = HashSet::new();
    for action in &actions {
        if action.is_evaluable(&inner.types) {
            working_set.extend(action.working_set(&inner.types).into_iter().map(str::to_owned));
        }
    }
    let ticket = inner.coordinator.request_read(working_set);

    let updates = match evaluate(&inner, &actions) {
        Ok(updates) => updates,
        Err(err) => {
            error!(act = "eval", obj = "external actions", %err,
                   "error during external actions evaluation");
            inner.coordinator.close_read(ticket);
            let _ = port.send(Command::Aborted).await;
            return
        }
    };

    if updates.is_empty() {
        let reply = if inner.coordinator.confirm_read(&ticket) {
            Command::NotInterested
        } else {
            Command::Aborted
        };
        inner.coordinator.close_read(ticket);
        let _ = port.send(reply).await;
        return
    }

    if port.send(Command::Interested).await.is_err() {
        inner.coordinator.close_read(ticket);
        return
    }

    let command = tokio::select! {
        _ = cancel.cancelled() => {
            // still before prepared: bail out visibly
            inner.coordinator.close_read(ticket);
            let _ = port.send(Command::Aborted).await;
            return
        }
        command = port.recv() => command
    };

    let confirm = match command {
        Some(Command::CanCommit) => {
            if !inner.coordinator.confirm_read(&ticket) {
                inner.coordinator.close_read(ticket);
                let _ = port.send(Command::Aborted).await;
                return
            }
            let (record, confirm) = PreparedUpdates::new(updates);
            inner.pending_remote.fetch_add(1, Ordering::AcqRel);
            if to_receiver.send(record).await.is_err() {
                inner.pending_remote.fetch_sub(1, Ordering::AcqRel);
                inner.coordinator.close_read(ticket);
                let _ = port.send(Command::Aborted).await;
                return
            }
            if port.send(Command::Prepared).await.is_err() {
                // the initiator is gone; the record must still be resolved
                inner.coordinator.close_read(ticket);
                confirm.resolve(false).await;
                return
            }
            confirm
        }
        Some(Command::DoAbort) => {
            let _ = inner.coordinator.confirm_read(&ticket);
            inner.coordinator.close_read(ticket);
            let _ = port.send(Command::Done).await;
            return
        }
        _ => {
            inner.coordinator.close_read(ticket);
            return
        }
    };

    // Prepared: the decision token settles it. Cancellation alone must not
    // drop a prepared transaction, so only the port decides from here.
    let decision = match port.recv().await {
        Some(Command::DoCommit) => true,
        Some(Command::DoAbort) => false,
        _ => {
            inner.coordinator.close_read(ticket);
            confirm.resolve(false).await;
            return
        }
    };

    inner.coordinator.close_read(ticket);
    let _ = port.send(Command::Done).await;
    let appended = confirm.resolve(decision).await;
    debug!(decision, appended, "remote transaction finished");
}

/// Culls and evaluates the qualifying external actions under a snapshot
/// addressable as `ext`, collecting one update per action that fires.
fn evaluate<E: Evaluator>(
    inner: &Inner<E>,
    actions: &[ExternalAction]
) -> Result<Vec<Update>, EvalError> {
    let snapshot = inner.memory.read().snapshot();
    let ctx = inner.evaluator.build_context(&snapshot, "ext")?;
    let mut updates = Vec::new();
    for action in actions {
        if !action.is_evaluable(&inner.types) {
            continue
        }
        let culled = action.cull_actions(&inner.types);
        if culled.is_empty() {
            continue
        }
        if let Some(update) = cond_eval_actions(&inner.evaluator, &action.condition, &culled, &ctx)?
        {
            updates.push(update);
        }
    }
    Ok(updates)
}

/// Convenience for tests and transports that need to feed one transaction
/// by hand: builds the pair of ports and the transaction handle.
pub fn transaction_pair(payload: Vec<u8>, capacity: usize) -> (RemoteTransaction, CommandPort) {
    let (server_port, driver_port) = CommandPort::pair(capacity);
    (RemoteTransaction::new(payload, server_port), driver_port)
}
