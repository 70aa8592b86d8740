//! The execution core of an axon node.
//!
//! An [`Executer`] owns the typed memory, the pool of pending updates and
//! the rule set, and bridges local rule evaluation with the remote 3-phase
//! commit protocol running over a gossip transport:
//!
//! - environment inputs are debounced, batched and parsed into pool updates;
//! - [`Executer::exec`] applies the pool head to memory and fires the rules
//!   whose events it touched, appending local updates and broadcasting
//!   external ones;
//! - each inbound remote transaction gets its own server task speaking
//!   `interested`/`can_commit?`/`prepared`/`do_commit`/`done` with the
//!   transport, validated against optimistic read tickets;
//! - a single update-receiver task owns the pool's remote append path and
//!   preserves enqueue order for committed transactions.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc
};

use axon_memory::{IoStreams, Memory, Snapshot};
use axon_types::{Rule, Update};
use parking_lot::{Mutex, RwLock};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::warn;

mod config;
mod coordinator;
mod error;
mod evaluator;
mod intake;
mod pool;
mod receiver;
mod transaction;
mod transport;

pub use config::ExecuterConfig;
pub use coordinator::{Coordinator, ReadTicket};
pub use error::{
    DecodeError, EvalError, ExecError, FatalError, InitError, ParseError, TransportError
};
pub use evaluator::Evaluator;
pub use pool::Pool;
pub use transaction::transaction_pair;
pub use transport::{CommandPort, RemoteTransaction, TransportAgent};

use crate::{evaluator::cond_eval_actions, intake::InputIntake, receiver::UpdateReceiver};

/// State shared between the caller surface and the background tasks.
pub(crate) struct Inner<E: Evaluator> {
    pub(crate) memory:         RwLock<Memory>,
    pub(crate) types:          axon_types::TypeMap,
    pub(crate) rules:          Vec<Rule>,
    pub(crate) evaluator:      E,
    pub(crate) pool:           Arc<Pool>,
    pub(crate) coordinator:    Arc<Coordinator>,
    pub(crate) pending_remote: Arc<AtomicUsize>,
    pub(crate) config:         ExecuterConfig,
    fatal:                     RwLock<Option<FatalError>>
}

impl<E: Evaluator> Inner<E> {
    /// Parses caller/environment input text into one pool update.
    pub(crate) fn submit_input(&self, text: &str) -> Result<(), ParseError> {
        let assignments = self.evaluator.parse_input(text, &self.types)?;
        if let Some(update) = Update::new(assignments) {
            self.pool.append(update);
        }
        Ok(())
    }

    /// Records the first fatal error; later ones only get logged.
    pub(crate) fn record_fatal(&self, fatal: FatalError) {
        tracing::error!(%fatal, "fatal executer error");
        let mut slot = self.fatal.write();
        if slot.is_none() {
            *slot = Some(fatal);
        }
    }
}

struct RunState {
    cancel:   CancellationToken,
    tracker:  TaskTracker,
    receiver: JoinHandle<()>,
    intake:   JoinHandle<()>
}

/// The caller-visible driver of one node.
pub struct Executer<E: Evaluator, A: TransportAgent> {
    inner:        Arc<Inner<E>>,
    agent:        Arc<Mutex<A>>,
    io:           Arc<tokio::sync::Mutex<IoStreams>>,
    inputs_count: usize,
    run:          Mutex<Option<RunState>>
}

impl<E: Evaluator, A: TransportAgent> Executer<E, A> {
    /// Wires up an executer over `memory` and `rules`. The rule set is
    /// validated against the declared resources; transport and evaluator
    /// are taken as-is.
    pub fn new(
        mut memory: Memory,
        rules: Vec<Rule>,
        agent: A,
        evaluator: E,
        config: ExecuterConfig
    ) -> Result<Self, InitError> {
        validate_rules(&rules, &memory)?;
        let inputs_count = memory.inputs_count();
        let io = memory.take_io();
        let types = memory.types().clone();
        Ok(Self {
            inner: Arc::new(Inner {
                memory: RwLock::new(memory),
                types,
                rules,
                evaluator,
                pool: Arc::new(Pool::default()),
                coordinator: Arc::new(Coordinator::default()),
                pending_remote: Arc::new(AtomicUsize::new(0)),
                config,
                fatal: RwLock::new(None)
            }),
            agent: Arc::new(Mutex::new(agent)),
            io: Arc::new(tokio::sync::Mutex::new(io)),
            inputs_count,
            run: Mutex::new(None)
        })
    }

    /// Starts the transport agent and the background tasks. Must run inside
    /// a tokio runtime.
    pub fn start(&self) -> Result<(), ExecError> {
        let mut run = self.run.lock();
        if run.is_some() {
            return Err(ExecError::AlreadyRunning)
        }
        let inbound = self.agent.lock().start()?;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (to_receiver, from_servers) = mpsc::channel(self.inner.config.receiver_capacity);

        let receiver = tokio::spawn(
            UpdateReceiver::new(
                self.inner.pool.clone(),
                self.inner.coordinator.clone(),
                self.inner.pending_remote.clone(),
                from_servers
            )
            .run()
        );
        let intake = tokio::spawn(
            InputIntake::new(self.inner.clone(), self.io.clone(), self.inputs_count, cancel.clone())
                .run()
        );
        tracker.spawn(transaction::accept(
            self.inner.clone(),
            inbound,
            to_receiver,
            cancel.clone(),
            tracker.clone()
        ));

        *run = Some(RunState { cancel, tracker, receiver, intake });
        Ok(())
    }

    /// Cancels inbound traffic, waits for every in-flight transaction
    /// server to reach its final state, drains the update receiver and
    /// stops the transport agent. A stopped executer can be started again.
    pub async fn stop(&self) -> Result<(), ExecError> {
        let state = self.run.lock().take().ok_or(ExecError::NotRunning)?;
        state.cancel.cancel();
        state.tracker.close();
        state.tracker.wait().await;
        let _ = state.receiver.await;
        let _ = state.intake.await;
        self.agent.lock().stop()?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.run.lock().is_some()
    }

    /// Takes the pool head, applies it to memory and fires the rules whose
    /// events it assigned. Local firings go back into the pool; external
    /// ones are published to all peers. A no-op on an empty pool.
    pub fn exec(&self) -> Result<(), ExecError> {
        if !self.is_running() {
            return Err(ExecError::NotRunning)
        }
        let Some(update) = self.inner.pool.take_head() else { return Ok(()) };

        {
            let mut memory = self.inner.memory.write();
            if let Err(err) = memory.apply(&update) {
                let fatal = FatalError::LocalApply(err);
                self.inner.record_fatal(fatal.clone());
                return Err(fatal.into())
            }
            // tickets must see the apply before the write lock drops
            self.inner.coordinator.notify_applied(&update);
        }

        let snapshot = self.inner.memory.read().snapshot();
        let mut local_updates = Vec::new();
        let mut payloads = Vec::new();
        {
            let assigned = update.assigned();
            let ctx = self
                .inner
                .evaluator
                .build_context(&snapshot, "this")
                .map_err(|err| self.fatal(FatalError::LocalContext(err)))?;

            for rule in &self.inner.rules {
                if !rule.fires_on(assigned.iter().copied()) {
                    continue
                }
                if !rule.default_actions.is_empty() {
                    let mut assignments = Vec::with_capacity(rule.default_actions.len());
                    for action in &rule.default_actions {
                        let assignment = self
                            .inner
                            .evaluator
                            .eval_action(action, &ctx)
                            .map_err(|err| self.fatal_eval(&rule.name, err))?;
                        assignments.push(assignment);
                    }
                    local_updates.extend(Update::new(assignments));
                }
                if rule.task.external {
                    let specialized = self
                        .inner
                        .evaluator
                        .specialize(&rule.task, &snapshot)
                        .map_err(|err| self.fatal_eval(&rule.name, err))?;
                    if !specialized.is_empty() {
                        let payload = self
                            .inner
                            .evaluator
                            .marshal(&specialized)
                            .map_err(|err| self.fatal_eval(&rule.name, err))?;
                        payloads.push(payload);
                    }
                } else {
                    let actions: Vec<_> = rule.task.actions.iter().collect();
                    let fired = cond_eval_actions(
                        &self.inner.evaluator,
                        &rule.task.condition,
                        &actions,
                        &ctx
                    )
                    .map_err(|err| self.fatal_eval(&rule.name, err))?;
                    local_updates.extend(fired);
                }
            }
        }

        self.inner.pool.append_all(local_updates);
        for payload in payloads {
            if let Err(err) = self.agent.lock().for_all(payload) {
                // best-effort broadcast: peers that miss it will catch up
                // on a later firing
                warn!(act = "for_all", %err, "could not publish external actions");
            }
        }
        Ok(())
    }

    /// Parses an assignment list and appends it to the pool as one update.
    pub fn input(&self, text: &str) -> Result<(), ExecError> {
        if !self.is_running() {
            return Err(ExecError::NotRunning)
        }
        self.inner.submit_input(text)?;
        Ok(())
    }

    /// Runs `f` iff nothing is pending: the pool is empty and no remote
    /// transaction is prepared but undecided. Atomic with respect to both.
    pub fn do_if_stable(&self, f: impl FnOnce()) -> bool {
        let pool = self.inner.pool.locked();
        if pool.is_empty() && self.inner.pending_remote.load(Ordering::Acquire) == 0 {
            f();
            true
        } else {
            false
        }
    }

    /// A stable snapshot of memory plus the current pool length.
    pub fn take_state(&self) -> (Snapshot, usize) {
        (self.inner.memory.read().snapshot(), self.inner.pool.len())
    }

    /// The first fatal error recorded by this executer, if any.
    pub fn fatal_error(&self) -> Option<FatalError> {
        self.inner.fatal.read().clone()
    }

    fn fatal(&self, fatal: FatalError) -> ExecError {
        self.inner.record_fatal(fatal.clone());
        fatal.into()
    }

    fn fatal_eval(&self, rule: &str, err: EvalError) -> ExecError {
        self.fatal(FatalError::LocalEval { rule: rule.to_owned(), source: err })
    }
}

fn validate_rules(rules: &[Rule], memory: &Memory) -> Result<(), InitError> {
    let types = memory.types();
    for rule in rules {
        for event in &rule.events {
            if !types.contains_key(event) {
                return Err(InitError::UnknownEvent {
                    rule:     rule.name.clone(),
                    resource: event.clone()
                })
            }
        }
        let local_targets = rule.default_actions.iter().chain(
            (!rule.task.external)
                .then_some(rule.task.actions.iter())
                .into_iter()
                .flatten()
        );
        for action in local_targets {
            if !types.contains_key(&action.resource) {
                return Err(InitError::UnknownActionTarget {
                    rule:     rule.name.clone(),
                    resource: action.resource.clone()
                })
            }
        }
    }
    Ok(())
}
