use std::{sync::Arc, time::Duration};

use axon_memory::Memory;
use axon_types::{Command, Rule};
use executer::{
    transaction_pair, CommandPort, Executer, ExecuterConfig, RemoteTransaction, TransportAgent,
    TransportError
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::mocks::SimpleEvaluator;

pub type HubExecuter = Executer<SimpleEvaluator, HubAgent>;

type PeerFound = Arc<dyn Fn(usize) + Send + Sync>;

struct PeerSlot {
    inbound:  Option<mpsc::Sender<RemoteTransaction>>,
    on_found: Option<PeerFound>
}

/// An in-memory stand-in for the gossip fabric: every running agent's
/// broadcast is delivered to every other running agent, each delivery
/// driving the initiator side of the 3-phase handshake.
#[derive(Clone, Default)]
pub struct LocalHub {
    peers: Arc<Mutex<Vec<PeerSlot>>>
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new peer and hands back its agent.
    pub fn agent(&self) -> HubAgent {
        self.agent_with_callback(None)
    }

    /// Same, with a discovery callback invoked (with the newcomer's hub id)
    /// whenever another peer comes up.
    pub fn agent_with_callback(&self, on_found: Option<PeerFound>) -> HubAgent {
        let mut peers = self.peers.lock();
        peers.push(PeerSlot { inbound: None, on_found });
        HubAgent { hub: self.clone(), id: peers.len() - 1 }
    }

    fn broadcast(&self, from: usize, payload: Vec<u8>) {
        let targets: Vec<_> = {
            let peers = self.peers.lock();
            peers
                .iter()
                .enumerate()
                .filter(|(id, _)| *id != from)
                .filter_map(|(_, slot)| slot.inbound.clone())
                .collect()
        };
        debug!(from, targets = targets.len(), "hub broadcast");
        for inbound in targets {
            tokio::spawn(drive(inbound, payload.clone()));
        }
    }
}

/// Runs the initiator side of the handshake against one receiving node:
/// deliver the payload, then `interested` => `can_commit?`,
/// `prepared` => `do_commit`, and wait for `done`. Any other reply ends
/// the transaction.
async fn drive(inbound: mpsc::Sender<RemoteTransaction>, payload: Vec<u8>) {
    let (transaction, mut port) = transaction_pair(payload, 8);
    if inbound.send(transaction).await.is_err() {
        return
    }
    if port.recv().await != Some(Command::Interested) {
        return
    }
    if port.send(Command::CanCommit).await.is_err() {
        return
    }
    if port.recv().await != Some(Command::Prepared) {
        return
    }
    if port.send(Command::DoCommit).await.is_err() {
        return
    }
    let _ = port.recv().await;
}

/// One peer's handle onto the [`LocalHub`].
pub struct HubAgent {
    hub: LocalHub,
    id:  usize
}

impl TransportAgent for HubAgent {
    fn start(&mut self) -> Result<mpsc::Receiver<RemoteTransaction>, TransportError> {
        let (tx, rx) = mpsc::channel(16);
        let callbacks: Vec<PeerFound> = {
            let mut peers = self.hub.peers.lock();
            if peers[self.id].inbound.is_some() {
                return Err(TransportError::Other("agent is already running".to_owned()))
            }
            peers[self.id].inbound = Some(tx);
            peers
                .iter()
                .enumerate()
                .filter(|(id, slot)| *id != self.id && slot.inbound.is_some())
                .filter_map(|(_, slot)| slot.on_found.clone())
                .collect()
        };
        // discovery: running peers learn about the newcomer
        for on_found in callbacks {
            on_found(self.id);
        }
        Ok(rx)
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        match self.hub.peers.lock()[self.id].inbound.take() {
            Some(_) => Ok(()),
            None => Err(TransportError::NotRunning)
        }
    }

    fn is_running(&self) -> bool {
        self.hub.peers.lock()[self.id].inbound.is_some()
    }

    fn for_all(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotRunning)
        }
        self.hub.broadcast(self.id, payload);
        Ok(())
    }
}

/// An agent whose inbound side is fed by the test itself, for scenarios
/// that need to steer the handshake by hand. Broadcasts are recorded.
pub struct ManualAgent {
    state: Arc<Mutex<ManualState>>
}

#[derive(Default)]
struct ManualState {
    inbound:    Option<mpsc::Sender<RemoteTransaction>>,
    broadcasts: Vec<Vec<u8>>
}

/// The test side of a [`ManualAgent`].
#[derive(Clone)]
pub struct ManualHandle {
    state: Arc<Mutex<ManualState>>
}

impl ManualAgent {
    pub fn new() -> (Self, ManualHandle) {
        let state = Arc::new(Mutex::new(ManualState::default()));
        (Self { state: state.clone() }, ManualHandle { state })
    }
}

impl TransportAgent for ManualAgent {
    fn start(&mut self) -> Result<mpsc::Receiver<RemoteTransaction>, TransportError> {
        let mut state = self.state.lock();
        if state.inbound.is_some() {
            return Err(TransportError::Other("agent is already running".to_owned()))
        }
        let (tx, rx) = mpsc::channel(16);
        state.inbound = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        match self.state.lock().inbound.take() {
            Some(_) => Ok(()),
            None => Err(TransportError::NotRunning)
        }
    }

    fn is_running(&self) -> bool {
        self.state.lock().inbound.is_some()
    }

    fn for_all(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.inbound.is_none() {
            return Err(TransportError::NotRunning)
        }
        state.broadcasts.push(payload);
        Ok(())
    }
}

impl ManualHandle {
    /// Delivers a payload as one inbound transaction and returns the
    /// driver-side command port for the test to steer.
    pub async fn submit(&self, payload: Vec<u8>) -> Option<CommandPort> {
        let inbound = self.state.lock().inbound.clone()?;
        let (transaction, port) = transaction_pair(payload, 8);
        inbound.send(transaction).await.ok()?;
        Some(port)
    }

    /// Everything the executer broadcast so far.
    pub fn broadcasts(&self) -> Vec<Vec<u8>> {
        self.state.lock().broadcasts.clone()
    }
}

/// A little fleet of executers over one [`LocalHub`], driven to quiescence
/// by repeated `exec` rounds.
#[derive(Default)]
pub struct LocalNet {
    hub:       LocalHub,
    pub nodes: Vec<Arc<HubExecuter>>
}

impl LocalNet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, memory: Memory, rules: Vec<Rule>) -> eyre::Result<Arc<HubExecuter>> {
        let node = Executer::new(
            memory,
            rules,
            self.hub.agent(),
            SimpleEvaluator,
            ExecuterConfig::default()
        )?;
        let node = Arc::new(node);
        self.nodes.push(node.clone());
        Ok(node)
    }

    pub fn start_all(&self) -> eyre::Result<()> {
        for node in &self.nodes {
            node.start()?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> eyre::Result<()> {
        for node in &self.nodes {
            node.stop().await?;
        }
        Ok(())
    }

    /// Drives every node until the whole fleet reports stable twice in a
    /// row (the second check catches gossip still in flight after the
    /// first). Returns false when `attempts` rounds were not enough.
    pub async fn settle(&self, attempts: usize) -> bool {
        for _ in 0..attempts {
            for node in &self.nodes {
                node.exec().expect("exec failed while settling");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.all_stable() {
                tokio::time::sleep(Duration::from_millis(25)).await;
                for node in &self.nodes {
                    node.exec().expect("exec failed while settling");
                }
                if self.all_stable() {
                    return true
                }
            }
        }
        false
    }

    fn all_stable(&self) -> bool {
        self.nodes.iter().all(|node| node.do_if_stable(|| {}))
    }
}
