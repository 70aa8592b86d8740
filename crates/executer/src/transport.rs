use axon_types::Command;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// One direction-agnostic end of a transaction's command dialogue.
///
/// Both halves of a [`CommandPort::pair`] can send and receive; the
/// executer holds one half, the transport's per-transaction driver the
/// other.
#[derive(Debug)]
pub struct CommandPort {
    tx: mpsc::Sender<Command>,
    rx: mpsc::Receiver<Command>
}

impl CommandPort {
    /// Creates two connected ports.
    pub fn pair(capacity: usize) -> (CommandPort, CommandPort) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (CommandPort { tx: a_tx, rx: b_rx }, CommandPort { tx: b_tx, rx: a_rx })
    }

    pub async fn send(&self, command: Command) -> Result<(), TransportError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| TransportError::Other("command port closed".to_owned()))
    }

    /// `None` once the other side is gone.
    pub async fn recv(&mut self) -> Option<Command> {
        self.rx.recv().await
    }
}

/// One inbound remote transaction: the payload delivered by the transport
/// plus the command port the 3-phase handshake runs over.
#[derive(Debug)]
pub struct RemoteTransaction {
    payload: Vec<u8>,
    port:    CommandPort
}

impl RemoteTransaction {
    pub fn new(payload: Vec<u8>, port: CommandPort) -> Self {
        Self { payload, port }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn into_parts(self) -> (Vec<u8>, CommandPort) {
        (self.payload, self.port)
    }
}

/// The gossip fabric the executer publishes through and receives from.
///
/// Implementations own peer discovery and the initiator side of the
/// handshake; the executer only consumes [`RemoteTransaction`]s and
/// broadcasts opaque payloads. Discovery notifications, if any, go through
/// a callback handed to the agent at construction, not through a
/// back-reference to the executer.
pub trait TransportAgent: Send + 'static {
    /// Brings the agent up and yields the inbound transaction stream for
    /// this run. Erroring with anything but [`TransportError::NotRunning`]
    /// is implementation-defined.
    fn start(&mut self) -> Result<mpsc::Receiver<RemoteTransaction>, TransportError>;

    fn stop(&mut self) -> Result<(), TransportError>;

    fn is_running(&self) -> bool;

    /// Best-effort broadcast to all peers. Loss is tolerated by the core.
    fn for_all(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}
