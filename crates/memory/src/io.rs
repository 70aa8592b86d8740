use futures::stream::{select_all, SelectAll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::IoError;

/// The receiving half of one environment source: raw input strings plus the
/// source's error stream.
#[derive(Debug)]
pub struct IoSource {
    pub inputs: mpsc::UnboundedReceiver<String>,
    pub errors: mpsc::UnboundedReceiver<IoError>
}

/// The sending half handed to whatever drives the source.
#[derive(Debug, Clone)]
pub struct IoHandle {
    inputs: mpsc::UnboundedSender<String>,
    errors: mpsc::UnboundedSender<IoError>
}

impl IoSource {
    /// Creates a connected handle/source pair.
    pub fn channel() -> (IoHandle, IoSource) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        (
            IoHandle { inputs: input_tx, errors: error_tx },
            IoSource { inputs: input_rx, errors: error_rx }
        )
    }
}

impl IoHandle {
    /// Feeds one raw input string, e.g. `"lorem = 10"`. Returns false once
    /// the consuming side is gone.
    pub fn input(&self, text: impl Into<String>) -> bool {
        self.inputs.send(text.into()).is_ok()
    }

    pub fn error(&self, error: IoError) -> bool {
        self.errors.send(error).is_ok()
    }
}

/// All attached sources merged into one input stream and one error stream,
/// consumed by the executer's intake task.
pub struct IoStreams {
    pub inputs: SelectAll<UnboundedReceiverStream<String>>,
    pub errors: SelectAll<UnboundedReceiverStream<IoError>>
}

pub(crate) fn merge(sources: Vec<IoSource>) -> IoStreams {
    let mut inputs = Vec::with_capacity(sources.len());
    let mut errors = Vec::with_capacity(sources.len());
    for source in sources {
        inputs.push(UnboundedReceiverStream::new(source.inputs));
        errors.push(UnboundedReceiverStream::new(source.errors));
    }
    IoStreams { inputs: select_all(inputs), errors: select_all(errors) }
}
