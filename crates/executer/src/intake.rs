use std::{collections::HashSet, pin::Pin, sync::Arc};

use axon_memory::IoStreams;
use futures::StreamExt;
use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{error::FatalError, evaluator::Evaluator, Inner};

/// Debounces and batches environment inputs before they enter the pool.
///
/// Inputs are buffered until the batch bound is reached, the flush timer
/// fires, or a second input for an already-buffered resource arrives (which
/// flushes the old batch first, keeping one write per resource per batch).
pub(crate) struct InputIntake<E: Evaluator> {
    inner:       Arc<Inner<E>>,
    io:          Arc<tokio::sync::Mutex<IoStreams>>,
    buffer_size: usize,
    cancel:      CancellationToken
}

impl<E: Evaluator> InputIntake<E> {
    pub(crate) fn new(
        inner: Arc<Inner<E>>,
        io: Arc<tokio::sync::Mutex<IoStreams>>,
        inputs_count: usize,
        cancel: CancellationToken
    ) -> Self {
        let buffer_size = (inputs_count as f64 * inner.config.input_rate).round_ties_even() as usize;
        Self { inner, io, buffer_size, cancel }
    }

    pub(crate) async fn run(self) {
        let mut io = self.io.lock().await;
        // split the guard so the two streams can be polled independently
        let io = &mut *io;
        let mut buffer: Vec<String> = Vec::new();
        let mut in_buffer: HashSet<String> = HashSet::new();
        let mut deadline: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    if !buffer.is_empty() {
                        let _ = self.flush(&mut buffer, &mut in_buffer, &mut deadline);
                    }
                    return
                }
                Some(err) = io.errors.next() => {
                    error!(act = "io", %err, "I/O error");
                }
                Some(input) = io.inputs.next() => {
                    let resource = input
                        .split('=')
                        .next()
                        .unwrap_or_default()
                        .trim()
                        .to_owned();
                    if in_buffer.contains(&resource)
                        && self.flush(&mut buffer, &mut in_buffer, &mut deadline).is_err()
                    {
                        return
                    }
                    buffer.push(input);
                    in_buffer.insert(resource);
                    if buffer.len() == 1 {
                        deadline = Some(Box::pin(sleep(self.inner.config.input_flush)));
                    }
                    if buffer.len() >= self.buffer_size
                        && self.flush(&mut buffer, &mut in_buffer, &mut deadline).is_err()
                    {
                        return
                    }
                }
                _ = async { deadline.as_mut().expect("armed").await }, if deadline.is_some() => {
                    if self.flush(&mut buffer, &mut in_buffer, &mut deadline).is_err() {
                        return
                    }
                }
            }
        }
    }

    /// Submits the buffered batch as one input. A parse failure here is the
    /// environment breaking its contract: recorded as fatal, ends intake.
    fn flush(
        &self,
        buffer: &mut Vec<String>,
        in_buffer: &mut HashSet<String>,
        deadline: &mut Option<Pin<Box<Sleep>>>
    ) -> Result<(), ()> {
        let text = buffer.join("; ");
        buffer.clear();
        in_buffer.clear();
        *deadline = None;
        if let Err(err) = self.inner.submit_input(&text) {
            error!(act = "io_parse", obj = %text, %err, "error in parsing I/O input actions");
            self.inner
                .record_fatal(FatalError::InputParse { input: text, source: err });
            return Err(())
        }
        Ok(())
    }
}
