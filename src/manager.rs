// src/manager.rs

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::downloader::Session;
use crate::error::DownloadResult;
use crate::events::DownloadEvent;
use crate::models::{ByteRange, DownloadOptions};
use crate::progress::ProgressTracker;
use crate::store::ChunkStore;
use crate::transport::Transport;
use crate::worker::{DownloadWorker, WorkerMessage};

/// Lifecycle of a single chunk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Pending,
    Active,
    RetryWait,
    Complete,
    Failed,
}

impl ChunkState {
    /// Whether a worker currently owns the chunk.
    fn in_flight(self) -> bool {
        matches!(self, ChunkState::Active | ChunkState::RetryWait)
    }
}

/// Runs the chunk jobs of one session on a bounded pool of workers.
///
/// All bookkeeping happens on the task that calls [`ChunkManager::run`];
/// workers only report back through the message channel.
pub(crate) struct ChunkManager<T> {
    transport: Arc<T>,
    address: Arc<str>,
    options: Arc<DownloadOptions>,
    store: ChunkStore,
    /// One entry per chunk; `None` for an unranged whole-file fetch.
    ranges: Vec<Option<ByteRange>>,
    max_connections: usize,
    pending: VecDeque<usize>,
    states: Vec<ChunkState>,
    active_workers: usize,
    completed: usize,
    workers: JoinSet<()>,
    tx: UnboundedSender<WorkerMessage>,
    rx: UnboundedReceiver<WorkerMessage>,
    cancel: CancellationToken,
}

impl<T: Transport> ChunkManager<T> {
    /// `pending` lists the chunks to fetch; every other chunk is taken as
    /// already complete on disk.
    pub fn new(
        transport: Arc<T>,
        address: impl Into<Arc<str>>,
        options: Arc<DownloadOptions>,
        store: ChunkStore,
        ranges: Vec<Option<ByteRange>>,
        pending: VecDeque<usize>,
        cancel: CancellationToken,
    ) -> Self {
        let mut states = vec![ChunkState::Complete; ranges.len()];
        for &chunk in &pending {
            states[chunk] = ChunkState::Pending;
        }
        let completed = ranges.len() - pending.len();
        let (tx, rx) = unbounded_channel();

        Self {
            transport,
            address: address.into(),
            max_connections: options.connections.max(1),
            options,
            store,
            ranges,
            pending,
            states,
            active_workers: 0,
            completed,
            workers: JoinSet::new(),
            tx,
            rx,
            cancel,
        }
    }

    /// Drives every pending chunk to completion.
    ///
    /// Returns `Ok(true)` once all chunks are on disk, `Ok(false)` if the
    /// session was cancelled first, and the chunk error if any chunk runs out
    /// of attempts. Outstanding workers are aborted when this returns.
    pub async fn run(mut self, tracker: &mut ProgressTracker, session: &Session) -> DownloadResult<bool> {
        self.dispatch();

        while self.completed < self.states.len() {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(false),
                message = self.rx.recv() => message,
            };
            // The manager holds a sender, so the channel never closes.
            let Some(message) = message else {
                return Ok(false);
            };

            let chunk = message.chunk();
            if !self.states[chunk].in_flight() {
                debug!(chunk, state = ?self.states[chunk], "dropping message for idle chunk");
                continue;
            }

            match message {
                WorkerMessage::Data { chunk, len } => {
                    self.states[chunk] = ChunkState::Active;
                    tracker.record(chunk, len);
                    if let Some(report) = tracker.update(chunk, false, Instant::now()) {
                        session.publish_progress(report);
                    }
                }
                WorkerMessage::Length { chunk, len } => {
                    tracker.learn_chunk_size(chunk, len);
                    tracker.learn_total_size(len);
                }
                WorkerMessage::Retry(info) => {
                    self.states[info.chunk_id] = ChunkState::RetryWait;
                    tracker.rollback(info.chunk_id);
                    session.emit(DownloadEvent::Retry(info));
                }
                WorkerMessage::Completed { chunk } => {
                    self.states[chunk] = ChunkState::Complete;
                    if let Some(report) = tracker.finish_chunk(chunk, Instant::now()) {
                        session.publish_progress(report);
                    }
                    self.active_workers -= 1;
                    self.completed += 1;
                    debug!(chunk, completed = self.completed, total = self.states.len(), "chunk settled");
                    self.dispatch();
                }
                WorkerMessage::Failed { chunk, error } => {
                    self.states[chunk] = ChunkState::Failed;
                    error!(chunk, %error, "chunk failed permanently");
                    return Err(error);
                }
            }
        }
        Ok(true)
    }

    /// Starts workers until the pool is full or nothing is left to start.
    fn dispatch(&mut self) {
        while !self.cancel.is_cancelled() && self.active_workers < self.max_connections {
            let Some(chunk) = self.pending.pop_front() else {
                break;
            };
            self.spawn_worker(chunk);
        }
    }

    fn spawn_worker(&mut self, chunk: usize) {
        let worker = DownloadWorker {
            chunk,
            range: self.ranges[chunk],
            address: self.address.clone(),
            transport: self.transport.clone(),
            headers: self.options.headers.clone(),
            store: self.store.clone(),
            options: self.options.clone(),
            tx: self.tx.clone(),
            cancel: self.cancel.child_token(),
        };
        debug!(chunk, range = ?self.ranges[chunk], "dispatching chunk");
        self.states[chunk] = ChunkState::Active;
        self.active_workers += 1;
        self.workers.spawn(worker.run());
    }

    #[cfg(test)]
    fn states(&self) -> &[ChunkState] {
        &self.states
    }
}
