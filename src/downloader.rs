// src/downloader.rs

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::builder::build_file;
use crate::destination::{resolve_destination, validate};
use crate::error::{DownloadError, DownloadResult};
use crate::events::{DownloadEvent, EventHub, EventKind};
use crate::manager::ChunkManager;
use crate::models::{DownloadOptions, Metadata};
use crate::planner::plan_ranges;
use crate::progress::{ProgressReport, ProgressTracker};
use crate::resolver::{follow_redirect, resolve_direct};
use crate::resume::{scan_chunks, ResumeScan};
use crate::store::ChunkStore;
use crate::transport::{ReqwestTransport, Transport};

/// How a session ended.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Completed,
    /// The destination already existed and was left alone.
    Ignored,
    Cancelled,
    Failed(DownloadError),
}

/// Snapshot of a session, observable from outside the driver task.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionState {
    saved_file_path: PathBuf,
    final_address: String,
    metadata: Option<Metadata>,
    progress: Option<ProgressReport>,
    outcome: Option<Outcome>,
}

/// Event fan-out, shared state and teardown of one session.
pub(crate) struct Session {
    events: EventHub,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionState::default())
    }
}

impl Session {
    fn new(state: SessionState) -> Self {
        Self {
            events: EventHub::default(),
            state: watch::channel(state).0,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self, kinds: Option<&[EventKind]>) -> UnboundedReceiver<DownloadEvent> {
        self.events.subscribe(kinds)
    }

    /// Publishes `event` unless the session is already closed.
    pub fn emit(&self, event: DownloadEvent) {
        if !self.closed.load(Ordering::SeqCst) {
            self.events.emit(event);
        }
    }

    pub fn publish_progress(&self, report: ProgressReport) {
        let listening = self.events.has_listeners(EventKind::Progress);
        self.state.send_modify(|state| state.progress = Some(report.clone()));
        if listening {
            self.emit(DownloadEvent::Progress(report));
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Records the outcome, stops all work and emits `Close`. Only the first
    /// call has any effect.
    fn finish(&self, outcome: Outcome) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.events.emit(DownloadEvent::Close);
        self.state.send_modify(|state| state.outcome = Some(outcome));
    }

    fn fail(&self, error: DownloadError) {
        if self.is_closed() {
            return;
        }
        error!(%error, "download failed");
        self.events.emit(DownloadEvent::Error(error.clone()));
        self.finish(Outcome::Failed(error));
    }
}

struct Inner<T> {
    url: String,
    dest: PathBuf,
    options: Arc<DownloadOptions>,
    transport: Arc<T>,
    session: Session,
    started: AtomicBool,
}

/// A resumable download of one URL into one file.
///
/// Nothing happens until [`start`](Self::start), [`metadata`](Self::metadata)
/// or [`wait`](Self::wait) is called; any of them starts the session once.
/// Clones share the same session.
pub struct Downloader<T: Transport = ReqwestTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Downloader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Downloader<ReqwestTransport> {
    /// Creates a session backed by a default reqwest client.
    pub fn new(
        url: impl Into<String>,
        dest: impl Into<PathBuf>,
        options: DownloadOptions,
    ) -> DownloadResult<Self> {
        Ok(Self::with_transport(url, dest, options, ReqwestTransport::new()?))
    }
}

impl<T: Transport> Downloader<T> {
    pub fn with_transport(
        url: impl Into<String>,
        dest: impl Into<PathBuf>,
        options: DownloadOptions,
        transport: T,
    ) -> Self {
        let url = url.into();
        let dest = dest.into();
        let state = SessionState {
            saved_file_path: std::path::absolute(&dest).unwrap_or_else(|_| dest.clone()),
            final_address: url.clone(),
            ..Default::default()
        };
        Self {
            inner: Arc::new(Inner {
                url,
                dest,
                options: Arc::new(options),
                transport: Arc::new(transport),
                session: Session::new(state),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Starts the session in the background. Later calls do nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> &Self {
        if self.inner.started.swap(true, Ordering::SeqCst) || self.inner.session.is_closed() {
            return self;
        }
        debug!(url = %self.inner.url, dest = %self.inner.dest.display(), "starting download");
        tokio::spawn(drive(self.inner.clone()));
        self
    }

    /// Starts the session if needed and waits for its metadata.
    ///
    /// `Ok(None)` means the session closed without producing any, because it
    /// was destroyed or the destination was ignored.
    pub async fn metadata(&self) -> DownloadResult<Option<Metadata>> {
        self.start();
        let mut rx = self.inner.session.state.subscribe();
        let Ok(state) = rx
            .wait_for(|s| s.metadata.is_some() || s.outcome.is_some())
            .await
        else {
            return Ok(None);
        };
        if let Some(metadata) = &state.metadata {
            return Ok(Some(metadata.clone()));
        }
        match &state.outcome {
            Some(Outcome::Failed(error)) => Err(error.clone()),
            _ => Ok(None),
        }
    }

    /// Starts the session if needed and waits for it to close.
    ///
    /// Returns `true` when the file is in place, `false` when the session was
    /// destroyed first, and the fatal error otherwise.
    pub async fn wait(&self) -> DownloadResult<bool> {
        self.start();
        let mut rx = self.inner.session.state.subscribe();
        let Ok(state) = rx.wait_for(|s| s.outcome.is_some()).await else {
            return Ok(false);
        };
        match &state.outcome {
            Some(Outcome::Completed | Outcome::Ignored) => Ok(true),
            Some(Outcome::Failed(error)) => Err(error.clone()),
            Some(Outcome::Cancelled) | None => Ok(false),
        }
    }

    /// Stops the session. Chunk files already on disk are kept for a later
    /// resume. Calling it again does nothing.
    pub fn destroy(&self) {
        if !self.inner.session.is_closed() {
            info!(url = %self.inner.url, "download destroyed");
        }
        self.inner.session.finish(Outcome::Cancelled);
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.session.is_closed()
    }

    /// Receives every event from now on. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> UnboundedReceiver<DownloadEvent> {
        self.inner.session.subscribe(None)
    }

    /// Receives only events of the given kinds.
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> UnboundedReceiver<DownloadEvent> {
        self.inner.session.subscribe(Some(kinds))
    }

    /// Where the file is (or will be) saved, once the destination is resolved.
    pub fn saved_file_path(&self) -> PathBuf {
        self.inner.session.state.borrow().saved_file_path.clone()
    }

    /// The address data is fetched from, after redirects.
    pub fn final_address(&self) -> String {
        self.inner.session.state.borrow().final_address.clone()
    }

    pub fn latest_progress(&self) -> Option<ProgressReport> {
        self.inner.session.state.borrow().progress.clone()
    }
}

async fn drive<T: Transport>(inner: Arc<Inner<T>>) {
    let session = &inner.session;
    let result = tokio::select! {
        biased;
        _ = session.cancel.cancelled() => return,
        result = run_session(&inner) => result,
    };
    match result {
        Ok(outcome) => session.finish(outcome),
        Err(error) => session.fail(error),
    }
}

async fn run_session<T: Transport>(inner: &Inner<T>) -> DownloadResult<Outcome> {
    let options = &inner.options;
    let session = &inner.session;

    let Some(path) = resolve_destination(&inner.dest, &inner.url, options.exist_behavior).await? else {
        info!(dest = %inner.dest.display(), "destination exists, leaving it alone");
        return Ok(Outcome::Ignored);
    };
    if !validate(&path).await {
        return Err(DownloadError::InvalidDestination(path));
    }
    session.state.send_modify(|s| s.saved_file_path = path.clone());

    let resolved = if options.follow_redirect {
        follow_redirect(&*inner.transport, &inner.url, &options.headers, options.head_fallback).await?
    } else {
        resolve_direct(&*inner.transport, &inner.url, &options.headers, options.head_fallback).await?
    };
    session.state.send_modify(|s| s.final_address = resolved.address.clone());

    let size = resolved.size().unwrap_or(0);
    let resumable = options.connections != 1 && size > 0 && resolved.accepts_ranges();
    let store = ChunkStore::new(&path);

    let (ranges, scan) = if resumable {
        let ranges = plan_ranges(size, &options.chunk_size, options.connections);
        let scan = scan_chunks(&store, &ranges).await?;
        (ranges.into_iter().map(Some).collect::<Vec<_>>(), scan)
    } else {
        let scan = ResumeScan {
            pending: VecDeque::from([0]),
            complete: Vec::new(),
        };
        (vec![None], scan)
    };

    let sizes: Vec<u64> = ranges.iter().map(|r| r.map_or(0, |r| r.length())).collect();
    let mut tracker = ProgressTracker::new(sizes.clone(), size, options.report_interval, Instant::now());
    for &chunk in &scan.complete {
        tracker.mark_complete(chunk);
    }

    let metadata = Metadata {
        final_address: resolved.address.clone(),
        size,
        chunks: if resumable { sizes } else { Vec::new() },
        is_resume: scan.is_resume(),
        progress: tracker.percentages(),
        resumable,
        parallel: resumable,
        headers: resolved.header_map(),
        saved_file_path: path.clone(),
    };
    info!(
        address = %metadata.final_address,
        size,
        chunks = ranges.len(),
        resumed = scan.complete.len(),
        resumable,
        "metadata ready"
    );
    session.state.send_modify(|s| s.metadata = Some(metadata.clone()));
    session.emit(DownloadEvent::Metadata(metadata));

    let count = ranges.len();
    let manager = ChunkManager::new(
        inner.transport.clone(),
        resolved.address,
        options.clone(),
        store.clone(),
        ranges,
        scan.pending,
        session.cancel.clone(),
    );
    if !manager.run(&mut tracker, session).await? {
        return Ok(Outcome::Cancelled);
    }

    build_file(&store, count, session).await?;
    session.emit(DownloadEvent::End);
    Ok(Outcome::Completed)
}
