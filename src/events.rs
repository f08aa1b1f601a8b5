// src/events.rs

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::DownloadError;
use crate::models::{Metadata, RetryInfo};
use crate::progress::ProgressReport;

/// Everything a session publishes to its subscribers.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Session layout is known; emitted once before any chunk is fetched.
    Metadata(Metadata),
    Progress(ProgressReport),
    /// A chunk attempt failed and will be retried (or the chunk gives up).
    Retry(RetryInfo),
    /// Merge progress, 0 to 100.
    Build(f64),
    /// The destination file is complete.
    End,
    /// The session is torn down. Always the last event, sent exactly once.
    Close,
    Error(DownloadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Metadata,
    Progress,
    Retry,
    Build,
    End,
    Close,
    Error,
}

impl DownloadEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DownloadEvent::Metadata(_) => EventKind::Metadata,
            DownloadEvent::Progress(_) => EventKind::Progress,
            DownloadEvent::Retry(_) => EventKind::Retry,
            DownloadEvent::Build(_) => EventKind::Build,
            DownloadEvent::End => EventKind::End,
            DownloadEvent::Close => EventKind::Close,
            DownloadEvent::Error(_) => EventKind::Error,
        }
    }
}

struct Subscriber {
    kinds: Option<Vec<EventKind>>,
    tx: UnboundedSender<DownloadEvent>,
}

impl Subscriber {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

/// Fan-out of session events. Dropping a receiver unsubscribes it.
#[derive(Default)]
pub(crate) struct EventHub {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventHub {
    pub fn subscribe(&self, kinds: Option<&[EventKind]>) -> UnboundedReceiver<DownloadEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(Subscriber {
            kinds: kinds.map(<[EventKind]>::to_vec),
            tx,
        });
        rx
    }

    /// Whether anyone still listens for `kind`.
    pub fn has_listeners(&self, kind: EventKind) -> bool {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.iter().any(|s| s.wants(kind))
    }

    pub fn emit(&self, event: DownloadEvent) {
        let kind = event.kind();
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.wants(kind) || s.tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filtered_subscribers_only_see_their_kinds() {
        let hub = EventHub::default();
        let mut all = hub.subscribe(None);
        let mut ends = hub.subscribe(Some(&[EventKind::End, EventKind::Close]));

        hub.emit(DownloadEvent::Build(0.0));
        hub.emit(DownloadEvent::End);
        hub.emit(DownloadEvent::Close);

        assert!(matches!(all.try_recv(), Ok(DownloadEvent::Build(_))));
        assert!(matches!(all.try_recv(), Ok(DownloadEvent::End)));
        assert!(matches!(all.try_recv(), Ok(DownloadEvent::Close)));
        assert!(matches!(ends.try_recv(), Ok(DownloadEvent::End)));
        assert!(matches!(ends.try_recv(), Ok(DownloadEvent::Close)));
        assert!(ends.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_stop_counting_as_listeners() {
        let hub = EventHub::default();
        assert!(!hub.has_listeners(EventKind::Progress));

        let rx = hub.subscribe(Some(&[EventKind::Progress]));
        assert!(hub.has_listeners(EventKind::Progress));
        assert!(!hub.has_listeners(EventKind::Retry));

        drop(rx);
        assert!(!hub.has_listeners(EventKind::Progress));
    }
}
