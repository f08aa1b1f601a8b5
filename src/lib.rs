mod builder;
pub mod destination;
pub mod downloader;
pub mod error;
pub mod events;
mod manager;
pub mod models;
pub mod planner;
pub mod progress;
pub mod resolver;
pub mod resume;
pub mod store;
pub mod transport;
mod worker;

pub use downloader::Downloader;
pub use error::{DownloadError, DownloadResult};
pub use store::clean;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::downloader::Downloader;
    pub use crate::error::{DownloadError, DownloadResult};
    pub use crate::events::{DownloadEvent, EventKind};
    pub use crate::models::{ByteRange, ChunkSize, DownloadOptions, ExistBehavior, Metadata, RetryInfo};
    pub use crate::progress::{Progress, ProgressReport};
    pub use crate::store::clean;
    pub use crate::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
}
