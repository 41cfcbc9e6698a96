//! The seam between the serving kernel and the inference engine.
//!
//! The engine is an external collaborator: it accepts a request id, a prompt
//! string, and sampling parameters, and produces an async sequence of
//! cumulative output snapshots. Each snapshot's text must be a
//! prefix-extension of the previous one; the delta streamer checks this at
//! its boundary.

use std::fmt;

use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::chat::SamplingParams;
use crate::error::{Error, Result};

/// Cumulative text generated so far for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSnapshot {
    pub text: String,
}

impl GenerationSnapshot {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Process-unique opaque token correlating a request with its stream.
/// Carries no ordering semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn mint() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, finite, non-restartable sequence of snapshots for one request.
pub type SnapshotStream = BoxStream<'static, Result<GenerationSnapshot>>;

/// Asynchronous generation engine.
///
/// `add_request` starts generation and hands back the snapshot stream;
/// `abort` tells the engine to stop working on a request whose consumer has
/// gone away. Aborting an unknown or already-finished id must be a no-op.
pub trait AsyncEngine: Send + Sync + 'static {
    fn add_request(
        &self,
        request_id: &RequestId,
        prompt: &str,
        params: SamplingParams,
    ) -> Result<SnapshotStream>;

    fn abort(&self, request_id: &RequestId);
}

/// Producer half of [`snapshot_channel`].
#[derive(Clone)]
pub struct SnapshotSender(mpsc::UnboundedSender<Result<GenerationSnapshot>>);

impl SnapshotSender {
    /// Push a cumulative snapshot. Returns `false` once the consumer has
    /// dropped the stream, so generation loops can stop early.
    pub fn snapshot(&self, text: impl Into<String>) -> bool {
        self.0.send(Ok(GenerationSnapshot::new(text))).is_ok()
    }

    /// Terminate the stream with an engine fault.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.0.send(Err(Error::EngineFailure(message.into()))).is_ok()
    }
}

/// Channel-backed snapshot plumbing for engine implementations: the engine
/// side pushes snapshots, the kernel side consumes them as a stream. The
/// stream ends when the sender is dropped.
pub fn snapshot_channel() -> (SnapshotSender, SnapshotStream) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let stream = Box::pin(async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    });
    (SnapshotSender(tx), stream)
}
