//! Cumulative snapshot → incremental delta assembly.
//!
//! The engine re-sends "everything generated so far" on each step; clients
//! must see each byte exactly once. A byte cursor tracks the emitted prefix
//! and each snapshot contributes only its unseen suffix. Chat mode
//! additionally suppresses the leading whitespace templates put in front of
//! the assistant turn.

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use tracing::warn;

use crate::engine::SnapshotStream;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Plain completion: every non-empty delta is emitted as produced.
    Raw,
    /// Chat: whitespace-only deltas are dropped until real content appears;
    /// the first real delta is emitted left-stripped, the rest unmodified.
    Chat,
}

/// Wrap an engine snapshot stream into a stream of incremental fragments.
///
/// Concatenating all raw-mode fragments reproduces the final snapshot text
/// exactly. A snapshot that shrinks below the cursor violates the engine's
/// prefix-extension contract and terminates the stream with
/// [`Error::EngineProtocolViolation`]; no repair is attempted.
pub fn delta_stream(
    snapshots: SnapshotStream,
    mode: StreamMode,
) -> impl Stream<Item = Result<String>> + Send {
    try_stream! {
        let mut snapshots = snapshots;
        let mut cursor = 0usize;
        let mut stripping_done = mode == StreamMode::Raw;

        while let Some(snapshot) = snapshots.next().await {
            let snapshot = snapshot?;
            let text = snapshot.text;
            if text.len() < cursor || !text.is_char_boundary(cursor) {
                warn!(cursor, len = text.len(), "engine snapshot is not a prefix extension");
                Err(Error::EngineProtocolViolation {
                    cursor,
                    len: text.len(),
                })?;
            }

            let delta = &text[cursor..];
            cursor = text.len();
            if delta.is_empty() {
                continue;
            }

            if stripping_done {
                yield delta.to_string();
            } else if !delta.trim().is_empty() {
                stripping_done = true;
                yield delta.trim_start().to_string();
            }
            // else: whitespace-only delta ahead of real content — dropped,
            // but the cursor has already advanced past it.
        }
    }
}
