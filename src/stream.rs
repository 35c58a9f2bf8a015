//! Status subscriptions: session snapshots as a `Stream`.
//!
//! ## Why a stream?
//!
//! Polling `status` every second works, but a viewer that holds an SSE
//! connection open sees each phase change the moment it happens. The stream
//! is layered over the same `watch` channel the session task publishes to,
//! so it can never disagree with what `status` returns.
//!
//! The first item is the current snapshot. Intermediate snapshots may be
//! skipped when the session moves faster than the consumer reads (a `watch`
//! channel keeps only the latest value); the terminal snapshot is always
//! delivered and ends the stream.

use crate::session::{SessionState, SessionStatus};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;

/// A boxed stream of status snapshots.
pub type StatusStream = Pin<Box<dyn Stream<Item = SessionStatus> + Send>>;

/// Stream status snapshots from `rx` until the session reaches a terminal phase.
pub fn status_stream(rx: watch::Receiver<SessionState>) -> StatusStream {
    // The flag is checked before polling again: once the terminal snapshot
    // is out, the channel will not change and a poll would never resolve.
    stream::unfold(
        (WatchStream::new(rx), false),
        |(mut updates, finished)| async move {
            if finished {
                return None;
            }
            let status = updates.next().await?.status();
            let terminal = status.phase.is_terminal();
            Some((status, (updates, terminal)))
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Phase, SessionOptions};
    use crate::slide::DeckFormat;
    use std::time::Duration;

    fn state() -> SessionState {
        SessionState::new(
            "deck.pptx",
            DeckFormat::Pptx,
            "client",
            SessionOptions {
                enable_vision: false,
                tts_provider: "piper".into(),
                voice: "v".into(),
            },
            "00".into(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn yields_current_snapshot_then_ends_at_terminal_phase() {
        let (tx, rx) = watch::channel(state());
        let mut stream = status_stream(rx);

        let first = stream.next().await.unwrap();
        assert_eq!(first.phase, Phase::Uploading);

        tx.send_modify(|s| s.enter(Phase::Parsing, "Parsing"));
        assert_eq!(stream.next().await.unwrap().phase, Phase::Parsing);

        tx.send_modify(|s| s.mark_canceled());
        assert_eq!(stream.next().await.unwrap().phase, Phase::Canceled);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn ends_when_the_session_is_dropped() {
        let (tx, rx) = watch::channel(state());
        let mut stream = status_stream(rx);
        assert!(stream.next().await.is_some());
        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
