//! Keep-alive frames for legacy SSE streams.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::sse::{self, SinkError, SseSink};

/// Why the heartbeat loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The stream was destroyed or ended between ticks.
    SocketGone,
    /// A keep-alive frame could not be written.
    WriteFailed,
    /// The owning transport closed.
    Cancelled,
}

/// Write a keep-alive comment every `interval` until the stream goes away
/// or `cancel` fires. The first frame is written one interval after start.
pub async fn run_heartbeat(
    sink: Arc<SseSink>,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            _ = ticker.tick() => {
                if sink.is_destroyed() || sink.is_ended() {
                    return HeartbeatResult::SocketGone;
                }
                let frame = sse::keepalive_frame(chrono::Utc::now().timestamp_millis());
                match sink.try_write(frame) {
                    Ok(()) => metrics::counter!("mcp_keepalive_frames_total").increment(1),
                    // A slow reader already has bytes in flight; skip this tick.
                    Err(SinkError::Full) => debug!("keep-alive skipped, stream buffer full"),
                    Err(err @ SinkError::Gone) => {
                        warn!(error = %err, "keep-alive write failed");
                        return HeartbeatResult::WriteFailed;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const TICK: Duration = Duration::from_secs(15);

    fn is_ping(frame: &[u8]) -> bool {
        frame.starts_with(b": ping ") && frame.ends_with(b"\n\n")
    }

    #[tokio::test(start_paused = true)]
    async fn writes_one_frame_per_interval() {
        let (sink, body) = SseSink::channel();
        let mut stream = body.into_data_stream();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(sink, TICK, cancel.clone()));

        for _ in 0..3 {
            let frame = stream.next().await.unwrap().unwrap();
            assert!(is_ping(&frame));
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_written_before_first_interval() {
        let (sink, _body) = SseSink::channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(sink.clone(), TICK, cancel.clone()));

        time::sleep(TICK / 2).await;
        sink.destroy();
        time::sleep(TICK).await;
        assert_eq!(handle.await.unwrap(), HeartbeatResult::SocketGone);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_once_destroyed() {
        let (sink, body) = SseSink::channel();
        let mut stream = body.into_data_stream();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(sink.clone(), TICK, cancel));

        let frame = stream.next().await.unwrap().unwrap();
        assert!(is_ping(&frame));

        sink.destroy();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::SocketGone);
        // Destroy cuts the body off; no further frames are produced.
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_once_ended() {
        let (sink, _body) = SseSink::channel();
        sink.end();
        let result = run_heartbeat(sink, TICK, CancellationToken::new()).await;
        assert_eq!(result, HeartbeatResult::SocketGone);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_client_disconnects() {
        let (sink, body) = SseSink::channel();
        drop(body);
        let result = run_heartbeat(sink, TICK, CancellationToken::new()).await;
        assert_eq!(result, HeartbeatResult::SocketGone);
    }
}
