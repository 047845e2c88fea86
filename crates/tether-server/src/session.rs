//! WebSocket transport adapter: one accepted socket from upgrade to close.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tether_core::{ConnId, Encoded, PacketCodec};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::connection::{CloseReason, Frame, Outbound, OutboundRx};
use crate::worker::WorkerHandle;

/// How long a closing session waits for queued frames and the close frame
/// to reach the socket before dropping it.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket close code sent for each close reason.
pub fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::ClientClosed => close_code::NORMAL,
        CloseReason::LivenessExpired => close_code::POLICY,
        CloseReason::ProtocolViolation => close_code::PROTOCOL,
        CloseReason::Shutdown => close_code::AWAY,
        CloseReason::SlowConsumer => close_code::AGAIN,
    }
}

/// Run one WebSocket session against `worker`.
///
/// The worker owns the connection state; this task only moves frames.
/// Inbound frames are decoded and queued to the worker with backpressure.
/// Outbound packets are encoded by a forwarder task that ends when the
/// worker closes the connection or drops its queue. A close from the worker
/// ends the read loop at once; a peer that stops reading gets
/// [`CLOSE_FLUSH_TIMEOUT`] before the socket is dropped.
#[instrument(skip_all, fields(conn_id = %conn_id, worker_id = %worker.id()))]
pub async fn run_ws_session(
    socket: WebSocket,
    conn_id: ConnId,
    worker: WorkerHandle,
    codec: Arc<dyn PacketCodec>,
    outbound_buffer: usize,
) {
    let started = Instant::now();
    let (ws_tx, mut ws_rx) = socket.split();
    let (outbound, frames) = Outbound::channel(outbound_buffer);

    if let Err(error) = worker.open(conn_id.clone(), outbound).await {
        warn!(%error, "worker refused connection");
        return;
    }

    let closing = frames.close_signal();
    let mut forwarder = tokio::spawn(forward_outbound(ws_tx, frames, codec.clone()));
    let mut forwarder_done = false;

    loop {
        let message = tokio::select! {
            () = closing.cancelled() => {
                debug!("worker closed connection");
                break;
            }
            _ = &mut forwarder => {
                debug!("outbound side finished");
                forwarder_done = true;
                break;
            }
            message = ws_rx.next() => message,
        };
        let bytes = match message {
            Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
            Some(Ok(Message::Binary(data))) => data.to_vec(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                debug!("client closed transport");
                break;
            }
            Some(Err(error)) => {
                debug!(%error, "transport read failed");
                break;
            }
        };

        let delivered = match codec.decode(&bytes) {
            Ok(packet) => worker.inbound(conn_id.clone(), packet).await,
            Err(error) => worker.violation(conn_id.clone(), error.to_string()).await,
        };
        if let Err(error) = delivered {
            warn!(%error, "worker unavailable, dropping session");
            break;
        }
    }

    let _ = worker.closed(conn_id.clone()).await;
    if !forwarder_done
        && tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut forwarder)
            .await
            .is_err()
    {
        debug!("outbound flush timed out, dropping socket");
        forwarder.abort();
    }
    info!(duration_ms = started.elapsed().as_millis(), "session ended");
}

async fn forward_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut frames: OutboundRx,
    codec: Arc<dyn PacketCodec>,
) {
    while let Some(frame) = frames.recv().await {
        let message = match frame {
            Frame::Packet(packet) => match codec.encode(&packet) {
                Ok(Encoded::Text(text)) => Message::Text(text.into()),
                Ok(Encoded::Binary(bytes)) => Message::Binary(bytes.into()),
                Err(error) => {
                    warn!(%error, packet_type = packet.kind().name(), "dropping unencodable packet");
                    continue;
                }
            },
            Frame::Close(reason) => {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code_for(reason),
                    reason: Utf8Bytes::from_static(reason.label()),
                }));
                let _ = ws_tx.send(close).await;
                return;
            }
        };
        if ws_tx.send(message).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes() {
        assert_eq!(close_code_for(CloseReason::ClientClosed), 1000);
        assert_eq!(close_code_for(CloseReason::Shutdown), 1001);
        assert_eq!(close_code_for(CloseReason::ProtocolViolation), 1002);
        assert_eq!(close_code_for(CloseReason::LivenessExpired), 1008);
        assert_eq!(close_code_for(CloseReason::SlowConsumer), 1013);
    }
}
