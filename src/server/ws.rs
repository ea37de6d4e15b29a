//! Worker-facing WebSocket transport (push style).
//!
//! The socket task owns one broker session: jobs arrive on the session's
//! channel and go out as `request` frames; inbound frames are parsed and
//! handed to the broker with this session's token, so a superseded socket
//! can never resolve current requests.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::StreamExt;
use futures::stream::SplitSink;
use tracing::{debug, info, warn};

use crate::broker::router::RouteOutcome;
use crate::broker::{Broker, WorkerSession};
use crate::protocol::{ServerFrame, WorkerFrame};

pub async fn worker_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<super::AppState>,
) -> impl IntoResponse {
    info!("Worker connecting");
    ws.on_upgrade(move |socket| handle_worker_socket(socket, state.broker))
}

async fn handle_worker_socket(socket: WebSocket, broker: Arc<Broker>) {
    let WorkerSession { token, mut jobs } = broker.attach_push_worker().await;
    let (mut sink, mut stream) = socket.split();

    // Connection confirmation, as the worker expects before any job.
    if send_frame(&mut sink, &ServerFrame::connected()).await.is_err() {
        warn!(token, "Failed to send connection confirmation");
        broker.on_worker_disconnect(token).await;
        return;
    }

    loop {
        tokio::select! {
            job = jobs.recv() => {
                match job {
                    Some(job) => {
                        let frame = ServerFrame::Request {
                            request_id: job.request_id,
                            message: job.payload,
                            model: job.model,
                        };
                        if send_frame(&mut sink, &frame).await.is_err() {
                            warn!(token, request_id = %job.request_id, "Failed to push job, closing");
                            break;
                        }
                    }
                    // Session superseded by a newer attachment.
                    None => {
                        debug!(token, "Job channel closed, shutting down socket");
                        break;
                    }
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WorkerFrame>(&text) {
                            Ok(frame) => {
                                if let RouteOutcome::Pong(pong) =
                                    broker.on_worker_message(token, frame).await
                                {
                                    if send_frame(&mut sink, &pong).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(error) => {
                                debug!(token, error = %error, "Unrecognized frame from worker");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Axum answers protocol pings itself; just record liveness.
                        broker.heartbeat(token).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(token, "Worker socket closed");
                        break;
                    }
                    Some(Err(error)) => {
                        warn!(token, error = %error, "Worker socket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    broker.on_worker_disconnect(token).await;
    info!(token, "Worker connection closed");
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    use futures::SinkExt;
    let Ok(json) = serde_json::to_string(frame) else {
        return Ok(());
    };
    sink.send(Message::Text(json.into())).await
}
