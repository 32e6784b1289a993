//! WebSocket handler for the live feed

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::api::state::ApiState;

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Forwards feed items as JSON text frames until either side goes away
async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();

    let mut subscription = state.broadcaster.subscribe();
    info!(
        "WebSocket client connected ({} subscribers)",
        state.broadcaster.subscriber_count()
    );

    let mut send_task = tokio::spawn(async move {
        while let Some(item) = subscription.recv().await {
            let text = match serde_json::to_string(&item) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to serialize feed item: {e}");
                    continue;
                }
            };

            if sender.send(Message::Text(text)).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }

        let dropped = subscription.dropped();
        if dropped > 0 {
            debug!("subscriber dropped {dropped} stale items");
        }
    });

    // clients only ever close; anything else is ignored
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("WebSocket client disconnected");
}
