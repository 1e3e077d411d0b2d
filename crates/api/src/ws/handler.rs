use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use modelhub_core::{ObserverId, ObserverReceiver, RoomManager};

use crate::error::AppResult;
use crate::state::AppState;

/// GET /ws/{task_id}
///
/// Attaches to the task's room before upgrading, so an unknown or retired
/// task id is answered with 404 instead of an upgraded socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let (observer_id, rx) = state.rooms.attach(&task_id).await?;
    let rooms = state.rooms.clone();
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, rooms, task_id, observer_id, rx))
        .into_response())
}

/// Manage a single observer connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Spawns a sender task forwarding room messages as JSON text frames.
///      When the room is retired the channel closes and a Close frame is sent.
///   2. Drains inbound frames until the client closes or the sender is done.
///   3. Detaches from the room.
async fn handle_socket(
    socket: WebSocket,
    rooms: RoomManager,
    task_id: String,
    observer_id: ObserverId,
    mut rx: ObserverReceiver,
) {
    tracing::info!(task_id = %task_id, observer_id, "WebSocket connected");
    let (mut sink, mut stream) = socket.split();

    let sender_task_id = task_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message.checked()) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(task_id = %sender_task_id, error = %e, "Failed to encode progress message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                tracing::debug!(task_id = %sender_task_id, "WebSocket sink closed");
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let receive = async {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(task_id = %task_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = &mut send_task => {}
        () = receive => send_task.abort(),
    }

    rooms.detach(&task_id, observer_id).await;
    tracing::info!(task_id = %task_id, observer_id, "WebSocket disconnected");
}
