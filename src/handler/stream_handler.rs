use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;
use crate::error::liveness_error::LivenessError;
use crate::models::liveness_model::StreamQuery;
use crate::service::liveness_service::LivenessService;
use crate::state::liveness_state::LivenessState;

pub async fn video_stream(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    State(state): State<LivenessState>,
) -> Response {
    let session_id = query
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state.liveness_service, session_id))
}

/// Accepts raw image bytes, plain base64 or a `data:` URL.
pub fn decode_text_frame(text: &str) -> Result<Vec<u8>, LivenessError> {
    let text = text.trim();
    let payload = match text.strip_prefix("data:") {
        Some(rest) => match rest.split_once(',') {
            Some((_, data)) => data,
            None => return Err(LivenessError::InvalidImageData("data URL has no payload".to_string())),
        },
        None => text,
    };
    STANDARD
        .decode(payload)
        .map_err(|e| LivenessError::InvalidImageData(format!("invalid base64 frame: {e}")))
}

/// The reader keeps only the newest frame; the processor takes whatever is
/// latest once it is free, so a slow model drops frames instead of queueing.
async fn handle_socket(socket: WebSocket, service: LivenessService, session_id: String) {
    info!("video stream opened for session {session_id}");
    let (mut sender, mut receiver) = socket.split();
    let (frame_tx, mut frame_rx) = watch::channel::<Option<Bytes>>(None);

    let reader = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            let frame = match message {
                Ok(Message::Binary(data)) => Bytes::from(data),
                Ok(Message::Text(text)) => match decode_text_frame(&text) {
                    Ok(data) => Bytes::from(data),
                    Err(e) => {
                        debug!("dropping undecodable frame: {e}");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("video stream receive error: {e}");
                    break;
                }
            };
            if frame_tx.send(Some(frame)).is_err() {
                break;
            }
        }
    });

    while frame_rx.changed().await.is_ok() {
        let Some(frame) = frame_rx.borrow_and_update().clone() else {
            continue;
        };

        let body = match service.process_stream_frame(&session_id, &frame).await {
            Ok(result) => serde_json::to_string(&result),
            Err(e) => {
                warn!("stream frame failed for session {session_id}: {e}");
                serde_json::to_string(&json!({ "session_id": session_id, "error": e.to_string() }))
            }
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to serialize stream result: {e}");
                continue;
            }
        };
        if sender.send(Message::Text(body)).await.is_err() {
            break;
        }
    }

    reader.abort();
    info!("video stream closed for session {session_id}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_frame() {
        assert_eq!(decode_text_frame("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_text_frame("data:image/jpeg;base64,aGVsbG8=").unwrap(), b"hello");
        assert!(decode_text_frame("data:image/jpeg;base64").is_err());
        assert!(decode_text_frame("!!!").unwrap_err().is_client_error());
    }
}
