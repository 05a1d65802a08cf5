use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};

use crate::AppState;
use crate::auth::AuthContext;
use crate::realtime::{ClientMessage, PROTOCOL_VERSION};

/// Realtime stream endpoint. The connection is registered with the broker
/// for the caller's org; filters arrive via `subscribe` frames.
pub async fn stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ctx: AuthContext,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, ctx))
}

async fn handle_socket(socket: WebSocket, state: AppState, ctx: AuthContext) {
    let (client_id, mut frames) = state.broker.register(&ctx.org_id);
    let (mut sink, mut source) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let broker = state.broker.clone();
    let recv_client_id = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = source.next().await {
            match message {
                Message::Text(text) => {
                    broker.touch(&recv_client_id);
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Subscribe { protocol, filter }) => {
                            if protocol != PROTOCOL_VERSION {
                                tracing::warn!(
                                    "client {recv_client_id} subscribed with protocol {protocol}"
                                );
                            }
                            broker.subscribe(&recv_client_id, filter);
                        }
                        Ok(ClientMessage::Unsubscribe) => broker.unsubscribe(&recv_client_id),
                        Ok(ClientMessage::Ping) => {}
                        Err(e) => {
                            tracing::debug!("client {recv_client_id} sent bad frame: {e}");
                        }
                    }
                }
                Message::Pong(_) => broker.touch(&recv_client_id),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Either side ending tears the whole connection down; in-flight frames
    // are dropped with it.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    state.broker.unregister(&client_id);
}
