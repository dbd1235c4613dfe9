use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::OnceLock;
use stride_core::rooms::LeaveReason;
use stride_core::AppState;
use stride_models::gateway::*;
use stride_models::presence::Identity;
use tokio::time::{Duration, Instant};

use crate::session::Session;

const HEARTBEAT_ACK_MSG: &str = r#"{"op":11}"#;

static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);
static USER_CONNECTIONS: OnceLock<dashmap::DashMap<i64, usize>> = OnceLock::new();

fn user_connections() -> &'static dashmap::DashMap<i64, usize> {
    USER_CONNECTIONS.get_or_init(dashmap::DashMap::new)
}

struct ConnectionGuard {
    user_id: Option<i64>,
    global_acquired: bool,
}

impl ConnectionGuard {
    fn new() -> Self {
        Self {
            user_id: None,
            global_acquired: false,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(user_id) = self.user_id.take() {
            if let Some(mut count) = user_connections().get_mut(&user_id) {
                if *count <= 1 {
                    drop(count);
                    user_connections().remove(&user_id);
                } else {
                    *count -= 1;
                }
            }
        }
        if self.global_acquired {
            ACTIVE_CONNECTIONS.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }
}

fn try_acquire_global_connection_slot(limit: usize) -> bool {
    let mut current = ACTIVE_CONNECTIONS.load(AtomicOrdering::SeqCst);
    loop {
        if current >= limit {
            return false;
        }
        match ACTIVE_CONNECTIONS.compare_exchange(
            current,
            current + 1,
            AtomicOrdering::SeqCst,
            AtomicOrdering::SeqCst,
        ) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}

fn try_acquire_user_connection_slot(user_id: i64, limit: usize) -> bool {
    let mut count = user_connections().entry(user_id).or_insert(0);
    if *count >= limit {
        return false;
    }
    *count += 1;
    true
}

fn dispatch_frame(event_type: &str, payload: &Value) -> String {
    json!({ "op": OP_DISPATCH, "t": event_type, "d": payload }).to_string()
}

async fn send_text(
    sender: &mut (impl SinkExt<Message> + Unpin),
    payload: String,
    session_id: Option<&str>,
) -> Result<(), ()> {
    tracing::trace!(
        target: "gateway",
        direction = "out",
        session_id = ?session_id,
        bytes = payload.len(),
        "frame"
    );
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn send_close(
    sender: &mut (impl SinkExt<Message> + Unpin),
    code: u16,
    reason: &str,
) -> Result<(), ()> {
    sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
        .map_err(|_| ())
}

fn online_list_payload(state: &AppState) -> Value {
    json!(state.presence.list_online())
}

/// Best-effort broadcast of the updated online list after every
/// authenticate or disconnect; a missed broadcast self-heals on the next
/// presence change.
fn broadcast_online_list(state: &AppState) {
    state
        .bus
        .dispatch(EVENT_ONLINE_USERS, online_list_payload(state));
}

pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let mut connection_guard = ConnectionGuard::new();
    if !try_acquire_global_connection_slot(state.config.max_global_connections) {
        let (mut sender, _) = socket.split();
        let _ = send_close(&mut sender, 1013, "Gateway is at connection capacity").await;
        return;
    }
    connection_guard.global_acquired = true;

    let (mut sender, mut receiver) = socket.split();

    // Send HELLO
    let hello = json!({
        "op": OP_HELLO,
        "d": { "heartbeat_interval": state.config.heartbeat_interval_ms }
    });
    if send_text(&mut sender, hello.to_string(), None).await.is_err() {
        return;
    }

    // Wait for the authenticate event
    let identify_timeout = Duration::from_secs(state.config.identify_timeout_secs);
    let identity =
        match tokio::time::timeout(identify_timeout, wait_for_authenticate(&mut receiver)).await {
            Ok(Some(identity)) => identity,
            _ => {
                let _ = send_text(
                    &mut sender,
                    json!({ "op": OP_INVALID_SESSION, "d": false }).to_string(),
                    None,
                )
                .await;
                return;
            }
        };

    if !try_acquire_user_connection_slot(identity.user_id, state.config.max_sessions_per_user) {
        let _ = send_close(&mut sender, 1008, "Too many concurrent sessions for this user").await;
        return;
    }
    connection_guard.user_id = Some(identity.user_id);

    let session = Session::new(identity.clone());
    let session_id = session.session_id;
    state.presence.authenticate(identity, session_id);
    tracing::info!(%session_id, user_id = session.user_id(), "session authenticated");

    // The new session gets the snapshot directly; everyone else hears the
    // change over the bus.
    let snapshot = dispatch_frame(EVENT_ONLINE_USERS, &online_list_payload(&state));
    if send_text(&mut sender, snapshot, Some(&session_id.to_string()))
        .await
        .is_err()
    {
        state.presence.remove(session_id);
        return;
    }
    broadcast_online_list(&state);

    let disconnect_reason = run_session(&mut sender, &mut receiver, &session, &state).await;
    tracing::info!(
        %session_id,
        user_id = session.user_id(),
        reason = %disconnect_reason,
        "session disconnected"
    );

    // Implicit bulk leave of every room, then presence cleanup.
    state.rooms.on_disconnect(session_id);
    if let Some((_, offline)) = state.presence.remove(session_id) {
        if offline {
            tracing::debug!(user_id = session.user_id(), "last session closed, identity offline");
        }
    }
    broadcast_online_list(&state);
}

async fn wait_for_authenticate(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<Identity> {
    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<GatewayMessage>(&text) else {
            continue;
        };
        if frame.op != OP_EVENT {
            continue;
        }
        let event = serde_json::from_value::<ClientEvent>(json!({
            "t": frame.t,
            "d": frame.d,
        }))
        .ok()?;
        if let ClientEvent::Authenticate {
            user_id,
            contact,
            display_name,
        } = event
        {
            return Some(Identity {
                user_id,
                display_name,
                contact,
            });
        }
        // Anything else before authenticate is a protocol violation.
        return None;
    }
    None
}

async fn run_session(
    sender: &mut (impl SinkExt<Message> + Unpin),
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    session: &Session,
    state: &AppState,
) -> String {
    let mut event_rx = state.bus.subscribe();
    let heartbeat_timeout = Duration::from_millis(state.config.heartbeat_timeout_ms);
    let mut ws_ping_interval = tokio::time::interval(Duration::from_secs(20));
    ws_ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let heartbeat_sleep = tokio::time::sleep(heartbeat_timeout);
    tokio::pin!(heartbeat_sleep);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::trace!(
                            target: "gateway",
                            direction = "in",
                            session_id = %session.session_id,
                            bytes = text.len(),
                            "frame"
                        );
                        let Ok(frame) = serde_json::from_str::<GatewayMessage>(&text) else {
                            tracing::debug!(session_id = %session.session_id, "unparseable frame dropped");
                            continue;
                        };
                        match frame.op {
                            OP_HEARTBEAT => {
                                heartbeat_sleep.as_mut().reset(Instant::now() + heartbeat_timeout);
                                if send_text(sender, HEARTBEAT_ACK_MSG.to_string(), None).await.is_err() {
                                    break "websocket send error".to_string();
                                }
                            }
                            OP_EVENT => {
                                match serde_json::from_value::<ClientEvent>(json!({"t": frame.t, "d": frame.d})) {
                                    Ok(event) => {
                                        handle_client_event(event, sender, session, state).await;
                                    }
                                    Err(err) => {
                                        tracing::debug!(
                                            session_id = %session.session_id,
                                            error = %err,
                                            "unknown client event dropped"
                                        );
                                    }
                                }
                            }
                            other => {
                                tracing::debug!(opcode = other, session_id = %session.session_id, "unknown opcode");
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!(
                                "client close frame (code={}, reason={})",
                                frame.code, frame.reason
                            ),
                            None => "client close frame (no code/reason)".to_string(),
                        };
                    }
                    Some(Err(err)) => {
                        break format!("websocket receive error: {err}");
                    }
                    None => {
                        break "websocket stream ended".to_string();
                    }
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !should_deliver(&event, session, state) {
                            continue;
                        }
                        let frame = dispatch_frame(&event.event_type, &event.payload);
                        if send_text(sender, frame, Some(&session.session_id.to_string())).await.is_err() {
                            break "websocket send error".to_string();
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            user_id = session.user_id(),
                            skipped,
                            "event stream lagged; forcing reconnect"
                        );
                        let _ = send_close(sender, 1013, "Gateway fell behind; reconnect required").await;
                        break format!("event stream lagged by {skipped} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break "event stream closed".to_string();
                    }
                }
            }
            () = &mut heartbeat_sleep => {
                break format!("heartbeat timeout after {}ms", state.config.heartbeat_timeout_ms);
            }
            _ = ws_ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "websocket ping send error".to_string();
                }
            }
        }
    }
}

fn should_deliver(
    event: &stride_core::events::ServerEvent,
    session: &Session,
    state: &AppState,
) -> bool {
    if event.exclude_session == Some(session.session_id) {
        return false;
    }
    if let Some(targets) = &event.target_user_ids {
        return targets.contains(&session.user_id());
    }
    match event.room_id {
        None => true,
        Some(room_id) => state.rooms.is_member(session.session_id, room_id),
    }
}

async fn handle_client_event(
    event: ClientEvent,
    sender: &mut (impl SinkExt<Message> + Unpin),
    session: &Session,
    state: &AppState,
) {
    match event {
        ClientEvent::Authenticate {
            user_id,
            contact,
            display_name,
        } => {
            // Re-authenticate over a live connection refreshes the identity.
            state.presence.authenticate(
                Identity {
                    user_id,
                    display_name,
                    contact,
                },
                session.session_id,
            );
            broadcast_online_list(state);
        }
        ClientEvent::JoinRoom { room_id } => {
            state.rooms.join(session.session_id, room_id);
        }
        ClientEvent::LeaveRoom { room_id } => {
            state
                .rooms
                .leave(session.session_id, room_id, LeaveReason::Deliberate);
        }
        ClientEvent::SendMessage { room_id, payload } => {
            let envelope = match state.relay.relay(session.session_id, room_id, payload) {
                Ok(envelope) => envelope,
                Err(err) => {
                    tracing::warn!(session_id = %session.session_id, error = %err, "room relay failed");
                    return;
                }
            };
            let ack = dispatch_frame(
                EVENT_MESSAGE_SENT_ACK,
                &json!({ "message_id": envelope.id, "status": "sent" }),
            );
            let _ = send_text(sender, ack, Some(&session.session_id.to_string())).await;

            // Unread counter hints for every conversation participant; a
            // failed lookup only costs the hint.
            match stride_db::conversations::get_participant_user_ids(&state.db, room_id).await {
                Ok(participant_ids) => {
                    for participant_id in participant_ids {
                        state
                            .notifications
                            .emit_unread_count_update(room_id, participant_id);
                    }
                }
                Err(err) => {
                    tracing::warn!(room_id, error = %err, "participant lookup failed, skipping unread hints");
                }
            }
        }
        ClientEvent::SendDirect {
            recipient_id,
            payload,
        } => {
            match state
                .relay
                .relay_direct(&state.db, session.session_id, recipient_id, payload)
                .await
            {
                Ok((envelope, live)) => {
                    let ack = dispatch_frame(
                        EVENT_MESSAGE_SENT_ACK,
                        &json!({ "message_id": envelope.id, "status": "sent", "live": live }),
                    );
                    let _ = send_text(sender, ack, Some(&session.session_id.to_string())).await;
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        recipient_id,
                        error = %err,
                        "direct relay failed"
                    );
                }
            }
        }
        ClientEvent::Delivered { message_id } => {
            state.relay.acknowledge_delivered(message_id);
        }
        ClientEvent::Viewed { message_ids } => {
            state.relay.acknowledge_viewed(session.session_id, &message_ids);
        }
        ClientEvent::Typing { room_id, is_typing } => {
            state.relay.set_typing(session.session_id, room_id, is_typing);
        }
        ClientEvent::GetOnlineList => {
            let snapshot = dispatch_frame(EVENT_ONLINE_USERS, &online_list_payload(state));
            let _ = send_text(sender, snapshot, Some(&session.session_id.to_string())).await;
        }
    }
}
