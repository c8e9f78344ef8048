//! The session gateway: one WebSocket channel per connection, a select loop
//! over the socket, the connection's outbound queue, and a heartbeat. All
//! client events are validated and admission-checked here before touching
//! the registry.

use std::sync::Arc;

use rocket::futures::{SinkExt, StreamExt};
use rocket::{State, get};
use rocket_ws as ws;
use tokio::time::{Duration, interval, timeout};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::events::{
    ClientEvent, JoinRoomPayload, OutboundQueue, P2pRequest, SendMessagePayload, ServerEvent,
};
use crate::ids;
use crate::models::{ErrorCode, FileMeta, MessageKind};
use crate::rate_limit::{Category, RateLimiter};
use crate::registry::{MessageBody, PasswordChange, Registry};
use crate::store::FileStore;
use crate::validate;

const HEARTBEAT_SECS: u64 = 15;

#[derive(Clone)]
struct ConnectionCtx {
    registry: Arc<Registry>,
    store: Arc<FileStore>,
    rate_limiter: Arc<RateLimiter>,
    idle_timeout: Duration,
    grace_secs: u64,
}

#[get("/ws")]
pub fn session_socket(
    ws: ws::WebSocket,
    registry: &State<Arc<Registry>>,
    store: &State<Arc<FileStore>>,
    rate_limiter: &State<Arc<RateLimiter>>,
    config: &State<AppConfig>,
) -> ws::Channel<'static> {
    let ctx = ConnectionCtx {
        registry: registry.inner().clone(),
        store: store.inner().clone(),
        rate_limiter: rate_limiter.inner().clone(),
        idle_timeout: Duration::from_secs(config.session_idle_timeout_secs),
        grace_secs: config.presence_grace_secs,
    };

    ws.channel(move |stream| {
        Box::pin(async move {
            run_connection(stream, ctx).await;
            Ok(())
        })
    })
}

async fn run_connection(mut stream: ws::stream::DuplexStream, ctx: ConnectionCtx) {
    let conn_id = Uuid::new_v4();
    let (queue, mut outbound) = OutboundQueue::pair();
    let mut session = Session {
        ctx,
        conn_id,
        queue,
        binding: None,
    };

    let mut heartbeat = interval(Duration::from_secs(HEARTBEAT_SECS));
    heartbeat.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            inbound = timeout(session.ctx.idle_timeout, stream.next()) => {
                match inbound {
                    // idle timeout, closed, or transport error
                    Err(_) | Ok(None) | Ok(Some(Err(_))) => break,
                    Ok(Some(Ok(ws::Message::Text(text)))) => {
                        if session.handle_text(&mut stream, &text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(Ok(ws::Message::Close(_)))) => break,
                    Ok(Some(Ok(_))) => {} // pings, pongs, binary frames
                }
            }
            event = outbound.recv() => {
                match event {
                    Some(ev) => {
                        if send_event(&mut stream, &ev).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                if stream.send(ws::Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    session.disconnect();
}

async fn send_event(
    stream: &mut ws::stream::DuplexStream,
    event: &ServerEvent,
) -> Result<(), ws::result::Error> {
    match serde_json::to_string(event) {
        Ok(text) => stream.send(ws::Message::Text(text)).await,
        Err(_) => Ok(()),
    }
}

struct Session {
    ctx: ConnectionCtx,
    conn_id: Uuid,
    queue: OutboundQueue,
    binding: Option<(String, Uuid)>,
}

impl Session {
    /// Parse and dispatch one inbound frame. Only transport errors propagate;
    /// protocol failures become `error` events and keep the connection open.
    async fn handle_text(
        &mut self,
        stream: &mut ws::stream::DuplexStream,
        text: &str,
    ) -> Result<(), ws::result::Error> {
        let event: ClientEvent = match serde_json::from_str(text) {
            Ok(ev) => ev,
            Err(_) => {
                return send_event(stream, &ServerEvent::error(ErrorCode::InvalidPayload)).await;
            }
        };

        if let Some(category) = admission_category(&event)
            && !self
                .ctx
                .rate_limiter
                .check(category, &self.conn_id.to_string())
                .allowed
        {
            return send_event(stream, &ServerEvent::error(ErrorCode::RateLimited)).await;
        }

        match event {
            ClientEvent::JoinRoom(payload) | ClientEvent::JoinRoomWithPassword(payload) => {
                self.handle_join(stream, payload).await
            }
            ClientEvent::LeaveRoom => {
                if let Some((room_key, user_id)) = self.binding.take() {
                    self.ctx.registry.leave(&room_key, user_id, Some(self.conn_id));
                }
                Ok(())
            }
            ClientEvent::SendMessage(payload) => self.handle_send_message(stream, payload).await,
            ClientEvent::RequestUserList => {
                let Some((room_key, _)) = &self.binding else {
                    return send_event(stream, &ServerEvent::error(ErrorCode::UserNotInRoom))
                        .await;
                };
                match self.ctx.registry.list_users(room_key) {
                    Ok(users) => send_event(stream, &ServerEvent::UserList { users }).await,
                    Err(code) => send_event(stream, &ServerEvent::error(code)).await,
                }
            }
            ClientEvent::SetRoomPassword(payload) => {
                let Some((room_key, user_id)) = self.binding.clone() else {
                    return send_event(stream, &ServerEvent::error(ErrorCode::UserNotInRoom))
                        .await;
                };
                let change = PasswordChange::from_wire(payload.password);
                match self
                    .ctx
                    .registry
                    .set_password(&room_key, user_id, Some(self.conn_id), change)
                    .await
                {
                    Ok(outcome) => {
                        send_event(
                            stream,
                            &ServerEvent::RoomPasswordSet {
                                has_password: outcome.has_password,
                                password: outcome.plaintext,
                            },
                        )
                        .await
                    }
                    Err(code) => send_event(stream, &ServerEvent::error(code)).await,
                }
            }
            ClientEvent::ShareRoomLink => {
                let Some((room_key, user_id)) = &self.binding else {
                    return send_event(stream, &ServerEvent::error(ErrorCode::UserNotInRoom))
                        .await;
                };
                match self.ctx.registry.share_room_link(room_key, *user_id) {
                    Ok(url) => send_event(stream, &ServerEvent::RoomLinkGenerated { url }).await,
                    Err(code) => send_event(stream, &ServerEvent::error(code)).await,
                }
            }
            ClientEvent::RecallMessage { message_id } => {
                let Some((room_key, user_id)) = &self.binding else {
                    return send_event(stream, &ServerEvent::error(ErrorCode::UserNotInRoom))
                        .await;
                };
                match self.ctx.registry.recall_message(room_key, *user_id, message_id) {
                    Ok(()) => Ok(()),
                    Err(code) => send_event(stream, &ServerEvent::error(code)).await,
                }
            }
            ClientEvent::PinRoom { pinned } => {
                let Some((room_key, user_id)) = &self.binding else {
                    return send_event(stream, &ServerEvent::error(ErrorCode::UserNotInRoom))
                        .await;
                };
                match self.ctx.registry.pin_room(room_key, *user_id, pinned) {
                    Ok(()) => Ok(()),
                    Err(code) => send_event(stream, &ServerEvent::error(code)).await,
                }
            }
            ClientEvent::P2pOffer(req) => {
                self.relay(stream, req, |from, payload| ServerEvent::P2pOffer { from, payload })
                    .await
            }
            ClientEvent::P2pAnswer(req) => {
                self.relay(stream, req, |from, payload| ServerEvent::P2pAnswer { from, payload })
                    .await
            }
            ClientEvent::P2pIceCandidate(req) => {
                self.relay(stream, req, |from, payload| ServerEvent::P2pIceCandidate {
                    from,
                    payload,
                })
                .await
            }
        }
    }

    async fn handle_join(
        &mut self,
        stream: &mut ws::stream::DuplexStream,
        payload: JoinRoomPayload,
    ) -> Result<(), ws::result::Error> {
        let name = payload.name.trim();
        let fingerprint = payload.fingerprint.trim();
        if !validate::valid_room_key(&payload.room_key)
            || !validate::valid_display_name(name)
            || fingerprint.is_empty()
        {
            return send_event(stream, &ServerEvent::error(ErrorCode::InvalidPayload)).await;
        }
        let fingerprint_hash = ids::fingerprint_hash(fingerprint);

        // Switching rooms releases the old membership through the normal
        // disconnect path (grace period included).
        if let Some((old_room, old_user)) = self.binding.take() {
            let last = self
                .ctx
                .registry
                .mark_offline(&old_room, old_user, self.conn_id);
            if last {
                spawn_grace(&self.ctx, old_room, old_user);
            }
        }

        match self
            .ctx
            .registry
            .join(
                self.conn_id,
                self.queue.clone(),
                &payload.room_key,
                name,
                payload.device,
                &fingerprint_hash,
                payload.password.as_deref(),
            )
            .await
        {
            Ok(outcome) => {
                self.binding = Some((payload.room_key.clone(), outcome.user.id));
                send_event(
                    stream,
                    &ServerEvent::MessageHistory { messages: outcome.history },
                )
                .await?;
                send_event(stream, &ServerEvent::UserList { users: outcome.users }).await
            }
            Err(ErrorCode::PasswordRequired) => {
                send_event(
                    stream,
                    &ServerEvent::PasswordRequired { room_key: payload.room_key },
                )
                .await
            }
            Err(code) => send_event(stream, &ServerEvent::error(code)).await,
        }
    }

    async fn handle_send_message(
        &mut self,
        stream: &mut ws::stream::DuplexStream,
        payload: SendMessagePayload,
    ) -> Result<(), ws::result::Error> {
        let Some((room_key, user_id)) = self.binding.clone() else {
            return send_event(stream, &ServerEvent::error(ErrorCode::UserNotInRoom)).await;
        };

        let body = match payload.kind {
            MessageKind::Text => {
                let Some(content) = payload.content else {
                    return send_event(stream, &ServerEvent::error(ErrorCode::InvalidPayload))
                        .await;
                };
                if !validate::valid_message_content(&content) {
                    return send_event(stream, &ServerEvent::error(ErrorCode::InvalidPayload))
                        .await;
                }
                MessageBody::Text(content)
            }
            MessageKind::File => {
                let Some(file_id) = payload.file_id else {
                    return send_event(
                        stream,
                        &ServerEvent::error(ErrorCode::InvalidFileReference),
                    )
                    .await;
                };
                let Some(stored) = self.ctx.store.get(file_id) else {
                    return send_event(
                        stream,
                        &ServerEvent::error(ErrorCode::InvalidFileReference),
                    )
                    .await;
                };
                if stored.info.room_key != room_key {
                    return send_event(
                        stream,
                        &ServerEvent::error(ErrorCode::InvalidFileReference),
                    )
                    .await;
                }
                if let Some(last_modified) = payload.last_modified
                    && !validate::valid_file_mtime(last_modified)
                {
                    return send_event(stream, &ServerEvent::error(ErrorCode::InvalidPayload))
                        .await;
                }
                MessageBody::File {
                    file_id,
                    info: FileMeta {
                        name: stored.info.original_name.clone(),
                        size: stored.info.size,
                        mime_type: stored.info.mime_type.clone(),
                        last_modified: payload.last_modified,
                    },
                    download_url: stored.info.download_url.clone(),
                }
            }
        };

        // The sender's connection is excluded from the room fan-out and
        // written to directly; waiting on our own full queue from inside its
        // consumer task would wedge the connection.
        match self
            .ctx
            .registry
            .post_message(&room_key, user_id, body, Some(self.conn_id))
            .await
        {
            Ok(message) => send_event(stream, &ServerEvent::Message(Box::new(message))).await,
            Err(code) => send_event(stream, &ServerEvent::error(code)).await,
        }
    }

    async fn relay(
        &mut self,
        stream: &mut ws::stream::DuplexStream,
        req: P2pRequest,
        build: impl FnOnce(Uuid, serde_json::Value) -> ServerEvent,
    ) -> Result<(), ws::result::Error> {
        let Some((room_key, user_id)) = &self.binding else {
            return send_event(stream, &ServerEvent::error(ErrorCode::UserNotInRoom)).await;
        };
        let event = build(*user_id, req.payload);
        match self.ctx.registry.relay_p2p(room_key, *user_id, req.to, event) {
            Ok(()) => Ok(()),
            Err(code) => send_event(stream, &ServerEvent::error(code)).await,
        }
    }

    /// Socket gone: drop the subscription now, remove the member only after
    /// the grace window passes without a rebind.
    fn disconnect(&mut self) {
        if let Some((room_key, user_id)) = self.binding.take() {
            let last = self.ctx.registry.mark_offline(&room_key, user_id, self.conn_id);
            if last {
                spawn_grace(&self.ctx, room_key, user_id);
            }
        }
    }
}

fn spawn_grace(ctx: &ConnectionCtx, room_key: String, user_id: Uuid) {
    let registry = ctx.registry.clone();
    let grace = Duration::from_secs(ctx.grace_secs);
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        registry.leave_if_disconnected(&room_key, user_id);
    });
}

fn admission_category(event: &ClientEvent) -> Option<Category> {
    match event {
        ClientEvent::JoinRoom(_) | ClientEvent::JoinRoomWithPassword(_) => {
            Some(Category::EventJoinRoom)
        }
        ClientEvent::LeaveRoom => Some(Category::EventLeaveRoom),
        ClientEvent::SendMessage(_) | ClientEvent::RecallMessage { .. } => {
            Some(Category::EventSendMessage)
        }
        ClientEvent::RequestUserList => Some(Category::EventUserList),
        ClientEvent::SetRoomPassword(_) | ClientEvent::PinRoom { .. } => {
            Some(Category::EventPasswordChange)
        }
        ClientEvent::ShareRoomLink => Some(Category::EventShareRoom),
        // pure relays; the registry bounds them to room members
        ClientEvent::P2pOffer(_) | ClientEvent::P2pAnswer(_) | ClientEvent::P2pIceCandidate(_) => {
            None
        }
    }
}
