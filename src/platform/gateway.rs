use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message as Frame};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::constants::GATEWAY_INTENTS;

use super::jitter;
use super::{ApplicationId, Author, ChannelId, Emoji, GuildId, InteractionId, MessageId, UserId};

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

// interaction type: APPLICATION_COMMAND
const INTERACTION_APPLICATION_COMMAND: u8 = 2;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub type GatewayResult<T> = core::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Ws(#[from] tungstenite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("expected op {expected}, received op {received}")]
    UnexpectedOp { expected: u8, received: u8 },

    #[error("hello carried no heartbeat interval")]
    MissingHeartbeatInterval,

    #[error("no heartbeat ack since the previous beat")]
    ZombieConnection,

    #[error("gateway requested a reconnect")]
    ReconnectRequested,

    #[error("session invalidated (resumable: {0})")]
    InvalidSession(bool),

    #[error("socket closed (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },
}

impl GatewayError {
    /// Close codes after which reconnecting with the same token and intents cannot succeed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::Closed {
                code: Some(4004 | 4010..=4014),
                ..
            }
        )
    }
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReactionAdd {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub emoji: Emoji,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInteraction {
    pub id: InteractionId,
    pub token: String,
    pub name: String,
    pub user: Author,
}

/// Dispatches the bot reacts to. Everything else the gateway sends is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Ready {
        application_id: ApplicationId,
        user_id: UserId,
        session_id: String,
    },
    ReactionAdd(ReactionAdd),
    Command(CommandInteraction),
}

#[derive(Debug, Deserialize)]
struct ReadyData {
    user: Author,
    session_id: String,
    application: ApplicationRef,
}

#[derive(Debug, Deserialize)]
struct ApplicationRef {
    id: ApplicationId,
}

#[derive(Debug, Deserialize)]
struct InteractionData {
    id: InteractionId,
    token: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    data: Option<CommandData>,
    #[serde(default)]
    member: Option<Member>,
    #[serde(default)]
    user: Option<Author>,
}

#[derive(Debug, Deserialize)]
struct CommandData {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Member {
    user: Author,
}

/// Decodes the body of a dispatch (op 0) frame of type `t`
pub fn decode_dispatch(t: &str, d: Value) -> GatewayResult<Option<GatewayEvent>> {
    let event = match t {
        "READY" => {
            let ready: ReadyData = serde_json::from_value(d)?;
            Some(GatewayEvent::Ready {
                application_id: ready.application.id,
                user_id: ready.user.id,
                session_id: ready.session_id,
            })
        }

        "MESSAGE_REACTION_ADD" => Some(GatewayEvent::ReactionAdd(serde_json::from_value(d)?)),

        "INTERACTION_CREATE" => {
            let interaction: InteractionData = serde_json::from_value(d)?;
            // guild invocations carry `member.user`, DMs carry `user`
            let user = interaction.member.map(|m| m.user).or(interaction.user);

            match (interaction.kind, interaction.data, user) {
                (INTERACTION_APPLICATION_COMMAND, Some(data), Some(user)) => {
                    Some(GatewayEvent::Command(CommandInteraction {
                        id: interaction.id,
                        token: interaction.token,
                        name: data.name,
                        user,
                    }))
                }
                _ => None,
            }
        }

        _ => None,
    };

    Ok(event)
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": env!("CARGO_PKG_NAME"),
                "device": env!("CARGO_PKG_NAME"),
            },
        },
    })
}

fn heartbeat_payload(seq: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": seq })
}

fn close_error(frame: Option<tungstenite::protocol::CloseFrame>) -> GatewayError {
    match frame {
        Some(frame) => GatewayError::Closed {
            code: Some(u16::from(frame.code)),
            reason: frame.reason.as_str().to_string(),
        },
        None => GatewayError::Closed {
            code: None,
            reason: String::new(),
        },
    }
}

/// Runs one gateway session: Hello, Identify, then heartbeats and dispatch forwarding until the
/// connection ends. Returns `Ok` only when cancelled or when the event receiver is gone.
#[instrument(skip(token, events, cancel))]
pub async fn run_session(
    url: &str,
    token: &str,
    events: &UnboundedSender<GatewayEvent>,
    cancel: &CancellationToken,
) -> GatewayResult<()> {
    let (stream, _) = connect_async(url).await?;
    let (mut writer, mut reader) = stream.split();

    let hello = loop {
        match reader.next().await {
            Some(Ok(Frame::Text(text))) => {
                break serde_json::from_str::<GatewayPayload>(text.as_str())?;
            }
            Some(Ok(Frame::Close(frame))) => return Err(close_error(frame)),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(close_error(None)),
        }
    };

    if hello.op != OP_HELLO {
        return Err(GatewayError::UnexpectedOp {
            expected: OP_HELLO,
            received: hello.op,
        });
    }

    let interval = hello
        .d
        .get("heartbeat_interval")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .ok_or(GatewayError::MissingHeartbeatInterval)?;

    writer
        .send(Frame::text(identify_payload(token).to_string()))
        .await?;

    let first = jitter::first_heartbeat(interval);
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        first_ms = first.as_millis() as u64,
        "identified"
    );

    let mut heartbeat = tokio::time::interval_at(Instant::now() + first, interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut seq: Option<u64> = None;
    let mut acked = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("gateway session cancelled");
                if let Err(e) = writer.send(Frame::Close(None)).await {
                    tracing::debug!(error = ?e, "close frame not sent");
                }
                return Ok(());
            }

            _ = heartbeat.tick() => {
                if !acked {
                    return Err(GatewayError::ZombieConnection);
                }

                acked = false;
                writer.send(Frame::text(heartbeat_payload(seq).to_string())).await?;
                tracing::trace!(seq = ?seq, "heartbeat");
            }

            frame = reader.next() => {
                let payload = match frame {
                    Some(Ok(Frame::Text(text))) => match serde_json::from_str::<GatewayPayload>(text.as_str()) {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(error = ?e, "undecodable gateway frame");
                            continue;
                        }
                    },
                    Some(Ok(Frame::Close(frame))) => return Err(close_error(frame)),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(close_error(None)),
                };

                if let Some(s) = payload.s {
                    seq = Some(s);
                }

                match payload.op {
                    OP_DISPATCH => {
                        let Some(t) = payload.t else { continue };

                        match decode_dispatch(&t, payload.d) {
                            Ok(Some(event)) => {
                                if events.send(event).is_err() {
                                    tracing::info!("event receiver dropped; ending session");
                                    return Ok(());
                                }
                            }
                            Ok(None) => tracing::trace!(event = %t, "dispatch ignored"),
                            Err(e) => tracing::warn!(event = %t, error = ?e, "malformed dispatch"),
                        }
                    }

                    OP_HEARTBEAT => {
                        writer.send(Frame::text(heartbeat_payload(seq).to_string())).await?;
                    }

                    OP_HEARTBEAT_ACK => acked = true,

                    OP_RECONNECT => return Err(GatewayError::ReconnectRequested),

                    OP_INVALID_SESSION => {
                        return Err(GatewayError::InvalidSession(payload.d.as_bool().unwrap_or(false)));
                    }

                    op => tracing::debug!(op, "unhandled gateway op"),
                }
            }
        }
    }
}

/// Keeps a gateway session alive, reconnecting after a fixed delay, until `cancel` fires or the
/// event receiver is dropped. Fatal close codes end the loop with an error.
pub async fn run(
    url: String,
    token: String,
    events: UnboundedSender<GatewayEvent>,
    cancel: CancellationToken,
) -> GatewayResult<()> {
    loop {
        match run_session(&url, &token, &events, &cancel).await {
            Ok(()) => break,
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, "gateway refused the session");
                return Err(e);
            }
            Err(e) => tracing::warn!(error = %e, delay_s = RECONNECT_DELAY.as_secs(), "gateway session ended; reconnecting"),
        }

        if events.is_closed() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }

    tracing::info!("gateway stopped");
    Ok(())
}

#[cfg(test)]
mod test {
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;
    use crate::platform::model::EmojiId;

    #[test]
    fn ready_is_decoded() {
        let event = decode_dispatch(
            "READY",
            json!({
                "v": 10,
                "user": { "id": "10", "username": "prestige", "bot": true },
                "session_id": "abc",
                "guilds": [],
                "application": { "id": "77", "flags": 0 }
            }),
        )
        .unwrap();

        assert_eq!(
            event,
            Some(GatewayEvent::Ready {
                application_id: ApplicationId(77),
                user_id: UserId(10),
                session_id: "abc".to_string(),
            })
        );
    }

    #[test]
    fn reactions_are_decoded_for_both_emoji_kinds() {
        let custom = decode_dispatch(
            "MESSAGE_REACTION_ADD",
            json!({
                "user_id": "20",
                "channel_id": "100",
                "message_id": "555",
                "guild_id": "1",
                "emoji": { "id": "99", "name": "x_" }
            }),
        )
        .unwrap();

        let Some(GatewayEvent::ReactionAdd(custom)) = custom else {
            panic!("expected a reaction");
        };
        assert_eq!(custom.user_id, UserId(20));
        assert_eq!(custom.message_id, MessageId(555));
        assert_eq!(custom.emoji, Emoji::custom("x_", EmojiId(99)));

        let unicode = decode_dispatch(
            "MESSAGE_REACTION_ADD",
            json!({
                "user_id": "20",
                "channel_id": "100",
                "message_id": "556",
                "emoji": { "id": null, "name": "7\u{fe0f}\u{20e3}" }
            }),
        )
        .unwrap();

        let Some(GatewayEvent::ReactionAdd(unicode)) = unicode else {
            panic!("expected a reaction");
        };
        assert_eq!(unicode.guild_id, None);
        assert_eq!(unicode.emoji.name(), "7\u{fe0f}\u{20e3}");
    }

    #[test]
    fn commands_take_the_invoker_from_member_or_user() {
        let guild = decode_dispatch(
            "INTERACTION_CREATE",
            json!({
                "id": "900",
                "application_id": "77",
                "type": 2,
                "token": "tok",
                "data": { "id": "5", "name": "get_points_history", "type": 1 },
                "member": { "user": { "id": "42", "username": "artist" }, "roles": [] }
            }),
        )
        .unwrap();

        assert_eq!(
            guild,
            Some(GatewayEvent::Command(CommandInteraction {
                id: InteractionId(900),
                token: "tok".to_string(),
                name: "get_points_history".to_string(),
                user: Author {
                    id: UserId(42),
                    username: "artist".to_string(),
                },
            }))
        );

        let direct = decode_dispatch(
            "INTERACTION_CREATE",
            json!({
                "id": "901",
                "type": 2,
                "token": "tok",
                "data": { "name": "resync_missed_points" },
                "user": { "id": "20", "username": "rater" }
            }),
        )
        .unwrap();

        assert!(matches!(
            direct,
            Some(GatewayEvent::Command(CommandInteraction { ref user, .. })) if user.id == UserId(20)
        ));
    }

    #[test]
    fn non_command_interactions_and_other_events_are_ignored() {
        let ping = decode_dispatch(
            "INTERACTION_CREATE",
            json!({ "id": "1", "type": 1, "token": "tok" }),
        )
        .unwrap();
        assert_eq!(ping, None);

        let other = decode_dispatch("GUILD_CREATE", json!({ "id": "1" })).unwrap();
        assert_eq!(other, None);
    }

    #[test]
    fn malformed_dispatch_is_an_error() {
        let err = decode_dispatch("MESSAGE_REACTION_ADD", json!({ "user_id": "x" })).unwrap_err();
        assert!(matches!(err, GatewayError::Json(_)));
    }

    #[test]
    fn identify_carries_token_and_intents() {
        let identify = identify_payload("tok");
        assert_eq!(identify["op"], 2);
        assert_eq!(identify["d"]["token"], "tok");
        assert_eq!(identify["d"]["intents"], GATEWAY_INTENTS);

        assert_eq!(heartbeat_payload(None), json!({ "op": 1, "d": null }));
        assert_eq!(heartbeat_payload(Some(9)), json!({ "op": 1, "d": 9 }));
    }

    #[test]
    fn auth_failures_are_fatal() {
        let auth = GatewayError::Closed {
            code: Some(4004),
            reason: "Authentication failed.".to_string(),
        };
        assert!(auth.is_fatal());
        assert!(!GatewayError::ReconnectRequested.is_fatal());
        assert!(
            !GatewayError::Closed {
                code: Some(4000),
                reason: String::new()
            }
            .is_fatal()
        );
    }

    #[tokio::test]
    async fn session_identifies_and_forwards_dispatches() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let hello = json!({ "op": 10, "d": { "heartbeat_interval": 45000 } });
            ws.send(Frame::text(hello.to_string())).await.unwrap();

            // skip any early heartbeat
            let identify = loop {
                let frame = ws.next().await.unwrap().unwrap();
                let value: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
                if value["op"] == 2 {
                    break value;
                }
            };

            let ready = json!({
                "op": 0,
                "s": 1,
                "t": "READY",
                "d": {
                    "user": { "id": "10", "username": "prestige" },
                    "session_id": "s1",
                    "application": { "id": "77" }
                }
            });
            ws.send(Frame::text(ready.to_string())).await.unwrap();
            ws.send(Frame::text(json!({ "op": 7, "d": null }).to_string()))
                .await
                .unwrap();

            identify
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = run_session(&url, "tok", &tx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ReconnectRequested));

        let identify = server.await.unwrap();
        assert_eq!(identify["d"]["token"], "tok");

        assert!(matches!(
            rx.recv().await,
            Some(GatewayEvent::Ready { user_id: UserId(10), .. })
        ));
    }

    #[tokio::test]
    async fn session_ends_quietly_when_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let cancel = CancellationToken::new();

        let server_cancel = cancel.clone();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let hello = json!({ "op": 10, "d": { "heartbeat_interval": 45000 } });
            ws.send(Frame::text(hello.to_string())).await.unwrap();
            server_cancel.cancel();
            // drain until the client closes
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        run_session(&url, "tok", &tx, &cancel).await.unwrap();
        server.await.unwrap();
    }
}
