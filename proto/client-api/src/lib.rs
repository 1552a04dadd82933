//! Client API protocol implementation for Iris signaling server.

use derive_more::{Display, From};
use serde::{de::Deserializer, Deserialize, Serialize};
use serde_json::Value;

/// ID of a conference `Room`.
///
/// Opaque and stable: the server never interprets its contents.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
pub struct RoomId(pub String);

/// ID of a `User` participating in a `Room`.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
pub struct UserId(pub String);

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Short user representation sent in [`ServerMsg::UsersList`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MemberInfo {
    pub id: UserId,
    pub name: String,
    #[serde(rename = "imgUrl")]
    pub img_url: String,
}

/// Body of a [`ServerMsg::UserJoined`] or [`ServerMsg::UserLeft`]
/// membership notification.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PresenceEvent {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "userPhoto")]
    pub user_photo: String,
    /// Originator of this notification, for self-send suppression on the
    /// receiving side.
    pub sender: UserId,
}

/// Chat message fanned out to every room member except its originator.
///
/// Everything but `text` is relayed verbatim: the server neither interprets
/// nor validates client-assigned ids, timestamps or author info.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChatMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    /// Originator user ID, stamped by the server on fan-out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserId>,
}

/// Directed WebRTC signaling frame (`offer`, `answer` or `ice-candidate`).
///
/// Delivered only to the `to` recipient, never broadcast.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SignalFrame {
    pub to: UserId,
    /// Authenticated identity of the peer this frame originates from.
    /// Stamped by the server on forward, never trusted from the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Kind of a directed signaling frame.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum SignalKind {
    #[display(fmt = "offer")]
    Offer,
    #[display(fmt = "answer")]
    Answer,
    #[display(fmt = "ice-candidate")]
    IceCandidate,
}

/// Message from `Client` to `Signaling Server`.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMsg {
    /// Chat message to be fanned out to all other members of the room.
    ChatMessage(ChatMessage),
    /// Signaling frame addressed to exactly one other member of the room.
    Signal(SignalKind, SignalFrame),
}

/// Message from `Signaling Server` to `Client`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMsg {
    /// ICE server URLs for WebRTC candidate gathering. Sent exactly once,
    /// as the first frame of a session.
    #[serde(rename = "iceServers")]
    IceServers {
        #[serde(rename = "iceServers")]
        ice_servers: Vec<String>,
    },

    /// Snapshot of members already present in the room. Sent exactly once,
    /// right after [`ServerMsg::IceServers`], and never lists the receiver
    /// itself.
    #[serde(rename = "users-list")]
    UsersList { users: Vec<MemberInfo> },

    /// Broadcast notification about a user having joined the room.
    #[serde(rename = "user-joined")]
    UserJoined(PresenceEvent),

    /// Broadcast notification about a user having left the room.
    #[serde(rename = "user-left")]
    UserLeft(PresenceEvent),

    /// Chat message fan-out. Always the flat shape on output, whatever
    /// shape the originator used.
    #[serde(rename = "chat-message")]
    ChatMessage(ChatMessage),

    /// Forwarded SDP offer.
    #[serde(rename = "offer")]
    Offer(SignalFrame),

    /// Forwarded SDP answer.
    #[serde(rename = "answer")]
    Answer(SignalFrame),

    /// Forwarded ICE candidate.
    #[serde(rename = "ice-candidate")]
    IceCandidate(SignalFrame),

    /// Terminal error description, sent right before the server closes the
    /// connection.
    #[serde(rename = "error")]
    Error { error: String },
}

impl ServerMsg {
    /// Returns the originator of this frame, if it carries one.
    ///
    /// Frames whose `sender` equals the local user ID are dropped by the
    /// receiving session instead of being written to the socket.
    #[must_use]
    pub fn sender(&self) -> Option<&UserId> {
        match self {
            Self::UserJoined(ev) | Self::UserLeft(ev) => Some(&ev.sender),
            Self::ChatMessage(msg) => msg.sender.as_ref(),
            Self::Offer(frame)
            | Self::Answer(frame)
            | Self::IceCandidate(frame) => frame.sender.as_ref(),
            Self::IceServers { .. }
            | Self::UsersList { .. }
            | Self::Error { .. } => None,
        }
    }

    /// Builds a forwarded signaling frame: stamps the authenticated `from`
    /// identity into the frame and wraps it into the [`ServerMsg`] variant
    /// matching its [`SignalKind`].
    #[must_use]
    pub fn forwarded_signal(
        kind: SignalKind,
        mut frame: SignalFrame,
        from: UserId,
    ) -> Self {
        frame.from = Some(from.clone());
        frame.sender = Some(from);
        match kind {
            SignalKind::Offer => Self::Offer(frame),
            SignalKind::Answer => Self::Answer(frame),
            SignalKind::IceCandidate => Self::IceCandidate(frame),
        }
    }

    /// Builds an [`ServerMsg::Error`] frame with the provided reason.
    #[must_use]
    pub fn error<S: Into<String>>(reason: S) -> Self {
        Self::Error {
            error: reason.into(),
        }
    }
}

impl<'de> Deserialize<'de> for ClientMsg {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as _;

        let ev = Value::deserialize(deserializer)?;
        let map = ev.as_object().ok_or_else(|| {
            D::Error::custom(format!(
                "unable to deserialize ClientMsg [{:?}]",
                &ev
            ))
        })?;
        let kind =
            map.get("type").and_then(Value::as_str).ok_or_else(|| {
                D::Error::custom("ClientMsg without `type` field")
            })?;

        match kind {
            "chat-message" => {
                // Both the flat shape and the nested `{message: {…}}` shape
                // are accepted on input.
                let body = map
                    .get("message")
                    .and_then(Value::as_object)
                    .unwrap_or(map);
                let text = body
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        D::Error::custom("chat-message without `text` field")
                    })?;
                Ok(Self::ChatMessage(ChatMessage {
                    id: body.get("id").cloned(),
                    text: text.to_owned(),
                    time: body.get("time").cloned(),
                    user: body.get("user").cloned(),
                    sender: None,
                }))
            }
            "offer" | "answer" | "ice-candidate" => {
                let to = map
                    .get("to")
                    .and_then(Value::as_str)
                    .filter(|to| !to.is_empty())
                    .ok_or_else(|| {
                        D::Error::custom(format!(
                            "{} without `to` field",
                            kind,
                        ))
                    })?;
                let sig = match kind {
                    "offer" => SignalKind::Offer,
                    "answer" => SignalKind::Answer,
                    _ => SignalKind::IceCandidate,
                };
                Ok(Self::Signal(
                    sig,
                    SignalFrame {
                        to: UserId::from(to),
                        from: None,
                        sender: None,
                        data: map.get("data").cloned(),
                    },
                ))
            }
            unknown => Err(D::Error::custom(format!(
                "unknown message type [{}]",
                unknown,
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn chat_message() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"chat-message","id":7,"text":"hi","time":"T","user":{"id":"u2","name":"N","photo":"P"}}"#,
        )
        .unwrap();

        let chat = match msg {
            ClientMsg::ChatMessage(chat) => chat,
            other => panic!("expected chat-message, got {:?}", other),
        };
        assert_eq!(chat.text, "hi");
        assert_eq!(chat.id, Some(json!(7)));
        assert_eq!(chat.time, Some(json!("T")));
        assert!(chat.sender.is_none());
    }

    #[test]
    fn nested_chat_message() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"chat-message","message":{"id":1,"text":"hello"}}"#,
        )
        .unwrap();

        match msg {
            ClientMsg::ChatMessage(chat) => assert_eq!(chat.text, "hello"),
            other => panic!("expected chat-message, got {:?}", other),
        }
    }

    #[test]
    fn chat_message_without_text_is_rejected() {
        assert!(serde_json::from_str::<ClientMsg>(
            r#"{"type":"chat-message","id":7}"#
        )
        .is_err());
    }

    #[test]
    fn signal() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"offer","to":"u2","data":{"sdp":"x"}}"#,
        )
        .unwrap();

        let (kind, frame) = match msg {
            ClientMsg::Signal(kind, frame) => (kind, frame),
            other => panic!("expected signal, got {:?}", other),
        };
        assert_eq!(kind, SignalKind::Offer);
        assert_eq!(frame.to, UserId::from("u2"));
        assert_eq!(frame.data, Some(json!({"sdp": "x"})));
        assert!(frame.from.is_none());
        assert!(frame.sender.is_none());
    }

    #[test]
    fn signal_requires_recipient() {
        assert!(serde_json::from_str::<ClientMsg>(
            r#"{"type":"ice-candidate","data":{}}"#
        )
        .is_err());
        assert!(serde_json::from_str::<ClientMsg>(
            r#"{"type":"answer","to":"","data":{}}"#
        )
        .is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMsg>(
            r#"{"type":"file-chunk","data":"x"}"#
        )
        .is_err());
        assert!(serde_json::from_str::<ClientMsg>(r#"[1,2,3]"#).is_err());
    }

    #[test]
    fn ice_servers() {
        let msg = ServerMsg::IceServers {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
        };
        #[cfg_attr(nightly, rustfmt::skip)]
        let msg_str =
            "{\
                \"type\":\"iceServers\",\
                \"iceServers\":[\"stun:stun.l.google.com:19302\"]\
            }";

        assert_eq!(msg_str, serde_json::to_string(&msg).unwrap());
        assert_eq!(
            msg,
            serde_json::from_str(&serde_json::to_string(&msg).unwrap())
                .unwrap(),
        );
    }

    #[test]
    fn user_joined() {
        let msg = ServerMsg::UserJoined(PresenceEvent {
            user_id: UserId::from("u2"),
            user_name: "N".to_owned(),
            user_photo: "P".to_owned(),
            sender: UserId::from("u2"),
        });
        #[cfg_attr(nightly, rustfmt::skip)]
        let msg_str =
            "{\
                \"type\":\"user-joined\",\
                \"userID\":\"u2\",\
                \"userName\":\"N\",\
                \"userPhoto\":\"P\",\
                \"sender\":\"u2\"\
            }";

        assert_eq!(msg_str, serde_json::to_string(&msg).unwrap());
        assert_eq!(msg.sender(), Some(&UserId::from("u2")));
    }

    #[test]
    fn forwarded_signal() {
        let frame = SignalFrame {
            to: UserId::from("u2"),
            from: None,
            sender: None,
            data: Some(json!({"sdp": "x"})),
        };
        let msg = ServerMsg::forwarded_signal(
            SignalKind::Offer,
            frame,
            UserId::from("u1"),
        );

        #[cfg_attr(nightly, rustfmt::skip)]
        let msg_str =
            "{\
                \"type\":\"offer\",\
                \"to\":\"u2\",\
                \"from\":\"u1\",\
                \"sender\":\"u1\",\
                \"data\":{\"sdp\":\"x\"}\
            }";
        assert_eq!(msg_str, serde_json::to_string(&msg).unwrap());
        assert_eq!(msg.sender(), Some(&UserId::from("u1")));
    }

    #[test]
    fn server_msg_round_trip() {
        let msg = ServerMsg::ChatMessage(ChatMessage {
            id: Some(json!(7)),
            text: "hi".to_owned(),
            time: Some(json!("T")),
            user: Some(json!({"id": "u2", "name": "N", "photo": "P"})),
            sender: Some(UserId::from("u2")),
        });

        assert_eq!(
            msg,
            serde_json::from_str(&serde_json::to_string(&msg).unwrap())
                .unwrap(),
        );
    }
}
