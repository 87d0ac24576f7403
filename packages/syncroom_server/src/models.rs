//! Wire events exchanged with connected clients.
//!
//! Every frame is a JSON object of the form `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::AsRefStr;

use crate::{ConnId, RoomId, sessions::Session};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InboundEvent {
    RegisterUser(Map<String, Value>),
    Heartbeat(Map<String, Value>),
    ClientData(ClientDataPayload),
    CreateRoom(Value),
    JoinRoom(JoinRoomPayload),
    SyncAction(SyncAction),
    RoomChatMessage(String),
    LeaveRoom,
    AdminLogin(String),
    AdminCommand(AdminCommandPayload),
}

impl std::fmt::Display for InboundEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Self-published profile fields that are replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientDataKind {
    Avatar,
    Status,
    NowPlaying,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDataPayload {
    #[serde(rename = "type")]
    pub kind: ClientDataKind,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_id: RoomId,
    #[serde(default)]
    pub user_metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncActionKind {
    Play,
    Pause,
    Seek,
    Url,
    Chat,
}

/// A playback action mirrored from the room leader, or a chat line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAction {
    #[serde(rename = "type")]
    pub kind: SyncActionKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCommandPayload {
    pub target_id: ConnId,
    pub command: ModeratorCommand,
}

/// Moderation directives an admin can issue to a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModeratorCommand {
    Notice { text: String },
    Kick,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: ConnId,
    pub user_name: String,
    pub text: String,
}

/// A room member resolved against the session registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomMember {
    Session(Box<Session>),
    Id(ConnId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreatedPayload {
    pub room_id: RoomId,
    pub is_leader: bool,
    pub members: Vec<RoomMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinedPayload {
    pub room_id: RoomId,
    pub is_leader: bool,
    pub members: Vec<RoomMember>,
    pub current_media: Value,
    pub is_playing: bool,
    pub current_time: f64,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUserPayload {
    pub user_id: ConnId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderChangedPayload {
    pub new_leader_id: ConnId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, AsRefStr)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutboundEvent {
    SessionsList(Vec<Session>),
    SessionUpdate(Session),
    RoomCreated(RoomCreatedPayload),
    RoomJoined(RoomJoinedPayload),
    RoomUserJoined(RoomUserPayload),
    RoomUserLeft(RoomUserPayload),
    SyncUpdate(SyncAction),
    RoomMessage(ChatMessage),
    RoomLeaderChanged(LeaderChangedPayload),
    YouAreLeader,
    AdminAuthSuccess(bool),
    AdminAuthError(String),
    ServerCommand(ModeratorCommand),
    Error(String),
}

impl std::fmt::Display for OutboundEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test_log::test]
    fn parses_join_room_frame() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "join_room",
            "data": {"roomId": "123456", "userMetadata": {"name": "bob"}},
        }))
        .unwrap();

        assert_eq!(
            event,
            InboundEvent::JoinRoom(JoinRoomPayload {
                room_id: "123456".to_string(),
                user_metadata: json!({"name": "bob"}),
            })
        );
    }

    #[test_log::test]
    fn parses_leave_room_without_data() {
        let event: InboundEvent = serde_json::from_str(r#"{"event":"leave_room"}"#).unwrap();

        assert_eq!(event, InboundEvent::LeaveRoom);
    }

    #[test_log::test]
    fn unrecognized_client_data_kind_parses_as_unknown() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "client_data",
            "data": {"type": "something_else", "data": 1},
        }))
        .unwrap();

        assert!(matches!(
            event,
            InboundEvent::ClientData(ClientDataPayload {
                kind: ClientDataKind::Unknown,
                ..
            })
        ));
    }

    #[test_log::test]
    fn rejects_unknown_sync_action_kind() {
        let result = serde_json::from_value::<InboundEvent>(json!({
            "event": "sync_action",
            "data": {"type": "REWIND", "payload": 3},
        }));

        assert!(result.is_err());
    }

    #[test_log::test]
    fn serializes_leader_changed_with_camel_case_keys() {
        let value = serde_json::to_value(OutboundEvent::RoomLeaderChanged(
            LeaderChangedPayload { new_leader_id: 7 },
        ))
        .unwrap();

        assert_eq!(
            value,
            json!({"event": "room_leader_changed", "data": {"newLeaderId": 7}})
        );
    }

    #[test_log::test]
    fn serializes_moderator_notice() {
        let value = serde_json::to_value(OutboundEvent::ServerCommand(ModeratorCommand::Notice {
            text: "be nice".to_string(),
        }))
        .unwrap();

        assert_eq!(
            value,
            json!({
                "event": "server_command",
                "data": {"type": "NOTICE", "payload": {"text": "be nice"}},
            })
        );
    }
}
