//! Watch party rooms: membership, leader election, mirrored playback and chat.
//!
//! Every room has exactly one leader, who must be a member. The leader is the only member allowed
//! to change playback state. When the leader leaves, the earliest-joined remaining member takes
//! over. A room is destroyed the moment its last member leaves.

use std::collections::{BTreeMap, VecDeque};

use rand::Rng as _;
use serde_json::Value;
use thiserror::Error;

use crate::{
    ConnId, RoomId,
    channel::Channel,
    models::{
        ChatMessage, LeaderChangedPayload, OutboundEvent, RoomCreatedPayload, RoomJoinedPayload,
        RoomMember, RoomUserPayload, SyncAction, SyncActionKind,
    },
    sessions::SessionRegistry,
};

pub const MAX_MEMBERS: usize = 8;
pub const MAX_MESSAGES: usize = 50;
pub const DEFAULT_USER_NAME: &str = "Guest";

const ROOM_ID_DIGITS: u32 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("Room {0} not found")]
    NotFound(RoomId),
    #[error("Room {0} is full")]
    Full(RoomId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub leader_id: ConnId,
    /// Members in the order they joined.
    pub members: Vec<ConnId>,
    pub current_media: Value,
    pub is_playing: bool,
    pub current_time: f64,
    pub messages: VecDeque<ChatMessage>,
}

impl Room {
    fn new(id: RoomId, creator: ConnId, media: Value) -> Self {
        Self {
            id,
            leader_id: creator,
            members: vec![creator],
            current_media: media,
            is_playing: false,
            current_time: 0.0,
            messages: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn is_leader(&self, id: ConnId) -> bool {
        self.leader_id == id
    }

    fn resolve_members(&self, sessions: &SessionRegistry) -> Vec<RoomMember> {
        self.members
            .iter()
            .map(|id| {
                sessions.get(*id).map_or(RoomMember::Id(*id), |session| {
                    RoomMember::Session(Box::new(session.clone()))
                })
            })
            .collect()
    }

    fn apply(&mut self, action: &SyncAction) {
        match action.kind {
            SyncActionKind::Play | SyncActionKind::Pause => {
                self.is_playing = action.kind == SyncActionKind::Play;
                if let Some(time) = action.payload.as_f64() {
                    self.current_time = time;
                }
            }
            SyncActionKind::Seek => {
                if let Some(time) = action.payload.as_f64() {
                    self.current_time = time;
                }
            }
            SyncActionKind::Url => {
                self.current_media = action.payload.clone();
            }
            SyncActionKind::Chat => {}
        }
    }
}

#[derive(Debug, Default)]
pub struct RoomManager {
    rooms: BTreeMap<RoomId, Room>,
    /// Reverse index of which room each connection is in.
    membership: BTreeMap<ConnId, RoomId>,
    last_message_id: i64,
}

impl RoomManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    #[must_use]
    pub fn room_of(&self, id: ConnId) -> Option<&Room> {
        self.membership.get(&id).and_then(|x| self.rooms.get(x))
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn generate_room_id(&self) -> RoomId {
        let mut rng = rand::rng();
        let low = 10u32.pow(ROOM_ID_DIGITS - 1);
        let high = 10u32.pow(ROOM_ID_DIGITS);
        loop {
            let id = rng.random_range(low..high).to_string();
            if !self.rooms.contains_key(&id) {
                return id;
            }
            log::debug!("generate_room_id: collision on {id}, retrying");
        }
    }

    pub fn create_room(
        &mut self,
        creator: ConnId,
        media: Value,
        channel: &mut Channel,
        sessions: &SessionRegistry,
    ) -> RoomId {
        self.leave_room(creator, channel, sessions);

        let room_id = self.generate_room_id();
        log::info!("Room {room_id} created by {creator}");

        let room = Room::new(room_id.clone(), creator, media);
        channel.join_group(creator, &room_id);
        channel.send(
            creator,
            &OutboundEvent::RoomCreated(RoomCreatedPayload {
                room_id: room_id.clone(),
                is_leader: true,
                members: room.resolve_members(sessions),
            }),
        );

        self.membership.insert(creator, room_id.clone());
        self.rooms.insert(room_id.clone(), room);

        room_id
    }

    /// # Errors
    ///
    /// * [`RoomError::NotFound`] if no room has `room_id`
    /// * [`RoomError::Full`] if the room already has [`MAX_MEMBERS`] members
    pub fn join_room(
        &mut self,
        id: ConnId,
        room_id: &str,
        user_metadata: Value,
        channel: &mut Channel,
        sessions: &SessionRegistry,
    ) -> Result<(), RoomError> {
        if self.membership.get(&id).is_some_and(|x| x == room_id) {
            log::debug!("join_room: {id} already in room {room_id}");
            return Ok(());
        }
        let room = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        if room.members.len() >= MAX_MEMBERS {
            return Err(RoomError::Full(room_id.to_string()));
        }

        self.leave_room(id, channel, sessions);

        let Some(room) = self.rooms.get_mut(room_id) else {
            return Err(RoomError::NotFound(room_id.to_string()));
        };
        room.members.push(id);
        self.membership.insert(id, room_id.to_string());
        log::info!("{id} joined room {room_id} ({} members)", room.members.len());

        channel.send(
            id,
            &OutboundEvent::RoomJoined(RoomJoinedPayload {
                room_id: room.id.clone(),
                is_leader: room.is_leader(id),
                members: room.resolve_members(sessions),
                current_media: room.current_media.clone(),
                is_playing: room.is_playing,
                current_time: room.current_time,
                messages: room.messages.iter().cloned().collect(),
            }),
        );

        let user = sessions
            .get(id)
            .and_then(|x| serde_json::to_value(x).ok())
            .or_else(|| Some(user_metadata).filter(|x| !x.is_null()));
        channel.send_group(
            room_id,
            &OutboundEvent::RoomUserJoined(RoomUserPayload { user_id: id, user }),
        );
        channel.join_group(id, room_id);

        Ok(())
    }

    /// Applies a leader's playback action and mirrors it to the rest of the room.
    ///
    /// `CHAT` is accepted from any member. Other kinds from non-leaders are dropped.
    pub fn dispatch_sync_action(
        &mut self,
        id: ConnId,
        action: SyncAction,
        channel: &Channel,
        sessions: &SessionRegistry,
        now: i64,
    ) {
        if action.kind == SyncActionKind::Chat {
            let text = match &action.payload {
                Value::String(text) => text.clone(),
                Value::Object(map) => map
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                other => other.to_string(),
            };
            self.post_chat(id, text, channel, sessions, now);
            return;
        }

        let Some(room) = self
            .membership
            .get(&id)
            .and_then(|room_id| self.rooms.get_mut(room_id))
        else {
            log::trace!("dispatch_sync_action: {id} is not in a room");
            return;
        };
        if !room.is_leader(id) {
            log::debug!(
                "dispatch_sync_action: dropping {:?} from non-leader {id} in room {}",
                action.kind,
                room.id
            );
            return;
        }

        room.apply(&action);

        let event = OutboundEvent::SyncUpdate(action);
        for member in room.members.iter().filter(|x| **x != id) {
            channel.send(*member, &event);
        }
    }

    pub fn post_chat(
        &mut self,
        id: ConnId,
        text: String,
        channel: &Channel,
        sessions: &SessionRegistry,
        now: i64,
    ) {
        let Some(room) = self
            .membership
            .get(&id)
            .and_then(|room_id| self.rooms.get_mut(room_id))
        else {
            log::trace!("post_chat: {id} is not in a room");
            return;
        };

        self.last_message_id = now.max(self.last_message_id + 1);
        let message = ChatMessage {
            id: self.last_message_id,
            user_id: id,
            user_name: sessions
                .get(id)
                .and_then(|x| x.display_name())
                .unwrap_or(DEFAULT_USER_NAME)
                .to_string(),
            text,
        };

        room.messages.push_back(message.clone());
        while room.messages.len() > MAX_MESSAGES {
            room.messages.pop_front();
        }

        channel.send_group(&room.id, &OutboundEvent::RoomMessage(message));
    }

    pub fn leave_room(&mut self, id: ConnId, channel: &mut Channel, sessions: &SessionRegistry) {
        let Some(room_id) = self.membership.remove(&id) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            log::error!("leave_room: membership index points at missing room {room_id}");
            return;
        };

        room.members.retain(|x| *x != id);
        channel.leave_group(id, &room_id);
        log::info!("{id} left room {room_id} ({} members)", room.members.len());

        let Some(&successor) = room.members.first() else {
            log::info!("Room {room_id} destroyed");
            self.rooms.remove(&room_id);
            return;
        };

        let user = sessions.get(id).and_then(|x| serde_json::to_value(x).ok());
        channel.send_group(
            &room_id,
            &OutboundEvent::RoomUserLeft(RoomUserPayload { user_id: id, user }),
        );

        if room.leader_id == id {
            room.leader_id = successor;
            log::info!("Room {room_id} leader is now {successor}");
            channel.send_group(
                &room_id,
                &OutboundEvent::RoomLeaderChanged(LeaderChangedPayload {
                    new_leader_id: successor,
                }),
            );
            channel.send(successor, &OutboundEvent::YouAreLeader);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};
    use tokio::sync::mpsc;

    use super::*;
    use crate::{Msg, test_utils::received};

    struct Harness {
        rooms: RoomManager,
        channel: Channel,
        sessions: SessionRegistry,
        receivers: BTreeMap<ConnId, mpsc::UnboundedReceiver<Msg>>,
    }

    impl Harness {
        fn new(connections: &[ConnId]) -> Self {
            let mut channel = Channel::new();
            let mut receivers = BTreeMap::new();
            for id in connections {
                let (tx, rx) = mpsc::unbounded_channel();
                channel.connect(*id, tx);
                receivers.insert(*id, rx);
            }
            Self {
                rooms: RoomManager::new(),
                channel,
                sessions: SessionRegistry::new(),
                receivers,
            }
        }

        fn create(&mut self, id: ConnId) -> RoomId {
            self.rooms
                .create_room(id, json!({"title": "film"}), &mut self.channel, &self.sessions)
        }

        fn join(&mut self, id: ConnId, room_id: &str) -> Result<(), RoomError> {
            self.rooms
                .join_room(id, room_id, Value::Null, &mut self.channel, &self.sessions)
        }

        fn leave(&mut self, id: ConnId) {
            self.rooms.leave_room(id, &mut self.channel, &self.sessions);
        }

        fn sync(&mut self, id: ConnId, kind: SyncActionKind, payload: Value) {
            self.rooms.dispatch_sync_action(
                id,
                SyncAction { kind, payload },
                &self.channel,
                &self.sessions,
                1_000,
            );
        }

        fn events(&mut self, id: ConnId) -> Vec<OutboundEvent> {
            received(self.receivers.get_mut(&id).unwrap())
        }

        fn drain(&mut self) {
            for rx in self.receivers.values_mut() {
                received(rx);
            }
        }
    }

    mod create_room {
        use pretty_assertions::assert_eq;

        use super::*;

        #[test_log::test]
        fn creator_is_sole_member_and_leader() {
            let mut h = Harness::new(&[1]);

            let room_id = h.create(1);

            let room = h.rooms.get(&room_id).unwrap();
            assert_eq!(room.members, vec![1]);
            assert_eq!(room.leader_id, 1);
            assert!(!room.is_playing);
            assert_eq!(room.current_time, 0.0);
            assert_eq!(room_id.len(), 6);
            assert!(room_id.chars().all(|x| x.is_ascii_digit()));
            assert_eq!(
                h.events(1),
                vec![OutboundEvent::RoomCreated(RoomCreatedPayload {
                    room_id,
                    is_leader: true,
                    members: vec![RoomMember::Id(1)],
                })]
            );
        }

        #[test_log::test]
        fn members_resolve_against_sessions() {
            let mut h = Harness::new(&[1]);
            let mut fields = Map::new();
            fields.insert("name".to_string(), json!("ann"));
            h.sessions.register(1, fields, 0);

            h.create(1);

            let events = h.events(1);
            let OutboundEvent::RoomCreated(payload) = &events[0] else {
                panic!("expected room_created, got {events:?}");
            };
            assert_eq!(
                payload.members,
                vec![RoomMember::Session(Box::new(h.sessions.get(1).unwrap().clone()))]
            );
        }

        #[test_log::test]
        fn creating_again_leaves_the_previous_room() {
            let mut h = Harness::new(&[1]);
            let first = h.create(1);

            let second = h.create(1);

            assert_ne!(first, second);
            assert!(h.rooms.get(&first).is_none());
            assert_eq!(h.rooms.room_of(1).unwrap().id, second);
        }
    }

    mod join_room {
        use pretty_assertions::assert_eq;

        use super::*;

        #[test_log::test]
        fn unknown_room_is_not_found() {
            let mut h = Harness::new(&[1]);

            assert_eq!(
                h.join(1, "000000"),
                Err(RoomError::NotFound("000000".to_string()))
            );
            assert!(h.rooms.room_of(1).is_none());
        }

        #[test_log::test]
        fn full_room_rejects_ninth_member() {
            let ids = (1..=9).collect::<Vec<_>>();
            let mut h = Harness::new(&ids);
            let room_id = h.create(1);
            for id in 2..=8 {
                h.join(id, &room_id).unwrap();
            }

            let result = h.join(9, &room_id);

            assert_eq!(result, Err(RoomError::Full(room_id.clone())));
            let room = h.rooms.get(&room_id).unwrap();
            assert_eq!(room.members.len(), MAX_MEMBERS);
            assert!(!room.members.contains(&9));
            assert!(h.rooms.room_of(9).is_none());
        }

        #[test_log::test]
        fn joiner_gets_snapshot_and_others_get_notice() {
            let mut h = Harness::new(&[1, 2]);
            let room_id = h.create(1);
            h.sync(1, SyncActionKind::Seek, json!(42.5));
            h.drain();

            h.join(2, &room_id).unwrap();

            assert_eq!(
                h.events(2),
                vec![OutboundEvent::RoomJoined(RoomJoinedPayload {
                    room_id: room_id.clone(),
                    is_leader: false,
                    members: vec![RoomMember::Id(1), RoomMember::Id(2)],
                    current_media: json!({"title": "film"}),
                    is_playing: false,
                    current_time: 42.5,
                    messages: vec![],
                })]
            );
            assert_eq!(
                h.events(1),
                vec![OutboundEvent::RoomUserJoined(RoomUserPayload {
                    user_id: 2,
                    user: None,
                })]
            );
        }
    }

    mod sync_action {
        use pretty_assertions::assert_eq;

        use super::*;

        #[test_log::test]
        fn leader_play_is_mirrored_to_everyone_but_the_sender() {
            let mut h = Harness::new(&[1, 2, 3]);
            let room_id = h.create(1);
            h.join(2, &room_id).unwrap();
            h.join(3, &room_id).unwrap();
            h.drain();

            h.sync(1, SyncActionKind::Play, Value::Null);

            assert!(h.rooms.get(&room_id).unwrap().is_playing);
            let expected = vec![OutboundEvent::SyncUpdate(SyncAction {
                kind: SyncActionKind::Play,
                payload: Value::Null,
            })];
            assert_eq!(h.events(2), expected);
            assert_eq!(h.events(3), expected);
            assert_eq!(h.events(1), vec![]);
        }

        #[test_log::test]
        fn non_leader_seek_is_dropped_without_broadcast() {
            let mut h = Harness::new(&[1, 2]);
            let room_id = h.create(1);
            h.join(2, &room_id).unwrap();
            h.drain();

            h.sync(2, SyncActionKind::Seek, json!(120));

            assert_eq!(h.rooms.get(&room_id).unwrap().current_time, 0.0);
            assert_eq!(h.events(1), vec![]);
            assert_eq!(h.events(2), vec![]);
        }

        #[test_log::test]
        fn leader_url_replaces_media() {
            let mut h = Harness::new(&[1]);
            let room_id = h.create(1);

            h.sync(1, SyncActionKind::Url, json!({"url": "https://example.com/b.mp4"}));

            assert_eq!(
                h.rooms.get(&room_id).unwrap().current_media,
                json!({"url": "https://example.com/b.mp4"})
            );
        }

        #[test_log::test]
        fn chat_is_accepted_from_non_leaders() {
            let mut h = Harness::new(&[1, 2]);
            let room_id = h.create(1);
            h.join(2, &room_id).unwrap();
            h.drain();

            h.sync(2, SyncActionKind::Chat, json!("hello"));

            let room = h.rooms.get(&room_id).unwrap();
            assert_eq!(room.messages.len(), 1);
            assert_eq!(room.messages[0].text, "hello");
            assert_eq!(h.events(1).len(), 1);
            assert_eq!(h.events(2).len(), 1);
        }

        #[test_log::test]
        fn action_without_room_is_ignored() {
            let mut h = Harness::new(&[1]);

            h.sync(1, SyncActionKind::Play, Value::Null);

            assert_eq!(h.rooms.room_count(), 0);
            assert_eq!(h.events(1), vec![]);
        }
    }

    mod post_chat {
        use pretty_assertions::assert_eq;

        use super::*;

        #[test_log::test]
        fn history_is_bounded_with_oldest_evicted_first() {
            let mut h = Harness::new(&[1]);
            let room_id = h.create(1);

            for i in 1..=51 {
                h.rooms
                    .post_chat(1, format!("message {i}"), &h.channel, &h.sessions, 0);
            }

            let texts = h
                .rooms
                .get(&room_id)
                .unwrap()
                .messages
                .iter()
                .map(|x| x.text.clone())
                .collect::<Vec<_>>();
            assert_eq!(texts.len(), MAX_MESSAGES);
            assert_eq!(texts.first().unwrap(), "message 2");
            assert_eq!(texts.last().unwrap(), "message 51");
            assert!(!texts.contains(&"message 1".to_string()));
        }

        #[test_log::test]
        fn message_ids_increase_and_names_resolve() {
            let mut h = Harness::new(&[1, 2]);
            let mut fields = Map::new();
            fields.insert("name".to_string(), json!("ann"));
            h.sessions.register(1, fields, 0);
            let room_id = h.create(1);
            h.join(2, &room_id).unwrap();

            h.rooms.post_chat(1, "a".to_string(), &h.channel, &h.sessions, 500);
            h.rooms.post_chat(2, "b".to_string(), &h.channel, &h.sessions, 500);

            let messages = &h.rooms.get(&room_id).unwrap().messages;
            assert_eq!(messages[0].user_name, "ann");
            assert_eq!(messages[1].user_name, DEFAULT_USER_NAME);
            assert!(messages[1].id > messages[0].id);
        }
    }

    mod leave_room {
        use pretty_assertions::assert_eq;

        use super::*;

        #[test_log::test]
        fn leader_departure_promotes_earliest_remaining_member() {
            let mut h = Harness::new(&[1, 2, 3]);
            let room_id = h.create(1);
            h.join(2, &room_id).unwrap();
            h.join(3, &room_id).unwrap();
            h.drain();

            h.leave(1);

            let room = h.rooms.get(&room_id).unwrap();
            assert_eq!(room.leader_id, 2);
            assert!(room.members.contains(&room.leader_id));
            assert_eq!(room.members, vec![2, 3]);
            assert_eq!(
                h.events(2),
                vec![
                    OutboundEvent::RoomUserLeft(RoomUserPayload {
                        user_id: 1,
                        user: None,
                    }),
                    OutboundEvent::RoomLeaderChanged(LeaderChangedPayload { new_leader_id: 2 }),
                    OutboundEvent::YouAreLeader,
                ]
            );
            assert_eq!(
                h.events(3),
                vec![
                    OutboundEvent::RoomUserLeft(RoomUserPayload {
                        user_id: 1,
                        user: None,
                    }),
                    OutboundEvent::RoomLeaderChanged(LeaderChangedPayload { new_leader_id: 2 }),
                ]
            );
            assert_eq!(h.events(1), vec![]);
        }

        #[test_log::test]
        fn non_leader_departure_keeps_leader() {
            let mut h = Harness::new(&[1, 2]);
            let room_id = h.create(1);
            h.join(2, &room_id).unwrap();

            h.leave(2);

            let room = h.rooms.get(&room_id).unwrap();
            assert_eq!(room.leader_id, 1);
            assert_eq!(room.members, vec![1]);
        }

        #[test_log::test]
        fn last_member_leaving_destroys_room() {
            let mut h = Harness::new(&[1, 2]);
            let room_id = h.create(1);

            h.leave(1);

            assert!(h.rooms.get(&room_id).is_none());
            assert!(h.rooms.room_of(1).is_none());
            assert!(h.channel.group_members(&room_id).is_empty());
            assert_eq!(h.join(2, &room_id), Err(RoomError::NotFound(room_id)));
        }

        #[test_log::test]
        fn leaving_without_room_is_a_no_op() {
            let mut h = Harness::new(&[1]);

            h.leave(1);

            assert_eq!(h.events(1), vec![]);
        }
    }
}
